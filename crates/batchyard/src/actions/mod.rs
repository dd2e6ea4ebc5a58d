/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Worker actions.
//!
//! Each action is the type-specific business logic a [`WorkerLease`] runs
//! for one item:
//!
//! - [`StagingAction`] copies job inputs and transfer sources into place
//! - [`SubmissionAction`] launches staged jobs on their execution system
//! - [`MonitoringAction`] polls in-flight jobs for their remote status
//!
//! Actions persist their own transitions and report what they did as an
//! [`Outcome`]. A failure they cannot handle is returned as a [`Failure`]
//! and handled by the lease as a last resort.
//!
//! [`WorkerLease`]: crate::lease::WorkerLease

pub mod monitoring;
pub mod quota_check;
pub mod staging;
pub mod submission;

pub use monitoring::MonitoringAction;
pub use staging::StagingAction;
pub use submission::SubmissionAction;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

use crate::error::{RemoteError, StoreError};
use crate::events::{self, EventSink};
use crate::lease::LeaseControl;
use crate::models::{
    JobStatus, RemoteSystem, TransferStatus, WorkItem, WorkItemEvent, WorkItemEventType,
    WorkItemId, WorkStatus,
};
use crate::outcome::{Failure, Outcome, RetryPolicy};
use crate::store::WorkItemStore;
use crate::systems::{AbortSignal, RemoteClient, RemoteScheduler, ResolvedUri, SystemRegistry};

/// Action type, part of every dispatch identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Staging,
    Submission,
    Monitoring,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Staging => "staging",
            ActionKind::Submission => "submission",
            ActionKind::Monitoring => "monitoring",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Retry budgets and deadlines shared by all actions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionSettings {
    pub max_staging_retries: u32,
    pub max_submission_retries: u32,
    /// Jobs older than this are killed instead of staged
    pub input_staging_deadline: Duration,
    /// Jobs older than this are killed instead of submitted
    pub submission_deadline: Duration,
}

impl Default for ActionSettings {
    fn default() -> Self {
        Self {
            max_staging_retries: 3,
            max_submission_retries: 3,
            input_staging_deadline: Duration::from_secs(7 * 24 * 60 * 60),
            submission_deadline: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }
}

/// Collaborators shared by every lease in a process.
pub struct WorkerContext {
    pub store: Arc<dyn WorkItemStore>,
    pub registry: Arc<dyn SystemRegistry>,
    pub events: Arc<dyn EventSink>,
    pub settings: ActionSettings,
}

impl WorkerContext {
    pub fn new(
        store: Arc<dyn WorkItemStore>,
        registry: Arc<dyn SystemRegistry>,
        events: Arc<dyn EventSink>,
        settings: ActionSettings,
    ) -> Self {
        Self {
            store,
            registry,
            events,
            settings,
        }
    }
}

enum Connection {
    Client(Arc<dyn RemoteClient>),
    Scheduler(Arc<dyn RemoteScheduler>),
}

/// Per-lease view of the collaborators.
///
/// Every connection opened through the context is disconnected when the
/// lease releases, whatever the action did.
pub struct ActionContext {
    worker: Arc<WorkerContext>,
    control: Arc<LeaseControl>,
    connections: Mutex<Vec<Connection>>,
}

impl ActionContext {
    pub fn new(worker: Arc<WorkerContext>, control: Arc<LeaseControl>) -> Self {
        Self {
            worker,
            control,
            connections: Mutex::new(Vec::new()),
        }
    }

    pub fn store(&self) -> &dyn WorkItemStore {
        self.worker.store.as_ref()
    }

    pub fn registry(&self) -> &dyn SystemRegistry {
        self.worker.registry.as_ref()
    }

    pub fn settings(&self) -> &ActionSettings {
        &self.worker.settings
    }

    pub fn control(&self) -> &Arc<LeaseControl> {
        &self.control
    }

    pub fn abort_signal(&self) -> AbortSignal {
        self.control.abort_signal()
    }

    /// Cooperative cancellation point.
    pub fn checkpoint(&self) -> Result<(), StepError> {
        if self.control.is_stopped() {
            Err(StepError::Stopped)
        } else {
            Ok(())
        }
    }

    /// Opens and authenticates a storage connection to `system`.
    pub async fn connect(
        &self,
        system: &RemoteSystem,
        owner: &str,
    ) -> Result<Arc<dyn RemoteClient>, RemoteError> {
        let client = self.registry().get_client(system, owner).await?;
        self.connections
            .lock()
            .push(Connection::Client(Arc::clone(&client)));
        client.authenticate().await?;
        Ok(client)
    }

    /// Opens a scheduler connection to `system`.
    pub async fn connect_scheduler(
        &self,
        system: &RemoteSystem,
        owner: &str,
    ) -> Result<Arc<dyn RemoteScheduler>, RemoteError> {
        let scheduler = self.registry().get_scheduler(system, owner).await?;
        self.connections
            .lock()
            .push(Connection::Scheduler(Arc::clone(&scheduler)));
        Ok(scheduler)
    }

    /// Resolves and authenticates the connection serving `uri`.
    pub async fn connect_uri(
        &self,
        tenant_id: &str,
        owner: &str,
        uri: &Url,
    ) -> Result<ResolvedUri, RemoteError> {
        let resolved = self.registry().resolve_uri(tenant_id, owner, uri).await?;
        self.connections
            .lock()
            .push(Connection::Client(Arc::clone(&resolved.client)));
        resolved.client.authenticate().await?;
        Ok(resolved)
    }

    /// Disconnects every connection opened through this context.
    pub async fn disconnect_all(&self) {
        let connections: Vec<Connection> = std::mem::take(&mut *self.connections.lock());
        for connection in connections {
            match connection {
                Connection::Client(client) => client.disconnect().await,
                Connection::Scheduler(scheduler) => scheduler.disconnect().await,
            }
        }
    }

    pub fn open_connections(&self) -> usize {
        self.connections.lock().len()
    }

    /// Loads the current record of `item_id`.
    pub async fn reload(&self, item_id: &WorkItemId) -> Result<Option<WorkItem>, StoreError> {
        self.store().get(item_id).await
    }

    /// Saves `item`, replacing it with the stored copy.
    pub async fn save(&self, item: &mut WorkItem) -> Result<(), StoreError> {
        let saved = self.store().save(item).await?;
        *item = saved;
        self.control.set_current(item);
        Ok(())
    }

    /// Moves `item` to `status`, saves it and records the transition.
    pub async fn update_status(
        &self,
        item: &mut WorkItem,
        status: impl Into<WorkStatus>,
        message: impl Into<String>,
    ) -> Result<(), StoreError> {
        let status = status.into();
        let message = message.into();
        item.transition(status, Utc::now());
        self.save(item).await?;
        debug!(item_id = %item.id, %status, "{}", message);
        self.event(item, WorkItemEventType::StatusChange, message).await;
        Ok(())
    }

    /// Records an audit event for `item`. Never fails.
    pub async fn event(
        &self,
        item: &WorkItem,
        event_type: WorkItemEventType,
        message: impl Into<String>,
    ) {
        events::record(
            self.worker.events.as_ref(),
            WorkItemEvent::new(item.id, event_type, Some(item.status), message),
        )
        .await;
    }
}

/// Raw failure inside an action step, before classification.
#[derive(Debug, Error)]
pub enum StepError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("stop requested")]
    Stopped,

    #[error("{0}")]
    Fatal(String),
}

impl StepError {
    /// Classifies the error under `policy`. Called once per failure.
    pub fn classify(&self, policy: &RetryPolicy) -> Failure {
        match self {
            StepError::Remote(RemoteError::Aborted) | StepError::Stopped => Failure::interrupted(),
            StepError::Remote(e) => policy.classify(e),
            StepError::Store(e) => Failure::from(e.clone()),
            StepError::Fatal(message) => Failure::fatal(message.clone()),
        }
    }
}

/// The three action types behind one dispatch switch.
#[derive(Debug, Clone)]
pub enum WorkerAction {
    Staging(StagingAction),
    Submission(SubmissionAction),
    Monitoring(MonitoringAction),
}

impl WorkerAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            WorkerAction::Staging(_) => ActionKind::Staging,
            WorkerAction::Submission(_) => ActionKind::Submission,
            WorkerAction::Monitoring(_) => ActionKind::Monitoring,
        }
    }

    /// Whether a freshly loaded record is still something this action may run.
    pub fn is_claimable(&self, item: &WorkItem) -> bool {
        if !item.visible {
            return false;
        }
        match self {
            WorkerAction::Staging(_) => StagingAction::is_claimable(item),
            WorkerAction::Submission(_) => SubmissionAction::is_claimable(item),
            WorkerAction::Monitoring(_) => MonitoringAction::is_claimable(item),
        }
    }

    pub async fn run(&self, ctx: &ActionContext, item: WorkItem) -> Result<Outcome, Failure> {
        match self {
            WorkerAction::Staging(action) => action.run(ctx, item).await,
            WorkerAction::Submission(action) => action.run(ctx, item).await,
            WorkerAction::Monitoring(action) => action.run(ctx, item).await,
        }
    }

    /// Status an interrupted item is returned to, if any.
    pub fn rollback_status(&self, item: &WorkItem) -> Option<WorkStatus> {
        match self {
            WorkerAction::Staging(_) => StagingAction::rollback_status(item),
            WorkerAction::Submission(_) => SubmissionAction::rollback_status(item),
            WorkerAction::Monitoring(_) => None,
        }
    }
}

/// Terminal failure status for the item's kind.
pub fn failed_status(item: &WorkItem) -> WorkStatus {
    match item.status {
        WorkStatus::Job(_) => JobStatus::Failed.into(),
        WorkStatus::Transfer(_) => TransferStatus::StagingFailed.into(),
    }
}

/// Whether the item has already reached a terminal status.
pub fn is_finished(item: &WorkItem) -> bool {
    match item.status {
        WorkStatus::Job(s) => s.is_terminal(),
        WorkStatus::Transfer(s) => matches!(
            s,
            TransferStatus::StagingCompleted | TransferStatus::StagingFailed
        ),
    }
}

/// Whether `item` was created more than `deadline` before `now`.
pub(crate) fn past_deadline(item: &WorkItem, deadline: Duration, now: DateTime<Utc>) -> bool {
    (now - item.created_at)
        .to_std()
        .map_or(false, |age| age > deadline)
}

/// Resolves the item's execution system, failing unless it is up.
pub(crate) async fn resolve_available_system(
    ctx: &ActionContext,
    item: &WorkItem,
) -> Result<RemoteSystem, StepError> {
    let system = ctx
        .registry()
        .resolve_system(&item.tenant_id, &item.execution_system_id)
        .await?;
    if !system.is_up() {
        return Err(RemoteError::SystemUnavailable(system.id).into());
    }
    Ok(system)
}

/// Kills, then fails, a job that missed its deadline.
pub(crate) async fn expire(
    ctx: &ActionContext,
    job: &mut WorkItem,
    message: &str,
) -> Result<(), StoreError> {
    warn!(item_id = %job.id, owner = %job.owner, "{}", message);
    ctx.update_status(job, JobStatus::Killed, message).await?;
    ctx.update_status(job, JobStatus::Failed, message).await?;
    ctx.event(job, WorkItemEventType::Failed, message).await;
    Ok(())
}

/// Maps the outcome of persisting a handled failure.
///
/// A conflict while writing the failure means someone else moved the item;
/// that is not our failure to report.
pub(crate) fn persisted(result: Result<(), StoreError>, outcome: Outcome) -> Result<Outcome, Failure> {
    match result {
        Ok(()) => Ok(outcome),
        Err(e @ (StoreError::ConcurrencyConflict { .. } | StoreError::NotFound(_))) => {
            debug!("Race avoided while recording outcome: {}", e);
            Ok(Outcome::ConcurrencyConflict(e.to_string()))
        }
        Err(e) => Err(Failure::from(e)),
    }
}
