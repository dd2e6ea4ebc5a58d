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

//! Scheduler
//!
//! Wires selection, dispatch and worker leases into one process-level
//! service. There is one [`DispatchCoordinator`] per worker kind; all of them
//! feed a single bounded worker pool.
//!
//! ```text
//!   interval tick ──► FairSelector / StalenessPoller ──► DispatchCoordinator
//!                                                              │
//!                                                     worker pool (semaphore)
//!                                                              │
//!                                                         WorkerLease
//! ```
//!
//! Background loops are started with [`Scheduler::start`] and stopped with
//! [`Scheduler::shutdown`], which also interrupts every live lease.

use futures::future::join_all;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::actions::{
    ActionKind, MonitoringAction, StagingAction, SubmissionAction, WorkerAction, WorkerContext,
};
use crate::config::SchedulerConfig;
use crate::dispatcher::DispatchCoordinator;
use crate::error::{InterruptError, StoreError};
use crate::events::EventSink;
use crate::filter::SelectionFilter;
use crate::lease::{LeaseControl, WorkerLease};
use crate::metrics;
use crate::models::{JobStatus, TransferStatus, WorkItemId, WorkStatus};
use crate::poller::StalenessPoller;
use crate::selector::FairSelector;
use crate::store::WorkItemStore;
use crate::systems::SystemRegistry;

/// The four periodic worker loops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerKind {
    InputStaging,
    FileStaging,
    Submission,
    Monitoring,
}

impl WorkerKind {
    pub const ALL: [WorkerKind; 4] = [
        WorkerKind::InputStaging,
        WorkerKind::FileStaging,
        WorkerKind::Submission,
        WorkerKind::Monitoring,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerKind::InputStaging => "input_staging",
            WorkerKind::FileStaging => "file_staging",
            WorkerKind::Submission => "submission",
            WorkerKind::Monitoring => "monitoring",
        }
    }

    pub fn action_kind(&self) -> ActionKind {
        match self {
            WorkerKind::InputStaging | WorkerKind::FileStaging => ActionKind::Staging,
            WorkerKind::Submission => ActionKind::Submission,
            WorkerKind::Monitoring => ActionKind::Monitoring,
        }
    }

    /// Status the fair selector picks from. Monitoring is polled by staleness instead.
    pub fn selection_status(&self) -> Option<WorkStatus> {
        match self {
            WorkerKind::InputStaging => Some(JobStatus::Pending.into()),
            WorkerKind::FileStaging => Some(TransferStatus::StagingQueued.into()),
            WorkerKind::Submission => Some(JobStatus::Staged.into()),
            WorkerKind::Monitoring => None,
        }
    }
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct Coordinators {
    input_staging: Arc<DispatchCoordinator>,
    file_staging: Arc<DispatchCoordinator>,
    submission: Arc<DispatchCoordinator>,
    monitoring: Arc<DispatchCoordinator>,
}

impl Coordinators {
    fn get(&self, kind: WorkerKind) -> &Arc<DispatchCoordinator> {
        match kind {
            WorkerKind::InputStaging => &self.input_staging,
            WorkerKind::FileStaging => &self.file_staging,
            WorkerKind::Submission => &self.submission,
            WorkerKind::Monitoring => &self.monitoring,
        }
    }
}

struct SchedulerCore {
    config: SchedulerConfig,
    filter: SelectionFilter,
    selector: FairSelector,
    poller: StalenessPoller,
    worker: Arc<WorkerContext>,
    pool: Arc<Semaphore>,
    coordinators: Coordinators,
    staging: StagingAction,
    submission: SubmissionAction,
    monitoring: MonitoringAction,
}

impl SchedulerCore {
    fn is_enabled(&self, kind: WorkerKind) -> bool {
        match kind {
            WorkerKind::InputStaging => self.config.enable_input_staging(),
            WorkerKind::FileStaging => self.config.enable_file_staging(),
            WorkerKind::Submission => self.config.enable_submission(),
            WorkerKind::Monitoring => self.config.enable_monitoring(),
        }
    }

    fn poll_interval(&self, kind: WorkerKind) -> Duration {
        match kind {
            WorkerKind::InputStaging | WorkerKind::FileStaging => {
                self.config.staging_poll_interval()
            }
            WorkerKind::Submission => self.config.submission_poll_interval(),
            WorkerKind::Monitoring => self.config.monitoring_poll_interval(),
        }
    }

    fn action(&self, kind: WorkerKind) -> WorkerAction {
        match kind {
            WorkerKind::InputStaging | WorkerKind::FileStaging => {
                WorkerAction::Staging(self.staging.clone())
            }
            WorkerKind::Submission => WorkerAction::Submission(self.submission.clone()),
            WorkerKind::Monitoring => WorkerAction::Monitoring(self.monitoring.clone()),
        }
    }

    async fn select(&self, kind: WorkerKind) -> Result<Option<WorkItemId>, StoreError> {
        match kind.selection_status() {
            Some(status) => self.selector.select_next(status, &self.filter).await,
            None => self.poller.select_next_to_monitor(&self.filter).await,
        }
    }

    async fn tick(&self, kind: WorkerKind) -> Result<bool, StoreError> {
        if self.config.drain_queues() {
            debug!(kind = kind.as_str(), "Draining queues, nothing selected");
            return Ok(false);
        }
        let Some(item_id) = self.select(kind).await? else {
            return Ok(false);
        };

        let action = self.action(kind);
        let worker = Arc::clone(&self.worker);
        let admitted = self
            .coordinators
            .get(kind)
            .try_dispatch(item_id, kind.action_kind(), move |guard| async move {
                WorkerLease::new(item_id, action, worker)
                    .with_claim(guard)
                    .run()
                    .await;
            });
        Ok(admitted)
    }

    /// Ticks until nothing more is admitted, at most `capacity` times.
    async fn fill(&self, kind: WorkerKind) {
        for _ in 0..self.coordinators.get(kind).capacity() {
            match self.tick(kind).await {
                Ok(true) => continue,
                Ok(false) => break,
                Err(e) => {
                    warn!(kind = kind.as_str(), "Scheduling tick failed: {}", e);
                    break;
                }
            }
        }
    }

    fn controls(&self) -> Vec<Arc<LeaseControl>> {
        WorkerKind::ALL
            .iter()
            .flat_map(|kind| self.coordinators.get(*kind).controls())
            .collect()
    }
}

#[derive(Default)]
struct RuntimeHandles {
    loops: Vec<JoinHandle<()>>,
    shutdown_tx: Option<broadcast::Sender<()>>,
}

/// Process-level scheduling service.
pub struct Scheduler {
    core: Arc<SchedulerCore>,
    runtime: Mutex<RuntimeHandles>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn WorkItemStore>,
        registry: Arc<dyn SystemRegistry>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self::with_selectors(
            FairSelector::new(Arc::clone(&store), Arc::clone(&registry)),
            StalenessPoller::new(
                Arc::clone(&store),
                config.backoff().clone(),
                config.monitoring_max_age(),
            ),
            config,
            store,
            registry,
            events,
        )
    }

    /// Scheduler whose random draws are reproducible.
    pub fn with_seed(
        config: SchedulerConfig,
        store: Arc<dyn WorkItemStore>,
        registry: Arc<dyn SystemRegistry>,
        events: Arc<dyn EventSink>,
        seed: u64,
    ) -> Self {
        Self::with_selectors(
            FairSelector::with_seed(Arc::clone(&store), Arc::clone(&registry), seed),
            StalenessPoller::new(
                Arc::clone(&store),
                config.backoff().clone(),
                config.monitoring_max_age(),
            )
            .with_seed(seed),
            config,
            store,
            registry,
            events,
        )
    }

    fn with_selectors(
        selector: FairSelector,
        poller: StalenessPoller,
        config: SchedulerConfig,
        store: Arc<dyn WorkItemStore>,
        registry: Arc<dyn SystemRegistry>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        metrics::register_metrics();
        let settings = config.action_settings();
        let pool = Arc::new(Semaphore::new(config.worker_pool_size()));
        let capacity = config.dedup_capacity();
        let coordinator = |kind: WorkerKind| {
            DispatchCoordinator::new(kind.as_str(), capacity, Arc::clone(&pool))
        };
        let coordinators = Coordinators {
            input_staging: coordinator(WorkerKind::InputStaging),
            file_staging: coordinator(WorkerKind::FileStaging),
            submission: coordinator(WorkerKind::Submission),
            monitoring: coordinator(WorkerKind::Monitoring),
        };

        let core = SchedulerCore {
            filter: config.selection_filter(),
            selector,
            poller,
            worker: Arc::new(WorkerContext::new(store, registry, events, settings.clone())),
            staging: StagingAction::from_settings(&settings),
            submission: SubmissionAction::from_settings(&settings),
            monitoring: MonitoringAction::default(),
            pool,
            coordinators,
            config,
        };
        Self {
            core: Arc::new(core),
            runtime: Mutex::new(RuntimeHandles::default()),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.core.config
    }

    pub fn selection_filter(&self) -> &SelectionFilter {
        &self.core.filter
    }

    pub fn coordinator(&self, kind: WorkerKind) -> &Arc<DispatchCoordinator> {
        self.core.coordinators.get(kind)
    }

    /// Number of leases currently running across all worker kinds.
    pub fn live_workers(&self) -> usize {
        self.core.controls().len()
    }

    /// Performs one selection for `kind` and dispatches the result.
    ///
    /// Returns whether a worker was admitted. Selecting nothing, or an item
    /// this process already holds, returns `false`.
    pub async fn tick(&self, kind: WorkerKind) -> Result<bool, StoreError> {
        self.core.tick(kind).await
    }

    pub fn is_running(&self) -> bool {
        self.runtime.lock().shutdown_tx.is_some()
    }

    /// Spawns one periodic loop per enabled worker kind.
    pub fn start(&self) {
        let mut runtime = self.runtime.lock();
        if runtime.shutdown_tx.is_some() {
            warn!("Scheduler already started");
            return;
        }

        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        for kind in WorkerKind::ALL {
            if !self.core.is_enabled(kind) {
                info!(kind = kind.as_str(), "Worker loop disabled");
                continue;
            }
            let core = Arc::clone(&self.core);
            let mut shutdown_rx = shutdown_tx.subscribe();
            let period = core.poll_interval(kind);

            runtime.loops.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                info!(kind = kind.as_str(), period_ms = period.as_millis() as u64, "Worker loop started");
                loop {
                    tokio::select! {
                        _ = ticker.tick() => core.fill(kind).await,
                        _ = shutdown_rx.recv() => {
                            info!(kind = kind.as_str(), "Worker loop shutdown requested");
                            break;
                        }
                    }
                }
            }));
        }
        runtime.shutdown_tx = Some(shutdown_tx);
    }

    /// Stops the loops, closes the worker pool and interrupts every live lease.
    ///
    /// Returns the interrupts that were not honored within `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> Vec<InterruptError> {
        let (shutdown_tx, loops) = {
            let mut runtime = self.runtime.lock();
            (runtime.shutdown_tx.take(), std::mem::take(&mut runtime.loops))
        };
        if let Some(tx) = shutdown_tx {
            let _ = tx.send(());
        }
        for handle in loops {
            if let Err(e) = handle.await {
                warn!("Worker loop ended abnormally: {}", e);
            }
        }

        self.core.pool.close();
        let controls = self.core.controls();
        info!(live_workers = controls.len(), "Interrupting live workers");
        join_all(controls.iter().map(|control| control.interrupt(timeout)))
            .await
            .into_iter()
            .filter_map(Result::err)
            .collect()
    }

    /// Interrupts the live lease on `item_id`, if this process holds one.
    ///
    /// Returns `Ok(false)` when no lease for the item is running here.
    pub async fn interrupt(&self, item_id: &WorkItemId) -> Result<bool, InterruptError> {
        for kind in WorkerKind::ALL {
            if let Some(control) = self.core.coordinators.get(kind).control(item_id) {
                control.interrupt(self.core.config.interrupt_timeout()).await?;
                return Ok(true);
            }
        }
        Ok(false)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(tx) = self.runtime.lock().shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("running", &self.is_running())
            .field("live_workers", &self.live_workers())
            .finish()
    }
}
