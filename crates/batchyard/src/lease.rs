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

//! Worker Lease
//!
//! A lease wraps one worker's handling of one item:
//!
//! ```text
//! Idle -> Claimed -> Executing -> {Completed | Failed | Interrupted} -> Released
//! ```
//!
//! Claiming reloads the record and silently gives up if it is gone or no
//! longer runnable. Execution runs the item's [`WorkerAction`]; a panic or an
//! unhandled failure is turned into a terminal failure so no item is left
//! stuck in an in-progress status. Release always runs: connections are
//! closed, the completion flag is raised and the dispatch claim is dropped.
//!
//! Stop requests go through [`LeaseControl::interrupt`], which raises the
//! stop flag, fires the abort signal for in-flight remote calls and waits a
//! bounded time for the worker to finish.

use futures::FutureExt;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::actions::{failed_status, is_finished, ActionContext, ActionKind, WorkerAction, WorkerContext};
use crate::dispatcher::ClaimGuard;
use crate::error::{InterruptError, StoreError};
use crate::metrics;
use crate::models::{WorkItem, WorkItemEventType, WorkItemId};
use crate::outcome::{Failure, FailureKind, Outcome};
use crate::systems::AbortSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LeaseState {
    Idle,
    Claimed,
    Executing,
    Completed,
    Failed,
    Interrupted,
    Released,
}

impl LeaseState {
    fn from_outcome(outcome: &Outcome) -> Self {
        match outcome.kind() {
            None | Some(FailureKind::ConcurrencyConflict) => LeaseState::Completed,
            Some(FailureKind::Interrupted) => LeaseState::Interrupted,
            Some(_) => LeaseState::Failed,
        }
    }
}

/// Shared handle to a running lease.
///
/// The worker task and whoever wants to stop it hold the same control.
#[derive(Debug)]
pub struct LeaseControl {
    item_id: WorkItemId,
    action: ActionKind,
    stopped: AtomicBool,
    task_complete: AtomicBool,
    completed: Notify,
    abort: AbortSignal,
    state: Mutex<LeaseState>,
    /// Latest record the worker has seen
    current: Mutex<Option<WorkItem>>,
}

impl LeaseControl {
    pub fn new(item_id: WorkItemId, action: ActionKind) -> Arc<Self> {
        Arc::new(Self {
            item_id,
            action,
            stopped: AtomicBool::new(false),
            task_complete: AtomicBool::new(false),
            completed: Notify::new(),
            abort: AbortSignal::new(),
            state: Mutex::new(LeaseState::Idle),
            current: Mutex::new(None),
        })
    }

    pub fn item_id(&self) -> WorkItemId {
        self.item_id
    }

    pub fn action(&self) -> ActionKind {
        self.action
    }

    pub fn state(&self) -> LeaseState {
        *self.state.lock()
    }

    fn set_state(&self, state: LeaseState) {
        *self.state.lock() = state;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    pub fn is_task_complete(&self) -> bool {
        self.task_complete.load(Ordering::SeqCst)
    }

    pub fn abort_signal(&self) -> AbortSignal {
        self.abort.clone()
    }

    /// Latest record the worker saved or loaded.
    pub fn current(&self) -> Option<WorkItem> {
        self.current.lock().clone()
    }

    pub(crate) fn set_current(&self, item: &WorkItem) {
        *self.current.lock() = Some(item.clone());
    }

    /// Raises the stop flag and aborts in-flight remote calls without waiting.
    pub fn request_stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.abort.abort();
    }

    /// Requests a stop and waits up to `timeout` for the worker to finish.
    pub async fn interrupt(&self, timeout: Duration) -> Result<(), InterruptError> {
        debug!(item_id = %self.item_id, action = %self.action, "Interrupting worker");
        self.request_stop();

        let finished = tokio::time::timeout(timeout, async {
            loop {
                let notified = self.completed.notified();
                if self.is_task_complete() {
                    return;
                }
                notified.await;
            }
        })
        .await;

        match finished {
            Ok(()) => Ok(()),
            Err(_) => {
                warn!(
                    item_id = %self.item_id,
                    action = %self.action,
                    "Worker did not honor stop request within {:?}",
                    timeout
                );
                metrics::record_interrupt_timeout(self.action.as_str());
                Err(InterruptError::Timeout {
                    item_id: self.item_id,
                    timeout,
                })
            }
        }
    }

    fn mark_complete(&self) {
        self.task_complete.store(true, Ordering::SeqCst);
        self.completed.notify_waiters();
    }
}

/// Raises the completion flag when dropped, so waiters are released even
/// if the worker unwinds.
struct CompletionGuard(Arc<LeaseControl>);

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        self.0.mark_complete();
    }
}

/// Claim, execute and release of one work item.
pub struct WorkerLease {
    item_id: WorkItemId,
    action: WorkerAction,
    worker: Arc<WorkerContext>,
    control: Arc<LeaseControl>,
    prefetched: Option<WorkItem>,
    claim: Option<ClaimGuard>,
}

impl WorkerLease {
    pub fn new(item_id: WorkItemId, action: WorkerAction, worker: Arc<WorkerContext>) -> Self {
        let control = LeaseControl::new(item_id, action.kind());
        Self {
            item_id,
            action,
            worker,
            control,
            prefetched: None,
            claim: None,
        }
    }

    /// Uses `item` instead of loading it at claim time.
    pub fn with_item(mut self, item: WorkItem) -> Self {
        self.prefetched = Some(item);
        self
    }

    /// Ties the lease to a dispatch claim, released when the lease finishes.
    pub fn with_claim(mut self, claim: ClaimGuard) -> Self {
        claim.coordinator().attach(&self.item_id, Arc::clone(&self.control));
        self.claim = Some(claim);
        self
    }

    pub fn control(&self) -> Arc<LeaseControl> {
        Arc::clone(&self.control)
    }

    /// Runs the lease to completion and returns the state it ended in
    /// before release.
    pub async fn run(mut self) -> LeaseState {
        let started = Instant::now();
        let claim = self.claim.take();
        let completion = CompletionGuard(Arc::clone(&self.control));
        let ctx = ActionContext::new(Arc::clone(&self.worker), Arc::clone(&self.control));

        let outcome = match self.claim_item().await {
            Some(item) => {
                self.control.set_state(LeaseState::Claimed);
                self.control.set_current(&item);
                let outcome = self.execute(&ctx, item).await;
                self.control.set_state(LeaseState::from_outcome(&outcome));
                Some(outcome)
            }
            None => None,
        };

        // Release
        ctx.disconnect_all().await;
        drop(completion);
        drop(claim);
        self.control.set_state(LeaseState::Released);

        match outcome {
            Some(outcome) => {
                metrics::record_action(
                    self.action.kind().as_str(),
                    outcome.as_str(),
                    started.elapsed().as_secs_f64(),
                );
                LeaseState::from_outcome(&outcome)
            }
            None => LeaseState::Idle,
        }
    }

    async fn claim_item(&mut self) -> Option<WorkItem> {
        let item = match self.prefetched.take() {
            Some(item) => Some(item),
            None => match self.worker.store.get(&self.item_id).await {
                Ok(item) => item,
                Err(e) => {
                    warn!(item_id = %self.item_id, "Unable to load work item: {}", e);
                    None
                }
            },
        };
        match item {
            Some(item) if self.action.is_claimable(&item) => Some(item),
            Some(item) => {
                debug!(
                    item_id = %self.item_id,
                    status = %item.status,
                    action = %self.action.kind(),
                    "Work item is no longer eligible, skipping"
                );
                None
            }
            None => {
                debug!(item_id = %self.item_id, "Work item not found, skipping");
                None
            }
        }
    }

    async fn execute(&self, ctx: &ActionContext, item: WorkItem) -> Outcome {
        self.control.set_state(LeaseState::Executing);
        let result = AssertUnwindSafe(self.action.run(ctx, item))
            .catch_unwind()
            .await;

        let outcome = match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(failure)) => self.handle_unhandled(ctx, failure).await,
            Err(panic) => {
                let message = panic_message(&panic);
                error!(
                    item_id = %self.item_id,
                    action = %self.action.kind(),
                    "Worker action panicked: {}",
                    message
                );
                let message = format!("Unexpected worker error: {}", message);
                self.fail_item(ctx, &message).await;
                Outcome::Fatal(message)
            }
        };
        debug!(
            item_id = %self.item_id,
            action = %self.action.kind(),
            outcome = outcome.as_str(),
            "Worker action finished"
        );
        outcome
    }

    async fn handle_unhandled(&self, ctx: &ActionContext, failure: Failure) -> Outcome {
        match failure.kind {
            FailureKind::ConcurrencyConflict => {
                debug!(item_id = %self.item_id, "Race avoided: {}", failure.message);
                Outcome::ConcurrencyConflict(failure.message)
            }
            FailureKind::Unavailable => {
                info!(item_id = %self.item_id, "Dependency unavailable: {}", failure.message);
                Outcome::Unavailable(failure.message)
            }
            FailureKind::Interrupted => {
                self.rollback(ctx).await;
                Outcome::Interrupted
            }
            FailureKind::Fatal | FailureKind::Retryable => {
                error!(
                    item_id = %self.item_id,
                    action = %self.action.kind(),
                    "Unhandled worker failure: {}",
                    failure
                );
                self.fail_item(ctx, &failure.message).await;
                Outcome::Fatal(failure.message)
            }
        }
    }

    /// Returns an interrupted item to its re-queueable status.
    async fn rollback(&self, ctx: &ActionContext) {
        let mut item = match ctx.reload(&self.item_id).await {
            Ok(Some(item)) => item,
            Ok(None) => return,
            Err(e) => {
                error!(item_id = %self.item_id, "Failed to roll back interrupted item: {}", e);
                return;
            }
        };
        let Some(status) = self.action.rollback_status(&item) else {
            return;
        };
        if item.status == status {
            return;
        }
        let message = format!(
            "{} reset due to worker shutdown. Work will resume in another worker automatically.",
            self.action.kind()
        );
        match ctx.update_status(&mut item, status, message).await {
            Ok(()) => {
                ctx.event(&item, WorkItemEventType::Interrupted, "Worker interrupted")
                    .await
            }
            Err(e) => warn!(item_id = %self.item_id, "Failed to roll back interrupted item: {}", e),
        }
    }

    /// Last-resort terminal failure for anything the action did not handle.
    async fn fail_item(&self, ctx: &ActionContext, message: &str) {
        let mut item = match ctx.reload(&self.item_id).await {
            Ok(Some(item)) => item,
            Ok(None) => return,
            Err(e) => {
                error!(item_id = %self.item_id, "Unable to mark item failed: {}", e);
                return;
            }
        };
        if is_finished(&item) {
            return;
        }
        let status = failed_status(&item);
        match ctx.update_status(&mut item, status, message).await {
            Ok(()) => ctx.event(&item, WorkItemEventType::Failed, message).await,
            Err(StoreError::ConcurrencyConflict { .. }) => {
                debug!(item_id = %self.item_id, "Race avoided while failing item")
            }
            Err(e) => error!(item_id = %self.item_id, "Unable to mark item failed: {}", e),
        }
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
