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

//! Dispatch Coordinator
//!
//! Turns a selected item into at most one running worker per process. The
//! coordinator owns a bounded de-duplication set of claimed item ids:
//!
//! - an id already in the set is never dispatched again until released
//! - no claim is admitted once the set holds `capacity` entries
//! - every admitted claim is released exactly once, by dropping its
//!   [`ClaimGuard`], which also happens while unwinding from a panic
//!
//! Admitted work runs on a shared worker pool bounded by a semaphore. Pool
//! size and per-coordinator capacity together bound in-flight work.
//!
//! ```rust,ignore
//! let admitted = coordinator.try_dispatch(item_id, ActionKind::Staging, |guard| async move {
//!     WorkerLease::new(item_id, action, ctx).with_claim(guard).run().await;
//! });
//! ```

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{debug, info_span, warn, Instrument};

use crate::actions::ActionKind;
use crate::lease::LeaseControl;
use crate::metrics;
use crate::models::WorkItemId;

/// Identity of one scheduled action, unique per (action, item).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DispatchId {
    pub action: ActionKind,
    pub item_id: WorkItemId,
}

impl fmt::Display for DispatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.action.as_str(), self.item_id)
    }
}

#[derive(Debug)]
struct Claim {
    dispatch_id: DispatchId,
    claimed_at: Instant,
    control: Option<Arc<LeaseControl>>,
}

/// Why a dispatch was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// The item is already claimed in this process
    Duplicate,
    /// The claim set is full
    AtCapacity,
}

impl Rejection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rejection::Duplicate => "duplicate",
            Rejection::AtCapacity => "capacity",
        }
    }
}

/// Bounded de-duplication set plus the worker pool it feeds.
pub struct DispatchCoordinator {
    name: &'static str,
    capacity: usize,
    claims: Mutex<HashMap<WorkItemId, Claim>>,
    pool: Arc<Semaphore>,
}

impl DispatchCoordinator {
    /// Creates a coordinator admitting at most `capacity` concurrent claims.
    pub fn new(name: &'static str, capacity: usize, pool: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self {
            name,
            capacity,
            claims: Mutex::new(HashMap::new()),
            pool,
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of claims currently held.
    pub fn len(&self) -> usize {
        self.claims.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.lock().is_empty()
    }

    pub fn is_claimed(&self, item_id: &WorkItemId) -> bool {
        self.claims.lock().contains_key(item_id)
    }

    /// Claims `item_id` if it is not already claimed and capacity remains.
    pub fn try_claim(
        self: &Arc<Self>,
        item_id: WorkItemId,
        action: ActionKind,
    ) -> Result<ClaimGuard, Rejection> {
        let dispatch_id = DispatchId { action, item_id };
        let in_flight = {
            let mut claims = self.claims.lock();
            if claims.contains_key(&item_id) {
                drop(claims);
                return Err(self.reject(dispatch_id, Rejection::Duplicate));
            }
            if claims.len() >= self.capacity {
                drop(claims);
                return Err(self.reject(dispatch_id, Rejection::AtCapacity));
            }
            claims.insert(
                item_id,
                Claim {
                    dispatch_id,
                    claimed_at: Instant::now(),
                    control: None,
                },
            );
            claims.len()
        };
        metrics::record_dispatch_admitted(self.name, in_flight);
        Ok(ClaimGuard {
            coordinator: Arc::clone(self),
            dispatch_id,
            released: false,
        })
    }

    fn reject(&self, dispatch_id: DispatchId, reason: Rejection) -> Rejection {
        debug!(
            coordinator = self.name,
            dispatch_id = %dispatch_id,
            reason = reason.as_str(),
            "Dispatch not admitted"
        );
        metrics::record_dispatch_rejected(self.name, reason.as_str());
        reason
    }

    /// Claims `item_id` and, if admitted, runs `work` on the worker pool.
    ///
    /// Returns immediately. `work` receives the claim guard; the claim is
    /// released when the guard is dropped, whether the work finishes, fails,
    /// panics or is never started because the pool was closed.
    pub fn try_dispatch<F, Fut>(self: &Arc<Self>, item_id: WorkItemId, action: ActionKind, work: F) -> bool
    where
        F: FnOnce(ClaimGuard) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let guard = match self.try_claim(item_id, action) {
            Ok(guard) => guard,
            Err(_) => return false,
        };
        let dispatch_id = guard.dispatch_id();
        let pool = Arc::clone(&self.pool);
        let task = work(guard);
        let span = info_span!("dispatch", id = %dispatch_id);

        tokio::spawn(
            async move {
                let _permit = match pool.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        warn!("Worker pool closed before dispatch could start");
                        return;
                    }
                };
                task.await;
            }
            .instrument(span),
        );
        true
    }

    /// Associates a running lease with its claim so it can be interrupted.
    pub fn attach(&self, item_id: &WorkItemId, control: Arc<LeaseControl>) {
        if let Some(claim) = self.claims.lock().get_mut(item_id) {
            claim.control = Some(control);
        }
    }

    /// Lease control of a claimed item, once its lease has started.
    pub fn control(&self, item_id: &WorkItemId) -> Option<Arc<LeaseControl>> {
        self.claims
            .lock()
            .get(item_id)
            .and_then(|claim| claim.control.clone())
    }

    /// Controls of every started lease.
    pub fn controls(&self) -> Vec<Arc<LeaseControl>> {
        self.claims
            .lock()
            .values()
            .filter_map(|claim| claim.control.clone())
            .collect()
    }

    /// Removes the claim on `item_id`. Returns whether a claim was present.
    pub fn release(&self, item_id: &WorkItemId) -> bool {
        let (removed, in_flight) = {
            let mut claims = self.claims.lock();
            let removed = claims.remove(item_id);
            (removed, claims.len())
        };
        match removed {
            Some(claim) => {
                debug!(
                    coordinator = self.name,
                    dispatch_id = %claim.dispatch_id,
                    held_ms = claim.claimed_at.elapsed().as_millis() as u64,
                    "Released claim"
                );
                metrics::record_claim_released(self.name, in_flight);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for DispatchCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchCoordinator")
            .field("name", &self.name)
            .field("capacity", &self.capacity)
            .field("claimed", &self.len())
            .finish()
    }
}

/// An admitted claim. Dropping it releases the claim.
pub struct ClaimGuard {
    coordinator: Arc<DispatchCoordinator>,
    dispatch_id: DispatchId,
    released: bool,
}

impl ClaimGuard {
    pub fn dispatch_id(&self) -> DispatchId {
        self.dispatch_id
    }

    pub fn item_id(&self) -> WorkItemId {
        self.dispatch_id.item_id
    }

    pub fn coordinator(&self) -> &Arc<DispatchCoordinator> {
        &self.coordinator
    }

    /// Releases the claim now rather than at drop.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if !self.released {
            self.released = true;
            self.coordinator.release(&self.dispatch_id.item_id);
        }
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

impl fmt::Debug for ClaimGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClaimGuard")
            .field("dispatch_id", &self.dispatch_id)
            .field("released", &self.released)
            .finish()
    }
}
