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

//! Fair Selector
//!
//! Picks the next work item to dispatch for a given status in two phases:
//!
//! 1. **Owner selection.** Every (owner, tenant) pair with at least one
//!    candidate whose queue still has room, both system-wide and for that
//!    owner, is collected. One pair is drawn uniformly at random.
//! 2. **Item selection.** One of the winning owner's admissible candidates is
//!    drawn uniformly at random.
//!
//! Drawing the owner first means an owner with a thousand queued items gets
//! the same share of ticks as an owner with one.
//!
//! Quotas are recomputed on every call from a snapshot of the active items,
//! so the result always reflects current contention. Sampling is done in
//! memory with reservoir selection over the eligible set.
//!
//! ```rust,ignore
//! let selector = FairSelector::new(store, registry);
//! if let Some(id) = selector.select_next(JobStatus::Staged.into(), &filter).await? {
//!     coordinator.try_dispatch(id, ...);
//! }
//! ```

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::{IteratorRandom, SliceRandom};
use rand::SeedableRng;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

use crate::error::{RemoteError, StoreError};
use crate::filter::{SelectionFilter, TenantFilter};
use crate::models::{
    ContentionSnapshot, JobStatus, QueueKey, QueueQuota, TransferStatus, WorkItem, WorkItemId,
    WorkStatus,
};
use crate::store::{ItemQuery, WorkItemStore};
use crate::systems::SystemRegistry;

/// Two-phase owner-fair selector.
pub struct FairSelector {
    store: Arc<dyn WorkItemStore>,
    registry: Arc<dyn SystemRegistry>,
    rng: Mutex<StdRng>,
}

impl FairSelector {
    pub fn new(store: Arc<dyn WorkItemStore>, registry: Arc<dyn SystemRegistry>) -> Self {
        Self {
            store,
            registry,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Selector with a deterministic random source.
    pub fn with_seed(
        store: Arc<dyn WorkItemStore>,
        registry: Arc<dyn SystemRegistry>,
        seed: u64,
    ) -> Self {
        Self {
            store,
            registry,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Returns one eligible item in `status`, or `None` when nothing can run.
    ///
    /// A concurrency conflict reported by the store is logged and treated as
    /// `None`; the next tick tries again.
    pub async fn select_next(
        &self,
        status: WorkStatus,
        filter: &SelectionFilter,
    ) -> Result<Option<WorkItemId>, StoreError> {
        let items = match self.store.query(&contention_query(status, &filter.tenant)).await {
            Ok(items) => items,
            Err(StoreError::ConcurrencyConflict { id, .. }) => {
                debug!(item_id = %id, %status, "Selection raced a concurrent update, skipping tick");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let snapshot = ContentionSnapshot::from_items(&items, &status);
        let mut quotas: HashMap<QueueKey, Option<QueueQuota>> = HashMap::new();
        let mut eligible: BTreeMap<(String, String), Vec<WorkItemId>> = BTreeMap::new();

        for item in items.iter().filter(|i| is_candidate(i, status, filter)) {
            let key = QueueKey::of(item);
            let quota = match quotas.get(&key) {
                Some(quota) => *quota,
                None => {
                    let quota = self.quota_for(item, &key).await;
                    quotas.insert(key.clone(), quota);
                    quota
                }
            };
            let Some(quota) = quota else {
                continue;
            };
            if snapshot.admits(&item.owner, &key, &quota, status.requires_backlog()) {
                eligible
                    .entry((item.owner.clone(), item.tenant_id.clone()))
                    .or_default()
                    .push(item.id);
            }
        }

        let selected = {
            let mut rng = self.rng.lock();
            eligible
                .iter()
                .choose(&mut *rng)
                .and_then(|(_, ids)| ids.choose(&mut *rng).copied())
        };

        match selected {
            Some(id) => debug!(item_id = %id, %status, owners = eligible.len(), "Selected work item"),
            None => debug!(%status, "No eligible work items"),
        }
        Ok(selected)
    }

    /// Quota for the candidate's queue, or `None` when it cannot run there now.
    async fn quota_for(&self, item: &WorkItem, key: &QueueKey) -> Option<QueueQuota> {
        if !item.status.requires_queue() {
            return Some(QueueQuota::UNLIMITED);
        }
        match self
            .registry
            .resolve_system(&key.tenant_id, &key.system_id)
            .await
        {
            Ok(system) if !system.is_up() => {
                debug!(system_id = %key.system_id, "System is not up, skipping its queues");
                None
            }
            Ok(system) => {
                let quota = QueueQuota::for_queue(&system, &key.queue_name);
                if quota.is_none() {
                    debug!(
                        system_id = %key.system_id,
                        queue = %key.queue_name,
                        "Queue is not defined on system, skipping"
                    );
                }
                quota
            }
            Err(RemoteError::UnknownSystem(_)) => {
                debug!(system_id = %key.system_id, "Unknown system, skipping its queues");
                None
            }
            Err(e) => {
                debug!(system_id = %key.system_id, "Unable to resolve system: {}", e);
                None
            }
        }
    }
}

/// Active items of the selected kind within the tenant scope, plus the selected status.
fn contention_query(status: WorkStatus, tenant: &TenantFilter) -> ItemQuery {
    let mut statuses: Vec<WorkStatus> = match status {
        WorkStatus::Job(_) => JobStatus::ACTIVE.iter().copied().map(Into::into).collect(),
        WorkStatus::Transfer(_) => vec![
            TransferStatus::StagingQueued.into(),
            TransferStatus::Staging.into(),
        ],
    };
    if !statuses.contains(&status) {
        statuses.push(status);
    }
    ItemQuery::with_statuses(statuses).filter(SelectionFilter {
        tenant: tenant.clone(),
        ..SelectionFilter::default()
    })
}

fn is_candidate(item: &WorkItem, status: WorkStatus, filter: &SelectionFilter) -> bool {
    item.visible && item.status == status && item.has_dispatchable_queue() && filter.matches(item)
}
