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

//! Quota arithmetic.
//!
//! Quotas are never stored. Each selection builds a [`ContentionSnapshot`]
//! from the live set of active items and compares it against the limits of
//! the system and queue the candidate would run on.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::status::WorkStatus;
use super::system::RemoteSystem;
use super::work_item::WorkItem;

/// Upper bound on concurrently active items. Negative raw values mean unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i64", into = "i64")]
pub struct Limit(Option<u64>);

impl Limit {
    pub const UNLIMITED: Limit = Limit(None);

    pub fn at_most(max: u64) -> Self {
        Limit(Some(max))
    }

    pub fn is_unlimited(&self) -> bool {
        self.0.is_none()
    }

    pub fn max(&self) -> Option<u64> {
        self.0
    }

    /// Whether one more item may start when `active` are already running.
    pub fn admits(&self, active: u64) -> bool {
        match self.0 {
            None => true,
            Some(max) => active < max,
        }
    }
}

impl Default for Limit {
    fn default() -> Self {
        Limit::UNLIMITED
    }
}

impl From<i64> for Limit {
    fn from(raw: i64) -> Self {
        if raw < 0 {
            Limit::UNLIMITED
        } else {
            Limit(Some(raw as u64))
        }
    }
}

impl From<Limit> for i64 {
    fn from(limit: Limit) -> Self {
        match limit.0 {
            None => -1,
            Some(max) => i64::try_from(max).unwrap_or(i64::MAX),
        }
    }
}

/// Limits that apply to one (tenant, system, queue).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueQuota {
    pub max_jobs: Limit,
    pub max_user_jobs: Limit,
}

impl QueueQuota {
    pub const UNLIMITED: QueueQuota = QueueQuota {
        max_jobs: Limit::UNLIMITED,
        max_user_jobs: Limit::UNLIMITED,
    };

    /// Quota of `queue_name` on `system`, or `None` when the queue is not defined there.
    pub fn for_queue(system: &RemoteSystem, queue_name: &str) -> Option<Self> {
        system.queue(queue_name).map(|q| QueueQuota {
            max_jobs: q.max_jobs,
            max_user_jobs: q.max_user_jobs,
        })
    }
}

/// System-wide limits, across all queues.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SystemQuota {
    pub max_jobs: Limit,
    pub max_user_jobs: Limit,
}

impl SystemQuota {
    pub fn for_system(system: &RemoteSystem) -> Self {
        SystemQuota {
            max_jobs: system.max_system_jobs,
            max_user_jobs: system.max_system_jobs_per_user,
        }
    }
}

/// Scope of a quota count.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueKey {
    pub tenant_id: String,
    pub system_id: String,
    pub queue_name: String,
}

impl QueueKey {
    pub fn of(item: &WorkItem) -> Self {
        Self {
            tenant_id: item.tenant_id.clone(),
            system_id: item.execution_system_id.clone(),
            queue_name: item.queue_name.clone(),
        }
    }
}

/// Live active and backlog counts at the moment of one selection.
#[derive(Debug, Default, Clone)]
pub struct ContentionSnapshot {
    queue_active: HashMap<QueueKey, u64>,
    user_active: HashMap<(String, QueueKey), u64>,
    user_backlog: HashMap<(String, QueueKey), u64>,
}

impl ContentionSnapshot {
    /// Tallies `items` relative to the status being selected.
    ///
    /// Invisible and inactive items are ignored. Active items in the backlog
    /// set of `selecting` count as backlog, everything else as occupying the
    /// queue.
    pub fn from_items<'a, I>(items: I, selecting: &WorkStatus) -> Self
    where
        I: IntoIterator<Item = &'a WorkItem>,
    {
        let mut snapshot = Self::default();
        for item in items {
            if !item.visible || !item.status.is_active() || !item.status.same_kind(selecting) {
                continue;
            }
            let key = QueueKey::of(item);
            if item.status.is_backlog_for(selecting) {
                *snapshot
                    .user_backlog
                    .entry((item.owner.clone(), key))
                    .or_insert(0) += 1;
            } else {
                *snapshot
                    .user_active
                    .entry((item.owner.clone(), key.clone()))
                    .or_insert(0) += 1;
                *snapshot.queue_active.entry(key).or_insert(0) += 1;
            }
        }
        snapshot
    }

    pub fn queue_active(&self, key: &QueueKey) -> u64 {
        self.queue_active.get(key).copied().unwrap_or(0)
    }

    pub fn user_active(&self, owner: &str, key: &QueueKey) -> u64 {
        self.user_active
            .get(&(owner.to_string(), key.clone()))
            .copied()
            .unwrap_or(0)
    }

    pub fn user_backlog(&self, owner: &str, key: &QueueKey) -> u64 {
        self.user_backlog
            .get(&(owner.to_string(), key.clone()))
            .copied()
            .unwrap_or(0)
    }

    /// Whether `owner` may start another item on `key` under `quota`.
    pub fn admits(
        &self,
        owner: &str,
        key: &QueueKey,
        quota: &QueueQuota,
        require_backlog: bool,
    ) -> bool {
        if require_backlog && self.user_backlog(owner, key) == 0 {
            return false;
        }
        quota.max_jobs.admits(self.queue_active(key))
            && quota.max_user_jobs.admits(self.user_active(owner, key))
    }
}
