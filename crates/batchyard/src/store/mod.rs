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

//! Persistent work item storage.
//!
//! The store is the only cross-process safety net: every write is an
//! optimistic-concurrency save keyed on [`WorkItem::version`], and a stale
//! write fails with [`StoreError::ConcurrencyConflict`] instead of clobbering
//! another worker's progress.
//!
//! [`MemoryStore`] is the in-process reference backend used by tests and
//! single-node deployments.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::filter::SelectionFilter;
use crate::models::{LogicalFileStatus, WorkItem, WorkItemId, WorkStatus};

/// Candidate query used by the selectors.
#[derive(Debug, Clone, Default)]
pub struct ItemQuery {
    /// Statuses to include; empty means any status
    pub statuses: Vec<WorkStatus>,
    pub filter: SelectionFilter,
    /// Include soft-deleted items
    pub include_hidden: bool,
}

impl ItemQuery {
    pub fn with_statuses<I, S>(statuses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<WorkStatus>,
    {
        Self {
            statuses: statuses.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn filter(mut self, filter: SelectionFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn matches(&self, item: &WorkItem) -> bool {
        (self.include_hidden || item.visible)
            && (self.statuses.is_empty() || self.statuses.contains(&item.status))
            && self.filter.matches(item)
    }
}

/// Scope of an active-item count used by quota checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveScope {
    pub tenant_id: String,
    pub system_id: String,
    pub queue_name: Option<String>,
    pub owner: Option<String>,
}

impl ActiveScope {
    pub fn system(tenant_id: impl Into<String>, system_id: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            system_id: system_id.into(),
            queue_name: None,
            owner: None,
        }
    }

    pub fn queue(mut self, queue_name: impl Into<String>) -> Self {
        self.queue_name = Some(queue_name.into());
        self
    }

    pub fn owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Whether `item` is a visible, capacity-holding item inside this scope.
    pub fn counts(&self, item: &WorkItem) -> bool {
        item.visible
            && item.status.occupies_capacity()
            && item.tenant_id == self.tenant_id
            && item.execution_system_id == self.system_id
            && self.queue_name.as_ref().map_or(true, |q| *q == item.queue_name)
            && self.owner.as_ref().map_or(true, |o| *o == item.owner)
    }
}

#[async_trait]
pub trait WorkItemStore: Send + Sync {
    /// Loads the current record, or `None` if it does not exist.
    async fn get(&self, id: &WorkItemId) -> Result<Option<WorkItem>, StoreError>;

    /// Writes `item` if its version still matches the stored one.
    ///
    /// Returns the stored record with its version advanced. A mismatch fails
    /// with [`StoreError::ConcurrencyConflict`] and writes nothing.
    async fn save(&self, item: &WorkItem) -> Result<WorkItem, StoreError>;

    /// Returns every item matching `query`.
    async fn query(&self, query: &ItemQuery) -> Result<Vec<WorkItem>, StoreError>;

    /// Counts items holding remote capacity within `scope`.
    async fn count_active(&self, scope: &ActiveScope) -> Result<u64, StoreError>;

    /// Mirrors a transfer task's progress onto its logical file.
    async fn set_logical_file_status(
        &self,
        logical_file_id: &str,
        status: LogicalFileStatus,
    ) -> Result<(), StoreError>;
}
