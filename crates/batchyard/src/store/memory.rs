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

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use super::{ActiveScope, ItemQuery, WorkItemStore};
use crate::error::StoreError;
use crate::models::{LogicalFileStatus, WorkItem, WorkItemId};

/// In-memory [`WorkItemStore`] with optimistic versioning.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: RwLock<HashMap<WorkItemId, WorkItem>>,
    logical_files: RwLock<HashMap<String, LogicalFileStatus>>,
    next_seq: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a new item, assigning its internal sequence number.
    pub fn insert(&self, mut item: WorkItem) -> WorkItem {
        item.seq = self.next_seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.items.write().insert(item.id, item.clone());
        item
    }

    /// Current record without going through the async interface.
    pub fn snapshot(&self, id: &WorkItemId) -> Option<WorkItem> {
        self.items.read().get(id).cloned()
    }

    /// Applies an out-of-band change, as another process would, bumping the version.
    pub fn update<F>(&self, id: &WorkItemId, change: F) -> Option<WorkItem>
    where
        F: FnOnce(&mut WorkItem),
    {
        let mut items = self.items.write();
        let item = items.get_mut(id)?;
        change(item);
        item.version += 1;
        Some(item.clone())
    }

    pub fn logical_file_status(&self, logical_file_id: &str) -> Option<LogicalFileStatus> {
        self.logical_files.read().get(logical_file_id).copied()
    }

    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.read().is_empty()
    }
}

#[async_trait]
impl WorkItemStore for MemoryStore {
    async fn get(&self, id: &WorkItemId) -> Result<Option<WorkItem>, StoreError> {
        Ok(self.snapshot(id))
    }

    async fn save(&self, item: &WorkItem) -> Result<WorkItem, StoreError> {
        let mut items = self.items.write();
        let stored = items.get_mut(&item.id).ok_or(StoreError::NotFound(item.id))?;
        if stored.version != item.version {
            return Err(StoreError::ConcurrencyConflict {
                id: item.id,
                expected: item.version,
            });
        }
        let mut saved = item.clone();
        saved.seq = stored.seq;
        saved.version = stored.version + 1;
        *stored = saved.clone();
        Ok(saved)
    }

    async fn query(&self, query: &ItemQuery) -> Result<Vec<WorkItem>, StoreError> {
        let items = self.items.read();
        let mut matched: Vec<WorkItem> = items
            .values()
            .filter(|item| query.matches(item))
            .cloned()
            .collect();
        matched.sort_by_key(|item| item.seq);
        Ok(matched)
    }

    async fn count_active(&self, scope: &ActiveScope) -> Result<u64, StoreError> {
        let items = self.items.read();
        Ok(items.values().filter(|item| scope.counts(item)).count() as u64)
    }

    async fn set_logical_file_status(
        &self,
        logical_file_id: &str,
        status: LogicalFileStatus,
    ) -> Result<(), StoreError> {
        self.logical_files
            .write()
            .insert(logical_file_id.to_string(), status);
        Ok(())
    }
}
