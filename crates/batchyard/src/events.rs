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

//! Audit event sink.
//!
//! Recording an event must never change the fate of a work item, so callers
//! go through [`record`], which logs sink failures and swallows them.

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::warn;

use crate::error::EventError;
use crate::models::{WorkItemEvent, WorkItemEventType, WorkItemId};

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn record_event(&self, event: WorkItemEvent) -> Result<(), EventError>;
}

/// Records `event`, logging instead of propagating any sink failure.
pub async fn record(sink: &dyn EventSink, event: WorkItemEvent) {
    let item_id = event.item_id;
    let event_type = event.event_type;
    if let Err(e) = sink.record_event(event).await {
        warn!(
            item_id = %item_id,
            event_type = event_type.as_str(),
            "Dropping audit event: {}",
            e
        );
    }
}

/// Event sink that keeps everything in memory.
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<WorkItemEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<WorkItemEvent> {
        self.events.lock().clone()
    }

    pub fn events_for(&self, item_id: &WorkItemId) -> Vec<WorkItemEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.item_id == *item_id)
            .cloned()
            .collect()
    }

    pub fn count_of(&self, item_id: &WorkItemId, event_type: WorkItemEventType) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.item_id == *item_id && e.event_type == event_type)
            .count()
    }
}

#[async_trait]
impl EventSink for MemoryEventSink {
    async fn record_event(&self, event: WorkItemEvent) -> Result<(), EventError> {
        self.events.lock().push(event);
        Ok(())
    }
}
