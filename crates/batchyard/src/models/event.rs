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

//! Work Item Event Model
//!
//! Events form the human-readable audit trail of a work item. Every status
//! transition, retry and terminal failure appends one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::status::WorkStatus;
use super::work_item::WorkItemId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItemEvent {
    pub id: Uuid,
    pub item_id: WorkItemId,
    pub event_type: WorkItemEventType,
    /// Status of the item when the event was recorded
    pub status: Option<WorkStatus>,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl WorkItemEvent {
    pub fn new(
        item_id: WorkItemId,
        event_type: WorkItemEventType,
        status: Option<WorkStatus>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            item_id,
            event_type,
            status,
            message: message.into(),
            created_at: Utc::now(),
        }
    }

    /// Event for a status transition.
    pub fn status_change(item_id: WorkItemId, status: WorkStatus, message: impl Into<String>) -> Self {
        Self::new(item_id, WorkItemEventType::StatusChange, Some(status), message)
    }
}

/// Enumeration of audit event types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkItemEventType {
    /// The item moved to a new status
    StatusChange,
    /// A retryable failure consumed one attempt
    Retry,
    /// The item failed terminally
    Failed,
    /// The remote scheduler returned nothing for a status query
    EmptyStatusResponse,
    /// The remote scheduler reported a status with no mapping
    UnknownStatus,
    /// Work was deferred by a quota limit
    QuotaExceeded,
    /// Work was deferred because a remote system is down
    SystemUnavailable,
    /// Work was rolled back by a stop request
    Interrupted,
}

impl WorkItemEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkItemEventType::StatusChange => "STATUS_CHANGE",
            WorkItemEventType::Retry => "RETRY",
            WorkItemEventType::Failed => "FAILED",
            WorkItemEventType::EmptyStatusResponse => "EMPTY_STATUS_RESPONSE",
            WorkItemEventType::UnknownStatus => "UNKNOWN_STATUS",
            WorkItemEventType::QuotaExceeded => "QUOTA_EXCEEDED",
            WorkItemEventType::SystemUnavailable => "SYSTEM_UNAVAILABLE",
            WorkItemEventType::Interrupted => "INTERRUPTED",
        }
    }
}
