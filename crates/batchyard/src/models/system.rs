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

//! Remote system descriptions as seen by the scheduler.
//!
//! The catalog that owns these records is external; the registry hands out
//! read-only snapshots that carry just enough to evaluate availability and
//! quota.

use serde::{Deserialize, Serialize};

use super::quota::Limit;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemStatus {
    Up,
    Down,
    Maintenance,
    Unknown,
}

/// Batch scheduler fronting an execution system. Selects the status parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerType {
    Slurm,
    Fork,
    /// Anything reporting status as `{"status": "..."}`
    Custom,
}

/// A named batch queue and its concurrency limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchQueue {
    pub name: String,
    /// Maximum active jobs in the queue across all users
    pub max_jobs: Limit,
    /// Maximum active jobs in the queue for one user
    pub max_user_jobs: Limit,
}

impl BatchQueue {
    pub fn new(name: impl Into<String>, max_jobs: Limit, max_user_jobs: Limit) -> Self {
        Self {
            name: name.into(),
            max_jobs,
            max_user_jobs,
        }
    }

    pub fn unlimited(name: impl Into<String>) -> Self {
        Self::new(name, Limit::UNLIMITED, Limit::UNLIMITED)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSystem {
    pub id: String,
    pub tenant_id: String,
    pub status: SystemStatus,
    /// Administrative availability flag, independent of `status`
    pub available: bool,
    pub scheduler: SchedulerType,
    pub max_system_jobs: Limit,
    pub max_system_jobs_per_user: Limit,
    pub queues: Vec<BatchQueue>,
    /// Root under which job work directories are created
    pub work_dir: String,
}

impl RemoteSystem {
    pub fn new(id: impl Into<String>, tenant_id: impl Into<String>, scheduler: SchedulerType) -> Self {
        Self {
            id: id.into(),
            tenant_id: tenant_id.into(),
            status: SystemStatus::Up,
            available: true,
            scheduler,
            max_system_jobs: Limit::UNLIMITED,
            max_system_jobs_per_user: Limit::UNLIMITED,
            queues: Vec::new(),
            work_dir: "/scratch".to_string(),
        }
    }

    pub fn with_queue(mut self, queue: BatchQueue) -> Self {
        self.queues.push(queue);
        self
    }

    pub fn with_status(mut self, status: SystemStatus) -> Self {
        self.status = status;
        self
    }

    pub fn is_up(&self) -> bool {
        self.available && self.status == SystemStatus::Up
    }

    pub fn queue(&self, name: &str) -> Option<&BatchQueue> {
        self.queues.iter().find(|q| q.name == name)
    }
}
