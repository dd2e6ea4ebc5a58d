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

//! Remote status parsing.
//!
//! Each batch scheduler reports job status in its own format. A
//! [`StatusParser`] turns the raw response into a [`RemoteJobStatus`], which
//! the monitoring action maps onto the job lifecycle.

pub mod fork;
pub mod json;
pub mod slurm;

pub use fork::ForkParser;
pub use json::JsonParser;
pub use slurm::SlurmParser;

use std::fmt;
use thiserror::Error;

use crate::models::SchedulerType;

/// Scheduler-independent class of a remote job status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteJobStatus {
    Queued,
    Running,
    Paused,
    Done,
    Failed,
    /// Stuck in a state the scheduler will never leave on its own
    Unrecoverable,
    Unknown,
}

impl RemoteJobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteJobStatus::Queued => "queued",
            RemoteJobStatus::Running => "running",
            RemoteJobStatus::Paused => "paused",
            RemoteJobStatus::Done => "done",
            RemoteJobStatus::Failed => "failed",
            RemoteJobStatus::Unrecoverable => "unrecoverable",
            RemoteJobStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for RemoteJobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("Empty response received from job status check on the remote system")]
    Empty,

    #[error("Unable to parse scheduler response: {0}")]
    Malformed(String),
}

pub trait StatusParser: Send + Sync {
    /// Extracts the status of `remote_job_id` from a raw scheduler response.
    fn parse(&self, remote_job_id: &str, response: &str) -> Result<RemoteJobStatus, ParseError>;
}

/// Parser for the scheduler fronting an execution system.
pub fn parser_for(scheduler: SchedulerType) -> &'static dyn StatusParser {
    match scheduler {
        SchedulerType::Slurm => &SlurmParser,
        SchedulerType::Fork => &ForkParser,
        SchedulerType::Custom => &JsonParser,
    }
}
