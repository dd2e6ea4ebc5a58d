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

//! Work item status model.
//!
//! Jobs and transfer tasks move through separate status machines. Both are
//! wrapped in [`WorkStatus`] so that selection, quota arithmetic and the
//! worker lease can treat them uniformly while still matching on the
//! type-specific variants where behavior differs.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of a batch job on a remote execution system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Accepted, inputs not yet staged
    Pending,
    /// Inputs are being resolved
    ProcessingInputs,
    /// Inputs are being copied to the execution system
    StagingInputs,
    /// Inputs are in place, waiting for submission
    Staged,
    /// Job assets are being copied to the execution system
    StagingJob,
    /// Launch request in progress
    Submitting,
    /// Sitting in the remote scheduler's queue
    Queued,
    /// Running on the remote system
    Running,
    /// Suspended by the remote scheduler
    Paused,
    /// Finished remotely, waiting for output handling
    CleaningUp,
    /// Outputs are being archived
    Archiving,
    /// Outputs archived
    ArchivingFinished,
    /// Archiving failed
    ArchivingFailed,
    /// Completed successfully
    Finished,
    /// Killed by the user or the platform
    Killed,
    /// Stopped by an administrator
    Stopped,
    /// Terminal failure
    Failed,
}

impl JobStatus {
    /// Statuses that count toward queue and user quotas.
    pub const ACTIVE: [JobStatus; 10] = [
        JobStatus::Pending,
        JobStatus::ProcessingInputs,
        JobStatus::Running,
        JobStatus::Paused,
        JobStatus::Queued,
        JobStatus::CleaningUp,
        JobStatus::Submitting,
        JobStatus::StagingInputs,
        JobStatus::StagingJob,
        JobStatus::Staged,
    ];

    /// Statuses that carry a remote job handle worth polling.
    pub const IN_FLIGHT: [JobStatus; 3] = [JobStatus::Queued, JobStatus::Running, JobStatus::Paused];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "PENDING",
            JobStatus::ProcessingInputs => "PROCESSING_INPUTS",
            JobStatus::StagingInputs => "STAGING_INPUTS",
            JobStatus::Staged => "STAGED",
            JobStatus::StagingJob => "STAGING_JOB",
            JobStatus::Submitting => "SUBMITTING",
            JobStatus::Queued => "QUEUED",
            JobStatus::Running => "RUNNING",
            JobStatus::Paused => "PAUSED",
            JobStatus::CleaningUp => "CLEANING_UP",
            JobStatus::Archiving => "ARCHIVING",
            JobStatus::ArchivingFinished => "ARCHIVING_FINISHED",
            JobStatus::ArchivingFailed => "ARCHIVING_FAILED",
            JobStatus::Finished => "FINISHED",
            JobStatus::Killed => "KILLED",
            JobStatus::Stopped => "STOPPED",
            JobStatus::Failed => "FAILED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        let status = match s {
            "PENDING" => JobStatus::Pending,
            "PROCESSING_INPUTS" => JobStatus::ProcessingInputs,
            "STAGING_INPUTS" => JobStatus::StagingInputs,
            "STAGED" => JobStatus::Staged,
            "STAGING_JOB" => JobStatus::StagingJob,
            "SUBMITTING" => JobStatus::Submitting,
            "QUEUED" => JobStatus::Queued,
            "RUNNING" => JobStatus::Running,
            "PAUSED" => JobStatus::Paused,
            "CLEANING_UP" => JobStatus::CleaningUp,
            "ARCHIVING" => JobStatus::Archiving,
            "ARCHIVING_FINISHED" => JobStatus::ArchivingFinished,
            "ARCHIVING_FAILED" => JobStatus::ArchivingFailed,
            "FINISHED" => JobStatus::Finished,
            "KILLED" => JobStatus::Killed,
            "STOPPED" => JobStatus::Stopped,
            "FAILED" => JobStatus::Failed,
            _ => return None,
        };
        Some(status)
    }

    /// Backlog substatuses that gate phase-one admission when selecting `self`.
    ///
    /// Jobs in these statuses have not reached the remote system yet, so they
    /// are excluded from the active counts compared against quotas.
    pub fn backlog_set(&self) -> &'static [JobStatus] {
        match self {
            JobStatus::Pending => &[JobStatus::Pending, JobStatus::ProcessingInputs],
            _ => &[
                JobStatus::Pending,
                JobStatus::ProcessingInputs,
                JobStatus::Staged,
                JobStatus::StagingInputs,
            ],
        }
    }

    pub fn is_active(&self) -> bool {
        Self::ACTIVE.contains(self)
    }

    pub fn is_in_flight(&self) -> bool {
        Self::IN_FLIGHT.contains(self)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Finished
                | JobStatus::Killed
                | JobStatus::Stopped
                | JobStatus::Failed
                | JobStatus::ArchivingFinished
                | JobStatus::ArchivingFailed
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a data staging (transfer) task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransferStatus {
    /// Waiting to be picked up
    StagingQueued,
    /// Copy in progress
    Staging,
    /// Copy finished or skipped because the destination already matched
    StagingCompleted,
    /// Terminal failure
    StagingFailed,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::StagingQueued => "STAGING_QUEUED",
            TransferStatus::Staging => "STAGING",
            TransferStatus::StagingCompleted => "STAGING_COMPLETED",
            TransferStatus::StagingFailed => "STAGING_FAILED",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "STAGING_QUEUED" => Some(TransferStatus::StagingQueued),
            "STAGING" => Some(TransferStatus::Staging),
            "STAGING_COMPLETED" => Some(TransferStatus::StagingCompleted),
            "STAGING_FAILED" => Some(TransferStatus::StagingFailed),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, TransferStatus::StagingQueued | TransferStatus::Staging)
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of any work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "status", rename_all = "snake_case")]
pub enum WorkStatus {
    Job(JobStatus),
    Transfer(TransferStatus),
}

impl WorkStatus {
    /// Whether an item in this status occupies quota.
    pub fn is_active(&self) -> bool {
        match self {
            WorkStatus::Job(s) => s.is_active(),
            WorkStatus::Transfer(s) => s.is_active(),
        }
    }

    /// Whether an item in `self` is part of the backlog when selecting `selecting`.
    ///
    /// Statuses of a different kind than `selecting` are never backlog.
    pub fn is_backlog_for(&self, selecting: &WorkStatus) -> bool {
        match (self, selecting) {
            (WorkStatus::Job(s), WorkStatus::Job(sel)) => sel.backlog_set().contains(s),
            (WorkStatus::Transfer(s), WorkStatus::Transfer(_)) => {
                *s == TransferStatus::StagingQueued
            }
            _ => false,
        }
    }

    /// Whether the item holds remote capacity, as counted by quota checks.
    ///
    /// Backlog statuses are active but have not reached the remote system.
    pub fn occupies_capacity(&self) -> bool {
        match self {
            WorkStatus::Job(s) => s.is_active() && !JobStatus::Staged.backlog_set().contains(s),
            WorkStatus::Transfer(s) => *s == TransferStatus::Staging,
        }
    }

    /// Whether phase-one admission requires a positive user backlog.
    pub fn requires_backlog(&self) -> bool {
        matches!(self, WorkStatus::Job(JobStatus::Pending))
    }

    /// Whether items in this status must carry a queue assignment to be dispatched.
    pub fn requires_queue(&self) -> bool {
        matches!(self, WorkStatus::Job(_))
    }

    pub fn same_kind(&self, other: &WorkStatus) -> bool {
        matches!(
            (self, other),
            (WorkStatus::Job(_), WorkStatus::Job(_))
                | (WorkStatus::Transfer(_), WorkStatus::Transfer(_))
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkStatus::Job(s) => s.as_str(),
            WorkStatus::Transfer(s) => s.as_str(),
        }
    }
}

impl From<JobStatus> for WorkStatus {
    fn from(status: JobStatus) -> Self {
        WorkStatus::Job(status)
    }
}

impl From<TransferStatus> for WorkStatus {
    fn from(status: TransferStatus) -> Self {
        WorkStatus::Transfer(status)
    }
}

impl fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of the logical file a transfer task belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogicalFileStatus {
    StagingQueued,
    Staging,
    StagingCompleted,
    StagingFailed,
}

impl From<TransferStatus> for LogicalFileStatus {
    fn from(status: TransferStatus) -> Self {
        match status {
            TransferStatus::StagingQueued => LogicalFileStatus::StagingQueued,
            TransferStatus::Staging => LogicalFileStatus::Staging,
            TransferStatus::StagingCompleted => LogicalFileStatus::StagingCompleted,
            TransferStatus::StagingFailed => LogicalFileStatus::StagingFailed,
        }
    }
}
