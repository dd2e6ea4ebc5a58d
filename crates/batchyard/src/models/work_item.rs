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

//! Work Item Model
//!
//! A work item is one schedulable unit: either a batch job or a data staging
//! task. The record is owned by the persistent store; the scheduler only reads
//! snapshots and writes them back through optimistic-concurrency saves keyed
//! on [`WorkItem::version`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::status::{JobStatus, TransferStatus, WorkStatus};
use super::system::SchedulerType;

/// Opaque public identifier of a work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkItemId(Uuid);

impl WorkItemId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for WorkItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for WorkItemId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for WorkItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A named job input. Multi-valued inputs are staged one value at a time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobInput {
    pub name: String,
    pub values: Vec<String>,
}

impl JobInput {
    pub fn new(name: impl Into<String>, values: Vec<String>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

/// Job-specific fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSpec {
    /// Application the job runs; resolved by the remote scheduler at launch.
    pub software_name: String,
    pub inputs: Vec<JobInput>,
    /// Remote working directory, assigned during input staging.
    pub work_path: Option<String>,
    /// Whether outputs are archived after completion.
    pub archive_output: bool,
    pub scheduler: SchedulerType,
    pub submitted_at: Option<DateTime<Utc>>,
}

impl JobSpec {
    pub fn new(software_name: impl Into<String>, scheduler: SchedulerType) -> Self {
        Self {
            software_name: software_name.into(),
            inputs: Vec::new(),
            work_path: None,
            archive_output: false,
            scheduler,
            submitted_at: None,
        }
    }

    pub fn with_input(mut self, input: JobInput) -> Self {
        self.inputs.push(input);
        self
    }

    pub fn with_archive_output(mut self, archive: bool) -> Self {
        self.archive_output = archive;
        self
    }
}

/// Transfer-specific fields. The destination system is the item's
/// execution system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferSpec {
    pub source_uri: String,
    pub dest_path: String,
    /// Logical file whose status mirrors this task.
    pub logical_file_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkPayload {
    Job(JobSpec),
    Transfer(TransferSpec),
}

/// Persisted unit of schedulable work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: WorkItemId,
    /// Internal numeric id assigned by the store
    pub seq: i64,
    pub owner: String,
    pub tenant_id: String,
    pub execution_system_id: String,
    /// Empty for items that are not queue-scheduled
    pub queue_name: String,
    pub status: WorkStatus,
    /// Soft-delete flag; invisible items are never selected
    pub visible: bool,
    pub retry_count: u32,
    /// Number of monitoring polls since the last status change
    pub status_checks: u32,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    /// Optimistic concurrency version, bumped by every successful save
    pub version: u64,
    /// Handle assigned by the remote scheduler once launched
    pub remote_job_id: Option<String>,
    pub payload: WorkPayload,
}

impl WorkItem {
    /// Creates a new PENDING job.
    pub fn new_job(
        owner: impl Into<String>,
        tenant_id: impl Into<String>,
        execution_system_id: impl Into<String>,
        queue_name: impl Into<String>,
        spec: JobSpec,
    ) -> Self {
        Self::new(
            owner.into(),
            tenant_id.into(),
            execution_system_id.into(),
            queue_name.into(),
            JobStatus::Pending.into(),
            WorkPayload::Job(spec),
        )
    }

    /// Creates a new STAGING_QUEUED transfer task into `dest_system_id`.
    pub fn new_transfer(
        owner: impl Into<String>,
        tenant_id: impl Into<String>,
        dest_system_id: impl Into<String>,
        spec: TransferSpec,
    ) -> Self {
        Self::new(
            owner.into(),
            tenant_id.into(),
            dest_system_id.into(),
            String::new(),
            TransferStatus::StagingQueued.into(),
            WorkPayload::Transfer(spec),
        )
    }

    fn new(
        owner: String,
        tenant_id: String,
        execution_system_id: String,
        queue_name: String,
        status: WorkStatus,
        payload: WorkPayload,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: WorkItemId::new(),
            seq: 0,
            owner,
            tenant_id,
            execution_system_id,
            queue_name,
            status,
            visible: true,
            retry_count: 0,
            status_checks: 0,
            created_at: now,
            last_updated: now,
            version: 0,
            remote_job_id: None,
            payload,
        }
    }

    pub fn with_status(mut self, status: impl Into<WorkStatus>) -> Self {
        self.status = status.into();
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn with_last_updated(mut self, last_updated: DateTime<Utc>) -> Self {
        self.last_updated = last_updated;
        self
    }

    pub fn with_remote_job_id(mut self, remote_job_id: impl Into<String>) -> Self {
        self.remote_job_id = Some(remote_job_id.into());
        self
    }

    pub fn with_status_checks(mut self, status_checks: u32) -> Self {
        self.status_checks = status_checks;
        self
    }

    pub fn job_status(&self) -> Option<JobStatus> {
        match self.status {
            WorkStatus::Job(s) => Some(s),
            WorkStatus::Transfer(_) => None,
        }
    }

    pub fn transfer_status(&self) -> Option<TransferStatus> {
        match self.status {
            WorkStatus::Transfer(s) => Some(s),
            WorkStatus::Job(_) => None,
        }
    }

    pub fn job_spec(&self) -> Option<&JobSpec> {
        match &self.payload {
            WorkPayload::Job(spec) => Some(spec),
            WorkPayload::Transfer(_) => None,
        }
    }

    pub fn job_spec_mut(&mut self) -> Option<&mut JobSpec> {
        match &mut self.payload {
            WorkPayload::Job(spec) => Some(spec),
            WorkPayload::Transfer(_) => None,
        }
    }

    pub fn transfer_spec(&self) -> Option<&TransferSpec> {
        match &self.payload {
            WorkPayload::Transfer(spec) => Some(spec),
            WorkPayload::Job(_) => None,
        }
    }

    /// Remote handle, if one was assigned and is non-empty.
    pub fn remote_handle(&self) -> Option<&str> {
        self.remote_job_id.as_deref().filter(|h| !h.trim().is_empty())
    }

    /// Whether the item can be handed to a worker once selected.
    pub fn has_dispatchable_queue(&self) -> bool {
        !self.status.requires_queue() || !self.queue_name.trim().is_empty()
    }

    /// Moves the item to `status` and stamps `last_updated`.
    ///
    /// The monitoring check counter is left alone; only a new launch starts
    /// the staleness backoff over.
    pub fn transition(&mut self, status: impl Into<WorkStatus>, now: DateTime<Utc>) {
        self.status = status.into();
        self.last_updated = now;
    }
}
