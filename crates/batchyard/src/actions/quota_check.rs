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

//! Launch-time quota check.
//!
//! The selector only admits a job when its queue has room, but by the time
//! the submission worker runs other workers may have launched jobs of their
//! own. The counts are taken again right before launch, most general first.

use thiserror::Error;

use crate::error::StoreError;
use crate::models::{Limit, QueueQuota, RemoteSystem, SystemQuota, WorkItem};
use crate::store::{ActiveScope, WorkItemStore};

/// The limit a job would exceed if launched now.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuotaViolation {
    #[error("System {system_id} is at capacity for new jobs ({max} active)")]
    SystemJobs { system_id: String, max: u64 },

    #[error("Queue {queue} on {system_id} is at capacity for new jobs ({max} active)")]
    QueueJobs {
        system_id: String,
        queue: String,
        max: u64,
    },

    #[error("{owner} has reached the limit of {max} concurrent jobs on {system_id}")]
    UserSystemJobs {
        owner: String,
        system_id: String,
        max: u64,
    },

    #[error("{owner} has reached the limit of {max} concurrent jobs in queue {queue}")]
    UserQueueJobs {
        owner: String,
        queue: String,
        max: u64,
    },

    #[error("Queue {queue} is not defined on {system_id}")]
    UnknownQueue { system_id: String, queue: String },
}

#[derive(Debug, Error)]
pub enum QuotaCheckError {
    #[error(transparent)]
    Violation(#[from] QuotaViolation),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Verifies that launching `job` on `system` keeps every limit.
pub async fn check(
    store: &dyn WorkItemStore,
    job: &WorkItem,
    system: &RemoteSystem,
) -> Result<(), QuotaCheckError> {
    let system_quota = SystemQuota::for_system(system);
    let queue_quota = QueueQuota::for_queue(system, &job.queue_name).ok_or_else(|| {
        QuotaCheckError::Violation(QuotaViolation::UnknownQueue {
            system_id: system.id.clone(),
            queue: job.queue_name.clone(),
        })
    })?;

    let system_scope = ActiveScope::system(&job.tenant_id, &system.id);
    let queue_scope = system_scope.clone().queue(&job.queue_name);

    if let Some(max) = exceeded(store, &system_scope, system_quota.max_jobs).await? {
        return Err(QuotaCheckError::Violation(QuotaViolation::SystemJobs {
            system_id: system.id.clone(),
            max,
        }));
    }
    if let Some(max) = exceeded(store, &queue_scope, queue_quota.max_jobs).await? {
        return Err(QuotaCheckError::Violation(QuotaViolation::QueueJobs {
            system_id: system.id.clone(),
            queue: job.queue_name.clone(),
            max,
        }));
    }
    let user_system = system_scope.owner(&job.owner);
    if let Some(max) = exceeded(store, &user_system, system_quota.max_user_jobs).await? {
        return Err(QuotaCheckError::Violation(QuotaViolation::UserSystemJobs {
            owner: job.owner.clone(),
            system_id: system.id.clone(),
            max,
        }));
    }
    let user_queue = queue_scope.owner(&job.owner);
    if let Some(max) = exceeded(store, &user_queue, queue_quota.max_user_jobs).await? {
        return Err(QuotaCheckError::Violation(QuotaViolation::UserQueueJobs {
            owner: job.owner.clone(),
            queue: job.queue_name.clone(),
            max,
        }));
    }
    Ok(())
}

/// The limit's maximum when the scope is already at or over it.
async fn exceeded(
    store: &dyn WorkItemStore,
    scope: &ActiveScope,
    limit: Limit,
) -> Result<Option<u64>, StoreError> {
    let Some(max) = limit.max() else {
        return Ok(None);
    };
    let active = store.count_active(scope).await?;
    Ok((!limit.admits(active)).then_some(max))
}
