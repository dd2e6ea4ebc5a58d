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

//! Monitoring Action
//!
//! One status check of an in-flight job. The staleness poller decides when
//! the next check happens, so nothing is retried here: transient failures
//! are logged and left for the next poll, while unavailable systems and
//! concurrency conflicts are passed up unchanged.

use chrono::Utc;
use tracing::{debug, info, warn};

use super::ActionContext;
use crate::models::{JobStatus, WorkItem, WorkItemEventType};
use crate::monitor::{parser_for, ParseError, RemoteJobStatus};
use crate::outcome::{Failure, FailureKind, Outcome, RetryPolicy};

#[derive(Debug, Clone)]
pub struct MonitoringAction {
    policy: RetryPolicy,
}

impl Default for MonitoringAction {
    fn default() -> Self {
        Self::new()
    }
}

impl MonitoringAction {
    pub fn new() -> Self {
        Self {
            policy: RetryPolicy::monitoring(),
        }
    }

    pub fn is_claimable(item: &WorkItem) -> bool {
        item.job_status().map_or(false, |s| s.is_in_flight()) && item.remote_handle().is_some()
    }

    pub async fn run(&self, ctx: &ActionContext, mut job: WorkItem) -> Result<Outcome, Failure> {
        // Count the check first so the backoff advances even if it fails.
        job.status_checks = job.status_checks.saturating_add(1);
        job.last_updated = Utc::now();
        ctx.save(&mut job).await.map_err(Failure::from)?;

        if ctx.checkpoint().is_err() {
            return Err(Failure::interrupted());
        }

        let Some(handle) = job.remote_handle().map(str::to_string) else {
            return Err(Failure::fatal("job has no remote job id to monitor"));
        };

        let system = ctx
            .registry()
            .resolve_system(&job.tenant_id, &job.execution_system_id)
            .await
            .map_err(|e| self.policy.classify(&e))?;
        if !system.is_up() {
            return Err(Failure::unavailable(format!(
                "System {} is currently unavailable",
                system.id
            )));
        }

        let response = match ctx.connect_scheduler(&system, &job.owner).await {
            Ok(scheduler) => scheduler.query_status(&job, &handle).await,
            Err(e) => Err(e),
        };
        let response = match response {
            Ok(response) => response,
            Err(e) => {
                let failure = self.policy.classify(&e);
                if failure.kind != FailureKind::Retryable {
                    return Err(failure);
                }
                warn!(item_id = %job.id, remote_job_id = %handle, "Status check failed: {}", e);
                return Ok(Outcome::Retryable(failure.message));
            }
        };

        let scheduler = job.job_spec().map_or(system.scheduler, |spec| spec.scheduler);
        match parser_for(scheduler).parse(&handle, &response) {
            Ok(RemoteJobStatus::Unknown) => {
                let message = format!(
                    "Unable to determine the status of remote job {} from the scheduler response",
                    handle
                );
                debug!(item_id = %job.id, "{}", message);
                ctx.event(&job, WorkItemEventType::UnknownStatus, message).await;
                Ok(Outcome::Completed)
            }
            Ok(remote) => self.apply(ctx, job, remote).await,
            Err(ParseError::Empty) => {
                ctx.event(
                    &job,
                    WorkItemEventType::EmptyStatusResponse,
                    ParseError::Empty.to_string(),
                )
                .await;
                Ok(Outcome::Retryable(ParseError::Empty.to_string()))
            }
            Err(e @ ParseError::Malformed(_)) => {
                warn!(item_id = %job.id, remote_job_id = %handle, "{}", e);
                Ok(Outcome::Retryable(e.to_string()))
            }
        }
    }

    async fn apply(
        &self,
        ctx: &ActionContext,
        mut job: WorkItem,
        remote: RemoteJobStatus,
    ) -> Result<Outcome, Failure> {
        let archives = job.job_spec().map_or(false, |spec| spec.archive_output);
        let Some(target) = target_status(remote, archives) else {
            return Ok(Outcome::Completed);
        };

        if job.job_status() == Some(target) {
            debug!(item_id = %job.id, status = %target, "Job status unchanged");
            return Ok(Outcome::Completed);
        }

        let message = match remote {
            RemoteJobStatus::Failed | RemoteJobStatus::Unrecoverable => format!(
                "Job failed on the remote system (reported {})",
                remote
            ),
            RemoteJobStatus::Done => "Job completed execution on the remote system".to_string(),
            _ => format!("Job status change to {} detected by monitor", target),
        };
        ctx.update_status(&mut job, target, &message)
            .await
            .map_err(Failure::from)?;
        if target == JobStatus::Failed {
            ctx.event(&job, WorkItemEventType::Failed, &message).await;
        }
        info!(item_id = %job.id, status = %target, "{}", message);
        Ok(Outcome::Completed)
    }
}

/// Job status a remote status class maps to. `Unknown` leaves the job untouched.
fn target_status(remote: RemoteJobStatus, archives_output: bool) -> Option<JobStatus> {
    let status = match remote {
        RemoteJobStatus::Queued => JobStatus::Queued,
        RemoteJobStatus::Running => JobStatus::Running,
        RemoteJobStatus::Paused => JobStatus::Paused,
        RemoteJobStatus::Done => JobStatus::CleaningUp,
        RemoteJobStatus::Failed | RemoteJobStatus::Unrecoverable if archives_output => {
            JobStatus::CleaningUp
        }
        RemoteJobStatus::Failed | RemoteJobStatus::Unrecoverable => JobStatus::Failed,
        RemoteJobStatus::Unknown => return None,
    };
    Some(status)
}
