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

//! Submission Action
//!
//! Launches a STAGED job on its execution system. Each attempt moves the job
//! to SUBMITTING, prepares launch assets in a temporary local directory and
//! hands them to the remote scheduler. Success stores the remote job handle
//! and moves the job to QUEUED.
//!
//! Quota is checked again right before launch. A job that would exceed a
//! limit, or whose system is down, goes back to STAGED without spending a
//! retry. Scheduler and I/O failures are retried in place until the budget
//! is spent, after which the remote work directory is removed and the job
//! fails.

use chrono::Utc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::quota_check::{self, QuotaCheckError, QuotaViolation};
use super::{
    expire, past_deadline, persisted, resolve_available_system, ActionContext, ActionSettings,
    StepError,
};
use crate::error::{RemoteError, StoreError};
use crate::models::{JobStatus, RemoteSystem, WorkItem, WorkItemEventType, WorkStatus};
use crate::outcome::{Failure, FailureKind, Outcome, RetryDecision, RetryPolicy};

/// Pause before saving a launched job again after a store error.
const RECORD_RETRY_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct SubmissionAction {
    policy: RetryPolicy,
}

impl SubmissionAction {
    pub fn new(max_retries: u32) -> Self {
        Self {
            policy: RetryPolicy::submission(max_retries),
        }
    }

    pub fn from_settings(settings: &ActionSettings) -> Self {
        Self::new(settings.max_submission_retries)
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn is_claimable(item: &WorkItem) -> bool {
        item.status == WorkStatus::Job(JobStatus::Staged)
    }

    /// Back to STAGED, unless the job already reached the remote scheduler.
    pub fn rollback_status(item: &WorkItem) -> Option<WorkStatus> {
        match item.job_status() {
            Some(status) if status.is_in_flight() || status.is_terminal() => None,
            Some(_) => Some(JobStatus::Staged.into()),
            None => None,
        }
    }

    pub async fn run(&self, ctx: &ActionContext, mut job: WorkItem) -> Result<Outcome, Failure> {
        if past_deadline(&job, ctx.settings().submission_deadline, Utc::now()) {
            let message = format!(
                "Removing job from queue. Job could not be submitted within {} days.",
                ctx.settings().submission_deadline.as_secs() / 86_400
            );
            let result = expire(ctx, &mut job, &message).await;
            return persisted(result, Outcome::Fatal(message));
        }

        let system = match resolve_available_system(ctx, &job).await {
            Ok(system) => system,
            Err(err) => return self.handle_failure(ctx, job, None, err).await,
        };

        match quota_check::check(ctx.store(), &job, &system).await {
            Ok(()) => {}
            Err(QuotaCheckError::Violation(violation)) => {
                return self.defer_for_quota(ctx, job, violation).await
            }
            Err(QuotaCheckError::Store(err)) => {
                return self.handle_failure(ctx, job, Some(&system), err.into()).await
            }
        }

        loop {
            let err = match self.attempt(ctx, &mut job, &system).await {
                Ok(()) => return Ok(Outcome::Completed),
                Err(err) => err,
            };
            if err.classify(&self.policy).kind != FailureKind::Retryable {
                return self.handle_failure(ctx, job, Some(&system), err).await;
            }

            match self.policy.consume(job.retry_count) {
                RetryDecision::Retry {
                    retry_count,
                    remaining,
                } => {
                    warn!(
                        item_id = %job.id,
                        retry_count,
                        remaining,
                        "Submission attempt failed: {}",
                        err
                    );
                    job.retry_count = retry_count;
                    let message = format!(
                        "Attempt {} to submit job failed: {}. {} attempts remaining.",
                        retry_count, err, remaining
                    );
                    if let Err(e) = ctx.save(&mut job).await {
                        return persisted(Err(e), Outcome::Retryable(message));
                    }
                    ctx.event(&job, WorkItemEventType::Retry, message).await;
                }
                RetryDecision::Exhausted { attempts } => {
                    return self
                        .exhaust(ctx, job, Some(&system), attempts, err.to_string())
                        .await
                }
            }
        }
    }

    async fn attempt(
        &self,
        ctx: &ActionContext,
        job: &mut WorkItem,
        system: &RemoteSystem,
    ) -> Result<(), StepError> {
        ctx.checkpoint()?;
        ctx.update_status(
            job,
            JobStatus::Submitting,
            format!("Attempt {} to submit job", job.retry_count + 1),
        )
        .await?;

        let scheduler = ctx.connect_scheduler(system, &job.owner).await?;
        // Removed when dropped, whatever the launch does.
        let assets = tempfile::Builder::new()
            .prefix("batchyard-submit-")
            .tempdir()
            .map_err(RemoteError::from)?;

        ctx.checkpoint()?;
        let handle = scheduler
            .launch(job, assets.path(), &ctx.abort_signal())
            .await?;
        if handle.trim().is_empty() {
            return Err(RemoteError::Scheduler(
                "scheduler accepted the job but returned no job id".to_string(),
            )
            .into());
        }

        self.record_launch(ctx, job, system, &handle).await
    }

    /// Persists a launched job as QUEUED.
    ///
    /// The launch is never repeated once the scheduler has accepted the job.
    /// Store outages are retried here, and a save that still fails is fatal
    /// with the remote handle kept on `job`.
    async fn record_launch(
        &self,
        ctx: &ActionContext,
        job: &mut WorkItem,
        system: &RemoteSystem,
        handle: &str,
    ) -> Result<(), StepError> {
        job.remote_job_id = Some(handle.to_string());
        if let Some(spec) = job.job_spec_mut() {
            spec.submitted_at = Some(Utc::now());
        }
        job.retry_count = 0;
        job.status_checks = 0;
        let launched = job.clone();
        let message = format!(
            "Job queued to {} queue {} with remote job id {}",
            system.id, job.queue_name, handle
        );

        let mut failed_saves = 0;
        loop {
            match ctx.update_status(job, JobStatus::Queued, &message).await {
                Ok(()) => {
                    info!(item_id = %job.id, owner = %job.owner, remote_job_id = %handle, "Job submitted");
                    return Ok(());
                }
                Err(StoreError::Backend(reason)) => {
                    *job = launched.clone();
                    failed_saves += 1;
                    if failed_saves > self.policy.max_retries() {
                        return Err(StepError::Fatal(format!(
                            "Job was launched with remote job id {} but could not be recorded: {}",
                            handle, reason
                        )));
                    }
                    warn!(
                        item_id = %job.id,
                        remote_job_id = %handle,
                        failed_saves,
                        "Unable to record submitted job: {}",
                        reason
                    );
                    tokio::time::sleep(RECORD_RETRY_DELAY * failed_saves).await;
                }
                Err(e) => {
                    *job = launched;
                    return Err(e.into());
                }
            }
        }
    }

    async fn handle_failure(
        &self,
        ctx: &ActionContext,
        mut job: WorkItem,
        system: Option<&RemoteSystem>,
        err: StepError,
    ) -> Result<Outcome, Failure> {
        let failure = err.classify(&self.policy);
        match failure.kind {
            FailureKind::ConcurrencyConflict => {
                debug!(item_id = %job.id, "Race condition avoided during submission: {}", failure.message);
                Ok(Outcome::ConcurrencyConflict(failure.message))
            }
            // Rolled back by the lease
            FailureKind::Interrupted => Err(failure),
            FailureKind::Unavailable => {
                info!(item_id = %job.id, "Submission paused: {}", failure.message);
                let result = ctx
                    .update_status(
                        &mut job,
                        JobStatus::Staged,
                        format!(
                            "Job submission paused until the execution system is available. {}",
                            failure.message
                        ),
                    )
                    .await;
                if result.is_ok() {
                    ctx.event(&job, WorkItemEventType::SystemUnavailable, &failure.message)
                        .await;
                }
                persisted(result, Outcome::Unavailable(failure.message))
            }
            FailureKind::Fatal => {
                let message = format!("Unable to submit job: {}", failure.message);
                let result = fail(ctx, &mut job, &message).await;
                persisted(result, Outcome::Fatal(message))
            }
            FailureKind::Retryable => match self.policy.consume(job.retry_count) {
                RetryDecision::Retry {
                    retry_count,
                    remaining,
                } => {
                    warn!(item_id = %job.id, retry_count, remaining, "Submission deferred: {}", failure.message);
                    job.retry_count = retry_count;
                    let message = format!(
                        "Unable to prepare job submission: {}. {} attempts remaining.",
                        failure.message, remaining
                    );
                    let result = ctx.update_status(&mut job, JobStatus::Staged, &message).await;
                    if result.is_ok() {
                        ctx.event(&job, WorkItemEventType::Retry, message).await;
                    }
                    persisted(result, Outcome::Retryable(failure.message))
                }
                RetryDecision::Exhausted { attempts } => {
                    self.exhaust(ctx, job, system, attempts, failure.message)
                        .await
                }
            },
        }
    }

    async fn defer_for_quota(
        &self,
        ctx: &ActionContext,
        mut job: WorkItem,
        violation: QuotaViolation,
    ) -> Result<Outcome, Failure> {
        let reason = violation.to_string();
        info!(item_id = %job.id, owner = %job.owner, "Submission deferred: {}", reason);
        let message = format!(
            "Job submission deferred. {}. Submission will resume when capacity is available.",
            reason
        );
        let result = ctx.update_status(&mut job, JobStatus::Staged, &message).await;
        if result.is_ok() {
            ctx.event(&job, WorkItemEventType::QuotaExceeded, reason.clone())
                .await;
        }
        persisted(result, Outcome::Unavailable(reason))
    }

    async fn exhaust(
        &self,
        ctx: &ActionContext,
        mut job: WorkItem,
        system: Option<&RemoteSystem>,
        attempts: u32,
        reason: String,
    ) -> Result<Outcome, Failure> {
        if let Some(system) = system {
            cleanup_work_dir(ctx, &job, system).await;
        }
        job.retry_count = attempts;
        let message = format!(
            "Unable to submit job after {} attempts: {}",
            attempts, reason
        );
        let result = fail(ctx, &mut job, &message).await;
        persisted(result, Outcome::Fatal(message))
    }
}

/// Best-effort removal of the job's remote work directory.
async fn cleanup_work_dir(ctx: &ActionContext, job: &WorkItem, system: &RemoteSystem) {
    let result = match ctx.connect_scheduler(system, &job.owner).await {
        Ok(scheduler) => scheduler.delete_work_dir(job).await,
        Err(e) => Err(e),
    };
    if let Err(e) = result {
        warn!(item_id = %job.id, "Unable to remove remote work directory: {}", e);
    }
}

async fn fail(
    ctx: &ActionContext,
    job: &mut WorkItem,
    message: &str,
) -> Result<(), StoreError> {
    error!(item_id = %job.id, owner = %job.owner, "{}", message);
    ctx.update_status(job, JobStatus::Failed, message).await?;
    ctx.event(job, WorkItemEventType::Failed, message).await;
    Ok(())
}
