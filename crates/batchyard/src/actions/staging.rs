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

//! Staging Action
//!
//! Moves data onto execution systems. Drives two kinds of items:
//!
//! - transfers: `STAGING_QUEUED -> STAGING -> STAGING_COMPLETED`, keeping the
//!   parent logical file's status in step
//! - jobs: `PENDING -> PROCESSING_INPUTS -> STAGING_INPUTS -> STAGED`, copying
//!   every input value into the job's remote work directory
//!
//! A destination that already holds a file of the same size whose checksum
//! matches (or cannot be computed) is not copied again.

use chrono::Utc;
use tracing::{debug, error, info, warn};
use url::Url;

use super::{
    expire, failed_status, past_deadline, persisted, resolve_available_system, ActionContext,
    ActionSettings, StepError,
};
use crate::error::RemoteError;
use crate::models::{
    JobStatus, TransferStatus, WorkItem, WorkItemEventType, WorkPayload, WorkStatus,
};
use crate::outcome::{Failure, FailureKind, Outcome, RetryDecision, RetryPolicy};
use crate::systems::RemoteClient;

#[derive(Debug, Clone)]
pub struct StagingAction {
    policy: RetryPolicy,
}

impl StagingAction {
    pub fn new(max_retries: u32) -> Self {
        Self {
            policy: RetryPolicy::staging(max_retries),
        }
    }

    pub fn from_settings(settings: &ActionSettings) -> Self {
        Self::new(settings.max_staging_retries)
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn is_claimable(item: &WorkItem) -> bool {
        matches!(
            item.status,
            WorkStatus::Job(JobStatus::Pending) | WorkStatus::Transfer(TransferStatus::StagingQueued)
        )
    }

    /// Status a staging item waits in between attempts.
    pub fn rollback_status(item: &WorkItem) -> Option<WorkStatus> {
        Some(queued_status(item))
    }

    pub async fn run(&self, ctx: &ActionContext, mut item: WorkItem) -> Result<Outcome, Failure> {
        let result = match item.payload {
            WorkPayload::Job(_) => {
                if past_deadline(&item, ctx.settings().input_staging_deadline, Utc::now()) {
                    let message = format!(
                        "Removing job from queue. Inputs could not be staged within {} days of submission.",
                        ctx.settings().input_staging_deadline.as_secs() / 86_400
                    );
                    let result = expire(ctx, &mut item, &message).await;
                    return persisted(result, Outcome::Fatal(message));
                }
                self.stage_job(ctx, &mut item).await
            }
            WorkPayload::Transfer(_) => self.stage_transfer(ctx, &mut item).await,
        };

        match result {
            Ok(()) => Ok(Outcome::Completed),
            Err(err) => self.handle_failure(ctx, item, err).await,
        }
    }

    async fn stage_transfer(&self, ctx: &ActionContext, item: &mut WorkItem) -> Result<(), StepError> {
        let spec = item
            .transfer_spec()
            .cloned()
            .ok_or_else(|| StepError::Fatal("work item is not a transfer".to_string()))?;

        ctx.checkpoint()?;
        let source_uri = parse_uri(&spec.source_uri)?;
        let source = ctx
            .connect_uri(&item.tenant_id, &item.owner, &source_uri)
            .await?;

        ctx.checkpoint()?;
        let system = resolve_available_system(ctx, item).await?;
        let dest = ctx.connect(&system, &item.owner).await?;

        ctx.update_status(
            item,
            TransferStatus::Staging,
            format!("Transfer in progress from {} to {}", spec.source_uri, spec.dest_path),
        )
        .await?;
        sync_logical_file(ctx, item).await;

        ctx.checkpoint()?;
        let copied = copy_if_needed(
            ctx,
            source.client.as_ref(),
            &source.path,
            dest.as_ref(),
            &spec.dest_path,
        )
        .await?;

        item.retry_count = 0;
        let message = if copied {
            "Transfer completed"
        } else {
            "Destination already matches the source, transfer skipped"
        };
        ctx.update_status(item, TransferStatus::StagingCompleted, message)
            .await?;
        sync_logical_file(ctx, item).await;
        info!(item_id = %item.id, owner = %item.owner, copied, "Transfer staged");
        Ok(())
    }

    async fn stage_job(&self, ctx: &ActionContext, job: &mut WorkItem) -> Result<(), StepError> {
        let inputs: Vec<(String, String)> = job
            .job_spec()
            .map(|spec| {
                spec.inputs
                    .iter()
                    .flat_map(|input| {
                        input
                            .values
                            .iter()
                            .map(move |value| (input.name.clone(), value.clone()))
                    })
                    .collect()
            })
            .unwrap_or_default();

        ctx.checkpoint()?;
        ctx.update_status(
            job,
            JobStatus::ProcessingInputs,
            format!("Attempt {} to stage job inputs", job.retry_count + 1),
        )
        .await?;

        if inputs.is_empty() {
            ctx.update_status(
                job,
                JobStatus::Staged,
                "Skipping staging. No input data associated with this job.",
            )
            .await?;
            return Ok(());
        }

        ctx.checkpoint()?;
        let system = resolve_available_system(ctx, job).await?;
        let dest = ctx.connect(&system, &job.owner).await?;

        let work_path = match job.job_spec().and_then(|spec| spec.work_path.clone()) {
            Some(path) => path,
            None => {
                let path = format!(
                    "{}/{}/job-{}",
                    system.work_dir.trim_end_matches('/'),
                    job.owner,
                    job.id
                );
                if let Some(spec) = job.job_spec_mut() {
                    spec.work_path = Some(path.clone());
                }
                path
            }
        };

        ctx.update_status(
            job,
            JobStatus::StagingInputs,
            format!("Staging {} inputs to {}:{}", inputs.len(), system.id, work_path),
        )
        .await?;

        for (name, value) in &inputs {
            ctx.checkpoint()?;
            let uri = parse_uri(value)?;
            let source = ctx.connect_uri(&job.tenant_id, &job.owner, &uri).await?;
            let dest_path = format!("{}/{}", work_path, file_name(&source.path, name));

            ctx.checkpoint()?;
            let copied = copy_if_needed(
                ctx,
                source.client.as_ref(),
                &source.path,
                dest.as_ref(),
                &dest_path,
            )
            .await?;
            debug!(item_id = %job.id, input = %name, copied, "Staged job input {}", value);
        }

        job.retry_count = 0;
        ctx.update_status(job, JobStatus::Staged, "Job inputs staged to execution system")
            .await?;
        info!(item_id = %job.id, owner = %job.owner, inputs = inputs.len(), "Job inputs staged");
        Ok(())
    }

    async fn handle_failure(
        &self,
        ctx: &ActionContext,
        mut item: WorkItem,
        err: StepError,
    ) -> Result<Outcome, Failure> {
        let failure = err.classify(&self.policy);
        match failure.kind {
            FailureKind::ConcurrencyConflict => {
                debug!(item_id = %item.id, "Race avoided during staging: {}", failure.message);
                Ok(Outcome::ConcurrencyConflict(failure.message))
            }
            // Rolled back by the lease
            FailureKind::Interrupted => Err(failure),
            FailureKind::Unavailable => {
                info!(item_id = %item.id, "Staging deferred: {}", failure.message);
                let status = queued_status(&item);
                let result = ctx
                    .update_status(
                        &mut item,
                        status,
                        format!(
                            "Remote system is currently unavailable. Staging will resume when it is available. {}",
                            failure.message
                        ),
                    )
                    .await;
                if result.is_ok() {
                    ctx.event(&item, WorkItemEventType::SystemUnavailable, &failure.message)
                        .await;
                }
                persisted(result, Outcome::Unavailable(failure.message))
            }
            FailureKind::Fatal if is_hard_failure(&err) => {
                // Retrying cannot fix permissions or a bad target.
                let attempts = self.policy.max_retries().max(item.retry_count + 1);
                self.exhaust(ctx, item, attempts, failure.message).await
            }
            FailureKind::Fatal => {
                let result = fail(ctx, &mut item, &failure.message).await;
                persisted(result, Outcome::Fatal(failure.message))
            }
            FailureKind::Retryable => match self.policy.consume(item.retry_count) {
                RetryDecision::Retry {
                    retry_count,
                    remaining,
                } => {
                    warn!(
                        item_id = %item.id,
                        retry_count,
                        remaining,
                        "Staging attempt failed: {}",
                        failure.message
                    );
                    item.retry_count = retry_count;
                    let status = queued_status(&item);
                    let message = format!(
                        "Attempt {} failed: {}. {} attempts remaining.",
                        retry_count, failure.message, remaining
                    );
                    let result = ctx.update_status(&mut item, status, &message).await;
                    if result.is_ok() {
                        sync_logical_file(ctx, &item).await;
                        ctx.event(&item, WorkItemEventType::Retry, message).await;
                    }
                    persisted(result, Outcome::Retryable(failure.message))
                }
                RetryDecision::Exhausted { attempts } => {
                    self.exhaust(ctx, item, attempts, failure.message).await
                }
            },
        }
    }

    async fn exhaust(
        &self,
        ctx: &ActionContext,
        mut item: WorkItem,
        attempts: u32,
        reason: String,
    ) -> Result<Outcome, Failure> {
        item.retry_count = attempts;
        let message = format!("Staging failed after {} attempts: {}", attempts, reason);
        let result = fail(ctx, &mut item, &message).await;
        persisted(result, Outcome::Fatal(message))
    }
}

/// Pre-execution status the item is requeued at.
fn queued_status(item: &WorkItem) -> WorkStatus {
    match item.payload {
        WorkPayload::Job(_) => JobStatus::Pending.into(),
        WorkPayload::Transfer(_) => TransferStatus::StagingQueued.into(),
    }
}

fn is_hard_failure(err: &StepError) -> bool {
    matches!(
        err,
        StepError::Remote(RemoteError::PermissionDenied(_) | RemoteError::InvalidTransfer(_))
    )
}

async fn fail(
    ctx: &ActionContext,
    item: &mut WorkItem,
    message: &str,
) -> Result<(), crate::error::StoreError> {
    error!(item_id = %item.id, owner = %item.owner, "{}", message);
    let status = failed_status(item);
    ctx.update_status(item, status, message).await?;
    sync_logical_file(ctx, item).await;
    ctx.event(item, WorkItemEventType::Failed, message).await;
    Ok(())
}

/// Mirrors a transfer's status onto its parent logical file.
async fn sync_logical_file(ctx: &ActionContext, item: &WorkItem) {
    let (Some(spec), Some(status)) = (item.transfer_spec(), item.transfer_status()) else {
        return;
    };
    let Some(logical_file_id) = spec.logical_file_id.as_deref() else {
        return;
    };
    if let Err(e) = ctx
        .store()
        .set_logical_file_status(logical_file_id, status.into())
        .await
    {
        warn!(item_id = %item.id, logical_file_id, "Unable to update logical file status: {}", e);
    }
}

fn parse_uri(value: &str) -> Result<Url, RemoteError> {
    Url::parse(value).map_err(|e| RemoteError::InvalidUri {
        uri: value.to_string(),
        reason: e.to_string(),
    })
}

/// Last path segment of `path`, or `fallback` when there is none.
fn file_name<'a>(path: &'a str, fallback: &'a str) -> &'a str {
    path.rsplit('/')
        .find(|segment| !segment.is_empty())
        .unwrap_or(fallback)
}

/// Copies `src_path` unless `dest_path` already holds the same file.
/// Returns whether a copy was made.
async fn copy_if_needed(
    ctx: &ActionContext,
    source: &dyn RemoteClient,
    src_path: &str,
    dest: &dyn RemoteClient,
    dest_path: &str,
) -> Result<bool, RemoteError> {
    if already_transferred(source, src_path, dest, dest_path).await {
        debug!(src_path, dest_path, "Destination already matches source, skipping copy");
        return Ok(false);
    }
    let bytes = source
        .copy(src_path, dest, dest_path, &ctx.abort_signal())
        .await?;
    debug!(src_path, dest_path, bytes, "Copied");
    Ok(true)
}

async fn already_transferred(
    source: &dyn RemoteClient,
    src_path: &str,
    dest: &dyn RemoteClient,
    dest_path: &str,
) -> bool {
    // A missing or unreadable destination is simply copied.
    let Ok(dest_info) = dest.stat(dest_path).await else {
        return false;
    };
    if !dest_info.is_file {
        return false;
    }
    let Ok(src_info) = source.stat(src_path).await else {
        return false;
    };
    if src_info.size != dest_info.size {
        return false;
    }

    match (source.checksum(src_path).await, dest.checksum(dest_path).await) {
        (Ok(src_sum), Ok(dest_sum)) => src_sum == dest_sum,
        // Sizes match and the protocol cannot hash, so trust the size.
        (Err(RemoteError::ChecksumUnsupported(_)), _)
        | (_, Err(RemoteError::ChecksumUnsupported(_))) => true,
        _ => false,
    }
}
