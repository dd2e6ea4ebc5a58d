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

//! Job submission: launch, retries, quota deferral and interruption.

use batchyard::actions::{SubmissionAction, WorkerAction};
use batchyard::error::RemoteError;
use batchyard::lease::{LeaseState, WorkerLease};
use batchyard::models::{JobStatus, SystemStatus, WorkItem, WorkItemEventType, WorkStatus};
use batchyard::outcome::Outcome;
use chrono::Utc;
use std::time::Duration;

use crate::fixtures::{job, limited_system, run_action, wait_until, SaveFault, TestEnv, SYSTEM};

fn submission() -> WorkerAction {
    WorkerAction::Submission(SubmissionAction::new(3))
}

fn staged(owner: &str) -> WorkItem {
    job(owner).with_status(JobStatus::Staged)
}

async fn submit(env: &TestEnv, item: &WorkItem) -> LeaseState {
    WorkerLease::new(item.id, submission(), env.worker()).run().await
}

#[tokio::test]
async fn test_staged_job_is_queued_remotely() {
    let env = TestEnv::new();
    let item = env.store.insert(staged("alice"));

    assert_eq!(submit(&env, &item).await, LeaseState::Completed);

    let stored = env.store.snapshot(&item.id).unwrap();
    assert_eq!(stored.status, JobStatus::Queued.into());
    assert_eq!(stored.remote_job_id.as_deref(), Some("1001"));
    assert_eq!(stored.retry_count, 0);
    assert!(stored.job_spec().unwrap().submitted_at.is_some());
    assert_eq!(env.scheduler().launch_count(), 1);
}

#[tokio::test]
async fn test_transient_launch_failures_are_retried_in_place() {
    let env = TestEnv::new();
    env.scheduler().script_launches([
        Err(RemoteError::Scheduler("sbatch: socket timed out".to_string())),
        Err(RemoteError::Io("connection reset".to_string())),
        Ok("42".to_string()),
    ]);
    let item = env.store.insert(staged("alice"));

    assert_eq!(submit(&env, &item).await, LeaseState::Completed);

    let stored = env.store.snapshot(&item.id).unwrap();
    assert_eq!(stored.status, JobStatus::Queued.into());
    assert_eq!(stored.remote_job_id.as_deref(), Some("42"));
    assert_eq!(stored.retry_count, 0);
    assert_eq!(env.scheduler().launch_count(), 3);
    assert_eq!(env.events.count_of(&item.id, WorkItemEventType::Retry), 2);
}

#[tokio::test]
async fn test_exhausted_launches_fail_and_clean_up() {
    let env = TestEnv::new();
    env.scheduler()
        .script_launches((0..3).map(|_| Err(RemoteError::Scheduler("queue rejected".to_string()))));
    let item = env.store.insert(staged("alice"));

    assert_eq!(submit(&env, &item).await, LeaseState::Failed);

    let stored = env.store.snapshot(&item.id).unwrap();
    assert_eq!(stored.status, JobStatus::Failed.into());
    assert_eq!(stored.retry_count, 3);
    assert_eq!(stored.remote_job_id, None);
    assert_eq!(env.scheduler().launch_count(), 3);
    assert_eq!(env.scheduler().deleted_dirs(), 1);
    assert_eq!(env.events.count_of(&item.id, WorkItemEventType::Failed), 1);
}

#[tokio::test]
async fn test_empty_handle_counts_as_failed_launch() {
    let env = TestEnv::new();
    env.scheduler().script_launches([Ok("  ".to_string())]);
    let item = env.store.insert(staged("alice"));

    assert_eq!(submit(&env, &item).await, LeaseState::Completed);

    let stored = env.store.snapshot(&item.id).unwrap();
    assert_eq!(stored.remote_job_id.as_deref(), Some("1001"));
    assert_eq!(env.scheduler().launch_count(), 2);
}

/// Another worker filled the queue after selection; the job waits in STAGED.
#[tokio::test]
async fn test_quota_violation_defers_submission() {
    let env = TestEnv::with_system(limited_system(1, 1));
    env.store.insert(job("bob").with_status(JobStatus::Running));
    let item = env.store.insert(staged("alice"));

    assert_eq!(submit(&env, &item).await, LeaseState::Failed);

    let stored = env.store.snapshot(&item.id).unwrap();
    assert_eq!(stored.status, JobStatus::Staged.into());
    assert_eq!(stored.retry_count, 0);
    assert_eq!(env.scheduler().launch_count(), 0);
    assert_eq!(
        env.events.count_of(&item.id, WorkItemEventType::QuotaExceeded),
        1
    );
}

#[tokio::test]
async fn test_system_quota_counts_every_queue() {
    let mut system = limited_system(10, 10);
    system.max_system_jobs_per_user = batchyard::models::Limit::at_most(1);
    let env = TestEnv::with_system(system);
    let mut elsewhere = job("alice").with_status(JobStatus::Queued);
    elsewhere.queue_name = "long".to_string();
    env.store.insert(elsewhere);
    let item = env.store.insert(staged("alice"));

    submit(&env, &item).await;
    assert_eq!(
        env.store.snapshot(&item.id).unwrap().status,
        JobStatus::Staged.into()
    );
    assert_eq!(env.scheduler().launch_count(), 0);
}

#[tokio::test]
async fn test_unavailable_system_pauses_submission() {
    let env = TestEnv::new();
    env.registry
        .update_system(SYSTEM, |system| system.status = SystemStatus::Down);
    let item = env.store.insert(staged("alice"));

    submit(&env, &item).await;

    let stored = env.store.snapshot(&item.id).unwrap();
    assert_eq!(stored.status, JobStatus::Staged.into());
    assert_eq!(
        env.events
            .count_of(&item.id, WorkItemEventType::SystemUnavailable),
        1
    );
    assert_eq!(env.scheduler().launch_count(), 0);
}

#[tokio::test]
async fn test_unknown_system_is_fatal() {
    let env = TestEnv::new();
    let mut orphan = staged("alice");
    orphan.execution_system_id = "decommissioned".to_string();
    let item = env.store.insert(orphan);

    assert_eq!(submit(&env, &item).await, LeaseState::Failed);
    assert_eq!(
        env.store.snapshot(&item.id).unwrap().status,
        JobStatus::Failed.into()
    );
}

#[tokio::test]
async fn test_job_past_deadline_is_removed() {
    let env = TestEnv::new();
    let item = env.store.insert(
        staged("alice").with_created_at(Utc::now() - chrono::Duration::days(31)),
    );

    assert_eq!(submit(&env, &item).await, LeaseState::Failed);
    assert_eq!(
        env.store.snapshot(&item.id).unwrap().status,
        JobStatus::Failed.into()
    );
    assert_eq!(env.scheduler().launch_count(), 0);
}

/// Interrupting a launch returns the job to STAGED for another worker.
#[tokio::test]
async fn test_interrupted_launch_rolls_back() {
    let env = TestEnv::new();
    env.scheduler().set_block_launches(true);
    let item = env.store.insert(staged("alice"));

    let lease = WorkerLease::new(item.id, submission(), env.worker());
    let control = lease.control();
    let worker = tokio::spawn(lease.run());

    assert!(wait_until(|| env.scheduler().launch_count() == 1).await);
    assert_eq!(
        env.store.snapshot(&item.id).unwrap().status,
        WorkStatus::Job(JobStatus::Submitting)
    );

    control.interrupt(Duration::from_secs(1)).await.unwrap();
    assert_eq!(worker.await.unwrap(), LeaseState::Interrupted);

    let stored = env.store.snapshot(&item.id).unwrap();
    assert_eq!(stored.status, JobStatus::Staged.into());
    assert_eq!(stored.remote_job_id, None);
    assert_eq!(
        env.events.count_of(&item.id, WorkItemEventType::Interrupted),
        1
    );
}

/// A store hiccup after launch is retried without launching the job again.
#[tokio::test]
async fn test_failed_queued_save_does_not_relaunch() {
    let env = TestEnv::new();
    let item = env.store.insert(staged("alice"));
    let store = env.flaky_store(
        JobStatus::Queued,
        SaveFault::Backend("db connection dropped".to_string()),
        1,
    );

    let state = WorkerLease::new(item.id, submission(), env.worker_on(store))
        .run()
        .await;

    assert_eq!(state, LeaseState::Completed);
    assert_eq!(env.scheduler().launch_count(), 1);
    let stored = env.store.snapshot(&item.id).unwrap();
    assert_eq!(stored.status, JobStatus::Queued.into());
    assert_eq!(stored.remote_job_id.as_deref(), Some("1001"));
    assert_eq!(env.events.count_of(&item.id, WorkItemEventType::Retry), 0);
}

#[tokio::test]
async fn test_unrecordable_launch_fails_with_handle_kept() {
    let env = TestEnv::new();
    let item = env.store.insert(staged("alice"));
    let store = env.flaky_store(
        JobStatus::Queued,
        SaveFault::Backend("db connection dropped".to_string()),
        usize::MAX,
    );

    let state = WorkerLease::new(item.id, submission(), env.worker_on(store))
        .run()
        .await;

    assert_eq!(state, LeaseState::Failed);
    assert_eq!(env.scheduler().launch_count(), 1);
    let stored = env.store.snapshot(&item.id).unwrap();
    assert_eq!(stored.status, JobStatus::Failed.into());
    assert_eq!(stored.remote_job_id.as_deref(), Some("1001"));
    assert_eq!(env.events.count_of(&item.id, WorkItemEventType::Failed), 1);
}

/// Another scheduler already took the job; this one backs off untouched.
#[tokio::test]
async fn test_concurrent_submission_is_swallowed() {
    let env = TestEnv::new();
    let item = env.store.insert(staged("alice"));
    let store = env.flaky_store(
        JobStatus::Submitting,
        SaveFault::Overtaken(JobStatus::Queued.into()),
        1,
    );

    let outcome = run_action(env.worker_on(store), &submission(), item.clone()).await;

    assert!(
        matches!(outcome, Ok(Outcome::ConcurrencyConflict(_))),
        "unexpected outcome {:?}",
        outcome
    );
    assert_eq!(env.scheduler().launch_count(), 0);
    let stored = env.store.snapshot(&item.id).unwrap();
    assert_eq!(stored.status, JobStatus::Queued.into());
    assert_eq!(stored.retry_count, 0);
    assert_eq!(stored.version, item.version + 1);
}
