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

//! Status polling of in-flight jobs.

use batchyard::actions::{MonitoringAction, WorkerAction};
use batchyard::error::RemoteError;
use batchyard::filter::SelectionFilter;
use batchyard::lease::{LeaseState, WorkerLease};
use batchyard::models::{JobSpec, JobStatus, SchedulerType, WorkItem, WorkItemEventType};
use batchyard::poller::{BackoffSchedule, StalenessPoller};
use chrono::Utc;
use std::time::Duration;

use crate::fixtures::{job, run_action, SaveFault, TestEnv, QUEUE, SYSTEM, TENANT};

const HANDLE: &str = "1001";

fn queued() -> WorkItem {
    job("alice")
        .with_status(JobStatus::Queued)
        .with_remote_job_id(HANDLE)
}

async fn poll(env: &TestEnv, item: &WorkItem) -> LeaseState {
    WorkerLease::new(
        item.id,
        WorkerAction::Monitoring(MonitoringAction::new()),
        env.worker(),
    )
    .run()
    .await
}

async fn poll_with(env: &TestEnv, response: &str) -> WorkItem {
    env.scheduler().respond(HANDLE, Ok(response.to_string()));
    let item = env.store.insert(queued());
    assert_eq!(poll(env, &item).await, LeaseState::Completed);
    env.store.snapshot(&item.id).unwrap()
}

#[tokio::test]
async fn test_running_job_is_promoted() {
    let env = TestEnv::new();
    let stored = poll_with(&env, "1001|RUNNING|0:0|\n1001.batch|RUNNING|0:0|\n").await;
    assert_eq!(stored.status, JobStatus::Running.into());
    assert_eq!(stored.status_checks, 1);
}

/// A long-running job that gets suspended keeps its widened poll interval.
#[tokio::test]
async fn test_status_change_keeps_check_count() {
    let env = TestEnv::new();
    env.scheduler()
        .respond(HANDLE, Ok("1001|SUSPENDED|0:0|\n".to_string()));
    let item = env.store.insert(
        job("alice")
            .with_status(JobStatus::Running)
            .with_remote_job_id(HANDLE)
            .with_status_checks(300),
    );

    assert_eq!(poll(&env, &item).await, LeaseState::Completed);

    let stored = env.store.snapshot(&item.id).unwrap();
    assert_eq!(stored.status, JobStatus::Paused.into());
    assert_eq!(stored.status_checks, 301);
    assert_eq!(
        BackoffSchedule::default().interval(stored.status_checks),
        Duration::from_secs(60 * 60)
    );
}

#[tokio::test]
async fn test_completed_job_moves_to_cleanup() {
    let env = TestEnv::new();
    let stored = poll_with(&env, "1001|COMPLETED|0:0|\n").await;
    assert_eq!(stored.status, JobStatus::CleaningUp.into());
}

#[tokio::test]
async fn test_remote_failure_fails_job() {
    let env = TestEnv::new();
    let stored = poll_with(&env, "1001|CANCELLED by 1234|0:15|\n").await;
    assert_eq!(stored.status, JobStatus::Failed.into());
    assert_eq!(env.events.count_of(&stored.id, WorkItemEventType::Failed), 1);
}

#[tokio::test]
async fn test_remote_failure_with_archiving_still_cleans_up() {
    let env = TestEnv::new();
    env.scheduler()
        .respond(HANDLE, Ok("1001|TIMEOUT|0:0|\n".to_string()));
    let spec = JobSpec::new("app-1.0", SchedulerType::Slurm).with_archive_output(true);
    let item = env.store.insert(
        WorkItem::new_job("alice", TENANT, SYSTEM, QUEUE, spec)
            .with_status(JobStatus::Running)
            .with_remote_job_id(HANDLE),
    );

    poll(&env, &item).await;
    assert_eq!(
        env.store.snapshot(&item.id).unwrap().status,
        JobStatus::CleaningUp.into()
    );
}

#[tokio::test]
async fn test_unchanged_status_only_counts_the_check() {
    let env = TestEnv::new();
    let stored = poll_with(&env, "1001|PENDING|0:0|\n").await;
    assert_eq!(stored.status, JobStatus::Queued.into());
    assert_eq!(stored.status_checks, 1);
}

#[tokio::test]
async fn test_empty_response_is_recorded() {
    let env = TestEnv::new();
    env.scheduler().respond(HANDLE, Ok(String::new()));
    let item = env.store.insert(queued());

    assert_eq!(poll(&env, &item).await, LeaseState::Failed);

    let stored = env.store.snapshot(&item.id).unwrap();
    assert_eq!(stored.status, JobStatus::Queued.into());
    assert_eq!(stored.status_checks, 1);
    assert_eq!(
        env.events
            .count_of(&item.id, WorkItemEventType::EmptyStatusResponse),
        1
    );
}

#[tokio::test]
async fn test_unknown_remote_status_leaves_job_alone() {
    let env = TestEnv::new();
    let stored = poll_with(&env, "1001|SPECIAL_HOLD|0:0|\n").await;
    assert_eq!(stored.status, JobStatus::Queued.into());
    assert_eq!(
        env.events.count_of(&stored.id, WorkItemEventType::UnknownStatus),
        1
    );
}

#[tokio::test]
async fn test_transient_query_failure_keeps_status() {
    let env = TestEnv::new();
    env.scheduler()
        .respond(HANDLE, Err(RemoteError::Io("ssh timeout".to_string())));
    let item = env.store.insert(queued());

    assert_eq!(poll(&env, &item).await, LeaseState::Failed);

    let stored = env.store.snapshot(&item.id).unwrap();
    assert_eq!(stored.status, JobStatus::Queued.into());
    assert_eq!(stored.status_checks, 1);
}

#[tokio::test]
async fn test_fork_job_without_process_is_done() {
    let env = TestEnv::new();
    env.scheduler()
        .respond(HANDLE, Ok("  PID USER     STAT\n".to_string()));
    let spec = JobSpec::new("app-1.0", SchedulerType::Fork);
    let item = env.store.insert(
        WorkItem::new_job("alice", TENANT, SYSTEM, QUEUE, spec)
            .with_status(JobStatus::Running)
            .with_remote_job_id(HANDLE),
    );

    poll(&env, &item).await;
    assert_eq!(
        env.store.snapshot(&item.id).unwrap().status,
        JobStatus::CleaningUp.into()
    );
}

/// A polled job is not due again until its backoff interval has passed.
#[tokio::test]
async fn test_poller_waits_out_backoff_after_check() {
    let env = TestEnv::new();
    env.scheduler()
        .respond(HANDLE, Ok("1001|PENDING|0:0|\n".to_string()));
    let item = env
        .store
        .insert(queued().with_last_updated(Utc::now() - chrono::Duration::seconds(20)));
    let poller = StalenessPoller::new(
        env.store.clone(),
        BackoffSchedule::default(),
        Duration::from_secs(60 * 24 * 60 * 60),
    )
    .with_seed(3);

    let due = poller
        .select_next_to_monitor(&SelectionFilter::any())
        .await
        .unwrap();
    assert_eq!(due, Some(item.id));

    poll(&env, &item).await;
    let due = poller
        .select_next_to_monitor(&SelectionFilter::any())
        .await
        .unwrap();
    assert_eq!(due, None);
}

#[tokio::test]
async fn test_poller_ignores_jobs_past_max_age() {
    let env = TestEnv::new();
    env.store.insert(
        queued()
            .with_created_at(Utc::now() - chrono::Duration::days(90))
            .with_last_updated(Utc::now() - chrono::Duration::days(1)),
    );
    let poller = StalenessPoller::new(
        env.store.clone(),
        BackoffSchedule::default(),
        Duration::from_secs(60 * 24 * 60 * 60),
    );

    let due = poller
        .select_next_to_monitor(&SelectionFilter::any())
        .await
        .unwrap();
    assert_eq!(due, None);
}

/// A job changed by someone else mid-check is handed back as a conflict.
#[tokio::test]
async fn test_concurrent_change_is_raised_as_conflict() {
    let env = TestEnv::new();
    env.scheduler()
        .respond(HANDLE, Ok("1001|RUNNING|0:0|\n".to_string()));
    let item = env.store.insert(queued());
    let store = env.flaky_store(
        JobStatus::Queued,
        SaveFault::Overtaken(JobStatus::Killed.into()),
        1,
    );

    let outcome = run_action(
        env.worker_on(store),
        &WorkerAction::Monitoring(MonitoringAction::new()),
        item.clone(),
    )
    .await;

    let failure = outcome.unwrap_err();
    assert!(failure.is_conflict(), "unexpected failure {}", failure);
    let stored = env.store.snapshot(&item.id).unwrap();
    assert_eq!(stored.status, JobStatus::Killed.into());
    assert_eq!(stored.status_checks, 0);
    assert_eq!(env.events.count_of(&item.id, WorkItemEventType::Failed), 0);
}
