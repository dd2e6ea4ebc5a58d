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

//! The scheduler driving items through the whole pipeline.

use batchyard::config::SchedulerConfig;
use batchyard::models::{JobStatus, TransferStatus, WorkItemId, WorkStatus};
use batchyard::poller::BackoffSchedule;
use batchyard::scheduler::{Scheduler, WorkerKind};
use std::time::Duration;

use crate::fixtures::{job_with_inputs, transfer, wait_until, TestEnv};

const SOURCE: &str = "mem:///data/in.dat";

fn env() -> TestEnv {
    let env = TestEnv::new();
    env.storage().put("/data/in.dat", 128, "abc");
    env
}

/// Polls every in-flight job on every tick.
fn eager_config() -> SchedulerConfig {
    SchedulerConfig::builder()
        .staging_poll_interval(Duration::from_millis(10))
        .submission_poll_interval(Duration::from_millis(10))
        .monitoring_poll_interval(Duration::from_millis(10))
        .backoff(BackoffSchedule::new(Vec::new(), Duration::ZERO).unwrap())
        .build()
        .unwrap()
}

fn scheduler(env: &TestEnv, config: SchedulerConfig) -> Scheduler {
    Scheduler::with_seed(
        config,
        env.store.clone(),
        env.registry.clone(),
        env.events.clone(),
        21,
    )
}

fn status_of(env: &TestEnv, id: &WorkItemId) -> Option<WorkStatus> {
    env.store.snapshot(id).map(|item| item.status)
}

#[tokio::test]
async fn test_ticks_drive_job_to_cleanup() {
    let env = env();
    env.scheduler()
        .respond("1001", Ok("1001|COMPLETED|0:0|\n".to_string()));
    let scheduler = scheduler(&env, eager_config());
    let item = env.store.insert(job_with_inputs("alice", &[SOURCE]));

    assert!(scheduler.tick(WorkerKind::InputStaging).await.unwrap());
    assert!(wait_until(|| status_of(&env, &item.id) == Some(JobStatus::Staged.into())).await);
    assert!(wait_until(|| scheduler.coordinator(WorkerKind::InputStaging).is_empty()).await);

    assert!(scheduler.tick(WorkerKind::Submission).await.unwrap());
    assert!(wait_until(|| status_of(&env, &item.id) == Some(JobStatus::Queued.into())).await);
    assert!(wait_until(|| scheduler.coordinator(WorkerKind::Submission).is_empty()).await);

    assert!(scheduler.tick(WorkerKind::Monitoring).await.unwrap());
    assert!(wait_until(|| status_of(&env, &item.id) == Some(JobStatus::CleaningUp.into())).await);

    assert!(!scheduler.tick(WorkerKind::Monitoring).await.unwrap());
}

#[tokio::test]
async fn test_background_loops_stage_transfers() {
    let env = env();
    let scheduler = scheduler(&env, eager_config());
    let ids: Vec<WorkItemId> = (0..4)
        .map(|i| {
            env.store
                .insert(transfer(
                    if i % 2 == 0 { "alice" } else { "bob" },
                    SOURCE,
                    &format!("/scratch/in-{}.dat", i),
                ))
                .id
        })
        .collect();

    scheduler.start();
    assert!(
        wait_until(|| ids
            .iter()
            .all(|id| status_of(&env, id) == Some(TransferStatus::StagingCompleted.into())))
        .await
    );
    assert!(scheduler.shutdown(Duration::from_secs(1)).await.is_empty());
    assert_eq!(env.storage().copies(), 4);
}

#[tokio::test]
async fn test_draining_dispatches_nothing() {
    let env = env();
    let config = SchedulerConfig::builder()
        .drain_queues(true)
        .build()
        .unwrap();
    let scheduler = scheduler(&env, config);
    let item = env.store.insert(job_with_inputs("alice", &[SOURCE]));

    for kind in WorkerKind::ALL {
        assert!(!scheduler.tick(kind).await.unwrap());
    }
    assert_eq!(status_of(&env, &item.id), Some(JobStatus::Pending.into()));
}

/// Shutdown interrupts a live worker and returns its item to the queue.
#[tokio::test]
async fn test_shutdown_rolls_back_live_workers() {
    let env = env();
    env.storage().set_block_copies(true);
    let scheduler = scheduler(&env, eager_config());
    let item = env.store.insert(job_with_inputs("alice", &[SOURCE]));

    assert!(scheduler.tick(WorkerKind::InputStaging).await.unwrap());
    assert!(
        wait_until(|| status_of(&env, &item.id) == Some(JobStatus::StagingInputs.into())).await
    );
    assert_eq!(scheduler.live_workers(), 1);

    let stuck = scheduler.shutdown(Duration::from_secs(1)).await;
    assert!(stuck.is_empty());
    assert_eq!(status_of(&env, &item.id), Some(JobStatus::Pending.into()));
}

#[tokio::test]
async fn test_shutdown_reports_unresponsive_workers() {
    let env = env();
    env.storage().set_stall_copies(true);
    let scheduler = scheduler(&env, eager_config());
    let item = env.store.insert(job_with_inputs("alice", &[SOURCE]));

    assert!(scheduler.tick(WorkerKind::InputStaging).await.unwrap());
    assert!(
        wait_until(|| status_of(&env, &item.id) == Some(JobStatus::StagingInputs.into())).await
    );

    let stuck = scheduler.shutdown(Duration::from_millis(50)).await;
    assert_eq!(stuck.len(), 1);
}

#[tokio::test]
async fn test_interrupt_single_item() {
    let env = env();
    env.storage().set_block_copies(true);
    let scheduler = scheduler(&env, eager_config());
    let item = env
        .store
        .insert(transfer("alice", SOURCE, "/scratch/in.dat"));

    assert!(scheduler.tick(WorkerKind::FileStaging).await.unwrap());
    assert!(
        wait_until(|| status_of(&env, &item.id) == Some(TransferStatus::Staging.into())).await
    );

    assert_eq!(scheduler.interrupt(&item.id).await, Ok(true));
    assert!(wait_until(|| scheduler.live_workers() == 0).await);
    assert_eq!(
        status_of(&env, &item.id),
        Some(TransferStatus::StagingQueued.into())
    );
    assert_eq!(scheduler.interrupt(&item.id).await, Ok(false));
}

#[test]
#[serial_test::serial]
fn test_repeated_tracing_init_is_harmless() {
    crate::fixtures::init_logging();
    assert!(!batchyard::logging::init_tracing("batchyard=debug"));
}
