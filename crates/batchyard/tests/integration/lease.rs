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

//! Worker lease lifecycle: claim, interrupt, rollback and last-resort failure.

use batchyard::actions::{StagingAction, SubmissionAction, WorkerAction};
use batchyard::dispatcher::DispatchCoordinator;
use batchyard::error::InterruptError;
use batchyard::lease::{LeaseState, WorkerLease};
use batchyard::models::{JobStatus, TransferStatus, WorkItemEventType, WorkStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use crate::fixtures::{job, transfer, wait_until, TestEnv};

fn staging() -> WorkerAction {
    WorkerAction::Staging(StagingAction::new(3))
}

fn env_with_source() -> TestEnv {
    let env = TestEnv::new();
    env.storage().put("/data/in.dat", 128, "abc");
    env
}

#[tokio::test]
async fn test_ineligible_item_is_left_alone() {
    let env = TestEnv::new();
    let item = env.store.insert(job("alice").with_status(JobStatus::Running));

    let state = WorkerLease::new(item.id, staging(), env.worker()).run().await;

    assert_eq!(state, LeaseState::Idle);
    assert_eq!(env.store.snapshot(&item.id).unwrap().version, item.version);
    assert!(env.events.events_for(&item.id).is_empty());
}

#[tokio::test]
async fn test_claim_is_released_after_run() {
    let env = env_with_source();
    let item = env
        .store
        .insert(transfer("alice", "mem:///data/in.dat", "/scratch/in.dat"));
    let coordinator = DispatchCoordinator::new("file_staging", 4, Arc::new(Semaphore::new(4)));
    let guard = coordinator
        .try_claim(item.id, staging().kind())
        .expect("claim admitted");

    let state = WorkerLease::new(item.id, staging(), env.worker())
        .with_claim(guard)
        .run()
        .await;

    assert_eq!(state, LeaseState::Completed);
    assert!(!coordinator.is_claimed(&item.id));
    // source and destination connections are both closed
    assert_eq!(env.storage().disconnects(), 2);
}

/// A stop request aborts the copy and rolls the transfer back to its queue.
#[tokio::test]
async fn test_interrupt_rolls_back_to_queued() {
    let env = env_with_source();
    env.storage().set_block_copies(true);
    let item = env
        .store
        .insert(transfer("alice", "mem:///data/in.dat", "/scratch/in.dat"));

    let lease = WorkerLease::new(item.id, staging(), env.worker());
    let control = lease.control();
    let worker = tokio::spawn(lease.run());

    let store = env.store.clone();
    assert!(
        wait_until(|| {
            store.snapshot(&item.id).map(|i| i.status)
                == Some(WorkStatus::Transfer(TransferStatus::Staging))
        })
        .await
    );

    control
        .interrupt(Duration::from_secs(1))
        .await
        .expect("worker honors the stop request");
    assert_eq!(worker.await.unwrap(), LeaseState::Interrupted);

    let stored = env.store.snapshot(&item.id).unwrap();
    assert_eq!(stored.status, TransferStatus::StagingQueued.into());
    assert_eq!(stored.retry_count, 0);
    assert_eq!(
        env.events.count_of(&item.id, WorkItemEventType::Interrupted),
        1
    );
    assert_eq!(env.storage().copies(), 0);
}

/// A lease stopped before it reaches the scheduler ends interrupted and untouched.
#[tokio::test]
async fn test_stop_before_launch_ends_interrupted() {
    let env = TestEnv::new();
    let item = env.store.insert(job("alice").with_status(JobStatus::Staged));

    let lease = WorkerLease::new(
        item.id,
        WorkerAction::Submission(SubmissionAction::new(3)),
        env.worker(),
    );
    lease.control().request_stop();

    assert_eq!(lease.run().await, LeaseState::Interrupted);
    assert_eq!(env.scheduler().launch_count(), 0);
    let stored = env.store.snapshot(&item.id).unwrap();
    assert_eq!(stored.status, JobStatus::Staged.into());
    assert_eq!(stored.version, item.version);
}

#[tokio::test]
async fn test_interrupt_times_out_on_unresponsive_worker() {
    let env = env_with_source();
    env.storage().set_stall_copies(true);
    let item = env
        .store
        .insert(transfer("alice", "mem:///data/in.dat", "/scratch/in.dat"));

    let coordinator = DispatchCoordinator::new("file_staging", 4, Arc::new(Semaphore::new(4)));
    let guard = coordinator
        .try_claim(item.id, staging().kind())
        .expect("claim admitted");

    let lease = WorkerLease::new(item.id, staging(), env.worker()).with_claim(guard);
    let control = lease.control();
    let worker = tokio::spawn(lease.run());

    let store = env.store.clone();
    assert!(
        wait_until(|| {
            store.snapshot(&item.id).map(|i| i.status)
                == Some(WorkStatus::Transfer(TransferStatus::Staging))
        })
        .await
    );

    let err = control
        .interrupt(Duration::from_millis(50))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        InterruptError::Timeout {
            item_id: item.id,
            timeout: Duration::from_millis(50),
        }
    );
    assert!(control.is_stopped());
    assert!(!control.is_task_complete());
    // the stuck worker keeps its claim until it actually exits
    assert!(coordinator.is_claimed(&item.id));

    worker.abort();
    assert!(wait_until(|| !coordinator.is_claimed(&item.id)).await);
}

/// A panicking action still leaves the item in a terminal status.
#[tokio::test]
async fn test_panic_fails_item() {
    let env = env_with_source();
    env.storage().set_panic_copies(true);
    let item = env
        .store
        .insert(transfer("alice", "mem:///data/in.dat", "/scratch/in.dat"));

    let state = WorkerLease::new(item.id, staging(), env.worker()).run().await;

    assert_eq!(state, LeaseState::Failed);
    let stored = env.store.snapshot(&item.id).unwrap();
    assert_eq!(stored.status, TransferStatus::StagingFailed.into());
    let failed: Vec<_> = env
        .events
        .events_for(&item.id)
        .into_iter()
        .filter(|e| e.event_type == WorkItemEventType::Failed)
        .collect();
    assert_eq!(failed.len(), 1);
    assert!(failed[0].message.contains("storage driver crashed"));
}

#[tokio::test]
async fn test_prefetched_item_skips_load() {
    let env = TestEnv::new();
    let item = env.store.insert(job("alice"));
    let stale = item.clone().with_status(JobStatus::Failed);

    let state = WorkerLease::new(item.id, staging(), env.worker())
        .with_item(stale)
        .run()
        .await;
    assert_eq!(state, LeaseState::Idle);
    assert_eq!(
        env.store.snapshot(&item.id).unwrap().status,
        JobStatus::Pending.into()
    );
}
