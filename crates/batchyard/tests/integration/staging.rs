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

//! Input and file staging end to end.

use batchyard::actions::{ActionSettings, StagingAction, WorkerAction};
use batchyard::error::RemoteError;
use batchyard::filter::SelectionFilter;
use batchyard::lease::{LeaseState, WorkerLease};
use batchyard::models::{
    JobStatus, LogicalFileStatus, SystemStatus, TransferStatus, WorkItem, WorkItemEventType,
};
use batchyard::outcome::Outcome;
use batchyard::selector::FairSelector;
use chrono::Utc;
use std::time::Duration;

use crate::fixtures::{job, job_with_inputs, run_action, transfer, SaveFault, TestEnv, SYSTEM};

const SOURCE: &str = "mem:///data/in.dat";
const DEST: &str = "/scratch/in.dat";

fn env() -> TestEnv {
    let env = TestEnv::new();
    env.storage().put("/data/in.dat", 128, "abc");
    env
}

async fn stage(env: &TestEnv, item: &WorkItem) -> LeaseState {
    WorkerLease::new(item.id, WorkerAction::Staging(StagingAction::new(3)), env.worker())
        .run()
        .await
}

#[tokio::test]
async fn test_transfer_is_copied_and_mirrored() {
    let env = env();
    let item = env.store.insert(transfer("alice", SOURCE, DEST));

    assert_eq!(stage(&env, &item).await, LeaseState::Completed);

    let stored = env.store.snapshot(&item.id).unwrap();
    assert_eq!(stored.status, TransferStatus::StagingCompleted.into());
    assert_eq!(env.storage().copies(), 1);
    assert_eq!(env.storage().file(DEST).unwrap().size, 128);
    assert_eq!(
        env.store.logical_file_status(&format!("lf-{}", DEST)),
        Some(LogicalFileStatus::StagingCompleted)
    );
}

/// Restaging a transfer whose destination already matches copies nothing.
#[tokio::test]
async fn test_matching_destination_is_not_copied_again() {
    let env = env();
    env.storage().put(DEST, 128, "abc");
    let item = env.store.insert(transfer("alice", SOURCE, DEST));

    assert_eq!(stage(&env, &item).await, LeaseState::Completed);
    assert_eq!(env.storage().copies(), 0);
    assert_eq!(
        env.store.snapshot(&item.id).unwrap().status,
        TransferStatus::StagingCompleted.into()
    );
}

#[tokio::test]
async fn test_equal_size_is_trusted_without_checksums() {
    let env = env();
    env.storage().put(DEST, 128, "stale");
    env.storage().set_checksums_unsupported(true);
    let item = env.store.insert(transfer("alice", SOURCE, DEST));

    assert_eq!(stage(&env, &item).await, LeaseState::Completed);
    assert_eq!(env.storage().copies(), 0);
}

#[tokio::test]
async fn test_checksum_mismatch_is_copied() {
    let env = env();
    env.storage().put(DEST, 128, "stale");
    let item = env.store.insert(transfer("alice", SOURCE, DEST));

    assert_eq!(stage(&env, &item).await, LeaseState::Completed);
    assert_eq!(env.storage().copies(), 1);
    assert_eq!(env.storage().file(DEST).unwrap().checksum, "abc");
}

#[tokio::test]
async fn test_job_without_inputs_goes_straight_to_staged() {
    let env = env();
    let item = env.store.insert(job("alice"));

    assert_eq!(stage(&env, &item).await, LeaseState::Completed);

    let stored = env.store.snapshot(&item.id).unwrap();
    assert_eq!(stored.status, JobStatus::Staged.into());
    assert_eq!(env.storage().copies(), 0);
    let messages: Vec<String> = env
        .events
        .events_for(&item.id)
        .into_iter()
        .map(|e| e.message)
        .collect();
    assert!(messages.iter().any(|m| m.starts_with("Skipping staging")));
}

#[tokio::test]
async fn test_job_inputs_land_in_work_dir() {
    let env = env();
    env.storage().put("/data/other.dat", 64, "def");
    let item = env
        .store
        .insert(job_with_inputs("alice", &[SOURCE, "mem:///data/other.dat"]));

    assert_eq!(stage(&env, &item).await, LeaseState::Completed);

    let stored = env.store.snapshot(&item.id).unwrap();
    assert_eq!(stored.status, JobStatus::Staged.into());
    let work_path = format!("/scratch/alice/job-{}", item.id);
    assert_eq!(
        stored.job_spec().unwrap().work_path.as_deref(),
        Some(work_path.as_str())
    );
    assert!(env.storage().file(&format!("{}/in.dat", work_path)).is_some());
    assert!(env.storage().file(&format!("{}/other.dat", work_path)).is_some());
    assert_eq!(env.storage().copies(), 2);
}

/// Three transient failures exhaust the budget; the job is never selected again.
#[tokio::test]
async fn test_retry_exhaustion_fails_job() {
    let env = env();
    env.storage()
        .fail_copies((0..3).map(|_| RemoteError::Io("connection reset".to_string())));
    let item = env.store.insert(job_with_inputs("alice", &[SOURCE]));

    assert_eq!(stage(&env, &item).await, LeaseState::Failed);
    let stored = env.store.snapshot(&item.id).unwrap();
    assert_eq!(stored.status, JobStatus::Pending.into());
    assert_eq!(stored.retry_count, 1);

    assert_eq!(stage(&env, &item).await, LeaseState::Failed);
    assert_eq!(env.store.snapshot(&item.id).unwrap().retry_count, 2);

    assert_eq!(stage(&env, &item).await, LeaseState::Failed);
    let stored = env.store.snapshot(&item.id).unwrap();
    assert_eq!(stored.status, JobStatus::Failed.into());
    assert_eq!(stored.retry_count, 3);

    assert_eq!(env.events.count_of(&item.id, WorkItemEventType::Retry), 2);
    assert_eq!(env.events.count_of(&item.id, WorkItemEventType::Failed), 1);

    let selector = FairSelector::with_seed(env.store.clone(), env.registry.clone(), 1);
    let selected = selector
        .select_next(JobStatus::Pending.into(), &SelectionFilter::any())
        .await
        .unwrap();
    assert_eq!(selected, None);
}

#[tokio::test]
async fn test_permission_denied_fails_without_retry() {
    let env = env();
    env.storage()
        .fail_copies([RemoteError::PermissionDenied("/scratch".to_string())]);
    let item = env.store.insert(transfer("alice", SOURCE, DEST));

    assert_eq!(stage(&env, &item).await, LeaseState::Failed);

    let stored = env.store.snapshot(&item.id).unwrap();
    assert_eq!(stored.status, TransferStatus::StagingFailed.into());
    assert_eq!(stored.retry_count, 3);
    assert_eq!(env.events.count_of(&item.id, WorkItemEventType::Retry), 0);
    assert_eq!(
        env.store.logical_file_status(&format!("lf-{}", DEST)),
        Some(LogicalFileStatus::StagingFailed)
    );
}

#[tokio::test]
async fn test_unsupported_protocol_is_fatal() {
    let env = env();
    let item = env
        .store
        .insert(transfer("alice", "gsiftp://legacy/data/in.dat", DEST));

    assert_eq!(stage(&env, &item).await, LeaseState::Failed);
    assert_eq!(
        env.store.snapshot(&item.id).unwrap().status,
        TransferStatus::StagingFailed.into()
    );
}

#[tokio::test]
async fn test_unavailable_system_requeues_without_consuming_retries() {
    let env = env();
    env.registry
        .update_system(SYSTEM, |system| system.status = SystemStatus::Maintenance);
    let item = env.store.insert(job_with_inputs("alice", &[SOURCE]));

    assert_eq!(stage(&env, &item).await, LeaseState::Failed);

    let stored = env.store.snapshot(&item.id).unwrap();
    assert_eq!(stored.status, JobStatus::Pending.into());
    assert_eq!(stored.retry_count, 0);
    assert_eq!(
        env.events
            .count_of(&item.id, WorkItemEventType::SystemUnavailable),
        1
    );
}

#[tokio::test]
async fn test_job_past_deadline_is_removed() {
    let env = env();
    let settings = ActionSettings {
        input_staging_deadline: Duration::from_secs(60),
        ..ActionSettings::default()
    };
    let item = env.store.insert(
        job_with_inputs("alice", &[SOURCE])
            .with_created_at(Utc::now() - chrono::Duration::minutes(5)),
    );

    let state = WorkerLease::new(
        item.id,
        WorkerAction::Staging(StagingAction::from_settings(&settings)),
        env.worker_with(settings),
    )
    .run()
    .await;

    assert_eq!(state, LeaseState::Failed);
    assert_eq!(
        env.store.snapshot(&item.id).unwrap().status,
        JobStatus::Failed.into()
    );
    assert!(env
        .events
        .events_for(&item.id)
        .iter()
        .any(|e| e.status == Some(JobStatus::Killed.into())));
    assert_eq!(env.storage().copies(), 0);
}

/// A transfer finished elsewhere is left as the other worker recorded it.
#[tokio::test]
async fn test_concurrent_transfer_is_swallowed() {
    let env = env();
    let item = env.store.insert(transfer("alice", SOURCE, DEST));
    let store = env.flaky_store(
        TransferStatus::Staging,
        SaveFault::Overtaken(TransferStatus::StagingCompleted.into()),
        1,
    );

    let outcome = run_action(
        env.worker_on(store),
        &WorkerAction::Staging(StagingAction::new(3)),
        item.clone(),
    )
    .await;

    assert!(
        matches!(outcome, Ok(Outcome::ConcurrencyConflict(_))),
        "unexpected outcome {:?}",
        outcome
    );
    assert_eq!(env.storage().copies(), 0);
    let stored = env.store.snapshot(&item.id).unwrap();
    assert_eq!(stored.status, TransferStatus::StagingCompleted.into());
    assert_eq!(stored.retry_count, 0);
    assert_eq!(env.events.count_of(&item.id, WorkItemEventType::Failed), 0);
    assert_eq!(env.events.count_of(&item.id, WorkItemEventType::Retry), 0);
}
