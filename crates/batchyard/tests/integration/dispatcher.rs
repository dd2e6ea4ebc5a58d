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

//! Exactly-once dispatch under concurrent selection.

use batchyard::actions::ActionKind;
use batchyard::dispatcher::DispatchCoordinator;
use batchyard::models::WorkItemId;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Barrier, Notify, Semaphore};

use crate::fixtures::wait_until;

/// Many ticks racing to dispatch the same item start exactly one worker.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_dispatch_runs_one_worker() {
    const RACERS: usize = 16;
    let coordinator = DispatchCoordinator::new("staging", 8, Arc::new(Semaphore::new(8)));
    let item_id = WorkItemId::new();
    let started = Arc::new(AtomicUsize::new(0));
    let hold = Arc::new(Notify::new());
    let barrier = Arc::new(Barrier::new(RACERS));

    let mut racers = Vec::with_capacity(RACERS);
    for _ in 0..RACERS {
        let coordinator = Arc::clone(&coordinator);
        let started = Arc::clone(&started);
        let hold = Arc::clone(&hold);
        let barrier = Arc::clone(&barrier);
        racers.push(tokio::spawn(async move {
            barrier.wait().await;
            coordinator.try_dispatch(item_id, ActionKind::Staging, |guard| async move {
                let _guard = guard;
                started.fetch_add(1, Ordering::SeqCst);
                hold.notified().await;
            })
        }));
    }

    let mut admitted = 0;
    for racer in racers {
        if racer.await.unwrap() {
            admitted += 1;
        }
    }
    assert_eq!(admitted, 1);
    assert!(wait_until(|| started.load(Ordering::SeqCst) == 1).await);
    assert!(coordinator.is_claimed(&item_id));

    hold.notify_one();
    assert!(wait_until(|| !coordinator.is_claimed(&item_id)).await);
    assert_eq!(started.load(Ordering::SeqCst), 1);
}

/// Admitted work beyond the pool size waits for a permit.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_pool_bounds_concurrent_workers() {
    let coordinator = DispatchCoordinator::new("submission", 8, Arc::new(Semaphore::new(2)));
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    for _ in 0..6 {
        let running = Arc::clone(&running);
        let peak = Arc::clone(&peak);
        assert!(coordinator.try_dispatch(
            WorkItemId::new(),
            ActionKind::Submission,
            |guard| async move {
                let _guard = guard;
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            }
        ));
    }

    assert!(wait_until(|| coordinator.is_empty()).await);
    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert!(peak.load(Ordering::SeqCst) >= 1);
}

#[tokio::test]
async fn test_capacity_turns_away_new_items() {
    let coordinator = DispatchCoordinator::new("monitoring", 2, Arc::new(Semaphore::new(4)));
    let hold = Arc::new(Notify::new());

    for _ in 0..2 {
        let hold = Arc::clone(&hold);
        assert!(coordinator.try_dispatch(
            WorkItemId::new(),
            ActionKind::Monitoring,
            |guard| async move {
                let _guard = guard;
                hold.notified().await;
            }
        ));
    }
    assert!(!coordinator.try_dispatch(WorkItemId::new(), ActionKind::Monitoring, |_| async {}));
    assert_eq!(coordinator.len(), 2);
}
