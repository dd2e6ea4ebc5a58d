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

//! # Batchyard
//!
//! Fair-share selection, exactly-once dispatch and worker lifecycle for
//! multi-tenant batch jobs.
//!
//! Batchyard decides which job or file transfer runs next on shared remote
//! compute systems, and drives each one through input staging, submission and
//! status monitoring. It owns no remote transport and no persistence of its
//! own: both are reached through traits.
//!
//! ## Pipeline
//!
//! ```text
//! PENDING ──staging──► STAGED ──submission──► QUEUED / RUNNING ──monitoring──► CLEANING_UP / FAILED
//! STAGING_QUEUED ──staging──► STAGING_COMPLETED
//! ```
//!
//! - [`selector::FairSelector`] picks the next item in a status, owner first
//!   and then item, honoring system and queue quotas.
//! - [`poller::StalenessPoller`] picks the next in-flight job whose backoff
//!   interval has elapsed.
//! - [`dispatcher::DispatchCoordinator`] admits at most one worker per item
//!   per process.
//! - [`lease::WorkerLease`] claims, executes and releases one item, running a
//!   [`actions::WorkerAction`] and handling whatever it leaves unhandled.
//! - [`scheduler::Scheduler`] ties the above into periodic loops.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use batchyard::{Scheduler, SchedulerConfig};
//! use std::time::Duration;
//!
//! let config = SchedulerConfig::from_file("batchyard.toml")?;
//! let scheduler = Scheduler::new(config, store, registry, events);
//! scheduler.start();
//! // ...
//! let stuck = scheduler.shutdown(Duration::from_secs(30)).await;
//! ```
//!
//! ## Integration points
//!
//! - [`store::WorkItemStore`] persists work items with optimistic versioning
//! - [`systems::SystemRegistry`] resolves systems and opens remote connections
//! - [`events::EventSink`] receives the audit trail
//!
//! In-memory implementations of the store and event sink ship with the crate.

pub mod actions;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod filter;
pub mod lease;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod monitor;
pub mod outcome;
pub mod poller;
pub mod scheduler;
pub mod selector;
pub mod store;
pub mod systems;

pub use actions::{ActionKind, WorkerAction, WorkerContext};
pub use config::{SchedulerConfig, SchedulerConfigBuilder};
pub use dispatcher::{ClaimGuard, DispatchCoordinator, DispatchId, Rejection};
pub use error::{ConfigError, EventError, InterruptError, RemoteError, StoreError};
pub use events::{EventSink, MemoryEventSink};
pub use filter::SelectionFilter;
pub use lease::{LeaseControl, LeaseState, WorkerLease};
pub use models::{
    JobSpec, JobStatus, RemoteSystem, TransferSpec, TransferStatus, WorkItem, WorkItemId,
    WorkStatus,
};
pub use outcome::{Failure, FailureKind, Outcome, RetryDecision, RetryPolicy};
pub use poller::{BackoffSchedule, BackoffStep, StalenessPoller};
pub use scheduler::{Scheduler, WorkerKind};
pub use selector::FairSelector;
pub use store::{MemoryStore, WorkItemStore};
pub use systems::{AbortSignal, RemoteClient, RemoteScheduler, SystemRegistry};
