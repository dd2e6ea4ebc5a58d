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

//! Failure classification and action outcomes.
//!
//! Every failure a worker action can hit falls into one of five classes:
//!
//! | Kind | Effect on the item |
//! |---|---|
//! | `Fatal` | terminal FAILED-like status immediately |
//! | `Retryable` | `retry_count` incremented, requeued at the pre-execution status |
//! | `Unavailable` | reverted to the pre-execution status, no retry consumed |
//! | `ConcurrencyConflict` | no change; another worker already advanced the item |
//! | `Interrupted` | rolled back to a re-queueable status |
//!
//! Raw [`RemoteError`]s and [`StoreError`]s are classified once through a
//! [`RetryPolicy`]. Actions report what they did as an [`Outcome`].

use std::fmt;
use thiserror::Error;

use crate::error::{RemoteError, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    Fatal,
    Retryable,
    Unavailable,
    ConcurrencyConflict,
    Interrupted,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Fatal => "fatal",
            FailureKind::Retryable => "retryable",
            FailureKind::Unavailable => "unavailable",
            FailureKind::ConcurrencyConflict => "concurrency_conflict",
            FailureKind::Interrupted => "interrupted",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Fatal, message)
    }

    pub fn retryable(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Retryable, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Unavailable, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(FailureKind::ConcurrencyConflict, message)
    }

    pub fn interrupted() -> Self {
        Self::new(FailureKind::Interrupted, "stop requested")
    }

    pub fn is_conflict(&self) -> bool {
        self.kind == FailureKind::ConcurrencyConflict
    }
}

impl From<StoreError> for Failure {
    fn from(err: StoreError) -> Self {
        match err {
            // A missing row means another process finished or removed it.
            StoreError::ConcurrencyConflict { .. } | StoreError::NotFound(_) => {
                Failure::conflict(err.to_string())
            }
            StoreError::Backend(_) => Failure::retryable(err.to_string()),
        }
    }
}

/// What a worker action did with its item.
///
/// Every variant except `Completed` mirrors a [`FailureKind`] whose effect has
/// already been persisted by the action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The item advanced to its next status.
    Completed,
    /// The item was marked failed.
    Fatal(String),
    /// A retry was consumed and the item requeued.
    Retryable(String),
    /// The item was reverted to wait for a dependency.
    Unavailable(String),
    /// Another worker advanced the item first; nothing was written.
    ConcurrencyConflict(String),
    /// The item was rolled back after a stop request.
    Interrupted,
}

impl Outcome {
    pub fn kind(&self) -> Option<FailureKind> {
        match self {
            Outcome::Completed => None,
            Outcome::Fatal(_) => Some(FailureKind::Fatal),
            Outcome::Retryable(_) => Some(FailureKind::Retryable),
            Outcome::Unavailable(_) => Some(FailureKind::Unavailable),
            Outcome::ConcurrencyConflict(_) => Some(FailureKind::ConcurrencyConflict),
            Outcome::Interrupted => Some(FailureKind::Interrupted),
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.kind().map_or("completed", |k| k.as_str())
    }
}

/// Classification of a raw remote error.
pub type Classifier = fn(&RemoteError) -> FailureKind;

/// Classifier for data movement.
///
/// Missing systems are treated as unavailable: a transfer endpoint may be
/// registered later, and the selector will pick the item up again.
pub fn classify_transfer(err: &RemoteError) -> FailureKind {
    match err {
        RemoteError::SystemUnavailable(_)
        | RemoteError::UnknownSystem(_)
        | RemoteError::SoftwareUnavailable(_) => FailureKind::Unavailable,
        RemoteError::UnsupportedProtocol(_)
        | RemoteError::InvalidUri { .. }
        | RemoteError::PermissionDenied(_)
        | RemoteError::InvalidTransfer(_)
        | RemoteError::UnknownSoftware(_) => FailureKind::Fatal,
        RemoteError::Aborted => FailureKind::Interrupted,
        RemoteError::NotFound(_)
        | RemoteError::ChecksumUnsupported(_)
        | RemoteError::Authentication(_)
        | RemoteError::Scheduler(_)
        | RemoteError::Io(_) => FailureKind::Retryable,
    }
}

/// Classifier for launching and monitoring jobs.
pub fn classify_execution(err: &RemoteError) -> FailureKind {
    match err {
        RemoteError::UnknownSoftware(_) | RemoteError::UnknownSystem(_) => FailureKind::Fatal,
        RemoteError::SystemUnavailable(_) | RemoteError::SoftwareUnavailable(_) => {
            FailureKind::Unavailable
        }
        RemoteError::UnsupportedProtocol(_)
        | RemoteError::InvalidUri { .. }
        | RemoteError::InvalidTransfer(_) => FailureKind::Fatal,
        RemoteError::Aborted => FailureKind::Interrupted,
        RemoteError::PermissionDenied(_)
        | RemoteError::NotFound(_)
        | RemoteError::ChecksumUnsupported(_)
        | RemoteError::Authentication(_)
        | RemoteError::Scheduler(_)
        | RemoteError::Io(_) => FailureKind::Retryable,
    }
}

/// Result of consuming one retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Requeue; `remaining` attempts are left after this one.
    Retry { retry_count: u32, remaining: u32 },
    /// The budget is spent.
    Exhausted { attempts: u32 },
}

/// Retry budget and classification for one work item type.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_retries: u32,
    classifier: Classifier,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, classifier: Classifier) -> Self {
        Self {
            max_retries,
            classifier,
        }
    }

    pub fn staging(max_retries: u32) -> Self {
        Self::new(max_retries, classify_transfer)
    }

    pub fn submission(max_retries: u32) -> Self {
        Self::new(max_retries, classify_execution)
    }

    /// Monitoring has no local retry budget.
    pub fn monitoring() -> Self {
        Self::new(0, classify_execution)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn classify(&self, err: &RemoteError) -> Failure {
        Failure::new((self.classifier)(err), err.to_string())
    }

    /// Consumes one retry from an item that has already used `retry_count`.
    ///
    /// The failure that brings the count to `max_retries` exhausts the budget.
    pub fn consume(&self, retry_count: u32) -> RetryDecision {
        let next = retry_count.saturating_add(1);
        if next >= self.max_retries {
            RetryDecision::Exhausted { attempts: next }
        } else {
            RetryDecision::Retry {
                retry_count: next,
                remaining: self.max_retries - next,
            }
        }
    }
}
