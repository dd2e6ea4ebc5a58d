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

//! Error types raised by the scheduler's collaborators.
//!
//! These are the raw failures. Worker actions turn them into a
//! [`Failure`](crate::outcome::Failure) exactly once, at the action boundary,
//! through a [`RetryPolicy`](crate::outcome::RetryPolicy).

use std::time::Duration;
use thiserror::Error;

use crate::models::WorkItemId;

/// Errors raised by a [`WorkItemStore`](crate::store::WorkItemStore).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The row changed between read and write; another worker won the race.
    #[error("Work item {id} was modified concurrently (expected version {expected})")]
    ConcurrencyConflict { id: WorkItemId, expected: u64 },

    #[error("Work item not found: {0}")]
    NotFound(WorkItemId),

    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Errors raised by remote systems, their clients and schedulers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("System {0} is currently unavailable")]
    SystemUnavailable(String),

    #[error("Unknown system: {0}")]
    UnknownSystem(String),

    #[error("Unknown software: {0}")]
    UnknownSoftware(String),

    #[error("Software {0} is currently unavailable")]
    SoftwareUnavailable(String),

    #[error("Unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    #[error("Invalid URI {uri}: {reason}")]
    InvalidUri { uri: String, reason: String },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Invalid transfer: {0}")]
    InvalidTransfer(String),

    #[error("Remote path not found: {0}")]
    NotFound(String),

    #[error("Checksum calculation is not supported for {0}")]
    ChecksumUnsupported(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Remote operation aborted")]
    Aborted,
}

impl From<std::io::Error> for RemoteError {
    fn from(err: std::io::Error) -> Self {
        RemoteError::Io(err.to_string())
    }
}

/// Raised when a worker does not honor a stop request in time.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InterruptError {
    #[error("Worker for {item_id} did not stop within {timeout:?}")]
    Timeout { item_id: WorkItemId, timeout: Duration },
}

/// Errors loading a [`SchedulerConfig`](crate::config::SchedulerConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Raised by an [`EventSink`](crate::events::EventSink). Never propagated past the sink helper.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Failed to record event: {0}")]
pub struct EventError(pub String);
