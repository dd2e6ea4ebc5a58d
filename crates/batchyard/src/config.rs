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

//! Scheduler configuration.
//!
//! Built in code through [`SchedulerConfig::builder()`], or loaded from a
//! TOML file whose keys override the defaults. Durations in the file are
//! whole seconds.
//!
//! ```toml
//! tenant = "iplantc.org"
//! owners = ["!ci-bot"]
//! systems = ["stampede#normal"]
//! worker_pool_size = 32
//! submission_poll_interval = 2
//!
//! [backoff]
//! steady = 1800
//! steps = [{ below_checks = 10, interval = 20 }]
//! ```

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::actions::ActionSettings;
use crate::error::ConfigError;
use crate::filter::SelectionFilter;
use crate::poller::{BackoffSchedule, BackoffStep};

const DAY: u64 = 24 * 60 * 60;

/// Configuration for a [`Scheduler`](crate::scheduler::Scheduler).
///
/// ```rust,ignore
/// let config = SchedulerConfig::builder()
///     .worker_pool_size(32)
///     .owners(vec!["!ci-bot".to_string()])
///     .build()?;
/// ```
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct SchedulerConfig {
    tenant: Option<String>,
    owners: Vec<String>,
    systems: Vec<String>,
    staging_poll_interval: Duration,
    submission_poll_interval: Duration,
    monitoring_poll_interval: Duration,
    worker_pool_size: usize,
    dedup_capacity: usize,
    max_staging_retries: u32,
    max_submission_retries: u32,
    interrupt_timeout: Duration,
    monitoring_max_age: Duration,
    input_staging_deadline: Duration,
    submission_deadline: Duration,
    backoff: BackoffSchedule,
    drain_queues: bool,
    enable_input_staging: bool,
    enable_file_staging: bool,
    enable_submission: bool,
    enable_monitoring: bool,
}

impl SchedulerConfig {
    pub fn builder() -> SchedulerConfigBuilder {
        SchedulerConfigBuilder::default()
    }

    /// Parses a TOML document, overlaying it on the defaults.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = toml::from_str(raw)?;
        file.apply(Self::builder())?.build()
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Rejects settings the scheduler cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_pool_size == 0 {
            return Err(ConfigError::Invalid(
                "worker_pool_size must be at least 1".to_string(),
            ));
        }
        if self.dedup_capacity == 0 {
            return Err(ConfigError::Invalid(
                "dedup_capacity must be at least 1".to_string(),
            ));
        }
        for (name, interval) in [
            ("staging_poll_interval", self.staging_poll_interval),
            ("submission_poll_interval", self.submission_poll_interval),
            ("monitoring_poll_interval", self.monitoring_poll_interval),
        ] {
            if interval.is_zero() {
                return Err(ConfigError::Invalid(format!("{} must be positive", name)));
            }
        }
        Ok(())
    }

    /// Tenant filter; `None` or empty matches every tenant. A leading `!` excludes.
    pub fn tenant(&self) -> Option<&str> {
        self.tenant.as_deref()
    }

    pub fn owners(&self) -> &[String] {
        &self.owners
    }

    /// `system#queue` filters.
    pub fn systems(&self) -> &[String] {
        &self.systems
    }

    pub fn staging_poll_interval(&self) -> Duration {
        self.staging_poll_interval
    }

    pub fn submission_poll_interval(&self) -> Duration {
        self.submission_poll_interval
    }

    pub fn monitoring_poll_interval(&self) -> Duration {
        self.monitoring_poll_interval
    }

    /// Number of worker actions running at once, across all worker kinds.
    pub fn worker_pool_size(&self) -> usize {
        self.worker_pool_size
    }

    /// Maximum claimed items per worker kind.
    pub fn dedup_capacity(&self) -> usize {
        self.dedup_capacity
    }

    pub fn max_staging_retries(&self) -> u32 {
        self.max_staging_retries
    }

    pub fn max_submission_retries(&self) -> u32 {
        self.max_submission_retries
    }

    /// How long shutdown waits for each worker to honor a stop request.
    pub fn interrupt_timeout(&self) -> Duration {
        self.interrupt_timeout
    }

    /// Jobs created longer ago than this are no longer monitored.
    pub fn monitoring_max_age(&self) -> Duration {
        self.monitoring_max_age
    }

    pub fn input_staging_deadline(&self) -> Duration {
        self.input_staging_deadline
    }

    pub fn submission_deadline(&self) -> Duration {
        self.submission_deadline
    }

    pub fn backoff(&self) -> &BackoffSchedule {
        &self.backoff
    }

    /// When set, ticks select nothing so in-flight work can finish.
    pub fn drain_queues(&self) -> bool {
        self.drain_queues
    }

    pub fn enable_input_staging(&self) -> bool {
        self.enable_input_staging
    }

    pub fn enable_file_staging(&self) -> bool {
        self.enable_file_staging
    }

    pub fn enable_submission(&self) -> bool {
        self.enable_submission
    }

    pub fn enable_monitoring(&self) -> bool {
        self.enable_monitoring
    }

    pub fn action_settings(&self) -> ActionSettings {
        ActionSettings {
            max_staging_retries: self.max_staging_retries,
            max_submission_retries: self.max_submission_retries,
            input_staging_deadline: self.input_staging_deadline,
            submission_deadline: self.submission_deadline,
        }
    }

    pub fn selection_filter(&self) -> SelectionFilter {
        SelectionFilter::parse(self.tenant(), &self.owners, &self.systems)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfigBuilder::default().config
    }
}

/// Builder for [`SchedulerConfig`].
#[derive(Debug, Clone)]
pub struct SchedulerConfigBuilder {
    config: SchedulerConfig,
}

impl Default for SchedulerConfigBuilder {
    fn default() -> Self {
        Self {
            config: SchedulerConfig {
                tenant: None,
                owners: Vec::new(),
                systems: Vec::new(),
                staging_poll_interval: Duration::from_secs(5),
                submission_poll_interval: Duration::from_secs(5),
                monitoring_poll_interval: Duration::from_secs(10),
                worker_pool_size: 16,
                dedup_capacity: 8,
                max_staging_retries: 3,
                max_submission_retries: 3,
                interrupt_timeout: Duration::from_secs(30),
                monitoring_max_age: Duration::from_secs(60 * DAY),
                input_staging_deadline: Duration::from_secs(7 * DAY),
                submission_deadline: Duration::from_secs(30 * DAY),
                backoff: BackoffSchedule::default(),
                drain_queues: false,
                enable_input_staging: true,
                enable_file_staging: true,
                enable_submission: true,
                enable_monitoring: true,
            },
        }
    }
}

impl SchedulerConfigBuilder {
    pub fn tenant(mut self, value: Option<String>) -> Self {
        self.config.tenant = value;
        self
    }

    pub fn owners(mut self, value: Vec<String>) -> Self {
        self.config.owners = value;
        self
    }

    pub fn systems(mut self, value: Vec<String>) -> Self {
        self.config.systems = value;
        self
    }

    pub fn staging_poll_interval(mut self, value: Duration) -> Self {
        self.config.staging_poll_interval = value;
        self
    }

    pub fn submission_poll_interval(mut self, value: Duration) -> Self {
        self.config.submission_poll_interval = value;
        self
    }

    pub fn monitoring_poll_interval(mut self, value: Duration) -> Self {
        self.config.monitoring_poll_interval = value;
        self
    }

    pub fn worker_pool_size(mut self, value: usize) -> Self {
        self.config.worker_pool_size = value;
        self
    }

    pub fn dedup_capacity(mut self, value: usize) -> Self {
        self.config.dedup_capacity = value;
        self
    }

    pub fn max_staging_retries(mut self, value: u32) -> Self {
        self.config.max_staging_retries = value;
        self
    }

    pub fn max_submission_retries(mut self, value: u32) -> Self {
        self.config.max_submission_retries = value;
        self
    }

    pub fn interrupt_timeout(mut self, value: Duration) -> Self {
        self.config.interrupt_timeout = value;
        self
    }

    pub fn monitoring_max_age(mut self, value: Duration) -> Self {
        self.config.monitoring_max_age = value;
        self
    }

    pub fn input_staging_deadline(mut self, value: Duration) -> Self {
        self.config.input_staging_deadline = value;
        self
    }

    pub fn submission_deadline(mut self, value: Duration) -> Self {
        self.config.submission_deadline = value;
        self
    }

    pub fn backoff(mut self, value: BackoffSchedule) -> Self {
        self.config.backoff = value;
        self
    }

    pub fn drain_queues(mut self, value: bool) -> Self {
        self.config.drain_queues = value;
        self
    }

    pub fn enable_input_staging(mut self, value: bool) -> Self {
        self.config.enable_input_staging = value;
        self
    }

    pub fn enable_file_staging(mut self, value: bool) -> Self {
        self.config.enable_file_staging = value;
        self
    }

    pub fn enable_submission(mut self, value: bool) -> Self {
        self.config.enable_submission = value;
        self
    }

    pub fn enable_monitoring(mut self, value: bool) -> Self {
        self.config.enable_monitoring = value;
        self
    }

    /// Validates and returns the configuration.
    pub fn build(self) -> Result<SchedulerConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// On-disk form. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    tenant: Option<String>,
    owners: Option<Vec<String>>,
    systems: Option<Vec<String>>,
    staging_poll_interval: Option<u64>,
    submission_poll_interval: Option<u64>,
    monitoring_poll_interval: Option<u64>,
    worker_pool_size: Option<usize>,
    dedup_capacity: Option<usize>,
    max_staging_retries: Option<u32>,
    max_submission_retries: Option<u32>,
    interrupt_timeout: Option<u64>,
    monitoring_max_age: Option<u64>,
    input_staging_deadline: Option<u64>,
    submission_deadline: Option<u64>,
    backoff: Option<BackoffFile>,
    drain_queues: Option<bool>,
    enable_input_staging: Option<bool>,
    enable_file_staging: Option<bool>,
    enable_submission: Option<bool>,
    enable_monitoring: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct BackoffFile {
    steps: Option<Vec<BackoffStep>>,
    steady: Option<u64>,
}

impl ConfigFile {
    fn apply(self, mut builder: SchedulerConfigBuilder) -> Result<SchedulerConfigBuilder, ConfigError> {
        let secs = Duration::from_secs;

        if let Some(tenant) = self.tenant {
            builder = builder.tenant(Some(tenant));
        }
        if let Some(owners) = self.owners {
            builder = builder.owners(owners);
        }
        if let Some(systems) = self.systems {
            builder = builder.systems(systems);
        }
        if let Some(v) = self.staging_poll_interval {
            builder = builder.staging_poll_interval(secs(v));
        }
        if let Some(v) = self.submission_poll_interval {
            builder = builder.submission_poll_interval(secs(v));
        }
        if let Some(v) = self.monitoring_poll_interval {
            builder = builder.monitoring_poll_interval(secs(v));
        }
        if let Some(v) = self.worker_pool_size {
            builder = builder.worker_pool_size(v);
        }
        if let Some(v) = self.dedup_capacity {
            builder = builder.dedup_capacity(v);
        }
        if let Some(v) = self.max_staging_retries {
            builder = builder.max_staging_retries(v);
        }
        if let Some(v) = self.max_submission_retries {
            builder = builder.max_submission_retries(v);
        }
        if let Some(v) = self.interrupt_timeout {
            builder = builder.interrupt_timeout(secs(v));
        }
        if let Some(v) = self.monitoring_max_age {
            builder = builder.monitoring_max_age(secs(v));
        }
        if let Some(v) = self.input_staging_deadline {
            builder = builder.input_staging_deadline(secs(v));
        }
        if let Some(v) = self.submission_deadline {
            builder = builder.submission_deadline(secs(v));
        }
        if let Some(backoff) = self.backoff {
            let defaults = BackoffSchedule::default();
            let steps = backoff.steps.unwrap_or_else(|| defaults.steps().to_vec());
            let steady = backoff.steady.map_or(defaults.steady(), secs);
            builder = builder.backoff(BackoffSchedule::new(steps, steady)?);
        }
        if let Some(v) = self.drain_queues {
            builder = builder.drain_queues(v);
        }
        if let Some(v) = self.enable_input_staging {
            builder = builder.enable_input_staging(v);
        }
        if let Some(v) = self.enable_file_staging {
            builder = builder.enable_file_staging(v);
        }
        if let Some(v) = self.enable_submission {
            builder = builder.enable_submission(v);
        }
        if let Some(v) = self.enable_monitoring {
            builder = builder.enable_monitoring(v);
        }
        Ok(builder)
    }
}
