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

//! Staleness Poller
//!
//! Chooses which in-flight job to re-check next. A job is due once
//! `now >= last_updated + interval(status_checks)`, where the interval widens
//! in steps as the job accumulates checks. Freshly submitted jobs are polled
//! every few seconds, long runners settle at an hourly check.
//!
//! Due jobs are drawn uniformly at random; there is no owner fairness here
//! because a status check does not consume remote capacity.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::seq::IteratorRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::error::{ConfigError, StoreError};
use crate::filter::SelectionFilter;
use crate::models::{JobStatus, WorkItem, WorkItemId};
use crate::store::{ItemQuery, WorkItemStore};

/// Items with fewer than `below_checks` checks wait `interval` between polls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffStep {
    pub below_checks: u32,
    #[serde(with = "seconds")]
    pub interval: Duration,
}

impl BackoffStep {
    pub const fn new(below_checks: u32, interval: Duration) -> Self {
        Self {
            below_checks,
            interval,
        }
    }
}

/// Step function from check count to polling interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffSchedule {
    steps: Vec<BackoffStep>,
    steady: Duration,
}

impl Default for BackoffSchedule {
    fn default() -> Self {
        Self {
            steps: vec![
                BackoffStep::new(4, Duration::from_secs(15)),
                BackoffStep::new(14, Duration::from_secs(30)),
                BackoffStep::new(44, Duration::from_secs(60)),
                BackoffStep::new(56, Duration::from_secs(5 * 60)),
                BackoffStep::new(104, Duration::from_secs(15 * 60)),
                BackoffStep::new(152, Duration::from_secs(30 * 60)),
            ],
            steady: Duration::from_secs(60 * 60),
        }
    }
}

impl BackoffSchedule {
    /// Builds a schedule, requiring thresholds to increase and intervals to never shrink.
    pub fn new(steps: Vec<BackoffStep>, steady: Duration) -> Result<Self, ConfigError> {
        for pair in steps.windows(2) {
            if pair[1].below_checks <= pair[0].below_checks {
                return Err(ConfigError::Invalid(format!(
                    "backoff thresholds must increase ({} then {})",
                    pair[0].below_checks, pair[1].below_checks
                )));
            }
            if pair[1].interval < pair[0].interval {
                return Err(ConfigError::Invalid(
                    "backoff intervals must not shrink as checks grow".to_string(),
                ));
            }
        }
        if steps.last().map_or(false, |last| steady < last.interval) {
            return Err(ConfigError::Invalid(
                "steady backoff interval is shorter than the last step".to_string(),
            ));
        }
        Ok(Self { steps, steady })
    }

    pub fn steps(&self) -> &[BackoffStep] {
        &self.steps
    }

    pub fn steady(&self) -> Duration {
        self.steady
    }

    /// Wait between polls for an item checked `status_checks` times.
    pub fn interval(&self, status_checks: u32) -> Duration {
        self.steps
            .iter()
            .find(|step| status_checks < step.below_checks)
            .map_or(self.steady, |step| step.interval)
    }

    pub fn is_due(&self, item: &WorkItem, now: DateTime<Utc>) -> bool {
        match (now - item.last_updated).to_std() {
            Ok(elapsed) => elapsed >= self.interval(item.status_checks),
            // last_updated is in the future
            Err(_) => false,
        }
    }
}

/// Selects in-flight jobs that are due for a status check.
pub struct StalenessPoller {
    store: Arc<dyn WorkItemStore>,
    schedule: BackoffSchedule,
    max_age: Duration,
    rng: Mutex<StdRng>,
}

impl StalenessPoller {
    pub fn new(store: Arc<dyn WorkItemStore>, schedule: BackoffSchedule, max_age: Duration) -> Self {
        Self {
            store,
            schedule,
            max_age,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    pub fn schedule(&self) -> &BackoffSchedule {
        &self.schedule
    }

    pub async fn select_next_to_monitor(
        &self,
        filter: &SelectionFilter,
    ) -> Result<Option<WorkItemId>, StoreError> {
        self.select_due(filter, Utc::now()).await
    }

    /// Selection as of `now`.
    pub async fn select_due(
        &self,
        filter: &SelectionFilter,
        now: DateTime<Utc>,
    ) -> Result<Option<WorkItemId>, StoreError> {
        let query = ItemQuery::with_statuses(JobStatus::IN_FLIGHT).filter(filter.clone());
        let items = match self.store.query(&query).await {
            Ok(items) => items,
            Err(StoreError::ConcurrencyConflict { id, .. }) => {
                debug!(item_id = %id, "Monitoring selection raced a concurrent update");
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let selected = {
            let mut rng = self.rng.lock();
            items
                .iter()
                .filter(|item| self.is_eligible(item, now))
                .map(|item| item.id)
                .choose(&mut *rng)
        };
        if let Some(id) = selected {
            debug!(item_id = %id, "Selected job for status check");
        }
        Ok(selected)
    }

    fn is_eligible(&self, item: &WorkItem, now: DateTime<Utc>) -> bool {
        item.visible
            && item.remote_handle().is_some()
            && self.within_age_window(item, now)
            && self.schedule.is_due(item, now)
    }

    fn within_age_window(&self, item: &WorkItem, now: DateTime<Utc>) -> bool {
        match (now - item.created_at).to_std() {
            Ok(age) => age <= self.max_age,
            Err(_) => true,
        }
    }
}

/// Serde adapter storing a `Duration` as whole seconds.
pub(crate) mod seconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
