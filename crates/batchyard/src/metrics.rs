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

//! Scheduler metrics.
//!
//! Counters and gauges emitted through the `metrics` facade. The library never
//! installs a recorder; embedding applications choose their exporter.

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};

// ============================================================================
// Dispatch Metrics
// ============================================================================

/// Dispatches admitted by a coordinator.
pub const DISPATCH_ADMITTED: &str = "batchyard_dispatch_admitted_total";

/// Dispatches turned away, labelled by `reason` (duplicate or capacity).
pub const DISPATCH_REJECTED: &str = "batchyard_dispatch_rejected_total";

/// Claims currently held by a coordinator.
pub const CLAIMS_IN_FLIGHT: &str = "batchyard_claims_in_flight";

// ============================================================================
// Action Metrics
// ============================================================================

/// Worker action runs, labelled by `action` and `outcome`.
pub const ACTION_OUTCOMES: &str = "batchyard_actions_total";

/// Wall time of one lease from claim to release.
pub const ACTION_DURATION: &str = "batchyard_action_duration_seconds";

/// Stop requests the worker did not honor in time.
pub const INTERRUPT_TIMEOUTS: &str = "batchyard_interrupt_timeouts_total";

/// Registers all metric descriptions.
///
/// Call once at startup after installing a recorder.
pub fn register_metrics() {
    describe_counter!(DISPATCH_ADMITTED, "Total dispatches admitted");
    describe_counter!(DISPATCH_REJECTED, "Total dispatches rejected by reason");
    describe_gauge!(CLAIMS_IN_FLIGHT, "Claims currently held per worker kind");
    describe_counter!(ACTION_OUTCOMES, "Total worker action runs by outcome");
    describe_histogram!(ACTION_DURATION, "Duration of worker leases in seconds");
    describe_counter!(INTERRUPT_TIMEOUTS, "Total stop requests that timed out");
}

/// Records an admitted dispatch and the resulting claim count.
pub fn record_dispatch_admitted(kind: &str, in_flight: usize) {
    counter!(DISPATCH_ADMITTED, "kind" => kind.to_string()).increment(1);
    gauge!(CLAIMS_IN_FLIGHT, "kind" => kind.to_string()).set(in_flight as f64);
}

pub fn record_dispatch_rejected(kind: &str, reason: &'static str) {
    counter!(DISPATCH_REJECTED, "kind" => kind.to_string(), "reason" => reason).increment(1);
}

pub fn record_claim_released(kind: &str, in_flight: usize) {
    gauge!(CLAIMS_IN_FLIGHT, "kind" => kind.to_string()).set(in_flight as f64);
}

/// Records one finished lease.
pub fn record_action(action: &str, outcome: &str, duration_secs: f64) {
    let labels = [
        ("action", action.to_string()),
        ("outcome", outcome.to_string()),
    ];
    counter!(ACTION_OUTCOMES, &labels).increment(1);
    histogram!(ACTION_DURATION, &labels).record(duration_secs);
}

pub fn record_interrupt_timeout(action: &str) {
    counter!(INTERRUPT_TIMEOUTS, "action" => action.to_string()).increment(1);
}
