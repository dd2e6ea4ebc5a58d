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

//! Slurm `sacct -p` output: pipe-delimited `jobid|state|exitcode|` lines.

use super::{ParseError, RemoteJobStatus, StatusParser};

#[derive(Debug, Clone, Copy, Default)]
pub struct SlurmParser;

impl StatusParser for SlurmParser {
    fn parse(&self, remote_job_id: &str, response: &str) -> Result<RemoteJobStatus, ParseError> {
        if response.trim().is_empty() {
            return Err(ParseError::Empty);
        }
        if !response.contains('|') {
            return Err(ParseError::Malformed(format!(
                "unexpected fields in response: {}",
                response.trim()
            )));
        }

        // Job step lines (`42.batch`) are skipped.
        let line = response
            .lines()
            .map(str::trim)
            .find(|line| line.split('|').next() == Some(remote_job_id))
            .ok_or_else(|| {
                ParseError::Malformed(format!("no status line for job {}", remote_job_id))
            })?;

        let fields: Vec<&str> = line.strip_suffix('|').unwrap_or(line).split('|').collect();
        if fields.len() != 3 {
            return Err(ParseError::Malformed(format!(
                "unexpected number of fields: {}",
                line
            )));
        }
        Ok(status_of(fields[1]))
    }
}

fn status_of(state: &str) -> RemoteJobStatus {
    // "CANCELLED by 1234"
    let code = state.split_whitespace().next().unwrap_or_default().to_ascii_uppercase();
    match code.as_str() {
        "PENDING" | "CONFIGURING" | "REQUEUED" => RemoteJobStatus::Queued,
        "RUNNING" | "RESIZING" | "COMPLETING" => RemoteJobStatus::Running,
        "SUSPENDED" => RemoteJobStatus::Paused,
        "EQW" => RemoteJobStatus::Unrecoverable,
        "BOOT_FAIL" | "CANCELLED" | "DEADLINE" | "FAILED" | "NODE_FAIL" | "OUT_OF_MEMORY"
        | "PREEMPTED" | "REVOKED" | "TIMEOUT" => RemoteJobStatus::Failed,
        "COMPLETED" => RemoteJobStatus::Done,
        _ => RemoteJobStatus::Unknown,
    }
}
