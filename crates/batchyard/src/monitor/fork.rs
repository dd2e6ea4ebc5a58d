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

//! Fork (plain process) status from `ps -o pid= -o user= -o stat=` style output.
//!
//! A process that no longer appears in the listing has exited.

use super::{ParseError, RemoteJobStatus, StatusParser};

#[derive(Debug, Clone, Copy, Default)]
pub struct ForkParser;

impl StatusParser for ForkParser {
    fn parse(&self, remote_job_id: &str, response: &str) -> Result<RemoteJobStatus, ParseError> {
        if response.trim().is_empty() {
            return Err(ParseError::Empty);
        }

        for line in response.lines().map(str::trim) {
            if line.is_empty() || line.starts_with('[') || line.starts_with("usage") {
                continue;
            }
            if line.starts_with("ps:") {
                return Err(ParseError::Malformed(line.to_string()));
            }
            let mut fields = line.split_whitespace();
            let Some(pid) = fields.next() else {
                continue;
            };
            // Header row
            if pid.eq_ignore_ascii_case("pid") {
                continue;
            }
            if !pid.chars().all(|c| c.is_ascii_digit()) {
                return Err(ParseError::Malformed(format!(
                    "unexpected response format from ps: {}",
                    response.trim()
                )));
            }
            if pid != remote_job_id {
                continue;
            }
            let stat = fields.nth(1).unwrap_or_default();
            return Ok(status_of(stat));
        }

        Ok(RemoteJobStatus::Done)
    }
}

fn status_of(stat: &str) -> RemoteJobStatus {
    match stat.chars().next() {
        Some('R' | 'S' | 'D') => RemoteJobStatus::Running,
        Some('T') => RemoteJobStatus::Paused,
        Some('Z' | 'X') => RemoteJobStatus::Done,
        _ => RemoteJobStatus::Unknown,
    }
}
