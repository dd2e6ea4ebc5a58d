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

//! Status reported as a JSON object with a `status` field, for schedulers
//! without a dedicated parser.

use serde_json::Value;

use super::{ParseError, RemoteJobStatus, StatusParser};

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonParser;

impl StatusParser for JsonParser {
    fn parse(&self, _remote_job_id: &str, response: &str) -> Result<RemoteJobStatus, ParseError> {
        if response.trim().is_empty() {
            return Err(ParseError::Empty);
        }
        let value: Value = serde_json::from_str(response)
            .map_err(|e| ParseError::Malformed(format!("invalid JSON: {}", e)))?;
        let object = value.as_object().ok_or_else(|| {
            ParseError::Malformed("a JSON object with a status field is required".to_string())
        })?;
        let status = object
            .get("status")
            .and_then(Value::as_str)
            .ok_or_else(|| ParseError::Malformed("no status field found".to_string()))?;
        Ok(status_of(status))
    }
}

fn status_of(status: &str) -> RemoteJobStatus {
    match status.trim().to_ascii_uppercase().as_str() {
        "Q" | "QUEUED" => RemoteJobStatus::Queued,
        "R" | "RUNNING" | "PASS" | "WARN" => RemoteJobStatus::Running,
        "P" | "PAUSED" => RemoteJobStatus::Paused,
        "C" | "COMPLETED" | "DONE" => RemoteJobStatus::Done,
        "F" | "FAILED" | "FAIL" => RemoteJobStatus::Failed,
        _ => RemoteJobStatus::Unknown,
    }
}
