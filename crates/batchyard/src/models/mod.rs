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

//! Domain models shared by the selector, dispatcher and worker actions.

pub mod event;
pub mod quota;
pub mod status;
pub mod system;
pub mod work_item;

pub use event::{WorkItemEvent, WorkItemEventType};
pub use quota::{ContentionSnapshot, Limit, QueueKey, QueueQuota, SystemQuota};
pub use status::{JobStatus, LogicalFileStatus, TransferStatus, WorkStatus};
pub use system::{BatchQueue, RemoteSystem, SchedulerType, SystemStatus};
pub use work_item::{JobInput, JobSpec, TransferSpec, WorkItem, WorkItemId, WorkPayload};
