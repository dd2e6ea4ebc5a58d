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

//! Remote system interfaces.
//!
//! Transport clients, batch schedulers and the system catalog live outside
//! this crate. Worker actions reach them only through the traits below,
//! obtained from a [`SystemRegistry`].
//!
//! Long-running remote operations take an [`AbortSignal`]. Interrupting a
//! lease fires the signal so an in-flight copy or launch can drop its
//! connection instead of running to completion.

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use url::Url;

use crate::error::RemoteError;
use crate::models::{RemoteSystem, WorkItem};

#[derive(Debug, Default)]
struct AbortState {
    aborted: AtomicBool,
    notify: Notify,
}

/// Cancellation handle shared between a lease and the remote calls it makes.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    state: Arc<AbortState>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fires the signal. Idempotent.
    pub fn abort(&self) {
        self.state.aborted.store(true, Ordering::SeqCst);
        self.state.notify.notify_waiters();
    }

    pub fn is_aborted(&self) -> bool {
        self.state.aborted.load(Ordering::SeqCst)
    }

    /// Resolves once [`abort`](Self::abort) has been called.
    pub async fn aborted(&self) {
        loop {
            let notified = self.state.notify.notified();
            if self.is_aborted() {
                return;
            }
            notified.await;
        }
    }
}

/// Result of a remote `stat`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFileInfo {
    pub path: String,
    pub size: u64,
    pub is_file: bool,
}

/// Connection to a storage endpoint.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    async fn authenticate(&self) -> Result<(), RemoteError>;

    async fn exists(&self, path: &str) -> Result<bool, RemoteError>;

    async fn stat(&self, path: &str) -> Result<RemoteFileInfo, RemoteError>;

    /// Fails with [`RemoteError::ChecksumUnsupported`] when the protocol cannot hash.
    async fn checksum(&self, path: &str) -> Result<String, RemoteError>;

    /// Copies `src_path` on this client to `dest_path` on `dest`, returning bytes moved.
    async fn copy(
        &self,
        src_path: &str,
        dest: &dyn RemoteClient,
        dest_path: &str,
        abort: &AbortSignal,
    ) -> Result<u64, RemoteError>;

    /// Closes the connection. Must tolerate repeated calls.
    async fn disconnect(&self);
}

/// Batch scheduler front end of an execution system.
#[async_trait]
pub trait RemoteScheduler: Send + Sync {
    /// Submits `job` using assets prepared in `local_dir`, returning the remote job handle.
    async fn launch(
        &self,
        job: &WorkItem,
        local_dir: &Path,
        abort: &AbortSignal,
    ) -> Result<String, RemoteError>;

    /// Raw status output for `remote_job_id`, as produced by the scheduler.
    async fn query_status(&self, job: &WorkItem, remote_job_id: &str) -> Result<String, RemoteError>;

    /// Removes the job's remote work directory.
    async fn delete_work_dir(&self, job: &WorkItem) -> Result<(), RemoteError>;

    async fn disconnect(&self);
}

/// A source URI resolved to the client that serves it.
#[derive(Clone)]
pub struct ResolvedUri {
    pub client: Arc<dyn RemoteClient>,
    pub path: String,
}

impl std::fmt::Debug for ResolvedUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedUri").field("path", &self.path).finish()
    }
}

/// Catalog of remote systems and factory for their connections.
#[async_trait]
pub trait SystemRegistry: Send + Sync {
    /// Looks up `system_id` as visible to `tenant_id`.
    ///
    /// Fails with [`RemoteError::UnknownSystem`] when no such system exists.
    async fn resolve_system(&self, tenant_id: &str, system_id: &str)
        -> Result<RemoteSystem, RemoteError>;

    /// Opens a storage connection to `system` using `owner`'s credentials.
    async fn get_client(
        &self,
        system: &RemoteSystem,
        owner: &str,
    ) -> Result<Arc<dyn RemoteClient>, RemoteError>;

    /// Opens a scheduler connection to `system` using `owner`'s credentials.
    async fn get_scheduler(
        &self,
        system: &RemoteSystem,
        owner: &str,
    ) -> Result<Arc<dyn RemoteScheduler>, RemoteError>;

    /// Resolves a source URI to a connection and a path on it.
    ///
    /// Fails with [`RemoteError::UnsupportedProtocol`] for schemes with no
    /// transport.
    async fn resolve_uri(
        &self,
        tenant_id: &str,
        owner: &str,
        uri: &Url,
    ) -> Result<ResolvedUri, RemoteError>;
}
