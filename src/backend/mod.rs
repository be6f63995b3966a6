/*!
 * Pluggable object storage backend contract
 *
 * The engine drives any object store through the narrow surface below:
 * create a client for a bucket + credential pair, fire tagged asynchronous
 * range reads, then drain completion events until the client reports a
 * terminal FinishedError. One concrete implementation over `object_store`
 * covers S3, GCS and Azure (plus a process-local in-memory store for the
 * test suite).
 */

pub mod client_mgr;
pub mod fd_limit;
pub mod object_client;

use std::sync::Arc;

use crate::credentials::Credentials;
use crate::destination::DstRegion;
use crate::error::Result;
use crate::range::Range;
use crate::response_code::ResponseCode;
use crate::uri::StorageUri;

/// Identifier the engine stamps on each in-flight read; the backend must
/// return it unchanged on the matching completion event.
pub type ObjectRequestId = u64;

/// One completion reported by a backend client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectCompletionEvent {
    /// Id provided by the caller in `request_read`
    pub request_id: ObjectRequestId,

    pub response_code: ResponseCode,

    /// Bytes actually placed into the destination region
    pub bytes_transferred: u64,
}

impl ObjectCompletionEvent {
    /// Terminal event: the client is drained or cancelled and no further
    /// completions will arrive.
    pub fn finished() -> Self {
        Self {
            request_id: 0,
            response_code: ResponseCode::FinishedError,
            bytes_transferred: 0,
        }
    }
}

/// How `wait_for_completions` behaves when no event is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    Blocking,
    NonBlocking,
}

/// Whether the backend needs an explicit close or can be torn down at
/// process exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownPolicy {
    DeferToProcessExit,
    ExplicitClose,
}

/// Everything needed to create (or match an existing) backend client.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectClientConfig {
    pub uri: StorageUri,
    pub credentials: Credentials,

    /// Chunk size for splitting large reads into backend range requests
    pub default_storage_chunk_size: u64,

    /// Bound on concurrent range requests per client
    pub max_concurrency: usize,
}

/// One backend client, bound to a bucket/container and a credential set.
///
/// A client serves a single consumer thread (the workload that checked it
/// out) but its reads complete on backend threads.
pub trait ObjectClient: Send + Sync {
    /// Start one asynchronous range read into `dst`, tagged with
    /// `request_id`. Returns as soon as the read is queued.
    fn request_read(
        &self,
        key: &str,
        range: Range,
        dst: DstRegion,
        request_id: ObjectRequestId,
    ) -> Result<()>;

    /// Collect up to `max_events` completion events into `events`.
    ///
    /// Blocks (in `Blocking` mode) until at least one event is available.
    /// Once the client is cancelled, or every queued read has been
    /// delivered, a single event with `FinishedError` is returned and the
    /// client will never produce another completion.
    fn wait_for_completions(
        &self,
        events: &mut Vec<ObjectCompletionEvent>,
        max_events: usize,
        mode: WaitMode,
    ) -> Result<()>;

    /// True when this client can be reused for `config` (same target, same
    /// credentials, not stopped).
    fn verify_credentials(&self, config: &ObjectClientConfig) -> bool;

    /// Cancel outstanding reads; pending completions collapse into the
    /// terminal FinishedError event. Idempotent.
    fn stop(&self);
}

/// Process-wide backend entry point.
pub trait ObjectBackend: Send + Sync {
    fn create_client(&self, config: &ObjectClientConfig) -> Result<Arc<dyn ObjectClient>>;

    fn shutdown_policy(&self) -> ShutdownPolicy;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finished_event() {
        let event = ObjectCompletionEvent::finished();
        assert_eq!(event.response_code, ResponseCode::FinishedError);
        assert_eq!(event.bytes_transferred, 0);
    }
}
