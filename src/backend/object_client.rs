/*!
 * Object storage client over the `object_store` crate
 *
 * One client serves one bucket/container with one credential set. Reads are
 * fired onto a shared tokio runtime; each read splits into chunk-sized
 * range requests fetched concurrently, and completion events funnel back
 * through a channel that `wait_for_completions` drains from the worker
 * thread.
 */

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender, TryRecvError};
use futures::stream::{self, StreamExt, TryStreamExt};
use object_store::aws::AmazonS3Builder;
use object_store::azure::MicrosoftAzureBuilder;
use object_store::gcp::GoogleCloudStorageBuilder;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::{ClientOptions, ObjectStore};
use once_cell::sync::{Lazy, OnceCell};
use tokio::runtime::Runtime;
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use super::{
    ObjectBackend, ObjectClient, ObjectClientConfig, ObjectCompletionEvent, ObjectRequestId,
    ShutdownPolicy, WaitMode,
};
use crate::config::env_flag;
use crate::destination::DstRegion;
use crate::error::{Result, StreamerError};
use crate::range::Range;
use crate::response_code::ResponseCode;
use crate::uri::Scheme;

/// All clients share one multi-threaded runtime; it lives until process
/// exit (the backend's shutdown policy).
static RUNTIME: OnceCell<Runtime> = OnceCell::new();

fn runtime() -> Result<&'static Runtime> {
    RUNTIME.get_or_try_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .thread_name("quasar-obj-io")
            .enable_all()
            .build()
            .map_err(|e| {
                StreamerError::ObjectStorageUnsupported(format!(
                    "failed to start object storage runtime: {}",
                    e
                ))
            })
    })
}

/// Process-shared in-memory buckets, addressed as `mem://bucket/key`.
/// The test suite populates these; production code never touches them.
static MEMORY_STORES: Lazy<Mutex<HashMap<String, Arc<InMemory>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// The in-memory store behind `mem://bucket/...`, creating it on first use.
pub fn shared_memory_store(bucket: &str) -> Arc<InMemory> {
    let mut stores = MEMORY_STORES.lock().unwrap();
    stores
        .entry(bucket.to_string())
        .or_insert_with(|| Arc::new(InMemory::new()))
        .clone()
}

enum CompletionMsg {
    Event(ObjectCompletionEvent),
    Stop,
}

/// Concrete `ObjectClient` for S3 / GCS / Azure / in-memory stores.
pub struct ObjectStoreClient {
    store: Arc<dyn ObjectStore>,
    config: ObjectClientConfig,
    tx: Sender<CompletionMsg>,
    rx: Receiver<CompletionMsg>,

    /// reads queued but not yet delivered as events
    outstanding: AtomicU64,

    stopped: AtomicBool,

    /// in-flight fetch tasks, aborted and joined on stop
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ObjectStoreClient {
    pub fn new(config: &ObjectClientConfig) -> Result<Self> {
        let store = build_store(config)?;
        let (tx, rx) = crossbeam_channel::unbounded();

        debug!(
            "created object storage client for {} (chunk {} bytes, {} concurrent requests)",
            config.uri, config.default_storage_chunk_size, config.max_concurrency
        );

        Ok(Self {
            store,
            config: config.clone(),
            tx,
            rx,
            outstanding: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
            handles: Mutex::new(Vec::new()),
        })
    }

    fn deliver(&self, events: &mut Vec<ObjectCompletionEvent>, event: ObjectCompletionEvent) {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
        events.push(event);
    }
}

impl ObjectClient for ObjectStoreClient {
    fn request_read(
        &self,
        key: &str,
        range: Range,
        dst: DstRegion,
        request_id: ObjectRequestId,
    ) -> Result<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(StreamerError::Finished);
        }

        let store = self.store.clone();
        let path = ObjectPath::from(key);
        let tx = self.tx.clone();
        let chunk_bytesize = self.config.default_storage_chunk_size;
        let max_concurrency = self.config.max_concurrency.max(1);

        self.outstanding.fetch_add(1, Ordering::AcqRel);
        trace!(
            "requesting read {} of {} ({} bytes) as request {}",
            range,
            path,
            range.size(),
            request_id
        );

        let handle = runtime()?.spawn(async move {
            let code = fetch_range(store, path, range, chunk_bytesize, max_concurrency, dst).await;
            let bytes_transferred = if code.is_success() { range.size() } else { 0 };
            let _ = tx.send(CompletionMsg::Event(ObjectCompletionEvent {
                request_id,
                response_code: code,
                bytes_transferred,
            }));
        });

        let mut handles = self.handles.lock().unwrap();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
        Ok(())
    }

    fn wait_for_completions(
        &self,
        events: &mut Vec<ObjectCompletionEvent>,
        max_events: usize,
        mode: WaitMode,
    ) -> Result<()> {
        events.clear();
        if max_events == 0 {
            warn!("max events to retrieve is 0");
            return Ok(());
        }

        loop {
            // drain whatever is already queued
            while events.len() < max_events {
                match self.rx.try_recv() {
                    Ok(CompletionMsg::Event(event)) => self.deliver(events, event),
                    Ok(CompletionMsg::Stop) | Err(TryRecvError::Disconnected) => {
                        events.push(ObjectCompletionEvent::finished());
                        return Ok(());
                    }
                    Err(TryRecvError::Empty) => break,
                }
            }

            if !events.is_empty() {
                return Ok(());
            }

            if self.stopped.load(Ordering::Acquire)
                || self.outstanding.load(Ordering::Acquire) == 0
            {
                // cancelled, or every queued read has been delivered
                events.push(ObjectCompletionEvent::finished());
                return Ok(());
            }

            if mode == WaitMode::NonBlocking {
                return Ok(());
            }

            match self.rx.recv() {
                Ok(CompletionMsg::Event(event)) => self.deliver(events, event),
                Ok(CompletionMsg::Stop) | Err(_) => {
                    events.push(ObjectCompletionEvent::finished());
                    return Ok(());
                }
            }
        }
    }

    fn verify_credentials(&self, config: &ObjectClientConfig) -> bool {
        if self.stopped.load(Ordering::Acquire) {
            return false;
        }
        self.config.uri.scheme == config.uri.scheme
            && self.config.uri.bucket == config.uri.bucket
            && self.config.uri.endpoint == config.uri.endpoint
            && self.config.uri.account == config.uri.account
            && self.config.credentials == config.credentials
    }

    fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("stopping object storage client for {}", self.config.uri);

        let handles: Vec<JoinHandle<()>> = {
            let mut guard = self.handles.lock().unwrap();
            guard.drain(..).collect()
        };
        for handle in &handles {
            handle.abort();
        }
        // join so no fetch task is still writing to the caller's buffer
        // when stop returns
        if let Ok(rt) = runtime() {
            rt.block_on(async move {
                for handle in handles {
                    let _ = handle.await;
                }
            });
        }

        let _ = self.tx.send(CompletionMsg::Stop);
    }
}

/// Fetch `range` of `path` in chunk-sized concurrent requests, writing each
/// chunk into its slot of `dst`. Returns the first failure code, if any.
async fn fetch_range(
    store: Arc<dyn ObjectStore>,
    path: ObjectPath,
    range: Range,
    chunk_bytesize: u64,
    max_concurrency: usize,
    dst: DstRegion,
) -> ResponseCode {
    if range.is_empty() {
        return ResponseCode::Success;
    }

    let mut chunks = Vec::new();
    let mut offset = 0u64;
    while offset < range.size() {
        let len = chunk_bytesize.min(range.size() - offset);
        chunks.push((offset, len));
        offset += len;
    }

    let result = stream::iter(chunks.into_iter().map(|(chunk_offset, chunk_len)| {
        let store = store.clone();
        let path = path.clone();
        async move {
            let start = (range.start + chunk_offset) as usize;
            let end = start + chunk_len as usize;
            let bytes = store
                .get_range(&path, start..end)
                .await
                .map_err(|e| map_store_error(&path, e))?;
            if bytes.len() as u64 != chunk_len {
                return Err(ResponseCode::EofError);
            }
            Ok::<(u64, bytes::Bytes), ResponseCode>((chunk_offset, bytes))
        }
    }))
    .buffer_unordered(max_concurrency)
    .try_for_each(|(chunk_offset, bytes)| {
        dst.subregion(chunk_offset as usize, bytes.len()).copy_from(&bytes);
        futures::future::ready(Ok(()))
    })
    .await;

    match result {
        Ok(()) => ResponseCode::Success,
        Err(code) => code,
    }
}

fn map_store_error(path: &ObjectPath, err: object_store::Error) -> ResponseCode {
    match err {
        object_store::Error::NotFound { .. } => {
            warn!("object {} not found", path);
            ResponseCode::FileAccessError
        }
        err => {
            warn!("object storage read of {} failed: {}", path, err);
            ResponseCode::FileAccessError
        }
    }
}

fn client_options() -> ClientOptions {
    let mut options = ClientOptions::new();
    if let Ok(raw) = std::env::var("RUNAI_STREAMER_S3_REQUEST_TIMEOUT_MS") {
        match raw.parse::<u64>() {
            Ok(millis) => options = options.with_timeout(Duration::from_millis(millis)),
            Err(_) => warn!("Ignoring unparsable RUNAI_STREAMER_S3_REQUEST_TIMEOUT_MS={}", raw),
        }
    }
    if std::env::var("RUNAI_STREAMER_S3_LOW_SPEED_LIMIT").is_ok() {
        debug!(
            "RUNAI_STREAMER_S3_LOW_SPEED_LIMIT is set; stalled transfers are bounded by the request timeout instead"
        );
    }
    options
}

fn build_store(config: &ObjectClientConfig) -> Result<Arc<dyn ObjectStore>> {
    let uri = &config.uri;
    let creds = &config.credentials;

    let unsupported =
        |e: object_store::Error| StreamerError::ObjectStorageUnsupported(e.to_string());

    match uri.scheme {
        Scheme::S3 => {
            let mut builder = AmazonS3Builder::from_env()
                .with_bucket_name(uri.bucket.clone())
                .with_client_options(client_options());

            let endpoint = uri
                .endpoint
                .clone()
                .or_else(|| creds.endpoint.clone())
                .or_else(|| std::env::var("AWS_ENDPOINT_URL").ok());
            if let Some(endpoint) = endpoint {
                if endpoint.starts_with("http://") {
                    builder = builder.with_allow_http(true);
                }
                builder = builder.with_endpoint(endpoint);
            }
            if let Some(region) = &creds.region {
                builder = builder.with_region(region.clone());
            }
            if let Some(key) = &creds.access_key_id {
                builder = builder.with_access_key_id(key.clone());
            }
            if let Some(secret) = &creds.secret_access_key {
                builder = builder.with_secret_access_key(secret.clone());
            }
            if let Some(token) = &creds.session_token {
                builder = builder.with_token(token.clone());
            }
            if env_flag("RUNAI_STREAMER_S3_USE_VIRTUAL_ADDRESSING") {
                builder = builder.with_virtual_hosted_style_request(true);
            }
            if std::env::var("AWS_CA_BUNDLE").is_ok() {
                warn!("AWS_CA_BUNDLE is set but custom CA bundles are not supported; relying on the system trust store");
            }

            Ok(Arc::new(builder.build().map_err(unsupported)?))
        }
        Scheme::Gcs => {
            let mut builder =
                GoogleCloudStorageBuilder::from_env().with_bucket_name(uri.bucket.clone());
            if let Ok(path) = std::env::var("RUNAI_STREAMER_GCS_CREDENTIAL_FILE") {
                builder = builder.with_service_account_path(path);
            }
            Ok(Arc::new(builder.build().map_err(unsupported)?))
        }
        Scheme::Azure => {
            let mut builder =
                MicrosoftAzureBuilder::from_env().with_container_name(uri.bucket.clone());
            if let Some(account) = &uri.account {
                builder = builder.with_account(account.clone());
            }
            if let Some(endpoint) = &uri.endpoint {
                builder = builder.with_endpoint(endpoint.clone());
            }
            Ok(Arc::new(builder.build().map_err(unsupported)?))
        }
        Scheme::Memory => Ok(shared_memory_store(&uri.bucket)),
    }
}

/// The process-wide backend entry point for all supported schemes.
pub struct ObjectStoreBackend;

impl ObjectBackend for ObjectStoreBackend {
    fn create_client(&self, config: &ObjectClientConfig) -> Result<Arc<dyn ObjectClient>> {
        // fail early if the runtime cannot start
        runtime()?;
        Ok(Arc::new(ObjectStoreClient::new(config)?))
    }

    fn shutdown_policy(&self) -> ShutdownPolicy {
        ShutdownPolicy::DeferToProcessExit
    }
}

/// The backend instance used by the engine.
pub static BACKEND: ObjectStoreBackend = ObjectStoreBackend;
