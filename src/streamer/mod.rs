/*!
 * The streamer: one aggregate request in, one event per sub-range out
 *
 * `request` validates the aggregate read, plans it with the assigner,
 * builds per-file batches, groups them into per-worker workloads and hands
 * those to the pool. `response` blocks on the completion queue. Exactly as
 * many events as there are sub-ranges are delivered, followed by
 * FinishedError forever.
 */

pub mod assigner;
pub mod batch;
pub mod batches;
pub mod pool;
pub mod reader;
pub mod request;
pub mod task;
pub mod workload;

use std::sync::Arc;

use tracing::{debug, trace};

use crate::backend::{client_mgr, fd_limit};
use crate::config::Config;
use crate::credentials::Credentials;
use crate::destination::DstBuffer;
use crate::error::{Result, StreamerError};
use crate::responder::{Responder, Response};
use crate::response_code::ResponseCode;
use crate::uri::StorageUri;

use self::pool::ThreadPool;
use self::workload::Workload;

/// One file of an aggregate request.
#[derive(Debug, Clone)]
pub struct FileRequest {
    pub path: String,

    /// offset in the file from which to start reading
    pub offset: u64,

    /// total bytes to read from this file
    pub bytesize: u64,

    /// sub-range sizes; the first sub-range starts at `offset`, each
    /// further one at the end of the previous. One completion event is
    /// delivered per sub-range.
    pub sub_sizes: Vec<u64>,
}

impl FileRequest {
    /// A whole-range request delivering a single event.
    pub fn whole(path: impl Into<String>, offset: u64, bytesize: u64) -> Self {
        Self {
            path: path.into(),
            offset,
            bytesize,
            sub_sizes: vec![bytesize],
        }
    }
}

/// Multi-threaded streaming engine. Not thread safe: one caller thread
/// sends requests and drains responses.
pub struct Streamer {
    config: Arc<Config>,
    responder: Option<Arc<Responder>>,
    // keep the pool last so workers are joined after the stop flags are
    // raised in Drop
    pool: ThreadPool,
}

impl Streamer {
    /// Create a streamer configured from the environment.
    pub fn new() -> Result<Self> {
        Self::with_config(Config::from_env()?)
    }

    pub fn with_config(config: Config) -> Result<Self> {
        debug!("{}", config);
        let workers = config.max_concurrency();
        fd_limit::ensure_fd_limit(workers)?;

        Ok(Self {
            config: Arc::new(config),
            responder: None,
            pool: ThreadPool::new(workers),
        })
    }

    /// Start one aggregate read into `dst` and return immediately.
    ///
    /// Completion events arrive through `response`, one per sub-range, in
    /// arbitrary order. The caller must not read a byte range of `dst`
    /// before the covering sub-request has completed successfully.
    pub fn request(
        &mut self,
        files: &[FileRequest],
        dst: Arc<DstBuffer>,
        credentials: Credentials,
    ) -> Result<()> {
        if files.is_empty() {
            return Err(StreamerError::EmptyRequest);
        }

        for (index, file) in files.iter().enumerate() {
            trace!(
                "requested to read {} bytes from {} offset {} in {} sub ranges",
                file.bytesize,
                file.path,
                file.offset,
                file.sub_sizes.len()
            );
            if file.bytesize > 0 && file.sub_sizes.is_empty() {
                return Err(StreamerError::InvalidParameter(format!(
                    "file {} requests {} bytes but lists no sub ranges",
                    index, file.bytesize
                )));
            }
        }

        let total_events: u64 = files.iter().map(|f| f.sub_sizes.len() as u64).sum();
        if total_events == 0 {
            return Err(StreamerError::EmptyRequest);
        }

        let total_bytes = files
            .iter()
            .try_fold(0u64, |acc, f| acc.checked_add(f.bytesize))
            .ok_or_else(|| {
                StreamerError::InvalidParameter(
                    "total byte size calculation overflow".to_string(),
                )
            })?;
        if (dst.len() as u64) < total_bytes {
            return Err(StreamerError::InvalidParameter(format!(
                "destination buffer of {} bytes cannot hold {} requested bytes",
                dst.len(),
                total_bytes
            )));
        }

        if let Some(responder) = &self.responder {
            if !responder.finished() {
                return Err(StreamerError::Busy);
            }
        }

        // expecting a total of one event per sub-range
        let responder = Arc::new(Responder::new(total_events));
        self.responder = Some(responder.clone());

        match self.dispatch(files, dst, credentials, responder.clone()) {
            Ok(()) => Ok(()),
            Err(e) => {
                // a cancelled responder will not delay the next request
                responder.cancel();
                Err(e)
            }
        }
    }

    fn dispatch(
        &mut self,
        files: &[FileRequest],
        dst: Arc<DstBuffer>,
        credentials: Credentials,
        responder: Arc<Responder>,
    ) -> Result<()> {
        let paths: Vec<String> = files.iter().map(|f| f.path.clone()).collect();
        let offsets: Vec<u64> = files.iter().map(|f| f.offset).collect();
        let bytesizes: Vec<u64> = files.iter().map(|f| f.bytesize).collect();

        let assigner = assigner::Assigner::new(&paths, &offsets, &bytesizes, 1, &self.config)?;

        let mut workloads: Vec<Workload> =
            (0..assigner.num_workers()).map(|_| Workload::new()).collect();

        for (file_index, file) in files.iter().enumerate() {
            let uri = StorageUri::parse(&file.path);
            let file_batches = batches::build(
                file_index as u32,
                &file.path,
                uri.as_ref(),
                &credentials,
                file.offset,
                assigner.file_assignments(file_index),
                &file.sub_sizes,
                responder.clone(),
                self.config.clone(),
                dst.clone(),
            )?;

            for batch in file_batches {
                debug!(
                    "sending {} tasks to worker {} range {}",
                    batch.tasks.len(),
                    batch.worker_index,
                    batch.range
                );
                workloads[batch.worker_index].add_batch(batch)?;
            }
        }

        for workload in workloads {
            if !workload.is_empty() {
                self.pool.push(workload);
            }
        }

        Ok(())
    }

    /// Pop one completion event; FinishedError once the request is fully
    /// drained (or before any request was made).
    pub fn response(&self) -> Response {
        match &self.responder {
            Some(responder) => responder.pop(),
            None => Response::from_code(ResponseCode::FinishedError),
        }
    }

    /// Blocking convenience wrapper: read one range and wait for it.
    pub fn read(
        &mut self,
        path: &str,
        offset: u64,
        bytesize: u64,
        dst: Arc<DstBuffer>,
        credentials: Credentials,
    ) -> ResponseCode {
        let file = FileRequest::whole(path, offset, bytesize);
        if let Err(e) = self.request(&[file], dst, credentials) {
            return e.code();
        }
        self.response().ret
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

impl Drop for Streamer {
    fn drop(&mut self) {
        debug!("streamer shutting down");
        let drained = self.responder.as_ref().map_or(true, |r| r.finished());
        if let Some(responder) = &self.responder {
            responder.stop();
        }
        if !drained {
            // unblock workers waiting on backend completions; outstanding
            // requests collapse into FinishedError events
            client_mgr::stop_all();
        }
        // the pool field drops after this body, joining the workers
    }
}
