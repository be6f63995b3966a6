/*!
 * Per-worker dispatch unit
 *
 * A workload is everything one worker executes for one aggregate request:
 * at most one batch per file, all of the same storage kind. The filesystem
 * path runs its batches serially; the object storage path fires every
 * batch's reads through one checked-out client and then drives the
 * completion loop, routing each event back to its task via the global id
 * space.
 */

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tracing::{debug, error, trace};

use crate::backend::client_mgr;
use crate::backend::{ObjectClientConfig, ObjectCompletionEvent};
use crate::error::{Result, StreamerError};
use crate::response_code::ResponseCode;
use crate::streamer::batch::Batch;
use crate::streamer::reader::{ObjectReader, Reader};

/// Process-wide id allocator; each workload claims a contiguous
/// `[base, base + tasks)` slice so completions map back to tasks by
/// subtraction.
static ASYNC_HANDLE_COUNTER: AtomicU64 = AtomicU64::new(0);

#[derive(Default)]
pub struct Workload {
    /// batches in file-index order, at most one per file
    batches: Vec<Batch>,
    slot_by_file: HashMap<u32, usize>,

    is_object_storage: Option<bool>,
    total_tasks: usize,

    global_id_base: u64,
    /// `global_id - base` to (batch slot, task slot)
    task_lookup: Vec<(usize, usize)>,

    error_by_file: HashMap<u32, ResponseCode>,
}

impl Workload {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    pub fn is_object_storage(&self) -> bool {
        self.is_object_storage.unwrap_or(false)
    }

    /// Admit a batch. All batches of a workload must target the same
    /// storage kind, and object batches the same bucket and credentials,
    /// because they share one backend client.
    pub fn add_batch(&mut self, batch: Batch) -> Result<()> {
        assert!(
            !self.slot_by_file.contains_key(&batch.file_index),
            "batch for file index {} already exists",
            batch.file_index
        );

        match self.is_object_storage {
            None => self.is_object_storage = Some(batch.is_object_storage()),
            Some(is_object) => {
                if batch.is_object_storage() != is_object {
                    error!("workload contains paths of different storage backends");
                    return Err(StreamerError::InvalidParameter(
                        "workload contains paths of different storage backends".to_string(),
                    ));
                }
            }
        }

        if batch.is_object_storage() {
            if let Some(first) = self.batches.first() {
                if first.uri != batch.uri || first.credentials != batch.credentials {
                    let same_target = match (&first.uri, &batch.uri) {
                        (Some(a), Some(b)) => {
                            a.scheme == b.scheme
                                && a.bucket == b.bucket
                                && a.endpoint == b.endpoint
                                && a.account == b.account
                                && first.credentials == batch.credentials
                        }
                        _ => false,
                    };
                    if !same_target {
                        error!("workload contains paths of different object storage targets");
                        return Err(StreamerError::InvalidParameter(
                            "workload contains paths of different object storage targets"
                                .to_string(),
                        ));
                    }
                }
            }
        }

        self.total_tasks += batch.tasks.len();
        self.slot_by_file.insert(batch.file_index, self.batches.len());
        self.batches.push(batch);
        Ok(())
    }

    /// Execute on the worker thread. Never panics or propagates: every
    /// failure is converted into per-request completion events.
    pub fn execute(&mut self, stopped: &AtomicBool) {
        if self.batches.is_empty() {
            return;
        }

        if self.is_object_storage() {
            self.object_read(stopped);
        } else {
            for batch in &mut self.batches {
                batch.execute(stopped);
                debug!("finished batch {}", batch);
            }
        }
    }

    fn object_read(&mut self, stopped: &AtomicBool) {
        let code = match self.try_object_read(stopped) {
            Ok(()) => ResponseCode::Success,
            Err(e) => {
                if e.is_stop() {
                    debug!("terminated while reading batches");
                } else {
                    error!("error while reading batches: {}", e);
                }
                e.code()
            }
        };

        // every request that has not produced its event yet gets one now,
        // carrying the workload error or its file's own error
        for batch in &mut self.batches {
            let error_code = if code.is_success() {
                self.error_by_file
                    .get(&batch.file_index)
                    .copied()
                    .unwrap_or(ResponseCode::Success)
            } else {
                code
            };
            batch.handle_error(error_code);
        }
    }

    fn try_object_read(&mut self, stopped: &AtomicBool) -> Result<()> {
        self.assign_global_ids();

        let first = &self.batches[0];
        let uri = first.uri.clone().ok_or_else(|| {
            StreamerError::InvalidParameter(format!(
                "batch for {} has no object storage location",
                first.path
            ))
        })?;
        let client_config = ObjectClientConfig {
            uri,
            credentials: first.credentials.clone(),
            default_storage_chunk_size: first.config.s3_block_bytesize,
            max_concurrency: first.config.s3_concurrency,
        };

        let client = client_mgr::pop(&client_config)?;
        let reader = Reader::Object(ObjectReader::new(client.clone()));

        let mut requested_batches = 0;
        for slot in 0..self.batches.len() {
            trace!("requesting batch {}", self.batches[slot]);
            let code = match self.batches[slot].request(&reader, stopped) {
                Ok(()) => ResponseCode::Success,
                Err(e) => {
                    if !e.is_stop() {
                        error!("error while requesting batch {}: {}", self.batches[slot], e);
                    }
                    e.code()
                }
            };
            let file_index = self.batches[slot].file_index;
            self.error_by_file.insert(file_index, code);
            if code.is_success() {
                requested_batches += 1;
            }
        }

        let result = if requested_batches > 0 {
            debug!("waiting for responses");
            self.wait_for_responses(&reader, stopped)
        } else {
            Ok(())
        };

        client_mgr::push(client);
        result
    }

    /// Stamp every task with its process-unique id and build the flat
    /// lookup from `global_id - base` to the task.
    fn assign_global_ids(&mut self) {
        self.global_id_base = ASYNC_HANDLE_COUNTER.fetch_add(self.total_tasks as u64, Ordering::SeqCst);
        debug!(
            "assigned global ids for {} tasks starting from {}",
            self.total_tasks, self.global_id_base
        );

        self.task_lookup = Vec::with_capacity(self.total_tasks);
        let mut id = self.global_id_base;
        for (batch_slot, batch) in self.batches.iter_mut().enumerate() {
            for (task_slot, task) in batch.tasks.iter_mut().enumerate() {
                task.global_id = id;
                id += 1;
                self.task_lookup.push((batch_slot, task_slot));
            }
        }
    }

    /// Drain completions until the backend reports FinishedError. There is
    /// no termination condition in the loop body: the backend returns the
    /// terminal event once drained or cancelled.
    fn wait_for_responses(&mut self, reader: &Reader, stopped: &AtomicBool) -> Result<()> {
        if stopped.load(Ordering::Relaxed) {
            debug!("terminated while waiting for responses");
            return Err(StreamerError::Finished);
        }

        let mut events: Vec<ObjectCompletionEvent> = Vec::new();
        loop {
            reader.wait_for_completions(&mut events, 1)?;

            for event in &events {
                if event.response_code == ResponseCode::FinishedError {
                    debug!("finished waiting for responses");
                    return Err(StreamerError::Finished);
                }

                assert!(
                    event.request_id >= self.global_id_base,
                    "received response with invalid handle {} expected at least {}",
                    event.request_id,
                    self.global_id_base
                );
                let index = (event.request_id - self.global_id_base) as usize;
                assert!(
                    index < self.task_lookup.len(),
                    "received response with invalid handle {} expected at most {}",
                    event.request_id,
                    self.global_id_base + self.task_lookup.len() as u64
                );

                let (batch_slot, task_slot) = self.task_lookup[index];
                let batch = &mut self.batches[batch_slot];

                if !event.response_code.is_success() {
                    self.error_by_file
                        .insert(batch.file_index, event.response_code);
                }

                trace!(
                    "received response for request {} ({} bytes)",
                    event.request_id,
                    event.bytes_transferred
                );
                batch.handle_response(task_slot, event.response_code);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::object_client::shared_memory_store;
    use crate::config::Config;
    use crate::credentials::Credentials;
    use crate::destination::DstBuffer;
    use crate::responder::Responder;
    use crate::streamer::assigner::FileReadTask;
    use crate::streamer::batches;
    use crate::uri::StorageUri;
    use object_store::path::Path as ObjectPath;
    use object_store::{ObjectStore, PutPayload};
    use std::sync::Arc;

    fn put_object(bucket: &str, key: &str, data: Vec<u8>) {
        let store = shared_memory_store(bucket);
        let payload = PutPayload::from(bytes::Bytes::from(data));
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap()
            .block_on(store.put(&ObjectPath::from(key), payload))
            .unwrap();
    }

    fn small_config() -> Arc<Config> {
        // tiny blocks so tests exercise chunking without enforcing minima
        Arc::new(Config::new(2, 2, 16, 16, false).unwrap())
    }

    fn object_batches(
        bucket: &str,
        key: &str,
        size: u64,
        sub_sizes: &[u64],
        responder: Arc<Responder>,
        dst: Arc<DstBuffer>,
    ) -> Vec<Batch> {
        let uri = StorageUri::parse(&format!("mem://{}/{}", bucket, key)).unwrap();
        let shares = vec![FileReadTask {
            worker_index: 0,
            file_index: 0,
            offset: 0,
            bytesize: size,
            dst_offset: 0,
        }];
        batches::build(
            0,
            &format!("mem://{}/{}", bucket, key),
            Some(&uri),
            &Credentials::default(),
            0,
            &shares,
            sub_sizes,
            responder,
            small_config(),
            dst,
        )
        .unwrap()
    }

    #[test]
    fn test_object_workload_round_trip() {
        let data: Vec<u8> = (0..100).map(|i| (i % 251) as u8).collect();
        put_object("wl-rt", "blob", data.clone());

        let responder = Arc::new(Responder::new(3));
        let mut buffer = vec![0u8; 100];
        let dst = unsafe { DstBuffer::new(buffer.as_mut_ptr(), buffer.len()) };

        let mut workload = Workload::new();
        for batch in object_batches("wl-rt", "blob", 100, &[40, 40, 20], responder.clone(), dst) {
            workload.add_batch(batch).unwrap();
        }
        assert!(workload.is_object_storage());

        workload.execute(&AtomicBool::new(false));

        let mut seen = [false; 3];
        for _ in 0..3 {
            let response = responder.pop();
            assert_eq!(response.ret, ResponseCode::Success);
            seen[response.index as usize] = true;
        }
        assert!(seen.iter().all(|s| *s));
        assert_eq!(responder.pop().ret, ResponseCode::FinishedError);
        assert_eq!(buffer, data);
    }

    #[test]
    fn test_object_workload_missing_object() {
        let responder = Arc::new(Responder::new(2));
        let mut buffer = vec![0u8; 64];
        let dst = unsafe { DstBuffer::new(buffer.as_mut_ptr(), buffer.len()) };

        let mut workload = Workload::new();
        for batch in object_batches("wl-miss", "absent", 64, &[32, 32], responder.clone(), dst) {
            workload.add_batch(batch).unwrap();
        }

        workload.execute(&AtomicBool::new(false));

        // exactly one event per sub-request, each carrying the error
        assert_eq!(responder.pop().ret, ResponseCode::FileAccessError);
        assert_eq!(responder.pop().ret, ResponseCode::FileAccessError);
        assert_eq!(responder.pop().ret, ResponseCode::FinishedError);
        assert_eq!(responder.valid(), ResponseCode::Success);
    }

    #[test]
    fn test_mixed_storage_kinds_rejected() {
        let responder = Arc::new(Responder::new(2));
        let mut buffer = vec![0u8; 32];
        let dst = unsafe { DstBuffer::new(buffer.as_mut_ptr(), buffer.len()) };

        let mut object_batch =
            object_batches("wl-mix", "blob", 16, &[16], responder.clone(), dst.clone());

        let fs_shares = vec![FileReadTask {
            worker_index: 0,
            file_index: 1,
            offset: 0,
            bytesize: 16,
            dst_offset: 16,
        }];
        let mut fs_batch = batches::build(
            1,
            "/data/plain-file",
            None,
            &Credentials::default(),
            0,
            &fs_shares,
            &[16],
            responder,
            small_config(),
            dst,
        )
        .unwrap();

        let mut workload = Workload::new();
        workload.add_batch(object_batch.remove(0)).unwrap();
        let err = workload.add_batch(fs_batch.remove(0)).unwrap_err();
        assert_eq!(err.code(), ResponseCode::InvalidParameterError);
    }

    #[test]
    fn test_global_ids_are_disjoint_across_workloads() {
        let responder = Arc::new(Responder::new(2));
        let mut buffer = vec![0u8; 32];
        let dst = unsafe { DstBuffer::new(buffer.as_mut_ptr(), buffer.len()) };
        put_object("wl-ids", "blob", vec![1u8; 32]);

        let mut first = Workload::new();
        for batch in object_batches("wl-ids", "blob", 16, &[16], responder.clone(), dst.clone()) {
            first.add_batch(batch).unwrap();
        }
        let mut second = Workload::new();
        for batch in object_batches("wl-ids", "blob", 16, &[16], responder.clone(), dst) {
            second.add_batch(batch).unwrap();
        }

        first.assign_global_ids();
        second.assign_global_ids();

        let first_ids: Vec<u64> = first.batches[0].tasks.iter().map(|t| t.global_id).collect();
        let second_ids: Vec<u64> = second.batches[0].tasks.iter().map(|t| t.global_id).collect();
        for id in &first_ids {
            assert!(!second_ids.contains(id));
        }
    }

    #[test]
    fn test_stopped_workload_reports_finished() {
        let responder = Arc::new(Responder::new(1));
        let mut buffer = vec![0u8; 16];
        let dst = unsafe { DstBuffer::new(buffer.as_mut_ptr(), buffer.len()) };
        put_object("wl-stop", "blob", vec![2u8; 16]);

        let mut workload = Workload::new();
        for batch in object_batches("wl-stop", "blob", 16, &[16], responder.clone(), dst) {
            workload.add_batch(batch).unwrap();
        }

        workload.execute(&AtomicBool::new(true));
        assert_eq!(responder.pop().ret, ResponseCode::FinishedError);
    }
}
