/*!
 * Per-worker execution of one file's tasks
 *
 * A batch is a single contiguous range of one file, read by one worker.
 * The range may contain several sub-ranges (requests), whole or partial;
 * each is represented by a task:
 *
 * ```text
 *         [                batch range                      ]
 *   [ ... request 1 ][request 2][   request 3   ][ request 4 ... ]
 *         [task 1   ][  task 2 ][    task 3     ][ task 4 ]
 * ```
 */

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, error, trace};

use crate::config::Config;
use crate::credentials::Credentials;
use crate::destination::DstBuffer;
use crate::error::{Result, StreamerError};
use crate::range::Range;
use crate::responder::{Responder, Response};
use crate::response_code::ResponseCode;
use crate::streamer::reader::{FileReader, Reader};
use crate::streamer::task::Task;
use crate::uri::StorageUri;

#[derive(Debug)]
pub struct Batch {
    pub worker_index: usize,
    pub file_index: u32,
    pub path: String,

    /// parsed object storage location; `None` for filesystem paths
    pub uri: Option<StorageUri>,
    pub credentials: Credentials,

    /// tasks in ascending file-offset order, contiguous over `range`
    pub tasks: Vec<Task>,

    /// the contiguous file range covered by the tasks
    pub range: Range,

    pub responder: Arc<Responder>,
    pub config: Arc<Config>,
    pub dst: Arc<DstBuffer>,

    /// index of the first task not yet reported; monotone, scanned forward
    unfinished: usize,
}

impl Batch {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        worker_index: usize,
        file_index: u32,
        path: String,
        uri: Option<StorageUri>,
        credentials: Credentials,
        tasks: Vec<Task>,
        responder: Arc<Responder>,
        config: Arc<Config>,
        dst: Arc<DstBuffer>,
    ) -> Self {
        let range = match (tasks.first(), tasks.last()) {
            (Some(first), Some(last)) => Range {
                start: first.offset,
                end: last.end,
            },
            _ => Range::default(),
        };

        debug!(
            "batch {} range {} ; {} tasks on worker {}",
            path,
            range,
            tasks.len(),
            worker_index
        );

        Self {
            worker_index,
            file_index,
            path,
            uri,
            credentials,
            tasks,
            range,
            responder,
            config,
            dst,
            unfinished: 0,
        }
    }

    pub fn is_object_storage(&self) -> bool {
        self.uri.is_some()
    }

    /// Synchronous filesystem path: read the whole range in block-sized
    /// chunks, reporting every fully covered request as soon as its bytes
    /// are in place. On any failure the remaining unfinished requests each
    /// receive one event carrying the error.
    pub fn execute(&mut self, stopped: &AtomicBool) {
        debug!("start reading from file {}", self.path);

        if let Err(e) = self.read_file(stopped) {
            let code = e.code();
            if e.is_stop() {
                debug!("terminated reading from file {}", self.path);
            } else {
                error!("failed to read from file {}: {}", self.path, e);
            }
            self.handle_error(code);
        }
    }

    fn read_file(&mut self, stopped: &AtomicBool) -> Result<()> {
        if self.tasks.is_empty() {
            debug!("empty batch");
            return Ok(());
        }

        if self.range.is_empty() {
            // zero size tasks only; nothing to read, but their requests
            // still complete successfully
            self.finished_until(self.range.end, ResponseCode::Success);
            return Ok(());
        }

        let mut reader = Reader::File(FileReader::open(std::path::Path::new(&self.path))?);
        reader.seek(self.range.start)?;

        // the batch writes to one contiguous destination window
        let dst_base = self.tasks[0].dst_offset();
        let block = self.config.fs_block_bytesize;
        let num_chunks = self.range.size() / block;

        let mut file_offset = self.range.start;
        let mut chunks_read = 0u64;

        for _ in 0..num_chunks {
            if stopped.load(Ordering::Relaxed) {
                break;
            }

            let dst_offset = dst_base + (file_offset - self.range.start) as usize;
            let region = self.dst.region(dst_offset, block as usize);
            reader.read(region.as_mut_slice())?;

            file_offset += block;
            chunks_read += 1;
            self.finished_until(file_offset, ResponseCode::Success);
        }

        if file_offset < self.range.end && !stopped.load(Ordering::Relaxed) {
            let tail = (self.range.end - file_offset) as usize;
            let dst_offset = dst_base + (file_offset - self.range.start) as usize;
            let region = self.dst.region(dst_offset, tail);
            reader.read(region.as_mut_slice())?;

            file_offset = self.range.end;
            chunks_read += 1;
        }

        // covers the tail chunk and any zero size tasks at the range end
        if file_offset == self.range.end {
            self.finished_until(self.range.end, ResponseCode::Success);
        }

        debug!(
            "finished reading {} chunks from file {}{}",
            chunks_read,
            self.path,
            if stopped.load(Ordering::Relaxed) {
                " - terminated"
            } else {
                ""
            }
        );

        if stopped.load(Ordering::Relaxed) {
            return Err(StreamerError::Finished);
        }

        Ok(())
    }

    /// Asynchronous object storage path: fire one backend read per task.
    /// Completions are collected by the owning workload.
    pub fn request(&self, reader: &Reader, stopped: &AtomicBool) -> Result<()> {
        if self.tasks.is_empty() {
            debug!("empty batch");
            return Ok(());
        }

        if stopped.load(Ordering::Relaxed) {
            return Err(StreamerError::Finished);
        }

        let uri = self.uri.as_ref().ok_or_else(|| {
            StreamerError::InvalidParameter(format!(
                "batch for {} has no object storage location",
                self.path
            ))
        })?;

        for task in &self.tasks {
            trace!("requesting {}", task);
            let dst = self.dst.region(task.dst_offset(), task.bytesize as usize);
            reader.request_read(
                &uri.key,
                task.global_id,
                Range::new(task.offset, task.bytesize),
                dst,
            )?;
        }

        Ok(())
    }

    /// Handle one completion event routed here by the workload.
    pub fn handle_response(&mut self, task_slot: usize, code: ResponseCode) {
        let task = &mut self.tasks[task_slot];
        if task.finished_request(code) {
            let request = &task.request;
            self.responder.push_with_bytes(
                Response::new(self.file_index, request.index, request.ret()),
                request.bytesize,
            );
        }
    }

    /// Fail every request that has not yet completed. Called once per batch
    /// when its workload winds down; already-finished tasks are unaffected
    /// because task completion is one-shot.
    pub fn handle_error(&mut self, code: ResponseCode) {
        let file_index = self.file_index;
        for task in &mut self.tasks {
            if task.finished_request(code) {
                let request = &task.request;
                self.responder.push_with_bytes(
                    Response::new(file_index, request.index, request.ret()),
                    request.bytesize,
                );
            }
        }
    }

    /// Report every task whose range lies at or before `file_offset`,
    /// scanning forward from the first unfinished task.
    fn finished_until(&mut self, file_offset: u64, code: ResponseCode) {
        let file_index = self.file_index;
        let mut i = self.unfinished;
        while i < self.tasks.len() {
            if file_offset < self.tasks[i].end {
                break;
            }
            let task = &mut self.tasks[i];
            if task.finished_request(code) {
                let request = &task.request;
                trace!(
                    "sending response for file {} sub request {}",
                    file_index,
                    request.index
                );
                self.responder.push_with_bytes(
                    Response::new(file_index, request.index, request.ret()),
                    request.bytesize,
                );
            }
            i += 1;
        }
        self.unfinished = i;
    }

    #[cfg(test)]
    pub(crate) fn unfinished_cursor(&self) -> usize {
        self.unfinished
    }
}

impl fmt::Display for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} range {} ; {} tasks",
            self.path,
            self.range,
            self.tasks.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streamer::request::Request;
    use std::io::Write;

    fn make_batch(
        path: &str,
        sub_sizes: &[u64],
        dst: Arc<DstBuffer>,
        responder: Arc<Responder>,
        config: Arc<Config>,
    ) -> Batch {
        let mut tasks = Vec::new();
        let mut offset = 0u64;
        for (index, &size) in sub_sizes.iter().enumerate() {
            let request = Request::new(0, index as u32, offset, size, offset as usize, 1);
            tasks.push(Task::new(request, offset, size, 0));
            offset += size;
        }

        Batch::new(
            0,
            0,
            path.to_string(),
            None,
            Credentials::default(),
            tasks,
            responder,
            config,
            dst,
        )
    }

    fn small_block_config() -> Arc<Config> {
        Arc::new(Config::new(1, 1, crate::config::MIN_OBJ_BLOCK_BYTESIZE, 16, false).unwrap())
    }

    #[test]
    fn test_execute_reports_requests_in_offset_order() {
        let data: Vec<u8> = (0..64u8).collect();
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&data).unwrap();

        let mut buffer = vec![0u8; 64];
        let dst = unsafe { DstBuffer::new(buffer.as_mut_ptr(), buffer.len()) };
        let responder = Arc::new(Responder::new(4));

        let mut batch = make_batch(
            tmp.path().to_str().unwrap(),
            &[16, 16, 16, 16],
            dst,
            responder.clone(),
            small_block_config(),
        );

        let stopped = AtomicBool::new(false);
        batch.execute(&stopped);

        for expected_index in 0..4u32 {
            let response = responder.pop();
            assert_eq!(response.ret, ResponseCode::Success);
            assert_eq!(response.index, expected_index);
        }
        assert_eq!(responder.pop().ret, ResponseCode::FinishedError);
        assert_eq!(buffer, data);
    }

    #[test]
    fn test_execute_truncated_file_reports_eof() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&[7u8; 20]).unwrap(); // half of the requested 40 bytes

        let mut buffer = vec![0u8; 40];
        let dst = unsafe { DstBuffer::new(buffer.as_mut_ptr(), buffer.len()) };
        let responder = Arc::new(Responder::new(1));

        let mut batch = make_batch(
            tmp.path().to_str().unwrap(),
            &[40],
            dst,
            responder.clone(),
            small_block_config(),
        );

        batch.execute(&AtomicBool::new(false));
        assert_eq!(responder.pop().ret, ResponseCode::EofError);
    }

    #[test]
    fn test_execute_missing_file_fails_every_request() {
        let mut buffer = vec![0u8; 32];
        let dst = unsafe { DstBuffer::new(buffer.as_mut_ptr(), buffer.len()) };
        let responder = Arc::new(Responder::new(2));

        let mut batch = make_batch(
            "/no/such/file",
            &[16, 16],
            dst,
            responder.clone(),
            small_block_config(),
        );

        batch.execute(&AtomicBool::new(false));
        assert_eq!(responder.pop().ret, ResponseCode::FileAccessError);
        assert_eq!(responder.pop().ret, ResponseCode::FileAccessError);
        assert_eq!(responder.pop().ret, ResponseCode::FinishedError);
    }

    #[test]
    fn test_stopped_batch_reports_finished() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&[1u8; 64]).unwrap();

        let mut buffer = vec![0u8; 64];
        let dst = unsafe { DstBuffer::new(buffer.as_mut_ptr(), buffer.len()) };
        let responder = Arc::new(Responder::new(1));

        let mut batch = make_batch(
            tmp.path().to_str().unwrap(),
            &[64],
            dst,
            responder.clone(),
            small_block_config(),
        );

        batch.execute(&AtomicBool::new(true));
        assert_eq!(responder.pop().ret, ResponseCode::FinishedError);
    }

    #[test]
    fn test_zero_size_only_batch_completes() {
        let mut buffer = Vec::new();
        let dst = unsafe { DstBuffer::new(buffer.as_mut_ptr(), 0) };
        let responder = Arc::new(Responder::new(1));

        let mut batch = make_batch(
            "/ignored/zero-size-path",
            &[0],
            dst,
            responder.clone(),
            small_block_config(),
        );

        batch.execute(&AtomicBool::new(false));
        let response = responder.pop();
        assert_eq!(response.ret, ResponseCode::Success);
        assert_eq!(response.index, 0);
    }

    #[test]
    fn test_finished_until_cursor_is_monotone() {
        let data: Vec<u8> = (0..48u8).collect();
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&data).unwrap();

        let mut buffer = vec![0u8; 48];
        let dst = unsafe { DstBuffer::new(buffer.as_mut_ptr(), buffer.len()) };
        let responder = Arc::new(Responder::new(3));

        let mut batch = make_batch(
            tmp.path().to_str().unwrap(),
            &[16, 16, 16],
            dst,
            responder.clone(),
            small_block_config(),
        );

        batch.execute(&AtomicBool::new(false));
        assert_eq!(batch.unfinished_cursor(), 3);
    }

    #[test]
    fn test_handle_error_is_exactly_once_per_request() {
        let mut buffer = vec![0u8; 32];
        let dst = unsafe { DstBuffer::new(buffer.as_mut_ptr(), buffer.len()) };
        let responder = Arc::new(Responder::new(2));

        let mut batch = make_batch(
            "/unused",
            &[16, 16],
            dst,
            responder.clone(),
            small_block_config(),
        );

        batch.handle_error(ResponseCode::FileAccessError);
        // second sweep must not produce further events
        batch.handle_error(ResponseCode::FinishedError);

        assert_eq!(responder.pop().ret, ResponseCode::FileAccessError);
        assert_eq!(responder.pop().ret, ResponseCode::FileAccessError);
        assert_eq!(responder.pop().ret, ResponseCode::FinishedError);
        assert_eq!(responder.valid(), ResponseCode::Success);
    }
}
