/*!
 * One contiguous chunk read by a single worker
 */

use std::fmt;
use std::sync::Arc;

use crate::backend::ObjectRequestId;
use crate::streamer::request::Request;
use crate::response_code::ResponseCode;

/// A task is the part of exactly one request handled by one worker. Several
/// tasks of one request may run on different workers concurrently.
#[derive(Debug)]
pub struct Task {
    pub request: Arc<Request>,

    /// absolute offset in the file
    pub offset: u64,

    pub bytesize: u64,

    /// absolute end offset in the file
    pub end: u64,

    /// offset from the start of the request (zero for its first task)
    pub relative_offset: u64,

    /// process-unique id stamped at execution time; tags the in-flight
    /// backend read so its completion routes back here
    pub global_id: ObjectRequestId,

    finished: bool,
}

impl Task {
    pub fn new(request: Arc<Request>, offset: u64, bytesize: u64, relative_offset: u64) -> Self {
        Self {
            request,
            offset,
            bytesize,
            end: offset + bytesize,
            relative_offset,
            global_id: 0,
            finished: false,
        }
    }

    /// One-shot completion: the first call forwards to the request and
    /// returns whether the request is now complete; repeated calls are
    /// ignored so a task never yields more than one event.
    pub fn finished_request(&mut self, ret: ResponseCode) -> bool {
        if self.finished {
            return false;
        }
        self.finished = true;
        self.request.finished(ret)
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// This task's window start in the destination buffer.
    pub fn dst_offset(&self) -> usize {
        self.request.dst_offset + self.relative_offset as usize
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "task to read {} bytes from file offset {} to {}, request-relative offset {}, global id {}",
            self.bytesize, self.offset, self.end, self.relative_offset, self.global_id
        )
    }
}
