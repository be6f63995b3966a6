/*!
 * Caller-visible sub-range bookkeeping
 *
 * A request is one sub-range of one file; the engine issues exactly one
 * completion event for it. Reading the sub-range may be split across
 * several workers, each part represented by a task. The request completes
 * when its last task finishes and fails if any task reported an error.
 */

use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::sync::Arc;

use crate::response_code::ResponseCode;

#[derive(Debug)]
pub struct Request {
    /// index of the owning file in the aggregate request
    pub file_index: u32,

    /// index within the file's list of sub-ranges
    pub index: u32,

    /// offset of the sub-range in the file
    pub offset: u64,

    pub bytesize: u64,

    /// start of the sub-range's window in the destination buffer
    pub dst_offset: usize,

    /// tasks still running; the request completes when this reaches zero
    outstanding: AtomicU32,

    /// first non-success result reported by any task (last writer wins
    /// between concurrent failures, any failure suffices)
    ret: AtomicI32,
}

impl Request {
    pub fn new(
        file_index: u32,
        index: u32,
        offset: u64,
        bytesize: u64,
        dst_offset: usize,
        tasks: u32,
    ) -> Arc<Self> {
        Arc::new(Self {
            file_index,
            index,
            offset,
            bytesize,
            dst_offset,
            outstanding: AtomicU32::new(tasks),
            ret: AtomicI32::new(ResponseCode::Success as i32),
        })
    }

    /// Record one task completion; returns true when this was the last
    /// task, at which point the caller must push the completion event.
    pub fn finished(&self, result: ResponseCode) -> bool {
        if !result.is_success() {
            self.ret.store(result as i32, Ordering::Relaxed);
        }
        self.outstanding.fetch_sub(1, Ordering::AcqRel) == 1
    }

    /// Final result code for the completion event.
    pub fn ret(&self) -> ResponseCode {
        ResponseCode::from_i32(self.ret.load(Ordering::Acquire))
            .unwrap_or(ResponseCode::UnknownError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_task_completion() {
        let request = Request::new(0, 0, 0, 100, 0, 1);
        assert!(request.finished(ResponseCode::Success));
        assert_eq!(request.ret(), ResponseCode::Success);
    }

    #[test]
    fn test_multi_task_completion() {
        let request = Request::new(0, 0, 0, 100, 0, 3);
        assert!(!request.finished(ResponseCode::Success));
        assert!(!request.finished(ResponseCode::Success));
        assert!(request.finished(ResponseCode::Success));
        assert_eq!(request.ret(), ResponseCode::Success);
    }

    #[test]
    fn test_any_failure_fails_the_request() {
        let request = Request::new(0, 0, 0, 100, 0, 3);
        assert!(!request.finished(ResponseCode::Success));
        assert!(!request.finished(ResponseCode::EofError));
        assert!(request.finished(ResponseCode::Success));
        assert_eq!(request.ret(), ResponseCode::EofError);
    }

    #[test]
    fn test_concurrent_task_completions() {
        use std::thread;

        let request = Request::new(0, 0, 0, 1000, 0, 8);
        let mut handles = Vec::new();
        for _ in 0..8 {
            let request = request.clone();
            handles.push(thread::spawn(move || request.finished(ResponseCode::Success)));
        }

        // exactly one completer observes the counter reaching zero
        let completions = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|last| *last)
            .count();
        assert_eq!(completions, 1);
    }
}
