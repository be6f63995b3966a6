/*!
 * Completion queue between the workers and the caller
 *
 * Multi-producer / single-consumer queue of completion events, initialized
 * with the expected number of events:
 *    push: workers append ready events and wake the consumer
 *    pop : the caller blocks until an event is available; once the expected
 *          count is delivered (or the queue is cancelled or stopped) every
 *          further pop returns a FinishedError event without blocking
 */

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Instant;

use tracing::{debug, error, info, trace};

use crate::logging::human_readable_size;
use crate::response_code::ResponseCode;

/// Log a throughput line only for transfers above this size.
const THROUGHPUT_LOG_THRESHOLD: u64 = 100 * 1024 * 1024;

/// One caller-visible completion event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response {
    /// Index of the file in the aggregate request
    pub file_index: u32,

    /// Index of the sub-request within that file
    pub index: u32,

    /// Result code for the sub-request
    pub ret: ResponseCode,
}

impl Response {
    pub fn new(file_index: u32, index: u32, ret: ResponseCode) -> Self {
        Self { file_index, index, ret }
    }

    /// Synthetic event carrying only a code (terminal FinishedError and
    /// error paths).
    pub fn from_code(ret: ResponseCode) -> Self {
        Self { file_index: 0, index: 0, ret }
    }
}

#[derive(Debug)]
struct State {
    /// expected number of events still unaccounted for
    running: u64,

    /// events ready to be popped
    responses: VecDeque<Response>,

    canceled: bool,

    /// all events so far reported Success
    successful: bool,
}

/// The completion queue. Shared between every batch of one aggregate
/// request (producers) and the caller (consumer).
#[derive(Debug)]
pub struct Responder {
    state: Mutex<State>,
    ready: Condvar,
    stopped: AtomicBool,
    total_bytesize: AtomicU64,
    start_time: Instant,
    unexpected_push: AtomicBool,
}

impl Responder {
    /// Prepare a queue expecting `running` events.
    pub fn new(running: u64) -> Self {
        debug!("created responder for {} running requests", running);
        Self {
            state: Mutex::new(State {
                running,
                responses: VecDeque::new(),
                canceled: false,
                successful: true,
            }),
            ready: Condvar::new(),
            stopped: AtomicBool::new(false),
            total_bytesize: AtomicU64::new(0),
            start_time: Instant::now(),
            unexpected_push: AtomicBool::new(false),
        }
    }

    /// Raise the expected event count (work added after construction).
    pub fn increment(&self, running: u64) {
        let mut state = self.state.lock().unwrap();
        state.running += running;
        debug!("responder incremented, new running count: {}", state.running);
    }

    /// Append a completion event. Discarded after `stop`; events beyond the
    /// expected count are dropped and flagged.
    pub fn push(&self, response: Response) {
        let mut state = self.state.lock().unwrap();

        if self.stopped.load(Ordering::Relaxed) {
            debug!("responder stopped, ignoring pushed response");
            return;
        }

        state.successful = state.successful && response.ret.is_success();

        if state.running == 0 {
            error!(
                "received unexpected response (no running requests) for file {} sub request {}",
                response.file_index, response.index
            );
            self.unexpected_push.store(true, Ordering::Relaxed);
            return;
        }

        trace!(
            "response for file {} sub request {} ; {} running requests",
            response.file_index,
            response.index,
            state.running
        );
        state.responses.push_back(response);
        state.running -= 1;

        if state.running == 0
            && state.successful
            && self.total_bytesize.load(Ordering::Relaxed) > THROUGHPUT_LOG_THRESHOLD
        {
            info!(
                "Read throughput is {} per second",
                human_readable_size(self.bytes_per_second())
            );
        }

        self.ready.notify_one();
    }

    /// `push` variant that also accounts transferred bytes for throughput
    /// metering.
    pub fn push_with_bytes(&self, response: Response, bytesize: u64) {
        self.total_bytesize.fetch_add(bytesize, Ordering::Relaxed);
        self.push(response);
    }

    /// Block until the next event. Returns a FinishedError event without
    /// blocking once the queue is stopped, cancelled or fully drained.
    pub fn pop(&self) -> Response {
        let mut state = self.state.lock().unwrap();

        loop {
            if self.stopped.load(Ordering::Acquire) || state.canceled {
                debug!("responder stopped or canceled");
                return Response::from_code(ResponseCode::FinishedError);
            }

            if let Some(response) = state.responses.pop_front() {
                return response;
            }

            if state.running == 0 {
                debug!("responder does not expect any more responses");
                return Response::from_code(ResponseCode::FinishedError);
            }

            state = self.ready.wait(state).unwrap();
        }
    }

    /// All expected events accounted for, or the queue was cancelled.
    pub fn finished(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.canceled || (state.running == 0 && state.responses.is_empty())
    }

    /// Mark the queue finished; pending events are discarded on the
    /// consumer side. Idempotent.
    pub fn cancel(&self) {
        let mut state = self.state.lock().unwrap();
        if !state.canceled && !self.stopped.load(Ordering::Relaxed) {
            state.canceled = true;
            debug!(
                "responder canceled; running: {}, queued: {}",
                state.running,
                state.responses.len()
            );
            self.ready.notify_all();
        }
    }

    /// Hard stop: future pushes are no-ops and every pop returns
    /// FinishedError. Idempotent.
    pub fn stop(&self) {
        let _state = self.state.lock().unwrap();
        if !self.stopped.swap(true, Ordering::AcqRel) {
            debug!("responder stopped");
            self.ready.notify_all();
        }
    }

    /// Average read throughput since construction, in bytes per second.
    pub fn bytes_per_second(&self) -> u64 {
        let millis = self.start_time.elapsed().as_millis() as u64;
        if millis == 0 {
            return 0;
        }
        self.total_bytesize.load(Ordering::Relaxed) * 1000 / millis
    }

    /// Success unless an event arrived beyond the expected count.
    pub fn valid(&self) -> ResponseCode {
        if self.unexpected_push.load(Ordering::Relaxed) {
            ResponseCode::UnknownError
        } else {
            ResponseCode::Success
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_push_pop_in_order() {
        let responder = Responder::new(2);
        responder.push(Response::new(0, 0, ResponseCode::Success));
        responder.push(Response::new(0, 1, ResponseCode::Success));

        assert_eq!(responder.pop(), Response::new(0, 0, ResponseCode::Success));
        assert_eq!(responder.pop(), Response::new(0, 1, ResponseCode::Success));
        assert_eq!(responder.pop().ret, ResponseCode::FinishedError);
        assert_eq!(responder.pop().ret, ResponseCode::FinishedError);
        assert!(responder.finished());
    }

    #[test]
    fn test_pop_blocks_until_push() {
        let responder = Arc::new(Responder::new(1));

        let producer = {
            let responder = responder.clone();
            thread::spawn(move || {
                thread::sleep(std::time::Duration::from_millis(50));
                responder.push(Response::new(3, 7, ResponseCode::Success));
            })
        };

        let response = responder.pop();
        assert_eq!(response.file_index, 3);
        assert_eq!(response.index, 7);
        producer.join().unwrap();
    }

    #[test]
    fn test_concurrent_producers_exactly_once() {
        let count = 64u32;
        let responder = Arc::new(Responder::new(count as u64));

        let mut handles = Vec::new();
        for i in 0..count {
            let responder = responder.clone();
            handles.push(thread::spawn(move || {
                responder.push_with_bytes(Response::new(0, i, ResponseCode::Success), 100);
            }));
        }

        let mut seen = vec![false; count as usize];
        for _ in 0..count {
            let response = responder.pop();
            assert_eq!(response.ret, ResponseCode::Success);
            assert!(!seen[response.index as usize], "duplicate event");
            seen[response.index as usize] = true;
        }
        assert_eq!(responder.pop().ret, ResponseCode::FinishedError);
        assert!(seen.into_iter().all(|s| s));

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(responder.valid(), ResponseCode::Success);
    }

    #[test]
    fn test_stop_unblocks_pop() {
        let responder = Arc::new(Responder::new(1));

        let consumer = {
            let responder = responder.clone();
            thread::spawn(move || responder.pop())
        };

        thread::sleep(std::time::Duration::from_millis(50));
        responder.stop();
        assert_eq!(consumer.join().unwrap().ret, ResponseCode::FinishedError);
    }

    #[test]
    fn test_push_after_stop_is_noop() {
        let responder = Responder::new(1);
        responder.stop();
        responder.push(Response::new(0, 0, ResponseCode::Success));
        assert_eq!(responder.pop().ret, ResponseCode::FinishedError);
        assert_eq!(responder.valid(), ResponseCode::Success);
    }

    #[test]
    fn test_cancel_discards_pending() {
        let responder = Responder::new(2);
        responder.push(Response::new(0, 0, ResponseCode::Success));
        responder.cancel();
        assert_eq!(responder.pop().ret, ResponseCode::FinishedError);
        assert!(responder.finished());
    }

    #[test]
    fn test_cancel_and_stop_idempotent() {
        let responder = Responder::new(1);
        responder.cancel();
        responder.cancel();
        responder.stop();
        responder.stop();
        assert_eq!(responder.pop().ret, ResponseCode::FinishedError);
    }

    #[test]
    fn test_unexpected_push_flagged() {
        let responder = Responder::new(1);
        responder.push(Response::new(0, 0, ResponseCode::Success));
        responder.push(Response::new(0, 1, ResponseCode::Success));
        assert_eq!(responder.valid(), ResponseCode::UnknownError);
    }

    #[test]
    fn test_increment_extends_expected_count() {
        let responder = Responder::new(1);
        responder.increment(1);
        responder.push(Response::new(0, 0, ResponseCode::Success));
        responder.push(Response::new(0, 1, ResponseCode::Success));
        assert_eq!(responder.pop().ret, ResponseCode::Success);
        assert_eq!(responder.pop().ret, ResponseCode::Success);
        assert_eq!(responder.pop().ret, ResponseCode::FinishedError);
        assert_eq!(responder.valid(), ResponseCode::Success);
    }

    #[test]
    fn test_error_code_preserved() {
        let responder = Responder::new(1);
        responder.push(Response::new(2, 5, ResponseCode::EofError));
        let response = responder.pop();
        assert_eq!(response.ret, ResponseCode::EofError);
        assert_eq!(response.file_index, 2);
        assert_eq!(response.index, 5);
    }
}
