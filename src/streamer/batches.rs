/*!
 * Per-file batch construction
 *
 * Converts one file's worker shares (planned by the assigner) plus its
 * sub-range sizes into one batch per participating worker. Each sub-range
 * becomes a request whose task count equals the number of worker shares it
 * spans; tasks inherit the share's worker and their request-relative
 * offset.
 */

use std::sync::Arc;

use tracing::trace;

use crate::config::Config;
use crate::credentials::Credentials;
use crate::destination::DstBuffer;
use crate::error::{Result, StreamerError};
use crate::responder::Responder;
use crate::streamer::assigner::FileReadTask;
use crate::streamer::batch::Batch;
use crate::streamer::request::Request;
use crate::streamer::task::Task;
use crate::uri::StorageUri;

/// Cursor over one file's worker shares, consumed sub-range by sub-range.
struct ShareCursor<'a> {
    shares: &'a [FileReadTask],
    slot: usize,
    remaining: u64,
}

impl<'a> ShareCursor<'a> {
    fn new(shares: &'a [FileReadTask]) -> Self {
        Self {
            shares,
            slot: 0,
            remaining: shares.first().map_or(0, |s| s.bytesize),
        }
    }

    /// Advance lazily and take up to `bytesize` bytes from the current
    /// share; returns (share slot, bytes taken).
    fn consume(&mut self, bytesize: u64) -> (usize, u64) {
        if self.remaining == 0 && self.slot + 1 < self.shares.len() {
            self.slot += 1;
            self.remaining = self.shares[self.slot].bytesize;
        }

        let taken = self.remaining.min(bytesize);
        self.remaining -= taken;
        (self.slot, taken)
    }

    /// The share a zero-size sub-range attaches to.
    fn current(&self) -> usize {
        self.slot
    }
}

/// Build the batches of one file.
///
/// `shares` are the assigner's tasks for this file in worker order;
/// `sub_sizes` are the file's sub-range sizes, summing to its bytesize.
#[allow(clippy::too_many_arguments)]
pub fn build(
    file_index: u32,
    path: &str,
    uri: Option<&StorageUri>,
    credentials: &Credentials,
    file_offset: u64,
    shares: &[FileReadTask],
    sub_sizes: &[u64],
    responder: Arc<Responder>,
    config: Arc<Config>,
    dst: Arc<DstBuffer>,
) -> Result<Vec<Batch>> {
    let share_total: u64 = shares.iter().map(|s| s.bytesize).sum();
    let sub_total: u64 = sub_sizes.iter().sum();
    if share_total != sub_total {
        return Err(StreamerError::InvalidParameter(format!(
            "file {} bytesize {} is not equal to the sum of its sub ranges {}",
            file_index, share_total, sub_total
        )));
    }

    // dst window of this file starts at its first share's global offset
    let dst_base = shares.first().map_or(0, |s| s.dst_offset);

    let mut per_share_tasks: Vec<Vec<Task>> = (0..shares.len()).map(|_| Vec::new()).collect();
    let mut cursor = ShareCursor::new(shares);
    let mut request_offset = file_offset;

    for (request_index, &request_size) in sub_sizes.iter().enumerate() {
        trace!(
            "file {} sub request {} offset {} size {}",
            file_index,
            request_index,
            request_offset,
            request_size
        );

        // spans of this sub-range over the worker shares
        let mut spans: Vec<(usize, u64, u64)> = Vec::new(); // (share, offset, size)
        if request_size == 0 {
            spans.push((cursor.current(), request_offset, 0));
        } else {
            let mut task_offset = request_offset;
            let mut remaining = request_size;
            while remaining > 0 {
                let (slot, taken) = cursor.consume(remaining);
                debug_assert!(taken > 0, "share cursor exhausted before the sub ranges");
                spans.push((slot, task_offset, taken));
                task_offset += taken;
                remaining -= taken;
            }
        }

        let request = Request::new(
            file_index,
            request_index as u32,
            request_offset,
            request_size,
            (dst_base + (request_offset - file_offset)) as usize,
            spans.len() as u32,
        );

        for (slot, offset, size) in spans {
            let relative_offset = offset - request_offset;
            per_share_tasks[slot].push(Task::new(request.clone(), offset, size, relative_offset));
        }

        request_offset += request_size;
    }

    let mut batches = Vec::new();
    for (slot, tasks) in per_share_tasks.into_iter().enumerate() {
        if tasks.is_empty() {
            continue;
        }
        batches.push(Batch::new(
            shares[slot].worker_index,
            file_index,
            path.to_string(),
            uri.cloned(),
            credentials.clone(),
            tasks,
            responder.clone(),
            config.clone(),
            dst.clone(),
        ));
    }

    Ok(batches)
}
