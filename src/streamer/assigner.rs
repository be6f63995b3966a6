/*!
 * Workload planning
 *
 * Splits reading from several files into per-worker read assignments. The
 * union of all files' bytes is divided into near-equal, block-aligned
 * worker shares; each share is then walked across the files it covers,
 * emitting one `FileReadTask` per (worker, file) pair. Worker 0 absorbs
 * the remainder that block alignment leaves over.
 */

use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Result, StreamerError};
use crate::uri::StorageUri;

/// One worker's contiguous slice of one file, as planned by the assigner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReadTask {
    pub worker_index: usize,
    pub file_index: usize,
    pub offset: u64,
    pub bytesize: u64,
    /// position of this slice in the aggregate destination buffer
    pub dst_offset: u64,
}

/// Planned distribution of an aggregate request across workers.
#[derive(Debug)]
pub struct Assigner {
    is_object_storage: bool,
    num_workers: usize,
    num_workloads: usize,
    /// per-file assignments, ordered by worker index within each file
    assignments: Vec<Vec<FileReadTask>>,
}

impl Assigner {
    pub fn new(
        paths: &[String],
        file_offsets: &[u64],
        bytesizes: &[u64],
        num_dsts: usize,
        config: &Config,
    ) -> Result<Self> {
        let num_files = paths.len();
        if num_files == 0 {
            warn!("no files provided");
            return Err(StreamerError::InvalidParameter("no files provided".to_string()));
        }

        let is_object_storage = StorageUri::parse(&paths[0]).is_some();
        let num_workers = if is_object_storage {
            config.s3_concurrency
        } else {
            config.concurrency
        };
        debug!("assigning {} files to {} workers", num_files, num_workers);

        if num_files != file_offsets.len()
            || num_files != bytesizes.len()
            || (num_dsts != num_files && num_dsts != 1)
        {
            return Err(StreamerError::InvalidParameter(format!(
                "input vector sizes mismatch: {} paths, {} offsets, {} bytesizes, {} destinations",
                num_files,
                file_offsets.len(),
                bytesizes.len(),
                num_dsts
            )));
        }

        let mut total_bytes: u64 = 0;
        for &size in bytesizes {
            total_bytes = total_bytes.checked_add(size).ok_or_else(|| {
                StreamerError::InvalidParameter("total byte size calculation overflow".to_string())
            })?;
        }
        if total_bytes == 0 {
            warn!("total bytes to read is zero");
        }

        let block_bytesize = if is_object_storage {
            config.s3_block_bytesize
        } else {
            config.fs_block_bytesize
        };

        // zero size files are still assigned to one worker, because they may
        // contain zero size tensors which need a response
        let num_blocks = total_bytes / block_bytesize;
        let num_workloads = num_blocks.min(num_workers as u64).max(1) as usize;
        let base_bytes = num_blocks / num_workloads as u64 * block_bytesize;
        let remainder = total_bytes - num_workloads as u64 * base_bytes;

        debug!(
            "total bytes: {}, block bytesize: {}, num blocks: {}, participating workers: {} out of {}, base bytes/worker: {}, remainder: {}",
            total_bytes, block_bytesize, num_blocks, num_workloads, num_workers, base_bytes, remainder
        );

        let mut assignments: Vec<Vec<FileReadTask>> = vec![Vec::new(); num_files];

        let mut current_file = 0usize;
        let mut current_offset = file_offsets[0];
        let mut dst_offset = 0u64;
        let mut assigned_total = 0u64;

        for worker_index in 0..num_workers {
            if current_file >= num_files {
                break;
            }

            let target = if worker_index == 0 {
                base_bytes + remainder
            } else {
                base_bytes
            };
            let mut assigned = 0u64;

            while current_file < num_files {
                let file_start = file_offsets[current_file];
                let file_size = bytesizes[current_file];

                if file_size > 0 && assigned >= target {
                    break;
                }

                debug_assert!(
                    file_size == 0
                        || (current_offset >= file_start
                            && current_offset < file_start + file_size),
                    "offset {} outside requested range [{}, {}) of file {}",
                    current_offset,
                    file_start,
                    file_start + file_size,
                    current_file
                );

                let remaining_in_file = file_start + file_size - current_offset;
                let still_needed = target - assigned;
                let to_assign = remaining_in_file.min(still_needed);

                if file_size == 0 || to_assign > 0 {
                    assignments[current_file].push(FileReadTask {
                        worker_index,
                        file_index: current_file,
                        offset: current_offset,
                        bytesize: to_assign,
                        dst_offset,
                    });

                    assigned += to_assign;
                    assigned_total += to_assign;
                    current_offset += to_assign;
                    dst_offset += to_assign;
                }

                if current_offset == file_start + file_size {
                    current_file += 1;
                    if current_file < num_files {
                        current_offset = file_offsets[current_file];
                    }
                }
            }

            debug!("worker {} assigned {} bytes", worker_index, assigned);
        }

        assert_eq!(
            assigned_total, total_bytes,
            "total bytes assigned does not match total bytes requested"
        );

        for (file_index, tasks) in assignments.iter().enumerate() {
            let file_total: u64 = tasks.iter().map(|t| t.bytesize).sum();
            assert_eq!(
                file_total, bytesizes[file_index],
                "file {} assigned bytes do not match its requested size",
                file_index
            );
        }

        Ok(Self {
            is_object_storage,
            num_workers,
            num_workloads,
            assignments,
        })
    }

    /// Assignments of one file, ordered by worker index.
    pub fn file_assignments(&self, file_index: usize) -> &[FileReadTask] {
        &self.assignments[file_index]
    }

    pub fn is_object_storage(&self) -> bool {
        self.is_object_storage
    }

    /// Workers configured for this storage kind.
    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Workers that actually received bytes.
    pub fn num_workloads(&self) -> usize {
        self.num_workloads
    }
}
