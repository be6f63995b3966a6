/*!
 * Engine configuration
 *
 * Reading from a filesystem path:
 *     concurrency       - number of reader threads (default 16)
 *     fs_block_bytesize - bytes per read(2) call (minimum and default 2 MiB)
 *
 * Reading from an object storage path:
 *     s3_concurrency    - number of asynchronous object storage workers (default 8)
 *     s3_block_bytesize - bytes per backend range request (minimum 5 MiB, default 8 MiB)
 */

use std::fmt;
use std::str::FromStr;

use tracing::{info, warn};

use crate::error::{Result, StreamerError};

/// Minimum and default block size for a single filesystem read call.
pub const MIN_FS_BLOCK_BYTESIZE: u64 = 2 * 1024 * 1024;

/// Minimum chunk size accepted by object storage backends.
pub const MIN_OBJ_BLOCK_BYTESIZE: u64 = 5 * 1024 * 1024;

/// Default chunk size for object storage range requests.
pub const DEFAULT_OBJ_BLOCK_BYTESIZE: u64 = 8 * 1024 * 1024;

const DEFAULT_CONCURRENCY: usize = 16;
const DEFAULT_OBJ_CONCURRENCY: usize = 8;

/// Immutable engine configuration, shared by reference with every batch.
#[derive(Debug, Clone)]
pub struct Config {
    /// Number of filesystem worker threads
    pub concurrency: usize,

    /// Number of object storage worker threads
    pub s3_concurrency: usize,

    /// Read-call block for the filesystem path
    pub fs_block_bytesize: u64,

    /// Range-request chunk for the object storage path
    pub s3_block_bytesize: u64,
}

impl Config {
    pub fn new(
        concurrency: usize,
        s3_concurrency: usize,
        s3_block_bytesize: u64,
        fs_block_bytesize: u64,
        enforce_minimum: bool,
    ) -> Result<Self> {
        if concurrency == 0 || s3_concurrency == 0 {
            return Err(StreamerError::InvalidParameter(
                "concurrency must be a positive number".to_string(),
            ));
        }
        if s3_block_bytesize == 0 || fs_block_bytesize == 0 {
            return Err(StreamerError::InvalidParameter(
                "block bytesize must be positive".to_string(),
            ));
        }

        let mut config = Self {
            concurrency,
            s3_concurrency,
            fs_block_bytesize,
            s3_block_bytesize,
        };

        if enforce_minimum {
            if config.s3_block_bytesize < MIN_OBJ_BLOCK_BYTESIZE {
                info!("Setting object storage reading block size to 5 MiB");
                config.s3_block_bytesize = MIN_OBJ_BLOCK_BYTESIZE;
            }
            if config.fs_block_bytesize < MIN_FS_BLOCK_BYTESIZE {
                info!("Setting file system reading block size to 2 MiB");
                config.fs_block_bytesize = MIN_FS_BLOCK_BYTESIZE;
            }
        }

        Ok(config)
    }

    /// Build a configuration from the environment, falling back to defaults.
    ///
    /// `RUNAI_STREAMER_CONCURRENCY` overrides both worker counts and
    /// `RUNAI_STREAMER_CHUNK_BYTESIZE` overrides both block sizes; unset or
    /// unparsable variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        let concurrency = env_value("RUNAI_STREAMER_CONCURRENCY", DEFAULT_CONCURRENCY);
        let s3_concurrency = env_value("RUNAI_STREAMER_CONCURRENCY", DEFAULT_OBJ_CONCURRENCY);
        let s3_block = env_value("RUNAI_STREAMER_CHUNK_BYTESIZE", DEFAULT_OBJ_BLOCK_BYTESIZE);
        let fs_block = env_value("RUNAI_STREAMER_CHUNK_BYTESIZE", MIN_FS_BLOCK_BYTESIZE);

        Self::new(concurrency, s3_concurrency, s3_block, fs_block, true)
    }

    /// Size of the worker pool serving both storage kinds.
    pub fn max_concurrency(&self) -> usize {
        self.concurrency.max(self.s3_concurrency)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            s3_concurrency: DEFAULT_OBJ_CONCURRENCY,
            fs_block_bytesize: MIN_FS_BLOCK_BYTESIZE,
            s3_block_bytesize: DEFAULT_OBJ_BLOCK_BYTESIZE,
        }
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "concurrency {} ; object storage concurrency {} ; object storage block size {} bytes ; file system block size {} bytes",
            self.concurrency, self.s3_concurrency, self.s3_block_bytesize, self.fs_block_bytesize
        )
    }
}

/// Read an environment variable, falling back to `default` when unset and
/// warning when set but unparsable.
fn env_value<T: FromStr + Copy>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("Ignoring unparsable {}={}", name, raw);
                default
            }
        },
        Err(_) => default,
    }
}

/// Truthy check for flag-style environment variables (set to "1").
pub(crate) fn env_flag(name: &str) -> bool {
    matches!(std::env::var(name), Ok(value) if value == "1")
}
