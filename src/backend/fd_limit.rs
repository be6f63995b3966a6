/*!
 * Process fd limit adjustment
 *
 * Object storage clients and parallel file readers together can hold a lot
 * of descriptors; the recommended headroom is 64 fds per worker on top of
 * whatever the application itself uses. The soft nofile limit is raised
 * toward the hard limit at streamer start.
 */

use crate::error::Result;

/// Fds budgeted per worker thread.
pub const FDS_PER_WORKER: u64 = 64;

/// Ensure the soft nofile limit covers `workers` worker threads, raising it
/// toward the hard limit when necessary.
#[cfg(unix)]
pub fn ensure_fd_limit(workers: usize) -> Result<()> {
    use crate::error::StreamerError;
    use tracing::{debug, warn};

    let required = workers as u64 * FDS_PER_WORKER;

    let mut limit = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    // getrlimit only fails on an invalid resource argument
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut limit) } != 0 {
        warn!("failed to query the process fd limit");
        return Ok(());
    }

    if limit.rlim_cur as u64 >= required {
        return Ok(());
    }

    if (limit.rlim_max as u64) < required {
        return Err(StreamerError::InsufficientFdLimit {
            required,
            available: limit.rlim_max as u64,
        });
    }

    let previous = limit.rlim_cur;
    limit.rlim_cur = required as libc::rlim_t;
    if unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &limit) } != 0 {
        return Err(StreamerError::InsufficientFdLimit {
            required,
            available: previous as u64,
        });
    }

    debug!("raised fd soft limit from {} to {}", previous, required);
    Ok(())
}

#[cfg(not(unix))]
pub fn ensure_fd_limit(_workers: usize) -> Result<()> {
    Ok(())
}
