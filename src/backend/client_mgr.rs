/*!
 * Process-wide object storage client cache
 *
 * Clients are expensive to create (TLS setup, credential resolution), so
 * they are pooled per process and reused across requests. A client is
 * handed out only when its target and credentials match the checkout
 * config; stale clients (rotated credentials, stopped) are dropped on the
 * spot.
 */

use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use tracing::{debug, error};

use super::object_client::BACKEND;
use super::{ObjectBackend, ObjectClient, ObjectClientConfig};
use crate::error::Result;

struct Pool {
    /// checked out to a workload
    used: Vec<Arc<dyn ObjectClient>>,

    /// parked, awaiting reuse
    unused: Vec<Arc<dyn ObjectClient>>,
}

static POOL: Lazy<Mutex<Pool>> = Lazy::new(|| {
    Mutex::new(Pool {
        used: Vec::new(),
        unused: Vec::new(),
    })
});

/// Check a client out of the pool, creating one when no parked client
/// matches `config`. Credentials are verified on checkout, so a client
/// created for rotated credentials never gets reused.
pub fn pop(config: &ObjectClientConfig) -> Result<Arc<dyn ObjectClient>> {
    {
        let mut pool = POOL.lock().unwrap();
        while let Some(client) = pool.unused.pop() {
            if client.verify_credentials(config) {
                debug!("reusing object storage client");
                pool.used.push(client.clone());
                return Ok(client);
            }
            // stale client is dropped here
            debug!("discarding stale object storage client");
        }
    }

    debug!("creating object storage client for {}", config.uri);
    let client = BACKEND.create_client(config)?;

    let mut pool = POOL.lock().unwrap();
    pool.used.push(client.clone());
    Ok(client)
}

/// Return a checked-out client to the pool.
pub fn push(client: Arc<dyn ObjectClient>) {
    debug!("releasing object storage client");
    let mut pool = POOL.lock().unwrap();
    if let Some(pos) = pool.used.iter().position(|c| Arc::ptr_eq(c, &client)) {
        pool.used.swap_remove(pos);
    }
    pool.unused.push(client);
}

/// Cancel outstanding reads on every pooled client. Used when the engine
/// stops so workers blocked on completions observe FinishedError.
pub fn stop_all() {
    debug!("stopping all object storage clients");
    let pool = POOL.lock().unwrap();
    for client in pool.used.iter().chain(pool.unused.iter()) {
        client.stop();
    }
}

/// Drop every parked client. Refuses while clients are checked out.
pub fn clear() {
    let mut pool = POOL.lock().unwrap();
    if !pool.used.is_empty() {
        error!(
            "cannot clear client pool: {} clients are still in use",
            pool.used.len()
        );
        return;
    }
    debug!("releasing all object storage clients");
    pool.unused.clear();
}

/// Total number of clients the pool knows about.
pub fn size() -> usize {
    let pool = POOL.lock().unwrap();
    pool.used.len() + pool.unused.len()
}

/// Number of parked clients.
pub fn unused() -> usize {
    POOL.lock().unwrap().unused.len()
}
