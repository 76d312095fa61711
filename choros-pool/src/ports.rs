//! Port allocation
//!
//! One reservation set is shared by every session in the process and guarded
//! by a single mutex. A window of consecutive ports is accepted only if no
//! port is already reserved *and* every port passes a live OS bind probe —
//! the OS can hold ports the set knows nothing about. The probe runs while
//! the mutex is held, so two sessions can never validate overlapping windows
//! concurrently.

use std::collections::HashSet;
use std::net::TcpListener;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::debug;

use choros_core::config::PortRange;

use crate::error::{PoolError, Result};

/// Process-wide set of reserved ports.
///
/// Constructed once and injected into each session's allocator; deliberately
/// not a global so tests can run against their own set.
#[derive(Debug, Default)]
pub struct PortReservations {
    inner: Mutex<HashSet<u16>>,
}

impl PortReservations {
    /// Create an empty reservation set
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of currently reserved ports
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no ports are reserved
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Whether a specific port is reserved
    pub fn contains(&self, port: u16) -> bool {
        self.lock().contains(&port)
    }

    fn lock(&self) -> MutexGuard<'_, HashSet<u16>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Allocates consecutive port windows against a shared reservation set
pub struct PortAllocator {
    reservations: Arc<PortReservations>,
    ranges: Vec<PortRange>,
}

impl PortAllocator {
    /// Create an allocator over the given candidate ranges
    pub fn new(reservations: Arc<PortReservations>, ranges: Vec<PortRange>) -> Self {
        Self {
            reservations,
            ranges,
        }
    }

    /// Reserve `count` consecutive ports.
    ///
    /// Tries each candidate range in order, scanning windows at every offset.
    /// Check and reservation are atomic: the set lookup, the OS probe, and
    /// the insertion all happen under one lock acquisition.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::PortExhaustion`] when no range has a free window.
    pub fn reserve(&self, count: usize) -> Result<Vec<u16>> {
        if count == 0 {
            return Ok(Vec::new());
        }

        let mut reserved = self.reservations.lock();

        for range in &self.ranges {
            if range.len() < count {
                continue;
            }
            let last_base = range.end as u32 - count as u32;
            let mut base = range.start as u32;

            while base <= last_base {
                let window: Vec<u16> = (0..count as u32).map(|i| (base + i) as u16).collect();

                if window.iter().any(|p| reserved.contains(p)) {
                    base += 1;
                    continue;
                }

                // Live bind probe; skip past the first externally occupied port
                if let Some(occupied) = window.iter().find(|p| !probe_free(**p)) {
                    base = *occupied as u32 + 1;
                    continue;
                }

                for port in &window {
                    reserved.insert(*port);
                }
                debug!(?window, "reserved port window");
                return Ok(window);
            }
        }

        Err(PoolError::PortExhaustion { count })
    }

    /// Release ports back to the shared set.
    ///
    /// Idempotent: releasing a port that is not reserved is a no-op.
    pub fn release(&self, ports: &[u16]) {
        let mut reserved = self.reservations.lock();
        for port in ports {
            reserved.remove(port);
        }
        debug!(?ports, "released ports");
    }
}

/// Whether the OS will currently let us bind the port
pub fn probe_free(port: u16) -> bool {
    TcpListener::bind(("127.0.0.1", port)).is_ok()
}

/// Poll until the OS frees the port, up to `timeout`.
///
/// Used when restarting a worker whose old instance may still hold its
/// listener during a slow shutdown.
pub async fn wait_until_free(port: u16, interval: Duration, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if probe_free(port) {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(interval).await;
    }
}
