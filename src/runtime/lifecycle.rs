//! Lifecycle: request counting, the RUNNING → CLOSED transition, and
//! external close signaling.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info};

/// Environment flag polled once per request; a truthy value closes the
/// server independent of the request count.
pub const CLOSE_ENV_VAR: &str = "LDS_PLZ_CLOSE";

/// Values of [`CLOSE_ENV_VAR`] treated as truthy.
const TRUES: [&str; 4] = ["T", "TRUE", "True", "true"];

/// Tracks served requests against the configured maximum and owns the
/// RUNNING → CLOSED transition. CLOSED is terminal; the process must be
/// restarted to serve again.
pub(crate) struct Lifecycle {
    served: AtomicU64,
    max_requests: Option<u64>,
    closed: watch::Sender<bool>,
}

impl Lifecycle {
    pub fn new(max_requests: Option<u64>) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            served: AtomicU64::new(0),
            max_requests,
            closed,
        }
    }

    /// Count one completed request (redirects included, favicon probes
    /// not) and close once the configured maximum is reached.
    pub fn record_served(&self) -> u64 {
        let served = self.served.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(max) = self.max_requests {
            if served >= max && !self.is_closed() {
                debug!("reached maximum number of requests {max}");
                self.close();
            }
        }
        served
    }

    /// Honor an externally signaled close request, if any.
    pub fn poll_external_close(&self) {
        if let Ok(value) = std::env::var(CLOSE_ENV_VAR) {
            if TRUES.contains(&value.as_str()) && !self.is_closed() {
                info!("close requested via {CLOSE_ENV_VAR}");
                self.close();
            }
        }
    }

    pub fn close(&self) {
        self.closed.send_replace(true);
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }

    pub fn served(&self) -> u64 {
        self.served.load(Ordering::SeqCst)
    }
}

/// Handle for closing a running server from outside the request flow.
///
/// Scoped to one server instance, so several servers can coexist in a
/// process and be closed independently.
#[derive(Clone)]
pub struct ServerHandle {
    lifecycle: Arc<Lifecycle>,
}

impl ServerHandle {
    pub(crate) fn new(lifecycle: Arc<Lifecycle>) -> Self {
        Self { lifecycle }
    }

    /// Request shutdown: the listener closes, in-flight requests finish.
    pub fn close(&self) {
        self.lifecycle.close();
    }

    /// Whether the server has reached the terminal CLOSED state.
    pub fn is_closed(&self) -> bool {
        self.lifecycle.is_closed()
    }
}
