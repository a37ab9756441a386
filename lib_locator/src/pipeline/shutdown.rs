use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::doorbell::Doorbell;

/// # Shutdown Coordinator
///
/// Explicit, independently callable termination entrypoint. The hosting layer
/// decides *when* (OS signal, test harness, admin call); this type decides
/// *what* happens and in which order:
///
/// 1. cancel the ingest token, making the MQTT listener unsubscribe and
///    disconnect;
/// 2. close the enrichment doorbell so the worker drains what is queued and
///    exits;
/// 3. cancel the server token, making the HTTP server stop accepting while
///    in-flight requests complete, and live-stream sockets close.
///
/// Tokens are broadcast-style: every clone observes cancellation at once.
#[derive(Debug)]
pub struct ShutdownCoordinator {
    ingest: CancellationToken,
    enrichment: CancellationToken,
    server: CancellationToken,
    doorbell: Doorbell,
    triggered: AtomicBool,
}

impl ShutdownCoordinator {
    pub fn new(doorbell: Doorbell) -> Self {
        Self {
            ingest: CancellationToken::new(),
            enrichment: CancellationToken::new(),
            server: CancellationToken::new(),
            doorbell,
            triggered: AtomicBool::new(false),
        }
    }

    /// Token observed by the ingest listener.
    pub fn ingest_token(&self) -> CancellationToken {
        self.ingest.clone()
    }

    /// Token observed by the enrichment worker. The worker prefers queued
    /// signals over this token, so it never cuts the drain short.
    pub fn enrichment_token(&self) -> CancellationToken {
        self.enrichment.clone()
    }

    /// Token observed by the HTTP server and every live-stream connection.
    pub fn server_token(&self) -> CancellationToken {
        self.server.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// Runs the shutdown sequence. Only the first call does anything; it
    /// returns `true`, later calls return `false`.
    pub fn shutdown(&self) -> bool {
        if self.triggered.swap(true, Ordering::SeqCst) {
            debug!("Shutdown already in progress, ignoring repeated request.");
            return false;
        }

        info!("Shutdown: cancelling ingest listener.");
        self.ingest.cancel();

        info!("Shutdown: closing enrichment queue.");
        self.doorbell.close();
        self.enrichment.cancel();

        info!("Shutdown: stopping HTTP server, draining in-flight requests.");
        self.server.cancel();

        true
    }
}
