use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::registry::Registry;

/// Shared stop switch for a running [`Relay`](crate::server::Relay).
#[derive(Clone)]
pub struct LifecycleController {
    running: Arc<AtomicBool>,
    shutdown: CancellationToken,
    registry: Arc<Registry>,
}

impl LifecycleController {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            running: Arc::new(AtomicBool::new(true)),
            shutdown: CancellationToken::new(),
            registry,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Token observed by the accept loop, the datagram loop and, through
    /// child tokens, every stream session.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Stops the relay. Cancelling the token makes both listener loops return
    /// and drop their sockets; then every session's stream is closed and the
    /// registry emptied under its lock.
    ///
    /// Only the first call does anything; it returns `true`.
    pub async fn stop(&self) -> bool {
        if !self.running.swap(false, Ordering::SeqCst) {
            return false;
        }

        info!("stopping relay");
        self.shutdown.cancel();
        let closed = self.registry.close_all().await;
        info!(closed, "relay stopped");
        true
    }
}
