//! Graceful shutdown coordination
//!
//! One process-wide coordinator: a flag the engines consult at keep-alive
//! and stream boundaries, an active-connection count, and a drain routine
//! that waits for in-flight work before the acceptor forces the remaining
//! connections closed.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Instant;

use tokio::sync::Notify;

use crate::config::ShutdownConfig;

#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    shutting_down: AtomicBool,
    active_connections: AtomicI64,
    notify: Notify,
}

impl ShutdownCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Flips the flag. New connections are answered with 503 from here on;
    /// engines stop reusing connections at their next boundary.
    pub fn begin(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Resolves once `begin` has been called.
    pub async fn wait_begun(&self) {
        while !self.is_shutting_down() {
            self.notify.notified().await;
        }
    }

    /// Registers a connection, returning a guard that deregisters on drop.
    #[must_use]
    pub fn register(self: &Arc<Self>) -> ConnectionGuard {
        self.active_connections.fetch_add(1, Ordering::SeqCst);
        ConnectionGuard { coordinator: Arc::clone(self) }
    }

    #[must_use]
    pub fn active_connections(&self) -> i64 {
        self.active_connections.load(Ordering::SeqCst)
    }

    /// Drain sequence: sleep the deregistration grace, then poll the
    /// active count until it reaches zero or the timeout lapses. Returns
    /// true when everything drained, false when the caller must force.
    pub async fn drain(&self, config: &ShutdownConfig) -> bool {
        tokio::time::sleep(config.drain_grace).await;

        let deadline = Instant::now() + config.drain_timeout;
        while self.active_connections() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(config.poll_interval).await;
        }
        true
    }
}

/// Membership token for one live connection.
#[derive(Debug)]
pub struct ConnectionGuard {
    coordinator: Arc<ShutdownCoordinator>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.coordinator
            .active_connections
            .fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn guard_tracks_active_connections() {
        let coordinator = Arc::new(ShutdownCoordinator::new());
        let a = coordinator.register();
        let b = coordinator.register();
        assert_eq!(coordinator.active_connections(), 2);
        drop(a);
        assert_eq!(coordinator.active_connections(), 1);
        drop(b);
        assert_eq!(coordinator.active_connections(), 0);
    }

    #[tokio::test]
    async fn drain_completes_when_connections_finish() {
        let coordinator = Arc::new(ShutdownCoordinator::new());
        let guard = coordinator.register();
        coordinator.begin();
        assert!(coordinator.is_shutting_down());

        let config = ShutdownConfig {
            drain_grace: Duration::from_millis(1),
            drain_timeout: Duration::from_millis(500),
            poll_interval: Duration::from_millis(5),
        };

        let drainer = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.drain(&config).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(guard);
        assert!(drainer.await.unwrap());
    }

    #[tokio::test]
    async fn drain_times_out_with_stuck_connection() {
        let coordinator = Arc::new(ShutdownCoordinator::new());
        let _guard = coordinator.register();
        coordinator.begin();

        let config = ShutdownConfig {
            drain_grace: Duration::from_millis(1),
            drain_timeout: Duration::from_millis(50),
            poll_interval: Duration::from_millis(5),
        };
        assert!(!coordinator.drain(&config).await);
    }
}
