//! Graceful-shutdown signal plumbing.
//!
//! Each binary installs one [`Shutdown`] listener for SIGINT/SIGTERM and
//! hands clones to its loops. Loops `select!` on [`Shutdown::recv`] next to
//! their sleep or consume future and drain in-flight work before returning.

use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Install the process-wide signal handler and return the listener.
    pub fn listen() -> Self {
        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            wait_for_signal().await;
            tracing::info!("shutdown signal received");
            let _ = tx.send(true);
        });
        Self { rx }
    }

    /// Manual trigger pair, for tests and embedding.
    pub fn channel() -> (watch::Sender<bool>, Self) {
        let (tx, rx) = watch::channel(false);
        (tx, Self { rx })
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown has been requested. A closed channel counts as
    /// a request so loops never hang on a dead sender.
    pub async fn recv(&mut self) {
        if *self.rx.borrow() {
            return;
        }
        while self.rx.changed().await.is_ok() {
            if *self.rx.borrow() {
                return;
            }
        }
    }
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::error!("failed to install SIGTERM handler: {}", e);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_manual_trigger_resolves_recv() {
        let (tx, mut shutdown) = Shutdown::channel();
        assert!(!shutdown.is_triggered());

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), shutdown.recv())
            .await
            .expect("recv should resolve after trigger");
        assert!(shutdown.is_triggered());
    }

    #[tokio::test]
    async fn test_dropped_sender_resolves_recv() {
        let (tx, mut shutdown) = Shutdown::channel();
        drop(tx);
        tokio::time::timeout(Duration::from_secs(1), shutdown.recv())
            .await
            .expect("recv should resolve when the sender is gone");
    }
}
