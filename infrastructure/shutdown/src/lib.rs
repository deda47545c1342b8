//! A simple, cooperative shutdown signal.
//!
//! [`Shutdown`] is held by whoever owns the lifetime of a process or
//! subsystem (a `main`, a test harness, a supervisor task). Cloning a
//! [`ShutdownSignal`] out of it and handing it to every task that should stop
//! when the process does is the idiomatic way for those tasks to race their
//! own I/O against a shutdown request with `tokio::select!`.

use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use futures::{
    channel::oneshot,
    future::{FusedFuture, Shared},
    FutureExt,
};

/// Owns the lifetime of a shutdown signal. Dropping this without calling
/// [`trigger`](Shutdown::trigger) also triggers the signal, so subsystems
/// never block forever on an abandoned owner.
#[derive(Debug)]
pub struct Shutdown {
    trigger: Option<oneshot::Sender<()>>,
    signal: ShutdownSignal,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            trigger: Some(tx),
            signal: ShutdownSignal(rx.shared()),
        }
    }

    /// Returns a cloneable, awaitable handle to this shutdown signal.
    pub fn to_signal(&self) -> ShutdownSignal {
        self.signal.clone()
    }

    /// Fires the signal. Idempotent: triggering twice is a no-op.
    pub fn trigger(&mut self) {
        if let Some(trigger) = self.trigger.take() {
            let _ = trigger.send(());
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.signal.is_terminated()
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Shutdown {
    fn drop(&mut self) {
        self.trigger();
    }
}

/// A cloneable future that resolves once the owning [`Shutdown`] is
/// triggered or dropped. Every clone observes the same underlying signal.
#[derive(Clone, Debug)]
pub struct ShutdownSignal(Shared<oneshot::Receiver<()>>);

impl ShutdownSignal {
    pub fn is_triggered(&self) -> bool {
        self.0.peek().is_some()
    }
}

impl Future for ShutdownSignal {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.0).poll(cx) {
            Poll::Ready(_) => Poll::Ready(()),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl FusedFuture for ShutdownSignal {
    fn is_terminated(&self) -> bool {
        self.0.is_terminated()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn it_resolves_when_triggered() {
        let mut shutdown = Shutdown::new();
        let signal = shutdown.to_signal();
        assert!(!signal.is_triggered());
        shutdown.trigger();
        signal.await;
    }

    #[tokio::test]
    async fn it_resolves_when_owner_dropped() {
        let shutdown = Shutdown::new();
        let signal = shutdown.to_signal();
        drop(shutdown);
        signal.await;
    }

    #[tokio::test]
    async fn clones_share_the_same_signal() {
        let mut shutdown = Shutdown::new();
        let a = shutdown.to_signal();
        let b = shutdown.to_signal();
        shutdown.trigger();
        a.await;
        b.await;
    }
}
