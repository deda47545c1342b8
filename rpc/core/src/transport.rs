//! The reactor-over-non-blocking-sockets component from the component
//! design: a thin wrapper over `tokio::net::{TcpListener, TcpStream}`.
//! Tokio's own reactor already *is* the single-threaded-cooperative
//! multiplexer the design calls for — this module does not hand-roll
//! epoll/kqueue bindings, built directly on `tokio::net` rather than a raw
//! mio/IOCP layer.

use std::{net::SocketAddr, time::Duration};

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, warn};

use crate::error::{RpcError, RpcOutcome};

/// Accept-storm protection: the accept loop yields to the scheduler every
/// this many accepts so other tasks on the runtime stay fair, rather than
/// draining the listen backlog uninterrupted.
pub const ACCEPT_BATCH: usize = 64;

/// Listens for inbound connections and hands each accepted stream to
/// `on_accept`. Runs until `shutdown` resolves or the listener errors.
pub struct Listener {
    inner: TcpListener,
}

impl Listener {
    pub async fn bind(addr: SocketAddr, keepalive: bool) -> RpcOutcome<Self> {
        let socket = match addr {
            SocketAddr::V4(_) => socket2::Socket::new(socket2::Domain::IPV4, socket2::Type::STREAM, Some(socket2::Protocol::TCP)),
            SocketAddr::V6(_) => socket2::Socket::new(socket2::Domain::IPV6, socket2::Type::STREAM, Some(socket2::Protocol::TCP)),
        }
        .map_err(|e| RpcError::NetworkError(e.to_string()))?;

        socket.set_reuse_address(true).map_err(|e| RpcError::NetworkError(e.to_string()))?;
        if keepalive {
            socket.set_keepalive(true).map_err(|e| RpcError::NetworkError(e.to_string()))?;
        }
        socket.set_nonblocking(true).map_err(|e| RpcError::NetworkError(e.to_string()))?;
        socket.bind(&addr.into()).map_err(|e| RpcError::NetworkError(e.to_string()))?;
        socket.listen(1024).map_err(|e| RpcError::NetworkError(e.to_string()))?;

        let inner = TcpListener::from_std(socket.into()).map_err(|e| RpcError::NetworkError(e.to_string()))?;
        Ok(Self { inner })
    }

    pub fn local_addr(&self) -> RpcOutcome<SocketAddr> {
        self.inner.local_addr().map_err(|e| RpcError::NetworkError(e.to_string()))
    }

    /// Runs the accept loop, invoking `on_accept` once per accepted peer,
    /// until `shutdown` resolves. Yields every [`ACCEPT_BATCH`] accepts so a
    /// connection storm cannot starve already-established connections'
    /// read/write tasks of scheduler time.
    pub async fn accept_loop<F>(&self, shutdown: helianthus_shutdown::ShutdownSignal, mut on_accept: F)
    where
        F: FnMut(TcpStream, SocketAddr),
    {
        tokio::pin!(shutdown);
        let mut accepted_since_yield = 0usize;

        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    debug!("transport accept loop stopping: shutdown signaled");
                    return;
                }
                accepted = self.inner.accept() => {
                    match accepted {
                        Ok((stream, peer_addr)) => {
                            on_accept(stream, peer_addr);
                            accepted_since_yield += 1;
                            if accepted_since_yield >= ACCEPT_BATCH {
                                accepted_since_yield = 0;
                                tokio::task::yield_now().await;
                            }
                        },
                        Err(err) => {
                            warn!(%err, "accept failed, continuing");
                        },
                    }
                }
            }
        }
    }
}

/// Connects to `addr`, mapping any failure (including the timeout) onto the
/// closed `RpcError` taxonomy rather than surfacing `io::Error` variants the
/// rest of the crate would otherwise have to match on separately.
pub async fn connect(addr: SocketAddr, timeout: Duration, nodelay: bool) -> RpcOutcome<TcpStream> {
    let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| RpcError::NetworkError(format!("connect to {addr} timed out after {timeout:?}")))?
        .map_err(|e| RpcError::NetworkError(e.to_string()))?;

    if nodelay {
        stream.set_nodelay(true).map_err(|e| RpcError::NetworkError(e.to_string()))?;
    }
    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    #[tokio::test]
    async fn binds_and_reports_local_addr() {
        let listener = Listener::bind("127.0.0.1:0".parse().unwrap(), false).await.unwrap();
        let addr = listener.local_addr().unwrap();
        assert_eq!(addr.ip().to_string(), "127.0.0.1");
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn accept_loop_invokes_callback_per_connection_and_stops_on_shutdown() {
        let listener = Listener::bind("127.0.0.1:0".parse().unwrap(), false).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let mut shutdown = helianthus_shutdown::Shutdown::new();
        let signal = shutdown.to_signal();

        let accepted_clone = accepted.clone();
        let accept_task = tokio::spawn(async move {
            listener
                .accept_loop(signal, |_stream, _addr| {
                    accepted_clone.fetch_add(1, Ordering::SeqCst);
                })
                .await;
        });

        let _client = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown.trigger();
        accept_task.await.unwrap();

        assert_eq!(accepted.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn connect_to_closed_port_fails_fast() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let result = connect(addr, Duration::from_millis(500), false).await;
        assert!(result.is_err());
    }
}
