//! Connectionless datagram transport to the collector.
//!
//! The socket lives on its own task. Readiness transitions and send outcomes
//! are reported back as [`TransportEvent`]s so that the owner of the relay
//! state applies them in order with everything else.

use std::net::SocketAddr;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

/// Readiness of the collector path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportState {
    Unready,
    Ready,
    Failed(String),
    Cancelled,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    State(TransportState),
    /// A datagram send finished; `at` is when the socket reported it.
    SendCompleted { result: Result<(), String>, at: Instant },
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to resolve collector {endpoint}: {source}")]
    Resolve {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Collector {0} resolved to no addresses")]
    NoAddress(String),
    #[error("Failed to bind UDP socket: {0}")]
    Bind(#[source] std::io::Error),
    #[error("Failed to connect UDP socket to {addr}: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

enum TransportRequest {
    Send(Vec<u8>),
    Cancel,
}

/// Handle to the UDP transport task.
pub struct UdpTransport {
    request_tx: mpsc::UnboundedSender<TransportRequest>,
    _task: tokio::task::JoinHandle<()>,
}

impl UdpTransport {
    /// Start the transport towards `endpoint` (`host:port`).
    ///
    /// Returns immediately; readiness arrives later as a
    /// [`TransportState::Ready`] or [`TransportState::Failed`] event. After a
    /// failure the socket is re-opened every `retry_interval` until it works.
    pub fn start(
        endpoint: impl Into<String>,
        retry_interval: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<TransportEvent>) {
        let (request_tx, request_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(transport_loop(
            endpoint.into(),
            retry_interval,
            request_rx,
            event_tx,
        ));
        (
            Self {
                request_tx,
                _task: task,
            },
            event_rx,
        )
    }

    /// Queue one datagram. Never blocks; the outcome arrives as
    /// [`TransportEvent::SendCompleted`].
    pub fn send(&self, datagram: Vec<u8>) {
        let _ = self.request_tx.send(TransportRequest::Send(datagram));
    }

    /// Close the socket. A [`TransportState::Cancelled`] event follows.
    pub fn cancel(&self) {
        let _ = self.request_tx.send(TransportRequest::Cancel);
    }
}

async fn open_socket(endpoint: &str) -> Result<UdpSocket, TransportError> {
    let addr = tokio::net::lookup_host(endpoint)
        .await
        .map_err(|source| TransportError::Resolve {
            endpoint: endpoint.to_owned(),
            source,
        })?
        .next()
        .ok_or_else(|| TransportError::NoAddress(endpoint.to_owned()))?;

    let bind_addr: SocketAddr = if addr.is_ipv4() {
        ([0, 0, 0, 0], 0).into()
    } else {
        ([0u16; 8], 0).into()
    };
    let socket = UdpSocket::bind(bind_addr).await.map_err(TransportError::Bind)?;
    socket
        .connect(addr)
        .await
        .map_err(|source| TransportError::Connect { addr, source })?;
    Ok(socket)
}

/// Background task: open the socket, then serve send requests until cancelled.
/// While the socket cannot be opened, retry every `retry_interval`; only the
/// first failure of a streak is reported.
async fn transport_loop(
    endpoint: String,
    retry_interval: Duration,
    mut request_rx: mpsc::UnboundedReceiver<TransportRequest>,
    event_tx: mpsc::UnboundedSender<TransportEvent>,
) {
    tracing::info!(%endpoint, "Opening UDP transport to collector");

    let mut socket: Option<UdpSocket> = None;
    let mut failing = false;
    let retry = tokio::time::sleep(Duration::ZERO);
    tokio::pin!(retry);

    loop {
        tokio::select! {
            _ = &mut retry, if socket.is_none() => match open_socket(&endpoint).await {
                Ok(opened) => {
                    tracing::info!(%endpoint, "UDP connection to collector ready");
                    let _ = event_tx.send(TransportEvent::State(TransportState::Ready));
                    socket = Some(opened);
                    failing = false;
                }
                Err(e) => {
                    if failing {
                        tracing::debug!(%e, "UDP connection still failing");
                    } else {
                        tracing::error!(%e, "UDP connection failed");
                        let _ = event_tx
                            .send(TransportEvent::State(TransportState::Failed(e.to_string())));
                        failing = true;
                    }
                    retry
                        .as_mut()
                        .reset(tokio::time::Instant::now() + retry_interval);
                }
            },
            request = request_rx.recv() => match request {
                Some(TransportRequest::Send(datagram)) => {
                    let result = match &socket {
                        Some(socket) => socket
                            .send(&datagram)
                            .await
                            .map(|_| ())
                            .map_err(|e| e.to_string()),
                        None => Err("transport not ready".to_owned()),
                    };
                    let _ = event_tx.send(TransportEvent::SendCompleted {
                        result,
                        at: Instant::now(),
                    });
                }
                Some(TransportRequest::Cancel) | None => break,
            },
        }
    }

    tracing::info!("UDP connection cancelled");
    let _ = event_tx.send(TransportEvent::State(TransportState::Cancelled));
}
