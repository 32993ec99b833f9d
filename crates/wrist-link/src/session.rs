use crate::frame::{decode_frame, encode_frame};
use crate::{LinkError, PeerChannel, PeerEvent, PeerPayload};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Pause between failed accepts so a persistent error (fd exhaustion) does not spin.
const ACCEPT_RETRY_PAUSE: Duration = Duration::from_millis(100);

/// Commands sent to the session task.
enum SessionCommand {
    Send(PeerPayload),
    Activate,
    Shutdown,
}

/// How a connected period ended.
enum ConnectionEnd {
    PeerClosed,
    Shutdown,
}

/// The process-wide peer-channel endpoint.
///
/// Companion sessions listen and accept one peer at a time; wearable sessions
/// dial the companion and re-dial whenever the link drops. All link activity
/// runs on a background task and is reported through the event receiver
/// returned by the constructors.
pub struct PeerSession {
    local_addr: Option<SocketAddr>,
    command_tx: mpsc::UnboundedSender<SessionCommand>,
    _task: tokio::task::JoinHandle<()>,
}

impl PeerSession {
    /// Bind the companion listener and start accepting a peer.
    pub async fn companion(
        addr: &str,
    ) -> Result<(Self, mpsc::UnboundedReceiver<PeerEvent>), LinkError> {
        let listener = TcpListener::bind(addr).await.map_err(|source| LinkError::Bind {
            addr: addr.to_owned(),
            source,
        })?;
        let local_addr = listener.local_addr()?;
        tracing::info!(%local_addr, "Peer listener bound");

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(companion_loop(listener, command_rx, event_tx));

        Ok((
            Self {
                local_addr: Some(local_addr),
                command_tx,
                _task: task,
            },
            event_rx,
        ))
    }

    /// Start dialing the companion at `addr`.
    pub fn wearable(
        addr: impl Into<String>,
        reconnect_interval: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<PeerEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(wearable_loop(
            addr.into(),
            reconnect_interval,
            command_rx,
            event_tx,
        ));

        (
            Self {
                local_addr: None,
                command_tx,
                _task: task,
            },
            event_rx,
        )
    }

    /// Listener address (companion only).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

impl PeerChannel for PeerSession {
    fn send(&self, payload: PeerPayload) {
        let _ = self.command_tx.send(SessionCommand::Send(payload));
    }

    fn activate(&self) {
        let _ = self.command_tx.send(SessionCommand::Activate);
    }

    fn shutdown(&self) {
        let _ = self.command_tx.send(SessionCommand::Shutdown);
    }
}

/// Background task: accept a peer, serve it until it leaves, then wait for
/// re-activation before accepting again.
async fn companion_loop(
    listener: TcpListener,
    mut command_rx: mpsc::UnboundedReceiver<SessionCommand>,
    event_tx: mpsc::UnboundedSender<PeerEvent>,
) {
    let _ = event_tx.send(PeerEvent::ActivationCompleted {
        activated: true,
        reachable: false,
        error: None,
    });
    let mut active = true;

    loop {
        if !active {
            match command_rx.recv().await {
                Some(SessionCommand::Activate) => {
                    active = true;
                    let _ = event_tx.send(PeerEvent::ActivationCompleted {
                        activated: true,
                        reachable: false,
                        error: None,
                    });
                }
                Some(SessionCommand::Send(_)) => reject_send(&event_tx),
                Some(SessionCommand::Shutdown) | None => break,
            }
            continue;
        }

        let stream = tokio::select! {
            (stream, peer) = retry_after_pause(|| listener.accept(), ACCEPT_RETRY_PAUSE) => {
                tracing::info!(%peer, "Peer connected");
                stream
            },
            cmd = command_rx.recv() => {
                match cmd {
                    Some(SessionCommand::Send(_)) => reject_send(&event_tx),
                    Some(SessionCommand::Activate) => {}
                    Some(SessionCommand::Shutdown) | None => break,
                }
                continue;
            }
        };

        let _ = event_tx.send(PeerEvent::ReachabilityChanged { reachable: true });
        let end = serve_connection(stream, &mut command_rx, &event_tx).await;
        let _ = event_tx.send(PeerEvent::ReachabilityChanged { reachable: false });

        match end {
            ConnectionEnd::Shutdown => break,
            ConnectionEnd::PeerClosed => {
                active = false;
                let _ = event_tx.send(PeerEvent::Deactivated);
            }
        }
    }

    tracing::info!("Companion peer session stopped");
}

/// Background task: dial the companion, serve the link, re-dial after a pause.
async fn wearable_loop(
    addr: String,
    reconnect_interval: Duration,
    mut command_rx: mpsc::UnboundedReceiver<SessionCommand>,
    event_tx: mpsc::UnboundedSender<PeerEvent>,
) {
    let mut activated = false;

    'session: loop {
        let connect = TcpStream::connect(addr.as_str());
        tokio::pin!(connect);

        let connected = loop {
            tokio::select! {
                result = &mut connect => break result,
                cmd = command_rx.recv() => match cmd {
                    Some(SessionCommand::Send(_)) => reject_send(&event_tx),
                    Some(SessionCommand::Activate) => {}
                    Some(SessionCommand::Shutdown) | None => break 'session,
                },
            }
        };

        match connected {
            Ok(stream) => {
                tracing::info!(%addr, "Connected to companion");
                if activated {
                    let _ = event_tx.send(PeerEvent::ReachabilityChanged { reachable: true });
                } else {
                    activated = true;
                    let _ = event_tx.send(PeerEvent::ActivationCompleted {
                        activated: true,
                        reachable: true,
                        error: None,
                    });
                }

                let end = serve_connection(stream, &mut command_rx, &event_tx).await;
                let _ = event_tx.send(PeerEvent::ReachabilityChanged { reachable: false });
                if let ConnectionEnd::Shutdown = end {
                    break 'session;
                }
            }
            Err(e) => {
                tracing::debug!(%addr, ?e, "Companion not reachable");
                if !activated {
                    activated = true;
                    let _ = event_tx.send(PeerEvent::ActivationCompleted {
                        activated: true,
                        reachable: false,
                        error: None,
                    });
                }
            }
        }

        let pause = tokio::time::sleep(reconnect_interval);
        tokio::pin!(pause);
        loop {
            tokio::select! {
                _ = &mut pause => break,
                cmd = command_rx.recv() => match cmd {
                    Some(SessionCommand::Send(_)) => reject_send(&event_tx),
                    Some(SessionCommand::Activate) => {}
                    Some(SessionCommand::Shutdown) | None => break 'session,
                },
            }
        }
    }

    tracing::info!("Wearable peer session stopped");
}

/// Pump one connected link: inbound lines become events, queued payloads are
/// written out. Returns when the peer goes away or shutdown is requested.
async fn serve_connection(
    stream: TcpStream,
    command_rx: &mut mpsc::UnboundedReceiver<SessionCommand>,
    event_tx: &mpsc::UnboundedSender<PeerEvent>,
) -> ConnectionEnd {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match decode_frame(&line) {
                        Ok(payload) => {
                            let _ = event_tx.send(PeerEvent::MessageReceived(payload));
                        }
                        Err(e) => tracing::warn!(?e, "Skipping malformed peer frame"),
                    }
                }
                Ok(None) => {
                    tracing::info!("Peer closed the link");
                    return ConnectionEnd::PeerClosed;
                }
                Err(e) => {
                    tracing::warn!(?e, "Peer read error");
                    return ConnectionEnd::PeerClosed;
                }
            },
            cmd = command_rx.recv() => match cmd {
                Some(SessionCommand::Send(payload)) => {
                    if let Err(e) = write_frame(&mut writer, &payload).await {
                        let _ = event_tx.send(PeerEvent::SendFailed(e.to_string()));
                        if let LinkError::Io(_) = e {
                            return ConnectionEnd::PeerClosed;
                        }
                    }
                }
                Some(SessionCommand::Activate) => {}
                Some(SessionCommand::Shutdown) | None => {
                    let _ = writer.shutdown().await;
                    return ConnectionEnd::Shutdown;
                }
            },
        }
    }
}

async fn write_frame(
    writer: &mut tokio::net::tcp::OwnedWriteHalf,
    payload: &PeerPayload,
) -> Result<(), LinkError> {
    let line = encode_frame(payload)?;
    writer.write_all(line.as_bytes()).await?;
    Ok(())
}

/// Run `attempt` until it succeeds, sleeping `pause` after each failure.
async fn retry_after_pause<T, F, Fut>(mut attempt: F, pause: Duration) -> T
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::io::Result<T>>,
{
    loop {
        match attempt().await {
            Ok(value) => return value,
            Err(e) => {
                tracing::warn!(?e, "Peer accept failed");
                tokio::time::sleep(pause).await;
            }
        }
    }
}

fn reject_send(event_tx: &mpsc::UnboundedSender<PeerEvent>) {
    let _ = event_tx.send(PeerEvent::SendFailed("peer not connected".into()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(pitch: f64) -> PeerPayload {
        let mut p = PeerPayload::new();
        p.insert("source".into(), json!("WATCH"));
        p.insert("pitch".into(), json!(pitch));
        p
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<PeerEvent>) -> PeerEvent {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for peer event")
            .expect("event channel closed")
    }

    /// Skip events until one matches.
    async fn wait_for(
        rx: &mut mpsc::UnboundedReceiver<PeerEvent>,
        pred: impl Fn(&PeerEvent) -> bool,
    ) -> PeerEvent {
        loop {
            let event = next_event(rx).await;
            if pred(&event) {
                return event;
            }
        }
    }

    #[tokio::test]
    async fn failed_accepts_pause_before_retrying() {
        let attempts = std::cell::Cell::new(0);
        let started = tokio::time::Instant::now();

        let value = retry_after_pause(
            || {
                attempts.set(attempts.get() + 1);
                let n = attempts.get();
                async move {
                    if n < 3 {
                        Err(std::io::Error::new(std::io::ErrorKind::Other, "too many open files"))
                    } else {
                        Ok(n)
                    }
                }
            },
            Duration::from_millis(20),
        )
        .await;

        assert_eq!(value, 3);
        assert_eq!(attempts.get(), 3);
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn wearable_to_companion_delivery() {
        let (companion, mut companion_events) = PeerSession::companion("127.0.0.1:0").await.unwrap();
        let addr = companion.local_addr().unwrap().to_string();

        assert_eq!(
            next_event(&mut companion_events).await,
            PeerEvent::ActivationCompleted {
                activated: true,
                reachable: false,
                error: None
            }
        );

        let (wearable, mut wearable_events) =
            PeerSession::wearable(addr, Duration::from_millis(20));
        assert_eq!(
            next_event(&mut wearable_events).await,
            PeerEvent::ActivationCompleted {
                activated: true,
                reachable: true,
                error: None
            }
        );
        assert_eq!(
            next_event(&mut companion_events).await,
            PeerEvent::ReachabilityChanged { reachable: true }
        );

        wearable.send(payload(0.5));
        wearable.send(payload(0.75));

        assert_eq!(
            next_event(&mut companion_events).await,
            PeerEvent::MessageReceived(payload(0.5))
        );
        assert_eq!(
            next_event(&mut companion_events).await,
            PeerEvent::MessageReceived(payload(0.75))
        );

        wearable.shutdown();
        companion.shutdown();
    }

    #[tokio::test]
    async fn companion_deactivates_until_reactivated() {
        let (companion, mut companion_events) = PeerSession::companion("127.0.0.1:0").await.unwrap();
        let addr = companion.local_addr().unwrap().to_string();
        next_event(&mut companion_events).await;

        let (wearable, _wearable_events) =
            PeerSession::wearable(addr.clone(), Duration::from_millis(20));
        wait_for(&mut companion_events, |e| {
            *e == PeerEvent::ReachabilityChanged { reachable: true }
        })
        .await;

        wearable.shutdown();
        assert_eq!(
            wait_for(&mut companion_events, |e| {
                !matches!(e, PeerEvent::MessageReceived(_))
            })
            .await,
            PeerEvent::ReachabilityChanged { reachable: false }
        );
        assert_eq!(next_event(&mut companion_events).await, PeerEvent::Deactivated);

        // Inactive: sends are rejected rather than queued.
        companion.send(payload(1.0));
        assert!(matches!(
            next_event(&mut companion_events).await,
            PeerEvent::SendFailed(_)
        ));

        companion.activate();
        assert_eq!(
            next_event(&mut companion_events).await,
            PeerEvent::ActivationCompleted {
                activated: true,
                reachable: false,
                error: None
            }
        );

        let (wearable, _wearable_events) = PeerSession::wearable(addr, Duration::from_millis(20));
        wait_for(&mut companion_events, |e| {
            *e == PeerEvent::ReachabilityChanged { reachable: true }
        })
        .await;

        wearable.shutdown();
        companion.shutdown();
    }

    #[tokio::test]
    async fn wearable_without_companion_reports_unreachable() {
        // Grab a free port, then close it so nothing is listening there.
        let addr = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().to_string()
        };

        let (wearable, mut events) = PeerSession::wearable(addr, Duration::from_millis(20));
        assert_eq!(
            next_event(&mut events).await,
            PeerEvent::ActivationCompleted {
                activated: true,
                reachable: false,
                error: None
            }
        );

        wearable.send(payload(0.1));
        assert!(matches!(next_event(&mut events).await, PeerEvent::SendFailed(_)));
        wearable.shutdown();
    }

    #[tokio::test]
    async fn malformed_lines_are_skipped() {
        let (companion, mut events) = PeerSession::companion("127.0.0.1:0").await.unwrap();
        let addr = companion.local_addr().unwrap();
        next_event(&mut events).await;

        let mut raw = TcpStream::connect(addr).await.unwrap();
        raw.write_all(b"not json\n[1,2]\n\n{\"yaw\":0.25}\n").await.unwrap();

        wait_for(&mut events, |e| {
            *e == PeerEvent::ReachabilityChanged { reachable: true }
        })
        .await;

        let mut expected = PeerPayload::new();
        expected.insert("yaw".into(), json!(0.25));
        assert_eq!(next_event(&mut events).await, PeerEvent::MessageReceived(expected));

        companion.shutdown();
    }
}
