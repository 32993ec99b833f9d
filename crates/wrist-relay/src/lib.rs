//! Companion-side relay.
//!
//! Receives motion payloads from the peer channel, encodes each as one CSV
//! record, and forwards it over UDP to a fixed collector. Delivery is
//! best-effort: nothing is queued or retried.

pub mod encoder;
pub mod rate;
pub mod state;
pub mod transport;

pub use encoder::{encode, FIELD_COUNT};
pub use rate::RateWindow;
pub use state::{PeerOutcome, RelayState, RelayStatus};
pub use transport::{TransportEvent, TransportState, UdpTransport};

use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use wrist_link::{PeerChannel, PeerEvent};

#[derive(Debug, Clone)]
pub struct RelaySettings {
    /// Source tag used when a payload carries none.
    pub default_source: String,
    pub rate_window: Duration,
    pub rate_min_samples: usize,
    /// How often the rate window is aged when no sends complete.
    pub rate_refresh: Duration,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            default_source: "WATCH".into(),
            rate_window: Duration::from_secs(5),
            rate_min_samples: 3,
            rate_refresh: Duration::from_millis(500),
        }
    }
}

/// Handle to the relay task.
pub struct Relay {
    shutdown_tx: mpsc::UnboundedSender<()>,
    status_rx: watch::Receiver<RelayStatus>,
    task: tokio::task::JoinHandle<RelayStatus>,
}

impl Relay {
    /// Spawn the relay task. It owns the peer channel and the transport until
    /// [`Relay::shutdown`].
    pub fn spawn<P>(
        settings: RelaySettings,
        peer: P,
        peer_events: mpsc::UnboundedReceiver<PeerEvent>,
        transport: UdpTransport,
        transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Self
    where
        P: PeerChannel + 'static,
    {
        let state = RelayState::new(
            settings.default_source,
            RateWindow::new(settings.rate_window, settings.rate_min_samples),
        );
        let (status_tx, status_rx) = watch::channel(state.status());
        let (shutdown_tx, shutdown_rx) = mpsc::unbounded_channel();

        let task = tokio::spawn(relay_loop(
            state,
            settings.rate_refresh,
            peer,
            peer_events,
            transport,
            transport_events,
            shutdown_rx,
            status_tx,
        ));

        Self {
            shutdown_tx,
            status_rx,
            task,
        }
    }

    /// Latest status snapshot.
    pub fn status(&self) -> RelayStatus {
        *self.status_rx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<RelayStatus> {
        self.status_rx.clone()
    }

    /// Tear down the peer session and the transport, then wait for the task.
    pub async fn shutdown(self) -> RelayStatus {
        let _ = self.shutdown_tx.send(());
        match self.task.await {
            Ok(status) => status,
            Err(e) => {
                tracing::error!(?e, "Relay task failed");
                *self.status_rx.borrow()
            }
        }
    }
}

/// Background task: the single owner of [`RelayState`].
async fn relay_loop<P: PeerChannel>(
    mut state: RelayState,
    rate_refresh: Duration,
    peer: P,
    mut peer_events: mpsc::UnboundedReceiver<PeerEvent>,
    transport: UdpTransport,
    mut transport_events: mpsc::UnboundedReceiver<TransportEvent>,
    mut shutdown_rx: mpsc::UnboundedReceiver<()>,
    status_tx: watch::Sender<RelayStatus>,
) -> RelayStatus {
    let mut peer_open = true;
    let mut transport_open = true;
    let mut refresh = tokio::time::interval(rate_refresh.max(Duration::from_millis(1)));
    refresh.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            event = peer_events.recv(), if peer_open => match event {
                Some(event) => match state.on_peer_event(event) {
                    PeerOutcome::Send(datagram) => transport.send(datagram),
                    PeerOutcome::Reactivate => peer.activate(),
                    PeerOutcome::Nothing => {}
                },
                None => {
                    tracing::warn!("Peer event stream closed");
                    peer_open = false;
                }
            },
            event = transport_events.recv(), if transport_open => match event {
                Some(event) => apply_transport_event(&mut state, event),
                None => {
                    tracing::warn!("Transport event stream closed");
                    transport_open = false;
                }
            },
            _ = refresh.tick() => state.refresh_rate(Instant::now()),
            _ = shutdown_rx.recv() => break,
        }
        publish(&status_tx, state.status());
    }

    peer.shutdown();
    transport.cancel();

    // Apply whatever the transport still reports, through its cancellation.
    if transport_open {
        while let Some(event) = transport_events.recv().await {
            let cancelled = event == TransportEvent::State(TransportState::Cancelled);
            apply_transport_event(&mut state, event);
            if cancelled {
                break;
            }
        }
    }

    let status = state.status();
    publish(&status_tx, status);
    tracing::info!(packets = status.packets_forwarded, "Relay stopped");
    status
}

fn apply_transport_event(state: &mut RelayState, event: TransportEvent) {
    match event {
        TransportEvent::State(transport_state) => state.on_transport_state(&transport_state),
        TransportEvent::SendCompleted { result, at } => state.on_send_completed(result, at),
    }
}

fn publish(status_tx: &watch::Sender<RelayStatus>, status: RelayStatus) {
    status_tx.send_if_modified(|current| {
        if *current == status {
            false
        } else {
            *current = status;
            true
        }
    });
}
