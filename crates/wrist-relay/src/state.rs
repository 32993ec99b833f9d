use crate::encoder::encode;
use crate::rate::RateWindow;
use crate::transport::TransportState;
use std::time::Instant;
use wrist_link::{LivenessAction, LivenessTracker, PeerEvent, Role};
use wrist_motion::MotionSample;

/// Externally observable relay state.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RelayStatus {
    pub peer_reachable: bool,
    pub collector_reachable: bool,
    pub packets_forwarded: u64,
    /// Completed sends per second over the rate window; 0.0 until defined.
    pub data_rate: f64,
}

/// What the relay should do in response to an inbound peer event.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerOutcome {
    Nothing,
    /// Re-activate the peer session.
    Reactivate,
    /// Hand this datagram to the transport.
    Send(Vec<u8>),
}

/// All mutable relay state, owned by one task.
#[derive(Debug)]
pub struct RelayState {
    default_source: String,
    liveness: LivenessTracker,
    collector_reachable: bool,
    packets_forwarded: u64,
    rate: RateWindow,
}

impl RelayState {
    pub fn new(default_source: impl Into<String>, rate: RateWindow) -> Self {
        Self {
            default_source: default_source.into(),
            liveness: LivenessTracker::new(Role::Companion),
            collector_reachable: false,
            packets_forwarded: 0,
            rate,
        }
    }

    pub fn on_peer_event(&mut self, event: PeerEvent) -> PeerOutcome {
        match event {
            PeerEvent::MessageReceived(payload) => {
                tracing::trace!("Received motion data from wearable");
                let sample = MotionSample::from_payload(&payload, &self.default_source);
                match self.forward(&sample) {
                    Some(datagram) => PeerOutcome::Send(datagram),
                    None => PeerOutcome::Nothing,
                }
            }
            PeerEvent::SendFailed(e) => {
                tracing::warn!(error = %e, "Message to wearable not delivered");
                PeerOutcome::Nothing
            }
            other => match self.liveness.apply(&other) {
                LivenessAction::Reactivate => PeerOutcome::Reactivate,
                LivenessAction::None => PeerOutcome::Nothing,
            },
        }
    }

    /// Encode `sample` for the collector, if the transport is ready.
    pub fn forward(&self, sample: &MotionSample) -> Option<Vec<u8>> {
        if !self.collector_reachable {
            tracing::debug!("Cannot forward: UDP connection not ready");
            return None;
        }
        Some(encode(sample).into_bytes())
    }

    pub fn on_transport_state(&mut self, state: &TransportState) {
        match state {
            TransportState::Ready => self.collector_reachable = true,
            TransportState::Failed(e) => {
                tracing::warn!(error = %e, "Collector transport failed");
                self.collector_reachable = false;
            }
            TransportState::Cancelled => self.collector_reachable = false,
            TransportState::Unready => {}
        }
    }

    /// Send failures are logged only; they never demote `collector_reachable`.
    pub fn on_send_completed(&mut self, result: Result<(), String>, at: Instant) {
        match result {
            Ok(()) => {
                self.packets_forwarded += 1;
                self.rate.record(at);
                if self.packets_forwarded % 1000 == 0 {
                    tracing::debug!(packets = self.packets_forwarded, "Packets forwarded");
                }
            }
            Err(e) => tracing::warn!(error = %e, "UDP send error"),
        }
    }

    /// Age the rate window to `now`. Called periodically so that a stall
    /// shows up as the rate dropping to 0.
    pub fn refresh_rate(&mut self, now: Instant) {
        self.rate.evict(now);
    }

    pub fn status(&self) -> RelayStatus {
        RelayStatus {
            peer_reachable: self.liveness.peer_reachable(),
            collector_reachable: self.collector_reachable,
            packets_forwarded: self.packets_forwarded,
            data_rate: self.rate.rate().unwrap_or(0.0),
        }
    }
}
