use crate::PeerEvent;
use tracing::{info, warn};

/// Which end of the peer channel this process is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Wearable,
    Companion,
}

/// What the owner of the session should do after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessAction {
    None,
    /// Re-activate the session now.
    Reactivate,
}

/// Tracks `peer_reachable` from session activation and reachability events.
///
/// Runs for the life of the process; reachability is expected to flap.
#[derive(Debug)]
pub struct LivenessTracker {
    role: Role,
    peer_reachable: bool,
}

impl LivenessTracker {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            peer_reachable: false,
        }
    }

    pub fn peer_reachable(&self) -> bool {
        self.peer_reachable
    }

    /// Fold one session event into the reachable flag.
    ///
    /// Payload and send-failure events leave the flag untouched.
    pub fn apply(&mut self, event: &PeerEvent) -> LivenessAction {
        match event {
            PeerEvent::ActivationCompleted {
                activated,
                reachable,
                error,
            } => {
                self.peer_reachable = *activated && *reachable;
                match error {
                    Some(e) => warn!(role = ?self.role, error = %e, "Peer session activation error"),
                    None => info!(
                        role = ?self.role,
                        activated,
                        reachable,
                        "Peer session activated"
                    ),
                }
                LivenessAction::None
            }
            PeerEvent::ReachabilityChanged { reachable } => {
                self.peer_reachable = *reachable;
                info!(role = ?self.role, reachable, "Peer reachability changed");
                LivenessAction::None
            }
            PeerEvent::Deactivated => {
                info!(role = ?self.role, "Peer session deactivated");
                match self.role {
                    Role::Companion => LivenessAction::Reactivate,
                    Role::Wearable => LivenessAction::None,
                }
            }
            PeerEvent::MessageReceived(_) | PeerEvent::SendFailed(_) => LivenessAction::None,
        }
    }
}
