//! Peer channel between the wearable and its companion.
//!
//! One [`PeerSession`] per process carries keyed payloads over a local TCP
//! link as newline-delimited JSON objects. Link transitions are reported as
//! [`PeerEvent`]s, which a [`LivenessTracker`] folds into a single
//! `peer_reachable` flag.

pub mod frame;
pub mod liveness;
pub mod session;

pub use frame::{decode_frame, encode_frame};
pub use liveness::{LivenessAction, LivenessTracker, Role};
pub use session::PeerSession;

use serde_json::{Map, Value};
use thiserror::Error;

/// String-keyed message as carried by the peer channel.
pub type PeerPayload = Map<String, Value>;

/// Notifications delivered by a peer session.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerEvent {
    /// The session finished (re)activating.
    ActivationCompleted {
        activated: bool,
        reachable: bool,
        error: Option<String>,
    },
    /// The peer came or went.
    ReachabilityChanged { reachable: bool },
    /// The session went inactive and accepts no peer until re-activated.
    Deactivated,
    /// A payload arrived from the peer.
    MessageReceived(PeerPayload),
    /// An outbound payload could not be delivered and was dropped.
    SendFailed(String),
}

/// Outbound side of a peer channel.
pub trait PeerChannel: Send {
    /// Queue a payload for the peer. Never blocks; failures come back as
    /// [`PeerEvent::SendFailed`].
    fn send(&self, payload: PeerPayload);

    /// Re-activate the channel after a deactivation.
    fn activate(&self);

    /// Tear the channel down.
    fn shutdown(&self);
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("Failed to bind peer listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Peer I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Malformed peer frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Peer frame is not a JSON object")]
    NotAnObject,
}
