pub mod payload;
pub mod simulated;
pub mod types;

use anyhow::Result;
use std::time::Duration;
use tokio::sync::mpsc;

pub use payload::Payload;
pub use simulated::SimulatedMotion;
pub use types::{Attitude, MotionReading, MotionSample};

/// Trait for motion-sensing capabilities.
///
/// A source pushes one [`MotionReading`] per interval onto the receiver
/// returned by `start_updates` until `stop_updates` is called.
pub trait MotionSource: Send {
    /// Whether the device can produce motion readings at all.
    fn is_available(&self) -> bool;

    /// Begin the update stream at the given cadence.
    fn start_updates(&mut self, interval: Duration) -> Result<mpsc::UnboundedReceiver<MotionReading>>;

    /// Halt the update stream. No-op if not started.
    fn stop_updates(&mut self);
}

/// Current wall clock in microseconds since the Unix epoch.
pub fn wall_clock_micros() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros() as i64)
        .unwrap_or(0)
}
