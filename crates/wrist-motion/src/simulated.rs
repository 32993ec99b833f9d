use crate::types::{Attitude, MotionReading};
use crate::MotionSource;
use anyhow::Result;
use glam::{DQuat, DVec3, EulerRot};
use std::f64::consts::TAU;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::info;

/// Synthetic wrist motion for hosts without motion hardware.
///
/// Produces a slow pitch/roll oscillation with a drifting yaw. Rotation rate
/// is differentiated from consecutive attitudes and gravity is the world
/// down vector seen from the device frame, so every field of a reading is
/// consistent with the others.
pub struct SimulatedMotion {
    task: Option<tokio::task::JoinHandle<()>>,
}

impl SimulatedMotion {
    pub fn new() -> Self {
        Self { task: None }
    }
}

impl Default for SimulatedMotion {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SimulatedMotion {
    fn drop(&mut self) {
        self.stop_updates();
    }
}

impl MotionSource for SimulatedMotion {
    fn is_available(&self) -> bool {
        true
    }

    fn start_updates(&mut self, interval: Duration) -> Result<mpsc::UnboundedReceiver<MotionReading>> {
        self.stop_updates();

        let (tx, rx) = mpsc::unbounded_channel();
        self.task = Some(tokio::spawn(simulate(tx, interval)));
        info!(interval_ms = interval.as_millis() as u64, "Simulated motion started");
        Ok(rx)
    }

    fn stop_updates(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            info!("Simulated motion stopped");
        }
    }
}

async fn simulate(tx: mpsc::UnboundedSender<MotionReading>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let start = Instant::now();
    let mut previous: Option<(f64, DQuat)> = None;

    loop {
        ticker.tick().await;
        let t = start.elapsed().as_secs_f64();
        let quaternion = attitude_at(t);

        let rotation_rate = match previous {
            Some((t0, q0)) if t > t0 => {
                let (axis, angle) = (q0.inverse() * quaternion).to_axis_angle();
                axis * (angle / (t - t0))
            }
            _ => DVec3::ZERO,
        };
        previous = Some((t, quaternion));

        let reading = MotionReading {
            rotation_rate,
            gravity: quaternion.inverse() * DVec3::NEG_Z,
            user_acceleration: DVec3::new(
                0.02 * (TAU * 1.1 * t).sin(),
                0.015 * (TAU * 0.7 * t).cos(),
                0.01 * (TAU * 1.9 * t).sin(),
            ),
            attitude: Attitude::from_quaternion(quaternion),
        };

        if tx.send(reading).is_err() {
            break;
        }
    }
}

fn attitude_at(t: f64) -> DQuat {
    let pitch = 0.6 * (TAU * 0.5 * t).sin();
    let roll = 0.4 * (TAU * 0.3 * t).sin();
    let yaw = (0.2 * t) % TAU;
    DQuat::from_euler(EulerRot::ZXY, yaw, pitch, roll)
}
