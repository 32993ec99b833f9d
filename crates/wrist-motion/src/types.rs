use glam::{DQuat, DVec3, EulerRot};

/// Device attitude: quaternion plus its Euler projection.
#[derive(Debug, Clone, Copy)]
pub struct Attitude {
    pub quaternion: DQuat,
    /// Rotation about the device X axis (radians).
    pub pitch: f64,
    /// Rotation about the device Y axis (radians).
    pub roll: f64,
    /// Rotation about the device Z axis (radians).
    pub yaw: f64,
}

impl Attitude {
    /// Derive pitch/roll/yaw from a unit quaternion (Z-X-Y intrinsic order).
    pub fn from_quaternion(quaternion: DQuat) -> Self {
        let (yaw, pitch, roll) = quaternion.to_euler(EulerRot::ZXY);
        Self {
            quaternion,
            pitch,
            roll,
            yaw,
        }
    }
}

impl Default for Attitude {
    fn default() -> Self {
        Self::from_quaternion(DQuat::IDENTITY)
    }
}

/// One reading delivered by a motion source.
#[derive(Debug, Clone, Copy, Default)]
pub struct MotionReading {
    /// Angular velocity (rad/s).
    pub rotation_rate: DVec3,
    /// Gravity direction in the device frame (g).
    pub gravity: DVec3,
    /// Acceleration with gravity removed (g).
    pub user_acceleration: DVec3,
    pub attitude: Attitude,
}

/// The unit of transport between the wearable and the collector.
#[derive(Debug, Clone, PartialEq)]
pub struct MotionSample {
    /// Producer tag.
    pub source: String,
    /// Wall clock at capture, microseconds since the Unix epoch.
    pub timestamp_micros: i64,
    /// Time since the recording session started. Never negative.
    pub seconds_elapsed: f64,
    pub rotation_rate: DVec3,
    pub gravity: DVec3,
    pub acceleration: DVec3,
    pub quaternion: DQuat,
    pub pitch: f64,
    pub roll: f64,
    pub yaw: f64,
}

impl MotionSample {
    /// A sample with every numeric field set to zero, quaternion included.
    pub fn zeroed(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            timestamp_micros: 0,
            seconds_elapsed: 0.0,
            rotation_rate: DVec3::ZERO,
            gravity: DVec3::ZERO,
            acceleration: DVec3::ZERO,
            quaternion: DQuat::from_xyzw(0.0, 0.0, 0.0, 0.0),
            pitch: 0.0,
            roll: 0.0,
            yaw: 0.0,
        }
    }

    pub fn from_reading(
        source: impl Into<String>,
        reading: &MotionReading,
        timestamp_micros: i64,
        seconds_elapsed: f64,
    ) -> Self {
        Self {
            source: source.into(),
            timestamp_micros,
            seconds_elapsed: seconds_elapsed.abs(),
            rotation_rate: reading.rotation_rate,
            gravity: reading.gravity,
            acceleration: reading.user_acceleration,
            quaternion: reading.attitude.quaternion,
            pitch: reading.attitude.pitch,
            roll: reading.attitude.roll,
            yaw: reading.attitude.yaw,
        }
    }
}
