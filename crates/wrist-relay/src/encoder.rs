use std::fmt::Write;
use wrist_motion::MotionSample;

/// Fields per wire record: source, timestamp, then 17 floats.
pub const FIELD_COUNT: usize = 19;

/// Encode a sample as one comma-separated collector record.
///
/// Layout: `source,timestamp,secondsElapsed,rotX,rotY,rotZ,gravX,gravY,gravZ,
/// accX,accY,accZ,quatW,quatX,quatY,quatZ,pitch,roll,yaw`. The timestamp is
/// an integer; every float is written with exactly 8 fractional digits. No
/// trailing delimiter.
pub fn encode(sample: &MotionSample) -> String {
    let q = sample.quaternion;
    let floats = [
        sample.seconds_elapsed,
        sample.rotation_rate.x,
        sample.rotation_rate.y,
        sample.rotation_rate.z,
        sample.gravity.x,
        sample.gravity.y,
        sample.gravity.z,
        sample.acceleration.x,
        sample.acceleration.y,
        sample.acceleration.z,
        q.w,
        q.x,
        q.y,
        q.z,
        sample.pitch,
        sample.roll,
        sample.yaw,
    ];

    let mut record = String::with_capacity(256);
    record.push_str(&sample.source);
    let _ = write!(record, ",{}", sample.timestamp_micros);
    for v in floats {
        let _ = write!(record, ",{:.8}", v);
    }
    record
}
