//! Keyed peer-channel payload for [`MotionSample`].
//!
//! The peer channel carries samples as a flat JSON object mapping field names
//! to numbers. Decoding is lenient: a missing or non-numeric field becomes
//! 0.0 and unknown keys are ignored, so a partial message still yields a
//! complete sample.

use crate::types::MotionSample;
use glam::{DQuat, DVec3};
use serde_json::{Map, Value};

/// String-keyed payload as it travels over the peer channel.
pub type Payload = Map<String, Value>;

pub mod keys {
    pub const SOURCE: &str = "source";
    pub const TIMESTAMP: &str = "timestamp";
    pub const SECONDS_ELAPSED: &str = "seconds_elapsed";
    pub const ROTATION_RATE: [&str; 3] = ["rotationRateX", "rotationRateY", "rotationRateZ"];
    pub const GRAVITY: [&str; 3] = ["gravityX", "gravityY", "gravityZ"];
    pub const ACCELERATION: [&str; 3] = ["accelerationX", "accelerationY", "accelerationZ"];
    pub const QUATERNION: [&str; 4] = ["quaternionW", "quaternionX", "quaternionY", "quaternionZ"];
    pub const PITCH: &str = "pitch";
    pub const ROLL: &str = "roll";
    pub const YAW: &str = "yaw";
}

impl MotionSample {
    /// Build the keyed payload sent to the peer.
    pub fn to_payload(&self) -> Payload {
        let mut map = Map::new();
        map.insert(keys::SOURCE.into(), Value::from(self.source.as_str()));
        map.insert(keys::TIMESTAMP.into(), Value::from(self.timestamp_micros));
        map.insert(keys::SECONDS_ELAPSED.into(), Value::from(self.seconds_elapsed));
        insert_vec3(&mut map, &keys::ROTATION_RATE, self.rotation_rate);
        insert_vec3(&mut map, &keys::GRAVITY, self.gravity);
        insert_vec3(&mut map, &keys::ACCELERATION, self.acceleration);
        let q = self.quaternion;
        for (key, v) in keys::QUATERNION.iter().zip([q.w, q.x, q.y, q.z]) {
            map.insert((*key).into(), Value::from(v));
        }
        map.insert(keys::PITCH.into(), Value::from(self.pitch));
        map.insert(keys::ROLL.into(), Value::from(self.roll));
        map.insert(keys::YAW.into(), Value::from(self.yaw));
        map
    }

    /// Rebuild a sample from a received payload, defaulting absent fields.
    ///
    /// `default_source` is used when the payload carries no `source` string.
    pub fn from_payload(payload: &Payload, default_source: &str) -> Self {
        let source = payload
            .get(keys::SOURCE)
            .and_then(Value::as_str)
            .unwrap_or(default_source);

        let timestamp_micros = payload
            .get(keys::TIMESTAMP)
            .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f.trunc() as i64)))
            .unwrap_or(0);

        let elapsed = number(payload, keys::SECONDS_ELAPSED);
        if elapsed < 0.0 {
            tracing::debug!(elapsed, "Negative seconds_elapsed in payload, discarding sign");
        }

        Self {
            source: source.to_owned(),
            timestamp_micros,
            seconds_elapsed: elapsed.abs(),
            rotation_rate: vec3(payload, &keys::ROTATION_RATE),
            gravity: vec3(payload, &keys::GRAVITY),
            acceleration: vec3(payload, &keys::ACCELERATION),
            quaternion: {
                let [w, x, y, z] = keys::QUATERNION.map(|k| number(payload, k));
                DQuat::from_xyzw(x, y, z, w)
            },
            pitch: number(payload, keys::PITCH),
            roll: number(payload, keys::ROLL),
            yaw: number(payload, keys::YAW),
        }
    }
}

fn insert_vec3(map: &mut Payload, keys: &[&str; 3], v: DVec3) {
    for (key, c) in keys.iter().zip([v.x, v.y, v.z]) {
        map.insert((*key).into(), Value::from(c));
    }
}

fn number(payload: &Payload, key: &str) -> f64 {
    payload.get(key).and_then(Value::as_f64).unwrap_or(0.0)
}

fn vec3(payload: &Payload, keys: &[&str; 3]) -> DVec3 {
    let [x, y, z] = keys.map(|k| number(payload, k));
    DVec3::new(x, y, z)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Payload {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[test]
    fn payload_carries_every_field() {
        let mut sample = MotionSample::zeroed("WATCH");
        sample.timestamp_micros = 1_700_000_000_123_456;
        sample.seconds_elapsed = 3.25;
        sample.rotation_rate = DVec3::new(0.1, -0.2, 0.3);
        sample.quaternion = DQuat::from_xyzw(0.1, 0.2, 0.3, 0.9);
        sample.yaw = -1.5;

        let payload = sample.to_payload();
        assert_eq!(payload.len(), 19);
        assert_eq!(payload["timestamp"], json!(1_700_000_000_123_456_i64));
        assert_eq!(payload["quaternionW"], json!(0.9));

        let decoded = MotionSample::from_payload(&payload, "OTHER");
        assert_eq!(decoded, sample);
    }

    #[test]
    fn missing_keys_default_to_zero() {
        let payload = object(json!({ "rotationRateX": 1.5, "pitch": 0.5 }));
        let sample = MotionSample::from_payload(&payload, "WATCH");

        assert_eq!(sample.source, "WATCH");
        assert_eq!(sample.timestamp_micros, 0);
        assert_eq!(sample.rotation_rate, DVec3::new(1.5, 0.0, 0.0));
        assert_eq!(sample.gravity, DVec3::ZERO);
        assert_eq!(sample.quaternion, DQuat::from_xyzw(0.0, 0.0, 0.0, 0.0));
        assert_eq!(sample.pitch, 0.5);
        assert_eq!(sample.yaw, 0.0);
    }

    #[test]
    fn non_numeric_values_default_to_zero() {
        let payload = object(json!({
            "source": 12,
            "gravityZ": "down",
            "roll": null,
            "yaw": 0.25,
            "unexpected": [1, 2, 3],
        }));
        let sample = MotionSample::from_payload(&payload, "WATCH");

        assert_eq!(sample.source, "WATCH");
        assert_eq!(sample.gravity.z, 0.0);
        assert_eq!(sample.roll, 0.0);
        assert_eq!(sample.yaw, 0.25);
    }

    #[test]
    fn fractional_timestamp_is_truncated() {
        let payload = object(json!({ "timestamp": 1_700_000_000_000_001.9_f64 }));
        let sample = MotionSample::from_payload(&payload, "WATCH");
        // f64 cannot hold every microsecond at this magnitude; truncation
        // must still land on an integer within one ulp.
        assert!((sample.timestamp_micros - 1_700_000_000_000_001).abs() <= 1);
    }

    #[test]
    fn negative_elapsed_is_made_positive() {
        let payload = object(json!({ "seconds_elapsed": -2.0 }));
        let sample = MotionSample::from_payload(&payload, "WATCH");
        assert_eq!(sample.seconds_elapsed, 2.0);
    }
}
