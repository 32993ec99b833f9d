use crate::{LinkError, PeerPayload};
use serde_json::Value;

/// Serialize a payload as one `\n`-terminated line.
pub fn encode_frame(payload: &PeerPayload) -> Result<String, LinkError> {
    let mut line = serde_json::to_string(payload)?;
    line.push('\n');
    Ok(line)
}

/// Parse one received line (terminator optional) into a payload.
pub fn decode_frame(line: &str) -> Result<PeerPayload, LinkError> {
    match serde_json::from_str::<Value>(line.trim_end())? {
        Value::Object(map) => Ok(map),
        _ => Err(LinkError::NotAnObject),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn frame_is_single_line() {
        let mut payload = PeerPayload::new();
        payload.insert("source".into(), json!("WATCH"));
        payload.insert("pitch".into(), json!(0.5));

        let line = encode_frame(&payload).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        assert_eq!(decode_frame(&line).unwrap(), payload);
    }

    #[test]
    fn rejects_non_objects() {
        assert!(matches!(decode_frame("[1,2,3]"), Err(LinkError::NotAnObject)));
        assert!(matches!(decode_frame("42\n"), Err(LinkError::NotAnObject)));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(decode_frame("{\"pitch\": "), Err(LinkError::Json(_))));
    }
}
