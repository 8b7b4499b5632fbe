//! Heartbeat codec — compact delimited and JSON value forms.
//!
//! The store persists one value per instance heartbeat. The compact
//! form `"{index}|{STATE}|{state_timestamp}|{host_id}"` is the default
//! for throughput; the JSON form keeps every field self-describing and
//! is selectable by config for debugging.
//!
//! The compact form canonicalizes `state_timestamp` to whole seconds.
//! Sub-second drift is recoverable from any later state transition, so
//! nothing downstream depends on the fraction.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{HeartbeatEnvelope, InstanceHeartbeat, InstanceState};

/// Errors produced while encoding or decoding heartbeat payloads.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed heartbeat value: {0}")]
    Malformed(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Which value form the store writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Codec {
    #[default]
    Compact,
    Json,
}

impl Codec {
    /// Encode one instance heartbeat into its stored value.
    pub fn encode_instance(&self, heartbeat: &InstanceHeartbeat) -> String {
        match self {
            Codec::Compact => format!(
                "{}|{}|{:.0}|{}",
                heartbeat.instance_index,
                heartbeat.state,
                heartbeat.state_timestamp,
                heartbeat.host_id
            ),
            // Serialization of a derive struct cannot fail.
            Codec::Json => serde_json::to_string(heartbeat).unwrap_or_default(),
        }
    }

    /// Decode a stored value back into a heartbeat.
    ///
    /// The compact form does not carry the app or instance identity;
    /// those are recovered from the store key and passed in here. The
    /// JSON form is self-describing and ignores the key-derived hints.
    pub fn decode_instance(
        &self,
        app_id: &str,
        app_version: &str,
        instance_id: &str,
        raw: &str,
    ) -> Result<InstanceHeartbeat, CodecError> {
        match self {
            Codec::Compact => {
                let components: Vec<&str> = raw.split('|').collect();
                if components.len() != 4 {
                    return Err(CodecError::Malformed(format!(
                        "expected 4 components, got {}",
                        components.len()
                    )));
                }
                let instance_index = components[0]
                    .parse::<u32>()
                    .map_err(|e| CodecError::Malformed(format!("bad index: {e}")))?;
                let state = InstanceState::parse(components[1]).ok_or_else(|| {
                    CodecError::Malformed(format!("unknown state {:?}", components[1]))
                })?;
                let state_timestamp = components[2]
                    .parse::<f64>()
                    .map_err(|e| CodecError::Malformed(format!("bad timestamp: {e}")))?;

                Ok(InstanceHeartbeat {
                    app_id: app_id.to_string(),
                    app_version: app_version.to_string(),
                    instance_id: instance_id.to_string(),
                    instance_index,
                    state,
                    state_timestamp,
                    host_id: components[3].to_string(),
                })
            }
            Codec::Json => Ok(serde_json::from_str(raw)?),
        }
    }
}

/// Decode a `dea.heartbeat` bus payload.
///
/// The per-instance host id comes from the envelope, which is
/// authoritative over anything a droplet entry might carry.
pub fn decode_envelope(payload: &[u8]) -> Result<HeartbeatEnvelope, CodecError> {
    let mut envelope: HeartbeatEnvelope = serde_json::from_slice(payload)?;
    for instance in &mut envelope.instances {
        instance.host_id = envelope.host_id.clone();
    }
    Ok(envelope)
}

/// Encode an envelope as a `dea.heartbeat` payload.
pub fn encode_envelope(envelope: &HeartbeatEnvelope) -> Vec<u8> {
    serde_json::to_vec(envelope).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_heartbeat() -> InstanceHeartbeat {
        InstanceHeartbeat {
            app_id: "app-1".to_string(),
            app_version: "v1".to_string(),
            instance_id: "inst-1".to_string(),
            instance_index: 3,
            state: InstanceState::Running,
            state_timestamp: 100.7,
            host_id: "host-1".to_string(),
        }
    }

    #[test]
    fn compact_encodes_delimited_form() {
        let encoded = Codec::Compact.encode_instance(&test_heartbeat());
        assert_eq!(encoded, "3|RUNNING|101|host-1");
    }

    #[test]
    fn compact_round_trip_canonicalizes_timestamp() {
        let hb = test_heartbeat();
        let encoded = Codec::Compact.encode_instance(&hb);
        let decoded = Codec::Compact
            .decode_instance("app-1", "v1", "inst-1", &encoded)
            .unwrap();

        let mut expected = hb;
        expected.state_timestamp = 101.0;
        assert_eq!(decoded, expected);
    }

    #[test]
    fn compact_round_trip_integral_timestamp_is_identity() {
        let mut hb = test_heartbeat();
        hb.state_timestamp = 100.0;
        let encoded = Codec::Compact.encode_instance(&hb);
        let decoded = Codec::Compact
            .decode_instance("app-1", "v1", "inst-1", &encoded)
            .unwrap();
        assert_eq!(decoded, hb);
    }

    #[test]
    fn json_round_trip_is_identity() {
        let hb = test_heartbeat();
        let encoded = Codec::Json.encode_instance(&hb);
        // Key-derived hints are ignored by the JSON form.
        let decoded = Codec::Json
            .decode_instance("other", "other", "other", &encoded)
            .unwrap();
        assert_eq!(decoded, hb);
    }

    #[test]
    fn compact_rejects_truncated_value() {
        let err = Codec::Compact
            .decode_instance("a", "v", "i", "3|RUNNING|100")
            .unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
    }

    #[test]
    fn compact_rejects_unknown_state() {
        let err = Codec::Compact
            .decode_instance("a", "v", "i", "3|DANCING|100|host-1")
            .unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
    }

    #[test]
    fn compact_rejects_bad_index() {
        let err = Codec::Compact
            .decode_instance("a", "v", "i", "x|RUNNING|100|host-1")
            .unwrap_err();
        assert!(matches!(err, CodecError::Malformed(_)));
    }

    #[test]
    fn envelope_decode_fills_host_id() {
        let payload = br#"{
            "dea": "host-7",
            "droplets": [
                {"cc_partition": "default", "droplet": "app-1", "version": "v1",
                 "instance": "inst-1", "index": 0, "state": "RUNNING",
                 "state_timestamp": 100.0}
            ]
        }"#;

        let envelope = decode_envelope(payload).unwrap();
        assert_eq!(envelope.host_id, "host-7");
        assert_eq!(envelope.instances.len(), 1);
        assert_eq!(envelope.instances[0].host_id, "host-7");
        assert_eq!(envelope.instances[0].app_id, "app-1");
    }

    #[test]
    fn envelope_decode_rejects_garbage() {
        assert!(decode_envelope(b"not json").is_err());
        assert!(decode_envelope(br#"{"dea": 42}"#).is_err());
    }

    #[test]
    fn envelope_encode_decode_round_trip() {
        let envelope = HeartbeatEnvelope {
            host_id: "host-1".to_string(),
            instances: vec![test_heartbeat()],
        };
        let decoded = decode_envelope(&encode_envelope(&envelope)).unwrap();
        assert_eq!(decoded, envelope);
    }
}
