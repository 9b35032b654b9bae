//! Control-message protocol
//!
//! Small typed protocol coordinating mute/camera state between peers
//! without a renegotiation, plus free-form text and binary payloads.
//! Wire format is JSON tagged by `kind`; binary payloads are base64 inside
//! the JSON envelope.

use serde::{Deserialize, Serialize};

/// A message exchanged over the control channel
///
/// Delivery is best-effort: there is no acknowledgement or retry at this
/// layer, and channel closure is the only failure signal. Peers must ignore
/// kinds they do not recognize (deserialization failure), so new kinds can
/// be added without breaking older peers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "payload", rename_all = "kebab-case")]
pub enum ControlMessage {
    /// Local microphone stopped; peer should suppress audio rendering
    Mute,

    /// Local microphone re-acquired
    Unmute,

    /// Local camera re-acquired
    CameraOn,

    /// Local camera stopped; peer should suppress the frozen last frame
    CameraOff,

    /// Free-form text payload
    Text(String),

    /// Free-form binary payload
    #[serde(with = "base64_bytes")]
    Binary(Vec<u8>),
}

impl ControlMessage {
    /// Wire tag of this message's kind
    pub fn kind(&self) -> &'static str {
        match self {
            ControlMessage::Mute => "mute",
            ControlMessage::Unmute => "unmute",
            ControlMessage::CameraOn => "camera-on",
            ControlMessage::CameraOff => "camera-off",
            ControlMessage::Text(_) => "text",
            ControlMessage::Binary(_) => "binary",
        }
    }

    /// Serialize for transmission over the data channel.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize a received payload.
    ///
    /// Fails for malformed JSON and for unknown kinds; callers treat that
    /// as "ignore this message".
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Base64 (de)serialization for binary payloads inside the JSON envelope
mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags() {
        assert_eq!(ControlMessage::Mute.kind(), "mute");
        assert_eq!(ControlMessage::CameraOff.kind(), "camera-off");
        assert_eq!(ControlMessage::Text("hi".into()).kind(), "text");
    }

    #[test]
    fn test_wire_format_is_kind_tagged() {
        let bytes = ControlMessage::CameraOn.to_bytes().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["kind"], "camera-on");
    }

    #[test]
    fn test_text_round_trip() {
        let msg = ControlMessage::Text("hello there".to_string());
        let decoded = ControlMessage::from_bytes(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn test_binary_is_base64_on_the_wire() {
        let msg = ControlMessage::Binary(vec![0xDE, 0xAD, 0xBE, 0xEF]);
        let bytes = msg.to_bytes().unwrap();

        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["kind"], "binary");
        assert_eq!(json["payload"], "3q2+7w==");

        let decoded = ControlMessage::from_bytes(&bytes).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn test_unknown_kind_fails_to_parse() {
        // Forward compatibility: a newer peer may send kinds we don't know;
        // the dispatcher drops them instead of crashing.
        let result = ControlMessage::from_bytes(br#"{"kind":"hologram-on"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_malformed_payload_fails_to_parse() {
        assert!(ControlMessage::from_bytes(b"not json").is_err());
        assert!(ControlMessage::from_bytes(br#"{"kind":"binary","payload":"%%%"}"#).is_err());
    }
}
