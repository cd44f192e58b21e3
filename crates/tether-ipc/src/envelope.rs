//! Envelope - the wire struct carried by every `postMessage`
//!
//! Encoded as a JSON object:
//!
//! ```text
//! {"tag":"echo","id":3,"isResponse":false,"deleteCB":false,"data":"aGVsbG8="}
//! ```
//!
//! `data` is base64 (standard alphabet) or `null`. Decoding also accepts a
//! plain array of byte values, which is what a JS producer gets from
//! `JSON.stringify(Array.from(bytes))`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Tag;

/// Envelope codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    /// The bytes were not a valid envelope object
    #[error("malformed envelope: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Tagged, correlated message.
///
/// Payload convention: requests always carry `Some(bytes)`, possibly empty.
/// Replies may carry `None` for "no error, no payload". The two stay distinct
/// on the wire (`""` versus `null`).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub tag: Tag,
    /// Correlation ID, unique per (endpoint, tag) among outstanding requests
    pub id: u64,
    #[serde(rename = "isResponse", default)]
    pub is_response: bool,
    /// Receiver should drop the callback registration once delivered.
    /// Always set on responses, never on requests.
    #[serde(rename = "deleteCB", default)]
    pub delete_after_receipt: bool,
    #[serde(with = "payload", default)]
    pub data: Option<Vec<u8>>,
}

impl Envelope {
    /// Build a request envelope (dispatched to the remote handler for `tag`)
    pub fn request(tag: Tag, id: u64, data: Vec<u8>) -> Self {
        Self {
            tag,
            id,
            is_response: false,
            delete_after_receipt: false,
            data: Some(data),
        }
    }

    /// Build the response to a request carrying `tag` and `id`
    pub fn response(tag: Tag, id: u64, data: Option<Vec<u8>>) -> Self {
        Self {
            tag,
            id,
            is_response: true,
            delete_after_receipt: true,
            data,
        }
    }

    /// Payload length in bytes (0 when absent)
    pub fn payload_len(&self) -> usize {
        self.data.as_ref().map(Vec::len).unwrap_or(0)
    }
}

/// Serialize an envelope to JSON bytes
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
    Ok(serde_json::to_vec(envelope)?)
}

/// Deserialize an envelope from JSON bytes
pub fn decode(bytes: &[u8]) -> Result<Envelope, CodecError> {
    Ok(serde_json::from_slice(bytes)?)
}

mod payload {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Base64(String),
        Bytes(Vec<u8>),
    }

    pub fn serialize<S: Serializer>(data: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match data {
            Some(bytes) => s.serialize_str(&STANDARD.encode(bytes)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        match Option::<Repr>::deserialize(d)? {
            Some(Repr::Base64(text)) => STANDARD.decode(text).map(Some).map_err(D::Error::custom),
            Some(Repr::Bytes(bytes)) => Ok(Some(bytes)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(name: &str) -> Tag {
        Tag::new(name).unwrap()
    }

    #[test]
    fn test_round_trip_preserves_payloads() {
        for payload in [Vec::new(), b"hello".to_vec(), (0u8..=255).collect()] {
            let env = Envelope::request(tag("echo"), 42, payload);
            assert_eq!(decode(&encode(&env).unwrap()).unwrap(), env);
        }
    }

    #[test]
    fn test_empty_and_absent_stay_distinct() {
        let empty = Envelope::response(tag("get"), 1, Some(Vec::new()));
        let absent = Envelope::response(tag("get"), 1, None);

        let empty_json: serde_json::Value = serde_json::from_slice(&encode(&empty).unwrap()).unwrap();
        let absent_json: serde_json::Value = serde_json::from_slice(&encode(&absent).unwrap()).unwrap();
        assert_eq!(empty_json["data"], "");
        assert!(absent_json["data"].is_null());

        assert_eq!(decode(&encode(&empty).unwrap()).unwrap().data, Some(Vec::new()));
        assert_eq!(decode(&encode(&absent).unwrap()).unwrap().data, None);
    }

    #[test]
    fn test_wire_field_names() {
        let env = Envelope::response(tag("log"), 9, Some(b"x".to_vec()));
        let json: serde_json::Value = serde_json::from_slice(&encode(&env).unwrap()).unwrap();
        assert_eq!(json["tag"], "log");
        assert_eq!(json["id"], 9);
        assert_eq!(json["isResponse"], true);
        assert_eq!(json["deleteCB"], true);
        assert_eq!(json["data"], "eA==");
    }

    #[test]
    fn test_decode_accepts_byte_array_and_missing_flags() {
        let env = decode(br#"{"tag":"echo","id":5,"data":[104,105]}"#).unwrap();
        assert_eq!(env.data, Some(b"hi".to_vec()));
        assert!(!env.is_response);
        assert!(!env.delete_after_receipt);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode(b"not json").is_err());
        assert!(decode(br#"{"id":1}"#).is_err());
        assert!(decode(br#"{"tag":"t","id":1,"data":"%%%"}"#).is_err());
    }
}
