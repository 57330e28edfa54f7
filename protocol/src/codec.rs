//! JSON decoding for HTTP bodies and feed frames.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

use crate::ProtocolError;

/// Largest feed frame accepted from a bundler.
pub const MAX_FEED_MESSAGE_SIZE: usize = 1024 * 1024;

/// Decode a JSON document.
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T, ProtocolError> {
    serde_json::from_slice(data).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

/// Decode a size-limited feed frame.
pub fn decode_frame<T: DeserializeOwned>(data: &[u8]) -> Result<T, ProtocolError> {
    if data.len() > MAX_FEED_MESSAGE_SIZE {
        return Err(ProtocolError::MessageTooLarge {
            size: data.len(),
            max: MAX_FEED_MESSAGE_SIZE,
        });
    }
    decode(data)
}

pub fn encode(value: &impl serde::Serialize) -> Result<Vec<u8>, ProtocolError> {
    serde_json::to_vec(value).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

/// Ledger nodes render large integers as decimal strings; some versions
/// send plain numbers. Accept both.
pub fn u64_from_str_or_num<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Str(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Num(n) => Ok(n),
        Raw::Str(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Deserialize)]
    struct Wrapper {
        #[serde(deserialize_with = "u64_from_str_or_num")]
        value: u64,
    }

    #[test]
    fn number_forms() {
        let a: Wrapper = decode(br#"{"value":"12345"}"#).unwrap();
        let b: Wrapper = decode(br#"{"value":12345}"#).unwrap();
        assert_eq!(a.value, 12345);
        assert_eq!(b.value, 12345);
        assert!(decode::<Wrapper>(br#"{"value":"x"}"#).is_err());
    }

    #[test]
    fn oversized_frame_rejected() {
        let big = vec![b' '; MAX_FEED_MESSAGE_SIZE + 1];
        assert!(matches!(
            decode_frame::<serde_json::Value>(&big),
            Err(ProtocolError::MessageTooLarge { .. })
        ));
    }
}
