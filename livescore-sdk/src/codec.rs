//! JSON encoding and tolerant decoding of topic payloads.
//!
//! Encoding always produces camelCase field names. Decoding accepts any
//! letter case for top-level field names (`MatchId`, `matchid`, `matchId`)
//! by rewriting them to the canonical spelling before typed decoding.
//! Nested maps such as `metadata` are left untouched.

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// A contract type with a fixed set of top-level field names.
pub trait WireSchema: DeserializeOwned {
    /// Canonical (camelCase) top-level field names.
    const FIELDS: &'static [&'static str];
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload is not a JSON object")]
    NotAnObject,
}

/// Serialize a contract value to its JSON wire form.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(value)
}

/// Decode a payload into `T`, matching field names case-insensitively.
pub fn decode<T: WireSchema>(payload: &[u8]) -> Result<T, DecodeError> {
    let value: serde_json::Value = serde_json::from_slice(payload)?;
    let serde_json::Value::Object(object) = value else {
        return Err(DecodeError::NotAnObject);
    };

    let normalized: serde_json::Map<String, serde_json::Value> = object
        .into_iter()
        .map(|(key, value)| (canonical_field::<T>(key), value))
        .collect();

    Ok(serde_json::from_value(serde_json::Value::Object(normalized))?)
}

fn canonical_field<T: WireSchema>(key: String) -> String {
    T::FIELDS
        .iter()
        .find(|field| field.eq_ignore_ascii_case(&key))
        .map(|field| (*field).to_string())
        .unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::{MatchStatus, ScoreUpdate};

    #[test]
    fn test_decode_ignores_field_case() {
        let payload = br#"{
            "MatchId": 9,
            "HOMESCORE": 2,
            "awayscore": 1,
            "Minute": 61,
            "Status": 1,
            "Timestamp": "2024-05-01T12:00:00Z"
        }"#;
        let update: ScoreUpdate = decode(payload).unwrap();
        assert_eq!(update.match_id, 9);
        assert_eq!(update.home_score, 2);
        assert_eq!(update.away_score, 1);
        assert_eq!(update.status, MatchStatus::Live);
    }

    #[test]
    fn test_decode_rejects_wrong_shape() {
        assert!(matches!(
            decode::<ScoreUpdate>(b"[1,2,3]"),
            Err(DecodeError::NotAnObject)
        ));
        assert!(matches!(
            decode::<ScoreUpdate>(b"{not json"),
            Err(DecodeError::Json(_))
        ));
        // Missing required fields fail typed decoding.
        assert!(matches!(
            decode::<ScoreUpdate>(br#"{"matchId": 1}"#),
            Err(DecodeError::Json(_))
        ));
    }
}
