pub mod events;
pub mod hub;

pub use events::{DeadLetterRecord, EventEnvelope, PlayerUpdate, ScoreUpdate};
pub use hub::{
    EventTypeName, HubClientMessage, HubServerMessage, SubscriptionChange, SubscriptionKind,
    UserPreferences,
};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Open key/value mapping carried by events and player statistics.
///
/// A `BTreeMap` keeps the serialized key order stable.
pub type Metadata = BTreeMap<String, MetadataValue>;

/// Scalar value stored in a [`Metadata`] mapping.
///
/// Serialized untagged, so `{"onTarget": true, "playerIn": 231}` maps to
/// `Bool(true)` and `Int(231)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetadataValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl MetadataValue {
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            MetadataValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetadataValue::Text(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            MetadataValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl From<bool> for MetadataValue {
    fn from(value: bool) -> Self {
        MetadataValue::Bool(value)
    }
}

impl From<i64> for MetadataValue {
    fn from(value: i64) -> Self {
        MetadataValue::Int(value)
    }
}

impl From<u32> for MetadataValue {
    fn from(value: u32) -> Self {
        MetadataValue::Int(i64::from(value))
    }
}

impl From<f64> for MetadataValue {
    fn from(value: f64) -> Self {
        MetadataValue::Float(value)
    }
}

impl From<&str> for MetadataValue {
    fn from(value: &str) -> Self {
        MetadataValue::Text(value.to_string())
    }
}

impl From<String> for MetadataValue {
    fn from(value: String) -> Self {
        MetadataValue::Text(value)
    }
}

/// Generates a contract enum that serializes by name and deserializes from
/// either its name (any letter case) or its numeric wire code.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($variant:ident = $code:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant = $code),+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => stringify!($variant)),+
                }
            }

            pub fn code(&self) -> i64 {
                *self as i64
            }

            pub fn from_code(code: i64) -> Option<Self> {
                match code {
                    $($code => Some($name::$variant),)+
                    _ => None,
                }
            }

            pub fn from_name(name: &str) -> Option<Self> {
                Self::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str().eq_ignore_ascii_case(name))
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                #[derive(Deserialize)]
                #[serde(untagged)]
                enum Repr {
                    Code(i64),
                    Name(String),
                }

                match Repr::deserialize(deserializer)? {
                    Repr::Code(code) => $name::from_code(code).ok_or_else(|| {
                        serde::de::Error::custom(format!(
                            "unknown {} code {}",
                            stringify!($name),
                            code
                        ))
                    }),
                    Repr::Name(name) => $name::from_name(&name).ok_or_else(|| {
                        serde::de::Error::custom(format!(
                            "unknown {} `{}`",
                            stringify!($name),
                            name
                        ))
                    }),
                }
            }
        }
    };
}

wire_enum! {
    /// Lifecycle status of a match.
    MatchStatus {
        Scheduled = 0,
        Live = 1,
        HalfTime = 2,
        Finished = 3,
        Postponed = 4,
        Cancelled = 5,
    }
}

wire_enum! {
    /// Kind of in-match occurrence carried by an [`EventEnvelope`].
    EventType {
        MatchStart = 1,
        Goal = 2,
        Card = 3,
        Substitution = 4,
        HalfTime = 5,
        FullTime = 6,
        Assist = 7,
        Shot = 8,
        Corner = 9,
        Foul = 10,
    }
}

impl MatchStatus {
    /// Whether a match in this status belongs in the live-match index.
    pub fn is_in_play(&self) -> bool {
        matches!(self, MatchStatus::Live | MatchStatus::HalfTime)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enum_accepts_name_or_code() {
        let by_name: MatchStatus = serde_json::from_str("\"halftime\"").unwrap();
        let by_code: MatchStatus = serde_json::from_str("2").unwrap();
        assert_eq!(by_name, MatchStatus::HalfTime);
        assert_eq!(by_code, MatchStatus::HalfTime);
        assert_eq!(serde_json::to_string(&EventType::FullTime).unwrap(), "\"FullTime\"");
        assert!(serde_json::from_str::<EventType>("11").is_err());
        assert!(serde_json::from_str::<EventType>("\"Penalty\"").is_err());
    }

    #[test]
    fn test_metadata_value_scalars() {
        let meta: Metadata =
            serde_json::from_str(r#"{"a":true,"b":7,"c":1.5,"d":"header"}"#).unwrap();
        assert_eq!(meta["a"], MetadataValue::Bool(true));
        assert_eq!(meta["b"], MetadataValue::Int(7));
        assert_eq!(meta["c"], MetadataValue::Float(1.5));
        assert_eq!(meta["d"].as_str(), Some("header"));
        assert_eq!(
            serde_json::to_string(&meta).unwrap(),
            r#"{"a":true,"b":7,"c":1.5,"d":"header"}"#
        );
    }
}
