use std::fmt;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Handle of one remote command invocation, assigned by the exec service.
///
/// The wire carries it as a decimal string (`"cmdID": "12"`), some responses as
/// a bare number. Both decode to the same value here and nowhere else.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandId(u64);

impl CommandId {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid command id: {0:?}")]
pub struct ParseCommandIdError(String);

impl FromStr for CommandId {
    type Err = ParseCommandIdError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        raw.trim()
            .parse::<u64>()
            .map(CommandId)
            .map_err(|_| ParseCommandIdError(raw.to_string()))
    }
}

impl Serialize for CommandId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CommandId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct CommandIdVisitor;

        impl Visitor<'_> for CommandIdVisitor {
            type Value = CommandId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a command id as a string or non-negative integer")
            }

            fn visit_u64<E: de::Error>(self, value: u64) -> Result<CommandId, E> {
                Ok(CommandId(value))
            }

            fn visit_i64<E: de::Error>(self, value: i64) -> Result<CommandId, E> {
                u64::try_from(value)
                    .map(CommandId)
                    .map_err(|_| E::custom(format!("negative command id: {value}")))
            }

            fn visit_str<E: de::Error>(self, value: &str) -> Result<CommandId, E> {
                value.parse().map_err(E::custom)
            }
        }

        deserializer.deserialize_any(CommandIdVisitor)
    }
}

/// Stable identifier of a cross SDK.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SdkId(Uuid);

impl SdkId {
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for SdkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SdkId {
    type Err = uuid::Error;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(raw.trim()).map(SdkId)
    }
}
