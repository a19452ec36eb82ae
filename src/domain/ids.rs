use std::fmt;

use serde::{Deserialize, Serialize};

const TEMP_ID_PREFIX: &str = "temp-";

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(pub String);

impl ConversationId {
    #[cfg_attr(not(test), allow(dead_code))]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    #[cfg_attr(not(test), allow(dead_code))]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identity of a message inside one conversation.
///
/// Locally created messages carry a `Temp` id until the server assigns the
/// permanent one; after that the temporary id must not be used again.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MessageId {
    Server(String),
    Temp(u64),
}

impl MessageId {
    pub fn server(value: impl Into<String>) -> Self {
        Self::Server(value.into())
    }

    pub fn is_temporary(&self) -> bool {
        matches!(self, Self::Temp(_))
    }

    /// Parses the textual form produced by `Display`.
    pub fn parse(raw: &str) -> Self {
        raw.strip_prefix(TEMP_ID_PREFIX)
            .and_then(|seq| seq.parse::<u64>().ok())
            .map(Self::Temp)
            .unwrap_or_else(|| Self::Server(raw.to_owned()))
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server(id) => f.write_str(id),
            Self::Temp(seq) => write!(f, "{TEMP_ID_PREFIX}{seq}"),
        }
    }
}

impl Serialize for MessageId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for MessageId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_id_round_trips_through_display() {
        let id = MessageId::Temp(7);

        assert_eq!(id.to_string(), "temp-7");
        assert_eq!(MessageId::parse("temp-7"), id);
    }

    #[test]
    fn non_numeric_temp_prefix_is_a_server_id() {
        assert_eq!(
            MessageId::parse("temp-abc"),
            MessageId::Server("temp-abc".to_owned())
        );
    }

    #[test]
    fn server_ids_are_not_temporary() {
        assert!(!MessageId::server("m-1").is_temporary());
        assert!(MessageId::Temp(1).is_temporary());
    }
}
