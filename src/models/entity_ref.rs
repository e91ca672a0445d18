use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Typed reference to an entity in the document store.
///
/// Ids arrive at the HTTP boundary in several shapes: raw numbers, raw
/// strings, nested `{ "id": ... }` relationship objects, and composite
/// strings with a colon-suffixed qualifier (`"42:rev3"`). Every boundary
/// goes through this one parser instead of normalizing ad hoc.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityRef {
    Numeric(i64),
    Text(String),
    Invalid,
}

impl EntityRef {
    /// Parse any JSON value an id can arrive as.
    pub fn parse(value: &Value) -> EntityRef {
        match value {
            Value::Number(n) => n.as_i64().map(EntityRef::Numeric).unwrap_or(EntityRef::Invalid),
            Value::String(s) => Self::parse_str(s),
            Value::Object(map) => map.get("id").map(Self::parse).unwrap_or(EntityRef::Invalid),
            _ => EntityRef::Invalid,
        }
    }

    /// Parse a string form: numeric, composite ("42:rev3" keeps the part
    /// before the colon), or plain text.
    pub fn parse_str(raw: &str) -> EntityRef {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return EntityRef::Invalid;
        }
        let head = trimmed.split(':').next().unwrap_or(trimmed);
        if let Ok(n) = head.parse::<i64>() {
            return EntityRef::Numeric(n);
        }
        EntityRef::Text(head.to_string())
    }

    pub fn is_valid(&self) -> bool {
        !matches!(self, EntityRef::Invalid)
    }

    /// Canonical string key used for store lookups and map keys.
    pub fn key(&self) -> Option<String> {
        match self {
            EntityRef::Numeric(n) => Some(n.to_string()),
            EntityRef::Text(s) => Some(s.clone()),
            EntityRef::Invalid => None,
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityRef::Numeric(n) => write!(f, "{}", n),
            EntityRef::Text(s) => write!(f, "{}", s),
            EntityRef::Invalid => write!(f, "<invalid>"),
        }
    }
}

impl std::str::FromStr for EntityRef {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse_str(s))
    }
}
