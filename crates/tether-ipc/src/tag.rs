//! Tag and channel naming types

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Prefix of every reserved tag. Application tags may not start with it.
pub const RESERVED_PREFIX: &str = "__tether/";

/// Errors from building an application tag
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TagError {
    /// Tag name was empty
    #[error("tag name is empty")]
    Empty,
    /// Tag name used the reserved prefix
    #[error("tag '{0}' uses the reserved prefix '__tether/'")]
    Reserved(String),
}

/// Identifies a message kind (operation name).
///
/// Compared by value. Deserialization does not re-check the reserved prefix,
/// since reserved tags must travel over the wire too.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(String);

impl Tag {
    /// Build an application tag.
    pub fn new(name: impl Into<String>) -> Result<Self, TagError> {
        let name = name.into();
        if name.is_empty() {
            return Err(TagError::Empty);
        }
        if name.starts_with(RESERVED_PREFIX) {
            return Err(TagError::Reserved(name));
        }
        Ok(Self(name))
    }

    pub(crate) fn reserved(name: &str) -> Self {
        Self(format!("{}{}", RESERVED_PREFIX, name))
    }

    /// Whether this tag belongs to the reserved protocol namespace
    pub fn is_reserved(&self) -> bool {
        self.0.starts_with(RESERVED_PREFIX)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for Tag {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for Tag {
    type Error = TagError;

    fn try_from(name: &str) -> Result<Self, Self::Error> {
        Tag::new(name)
    }
}

/// Name of a bridged channel (a secondary port between two contexts)
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelName(String);

impl ChannelName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChannelName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Opaque key the broker attaches to a channel handoff.
///
/// The core never interprets it; receivers use it to tell apart several
/// channels brokered for the same purpose.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoutingKey(String);

impl RoutingKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoutingKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_rejects_empty_and_reserved() {
        assert_eq!(Tag::new(""), Err(TagError::Empty));
        assert_eq!(
            Tag::new("__tether/anything"),
            Err(TagError::Reserved("__tether/anything".into()))
        );
        // Only the exact prefix is reserved
        assert!(Tag::new("__tetherish").is_ok());
    }

    #[test]
    fn test_tag_compared_by_value() {
        let a = Tag::new("storage/get").unwrap();
        let b = Tag::try_from("storage/get").unwrap();
        assert_eq!(a, b);
        assert!(!a.is_reserved());
        assert_eq!(a.to_string(), "storage/get");
    }

    #[test]
    fn test_reserved_tag_deserializes() {
        let tag: Tag = serde_json::from_str("\"__tether/ready\"").unwrap();
        assert!(tag.is_reserved());
    }
}
