//! Render identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Length of the random part of a render ID.
const RANDOM_PART_LEN: usize = 10;

/// Error returned when a string is not a usable render ID.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderIdError {
    #[error("render id is empty")]
    Empty,

    #[error("render id contains reserved character {0:?}: {1}")]
    ReservedCharacter(char, String),
}

/// How long a render folder should live before bucket lifecycle rules expire it.
///
/// The expiry is carried as a prefix of the render ID itself, so a lifecycle
/// rule on `renders/{prefix}` covers every render created with that expiry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RenderExpiryDays {
    #[serde(rename = "1-day")]
    OneDay,
    #[serde(rename = "3-days")]
    ThreeDays,
    #[serde(rename = "7-days")]
    SevenDays,
    #[serde(rename = "30-days")]
    ThirtyDays,
}

impl RenderExpiryDays {
    pub const ALL: [RenderExpiryDays; 4] = [
        RenderExpiryDays::OneDay,
        RenderExpiryDays::ThreeDays,
        RenderExpiryDays::SevenDays,
        RenderExpiryDays::ThirtyDays,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RenderExpiryDays::OneDay => "1-day",
            RenderExpiryDays::ThreeDays => "3-days",
            RenderExpiryDays::SevenDays => "7-days",
            RenderExpiryDays::ThirtyDays => "30-days",
        }
    }
}

/// Unique identifier for a render job.
///
/// A random lowercase alphanumeric token, optionally prefixed with a
/// [`RenderExpiryDays`] marker (`7-days-k3j9x0a1bz`). Never contains `/` or
/// `:`, which delimit storage keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RenderId(String);

impl RenderId {
    /// Generate a new random render ID without an expiry prefix.
    pub fn new() -> Self {
        Self(random_part())
    }

    /// Generate a new random render ID whose folder expires after `expiry`.
    pub fn with_expiry(expiry: RenderExpiryDays) -> Self {
        Self(format!("{}-{}", expiry.as_str(), random_part()))
    }

    /// Validate and wrap an existing ID.
    pub fn parse(s: impl Into<String>) -> Result<Self, RenderIdError> {
        let s = s.into();
        if s.is_empty() {
            return Err(RenderIdError::Empty);
        }
        if let Some(c) = s.chars().find(|c| matches!(c, '/' | ':') || c.is_whitespace()) {
            return Err(RenderIdError::ReservedCharacter(c, s));
        }
        Ok(Self(s))
    }

    /// The lifecycle expiry encoded in this ID, if any.
    pub fn expiry(&self) -> Option<RenderExpiryDays> {
        RenderExpiryDays::ALL
            .into_iter()
            .find(|e| self.0.starts_with(&format!("{}-", e.as_str())))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn random_part() -> String {
    let mut s = Uuid::new_v4().simple().to_string();
    s.truncate(RANDOM_PART_LEN);
    s
}

impl Default for RenderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RenderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RenderId {
    type Err = RenderIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RenderId {
    type Error = RenderIdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl From<RenderId> for String {
    fn from(id: RenderId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_ids_are_distinct_and_valid() {
        let a = RenderId::new();
        let b = RenderId::new();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), RANDOM_PART_LEN);
        assert!(RenderId::parse(a.as_str()).is_ok());
        assert_eq!(a.expiry(), None);
    }

    #[test]
    fn test_expiry_prefix() {
        let id = RenderId::with_expiry(RenderExpiryDays::SevenDays);
        assert!(id.as_str().starts_with("7-days-"));
        assert_eq!(id.expiry(), Some(RenderExpiryDays::SevenDays));
    }

    #[test]
    fn test_reserved_characters_rejected() {
        assert_eq!(RenderId::parse(""), Err(RenderIdError::Empty));
        assert!(matches!(
            RenderId::parse("abc/def"),
            Err(RenderIdError::ReservedCharacter('/', _))
        ));
        assert!(matches!(
            RenderId::parse("abc:def"),
            Err(RenderIdError::ReservedCharacter(':', _))
        ));
    }

    #[test]
    fn test_serde_validates() {
        let id: RenderId = serde_json::from_str("\"abcdef\"").unwrap();
        assert_eq!(id.as_str(), "abcdef");
        assert!(serde_json::from_str::<RenderId>("\"a/b\"").is_err());
    }
}
