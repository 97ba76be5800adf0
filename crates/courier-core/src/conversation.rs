//! Conversation identity.
//!
//! A conversation is the two-party thread between a pair of users. Its key
//! is canonical and order-independent: both participants always resolve the
//! same [`ConversationId`] regardless of who initiated.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum user id length.
pub const MAX_USER_ID_LENGTH: usize = 64;

/// Separator between the two participant ids in a conversation key.
const PAIR_SEPARATOR: char = ':';

/// Validate a user id.
///
/// # Errors
///
/// Returns an error message if the user id is invalid.
pub fn validate_user_id(id: &str) -> Result<(), &'static str> {
    if id.is_empty() {
        return Err("User id cannot be empty");
    }
    if id.len() > MAX_USER_ID_LENGTH {
        return Err("User id too long");
    }
    if id.contains(PAIR_SEPARATOR) {
        return Err("User id cannot contain ':'");
    }
    if !id.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("User id contains invalid characters");
    }
    Ok(())
}

/// Canonical identifier for a two-party conversation.
///
/// Built from the lexicographically sorted participant pair, so
/// `for_pair(a, b) == for_pair(b, a)` for all pairs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    /// Derive the canonical conversation id for a pair of users.
    ///
    /// # Errors
    ///
    /// Returns an error message if either user id is invalid.
    pub fn for_pair(a: &str, b: &str) -> Result<Self, &'static str> {
        validate_user_id(a)?;
        validate_user_id(b)?;
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        Ok(Self(format!("{lo}{PAIR_SEPARATOR}{hi}")))
    }

    /// Parse an existing conversation key.
    ///
    /// # Errors
    ///
    /// Returns an error message if the key is not a canonical pair.
    pub fn parse(key: &str) -> Result<Self, &'static str> {
        let (lo, hi) = key
            .split_once(PAIR_SEPARATOR)
            .ok_or("Conversation id must name two participants")?;
        let id = Self::for_pair(lo, hi)?;
        if id.0 != key {
            return Err("Conversation id is not in canonical order");
        }
        Ok(id)
    }

    /// The two participants, in canonical order.
    #[must_use]
    pub fn participants(&self) -> (&str, &str) {
        // Constructed from a validated pair, the separator is always present.
        self.0.split_once(PAIR_SEPARATOR).unwrap_or((&self.0, ""))
    }

    /// Whether the given user is one of the two participants.
    #[must_use]
    pub fn involves(&self, user_id: &str) -> bool {
        let (lo, hi) = self.participants();
        lo == user_id || hi == user_id
    }

    /// The participant that is not `user_id`, if `user_id` participates.
    #[must_use]
    pub fn counterpart_of(&self, user_id: &str) -> Option<&str> {
        let (lo, hi) = self.participants();
        if lo == user_id {
            Some(hi)
        } else if hi == user_id {
            Some(lo)
        } else {
            None
        }
    }

    /// Get the key as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_is_order_independent() {
        let ab = ConversationId::for_pair("alice", "bob").unwrap();
        let ba = ConversationId::for_pair("bob", "alice").unwrap();
        assert_eq!(ab, ba);
        assert_eq!(ab.as_str(), "alice:bob");
    }

    #[test]
    fn test_participants_and_counterpart() {
        let id = ConversationId::for_pair("bob", "alice").unwrap();
        assert_eq!(id.participants(), ("alice", "bob"));
        assert_eq!(id.counterpart_of("alice"), Some("bob"));
        assert_eq!(id.counterpart_of("bob"), Some("alice"));
        assert_eq!(id.counterpart_of("carol"), None);
        assert!(id.involves("bob"));
        assert!(!id.involves("carol"));
    }

    #[test]
    fn test_user_id_validation() {
        assert!(validate_user_id("alice").is_ok());
        assert!(validate_user_id("").is_err());
        assert!(validate_user_id("with:colon").is_err());
        assert!(validate_user_id("\u{7}bell").is_err());

        let long_id = "a".repeat(MAX_USER_ID_LENGTH + 1);
        assert!(validate_user_id(&long_id).is_err());
        assert!(ConversationId::for_pair("", "bob").is_err());
    }

    #[test]
    fn test_parse_rejects_non_canonical() {
        assert!(ConversationId::parse("alice:bob").is_ok());
        assert!(ConversationId::parse("bob:alice").is_err());
        assert!(ConversationId::parse("solo").is_err());
    }
}
