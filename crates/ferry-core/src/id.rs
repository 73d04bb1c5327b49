//! Identity types for Ferry
//!
//! Subscribers and objects are addressed by 64-bit handles. Namespace
//! tokens are 128-bit so they cannot be guessed by another subscriber.

use std::fmt;

use rand::Rng;

/// Subscriber identity - one receiving endpoint
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct SubscriberId(pub u64);

impl SubscriberId {
    #[inline]
    pub fn new(id: u64) -> Self {
        SubscriberId(id)
    }

    #[inline]
    pub fn to_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    #[inline]
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        SubscriberId(u64::from_le_bytes(bytes))
    }
}

impl fmt::Debug for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Subscriber({})", self.0)
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Object handle - identity of a placement object inside the transport
///
/// Two handles are equal only when they name the very same object; a clone
/// always gets a fresh handle.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ObjectId(pub u64);

impl ObjectId {
    pub const ZERO: ObjectId = ObjectId(0);

    #[inline]
    pub fn new(id: u64) -> Self {
        ObjectId(id)
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Object({:016x})", self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Namespace token - the unguessable name of a subscriber's root namespace
///
/// A new token is drawn every time a root namespace is created, so a
/// reconnecting subscriber never sees its previous token again.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NamespaceToken(pub u128);

impl NamespaceToken {
    /// Draw a fresh token from the thread-local CSPRNG
    pub fn generate() -> Self {
        NamespaceToken(rand::thread_rng().gen())
    }

    /// Parse the 32-digit hex form produced by `Display`
    pub fn parse(s: &str) -> Option<Self> {
        if s.len() != 32 || !s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return None;
        }
        u128::from_str_radix(s, 16).ok().map(NamespaceToken)
    }

    /// Name used for the root placement object
    pub fn object_name(&self) -> String {
        self.to_string()
    }
}

impl fmt::Debug for NamespaceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Only a prefix; the full token is a capability.
        write!(f, "Token({:08x}..)", (self.0 >> 96) as u32)
    }
}

impl fmt::Display for NamespaceToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscriber_id_roundtrip() {
        let id = SubscriberId::new(0xDEADBEEF_CAFEBABE);
        assert_eq!(SubscriberId::from_bytes(id.to_bytes()), id);
    }

    #[test]
    fn test_token_display_is_fixed_width() {
        let token = NamespaceToken(0xAB);
        let name = token.object_name();

        assert_eq!(name.len(), 32);
        assert!(name.ends_with("ab"));
        assert_eq!(NamespaceToken::parse(&name), Some(token));
    }

    #[test]
    fn test_token_parse_rejects_short_names() {
        assert_eq!(NamespaceToken::parse("chairs"), None);
        assert_eq!(NamespaceToken::parse(""), None);
    }

    #[test]
    fn test_token_parse_accepts_only_display_form() {
        let token = NamespaceToken(0xabc);
        let name = token.to_string();
        assert_eq!(NamespaceToken::parse(&name), Some(token));

        assert_eq!(NamespaceToken::parse(&name.to_uppercase()), None);
        let signed = format!("+{}", &name[1..]);
        assert_eq!(NamespaceToken::parse(&signed), None);
        assert_eq!(NamespaceToken::parse(&format!("{}g", &name[1..])), None);
    }

    #[test]
    fn test_generated_tokens_differ() {
        let a = NamespaceToken::generate();
        let b = NamespaceToken::generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_token_debug_hides_full_value() {
        let token = NamespaceToken(u128::MAX);
        let debug = format!("{:?}", token);
        assert!(!debug.contains(&token.to_string()));
    }
}
