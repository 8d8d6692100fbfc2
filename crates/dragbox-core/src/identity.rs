//! Per-session client identity.

use crate::color::Color;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ephemeral identifier of one client session.
///
/// The same value is installed as the Loro peer id, so it is both the presence
/// key and the tie-breaker for concurrent document writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(pub u64);

impl ClientId {
    /// Generate a random client id.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        // Loro reserves u64::MAX as a sentinel peer id.
        Self(rng.random_range(0..u64::MAX))
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Immutable identity of the local client for the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    client_id: ClientId,
    color: Color,
}

impl Identity {
    pub fn new(client_id: ClientId, color: Color) -> Self {
        Self { client_id, color }
    }

    /// Generate a fresh random id and a light display color.
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        Self::new(ClientId::random(&mut rng), Color::random_light(&mut rng))
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn color(&self) -> Color {
        self.color
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_identities_differ() {
        let a = Identity::generate();
        let b = Identity::generate();
        assert_ne!(a.client_id(), b.client_id());
    }

    #[test]
    fn test_client_id_serializes_as_number() {
        let json = serde_json::to_string(&ClientId(42)).unwrap();
        assert_eq!(json, "42");
        let back: ClientId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ClientId(42));
    }
}
