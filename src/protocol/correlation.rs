//! Request-ID generation.
//!
//! Request/response pairing relies solely on the `requestID` field, so IDs
//! must stay unique for the lifetime of their pending entry. Both parties
//! generate IDs independently; the role prefix keeps their ID spaces
//! disjoint.

use std::fmt;

use uuid::Uuid;

/// Source of fresh, engine-local request IDs.
#[derive(Debug, Clone)]
pub struct RequestIdSource {
    prefix: String,
}

impl RequestIdSource {
    /// Create a source generating IDs with the given role prefix.
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Generate a fresh request ID.
    pub fn generate(&self) -> String {
        format!("{}{}", self.prefix, Uuid::new_v4().simple())
    }

    /// The role prefix applied to generated IDs.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

impl fmt::Display for RequestIdSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestIdSource({}*)", self.prefix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_ids_carry_prefix() {
        let ids = RequestIdSource::new("emitter-");
        let id = ids.generate();
        assert!(id.starts_with("emitter-"));
        assert!(id.len() > "emitter-".len());
    }

    #[test]
    fn test_generated_ids_are_unique() {
        let ids = RequestIdSource::new("channel-");
        let first = ids.generate();
        let second = ids.generate();
        assert_ne!(first, second);
    }
}
