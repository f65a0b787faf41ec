//! Deploy-time authoring layer: the serde process model, YAML parsing,
//! validation and conversion to the executable definition graph.

pub mod build;
pub mod dto;
pub mod validate;
pub mod yaml;

use sha2::{Digest, Sha256};

/// Hex SHA-256 over the canonical JSON form of a model. Used to skip
/// redeploying unchanged definitions.
pub fn checksum(model: &dto::ProcessModel) -> String {
    let canonical = serde_json::to_vec(model).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::dto::ProcessModelBuilder;
    use super::*;

    #[test]
    fn test_checksum_tracks_content() {
        let a = ProcessModelBuilder::new("p").start("s").end("e").flow("s", "e").build();
        let b = a.clone();
        let c = ProcessModelBuilder::new("p").start("s").end("f").flow("s", "f").build();
        assert_eq!(checksum(&a), checksum(&b));
        assert_ne!(checksum(&a), checksum(&c));
        assert_eq!(checksum(&a).len(), 64);
    }
}
