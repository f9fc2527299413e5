//! Declaration hashing for change detection.
//!
//! Attribute bags are hashed over their canonical JSON form (keys sorted),
//! so two bags with the same content always hash the same regardless of the
//! order they were declared in.

use sha2::{Digest, Sha256};

use crate::model::{Attributes, Ensure};

use super::spec::Manifest;

/// Hasher for manifests and attribute bags.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeclarationHasher;

impl DeclarationHasher {
    /// Creates a new hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a fingerprint of the entire manifest's declarations.
    #[must_use]
    pub fn hash_manifest(&self, manifest: &Manifest) -> String {
        let mut hasher = Sha256::new();

        hasher.update(manifest.project.name.as_bytes());
        hasher.update(manifest.project.environment.as_bytes());

        // Resources sorted by identity for determinism
        let mut resources: Vec<_> = manifest.resources.iter().collect();
        resources.sort_by(|a, b| (&a.kind, &a.name).cmp(&(&b.kind, &b.name)));

        for decl in resources {
            hasher.update(decl.kind.as_bytes());
            hasher.update([0u8]);
            hasher.update(decl.name.as_bytes());
            hasher.update(if decl.ensure == Ensure::Present { [1u8] } else { [0u8] });

            let mut deps: Vec<_> = decl.depends_on.iter().collect();
            deps.sort();
            for dep in deps {
                hasher.update(dep.as_bytes());
                hasher.update([0u8]);
            }

            // BTreeMap serializes in key order
            if let Ok(json) = serde_json::to_vec(&decl.attributes) {
                hasher.update(&json);
            }
        }

        hex::encode(hasher.finalize())
    }

    /// Computes the hash of a resolved attribute bag.
    #[must_use]
    pub fn hash_attributes(&self, attributes: &Attributes) -> String {
        let mut hasher = Sha256::new();
        if let Ok(json) = serde_json::to_vec(attributes) {
            hasher.update(&json);
        }
        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }

    /// Compares two hashes to determine if they are equal.
    #[must_use]
    pub fn hashes_match(hash1: &str, hash2: &str) -> bool {
        hash1.len() == hash2.len()
            && hash1
                .bytes()
                .zip(hash2.bytes())
                .fold(0u8, |acc, (a, b)| acc | (a ^ b))
                == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceDecl;
    use serde_json::json;

    #[test]
    fn test_attribute_hash_is_order_independent() {
        let hasher = DeclarationHasher::new();

        let mut a = Attributes::new();
        a.insert(String::from("name"), json!("x"));
        a.insert(String::from("location"), json!("US"));

        let mut b = Attributes::new();
        b.insert(String::from("location"), json!("US"));
        b.insert(String::from("name"), json!("x"));

        assert_eq!(hasher.hash_attributes(&a), hasher.hash_attributes(&b));
    }

    #[test]
    fn test_attribute_change_changes_hash() {
        let hasher = DeclarationHasher::new();

        let mut a = Attributes::new();
        a.insert(String::from("name"), json!("x"));
        let mut b = a.clone();
        b.insert(String::from("name"), json!("y"));

        assert_ne!(hasher.hash_attributes(&a), hasher.hash_attributes(&b));
    }

    #[test]
    fn test_manifest_hash_ignores_declaration_order() {
        let hasher = DeclarationHasher::new();
        let bucket = ResourceDecl::new("Bucket", "artifacts").with_attribute("name", json!("x"));
        let service = ResourceDecl::new("Service", "api");

        let m1 = Manifest::new("nl-to-iac", vec![bucket.clone(), service.clone()]);
        let m2 = Manifest::new("nl-to-iac", vec![service, bucket]);

        assert_eq!(hasher.hash_manifest(&m1), hasher.hash_manifest(&m2));
    }

    #[test]
    fn test_short_hash() {
        let hasher = DeclarationHasher::new();
        let short = hasher.short_hash("abcdef1234567890");
        assert_eq!(short, "abcdef12");
    }

    #[test]
    fn test_hashes_match() {
        assert!(DeclarationHasher::hashes_match("abc123", "abc123"));
        assert!(!DeclarationHasher::hashes_match("abc123", "abc124"));
        assert!(!DeclarationHasher::hashes_match("abc123", "abc12"));
    }
}
