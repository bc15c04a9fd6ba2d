//! Wolf Forms test utilities.
//!
//! Helpers for integration testing: record and rule fixtures, a fast
//! CSRF secret hasher, and tracing setup.

use std::sync::Arc;

use rand::RngCore;
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use wolf_forms::error::CsrfError;
use wolf_forms::{CsrfConfig, CsrfManager, Record, SecretHasher};

/// Install a test subscriber honoring `RUST_LOG`. Safe to call repeatedly.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Build a record from a JSON object literal.
///
/// # Panics
///
/// Panics if `value` is not an object.
pub fn record(value: Value) -> Record {
    match value {
        Value::Object(map) => map,
        other => panic!("record fixture must be a JSON object, got {other}"),
    }
}

/// Rules for a contact form touching every built-in validator.
pub fn contact_form_rules() -> Value {
    json!([
        {"name": {"required": true, "type": "str", "min_length": 2, "max_length": 40}},
        {"email": {"required": true, "type": "email"}},
        {"age": {"type": "int", "expression": "field_value >= 18"}},
        {"phone": {"regex_search": "^[0-9-]+$"}},
    ])
}

/// A submission that passes [`contact_form_rules`].
pub fn valid_contact() -> Record {
    record(json!({
        "name": "Ada",
        "email": "ada@example.com",
        "age": 36,
        "phone": "555-0100",
    }))
}

/// Salted SHA-256, far cheaper than Argon2 for tests.
///
/// Stored form is `{salt}${digest}`, both hex encoded.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256Hasher;

impl Sha256Hasher {
    fn digest(salt: &str, secret: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(salt.as_bytes());
        hasher.update(secret.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl SecretHasher for Sha256Hasher {
    fn hash(&self, secret: &str) -> Result<String, CsrfError> {
        let mut salt = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut salt);
        let salt = hex::encode(salt);
        let digest = Self::digest(&salt, secret);
        Ok(format!("{salt}${digest}"))
    }

    fn verify(&self, hash: &str, secret: &str) -> bool {
        hash.split_once('$')
            .is_some_and(|(salt, digest)| Self::digest(salt, secret) == digest)
    }
}

/// CSRF manager using [`Sha256Hasher`]. Call from within a Tokio runtime.
pub fn fast_csrf(config: CsrfConfig) -> Result<CsrfManager, CsrfError> {
    CsrfManager::with_hasher(config, Arc::new(Sha256Hasher))
}
