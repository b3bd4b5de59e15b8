use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Salted SHA-256 digest of the shared admin secret. The plaintext is never
/// stored, and `Debug` output is redacted.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CredentialHash {
    salt: String,
    digest: String,
}

fn digest(salt: &str, secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(secret.as_bytes());
    format!("{:x}", hasher.finalize())
}

impl CredentialHash {
    pub fn new(secret: &str) -> Self {
        let salt = uuid::Uuid::new_v4().simple().to_string();
        let digest = digest(&salt, secret);
        Self { salt, digest }
    }

    pub fn verify(&self, secret: &str) -> bool {
        let candidate = digest(&self.salt, secret);
        constant_time_eq(candidate.as_bytes(), self.digest.as_bytes())
    }
}

impl fmt::Debug for CredentialHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialHash")
            .field("salt", &self.salt)
            .field("digest", &"<redacted>")
            .finish()
    }
}

fn constant_time_eq(left: &[u8], right: &[u8]) -> bool {
    if left.len() != right.len() {
        return false;
    }
    left.iter()
        .zip(right)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}
