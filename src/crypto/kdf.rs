//! Service key derivation using Argon2id
//!
//! The share engine encrypts every payload under one master key derived from
//! a deployment secret. Argon2id keeps offline guessing expensive if the
//! durable store leaks without the secret.

use crate::config::EncryptionConfig;
use crate::crypto::{KEY_SIZE, SALT_SIZE};
use crate::error::{Error, Result};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use zeroize::Zeroizing;

/// Derived master key with the salt that produced it
#[derive(Clone)]
pub struct DerivedKey {
    /// Key material (zeroized on drop)
    key: Zeroizing<[u8; KEY_SIZE]>,
    /// Salt used for derivation
    salt: [u8; SALT_SIZE],
}

impl DerivedKey {
    /// Get the key bytes
    pub fn key(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    /// Get the salt, for persisting alongside the configuration
    pub fn salt(&self) -> &[u8; SALT_SIZE] {
        &self.salt
    }
}

/// Derive the service master key from a deployment secret
///
/// A salt is generated when none is supplied; reuse the persisted salt to
/// re-derive the same key across restarts.
pub fn derive_key(
    secret: &[u8],
    salt: Option<&[u8]>,
    config: &EncryptionConfig,
) -> Result<DerivedKey> {
    if secret.is_empty() {
        return Err(Error::KeyDerivation(
            "Deployment secret must not be empty".to_string(),
        ));
    }

    let mut salt_bytes = [0u8; SALT_SIZE];
    match salt {
        Some(s) if s.len() >= SALT_SIZE => {
            salt_bytes.copy_from_slice(&s[..SALT_SIZE]);
        }
        Some(s) => {
            return Err(Error::KeyDerivation(format!(
                "Salt too short: {} bytes, need {}",
                s.len(),
                SALT_SIZE
            )));
        }
        None => {
            rand::thread_rng().fill_bytes(&mut salt_bytes);
        }
    }

    let params = Params::new(
        config.argon2_memory_kib,
        config.argon2_iterations,
        config.argon2_parallelism,
        Some(KEY_SIZE),
    )
    .map_err(|e| Error::KeyDerivation(format!("Invalid Argon2 parameters: {}", e)))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let mut key_bytes = Zeroizing::new([0u8; KEY_SIZE]);
    argon2
        .hash_password_into(secret, &salt_bytes, key_bytes.as_mut())
        .map_err(|e| Error::KeyDerivation(format!("Derivation failed: {}", e)))?;

    Ok(DerivedKey {
        key: key_bytes,
        salt: salt_bytes,
    })
}

/// Generate a random salt
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}
