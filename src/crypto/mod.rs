//! Encryption codec
//!
//! Symmetric AES-256-GCM encryption of share payloads. Payloads above the
//! configured inline threshold are split into fixed-size parts, each sealed
//! independently, so peak memory per encryption step stays bounded and huge
//! files never hold the key schedule hostage in one giant seal.
//!
//! The round-trip guarantee is exact: `open(seal(x)) == x` byte-for-byte for
//! any input, chunked or not.

mod kdf;

pub use kdf::{derive_key, generate_salt, DerivedKey};

use crate::config::ChunkConfig;
use crate::error::{Error, Result};
use rand::RngCore;
use ring::aead::{Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM, NONCE_LEN};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// AES-256 key size in bytes
pub const KEY_SIZE: usize = 32;

/// Argon2 salt size in bytes
pub const SALT_SIZE: usize = 16;

/// One independently sealed piece of ciphertext
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SealedPart {
    /// Random nonce used for this part
    pub nonce: [u8; NONCE_LEN],
    /// Ciphertext with appended authentication tag
    pub data: Vec<u8>,
}

/// Ciphertext representation stored in a share record
///
/// The `Chunked` variant tags payloads that were split before sealing;
/// opening detects the tag and reassembles parts in order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum CipherPayload {
    /// Whole payload sealed in one piece
    Inline(SealedPart),
    /// Payload split into fixed-size parts, sealed independently
    Chunked {
        /// Original plaintext size
        plain_size: u64,
        /// Ordered encrypted parts
        parts: Vec<SealedPart>,
    },
}

impl CipherPayload {
    /// Total stored ciphertext size in bytes
    pub fn stored_size(&self) -> u64 {
        match self {
            CipherPayload::Inline(part) => part.data.len() as u64,
            CipherPayload::Chunked { parts, .. } => {
                parts.iter().map(|p| p.data.len() as u64).sum()
            }
        }
    }

    /// Number of sealed parts
    pub fn part_count(&self) -> usize {
        match self {
            CipherPayload::Inline(_) => 1,
            CipherPayload::Chunked { parts, .. } => parts.len(),
        }
    }
}

/// Symmetric codec over a 256-bit key
pub struct CipherEngine {
    /// Key material (zeroized on drop)
    key: Zeroizing<[u8; KEY_SIZE]>,
    /// Chunking thresholds
    chunk: ChunkConfig,
}

impl CipherEngine {
    /// Create an engine from raw key material
    pub fn new(key: &[u8], chunk: ChunkConfig) -> Result<Self> {
        if key.len() != KEY_SIZE {
            return Err(Error::InvalidKey(format!(
                "Key must be {} bytes, got {}",
                KEY_SIZE,
                key.len()
            )));
        }

        let mut material = Zeroizing::new([0u8; KEY_SIZE]);
        material.copy_from_slice(key);

        Ok(CipherEngine {
            key: material,
            chunk,
        })
    }

    /// Create an engine from a derived key
    pub fn from_derived(key: &DerivedKey, chunk: ChunkConfig) -> Result<Self> {
        Self::new(key.key(), chunk)
    }

    /// Encrypt a payload of arbitrary length
    ///
    /// Payloads above the inline threshold are split into chunk-sized parts
    /// and sealed independently.
    pub fn encrypt(&self, payload: &[u8]) -> Result<CipherPayload> {
        if payload.len() <= self.chunk.inline_threshold {
            return Ok(CipherPayload::Inline(self.seal(payload)?));
        }

        let mut parts = Vec::with_capacity(payload.len().div_ceil(self.chunk.chunk_size));
        for piece in payload.chunks(self.chunk.chunk_size) {
            parts.push(self.seal(piece)?);
        }

        Ok(CipherPayload::Chunked {
            plain_size: payload.len() as u64,
            parts,
        })
    }

    /// Decrypt a ciphertext representation back to the original payload
    ///
    /// Never yields partial data: any failed part fails the whole operation.
    pub fn decrypt(&self, payload: &CipherPayload) -> Result<Vec<u8>> {
        match payload {
            CipherPayload::Inline(part) => self.open(part),
            CipherPayload::Chunked { plain_size, parts } => {
                let mut out = Vec::with_capacity(*plain_size as usize);
                for part in parts {
                    out.extend_from_slice(&self.open(part)?);
                }
                if out.len() as u64 != *plain_size {
                    return Err(Error::CorruptCiphertext(format!(
                        "Reassembled {} bytes, expected {}",
                        out.len(),
                        plain_size
                    )));
                }
                Ok(out)
            }
        }
    }

    /// Seal one piece with a fresh random nonce
    fn seal(&self, plaintext: &[u8]) -> Result<SealedPart> {
        let key = self.aead_key()?;

        let mut nonce = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce);

        let mut data = plaintext.to_vec();
        key.seal_in_place_append_tag(
            Nonce::assume_unique_for_key(nonce),
            Aad::empty(),
            &mut data,
        )
        .map_err(|_| Error::CorruptCiphertext("Seal failed".to_string()))?;

        Ok(SealedPart { nonce, data })
    }

    /// Open one sealed piece
    fn open(&self, part: &SealedPart) -> Result<Vec<u8>> {
        let key = self.aead_key()?;

        let mut data = part.data.clone();
        let plaintext = key
            .open_in_place(
                Nonce::assume_unique_for_key(part.nonce),
                Aad::empty(),
                &mut data,
            )
            .map_err(|_| {
                Error::CorruptCiphertext("Authentication failed".to_string())
            })?;

        Ok(plaintext.to_vec())
    }

    fn aead_key(&self) -> Result<LessSafeKey> {
        let unbound = UnboundKey::new(&AES_256_GCM, self.key.as_ref())
            .map_err(|_| Error::InvalidKey("Rejected by AEAD".to_string()))?;
        Ok(LessSafeKey::new(unbound))
    }
}

/// BLAKE3 hash of a payload, hex-encoded
///
/// Stored alongside the ciphertext so decryption can verify the reassembled
/// plaintext end to end.
pub fn content_hash(data: &[u8]) -> String {
    blake3::hash(data).to_hex().to_string()
}
