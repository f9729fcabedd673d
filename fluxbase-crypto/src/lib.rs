#![deny(missing_docs)]
//! `CryptoBox` — authenticated symmetric encryption for fluxbase secret values.
//!
//! Wraps AES-256-GCM (via the `aes-gcm` crate) behind a small opaque-string
//! API: [`CryptoBox::seal`] returns base64 of `nonce ‖ ciphertext ‖ tag`,
//! [`CryptoBox::open`] reverses it. The 32-byte key itself is supplied by a
//! [`MasterKeySource`] so callers can swap env/file/KMS-backed sources
//! without touching the encryption code.
//!
//! Decrypting with the wrong key, or corrupt ciphertext, is a fatal error
//! class (spec §7) — callers should not retry it, only alarm on it.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroizing;

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// Errors from `CryptoBox` operations.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum CryptoBoxError {
    /// The supplied key was not exactly 32 bytes.
    #[error("master key must be {KEY_LEN} bytes, got {0}")]
    BadKeyLength(usize),

    /// The opaque string was not valid base64.
    #[error("invalid ciphertext encoding: {0}")]
    BadEncoding(String),

    /// The opaque string was shorter than a nonce, i.e. not produced by `seal`.
    #[error("ciphertext too short to contain a nonce")]
    Truncated,

    /// Decryption failed: wrong key or corrupted/tampered ciphertext.
    ///
    /// Fatal per spec §7 — never silently retried, the caller should treat
    /// this as a configuration or storage-corruption incident.
    #[error("decryption failed: wrong key or corrupt ciphertext")]
    WrongKeyOrCorrupt,
}

/// Supplies the 32-byte AES-256-GCM key used by a [`CryptoBox`].
///
/// Implementations: read from an env var, read from a mounted file, or (with
/// the `envelope` feature) unwrap a data-encryption key through a
/// `neuron_crypto::CryptoProvider` so the raw key never sits in process
/// memory for longer than one `seal`/`open` call.
pub trait MasterKeySource: Send + Sync {
    /// Return the current 32-byte master key.
    fn current_key(&self) -> Result<Zeroizing<[u8; KEY_LEN]>, CryptoBoxError>;
}

/// A `MasterKeySource` holding a fixed in-memory key.
///
/// Suitable for tests and for keys sourced from env/file at startup.
pub struct StaticKeySource {
    key: Zeroizing<[u8; KEY_LEN]>,
}

impl StaticKeySource {
    /// Build a source from an exact 32-byte key.
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        Self {
            key: Zeroizing::new(key),
        }
    }

    /// Build a source from a byte slice, validating its length.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoBoxError> {
        if bytes.len() != KEY_LEN {
            return Err(CryptoBoxError::BadKeyLength(bytes.len()));
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(bytes);
        Ok(Self::new(key))
    }
}

impl MasterKeySource for StaticKeySource {
    fn current_key(&self) -> Result<Zeroizing<[u8; KEY_LEN]>, CryptoBoxError> {
        Ok(Zeroizing::new(*self.key))
    }
}

/// Authenticated symmetric encryption for opaque byte payloads.
///
/// Every call to [`CryptoBox::seal`] draws a fresh random nonce; ciphertexts
/// from the same plaintext are never identical.
pub struct CryptoBox<K: MasterKeySource> {
    key_source: K,
}

impl<K: MasterKeySource> CryptoBox<K> {
    /// Build a box around the given key source.
    pub fn new(key_source: K) -> Self {
        Self { key_source }
    }

    /// Encrypt `plaintext`, returning the base64-encoded opaque string
    /// spec §6 describes (`nonce ‖ ciphertext ‖ tag`, base64).
    pub fn seal(&self, plaintext: &[u8]) -> Result<String, CryptoBoxError> {
        let key = self.key_source.current_key()?;
        let cipher = Aes256Gcm::new_from_slice(key.as_slice())
            .map_err(|_| CryptoBoxError::BadKeyLength(key.len()))?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| CryptoBoxError::WrongKeyOrCorrupt)?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(B64.encode(blob))
    }

    /// Encrypt a UTF-8 string. Convenience wrapper over [`CryptoBox::seal`].
    pub fn seal_str(&self, plaintext: &str) -> Result<String, CryptoBoxError> {
        self.seal(plaintext.as_bytes())
    }

    /// Decrypt an opaque string produced by [`CryptoBox::seal`].
    pub fn open(&self, opaque: &str) -> Result<Zeroizing<Vec<u8>>, CryptoBoxError> {
        let blob = B64
            .decode(opaque)
            .map_err(|e| CryptoBoxError::BadEncoding(e.to_string()))?;
        if blob.len() < NONCE_LEN {
            return Err(CryptoBoxError::Truncated);
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);

        let key = self.key_source.current_key()?;
        let cipher = Aes256Gcm::new_from_slice(key.as_slice())
            .map_err(|_| CryptoBoxError::BadKeyLength(key.len()))?;
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| CryptoBoxError::WrongKeyOrCorrupt)?;
        Ok(Zeroizing::new(plaintext))
    }

    /// Decrypt and interpret the result as UTF-8.
    pub fn open_str(&self, opaque: &str) -> Result<Zeroizing<String>, CryptoBoxError> {
        let bytes = self.open(opaque)?;
        let s = String::from_utf8(bytes.to_vec())
            .map_err(|_| CryptoBoxError::WrongKeyOrCorrupt)?;
        Ok(Zeroizing::new(s))
    }
}

#[cfg(feature = "envelope")]
mod envelope {
    use super::*;
    use async_trait::async_trait;
    use neuron_crypto::CryptoProvider;
    use std::sync::Arc;

    /// A [`MasterKeySource`] that unwraps a data-encryption key through a
    /// `neuron_crypto::CryptoProvider` (Vault Transit, KMS, HSM) rather than
    /// holding a raw key at rest.
    ///
    /// `wrapped_dek` is the provider-encrypted form of the 32-byte DEK;
    /// `current_key` decrypts it on every call, so the cleartext key never
    /// persists beyond one `seal`/`open`.
    pub struct EnvelopeKeySource {
        provider: Arc<dyn CryptoProvider>,
        key_ref: String,
        wrapped_dek: Vec<u8>,
    }

    impl EnvelopeKeySource {
        /// Build a source that unwraps `wrapped_dek` via `provider` using `key_ref`.
        pub fn new(provider: Arc<dyn CryptoProvider>, key_ref: impl Into<String>, wrapped_dek: Vec<u8>) -> Self {
            Self {
                provider,
                key_ref: key_ref.into(),
                wrapped_dek,
            }
        }
    }

    #[async_trait]
    /// Async variant of [`MasterKeySource`] for providers that must make a
    /// network round trip to unwrap the key.
    pub trait AsyncMasterKeySource: Send + Sync {
        /// Unwrap and return the current 32-byte key.
        async fn current_key(&self) -> Result<Zeroizing<[u8; KEY_LEN]>, CryptoBoxError>;
    }

    #[async_trait]
    impl AsyncMasterKeySource for EnvelopeKeySource {
        async fn current_key(&self) -> Result<Zeroizing<[u8; KEY_LEN]>, CryptoBoxError> {
            let plaintext = self
                .provider
                .decrypt(&self.key_ref, &self.wrapped_dek)
                .await
                .map_err(|_| CryptoBoxError::WrongKeyOrCorrupt)?;
            if plaintext.len() != KEY_LEN {
                return Err(CryptoBoxError::BadKeyLength(plaintext.len()));
            }
            let mut key = [0u8; KEY_LEN];
            key.copy_from_slice(&plaintext);
            Ok(Zeroizing::new(key))
        }
    }
}

#[cfg(feature = "envelope")]
pub use envelope::{AsyncMasterKeySource, EnvelopeKeySource};

#[cfg(test)]
mod tests {
    use super::*;

    fn test_box() -> CryptoBox<StaticKeySource> {
        CryptoBox::new(StaticKeySource::new([7u8; KEY_LEN]))
    }

    #[test]
    fn seal_open_roundtrip() {
        let cb = test_box();
        let opaque = cb.seal_str("sk-live-abc123").unwrap();
        let plain = cb.open_str(&opaque).unwrap();
        assert_eq!(plain.as_str(), "sk-live-abc123");
    }

    #[test]
    fn seal_is_nondeterministic() {
        let cb = test_box();
        let a = cb.seal_str("same plaintext").unwrap();
        let b = cb.seal_str("same plaintext").unwrap();
        assert_ne!(a, b, "nonces must differ between calls");
    }

    #[test]
    fn wrong_key_fails() {
        let cb1 = CryptoBox::new(StaticKeySource::new([1u8; KEY_LEN]));
        let cb2 = CryptoBox::new(StaticKeySource::new([2u8; KEY_LEN]));
        let opaque = cb1.seal_str("top secret").unwrap();
        let err = cb2.open_str(&opaque).unwrap_err();
        assert!(matches!(err, CryptoBoxError::WrongKeyOrCorrupt));
    }

    #[test]
    fn corrupt_ciphertext_fails() {
        let cb = test_box();
        let mut opaque = cb.seal_str("hello").unwrap();
        opaque.push('x');
        // Either a base64 decode error or an AEAD failure is acceptable —
        // both are surfaced, never silently tolerated.
        assert!(cb.open_str(&opaque).is_err());
    }

    #[test]
    fn truncated_blob_fails() {
        let cb = test_box();
        let short = B64.encode([0u8; 4]);
        assert!(matches!(
            cb.open_str(&short).unwrap_err(),
            CryptoBoxError::Truncated
        ));
    }

    #[test]
    fn bad_key_length_rejected() {
        let err = StaticKeySource::from_slice(b"too-short").unwrap_err();
        assert!(matches!(err, CryptoBoxError::BadKeyLength(9)));
    }

    #[test]
    fn empty_plaintext_roundtrips() {
        let cb = test_box();
        let opaque = cb.seal(b"").unwrap();
        let plain = cb.open(&opaque).unwrap();
        assert!(plain.is_empty());
    }
}
