//! Identity password storage and propagation.
//!
//! Passwords are stored AES-256-GCM encrypted with a key derived by HKDF from
//! a master key, salted by the identity key. They are decrypted only when
//! propagated, then rendered according to the resource's propagation mode.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::MappingError;
use crate::identity::{Identity, IdentityKey};

/// Length of AES-256 key in bytes.
const KEY_LENGTH: usize = 32;

/// Length of GCM nonce in bytes.
const NONCE_LENGTH: usize = 12;

/// Length of GCM authentication tag in bytes.
const TAG_LENGTH: usize = 16;

/// Context string for HKDF key derivation.
const HKDF_INFO: &[u8] = b"xavyo-provisioning-password-v1";

/// How a resource receives identity passwords.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PasswordPropagation {
    /// Send the decrypted password.
    #[default]
    Cleartext,
    /// Send the hex-encoded SHA-256 digest.
    Sha256,
    /// Never send the password.
    Omit,
}

impl PasswordPropagation {
    /// Render a cleartext password for the target, or `None` to omit it.
    pub fn render(&self, cleartext: &str) -> Option<String> {
        match self {
            PasswordPropagation::Cleartext => Some(cleartext.to_string()),
            PasswordPropagation::Sha256 => Some(hex::encode(Sha256::digest(cleartext.as_bytes()))),
            PasswordPropagation::Omit => None,
        }
    }
}

/// Base64 of `nonce || ciphertext || tag`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EncryptedPassword(String);

impl std::fmt::Debug for EncryptedPassword {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptedPassword([REDACTED])")
    }
}

/// Encrypts and decrypts identity passwords.
#[derive(Clone)]
pub struct PasswordCipher {
    master_key: [u8; KEY_LENGTH],
}

impl std::fmt::Debug for PasswordCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordCipher")
            .field("master_key", &"[REDACTED]")
            .finish()
    }
}

impl PasswordCipher {
    #[must_use]
    pub fn new(master_key: [u8; KEY_LENGTH]) -> Self {
        Self { master_key }
    }

    /// Create a cipher from a hex-encoded master key.
    pub fn from_hex(hex_key: &str) -> Result<Self, MappingError> {
        let bytes = hex::decode(hex_key)
            .map_err(|e| MappingError::password(format!("invalid hex key: {e}")))?;
        Self::from_bytes(&bytes)
    }

    /// Create a cipher from a base64-encoded master key.
    pub fn from_base64(base64_key: &str) -> Result<Self, MappingError> {
        let bytes = STANDARD
            .decode(base64_key)
            .map_err(|e| MappingError::password(format!("invalid base64 key: {e}")))?;
        Self::from_bytes(&bytes)
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, MappingError> {
        let key: [u8; KEY_LENGTH] = bytes.try_into().map_err(|_| {
            MappingError::password(format!("key must be {} bytes, got {}", KEY_LENGTH, bytes.len()))
        })?;
        Ok(Self::new(key))
    }

    fn derive_key(&self, identity: IdentityKey) -> Result<[u8; KEY_LENGTH], MappingError> {
        let hkdf = Hkdf::<Sha256>::new(Some(identity.as_uuid().as_bytes()), &self.master_key);
        let mut derived_key = [0u8; KEY_LENGTH];
        hkdf.expand(HKDF_INFO, &mut derived_key)
            .map_err(|e| MappingError::password(format!("key derivation failed: {e}")))?;
        Ok(derived_key)
    }

    pub fn encrypt(
        &self,
        identity: IdentityKey,
        cleartext: &str,
    ) -> Result<EncryptedPassword, MappingError> {
        let key = self.derive_key(identity)?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| MappingError::password(format!("failed to create cipher: {e}")))?;

        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, cleartext.as_bytes())
            .map_err(|e| MappingError::password(format!("encryption failed: {e}")))?;

        let mut sealed = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend_from_slice(&ciphertext);

        Ok(EncryptedPassword(STANDARD.encode(sealed)))
    }

    pub fn decrypt(
        &self,
        identity: IdentityKey,
        password: &EncryptedPassword,
    ) -> Result<String, MappingError> {
        let sealed = STANDARD
            .decode(&password.0)
            .map_err(|e| MappingError::password(format!("stored password is not base64: {e}")))?;
        if sealed.len() < NONCE_LENGTH + TAG_LENGTH {
            return Err(MappingError::password("ciphertext too short"));
        }

        let key = self.derive_key(identity)?;
        let cipher = Aes256Gcm::new_from_slice(&key)
            .map_err(|e| MappingError::password(format!("failed to create cipher: {e}")))?;

        let (nonce_bytes, encrypted) = sealed.split_at(NONCE_LENGTH);
        let plaintext = cipher
            .decrypt(Nonce::from_slice(nonce_bytes), encrypted)
            .map_err(|e| MappingError::password(format!("decryption failed: {e}")))?;

        String::from_utf8(plaintext)
            .map_err(|e| MappingError::password(format!("decrypted password is not UTF-8: {e}")))
    }

    /// Encrypt and store a new password on the identity.
    pub fn set_password(&self, identity: &mut Identity, cleartext: &str) -> Result<(), MappingError> {
        identity.password = Some(self.encrypt(identity.key, cleartext)?);
        Ok(())
    }
}
