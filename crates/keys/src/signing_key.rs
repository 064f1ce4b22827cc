//! Ed25519 signing keys.
//!
//! A [`SigningKey`] pairs a key identifier with private key material. The
//! material never leaves the key: it is zeroized on drop, redacted from
//! `Debug` output, and only used through [`SigningKey::sign`]. Signatures are
//! returned hex-encoded.

use ed25519_dalek::{Signature, Signer, Verifier};
use rand_core::OsRng;
use zeroize::Zeroizing;

use crate::{
    error::{KeyError, KeyResult},
    key_store::MessageSigner,
};

/// Number of public key bytes that make up a derived key identifier.
pub const KEY_ID_BYTES: usize = 20;

/// Length of an Ed25519 secret key in bytes.
pub const SECRET_KEY_BYTES: usize = ed25519_dalek::SECRET_KEY_LENGTH;

/// An Ed25519 private key and its identifier.
///
/// # Example
///
/// ```
/// use msgsign_keys::SigningKey;
///
/// let key = SigningKey::generate();
/// let signature = key.sign("0hello");
/// assert!(key.verify("0hello", &signature).is_ok());
/// assert!(key.verify("1hello", &signature).is_err());
/// ```
#[derive(Clone)]
pub struct SigningKey {
    key_id: String,
    inner: ed25519_dalek::SigningKey,
}

impl SigningKey {
    /// Generates a fresh random key from the operating system RNG.
    ///
    /// The identifier is derived from the public key, see [`SigningKey::from_secret_bytes`].
    #[must_use]
    pub fn generate() -> Self {
        Self::from_dalek(ed25519_dalek::SigningKey::generate(&mut OsRng))
    }

    /// Builds a key from raw secret bytes.
    ///
    /// The identifier is the hex encoding of the first [`KEY_ID_BYTES`] bytes
    /// of the public key, so the same secret always yields the same id.
    #[must_use]
    pub fn from_secret_bytes(secret: &[u8; SECRET_KEY_BYTES]) -> Self {
        Self::from_dalek(ed25519_dalek::SigningKey::from_bytes(secret))
    }

    /// Builds a key from hex-encoded secret bytes.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::InvalidKeyMaterial`] if `secret_hex` is not hex or
    /// does not decode to exactly [`SECRET_KEY_BYTES`] bytes.
    pub fn from_hex(secret_hex: &str) -> KeyResult<Self> {
        let bytes = Zeroizing::new(
            hex::decode(secret_hex.trim_start_matches("0x"))
                .map_err(|e| KeyError::InvalidKeyMaterial(e.to_string()))?,
        );
        let secret: Zeroizing<[u8; SECRET_KEY_BYTES]> =
            Zeroizing::new(bytes.as_slice().try_into().map_err(|_| {
                KeyError::InvalidKeyMaterial(format!(
                    "expected {SECRET_KEY_BYTES} bytes, got {}",
                    bytes.len()
                ))
            })?);
        Ok(Self::from_secret_bytes(&secret))
    }

    /// Replaces the derived identifier with `key_id`.
    #[must_use]
    pub fn with_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = key_id.into();
        self
    }

    fn from_dalek(inner: ed25519_dalek::SigningKey) -> Self {
        let public = inner.verifying_key().to_bytes();
        let key_id = hex::encode(&public[..KEY_ID_BYTES]);
        Self { key_id, inner }
    }

    /// Returns the key identifier.
    #[must_use]
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Returns the hex-encoded public key.
    #[must_use]
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.inner.verifying_key().to_bytes())
    }

    /// Signs `message` and returns the hex-encoded signature.
    #[must_use]
    pub fn sign(&self, message: &str) -> String {
        hex::encode(self.inner.sign(message.as_bytes()).to_bytes())
    }

    /// Verifies a hex-encoded signature over `message`.
    ///
    /// # Errors
    ///
    /// Returns [`KeyError::InvalidSignature`] if the signature is malformed or
    /// does not match.
    pub fn verify(&self, message: &str, signature_hex: &str) -> KeyResult<()> {
        let bytes = hex::decode(signature_hex).map_err(|_| KeyError::InvalidSignature)?;
        let signature = Signature::from_slice(&bytes).map_err(|_| KeyError::InvalidSignature)?;
        self.inner
            .verifying_key()
            .verify(message.as_bytes(), &signature)
            .map_err(|_| KeyError::InvalidSignature)
    }
}

impl MessageSigner for SigningKey {
    fn key_id(&self) -> &str {
        &self.key_id
    }

    fn sign(&self, message: &str) -> KeyResult<String> {
        Ok(SigningKey::sign(self, message))
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("key_id", &self.key_id)
            .field("public_key", &self.public_key_hex())
            .field("secret", &"[REDACTED]")
            .finish()
    }
}
