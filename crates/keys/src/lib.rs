//! Signing keys for the msgsign batch signer.
//!
//! This crate provides the [`KeyStore`] capability the signer uses to look up
//! keys, the [`MessageSigner`] capability a looked-up key exposes, and an
//! Ed25519 [`SigningKey`] implementation of it.
//!
//! Private key material never leaves a [`SigningKey`]: it is zeroized on drop
//! and redacted from `Debug` output. Callers only ever receive hex-encoded
//! signatures.
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with a fault-injecting signer and populated
//!   key stores.

#![deny(unsafe_code)]

pub mod error;
pub mod key_store;
pub mod signing_key;
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;

pub use error::{KeyError, KeyResult};
pub use key_store::{KeyStore, MemoryKeyStore, MessageSigner};
pub use signing_key::SigningKey;
