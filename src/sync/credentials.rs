//! # Credential Store Collaborator
//!
//! Encryption internals live outside the engine. The core only sees opaque
//! blobs, decrypted for the brief window before a provider call and dropped
//! immediately after.

use crate::error::Result;

/// Opaque encrypt/decrypt collaborator
pub trait CredentialStore: Send + Sync {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>>;
    fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>>;
}

/// Identity store for tests and local development. Not for production use.
#[derive(Debug, Default, Clone)]
pub struct PlaintextCredentialStore;

impl CredentialStore for PlaintextCredentialStore {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        Ok(plaintext.to_vec())
    }

    fn decrypt(&self, blob: &[u8]) -> Result<Vec<u8>> {
        Ok(blob.to_vec())
    }
}
