use crate::store::{KeyValueStore, keys};
use crate::{Error, Result};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::warn;

/// Shortest accepted PIN
pub const MIN_PIN_LEN: usize = 4;

/// Longest accepted PIN
pub const MAX_PIN_LEN: usize = 8;

/// Salt length in bytes
const SALT_LEN: usize = 16;

/// Salted PIN digest
///
/// `hash` is always `SHA-256(salt || pin)`. A fresh salt is drawn every time a
/// PIN is set, so changing back to an old PIN still yields a new credential.
#[derive(Clone, PartialEq, Eq)]
pub struct PinCredential {
    salt: Vec<u8>,
    hash: Vec<u8>,
}

impl std::fmt::Debug for PinCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinCredential").finish_non_exhaustive()
    }
}

impl PinCredential {
    /// Derive a credential for `pin` with a freshly generated salt
    pub fn derive(pin: &str) -> Result<Self> {
        validate_pin_format(pin)?;

        let mut salt = vec![0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);

        Ok(Self::with_salt(salt, pin))
    }

    /// Derive a credential for `pin` using an existing salt
    pub fn with_salt(salt: Vec<u8>, pin: &str) -> Self {
        let hash = digest(&salt, pin);
        Self { salt, hash }
    }

    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    pub fn hash(&self) -> &[u8] {
        &self.hash
    }

    /// Recompute the digest for `pin` and compare without early exit
    pub fn verify_raw(&self, pin: &str) -> bool {
        let candidate = digest(&self.salt, pin);
        candidate.ct_eq(&self.hash).into()
    }
}

fn digest(salt: &[u8], pin: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(pin.as_bytes());
    hasher.finalize().to_vec()
}

/// Check that `pin` is all ASCII digits and within the length bounds
pub fn validate_pin_format(pin: &str) -> Result<()> {
    let len_ok = (MIN_PIN_LEN..=MAX_PIN_LEN).contains(&pin.len());
    if !len_ok || !pin.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::InvalidPinFormat);
    }
    Ok(())
}

/// Persistence for the guardian credential and the enabled flag
pub struct PinCredentialStore;

impl PinCredentialStore {
    /// Replace the stored credential with one for `pin` and enable controls
    pub fn set_pin<S: KeyValueStore + ?Sized>(store: &mut S, pin: &str) -> Result<()> {
        let credential = PinCredential::derive(pin)?;

        store.put_str(keys::CREDENTIAL, keys::PIN_SALT, &hex::encode(credential.salt()));
        store.put_str(keys::CREDENTIAL, keys::PIN_HASH, &hex::encode(credential.hash()));
        store.put_bool(keys::CREDENTIAL, keys::IS_ENABLED, true);

        Ok(())
    }

    pub fn is_set<S: KeyValueStore + ?Sized>(store: &S) -> bool {
        store.get(keys::CREDENTIAL, keys::PIN_HASH).is_some()
    }

    /// Load the stored credential
    ///
    /// An entry that is present but cannot be decoded yields a credential that
    /// matches no PIN, so a damaged store never reads as "no PIN set".
    pub fn load<S: KeyValueStore + ?Sized>(store: &S) -> Option<PinCredential> {
        if !Self::is_set(store) {
            return None;
        }

        let hash_hex = store.get_str(keys::CREDENTIAL, keys::PIN_HASH);
        let salt_hex = store.get_str(keys::CREDENTIAL, keys::PIN_SALT);

        match (
            hash_hex.as_deref().map(hex::decode),
            salt_hex.as_deref().map(hex::decode),
        ) {
            (Some(Ok(hash)), Some(Ok(salt))) if !hash.is_empty() => {
                Some(PinCredential { salt, hash })
            }
            _ => {
                warn!("Stored guardian credential is unreadable; refusing all PINs");
                Some(PinCredential {
                    salt: Vec::new(),
                    hash: Vec::new(),
                })
            }
        }
    }

    pub fn is_enabled<S: KeyValueStore + ?Sized>(store: &S) -> bool {
        store
            .get_bool(keys::CREDENTIAL, keys::IS_ENABLED)
            .unwrap_or(false)
    }

    pub fn set_enabled<S: KeyValueStore + ?Sized>(store: &mut S, enabled: bool) {
        store.put_bool(keys::CREDENTIAL, keys::IS_ENABLED, enabled);
    }
}
