use crate::pool::{
    Pool,
    PoolId,
};
use rand::RngCore;
use sha3::{
    Digest,
    Keccak256,
};
use std::{
    collections::HashMap,
    fmt,
    sync::{
        Arc,
        Mutex,
    },
};
use tracing::debug;
use web3::types::H256;

pub mod sled_store;

pub use sled_store::SledSecretStore;


const SECRET_KEY_PREFIX: &str = "pool-secret-";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SecretStoreError {
    #[error("secret store unavailable: {0}")]
    Backend(String),
    #[error("malformed secret: {0}")]
    Malformed(String),
}

impl From<sled::Error> for SecretStoreError {
    fn from(err: sled::Error) -> Self {
        SecretStoreError::Backend(err.to_string())
    }
}

/// The 32 bytes committed to at creation and disclosed at reveal.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Secret([u8; 32]);

impl Secret {
    pub fn generate() -> Self {
        let mut bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn as_h256(&self) -> H256 {
        H256::from(self.0)
    }

    /// `0x` followed by 64 lowercase hex digits.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    pub fn from_hex(text: &str) -> Result<Self, SecretStoreError> {
        let digits = text
            .trim()
            .strip_prefix("0x")
            .ok_or_else(|| SecretStoreError::Malformed("missing 0x prefix".to_string()))?;
        if digits.len() != 64 {
            return Err(SecretStoreError::Malformed(format!(
                "expected 64 hex digits, got {}",
                digits.len()
            )));
        }
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(digits, &mut bytes)
            .map_err(|err| SecretStoreError::Malformed(err.to_string()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(..)")
    }
}

/// Keccak-256 over the raw 32 bytes, matching `keccak256(abi.encodePacked(bytes32))`.
pub fn commitment_of(secret: &Secret) -> H256 {
    H256::from_slice(&Keccak256::digest(secret.as_bytes()))
}

pub fn secret_key(pool_id: PoolId) -> String {
    format!("{SECRET_KEY_PREFIX}{pool_id}")
}

/// Durable string key-value storage for secrets.
pub trait SecretStore {
    /// read the value stored under `key`
    fn get(&self, key: &str) -> Result<Option<String>, SecretStoreError>;

    /// write or overwrite the value under `key`
    fn put(&self, key: &str, value: &str) -> Result<(), SecretStoreError>;
}

impl<S: SecretStore + ?Sized> SecretStore for Arc<S> {
    fn get(&self, key: &str) -> Result<Option<String>, SecretStoreError> {
        (**self).get(key)
    }

    fn put(&self, key: &str, value: &str) -> Result<(), SecretStoreError> {
        (**self).put(key, value)
    }
}

#[derive(Clone, Default)]
pub struct InMemorySecretStore {
    entries: Arc<Mutex<HashMap<String, String>>>,
}

impl InMemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Arc<Mutex<HashMap<String, String>>> {
        self.entries.clone()
    }
}

impl SecretStore for InMemorySecretStore {
    fn get(&self, key: &str) -> Result<Option<String>, SecretStoreError> {
        let guard = self
            .entries
            .lock()
            .map_err(|_| SecretStoreError::Backend("store lock poisoned".to_string()))?;
        Ok(guard.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<(), SecretStoreError> {
        let mut guard = self
            .entries
            .lock()
            .map_err(|_| SecretStoreError::Backend("store lock poisoned".to_string()))?;
        guard.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/// Secret lifecycle on top of a [`SecretStore`]. Values are kept as plain hex; the
/// host environment is responsible for protecting the store.
pub struct SecretVault<S> {
    store: S,
}

impl<S: SecretStore> SecretVault<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn generate(&self) -> Secret {
        Secret::generate()
    }

    pub fn commitment_of(&self, secret: &Secret) -> H256 {
        commitment_of(secret)
    }

    pub fn store(&self, pool_id: PoolId, secret: &Secret) -> Result<(), SecretStoreError> {
        self.store.put(&secret_key(pool_id), &secret.to_hex())?;
        debug!(pool_id, "secret stored");
        Ok(())
    }

    pub fn retrieve(&self, pool_id: PoolId) -> Result<Option<Secret>, SecretStoreError> {
        self.store
            .get(&secret_key(pool_id))?
            .map(|value| Secret::from_hex(&value))
            .transpose()
    }

    /// Store a secret recovered out of band, e.g. after the creation event was lost.
    pub fn import(&self, pool_id: PoolId, hex: &str) -> Result<Secret, SecretStoreError> {
        let secret = Secret::from_hex(hex)?;
        self.store(pool_id, &secret)?;
        Ok(secret)
    }

    pub fn verify(&self, pool: &Pool, secret: &Secret) -> bool {
        commitment_of(secret) == pool.commit_hash
    }
}
