use super::{
    SecretStore,
    SecretStoreError,
};
use sled::{
    Config,
    Db,
    Tree,
};
use std::path::Path;

const SECRETS_TREE: &str = "pool_secrets";

#[derive(Clone)]
pub struct SledSecretStore {
    tree: Tree,
}

impl SledSecretStore {
    pub fn new(db: &Db) -> Result<Self, SecretStoreError> {
        let tree = db.open_tree(SECRETS_TREE)?;
        Ok(Self { tree })
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, SecretStoreError> {
        let db = Config::default().path(path).open()?;
        Self::new(&db)
    }
}

impl SecretStore for SledSecretStore {
    fn get(&self, key: &str) -> Result<Option<String>, SecretStoreError> {
        match self.tree.get(key.as_bytes())? {
            Some(bytes) => String::from_utf8(bytes.to_vec())
                .map(Some)
                .map_err(|err| SecretStoreError::Malformed(err.to_string())),
            None => Ok(None),
        }
    }

    fn put(&self, key: &str, value: &str) -> Result<(), SecretStoreError> {
        self.tree.insert(key.as_bytes(), value.as_bytes())?;
        // the secret is unrecoverable if lost, so wait for it to reach disk
        self.tree.flush()?;
        Ok(())
    }
}
