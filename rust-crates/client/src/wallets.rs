//! Ethereum keystores kept as `<wallet dir>/<name>.json`.
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use eth_keystore::decrypt_key;
use rpassword::prompt_password;
use serde_json::Value;
use std::{
    fs,
    path::{
        Path,
        PathBuf,
    },
};
use web3::{
    signing::{
        Key,
        SecretKey,
        SecretKeyRef,
    },
    types::Address,
};

pub const DEFAULT_WALLET_DIR: &str = "~/.prize-pool/wallets";

const KEYSTORE_EXTENSION: &str = "json";

pub fn wallet_dir(dir: Option<&str>) -> PathBuf {
    PathBuf::from(shellexpand::tilde(dir.unwrap_or(DEFAULT_WALLET_DIR)).into_owned())
}

/// Names of the keystores in `dir`, sorted. A missing directory holds none.
pub fn keystore_names(dir: &Path) -> Result<Vec<String>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let entries = fs::read_dir(dir)
        .wrap_err_with(|| format!("Failed to read wallet directory {}", dir.display()))?;
    let mut names = Vec::new();
    for entry in entries {
        let path = entry.wrap_err("Failed to read wallet entry")?.path();
        let is_keystore = path.is_file()
            && path.extension().and_then(|ext| ext.to_str()) == Some(KEYSTORE_EXTENSION);
        if !is_keystore {
            continue;
        }
        if let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) {
            names.push(name.to_owned());
        }
    }
    names.sort();
    Ok(names)
}

#[derive(Clone, Debug)]
pub struct Keystore {
    name: String,
    path: PathBuf,
    address: Option<Address>,
}

impl Keystore {
    /// Open `<dir>/<name>.json`. The plaintext `address` field, when present, is read
    /// without decrypting anything.
    pub fn load(dir: &Path, name: &str) -> Result<Self> {
        let path = dir.join(format!("{name}.{KEYSTORE_EXTENSION}"));
        if !path.is_file() {
            let known = keystore_names(dir)?;
            let known = if known.is_empty() {
                "none".to_string()
            } else {
                known.join(", ")
            };
            return Err(eyre!(
                "No keystore named '{name}' in {} (available: {known})",
                dir.display()
            ));
        }
        let raw = fs::read_to_string(&path)
            .wrap_err_with(|| format!("Failed to read keystore {}", path.display()))?;
        let json: Value = serde_json::from_str(&raw)
            .wrap_err_with(|| format!("Keystore '{name}' is not valid JSON"))?;
        let address = json
            .get("address")
            .and_then(Value::as_str)
            .and_then(|hex| hex.trim_start_matches("0x").parse::<Address>().ok());
        Ok(Self {
            name: name.to_owned(),
            path,
            address,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> Option<Address> {
        self.address
    }

    pub fn unlock(&self) -> Result<SecretKey> {
        let prompt = format!("Password for keystore '{}': ", self.name);
        let password = prompt_password(prompt).wrap_err("Failed to read keystore password")?;
        self.unlock_with(&password)
    }

    /// Decrypt the signing key. A key that does not match the recorded address is refused.
    pub fn unlock_with(&self, password: &str) -> Result<SecretKey> {
        let bytes = decrypt_key(&self.path, password.as_bytes())
            .map_err(|_| eyre!("Invalid password for keystore '{}'", self.name))?;
        let key = SecretKey::from_slice(&bytes)
            .map_err(|_| eyre!("Keystore '{}' does not hold a secp256k1 key", self.name))?;
        let derived = SecretKeyRef::new(&key).address();
        match self.address {
            Some(recorded) if recorded != derived => Err(eyre!(
                "Keystore '{}' decrypts to {derived:?}, not its recorded address {recorded:?}",
                self.name
            )),
            _ => Ok(key),
        }
    }
}
