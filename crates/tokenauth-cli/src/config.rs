//! CLI configuration management.
//!
//! The CLI keeps two files under `~/.config/tokenauth/`:
//! - `config.json`: CLI preferences (storage backend, last used email)
//! - `endpoints.json`: the session config document (endpoint profiles)

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use tokenauth_core::{
    CredentialStore, FileStorage, KeyringStorage, MemoryStorage, SessionConfig, StorageBackend,
};

/// Application name used for config directory paths
const APP_NAME: &str = "tokenauth";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Endpoint profiles file name
const ENDPOINTS_FILE: &str = "endpoints.json";

/// Where the credential record is kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// JSON file in the local data directory
    #[default]
    File,
    /// OS keychain
    Keyring,
    /// Process memory only (nothing survives the command)
    Memory,
}

impl StorageKind {
    pub fn backend(self) -> Result<Arc<dyn StorageBackend>> {
        Ok(match self {
            StorageKind::File => Arc::new(
                FileStorage::default_location().context("Failed to locate storage directory")?,
            ),
            StorageKind::Keyring => Arc::new(KeyringStorage::default()),
            StorageKind::Memory => Arc::new(MemoryStorage::new()),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub storage: StorageKind,
    pub last_email: Option<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            Ok(serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse {}", path.display()))?)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME))
    }

    fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join(CONFIG_FILE))
    }

    pub fn default_endpoints_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join(ENDPOINTS_FILE))
    }
}

/// Resolve the session config: an explicit API URL wins, then an explicit
/// endpoints file, then the default endpoints file.
pub fn session_config(api_url: Option<&str>, endpoints: Option<&Path>) -> Result<SessionConfig> {
    if let Some(url) = api_url {
        return Ok(SessionConfig::single(url)?);
    }
    let path = match endpoints {
        Some(path) => path.to_path_buf(),
        None => Config::default_endpoints_path()?,
    };
    if !path.exists() {
        anyhow::bail!(
            "No endpoints configured: pass --api-url, set TOKENAUTH_API_URL or create {}",
            path.display()
        );
    }
    SessionConfig::load(&path)
}

/// Credential store over the chosen backend, keyed and validated as the
/// session config says.
pub fn credential_store(kind: StorageKind, session: &SessionConfig) -> Result<CredentialStore> {
    Ok(
        CredentialStore::with_key(kind.backend()?, session.storage_key())
            .with_required_headers(session.token_headers()),
    )
}
