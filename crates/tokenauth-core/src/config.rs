//! Endpoint profile configuration.
//!
//! A host application supplies one or more named endpoint profiles, each
//! with its own API base URL and optional auth path overrides. The config
//! is resolved once at startup and never mutated afterwards; an unknown
//! profile name is a hard `ConfigError`, never a silent fallback.
//!
//! Two JSON shapes are accepted for the `endpoints` value of a config document:
//!
//! ```json
//! { "default": { "apiUrl": "http://default.dev" }, "alt": { "apiUrl": "http://alt.dev" } }
//! ```
//!
//! or the ordered form, where the first entry becomes the default profile:
//!
//! ```json
//! [ { "default": { "apiUrl": "http://default.dev" } }, { "alt": { "apiUrl": "http://alt.dev" } } ]
//! ```
//!
//! A bare `{ "apiUrl": "..." }` object is a single profile named `default`.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::auth::credentials::{ACCESS_TOKEN, CLIENT, EXPIRY, TOKEN_TYPE, UID};

/// Profile used when the host does not name one.
pub const DEFAULT_PROFILE: &str = "default";

/// Storage key holding the persisted credential record.
pub const DEFAULT_STORAGE_KEY: &str = "authHeaders";

const DEFAULT_SIGN_IN_PATH: &str = "/auth/sign_in";
const DEFAULT_SIGN_OUT_PATH: &str = "/auth/sign_out";
const DEFAULT_REGISTRATION_PATH: &str = "/auth";
const DEFAULT_PASSWORD_RESET_PATH: &str = "/auth/password";
const DEFAULT_PASSWORD_UPDATE_PATH: &str = "/auth/password";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unknown endpoint profile '{name}' (configured: {available})")]
    UnknownProfile { name: String, available: String },

    #[error("Invalid apiUrl '{url}' for profile '{profile}': {source}")]
    InvalidApiUrl {
        profile: String,
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("No endpoint profiles configured")]
    NoProfiles,

    #[error("No token headers configured")]
    NoTokenHeaders,
}

fn default_sign_in_path() -> String {
    DEFAULT_SIGN_IN_PATH.to_string()
}

fn default_sign_out_path() -> String {
    DEFAULT_SIGN_OUT_PATH.to_string()
}

fn default_registration_path() -> String {
    DEFAULT_REGISTRATION_PATH.to_string()
}

fn default_password_reset_path() -> String {
    DEFAULT_PASSWORD_RESET_PATH.to_string()
}

fn default_password_update_path() -> String {
    DEFAULT_PASSWORD_UPDATE_PATH.to_string()
}

/// A named API endpoint and the auth paths it serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointProfile {
    pub api_url: String,
    #[serde(default = "default_sign_in_path")]
    pub email_sign_in_path: String,
    #[serde(default = "default_sign_out_path")]
    pub sign_out_path: String,
    #[serde(default = "default_registration_path")]
    pub email_registration_path: String,
    #[serde(default = "default_password_reset_path")]
    pub password_reset_path: String,
    #[serde(default = "default_password_update_path")]
    pub password_update_path: String,
    /// Where the confirmation email link sends the user after sign-up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirm_success_url: Option<String>,
    /// Where the password reset email link sends the user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_reset_success_url: Option<String>,
}

impl EndpointProfile {
    pub fn new(api_url: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            email_sign_in_path: default_sign_in_path(),
            sign_out_path: default_sign_out_path(),
            email_registration_path: default_registration_path(),
            password_reset_path: default_password_reset_path(),
            password_update_path: default_password_update_path(),
            confirm_success_url: None,
            password_reset_success_url: None,
        }
    }

    /// Join the profile base URL with a relative path.
    pub fn url_for(&self, path: &str) -> String {
        let base = self.api_url.trim_end_matches('/');
        if path.is_empty() {
            base.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", base, path)
        } else {
            format!("{}/{}", base, path)
        }
    }
}

/// Raw profile input, before ordering and validation.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ProfilesInput {
    Single(EndpointProfile),
    Ordered(Vec<BTreeMap<String, EndpointProfile>>),
    Named(BTreeMap<String, EndpointProfile>),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigFile {
    endpoints: ProfilesInput,
    #[serde(default)]
    default_endpoint: Option<String>,
    #[serde(default)]
    token_headers: Option<Vec<String>>,
    #[serde(default)]
    storage_key: Option<String>,
}

/// Resolved session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    profiles: BTreeMap<String, EndpointProfile>,
    default_profile: String,
    token_headers: Vec<String>,
    storage_key: String,
}

impl SessionConfig {
    /// Build a config from named profiles. The default profile is `default`
    /// when present, otherwise the first name in sorted order.
    pub fn new(profiles: BTreeMap<String, EndpointProfile>) -> Result<Self, ConfigError> {
        let default_profile = if profiles.contains_key(DEFAULT_PROFILE) {
            DEFAULT_PROFILE.to_string()
        } else {
            profiles.keys().next().cloned().ok_or(ConfigError::NoProfiles)?
        };
        Self::build(profiles, default_profile)
    }

    /// Single-profile config named `default`.
    pub fn single(api_url: impl Into<String>) -> Result<Self, ConfigError> {
        let mut profiles = BTreeMap::new();
        profiles.insert(DEFAULT_PROFILE.to_string(), EndpointProfile::new(api_url));
        Self::new(profiles)
    }

    fn build(
        profiles: BTreeMap<String, EndpointProfile>,
        default_profile: String,
    ) -> Result<Self, ConfigError> {
        if profiles.is_empty() {
            return Err(ConfigError::NoProfiles);
        }
        for (name, profile) in &profiles {
            Url::parse(&profile.api_url).map_err(|source| ConfigError::InvalidApiUrl {
                profile: name.clone(),
                url: profile.api_url.clone(),
                source,
            })?;
        }
        let config = Self {
            profiles,
            default_profile,
            token_headers: default_token_headers(),
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
        };
        // Surface a bad default name now rather than on first request
        config.profile(&config.default_profile)?;
        Ok(config)
    }

    /// Parse a config document (see module docs for accepted shapes).
    pub fn from_json(json: &str) -> Result<Self> {
        let file: ConfigFile =
            serde_json::from_str(json).context("Failed to parse session config")?;

        let (profiles, first) = match file.endpoints {
            ProfilesInput::Single(profile) => {
                let mut profiles = BTreeMap::new();
                profiles.insert(DEFAULT_PROFILE.to_string(), profile);
                (profiles, Some(DEFAULT_PROFILE.to_string()))
            }
            ProfilesInput::Ordered(entries) => {
                let mut profiles = BTreeMap::new();
                let mut first = None;
                for entry in entries {
                    for (name, profile) in entry {
                        if first.is_none() {
                            first = Some(name.clone());
                        }
                        profiles.insert(name, profile);
                    }
                }
                (profiles, first)
            }
            ProfilesInput::Named(profiles) => (profiles, None),
        };

        let mut config = match file.default_endpoint.or(first) {
            Some(default_profile) => Self::build(profiles, default_profile)?,
            None => Self::new(profiles)?,
        };
        if let Some(headers) = file.token_headers {
            config = config.with_token_headers(headers)?;
        }
        if let Some(key) = file.storage_key {
            config = config.with_storage_key(key);
        }
        Ok(config)
    }

    /// Load a config document from disk.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read session config {}", path.display()))?;
        Self::from_json(&contents)
    }

    /// Replace the header names exchanged with the API.
    /// All of them must be present in a response for it to rotate the session.
    pub fn with_token_headers(mut self, headers: Vec<String>) -> Result<Self, ConfigError> {
        if headers.is_empty() {
            return Err(ConfigError::NoTokenHeaders);
        }
        self.token_headers = headers.into_iter().map(|h| h.to_ascii_lowercase()).collect();
        Ok(self)
    }

    pub fn with_storage_key(mut self, key: impl Into<String>) -> Self {
        self.storage_key = key.into();
        self
    }

    /// Resolve a profile by name.
    pub fn profile(&self, name: &str) -> Result<&EndpointProfile, ConfigError> {
        self.profiles
            .get(name)
            .ok_or_else(|| ConfigError::UnknownProfile {
                name: name.to_string(),
                available: self.profile_names().join(", "),
            })
    }

    /// Resolve a profile, defaulting to the configured default profile.
    pub fn resolve(&self, name: Option<&str>) -> Result<(&str, &EndpointProfile), ConfigError> {
        let name = name.unwrap_or(&self.default_profile);
        let (key, profile) = self
            .profiles
            .get_key_value(name)
            .ok_or_else(|| ConfigError::UnknownProfile {
                name: name.to_string(),
                available: self.profile_names().join(", "),
            })?;
        Ok((key.as_str(), profile))
    }

    /// Absolute URL for `path` on the named (or default) profile.
    pub fn url_for(&self, profile: Option<&str>, path: &str) -> Result<String, ConfigError> {
        let (_, profile) = self.resolve(profile)?;
        Ok(profile.url_for(path))
    }

    pub fn has_profile(&self, name: &str) -> bool {
        self.profiles.contains_key(name)
    }

    pub fn profile_names(&self) -> Vec<&str> {
        self.profiles.keys().map(String::as_str).collect()
    }

    pub fn default_profile(&self) -> &str {
        &self.default_profile
    }

    pub fn token_headers(&self) -> &[String] {
        &self.token_headers
    }

    pub fn storage_key(&self) -> &str {
        &self.storage_key
    }
}

pub(crate) fn default_token_headers() -> Vec<String> {
    [ACCESS_TOKEN, CLIENT, UID, EXPIRY, TOKEN_TYPE]
        .iter()
        .map(|h| h.to_string())
        .collect()
}
