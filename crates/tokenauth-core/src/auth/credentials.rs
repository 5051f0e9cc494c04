use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::storage::StorageBackend;
use crate::config::{default_token_headers, DEFAULT_STORAGE_KEY};

pub const ACCESS_TOKEN: &str = "access-token";
pub const CLIENT: &str = "client";
pub const UID: &str = "uid";
pub const EXPIRY: &str = "expiry";
pub const TOKEN_TYPE: &str = "token-type";

/// Storage key for the name of the endpoint profile the session belongs to.
pub const CURRENT_ENDPOINT_KEY: &str = "currentConfigName";

/// The auth headers of one authenticated session.
///
/// Serialized as a flat JSON object of header name to value. Header names
/// are stored lowercase.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialSet(BTreeMap<String, String>);

impl CredentialSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.as_ref().to_ascii_lowercase(), v.into()))
                .collect(),
        )
    }

    /// Build a set from response headers, but only when every required
    /// header is present and readable. A partial set is never produced.
    pub fn from_headers(headers: &HeaderMap, required: &[String]) -> Option<Self> {
        let mut values = BTreeMap::new();
        for name in required {
            let value = headers.get(name.as_str())?.to_str().ok()?;
            if value.is_empty() {
                return None;
            }
            values.insert(name.to_ascii_lowercase(), value.to_string());
        }
        if values.is_empty() {
            None
        } else {
            Some(Self(values))
        }
    }

    /// Request headers carrying this set. Entries that are not valid
    /// header names or values are skipped.
    pub fn to_header_map(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.0 {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => {
                    headers.insert(name, value);
                }
                _ => warn!(header = %name, "Skipping credential that is not a valid header"),
            }
        }
        headers
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// True when every `required` header has a non-empty value.
    pub fn is_complete(&self, required: &[String]) -> bool {
        !self.0.is_empty()
            && required
                .iter()
                .all(|name| self.get(name).is_some_and(|v| !v.is_empty()))
    }

    pub fn access_token(&self) -> Option<&str> {
        self.get(ACCESS_TOKEN)
    }

    pub fn client(&self) -> Option<&str> {
        self.get(CLIENT)
    }

    pub fn uid(&self) -> Option<&str> {
        self.get(UID)
    }

    pub fn token_type(&self) -> Option<&str> {
        self.get(TOKEN_TYPE)
    }

    /// The `expiry` header, which token-auth servers send as epoch seconds.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let secs = self.get(EXPIRY)?.trim().parse::<i64>().ok()?;
        DateTime::from_timestamp(secs, 0)
    }

    /// Expired when the expiry is known and in the past. Sets without a
    /// readable expiry are left for the server to judge.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().map(|at| at <= now).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Persisted home of the current `CredentialSet`.
///
/// The store is the only writer of its storage key. Writes replace the
/// whole record (last write wins), matching token rotation where each
/// response supersedes the previous token. Only complete sets (every
/// required header present and non-empty) are ever written or returned.
/// Storage failures never reach the caller: they are logged and reads
/// degrade to "no credentials".
///
/// Cloning is cheap and clones share the same backend.
#[derive(Clone)]
pub struct CredentialStore {
    backend: Arc<dyn StorageBackend>,
    key: String,
    required: Vec<String>,
}

impl CredentialStore {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self::with_key(backend, DEFAULT_STORAGE_KEY)
    }

    /// Store under `key`, requiring the default token headers.
    pub fn with_key(backend: Arc<dyn StorageBackend>, key: impl Into<String>) -> Self {
        Self {
            backend,
            key: key.into(),
            required: default_token_headers(),
        }
    }

    /// Require exactly `headers` for a set to count as complete. Usually
    /// `SessionConfig::token_headers()`.
    pub fn with_required_headers(mut self, headers: &[String]) -> Self {
        self.required = headers.iter().map(|h| h.to_ascii_lowercase()).collect();
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn required_headers(&self) -> &[String] {
        &self.required
    }

    fn endpoint_key(&self) -> String {
        format!("{}.{}", self.key, CURRENT_ENDPOINT_KEY)
    }

    /// Overwrite the stored record with `credentials`. An incomplete set is
    /// refused and the stored record is left as it was.
    pub fn persist(&self, credentials: &CredentialSet) {
        if !credentials.is_complete(&self.required) {
            warn!(
                key = %self.key,
                headers = credentials.len(),
                "Refusing to persist incomplete credentials"
            );
            return;
        }
        let json = match serde_json::to_string(credentials) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Failed to serialize credentials");
                return;
            }
        };
        match self.backend.write(&self.key, &json) {
            Ok(()) => debug!(key = %self.key, "Credentials persisted"),
            Err(e) => warn!(key = %self.key, error = %e, "Failed to persist credentials"),
        }
    }

    /// Read the stored record. Missing, unreadable, malformed and incomplete
    /// records are all reported as `None`.
    pub fn retrieve(&self) -> Option<CredentialSet> {
        let raw = match self.backend.read(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %self.key, error = %e, "Failed to read stored credentials");
                return None;
            }
        };
        match serde_json::from_str::<CredentialSet>(&raw) {
            Ok(credentials) if credentials.is_complete(&self.required) => Some(credentials),
            Ok(credentials) => {
                if !credentials.is_empty() {
                    warn!(key = %self.key, "Stored credentials are incomplete, ignoring");
                }
                None
            }
            Err(e) => {
                warn!(key = %self.key, error = %e, "Stored credentials are malformed, ignoring");
                None
            }
        }
    }

    /// Remove the stored credentials and the session's endpoint. Idempotent.
    pub fn clear(&self) {
        if let Err(e) = self.backend.remove(&self.key) {
            warn!(key = %self.key, error = %e, "Failed to clear stored credentials");
        }
        if let Err(e) = self.backend.remove(&self.endpoint_key()) {
            warn!(key = %self.key, error = %e, "Failed to clear stored endpoint");
        }
        debug!(key = %self.key, "Credentials cleared");
    }

    /// Return the store to its pristine state. Meant for test setup and
    /// reconfiguration, not the normal session lifecycle.
    pub fn reset(&self) {
        self.clear();
    }

    /// Remember which endpoint profile the stored session belongs to.
    pub fn persist_endpoint(&self, profile: &str) {
        if let Err(e) = self.backend.write(&self.endpoint_key(), profile) {
            warn!(profile = %profile, error = %e, "Failed to persist current endpoint");
        }
    }

    pub fn retrieve_endpoint(&self) -> Option<String> {
        match self.backend.read(&self.endpoint_key()) {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                warn!(error = %e, "Failed to read current endpoint");
                None
            }
        }
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("key", &self.key)
            .field("required", &self.required)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::storage::{FileStorage, MemoryStorage, StorageError};
    use chrono::Duration;

    fn full_set(token: &str) -> CredentialSet {
        CredentialSet::from_pairs([
            (ACCESS_TOKEN, token),
            (CLIENT, "client-1"),
            (UID, "test@test.com"),
            (EXPIRY, "1893456000"),
            (TOKEN_TYPE, "Bearer"),
        ])
    }

    fn required() -> Vec<String> {
        [ACCESS_TOKEN, CLIENT, UID, EXPIRY, TOKEN_TYPE]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    /// Backend whose every operation fails.
    struct BrokenStorage;

    impl StorageBackend for BrokenStorage {
        fn read(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Err(StorageError::Poisoned)
        }
        fn write(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::Poisoned)
        }
        fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Err(StorageError::Poisoned)
        }
    }

    #[test]
    fn test_persist_then_retrieve_round_trips() {
        let store = CredentialStore::new(Arc::new(MemoryStorage::new()));
        let creds = full_set("abc");
        store.persist(&creds);
        assert_eq!(store.retrieve(), Some(creds));
    }

    #[test]
    fn test_persist_replaces_whole_record() {
        let store = CredentialStore::new(Arc::new(MemoryStorage::new()));
        store.persist(&full_set("first"));
        store.persist(&full_set("second"));
        assert_eq!(store.retrieve(), Some(full_set("second")));
    }

    #[test]
    fn test_incomplete_set_is_never_persisted() {
        let store = CredentialStore::new(Arc::new(MemoryStorage::new()));
        store.persist(&CredentialSet::from_pairs([(ACCESS_TOKEN, "abc")]));
        assert_eq!(store.retrieve(), None);

        // A refused write leaves the previous record in place
        store.persist(&full_set("first"));
        store.persist(&CredentialSet::from_pairs([(ACCESS_TOKEN, "second"), (UID, "x")]));
        assert_eq!(store.retrieve(), Some(full_set("first")));

        let mut blank = full_set("abc");
        blank.0.insert(CLIENT.to_string(), String::new());
        store.persist(&blank);
        assert_eq!(store.retrieve(), Some(full_set("first")));
    }

    #[test]
    fn test_incomplete_record_on_disk_reads_as_absent() {
        let backend = Arc::new(MemoryStorage::new());
        backend
            .write(DEFAULT_STORAGE_KEY, r#"{"access-token":"abc","uid":"x"}"#)
            .unwrap();
        let store = CredentialStore::new(backend);
        assert_eq!(store.retrieve(), None);
    }

    #[test]
    fn test_required_headers_follow_configuration() {
        let narrow = vec![ACCESS_TOKEN.to_string(), "UID".to_string()];
        let store = CredentialStore::new(Arc::new(MemoryStorage::new()))
            .with_required_headers(&narrow);
        assert_eq!(store.required_headers(), &["access-token", "uid"]);

        let set = CredentialSet::from_pairs([(ACCESS_TOKEN, "abc"), (UID, "x")]);
        store.persist(&set);
        assert_eq!(store.retrieve(), Some(set));
    }

    #[test]
    fn test_clear_is_idempotent() {
        let store = CredentialStore::new(Arc::new(MemoryStorage::new()));
        store.clear();
        assert_eq!(store.retrieve(), None);

        store.persist(&full_set("abc"));
        store.persist_endpoint("alt");
        store.clear();
        store.clear();
        assert_eq!(store.retrieve(), None);
        assert_eq!(store.retrieve_endpoint(), None);
    }

    #[test]
    fn test_reset_restores_pristine_state() {
        let store = CredentialStore::new(Arc::new(MemoryStorage::new()));
        store.persist(&full_set("abc"));
        store.persist_endpoint("alt");
        store.reset();
        assert_eq!(store.retrieve(), None);
        assert_eq!(store.retrieve_endpoint(), None);
    }

    #[test]
    fn test_malformed_record_reads_as_absent() {
        let backend = Arc::new(MemoryStorage::new());
        backend.write(DEFAULT_STORAGE_KEY, "{not json").unwrap();
        let store = CredentialStore::new(backend.clone());
        assert_eq!(store.retrieve(), None);

        backend.write(DEFAULT_STORAGE_KEY, r#"["a","b"]"#).unwrap();
        assert_eq!(store.retrieve(), None);

        backend.write(DEFAULT_STORAGE_KEY, "{}").unwrap();
        assert_eq!(store.retrieve(), None);
    }

    #[test]
    fn test_broken_backend_never_panics() {
        let store = CredentialStore::new(Arc::new(BrokenStorage));
        store.persist(&full_set("abc"));
        assert_eq!(store.retrieve(), None);
        store.clear();
        store.persist_endpoint("alt");
        assert_eq!(store.retrieve_endpoint(), None);
    }

    #[test]
    fn test_stores_with_different_keys_are_isolated() {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
        let a = CredentialStore::with_key(backend.clone(), "a");
        let b = CredentialStore::with_key(backend, "b");
        a.persist(&full_set("token-a"));
        assert_eq!(b.retrieve(), None);
        b.clear();
        assert_eq!(a.retrieve().unwrap().access_token(), Some("token-a"));
    }

    #[test]
    fn test_file_backed_store_survives_new_instance() {
        let dir = tempfile::tempdir().unwrap();
        let creds = full_set("abc");
        CredentialStore::new(Arc::new(FileStorage::new(dir.path()))).persist(&creds);

        let reopened = CredentialStore::new(Arc::new(FileStorage::new(dir.path())));
        assert_eq!(reopened.retrieve(), Some(creds));
    }

    #[test]
    fn test_serialized_layout_is_flat_header_map() {
        let json = serde_json::to_value(full_set("abc")).unwrap();
        assert_eq!(json["access-token"], "abc");
        assert_eq!(json["token-type"], "Bearer");
    }

    #[test]
    fn test_from_headers_requires_every_header() {
        let mut headers = HeaderMap::new();
        headers.insert(ACCESS_TOKEN, HeaderValue::from_static("abc"));
        headers.insert(CLIENT, HeaderValue::from_static("client-1"));
        headers.insert(UID, HeaderValue::from_static("test@test.com"));
        headers.insert(EXPIRY, HeaderValue::from_static("1893456000"));
        assert_eq!(CredentialSet::from_headers(&headers, &required()), None);

        headers.insert(TOKEN_TYPE, HeaderValue::from_static("Bearer"));
        let creds = CredentialSet::from_headers(&headers, &required()).unwrap();
        assert_eq!(creds, full_set("abc"));
    }

    #[test]
    fn test_from_headers_rejects_empty_values() {
        let mut headers = HeaderMap::new();
        headers.insert(ACCESS_TOKEN, HeaderValue::from_static(""));
        let required = vec![ACCESS_TOKEN.to_string()];
        assert_eq!(CredentialSet::from_headers(&headers, &required), None);
    }

    #[test]
    fn test_header_map_round_trip() {
        let creds = full_set("abc");
        let headers = creds.to_header_map();
        assert_eq!(headers.get(ACCESS_TOKEN).unwrap(), "abc");
        assert_eq!(CredentialSet::from_headers(&headers, &required()), Some(creds));
    }

    #[test]
    fn test_is_complete() {
        assert!(full_set("abc").is_complete(&required()));
        let partial = CredentialSet::from_pairs([(ACCESS_TOKEN, "abc")]);
        assert!(!partial.is_complete(&required()));
        assert!(!CredentialSet::new().is_complete(&[]));
    }

    #[test]
    fn test_expiry_parsing() {
        let creds = full_set("abc");
        let at = creds.expires_at().unwrap();
        assert_eq!(at.timestamp(), 1893456000);
        assert!(!creds.is_expired(at - Duration::seconds(1)));
        assert!(creds.is_expired(at));

        let no_expiry = CredentialSet::from_pairs([(ACCESS_TOKEN, "abc"), (EXPIRY, "soon")]);
        assert_eq!(no_expiry.expires_at(), None);
        assert!(!no_expiry.is_expired(Utc::now()));
    }
}
