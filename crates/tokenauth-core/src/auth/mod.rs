//! Authentication state: credentials, their storage and sign-in attempts.
//!
//! This module provides:
//! - `CredentialSet`: the auth headers of one session
//! - `CredentialStore`: the single persisted home of the current set
//! - `StorageBackend`: file, OS keychain and in-memory storage
//! - `SignInAttempt`: the per-form sign-in state machine

pub mod credentials;
pub mod session;
pub mod storage;

pub use credentials::{CredentialSet, CredentialStore};
pub use session::{SignInAttempt, SignInState, UserAttributes};
pub use storage::{FileStorage, KeyringStorage, MemoryStorage, StorageBackend, StorageError};
