//! tokenauth core - client-side session handling for token-auth APIs.
//!
//! Token-auth servers (devise_token_auth and friends) issue a set of auth
//! headers on sign-in and rotate them on every authenticated response. This
//! crate keeps that header set in durable storage, attaches it to outgoing
//! requests and persists the rotated set from each response.
//!
//! - `auth`: `CredentialSet`, `CredentialStore`, storage backends and the
//!   sign-in attempt state machine
//! - `api`: `SessionCoordinator`, the HTTP transport seam and error types
//! - `config`: endpoint profiles and token header configuration
//! - `signals`: events emitted to the presentation layer

pub mod api;
pub mod auth;
pub mod config;
pub mod signals;

#[cfg(test)]
mod test_support;

pub use api::{ApiError, AuthError, Exchange, ReqwestTransport, SessionCoordinator, Transport};
pub use auth::{
    CredentialSet, CredentialStore, FileStorage, KeyringStorage, MemoryStorage, SignInAttempt,
    SignInState, StorageBackend, StorageError, UserAttributes,
};
pub use config::{ConfigError, EndpointProfile, SessionConfig};
pub use signals::AuthSignal;
