//! Session coordinator: mediates every authenticated HTTP exchange.
//!
//! For each request the coordinator resolves the endpoint URL, attaches the
//! stored credentials, sends the request and, on a 2xx response carrying a
//! complete rotated header set, persists it. Non-2xx responses never touch
//! the store.
//!
//! Exchanges are serialized through an async gate: the endpoint is resolved,
//! credentials are read, the request is sent and any rotated credentials
//! (with the endpoint they belong to) are persisted before the next exchange
//! starts. Without this, two overlapping requests would both
//! carry the same token and the slower response could overwrite the newer
//! token with a stale one.
//!
//! Dropping an exchange future (for example when the host abandons a
//! sign-in) releases the gate and discards any late response: nothing is
//! persisted for an exchange that did not complete.

use std::sync::Arc;

use chrono::Utc;
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use super::error::{ApiError, AuthError, TransportError};
use super::transport::{ApiRequest, ReqwestTransport, Transport};
use crate::auth::{CredentialSet, CredentialStore, SignInAttempt, UserAttributes};
use crate::config::{EndpointProfile, SessionConfig};
use crate::signals::{AuthSignal, SignalSink};

/// Outcome of one HTTP exchange.
#[derive(Debug, Clone, PartialEq)]
pub enum Exchange {
    Success {
        status: StatusCode,
        body: Value,
        /// Whether the response carried a complete header set that was persisted
        rotated: bool,
    },
    Failure {
        /// `None` when no response was received
        status: Option<StatusCode>,
        errors: Vec<String>,
    },
}

impl Exchange {
    pub fn is_success(&self) -> bool {
        matches!(self, Exchange::Success { .. })
    }

    pub fn errors(&self) -> &[String] {
        match self {
            Exchange::Success { .. } => &[],
            Exchange::Failure { errors, .. } => errors,
        }
    }

    pub fn body(&self) -> Option<&Value> {
        match self {
            Exchange::Success { body, .. } => Some(body),
            Exchange::Failure { .. } => None,
        }
    }
}

pub struct SessionCoordinator<T = ReqwestTransport> {
    config: Arc<SessionConfig>,
    store: CredentialStore,
    transport: T,
    signals: SignalSink,
    gate: Mutex<()>,
}

impl SessionCoordinator<ReqwestTransport> {
    /// Coordinator using the default `reqwest` transport.
    pub fn with_reqwest(
        config: SessionConfig,
        store: CredentialStore,
    ) -> Result<Self, TransportError> {
        Ok(Self::new(config, store, ReqwestTransport::new()?))
    }
}

impl<T: Transport> SessionCoordinator<T> {
    /// The store is made to require the config's token headers.
    pub fn new(config: SessionConfig, store: CredentialStore, transport: T) -> Self {
        let store = store.with_required_headers(config.token_headers());
        Self {
            config: Arc::new(config),
            store,
            transport,
            signals: SignalSink::default(),
            gate: Mutex::new(()),
        }
    }

    /// Deliver outcome signals to `tx`. Signals are never waited on: when the
    /// channel is full or closed the signal is dropped with a log line.
    pub fn with_signals(mut self, tx: mpsc::Sender<AuthSignal>) -> Self {
        self.signals = SignalSink::new(tx);
        self
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Absolute URL for `path` on the named profile, or on the session's
    /// profile when `profile` is `None`.
    pub fn resolve_url(&self, profile: Option<&str>, path: &str) -> Result<String, AuthError> {
        let (_, endpoint) = self.resolve_profile(profile)?;
        Ok(endpoint.url_for(path))
    }

    /// Pick the endpoint profile for a call. An explicit name must exist.
    /// Without one, the profile the current session was established against
    /// wins over the configured default.
    fn resolve_profile(
        &self,
        profile: Option<&str>,
    ) -> Result<(&str, &EndpointProfile), AuthError> {
        if let Some(name) = profile {
            return Ok(self.config.resolve(Some(name))?);
        }
        if let Some(current) = self.store.retrieve_endpoint() {
            if self.config.has_profile(&current) {
                return Ok(self.config.resolve(Some(&current))?);
            }
            warn!(profile = %current, "Stored session endpoint is no longer configured");
        }
        Ok(self.config.resolve(None)?)
    }

    /// Stored credentials, if a complete set is present.
    pub fn current_credentials(&self) -> Option<CredentialSet> {
        self.store.retrieve()
    }

    /// True when complete, unexpired credentials are stored.
    pub fn is_authenticated(&self) -> bool {
        self.current_credentials()
            .map(|c| !c.is_expired(Utc::now()))
            .unwrap_or(false)
    }

    /// Send one request with the stored credentials attached and persist
    /// any rotated credentials from a 2xx response.
    ///
    /// The profile is resolved only once the gate is held, so a call queued
    /// behind a sign-in goes to the endpoint that sign-in established.
    /// `build` turns the resolved profile into the request path and body.
    /// With `binds_session`, a rotation also records the profile as the
    /// session's endpoint.
    async fn exchange<F>(
        &self,
        profile: Option<&str>,
        method: Method,
        binds_session: bool,
        build: F,
    ) -> Result<Exchange, AuthError>
    where
        F: FnOnce(&EndpointProfile) -> (String, Option<Value>),
    {
        let _guard = self.gate.lock().await;

        let (profile_name, endpoint) = self.resolve_profile(profile)?;
        let (path, body) = build(endpoint);
        let mut request = ApiRequest::new(method, endpoint.url_for(&path));
        if let Some(body) = body {
            request = request.with_body(body);
        }
        match self.current_credentials() {
            Some(credentials) => request = request.with_headers(credentials.to_header_map()),
            None => debug!(url = %request.url, "No stored credentials, sending unauthenticated"),
        }

        let response = match self.transport.send(request).await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Request failed before a response was received");
                return Ok(Exchange::Failure {
                    status: None,
                    errors: vec![e.to_string()],
                });
            }
        };

        if !response.status.is_success() {
            let errors = ApiError::messages(response.status, &response.body);
            debug!(status = %response.status, errors = errors.len(), "Request rejected");
            return Ok(Exchange::Failure {
                status: Some(response.status),
                errors,
            });
        }

        let fresh = CredentialSet::from_headers(&response.headers, self.config.token_headers());
        let rotated = match fresh {
            Some(credentials) => {
                self.store.persist(&credentials);
                if binds_session {
                    self.store.persist_endpoint(profile_name);
                }
                debug!(profile = %profile_name, "Rotated credentials persisted");
                true
            }
            None => {
                debug!("Response carried no complete credential set, keeping stored credentials");
                false
            }
        };

        Ok(Exchange::Success {
            status: response.status,
            body: response.json(),
            rotated,
        })
    }

    /// Authenticated request to any API path, with the same rotation rules
    /// as the auth flows.
    pub async fn fetch(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Exchange, AuthError> {
        self.exchange(None, method, false, |_| (path.to_string(), body)).await
    }

    /// Email/password sign-in.
    ///
    /// Configuration errors and an attempt that is not `Idle` are returned
    /// as `Err` before anything is sent. Rejected credentials come back as
    /// `Ok(Exchange::Failure)` together with a `SignInFailed` signal; the
    /// store is left as it was.
    pub async fn sign_in(
        &self,
        attempt: &mut SignInAttempt,
        email: &str,
        password: &str,
        profile: Option<&str>,
    ) -> Result<Exchange, AuthError> {
        if let Some(name) = profile {
            self.config.resolve(Some(name))?;
        }
        attempt.begin()?;

        info!(profile = ?profile, "Signing in");
        let body = json!({ "email": email, "password": password });
        let outcome = match self
            .exchange(profile, Method::POST, true, |endpoint| {
                (endpoint.email_sign_in_path.clone(), Some(body))
            })
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                attempt.fail(vec![e.to_string()]);
                return Err(e);
            }
        };

        match outcome {
            Exchange::Success { ref body, rotated, .. } => {
                if !rotated {
                    warn!("Sign-in succeeded without a complete credential set");
                }
                let user = UserAttributes::from_body(body);
                info!(uid = ?user.uid(), "Sign-in succeeded");
                attempt.succeed(user.clone());
                self.signals.emit(AuthSignal::SignInSucceeded(user));
            }
            Exchange::Failure { ref errors, status } => {
                info!(status = ?status, "Sign-in failed");
                attempt.fail(errors.clone());
                self.signals.emit(AuthSignal::SignInFailed(errors.clone()));
            }
        }
        Ok(outcome)
    }

    /// Email registration. A server that signs the user in on registration
    /// rotates credentials like any other success.
    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        password_confirmation: &str,
        profile: Option<&str>,
    ) -> Result<Exchange, AuthError> {
        info!(profile = ?profile, "Signing up");
        let outcome = self
            .exchange(profile, Method::POST, true, |endpoint| {
                let mut body = json!({
                    "email": email,
                    "password": password,
                    "password_confirmation": password_confirmation,
                });
                if let Some(ref confirm_url) = endpoint.confirm_success_url {
                    body["confirm_success_url"] = json!(confirm_url);
                }
                (endpoint.email_registration_path.clone(), Some(body))
            })
            .await?;
        match outcome {
            Exchange::Success { ref body, .. } => {
                let user = UserAttributes::from_body(body);
                self.signals.emit(AuthSignal::SignUpSucceeded(user));
            }
            Exchange::Failure { ref errors, .. } => {
                self.signals.emit(AuthSignal::SignUpFailed(errors.clone()));
            }
        }
        Ok(outcome)
    }

    /// Sign out. The server is told first, with credentials attached; the
    /// local credentials are cleared whatever it answers.
    pub async fn sign_out(&self, profile: Option<&str>) -> Result<Exchange, AuthError> {
        if let Some(name) = profile {
            self.config.resolve(Some(name))?;
        }

        let outcome = if self.current_credentials().is_some() {
            self.exchange(profile, Method::DELETE, false, |endpoint| {
                (endpoint.sign_out_path.clone(), None)
            })
            .await?
        } else {
            debug!("Signing out without stored credentials, skipping request");
            Exchange::Success {
                status: StatusCode::OK,
                body: Value::Null,
                rotated: false,
            }
        };

        if let Exchange::Failure { ref errors, .. } = outcome {
            warn!(errors = ?errors, "Server rejected sign-out");
            self.signals.emit(AuthSignal::SignOutFailed(errors.clone()));
        }
        self.clear_credentials().await;
        info!("Signed out");
        Ok(outcome)
    }

    /// Ask the API to email a password reset link.
    pub async fn request_password_reset(
        &self,
        email: &str,
        profile: Option<&str>,
    ) -> Result<Exchange, AuthError> {
        let outcome = self
            .exchange(profile, Method::POST, false, |endpoint| {
                let mut body = json!({ "email": email });
                if let Some(ref redirect) = endpoint.password_reset_success_url {
                    body["redirect_url"] = json!(redirect);
                }
                (endpoint.password_reset_path.clone(), Some(body))
            })
            .await?;
        match outcome {
            Exchange::Success { ref body, .. } => {
                let message = body.get("message").and_then(Value::as_str).map(String::from);
                self.signals.emit(AuthSignal::PasswordResetRequested(message));
            }
            Exchange::Failure { ref errors, .. } => {
                self.signals.emit(AuthSignal::PasswordResetFailed(errors.clone()));
            }
        }
        Ok(outcome)
    }

    /// Change the signed-in user's password.
    pub async fn update_password(
        &self,
        password: &str,
        password_confirmation: &str,
        profile: Option<&str>,
    ) -> Result<Exchange, AuthError> {
        let body = json!({
            "password": password,
            "password_confirmation": password_confirmation,
        });
        let outcome = self
            .exchange(profile, Method::PUT, false, |endpoint| {
                (endpoint.password_update_path.clone(), Some(body))
            })
            .await?;
        match outcome {
            Exchange::Success { ref body, .. } => {
                let user = UserAttributes::from_body(body);
                self.signals.emit(AuthSignal::PasswordUpdated(user));
            }
            Exchange::Failure { ref errors, .. } => {
                self.signals.emit(AuthSignal::PasswordUpdateFailed(errors.clone()));
            }
        }
        Ok(outcome)
    }

    /// Drop the stored session, e.g. after the host detects a failed refresh.
    pub async fn invalidate(&self) {
        info!("Invalidating stored credentials");
        self.clear_credentials().await;
    }

    async fn clear_credentials(&self) {
        {
            // Wait out any in-flight exchange so it cannot persist after the clear
            let _guard = self.gate.lock().await;
            self.store.clear();
        }
        self.signals.emit(AuthSignal::CredentialsCleared);
    }
}
