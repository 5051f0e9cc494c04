//! Sign-in attempt state machine and user attributes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::api::AuthError;

/// Attributes of the signed-in user, taken from the response body's `data`
/// object as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserAttributes(Map<String, Value>);

impl UserAttributes {
    pub fn new(attributes: Map<String, Value>) -> Self {
        Self(attributes)
    }

    /// Pull `data` out of a `{ "data": { ... } }` body. Anything else
    /// yields empty attributes.
    pub fn from_body(body: &Value) -> Self {
        match body.get("data") {
            Some(Value::Object(data)) => Self(data.clone()),
            _ => Self::default(),
        }
    }

    pub fn uid(&self) -> Option<&str> {
        self.get_str("uid")
    }

    pub fn email(&self) -> Option<&str> {
        self.get_str("email")
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }
}

/// Where a sign-in attempt is in its lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub enum SignInState {
    Idle,
    Submitting,
    Authenticated(UserAttributes),
    Failed(Vec<String>),
}

impl SignInState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SignInState::Authenticated(_) | SignInState::Failed(_))
    }

    fn name(&self) -> &'static str {
        match self {
            SignInState::Idle => "idle",
            SignInState::Submitting => "submitting",
            SignInState::Authenticated(_) => "authenticated",
            SignInState::Failed(_) => "failed",
        }
    }
}

/// One sign-in form's attempt: `Idle -> Submitting -> {Authenticated, Failed}`.
///
/// A request may only be dispatched from `Idle`. Terminal states go back to
/// `Idle` through `reset`, which the host calls when the form is cleared.
#[derive(Debug, Clone)]
pub struct SignInAttempt {
    state: SignInState,
}

impl SignInAttempt {
    pub fn new() -> Self {
        Self {
            state: SignInState::Idle,
        }
    }

    pub fn state(&self) -> &SignInState {
        &self.state
    }

    /// Enter `Submitting`. Fails unless the attempt is `Idle`.
    pub fn begin(&mut self) -> Result<(), AuthError> {
        match self.state {
            SignInState::Idle => {
                self.state = SignInState::Submitting;
                Ok(())
            }
            ref other => Err(AuthError::AttemptNotIdle(other.name())),
        }
    }

    pub(crate) fn succeed(&mut self, user: UserAttributes) {
        debug_assert_eq!(self.state, SignInState::Submitting);
        self.state = SignInState::Authenticated(user);
    }

    pub(crate) fn fail(&mut self, errors: Vec<String>) {
        debug_assert_eq!(self.state, SignInState::Submitting);
        self.state = SignInState::Failed(errors);
    }

    /// Return to `Idle`. An attempt still `Submitting` is left alone.
    pub fn reset(&mut self) {
        if self.state.is_terminal() {
            self.state = SignInState::Idle;
        }
    }
}

impl Default for SignInAttempt {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_user_attributes_from_body() {
        let attrs = UserAttributes::from_body(&json!({"data": {"uid": "test@test.com", "id": 7}}));
        assert_eq!(attrs.uid(), Some("test@test.com"));
        assert_eq!(attrs.get("id"), Some(&json!(7)));

        assert!(UserAttributes::from_body(&json!({"errors": ["x"]})).is_empty());
        assert!(UserAttributes::from_body(&json!({"data": "nope"})).is_empty());
    }

    #[test]
    fn test_attempt_happy_path() {
        let mut attempt = SignInAttempt::new();
        attempt.begin().unwrap();
        assert_eq!(attempt.state(), &SignInState::Submitting);

        attempt.succeed(UserAttributes::default());
        assert!(attempt.state().is_terminal());

        attempt.reset();
        assert_eq!(attempt.state(), &SignInState::Idle);
    }

    #[test]
    fn test_attempt_cannot_resubmit_without_reset() {
        let mut attempt = SignInAttempt::new();
        attempt.begin().unwrap();
        assert!(matches!(attempt.begin(), Err(AuthError::AttemptNotIdle("submitting"))));

        attempt.fail(vec!["bad".into()]);
        assert!(matches!(attempt.begin(), Err(AuthError::AttemptNotIdle("failed"))));

        attempt.reset();
        attempt.begin().unwrap();
    }

    #[test]
    fn test_reset_does_not_abandon_submitting() {
        let mut attempt = SignInAttempt::new();
        attempt.begin().unwrap();
        attempt.reset();
        assert_eq!(attempt.state(), &SignInState::Submitting);
    }
}
