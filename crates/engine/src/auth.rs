use std::sync::{Arc, PoisonError, RwLock};

use once_cell::sync::Lazy;
use regex::Regex;

use parlance_shared::{AuthResponse, Credentials, User};

use crate::error::{ChatError, ChatResult};

pub const PASSWORD_MIN_LENGTH: usize = 6;

static EMAIL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}$").expect("email pattern compiles")
});

#[derive(Clone, Debug)]
struct AuthState {
    token: String,
    user: User,
}

/// The signed-in user and their bearer token.
///
/// Created once at start-up and handed to everything that talks to the
/// backend. Clones share the same state, so `clear()` on logout (or on a
/// 401) is seen by the transport and the REST client alike.
#[derive(Clone, Debug, Default)]
pub struct AuthContext {
    inner: Arc<RwLock<Option<AuthState>>>,
}

impl AuthContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn signed_in(token: impl Into<String>, user: User) -> Self {
        let context = Self::new();
        context.set(token.into(), user);
        context
    }

    pub fn token(&self) -> Option<String> {
        self.read(|state| state.token.clone())
    }

    pub fn user(&self) -> Option<User> {
        self.read(|state| state.user.clone())
    }

    pub fn is_authenticated(&self) -> bool {
        self.read(|_| ()).is_some()
    }

    pub fn establish(&self, response: &AuthResponse) {
        self.set(response.access_token.clone(), response.user.clone());
    }

    pub fn clear(&self) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if guard.take().is_some() {
            tracing::info!("auth session cleared");
        }
    }

    fn set(&self, token: String, user: User) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Some(AuthState { token, user });
    }

    fn read<T>(&self, f: impl FnOnce(&AuthState) -> T) -> Option<T> {
        let guard = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        guard.as_ref().map(f)
    }
}

/// Form-level checks run before any login or register request.
pub fn validate_credentials(credentials: &Credentials) -> ChatResult<()> {
    let email = credentials.email.trim();
    if email.is_empty() {
        return Err(ChatError::Validation("Email is required".into()));
    }
    if !EMAIL_PATTERN.is_match(email) {
        return Err(ChatError::Validation("Invalid email address".into()));
    }
    if credentials.password.is_empty() {
        return Err(ChatError::Validation("Password is required".into()));
    }
    if credentials.password.chars().count() < PASSWORD_MIN_LENGTH {
        return Err(ChatError::Validation(format!(
            "Password must be at least {PASSWORD_MIN_LENGTH} characters"
        )));
    }
    Ok(())
}
