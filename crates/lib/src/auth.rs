//! Login bootstrap: check a stored login, log in, or register a new account.
//!
//! The service stores the password on the user record; login compares it client-side and,
//! on success, persists credentials so the patient list and chat can start without asking again.

use std::path::Path;

use crate::api::{ApiClient, ApiError};
use crate::credentials::{self, Credentials};

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("please enter both email and password")]
    MissingFields,
    #[error("registration failed: {0}")]
    Registration(String),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("storing credentials: {0}")]
    Store(#[from] anyhow::Error),
}

/// Result of a login attempt that reached the service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginOutcome {
    LoggedIn(Credentials),
    WrongPassword,
    /// No account for this email; the caller may offer [`register`].
    NotRegistered,
}

/// Validate stored credentials against the service.
/// Returns the credentials when the account still exists; clears the file when the service rejects it.
/// Transport errors leave the stored file untouched.
pub async fn check_stored_login(
    api: &ApiClient,
    store_path: &Path,
) -> Result<Option<Credentials>, AuthError> {
    let Some(creds) = Credentials::load(store_path) else {
        return Ok(None);
    };
    match api.get_user(&creds.user_email).await {
        Ok(_) => Ok(Some(creds)),
        Err(e) if e.is_status() => {
            log::info!("stored login for {} rejected, clearing", creds.user_email);
            credentials::clear(store_path)?;
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn login(
    api: &ApiClient,
    store_path: &Path,
    email: &str,
    password: &str,
) -> Result<LoginOutcome, AuthError> {
    let email = email.trim();
    if email.is_empty() || password.is_empty() {
        return Err(AuthError::MissingFields);
    }
    let user = match api.get_user(email).await {
        Ok(u) => u,
        Err(e) if e.is_status() => return Ok(LoginOutcome::NotRegistered),
        Err(e) => return Err(e.into()),
    };
    if user.password.as_deref() != Some(password) {
        return Ok(LoginOutcome::WrongPassword);
    }
    let creds = Credentials::new(email, password);
    creds.save(store_path)?;
    log::info!("logged in as {}", email);
    Ok(LoginOutcome::LoggedIn(creds))
}

pub async fn register(
    api: &ApiClient,
    store_path: &Path,
    email: &str,
    password: &str,
) -> Result<Credentials, AuthError> {
    let email = email.trim();
    if email.is_empty() || password.is_empty() {
        return Err(AuthError::MissingFields);
    }
    match api.register_user(email, password).await {
        Ok(()) => {}
        Err(ApiError::Api { body, .. }) => return Err(AuthError::Registration(body)),
        Err(e) => return Err(e.into()),
    }
    let creds = Credentials::new(email, password);
    creds.save(store_path)?;
    log::info!("registered {}", email);
    Ok(creds)
}

/// Forget the stored login.
pub fn logout(store_path: &Path) -> Result<(), AuthError> {
    credentials::clear(store_path)?;
    Ok(())
}
