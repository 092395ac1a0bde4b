//! Stored login and the identity handed to a conversation session.
//!
//! Credentials live in a small JSON file (e.g. ~/.oncourse/credentials.json) written after a
//! successful login or registration. A [`SessionIdentity`] can only be built from a non-empty
//! email, so a conversation is never constructed without one.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Persisted login: `{ "userEmail", "userPassword" }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub user_email: String,
    pub user_password: String,
}

impl Credentials {
    pub fn new(user_email: impl Into<String>, user_password: impl Into<String>) -> Self {
        Self {
            user_email: user_email.into(),
            user_password: user_password.into(),
        }
    }

    /// True when both the email and the password are present (trimmed non-empty).
    pub fn is_complete(&self) -> bool {
        !self.user_email.trim().is_empty() && !self.user_password.is_empty()
    }

    /// Load from JSON file. Returns None if the file is missing, invalid, or incomplete.
    pub fn load(path: &Path) -> Option<Self> {
        let s = std::fs::read_to_string(path).ok()?;
        let creds: Self = serde_json::from_str(&s).ok()?;
        creds.is_complete().then_some(creds)
    }

    /// Save to JSON file. Creates parent dirs if needed.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let s = serde_json::to_string_pretty(self).map_err(|e| anyhow::anyhow!("{}", e))?;
        std::fs::write(path, s)?;
        Ok(())
    }

    /// Identity for a conversation with the given patient.
    pub fn session_identity(&self, patient_id: u64) -> Result<SessionIdentity, IdentityError> {
        SessionIdentity::new(self.user_email.clone(), patient_id)
    }
}

/// Remove stored credentials. Missing file is not an error.
pub fn clear(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("user email is empty")]
    MissingEmail,
}

/// The (user, patient) pair a conversation session is bound to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    user_email: String,
    patient_id: u64,
}

impl SessionIdentity {
    pub fn new(user_email: impl Into<String>, patient_id: u64) -> Result<Self, IdentityError> {
        let user_email = user_email.into().trim().to_string();
        if user_email.is_empty() {
            return Err(IdentityError::MissingEmail);
        }
        Ok(Self {
            user_email,
            patient_id,
        })
    }

    pub fn user_email(&self) -> &str {
        &self.user_email
    }

    pub fn patient_id(&self) -> u64 {
        self.patient_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir()
            .join(format!("oncourse-creds-{}-{}", std::process::id(), name))
            .join("credentials.json")
    }

    #[test]
    fn save_load_clear() {
        let path = temp_path("roundtrip");
        let creds = Credentials::new("doc@example.com", "hunter2");
        creds.save(&path).unwrap();
        assert_eq!(Credentials::load(&path), Some(creds));

        clear(&path).unwrap();
        assert_eq!(Credentials::load(&path), None);
        clear(&path).unwrap();
    }

    #[test]
    fn incomplete_file_is_treated_as_absent() {
        let path = temp_path("incomplete");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, r#"{"userEmail":"doc@example.com","userPassword":""}"#).unwrap();
        assert_eq!(Credentials::load(&path), None);
        clear(&path).unwrap();
    }

    #[test]
    fn identity_requires_email() {
        assert_eq!(
            SessionIdentity::new("   ", 42),
            Err(IdentityError::MissingEmail)
        );
        let id = Credentials::new(" doc@example.com ", "pw")
            .session_identity(42)
            .unwrap();
        assert_eq!(id.user_email(), "doc@example.com");
        assert_eq!(id.patient_id(), 42);
    }
}
