//! Credential checking for live sessions.
//!
//! Only a SHA-256 digest of the password is kept. Digests are compared
//! without early exit.

use crate::error::{ServerError, ServerResult};
use cfgsync_protocol::Credentials;
use sha2::{Digest, Sha256};

/// Authentication configuration.
#[derive(Clone)]
pub struct AuthConfig {
    /// Expected user name.
    pub username: String,
    password_digest: [u8; 32],
}

impl AuthConfig {
    /// Creates a configuration from a clear-text password.
    pub fn new(username: impl Into<String>, password: &str) -> Self {
        Self::with_digest(username, Self::digest(password))
    }

    /// Creates a configuration from a stored password digest.
    pub fn with_digest(username: impl Into<String>, password_digest: [u8; 32]) -> Self {
        Self {
            username: username.into(),
            password_digest,
        }
    }

    /// SHA-256 digest of a password.
    pub fn digest(password: &str) -> [u8; 32] {
        Sha256::digest(password.as_bytes()).into()
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Checks credentials sent in `auth` frames.
#[derive(Debug, Clone)]
pub struct CredentialValidator {
    config: AuthConfig,
}

impl CredentialValidator {
    /// Creates a new validator.
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Validates a credentials pair.
    pub fn validate(&self, credentials: &Credentials) -> ServerResult<()> {
        let digest = AuthConfig::digest(&credentials.password);
        let user_ok = credentials.username == self.config.username;
        let password_ok = constant_time_eq(&digest, &self.config.password_digest);

        if user_ok && password_ok {
            Ok(())
        } else {
            Err(ServerError::AuthenticationFailed(format!(
                "wrong credentials for {:?}",
                credentials.username
            )))
        }
    }
}

fn constant_time_eq(a: &[u8; 32], b: &[u8; 32]) -> bool {
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_matching_credentials() {
        let validator = CredentialValidator::new(AuthConfig::new("root", "toor"));
        assert!(validator.validate(&Credentials::new("root", "toor")).is_ok());
    }

    #[test]
    fn reject_wrong_password() {
        let validator = CredentialValidator::new(AuthConfig::new("root", "toor"));
        let err = validator
            .validate(&Credentials::new("root", "hunter2"))
            .unwrap_err();
        assert!(matches!(err, ServerError::AuthenticationFailed(_)));
        assert!(!err.to_string().contains("hunter2"));
    }

    #[test]
    fn reject_wrong_user() {
        let validator = CredentialValidator::new(AuthConfig::new("root", "toor"));
        assert!(validator.validate(&Credentials::new("admin", "toor")).is_err());
    }

    #[test]
    fn stored_digest() {
        let digest = AuthConfig::digest("toor");
        let validator = CredentialValidator::new(AuthConfig::with_digest("root", digest));
        assert!(validator.validate(&Credentials::new("root", "toor")).is_ok());
    }

    #[test]
    fn debug_hides_digest() {
        let debug = format!("{:?}", AuthConfig::new("root", "toor"));
        assert!(debug.contains("root"));
        assert!(!debug.contains("digest"));
    }
}
