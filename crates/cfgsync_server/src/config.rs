//! Server configuration.

use crate::auth::AuthConfig;
use cfgsync_protocol::ConfigSnapshot;

/// Configuration for the configuration server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum concurrent live sessions.
    pub max_sessions: usize,
    /// Maximum number of fields in one write.
    pub max_batch: usize,
    /// Credentials required from live sessions, if any.
    pub auth: Option<AuthConfig>,
    /// Fields pushed to every new session in the `config` frame.
    pub capability_fields: Vec<String>,
    /// Configuration the server starts with.
    pub initial: ConfigSnapshot,
}

impl ServerConfig {
    /// Creates a new server configuration.
    pub fn new(initial: ConfigSnapshot) -> Self {
        Self {
            max_sessions: 1000,
            max_batch: 100,
            auth: None,
            capability_fields: vec!["localStorage".to_string()],
            initial,
        }
    }

    /// Sets the maximum concurrent sessions.
    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }

    /// Sets the maximum write size.
    pub fn with_max_batch(mut self, size: usize) -> Self {
        self.max_batch = size;
        self
    }

    /// Requires the given credentials from live sessions.
    pub fn with_auth(mut self, auth: AuthConfig) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Sets the fields pushed on connect.
    pub fn with_capability_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capability_fields = fields.into_iter().map(Into::into).collect();
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(ConfigSnapshot::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.max_sessions, 1000);
        assert!(config.auth.is_none());
        assert_eq!(config.capability_fields, vec!["localStorage".to_string()]);
        assert!(config.initial.is_empty());
    }

    #[test]
    fn config_builder() {
        let config = ServerConfig::default()
            .with_max_sessions(4)
            .with_max_batch(10)
            .with_capability_fields(["localStorage", "online"])
            .with_auth(AuthConfig::new("root", "toor"));

        assert_eq!(config.max_sessions, 4);
        assert_eq!(config.max_batch, 10);
        assert_eq!(config.capability_fields.len(), 2);
        assert_eq!(config.auth.map(|a| a.username), Some("root".to_string()));
    }
}
