//! Configuration for the sync engine.

use cfgsync_protocol::{CONFIG_API_PATH, CONFIG_NAMESPACE};
use std::time::Duration;

/// What happens to updates synthesized by dependency rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ForcedUpdatePolicy {
    /// Forced updates are sent like any other accepted update.
    #[default]
    Propagate,
    /// Forced updates only change the local store and presentation.
    LocalOnly,
}

/// Configuration for the sync engine.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Server origin (e.g., "http://localhost:8000").
    pub server_url: String,
    /// Path prefix the application is mounted under.
    pub prefix: String,
    /// Live channel reconnect behavior.
    pub reconnect: ReconnectConfig,
    /// Timeout for fallback reads and writes.
    pub request_timeout: Duration,
    /// Whether forced updates are propagated.
    pub forced_updates: ForcedUpdatePolicy,
    /// Bool field that enables authentication.
    pub auth_field: String,
    /// Text field holding the user name.
    pub username_field: String,
    /// Text field holding the password.
    pub password_field: String,
    /// Bool field that grants client-side storage.
    pub storage_field: String,
    /// Whether the configuration dialog is offered at all.
    pub dialog_enabled: bool,
}

impl SyncConfig {
    /// Creates a new sync configuration.
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            prefix: String::new(),
            reconnect: ReconnectConfig::default(),
            request_timeout: Duration::from_secs(30),
            forced_updates: ForcedUpdatePolicy::default(),
            auth_field: "auth".into(),
            username_field: "username".into(),
            password_field: "password".into(),
            storage_field: "localStorage".into(),
            dialog_enabled: true,
        }
    }

    /// Sets the path prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Sets the reconnect configuration.
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Sets the fallback request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the forced update policy.
    pub fn with_forced_updates(mut self, policy: ForcedUpdatePolicy) -> Self {
        self.forced_updates = policy;
        self
    }

    /// Sets the field names used for the authentication handshake.
    pub fn with_auth_fields(
        mut self,
        auth: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.auth_field = auth.into();
        self.username_field = username.into();
        self.password_field = password.into();
        self
    }

    /// Sets the storage permission field.
    pub fn with_storage_field(mut self, field: impl Into<String>) -> Self {
        self.storage_field = field.into();
        self
    }

    /// Enables or disables the configuration dialog.
    ///
    /// A disabled dialog never loads the configuration or opens the live channel.
    pub fn with_dialog(mut self, enabled: bool) -> Self {
        self.dialog_enabled = enabled;
        self
    }

    /// URL of the live configuration channel.
    pub fn live_url(&self) -> String {
        format!("{}{}{}", self.origin(), self.prefix, CONFIG_NAMESPACE)
    }

    /// URL of the fallback configuration endpoint.
    pub fn api_url(&self) -> String {
        format!("{}{}{}", self.origin(), self.prefix, CONFIG_API_PATH)
    }

    fn origin(&self) -> &str {
        self.server_url.trim_end_matches('/')
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new("http://127.0.0.1:8000")
    }
}

/// Configuration for live channel reconnects.
///
/// The default never gives up: attempts are unbounded and the delay
/// between them is capped at five seconds.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of consecutive failed attempts, `None` for unbounded.
    pub max_attempts: Option<u32>,
    /// Delay after the first failed attempt.
    pub initial_delay: Duration,
    /// Upper bound for any delay.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add jitter to delays.
    pub add_jitter: bool,
}

impl ReconnectConfig {
    /// Creates an unbounded reconnect configuration.
    pub fn new() -> Self {
        Self {
            max_attempts: None,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Creates a configuration that stops after `max_attempts` consecutive failures.
    pub fn bounded(max_attempts: u32) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            ..Self::new()
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    pub fn with_jitter(mut self, add_jitter: bool) -> Self {
        self.add_jitter = add_jitter;
        self
    }

    /// Returns true if another attempt is allowed after `failures` consecutive failures.
    pub fn allows_attempt(&self, failures: u32) -> bool {
        self.max_attempts.map_or(true, |max| failures < max)
    }

    /// Calculates the delay before the next attempt after `failures` consecutive failures.
    ///
    /// The result never exceeds `max_delay`; jitter only shortens it.
    pub fn delay_for_attempt(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }

        let exponent = failures.saturating_sub(1).min(i32::MAX as u32) as i32;
        let base_delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let max_secs = self.max_delay.as_secs_f64();
        // Negative multipliers can flip the sign; NaN comes from 0 * inf
        let delay_secs = if base_delay.is_nan() {
            max_secs
        } else {
            base_delay.clamp(0.0, max_secs)
        };

        if self.add_jitter {
            // Up to 25% shorter
            let jitter = delay_secs * 0.25 * rand::random::<f64>();
            Duration::from_secs_f64(delay_secs - jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::new()
    }
}
