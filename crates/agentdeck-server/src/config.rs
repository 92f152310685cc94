// ABOUTME: Configuration loading and validation for the agentdeck server.
// ABOUTME: Reads AGENTDECK_* environment variables and refuses remote binds without a token.

use std::net::SocketAddr;
use std::path::PathBuf;

use agentdeck_agent::controller::DEFAULT_MEMORY_TOKEN_LIMIT;
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("AGENTDECK_BIND is not a valid socket address: {0}")]
    InvalidBind(String),

    #[error("AGENTDECK_MEMORY_TOKEN_LIMIT is not a positive integer: {0}")]
    InvalidTokenLimit(String),

    #[error("{0} is not a loopback address; set AGENTDECK_ALLOW_REMOTE=true to bind it")]
    RemoteNotAllowed(SocketAddr),

    #[error("AGENTDECK_ALLOW_REMOTE is true but AGENTDECK_AUTH_TOKEN is not set; refusing to start without authentication")]
    RemoteWithoutToken,
}

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: SocketAddr,
    /// SQLite file for runs and sessions; None keeps everything in memory.
    pub database: Option<PathBuf>,
    pub allow_remote: bool,
    pub auth_token: Option<String>,
    pub memory_token_limit: usize,
    pub default_model: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 6001)),
            database: None,
            allow_remote: false,
            auth_token: None,
            memory_token_limit: DEFAULT_MEMORY_TOKEN_LIMIT,
            default_model: "gpt-4.1-nano".to_string(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// Environment variables:
    /// - AGENTDECK_BIND: socket address to bind (default: 127.0.0.1:6001)
    /// - AGENTDECK_DATABASE: SQLite path; unset or `:memory:` keeps state in memory
    /// - AGENTDECK_ALLOW_REMOTE: allow non-loopback binds (default: false)
    /// - AGENTDECK_AUTH_TOKEN: bearer token for /entities routes (optional)
    /// - AGENTDECK_MEMORY_TOKEN_LIMIT: session history budget (default: 40000)
    /// - AGENTDECK_DEFAULT_MODEL: model label reported by /health (default: gpt-4.1-nano)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let bind = match std::env::var("AGENTDECK_BIND") {
            Ok(bind_str) => bind_str
                .parse()
                .map_err(|_| ConfigError::InvalidBind(bind_str))?,
            Err(_) => defaults.bind,
        };

        let database = std::env::var("AGENTDECK_DATABASE")
            .ok()
            .and_then(|p| parse_database(&p));

        let allow_remote = std::env::var("AGENTDECK_ALLOW_REMOTE")
            .map(|v| v == "true" || v == "1" || v == "yes")
            .unwrap_or(false);

        let auth_token = std::env::var("AGENTDECK_AUTH_TOKEN")
            .ok()
            .filter(|t| !t.is_empty());

        let memory_token_limit = match std::env::var("AGENTDECK_MEMORY_TOKEN_LIMIT") {
            Ok(raw) => raw
                .parse::<usize>()
                .ok()
                .filter(|n| *n > 0)
                .ok_or(ConfigError::InvalidTokenLimit(raw))?,
            Err(_) => defaults.memory_token_limit,
        };

        let default_model = std::env::var("AGENTDECK_DEFAULT_MODEL")
            .ok()
            .filter(|m| !m.is_empty())
            .unwrap_or(defaults.default_model);

        let config = Self {
            bind,
            database,
            allow_remote,
            auth_token,
            memory_token_limit,
            default_model,
        };
        config.validate()?;
        Ok(config)
    }

    /// Override the bind address and re-check the remote access rules.
    pub fn with_bind(mut self, bind: SocketAddr) -> Result<Self, ConfigError> {
        self.bind = bind;
        self.validate()?;
        Ok(self)
    }

    pub fn with_database(mut self, database: &str) -> Self {
        self.database = parse_database(database);
        self
    }

    /// Security validation: remote binds must be opted into and authenticated.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.allow_remote && self.auth_token.is_none() {
            return Err(ConfigError::RemoteWithoutToken);
        }
        if !self.allow_remote && !self.bind.ip().is_loopback() {
            return Err(ConfigError::RemoteNotAllowed(self.bind));
        }
        Ok(())
    }
}

fn parse_database(raw: &str) -> Option<PathBuf> {
    let raw = raw.trim();
    if raw.is_empty() || raw == ":memory:" {
        None
    } else {
        Some(PathBuf::from(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Tests mutate process-wide environment variables.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const VARS: [&str; 6] = [
        "AGENTDECK_BIND",
        "AGENTDECK_DATABASE",
        "AGENTDECK_ALLOW_REMOTE",
        "AGENTDECK_AUTH_TOKEN",
        "AGENTDECK_MEMORY_TOKEN_LIMIT",
        "AGENTDECK_DEFAULT_MODEL",
    ];

    fn clear_env() {
        // SAFETY: test-only code, serialized by ENV_LOCK
        unsafe {
            for var in VARS {
                std::env::remove_var(var);
            }
        }
    }

    #[test]
    fn config_loads_defaults() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();

        let config = ServerConfig::from_env().unwrap();

        assert_eq!(config.bind, "127.0.0.1:6001".parse::<SocketAddr>().unwrap());
        assert!(config.database.is_none());
        assert!(!config.allow_remote);
        assert!(config.auth_token.is_none());
        assert_eq!(config.memory_token_limit, 40_000);
        assert_eq!(config.default_model, "gpt-4.1-nano");
    }

    #[test]
    fn config_reads_database_and_limits() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        // SAFETY: test-only code, serialized by ENV_LOCK
        unsafe {
            std::env::set_var("AGENTDECK_DATABASE", "/tmp/agentdeck.db");
            std::env::set_var("AGENTDECK_MEMORY_TOKEN_LIMIT", "1000");
        }

        let config = ServerConfig::from_env();
        clear_env();

        let config = config.unwrap();
        assert_eq!(config.database, Some(PathBuf::from("/tmp/agentdeck.db")));
        assert_eq!(config.memory_token_limit, 1000);
        assert!(config.clone().with_database(":memory:").database.is_none());
    }

    #[test]
    fn config_rejects_remote_without_token() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        // SAFETY: test-only code, serialized by ENV_LOCK
        unsafe {
            std::env::set_var("AGENTDECK_ALLOW_REMOTE", "true");
        }

        let result = ServerConfig::from_env();
        clear_env();

        let err = result.unwrap_err();
        assert!(
            err.to_string().contains("AGENTDECK_AUTH_TOKEN"),
            "error should mention auth token: {err}"
        );
    }

    #[test]
    fn config_rejects_non_loopback_bind_by_default() {
        let err = ServerConfig::default()
            .with_bind("0.0.0.0:6001".parse().unwrap())
            .unwrap_err();
        assert!(matches!(err, ConfigError::RemoteNotAllowed(_)));
    }

    #[test]
    fn config_rejects_bad_token_limit() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        // SAFETY: test-only code, serialized by ENV_LOCK
        unsafe {
            std::env::set_var("AGENTDECK_MEMORY_TOKEN_LIMIT", "lots");
        }

        let result = ServerConfig::from_env();
        clear_env();

        assert!(matches!(result, Err(ConfigError::InvalidTokenLimit(_))));
    }
}
