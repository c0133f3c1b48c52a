use std::time::Duration;

use greeter_core::{ConfigError, SessionConfig, message::HEARTBEAT_MESSAGE};

/// Server configuration loaded from environment variables.
///
/// | Env Var                           | Default     |
/// |-----------------------------------|-------------|
/// | `GREETER_HOST`                    | `localhost` |
/// | `GREETER_PORT`                    | `8765`      |
/// | `GREETER_HEARTBEAT_INTERVAL_SECS` | `10`        |
/// | `GREETER_HEARTBEAT_MESSAGE`       | `P`         |
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind host name or address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Settings handed to every session.
    pub session: SessionConfig,
}

impl ServerConfig {
    /// Load configuration from `.env` (if present) and the process
    /// environment. Variables already set take precedence over `.env`.
    ///
    /// # Errors
    /// Returns error if a variable does not parse or the session settings
    /// are invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, falling back to defaults.
    ///
    /// # Errors
    /// Returns error if a value does not parse or the session settings
    /// are invalid.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let host = lookup("GREETER_HOST").unwrap_or_else(|| "localhost".into());
        let port = parse(&lookup, "GREETER_PORT", 8765)?;
        let interval_secs = parse(&lookup, "GREETER_HEARTBEAT_INTERVAL_SECS", 10)?;
        let heartbeat_message =
            lookup("GREETER_HEARTBEAT_MESSAGE").unwrap_or_else(|| HEARTBEAT_MESSAGE.into());

        let session = SessionConfig {
            heartbeat_interval: Duration::from_secs(interval_secs),
            heartbeat_message,
        };
        session.validate()?;

        Ok(Self {
            host,
            port,
            session,
        })
    }
}

fn parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        ServerConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 8765);
        assert_eq!(config.session, SessionConfig::default());
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("GREETER_HOST", "0.0.0.0"),
            ("GREETER_PORT", "9000"),
            ("GREETER_HEARTBEAT_INTERVAL_SECS", "3"),
            ("GREETER_HEARTBEAT_MESSAGE", "ping"),
        ])
        .unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.session.heartbeat_interval, Duration::from_secs(3));
        assert_eq!(config.session.heartbeat_message, "ping");
    }

    #[test]
    fn test_from_env_without_overrides() {
        // No GREETER_* variables are set for the test process.
        let config = ServerConfig::from_env().unwrap();
        assert_eq!(config.session.heartbeat_message, "P");
    }

    #[test]
    fn test_bad_port() {
        let err = load(&[("GREETER_PORT", "99999")]).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "GREETER_PORT",
                ..
            }
        ));
    }

    #[test]
    fn test_zero_interval() {
        let err = load(&[("GREETER_HEARTBEAT_INTERVAL_SECS", "0")]).unwrap_err();
        assert!(matches!(err, ConfigError::ZeroInterval));
    }
}
