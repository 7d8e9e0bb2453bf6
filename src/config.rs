//! Server configuration
//!
//! Defaults match the classic chat port. The bind address can be given as the
//! first CLI argument; tuning knobs come from environment variables.

use std::net::SocketAddr;
use std::time::Duration;

use crate::error::ServerError;

/// Default listen address
pub const DEFAULT_ADDR: &str = "0.0.0.0:65433";

/// Default listen backlog
pub const DEFAULT_BACKLOG: u32 = 128;

/// Default bound on a single outbound send during fan-out
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Default per-connection outbound queue depth
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 64;

/// Env var overriding the send timeout, in milliseconds
pub const ENV_SEND_TIMEOUT_MS: &str = "RELAY_SEND_TIMEOUT_MS";

/// Env var overriding the listen backlog
pub const ENV_BACKLOG: &str = "RELAY_BACKLOG";

/// Runtime configuration for the relay
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the listener binds to
    pub bind_addr: SocketAddr,
    /// Pending-connection backlog passed to listen(2)
    pub backlog: u32,
    /// Upper bound for queueing one line to one peer
    pub send_timeout: Duration,
    /// Lines buffered per connection before sends start waiting
    pub outbound_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 65433)),
            backlog: DEFAULT_BACKLOG,
            send_timeout: DEFAULT_SEND_TIMEOUT,
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }
}

impl ServerConfig {
    /// Build a config from process arguments and environment
    ///
    /// `args` excludes the program name. The first argument, if any, is the
    /// bind address.
    pub fn from_env_and_args<I>(args: I) -> Result<Self, ServerError>
    where
        I: IntoIterator<Item = String>,
    {
        Self::from_sources(args, |key| std::env::var(key).ok())
    }

    /// Same as [`from_env_and_args`](Self::from_env_and_args) with a custom
    /// variable lookup
    pub fn from_sources<I, F>(args: I, lookup: F) -> Result<Self, ServerError>
    where
        I: IntoIterator<Item = String>,
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(addr) = args.into_iter().next() {
            config.bind_addr = addr
                .parse()
                .map_err(|e| ServerError::Config(format!("bind address '{}': {}", addr, e)))?;
        }

        if let Some(ms) = lookup(ENV_SEND_TIMEOUT_MS) {
            let ms: u64 = ms
                .trim()
                .parse()
                .map_err(|e| ServerError::Config(format!("{}='{}': {}", ENV_SEND_TIMEOUT_MS, ms, e)))?;
            if ms == 0 {
                return Err(ServerError::Config(format!(
                    "{} must be greater than zero",
                    ENV_SEND_TIMEOUT_MS
                )));
            }
            config.send_timeout = Duration::from_millis(ms);
        }

        if let Some(backlog) = lookup(ENV_BACKLOG) {
            config.backlog = backlog
                .trim()
                .parse()
                .map_err(|e| ServerError::Config(format!("{}='{}': {}", ENV_BACKLOG, backlog, e)))?;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn test_defaults() {
        let config = ServerConfig::from_sources(Vec::new(), no_env).unwrap();
        assert_eq!(config.bind_addr, DEFAULT_ADDR.parse().unwrap());
        assert_eq!(config.backlog, DEFAULT_BACKLOG);
        assert_eq!(config.send_timeout, DEFAULT_SEND_TIMEOUT);
        assert_eq!(config.outbound_capacity, DEFAULT_OUTBOUND_CAPACITY);
    }

    #[test]
    fn test_bind_addr_from_args() {
        let config =
            ServerConfig::from_sources(vec!["127.0.0.1:9000".to_string()], no_env).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:9000".parse().unwrap());
    }

    #[test]
    fn test_invalid_bind_addr() {
        let result = ServerConfig::from_sources(vec!["not-an-addr".to_string()], no_env);
        assert!(matches!(result, Err(ServerError::Config(_))));
    }

    #[test]
    fn test_env_overrides() {
        let config = ServerConfig::from_sources(Vec::new(), |key| match key {
            ENV_SEND_TIMEOUT_MS => Some("250".to_string()),
            ENV_BACKLOG => Some("16".to_string()),
            _ => None,
        })
        .unwrap();
        assert_eq!(config.send_timeout, Duration::from_millis(250));
        assert_eq!(config.backlog, 16);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let result = ServerConfig::from_sources(Vec::new(), |key| {
            (key == ENV_SEND_TIMEOUT_MS).then(|| "0".to_string())
        });
        assert!(matches!(result, Err(ServerError::Config(_))));
    }
}
