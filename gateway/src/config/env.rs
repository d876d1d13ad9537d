//! Environment variable loading.
//!
//! Every variable is optional. Empty values are treated as unset.

use std::str::FromStr;

use super::ConfigError;
use crate::core::registry::TeardownPolicy;

/// All environment variables the gateway reads.
#[cfg(test)]
pub const ENV_VARS: &[&str] = &[
    "HOST",
    "PORT",
    "TLS_CERT_PATH",
    "TLS_KEY_PATH",
    "STATIC_DIR",
    "ENGINE_KIND",
    "SESSION_TEARDOWN_POLICY",
    "AGENT_NAME",
    "AGENT_INSTRUCTIONS",
    "CORS_ALLOWED_ORIGINS",
    "RATE_LIMIT_REQUESTS_PER_SECOND",
    "RATE_LIMIT_BURST_SIZE",
    "MAX_WEBSOCKET_CONNECTIONS",
    "MAX_CONNECTIONS_PER_IP",
];

/// Raw values read from the environment, before defaults are applied.
#[derive(Debug, Default)]
pub struct EnvConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub tls_cert_path: Option<String>,
    pub tls_key_path: Option<String>,
    pub static_dir: Option<String>,
    pub engine_kind: Option<String>,
    pub teardown_policy: Option<TeardownPolicy>,
    pub agent_name: Option<String>,
    pub agent_instructions: Option<String>,
    pub cors_allowed_origins: Option<String>,
    pub rate_limit_requests_per_second: Option<u32>,
    pub rate_limit_burst_size: Option<u32>,
    pub max_websocket_connections: Option<usize>,
    pub max_connections_per_ip: Option<u32>,
}

impl EnvConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Ok(Self {
            host: env_var("HOST"),
            port: parse_env("PORT")?,
            tls_cert_path: env_var("TLS_CERT_PATH"),
            tls_key_path: env_var("TLS_KEY_PATH"),
            static_dir: env_var("STATIC_DIR"),
            engine_kind: env_var("ENGINE_KIND"),
            teardown_policy: parse_env("SESSION_TEARDOWN_POLICY")?,
            agent_name: env_var("AGENT_NAME"),
            agent_instructions: env_var("AGENT_INSTRUCTIONS"),
            cors_allowed_origins: env_var("CORS_ALLOWED_ORIGINS"),
            rate_limit_requests_per_second: parse_env("RATE_LIMIT_REQUESTS_PER_SECOND")?,
            rate_limit_burst_size: parse_env("RATE_LIMIT_BURST_SIZE")?,
            max_websocket_connections: parse_env("MAX_WEBSOCKET_CONNECTIONS")?,
            max_connections_per_ip: parse_env("MAX_CONNECTIONS_PER_IP")?,
        })
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn parse_env<T>(name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    env_var(name)
        .map(|value| {
            value.parse::<T>().map_err(|e| ConfigError::InvalidEnv {
                name,
                value: value.clone(),
                reason: e.to_string(),
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn cleanup_env_vars() {
        unsafe {
            for name in ENV_VARS {
                std::env::remove_var(name);
            }
        }
    }

    #[test]
    #[serial]
    fn test_load_empty_environment() {
        cleanup_env_vars();

        let env = EnvConfig::load().unwrap();
        assert!(env.host.is_none());
        assert!(env.port.is_none());
        assert!(env.teardown_policy.is_none());
    }

    #[test]
    #[serial]
    fn test_load_parses_values() {
        cleanup_env_vars();
        unsafe {
            std::env::set_var("PORT", "9001");
            std::env::set_var("SESSION_TEARDOWN_POLICY", "LAST");
            std::env::set_var("MAX_WEBSOCKET_CONNECTIONS", "25");
            std::env::set_var("AGENT_NAME", "  Triage Agent  ");
            std::env::set_var("CORS_ALLOWED_ORIGINS", "");
        }

        let env = EnvConfig::load().unwrap();
        assert_eq!(env.port, Some(9001));
        assert_eq!(env.teardown_policy, Some(TeardownPolicy::Last));
        assert_eq!(env.max_websocket_connections, Some(25));
        assert_eq!(env.agent_name, Some("Triage Agent".to_string()));
        assert!(env.cors_allowed_origins.is_none());

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_load_rejects_invalid_number() {
        cleanup_env_vars();
        unsafe {
            std::env::set_var("PORT", "eighty");
        }

        let err = EnvConfig::load().unwrap_err();
        match err {
            ConfigError::InvalidEnv { name, value, .. } => {
                assert_eq!(name, "PORT");
                assert_eq!(value, "eighty");
            }
            other => panic!("Expected InvalidEnv error, got {other:?}"),
        }

        cleanup_env_vars();
    }

    #[test]
    #[serial]
    fn test_load_rejects_invalid_policy() {
        cleanup_env_vars();
        unsafe {
            std::env::set_var("SESSION_TEARDOWN_POLICY", "sometimes");
        }

        let err = EnvConfig::load().unwrap_err();
        assert!(err.to_string().contains("SESSION_TEARDOWN_POLICY"));

        cleanup_env_vars();
    }
}
