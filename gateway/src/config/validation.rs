use std::path::PathBuf;

use super::{ConfigError, ServerConfig};
use crate::core::engine::{AgentConfig, get_supported_engine_kinds};

/// Validate a merged configuration.
pub fn validate(config: &ServerConfig) -> Result<(), ConfigError> {
    validate_port(config.port)?;
    validate_engine_kind(&config.engine_kind)?;
    validate_agent(&config.agent)?;
    validate_static_dir(config.static_dir.as_ref())?;
    validate_rate_limit(
        config.rate_limit_requests_per_second,
        config.rate_limit_burst_size,
    )?;
    Ok(())
}

fn validate_port(port: u16) -> Result<(), ConfigError> {
    if port == 0 {
        return Err(ConfigError::Invalid("port must be non-zero".to_string()));
    }
    Ok(())
}

fn validate_engine_kind(kind: &str) -> Result<(), ConfigError> {
    let supported = get_supported_engine_kinds();
    if !supported.iter().any(|k| k.eq_ignore_ascii_case(kind)) {
        return Err(ConfigError::Invalid(format!(
            "unknown engine kind '{kind}'. Supported kinds: {}",
            supported.join(", ")
        )));
    }
    Ok(())
}

/// Agent names must be non-empty, including every handoff target.
fn validate_agent(agent: &AgentConfig) -> Result<(), ConfigError> {
    if agent.name.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "agent name must not be empty".to_string(),
        ));
    }
    agent.handoffs.iter().try_for_each(validate_agent)
}

fn validate_static_dir(dir: Option<&PathBuf>) -> Result<(), ConfigError> {
    match dir {
        Some(dir) if !dir.is_dir() => Err(ConfigError::Invalid(format!(
            "static_dir '{}' is not a directory",
            dir.display()
        ))),
        _ => Ok(()),
    }
}

fn validate_rate_limit(requests_per_second: u32, burst_size: u32) -> Result<(), ConfigError> {
    if requests_per_second == 0 {
        return Err(ConfigError::Invalid(
            "rate_limit_requests_per_second must be at least 1".to_string(),
        ));
    }
    if burst_size == 0 {
        return Err(ConfigError::Invalid(
            "rate_limit_burst_size must be at least 1".to_string(),
        ));
    }
    Ok(())
}

/// TLS needs both a certificate and a key, or neither.
pub fn validate_tls_pair(
    cert_path: &Option<PathBuf>,
    key_path: &Option<PathBuf>,
) -> Result<(), ConfigError> {
    match (cert_path, key_path) {
        (Some(_), None) => Err(ConfigError::Invalid(
            "TLS cert_path is set but key_path is missing".to_string(),
        )),
        (None, Some(_)) => Err(ConfigError::Invalid(
            "TLS key_path is set but cert_path is missing".to_string(),
        )),
        _ => Ok(()),
    }
}
