use std::path::PathBuf;

use super::env::EnvConfig;
use super::validation;
use super::yaml::YamlConfig;
use super::{
    ConfigError, DEFAULT_HOST, DEFAULT_MAX_CONNECTIONS_PER_IP, DEFAULT_PORT,
    DEFAULT_RATE_LIMIT_BURST, DEFAULT_RATE_LIMIT_RPS, ServerConfig, TlsConfig,
};
use crate::core::engine::{AgentConfig, DEFAULT_ENGINE_KIND};

/// Merge environment variables (base) with optional YAML overrides.
///
/// Priority: YAML > ENV > defaults.
pub fn merge_config(yaml: Option<YamlConfig>) -> Result<ServerConfig, ConfigError> {
    let env = EnvConfig::load()?;
    let yaml = yaml.unwrap_or_default();

    let server = yaml.server.unwrap_or_default();
    let tls_yaml = server.tls.unwrap_or_default();
    let security = yaml.security.unwrap_or_default();

    let host = server
        .host
        .or(env.host)
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let port = server.port.or(env.port).unwrap_or(DEFAULT_PORT);

    let cert_path = tls_yaml.cert_path.or(env.tls_cert_path).map(PathBuf::from);
    let key_path = tls_yaml.key_path.or(env.tls_key_path).map(PathBuf::from);
    validation::validate_tls_pair(&cert_path, &key_path)?;
    let tls = match (cert_path, key_path) {
        (Some(cert_path), Some(key_path)) => Some(TlsConfig {
            cert_path,
            key_path,
        }),
        _ => None,
    };

    let static_dir = server.static_dir.or(env.static_dir).map(PathBuf::from);

    let engine_kind = yaml
        .engine
        .and_then(|engine| engine.kind)
        .or(env.engine_kind)
        .unwrap_or_else(|| DEFAULT_ENGINE_KIND.to_string());

    let teardown_policy = yaml
        .session
        .and_then(|session| session.teardown_policy)
        .or(env.teardown_policy)
        .unwrap_or_default();

    // A YAML agent replaces the env-described one as a whole
    let agent = yaml.agent.unwrap_or_else(|| {
        let mut agent = AgentConfig::default();
        if let Some(name) = env.agent_name {
            agent.name = name;
        }
        if let Some(instructions) = env.agent_instructions {
            agent.instructions = instructions;
        }
        agent
    });

    Ok(ServerConfig {
        host,
        port,
        tls,
        static_dir,
        engine_kind,
        teardown_policy,
        agent,
        cors_allowed_origins: security.cors_allowed_origins.or(env.cors_allowed_origins),
        rate_limit_requests_per_second: security
            .rate_limit_requests_per_second
            .or(env.rate_limit_requests_per_second)
            .unwrap_or(DEFAULT_RATE_LIMIT_RPS),
        rate_limit_burst_size: security
            .rate_limit_burst_size
            .or(env.rate_limit_burst_size)
            .unwrap_or(DEFAULT_RATE_LIMIT_BURST),
        max_websocket_connections: security
            .max_websocket_connections
            .or(env.max_websocket_connections),
        max_connections_per_ip: security
            .max_connections_per_ip
            .or(env.max_connections_per_ip)
            .unwrap_or(DEFAULT_MAX_CONNECTIONS_PER_IP),
    })
}
