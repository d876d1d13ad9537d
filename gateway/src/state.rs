//! Shared application state.
//!
//! Holds the loaded configuration, the session registry and the WebSocket
//! connection counters enforced by the connection-limit middleware.

use dashmap::DashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::info;

use crate::config::ServerConfig;
use crate::core::engine::{BoxedSessionEngine, create_session_engine};
use crate::core::registry::SessionRegistry;
use crate::errors::GatewayResult;

/// Why a WebSocket connection slot could not be acquired
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionLimitError {
    GlobalLimitReached,
    PerIpLimitReached,
}

/// Application state shared by every handler
pub struct AppState {
    pub config: ServerConfig,
    pub registry: SessionRegistry,
    ws_connections: AtomicUsize,
    ip_connections: DashMap<IpAddr, u32>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("address", &self.config.address())
            .field("registry", &self.registry)
            .field("ws_connections", &self.ws_connection_count())
            .finish()
    }
}

impl AppState {
    /// Build state with the engine named by `config.engine_kind`.
    pub fn new(config: ServerConfig) -> GatewayResult<Arc<Self>> {
        let engine = create_session_engine(&config.engine_kind)?;
        info!(
            engine = %config.engine_kind,
            agent = %config.agent.name,
            teardown_policy = %config.teardown_policy,
            "Session engine ready"
        );
        Ok(Self::with_engine(config, engine))
    }

    /// Build state around an already constructed engine.
    pub fn with_engine(config: ServerConfig, engine: BoxedSessionEngine) -> Arc<Self> {
        let registry = SessionRegistry::new(engine, config.agent.clone(), config.teardown_policy);
        Arc::new(Self {
            config,
            registry,
            ws_connections: AtomicUsize::new(0),
            ip_connections: DashMap::new(),
        })
    }

    /// Reserve a WebSocket slot for `ip`, honouring the global and per-IP caps.
    pub fn try_acquire_connection(&self, ip: IpAddr) -> Result<(), ConnectionLimitError> {
        // Per-IP entry stays locked for the whole check
        let mut per_ip = self.ip_connections.entry(ip).or_insert(0);
        if *per_ip >= self.config.max_connections_per_ip {
            drop(per_ip);
            self.ip_connections.remove_if(&ip, |_, count| *count == 0);
            return Err(ConnectionLimitError::PerIpLimitReached);
        }

        if let Some(max) = self.config.max_websocket_connections {
            let reserved = self
                .ws_connections
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                    (current < max).then_some(current + 1)
                });
            if reserved.is_err() {
                drop(per_ip);
                self.ip_connections.remove_if(&ip, |_, count| *count == 0);
                return Err(ConnectionLimitError::GlobalLimitReached);
            }
        } else {
            self.ws_connections.fetch_add(1, Ordering::AcqRel);
        }

        *per_ip += 1;
        Ok(())
    }

    /// Release a slot taken by [`AppState::try_acquire_connection`].
    pub fn release_connection(&self, ip: IpAddr) {
        let _ = self
            .ws_connections
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                current.checked_sub(1)
            });
        self.ip_connections.remove_if_mut(&ip, |_, count| {
            *count = count.saturating_sub(1);
            *count == 0
        });
    }

    pub fn ws_connection_count(&self) -> usize {
        self.ws_connections.load(Ordering::Acquire)
    }

    pub fn ip_connection_count(&self, ip: &IpAddr) -> u32 {
        self.ip_connections.get(ip).map_or(0, |count| *count)
    }
}

/// Reserved WebSocket slot, released when dropped.
///
/// The connection-limit middleware acquires it and passes it down as a
/// request extension. Whoever holds the last reference (the request, or the
/// upgrade callback once the handshake succeeded) returns the slot, so a
/// rejected or abandoned upgrade cannot leak it.
#[derive(Debug)]
pub struct ConnectionSlot {
    state: Arc<AppState>,
    ip: IpAddr,
}

impl ConnectionSlot {
    /// Reserve a slot for `ip`.
    pub fn acquire(state: Arc<AppState>, ip: IpAddr) -> Result<Self, ConnectionLimitError> {
        state.try_acquire_connection(ip)?;
        Ok(Self { state, ip })
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.state.release_connection(self.ip);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn state_with_limits(global: Option<usize>, per_ip: u32) -> Arc<AppState> {
        let config = ServerConfig {
            max_websocket_connections: global,
            max_connections_per_ip: per_ip,
            ..Default::default()
        };
        AppState::new(config).unwrap()
    }

    #[test]
    fn test_unknown_engine_kind_fails() {
        let config = ServerConfig {
            engine_kind: "missing".to_string(),
            ..Default::default()
        };
        assert!(AppState::new(config).is_err());
    }

    #[test]
    fn test_connection_tracking_basic() {
        let state = state_with_limits(Some(10), 3);
        let ip: IpAddr = Ipv4Addr::new(192, 168, 1, 100).into();

        assert_eq!(state.ws_connection_count(), 0);
        assert_eq!(state.ip_connection_count(&ip), 0);

        for expected in 1..=3 {
            assert!(state.try_acquire_connection(ip).is_ok());
            assert_eq!(state.ws_connection_count(), expected);
            assert_eq!(state.ip_connection_count(&ip), expected as u32);
        }

        // Fourth connection should be rejected (per-IP limit)
        assert_eq!(
            state.try_acquire_connection(ip),
            Err(ConnectionLimitError::PerIpLimitReached)
        );
        assert_eq!(state.ws_connection_count(), 3);

        state.release_connection(ip);
        assert_eq!(state.ws_connection_count(), 2);
        assert_eq!(state.ip_connection_count(&ip), 2);

        assert!(state.try_acquire_connection(ip).is_ok());
        assert_eq!(state.ws_connection_count(), 3);
    }

    #[test]
    fn test_global_connection_limit() {
        let state = state_with_limits(Some(5), 10);
        let ips: Vec<IpAddr> = (1..=6)
            .map(|i| Ipv4Addr::new(192, 168, 1, i).into())
            .collect();

        for ip in &ips[0..5] {
            assert!(state.try_acquire_connection(*ip).is_ok());
        }
        assert_eq!(state.ws_connection_count(), 5);

        assert_eq!(
            state.try_acquire_connection(ips[5]),
            Err(ConnectionLimitError::GlobalLimitReached)
        );
        // A rejected attempt does not leave a per-IP reservation behind
        assert_eq!(state.ip_connection_count(&ips[5]), 0);

        state.release_connection(ips[0]);
        assert!(state.try_acquire_connection(ips[5]).is_ok());
    }

    #[test]
    fn test_release_removes_idle_ip_entry() {
        let state = state_with_limits(None, 2);
        let ip: IpAddr = Ipv4Addr::LOCALHOST.into();

        assert!(state.try_acquire_connection(ip).is_ok());
        state.release_connection(ip);
        state.release_connection(ip);

        assert_eq!(state.ws_connection_count(), 0);
        assert_eq!(state.ip_connection_count(&ip), 0);
    }

    #[test]
    fn test_connection_slot_releases_on_drop() {
        let state = state_with_limits(None, 1);
        let ip: IpAddr = Ipv4Addr::new(10, 0, 0, 1).into();

        let slot = ConnectionSlot::acquire(state.clone(), ip).unwrap();
        assert_eq!(slot.ip(), ip);
        assert_eq!(state.ip_connection_count(&ip), 1);
        assert_eq!(
            ConnectionSlot::acquire(state.clone(), ip).unwrap_err(),
            ConnectionLimitError::PerIpLimitReached
        );

        drop(slot);
        assert_eq!(state.ws_connection_count(), 0);
        assert_eq!(state.ip_connection_count(&ip), 0);
        assert!(ConnectionSlot::acquire(state.clone(), ip).is_ok());
    }
}
