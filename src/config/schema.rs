//! Configuration file layout.
//!
//! `[endpoints]` maps API path patterns to pre and post hook plugin names;
//! `[plugins]` maps plugin names to hook URIs. Every other table tunes the
//! proxy itself and may be omitted.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root configuration for the hook proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, connection limit).
    pub listener: ListenerConfig,

    /// The container daemon requests are forwarded to.
    pub backend: BackendConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Request framing limits.
    pub limits: LimitsConfig,

    /// Request validation settings.
    pub security: SecurityConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Admin API settings.
    pub admin: AdminConfig,

    /// Endpoint definitions keyed by `"METHOD /pattern"`.
    pub endpoints: BTreeMap<String, EndpointConfig>,

    /// Plugin name to hook URI.
    pub plugins: BTreeMap<String, String>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:2375").
    pub bind_address: String,

    /// Maximum concurrent client connections (backpressure).
    pub max_connections: usize,

    /// Shut down only the client's write side when a raw stream ends.
    /// Set to false when clients sit behind something that cannot pass a
    /// half-closed TCP connection through.
    pub half_close: bool,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:2375".to_string(),
            max_connections: 1024,
            half_close: true,
        }
    }
}

/// Backend daemon configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Backend address as `host:port`.
    pub address: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:2376".to_string(),
        }
    }
}

impl BackendConfig {
    /// Split the address into host and port.
    ///
    /// Bracketed IPv6 hosts keep their brackets so the result can be used
    /// directly in a `Host` header.
    pub fn host_port(&self) -> Option<(String, u16)> {
        let (host, port) = self.address.rsplit_once(':')?;
        let port = port.parse().ok()?;
        if host.is_empty() {
            return None;
        }
        Some((host.to_string(), port))
    }
}

/// Timeout configuration for outbound calls.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upper bound for a single pre-hook call, in seconds.
    pub hook_secs: u64,

    /// Backend connection establishment timeout in seconds.
    pub backend_connect_secs: u64,

    /// Time allowed for the backend to produce a complete response head.
    pub backend_response_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            hook_secs: 10,
            backend_connect_secs: 5,
            backend_response_secs: 60,
        }
    }
}

/// Limits applied while reading client requests.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum size of a request head (request line + headers).
    pub max_header_bytes: usize,

    /// Maximum size of a request body.
    pub max_body_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_header_bytes: 64 * 1024,
            max_body_bytes: 10 * 1024 * 1024, // 10MB
        }
    }
}

/// Request validation configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Reject every request whose body is not JSON. When disabled, only
    /// requests that have pre-hooks to run are checked.
    pub strict_json_bodies: bool,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            strict_json_bodies: true,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_address: "127.0.0.1:2380".to_string(),
        }
    }
}

/// Hooks attached to one endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Plugins called before the request is forwarded, in order.
    pub pre: Vec<String>,

    /// Plugins declared for the response phase.
    pub post: Vec<String>,
}
