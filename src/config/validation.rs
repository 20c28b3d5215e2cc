//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check referential integrity (endpoints reference existing plugins)
//! - Validate value ranges (timeouts > 0, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::ProxyConfig;
use crate::routing::matcher::{EndpointKeyError, EndpointPattern};

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("invalid address for {field}: {value:?}")]
    InvalidAddress { field: &'static str, value: String },

    #[error("{field} must be greater than zero")]
    NotPositive { field: &'static str },

    #[error("invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint {
        endpoint: String,
        reason: EndpointKeyError,
    },

    #[error("endpoint {endpoint:?} references unknown plugin {plugin:?}")]
    UnknownPlugin { endpoint: String, plugin: String },

    #[error("plugin {plugin:?} has invalid URI {uri:?}")]
    InvalidPluginUri { plugin: String, uri: String },
}

/// Validate a parsed configuration, collecting every problem.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }
    if config.backend.host_port().is_none() {
        errors.push(ValidationError::InvalidAddress {
            field: "backend.address",
            value: config.backend.address.clone(),
        });
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: config.observability.metrics_address.clone(),
        });
    }
    if config.admin.enabled && config.admin.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "admin.bind_address",
            value: config.admin.bind_address.clone(),
        });
    }

    let positives = [
        ("listener.max_connections", config.listener.max_connections as u64),
        ("timeouts.hook_secs", config.timeouts.hook_secs),
        ("timeouts.backend_connect_secs", config.timeouts.backend_connect_secs),
        ("timeouts.backend_response_secs", config.timeouts.backend_response_secs),
        ("limits.max_header_bytes", config.limits.max_header_bytes as u64),
        ("limits.max_body_bytes", config.limits.max_body_bytes as u64),
    ];
    for (field, value) in positives {
        if value == 0 {
            errors.push(ValidationError::NotPositive { field });
        }
    }

    for (key, endpoint) in &config.endpoints {
        if let Err(reason) = EndpointPattern::parse(key) {
            errors.push(ValidationError::InvalidEndpoint {
                endpoint: key.clone(),
                reason,
            });
        }
        for plugin in endpoint.pre.iter().chain(&endpoint.post) {
            if !config.plugins.contains_key(plugin) {
                errors.push(ValidationError::UnknownPlugin {
                    endpoint: key.clone(),
                    plugin: plugin.clone(),
                });
            }
        }
    }

    for (plugin, uri) in &config.plugins {
        let valid = Url::parse(uri)
            .map(|u| matches!(u.scheme(), "http" | "https") && u.has_host())
            .unwrap_or(false);
        if !valid {
            errors.push(ValidationError::InvalidPluginUri {
                plugin: plugin.clone(),
                uri: uri.clone(),
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
