//! Leaf rendering: hooks, forwarding, and response relay for one request.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::config::validation::ValidationError;
use crate::config::{ConfigError, ProxyConfig};
use crate::hooks::{HookChain, HookTarget};
use crate::http::request::ProxyRequest;
use crate::net::ClientConnection;
use crate::proxy::downgrade::{Relayed, ResponseRelay};
use crate::proxy::forward::{encode_request, send_to_backend};
use crate::proxy::tree::{resolve, ProxyTarget};
use crate::proxy::ProxyError;
use crate::routing::PluginRegistry;

/// Everything a request needs, built once per configuration.
#[derive(Debug)]
pub struct ProxyState {
    pub config: ProxyConfig,
    pub registry: Arc<PluginRegistry>,
    pub hooks: HookChain,
    backend_host: String,
    backend_port: u16,
}

impl ProxyState {
    pub fn new(config: ProxyConfig) -> Result<Self, ConfigError> {
        let (backend_host, backend_port) = config.backend.host_port().ok_or_else(|| {
            ConfigError::Validation(vec![ValidationError::InvalidAddress {
                field: "backend.address",
                value: config.backend.address.clone(),
            }])
        })?;
        let hooks = HookChain::new(Duration::from_secs(config.timeouts.hook_secs))?;
        let registry = Arc::new(PluginRegistry::from_config(&config));

        Ok(Self {
            config,
            registry,
            hooks,
            backend_host,
            backend_port,
        })
    }

    /// Root of the resolution tree for a new request.
    pub fn root_target(&self) -> ProxyTarget {
        ProxyTarget::root(
            self.backend_host.clone(),
            self.backend_port,
            Arc::clone(&self.registry),
        )
    }
}

/// Proxy `request` and relay the backend response to `conn`.
pub async fn render<S>(
    state: &ProxyState,
    request: &ProxyRequest,
    conn: &mut ClientConnection<S>,
) -> Result<Relayed, ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let Some(leaf) = resolve(state.root_target(), request.path()).pop() else {
        return Err(ProxyError::BadRequest("empty request path".into()));
    };

    let pre_hooks = resolve_hooks(&leaf.registry, &request.method, &request.target);

    if request.has_body() && (state.config.security.strict_json_bodies || !pre_hooks.is_empty()) {
        check_json(request)?;
    }

    let body = if pre_hooks.is_empty() {
        request.body.clone()
    } else {
        run_pre_hooks(state, request, &pre_hooks).await?
    };

    let encoded = encode_request(request, &leaf, &body);
    let backend = send_to_backend(
        &leaf,
        &encoded,
        Duration::from_secs(state.config.timeouts.backend_connect_secs),
    )
    .await?;

    ResponseRelay::new(conn, backend, &request.method, state.config.limits.max_header_bytes)
        .run(Duration::from_secs(state.config.timeouts.backend_response_secs))
        .await
}

/// Ordered pre-hook targets for a request. Post-hooks are only reported.
fn resolve_hooks(registry: &PluginRegistry, method: &str, uri: &str) -> Vec<HookTarget> {
    let hooks = registry.hooks_for(method, uri);
    if !hooks.post.is_empty() {
        tracing::debug!(post_hooks = ?hooks.post, "Post-hooks matched; response hooks are not invoked");
    }

    hooks
        .pre
        .iter()
        .filter_map(|name| match registry.plugin_uri(name) {
            Some(uri) => Some(HookTarget::new(name.as_str(), uri)),
            None => {
                tracing::warn!(hook = %name, "Pre-hook has no registered URI, skipping");
                None
            }
        })
        .collect()
}

async fn run_pre_hooks(
    state: &ProxyState,
    request: &ProxyRequest,
    hooks: &[HookTarget],
) -> Result<Bytes, ProxyError> {
    let original = if request.has_body() {
        parse_json(&request.body)?
    } else {
        Value::Null
    };

    let outcome = state.hooks.run(&request.method, original, hooks).await;
    tracing::debug!(
        applied = outcome.applied,
        failed = outcome.failed,
        "Pre-hook chain finished"
    );

    if !outcome.rewritten() {
        return Ok(request.body.clone());
    }
    if outcome.body.is_null() && !request.has_body() {
        return Ok(Bytes::new());
    }
    Ok(Bytes::from(outcome.body.to_string()))
}

/// Reject bodies that are not declared and encoded as JSON.
pub fn check_json(request: &ProxyRequest) -> Result<(), ProxyError> {
    if !request.is_json() {
        return Err(ProxyError::BadRequest(
            "request body must have Content-Type: application/json".into(),
        ));
    }
    parse_json(&request.body).map(drop)
}

fn parse_json(body: &[u8]) -> Result<Value, ProxyError> {
    serde_json::from_slice(body)
        .map_err(|e| ProxyError::BadRequest(format!("request body is not valid JSON: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EndpointConfig;

    fn request(content_type: Option<&str>, body: &'static [u8]) -> ProxyRequest {
        let mut headers = vec![("Host".to_string(), b"localhost".to_vec())];
        if let Some(ct) = content_type {
            headers.push(("Content-Type".to_string(), ct.as_bytes().to_vec()));
        }
        ProxyRequest {
            method: "POST".into(),
            target: "/v1.16/containers/create".into(),
            version: 1,
            headers,
            body: Bytes::from_static(body),
            framed_body: true,
        }
    }

    #[test]
    fn json_check() {
        assert!(check_json(&request(Some("application/json"), b"{\"a\":1}")).is_ok());
        assert!(check_json(&request(Some("application/json; charset=utf-8"), b"[]")).is_ok());
        assert!(matches!(
            check_json(&request(Some("application/x-tar"), b"{}")),
            Err(ProxyError::BadRequest(_))
        ));
        assert!(check_json(&request(None, b"{}")).is_err());
        assert!(check_json(&request(Some("application/json"), b"{not json")).is_err());
    }

    #[test]
    fn resolves_pre_hooks_in_order_and_skips_unknown() {
        let mut config = ProxyConfig::default();
        config.endpoints.insert(
            "POST /*/containers/create".into(),
            EndpointConfig {
                pre: vec!["flocker".into(), "ghost".into(), "weave".into()],
                post: vec!["weave".into()],
            },
        );
        config.plugins.insert("flocker".into(), "http://flocker/hook".into());
        config.plugins.insert("weave".into(), "http://weave/hook".into());
        let registry = PluginRegistry::from_config(&config);

        let hooks = resolve_hooks(&registry, "POST", "/v1.16/containers/create");
        assert_eq!(
            hooks,
            vec![
                HookTarget::new("flocker", "http://flocker/hook"),
                HookTarget::new("weave", "http://weave/hook"),
            ]
        );
        assert!(resolve_hooks(&registry, "GET", "/v1.16/containers/json").is_empty());
    }

    #[tokio::test]
    async fn state_splits_backend_address() {
        let mut config = ProxyConfig::default();
        config.backend.address = "docker:80".into();
        let state = ProxyState::new(config).unwrap();
        assert_eq!(state.root_target().host_header(), "docker");

        let mut config = ProxyConfig::default();
        config.backend.address = "no-port".into();
        assert!(matches!(ProxyState::new(config), Err(ConfigError::Validation(_))));
    }
}
