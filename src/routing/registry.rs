//! Endpoint and plugin lookup.
//!
//! # Responsibilities
//! - Classify a request (method + URI) into endpoint identifiers
//! - Resolve an endpoint identifier to its ordered pre/post hooks
//! - Resolve a hook identifier to the URI it is served at
//!
//! # Design Decisions
//! - Compiled once per configuration and never mutated afterwards
//! - Endpoints are kept in key order, so a request that matches several
//!   endpoints always sees them in the same order
//! - Unknown identifiers resolve to `None` rather than panicking

use std::collections::HashMap;

use crate::config::schema::{EndpointConfig, ProxyConfig};
use crate::routing::matcher::EndpointPattern;

/// Hooks attached to one endpoint, in invocation order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EndpointHooks {
    pub pre: Vec<String>,
    pub post: Vec<String>,
}

impl From<&EndpointConfig> for EndpointHooks {
    fn from(config: &EndpointConfig) -> Self {
        Self {
            pre: config.pre.clone(),
            post: config.post.clone(),
        }
    }
}

#[derive(Debug)]
struct Endpoint {
    id: String,
    pattern: EndpointPattern,
    hooks: EndpointHooks,
}

/// Immutable view of the endpoint and plugin configuration.
#[derive(Debug, Default)]
pub struct PluginRegistry {
    endpoints: Vec<Endpoint>,
    plugins: HashMap<String, String>,
}

impl PluginRegistry {
    /// Compile the registry from configuration.
    ///
    /// Endpoint keys that do not parse are skipped with a warning; validated
    /// configurations never contain them.
    pub fn from_config(config: &ProxyConfig) -> Self {
        let endpoints = config
            .endpoints
            .iter()
            .filter_map(|(id, endpoint)| match EndpointPattern::parse(id) {
                Ok(pattern) => Some(Endpoint {
                    id: id.clone(),
                    pattern,
                    hooks: endpoint.into(),
                }),
                Err(e) => {
                    tracing::warn!(endpoint = %id, error = %e, "Skipping malformed endpoint definition");
                    None
                }
            })
            .collect();

        let plugins = config
            .plugins
            .iter()
            .map(|(name, uri)| (name.clone(), uri.clone()))
            .collect();

        Self { endpoints, plugins }
    }

    /// Endpoint identifiers that apply to this request, lazily.
    pub fn match_endpoint<'a>(
        &'a self,
        method: &'a str,
        uri: &'a str,
    ) -> impl Iterator<Item = &'a str> + 'a {
        self.endpoints
            .iter()
            .filter(move |e| e.pattern.matches(method, uri))
            .map(|e| e.id.as_str())
    }

    /// Hooks configured for an endpoint.
    pub fn endpoint(&self, id: &str) -> Option<&EndpointHooks> {
        self.endpoints.iter().find(|e| e.id == id).map(|e| &e.hooks)
    }

    /// URI of a hook plugin.
    pub fn plugin_uri(&self, hook: &str) -> Option<&str> {
        self.plugins.get(hook).map(String::as_str)
    }

    /// Every endpoint identifier with its hooks, in match order.
    pub fn endpoints(&self) -> impl Iterator<Item = (&str, &EndpointHooks)> {
        self.endpoints.iter().map(|e| (e.id.as_str(), &e.hooks))
    }

    /// Hooks for every endpoint matching the request, concatenated in match
    /// order and then per-endpoint order.
    pub fn hooks_for(&self, method: &str, uri: &str) -> EndpointHooks {
        let mut hooks = EndpointHooks::default();
        for id in self.match_endpoint(method, uri) {
            if let Some(endpoint) = self.endpoint(id) {
                hooks.pre.extend(endpoint.pre.iter().cloned());
                hooks.post.extend(endpoint.post.iter().cloned());
            }
        }
        hooks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> PluginRegistry {
        let mut config = ProxyConfig::default();
        config.endpoints.insert(
            "POST /*/containers/create".into(),
            EndpointConfig {
                pre: vec!["flocker".into(), "weave".into()],
                post: vec!["weave".into()],
            },
        );
        config.endpoints.insert(
            "POST /*".into(),
            EndpointConfig {
                pre: vec!["audit".into()],
                post: vec![],
            },
        );
        config.plugins.insert("flocker".into(), "http://flocker/pre".into());
        config.plugins.insert("weave".into(), "http://weave/pre".into());
        config.plugins.insert("audit".into(), "http://audit/pre".into());
        PluginRegistry::from_config(&config)
    }

    #[test]
    fn matches_multiple_endpoints() {
        let registry = registry();
        let ids: Vec<_> = registry
            .match_endpoint("POST", "/v1.16/containers/create")
            .collect();
        assert_eq!(ids, vec!["POST /*", "POST /*/containers/create"]);

        assert_eq!(registry.match_endpoint("GET", "/_ping").count(), 0);
    }

    #[test]
    fn concatenates_hooks_in_match_order() {
        let registry = registry();
        let hooks = registry.hooks_for("POST", "/v1.16/containers/create");
        assert_eq!(hooks.pre, vec!["audit", "flocker", "weave"]);
        assert_eq!(hooks.post, vec!["weave"]);

        let hooks = registry.hooks_for("POST", "/v1.16/containers/abc/start");
        assert_eq!(hooks.pre, vec!["audit"]);
    }

    #[test]
    fn resolves_plugin_uris() {
        let registry = registry();
        assert_eq!(registry.plugin_uri("weave"), Some("http://weave/pre"));
        assert_eq!(registry.plugin_uri("nope"), None);
        assert!(registry.endpoint("GET /nope").is_none());
    }
}
