use axum::{extract::State, Json};
use serde::Serialize;

use crate::http::server::AppState;
use crate::routing::PluginRegistry;

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub backend: String,
    pub active_connections: u64,
    pub endpoints: usize,
}

#[derive(Debug, Serialize)]
pub struct HookView {
    pub name: String,
    /// `None` when the hook names an unregistered plugin.
    pub uri: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EndpointView {
    pub endpoint: String,
    pub pre: Vec<HookView>,
    pub post: Vec<HookView>,
}

#[derive(Debug, Serialize)]
pub struct EndpointListing {
    /// Post-hooks are configured and reported but never called.
    pub post_hooks_invoked: bool,
    pub endpoints: Vec<EndpointView>,
}

pub async fn get_status(State(state): State<AppState>) -> Json<SystemStatus> {
    let inner = state.inner.load();
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        backend: inner.config.backend.address.clone(),
        active_connections: state.tracker.active_count(),
        endpoints: inner.registry.endpoints().count(),
    })
}

pub async fn get_endpoints(State(state): State<AppState>) -> Json<EndpointListing> {
    let inner = state.inner.load_full();
    let registry = &inner.registry;

    let endpoints = registry
        .endpoints()
        .map(|(id, hooks)| EndpointView {
            endpoint: id.to_string(),
            pre: hook_views(registry, &hooks.pre),
            post: hook_views(registry, &hooks.post),
        })
        .collect();

    Json(EndpointListing {
        post_hooks_invoked: false,
        endpoints,
    })
}

fn hook_views(registry: &PluginRegistry, names: &[String]) -> Vec<HookView> {
    names
        .iter()
        .map(|name| HookView {
            name: name.clone(),
            uri: registry.plugin_uri(name).map(str::to_string),
        })
        .collect()
}
