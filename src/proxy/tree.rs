//! Path-segment resolution.
//!
//! # Responsibilities
//! - Walk the request path one segment at a time
//! - Build one proxy target per segment, accumulating the backend path
//! - Re-encode every segment so reserved bytes never leak between segments
//!
//! # Design Decisions
//! - Iterative: the walk produces an explicit `Vec<ProxyTarget>`
//! - Segments are percent-decoded first, so an escaped `%2F` stays one segment
//! - Everything outside `A-Z a-z 0-9 - _ . ~` is escaped

use std::sync::Arc;

use crate::routing::PluginRegistry;

/// One level of the resolution walk.
#[derive(Debug, Clone)]
pub struct ProxyTarget {
    pub host: String,
    pub port: u16,
    /// Backend path accumulated so far (empty at the root).
    pub path: String,
    pub registry: Arc<PluginRegistry>,
}

impl ProxyTarget {
    /// The root target, before any segment has been consumed.
    pub fn root(host: impl Into<String>, port: u16, registry: Arc<PluginRegistry>) -> Self {
        Self {
            host: host.into(),
            port,
            path: String::new(),
            registry,
        }
    }

    /// Target for `segment` below this one.
    pub fn child(&self, segment: &str) -> Self {
        let decoded = urlencoding::decode_binary(segment.as_bytes());
        let encoded = urlencoding::encode_binary(&decoded);
        Self {
            host: self.host.clone(),
            port: self.port,
            path: format!("{}/{}", self.path, encoded),
            registry: Arc::clone(&self.registry),
        }
    }

    /// `Host` header value for requests sent to this target.
    pub fn host_header(&self) -> String {
        if self.port == 80 {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Request target for the backend: accumulated path plus `query`.
    pub fn request_target(&self, query: Option<&str>) -> String {
        let path = if self.path.is_empty() { "/" } else { self.path.as_str() };
        match query {
            Some(query) => format!("{}?{}", path, query),
            None => path.to_string(),
        }
    }
}

/// Resolve `path` into the chain of targets below `root`.
///
/// The last element is the leaf. A path of `/` yields a single child with an
/// empty segment, so the leaf path is `/`.
pub fn resolve(root: ProxyTarget, path: &str) -> Vec<ProxyTarget> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let mut targets = Vec::with_capacity(trimmed.matches('/').count() + 2);
    targets.push(root);

    for segment in trimmed.split('/') {
        let next = targets[targets.len() - 1].child(segment);
        targets.push(next);
    }

    targets
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> ProxyTarget {
        ProxyTarget::root("127.0.0.1", 2375, Arc::new(PluginRegistry::default()))
    }

    #[test]
    fn accumulates_segments() {
        let targets = resolve(root(), "/v1.16/containers/create");
        let paths: Vec<_> = targets.iter().map(|t| t.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["", "/v1.16", "/v1.16/containers", "/v1.16/containers/create"]
        );

        let leaf = targets.last().unwrap();
        assert_eq!(leaf.request_target(Some("all=1")), "/v1.16/containers/create?all=1");
        assert!(Arc::ptr_eq(&leaf.registry, &targets[0].registry));
    }

    #[test]
    fn root_and_trailing_slash() {
        let targets = resolve(root(), "/");
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[1].path, "/");
        assert_eq!(targets[1].request_target(None), "/");

        let leaf = resolve(root(), "/images/").pop().unwrap();
        assert_eq!(leaf.path, "/images/");
    }

    #[test]
    fn escapes_reserved_bytes_reversibly() {
        let leaf = resolve(root(), "/containers/my%2Fname with space/json")
            .pop()
            .unwrap();
        assert_eq!(leaf.path, "/containers/my%2Fname%20with%20space/json");

        let segments: Vec<_> = leaf.path[1..]
            .split('/')
            .map(|s| urlencoding::decode(s).unwrap().into_owned())
            .collect();
        assert_eq!(segments, vec!["containers", "my/name with space", "json"]);
    }

    #[test]
    fn keeps_unreserved_bytes() {
        let leaf = resolve(root(), "/a-b_c.d~e/%41").pop().unwrap();
        assert_eq!(leaf.path, "/a-b_c.d~e/A");
    }

    #[test]
    fn host_header_omits_default_port() {
        let target = ProxyTarget::root("docker", 80, Arc::new(PluginRegistry::default()));
        assert_eq!(target.host_header(), "docker");
        assert_eq!(root().host_header(), "127.0.0.1:2375");
    }
}
