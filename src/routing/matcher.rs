//! Endpoint pattern matching.
//!
//! # Responsibilities
//! - Parse `"METHOD /pattern"` endpoint keys
//! - Match the method exactly and the path with shell-style wildcards
//!
//! # Design Decisions
//! - Paths are `glob` patterns compiled once when the key is parsed
//! - `*` matches any run of characters, including `/`, so `/*/containers/create`
//!   covers every API version prefix
//! - `?` matches exactly one character and `[...]` a character class
//! - Query strings never take part in matching

use glob::{MatchOptions, Pattern, PatternError};
use thiserror::Error;

const PATH_MATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Why an endpoint key was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EndpointKeyError {
    #[error("expected \"METHOD /pattern\"")]
    Shape,
    #[error("bad path pattern: {0}")]
    Pattern(String),
}

impl From<PatternError> for EndpointKeyError {
    fn from(e: PatternError) -> Self {
        Self::Pattern(e.to_string())
    }
}

/// A compiled endpoint key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointPattern {
    method: String,
    path: Pattern,
}

impl EndpointPattern {
    /// Parse an endpoint key such as `POST /*/containers/create`.
    pub fn parse(key: &str) -> Result<Self, EndpointKeyError> {
        let (method, path) = key.trim().split_once(' ').ok_or(EndpointKeyError::Shape)?;
        let path = path.trim();
        if method.is_empty()
            || !method.bytes().all(|b| b.is_ascii_alphabetic())
            || !path.starts_with('/')
            || path.contains(char::is_whitespace)
        {
            return Err(EndpointKeyError::Shape);
        }
        Ok(Self {
            method: method.to_ascii_uppercase(),
            path: Pattern::new(path)?,
        })
    }

    /// The HTTP method this endpoint applies to.
    pub fn method(&self) -> &str {
        &self.method
    }

    /// Returns true if the request method and URI match this endpoint.
    pub fn matches(&self, method: &str, uri: &str) -> bool {
        if method != self.method {
            return false;
        }
        let path = uri.split_once('?').map_or(uri, |(path, _)| path);
        self.path.matches_with(path, PATH_MATCH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_endpoint_key() {
        let pattern = EndpointPattern::parse("post /*/containers/create").unwrap();
        assert_eq!(pattern.method(), "POST");

        assert_eq!(EndpointPattern::parse("POST"), Err(EndpointKeyError::Shape));
        assert_eq!(EndpointPattern::parse("POST containers"), Err(EndpointKeyError::Shape));
        assert_eq!(EndpointPattern::parse("/containers POST"), Err(EndpointKeyError::Shape));
        assert_eq!(EndpointPattern::parse("GET /a b"), Err(EndpointKeyError::Shape));
    }

    #[test]
    fn test_unclosed_class_is_rejected() {
        let err = EndpointPattern::parse("POST /*/containers/[a-z/start").unwrap_err();
        assert!(matches!(err, EndpointKeyError::Pattern(_)));
    }

    #[test]
    fn test_versioned_paths() {
        let pattern = EndpointPattern::parse("POST /*/containers/create").unwrap();

        assert!(pattern.matches("POST", "/v1.16/containers/create"));
        assert!(pattern.matches("POST", "/v1.16/containers/create?name=web"));
        assert!(!pattern.matches("GET", "/v1.16/containers/create"));
        assert!(!pattern.matches("POST", "/containers/create"));
        assert!(!pattern.matches("POST", "/v1.16/containers/create/extra"));
    }

    #[test]
    fn test_wildcards() {
        let pattern = EndpointPattern::parse("POST /*/containers/*/start").unwrap();
        assert!(pattern.matches("POST", "/v1.16/containers/abc123/start"));
        assert!(pattern.matches("POST", "/v1/containers/a/b/start"));
        assert!(!pattern.matches("POST", "/v1/containers/abc/stop"));

        let pattern = EndpointPattern::parse("GET /v1.1?/info").unwrap();
        assert!(pattern.matches("GET", "/v1.16/info"));
        assert!(!pattern.matches("GET", "/v1.1/info"));

        let pattern = EndpointPattern::parse("GET /*").unwrap();
        assert!(pattern.matches("GET", "/"));
        assert!(pattern.matches("GET", "/_ping"));
    }

    #[test]
    fn test_character_classes() {
        let pattern = EndpointPattern::parse("POST /*/containers/[a-z]*/start").unwrap();
        assert!(pattern.matches("POST", "/v1.16/containers/abc/start"));
        assert!(!pattern.matches("POST", "/v1.16/containers/9abc/start"));

        let pattern = EndpointPattern::parse("DELETE /*/images/[!_]*").unwrap();
        assert!(pattern.matches("DELETE", "/v1.16/images/busybox"));
        assert!(!pattern.matches("DELETE", "/v1.16/images/_scratch"));
    }

    #[test]
    fn test_exact_path() {
        let pattern = EndpointPattern::parse("GET /_ping").unwrap();
        assert!(pattern.matches("GET", "/_ping"));
        assert!(!pattern.matches("GET", "/_pingx"));
        assert!(!pattern.matches("GET", "/v1/_ping"));
    }
}
