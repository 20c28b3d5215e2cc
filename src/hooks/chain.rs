//! Pre-hook chain orchestration.
//!
//! # Responsibilities
//! - Call each pre-hook with the current body
//! - Thread successful rewrites into the next call
//! - Contain every hook failure (log, count, carry on)

use std::time::Duration;

use serde_json::Value;

use crate::hooks::payload::{parse_hook_response, PreHookRequest};
use crate::hooks::HookError;
use crate::observability::metrics;

/// A resolved hook: plugin name and the URI it is served at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookTarget {
    pub name: String,
    pub uri: String,
}

impl HookTarget {
    pub fn new(name: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            uri: uri.into(),
        }
    }
}

/// Result of running a chain.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainOutcome {
    /// Body after the last successful hook (the original if none succeeded).
    pub body: Value,
    /// Hooks whose response replaced the body.
    pub applied: usize,
    /// Hooks that failed and were skipped.
    pub failed: usize,
}

impl ChainOutcome {
    /// True when at least one hook rewrote the body.
    pub fn rewritten(&self) -> bool {
        self.applied > 0
    }
}

/// Sequential pre-hook invoker.
#[derive(Debug, Clone)]
pub struct HookChain {
    client: reqwest::Client,
}

impl HookChain {
    /// Build a chain whose calls are each bounded by `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, HookError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()
            .map_err(HookError::Transport)?;
        Ok(Self { client })
    }

    /// Run `hooks` in order, starting from `original`.
    pub async fn run(&self, method: &str, original: Value, hooks: &[HookTarget]) -> ChainOutcome {
        let mut outcome = ChainOutcome {
            body: original,
            applied: 0,
            failed: 0,
        };

        for hook in hooks {
            match self.call(hook, method, &outcome.body).await {
                Ok(body) => {
                    tracing::debug!(hook = %hook.name, uri = %hook.uri, "Pre-hook applied");
                    metrics::record_hook_call("ok");
                    outcome.body = body;
                    outcome.applied += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        hook = %hook.name,
                        uri = %hook.uri,
                        error = %e,
                        "Pre-hook failed, continuing with previous body"
                    );
                    metrics::record_hook_call(e.label());
                    outcome.failed += 1;
                }
            }
        }

        outcome
    }

    async fn call(&self, hook: &HookTarget, method: &str, body: &Value) -> Result<Value, HookError> {
        let response = self
            .client
            .post(&hook.uri)
            .json(&PreHookRequest::new(method, body))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(HookError::Status(status.as_u16()));
        }

        let raw = response.bytes().await?;
        parse_hook_response(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn empty_chain_keeps_body() {
        let chain = HookChain::new(Duration::from_secs(1)).unwrap();
        let body = json!({"Image": "busybox"});

        let outcome = chain.run("POST", body.clone(), &[]).await;
        assert_eq!(outcome.body, body);
        assert!(!outcome.rewritten());
        assert_eq!(outcome.failed, 0);
    }

    #[tokio::test]
    async fn unreachable_hook_is_skipped() {
        // Bind then drop to get a port nothing listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let chain = HookChain::new(Duration::from_secs(1)).unwrap();
        let body = json!({"Image": "busybox"});
        let hooks = [HookTarget::new("gone", format!("http://{}/hook", addr))];

        let outcome = chain.run("POST", body.clone(), &hooks).await;
        assert_eq!(outcome.body, body);
        assert_eq!(outcome.failed, 1);
        assert!(!outcome.rewritten());
    }
}
