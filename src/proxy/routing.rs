//! Host-based routing table
//!
//! Maps a requested hostname to an ordered list of backend targets and
//! picks among them round-robin. Each worker process owns its own table;
//! nothing here is shared between processes.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// How `register` treats the rotation cursor of an existing host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationPolicy {
    /// Every registration restarts rotation at the first target.
    #[default]
    ResetOnRegister,
    /// The cursor is set once, when the host is first registered.
    KeepCursor,
}

/// Prefixes `http://` unless the target already names http or https.
///
/// ```
/// # use switchyard::proxy::routing::normalize_target;
/// assert_eq!(normalize_target("example.com:8080"), "http://example.com:8080");
/// assert_eq!(normalize_target("https://example.com"), "https://example.com");
/// ```
pub fn normalize_target(target: &str) -> String {
    if target.starts_with("http://") || target.starts_with("https://") {
        target.to_string()
    } else {
        format!("http://{}", target)
    }
}

/// Targets registered for one hostname plus the rotation cursor.
#[derive(Debug, Clone, Default)]
pub struct RouteEntry {
    targets: Vec<String>,
    cursor: usize,
}

impl RouteEntry {
    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Returns the target under the cursor and advances it, wrapping.
    fn advance(&mut self) -> Option<String> {
        if self.targets.is_empty() {
            return None;
        }

        // a cursor past the end means the entry was never rotated
        if self.cursor >= self.targets.len() {
            self.cursor = 0;
        }

        let target = self.targets[self.cursor].clone();
        self.cursor = (self.cursor + 1) % self.targets.len();
        Some(target)
    }
}

/// Ordered `(host, target)` registrations captured once from configuration.
///
/// Every worker replays the same snapshot at startup so all replicas serve
/// the same routes, each with its own independent rotation state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteSnapshot {
    registrations: Vec<(String, String)>,
}

impl RouteSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, host: impl Into<String>, target: impl Into<String>) -> Self {
        self.registrations.push((host.into(), target.into()));
        self
    }

    pub fn registrations(&self) -> &[(String, String)] {
        &self.registrations
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}

/// Hostname to targets map with per-host round-robin.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    routes: Arc<RwLock<HashMap<String, RouteEntry>>>,
    policy: RotationPolicy,
}

impl Default for RoutingTable {
    fn default() -> Self {
        Self::new(RotationPolicy::default())
    }
}

impl RoutingTable {
    pub fn new(policy: RotationPolicy) -> Self {
        Self {
            routes: Arc::new(RwLock::new(HashMap::new())),
            policy,
        }
    }

    /// Builds a table by replaying `snapshot` in order.
    pub async fn from_snapshot(snapshot: &RouteSnapshot, policy: RotationPolicy) -> Self {
        let table = Self::new(policy);
        for (host, target) in snapshot.registrations() {
            table.register(host, target).await;
        }
        table
    }

    pub fn policy(&self) -> RotationPolicy {
        self.policy
    }

    /// Adds `target` to the rotation for `host`.
    ///
    /// The target is normalized to carry a scheme. Under
    /// `RotationPolicy::ResetOnRegister` the cursor goes back to the first
    /// target on every call, so adding a backend restarts the rotation.
    pub async fn register(&self, host: &str, target: &str) {
        let target = normalize_target(target);
        let mut routes = self.routes.write().await;

        let entry = routes.entry(host.to_string()).or_default();
        if self.policy == RotationPolicy::ResetOnRegister {
            entry.cursor = 0;
        }
        entry.targets.push(target.clone());

        tracing::debug!(
            host = host,
            target = %target,
            targets = entry.targets.len(),
            "Route registered"
        );
    }

    /// Picks the next target for `host`.
    ///
    /// Returns `None` for an empty host, an unknown host, or a host with no
    /// targets. The read and the cursor advance happen under one write lock.
    pub async fn resolve(&self, host: &str) -> Option<String> {
        if host.is_empty() {
            return None;
        }

        let mut routes = self.routes.write().await;
        routes.get_mut(host)?.advance()
    }

    /// Copy of the registered targets for `host`, in rotation order.
    pub async fn targets(&self, host: &str) -> Option<Vec<String>> {
        let routes = self.routes.read().await;
        routes.get(host).map(|entry| entry.targets.clone())
    }

    /// Copy of the entry for `host`.
    pub async fn entry(&self, host: &str) -> Option<RouteEntry> {
        self.routes.read().await.get(host).cloned()
    }

    /// Number of hosts with an entry.
    pub async fn len(&self) -> usize {
        self.routes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.routes.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_entry_yields_nothing() {
        let mut entry = RouteEntry::default();
        assert_eq!(entry.advance(), None);
    }

    #[test]
    fn advance_wraps() {
        let mut entry = RouteEntry {
            targets: vec!["http://a".into(), "http://b".into()],
            cursor: 1,
        };

        assert_eq!(entry.advance().as_deref(), Some("http://b"));
        assert_eq!(entry.cursor(), 0);
        assert_eq!(entry.advance().as_deref(), Some("http://a"));
    }
}
