//! Trellis Memory
//!
//! Namespaced key-value store shared by memory nodes, tool nodes, and agent
//! memory functions. Keys are `"{namespace}:{name}"`; values are arbitrary
//! JSON and round-trip unchanged.
//!
//! Three backends are supported, probed in priority order at first use:
//!
//! 1. Relational - a SQLite table with `UNIQUE(namespace, name)` and a JSON
//!    column.
//! 2. Remote KV - redis, with the connection verified by a PING.
//! 3. In-process - a plain map, always available.
//!
//! If a higher-priority backend comes online later, the store upgrades on a
//! subsequent `set` and migrates the keys already written to the lower
//! backend. Backend I/O errors never surface to the step loop: reads
//! degrade to `None`, writes are dropped, both with a `warn` log.

mod backend;
mod remote;
mod sqlite;

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::backend::{Backend, InProcessBackend};
use crate::remote::RedisBackend;
use crate::sqlite::SqliteBackend;

pub use crate::backend::BackendError;

/// Backend connection settings. Unset URLs skip the corresponding tier.
#[derive(Debug, Clone, Default)]
pub struct MemoryConfig {
  /// SQLite DSN, e.g. `sqlite://trellis.db?mode=rwc`.
  pub database_url: Option<String>,
  /// Redis URL, e.g. `redis://127.0.0.1:6379`.
  pub redis_url: Option<String>,
  /// Minimum delay between upgrade probes. Defaults to 30 seconds.
  pub probe_interval: Option<Duration>,
}

/// Backend priority. Lower rank wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Tier {
  Relational,
  Remote,
  InProcess,
}

struct Active {
  tier: Tier,
  backend: Arc<dyn Backend>,
}

struct State {
  active: Option<Active>,
  last_probe: Option<Instant>,
}

/// The shared memory store.
///
/// Cheap to clone behind an `Arc`; all methods take `&self` and are safe to
/// call concurrently from parallel branches. Writes from different branches
/// to the same key race; last writer wins.
pub struct MemoryStore {
  config: MemoryConfig,
  probe_interval: Duration,
  state: Mutex<State>,
}

impl MemoryStore {
  /// Create a store that probes configured backends lazily at first use.
  pub fn new(config: MemoryConfig) -> Self {
    let probe_interval = config.probe_interval.unwrap_or(Duration::from_secs(30));
    Self {
      config,
      probe_interval,
      state: Mutex::new(State { active: None, last_probe: None }),
    }
  }

  /// Create a store pinned to the in-process backend. Used by tests and by
  /// deployments with no persistence configured.
  pub fn in_process() -> Self {
    Self::new(MemoryConfig::default())
  }

  /// Read a value. Missing keys and backend failures both yield `None`.
  pub async fn get(&self, key: &str) -> Option<Value> {
    let (namespace, name) = split_key(key);
    let backend = self.active_backend(false).await;
    match backend.get(namespace, name).await {
      Ok(value) => value,
      Err(err) => {
        warn!(key, error = %err, "memory store read failed");
        None
      }
    }
  }

  /// Write a value. Failures are dropped; callers must not rely on
  /// durability for step-loop correctness.
  pub async fn set(&self, key: &str, value: Value) {
    let (namespace, name) = split_key(key);
    let backend = self.active_backend(true).await;
    if let Err(err) = backend.set(namespace, name, &value).await {
      warn!(key, error = %err, "memory store write failed");
    }
  }

  /// Drop all stored keys.
  pub async fn clear(&self) {
    let backend = self.active_backend(false).await;
    if let Err(err) = backend.clear().await {
      warn!(error = %err, "memory store clear failed");
    }
  }

  /// Resolve the active backend, probing on first use and opportunistically
  /// re-probing higher-priority tiers on writes.
  async fn active_backend(&self, allow_upgrade: bool) -> Arc<dyn Backend> {
    let mut state = self.state.lock().await;

    if state.active.is_none() {
      state.active = Some(self.probe_all().await);
      state.last_probe = Some(Instant::now());
    } else if allow_upgrade {
      self.maybe_upgrade(&mut state).await;
    }

    state.active.as_ref().map(|a| a.backend.clone()).expect("backend probed above")
  }

  /// Probe tiers in priority order; the in-process backend always succeeds.
  async fn probe_all(&self) -> Active {
    if let Some(url) = &self.config.database_url {
      match SqliteBackend::connect(url).await {
        Ok(backend) => {
          debug!("memory store using relational backend");
          return Active { tier: Tier::Relational, backend: Arc::new(backend) };
        }
        Err(err) => warn!(error = %err, "relational memory backend unavailable"),
      }
    }
    if let Some(url) = &self.config.redis_url {
      match RedisBackend::connect(url).await {
        Ok(backend) => {
          debug!("memory store using remote kv backend");
          return Active { tier: Tier::Remote, backend: Arc::new(backend) };
        }
        Err(err) => warn!(error = %err, "remote kv memory backend unavailable"),
      }
    }
    Active { tier: Tier::InProcess, backend: Arc::new(InProcessBackend::default()) }
  }

  /// Try to move to a higher-priority backend, migrating existing keys so
  /// an upgrade never loses writes.
  async fn maybe_upgrade(&self, state: &mut State) {
    let current_tier = match &state.active {
      Some(active) if active.tier != self.best_configured_tier() => active.tier,
      _ => return,
    };

    let due = state.last_probe.is_none_or(|at| at.elapsed() >= self.probe_interval);
    if !due {
      return;
    }
    state.last_probe = Some(Instant::now());

    let upgraded = self.probe_all().await;
    if upgraded.tier >= current_tier {
      return;
    }

    let previous = state.active.take().expect("active backend present");
    match previous.backend.dump().await {
      Ok(entries) => {
        for (namespace, name, value) in entries {
          if let Err(err) = upgraded.backend.set(&namespace, &name, &value).await {
            warn!(namespace = %namespace, name = %name, error = %err, "memory key migration failed");
          }
        }
      }
      Err(err) => warn!(error = %err, "memory backend dump failed during upgrade"),
    }
    debug!(from = ?previous.tier, to = ?upgraded.tier, "memory store upgraded backend");
    state.active = Some(upgraded);
  }

  fn best_configured_tier(&self) -> Tier {
    if self.config.database_url.is_some() {
      Tier::Relational
    } else if self.config.redis_url.is_some() {
      Tier::Remote
    } else {
      Tier::InProcess
    }
  }
}

/// Split `"{namespace}:{name}"`; a bare name lands in the `default`
/// namespace.
fn split_key(key: &str) -> (&str, &str) {
  key.split_once(':').unwrap_or(("default", key))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[tokio::test]
  async fn in_process_round_trip() {
    let store = MemoryStore::in_process();
    store.set("d:k", json!({ "a": [1, 2, 3] })).await;
    assert_eq!(store.get("d:k").await, Some(json!({ "a": [1, 2, 3] })));
    assert_eq!(store.get("d:missing").await, None);
  }

  #[tokio::test]
  async fn bare_key_uses_default_namespace() {
    let store = MemoryStore::in_process();
    store.set("memory", json!("v")).await;
    assert_eq!(store.get("default:memory").await, Some(json!("v")));
  }

  #[tokio::test]
  async fn clear_drops_all_keys() {
    let store = MemoryStore::in_process();
    store.set("a:x", json!(1)).await;
    store.set("b:y", json!(2)).await;
    store.clear().await;
    assert_eq!(store.get("a:x").await, None);
    assert_eq!(store.get("b:y").await, None);
  }

  #[tokio::test]
  async fn unreachable_database_degrades_to_in_process() {
    let store = MemoryStore::new(MemoryConfig {
      database_url: Some("sqlite:///nonexistent-dir/nope.db".into()),
      ..MemoryConfig::default()
    });
    store.set("d:k", json!("still works")).await;
    assert_eq!(store.get("d:k").await, Some(json!("still works")));
  }

  #[tokio::test]
  async fn sqlite_backend_round_trips_shapes() {
    let store = MemoryStore::new(MemoryConfig {
      database_url: Some("sqlite::memory:".into()),
      ..MemoryConfig::default()
    });
    store.set("ns:list", json!([1, "two", null])).await;
    store.set("ns:map", json!({ "nested": { "k": true } })).await;
    assert_eq!(store.get("ns:list").await, Some(json!([1, "two", null])));
    assert_eq!(store.get("ns:map").await, Some(json!({ "nested": { "k": true } })));
    // Overwrite under the unique constraint.
    store.set("ns:list", json!("replaced")).await;
    assert_eq!(store.get("ns:list").await, Some(json!("replaced")));
  }
}
