use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::state::ExecutionState;

/// Default record lifetime, refreshed on every update.
const DEFAULT_TTL: Duration = Duration::from_secs(300);

struct Entry {
  expires_at: Instant,
  state: ExecutionState,
}

/// Shared execution-state cache keyed by `execution_<id>`.
///
/// All mutations go through [`ExecutionCache::update`], which holds the
/// map lock across the read-modify-write - concurrent branch workers can
/// never interleave a lost update. Expired entries are dropped lazily on
/// read.
pub struct ExecutionCache {
  ttl: Duration,
  entries: Mutex<HashMap<String, Entry>>,
}

impl Default for ExecutionCache {
  fn default() -> Self {
    Self::new()
  }
}

impl ExecutionCache {
  pub fn new() -> Self {
    Self::with_ttl(DEFAULT_TTL)
  }

  pub fn with_ttl(ttl: Duration) -> Self {
    Self { ttl, entries: Mutex::new(HashMap::new()) }
  }

  fn cache_key(execution_id: &str) -> String {
    format!("execution_{execution_id}")
  }

  /// Read a record; `None` when absent or expired.
  pub fn get(&self, execution_id: &str) -> Option<ExecutionState> {
    let key = Self::cache_key(execution_id);
    let mut entries = self.entries.lock().expect("cache lock poisoned");
    match entries.get(&key) {
      Some(entry) if entry.expires_at > Instant::now() => Some(entry.state.clone()),
      Some(_) => {
        entries.remove(&key);
        None
      }
      None => None,
    }
  }

  /// Atomic read-modify-write. A missing or expired record starts over
  /// from a fresh `running` state; the TTL and timestamp refresh on every
  /// call.
  pub fn update(&self, execution_id: &str, mutate: impl FnOnce(&mut ExecutionState)) {
    let key = Self::cache_key(execution_id);
    let mut entries = self.entries.lock().expect("cache lock poisoned");
    let now = Instant::now();

    let entry = entries.entry(key).or_insert_with(|| Entry {
      expires_at: now + self.ttl,
      state: ExecutionState::running(),
    });
    if entry.expires_at <= now {
      entry.state = ExecutionState::running();
    }

    mutate(&mut entry.state);
    entry.state.touch();
    entry.expires_at = now + self.ttl;
  }

  /// Replace a record wholesale.
  pub fn set(&self, execution_id: &str, state: ExecutionState) {
    self.update(execution_id, |current| *current = state);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::state::ExecutionStatus;
  use serde_json::json;

  #[test]
  fn update_creates_then_mutates() {
    let cache = ExecutionCache::new();
    assert!(cache.get("x").is_none());

    cache.update("x", |state| state.steps = 1);
    cache.update("x", |state| {
      state.steps += 1;
      state.final_value = json!("out");
    });

    let state = cache.get("x").unwrap();
    assert_eq!(state.steps, 2);
    assert_eq!(state.final_value, json!("out"));
    assert_eq!(state.status, ExecutionStatus::Running);
  }

  #[test]
  fn entries_expire_after_ttl() {
    let cache = ExecutionCache::with_ttl(Duration::from_millis(0));
    cache.update("x", |state| state.steps = 1);
    std::thread::sleep(Duration::from_millis(5));
    assert!(cache.get("x").is_none());
  }

  #[test]
  fn updates_are_serialized_across_threads() {
    let cache = std::sync::Arc::new(ExecutionCache::new());
    let mut handles = Vec::new();
    for _ in 0..8 {
      let cache = cache.clone();
      handles.push(std::thread::spawn(move || {
        for _ in 0..100 {
          cache.update("shared", |state| state.steps += 1);
        }
      }));
    }
    for handle in handles {
      handle.join().unwrap();
    }
    assert_eq!(cache.get("shared").unwrap().steps, 800);
  }
}
