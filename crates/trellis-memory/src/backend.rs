use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Error type shared by the memory backends.
#[derive(Debug, Error)]
pub enum BackendError {
  #[error("database error: {0}")]
  Database(#[from] sqlx::Error),

  #[error("redis error: {0}")]
  Redis(#[from] redis::RedisError),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),

  #[error("key rejected: {0}")]
  KeyRejected(String),
}

/// Storage operations a backend must provide.
///
/// `dump` exists so an upgrade to a higher-priority backend can migrate
/// the keys already written here.
#[async_trait]
pub trait Backend: Send + Sync {
  async fn get(&self, namespace: &str, name: &str) -> Result<Option<Value>, BackendError>;
  async fn set(&self, namespace: &str, name: &str, value: &Value) -> Result<(), BackendError>;
  async fn clear(&self) -> Result<(), BackendError>;
  async fn dump(&self) -> Result<Vec<(String, String, Value)>, BackendError>;
}

/// Always-available map backend.
#[derive(Default)]
pub struct InProcessBackend {
  entries: Mutex<BTreeMap<(String, String), Value>>,
}

#[async_trait]
impl Backend for InProcessBackend {
  async fn get(&self, namespace: &str, name: &str) -> Result<Option<Value>, BackendError> {
    let entries = self.entries.lock().expect("memory map poisoned");
    Ok(entries.get(&(namespace.to_string(), name.to_string())).cloned())
  }

  async fn set(&self, namespace: &str, name: &str, value: &Value) -> Result<(), BackendError> {
    let mut entries = self.entries.lock().expect("memory map poisoned");
    entries.insert((namespace.to_string(), name.to_string()), value.clone());
    Ok(())
  }

  async fn clear(&self) -> Result<(), BackendError> {
    self.entries.lock().expect("memory map poisoned").clear();
    Ok(())
  }

  async fn dump(&self) -> Result<Vec<(String, String, Value)>, BackendError> {
    let entries = self.entries.lock().expect("memory map poisoned");
    Ok(
      entries
        .iter()
        .map(|((namespace, name), value)| (namespace.clone(), name.clone(), value.clone()))
        .collect(),
    )
  }
}
