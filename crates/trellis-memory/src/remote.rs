use async_trait::async_trait;
use redis::aio::ConnectionManager;
use serde_json::Value;

use crate::backend::{Backend, BackendError};

/// Redis-backed memory entries. Keys are stored flat as
/// `"{namespace}:{name}"`; values as JSON text.
pub struct RedisBackend {
  connection: ConnectionManager,
}

impl RedisBackend {
  /// Connect and verify the server answers a PING.
  pub async fn connect(url: &str) -> Result<Self, BackendError> {
    let client = redis::Client::open(url)?;
    let mut connection = ConnectionManager::new(client).await?;
    redis::cmd("PING").query_async::<()>(&mut connection).await?;
    Ok(Self { connection })
  }

  fn flat_key(namespace: &str, name: &str) -> String {
    format!("{namespace}:{name}")
  }
}

#[async_trait]
impl Backend for RedisBackend {
  async fn get(&self, namespace: &str, name: &str) -> Result<Option<Value>, BackendError> {
    let mut connection = self.connection.clone();
    let raw: Option<String> = redis::cmd("GET")
      .arg(Self::flat_key(namespace, name))
      .query_async(&mut connection)
      .await?;

    match raw {
      // Older writers may have stored bare strings; fall back to the raw
      // text when the payload is not valid JSON.
      Some(raw) => Ok(Some(serde_json::from_str(&raw).unwrap_or(Value::String(raw)))),
      None => Ok(None),
    }
  }

  async fn set(&self, namespace: &str, name: &str, value: &Value) -> Result<(), BackendError> {
    let mut connection = self.connection.clone();
    let payload = serde_json::to_string(value)?;
    redis::cmd("SET")
      .arg(Self::flat_key(namespace, name))
      .arg(payload)
      .query_async::<()>(&mut connection)
      .await?;
    Ok(())
  }

  async fn clear(&self) -> Result<(), BackendError> {
    let mut connection = self.connection.clone();
    redis::cmd("FLUSHDB").query_async::<()>(&mut connection).await?;
    Ok(())
  }

  async fn dump(&self) -> Result<Vec<(String, String, Value)>, BackendError> {
    let mut connection = self.connection.clone();
    let keys: Vec<String> = redis::cmd("KEYS").arg("*").query_async(&mut connection).await?;

    let mut entries = Vec::with_capacity(keys.len());
    for key in keys {
      let raw: Option<String> =
        redis::cmd("GET").arg(&key).query_async(&mut connection).await?;
      if let Some(raw) = raw {
        let value = serde_json::from_str(&raw).unwrap_or(Value::String(raw));
        let (namespace, name) = key.split_once(':').unwrap_or(("default", key.as_str()));
        entries.push((namespace.to_string(), name.to_string(), value));
      }
    }
    Ok(entries)
  }
}
