use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

use crate::backend::{Backend, BackendError};

/// Relational bounds for key components.
const MAX_NAMESPACE_LEN: usize = 128;
const MAX_NAME_LEN: usize = 256;

/// SQLite-backed memory entries with a `UNIQUE(namespace, name)` constraint
/// and a JSON text column.
pub struct SqliteBackend {
  pool: SqlitePool,
}

impl SqliteBackend {
  /// Connect and create the schema if missing.
  ///
  /// SQLite allows a single writer; one pooled connection keeps `:memory:`
  /// databases coherent and avoids writer contention on files.
  pub async fn connect(url: &str) -> Result<Self, BackendError> {
    let pool = SqlitePoolOptions::new().max_connections(1).connect(url).await?;
    sqlx::query(
      r#"
            CREATE TABLE IF NOT EXISTS memory_entries (
                namespace TEXT NOT NULL,
                name TEXT NOT NULL,
                value TEXT NOT NULL,
                UNIQUE(namespace, name)
            )
            "#,
    )
    .execute(&pool)
    .await?;
    Ok(Self { pool })
  }

  fn check_bounds(namespace: &str, name: &str) -> Result<(), BackendError> {
    if namespace.len() > MAX_NAMESPACE_LEN {
      return Err(BackendError::KeyRejected(format!(
        "namespace exceeds {MAX_NAMESPACE_LEN} chars"
      )));
    }
    if name.len() > MAX_NAME_LEN {
      return Err(BackendError::KeyRejected(format!("name exceeds {MAX_NAME_LEN} chars")));
    }
    Ok(())
  }
}

#[async_trait]
impl Backend for SqliteBackend {
  async fn get(&self, namespace: &str, name: &str) -> Result<Option<Value>, BackendError> {
    let row = sqlx::query(
      r#"
            SELECT value FROM memory_entries
            WHERE namespace = ? AND name = ?
            "#,
    )
    .bind(namespace)
    .bind(name)
    .fetch_optional(&self.pool)
    .await?;

    match row {
      Some(row) => {
        let raw: String = row.try_get("value")?;
        Ok(Some(serde_json::from_str(&raw)?))
      }
      None => Ok(None),
    }
  }

  async fn set(&self, namespace: &str, name: &str, value: &Value) -> Result<(), BackendError> {
    Self::check_bounds(namespace, name)?;
    let payload = serde_json::to_string(value)?;
    sqlx::query(
      r#"
            INSERT INTO memory_entries (namespace, name, value)
            VALUES (?, ?, ?)
            ON CONFLICT(namespace, name) DO UPDATE SET value = excluded.value
            "#,
    )
    .bind(namespace)
    .bind(name)
    .bind(payload)
    .execute(&self.pool)
    .await?;
    Ok(())
  }

  async fn clear(&self) -> Result<(), BackendError> {
    sqlx::query("DELETE FROM memory_entries").execute(&self.pool).await?;
    Ok(())
  }

  async fn dump(&self) -> Result<Vec<(String, String, Value)>, BackendError> {
    let rows = sqlx::query("SELECT namespace, name, value FROM memory_entries")
      .fetch_all(&self.pool)
      .await?;

    let mut entries = Vec::with_capacity(rows.len());
    for row in rows {
      let namespace: String = row.try_get("namespace")?;
      let name: String = row.try_get("name")?;
      let raw: String = row.try_get("value")?;
      entries.push((namespace, name, serde_json::from_str(&raw)?));
    }
    Ok(entries)
  }
}
