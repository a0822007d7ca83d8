//! Secret storage in a SQL database through sqlx

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::SecureStore,
};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::str::FromStr;
use tracing::debug;

const SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS secrets (
        key TEXT PRIMARY KEY,
        value BLOB NOT NULL,
        updated_at INTEGER NOT NULL
    )
"#;

/// SQLite-backed `SecureStore`
///
/// Used as the remote session store: the connection string comes from
/// `STORE_URL`, so the session survives the loss of the local disk as long as
/// the database lives elsewhere (a mounted volume, a replicated file).
pub struct SqliteSecureStore {
    pool: SqlitePool,
}

impl SqliteSecureStore {
    /// Connect to `url` (e.g. `sqlite:///data/daily-drop.db`), creating the
    /// database file and the table if needed
    pub async fn connect(url: &str) -> Result<Self> {
        if !url.starts_with("sqlite:") {
            return Err(BridgeError::DatabaseError(
                "Unsupported store URL scheme, expected sqlite:".to_string(),
            ));
        }

        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| BridgeError::DatabaseError(format!("Invalid store URL: {}", e)))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
            .map_err(|e| BridgeError::DatabaseError(format!("Failed to connect to store: {}", e)))?;

        Self::from_pool(pool).await
    }

    /// In-memory store (for testing)
    pub async fn in_memory() -> Result<Self> {
        // A single connection: every pooled connection would otherwise get
        // its own empty in-memory database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| BridgeError::DatabaseError(format!("Failed to open store: {}", e)))?;

        Self::from_pool(pool).await
    }

    async fn from_pool(pool: SqlitePool) -> Result<Self> {
        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .map_err(|e| BridgeError::DatabaseError(format!("Failed to create table: {}", e)))?;

        debug!("Initialized secret store");
        Ok(Self { pool })
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }
}

#[async_trait]
impl SecureStore for SqliteSecureStore {
    async fn set_secret(&self, key: &str, value: &[u8]) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO secrets (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Self::now())
        .execute(&self.pool)
        .await
        .map_err(|e| BridgeError::DatabaseError(format!("Failed to store secret: {}", e)))?;

        debug!(key, bytes = value.len(), "Stored secret");
        Ok(())
    }

    async fn get_secret(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let row = sqlx::query("SELECT value FROM secrets WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| BridgeError::DatabaseError(format!("Failed to read secret: {}", e)))?;

        Ok(row.map(|row| row.get::<Vec<u8>, _>(0)))
    }

    async fn has_secret(&self, key: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM secrets WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| BridgeError::DatabaseError(format!("Failed to check key: {}", e)))?;

        Ok(row.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upsert_and_read() {
        let store = SqliteSecureStore::in_memory().await.unwrap();

        assert_eq!(store.get_secret("messaging_session").await.unwrap(), None);

        store.set_secret("messaging_session", b"first").await.unwrap();
        store.set_secret("messaging_session", b"second").await.unwrap();

        assert_eq!(
            store.get_secret("messaging_session").await.unwrap(),
            Some(b"second".to_vec())
        );
        assert!(store.has_secret("messaging_session").await.unwrap());
        assert!(!store.has_secret("other").await.unwrap());
    }

    #[tokio::test]
    async fn test_file_database_survives_reconnect() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("store.db").display());

        {
            let store = SqliteSecureStore::connect(&url).await.unwrap();
            store.set_secret("k", &[0, 159, 146, 150]).await.unwrap();
        }

        let store = SqliteSecureStore::connect(&url).await.unwrap();
        assert_eq!(
            store.get_secret("k").await.unwrap(),
            Some(vec![0, 159, 146, 150])
        );
    }

    #[tokio::test]
    async fn test_invalid_url_is_database_error() {
        let err = SqliteSecureStore::connect("postgres://nope")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, BridgeError::DatabaseError(_)));
    }
}
