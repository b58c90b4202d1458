//! Relational backend: one row per store key in `psm_store(store_key PK,
//! payload JSONB, updated_at TIMESTAMPTZ)`, upserted whole-document on every
//! save. Mirrors `RiskManager`'s `sqlx::AnyPool` wrapping pattern.

use psm_core::{PsmError, Store};

use crate::migrate::migrate;
use crate::validate::validate_store;

pub struct PgStore {
    pool: sqlx::AnyPool,
}

impl PgStore {
    pub fn new(pool: sqlx::AnyPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &sqlx::AnyPool {
        &self.pool
    }

    pub async fn ensure_schema(&self) -> Result<(), PsmError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS psm_store (
                store_key TEXT PRIMARY KEY,
                payload JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| PsmError::StorageError(format!("creating psm_store table: {e}")))?;
        Ok(())
    }

    pub async fn load(&self, store_key: &str) -> Result<Store, PsmError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT payload FROM psm_store WHERE store_key = ?")
            .bind(store_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PsmError::StorageError(format!("loading {store_key}: {e}")))?;

        let Some((payload,)) = row else {
            return Ok(Store::empty());
        };

        let raw: serde_json::Value = serde_json::from_str(&payload)
            .map_err(|e| PsmError::StorageError(format!("parsing payload for {store_key}: {e}")))?;
        let store = migrate(raw);
        validate_store(&store)?;
        Ok(store)
    }

    pub async fn save(&self, store_key: &str, store: &Store) -> Result<(), PsmError> {
        let payload = serde_json::to_string(store)
            .map_err(|e| PsmError::StorageError(format!("serializing store: {e}")))?;

        sqlx::query(
            r#"
            INSERT INTO psm_store (store_key, payload, updated_at)
            VALUES (?, ?, now())
            ON CONFLICT (store_key) DO UPDATE SET payload = excluded.payload, updated_at = excluded.updated_at
            "#,
        )
        .bind(store_key)
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(|e| PsmError::StorageError(format!("saving {store_key}: {e}")))?;
        Ok(())
    }
}
