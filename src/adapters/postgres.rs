use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::Row;
use tracing::{debug, info, instrument};

use crate::domain::TradeState;
use crate::error::Result;
use crate::persistence::StateStore;

/// PostgreSQL TradeState storage, one JSONB row per state key
#[derive(Clone)]
pub struct PostgresStateStore {
    pool: PgPool,
    key: String,
}

impl PostgresStateStore {
    /// Create a new PostgreSQL store
    pub async fn new(database_url: &str, max_connections: u32, key: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL");
        Ok(Self::from_pool(pool, key))
    }

    /// Create a store from an existing connection pool
    pub fn from_pool(pool: PgPool, key: &str) -> Self {
        Self {
            pool,
            key: key.to_string(),
        }
    }

    /// Create the state table if it does not exist
    pub async fn ensure_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trade_state (
                state_key TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                data JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("trade_state table ready");
        Ok(())
    }

    /// Get the connection pool
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl StateStore for PostgresStateStore {
    #[instrument(skip(self), fields(key = %self.key))]
    async fn load(&self) -> Result<Option<TradeState>> {
        let row = sqlx::query("SELECT data FROM trade_state WHERE state_key = $1")
            .bind(&self.key)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let Json(state): Json<TradeState> = row.try_get("data")?;
                Ok(Some(state))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self, state), fields(key = %self.key, status = %state.state))]
    async fn save(&self, state: &TradeState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO trade_state (state_key, status, data, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (state_key) DO UPDATE SET
                status = EXCLUDED.status,
                data = EXCLUDED.data,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&self.key)
        .bind(state.state.as_str())
        .bind(Json(state))
        .bind(state.updated_at)
        .execute(&self.pool)
        .await?;

        debug!("trade state saved");
        Ok(())
    }
}
