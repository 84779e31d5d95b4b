use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

use crate::config::DatabaseConfig;

/// Branch name and port carry unique constraints; the lifecycle manager
/// relies on the registry rejecting duplicates it failed to catch up front.
const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS layers (
        layer_id        BLOB PRIMARY KEY,
        parent_layer_id BLOB REFERENCES layers(layer_id),
        created_at      TEXT NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS branches (
        branch_id   BLOB PRIMARY KEY,
        branch_name TEXT NOT NULL UNIQUE,
        port        INTEGER NOT NULL UNIQUE,
        layer_id    BLOB NOT NULL REFERENCES layers(layer_id),
        created_at  TEXT NOT NULL
    )
    "#,
];

#[derive(Clone)]
pub struct DatabasePool {
    pool: SqlitePool,
}

impl DatabasePool {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await?;

        tracing::info!(
            url = %config.url,
            max_connections = config.max_connections,
            "database pool created"
        );

        Ok(Self { pool })
    }

    /// In-memory database, for tests and embedding.
    pub async fn new_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);

        // A single connection keeps every handle on the same in-memory database.
        let pool = SqlitePoolOptions::new().max_connections(1).connect_with(options).await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the metadata tables if they do not exist. Safe to run on every
    /// startup; reconciliation depends on surviving rows staying intact.
    pub async fn init_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        tracing::info!("database schema initialized");
        Ok(())
    }

    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("database pool closed");
    }
}
