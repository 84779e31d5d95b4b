use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqlitePool;
use uuid::Uuid;

use crate::types::LayerId;

use super::models::Layer;
use super::traits::LayerRepository;

#[derive(Clone)]
pub struct LayerOperations {
    pool: SqlitePool,
}

impl LayerOperations {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LayerRepository for LayerOperations {
    async fn create(&self, parent_layer_id: Option<LayerId>) -> Result<Layer> {
        // A freshly generated id has no descendants, so insisting the parent
        // already exists is enough to keep the forest acyclic.
        if let Some(parent) = parent_layer_id {
            let found = sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM layers WHERE layer_id = ?",
            )
            .bind(parent)
            .fetch_one(&self.pool)
            .await?;

            if found == 0 {
                bail!("parent layer {parent} does not exist");
            }
        }

        let layer_id = Uuid::new_v4();

        let layer = sqlx::query_as::<_, Layer>(
            r#"
            INSERT INTO layers (layer_id, parent_layer_id, created_at)
            VALUES (?, ?, ?)
            RETURNING layer_id, parent_layer_id, created_at
            "#,
        )
        .bind(layer_id)
        .bind(parent_layer_id)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            layer_id = %layer_id,
            parent_layer_id = ?parent_layer_id,
            "created layer"
        );

        Ok(layer)
    }

    async fn get(&self, layer_id: LayerId) -> Result<Option<Layer>> {
        let layer = sqlx::query_as::<_, Layer>(
            r#"
            SELECT layer_id, parent_layer_id, created_at
            FROM layers
            WHERE layer_id = ?
            "#,
        )
        .bind(layer_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(layer)
    }

    async fn ancestor_chain(&self, layer_id: LayerId) -> Result<Vec<Layer>> {
        // The depth bound is a backstop: insert-time validation keeps the
        // parent graph acyclic, so a hit means corrupted metadata.
        let layers = sqlx::query_as::<_, Layer>(
            r#"
            WITH RECURSIVE chain AS (
                SELECT layer_id, parent_layer_id, created_at, 0 AS depth
                FROM layers
                WHERE layer_id = ?

                UNION ALL

                SELECT l.layer_id, l.parent_layer_id, l.created_at, c.depth + 1
                FROM layers l
                INNER JOIN chain c ON l.layer_id = c.parent_layer_id
                WHERE c.depth < 1024
            )
            SELECT layer_id, parent_layer_id, created_at
            FROM chain
            ORDER BY depth
            "#,
        )
        .bind(layer_id)
        .fetch_all(&self.pool)
        .await?;

        if layers.is_empty() {
            bail!("layer {layer_id} does not exist");
        }

        Ok(layers)
    }

    async fn list(&self) -> Result<Vec<Layer>> {
        let layers = sqlx::query_as::<_, Layer>(
            r#"
            SELECT layer_id, parent_layer_id, created_at
            FROM layers
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(layers)
    }
}
