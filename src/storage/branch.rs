use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqlitePool;
use uuid::Uuid;

use crate::types::{BranchId, LayerId};

use super::models::{Branch, CreateBranchInput};
use super::traits::BranchRepository;

#[derive(Clone)]
pub struct BranchOperations {
    pool: SqlitePool,
}

impl BranchOperations {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BranchRepository for BranchOperations {
    async fn create(&self, input: CreateBranchInput) -> Result<Branch> {
        let branch_id = Uuid::new_v4();

        let branch = sqlx::query_as::<_, Branch>(
            r#"
            INSERT INTO branches (branch_id, branch_name, port, layer_id, created_at)
            VALUES (?, ?, ?, ?, ?)
            RETURNING branch_id, branch_name, port, layer_id, created_at
            "#,
        )
        .bind(branch_id)
        .bind(&input.branch_name)
        .bind(input.port)
        .bind(input.layer_id)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            branch_id = %branch_id,
            branch_name = %input.branch_name,
            port = input.port,
            layer_id = %input.layer_id,
            "created branch"
        );

        Ok(branch)
    }

    async fn get_by_name(&self, branch_name: &str) -> Result<Option<Branch>> {
        let branch = sqlx::query_as::<_, Branch>(
            r#"
            SELECT branch_id, branch_name, port, layer_id, created_at
            FROM branches
            WHERE branch_name = ?
            "#,
        )
        .bind(branch_name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(branch)
    }

    async fn list(&self) -> Result<Vec<Branch>> {
        let branches = sqlx::query_as::<_, Branch>(
            r#"
            SELECT branch_id, branch_name, port, layer_id, created_at
            FROM branches
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(branches)
    }

    async fn set_current_layer(&self, branch_id: BranchId, layer_id: LayerId) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE branches
            SET layer_id = ?
            WHERE branch_id = ?
            "#,
        )
        .bind(layer_id)
        .bind(branch_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            bail!("branch {branch_id} does not exist");
        }

        tracing::debug!(branch_id = %branch_id, layer_id = %layer_id, "branch repointed");

        Ok(())
    }

    async fn delete_by_name(&self, branch_name: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM branches
            WHERE branch_name = ?
            "#,
        )
        .bind(branch_name)
        .execute(&self.pool)
        .await?;

        let deleted = result.rows_affected() > 0;

        if deleted {
            tracing::info!(branch_name = %branch_name, "deleted branch");
        }

        Ok(deleted)
    }

    async fn port_in_use(&self, port: u16) -> Result<bool> {
        let found = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM branches WHERE port = ?",
        )
        .bind(port)
        .fetch_one(&self.pool)
        .await?;

        Ok(found > 0)
    }
}
