//! Size index - per-photo mapping from size label to variant blob id
//!
//! Stored as a `variants` JSONB column on the `photos` row, keyed by the
//! original blob id. Updates are idempotent upserts: setting the same
//! label to the same variant id twice leaves the record unchanged.

use crate::config::DatabaseConfig;
use crate::error::{AppError, Result};
use crate::models::SizeLabel;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

/// Per-original size index
#[async_trait]
pub trait SizeIndex: Send + Sync {
    /// Record `variant_id` under `size` for the photo `original_id`.
    ///
    /// Returns `false` when no record exists for `original_id` (the
    /// original was deleted out-of-band); the mapping is untouched in
    /// that case.
    async fn set_variant(
        &self,
        original_id: &str,
        size: SizeLabel,
        variant_id: &str,
    ) -> Result<bool>;
}

/// PostgreSQL-backed size index
pub struct PgSizeIndex {
    pool: PgPool,
}

impl PgSizeIndex {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect a dedicated pool from configuration
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .map_err(|e| AppError::Config(format!("Failed to connect to Postgres: {e}")))?;

        info!("Size index connected");
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl SizeIndex for PgSizeIndex {
    async fn set_variant(
        &self,
        original_id: &str,
        size: SizeLabel,
        variant_id: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE photos
            SET variants = COALESCE(variants, '{}'::jsonb) || jsonb_build_object($2::text, $3::text)
            WHERE id = $1
            "#,
        )
        .bind(original_id)
        .bind(size.as_str())
        .bind(variant_id)
        .execute(&self.pool)
        .await
        .map_err(|e| AppError::IndexUpdateFailure(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }
}
