/// Configuration management for photo-service
///
/// Loads configuration from environment variables with sensible defaults.
use crate::error::{AppError, Result};
use std::path::PathBuf;

#[derive(Clone, Debug)]
pub struct Config {
    pub amqp: AmqpConfig,
    pub database: DatabaseConfig,
    pub s3: S3Config,
    pub worker: WorkerConfig,
}

#[derive(Clone, Debug)]
pub struct AmqpConfig {
    pub url: String,
    pub queue: String,
    pub dead_queue: String,
    /// Maximum unacknowledged messages per consumer
    pub prefetch_count: u16,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Clone, Debug)]
pub struct S3Config {
    pub bucket: String,
    pub region: String,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub endpoint: Option<String>,
}

#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// Directory for temporary variant spool files
    pub scratch_dir: PathBuf,
    pub jpeg_quality: u8,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            amqp: AmqpConfig {
                url: std::env::var("AMQP_URL")
                    .unwrap_or_else(|_| "amqp://localhost:5672/%2f".to_string()),
                queue: std::env::var("PHOTO_QUEUE").unwrap_or_else(|_| "photos".to_string()),
                dead_queue: std::env::var("PHOTO_DEAD_QUEUE")
                    .unwrap_or_else(|_| "photos.dead".to_string()),
                prefetch_count: std::env::var("PREFETCH_COUNT")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(1),
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")
                    .map_err(|_| AppError::Config("DATABASE_URL not set".to_string()))?,
                max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(5),
            },
            s3: S3Config {
                bucket: std::env::var("S3_BUCKET").unwrap_or_else(|_| "photos".to_string()),
                region: std::env::var("AWS_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
                access_key_id: std::env::var("AWS_ACCESS_KEY_ID").ok(),
                secret_access_key: std::env::var("AWS_SECRET_ACCESS_KEY").ok(),
                endpoint: std::env::var("S3_ENDPOINT").ok(),
            },
            worker: WorkerConfig {
                scratch_dir: std::env::var("SCRATCH_DIR")
                    .unwrap_or_else(|_| "./scratch".to_string())
                    .into(),
                jpeg_quality: std::env::var("JPEG_QUALITY")
                    .ok()
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(60),
            },
        })
    }
}
