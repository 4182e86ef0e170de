//! Photo Worker - consumes photo-ready messages and generates size variants
//!
//! Listens on the durable `photos` queue for original blob ids, fetches
//! each original from the blob store, derives the grayscale JPEG size
//! variants and records them in the per-photo size index.
//!
//! Environment variables:
//! - AMQP_URL: broker address (default: "amqp://localhost:5672/%2f")
//! - PHOTO_QUEUE: work queue name (default: "photos")
//! - PHOTO_DEAD_QUEUE: dead-letter queue name (default: "photos.dead")
//! - PREFETCH_COUNT: max unacked messages per consumer (default: 1)
//! - DATABASE_URL: PostgreSQL URL for the size index (required)
//! - S3_BUCKET: blob bucket (default: "photos")
//! - AWS_REGION / AWS_ACCESS_KEY_ID / AWS_SECRET_ACCESS_KEY / S3_ENDPOINT
//! - SCRATCH_DIR: variant spool directory (default: "./scratch")
//! - JPEG_QUALITY: variant JPEG quality 0-100 (default: 60)

use anyhow::Context;
use photo_service::config::Config;
use photo_service::db::PgSizeIndex;
use photo_service::services::blobstore::S3BlobStore;
use photo_service::services::pipeline::{PipelineConfig, ResizePipeline};
use photo_service::services::queue::QueueConnector;
use photo_service::services::worker::PhotoWorker;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("photo_worker=info".parse().expect("valid directive"))
                .add_directive("photo_service=info".parse().expect("valid directive")),
        )
        .init();

    info!("Starting Photo Worker");

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env().context("loading configuration")?;
    info!(
        queue = %config.amqp.queue,
        bucket = %config.s3.bucket,
        prefetch = config.amqp.prefetch_count,
        "Configuration loaded"
    );

    tokio::fs::create_dir_all(&config.worker.scratch_dir)
        .await
        .context("creating scratch directory")?;

    // Blob store
    let blobs = Arc::new(
        S3BlobStore::from_config(&config.s3)
            .await
            .context("initializing blob store")?,
    );

    // Size index
    let index = Arc::new(
        PgSizeIndex::connect(&config.database)
            .await
            .context("connecting size index")?,
    );

    // Worker
    let pipeline = Arc::new(ResizePipeline::new(PipelineConfig {
        quality: config.worker.jpeg_quality,
    }));
    let worker = Arc::new(PhotoWorker::new(
        blobs,
        index,
        pipeline,
        config.worker.scratch_dir.clone(),
    ));
    info!("Photo worker initialized");

    // Graceful shutdown on SIGINT
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for ctrl+c");
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    // Run the consumer (blocks until shutdown)
    let mut connector = QueueConnector::new(config.amqp.clone(), worker, shutdown_rx);
    if let Err(e) = connector.run().await {
        error!(error = %e, "Queue connector error");
    }

    info!("Photo Worker stopped");
    Ok(())
}
