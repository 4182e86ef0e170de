//! Worker services
//!
//! - Blob store client for originals and variants
//! - Resize pipeline producing the fixed set of size variants
//! - AMQP queue connector with reconnect handling
//! - Orchestrator driving the per-message pipeline

pub mod blobstore;
pub mod pipeline;
pub mod queue;
pub mod worker;

pub use blobstore::{BlobMetadata, BlobStore, S3BlobStore};
pub use pipeline::{Derivative, PipelineConfig, ResizePipeline};
pub use queue::QueueConnector;
pub use worker::{PhotoWorker, ProcessOutcome};
