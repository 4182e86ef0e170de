//! Photo Service
//!
//! Asynchronous derivative-generation pipeline for uploaded photographs.
//! A worker consumes photo-ready notifications from a durable queue,
//! fetches the original blob, decodes it, produces a fixed set of
//! grayscale JPEG size variants, and records each variant in a
//! per-photo size index.

pub mod config;
pub mod db;
pub mod error;
pub mod metrics;
pub mod models;
pub mod services;

// Public re-exports
pub use config::Config;
pub use error::{AppError, Result};
