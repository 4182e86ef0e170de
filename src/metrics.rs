//! Prometheus metrics for the photo worker

use once_cell::sync::Lazy;
use prometheus::{
    register_int_counter, register_int_counter_vec, IntCounter, IntCounterVec,
};

/// Messages fully processed and acknowledged
pub static PHOTOS_PROCESSED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "photo_worker_processed_total",
        "Photo messages processed and acknowledged"
    )
    .expect("metric can be registered")
});

/// Messages rejected to the dead-letter queue
pub static PHOTOS_DEAD_LETTERED: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "photo_worker_dead_lettered_total",
        "Photo messages rejected to the dead-letter queue"
    )
    .expect("metric can be registered")
});

/// Per-size variant failures, labeled by size
pub static VARIANT_FAILURES: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "photo_worker_variant_failures_total",
        "Size steps that failed to store or index a variant",
        &["size"]
    )
    .expect("metric can be registered")
});

/// Index updates that failed or matched no record, leaving a stored
/// variant unindexed
pub static INDEX_UPDATE_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "photo_worker_index_update_failures_total",
        "Size index updates that failed or matched no photo record"
    )
    .expect("metric can be registered")
});

/// Scratch files that could not be removed
pub static SCRATCH_CLEANUP_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "photo_worker_scratch_cleanup_failures_total",
        "Scratch spool files that could not be removed"
    )
    .expect("metric can be registered")
});
