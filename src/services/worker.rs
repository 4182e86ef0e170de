//! Worker orchestrator - drives the per-message pipeline
//!
//! For each photo id delivered by the queue: fetch the original blob,
//! derive the size variants, store each variant, and record it in the
//! size index. The `orig` step gates the message; the four target-size
//! steps are independent of each other and a failure in one of them is
//! reported in the outcome without failing the message.
//!
//! Every variant is spooled to a scratch file and streamed to the blob
//! store from there; the scratch file is removed on every exit path.

use crate::db::SizeIndex;
use crate::error::{AppError, Result};
use crate::metrics;
use crate::models::SizeLabel;
use crate::services::blobstore::{BlobMetadata, BlobStore};
use crate::services::pipeline::{Derivative, ResizePipeline};
use bytes::Bytes;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Structured result of processing one message.
///
/// The message is acknowledged whenever `process_photo` returns `Ok`,
/// even with per-size failures recorded here; only a fatal error on the
/// mandatory `orig` step (or fetch/decode) fails the message.
#[derive(Debug, Default)]
pub struct ProcessOutcome {
    /// Sizes whose variant was stored and indexed
    pub indexed: Vec<SizeLabel>,
    /// Sizes skipped because the original is not strictly larger
    pub skipped: Vec<SizeLabel>,
    /// Sizes whose store or index step failed
    pub failed: Vec<(SizeLabel, AppError)>,
}

impl ProcessOutcome {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Orchestrates blob store, resize pipeline and size index per message
pub struct PhotoWorker {
    blobs: Arc<dyn BlobStore>,
    index: Arc<dyn SizeIndex>,
    pipeline: Arc<ResizePipeline>,
    scratch_dir: PathBuf,
}

impl PhotoWorker {
    pub fn new(
        blobs: Arc<dyn BlobStore>,
        index: Arc<dyn SizeIndex>,
        pipeline: Arc<ResizePipeline>,
        scratch_dir: PathBuf,
    ) -> Self {
        Self {
            blobs,
            index,
            pipeline,
            scratch_dir,
        }
    }

    /// Process a single photo id end to end.
    ///
    /// Errors returned here are fatal for the message: missing original,
    /// undecodable bytes, or a failed `orig` step. Per-size failures on
    /// the target sizes are collected in the outcome instead.
    pub async fn process_photo(&self, photo_id: &str) -> Result<ProcessOutcome> {
        // Fetching
        let (original, blob_metadata) = self.blobs.get(photo_id).await?;
        debug!(
            photo_id = %photo_id,
            bytes = original.len(),
            content_type = %blob_metadata.content_type,
            "Fetched original"
        );

        // Decoding + Resizing, off the async runtime
        let derivatives = self.pipeline.clone().derive_async(original).await?;

        let mut outcome = ProcessOutcome::default();
        let mut derivatives = derivatives.into_iter();

        // orig first: its result gates the whole message
        let orig = derivatives
            .next()
            .ok_or_else(|| AppError::Internal("pipeline emitted no orig entry".to_string()))?;

        let orig_variant_id = match orig.data {
            // Source is already JPEG: the index points back at the
            // original blob, no new blob is written.
            None => photo_id.to_string(),
            Some(data) => self
                .store_variant(photo_id, SizeLabel::Orig, data)
                .await
                .map_err(|e| AppError::BlobWriteFailure {
                    size: SizeLabel::Orig,
                    message: e.to_string(),
                })?,
        };

        let matched = self
            .index
            .set_variant(photo_id, SizeLabel::Orig, &orig_variant_id)
            .await
            .map_err(|e| {
                metrics::INDEX_UPDATE_FAILURES.inc();
                e
            })?;
        if !matched {
            // The photo record is gone out-of-band; redelivery cannot
            // bring it back, so skip the remaining sizes and ack.
            warn!(photo_id = %photo_id, "No photo record for original, skipping remaining sizes");
            metrics::INDEX_UPDATE_FAILURES.inc();
            outcome.skipped.extend(SizeLabel::TARGETS);
            return Ok(outcome);
        }
        outcome.indexed.push(SizeLabel::Orig);

        // The four target sizes are independent; run them concurrently
        let steps = derivatives.map(|d| self.process_size(photo_id, d));
        for (label, result) in futures::future::join_all(steps).await {
            match result {
                Ok(Some(variant_id)) => {
                    debug!(photo_id = %photo_id, size = %label, variant_id = %variant_id, "Variant indexed");
                    outcome.indexed.push(label);
                }
                Ok(None) => outcome.skipped.push(label),
                Err(e) => {
                    warn!(photo_id = %photo_id, size = %label, error = %e, "Size step failed");
                    metrics::VARIANT_FAILURES.with_label_values(&[label.as_str()]).inc();
                    outcome.failed.push((label, e));
                }
            }
        }

        metrics::PHOTOS_PROCESSED.inc();
        info!(
            photo_id = %photo_id,
            indexed = outcome.indexed.len(),
            skipped = outcome.skipped.len(),
            failed = outcome.failed.len(),
            "Photo processed"
        );

        Ok(outcome)
    }

    /// Run one target-size step: store the variant blob, then index it.
    ///
    /// Returns `Ok(None)` for a skipped size.
    async fn process_size(
        &self,
        photo_id: &str,
        derivative: Derivative,
    ) -> (SizeLabel, Result<Option<String>>) {
        let label = derivative.label;
        let Some(data) = derivative.data else {
            debug!(photo_id = %photo_id, size = %label, "Original not larger than target, skipping");
            return (label, Ok(None));
        };

        let result = async {
            let variant_id = self
                .store_variant(photo_id, label, data)
                .await
                .map_err(|e| AppError::BlobWriteFailure {
                    size: label,
                    message: e.to_string(),
                })?;

            let matched = self
                .index
                .set_variant(photo_id, label, &variant_id)
                .await
                .map_err(|e| {
                    metrics::INDEX_UPDATE_FAILURES.inc();
                    e
                })?;
            if !matched {
                metrics::INDEX_UPDATE_FAILURES.inc();
                return Err(AppError::IndexUpdateFailure(format!(
                    "no photo record for {photo_id}, variant {variant_id} left unindexed"
                )));
            }

            Ok(Some(variant_id))
        }
        .await;

        (label, result)
    }

    /// Spool the variant to a scratch file and stream it into the blob
    /// store. The scratch file is removed whether or not the upload
    /// succeeds; cleanup failures are logged and counted, never fatal.
    async fn store_variant(&self, photo_id: &str, label: SizeLabel, data: Bytes) -> Result<String> {
        tokio::fs::create_dir_all(&self.scratch_dir).await?;

        let filename = format!("{photo_id}_{label}.jpg");
        let scratch_path = self.scratch_dir.join(&filename);

        // A failed spool write may still have created a partial file, so
        // cleanup runs on this exit path too, not just after the upload.
        let result = match tokio::fs::write(&scratch_path, &data).await {
            Ok(()) => {
                self.blobs
                    .put(
                        &scratch_path,
                        &filename,
                        BlobMetadata {
                            content_type: "image/jpeg".to_string(),
                            ..Default::default()
                        },
                    )
                    .await
            }
            Err(e) => Err(AppError::Io(e)),
        };

        match tokio::fs::remove_file(&scratch_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                let e = AppError::ScratchCleanupFailure(format!("{}: {e}", scratch_path.display()));
                warn!(error = %e, "Scratch file left behind");
                metrics::SCRATCH_CLEANUP_FAILURES.inc();
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::pipeline::PipelineConfig;
    use async_trait::async_trait;
    use image::{DynamicImage, ImageOutputFormat};
    use std::collections::HashMap;
    use std::io::Cursor;
    use std::path::Path;
    use std::sync::Mutex;
    use uuid::Uuid;

    #[derive(Default)]
    struct MemoryBlobStore {
        objects: Mutex<HashMap<String, (Bytes, BlobMetadata)>>,
    }

    impl MemoryBlobStore {
        fn seed(&self, id: &str, data: Bytes, content_type: &str) {
            self.objects.lock().unwrap().insert(
                id.to_string(),
                (
                    data,
                    BlobMetadata {
                        content_type: content_type.to_string(),
                        ..Default::default()
                    },
                ),
            );
        }

        fn len(&self) -> usize {
            self.objects.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl BlobStore for MemoryBlobStore {
        async fn put(
            &self,
            source: &Path,
            _filename: &str,
            metadata: BlobMetadata,
        ) -> Result<String> {
            let data = tokio::fs::read(source).await?;
            let id = Uuid::new_v4().to_string();
            self.objects
                .lock()
                .unwrap()
                .insert(id.clone(), (Bytes::from(data), metadata));
            Ok(id)
        }

        async fn get(&self, id: &str) -> Result<(Bytes, BlobMetadata)> {
            self.objects
                .lock()
                .unwrap()
                .get(id)
                .cloned()
                .ok_or_else(|| AppError::BlobNotFound(id.to_string()))
        }

        async fn find(&self, id: &str) -> Result<Option<BlobMetadata>> {
            Ok(self
                .objects
                .lock()
                .unwrap()
                .get(id)
                .map(|(_, m)| m.clone()))
        }
    }

    /// In-memory size index mirroring the Postgres semantics: a photo
    /// row must already exist for an update to match.
    #[derive(Default)]
    struct MemoryIndex {
        records: Mutex<HashMap<String, HashMap<String, String>>>,
    }

    impl MemoryIndex {
        fn create_photo(&self, id: &str) {
            self.records
                .lock()
                .unwrap()
                .insert(id.to_string(), HashMap::new());
        }

        fn record(&self, id: &str) -> Option<HashMap<String, String>> {
            self.records.lock().unwrap().get(id).cloned()
        }
    }

    #[async_trait]
    impl SizeIndex for MemoryIndex {
        async fn set_variant(
            &self,
            original_id: &str,
            size: SizeLabel,
            variant_id: &str,
        ) -> Result<bool> {
            let mut records = self.records.lock().unwrap();
            match records.get_mut(original_id) {
                Some(record) => {
                    record.insert(size.as_str().to_string(), variant_id.to_string());
                    Ok(true)
                }
                None => Ok(false),
            }
        }
    }

    fn encoded_image(width: u32, height: u32, format: ImageOutputFormat) -> Bytes {
        let img = DynamicImage::new_rgb8(width, height);
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), format)
            .expect("test image encodes");
        Bytes::from(buf)
    }

    /// Blob store that fails `put` for filenames containing a marker
    struct FlakyBlobStore {
        inner: MemoryBlobStore,
        fail_for: &'static str,
    }

    #[async_trait]
    impl BlobStore for FlakyBlobStore {
        async fn put(
            &self,
            source: &Path,
            filename: &str,
            metadata: BlobMetadata,
        ) -> Result<String> {
            if filename.contains(self.fail_for) {
                return Err(AppError::Internal("injected upload failure".to_string()));
            }
            self.inner.put(source, filename, metadata).await
        }

        async fn get(&self, id: &str) -> Result<(Bytes, BlobMetadata)> {
            self.inner.get(id).await
        }

        async fn find(&self, id: &str) -> Result<Option<BlobMetadata>> {
            self.inner.find(id).await
        }
    }

    /// Size index whose backing store is down
    struct FailingIndex;

    #[async_trait]
    impl SizeIndex for FailingIndex {
        async fn set_variant(
            &self,
            _original_id: &str,
            _size: SizeLabel,
            _variant_id: &str,
        ) -> Result<bool> {
            Err(AppError::IndexUpdateFailure(
                "injected index outage".to_string(),
            ))
        }
    }

    fn scratch_dir() -> std::path::PathBuf {
        std::env::temp_dir().join(format!("photo-worker-test-{}", Uuid::new_v4()))
    }

    fn scratch_files(dir: &Path) -> Vec<String> {
        match std::fs::read_dir(dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok())
                .map(|e| e.file_name().to_string_lossy().into_owned())
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    fn test_worker() -> (
        Arc<MemoryBlobStore>,
        Arc<MemoryIndex>,
        PhotoWorker,
        std::path::PathBuf,
    ) {
        let blobs = Arc::new(MemoryBlobStore::default());
        let index = Arc::new(MemoryIndex::default());
        let scratch = scratch_dir();
        let worker = PhotoWorker::new(
            blobs.clone(),
            index.clone(),
            Arc::new(ResizePipeline::new(PipelineConfig::default())),
            scratch.clone(),
        );
        (blobs, index, worker, scratch)
    }

    #[tokio::test]
    async fn test_png_original_indexes_all_five_sizes() {
        let (blobs, index, worker, _scratch) = test_worker();
        blobs.seed("photo-1", encoded_image(2000, 1500, ImageOutputFormat::Png), "image/png");
        index.create_photo("photo-1");

        let outcome = worker.process_photo("photo-1").await.expect("processes");

        assert!(outcome.is_clean());
        assert_eq!(outcome.indexed.len(), 5);
        let record = index.record("photo-1").expect("record exists");
        for label in SizeLabel::ALL {
            assert!(record.contains_key(label.as_str()), "missing {label}");
        }
        // PNG orig is re-encoded into a fresh blob
        assert_ne!(record["orig"], "photo-1");
        // original + five variants
        assert_eq!(blobs.len(), 6);
    }

    #[tokio::test]
    async fn test_jpeg_original_reuses_its_own_id() {
        let (blobs, index, worker, _scratch) = test_worker();
        blobs.seed(
            "photo-2",
            encoded_image(2000, 1500, ImageOutputFormat::Jpeg(90)),
            "image/jpeg",
        );
        index.create_photo("photo-2");

        let outcome = worker.process_photo("photo-2").await.expect("processes");

        assert!(outcome.is_clean());
        let record = index.record("photo-2").expect("record exists");
        assert_eq!(record["orig"], "photo-2");
        // original + four size variants, no new orig blob
        assert_eq!(blobs.len(), 5);
    }

    #[tokio::test]
    async fn test_small_original_sets_only_orig() {
        let (blobs, index, worker, _scratch) = test_worker();
        blobs.seed("photo-3", encoded_image(100, 100, ImageOutputFormat::Png), "image/png");
        index.create_photo("photo-3");

        let outcome = worker.process_photo("photo-3").await.expect("processes");

        assert_eq!(outcome.skipped.len(), 4);
        let record = index.record("photo-3").expect("record exists");
        assert_eq!(record.len(), 1);
        assert!(record.contains_key("orig"));
    }

    #[tokio::test]
    async fn test_missing_original_is_fatal_and_mutates_nothing() {
        let (_blobs, index, worker, _scratch) = test_worker();
        index.create_photo("photo-4");

        let err = worker
            .process_photo("no-such-id")
            .await
            .expect_err("missing blob is fatal");

        assert!(matches!(err, AppError::BlobNotFound(_)));
        assert!(index.record("photo-4").expect("record exists").is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_original_is_fatal_and_writes_no_blobs() {
        let (blobs, index, worker, _scratch) = test_worker();
        blobs.seed("photo-5", Bytes::from_static(b"garbage bytes"), "image/png");
        index.create_photo("photo-5");

        let err = worker
            .process_photo("photo-5")
            .await
            .expect_err("corrupt bytes are fatal");

        assert!(matches!(err, AppError::DecodeFailure(_)));
        assert_eq!(blobs.len(), 1, "no variant blobs written");
        assert!(index.record("photo-5").expect("record exists").is_empty());
    }

    #[tokio::test]
    async fn test_missing_photo_record_short_circuits() {
        let (blobs, index, worker, _scratch) = test_worker();
        blobs.seed("photo-6", encoded_image(2000, 1500, ImageOutputFormat::Png), "image/png");
        // no index.create_photo: the record was deleted out-of-band

        let outcome = worker.process_photo("photo-6").await.expect("acks anyway");

        assert!(outcome.indexed.is_empty());
        assert_eq!(outcome.skipped.len(), 4);
        // only the orig re-encode was written before short-circuiting
        assert_eq!(blobs.len(), 2);
    }

    #[tokio::test]
    async fn test_set_variant_is_idempotent() {
        let index = MemoryIndex::default();
        index.create_photo("photo-7");

        index
            .set_variant("photo-7", SizeLabel::S256, "variant-a")
            .await
            .expect("first update");
        let first = index.record("photo-7");
        index
            .set_variant("photo-7", SizeLabel::S256, "variant-a")
            .await
            .expect("second update");

        assert_eq!(first, index.record("photo-7"));
    }

    #[tokio::test]
    async fn test_redelivery_converges_to_single_run_state() {
        let (blobs, index, worker, _scratch) = test_worker();
        blobs.seed("photo-8", encoded_image(2000, 1500, ImageOutputFormat::Png), "image/png");
        index.create_photo("photo-8");

        // First attempt completes but the broker never sees the ack;
        // the message is redelivered and the whole pipeline reruns.
        worker.process_photo("photo-8").await.expect("first run");
        let outcome = worker.process_photo("photo-8").await.expect("redelivery");

        assert!(outcome.is_clean());
        let record = index.record("photo-8").expect("record exists");
        // Equivalent to a single successful run: every label set, each
        // pointing at a stored blob (orphans may exist in the store).
        assert_eq!(record.len(), 5);
        for variant_id in record.values() {
            assert!(
                blobs.find(variant_id).await.expect("lookup").is_some(),
                "indexed variant {variant_id} exists"
            );
        }
    }

    #[tokio::test]
    async fn test_failed_size_step_aborts_only_that_size() {
        let blobs = Arc::new(FlakyBlobStore {
            inner: MemoryBlobStore::default(),
            fail_for: "_640",
        });
        let index = Arc::new(MemoryIndex::default());
        let scratch = scratch_dir();
        let worker = PhotoWorker::new(
            blobs.clone(),
            index.clone(),
            Arc::new(ResizePipeline::with_defaults()),
            scratch.clone(),
        );
        blobs
            .inner
            .seed("photo-9", encoded_image(2000, 1500, ImageOutputFormat::Png), "image/png");
        index.create_photo("photo-9");

        let outcome = worker.process_photo("photo-9").await.expect("message still acks");

        assert_eq!(outcome.failed.len(), 1);
        assert!(matches!(
            &outcome.failed[0],
            (SizeLabel::S640, AppError::BlobWriteFailure { .. })
        ));
        let record = index.record("photo-9").expect("record exists");
        assert!(!record.contains_key("640"));
        for label in ["orig", "1024", "256", "128"] {
            assert!(record.contains_key(label), "missing {label}");
        }
        assert!(scratch_files(&scratch).is_empty(), "scratch dir drained");
    }

    #[tokio::test]
    async fn test_scratch_dir_empty_after_successful_run() {
        let (blobs, index, worker, scratch) = test_worker();
        blobs.seed("photo-10", encoded_image(2000, 1500, ImageOutputFormat::Png), "image/png");
        index.create_photo("photo-10");

        worker.process_photo("photo-10").await.expect("processes");

        assert!(scratch_files(&scratch).is_empty(), "scratch dir drained");
    }

    #[tokio::test]
    async fn test_failed_spool_write_still_attempts_cleanup() {
        let (blobs, index, worker, scratch) = test_worker();
        blobs.seed(
            "photo-11",
            encoded_image(2000, 1500, ImageOutputFormat::Jpeg(90)),
            "image/jpeg",
        );
        index.create_photo("photo-11");
        // A directory squatting on the spool path makes the write fail
        // after the path exists, exercising the failure exit path.
        std::fs::create_dir_all(scratch.join("photo-11_128.jpg")).expect("plant blocker");
        let cleanups_before = metrics::SCRATCH_CLEANUP_FAILURES.get();

        let outcome = worker.process_photo("photo-11").await.expect("message still acks");

        assert_eq!(outcome.failed.len(), 1);
        assert!(matches!(
            &outcome.failed[0],
            (SizeLabel::S128, AppError::BlobWriteFailure { .. })
        ));
        let record = index.record("photo-11").expect("record exists");
        for label in ["orig", "1024", "640", "256"] {
            assert!(record.contains_key(label), "missing {label}");
        }
        // Cleanup ran on the failed step and its failure was counted
        assert!(metrics::SCRATCH_CLEANUP_FAILURES.get() > cleanups_before);
    }

    #[tokio::test]
    async fn test_orig_index_error_is_fatal_and_counted() {
        let blobs = Arc::new(MemoryBlobStore::default());
        blobs.seed(
            "photo-12",
            encoded_image(2000, 1500, ImageOutputFormat::Jpeg(90)),
            "image/jpeg",
        );
        let worker = PhotoWorker::new(
            blobs.clone(),
            Arc::new(FailingIndex),
            Arc::new(ResizePipeline::with_defaults()),
            scratch_dir(),
        );
        let failures_before = metrics::INDEX_UPDATE_FAILURES.get();

        let err = worker
            .process_photo("photo-12")
            .await
            .expect_err("orig index failure is fatal");

        assert!(matches!(err, AppError::IndexUpdateFailure(_)));
        assert!(metrics::INDEX_UPDATE_FAILURES.get() > failures_before);
    }
}
