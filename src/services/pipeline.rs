//! Resize pipeline - derives the fixed set of size variants from an original
//!
//! Pure transformation: original bytes in, an ordered sequence of
//! `(label, Option<bytes>)` pairs out. Every emitted variant is a
//! grayscale JPEG at reduced quality. Decode, resize and encode are
//! CPU-bound and run on the blocking thread pool via `derive_async`.

use crate::error::{AppError, Result};
use crate::models::SizeLabel;
use bytes::Bytes;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat, ImageOutputFormat};
use std::io::Cursor;
use std::sync::Arc;
use tracing::debug;

/// Pipeline configuration
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// JPEG quality (0-100) for every emitted variant
    pub quality: u8,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self { quality: 60 }
    }
}

/// One pipeline output: `data` is `None` when the size step is skipped.
///
/// For `orig`, `None` means the source is already a JPEG and the
/// original blob id should be reused directly. For a target size, `None`
/// means the original is not strictly larger than the target and no
/// variant is produced (never upscale).
#[derive(Debug)]
pub struct Derivative {
    pub label: SizeLabel,
    pub data: Option<Bytes>,
}

/// Derives grayscale JPEG variants from an original photo
pub struct ResizePipeline {
    config: PipelineConfig,
}

impl ResizePipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(PipelineConfig::default())
    }

    /// Compute all five derivatives (blocking version)
    ///
    /// **Note:** CPU-intensive; call `derive_async` from async code.
    ///
    /// The declared content type is advisory only; the source format is
    /// sniffed from the bytes themselves. Undecodable bytes are fatal
    /// for the message and surface as [`AppError::DecodeFailure`].
    pub fn derive(&self, original: &[u8]) -> Result<Vec<Derivative>> {
        let format = image::guess_format(original)
            .map_err(|e| AppError::DecodeFailure(format!("unrecognized image format: {e}")))?;
        let img = image::load_from_memory_with_format(original, format)
            .map_err(|e| AppError::DecodeFailure(e.to_string()))?;

        let (width, height) = img.dimensions();
        debug!(width, height, format = ?format, "Decoded original");

        let mut derivatives = Vec::with_capacity(SizeLabel::ALL.len());

        // orig: a JPEG source is reused as-is, anything else is
        // re-encoded at full resolution
        let orig = if format == ImageFormat::Jpeg {
            None
        } else {
            Some(self.encode_jpeg(&img.grayscale())?)
        };
        derivatives.push(Derivative {
            label: SizeLabel::Orig,
            data: orig,
        });

        // Each target is computed from the original independently, and
        // skipped unless both dimensions strictly exceed it.
        for label in SizeLabel::TARGETS {
            let data = match label.pixels() {
                Some(target) if width > target && height > target => {
                    let resized = img.resize_exact(target, target, FilterType::Triangle);
                    Some(self.encode_jpeg(&resized.grayscale())?)
                }
                _ => None,
            };
            derivatives.push(Derivative { label, data });
        }

        Ok(derivatives)
    }

    /// Compute all derivatives on the blocking thread pool
    pub async fn derive_async(self: Arc<Self>, original: Bytes) -> Result<Vec<Derivative>> {
        let pipeline = self.clone();

        tokio::task::spawn_blocking(move || pipeline.derive(&original))
            .await
            .map_err(|e| AppError::Internal(format!("Resize task panicked: {e}")))?
    }

    fn encode_jpeg(&self, img: &DynamicImage) -> Result<Bytes> {
        let mut buf = Vec::new();
        let mut cursor = Cursor::new(&mut buf);

        img.write_to(&mut cursor, ImageOutputFormat::Jpeg(self.config.quality))
            .map_err(|e| AppError::Internal(format!("Failed to encode JPEG: {e}")))?;

        Ok(Bytes::from(buf))
    }
}
