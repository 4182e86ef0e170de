//! Data model shared across the pipeline

use serde::{Deserialize, Serialize};
use std::fmt;

/// Size label for a photo variant.
///
/// Closed enumeration: the read-side service keys its responses by the
/// exact same five labels, so the wire strings here must never change.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SizeLabel {
    #[serde(rename = "orig")]
    Orig,
    #[serde(rename = "1024")]
    S1024,
    #[serde(rename = "640")]
    S640,
    #[serde(rename = "256")]
    S256,
    #[serde(rename = "128")]
    S128,
}

impl SizeLabel {
    /// All labels in pipeline evaluation order
    pub const ALL: [SizeLabel; 5] = [
        SizeLabel::Orig,
        SizeLabel::S1024,
        SizeLabel::S640,
        SizeLabel::S256,
        SizeLabel::S128,
    ];

    /// Resize targets, descending; each evaluated independently of the
    /// others against the original dimensions.
    pub const TARGETS: [SizeLabel; 4] = [
        SizeLabel::S1024,
        SizeLabel::S640,
        SizeLabel::S256,
        SizeLabel::S128,
    ];

    /// The label as stored in the size index
    pub fn as_str(&self) -> &'static str {
        match self {
            SizeLabel::Orig => "orig",
            SizeLabel::S1024 => "1024",
            SizeLabel::S640 => "640",
            SizeLabel::S256 => "256",
            SizeLabel::S128 => "128",
        }
    }

    /// Target edge length in pixels; `None` for `orig`
    pub fn pixels(&self) -> Option<u32> {
        match self {
            SizeLabel::Orig => None,
            SizeLabel::S1024 => Some(1024),
            SizeLabel::S640 => Some(640),
            SizeLabel::S256 => Some(256),
            SizeLabel::S128 => Some(128),
        }
    }
}

impl fmt::Display for SizeLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
