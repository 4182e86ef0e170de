//! Database layer - size index persistence

pub mod size_index;

pub use size_index::{PgSizeIndex, SizeIndex};
