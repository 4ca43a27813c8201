//! Protocol decoder nodes
//!
//! Decoders for live data processing using the channel-based architecture.

pub mod ps2;
pub mod types;

// Re-export common types
pub use types::{ANNOTATION_ROWS, Annotation, AnnotationClass, AnnotationRow, Direction, Ps2Word};

// Re-export decoders
pub use ps2::Ps2Decoder;
