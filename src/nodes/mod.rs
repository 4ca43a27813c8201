//! Node-based signal processing system
//!
//! This module provides the concrete nodes of the decode pipeline:
//! - **TraceSource**: streams clock/data samples from a captured or
//!   synthesized trace
//! - **Decoders**: the PS/2 frame decoder
//!
//! All connected via crossbeam channels under the thread-per-node scheduler.

pub mod decoders;
mod trace;

// Export the trace source and related types
pub use trace::{Trace, TraceBuilder, TraceSource};

// Re-export Sample from runtime
pub use crate::runtime::Sample;
