//! Streaming PS/2 keyboard/mouse protocol decoder
//!
//! This library decodes the PS/2 serial protocol from two captured digital
//! signal traces (a clock line and a data line) into a stream of framing
//! annotations: individual bits, start/parity/stop/acknowledge markers,
//! inhibit (host-hold) periods, and fully assembled 8-bit words tagged with
//! their direction.
//!
//! # Architecture
//!
//! - **TraceSource**: streams run-length encoded clock/data samples from a
//!   captured or synthesized [`Trace`]
//! - **Streaming Nodes**: thread-per-node execution with crossbeam channels
//! - **Scheduler**: manages node lifecycle and parallel execution
//! - **Ps2Decoder**: the edge-driven frame decoder node
//!
//! # Example
//!
//! ```no_run
//! use ps2dec::{Pipeline, Ps2Decoder, TraceBuilder, TraceSource};
//!
//! let mut trace = TraceBuilder::new(1_000_000.0)?;
//! trace.idle_us(100.0);
//! trace.device_frame(0x5a);
//! let mut pipeline = Pipeline::new();
//! pipeline.add_process("source", TraceSource::new(trace.finish())?)?;
//! pipeline.add_process("ps2", Ps2Decoder::new(1_000_000.0)?)?;
//! // ... connect nodes and run
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use thiserror::Error;

pub mod nodes;
pub mod runtime;

// Re-export decoder data types
pub use nodes::decoders::{
    ANNOTATION_ROWS, Annotation, AnnotationClass, AnnotationRow, Direction, Ps2Word,
};

// Re-export data types from runtime
pub use runtime::Sample;

// Re-export streaming nodes
pub use nodes::{Trace, TraceBuilder, TraceSource};

// Re-export streaming decoders
pub use nodes::decoders::Ps2Decoder;

// Re-export streaming runtime components
pub use runtime::{
    ConnectionError, InputPort, OutputPort, Pipeline, PortDirection, PortSchema, ProcessNode,
    Scheduler, WorkError, WorkResult, register_type,
};

#[derive(Error, Debug)]
pub enum Ps2Error {
    #[error("sample rate must be a positive number of samples per second, got {0}")]
    InvalidSampleRate(f64),

    #[error("trace channel '{0}' has no samples")]
    EmptyTrace(&'static str),
}

pub type Result<T> = std::result::Result<T, Ps2Error>;
