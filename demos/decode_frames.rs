//! Example: decode synthesized PS/2 frames
//!
//! Puts a few bytes on a synthesized PS/2 bus, runs the decode pipeline and
//! prints the decoded fields and words.
//!
//! Usage:
//!   cargo run --release --example decode_frames -- --bytes 1c,f0,5a
//!
//! Host-to-device exchanges instead:
//!   cargo run --release --example decode_frames -- --bytes ed,f4 --host
//!
//! With the raw bit row:
//!   cargo run --release --example decode_frames -- --bytes 5a --show-bits

use clap::Parser;
use ps2dec::runtime::{InputPort, OutputPort, Pipeline, ProcessNode, WorkError, WorkResult};
use ps2dec::{Annotation, PortDirection, PortSchema, Ps2Decoder, Ps2Word, TraceBuilder, TraceSource};
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Comma-separated hex bytes to put on the wire
    #[arg(short, long, default_value = "1c,f0,5a")]
    bytes: String,

    /// Transmit the bytes host-to-device instead of device-to-host
    #[arg(long)]
    host: bool,

    /// Capture rate in samples per second
    #[arg(short, long, default_value = "1000000")]
    rate: f64,

    /// Also print the raw bit row
    #[arg(long)]
    show_bits: bool,
}

/// Sink that prints annotations from one decoder row
struct AnnotationPrinter {
    name: String,
    row: &'static str,
    rate: f64,
}

impl AnnotationPrinter {
    fn new(row: &'static str, rate: f64) -> Self {
        Self {
            name: format!("{}_printer", row),
            row,
            rate,
        }
    }

    fn us(&self, position: u64) -> f64 {
        position as f64 * 1_000_000.0 / self.rate
    }
}

impl ProcessNode for AnnotationPrinter {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn num_outputs(&self) -> usize {
        0
    }

    fn input_schema(&self) -> Vec<PortSchema> {
        vec![PortSchema::new::<Annotation>("annotations", 0, PortDirection::Input)]
    }

    fn work(&mut self, inputs: &[InputPort], _outputs: &[OutputPort]) -> WorkResult<usize> {
        let mut buffer = std::collections::VecDeque::new();
        let mut input = inputs
            .first()
            .and_then(|port| port.get::<Annotation>(&mut buffer))
            .ok_or_else(|| WorkError::NodeError("Missing input channel".to_string()))?;

        let ann = input.recv()?;
        info!(
            "{:>10.1}us ..{:>10.1}us  {:<7} {}",
            self.us(ann.start),
            self.us(ann.end),
            self.row,
            ann.label()
        );
        Ok(1)
    }
}

/// Sink that prints decoded words
struct WordPrinter {
    rate: f64,
    count: usize,
}

impl ProcessNode for WordPrinter {
    fn name(&self) -> &str {
        "word_printer"
    }

    fn num_inputs(&self) -> usize {
        1
    }

    fn num_outputs(&self) -> usize {
        0
    }

    fn input_schema(&self) -> Vec<PortSchema> {
        vec![PortSchema::new::<Ps2Word>("words", 0, PortDirection::Input)]
    }

    fn work(&mut self, inputs: &[InputPort], _outputs: &[OutputPort]) -> WorkResult<usize> {
        let mut buffer = std::collections::VecDeque::new();
        let mut input = inputs
            .first()
            .and_then(|port| port.get::<Ps2Word>(&mut buffer))
            .ok_or_else(|| WorkError::NodeError("Missing input channel".to_string()))?;

        let word = input.recv()?;
        self.count += 1;
        info!(
            "Word #{}: {} 0x{:02x} (parity {}) at {:.1}us",
            self.count,
            word.direction,
            word.value,
            if word.parity_ok { "ok" } else { "BAD" },
            word.start as f64 * 1_000_000.0 / self.rate
        );
        Ok(1)
    }
}

fn parse_bytes(list: &str) -> Result<Vec<u8>, String> {
    list.split(',')
        .map(|s| {
            let s = s.trim().trim_start_matches("0x");
            u8::from_str_radix(s, 16).map_err(|e| format!("bad byte '{}': {}", s, e))
        })
        .collect()
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let bytes = parse_bytes(&args.bytes)?;

    info!("=== PS/2 Decode Example ===");
    info!(
        "Synthesizing {} {} frame(s) at {} samples/s",
        bytes.len(),
        if args.host { "host-to-device" } else { "device-to-host" },
        args.rate
    );

    // Render the bytes onto a synthetic bus capture
    let mut builder = TraceBuilder::new(args.rate)?;
    builder.idle_us(100.0);
    for byte in &bytes {
        if args.host {
            builder.host_frame(*byte);
        } else {
            builder.device_frame(*byte);
        }
        builder.idle_us(80.0);
    }
    let trace = builder.finish();

    let mut pipeline = Pipeline::new().with_default_buffer_size(10_000);
    pipeline.add_process("source", TraceSource::new(trace)?.with_name("bus_capture"))?;
    pipeline.add_process("ps2", Ps2Decoder::new(args.rate)?)?;
    pipeline.add_process("fields_printer", AnnotationPrinter::new("fields", args.rate))?;
    pipeline.add_process("word_printer", WordPrinter { rate: args.rate, count: 0 })?;

    pipeline.connect("source", "clk", "ps2", "clk")?;
    pipeline.connect("source", "data", "ps2", "data")?;
    pipeline.connect("ps2", "fields", "fields_printer", "annotations")?;
    pipeline.connect("ps2", "words", "word_printer", "words")?;

    // The bit row stays unconnected unless requested
    if args.show_bits {
        pipeline.add_process("bits_printer", AnnotationPrinter::new("bits", args.rate))?;
        pipeline.connect("ps2", "bits", "bits_printer", "annotations")?;
    }

    info!("Building pipeline...");
    let scheduler = pipeline.build()?;

    info!("Running...");
    scheduler.wait();

    info!("Done!");

    Ok(())
}
