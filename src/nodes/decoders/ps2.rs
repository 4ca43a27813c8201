//! PS/2 frame decoder — edge-by-edge sequential design
//!
//! Processes the clock/data lines one edge at a time using [`Receiver`],
//! which provides peek/putback semantics over a crossbeam channel.
//!
//! Flow per edge:
//!   1. Advance to the next clock edge; data-only movement on the way is
//!      absorbed into the interval and flags it as an unexpected transition
//!   2. Classify the interval by its length: bus idle (>50 µs clock high)
//!      resets the frame, a host hold (>55 µs clock low) marks an inhibit
//!   3. Drop intervals whose clock level is out of step with the hold state
//!   4. Annotate the raw bit, then dispatch on the frame position
//!      (start, data 1-8, parity, stop, acknowledge)
//!   5. At the parity position, emit the assembled word with its direction
//!
//! Because each interval is classified with the levels held *before* the
//! terminating clock edge, the decoder reads device traffic on the low half
//! of the clock and host traffic on the high half, which is where each side
//! keeps its data stable.

use super::types::{ANNOTATION_ROWS, Annotation, AnnotationClass, AnnotationRow, Direction, Ps2Word};
use crate::runtime::node::{InputPort, OutputPort, ProcessNode, WorkError, WorkResult};
use crate::runtime::sample::Sample;
use crate::{Ps2Error, Result};
use std::collections::VecDeque;
use tracing::{debug, trace};

/// A gap longer than this with the clock high means the bus went idle
const IDLE_GAP_US: f64 = 50.0;
/// A gap longer than this with the clock low means the host is holding it
const INHIBIT_GAP_US: f64 = 55.0;

/// Upper bound on edges handled per work() call
const MAX_EDGES_PER_CALL: usize = 256;

/// One interval between successive line events, ending at a clock edge
#[derive(Debug, Clone, Copy)]
struct Edge {
    /// Data level held over the interval
    data: bool,
    /// Clock level held over the interval
    clk: bool,
    /// First sample of the interval
    ss: u64,
    /// Sample at which the terminating clock edge fired
    es: u64,
    /// Interval length in microseconds
    gap_us: f64,
    /// The data line moved with no accompanying clock edge
    transition: bool,
}

/// Position within the 11/12-bit frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FramePos {
    Start,
    Data(u8),
    Parity,
    Stop,
    Ack,
    /// Past the acknowledge bit; only raw bit annotations are produced
    /// until an idle or inhibit gap starts a new frame
    Overrun,
}

impl FramePos {
    fn advance(self) -> FramePos {
        match self {
            FramePos::Start => FramePos::Data(1),
            FramePos::Data(8) => FramePos::Parity,
            FramePos::Data(n) => FramePos::Data(n + 1),
            FramePos::Parity => FramePos::Stop,
            FramePos::Stop => FramePos::Ack,
            FramePos::Ack | FramePos::Overrun => FramePos::Overrun,
        }
    }
}

/// The frame state machine, fed one classified interval at a time
#[derive(Debug)]
struct FrameState {
    samplerate: f64,
    pos: FramePos,
    word: u8,
    parity: bool,
    wordstart: u64,
    inhibited: bool,
}

impl FrameState {
    fn new(samplerate: f64) -> Self {
        Self {
            samplerate,
            pos: FramePos::Start,
            word: 0,
            parity: false,
            wordstart: 0,
            inhibited: false,
        }
    }

    fn reset(&mut self) {
        *self = Self::new(self.samplerate);
    }

    /// Classify one interval, pushing annotations and possibly returning a
    /// completed word
    fn handle_edge(&mut self, edge: Edge, out: &mut Vec<Annotation>) -> Option<Ps2Word> {
        if edge.gap_us > IDLE_GAP_US && edge.clk {
            self.inhibited = false;
            self.pos = FramePos::Start;
            return None;
        }

        if edge.gap_us > INHIBIT_GAP_US && !edge.clk {
            debug!("host hold of {:.1}us at {}", edge.gap_us, edge.ss);
            self.inhibited = true;
            self.pos = FramePos::Start;
            out.push(Annotation::new(
                AnnotationClass::Inhibit,
                edge.ss,
                edge.es,
                ["Inhibit"],
            ));
            return None;
        }

        // Clock level out of step with the hold state: the device keeps data
        // stable on the other half of the clock, nothing to frame here
        if self.inhibited != edge.clk {
            return None;
        }

        if edge.transition {
            out.push(Annotation::new(
                AnnotationClass::Error,
                edge.ss,
                edge.es,
                ["Unexpected Transition", "UT"],
            ));
        }

        out.push(Annotation::new(
            AnnotationClass::Bit,
            edge.ss,
            edge.es,
            [if edge.data { "1" } else { "0" }],
        ));

        let mut completed = None;
        match self.pos {
            FramePos::Start => {
                if edge.data {
                    out.push(Annotation::new(
                        AnnotationClass::Error,
                        edge.ss,
                        edge.es,
                        ["Start bit error", "SB-E"],
                    ));
                } else {
                    out.push(Annotation::new(
                        AnnotationClass::StartBit,
                        edge.ss,
                        edge.es,
                        ["Start bit", "Start", "S"],
                    ));
                }
                self.word = 0;
                self.parity = false;
                self.wordstart = edge.es;
            }
            FramePos::Data(n) => {
                if edge.data {
                    self.word |= 1 << (n - 1);
                }
                self.parity ^= edge.data;
            }
            FramePos::Parity => {
                let direction = if self.inhibited {
                    Direction::Host
                } else {
                    Direction::Device
                };
                out.push(Annotation::new(
                    AnnotationClass::Word,
                    self.wordstart,
                    edge.ss,
                    [
                        format!("{} Data: {:02x}", direction, self.word),
                        format!("{}D: {:02x}", direction.letter(), self.word),
                        format!("{:02x}", self.word),
                    ],
                ));
                // Odd parity: a valid parity bit is the complement of the
                // running XOR over the data bits, so inequality means the
                // frame checks out
                let parity_ok = self.parity != edge.data;
                if parity_ok {
                    out.push(Annotation::new(
                        AnnotationClass::ParityOk,
                        edge.ss,
                        edge.es,
                        ["Parity OK", "Par OK", "P"],
                    ));
                } else {
                    out.push(Annotation::new(
                        AnnotationClass::Error,
                        edge.ss,
                        edge.es,
                        ["Parity error", "Par ERR", "PE"],
                    ));
                }
                completed = Some(Ps2Word {
                    value: self.word,
                    direction,
                    parity_ok,
                    start: self.wordstart,
                    end: edge.ss,
                });
            }
            FramePos::Stop => {
                if edge.data {
                    out.push(Annotation::new(
                        AnnotationClass::StopBit,
                        edge.ss,
                        edge.es,
                        ["Stop bit", "Stop", "SB", "S"],
                    ));
                } else {
                    out.push(Annotation::new(
                        AnnotationClass::Error,
                        edge.ss,
                        edge.es,
                        ["Stop bit error", "SB-ERR"],
                    ));
                }
                // End of a framed exchange resets the host-hold assumption
                // even if no new idle gap was seen
                self.inhibited = false;
            }
            FramePos::Ack => {
                if edge.data {
                    out.push(Annotation::new(
                        AnnotationClass::Error,
                        edge.ss,
                        edge.es,
                        ["Device Acknowledge Error", "Ack Err", "A-E"],
                    ));
                } else {
                    out.push(Annotation::new(
                        AnnotationClass::Ack,
                        edge.ss,
                        edge.es,
                        ["Device Acknowledge", "D ACK", "A"],
                    ));
                }
            }
            FramePos::Overrun => {}
        }

        self.pos = self.pos.advance();
        completed
    }
}

/// Line levels established at the most recently processed event
#[derive(Debug, Clone, Copy)]
struct LineState {
    clk: bool,
    data: bool,
    position: u64,
}

/// PS/2 frame decoder node
///
/// Inputs: clk, data — Sample channels
/// Outputs: one Annotation channel per row (bits, fields) plus Ps2Word events
pub struct Ps2Decoder {
    name: String,
    rows: &'static [AnnotationRow],
    frame: FrameState,

    /// Per-channel putback buffers, persisted across work() calls.
    /// Indexed by CLK=0, DATA=1.
    channel_buffers: Vec<VecDeque<Sample>>,

    /// Levels at the last processed event; None until the first samples of
    /// both channels established them.
    line: Option<LineState>,

    /// Word counter for logging.
    words_decoded: u64,
}

impl Ps2Decoder {
    /// Create a decoder for a capture at the given rate (samples per second)
    ///
    /// The rate is required up front: idle and inhibit classification depend
    /// on converting inter-edge sample deltas to microseconds.
    pub fn new(samplerate: f64) -> Result<Self> {
        if !samplerate.is_finite() || samplerate <= 0.0 {
            return Err(Ps2Error::InvalidSampleRate(samplerate));
        }
        Ok(Self {
            name: "ps2_decoder".to_string(),
            rows: ANNOTATION_ROWS,
            frame: FrameState::new(samplerate),
            channel_buffers: (0..2).map(|_| VecDeque::new()).collect(),
            line: None,
            words_decoded: 0,
        })
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// The row configuration annotations are routed by
    pub fn rows(&self) -> &'static [AnnotationRow] {
        self.rows
    }

    /// Reinitialize the decode session
    ///
    /// A reset decoder produces an identical annotation stream when fed an
    /// identical sample stream.
    pub fn reset(&mut self) {
        self.frame.reset();
        for buf in &mut self.channel_buffers {
            buf.clear();
        }
        self.line = None;
        self.words_decoded = 0;
    }
}

impl ProcessNode for Ps2Decoder {
    fn name(&self) -> &str {
        &self.name
    }

    fn num_inputs(&self) -> usize {
        2
    }

    fn num_outputs(&self) -> usize {
        self.rows.len() + 1
    }

    fn input_schema(&self) -> Vec<crate::runtime::ports::PortSchema> {
        use crate::runtime::ports::{PortDirection, PortSchema};
        vec![
            PortSchema::new::<Sample>("clk", 0, PortDirection::Input),
            PortSchema::new::<Sample>("data", 1, PortDirection::Input),
        ]
    }

    fn output_schema(&self) -> Vec<crate::runtime::ports::PortSchema> {
        use crate::runtime::ports::{PortDirection, PortSchema};
        let mut schemas: Vec<PortSchema> = self
            .rows
            .iter()
            .enumerate()
            .map(|(i, row)| PortSchema::new::<Annotation>(row.id, i, PortDirection::Output))
            .collect();
        schemas.push(PortSchema::new::<Ps2Word>(
            "words",
            self.rows.len(),
            PortDirection::Output,
        ));
        schemas
    }

    fn work(&mut self, inputs: &[InputPort], outputs: &[OutputPort]) -> WorkResult<usize> {
        let samplerate = self.frame.samplerate;
        let rows = self.rows;

        // ── Receivers per input channel with automatic watchdog ─────────
        let mut buf_iter = self.channel_buffers.iter_mut();
        let mut clk = inputs
            .first()
            .and_then(|p| p.get::<Sample>(buf_iter.next().unwrap()))
            .ok_or_else(|| WorkError::NodeError("Missing clk input".into()))?;
        let mut data = inputs
            .get(1)
            .and_then(|p| p.get::<Sample>(buf_iter.next().unwrap()))
            .ok_or_else(|| WorkError::NodeError("Missing data input".into()))?;

        // Unconnected outputs are tolerated; their annotations are dropped
        let row_outs: Vec<_> = (0..rows.len())
            .map(|i| outputs.get(i).and_then(|p| p.get::<Annotation>()))
            .collect();
        let words_out = outputs.get(rows.len()).and_then(|p| p.get::<Ps2Word>());

        // ── Establish initial line levels from the first samples ────────
        if self.line.is_none() {
            let c0 = clk.recv()?;
            let d0 = data.recv()?;
            self.line = Some(LineState {
                clk: c0.value,
                data: d0.value,
                position: c0.position.max(d0.position),
            });
            debug!(
                "[{}] initial levels clk={} data={} at {}",
                self.name, c0.value, d0.value, self.line.unwrap().position
            );
        }
        let mut line = self.line.unwrap();

        let mut produced = 0usize;
        let mut anns: Vec<Annotation> = Vec::with_capacity(4);
        let mut status: WorkResult<()> = Ok(());

        'edges: for _ in 0..MAX_EDGES_PER_CALL {
            // Advance to the next clock edge. Data-only movement on the way
            // is absorbed into the interval and flags it as a transition;
            // once the clock channel ends the session is over, while an
            // ended data channel just holds its last level forever.
            let mut transition = false;
            let mut next_data = line.data;
            let (es, next_clk) = loop {
                let cn = match clk.peek() {
                    Ok(s) => *s,
                    Err(e) => {
                        status = Err(e);
                        break 'edges;
                    }
                };
                match data.peek() {
                    Ok(dn) if dn.position < cn.position => {
                        next_data = dn.value;
                        transition = true;
                        data.recv()?;
                    }
                    Ok(dn) if dn.position == cn.position => {
                        next_data = dn.value;
                        data.recv()?;
                        clk.recv()?;
                        break (cn.position, cn.value);
                    }
                    Ok(_) | Err(WorkError::Shutdown) => {
                        clk.recv()?;
                        break (cn.position, cn.value);
                    }
                    Err(e) => {
                        status = Err(e);
                        break 'edges;
                    }
                }
            };

            let edge = Edge {
                data: line.data,
                clk: line.clk,
                ss: line.position,
                es,
                gap_us: (es - line.position) as f64 * 1_000_000.0 / samplerate,
                transition,
            };

            let completed = self.frame.handle_edge(edge, &mut anns);

            for ann in anns.drain(..) {
                if let Some(row) = rows.iter().position(|r| r.contains(ann.class))
                    && let Some(Some(out)) = row_outs.get(row)
                {
                    out.send(ann)?;
                    produced += 1;
                }
            }

            if let Some(word) = completed {
                self.words_decoded += 1;
                trace!(
                    "[{}] #{}: {} 0x{:02x} at {}",
                    self.name, self.words_decoded, word.direction, word.value, word.start
                );
                if let Some(out) = &words_out {
                    out.send(word)?;
                    produced += 1;
                }
            }

            line = LineState {
                clk: next_clk,
                data: next_data,
                position: es,
            };
        }

        self.line = Some(line);
        status?;
        Ok(produced)
    }
}
