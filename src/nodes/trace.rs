//! Two-channel trace replay source
//!
//! Provides [`Trace`], a run-length encoded clock/data capture, [`TraceBuilder`],
//! a synthesizer that renders PS/2 bus activity into a trace, and
//! [`TraceSource`], a runtime process node that streams a trace's samples into
//! a pipeline.
//!
//! Each broadcast destination runs in its own sender thread, so a slow
//! consumer on one channel never blocks the other.

use crate::runtime::Sender;
use crate::runtime::node::{InputPort, OutputPort, ProcessNode, WorkResult};
use crate::runtime::sample::Sample;
use crate::{Ps2Error, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use tracing::{debug, info};

/// Half of the nominal ~12.5 kHz PS/2 clock period
const CLOCK_HALF_US: f64 = 40.0;
/// How long data leads the falling clock edge
const DATA_SETUP_US: f64 = 20.0;
/// Half of the host's request-to-send clock hold
const RTS_HOLD_US: f64 = 60.0;

/// A captured or synthesized two-channel trace
///
/// Both channels are run-length encoded: one [`Sample`] per level change,
/// positions strictly increasing. The first sample of each channel carries
/// the initial level.
#[derive(Debug, Clone)]
pub struct Trace {
    clk: Vec<Sample>,
    data: Vec<Sample>,
}

impl Trace {
    /// Wrap already-captured channel data
    pub fn new(clk: Vec<Sample>, data: Vec<Sample>) -> Self {
        Self { clk, data }
    }

    /// Clock channel events
    pub fn clk(&self) -> &[Sample] {
        &self.clk
    }

    /// Data channel events
    pub fn data(&self) -> &[Sample] {
        &self.data
    }
}

/// Renders PS/2 bus activity into a [`Trace`]
///
/// The builder keeps both lines at their current level while time advances
/// and records an event whenever a line moves. Frames follow the wire
/// convention: the device changes data while the clock is high and the host
/// while it is low, so consecutive frames need an idle gap between them to
/// delimit the exchange.
pub struct TraceBuilder {
    samplerate: f64,
    clk: Vec<Sample>,
    data: Vec<Sample>,
    position: u64,
    clk_level: bool,
    data_level: bool,
}

impl TraceBuilder {
    /// Create a builder for a capture at the given rate (samples per second)
    ///
    /// Both lines start high (bus idle) at position 0.
    pub fn new(samplerate: f64) -> Result<Self> {
        if !samplerate.is_finite() || samplerate <= 0.0 {
            return Err(Ps2Error::InvalidSampleRate(samplerate));
        }
        Ok(Self {
            samplerate,
            clk: vec![Sample::new(true, 0)],
            data: vec![Sample::new(true, 0)],
            position: 0,
            clk_level: true,
            data_level: true,
        })
    }

    /// The capture rate this builder renders at
    pub fn samplerate(&self) -> f64 {
        self.samplerate
    }

    /// Current position (sample index) of the builder
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Let the bus rest: both lines hold their level while time advances
    pub fn idle_us(&mut self, us: f64) {
        self.advance_us(us);
    }

    /// Host holds the clock line low for `us`, then releases it
    pub fn inhibit_us(&mut self, us: f64) {
        self.set_clk(false);
        self.advance_us(us);
        self.set_clk(true);
    }

    /// The 11 frame bits for a byte: start, 8 data bits LSB first, odd
    /// parity, stop
    pub fn frame_bits(byte: u8) -> Vec<bool> {
        let mut bits = Vec::with_capacity(11);
        bits.push(false);
        for i in 0..8 {
            bits.push(byte & (1 << i) != 0);
        }
        // Odd parity: the parity bit makes the total number of set bits odd
        bits.push(byte.count_ones() % 2 == 0);
        bits.push(true);
        bits
    }

    /// Clock out a complete device-to-host frame for `byte`
    pub fn device_frame(&mut self, byte: u8) {
        self.device_bits(&Self::frame_bits(byte));
    }

    /// Clock out an arbitrary bit sequence device-style: data changes while
    /// the clock is high, each bit is valid through one low half-period
    pub fn device_bits(&mut self, bits: &[bool]) {
        for &bit in bits {
            self.set_data(bit);
            self.advance_us(DATA_SETUP_US);
            self.set_clk(false);
            self.advance_us(CLOCK_HALF_US);
            self.set_clk(true);
            self.advance_us(CLOCK_HALF_US - DATA_SETUP_US);
        }
        self.set_data(true);
    }

    /// A host-to-device exchange for `byte` with the device acknowledging
    pub fn host_frame(&mut self, byte: u8) {
        self.host_exchange(byte, true);
    }

    /// A host-to-device exchange for `byte`
    ///
    /// The host inhibits the bus, pulls data low (request-to-send) and
    /// releases the clock; the device then clocks the bits out, with data
    /// valid through each high half-period. When `ack` is false the device
    /// never pulls the acknowledge bit low.
    pub fn host_exchange(&mut self, byte: u8, ack: bool) {
        let bits = Self::frame_bits(byte);

        // Request-to-send: clock yanked low, then data
        self.set_clk(false);
        self.advance_us(RTS_HOLD_US);
        self.set_data(false);
        self.advance_us(RTS_HOLD_US);
        self.set_clk(true);

        // The start bit is already on the line; the device clocks it first
        self.advance_us(CLOCK_HALF_US);
        self.set_clk(false);

        // Data and parity bits change while the clock is low
        for &bit in &bits[1..10] {
            self.advance_us(DATA_SETUP_US);
            self.set_data(bit);
            self.advance_us(CLOCK_HALF_US - DATA_SETUP_US);
            self.set_clk(true);
            self.advance_us(CLOCK_HALF_US);
            self.set_clk(false);
        }

        // Stop bit: the host releases the data line
        self.advance_us(DATA_SETUP_US);
        self.set_data(true);
        self.advance_us(CLOCK_HALF_US - DATA_SETUP_US);
        self.set_clk(true);
        self.advance_us(CLOCK_HALF_US);

        // Acknowledge: the device pulls data low as the clock falls
        if ack {
            self.set_data(false);
        }
        self.set_clk(false);
        self.advance_us(CLOCK_HALF_US);
        self.set_clk(true);
        self.advance_us(DATA_SETUP_US);
        self.set_data(true);
    }

    /// Finish building and return the trace
    pub fn finish(self) -> Trace {
        Trace {
            clk: self.clk,
            data: self.data,
        }
    }

    fn advance_us(&mut self, us: f64) {
        self.position += (us * self.samplerate / 1_000_000.0).round() as u64;
    }

    fn set_clk(&mut self, level: bool) {
        if self.clk_level != level {
            self.clk_level = level;
            self.clk.push(Sample::new(level, self.position));
        }
    }

    fn set_data(&mut self, level: bool) {
        if self.data_level != level {
            self.data_level = level;
            self.data.push(Sample::new(level, self.position));
        }
    }
}

/// Source node that replays a [`Trace`] as clock/data sample streams
///
/// This is a **self-threading node** (`is_self_threading() = true`). On the
/// first (and only) call to `work()`, it spawns one sender thread **per
/// broadcast destination**. The scheduler thread then waits for
/// `should_stop()` rather than calling `work()` repeatedly.
///
/// If a channel is broadcast to multiple receivers, each receiver gets its
/// own independent sender thread, so slow consumers don't block fast ones.
pub struct TraceSource {
    name: String,
    clk: Arc<[Sample]>,
    data: Arc<[Sample]>,

    shutdown: Arc<AtomicBool>,
    threads_completed: Arc<AtomicUsize>,
    threads_spawned: bool,
    num_threads: usize,
}

impl TraceSource {
    /// Create a source for the given trace
    ///
    /// Both channels must carry at least their initial-level sample, since
    /// downstream decoders establish line levels from the first event.
    pub fn new(trace: Trace) -> Result<Self> {
        if trace.clk.is_empty() {
            return Err(Ps2Error::EmptyTrace("clk"));
        }
        if trace.data.is_empty() {
            return Err(Ps2Error::EmptyTrace("data"));
        }
        Ok(Self {
            name: "trace_source".to_string(),
            clk: trace.clk.into(),
            data: trace.data.into(),
            shutdown: Arc::new(AtomicBool::new(false)),
            threads_completed: Arc::new(AtomicUsize::new(0)),
            threads_spawned: false,
            num_threads: 0,
        })
    }

    /// With custom name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    fn spawn_channel_threads(
        &self,
        channel: &'static str,
        samples: &Arc<[Sample]>,
        senders: Vec<Sender<Sample>>,
    ) -> usize {
        let count = senders.len();
        for (dest, sender) in senders.into_iter().enumerate() {
            let samples = Arc::clone(samples);
            let shutdown = Arc::clone(&self.shutdown);
            let completed = Arc::clone(&self.threads_completed);
            let name = self.name.clone();
            thread::spawn(move || {
                for sample in samples.iter() {
                    if shutdown.load(Ordering::Relaxed) {
                        break;
                    }
                    if sender.send(*sample).is_err() {
                        debug!("[{}] {} destination {} dropped, stopping", name, channel, dest);
                        break;
                    }
                }
                sender.close();
                completed.fetch_add(1, Ordering::Relaxed);
            });
        }
        count
    }
}

impl ProcessNode for TraceSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_self_threading(&self) -> bool {
        true
    }

    fn should_stop(&self) -> bool {
        self.threads_spawned && self.threads_completed.load(Ordering::Relaxed) >= self.num_threads
    }

    fn num_inputs(&self) -> usize {
        0
    }

    fn num_outputs(&self) -> usize {
        2
    }

    fn output_schema(&self) -> Vec<crate::runtime::ports::PortSchema> {
        use crate::runtime::ports::{PortDirection, PortSchema};
        vec![
            PortSchema::new::<Sample>("clk", 0, PortDirection::Output),
            PortSchema::new::<Sample>("data", 1, PortDirection::Output),
        ]
    }

    fn work(&mut self, _inputs: &[InputPort], outputs: &[OutputPort]) -> WorkResult<usize> {
        if self.threads_spawned {
            return Ok(0);
        }

        let mut spawned = 0;
        for (idx, channel, samples) in [(0, "clk", &self.clk), (1, "data", &self.data)] {
            match outputs.get(idx).and_then(|p| p.split_senders::<Sample>()) {
                Some(senders) => {
                    spawned += self.spawn_channel_threads(channel, samples, senders);
                }
                None => {
                    debug!("[{}] {} output not connected", self.name, channel);
                }
            }
        }

        self.num_threads = spawned;
        self.threads_spawned = true;
        info!(
            "[{}] streaming {} clk / {} data events on {} threads",
            self.name,
            self.clk.len(),
            self.data.len(),
            spawned
        );

        Ok(0)
    }
}

impl Drop for TraceSource {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: f64 = 1_000_000.0;

    fn positions_strictly_increase(samples: &[Sample]) -> bool {
        samples.windows(2).all(|w| w[0].position < w[1].position)
    }

    #[test]
    fn builder_starts_idle() {
        let b = TraceBuilder::new(RATE).unwrap();
        assert_eq!(b.samplerate(), RATE);
        assert_eq!(b.position(), 0);
        let trace = b.finish();
        assert_eq!(trace.clk(), &[Sample::new(true, 0)]);
        assert_eq!(trace.data(), &[Sample::new(true, 0)]);
    }

    #[test]
    fn idle_advances_position_without_events() {
        let mut b = TraceBuilder::new(RATE).unwrap();
        b.idle_us(250.0);
        assert_eq!(b.position(), 250);
        let trace = b.finish();
        assert_eq!(trace.clk().len(), 1);
        assert_eq!(trace.data().len(), 1);
    }

    #[test]
    fn builder_rejects_bad_rate() {
        assert!(TraceBuilder::new(0.0).is_err());
        assert!(TraceBuilder::new(-1.0).is_err());
        assert!(TraceBuilder::new(f64::NAN).is_err());
    }

    #[test]
    fn frame_bits_odd_parity() {
        // 0x5a has four set bits, so the parity bit must be high
        let bits = TraceBuilder::frame_bits(0x5a);
        assert_eq!(bits.len(), 11);
        assert!(!bits[0], "start bit is low");
        assert!(bits[9], "parity bit for even popcount is high");
        assert!(bits[10], "stop bit is high");

        // 0x07 has three set bits, so the parity bit must be low
        assert!(!TraceBuilder::frame_bits(0x07)[9]);

        // Data bits are LSB first
        let bits = TraceBuilder::frame_bits(0x01);
        assert!(bits[1]);
        assert!(!bits[2]);
    }

    #[test]
    fn device_frame_clocks_eleven_bits() {
        let mut b = TraceBuilder::new(RATE).unwrap();
        b.idle_us(100.0);
        b.device_frame(0xff);
        let trace = b.finish();

        // Initial level plus one falling and one rising edge per bit
        assert_eq!(trace.clk().len(), 1 + 22);
        assert!(positions_strictly_increase(trace.clk()));
        assert!(positions_strictly_increase(trace.data()));
        // Clock is released high at the end
        assert!(trace.clk().last().unwrap().value);
    }

    #[test]
    fn host_exchange_holds_clock_low_first() {
        let mut b = TraceBuilder::new(RATE).unwrap();
        b.idle_us(100.0);
        b.host_frame(0xed);
        let trace = b.finish();

        // The request-to-send hold spans two RTS half-periods
        let fall = trace.clk()[1];
        let rise = trace.clk()[2];
        assert!(!fall.value);
        assert!(rise.value);
        assert_eq!(rise.position - fall.position, 120);

        assert!(positions_strictly_increase(trace.clk()));
        assert!(positions_strictly_increase(trace.data()));
        assert!(trace.data().last().unwrap().value);
    }

    #[test]
    fn inhibit_pulses_clock_low() {
        let mut b = TraceBuilder::new(RATE).unwrap();
        b.idle_us(50.0);
        b.inhibit_us(80.0);
        let trace = b.finish();

        assert_eq!(trace.clk().len(), 3);
        assert_eq!(trace.clk()[1], Sample::new(false, 50));
        assert_eq!(trace.clk()[2], Sample::new(true, 130));
    }

    #[test]
    fn source_rejects_empty_channels() {
        assert!(matches!(
            TraceSource::new(Trace::new(vec![], vec![Sample::new(true, 0)])),
            Err(Ps2Error::EmptyTrace("clk"))
        ));
        assert!(matches!(
            TraceSource::new(Trace::new(vec![Sample::new(true, 0)], vec![])),
            Err(Ps2Error::EmptyTrace("data"))
        ));
    }
}
