//! Per-consumer signal adaptation.
//!
//! A [`SignalAdapter`] sits between one device minder and one consumer
//! sink. It owns a ring buffer of raw interleaved samples, drains it in
//! lockstep with the consumer's block size, and converts on the way out:
//! integer passthrough or boxcar downsampling, planar float conversion,
//! windowed spectral transform, or FM demodulation of an I/Q pair.

use std::cell::RefCell;
use std::f32::consts::PI;
use std::rc::Rc;
use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use pipit_foundation::{AdapterError, SinkRegistry};

use crate::ring::SampleRing;
use crate::{hamming_window, PERIOD_FRAMES};

/// Per-channel float buffers shared between an adapter and its consumer.
/// The analysis runner supplies these so blocks land directly in the
/// buffers it hands to its plugin, with no copy in between.
pub type SharedBuffers = Rc<RefCell<Vec<Vec<f32>>>>;

/// How an adapter transforms the raw stream for its consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputKind {
    /// Raw interleaved audio, possibly downsampled.
    Int,
    /// Planar floats in [-1, 1], possibly downsampled.
    Float,
    /// Per-channel windowed spectrum; block/step control FFT size and
    /// overlap.
    Spectrum,
    /// FM-demodulated mono audio from a two-channel I/Q input.
    Fm,
}

impl OutputKind {
    fn name(self) -> &'static str {
        match self {
            OutputKind::Int => "Int",
            OutputKind::Float => "Float",
            OutputKind::Spectrum => "Spectrum",
            OutputKind::Fm => "Fm",
        }
    }
}

/// Immutable adapter configuration.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// Rate delivered to the consumer, Hz.
    pub rate: u32,
    /// Hardware capture rate, Hz.
    pub hw_rate: u32,
    /// Input channel count.
    pub channels: usize,
    pub kind: OutputKind,
    /// Frames per delivery; 0 means deliver whatever is available
    /// (Int/Fm only).
    pub block_size: usize,
    /// Frames the stream advances per delivery; below `block_size` it
    /// leaves overlap behind. 0 defaults to `block_size`.
    pub step_size: usize,
    /// Upper bound on frames converted per call; 0 picks a default sized
    /// to the ring buffer.
    pub max_frames: usize,
    /// Label of the consumer, resolved through the sink registry on every
    /// delivery.
    pub sink_label: String,
}

/// Result of draining an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    Kept,
    /// The consumer no longer resolves; remove this adapter.
    SinkGone,
}

enum Converted {
    Consumed(usize),
    SinkGone,
}

/// Kind-specific conversion state, fixed at construction apart from the
/// documented Int <-> Fm toggle.
enum KindState {
    Int,
    Float,
    Spectrum {
        window: Vec<f32>,
        fft: Arc<dyn Fft<f32>>,
        fft_buf: Vec<Complex<f32>>,
        scratch: Vec<Complex<f32>>,
    },
    Fm {
        last_theta: f32,
    },
}

enum OutBuffers {
    Owned(Vec<Vec<f32>>),
    Shared(SharedBuffers),
}

pub struct SignalAdapter {
    ring: SampleRing,
    conv: Converter,
}

struct Converter {
    rate: u32,
    hw_rate: u32,
    channels: usize,
    out_channels: usize,
    factor: usize,
    countdown: usize,
    accum: Vec<i32>,
    block_size: usize,
    step_size: usize,
    max_frames: usize,
    kind: KindState,
    int_buf: Vec<i16>,
    out: OutBuffers,
    sink_label: String,
    registry: SinkRegistry,
}

impl SignalAdapter {
    /// Build an adapter with its own output buffers.
    pub fn new(cfg: AdapterConfig, registry: SinkRegistry) -> Result<Self, AdapterError> {
        Self::build(cfg, registry, None)
    }

    /// Build an adapter writing float output directly into buffers owned
    /// by the consumer.
    pub fn with_shared_buffers(
        cfg: AdapterConfig,
        registry: SinkRegistry,
        buffers: SharedBuffers,
    ) -> Result<Self, AdapterError> {
        Self::build(cfg, registry, Some(buffers))
    }

    fn build(
        cfg: AdapterConfig,
        registry: SinkRegistry,
        shared: Option<SharedBuffers>,
    ) -> Result<Self, AdapterError> {
        if cfg.rate == 0 || cfg.rate > cfg.hw_rate {
            return Err(AdapterError::InvalidRate {
                rate: cfg.rate,
                hw_rate: cfg.hw_rate,
            });
        }
        if cfg.kind == OutputKind::Fm && cfg.channels != 2 {
            return Err(AdapterError::FmChannels {
                channels: cfg.channels,
            });
        }
        if matches!(cfg.kind, OutputKind::Float | OutputKind::Spectrum) && cfg.block_size == 0 {
            return Err(AdapterError::BlockRequired {
                kind: cfg.kind.name(),
            });
        }

        // Residual drift from truncation is accepted; negotiate_rate keeps
        // it zero for rates the minder hands out.
        let factor = (cfg.hw_rate / cfg.rate) as usize;
        let step_size = if cfg.step_size == 0 {
            cfg.block_size
        } else {
            cfg.step_size
        };
        // Raw frames one full block needs. With a high downsample factor
        // this can exceed the usual ring sizing, so the ring and the
        // per-call cap are widened to fit it; an explicit cap below it
        // would starve the consumer forever and is rejected instead.
        let required_frames = match cfg.kind {
            _ if cfg.block_size == 0 => 0,
            OutputKind::Float | OutputKind::Spectrum => cfg.block_size * factor,
            OutputKind::Int | OutputKind::Fm => cfg.block_size,
        };
        if cfg.max_frames != 0 && cfg.max_frames < required_frames {
            return Err(AdapterError::MaxFramesBelowBlock {
                max_frames: cfg.max_frames,
                required: required_frames,
            });
        }
        let ring_capacity = (PERIOD_FRAMES * 2).max(required_frames) * cfg.channels;
        let max_frames = if cfg.max_frames == 0 {
            (PERIOD_FRAMES * 2).max(required_frames)
        } else {
            cfg.max_frames
        };
        let out_channels = if cfg.kind == OutputKind::Fm {
            1
        } else {
            cfg.channels
        };

        let kind = match cfg.kind {
            OutputKind::Int => KindState::Int,
            OutputKind::Float => KindState::Float,
            OutputKind::Fm => KindState::Fm { last_theta: 0.0 },
            OutputKind::Spectrum => {
                let fft = FftPlanner::new().plan_fft_forward(cfg.block_size);
                let scratch = vec![Complex::default(); fft.get_inplace_scratch_len()];
                KindState::Spectrum {
                    window: hamming_window(cfg.block_size),
                    fft_buf: vec![Complex::default(); cfg.block_size],
                    fft,
                    scratch,
                }
            }
        };

        // Spectrum output carries block/2 + 1 complex bins.
        let out_len = cfg.block_size + if cfg.kind == OutputKind::Spectrum { 2 } else { 0 };
        let out = match shared {
            Some(buffers) => OutBuffers::Shared(buffers),
            None => OutBuffers::Owned(vec![vec![0.0; out_len]; out_channels]),
        };

        // Held for Int and Fm alike so the documented toggle between the
        // two never needs a reallocation.
        let int_buf = if matches!(cfg.kind, OutputKind::Int | OutputKind::Fm) {
            vec![0i16; max_frames * cfg.channels]
        } else {
            Vec::new()
        };

        Ok(Self {
            ring: SampleRing::new(ring_capacity),
            conv: Converter {
                rate: cfg.rate,
                hw_rate: cfg.hw_rate,
                channels: cfg.channels,
                out_channels,
                factor,
                countdown: factor,
                accum: vec![0; cfg.channels],
                block_size: cfg.block_size,
                step_size,
                max_frames,
                kind,
                int_buf,
                out,
                sink_label: cfg.sink_label,
                registry,
            },
        })
    }

    /// Append raw interleaved samples, bounded by free capacity and
    /// floored to a whole-frame multiple. Excess is silently dropped:
    /// a slow consumer must not stall the device.
    pub fn push_raw(&mut self, samples: &[i16]) -> usize {
        let mut take = samples.len().min(self.ring.free());
        take -= take % self.conv.channels;
        self.ring.push(&samples[..take])
    }

    /// Free ring capacity in samples.
    pub fn free(&self) -> usize {
        self.ring.free()
    }

    /// Buffered raw samples.
    pub fn buffered(&self) -> usize {
        self.ring.len()
    }

    pub fn output_kind(&self) -> OutputKind {
        match self.conv.kind {
            KindState::Int => OutputKind::Int,
            KindState::Float => OutputKind::Float,
            KindState::Spectrum { .. } => OutputKind::Spectrum,
            KindState::Fm { .. } => OutputKind::Fm,
        }
    }

    pub fn block_size(&self) -> usize {
        self.conv.block_size
    }

    pub fn step_size(&self) -> usize {
        self.conv.step_size
    }

    /// Raw samples that must be buffered before a conversion fires; 0
    /// means "convert whatever is there".
    fn gate_samples(&self) -> usize {
        let block = self.conv.block_size;
        if block == 0 {
            return 0;
        }
        match self.conv.kind {
            // Block counts output frames for planar kinds, so the gate is
            // scaled back up to raw frames.
            KindState::Float | KindState::Spectrum { .. } => {
                block * self.conv.factor * self.conv.channels
            }
            KindState::Int | KindState::Fm { .. } => block * self.conv.channels,
        }
    }

    /// Drain buffered data into the consumer, one conversion per block
    /// (or per delivery for block size 0), recomputing the timestamp for
    /// each call from the amount still buffered ahead of the newest frame.
    pub fn drain(&mut self, newest_frame_ts: f64) -> DrainOutcome {
        let gate = self.gate_samples();
        loop {
            let buffered = self.ring.len();
            if buffered == 0 || (gate > 0 && buffered < gate) {
                return DrainOutcome::Kept;
            }
            let buffered_frames = (buffered / self.conv.channels) as f64;
            let ts = newest_frame_ts - (buffered_frames - 1.0) / self.conv.hw_rate as f64;

            let conv = &mut self.conv;
            let outcome = self.ring.with_slices(|a, b| conv.convert(a, b, ts));
            match outcome {
                Converted::SinkGone => return DrainOutcome::SinkGone,
                Converted::Consumed(0) => return DrainOutcome::Kept,
                Converted::Consumed(n) => self.ring.trim(n),
            }
        }
    }

    /// Change the output kind in place. Only the identity change and the
    /// Int <-> Fm toggle are allowed; the two share the interleaved i16
    /// buffer layout. Anything else is rejected with no side effects.
    pub fn set_output_kind(&mut self, kind: OutputKind) -> bool {
        let current = self.output_kind();
        if kind == current {
            return true;
        }
        match (current, kind) {
            (OutputKind::Int, OutputKind::Fm) => {
                if self.conv.channels != 2 {
                    return false;
                }
                self.conv.kind = KindState::Fm { last_theta: 0.0 };
                self.conv.out_channels = 1;
                true
            }
            (OutputKind::Fm, OutputKind::Int) => {
                self.conv.kind = KindState::Int;
                self.conv.out_channels = self.conv.channels;
                true
            }
            _ => false,
        }
    }
}

impl Converter {
    fn convert(&mut self, a1: &[i16], a2: &[i16], ts: f64) -> Converted {
        let avail = a1.len() + a2.len();
        if avail < self.factor {
            return Converted::Consumed(0);
        }
        let Some(sink) = self.registry.resolve(&self.sink_label) else {
            return Converted::SinkGone;
        };

        let avail_frames = avail / self.channels;
        let mut use_frames = (avail_frames / self.factor) * self.factor;
        let cap = match self.kind {
            KindState::Float | KindState::Spectrum { .. } => self.block_size * self.factor,
            KindState::Int | KindState::Fm { .. } if self.block_size > 0 => self.block_size,
            _ => usize::MAX,
        };
        use_frames = use_frames.min(cap).min(self.max_frames);
        use_frames -= use_frames % self.factor;
        if use_frames == 0 {
            return Converted::Consumed(0);
        }
        let out_frames = use_frames / self.factor;

        match &mut self.kind {
            KindState::Int if self.factor == 1 => {
                // Pass raw interleaved samples straight through, one call
                // per contiguous segment.
                let take = use_frames * self.channels;
                let n1 = take.min(a1.len());
                let mut sink = sink.borrow_mut();
                sink.deliver_samples(&a1[..n1], ts);
                if take > n1 {
                    sink.deliver_samples(&a2[..take - n1], ts);
                }
                Converted::Consumed(take)
            }
            KindState::Int => {
                boxcar_i16(
                    a1,
                    a2,
                    self.factor,
                    &mut self.countdown,
                    &mut self.accum,
                    &mut self.int_buf,
                    use_frames,
                );
                sink.borrow_mut()
                    .deliver_samples(&self.int_buf[..out_frames * self.channels], ts);
                Converted::Consumed(use_frames * self.channels)
            }
            KindState::Fm { last_theta } => {
                // Boxcar runs even at factor 1 so the I/Q pair is averaged
                // into the demodulation buffer.
                boxcar_i16(
                    a1,
                    a2,
                    self.factor,
                    &mut self.countdown,
                    &mut self.accum,
                    &mut self.int_buf,
                    use_frames,
                );
                let scale = self.rate as f32 / (2.0 * PI) / 75_000.0 * 32767.0;
                for i in 0..out_frames {
                    let theta =
                        (self.int_buf[2 * i] as f32).atan2(self.int_buf[2 * i + 1] as f32);
                    let dtheta = wrap_phase(theta - *last_theta);
                    *last_theta = theta;
                    self.int_buf[i] = (scale * dtheta).round() as i16;
                }
                sink.borrow_mut()
                    .deliver_samples(&self.int_buf[..out_frames], ts);
                Converted::Consumed(use_frames * self.channels)
            }
            KindState::Float | KindState::Spectrum { .. } => {
                let spectral = matches!(self.kind, KindState::Spectrum { .. });
                // The forward transform is unnormalized, so spectral blocks
                // are pre-scaled by 1/sqrt(block) here.
                let mut conv_factor = 1.0 / (32767.0 * self.factor as f32);
                if spectral {
                    conv_factor /= (self.block_size as f32).sqrt();
                }

                // Fill (and for Spectrum, transform) with the buffer
                // borrow held, then release it before touching the sink:
                // a consumer sharing these buffers will re-borrow them.
                {
                    let mut shared_guard;
                    let bufs: &mut [Vec<f32>] = match &mut self.out {
                        OutBuffers::Owned(b) => b,
                        OutBuffers::Shared(rc) => {
                            shared_guard = rc.borrow_mut();
                            &mut shared_guard[..]
                        }
                    };
                    planar_fill(
                        a1,
                        a2,
                        self.channels,
                        self.factor,
                        &mut self.countdown,
                        &mut self.accum,
                        bufs,
                        use_frames,
                        conv_factor,
                    );
                    if let KindState::Spectrum {
                        window,
                        fft,
                        fft_buf,
                        scratch,
                    } = &mut self.kind
                    {
                        for buf in bufs.iter_mut().take(self.channels) {
                            for (i, (s, w)) in buf.iter_mut().zip(window.iter()).enumerate() {
                                *s *= w;
                                fft_buf[i] = Complex::new(*s, 0.0);
                            }
                            fft.process_with_scratch(fft_buf, scratch);
                            // Keep bins 0..block/2 as interleaved re,im;
                            // the rest of the complex output is redundant
                            // for real input.
                            for (k, bin) in fft_buf.iter().take(self.block_size / 2 + 1).enumerate()
                            {
                                buf[2 * k] = bin.re;
                                buf[2 * k + 1] = bin.im;
                            }
                        }
                    }
                }

                let out_len = self.block_size + if spectral { 2 } else { 0 };
                let mut sink = sink.borrow_mut();
                for ch in 0..self.out_channels {
                    match &self.out {
                        OutBuffers::Owned(b) => sink.deliver_channel(ch, &b[ch][..out_len], ts),
                        // Data is already in the consumer's buffers.
                        OutBuffers::Shared(_) => sink.deliver_channel(ch, &[], ts),
                    }
                }
                // Step, not block: the overlap stays buffered for the next
                // call.
                Converted::Consumed(self.step_size * self.factor * self.channels)
            }
        }
    }
}

/// Wrap a phase delta into (-pi, pi] with at most one 2*pi correction.
fn wrap_phase(dtheta: f32) -> f32 {
    if dtheta > PI {
        dtheta - 2.0 * PI
    } else if dtheta <= -PI {
        dtheta + 2.0 * PI
    } else {
        dtheta
    }
}

/// Boxcar-average `use_frames` raw frames spanning two segments into
/// interleaved i16 output, one averaged frame per `factor` input frames,
/// rounding half up.
#[allow(clippy::too_many_arguments)]
fn boxcar_i16(
    a1: &[i16],
    a2: &[i16],
    factor: usize,
    countdown: &mut usize,
    accum: &mut [i32],
    out: &mut [i16],
    use_frames: usize,
) {
    let mut src = a1.iter().chain(a2.iter());
    let mut k = 0;
    for _ in 0..use_frames {
        for a in accum.iter_mut() {
            *a += *src.next().unwrap_or(&0) as i32;
        }
        *countdown -= 1;
        if *countdown == 0 {
            *countdown = factor;
            let half = factor as i32 / 2;
            for a in accum.iter_mut() {
                out[k] = ((*a + half) / factor as i32) as i16;
                k += 1;
                *a = 0;
            }
        }
    }
}

/// Planar float conversion of `use_frames` raw frames into per-channel
/// buffers, scaled by `conv_factor`, boxcar-summing when factor > 1.
#[allow(clippy::too_many_arguments)]
fn planar_fill(
    a1: &[i16],
    a2: &[i16],
    channels: usize,
    factor: usize,
    countdown: &mut usize,
    accum: &mut [i32],
    bufs: &mut [Vec<f32>],
    use_frames: usize,
    conv_factor: f32,
) {
    let mut src = a1.iter().chain(a2.iter());
    if factor == 1 {
        for i in 0..use_frames {
            for buf in bufs.iter_mut().take(channels) {
                buf[i] = *src.next().unwrap_or(&0) as f32 * conv_factor;
            }
        }
        return;
    }
    let mut k = 0;
    for _ in 0..use_frames {
        for a in accum.iter_mut() {
            *a += *src.next().unwrap_or(&0) as i32;
        }
        *countdown -= 1;
        if *countdown == 0 {
            *countdown = factor;
            for (a, buf) in accum.iter_mut().zip(bufs.iter_mut()) {
                buf[k] = *a as f32 * conv_factor;
                *a = 0;
            }
            k += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipit_foundation::Sink;

    #[derive(Default)]
    struct RecordingSink {
        samples: Vec<i16>,
        blocks: Vec<(usize, Vec<f32>)>,
        timestamps: Vec<f64>,
    }

    impl Sink for RecordingSink {
        fn deliver_samples(&mut self, samples: &[i16], timestamp: f64) {
            self.samples.extend_from_slice(samples);
            self.timestamps.push(timestamp);
        }
        fn deliver_channel(&mut self, channel: usize, block: &[f32], timestamp: f64) {
            self.blocks.push((channel, block.to_vec()));
            self.timestamps.push(timestamp);
        }
    }

    fn adapter_with_sink(cfg: AdapterConfig) -> (SignalAdapter, Rc<RefCell<RecordingSink>>) {
        let registry = SinkRegistry::new();
        let sink = Rc::new(RefCell::new(RecordingSink::default()));
        registry.register(&cfg.sink_label, &sink);
        let adapter = SignalAdapter::new(cfg, registry).unwrap();
        (adapter, sink)
    }

    fn int_cfg(rate: u32, hw_rate: u32, channels: usize) -> AdapterConfig {
        AdapterConfig {
            rate,
            hw_rate,
            channels,
            kind: OutputKind::Int,
            block_size: 0,
            step_size: 0,
            max_frames: 0,
            sink_label: "sink".into(),
        }
    }

    // ─── Downsampling ────────────────────────────────────────────────

    #[test]
    fn boxcar_rounds_half_up() {
        let (mut adapter, sink) = adapter_with_sink(int_cfg(12_000, 48_000, 1));
        adapter.push_raw(&[10, 20, 30, 40]);
        assert_eq!(adapter.drain(0.0), DrainOutcome::Kept);
        // (10+20+30+40 + 4/2) / 4 = 25
        assert_eq!(sink.borrow().samples, vec![25]);
        assert!(adapter.buffered() == 0);
    }

    #[test]
    fn boxcar_truncates_toward_zero_for_negative_sums() {
        let (mut adapter, sink) = adapter_with_sink(int_cfg(12_000, 48_000, 1));
        adapter.push_raw(&[-10, -20, -30, -41]);
        adapter.drain(0.0);
        // (-101 + 2) / 4 = -24 (C-style truncation)
        assert_eq!(sink.borrow().samples, vec![-24]);
    }

    #[test]
    fn passthrough_preserves_interleaved_samples() {
        let (mut adapter, sink) = adapter_with_sink(int_cfg(48_000, 48_000, 2));
        adapter.push_raw(&[1, -1, 2, -2, 3, -3]);
        adapter.drain(0.0);
        assert_eq!(sink.borrow().samples, vec![1, -1, 2, -2, 3, -3]);
    }

    #[test]
    fn residual_below_factor_is_left_buffered() {
        let (mut adapter, sink) = adapter_with_sink(int_cfg(12_000, 48_000, 1));
        adapter.push_raw(&[10, 20, 30, 40, 50, 60]);
        adapter.drain(0.0);
        assert_eq!(sink.borrow().samples, vec![25]);
        // two leftover samples wait for the rest of their boxcar
        assert_eq!(adapter.buffered(), 2);
    }

    #[test]
    fn partial_boxcar_waits_for_more_data() {
        let (mut adapter, sink) = adapter_with_sink(int_cfg(12_000, 48_000, 1));
        adapter.push_raw(&[10, 20]);
        adapter.drain(0.0);
        assert!(sink.borrow().samples.is_empty());
        adapter.push_raw(&[30, 40]);
        adapter.drain(0.0);
        assert_eq!(sink.borrow().samples, vec![25]);
    }

    // ─── Backpressure and removal ────────────────────────────────────

    #[test]
    fn push_never_exceeds_free_capacity() {
        let (mut adapter, _sink) = adapter_with_sink(int_cfg(48_000, 48_000, 2));
        let capacity = PERIOD_FRAMES * 2 * 2;
        let flood = vec![7i16; capacity + 1000];
        assert_eq!(adapter.push_raw(&flood), capacity);
        assert_eq!(adapter.free(), 0);
        assert_eq!(adapter.push_raw(&[7, 7]), 0);
    }

    #[test]
    fn vanished_sink_returns_sink_gone() {
        let registry = SinkRegistry::new();
        let sink = Rc::new(RefCell::new(RecordingSink::default()));
        registry.register("sink", &sink);
        let mut adapter = SignalAdapter::new(int_cfg(48_000, 48_000, 1), registry).unwrap();
        adapter.push_raw(&[1, 2, 3]);
        drop(sink);
        assert_eq!(adapter.drain(0.0), DrainOutcome::SinkGone);
    }

    // ─── FM demodulation ─────────────────────────────────────────────

    #[test]
    fn fm_requires_two_channels() {
        let mut cfg = int_cfg(48_000, 48_000, 1);
        cfg.kind = OutputKind::Fm;
        let err = SignalAdapter::new(cfg, SinkRegistry::new()).err();
        assert_eq!(err, Some(AdapterError::FmChannels { channels: 1 }));
    }

    #[test]
    fn wrapped_phase_delta_stays_in_half_open_range() {
        let mut theta: f32 = 0.0;
        for step in [0.1f32, 3.0, -3.0, 3.1, 6.2, -6.2, PI, -PI, 2.9] {
            let next = (theta + step).rem_euclid(2.0 * PI) - PI;
            let d = wrap_phase(next - theta);
            assert!(d > -PI && d <= PI, "delta {d} out of (-pi, pi]");
            theta = next;
        }
    }

    #[test]
    fn constant_rotation_demodulates_to_constant_output() {
        let mut cfg = int_cfg(48_000, 48_000, 2);
        cfg.kind = OutputKind::Fm;
        let (mut adapter, sink) = {
            let registry = SinkRegistry::new();
            let sink = Rc::new(RefCell::new(RecordingSink::default()));
            registry.register("sink", &sink);
            (SignalAdapter::new(cfg, registry).unwrap(), sink)
        };
        // quarter-turn per frame: (I, Q) spins through 90 degree steps
        let iq: Vec<i16> = vec![
            1000, 0, // theta = pi/2
            0, 1000, // theta = 0
            -1000, 0, // theta = -pi/2
            0, -1000, // theta = pi
        ];
        adapter.push_raw(&iq);
        adapter.drain(0.0);
        let out = sink.borrow().samples.clone();
        assert_eq!(out.len(), 4);
        // after the first (arbitrary start) sample, the delta is constant
        let expected = (48_000.0f32 / (2.0 * PI) / 75_000.0 * 32767.0 * (-PI / 2.0)).round() as i16;
        assert_eq!(&out[1..], &[expected, expected, expected]);
    }

    // ─── Kind toggling ───────────────────────────────────────────────

    #[test]
    fn only_int_fm_toggle_is_permitted() {
        let (mut adapter, _sink) = adapter_with_sink(int_cfg(48_000, 48_000, 2));
        assert!(adapter.set_output_kind(OutputKind::Int)); // no-op
        assert!(adapter.set_output_kind(OutputKind::Fm));
        assert_eq!(adapter.output_kind(), OutputKind::Fm);
        assert!(adapter.set_output_kind(OutputKind::Int));
        assert!(!adapter.set_output_kind(OutputKind::Spectrum));
        assert!(!adapter.set_output_kind(OutputKind::Float));
        assert_eq!(adapter.output_kind(), OutputKind::Int);
    }

    #[test]
    fn mono_int_adapter_cannot_become_fm() {
        let (mut adapter, _sink) = adapter_with_sink(int_cfg(48_000, 48_000, 1));
        assert!(!adapter.set_output_kind(OutputKind::Fm));
        assert_eq!(adapter.output_kind(), OutputKind::Int);
    }

    // ─── Float and Spectrum ──────────────────────────────────────────

    #[test]
    fn float_output_is_planar_and_normalized() {
        let cfg = AdapterConfig {
            rate: 48_000,
            hw_rate: 48_000,
            channels: 2,
            kind: OutputKind::Float,
            block_size: 4,
            step_size: 4,
            max_frames: 0,
            sink_label: "sink".into(),
        };
        let (mut adapter, sink) = adapter_with_sink(cfg);
        adapter.push_raw(&[32767, -32767, 32767, -32767, 0, 0, 32767, -32767]);
        adapter.drain(0.0);
        let blocks = sink.borrow().blocks.clone();
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].0, 0);
        assert_eq!(blocks[1].0, 1);
        assert!((blocks[0].1[0] - 1.0).abs() < 1e-6);
        assert!((blocks[1].1[0] + 1.0).abs() < 1e-6);
        assert_eq!(blocks[0].1[2], 0.0);
    }

    #[test]
    fn float_without_block_size_is_rejected() {
        let mut cfg = int_cfg(48_000, 48_000, 1);
        cfg.kind = OutputKind::Float;
        let err = SignalAdapter::new(cfg, SinkRegistry::new()).err();
        assert_eq!(err, Some(AdapterError::BlockRequired { kind: "Float" }));
    }

    #[test]
    fn spectrum_advances_by_step_keeping_overlap() {
        let cfg = AdapterConfig {
            rate: 48_000,
            hw_rate: 48_000,
            channels: 1,
            kind: OutputKind::Spectrum,
            block_size: 1024,
            step_size: 512,
            max_frames: 0,
            sink_label: "sink".into(),
        };
        let (mut adapter, sink) = adapter_with_sink(cfg);
        adapter.push_raw(&vec![100i16; 2048]);
        adapter.drain(0.0);
        // conversions fire while >= 1024 buffered: 2048 -> 1536 -> 1024 -> 512
        assert_eq!(sink.borrow().blocks.len(), 3);
        assert_eq!(adapter.buffered(), 512);
        // discardable totals step * channels per call, never a full block
        assert_eq!(2048 - adapter.buffered(), 3 * 512);
    }

    #[test]
    fn spectrum_of_dc_concentrates_in_bin_zero() {
        let cfg = AdapterConfig {
            rate: 48_000,
            hw_rate: 48_000,
            channels: 1,
            kind: OutputKind::Spectrum,
            block_size: 64,
            step_size: 64,
            max_frames: 0,
            sink_label: "sink".into(),
        };
        let (mut adapter, sink) = adapter_with_sink(cfg);
        adapter.push_raw(&vec![16384i16; 64]);
        adapter.drain(0.0);
        let blocks = sink.borrow().blocks.clone();
        assert_eq!(blocks.len(), 1);
        let spectrum = &blocks[0].1;
        assert_eq!(spectrum.len(), 66);
        // bin 0 is the windowed sum of the scaled input
        let scale = 16_384.0 / (32_767.0 * 8.0);
        let expected: f32 = hamming_window(64).iter().map(|w| w * scale).sum();
        assert!((spectrum[0] - expected).abs() < 1e-3);
        assert!(spectrum[1].abs() < 1e-3); // imaginary part of bin 0
        // window leakage aside, no other bin comes close to DC
        let dc = spectrum[0].abs();
        let max_rest = spectrum[2..]
            .chunks(2)
            .map(|c| (c[0] * c[0] + c[1] * c[1]).sqrt())
            .fold(0.0f32, f32::max);
        assert!(dc > 2.0 * max_rest, "dc {dc} rest {max_rest}");
    }

    #[test]
    fn high_factor_spectrum_block_fits_the_ring() {
        // block 1024 at factor 32 needs 32768 raw frames per conversion,
        // more than the default ring sizing
        let cfg = AdapterConfig {
            rate: 6_000,
            hw_rate: 192_000,
            channels: 1,
            kind: OutputKind::Spectrum,
            block_size: 1024,
            step_size: 0,
            max_frames: 0,
            sink_label: "sink".into(),
        };
        let (mut adapter, sink) = adapter_with_sink(cfg);
        let round = vec![50i16; 32_768];
        for _ in 0..5 {
            assert_eq!(adapter.push_raw(&round), round.len());
            adapter.drain(0.0);
        }
        let blocks = sink.borrow().blocks.clone();
        assert_eq!(blocks.len(), 5);
        assert_eq!(blocks[0].1.len(), 1026);
        assert_eq!(adapter.buffered(), 0);
    }

    #[test]
    fn int_block_larger_than_default_ring_still_flows() {
        let mut cfg = int_cfg(48_000, 48_000, 1);
        cfg.block_size = 30_000;
        let (mut adapter, sink) = adapter_with_sink(cfg);
        assert_eq!(adapter.push_raw(&vec![7i16; 30_000]), 30_000);
        adapter.drain(0.0);
        assert_eq!(sink.borrow().samples.len(), 30_000);
    }

    #[test]
    fn explicit_cap_below_one_block_is_rejected() {
        let cfg = AdapterConfig {
            rate: 48_000,
            hw_rate: 48_000,
            channels: 1,
            kind: OutputKind::Float,
            block_size: 1024,
            step_size: 0,
            max_frames: 512,
            sink_label: "sink".into(),
        };
        let err = SignalAdapter::new(cfg, SinkRegistry::new()).err();
        assert_eq!(
            err,
            Some(AdapterError::MaxFramesBelowBlock {
                max_frames: 512,
                required: 1024
            })
        );
    }

    #[test]
    fn shared_buffers_receive_data_without_copy() {
        let registry = SinkRegistry::new();
        let sink = Rc::new(RefCell::new(RecordingSink::default()));
        registry.register("sink", &sink);
        let buffers: SharedBuffers = Rc::new(RefCell::new(vec![vec![0.0f32; 4]]));
        let cfg = AdapterConfig {
            rate: 48_000,
            hw_rate: 48_000,
            channels: 1,
            kind: OutputKind::Float,
            block_size: 4,
            step_size: 4,
            max_frames: 0,
            sink_label: "sink".into(),
        };
        let mut adapter =
            SignalAdapter::with_shared_buffers(cfg, registry, buffers.clone()).unwrap();
        adapter.push_raw(&[32767, 0, -32767, 0]);
        adapter.drain(0.0);
        // the sink saw an empty slice (data already in place)...
        assert_eq!(sink.borrow().blocks, vec![(0, vec![])]);
        // ...and the shared buffer holds the converted block
        let bufs = buffers.borrow();
        assert!((bufs[0][0] - 1.0).abs() < 1e-6);
        assert!((bufs[0][2] + 1.0).abs() < 1e-6);
    }

    // ─── Timestamps ──────────────────────────────────────────────────

    #[test]
    fn per_call_timestamp_accounts_for_buffered_frames() {
        let (mut adapter, sink) = adapter_with_sink(int_cfg(48_000, 48_000, 1));
        adapter.push_raw(&[1; 480]);
        adapter.drain(100.0);
        let ts = sink.borrow().timestamps[0];
        // oldest of 480 buffered frames is 479 frame periods behind
        assert!((ts - (100.0 - 479.0 / 48_000.0)).abs() < 1e-9);
    }
}
