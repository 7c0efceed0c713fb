//! Capture-to-consumer data path: the device minder owns the hardware
//! capture handle and fans raw interleaved samples out to per-consumer
//! ring buffers; each signal adapter drains its buffer in lockstep with
//! its consumer's block size, converting on the way (downsampling, float
//! conversion, windowed spectrum, FM demodulation).
//!
//! The whole path runs on one thread, driven by an external poll loop
//! through [`DeviceMinder::handle_readiness`].

pub mod adapter;
pub mod device;
pub mod minder;
pub mod ring;

// Public API
pub use adapter::{AdapterConfig, DrainOutcome, OutputKind, SharedBuffers, SignalAdapter};
pub use device::{negotiate_rate, Avail, CaptureBackend, CaptureHandle, DeviceRequest, NegotiatedParams, PollFd};
pub use minder::{DeviceMinder, MinderConfig, MinderStats, StallPolicy};
pub use ring::SampleRing;

/// Period size hint passed to the device, in frames. 20 periods per second
/// at 192 kHz, 5 at 48 kHz.
pub const PERIOD_FRAMES: usize = 9600;

/// Buffer size hint passed to the device, in frames.
pub const BUFFER_FRAMES: usize = 131_072;

/// Hamming window coefficients for a window of length `n`.
pub fn hamming_window(n: usize) -> Vec<f32> {
    use std::f32::consts::PI;
    (0..n)
        .map(|i| 0.54 - 0.46 * (2.0 * PI * i as f32 / (n as f32 - 1.0)).cos())
        .collect()
}
