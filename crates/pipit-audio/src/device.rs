//! Capability contract for the hardware capture collaborator.
//!
//! The minder consumes the hardware through these traits only: the real
//! backend (an ALSA-style mmap capture device) lives with the control
//! layer, and tests drive the minder with scripted fakes. The contract
//! mirrors what capture hardware actually offers: parameter negotiation at
//! open, poll descriptors, an available-frames query that can report
//! overrun, a zero-copy view of the driver's internal ring, and per-period
//! hardware timestamps.

use pipit_foundation::DeviceError;

/// Poll descriptor type shared with the external scheduler. One logical
/// device may require more than one descriptor.
pub type PollFd = libc::pollfd;

/// Readiness bits meaning "captured data is waiting".
pub const INPUT_READY: libc::c_short = libc::POLLIN | libc::POLLPRI;

/// Parameters requested at open. Period/buffer sizes are hints only; the
/// device's answers are authoritative and must be accepted.
#[derive(Debug, Clone)]
pub struct DeviceRequest {
    pub path: String,
    /// Interleaved 16-bit capture at this many channels.
    pub channels: usize,
    /// Rate the caller would like; the device answers with the nearest
    /// natively supported rate.
    pub rate: u32,
    pub period_frames: usize,
    pub buffer_frames: usize,
}

/// What the device actually granted.
#[derive(Debug, Clone, Copy)]
pub struct NegotiatedParams {
    /// Native hardware rate nearest the requested rate.
    pub hw_rate: u32,
    pub period_frames: usize,
    pub buffer_frames: usize,
    pub descriptor_count: usize,
}

/// Result of the available-frames query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Avail {
    /// Driver reported an overrun; the stream needs recovery.
    Overrun,
    Frames(usize),
}

/// Opens capture handles. Implementations negotiate, in order: interleaved
/// zero-copy access, signed 16-bit samples, the requested channel count,
/// the nearest supported rate, then period/buffer size hints; they enable
/// per-period timestamping and pin the stop threshold at the boundary so
/// the driver never auto-stops on ring overrun.
pub trait CaptureBackend {
    fn open(&self, request: &DeviceRequest) -> Result<Box<dyn CaptureHandle>, DeviceError>;
}

/// An open capture stream. Dropping the handle drops and closes the
/// underlying device.
pub trait CaptureHandle {
    fn params(&self) -> NegotiatedParams;

    /// Write this device's descriptor(s) into `fds`
    /// (`fds.len() == descriptor_count`).
    fn fill_descriptors(&self, fds: &mut [PollFd]) -> Result<(), DeviceError>;

    /// Resolve the actual readiness bits for this device's descriptors.
    fn revents(&mut self, fds: &[PollFd]) -> Result<libc::c_short, DeviceError>;

    fn prepare(&mut self) -> Result<(), DeviceError>;

    fn start_stream(&mut self) -> Result<(), DeviceError>;

    /// Frames captured and waiting, or `Overrun`.
    fn avail_update(&mut self) -> Avail;

    /// Most recent per-period hardware timestamp: `(frames_at_ts, ts)`
    /// where `ts` (seconds) is the time at which `frames_at_ts` frames
    /// were available.
    fn period_timestamp(&mut self) -> (usize, f64);

    /// Zero-copy view of up to `max_frames` captured frames as interleaved
    /// samples. The driver may grant fewer frames than requested; the
    /// returned slice length (a whole-frame multiple) is authoritative.
    fn begin_access(&mut self, max_frames: usize) -> Result<&[i16], DeviceError>;

    /// Hand the viewed region back to the driver, marking `frames` frames
    /// consumed.
    fn commit(&mut self, frames: usize) -> Result<(), DeviceError>;

    /// Recover from an overrun.
    fn recover(&mut self) -> Result<(), DeviceError>;
}

/// Decimation-aware rate negotiation.
///
/// With `hw` the device's nearest supported rate: if `hw` exceeds the
/// request but is not an exact multiple, fall to `hw / round(hw/request)`
/// (the closest integer decimation ratio, an exact divisor of `hw`); if
/// the request exceeds `hw`, clamp to `hw`; otherwise keep the request.
pub fn negotiate_rate(requested: u32, hw: u32) -> u32 {
    if requested == 0 {
        return hw;
    }
    if hw > requested && hw % requested != 0 {
        let ratio = (hw as f64 / requested as f64).round() as u32;
        hw / ratio.max(1)
    } else if requested > hw {
        hw
    } else {
        requested
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_divisor_is_kept() {
        assert_eq!(negotiate_rate(48_000, 192_000), 48_000);
    }

    #[test]
    fn inexact_request_falls_to_nearest_decimation() {
        // round(192000 / 50000) = 4 -> 48000
        assert_eq!(negotiate_rate(50_000, 192_000), 48_000);
    }

    #[test]
    fn request_above_hardware_is_clamped() {
        assert_eq!(negotiate_rate(96_000, 48_000), 48_000);
    }

    #[test]
    fn matching_rates_pass_through() {
        assert_eq!(negotiate_rate(48_000, 48_000), 48_000);
    }
}
