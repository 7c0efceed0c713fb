//! Lifecycle owner for one capture device.
//!
//! A [`DeviceMinder`] opens a device through a [`CaptureBackend`], exports
//! its poll descriptors to the external scheduler, and on readiness moves
//! captured frames into every attached [`SignalAdapter`] before handing
//! the driver's buffer back. All error handling is containment: a device
//! problem is reported on the diagnostic channel and the minder keeps
//! serving its other duties.

use std::collections::BTreeMap;

use serde::Serialize;

use pipit_foundation::{DeviceError, DiagnosticEvent, DiagnosticSender, PollRegen};

use crate::adapter::{DrainOutcome, SignalAdapter};
use crate::device::{
    negotiate_rate, Avail, CaptureBackend, CaptureHandle, DeviceRequest, PollFd, INPUT_READY,
};
use crate::{BUFFER_FRAMES, PERIOD_FRAMES};

/// Seconds a running device may stay silent before it is declared stalled.
pub const MAX_QUIET_SECS: f64 = 10.0;

/// What to do when a running device stops producing data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StallPolicy {
    /// Stop the device and wait for an explicit restart.
    #[default]
    StopAndWait,
    /// Close and reopen the device in place.
    Restart,
}

#[derive(Debug, Clone)]
pub struct MinderConfig {
    pub device_path: String,
    /// Label the minder is addressed by; also used in diagnostics.
    pub label: String,
    /// Requested capture rate, Hz. The granted rate may differ; see
    /// [`negotiate_rate`].
    pub rate: u32,
    pub channels: usize,
    pub stall_policy: StallPolicy,
}

/// Point-in-time status snapshot, serialized for the control layer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MinderStats {
    pub device: String,
    pub rate: u32,
    pub hw_rate: u32,
    pub channels: usize,
    pub running: bool,
    pub has_error: bool,
    pub total_frames: u64,
    pub start_timestamp: Option<f64>,
    pub stop_timestamp: Option<f64>,
}

pub struct DeviceMinder {
    label: String,
    device_path: String,
    requested_rate: u32,
    /// Rate adapters deliver at after decimation.
    rate: u32,
    hw_rate: u32,
    channels: usize,
    descriptor_count: usize,
    stall_policy: StallPolicy,
    backend: Box<dyn CaptureBackend>,
    /// Present while the device is open; dropped on stop to release it.
    handle: Option<Box<dyn CaptureHandle>>,
    adapters: BTreeMap<String, SignalAdapter>,
    should_be_running: bool,
    stopped: bool,
    has_error: bool,
    total_frames: u64,
    start_timestamp: Option<f64>,
    stop_timestamp: Option<f64>,
    last_data_received: Option<f64>,
    diagnostics: DiagnosticSender,
    regen: PollRegen,
}

impl DeviceMinder {
    /// Open the device and negotiate parameters. Opening is atomic: on
    /// any failure no minder exists and the device is released.
    pub fn open(
        cfg: MinderConfig,
        backend: Box<dyn CaptureBackend>,
        diagnostics: DiagnosticSender,
        regen: PollRegen,
    ) -> Result<Self, DeviceError> {
        let mut minder = Self {
            label: cfg.label,
            device_path: cfg.device_path,
            requested_rate: cfg.rate,
            rate: cfg.rate,
            hw_rate: cfg.rate,
            channels: cfg.channels,
            descriptor_count: 0,
            stall_policy: cfg.stall_policy,
            backend,
            handle: None,
            adapters: BTreeMap::new(),
            should_be_running: false,
            stopped: true,
            has_error: false,
            total_frames: 0,
            start_timestamp: None,
            stop_timestamp: None,
            last_data_received: None,
            diagnostics,
            regen,
        };
        minder.open_handle()?;
        Ok(minder)
    }

    fn open_handle(&mut self) -> Result<(), DeviceError> {
        let request = DeviceRequest {
            path: self.device_path.clone(),
            channels: self.channels,
            rate: self.requested_rate,
            period_frames: PERIOD_FRAMES,
            buffer_frames: BUFFER_FRAMES,
        };
        let handle = self.backend.open(&request)?;
        let params = handle.params();
        self.hw_rate = params.hw_rate;
        self.rate = negotiate_rate(self.requested_rate, params.hw_rate);
        self.descriptor_count = params.descriptor_count;
        self.handle = Some(handle);
        tracing::info!(
            device = %self.label,
            hw_rate = self.hw_rate,
            rate = self.rate,
            period = params.period_frames,
            "device opened"
        );
        Ok(())
    }

    /// Begin capturing. Reopens the device if a previous stop released it.
    pub fn start(&mut self, now: f64) -> Result<(), DeviceError> {
        self.should_be_running = true;
        self.do_start(now)
    }

    fn do_start(&mut self, now: f64) -> Result<(), DeviceError> {
        if self.handle.is_none() {
            self.open_handle()?;
        }
        self.regen.request();
        let h = self.handle.as_mut().ok_or_else(|| DeviceError::NotOpen {
            device: self.label.clone(),
        })?;
        h.prepare()?;
        self.has_error = false;
        h.start_stream()?;
        self.stopped = false;
        self.start_timestamp = Some(now);
        self.last_data_received = Some(now);
        tracing::info!(device = %self.label, "capture started");
        Ok(())
    }

    /// Stop capturing and release the device. Idempotent.
    pub fn stop(&mut self, now: f64) {
        self.should_be_running = false;
        self.do_stop(now);
    }

    fn do_stop(&mut self, now: f64) {
        if self.handle.is_some() {
            self.regen.request();
            self.handle = None;
        }
        if !self.stopped {
            self.stop_timestamp = Some(now);
            self.stopped = true;
            tracing::info!(device = %self.label, "capture stopped");
        }
    }

    /// Descriptors this minder wants polled right now. Zero while stopped,
    /// so a stopped device costs the scheduler nothing.
    pub fn descriptor_count(&self) -> usize {
        if self.should_be_running && self.handle.is_some() {
            self.descriptor_count
        } else {
            0
        }
    }

    /// Fill `fds` (`fds.len() == descriptor_count()`) with this device's
    /// descriptors. A failure is reported as a diagnostic and leaves the
    /// descriptors unset; the caller should skip this minder for the round.
    pub fn fill_descriptors(&mut self, fds: &mut [PollFd]) -> bool {
        let Some(h) = self.handle.as_mut() else {
            return false;
        };
        match h.fill_descriptors(fds) {
            Ok(()) => true,
            Err(err) => {
                self.has_error = true;
                self.diagnostics.emit(DiagnosticEvent::DeviceProblem {
                    device: self.label.clone(),
                    detail: format!("descriptor query failed: {err}"),
                });
                false
            }
        }
    }

    /// Service one poll round. `fds` holds this minder's descriptors as
    /// returned by the scheduler; `timed_out` means the poll expired with
    /// no readiness anywhere, which is when stall detection runs.
    pub fn handle_readiness(
        &mut self,
        fds: &[PollFd],
        timed_out: bool,
        now: f64,
    ) -> Result<(), DeviceError> {
        if timed_out {
            self.check_stall(now);
            return Ok(());
        }
        let Some(h) = self.handle.as_mut() else {
            return Ok(());
        };
        let revents = h.revents(fds)?;
        if revents & INPUT_READY == 0 {
            self.check_stall(now);
            return Ok(());
        }

        let avail = match h.avail_update() {
            Avail::Overrun => {
                tracing::warn!(device = %self.label, "capture overrun, recovering");
                if let Err(err) = Self::recover_stream(h) {
                    self.has_error = true;
                    self.diagnostics.emit(DiagnosticEvent::DeviceProblem {
                        device: self.label.clone(),
                        detail: format!("overrun recovery failed: {err}"),
                    });
                } else {
                    self.has_error = false;
                    self.start_timestamp = Some(now);
                    self.last_data_received = Some(now);
                }
                return Ok(());
            }
            Avail::Frames(0) => {
                self.check_stall(now);
                return Ok(());
            }
            Avail::Frames(n) => n,
        };
        self.last_data_received = Some(now);

        // The period timestamp marks when `ref_frames` frames were
        // available; extrapolate to the newest frame now waiting.
        let (ref_frames, period_ts) = h.period_timestamp();
        let frame_ts =
            period_ts + (avail as f64 - ref_frames as f64) / self.hw_rate as f64;

        let granted = match h.begin_access(avail) {
            Ok(slice) => slice,
            Err(err) => {
                self.has_error = true;
                self.diagnostics.emit(DiagnosticEvent::DeviceProblem {
                    device: self.label.clone(),
                    detail: format!("buffer access failed: {err}"),
                });
                return Ok(());
            }
        };
        let granted_frames = granted.len() / self.channels;
        self.total_frames += granted_frames as u64;
        for adapter in self.adapters.values_mut() {
            let take = adapter.free().min(granted.len());
            adapter.push_raw(&granted[..take]);
        }
        if let Err(err) = h.commit(granted_frames) {
            self.has_error = true;
            self.diagnostics.emit(DiagnosticEvent::DeviceProblem {
                device: self.label.clone(),
                detail: format!("buffer commit failed: {err}"),
            });
        }

        let mut gone = Vec::new();
        for (label, adapter) in self.adapters.iter_mut() {
            if adapter.drain(frame_ts) == DrainOutcome::SinkGone {
                gone.push(label.clone());
            }
        }
        for label in gone {
            tracing::debug!(device = %self.label, sink = %label, "sink gone, adapter removed");
            self.adapters.remove(&label);
        }
        Ok(())
    }

    fn recover_stream(h: &mut Box<dyn CaptureHandle>) -> Result<(), DeviceError> {
        h.recover()?;
        h.prepare()?;
        h.start_stream()
    }

    /// Stall detection: a device meant to be running that has delivered
    /// nothing for [`MAX_QUIET_SECS`] gets exactly one stall event per
    /// quiet stretch, then the configured policy is applied.
    fn check_stall(&mut self, now: f64) {
        if !self.should_be_running || self.stopped {
            return;
        }
        let Some(last) = self.last_data_received else {
            return;
        };
        let quiet = now - last;
        if quiet <= MAX_QUIET_SECS {
            return;
        }
        self.last_data_received = Some(now);
        self.diagnostics.emit(DiagnosticEvent::DeviceStalled {
            device: self.label.clone(),
            detail: format!("no data received for {quiet:.1} s"),
        });
        match self.stall_policy {
            StallPolicy::StopAndWait => self.stop(now),
            StallPolicy::Restart => {
                self.do_stop(now);
                if let Err(err) = self.do_start(now) {
                    self.has_error = true;
                    self.diagnostics.emit(DiagnosticEvent::DeviceProblem {
                        device: self.label.clone(),
                        detail: format!("restart after stall failed: {err}"),
                    });
                }
            }
        }
    }

    /// Attach an adapter under `label`, replacing any previous one.
    pub fn add_adapter(&mut self, label: impl Into<String>, adapter: SignalAdapter) {
        self.adapters.insert(label.into(), adapter);
    }

    pub fn remove_adapter(&mut self, label: &str) -> bool {
        self.adapters.remove(label).is_some()
    }

    pub fn adapter_count(&self) -> usize {
        self.adapters.len()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Delivery rate after decimation, Hz.
    pub fn rate(&self) -> u32 {
        self.rate
    }

    /// Native hardware capture rate, Hz.
    pub fn hw_rate(&self) -> u32 {
        self.hw_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }

    pub fn should_be_running(&self) -> bool {
        self.should_be_running
    }

    pub fn stats(&self) -> MinderStats {
        MinderStats {
            device: self.label.clone(),
            rate: self.rate,
            hw_rate: self.hw_rate,
            channels: self.channels,
            running: !self.stopped,
            has_error: self.has_error,
            total_frames: self.total_frames,
            start_timestamp: self.start_timestamp,
            stop_timestamp: self.stop_timestamp,
        }
    }

    /// One-line human summary.
    pub fn about(&self) -> String {
        format!(
            "{}: {} ch @ {} Hz (hw {} Hz), {}, {} frames",
            self.label,
            self.channels,
            self.rate,
            self.hw_rate,
            if self.stopped { "stopped" } else { "running" },
            self.total_frames
        )
    }
}
