//! Hosts one analysis plugin over one device's float stream.
//!
//! An [`AnalysisRunner`] is a [`Sink`]: a Float-kind signal adapter
//! delivers per-channel blocks into buffers the two share, the runner
//! counts arrivals, and on the last channel of each slice it runs the
//! plugin and fans the resulting features out to weakly held output
//! sinks as text records or raw bytes.

use std::cell::RefCell;
use std::rc::Rc;

use serde::Serialize;

use pipit_audio::{hamming_window, AdapterConfig, OutputKind, SharedBuffers};
use pipit_foundation::{AnalysisError, Sink, SinkRegistry, WeakSink};

use crate::plugin::{
    AnalysisPlugin, Feature, FeatureSet, InputDomain, ParamSet, PluginKey, PluginLoader,
    BATCH_HOST_PARAM, MAX_CHANNELS,
};

/// Block size used when neither the caller nor the plugin has a
/// preference.
pub const DEFAULT_BLOCK_SIZE: usize = 1024;

#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Label the runner is addressed by and prefixes its records with.
    pub label: String,
    /// Label of the device feeding this runner.
    pub device: String,
    pub key: PluginKey,
    /// Identifier of the plugin output to emit.
    pub output: String,
    /// Rate of the adapted stream, Hz.
    pub rate: u32,
    /// Hardware rate behind it, Hz.
    pub hw_rate: u32,
    pub channels: usize,
    /// Frames per plugin invocation; 0 falls back to the plugin's
    /// preference, then to [`DEFAULT_BLOCK_SIZE`].
    pub block_size: usize,
    /// Frames the stream advances per invocation; 0 falls back to the
    /// plugin's preference, then to the block size. A step beyond the
    /// block widens the block to match.
    pub step_size: usize,
    pub params: ParamSet,
}

/// Point-in-time status snapshot, serialized for the control layer.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerStats {
    pub label: String,
    pub device: String,
    pub plugin: String,
    pub output: String,
    pub rate: u32,
    pub channels: usize,
    pub block_size: usize,
    pub step_size: usize,
    pub total_frames: u64,
    pub total_features: u64,
    pub output_sinks: usize,
}

pub struct AnalysisRunner {
    label: String,
    device: String,
    key: PluginKey,
    output_identifier: String,
    output_index: usize,
    output_binary: bool,
    rate: u32,
    hw_rate: u32,
    channels: usize,
    block_size: usize,
    step_size: usize,
    plugin: Box<dyn AnalysisPlugin>,
    /// Shared with the feeding adapter; blocks land here without a copy.
    buffers: SharedBuffers,
    /// Present for frequency-domain plugins, applied to each channel
    /// before `process`.
    window: Option<Vec<f32>>,
    /// Channels arrived for the slice in flight.
    arrived: usize,
    pending_ts: f64,
    outputs: Vec<(String, WeakSink)>,
    registry: SinkRegistry,
    total_frames: u64,
    total_features: u64,
}

impl AnalysisRunner {
    /// Load and configure the plugin. Construction is atomic: any failure
    /// in the load / channel-range / output / initialise chain leaves no
    /// runner behind.
    pub fn new(
        cfg: RunnerConfig,
        loader: &dyn PluginLoader,
        registry: SinkRegistry,
    ) -> Result<Self, AnalysisError> {
        let mut plugin =
            loader
                .load(&cfg.key, cfg.rate as f32)
                .ok_or_else(|| AnalysisError::PluginNotFound {
                    key: cfg.key.to_string(),
                })?;

        let (min, max) = plugin.channel_range();
        let max = max.min(MAX_CHANNELS);
        if cfg.channels < min || cfg.channels > max {
            return Err(AnalysisError::ChannelMismatch {
                key: cfg.key.to_string(),
                min,
                max,
                requested: cfg.channels,
            });
        }

        let (output_index, output_binary) = plugin
            .outputs()
            .iter()
            .enumerate()
            .find(|(_, o)| o.identifier == cfg.output)
            .map(|(i, o)| (i, o.binary))
            .ok_or_else(|| AnalysisError::OutputNotFound {
                key: cfg.key.to_string(),
                output: cfg.output.clone(),
            })?;

        let mut block_size = if cfg.block_size > 0 {
            cfg.block_size
        } else if plugin.preferred_block_size() > 0 {
            plugin.preferred_block_size()
        } else {
            DEFAULT_BLOCK_SIZE
        };
        let step_size = if cfg.step_size > 0 {
            cfg.step_size
        } else if plugin.preferred_step_size() > 0 {
            plugin.preferred_step_size()
        } else {
            block_size
        };
        if step_size > block_size {
            block_size = step_size;
        }

        for (name, value) in &cfg.params {
            plugin.set_parameter(name, *value);
        }

        if !plugin.initialise(cfg.channels, step_size, block_size) {
            return Err(AnalysisError::InitFailed {
                key: cfg.key.to_string(),
            });
        }
        // Marked only once the plugin is fully up; an interactive host
        // never sets this.
        plugin.set_parameter(BATCH_HOST_PARAM, 1.0);

        let frequency = plugin.input_domain() == InputDomain::Frequency;
        let buf_len = block_size + if frequency { 2 } else { 0 };
        let window = frequency.then(|| hamming_window(block_size));
        let buffers: SharedBuffers =
            Rc::new(RefCell::new(vec![vec![0.0; buf_len]; cfg.channels]));

        tracing::info!(
            runner = %cfg.label,
            plugin = %cfg.key,
            output = %cfg.output,
            block = block_size,
            step = step_size,
            "analysis runner ready"
        );

        Ok(Self {
            label: cfg.label,
            device: cfg.device,
            key: cfg.key,
            output_identifier: cfg.output,
            output_index,
            output_binary,
            rate: cfg.rate,
            hw_rate: cfg.hw_rate,
            channels: cfg.channels,
            block_size,
            step_size,
            plugin,
            buffers,
            window,
            arrived: 0,
            pending_ts: 0.0,
            outputs: Vec::new(),
            registry,
            total_frames: 0,
            total_features: 0,
        })
    }

    /// Configuration for the Float-kind adapter that feeds this runner.
    /// Pair it with [`AnalysisRunner::buffers`] via
    /// `SignalAdapter::with_shared_buffers`.
    pub fn adapter_config(&self) -> AdapterConfig {
        AdapterConfig {
            rate: self.rate,
            hw_rate: self.hw_rate,
            channels: self.channels,
            kind: OutputKind::Float,
            block_size: self.block_size,
            step_size: self.step_size,
            max_frames: 0,
            sink_label: self.label.clone(),
        }
    }

    /// The per-channel buffers shared with the feeding adapter.
    pub fn buffers(&self) -> SharedBuffers {
        self.buffers.clone()
    }

    /// Attach an output sink by registry label, held weakly. Returns
    /// false when the label does not currently resolve.
    pub fn add_output_sink(&mut self, label: &str) -> bool {
        match self.registry.resolve_weak(label) {
            Some(weak) => {
                self.outputs.push((label.to_string(), weak));
                true
            }
            None => false,
        }
    }

    pub fn remove_output_sink(&mut self, label: &str) -> bool {
        let before = self.outputs.len();
        self.outputs.retain(|(l, _)| l != label);
        self.outputs.len() != before
    }

    pub fn remove_all_output_sinks(&mut self) {
        self.outputs.clear();
    }

    pub fn output_sink_count(&self) -> usize {
        self.outputs.len()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn total_features(&self) -> u64 {
        self.total_features
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames
    }

    /// Collect and dispatch whatever the plugin held back. Call once when
    /// the stream ends.
    pub fn finish(&mut self) {
        let remaining = self.plugin.remaining_features();
        self.dispatch(remaining);
    }

    pub fn stats(&self) -> RunnerStats {
        RunnerStats {
            label: self.label.clone(),
            device: self.device.clone(),
            plugin: self.key.to_string(),
            output: self.output_identifier.clone(),
            rate: self.rate,
            channels: self.channels,
            block_size: self.block_size,
            step_size: self.step_size,
            total_frames: self.total_frames,
            total_features: self.total_features,
            output_sinks: self.outputs.len(),
        }
    }

    /// Run the plugin on the slice now sitting in the buffers.
    fn process_slice(&mut self) {
        let ts = self.pending_ts;
        let set = {
            let mut bufs = self.buffers.borrow_mut();
            if let Some(window) = &self.window {
                for buf in bufs.iter_mut() {
                    for (s, w) in buf.iter_mut().zip(window.iter()) {
                        *s *= w;
                    }
                }
            }
            let slices: Vec<&[f32]> = bufs.iter().map(|b| b.as_slice()).collect();
            self.plugin.process(&slices, ts)
        };
        self.total_frames += self.step_size as u64;
        self.dispatch(set);
    }

    fn dispatch(&mut self, mut set: FeatureSet) {
        let Some(features) = set.remove(&self.output_index) else {
            return;
        };
        if features.is_empty() {
            return;
        }
        self.total_features += features.len() as u64;
        let label = &self.label;
        let binary = self.output_binary;
        self.outputs.retain(|(sink_label, weak)| {
            let Some(sink) = weak.upgrade() else {
                tracing::debug!(runner = %label, sink = %sink_label, "output sink gone, pruned");
                return false;
            };
            let mut sink = sink.borrow_mut();
            for feature in &features {
                if binary {
                    let mut bytes = Vec::with_capacity(feature.values.len() * 4);
                    for v in &feature.values {
                        bytes.extend_from_slice(&v.to_le_bytes());
                    }
                    sink.deliver_bytes(&bytes);
                } else {
                    sink.deliver_text(&format_feature(label, feature));
                }
            }
            true
        });
    }
}

impl Sink for AnalysisRunner {
    /// One channel of one slice has landed (in the shared buffers when
    /// `block` is empty). The plugin runs once the last channel arrives.
    fn deliver_channel(&mut self, channel: usize, block: &[f32], timestamp: f64) {
        if channel >= self.channels {
            return;
        }
        if !block.is_empty() {
            let mut bufs = self.buffers.borrow_mut();
            let n = block.len().min(bufs[channel].len());
            bufs[channel][..n].copy_from_slice(&block[..n]);
        }
        if self.arrived == 0 {
            self.pending_ts = timestamp;
        }
        self.arrived += 1;
        if self.arrived < self.channels {
            return;
        }
        self.arrived = 0;
        self.process_slice();
    }
}

/// `label,timestamp[,duration][,value...]` with times at four decimal
/// places. A feature without its own timestamp formats as 0.0000.
fn format_feature(label: &str, feature: &Feature) -> String {
    use std::fmt::Write;
    let mut line = format!("{label},{:.4}", feature.timestamp.unwrap_or(0.0));
    if let Some(duration) = feature.duration {
        let _ = write!(line, ",{duration:.4}");
    }
    for value in &feature.values {
        let _ = write!(line, ",{value}");
    }
    line.push('\n');
    line
}
