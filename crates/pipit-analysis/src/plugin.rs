//! Capability contract for analysis plugins.
//!
//! The host cares only about this surface: how a plugin wants its input
//! shaped, what outputs it declares, and the features it emits. Loading
//! real shared-library plugins is the concern of whoever implements
//! [`PluginLoader`]; tests implement it with hand-written plugins.

use std::collections::BTreeMap;
use std::fmt;

/// Most channels any runner will feed a plugin, whatever the plugin
/// itself claims to accept.
pub const MAX_CHANNELS: usize = 16;

/// Parameter name that tells a plugin it is running inside a batch host
/// rather than an interactive one. Set to 1 after loading; plugins that
/// do not know the name ignore it.
pub const BATCH_HOST_PARAM: &str = "__batch_host__";

/// Identifies a plugin: shared-library name plus the identifier it
/// registers under.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct PluginKey {
    pub library: String,
    pub identifier: String,
}

impl PluginKey {
    pub fn new(library: impl Into<String>, identifier: impl Into<String>) -> Self {
        Self {
            library: library.into(),
            identifier: identifier.into(),
        }
    }
}

impl fmt::Display for PluginKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.library, self.identifier)
    }
}

/// How a plugin wants its per-channel input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputDomain {
    Time,
    /// The host windows each block before handing it over; the plugin
    /// performs its own transform.
    Frequency,
}

/// One output a plugin declares.
#[derive(Debug, Clone)]
pub struct OutputDescriptor {
    pub identifier: String,
    pub name: String,
    /// Emit this output's feature values as raw little-endian f32 bytes
    /// instead of text records.
    pub binary: bool,
}

/// One emitted feature: an optional time anchor plus values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Feature {
    pub timestamp: Option<f64>,
    pub duration: Option<f64>,
    pub values: Vec<f32>,
}

/// Features grouped by output index.
pub type FeatureSet = BTreeMap<usize, Vec<Feature>>;

/// Plugin parameters by name.
pub type ParamSet = BTreeMap<String, f32>;

/// A loaded analysis plugin.
pub trait AnalysisPlugin {
    fn input_domain(&self) -> InputDomain;

    /// Inclusive (min, max) channel counts the plugin accepts.
    fn channel_range(&self) -> (usize, usize);

    /// Preferred block size in frames; 0 means no preference.
    fn preferred_block_size(&self) -> usize;

    /// Preferred step size in frames; 0 means no preference.
    fn preferred_step_size(&self) -> usize;

    fn outputs(&self) -> Vec<OutputDescriptor>;

    /// Unknown names are ignored.
    fn set_parameter(&mut self, _name: &str, _value: f32) {}

    /// Returns false when the plugin rejects the configuration.
    fn initialise(&mut self, channels: usize, step_size: usize, block_size: usize) -> bool;

    /// One block of per-channel input, stamped with the capture time of
    /// its first frame.
    fn process(&mut self, buffers: &[&[f32]], timestamp: f64) -> FeatureSet;

    /// Features the plugin held back, collected when the stream ends.
    fn remaining_features(&mut self) -> FeatureSet {
        FeatureSet::new()
    }
}

/// Resolves plugin keys to loaded plugins at the given input rate.
pub trait PluginLoader {
    fn load(&self, key: &PluginKey, rate: f32) -> Option<Box<dyn AnalysisPlugin>>;
}
