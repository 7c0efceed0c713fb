//! Analysis-plugin hosting: the capability contract a plugin implements
//! and the runner that feeds one plugin from a device's float stream and
//! fans its features out to output sinks.

pub mod plugin;
pub mod runner;

// Public API
pub use plugin::{
    AnalysisPlugin, Feature, FeatureSet, InputDomain, OutputDescriptor, ParamSet, PluginKey,
    PluginLoader, BATCH_HOST_PARAM, MAX_CHANNELS,
};
pub use runner::{AnalysisRunner, RunnerConfig, RunnerStats, DEFAULT_BLOCK_SIZE};
