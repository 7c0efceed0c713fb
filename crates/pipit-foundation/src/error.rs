use thiserror::Error;

/// Errors from the capture-device side: opening, descriptor handling, and
/// the zero-copy access path. Construction-time failures are fatal to the
/// object being built; everything else is scoped to a single poll cycle.
#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("could not open capture device {path}: {detail}")]
    Open { path: String, detail: String },

    #[error("device {device} is not open")]
    NotOpen { device: String },

    #[error("descriptor query failed for {device}: {detail}")]
    Descriptors { device: String, detail: String },

    #[error("descriptor readiness resolution failed for {device}")]
    DescriptorResolution { device: String },

    #[error("buffer access failed for {device}: {detail}")]
    Access { device: String, detail: String },

    #[error("commit to driver failed for {device}: {detail}")]
    Commit { device: String, detail: String },

    #[error("recovery failed for {device}: {detail}")]
    Recover { device: String, detail: String },

    #[error("could not start capture on {device}: {detail}")]
    Start { device: String, detail: String },
}

/// Signal-adapter configuration errors, raised at construction only.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AdapterError {
    #[error("delivery rate {rate} Hz is invalid for hardware rate {hw_rate} Hz")]
    InvalidRate { rate: u32, hw_rate: u32 },

    #[error("FM demodulation requires exactly two channels, got {channels}")]
    FmChannels { channels: usize },

    #[error("{kind} output requires a nonzero block size")]
    BlockRequired { kind: &'static str },

    #[error("max_frames {max_frames} cannot cover one block of {required} raw frames")]
    MaxFramesBelowBlock { max_frames: usize, required: usize },
}

/// Analysis-runner construction failures. No partially-built runner ever
/// survives any of these.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("plugin {key} not found")]
    PluginNotFound { key: String },

    #[error("plugin {key} supports {min}..={max} channels, {requested} requested")]
    ChannelMismatch {
        key: String,
        min: usize,
        max: usize,
        requested: usize,
    },

    #[error("plugin {key} has no output named {output:?}")]
    OutputNotFound { key: String, output: String },

    #[error("plugin {key} failed to initialise")]
    InitFailed { key: String },
}
