use crate::frame::FrameFormat;
use crate::sdk::SdkStatus;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ThermcamError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Sensor SDK error during {operation}: {status}")]
    Sdk {
        operation: &'static str,
        status: SdkStatus,
    },

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("System error: {message}")]
    System { message: String },
}

impl ThermcamError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn sdk(operation: &'static str, status: SdkStatus) -> Self {
        Self::Sdk { operation, status }
    }
}

/// Failures that abort a camera session operation
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("failed to register frame callback: {0}")]
    RegisterFrameSink(SdkStatus),

    #[error("failed to set image pipeline mode: {0}")]
    PipelineMode(SdkStatus),

    #[error("failed to start capture session: {0}")]
    CaptureStart(SdkStatus),

    #[error("failed to stop capture session: {0}")]
    CaptureStop(SdkStatus),

    #[error("failed to trigger shutter: {0}")]
    ShutterTrigger(SdkStatus),

    #[error("camera session for '{device}' is not connected")]
    NotConnected { device: String },
}

impl SessionError {
    /// Vendor status behind the failure, if any
    pub fn status(&self) -> Option<&SdkStatus> {
        match self {
            SessionError::RegisterFrameSink(status)
            | SessionError::PipelineMode(status)
            | SessionError::CaptureStart(status)
            | SessionError::CaptureStop(status)
            | SessionError::ShutterTrigger(status) => Some(status),
            SessionError::NotConnected { .. } => None,
        }
    }
}

/// Failures while opening or configuring a sink device
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("frame format {format:?} has no sink pixel format")]
    UnsupportedFormat { format: FrameFormat },

    #[error("Error opening v4l2 device '{}': {source}", device.display())]
    Open {
        device: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{operation} error on device with path '{}': {source}", device.display())]
    Format {
        device: PathBuf,
        operation: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("frame geometry {width}x{height} exceeds the sink size limit")]
    Geometry { width: u32, height: u32 },

    #[error("v4l2 sinks are not supported on this platform")]
    Unsupported,
}

pub type Result<T> = std::result::Result<T, ThermcamError>;
