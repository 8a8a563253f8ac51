use super::{SinkFormat, SinkOpener, SinkWriter};
use crate::error::SinkError;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Opens v4l2loopback output devices
#[derive(Debug, Default, Clone, Copy)]
pub struct V4l2LoopbackOpener;

impl V4l2LoopbackOpener {
    pub fn new() -> Self {
        Self
    }
}

/// Open v4l2 output device
pub struct V4l2Sink {
    path: PathBuf,
    // Holds the negotiated output format for as long as frames are written
    #[cfg(target_os = "linux")]
    _device: v4l::Device,
    file: File,
}

impl SinkWriter for V4l2Sink {
    fn write_frame(&mut self, data: &[u8]) -> io::Result<usize> {
        self.file.write(data)
    }
}

impl Drop for V4l2Sink {
    fn drop(&mut self) {
        info!("Closed v4l2 device with path '{}'", self.path.display());
    }
}

#[cfg(target_os = "linux")]
impl SinkOpener for V4l2LoopbackOpener {
    fn open(
        &self,
        device: &Path,
        format: SinkFormat,
        width: u32,
        height: u32,
    ) -> Result<Box<dyn SinkWriter>, SinkError> {
        use std::fs::OpenOptions;
        use v4l::video::Output;

        let open_error = |source| SinkError::Open {
            device: device.to_path_buf(),
            source,
        };
        let format_error = |operation, source| SinkError::Format {
            device: device.to_path_buf(),
            operation,
            source,
        };

        let v4l_device = v4l::Device::with_path(device).map_err(open_error)?;

        let mut output = Output::format(&v4l_device)
            .map_err(|source| format_error("VIDIOC_G_FMT", source))?;
        output.width = width;
        output.height = height;
        output.fourcc = v4l::FourCC::new(format.fourcc());
        output.stride = format.line_size(width)?;
        output.size = format.frame_size(width, height)?;

        let output = Output::set_format(&v4l_device, &output)
            .map_err(|source| format_error("VIDIOC_S_FMT", source))?;

        let file = OpenOptions::new()
            .write(true)
            .open(device)
            .map_err(open_error)?;

        info!(
            "Opened v4l2 device with path '{}' ({}x{}, {})",
            device.display(),
            output.width,
            output.height,
            output.fourcc
        );

        Ok(Box::new(V4l2Sink {
            path: device.to_path_buf(),
            _device: v4l_device,
            file,
        }))
    }
}

#[cfg(not(target_os = "linux"))]
impl SinkOpener for V4l2LoopbackOpener {
    fn open(
        &self,
        _device: &Path,
        _format: SinkFormat,
        _width: u32,
        _height: u32,
    ) -> Result<Box<dyn SinkWriter>, SinkError> {
        tracing::warn!("v4l2 is not supported on this platform");
        Err(SinkError::Unsupported)
    }
}
