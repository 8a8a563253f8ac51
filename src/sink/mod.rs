mod memory;
mod v4l2;

pub use memory::{MemorySinkOpener, SinkOpenRecord};
pub use v4l2::V4l2LoopbackOpener;

use crate::error::SinkError;
use crate::frame::FrameFormat;
use std::io;
use std::path::Path;

/// Pixel format configured on a sink device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SinkFormat {
    /// Packed YUV 4:2:2
    Yuyv,
    /// 8-bit greyscale
    Grey,
    /// 16-bit RGB 5:6:5
    Rgb565,
    /// 32-bit BGRA in memory order
    Abgr32,
}

impl SinkFormat {
    /// Sink format that carries frames of `format` without conversion
    pub fn for_frame_format(format: FrameFormat) -> Result<Self, SinkError> {
        match format {
            FrameFormat::ColorYuy2 => Ok(SinkFormat::Yuyv),
            FrameFormat::Grayscale => Ok(SinkFormat::Grey),
            FrameFormat::ColorRgb565 => Ok(SinkFormat::Rgb565),
            FrameFormat::ColorArgb8888 => Ok(SinkFormat::Abgr32),
            _ => Err(SinkError::UnsupportedFormat { format }),
        }
    }

    /// V4L2 FourCC code
    pub fn fourcc(&self) -> &'static [u8; 4] {
        match self {
            SinkFormat::Yuyv => b"YUYV",
            SinkFormat::Grey => b"GREY",
            SinkFormat::Rgb565 => b"RGBP",
            SinkFormat::Abgr32 => b"AR24",
        }
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            SinkFormat::Grey => 1,
            SinkFormat::Yuyv | SinkFormat::Rgb565 => 2,
            SinkFormat::Abgr32 => 4,
        }
    }

    /// Bytes per line at the given width
    pub fn line_size(&self, width: u32) -> Result<u32, SinkError> {
        width
            .checked_mul(self.bytes_per_pixel())
            .ok_or(SinkError::Geometry { width, height: 1 })
    }

    /// Bytes per frame at the given geometry
    pub fn frame_size(&self, width: u32, height: u32) -> Result<u32, SinkError> {
        width
            .checked_mul(height)
            .and_then(|pixels| pixels.checked_mul(self.bytes_per_pixel()))
            .ok_or(SinkError::Geometry { width, height })
    }
}

/// An open sink accepting whole frames
pub trait SinkWriter: Send {
    /// Write one frame, returning the number of bytes accepted
    fn write_frame(&mut self, data: &[u8]) -> io::Result<usize>;
}

/// Opens sink devices sized to an observed frame
pub trait SinkOpener: Send + Sync {
    fn open(
        &self,
        device: &Path,
        format: SinkFormat,
        width: u32,
        height: u32,
    ) -> Result<Box<dyn SinkWriter>, SinkError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuy2_maps_to_yuyv() {
        let format = SinkFormat::for_frame_format(FrameFormat::ColorYuy2).unwrap();
        assert_eq!(format, SinkFormat::Yuyv);
        assert_eq!(format.frame_size(320, 240).unwrap(), 320 * 240 * 2);
        assert_eq!(format.fourcc(), b"YUYV");
    }

    #[test]
    fn test_thermography_formats_have_no_sink_format() {
        for format in [
            FrameFormat::Corrected,
            FrameFormat::PreAgc,
            FrameFormat::ThermographyFloat,
            FrameFormat::ThermographyFixed10_6,
            FrameFormat::ColorAyuv,
        ] {
            match SinkFormat::for_frame_format(format) {
                Err(SinkError::UnsupportedFormat { format: rejected }) => {
                    assert_eq!(rejected, format)
                }
                other => panic!("expected unsupported format, got {:?}", other.map(|_| ())),
            }
        }
    }

    #[test]
    fn test_frame_size_tracks_bytes_per_pixel() {
        assert_eq!(SinkFormat::Grey.frame_size(206, 156).unwrap(), 206 * 156);
        assert_eq!(SinkFormat::Abgr32.frame_size(206, 156).unwrap(), 206 * 156 * 4);
        assert_eq!(SinkFormat::Abgr32.line_size(206).unwrap(), 206 * 4);
    }

    #[test]
    fn test_oversized_geometry_is_rejected() {
        match SinkFormat::Yuyv.frame_size(u32::MAX, 2) {
            Err(SinkError::Geometry { width, height }) => {
                assert_eq!((width, height), (u32::MAX, 2))
            }
            other => panic!("expected geometry error, got {:?}", other),
        }
        assert!(SinkFormat::Abgr32.frame_size(65_536, 65_536).is_err());
        assert!(SinkFormat::Abgr32.line_size(u32::MAX).is_err());
    }
}
