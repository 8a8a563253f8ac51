use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Pixel encoding requested from the sensor for each frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameFormat {
    /// Corrected 16-bit sensor counts
    Corrected,
    /// Pre automatic-gain-control 16-bit counts
    PreAgc,
    /// Temperatures as 32-bit floats
    ThermographyFloat,
    /// Temperatures as 10.6 fixed point
    ThermographyFixed10_6,
    /// 8-bit grayscale
    Grayscale,
    /// 32-bit ARGB, little endian
    ColorArgb8888,
    /// 16-bit RGB565
    ColorRgb565,
    /// 32-bit AYUV
    ColorAyuv,
    /// Packed YUV 4:2:2, 2 bytes per pixel
    ColorYuy2,
}

impl FrameFormat {
    /// Vendor SDK bit flag for this format
    pub fn vendor_code(&self) -> i32 {
        match self {
            FrameFormat::Corrected => 0x04,
            FrameFormat::PreAgc => 0x08,
            FrameFormat::ThermographyFloat => 0x10,
            FrameFormat::ThermographyFixed10_6 => 0x20,
            FrameFormat::Grayscale => 0x40,
            FrameFormat::ColorArgb8888 => 0x80,
            FrameFormat::ColorRgb565 => 0x100,
            FrameFormat::ColorAyuv => 0x200,
            FrameFormat::ColorYuy2 => 0x400,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FrameFormat::Corrected => "corrected",
            FrameFormat::PreAgc => "pre_agc",
            FrameFormat::ThermographyFloat => "thermography_float",
            FrameFormat::ThermographyFixed10_6 => "thermography_fixed10_6",
            FrameFormat::Grayscale => "grayscale",
            FrameFormat::ColorArgb8888 => "color_argb8888",
            FrameFormat::ColorRgb565 => "color_rgb565",
            FrameFormat::ColorAyuv => "color_ayuv",
            FrameFormat::ColorYuy2 => "color_yuy2",
        }
    }

    /// Payload bytes per pixel delivered by the sensor
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            FrameFormat::Grayscale => 1,
            FrameFormat::Corrected
            | FrameFormat::PreAgc
            | FrameFormat::ThermographyFixed10_6
            | FrameFormat::ColorRgb565
            | FrameFormat::ColorYuy2 => 2,
            FrameFormat::ThermographyFloat
            | FrameFormat::ColorArgb8888
            | FrameFormat::ColorAyuv => 4,
        }
    }
}

/// Sensor color palette applied by the imaging pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ColorPalette {
    WhiteHot,
    BlackHot,
    Spectra,
    Prism,
    Tyrian,
    Iron,
    Amber,
    Hi,
    Green,
}

impl ColorPalette {
    pub fn vendor_code(&self) -> i32 {
        match self {
            ColorPalette::WhiteHot => 0,
            ColorPalette::BlackHot => 1,
            ColorPalette::Spectra => 2,
            ColorPalette::Prism => 3,
            ColorPalette::Tyrian => 4,
            ColorPalette::Iron => 5,
            ColorPalette::Amber => 6,
            ColorPalette::Hi => 7,
            ColorPalette::Green => 8,
        }
    }
}

impl ColorPalette {
    pub fn name(&self) -> &'static str {
        match self {
            ColorPalette::WhiteHot => "white_hot",
            ColorPalette::BlackHot => "black_hot",
            ColorPalette::Spectra => "spectra",
            ColorPalette::Prism => "prism",
            ColorPalette::Tyrian => "tyrian",
            ColorPalette::Iron => "iron",
            ColorPalette::Amber => "amber",
            ColorPalette::Hi => "hi",
            ColorPalette::Green => "green",
        }
    }
}

impl fmt::Display for ColorPalette {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ColorPalette::WhiteHot => "white hot",
            ColorPalette::BlackHot => "black hot",
            ColorPalette::Spectra => "spectra",
            ColorPalette::Prism => "prism",
            ColorPalette::Tyrian => "tyrian",
            ColorPalette::Iron => "iron",
            ColorPalette::Amber => "amber",
            ColorPalette::Hi => "hi",
            ColorPalette::Green => "green",
        };
        f.write_str(name)
    }
}

/// Control of the sensor's calibration shutter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShutterMode {
    Auto,
    Manual,
}

impl ShutterMode {
    pub fn vendor_code(&self) -> i32 {
        match self {
            ShutterMode::Auto => 0,
            ShutterMode::Manual => 1,
        }
    }
}

impl ShutterMode {
    pub fn name(&self) -> &'static str {
        match self {
            ShutterMode::Auto => "auto",
            ShutterMode::Manual => "manual",
        }
    }
}

impl fmt::Display for ShutterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Sensor setting written in configuration files either by its snake_case
/// name or by its integer vendor code
trait ConfigEnum: Sized + Copy + 'static {
    const KIND: &'static str;
    const ALL: &'static [Self];

    fn config_name(&self) -> &'static str;
    fn config_code(&self) -> i32;

    fn from_code(code: i64) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|value| i64::from(value.config_code()) == code)
    }

    fn from_name(name: &str) -> Option<Self> {
        match name.trim().parse::<i64>() {
            Ok(code) => Self::from_code(code),
            Err(_) => Self::ALL
                .iter()
                .copied()
                .find(|value| value.config_name() == name),
        }
    }
}

fn deserialize_config_enum<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: ConfigEnum,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Code(i64),
        Name(String),
    }

    match Repr::deserialize(deserializer)? {
        Repr::Code(code) => T::from_code(code)
            .ok_or_else(|| de::Error::custom(format!("unknown {} code {}", T::KIND, code))),
        Repr::Name(name) => T::from_name(&name)
            .ok_or_else(|| de::Error::custom(format!("unknown {} '{}'", T::KIND, name))),
    }
}

macro_rules! config_enum {
    ($ty:ty, $kind:literal, [$($variant:expr),+ $(,)?]) => {
        impl ConfigEnum for $ty {
            const KIND: &'static str = $kind;
            const ALL: &'static [Self] = &[$($variant),+];

            fn config_name(&self) -> &'static str {
                self.name()
            }

            fn config_code(&self) -> i32 {
                self.vendor_code()
            }
        }

        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.name())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                deserialize_config_enum(deserializer)
            }
        }
    };
}

config_enum!(
    FrameFormat,
    "frame format",
    [
        FrameFormat::Corrected,
        FrameFormat::PreAgc,
        FrameFormat::ThermographyFloat,
        FrameFormat::ThermographyFixed10_6,
        FrameFormat::Grayscale,
        FrameFormat::ColorArgb8888,
        FrameFormat::ColorRgb565,
        FrameFormat::ColorAyuv,
        FrameFormat::ColorYuy2,
    ]
);

config_enum!(
    ColorPalette,
    "color palette",
    [
        ColorPalette::WhiteHot,
        ColorPalette::BlackHot,
        ColorPalette::Spectra,
        ColorPalette::Prism,
        ColorPalette::Tyrian,
        ColorPalette::Iron,
        ColorPalette::Amber,
        ColorPalette::Hi,
        ColorPalette::Green,
    ]
);

config_enum!(
    ShutterMode,
    "shutter mode",
    [ShutterMode::Auto, ShutterMode::Manual]
);

/// Imaging pipeline mode of the sensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineMode {
    Lite,
    Legacy,
    SeekVision,
}

impl PipelineMode {
    pub fn vendor_code(&self) -> i32 {
        match self {
            PipelineMode::Lite => 0,
            PipelineMode::Legacy => 1,
            PipelineMode::SeekVision => 2,
        }
    }
}

/// Borrowed view of one frame extracted from the sensor in a given format
#[derive(Debug, Clone, Copy)]
pub struct FrameView<'a> {
    pub width: u32,
    pub height: u32,
    pub data: &'a [u8],
}

impl<'a> FrameView<'a> {
    pub fn new(width: u32, height: u32, data: &'a [u8]) -> Self {
        Self {
            width,
            height,
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enums_use_snake_case_names() {
        let format: FrameFormat = serde_json::from_str("\"color_yuy2\"").unwrap();
        assert_eq!(format, FrameFormat::ColorYuy2);

        let palette: ColorPalette = serde_json::from_str("\"white_hot\"").unwrap();
        assert_eq!(palette, ColorPalette::WhiteHot);

        let shutter: ShutterMode = serde_json::from_str("\"manual\"").unwrap();
        assert_eq!(shutter, ShutterMode::Manual);
    }

    #[test]
    fn test_enums_accept_vendor_codes() {
        let format: FrameFormat = serde_json::from_str("1024").unwrap();
        assert_eq!(format, FrameFormat::ColorYuy2);

        let palette: ColorPalette = serde_json::from_str("5").unwrap();
        assert_eq!(palette, ColorPalette::Iron);

        let shutter: ShutterMode = serde_json::from_str("\"1\"").unwrap();
        assert_eq!(shutter, ShutterMode::Manual);

        assert!(serde_json::from_str::<ColorPalette>("42").is_err());
        assert!(serde_json::from_str::<FrameFormat>("3").is_err());
        assert!(serde_json::from_str::<ShutterMode>("\"sometimes\"").is_err());
    }

    #[test]
    fn test_enums_serialize_as_names() {
        assert_eq!(
            serde_json::to_string(&FrameFormat::ThermographyFixed10_6).unwrap(),
            "\"thermography_fixed10_6\""
        );
        assert_eq!(
            serde_json::to_string(&ColorPalette::BlackHot).unwrap(),
            "\"black_hot\""
        );
    }

    #[test]
    fn test_vendor_codes() {
        assert_eq!(FrameFormat::ColorYuy2.vendor_code(), 0x400);
        assert_eq!(ColorPalette::Spectra.vendor_code(), 2);
        assert_eq!(ShutterMode::Manual.vendor_code(), 1);
        assert_eq!(PipelineMode::SeekVision.vendor_code(), 2);
    }
}
