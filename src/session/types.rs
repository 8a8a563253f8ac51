use crate::frame::{ColorPalette, ShutterMode};
use crate::sdk::SdkStatus;

/// A non-fatal setting that could not be applied during connect
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettingFailure {
    ShutterMode(ShutterMode, SdkStatus),
    ColorPalette(ColorPalette, SdkStatus),
}

/// Result of a connect that reached a running capture session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// Every setting was applied
    Ready,
    /// Streaming, but some settings kept the sensor's defaults
    Degraded(Vec<SettingFailure>),
}

impl ConnectOutcome {
    pub fn is_degraded(&self) -> bool {
        matches!(self, ConnectOutcome::Degraded(_))
    }
}

/// Frame path counters of one session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub frames_relayed: u64,
    pub frames_dropped: u64,
    pub sink_opens: u64,
}
