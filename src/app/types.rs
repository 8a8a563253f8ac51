/// Requests from the signal layer to the running fleet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    /// Fire the manual shutter of every bound camera
    TriggerShutter,
    /// Reload the configuration without waiting for a file change
    Reload,
}

/// Why one fleet generation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum CycleEnd {
    ConfigChanged,
    Shutdown,
}
