use std::fmt;

/// Lifecycle of one discovered sensor as seen by the orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorState {
    /// Seen, but not bound to a session
    Unknown,
    /// Pairing was requested by the SDK and handled
    PairingRequested,
    /// Streaming into its configured session
    Bound,
    /// Disconnected or failed; the session is kept for reuse
    Removed,
}

impl fmt::Display for SensorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SensorState::Unknown => "unknown",
            SensorState::PairingRequested => "pairing requested",
            SensorState::Bound => "bound",
            SensorState::Removed => "removed",
        };
        f.write_str(name)
    }
}

/// Result of one watchdog pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchdogReport {
    /// Bound sessions that were checked
    pub checked: usize,
    /// Sessions whose capture was restarted
    pub reconnected: usize,
    /// Restarts that failed and left the session disconnected
    pub failed: usize,
}
