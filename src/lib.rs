pub mod app;
pub mod config;
pub mod discovery;
pub mod error;
pub mod fleet;
pub mod frame;
pub mod sdk;
pub mod session;
pub mod sink;

pub use app::{ChangeNotifier, ControlRequest, HotReloadCoordinator};
pub use config::{CameraEntry, FleetConfig, WatchdogConfig};
pub use discovery::{DiscoveryOrchestrator, SensorState, WatchdogReport};
pub use error::{Result, SessionError, SinkError, ThermcamError};
pub use fleet::{CameraId, CameraSettings, FleetDefaults, FleetRegistry, FleetSnapshot, Lookup};
pub use frame::{ColorPalette, FrameFormat, FrameView, PipelineMode, ShutterMode};
pub use sdk::{DiscoveryEvent, SdkStatus, SensorHandle, SensorManager};
pub use session::{CameraSession, ConnectOutcome, SessionStats, SettingFailure};
pub use sink::{MemorySinkOpener, SinkFormat, SinkOpener, V4l2LoopbackOpener};
