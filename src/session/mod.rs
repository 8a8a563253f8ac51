mod camera;
mod types;


pub use camera::CameraSession;
pub use types::{ConnectOutcome, SessionStats, SettingFailure};
