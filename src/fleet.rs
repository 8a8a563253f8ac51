use crate::config::FleetConfig;
use crate::frame::{ColorPalette, FrameFormat, ShutterMode};
use crate::session::CameraSession;
use crate::sink::SinkOpener;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

/// Stable vendor-assigned sensor identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CameraId(String);

impl CameraId {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CameraId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for CameraId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Process-wide imaging defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FleetDefaults {
    pub color_palette: ColorPalette,
    pub shutter_mode: ShutterMode,
    pub frame_format: FrameFormat,
}

impl Default for FleetDefaults {
    fn default() -> Self {
        FleetConfig::default().defaults()
    }
}

/// Fully resolved configuration of one camera slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraSettings {
    pub device_path: PathBuf,
    pub format: FrameFormat,
    pub color_palette: ColorPalette,
    pub shutter_mode: ShutterMode,
}

/// Result of looking up an identity in the registry
pub enum Lookup<'a> {
    Configured(&'a Arc<CameraSession>),
    /// Unknown identity; only the defaults apply
    Fallback(&'a FleetDefaults),
}

/// Immutable view of a registry handed to the orchestrator
pub type FleetSnapshot = Arc<FleetRegistry>;

/// Configured camera sessions keyed by identity
pub struct FleetRegistry {
    defaults: FleetDefaults,
    sessions: HashMap<CameraId, Arc<CameraSession>>,
}

impl FleetRegistry {
    /// Registry with no cameras and built-in defaults
    pub fn empty() -> Self {
        Self {
            defaults: FleetDefaults::default(),
            sessions: HashMap::new(),
        }
    }

    /// Build disconnected sessions for every configured camera
    pub fn from_config(config: &FleetConfig, sink_opener: Arc<dyn SinkOpener>) -> Self {
        let defaults = config.defaults();
        let sessions = config
            .camera_array
            .iter()
            .map(|entry| {
                let settings = entry.resolve(&defaults);
                debug!(
                    "Camera {} -> '{}' ({:?}, palette {}, shutter {})",
                    entry.cid,
                    settings.device_path.display(),
                    settings.format,
                    settings.color_palette,
                    settings.shutter_mode
                );
                let session =
                    CameraSession::new(entry.cid.clone(), settings, Arc::clone(&sink_opener));
                (entry.cid.clone(), Arc::new(session))
            })
            .collect();

        Self { defaults, sessions }
    }

    pub fn lookup(&self, id: &CameraId) -> Lookup<'_> {
        match self.sessions.get(id) {
            Some(session) => Lookup::Configured(session),
            None => Lookup::Fallback(&self.defaults),
        }
    }

    pub fn get(&self, id: &CameraId) -> Option<&Arc<CameraSession>> {
        self.sessions.get(id)
    }

    pub fn defaults(&self) -> &FleetDefaults {
        &self.defaults
    }

    pub fn sessions(&self) -> impl Iterator<Item = &Arc<CameraSession>> {
        self.sessions.values()
    }

    pub fn identities(&self) -> impl Iterator<Item = &CameraId> {
        self.sessions.keys()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn snapshot(self: &Arc<Self>) -> FleetSnapshot {
        Arc::clone(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CameraEntry;
    use crate::sink::MemorySinkOpener;

    fn entry(cid: &str, device: &str) -> CameraEntry {
        CameraEntry {
            cid: CameraId::from(cid),
            device_path: PathBuf::from(device),
            format: None,
            color_palette: None,
            shutter_mode: None,
        }
    }

    #[test]
    fn test_registry_has_one_session_per_entry() {
        let mut config = FleetConfig::default();
        config.camera_array = vec![
            entry("A", "/dev/video10"),
            entry("B", "/dev/video11"),
            entry("C", "/dev/video12"),
        ];

        let registry = FleetRegistry::from_config(&config, Arc::new(MemorySinkOpener::new()));
        assert_eq!(registry.len(), 3);
        for cid in ["A", "B", "C"] {
            let session = registry.get(&CameraId::from(cid)).unwrap();
            assert_eq!(session.id().as_str(), cid);
            assert!(!session.is_connected());
        }
    }

    #[test]
    fn test_absent_overrides_take_defaults() {
        let mut config = FleetConfig::default();
        config.default_color_palette = ColorPalette::Spectra;
        config.default_shutter_mode = ShutterMode::Auto;
        config.camera_array = vec![entry("A", "/dev/video10")];

        let registry = FleetRegistry::from_config(&config, Arc::new(MemorySinkOpener::new()));
        let settings = registry.get(&CameraId::from("A")).unwrap().settings();
        assert_eq!(settings.color_palette, ColorPalette::Spectra);
        assert_eq!(settings.shutter_mode, ShutterMode::Auto);
    }

    #[test]
    fn test_lookup_unknown_identity_returns_defaults() {
        let mut config = FleetConfig::default();
        config.default_color_palette = ColorPalette::Tyrian;
        config.camera_array = vec![entry("A", "/dev/video10")];
        let registry = FleetRegistry::from_config(&config, Arc::new(MemorySinkOpener::new()));

        assert!(matches!(
            registry.lookup(&CameraId::from("A")),
            Lookup::Configured(_)
        ));
        match registry.lookup(&CameraId::from("unknown")) {
            Lookup::Fallback(defaults) => {
                assert_eq!(defaults.color_palette, ColorPalette::Tyrian)
            }
            Lookup::Configured(_) => panic!("unknown identity must not resolve to a session"),
        }
    }

    #[test]
    fn test_empty_registry() {
        let registry = FleetRegistry::empty();
        assert!(registry.is_empty());
        assert_eq!(registry.defaults(), &FleetDefaults::default());
    }
}
