use super::types::{ConnectOutcome, SessionStats, SettingFailure};
use crate::error::SessionError;
use crate::fleet::{CameraId, CameraSettings};
use crate::frame::PipelineMode;
use crate::sdk::{FrameLock, FrameSink, SensorFrame, SensorHandle};
use crate::sink::{SinkFormat, SinkOpener, SinkWriter};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, trace, warn};

/// Frame path state, guarded by the session lock
#[derive(Default)]
struct SessionState {
    sensor: Option<Arc<dyn SensorHandle>>,
    sink: Option<Box<dyn SinkWriter>>,
    /// Last sink open error, so repeated failures are not logged per frame
    last_sink_error: Option<String>,
}

/// One configured sensor slot relaying frames into its sink device
pub struct CameraSession {
    id: CameraId,
    settings: CameraSettings,
    sink_opener: Arc<dyn SinkOpener>,
    state: Mutex<SessionState>,
    timeouts: AtomicU32,
    frames_relayed: AtomicU64,
    frames_dropped: AtomicU64,
    sink_opens: AtomicU64,
}

impl CameraSession {
    /// Create a disconnected session
    pub fn new(id: CameraId, settings: CameraSettings, sink_opener: Arc<dyn SinkOpener>) -> Self {
        Self {
            id,
            settings,
            sink_opener,
            state: Mutex::new(SessionState::default()),
            timeouts: AtomicU32::new(0),
            frames_relayed: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            sink_opens: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> &CameraId {
        &self.id
    }

    pub fn settings(&self) -> &CameraSettings {
        &self.settings
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().sensor.is_some()
    }

    pub fn has_open_sink(&self) -> bool {
        self.state.lock().sink.is_some()
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            frames_relayed: self.frames_relayed.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            sink_opens: self.sink_opens.load(Ordering::Relaxed),
        }
    }

    /// Bind this session to `sensor` and start streaming.
    ///
    /// Any previous binding is torn down first. Frame callback registration,
    /// pipeline mode and capture start are fatal; shutter mode and palette
    /// failures only degrade the connection.
    pub fn connect(
        self: &Arc<Self>,
        sensor: Arc<dyn SensorHandle>,
    ) -> Result<ConnectOutcome, SessionError> {
        // Teardown errors are logged by disconnect and do not block the new binding
        let _ = self.disconnect();

        info!(
            "Connecting camera {} to '{}'",
            self.id,
            self.settings.device_path.display()
        );

        let frame_sink: Arc<dyn FrameSink> = Arc::new(SessionFrameSink {
            session: Arc::downgrade(self),
        });
        sensor.register_frame_sink(frame_sink).map_err(|status| {
            error!("failed to register frame callback for {}: {}", self.id, status);
            SessionError::RegisterFrameSink(status)
        })?;

        // Bound before capture starts so the first frame can size the sink
        self.state.lock().sensor = Some(Arc::clone(&sensor));
        let outcome = match self.open_session(&*sensor) {
            Ok(outcome) => outcome,
            Err(e) => {
                let (_, sink) = {
                    let mut state = self.state.lock();
                    (state.sensor.take(), state.sink.take())
                };
                drop(sink);
                return Err(e);
            }
        };

        match &outcome {
            ConnectOutcome::Ready => info!("Camera {} streaming", self.id),
            ConnectOutcome::Degraded(failures) => warn!(
                "Camera {} streaming with {} setting(s) left at sensor defaults",
                self.id,
                failures.len()
            ),
        }
        Ok(outcome)
    }

    /// Restart the capture session on the currently bound sensor
    pub fn reconnect(self: &Arc<Self>) -> Result<ConnectOutcome, SessionError> {
        let sensor = self.bound_sensor()?;
        info!("Reconnecting camera {}", self.id);
        self.connect(sensor)
    }

    fn open_session(&self, sensor: &dyn SensorHandle) -> Result<ConnectOutcome, SessionError> {
        sensor
            .set_pipeline_mode(PipelineMode::SeekVision)
            .map_err(|status| {
                error!("failed to set image pipeline mode for {}: {}", self.id, status);
                SessionError::PipelineMode(status)
            })?;

        sensor
            .capture_session_start(self.settings.format)
            .map_err(|status| {
                error!("failed to start capture session for {}: {}", self.id, status);
                SessionError::CaptureStart(status)
            })?;

        let mut failures = Vec::new();

        let shutter_mode = self.settings.shutter_mode;
        if let Err(status) = sensor.set_shutter_mode(shutter_mode) {
            warn!(
                "failed to set shutter mode of {} to {}: {}",
                self.id, shutter_mode, status
            );
            failures.push(SettingFailure::ShutterMode(shutter_mode, status));
        }

        let palette = self.settings.color_palette;
        if let Err(status) = sensor.set_color_palette(palette) {
            warn!(
                "failed to set color palette of {} to {}: {}",
                self.id, palette, status
            );
            failures.push(SettingFailure::ColorPalette(palette, status));
        }

        if failures.is_empty() {
            Ok(ConnectOutcome::Ready)
        } else {
            Ok(ConnectOutcome::Degraded(failures))
        }
    }

    /// Stop the capture session and close the sink.
    ///
    /// Waits for an in-flight frame callback. Calling this on a disconnected
    /// session does nothing.
    pub fn disconnect(&self) -> Result<(), SessionError> {
        self.reset_timeouts();

        let (sensor, sink) = {
            let mut state = self.state.lock();
            state.last_sink_error = None;
            (state.sensor.take(), state.sink.take())
        };

        let mut result = Ok(());
        if let Some(sensor) = sensor {
            if let Err(status) = sensor.capture_session_stop() {
                error!("failed to stop capture session for {}: {}", self.id, status);
                result = Err(SessionError::CaptureStop(status));
            }
            info!("Camera {} disconnected", self.id);
        }
        if let Some(sink) = sink {
            drop(sink);
            debug!(
                "Closed sink '{}' of camera {}",
                self.settings.device_path.display(),
                self.id
            );
        }
        result
    }

    /// Pair a sensor awaiting pairing, then connect to it
    pub fn handle_ready_to_pair(
        self: &Arc<Self>,
        sensor: Arc<dyn SensorHandle>,
    ) -> Result<ConnectOutcome, SessionError> {
        if let Err(status) = sensor.store_calibration_data() {
            warn!("failed to pair device {}: {}", self.id, status);
        }
        self.connect(sensor)
    }

    /// Relay one frame to the sink, opening it from this frame's geometry if needed
    pub fn on_frame_available(&self, frame: &dyn SensorFrame) {
        let mut state = self.state.lock();
        let frame = FrameLock::acquire(frame);

        if state.sensor.is_none() {
            trace!("Ignoring frame for disconnected camera {}", self.id);
            return;
        }

        let view = match frame.frame_by_format(self.settings.format) {
            Ok(view) => view,
            Err(status) => {
                error!("failed to get frame from {}: {}", self.id, status);
                self.frames_dropped.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };

        if state.sink.is_none() {
            match self.open_sink(view.width, view.height) {
                Ok(sink) => {
                    state.sink = Some(sink);
                    state.last_sink_error = None;
                    self.sink_opens.fetch_add(1, Ordering::Relaxed);
                }
                Err(message) => {
                    if state.last_sink_error.as_deref() == Some(message.as_str()) {
                        debug!("Dropping frame for {}: {}", self.id, message);
                    } else {
                        error!("Dropping frame for {}: {}", self.id, message);
                        state.last_sink_error = Some(message);
                    }
                    self.frames_dropped.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            }
        }

        let Some(sink) = state.sink.as_mut() else {
            return;
        };
        match sink.write_frame(view.data) {
            Ok(written) if written == view.data.len() => {
                self.frames_relayed.fetch_add(1, Ordering::Relaxed);
                self.reset_timeouts();
            }
            Ok(written) => {
                warn!(
                    "Short write of {}/{} bytes to v4l2 device '{}'",
                    written,
                    view.data.len(),
                    self.settings.device_path.display()
                );
                self.frames_dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                error!(
                    "Error writing {} bytes to v4l2 device '{}': {}",
                    view.data.len(),
                    self.settings.device_path.display(),
                    e
                );
                self.frames_dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn open_sink(&self, width: u32, height: u32) -> Result<Box<dyn SinkWriter>, String> {
        let format =
            SinkFormat::for_frame_format(self.settings.format).map_err(|e| e.to_string())?;
        format
            .frame_size(width, height)
            .map_err(|e| e.to_string())?;
        self.sink_opener
            .open(&self.settings.device_path, format, width, height)
            .map_err(|e| e.to_string())
    }

    /// Fire the calibration shutter of the bound sensor
    pub fn trigger_shutter(&self) -> Result<(), SessionError> {
        let sensor = self.bound_sensor()?;
        sensor.trigger_shutter().map_err(|status| {
            error!("failed to trigger shutter of {}: {}", self.id, status);
            SessionError::ShutterTrigger(status)
        })
    }

    /// Count one more interval without frames, returning the new count
    pub fn record_timeout(&self) -> u32 {
        self.timeouts.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn reset_timeouts(&self) {
        self.timeouts.store(0, Ordering::Relaxed);
    }

    pub fn timeout_count(&self) -> u32 {
        self.timeouts.load(Ordering::Relaxed)
    }

    fn bound_sensor(&self) -> Result<Arc<dyn SensorHandle>, SessionError> {
        self.state
            .lock()
            .sensor
            .clone()
            .ok_or_else(|| SessionError::NotConnected {
                device: self.settings.device_path.display().to_string(),
            })
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        let _ = self.disconnect();
    }
}

/// Frame callback target registered with the SDK
struct SessionFrameSink {
    session: Weak<CameraSession>,
}

impl FrameSink for SessionFrameSink {
    fn on_frame_available(&self, frame: &dyn SensorFrame) {
        if let Some(session) = self.session.upgrade() {
            session.on_frame_available(frame);
        }
    }
}
