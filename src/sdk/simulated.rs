//! In-process sensor backend for running without hardware.

use super::{
    DiscoveryEvent, FrameSink, LifecycleSink, SdkResult, SdkStatus, SensorFrame, SensorHandle,
    SensorManager,
};
use crate::fleet::CameraId;
use crate::frame::{ColorPalette, FrameFormat, FrameView, PipelineMode, ShutterMode};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Resolution of the simulated sensors
pub const SIMULATED_RESOLUTION: (u32, u32) = (320, 240);

const STATUS_NOT_READY: i32 = -13;
const MIN_FRAME_PERIOD: Duration = Duration::from_millis(1);

/// Operations whose outcome can be forced in tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimOperation {
    RegisterFrameSink,
    PipelineMode,
    CaptureStart,
    CaptureStop,
    ShutterMode,
    ColorPalette,
    ShutterTrigger,
    StoreCalibration,
    FrameFetch,
}

#[derive(Default)]
struct SimSensorState {
    frame_sink: Option<Arc<dyn FrameSink>>,
    capture_format: Option<FrameFormat>,
    pipeline_mode: Option<PipelineMode>,
    shutter_mode: Option<ShutterMode>,
    color_palette: Option<ColorPalette>,
    paired: bool,
    failures: HashMap<SimOperation, SdkStatus>,
}

/// Simulated sensor with controllable failures and manual frame delivery
pub struct SimulatedSensor {
    id: CameraId,
    state: Mutex<SimSensorState>,
    capture_starts: AtomicU64,
    capture_stops: AtomicU64,
    shutter_triggers: AtomicU64,
    frames_delivered: AtomicU64,
    unbalanced_frame_locks: AtomicU64,
}

impl SimulatedSensor {
    pub fn new(id: CameraId) -> Self {
        Self {
            id,
            state: Mutex::new(SimSensorState::default()),
            capture_starts: AtomicU64::new(0),
            capture_stops: AtomicU64::new(0),
            shutter_triggers: AtomicU64::new(0),
            frames_delivered: AtomicU64::new(0),
            unbalanced_frame_locks: AtomicU64::new(0),
        }
    }

    /// Make `operation` fail with `status` until cleared
    pub fn fail(&self, operation: SimOperation, status: SdkStatus) {
        self.state.lock().failures.insert(operation, status);
    }

    pub fn clear_failure(&self, operation: SimOperation) {
        self.state.lock().failures.remove(&operation);
    }

    fn check(&self, operation: SimOperation) -> SdkResult {
        match self.state.lock().failures.get(&operation) {
            Some(status) => Err(status.clone()),
            None => Ok(()),
        }
    }

    /// Deliver one frame of the given geometry to the registered frame sink.
    ///
    /// Returns `false` when no capture session is running.
    pub fn deliver_frame(&self, width: u32, height: u32) -> bool {
        let (sink, format, fetch_failure) = {
            let state = self.state.lock();
            match (&state.frame_sink, state.capture_format) {
                (Some(sink), Some(format)) => (
                    Arc::clone(sink),
                    format,
                    state.failures.get(&SimOperation::FrameFetch).cloned(),
                ),
                _ => return false,
            }
        };

        let sequence = self.frames_delivered.fetch_add(1, Ordering::Relaxed);
        let len = width as usize * height as usize * format.bytes_per_pixel();
        let frame = SimulatedFrame {
            format,
            width,
            height,
            data: vec![(sequence & 0xff) as u8; len],
            lock_depth: AtomicI32::new(0),
            fetch_failure,
        };

        sink.on_frame_available(&frame);

        if frame.lock_depth.load(Ordering::SeqCst) != 0 {
            self.unbalanced_frame_locks.fetch_add(1, Ordering::Relaxed);
        }
        true
    }

    pub fn is_capturing(&self) -> bool {
        self.state.lock().capture_format.is_some()
    }

    pub fn capture_format(&self) -> Option<FrameFormat> {
        self.state.lock().capture_format
    }

    pub fn pipeline_mode(&self) -> Option<PipelineMode> {
        self.state.lock().pipeline_mode
    }

    pub fn shutter_mode(&self) -> Option<ShutterMode> {
        self.state.lock().shutter_mode
    }

    pub fn color_palette(&self) -> Option<ColorPalette> {
        self.state.lock().color_palette
    }

    pub fn is_paired(&self) -> bool {
        self.state.lock().paired
    }

    pub fn has_frame_sink(&self) -> bool {
        self.state.lock().frame_sink.is_some()
    }

    pub fn capture_start_count(&self) -> u64 {
        self.capture_starts.load(Ordering::Relaxed)
    }

    pub fn capture_stop_count(&self) -> u64 {
        self.capture_stops.load(Ordering::Relaxed)
    }

    pub fn shutter_trigger_count(&self) -> u64 {
        self.shutter_triggers.load(Ordering::Relaxed)
    }

    /// Frames whose lock was not released by the frame sink
    pub fn unbalanced_frame_locks(&self) -> u64 {
        self.unbalanced_frame_locks.load(Ordering::Relaxed)
    }
}

impl SensorHandle for SimulatedSensor {
    fn identity(&self) -> CameraId {
        self.id.clone()
    }

    fn register_frame_sink(&self, sink: Arc<dyn FrameSink>) -> SdkResult {
        self.check(SimOperation::RegisterFrameSink)?;
        self.state.lock().frame_sink = Some(sink);
        Ok(())
    }

    fn set_pipeline_mode(&self, mode: PipelineMode) -> SdkResult {
        self.check(SimOperation::PipelineMode)?;
        self.state.lock().pipeline_mode = Some(mode);
        Ok(())
    }

    fn capture_session_start(&self, format: FrameFormat) -> SdkResult {
        self.check(SimOperation::CaptureStart)?;
        self.state.lock().capture_format = Some(format);
        self.capture_starts.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn capture_session_stop(&self) -> SdkResult {
        self.check(SimOperation::CaptureStop)?;
        let mut state = self.state.lock();
        state.capture_format = None;
        state.frame_sink = None;
        self.capture_stops.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn set_shutter_mode(&self, mode: ShutterMode) -> SdkResult {
        self.check(SimOperation::ShutterMode)?;
        self.state.lock().shutter_mode = Some(mode);
        Ok(())
    }

    fn set_color_palette(&self, palette: ColorPalette) -> SdkResult {
        self.check(SimOperation::ColorPalette)?;
        self.state.lock().color_palette = Some(palette);
        Ok(())
    }

    fn trigger_shutter(&self) -> SdkResult {
        self.check(SimOperation::ShutterTrigger)?;
        if !self.is_capturing() {
            return Err(SdkStatus::new(STATUS_NOT_READY, "camera not ready"));
        }
        self.shutter_triggers.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn store_calibration_data(&self) -> SdkResult {
        self.check(SimOperation::StoreCalibration)?;
        self.state.lock().paired = true;
        Ok(())
    }
}

struct SimulatedFrame {
    format: FrameFormat,
    width: u32,
    height: u32,
    data: Vec<u8>,
    lock_depth: AtomicI32,
    fetch_failure: Option<SdkStatus>,
}

impl SensorFrame for SimulatedFrame {
    fn lock(&self) {
        self.lock_depth.fetch_add(1, Ordering::SeqCst);
    }

    fn unlock(&self) {
        self.lock_depth.fetch_sub(1, Ordering::SeqCst);
    }

    fn frame_by_format(&self, format: FrameFormat) -> SdkResult<FrameView<'_>> {
        if let Some(status) = &self.fetch_failure {
            return Err(status.clone());
        }
        if format != self.format {
            return Err(SdkStatus::new(
                -7,
                format!("frame format {:?} not available", format),
            ));
        }
        Ok(FrameView::new(self.width, self.height, &self.data))
    }
}

#[derive(Default)]
struct ManagerState {
    subscriber: Option<Arc<dyn LifecycleSink>>,
    sensors: HashMap<CameraId, Arc<SimulatedSensor>>,
    subscribe_failure: Option<SdkStatus>,
}

/// Simulated discovery subsystem
#[derive(Default)]
pub struct SimulatedSensorManager {
    state: Mutex<ManagerState>,
    subscriptions: AtomicU64,
}

impl SimulatedSensorManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every following `subscribe` fail with `status`
    pub fn fail_subscribe(&self, status: SdkStatus) {
        self.state.lock().subscribe_failure = Some(status);
    }

    /// Plug in a sensor, returning the existing one if already present
    pub fn add_sensor(&self, id: &CameraId) -> Arc<SimulatedSensor> {
        let mut state = self.state.lock();
        Arc::clone(
            state
                .sensors
                .entry(id.clone())
                .or_insert_with(|| Arc::new(SimulatedSensor::new(id.clone()))),
        )
    }

    pub fn sensor(&self, id: &CameraId) -> Option<Arc<SimulatedSensor>> {
        self.state.lock().sensors.get(id).cloned()
    }

    pub fn sensors(&self) -> Vec<Arc<SimulatedSensor>> {
        self.state.lock().sensors.values().cloned().collect()
    }

    pub fn is_subscribed(&self) -> bool {
        self.state.lock().subscriber.is_some()
    }

    /// Number of successful subscriptions so far
    pub fn subscription_count(&self) -> u64 {
        self.subscriptions.load(Ordering::SeqCst)
    }

    /// Report `event` for sensor `id` to the current subscriber.
    ///
    /// Returns `false` when nobody is subscribed.
    pub fn announce(&self, id: &CameraId, event: DiscoveryEvent) -> bool {
        let sensor = self.add_sensor(id);
        let subscriber = self.state.lock().subscriber.clone();
        match subscriber {
            Some(subscriber) => {
                subscriber.on_discovery_event(sensor, event);
                true
            }
            None => false,
        }
    }
}

impl SensorManager for SimulatedSensorManager {
    fn subscribe(&self, sink: Arc<dyn LifecycleSink>) -> SdkResult {
        let mut state = self.state.lock();
        if let Some(status) = &state.subscribe_failure {
            return Err(status.clone());
        }
        state.subscriber = Some(sink);
        self.subscriptions.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn unsubscribe(&self) {
        self.state.lock().subscriber = None;
    }
}

/// Interval between simulated frames, never shorter than a millisecond
fn frame_period(fps: u32) -> Duration {
    Duration::from_nanos(1_000_000_000 / u64::from(fps.max(1))).max(MIN_FRAME_PERIOD)
}

/// Drive simulated sensors: announce each one as ready to pair whenever a new
/// subscription appears, then deliver frames at `fps`.
pub fn spawn_simulation(
    manager: Arc<SimulatedSensorManager>,
    ids: Vec<CameraId>,
    fps: u32,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    for id in &ids {
        manager.add_sensor(id);
    }
    info!(
        "Simulating {} sensor(s) at {} fps ({}x{})",
        ids.len(),
        fps,
        SIMULATED_RESOLUTION.0,
        SIMULATED_RESOLUTION.1
    );

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(frame_period(fps));
        let mut announced_for = 0;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let subscription = manager.subscription_count();
            if manager.is_subscribed() && subscription != announced_for {
                for id in &ids {
                    debug!("Announcing simulated sensor {}", id);
                    manager.announce(id, DiscoveryEvent::ReadyToPair);
                }
                announced_for = subscription;
            }

            for sensor in manager.sensors() {
                sensor.deliver_frame(SIMULATED_RESOLUTION.0, SIMULATED_RESOLUTION.1);
            }
        }
        debug!("Sensor simulation stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_period_is_bounded() {
        assert_eq!(frame_period(0), Duration::from_secs(1));
        assert_eq!(frame_period(10), Duration::from_millis(100));
        assert_eq!(frame_period(2000), MIN_FRAME_PERIOD);
        assert_eq!(frame_period(u32::MAX), MIN_FRAME_PERIOD);
    }

    #[tokio::test]
    async fn test_simulation_runs_above_a_thousand_fps() {
        let manager = Arc::new(SimulatedSensorManager::new());
        let cancel = CancellationToken::new();
        let handle = spawn_simulation(
            manager.clone(),
            vec![CameraId::from("A")],
            2000,
            cancel.clone(),
        );

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        handle.await.unwrap();
        assert!(manager.sensor(&CameraId::from("A")).is_some());
    }
}
