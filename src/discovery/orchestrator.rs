use super::types::{SensorState, WatchdogReport};
use crate::config::WatchdogConfig;
use crate::error::{Result, ThermcamError};
use crate::fleet::{CameraId, FleetDefaults, FleetSnapshot, Lookup};
use crate::sdk::{DiscoveryEvent, LifecycleSink, SensorHandle, SensorManager};
use crate::session::{CameraSession, ConnectOutcome};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum Phase {
    #[default]
    Idle,
    Running,
    Stopped,
}

#[derive(Default)]
struct DiscoveryState {
    phase: Phase,
    sensors: HashMap<CameraId, SensorState>,
}

/// Event handler registered with the SDK.
///
/// Events are handled under the state lock, so `stop` waits for an event in
/// progress and every later event sees the stopped phase.
struct DiscoveryInner {
    fleet: FleetSnapshot,
    state: Mutex<DiscoveryState>,
}

/// Binds discovered sensors to the sessions of one fleet snapshot
pub struct DiscoveryOrchestrator {
    manager: Arc<dyn SensorManager>,
    inner: Arc<DiscoveryInner>,
    watchdog: WatchdogConfig,
}

impl DiscoveryOrchestrator {
    pub fn new(
        manager: Arc<dyn SensorManager>,
        fleet: FleetSnapshot,
        watchdog: WatchdogConfig,
    ) -> Self {
        Self {
            manager,
            inner: Arc::new(DiscoveryInner {
                fleet,
                state: Mutex::new(DiscoveryState::default()),
            }),
            watchdog,
        }
    }

    /// Subscribe to SDK discovery events.
    ///
    /// A subscription failure means the SDK is unusable and is returned as a
    /// fatal error.
    pub fn start(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if state.phase == Phase::Running {
                warn!("Discovery orchestrator is already running");
                return Ok(());
            }
            state.phase = Phase::Running;
            state.sensors.clear();
        }

        info!(
            "Starting discovery for {} configured camera(s)",
            self.inner.fleet.len()
        );

        let sink: Arc<dyn LifecycleSink> = self.inner.clone();
        if let Err(status) = self.manager.subscribe(sink) {
            self.inner.state.lock().phase = Phase::Stopped;
            error!("failed to register camera event callback: {}", status);
            return Err(ThermcamError::sdk("subscribe", status));
        }
        Ok(())
    }

    /// Disconnect every session of the fleet, then unsubscribe.
    ///
    /// Safe to call repeatedly and without a prior `start`. Once this returns
    /// no further event for this fleet is handled.
    pub fn stop(&self) {
        let was_running = {
            let mut state = self.inner.state.lock();
            let was_running = state.phase == Phase::Running;
            state.phase = Phase::Stopped;
            for sensor_state in state.sensors.values_mut() {
                if *sensor_state == SensorState::Bound {
                    *sensor_state = SensorState::Removed;
                }
            }
            was_running
        };

        if !was_running {
            debug!("Discovery orchestrator not running");
            return;
        }

        info!("Stopping discovery");
        // Sensor handles belong to the manager and must be released first
        for session in self.inner.fleet.sessions() {
            if let Err(e) = session.disconnect() {
                warn!("Error disconnecting camera {}: {}", session.id(), e);
            }
        }
        self.manager.unsubscribe();
        info!("Discovery stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.lock().phase == Phase::Running
    }

    pub fn fleet(&self) -> &FleetSnapshot {
        &self.inner.fleet
    }

    pub fn watchdog(&self) -> &WatchdogConfig {
        &self.watchdog
    }

    /// Last known state of the sensor with identity `id`
    pub fn sensor_state(&self, id: &CameraId) -> Option<SensorState> {
        self.inner.state.lock().sensors.get(id).copied()
    }

    /// Count one frame timeout on every bound session and restart those that
    /// stayed silent for too long
    pub fn check_timeouts(&self) -> WatchdogReport {
        let mut state = self.inner.state.lock();
        let mut report = WatchdogReport::default();
        if state.phase != Phase::Running {
            return report;
        }

        let limit = self.watchdog.max_consecutive_timeouts;
        for session in self.inner.fleet.sessions() {
            if !session.is_connected() {
                continue;
            }
            report.checked += 1;

            let timeouts = session.record_timeout();
            if timeouts < limit {
                continue;
            }

            warn!(
                "No frames from camera {} for {} consecutive intervals, restarting capture",
                session.id(),
                timeouts
            );
            match session.reconnect() {
                Ok(_) => report.reconnected += 1,
                Err(e) => {
                    error!("Failed to restart camera {}: {}", session.id(), e);
                    state
                        .sensors
                        .insert(session.id().clone(), SensorState::Unknown);
                    report.failed += 1;
                }
            }
        }

        if report.reconnected > 0 || report.failed > 0 {
            debug!("Watchdog pass: {:?}", report);
        }
        report
    }

    /// Fire the manual shutter of every bound session, returning how many fired
    pub fn trigger_shutter_all(&self) -> usize {
        let state = self.inner.state.lock();
        if state.phase != Phase::Running {
            return 0;
        }

        let mut triggered = 0;
        for session in self.inner.fleet.sessions() {
            if !session.is_connected() {
                continue;
            }
            match session.trigger_shutter() {
                Ok(()) => triggered += 1,
                Err(e) => warn!("Shutter trigger skipped for {}: {}", session.id(), e),
            }
        }
        info!("Triggered shutter on {} camera(s)", triggered);
        triggered
    }
}

impl Drop for DiscoveryOrchestrator {
    fn drop(&mut self) {
        self.stop();
    }
}

impl LifecycleSink for DiscoveryInner {
    fn on_discovery_event(&self, sensor: Arc<dyn SensorHandle>, event: DiscoveryEvent) {
        let mut state = self.state.lock();
        let id = sensor.identity();
        if state.phase != Phase::Running {
            debug!("Ignoring {} event for {} after stop", event.name(), id);
            return;
        }

        debug!("Camera {} event: {}", id, event.name());
        let next = match self.fleet.lookup(&id) {
            Lookup::Configured(session) => drive_session(session, sensor, &event),
            Lookup::Fallback(defaults) => handle_unconfigured(&id, &*sensor, &event, defaults),
        };

        let previous = state.sensors.insert(id.clone(), next);
        if previous != Some(next) {
            debug!("Camera {} is now {}", id, next);
        }
    }
}

fn drive_session(
    session: &Arc<CameraSession>,
    sensor: Arc<dyn SensorHandle>,
    event: &DiscoveryEvent,
) -> SensorState {
    match event {
        DiscoveryEvent::Connected => match session.connect(sensor) {
            Ok(outcome) => bound(session, outcome),
            Err(e) => {
                error!("Failed to connect camera {}: {}", session.id(), e);
                SensorState::Unknown
            }
        },
        DiscoveryEvent::ReadyToPair => match session.handle_ready_to_pair(sensor) {
            Ok(outcome) => bound(session, outcome),
            Err(e) => {
                error!("Failed to connect camera {} after pairing: {}", session.id(), e);
                SensorState::PairingRequested
            }
        },
        DiscoveryEvent::Disconnected => {
            info!("Camera {} disconnected", session.id());
            if let Err(e) = session.disconnect() {
                warn!("Error disconnecting camera {}: {}", session.id(), e);
            }
            SensorState::Removed
        }
        DiscoveryEvent::Error(status) => {
            error!("Unhandled camera error on {}: {}", session.id(), status);
            if let Err(e) = session.disconnect() {
                warn!("Error disconnecting camera {}: {}", session.id(), e);
            }
            SensorState::Removed
        }
    }
}

fn bound(session: &CameraSession, outcome: ConnectOutcome) -> SensorState {
    if let ConnectOutcome::Degraded(failures) = outcome {
        for failure in failures {
            debug!("Camera {} degraded: {:?}", session.id(), failure);
        }
    }
    SensorState::Bound
}

/// Sensors without a camera entry are paired so they work once configured,
/// but stay unbound because no sink device is known for them
fn handle_unconfigured(
    id: &CameraId,
    sensor: &dyn SensorHandle,
    event: &DiscoveryEvent,
    defaults: &FleetDefaults,
) -> SensorState {
    match event {
        DiscoveryEvent::ReadyToPair => {
            match sensor.store_calibration_data() {
                Ok(()) => info!(
                    "Paired unconfigured camera {} (defaults: palette {}, shutter {}, format {:?})",
                    id, defaults.color_palette, defaults.shutter_mode, defaults.frame_format
                ),
                Err(status) => warn!("failed to pair device {}: {}", id, status),
            }
            SensorState::PairingRequested
        }
        DiscoveryEvent::Connected => {
            info!(
                "Camera {} is not configured, leaving it idle (defaults: palette {}, shutter {}, format {:?})",
                id, defaults.color_palette, defaults.shutter_mode, defaults.frame_format
            );
            SensorState::Unknown
        }
        DiscoveryEvent::Disconnected => SensorState::Removed,
        DiscoveryEvent::Error(status) => {
            warn!("Unconfigured camera {} reported an error: {}", id, status);
            SensorState::Removed
        }
    }
}
