use super::*;
use crate::error::ThermcamError;
use crate::fleet::{CameraId, FleetSnapshot};
use crate::frame::{ColorPalette, ShutterMode};
use crate::sdk::simulated::SimulatedSensorManager;
use crate::sdk::{DiscoveryEvent, SdkStatus};
use crate::sink::MemorySinkOpener;
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

struct Harness {
    manager: Arc<SimulatedSensorManager>,
    opener: MemorySinkOpener,
    changes: mpsc::UnboundedSender<()>,
    control: mpsc::Sender<ControlRequest>,
    fleet: watch::Receiver<Option<FleetSnapshot>>,
    shutdown: CancellationToken,
    task: JoinHandle<crate::error::Result<()>>,
}

fn write_config(path: &Path, config: serde_json::Value) {
    std::fs::write(path, serde_json::to_string_pretty(&config).unwrap()).unwrap();
}

fn camera_config(cameras: &[(&str, &str)]) -> serde_json::Value {
    let cameras: Vec<_> = cameras
        .iter()
        .map(|(cid, device)| json!({ "cid": cid, "device_path": device }))
        .collect();
    json!({ "camera_array": cameras })
}

fn start_coordinator(path: &Path, manager: Arc<SimulatedSensorManager>) -> Harness {
    let opener = MemorySinkOpener::new();
    let (changes, notifier) = ChannelNotifier::new();
    let shutdown = CancellationToken::new();
    let mut coordinator = HotReloadCoordinator::new(
        path,
        manager.clone(),
        Arc::new(opener.clone()),
        Box::new(notifier),
        shutdown.clone(),
    );
    let control = coordinator.control_handle();
    let fleet = coordinator.subscribe_fleet();
    let task = tokio::spawn(async move { coordinator.run().await });

    Harness {
        manager,
        opener,
        changes,
        control,
        fleet,
        shutdown,
        task,
    }
}

async fn wait_for_fleet(
    fleet: &mut watch::Receiver<Option<FleetSnapshot>>,
    predicate: impl Fn(&FleetSnapshot) -> bool,
) -> FleetSnapshot {
    let current = tokio::time::timeout(
        WAIT,
        fleet.wait_for(|current| current.as_ref().is_some_and(&predicate)),
    )
    .await
    .expect("fleet not published in time")
    .expect("coordinator dropped");
    current.clone().unwrap()
}

async fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + WAIT;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

#[tokio::test]
async fn test_reload_rebuilds_registry_from_new_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("thermcam.json");
    write_config(&path, camera_config(&[("A", "/dev/video10")]));
    let mut harness = start_coordinator(&path, Arc::new(SimulatedSensorManager::new()));

    let first = wait_for_fleet(&mut harness.fleet, |fleet| fleet.len() == 1).await;
    assert!(first.get(&CameraId::from("A")).is_some());
    drop(first);

    write_config(
        &path,
        json!({
            "default_color_palette": "tyrian",
            "camera_array": [
                { "cid": "A", "device_path": "/dev/video10" },
                { "cid": "B", "device_path": "/dev/video11", "color_palette": "iron" },
                { "cid": "C", "device_path": "/dev/video12", "shutter_mode": "manual" }
            ]
        }),
    );
    harness.changes.send(()).unwrap();

    let second = wait_for_fleet(&mut harness.fleet, |fleet| fleet.len() == 3).await;
    let settings = |cid: &str| second.get(&CameraId::from(cid)).unwrap().settings().clone();
    assert_eq!(settings("A").color_palette, ColorPalette::Tyrian);
    assert_eq!(settings("B").color_palette, ColorPalette::Iron);
    assert_eq!(settings("C").color_palette, ColorPalette::Tyrian);
    assert_eq!(settings("C").shutter_mode, ShutterMode::Manual);
    assert_eq!(settings("A").shutter_mode, ShutterMode::Auto);
    assert_eq!(harness.manager.subscription_count(), 2);
    drop(second);

    harness.shutdown.cancel();
    harness.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_invalid_config_runs_empty_fleet_until_fixed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("thermcam.json");
    std::fs::write(&path, "{ not json").unwrap();
    let mut harness = start_coordinator(&path, Arc::new(SimulatedSensorManager::new()));

    let empty = wait_for_fleet(&mut harness.fleet, |_| true).await;
    assert!(empty.is_empty());
    assert!(harness.manager.is_subscribed());
    drop(empty);

    write_config(&path, camera_config(&[("A", "/dev/video10")]));
    harness.changes.send(()).unwrap();
    let fixed = wait_for_fleet(&mut harness.fleet, |fleet| fleet.len() == 1).await;
    assert!(fixed.get(&CameraId::from("A")).is_some());
    drop(fixed);

    harness.shutdown.cancel();
    harness.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_fatal_start_ends_the_loop() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("thermcam.json");
    write_config(&path, camera_config(&[("A", "/dev/video10")]));
    let manager = Arc::new(SimulatedSensorManager::new());
    manager.fail_subscribe(SdkStatus::new(-1, "no usb access"));

    let harness = start_coordinator(&path, manager);
    let result = tokio::time::timeout(WAIT, harness.task)
        .await
        .expect("coordinator did not stop")
        .unwrap();

    match result {
        Err(ThermcamError::Sdk { operation, .. }) => assert_eq!(operation, "subscribe"),
        other => panic!("expected fatal SDK error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_shutdown_stops_fleet_before_returning() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("thermcam.json");
    write_config(&path, camera_config(&[("A", "/dev/video10")]));
    let mut harness = start_coordinator(&path, Arc::new(SimulatedSensorManager::new()));
    let fleet = wait_for_fleet(&mut harness.fleet, |fleet| fleet.len() == 1).await;

    let id = CameraId::from("A");
    harness.manager.announce(&id, DiscoveryEvent::ReadyToPair);
    let sensor = harness.manager.sensor(&id).unwrap();
    sensor.deliver_frame(320, 240);
    assert_eq!(harness.opener.open_count(Path::new("/dev/video10")), 1);

    harness.shutdown.cancel();
    harness.task.await.unwrap().unwrap();

    assert!(!harness.manager.is_subscribed());
    assert!(!fleet.get(&id).unwrap().is_connected());
    assert!(!sensor.is_capturing());
    assert_eq!(harness.opener.open_count(Path::new("/dev/video10")), 0);
    assert!(harness.fleet.borrow().is_none());
}

#[tokio::test]
async fn test_reload_disconnects_previous_generation() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("thermcam.json");
    write_config(&path, camera_config(&[("A", "/dev/video10")]));
    let mut harness = start_coordinator(&path, Arc::new(SimulatedSensorManager::new()));
    let old = wait_for_fleet(&mut harness.fleet, |fleet| fleet.len() == 1).await;
    let id = CameraId::from("A");
    harness.manager.announce(&id, DiscoveryEvent::Connected);
    assert!(old.get(&id).unwrap().is_connected());

    write_config(&path, camera_config(&[("A", "/dev/video20")]));
    harness.control.send(ControlRequest::Reload).await.unwrap();
    let new = wait_for_fleet(&mut harness.fleet, |fleet| !Arc::ptr_eq(fleet, &old)).await;

    assert!(!old.get(&id).unwrap().is_connected());
    assert_eq!(
        new.get(&id).unwrap().settings().device_path,
        Path::new("/dev/video20")
    );

    // The new generation binds the same sensor to the new sink
    harness.manager.announce(&id, DiscoveryEvent::Connected);
    harness.manager.sensor(&id).unwrap().deliver_frame(320, 240);
    assert_eq!(harness.opener.opens_for(Path::new("/dev/video20")).len(), 1);
    assert!(harness.opener.opens_for(Path::new("/dev/video10")).is_empty());
    drop(new);

    harness.shutdown.cancel();
    harness.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_shutter_request_reaches_bound_sessions() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("thermcam.json");
    write_config(&path, camera_config(&[("A", "/dev/video10")]));
    let mut harness = start_coordinator(&path, Arc::new(SimulatedSensorManager::new()));
    wait_for_fleet(&mut harness.fleet, |fleet| fleet.len() == 1).await;
    let id = CameraId::from("A");
    harness.manager.announce(&id, DiscoveryEvent::Connected);
    let sensor = harness.manager.sensor(&id).unwrap();

    harness
        .control
        .send(ControlRequest::TriggerShutter)
        .await
        .unwrap();

    assert!(eventually(|| sensor.shutter_trigger_count() == 1).await);

    harness.shutdown.cancel();
    harness.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_watchdog_restarts_silent_camera() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("thermcam.json");
    write_config(
        &path,
        json!({
            "watchdog": { "frame_timeout_ms": 20, "max_consecutive_timeouts": 2 },
            "camera_array": [{ "cid": "A", "device_path": "/dev/video10" }]
        }),
    );
    let mut harness = start_coordinator(&path, Arc::new(SimulatedSensorManager::new()));
    wait_for_fleet(&mut harness.fleet, |fleet| fleet.len() == 1).await;
    let id = CameraId::from("A");
    harness.manager.announce(&id, DiscoveryEvent::Connected);
    let sensor = harness.manager.sensor(&id).unwrap();

    assert!(eventually(|| sensor.capture_start_count() >= 2).await);
    assert!(sensor.is_capturing());

    harness.shutdown.cancel();
    harness.task.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_closed_watch_keeps_fleet_running() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("thermcam.json");
    write_config(&path, camera_config(&[("A", "/dev/video10")]));
    let mut harness = start_coordinator(&path, Arc::new(SimulatedSensorManager::new()));
    wait_for_fleet(&mut harness.fleet, |fleet| fleet.len() == 1).await;

    let Harness {
        changes,
        manager,
        shutdown,
        task,
        ..
    } = harness;
    drop(changes);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert!(!task.is_finished());
    assert!(manager.is_subscribed());
    assert_eq!(manager.subscription_count(), 1);

    shutdown.cancel();
    task.await.unwrap().unwrap();
}
