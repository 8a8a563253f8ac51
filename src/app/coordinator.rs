use super::types::{ControlRequest, CycleEnd};
use super::watch::ChangeNotifier;
use crate::config::{FleetConfig, WatchdogConfig};
use crate::discovery::DiscoveryOrchestrator;
use crate::error::Result;
use crate::fleet::{FleetRegistry, FleetSnapshot};
use crate::sdk::SensorManager;
use crate::sink::SinkOpener;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const CONTROL_QUEUE_DEPTH: usize = 8;

/// Runs the fleet and restarts it whenever the configuration changes
pub struct HotReloadCoordinator {
    config_path: PathBuf,
    manager: Arc<dyn SensorManager>,
    sink_opener: Arc<dyn SinkOpener>,
    notifier: Box<dyn ChangeNotifier>,
    watching: bool,
    shutdown: CancellationToken,
    control_sender: mpsc::Sender<ControlRequest>,
    control_receiver: mpsc::Receiver<ControlRequest>,
    fleet_sender: watch::Sender<Option<FleetSnapshot>>,
    generation: u64,
}

impl HotReloadCoordinator {
    pub fn new(
        config_path: impl Into<PathBuf>,
        manager: Arc<dyn SensorManager>,
        sink_opener: Arc<dyn SinkOpener>,
        notifier: Box<dyn ChangeNotifier>,
        shutdown: CancellationToken,
    ) -> Self {
        let (control_sender, control_receiver) = mpsc::channel(CONTROL_QUEUE_DEPTH);
        let (fleet_sender, _) = watch::channel(None);
        Self {
            config_path: config_path.into(),
            manager,
            sink_opener,
            notifier,
            watching: true,
            shutdown,
            control_sender,
            control_receiver,
            fleet_sender,
            generation: 0,
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Sender for shutter and reload requests
    pub fn control_handle(&self) -> mpsc::Sender<ControlRequest> {
        self.control_sender.clone()
    }

    /// Follow the running fleet; `None` while no fleet is started
    pub fn subscribe_fleet(&self) -> watch::Receiver<Option<FleetSnapshot>> {
        self.fleet_sender.subscribe()
    }

    /// Number of fleets started so far
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Run fleets until shutdown.
    ///
    /// Each generation loads the configuration, starts discovery and runs
    /// until the configuration changes or shutdown is requested, then stops
    /// discovery before the next generation starts. A failure to start
    /// discovery ends the loop with that error.
    pub async fn run(&mut self) -> Result<()> {
        info!(
            "Hot-reload coordinator running with config '{}'",
            self.config_path.display()
        );

        while !self.shutdown.is_cancelled() {
            let (fleet, watchdog) = self.load_fleet();
            self.generation += 1;

            let orchestrator = DiscoveryOrchestrator::new(
                Arc::clone(&self.manager),
                Arc::clone(&fleet),
                watchdog.clone(),
            );
            if let Err(e) = orchestrator.start() {
                error!("Failed to start camera discovery: {}", e);
                return Err(e);
            }
            info!(
                "Fleet generation {} started with {} camera(s)",
                self.generation,
                fleet.len()
            );
            self.fleet_sender.send_replace(Some(fleet));

            let end = self.supervise(&orchestrator, &watchdog).await;

            orchestrator.stop();
            self.fleet_sender.send_replace(None);
            drop(orchestrator);

            match end {
                Ok(CycleEnd::ConfigChanged) => info!("Configuration changed, reloading fleet"),
                Ok(CycleEnd::Shutdown) => break,
                Err(e) => {
                    error!("Configuration watch failed: {}", e);
                    return Err(e);
                }
            }
        }

        info!("Hot-reload coordinator stopped");
        Ok(())
    }

    fn load_fleet(&self) -> (FleetSnapshot, WatchdogConfig) {
        match FleetConfig::load_from_file(&self.config_path) {
            Ok(config) => {
                let registry = FleetRegistry::from_config(&config, Arc::clone(&self.sink_opener));
                (Arc::new(registry), config.watchdog)
            }
            Err(e) => {
                error!(
                    "Failed to load configuration from '{}': {}, running with no cameras",
                    self.config_path.display(),
                    e
                );
                (Arc::new(FleetRegistry::empty()), WatchdogConfig::default())
            }
        }
    }

    async fn supervise(
        &mut self,
        orchestrator: &DiscoveryOrchestrator,
        watchdog: &WatchdogConfig,
    ) -> Result<CycleEnd> {
        let mut ticker = tokio::time::interval(watchdog.frame_timeout());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    debug!("Shutdown requested");
                    return Ok(CycleEnd::Shutdown);
                }
                changed = self.notifier.changed(), if self.watching => {
                    if changed? {
                        return Ok(CycleEnd::ConfigChanged);
                    }
                    warn!("Configuration watch ended, hot reload disabled");
                    self.watching = false;
                }
                Some(request) = self.control_receiver.recv() => match request {
                    ControlRequest::TriggerShutter => {
                        orchestrator.trigger_shutter_all();
                    }
                    ControlRequest::Reload => return Ok(CycleEnd::ConfigChanged),
                },
                _ = ticker.tick() => {
                    orchestrator.check_timeouts();
                }
            }
        }
    }
}
