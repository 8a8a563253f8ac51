use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thermcam::app::{spawn_signal_handlers, HotReloadCoordinator, ConfigWatcher};
use thermcam::sdk::simulated::{spawn_simulation, SimulatedSensorManager};
use thermcam::sdk::SensorManager;
use thermcam::sink::{MemorySinkOpener, SinkOpener, V4l2LoopbackOpener};
use thermcam::{CameraId, FleetConfig};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Quiet period after a config file change before reloading
const RELOAD_DEBOUNCE: Duration = Duration::from_millis(250);

#[derive(Parser, Debug)]
#[command(name = "thermcam")]
#[command(about = "Stream thermal camera frames into v4l2loopback devices")]
#[command(version)]
#[command(long_about = "Bridges a fleet of USB thermal cameras to v4l2loopback output devices. \
Cameras are matched to sink devices by chip id from a JSON or TOML configuration file, \
which is watched and hot-reloaded whenever it changes.")]
struct Args {
    /// Path to configuration file
    #[arg(
        short,
        long,
        value_name = "PATH",
        required_unless_present = "print_config",
        help = "Path to the JSON or TOML camera configuration file"
    )]
    config_file: Option<PathBuf>,

    /// Enable debug logging (most verbose)
    #[arg(short, long, help = "Enable debug level logging")]
    debug: bool,

    /// Enable verbose logging (info level)
    #[arg(short, long, help = "Enable verbose info level logging")]
    verbose: bool,

    /// Enable quiet mode (errors only)
    #[arg(short, long, help = "Enable quiet mode - only log errors")]
    quiet: bool,

    /// Validate configuration and exit
    #[arg(long, help = "Validate configuration file and exit without starting cameras")]
    validate_config: bool,

    /// Print an example configuration and exit
    #[arg(long, help = "Print an example configuration in TOML format and exit")]
    print_config: bool,

    /// Override log format (json, pretty, compact)
    #[arg(long, value_name = "FORMAT", help = "Log output format: json, pretty, or compact")]
    log_format: Option<String>,

    /// Simulated sensors instead of hardware
    #[arg(
        long,
        value_name = "CID",
        num_args = 1..,
        help = "Run simulated sensors with these chip ids instead of real cameras"
    )]
    simulate: Vec<String>,

    /// Frame rate of simulated sensors
    #[arg(
        long,
        default_value_t = 9,
        value_name = "FPS",
        value_parser = clap::value_parser!(u32).range(1..=1000)
    )]
    simulate_fps: u32,

    /// Keep frames in memory instead of writing to v4l2 devices
    #[arg(long, help = "Discard frames into in-memory sinks instead of v4l2 devices")]
    memory_sinks: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        print_example_config()?;
        return Ok(());
    }

    init_logging(&args)?;

    let Some(config_path) = args.config_file.clone() else {
        anyhow::bail!("A config file is required");
    };

    info!("Starting thermcam v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration file: {}", config_path.display());

    if args.validate_config {
        match FleetConfig::load_from_file(&config_path) {
            Ok(config) => {
                info!("Configuration validation successful");
                println!(
                    "✓ Configuration is valid ({} camera(s))",
                    config.camera_array.len()
                );
                return Ok(());
            }
            Err(e) => {
                error!("Configuration validation failed: {}", e);
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
        }
    }

    let shutdown = CancellationToken::new();
    let (manager, simulation) = create_sensor_manager(&args, &shutdown)?;

    let sink_opener: Arc<dyn SinkOpener> = if args.memory_sinks {
        warn!("Frames are kept in memory, no v4l2 device is written");
        Arc::new(MemorySinkOpener::new())
    } else {
        Arc::new(V4l2LoopbackOpener::new())
    };

    let watcher = ConfigWatcher::new(&config_path, RELOAD_DEBOUNCE).map_err(|e| {
        error!("Cannot watch config file '{}': {}", config_path.display(), e);
        e
    })?;

    let mut coordinator = HotReloadCoordinator::new(
        config_path,
        manager,
        sink_opener,
        Box::new(watcher),
        shutdown.clone(),
    );
    spawn_signal_handlers(shutdown.clone(), coordinator.control_handle())?;

    let result = coordinator.run().await;

    shutdown.cancel();
    if let Some(simulation) = simulation {
        if let Err(e) = simulation.await {
            warn!("Sensor simulation ended abnormally: {}", e);
        }
    }

    match result {
        Ok(()) => {
            info!("thermcam shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!("thermcam stopped on fatal error: {}", e);
            Err(e.into())
        }
    }
}

fn create_sensor_manager(
    args: &Args,
    shutdown: &CancellationToken,
) -> Result<(Arc<dyn SensorManager>, Option<JoinHandle<()>>)> {
    if args.simulate.is_empty() {
        return Ok((hardware_sensor_manager()?, None));
    }

    let manager = Arc::new(SimulatedSensorManager::new());
    let ids = args
        .simulate
        .iter()
        .map(|cid| CameraId::new(cid.as_str()))
        .collect();
    let simulation = spawn_simulation(
        Arc::clone(&manager),
        ids,
        args.simulate_fps,
        shutdown.clone(),
    );
    Ok((manager, Some(simulation)))
}

#[cfg(feature = "seekcamera")]
fn hardware_sensor_manager() -> Result<Arc<dyn SensorManager>> {
    Ok(Arc::new(thermcam::sdk::seek::SeekSensorManager::new()))
}

#[cfg(not(feature = "seekcamera"))]
fn hardware_sensor_manager() -> Result<Arc<dyn SensorManager>> {
    anyhow::bail!("built without the seekcamera feature, use --simulate to run without cameras")
}

fn init_logging(args: &Args) -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = if args.debug {
        "debug"
    } else if args.verbose {
        "info"
    } else if args.quiet {
        "error"
    } else {
        "warn"
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("thermcam={}", log_level)));

    let fmt_layer = match args.log_format.as_deref() {
        Some("json") => fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed(),
        Some("compact") => fmt::layer()
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .boxed(),
        Some("pretty") | None => fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(args.debug)
            .with_file(args.debug)
            .with_line_number(args.debug)
            .boxed(),
        Some(format) => {
            eprintln!("Warning: Unknown log format '{}', using default", format);
            fmt::layer().with_target(true).boxed()
        }
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .try_init()?;

    Ok(())
}

/// Print an example configuration in TOML format
fn print_example_config() -> Result<()> {
    println!("# thermcam configuration file");
    println!("# Per-camera format, color_palette and shutter_mode are optional");
    println!("# and fall back to the default_* values.");
    println!();
    println!("{}", toml::to_string_pretty(&FleetConfig::example())?);
    Ok(())
}
