mod orchestrator;
mod types;


pub use orchestrator::DiscoveryOrchestrator;
pub use types::{SensorState, WatchdogReport};
