mod coordinator;
mod runtime;
mod types;
mod watch;

#[cfg(test)]
mod tests;

pub use coordinator::HotReloadCoordinator;
pub use runtime::spawn_signal_handlers;
pub use types::ControlRequest;
pub use watch::{ChangeNotifier, ChannelNotifier, ConfigWatcher};
