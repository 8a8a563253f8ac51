use super::ControlRequest;
use crate::error::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Install process signal handlers.
///
/// SIGINT and SIGTERM cancel `shutdown`. On Unix, SIGUSR1 requests a manual
/// shutter trigger and SIGHUP a configuration reload.
pub fn spawn_signal_handlers(
    shutdown: CancellationToken,
    control: mpsc::Sender<ControlRequest>,
) -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let token = shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                Some(()) = sigterm.recv() => {
                    info!("Received SIGTERM signal");
                    token.cancel();
                }
                _ = token.cancelled() => {}
            }
        });

        forward_signal(
            signal(SignalKind::user_defined1())?,
            "SIGUSR1",
            ControlRequest::TriggerShutter,
            control.clone(),
            shutdown.clone(),
        );
        forward_signal(
            signal(SignalKind::hangup())?,
            "SIGHUP",
            ControlRequest::Reload,
            control,
            shutdown.clone(),
        );
    }
    #[cfg(not(unix))]
    let _ = control;

    // Handle SIGINT (Ctrl+C)
    tokio::spawn(async move {
        tokio::select! {
            Ok(()) = tokio::signal::ctrl_c() => {
                info!("Received SIGINT signal (Ctrl+C)");
                shutdown.cancel();
            }
            _ = shutdown.cancelled() => {}
        }
    });

    Ok(())
}

#[cfg(unix)]
fn forward_signal(
    mut stream: tokio::signal::unix::Signal,
    name: &'static str,
    request: ControlRequest,
    control: mpsc::Sender<ControlRequest>,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                received = stream.recv() => {
                    if received.is_none() {
                        break;
                    }
                    info!("Received {} signal, requesting {:?}", name, request);
                    if let Err(e) = control.try_send(request) {
                        warn!("Dropping {} request: {}", name, e);
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }
    });
}
