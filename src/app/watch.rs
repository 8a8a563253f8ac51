use crate::error::{Result, ThermcamError};
use async_trait::async_trait;
use notify::event::{AccessKind, AccessMode, Event, EventKind};
use notify::{RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::{OsStr, OsString};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Source of "configuration changed" notifications
#[async_trait]
pub trait ChangeNotifier: Send {
    /// Wait for the next change.
    ///
    /// Returns `Ok(false)` once no further change can be reported.
    async fn changed(&mut self) -> Result<bool>;
}

/// Notifier fed through a channel, for embedding and tests
pub struct ChannelNotifier {
    receiver: mpsc::UnboundedReceiver<()>,
}

impl ChannelNotifier {
    pub fn new() -> (mpsc::UnboundedSender<()>, Self) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (sender, Self { receiver })
    }
}

#[async_trait]
impl ChangeNotifier for ChannelNotifier {
    async fn changed(&mut self) -> Result<bool> {
        Ok(self.receiver.recv().await.is_some())
    }
}

/// How one watcher event relates to the configuration file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Relevance {
    Relevant,
    Unrelated,
    /// The watched directory went away
    Closed,
}

/// Watches the directory holding a file and reports changes to that file.
///
/// Watching the directory instead of the file keeps working when editors
/// replace the file by renaming a temporary copy over it.
pub struct ConfigWatcher {
    // Dropping the watcher ends the event stream
    _watcher: RecommendedWatcher,
    events: mpsc::UnboundedReceiver<notify::Result<Event>>,
    directory: PathBuf,
    file_name: OsString,
    debounce: Duration,
}

impl ConfigWatcher {
    pub fn new(path: &Path, debounce: Duration) -> Result<Self> {
        let file_name = path
            .file_name()
            .ok_or_else(|| {
                ThermcamError::system(format!("'{}' does not name a file", path.display()))
            })?
            .to_os_string();
        let directory = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let (sender, events) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
            let _ = sender.send(event);
        })?;
        watcher.watch(&directory, RecursiveMode::NonRecursive)?;

        info!(
            "Watching '{}' for changes to {:?}",
            directory.display(),
            file_name
        );
        Ok(Self {
            _watcher: watcher,
            events,
            directory,
            file_name,
            debounce,
        })
    }

    async fn next_event(&mut self) -> Result<Relevance> {
        match self.events.recv().await {
            Some(Ok(event)) => Ok(classify(&event, &self.directory, &self.file_name)),
            Some(Err(e)) => Err(e.into()),
            None => Ok(Relevance::Closed),
        }
    }
}

#[async_trait]
impl ChangeNotifier for ConfigWatcher {
    async fn changed(&mut self) -> Result<bool> {
        loop {
            match self.next_event().await? {
                Relevance::Relevant => break,
                Relevance::Unrelated => continue,
                Relevance::Closed => {
                    warn!("Directory '{}' is no longer watched", self.directory.display());
                    return Ok(false);
                }
            }
        }

        // Swallow the rest of the burst
        loop {
            match tokio::time::timeout(self.debounce, self.next_event()).await {
                Err(_quiet) => break,
                Ok(Ok(Relevance::Closed)) => break,
                Ok(Ok(_)) => continue,
                Ok(Err(e)) => return Err(e),
            }
        }

        debug!("Change in config file {:?} detected", self.file_name);
        Ok(true)
    }
}

fn classify(event: &Event, directory: &Path, file_name: &OsStr) -> Relevance {
    if matches!(event.kind, EventKind::Remove(_))
        && event.paths.iter().any(|path| path == directory)
    {
        return Relevance::Closed;
    }
    if event.need_rescan() {
        return Relevance::Relevant;
    }

    let content_event = match event.kind {
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => true,
        EventKind::Access(AccessKind::Close(AccessMode::Write)) => true,
        _ => false,
    };
    let names_file = event
        .paths
        .iter()
        .any(|path| path.file_name() == Some(file_name));

    if content_event && names_file {
        Relevance::Relevant
    } else {
        Relevance::Unrelated
    }
}
