use super::{SinkFormat, SinkOpener, SinkWriter};
use crate::error::SinkError;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// One successful sink open
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkOpenRecord {
    pub device: PathBuf,
    pub format: SinkFormat,
    pub width: u32,
    pub height: u32,
}

#[derive(Default)]
struct MemoryState {
    opens: Vec<SinkOpenRecord>,
    open_now: HashMap<PathBuf, usize>,
    max_open: HashMap<PathBuf, usize>,
    frames: HashMap<PathBuf, Vec<usize>>,
    pending_open_failures: usize,
    failing_writes: bool,
}

/// Sink opener that keeps frames in memory and records every open.
///
/// Used for dry runs and tests where no v4l2loopback device exists.
#[derive(Clone, Default)]
pub struct MemorySinkOpener {
    state: Arc<Mutex<MemoryState>>,
}

impl MemorySinkOpener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` opens fail
    pub fn fail_next_opens(&self, count: usize) {
        self.state.lock().pending_open_failures = count;
    }

    /// Make writes fail until switched back
    pub fn set_failing_writes(&self, failing: bool) {
        self.state.lock().failing_writes = failing;
    }

    pub fn opens(&self) -> Vec<SinkOpenRecord> {
        self.state.lock().opens.clone()
    }

    pub fn opens_for(&self, device: &Path) -> Vec<SinkOpenRecord> {
        self.state
            .lock()
            .opens
            .iter()
            .filter(|record| record.device == device)
            .cloned()
            .collect()
    }

    /// Sinks currently open on `device`
    pub fn open_count(&self, device: &Path) -> usize {
        self.state.lock().open_now.get(device).copied().unwrap_or(0)
    }

    /// Highest number of sinks simultaneously open on `device`
    pub fn max_open_count(&self, device: &Path) -> usize {
        self.state.lock().max_open.get(device).copied().unwrap_or(0)
    }

    /// Sizes of the frames written to `device`, in order
    pub fn frames_written(&self, device: &Path) -> Vec<usize> {
        self.state
            .lock()
            .frames
            .get(device)
            .cloned()
            .unwrap_or_default()
    }
}

impl SinkOpener for MemorySinkOpener {
    fn open(
        &self,
        device: &Path,
        format: SinkFormat,
        width: u32,
        height: u32,
    ) -> Result<Box<dyn SinkWriter>, SinkError> {
        let mut state = self.state.lock();
        if state.pending_open_failures > 0 {
            state.pending_open_failures -= 1;
            return Err(SinkError::Open {
                device: device.to_path_buf(),
                source: io::Error::new(io::ErrorKind::NotFound, "simulated open failure"),
            });
        }

        state.opens.push(SinkOpenRecord {
            device: device.to_path_buf(),
            format,
            width,
            height,
        });
        let open_now = state.open_now.entry(device.to_path_buf()).or_insert(0);
        *open_now += 1;
        let open_now = *open_now;
        let max_open = state.max_open.entry(device.to_path_buf()).or_insert(0);
        *max_open = (*max_open).max(open_now);

        debug!(
            "Opened memory sink '{}' ({}x{}, {:?})",
            device.display(),
            width,
            height,
            format
        );

        Ok(Box::new(MemorySink {
            device: device.to_path_buf(),
            state: Arc::clone(&self.state),
        }))
    }
}

struct MemorySink {
    device: PathBuf,
    state: Arc<Mutex<MemoryState>>,
}

impl SinkWriter for MemorySink {
    fn write_frame(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        if state.failing_writes {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "simulated write failure",
            ));
        }
        state
            .frames
            .entry(self.device.clone())
            .or_default()
            .push(data.len());
        Ok(data.len())
    }
}

impl Drop for MemorySink {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        if let Some(open_now) = state.open_now.get_mut(&self.device) {
            *open_now = open_now.saturating_sub(1);
        }
    }
}
