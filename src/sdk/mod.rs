//! Seam between the core and the vendor sensor SDK.
//!
//! The vendor library delivers device lifecycle events and frames through
//! C callbacks with an opaque user-data pointer. Backends translate those
//! callbacks into calls on [`LifecycleSink`] and [`FrameSink`], which the
//! discovery and session layers implement.

pub mod simulated;

#[cfg(feature = "seekcamera")]
pub mod seek;

use crate::fleet::CameraId;
use crate::frame::{ColorPalette, FrameFormat, FrameView, PipelineMode, ShutterMode};
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;

/// Status code and human readable description returned by the vendor SDK
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdkStatus {
    pub code: i32,
    pub description: String,
}

impl SdkStatus {
    pub fn new<S: Into<String>>(code: i32, description: S) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }
}

impl fmt::Display for SdkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (status {})", self.description, self.code)
    }
}

impl std::error::Error for SdkStatus {}

pub type SdkResult<T = ()> = std::result::Result<T, SdkStatus>;

/// Device lifecycle notification reported by the SDK
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// A paired sensor is available for imaging
    Connected,
    /// The sensor was unplugged or otherwise went away
    Disconnected,
    /// The sensor needs pairing before it can be used
    ReadyToPair,
    /// The SDK reported an error for the sensor
    Error(SdkStatus),
}

impl DiscoveryEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DiscoveryEvent::Connected => "connected",
            DiscoveryEvent::Disconnected => "disconnected",
            DiscoveryEvent::ReadyToPair => "ready_to_pair",
            DiscoveryEvent::Error(_) => "error",
        }
    }
}

/// A frame owned by the SDK, valid for the duration of a frame callback
pub trait SensorFrame {
    fn lock(&self);
    fn unlock(&self);
    /// Extract the frame payload in `format`
    fn frame_by_format(&self, format: FrameFormat) -> SdkResult<FrameView<'_>>;
}

/// Keeps a [`SensorFrame`] locked until dropped
pub struct FrameLock<'a> {
    frame: &'a dyn SensorFrame,
}

impl<'a> FrameLock<'a> {
    pub fn acquire(frame: &'a dyn SensorFrame) -> Self {
        frame.lock();
        Self { frame }
    }

    pub fn frame_by_format(&self, format: FrameFormat) -> SdkResult<FrameView<'a>> {
        self.frame.frame_by_format(format)
    }
}

impl Drop for FrameLock<'_> {
    fn drop(&mut self) {
        self.frame.unlock();
    }
}

/// Receiver of frames delivered from the SDK's delivery context
pub trait FrameSink: Send + Sync {
    fn on_frame_available(&self, frame: &dyn SensorFrame);
}

/// Fixed target for a frame callback's user-data pointer.
///
/// The slot itself never moves, so a callback already running on the SDK's
/// frame thread stays valid while the receiving sink is swapped.
#[derive(Default)]
pub struct FrameSinkSlot {
    sink: RwLock<Option<Arc<dyn FrameSink>>>,
}

impl FrameSinkSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `sink`, returning the one it replaces
    pub fn replace(&self, sink: Arc<dyn FrameSink>) -> Option<Arc<dyn FrameSink>> {
        self.sink.write().replace(sink)
    }

    pub fn clear(&self) -> Option<Arc<dyn FrameSink>> {
        self.sink.write().take()
    }

    pub fn is_set(&self) -> bool {
        self.sink.read().is_some()
    }

    /// Hand `frame` to the current sink
    pub fn deliver(&self, frame: &dyn SensorFrame) -> bool {
        let sink = self.sink.read().clone();
        match sink {
            Some(sink) => {
                sink.on_frame_available(frame);
                true
            }
            None => false,
        }
    }
}

/// Receiver of device lifecycle events
pub trait LifecycleSink: Send + Sync {
    fn on_discovery_event(&self, sensor: Arc<dyn SensorHandle>, event: DiscoveryEvent);
}

/// Imperative operations on one discovered sensor
pub trait SensorHandle: Send + Sync {
    fn identity(&self) -> CameraId;
    fn register_frame_sink(&self, sink: Arc<dyn FrameSink>) -> SdkResult;
    fn set_pipeline_mode(&self, mode: PipelineMode) -> SdkResult;
    fn capture_session_start(&self, format: FrameFormat) -> SdkResult;
    fn capture_session_stop(&self) -> SdkResult;
    fn set_shutter_mode(&self, mode: ShutterMode) -> SdkResult;
    fn set_color_palette(&self, palette: ColorPalette) -> SdkResult;
    fn trigger_shutter(&self) -> SdkResult;
    /// Pair the sensor with the host using the SDK's default calibration store
    fn store_calibration_data(&self) -> SdkResult;
}

/// Device discovery subsystem of the SDK
pub trait SensorManager: Send + Sync {
    /// Start discovery, delivering events to `sink` until [`unsubscribe`](Self::unsubscribe)
    fn subscribe(&self, sink: Arc<dyn LifecycleSink>) -> SdkResult;
    /// Stop discovery; no events are delivered once this returns
    fn unsubscribe(&self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingSink {
        frames: AtomicUsize,
    }

    impl FrameSink for CountingSink {
        fn on_frame_available(&self, _frame: &dyn SensorFrame) {
            self.frames.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct EmptyFrame;

    impl SensorFrame for EmptyFrame {
        fn lock(&self) {}
        fn unlock(&self) {}
        fn frame_by_format(&self, _format: FrameFormat) -> SdkResult<FrameView<'_>> {
            Ok(FrameView::new(0, 0, &[]))
        }
    }

    #[test]
    fn test_frame_sink_slot_swaps_target_in_place() {
        let slot = FrameSinkSlot::new();
        let address = &slot as *const FrameSinkSlot;
        assert!(!slot.deliver(&EmptyFrame));

        let first = Arc::new(CountingSink::default());
        assert!(slot.replace(first.clone()).is_none());
        assert!(slot.deliver(&EmptyFrame));

        let second = Arc::new(CountingSink::default());
        let replaced = slot.replace(second.clone()).unwrap();
        drop(replaced);
        // The replaced sink is only referenced by the test now
        assert_eq!(Arc::strong_count(&first), 1);
        drop(first);

        assert!(slot.deliver(&EmptyFrame));
        assert_eq!(second.frames.load(Ordering::SeqCst), 1);
        assert_eq!(&slot as *const FrameSinkSlot, address);

        assert!(slot.clear().is_some());
        assert!(!slot.is_set());
        assert!(!slot.deliver(&EmptyFrame));
    }

    #[test]
    fn test_frame_sink_keeps_sink_alive_during_delivery() {
        struct SwappingSink {
            slot: Arc<FrameSinkSlot>,
            frames: AtomicUsize,
        }

        impl FrameSink for SwappingSink {
            fn on_frame_available(&self, _frame: &dyn SensorFrame) {
                // Replacing the sink mid-callback must not free `self`
                self.slot.clear();
                self.frames.fetch_add(1, Ordering::SeqCst);
            }
        }

        let slot = Arc::new(FrameSinkSlot::new());
        let sink = Arc::new(SwappingSink {
            slot: slot.clone(),
            frames: AtomicUsize::new(0),
        });
        slot.replace(sink.clone());
        let observer = Arc::downgrade(&sink);
        drop(sink);

        assert!(slot.deliver(&EmptyFrame));
        assert!(!slot.is_set());
        assert!(observer.upgrade().is_none());
    }
}
