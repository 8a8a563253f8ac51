//! Binding to the vendor `libseekcamera` C library.
//!
//! The manager owns every camera pointer it reports. Callbacks receive a
//! user-data pointer to a boxed context owned by the Rust side, which stays
//! alive until the manager is destroyed (lifecycle events) or the sensor is
//! dropped (frames). Frame sinks are swapped inside that context, never by
//! re-registering a new pointer.

use super::{
    DiscoveryEvent, FrameSink, FrameSinkSlot, LifecycleSink, SdkResult, SdkStatus, SensorFrame,
    SensorHandle, SensorManager,
};
use crate::fleet::CameraId;
use crate::frame::{ColorPalette, FrameFormat, FrameView, PipelineMode, ShutterMode};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::ffi::{c_int, c_void, CStr};
use std::ptr;
use std::sync::Arc;
use tracing::{debug, error, warn};

#[allow(non_camel_case_types)]
mod ffi {
    use std::ffi::{c_char, c_int, c_void};

    #[repr(C)]
    pub struct seekcamera_manager_t {
        _private: [u8; 0],
    }

    #[repr(C)]
    pub struct seekcamera_t {
        _private: [u8; 0],
    }

    #[repr(C)]
    pub struct seekcamera_frame_t {
        _private: [u8; 0],
    }

    #[repr(C)]
    pub struct seekframe_t {
        _private: [u8; 0],
    }

    pub type seekcamera_error_t = c_int;
    pub type seekcamera_chipid_t = [c_char; 16];

    pub const SEEKCAMERA_SUCCESS: seekcamera_error_t = 0;
    pub const SEEKCAMERA_IO_TYPE_USB: u32 = 1;

    pub const SEEKCAMERA_MANAGER_EVENT_CONNECT: c_int = 0;
    pub const SEEKCAMERA_MANAGER_EVENT_DISCONNECT: c_int = 1;
    pub const SEEKCAMERA_MANAGER_EVENT_ERROR: c_int = 2;
    pub const SEEKCAMERA_MANAGER_EVENT_READY_TO_PAIR: c_int = 3;

    pub type seekcamera_manager_event_callback_t = unsafe extern "C" fn(
        camera: *mut seekcamera_t,
        event: c_int,
        event_status: seekcamera_error_t,
        user_data: *mut c_void,
    );

    pub type seekcamera_frame_available_callback_t = unsafe extern "C" fn(
        camera: *mut seekcamera_t,
        camera_frame: *mut seekcamera_frame_t,
        user_data: *mut c_void,
    );

    #[link(name = "seekcamera")]
    extern "C" {
        pub fn seekcamera_manager_create(
            manager: *mut *mut seekcamera_manager_t,
            discovery_mode: u32,
        ) -> seekcamera_error_t;
        pub fn seekcamera_manager_destroy(
            manager: *mut *mut seekcamera_manager_t,
        ) -> seekcamera_error_t;
        pub fn seekcamera_manager_register_event_callback(
            manager: *mut seekcamera_manager_t,
            callback: seekcamera_manager_event_callback_t,
            user_data: *mut c_void,
        ) -> seekcamera_error_t;

        pub fn seekcamera_error_get_str(status: seekcamera_error_t) -> *const c_char;

        pub fn seekcamera_get_chipid(
            camera: *mut seekcamera_t,
            chipid: *mut seekcamera_chipid_t,
        ) -> seekcamera_error_t;
        pub fn seekcamera_register_frame_available_callback(
            camera: *mut seekcamera_t,
            callback: seekcamera_frame_available_callback_t,
            user_data: *mut c_void,
        ) -> seekcamera_error_t;
        pub fn seekcamera_set_pipeline_mode(
            camera: *mut seekcamera_t,
            mode: c_int,
        ) -> seekcamera_error_t;
        pub fn seekcamera_capture_session_start(
            camera: *mut seekcamera_t,
            frame_format: u32,
        ) -> seekcamera_error_t;
        pub fn seekcamera_capture_session_stop(camera: *mut seekcamera_t) -> seekcamera_error_t;
        pub fn seekcamera_set_shutter_mode(
            camera: *mut seekcamera_t,
            mode: c_int,
        ) -> seekcamera_error_t;
        pub fn seekcamera_set_color_palette(
            camera: *mut seekcamera_t,
            palette: c_int,
        ) -> seekcamera_error_t;
        pub fn seekcamera_shutter_trigger(camera: *mut seekcamera_t) -> seekcamera_error_t;
        pub fn seekcamera_store_calibration_data(
            camera: *mut seekcamera_t,
            source_dir: *const c_char,
            callback: *const c_void,
            user_data: *mut c_void,
        ) -> seekcamera_error_t;

        pub fn seekcamera_frame_lock(camera_frame: *mut seekcamera_frame_t) -> seekcamera_error_t;
        pub fn seekcamera_frame_unlock(camera_frame: *mut seekcamera_frame_t)
            -> seekcamera_error_t;
        pub fn seekcamera_frame_get_frame_by_format(
            camera_frame: *mut seekcamera_frame_t,
            format: u32,
            frame: *mut *mut seekframe_t,
        ) -> seekcamera_error_t;

        pub fn seekframe_get_width(frame: *mut seekframe_t) -> usize;
        pub fn seekframe_get_height(frame: *mut seekframe_t) -> usize;
        pub fn seekframe_get_data(frame: *mut seekframe_t) -> *mut c_void;
        pub fn seekframe_get_data_size(frame: *mut seekframe_t) -> usize;
    }
}

fn status(code: ffi::seekcamera_error_t) -> SdkStatus {
    let description = unsafe {
        let text = ffi::seekcamera_error_get_str(code);
        if text.is_null() {
            String::from("unknown error")
        } else {
            CStr::from_ptr(text).to_string_lossy().into_owned()
        }
    };
    SdkStatus::new(code, description)
}

fn check(code: ffi::seekcamera_error_t) -> SdkResult {
    if code == ffi::SEEKCAMERA_SUCCESS {
        Ok(())
    } else {
        Err(status(code))
    }
}

/// One camera reported by the vendor manager
pub struct SeekSensor {
    camera: *mut ffi::seekcamera_t,
    id: CameraId,
    /// Target of the frame callback's user-data pointer
    frame_sink: Box<FrameSinkSlot>,
    callback_registered: Mutex<bool>,
}

// The SDK serializes calls per camera handle internally.
unsafe impl Send for SeekSensor {}
unsafe impl Sync for SeekSensor {}

impl SeekSensor {
    fn new(camera: *mut ffi::seekcamera_t) -> Self {
        let mut chipid: ffi::seekcamera_chipid_t = [0; 16];
        let id = match check(unsafe { ffi::seekcamera_get_chipid(camera, &mut chipid) }) {
            Ok(()) => {
                let bytes: Vec<u8> = chipid
                    .iter()
                    .take_while(|&&c| c != 0)
                    .map(|&c| c as u8)
                    .collect();
                CameraId::from(String::from_utf8_lossy(&bytes).into_owned())
            }
            Err(status) => {
                warn!("failed to read camera chip id: {}", status);
                CameraId::from(format!("{:p}", camera))
            }
        };
        Self {
            camera,
            id,
            frame_sink: Box::new(FrameSinkSlot::new()),
            callback_registered: Mutex::new(false),
        }
    }
}

unsafe extern "C" fn frame_available_trampoline(
    _camera: *mut ffi::seekcamera_t,
    camera_frame: *mut ffi::seekcamera_frame_t,
    user_data: *mut c_void,
) {
    if user_data.is_null() || camera_frame.is_null() {
        return;
    }
    let slot = &*(user_data as *const FrameSinkSlot);
    let frame = SeekFrame {
        frame: camera_frame,
    };
    slot.deliver(&frame);
}

impl SensorHandle for SeekSensor {
    fn identity(&self) -> CameraId {
        self.id.clone()
    }

    fn register_frame_sink(&self, sink: Arc<dyn FrameSink>) -> SdkResult {
        let mut registered = self.callback_registered.lock();
        if !*registered {
            let user_data = &*self.frame_sink as *const FrameSinkSlot as *mut c_void;
            check(unsafe {
                ffi::seekcamera_register_frame_available_callback(
                    self.camera,
                    frame_available_trampoline,
                    user_data,
                )
            })?;
            *registered = true;
        }
        // The previous sink may still be finishing a frame on the SDK thread
        // and is kept alive by that delivery's own reference.
        self.frame_sink.replace(sink);
        Ok(())
    }

    fn set_pipeline_mode(&self, mode: PipelineMode) -> SdkResult {
        check(unsafe { ffi::seekcamera_set_pipeline_mode(self.camera, mode.vendor_code()) })
    }

    fn capture_session_start(&self, format: FrameFormat) -> SdkResult {
        check(unsafe {
            ffi::seekcamera_capture_session_start(self.camera, format.vendor_code() as u32)
        })
    }

    fn capture_session_stop(&self) -> SdkResult {
        check(unsafe { ffi::seekcamera_capture_session_stop(self.camera) })
    }

    fn set_shutter_mode(&self, mode: ShutterMode) -> SdkResult {
        check(unsafe { ffi::seekcamera_set_shutter_mode(self.camera, mode.vendor_code()) })
    }

    fn set_color_palette(&self, palette: ColorPalette) -> SdkResult {
        check(unsafe { ffi::seekcamera_set_color_palette(self.camera, palette.vendor_code()) })
    }

    fn trigger_shutter(&self) -> SdkResult {
        check(unsafe { ffi::seekcamera_shutter_trigger(self.camera) })
    }

    fn store_calibration_data(&self) -> SdkResult {
        check(unsafe {
            ffi::seekcamera_store_calibration_data(
                self.camera,
                ptr::null(),
                ptr::null(),
                ptr::null_mut(),
            )
        })
    }
}

struct SeekFrame {
    frame: *mut ffi::seekcamera_frame_t,
}

impl SensorFrame for SeekFrame {
    fn lock(&self) {
        if let Err(status) = check(unsafe { ffi::seekcamera_frame_lock(self.frame) }) {
            debug!("failed to lock frame: {}", status);
        }
    }

    fn unlock(&self) {
        if let Err(status) = check(unsafe { ffi::seekcamera_frame_unlock(self.frame) }) {
            debug!("failed to unlock frame: {}", status);
        }
    }

    fn frame_by_format(&self, format: FrameFormat) -> SdkResult<FrameView<'_>> {
        let mut frame: *mut ffi::seekframe_t = ptr::null_mut();
        check(unsafe {
            ffi::seekcamera_frame_get_frame_by_format(
                self.frame,
                format.vendor_code() as u32,
                &mut frame,
            )
        })?;
        if frame.is_null() {
            return Err(SdkStatus::new(-1, "frame format not available"));
        }

        unsafe {
            let width = ffi::seekframe_get_width(frame) as u32;
            let height = ffi::seekframe_get_height(frame) as u32;
            let size = ffi::seekframe_get_data_size(frame);
            let data = ffi::seekframe_get_data(frame) as *const u8;
            let data = if data.is_null() || size == 0 {
                &[][..]
            } else {
                std::slice::from_raw_parts(data, size)
            };
            Ok(FrameView::new(width, height, data))
        }
    }
}

/// Target of the manager callback's user-data pointer
struct ManagerContext {
    sink: Arc<dyn LifecycleSink>,
    sensors: Mutex<HashMap<usize, Arc<SeekSensor>>>,
}

impl ManagerContext {
    fn sensor(&self, camera: *mut ffi::seekcamera_t) -> Arc<SeekSensor> {
        let mut sensors = self.sensors.lock();
        Arc::clone(
            sensors
                .entry(camera as usize)
                .or_insert_with(|| Arc::new(SeekSensor::new(camera))),
        )
    }
}

unsafe extern "C" fn manager_event_trampoline(
    camera: *mut ffi::seekcamera_t,
    event: c_int,
    event_status: ffi::seekcamera_error_t,
    user_data: *mut c_void,
) {
    if user_data.is_null() || camera.is_null() {
        return;
    }
    let context = &*(user_data as *const ManagerContext);
    let event = match event {
        ffi::SEEKCAMERA_MANAGER_EVENT_CONNECT => DiscoveryEvent::Connected,
        ffi::SEEKCAMERA_MANAGER_EVENT_DISCONNECT => DiscoveryEvent::Disconnected,
        ffi::SEEKCAMERA_MANAGER_EVENT_READY_TO_PAIR => DiscoveryEvent::ReadyToPair,
        ffi::SEEKCAMERA_MANAGER_EVENT_ERROR => DiscoveryEvent::Error(status(event_status)),
        other => {
            debug!("Ignoring unknown camera manager event {}", other);
            return;
        }
    };
    let sensor = context.sensor(camera);
    context.sink.on_discovery_event(sensor, event);
}

struct ManagerState {
    manager: *mut ffi::seekcamera_manager_t,
    context: Box<ManagerContext>,
}

/// USB discovery through the vendor camera manager
#[derive(Default)]
pub struct SeekSensorManager {
    state: Mutex<Option<ManagerState>>,
}

// The raw manager pointer is only used under the state lock.
unsafe impl Send for SeekSensorManager {}
unsafe impl Sync for SeekSensorManager {}

impl SeekSensorManager {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SensorManager for SeekSensorManager {
    fn subscribe(&self, sink: Arc<dyn LifecycleSink>) -> SdkResult {
        let mut state = self.state.lock();
        if state.is_some() {
            return Err(SdkStatus::new(-1, "camera manager already subscribed"));
        }

        let mut manager: *mut ffi::seekcamera_manager_t = ptr::null_mut();
        check(unsafe {
            ffi::seekcamera_manager_create(&mut manager, ffi::SEEKCAMERA_IO_TYPE_USB)
        })?;

        let context = Box::new(ManagerContext {
            sink,
            sensors: Mutex::new(HashMap::new()),
        });
        let user_data = &*context as *const ManagerContext as *mut c_void;
        if let Err(status) = check(unsafe {
            ffi::seekcamera_manager_register_event_callback(
                manager,
                manager_event_trampoline,
                user_data,
            )
        }) {
            unsafe {
                ffi::seekcamera_manager_destroy(&mut manager);
            }
            return Err(status);
        }

        *state = Some(ManagerState { manager, context });
        Ok(())
    }

    fn unsubscribe(&self) {
        let Some(mut state) = self.state.lock().take() else {
            return;
        };
        // Destroying the manager joins its event thread, so the context is unused afterwards
        if let Err(status) = check(unsafe { ffi::seekcamera_manager_destroy(&mut state.manager) })
        {
            error!("failed to destroy camera manager: {}", status);
        }
        drop(state.context);
    }
}

impl Drop for SeekSensorManager {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

