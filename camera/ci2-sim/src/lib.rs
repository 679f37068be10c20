//! Simulated camera backend for [ci2].
//!
//! The simulated device behaves like a GenICam camera with an incrementally
//! validated region of interest: `Width`, `Height`, `OffsetX` and `OffsetY`
//! may only be written while acquisition is stopped, and each write is checked
//! against the current values of the others. Frames are rendered from a
//! [FramePattern] at the current readout size.
//!
//! For testing, faults can be injected at any device call ([FaultSite]) and
//! every state-changing call is recorded ([DeviceOp]). Calls made after a
//! handle was closed are counted ([SimCamera::use_after_close_count]).

use std::sync::{
    Arc,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use ci2::{AccessMode, FrameStatus, HostTimingInfo, feature};
use machine_vision_formats::PixFmt;

mod pattern;
pub use pattern::FramePattern;
use pattern::Readout;

/// Error codes reported by the simulated device.
pub mod codes {
    pub const INVALID_PARAMETER: i32 = -5;
    pub const INVALID_ACCESS: i32 = -8;
    pub const NOT_IMPLEMENTED: i32 = -13;
    /// Code used for faults added with [super::SimCamera::inject_fault].
    pub const INJECTED: i32 = -99;
}

const SENSOR_WIDTH: &str = "SensorWidth";
const SENSOR_HEIGHT: &str = "SensorHeight";

/// Static description of a simulated camera.
#[derive(Debug, Clone)]
pub struct SimSensor {
    pub serial: String,
    pub model: String,
    pub vendor: String,
    pub sensor_width: u32,
    pub sensor_height: u32,
    /// Time to expose and read out one frame.
    pub frame_interval: Duration,
    pub pixel_format: PixFmt,
    pub pattern: FramePattern,
    /// Whether the chunk data features are implemented.
    pub supports_chunks: bool,
    pub stream_count: u32,
    /// Every `n`th frame is delivered with status [FrameStatus::Incomplete].
    pub incomplete_every: Option<u64>,
}

impl Default for SimSensor {
    fn default() -> Self {
        Self {
            serial: "SIM0001".into(),
            model: "SIM-1280C".into(),
            vendor: "Simulated".into(),
            sensor_width: 1280,
            sensor_height: 1024,
            frame_interval: Duration::from_millis(10),
            pixel_format: PixFmt::RGB8,
            pattern: FramePattern::default(),
            supports_chunks: true,
            stream_count: 1,
            incomplete_every: None,
        }
    }
}

impl SimSensor {
    pub fn with_serial(mut self, serial: &str) -> Self {
        self.serial = serial.into();
        self
    }
    pub fn with_pattern(mut self, pattern: FramePattern) -> Self {
        self.pattern = pattern;
        self
    }
    pub fn with_frame_interval(mut self, frame_interval: Duration) -> Self {
        self.frame_interval = frame_interval;
        self
    }
    pub fn with_pixel_format(mut self, pixel_format: PixFmt) -> Self {
        self.pixel_format = pixel_format;
        self
    }
    pub fn without_chunks(mut self) -> Self {
        self.supports_chunks = false;
        self
    }
    pub fn with_stream_count(mut self, stream_count: u32) -> Self {
        self.stream_count = stream_count;
        self
    }
    pub fn with_incomplete_every(mut self, n: u64) -> Self {
        self.incomplete_every = Some(n);
        self
    }
}

/// A state-changing call made on the simulated device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceOp {
    Command(String),
    SetInt(String, i64),
    SetBool(String, bool),
    SetEnum(String, String),
    StartGrab,
    StopGrab,
    CloseStream,
    CloseCamera,
}

/// A device call at which a fault can be injected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultSite {
    Command(String),
    FeatureWrite(String),
    StartGrab,
    StopGrab,
    Acquire,
}

#[derive(Debug)]
struct Fault {
    site: FaultSite,
    /// `None` fails forever.
    remaining: Option<usize>,
}

#[derive(Debug)]
struct State {
    width: u32,
    height: u32,
    offset_x: u32,
    offset_y: u32,
    acquiring: bool,
    grabbing: bool,
    camera_open: bool,
    stream_open: bool,
    chunk_mode_active: bool,
    chunk_selector: String,
    chunk_enable: bool,
    frame_count: u64,
    faults: Vec<Fault>,
}

impl State {
    fn readout(&self) -> Readout {
        Readout {
            width: self.width,
            height: self.height,
            offset_x: self.offset_x,
            offset_y: self.offset_y,
        }
    }
    fn streaming(&self) -> bool {
        self.acquiring && self.grabbing
    }
}

struct Device {
    name: String,
    sensor: SimSensor,
    state: Mutex<State>,
    frame_ready: Condvar,
    ops: Mutex<Vec<DeviceOp>>,
    use_after_close: AtomicUsize,
    library_live: Arc<AtomicBool>,
}

impl Device {
    fn new(sensor: SimSensor, library_live: Arc<AtomicBool>) -> Self {
        let state = State {
            width: sensor.sensor_width,
            height: sensor.sensor_height,
            offset_x: 0,
            offset_y: 0,
            acquiring: false,
            grabbing: false,
            camera_open: false,
            stream_open: false,
            chunk_mode_active: false,
            chunk_selector: "FrameID".into(),
            chunk_enable: false,
            frame_count: 0,
            faults: Vec::new(),
        };
        Self {
            name: format!("{}-{}", sensor.vendor, sensor.serial),
            sensor,
            state: Mutex::new(state),
            frame_ready: Condvar::new(),
            ops: Mutex::new(Vec::new()),
            use_after_close: AtomicUsize::new(0),
            library_live,
        }
    }

    fn record(&self, op: DeviceOp) {
        trace!("{}: {:?}", self.name, op);
        self.ops.lock().push(op);
    }

    fn check_camera(&self, state: &State) -> ci2::Result<()> {
        if !state.camera_open || !self.library_live.load(Ordering::SeqCst) {
            self.use_after_close.fetch_add(1, Ordering::SeqCst);
            return Err(ci2::Error::Closed);
        }
        Ok(())
    }

    fn check_stream(&self, state: &State) -> ci2::Result<()> {
        self.check_camera(state)?;
        if !state.stream_open {
            self.use_after_close.fetch_add(1, Ordering::SeqCst);
            return Err(ci2::Error::Closed);
        }
        Ok(())
    }

    fn take_fault(&self, state: &mut State, site: &FaultSite) -> ci2::Result<()> {
        let Some(idx) = state.faults.iter().position(|f| &f.site == site) else {
            return Ok(());
        };
        let fault = &mut state.faults[idx];
        if let Some(remaining) = fault.remaining.as_mut() {
            *remaining -= 1;
            if *remaining == 0 {
                state.faults.remove(idx);
            }
        }
        debug!("{}: injected fault at {:?}", self.name, site);
        Err(ci2::Error::Device {
            code: codes::INJECTED,
            msg: format!("injected fault at {site:?}"),
        })
    }

    fn is_implemented(&self, name: &str) -> bool {
        match name {
            feature::WIDTH
            | feature::HEIGHT
            | feature::OFFSET_X
            | feature::OFFSET_Y
            | feature::ACQUISITION_START
            | feature::ACQUISITION_STOP
            | SENSOR_WIDTH
            | SENSOR_HEIGHT => true,
            feature::CHUNK_MODE_ACTIVE | feature::CHUNK_SELECTOR | feature::CHUNK_ENABLE => {
                self.sensor.supports_chunks
            }
            _ => false,
        }
    }

    fn is_writable(&self, state: &State, name: &str) -> bool {
        if !self.is_implemented(name) {
            return false;
        }
        match name {
            feature::ACQUISITION_START | feature::ACQUISITION_STOP => true,
            SENSOR_WIDTH | SENSOR_HEIGHT => false,
            feature::CHUNK_SELECTOR | feature::CHUNK_ENABLE => {
                state.chunk_mode_active && !state.acquiring
            }
            _ => !state.acquiring,
        }
    }

    fn require(&self, name: &str) -> ci2::Result<()> {
        if self.is_implemented(name) {
            Ok(())
        } else {
            Err(ci2::Error::FeatureNotPresent(name.to_string()))
        }
    }

    fn require_writable(&self, state: &State, name: &str) -> ci2::Result<()> {
        self.require(name)?;
        if self.is_writable(state, name) {
            Ok(())
        } else {
            Err(ci2::Error::Device {
                code: codes::INVALID_ACCESS,
                msg: format!("{name} is not writable now"),
            })
        }
    }

    /// Valid range for an ROI feature given the current values of the others.
    fn int_range(&self, state: &State, name: &str) -> (i64, i64) {
        let sw = self.sensor.sensor_width as i64;
        let sh = self.sensor.sensor_height as i64;
        match name {
            feature::WIDTH => (1, sw - state.offset_x as i64),
            feature::HEIGHT => (1, sh - state.offset_y as i64),
            feature::OFFSET_X => (0, sw - state.width as i64),
            feature::OFFSET_Y => (0, sh - state.height as i64),
            _ => (0, 0),
        }
    }
}

// ---------------------------
// module

/// Enumerates and opens simulated cameras.
pub struct SimModule {
    devices: Vec<Arc<Device>>,
    library_live: Arc<AtomicBool>,
}

/// Create a module with a single default camera.
pub fn new_module() -> ci2::Result<SimModule> {
    Ok(SimModule::new(vec![SimSensor::default()]))
}

impl SimModule {
    pub fn new(sensors: Vec<SimSensor>) -> Self {
        let library_live = Arc::new(AtomicBool::new(true));
        let devices = sensors
            .into_iter()
            .map(|s| Arc::new(Device::new(s, library_live.clone())))
            .collect();
        Self {
            devices,
            library_live,
        }
    }

    /// Return a handle to the camera with this serial without opening it.
    ///
    /// Used by tests to inspect the device after it was handed to other code.
    pub fn inspect(&self, serial: &str) -> Option<SimCamera> {
        self.devices
            .iter()
            .find(|d| d.sensor.serial == serial)
            .map(|dev| SimCamera { dev: dev.clone() })
    }

    pub fn is_initialized(&self) -> bool {
        self.library_live.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct SimCameraInfo {
    name: String,
    serial: String,
    model: String,
    vendor: String,
}

impl ci2::CameraInfo for SimCameraInfo {
    fn name(&self) -> &str {
        &self.name
    }
    fn serial(&self) -> &str {
        &self.serial
    }
    fn model(&self) -> &str {
        &self.model
    }
    fn vendor(&self) -> &str {
        &self.vendor
    }
}

impl ci2::CameraModule for SimModule {
    type CameraType = SimCamera;

    fn name(&self) -> &str {
        "sim"
    }

    fn camera_infos(&self, _timeout: Duration) -> ci2::Result<Vec<Box<dyn ci2::CameraInfo>>> {
        if !self.is_initialized() {
            return Err(ci2::Error::Closed);
        }
        let infos = self
            .devices
            .iter()
            .map(|dev| {
                let ci: Box<dyn ci2::CameraInfo> = Box::new(SimCameraInfo {
                    name: dev.name.clone(),
                    serial: dev.sensor.serial.clone(),
                    model: dev.sensor.model.clone(),
                    vendor: dev.sensor.vendor.clone(),
                });
                ci
            })
            .collect();
        Ok(infos)
    }

    fn camera(&mut self, serial: &str, access: AccessMode) -> ci2::Result<SimCamera> {
        if !self.is_initialized() {
            return Err(ci2::Error::Closed);
        }
        let dev = self
            .devices
            .iter()
            .find(|d| d.sensor.serial == serial)
            .ok_or_else(|| ci2::Error::from(format!("requested camera '{serial}' was not found")))?;
        {
            let mut state = dev.state.lock();
            if state.camera_open && access == AccessMode::Exclusive {
                return Err(ci2::Error::Device {
                    code: codes::INVALID_ACCESS,
                    msg: format!("camera '{serial}' is already open"),
                });
            }
            state.camera_open = true;
        }
        debug!("opened simulated camera {} ({:?})", dev.name, access);
        Ok(SimCamera { dev: dev.clone() })
    }

    fn uninit(&mut self) -> ci2::Result<()> {
        self.library_live.store(false, Ordering::SeqCst);
        for dev in self.devices.iter() {
            dev.frame_ready.notify_all();
        }
        Ok(())
    }
}

// ---------------------------
// camera

#[derive(Clone)]
pub struct SimCamera {
    dev: Arc<Device>,
}

fn _test_camera_is_send() {
    // Compile-time test to ensure SimCamera implements Send and Sync traits.
    fn implements<T: Send + Sync>() {}
    implements::<SimCamera>();
    implements::<SimStream>();
}

impl SimCamera {
    /// All state-changing calls made so far, oldest first.
    pub fn operations(&self) -> Vec<DeviceOp> {
        self.dev.ops.lock().clone()
    }

    pub fn clear_operations(&self) {
        self.dev.ops.lock().clear();
    }

    /// Fail the next `times` calls at `site`, or every call if `None`.
    pub fn inject_fault(&self, site: FaultSite, times: Option<usize>) {
        self.dev.state.lock().faults.push(Fault {
            site,
            remaining: times,
        });
    }

    pub fn clear_faults(&self) {
        self.dev.state.lock().faults.clear();
    }

    /// Number of calls made on a closed camera, stream or library.
    pub fn use_after_close_count(&self) -> usize {
        self.dev.use_after_close.load(Ordering::SeqCst)
    }

    /// Current `(width, height, offset_x, offset_y)`.
    pub fn readout(&self) -> (u32, u32, u32, u32) {
        let s = self.dev.state.lock();
        (s.width, s.height, s.offset_x, s.offset_y)
    }

    pub fn is_acquiring(&self) -> bool {
        self.dev.state.lock().acquiring
    }

    pub fn is_grabbing(&self) -> bool {
        self.dev.state.lock().grabbing
    }

    pub fn is_open(&self) -> bool {
        self.dev.state.lock().camera_open
    }

    /// Number of frames delivered by all streams of this camera.
    pub fn frames_delivered(&self) -> u64 {
        self.dev.state.lock().frame_count
    }
}

impl ci2::CameraInfo for SimCamera {
    fn name(&self) -> &str {
        &self.dev.name
    }
    fn serial(&self) -> &str {
        &self.dev.sensor.serial
    }
    fn model(&self) -> &str {
        &self.dev.sensor.model
    }
    fn vendor(&self) -> &str {
        &self.dev.sensor.vendor
    }
}

impl ci2::Camera for SimCamera {
    type StreamType = SimStream;

    fn stream_count(&self) -> ci2::Result<u32> {
        let state = self.dev.state.lock();
        self.dev.check_camera(&state)?;
        Ok(self.dev.sensor.stream_count)
    }

    fn open_stream(&self, index: u32) -> ci2::Result<SimStream> {
        let mut state = self.dev.state.lock();
        self.dev.check_camera(&state)?;
        if index >= self.dev.sensor.stream_count {
            return Err(ci2::Error::Device {
                code: codes::INVALID_PARAMETER,
                msg: format!("no stream with index {index}"),
            });
        }
        state.stream_open = true;
        Ok(SimStream {
            dev: self.dev.clone(),
        })
    }

    fn is_implemented(&self, name: &str) -> ci2::Result<bool> {
        let state = self.dev.state.lock();
        self.dev.check_camera(&state)?;
        Ok(self.dev.is_implemented(name))
    }

    fn is_writable(&self, name: &str) -> ci2::Result<bool> {
        let state = self.dev.state.lock();
        self.dev.check_camera(&state)?;
        Ok(self.dev.is_writable(&state, name))
    }

    fn command_execute(&self, name: &str) -> ci2::Result<()> {
        let mut state = self.dev.state.lock();
        self.dev.check_camera(&state)?;
        self.dev.require(name)?;
        self.dev
            .take_fault(&mut state, &FaultSite::Command(name.to_string()))?;
        match name {
            feature::ACQUISITION_START => {
                state.acquiring = true;
                self.dev.frame_ready.notify_all();
            }
            feature::ACQUISITION_STOP => {
                state.acquiring = false;
            }
            _ => {
                return Err(ci2::Error::Device {
                    code: codes::INVALID_PARAMETER,
                    msg: format!("{name} is not a command"),
                });
            }
        }
        self.dev.record(DeviceOp::Command(name.to_string()));
        Ok(())
    }

    fn feature_bool(&self, name: &str) -> ci2::Result<bool> {
        let state = self.dev.state.lock();
        self.dev.check_camera(&state)?;
        self.dev.require(name)?;
        match name {
            feature::CHUNK_MODE_ACTIVE => Ok(state.chunk_mode_active),
            feature::CHUNK_ENABLE => Ok(state.chunk_enable),
            _ => Err(ci2::Error::FeatureNotPresent(name.to_string())),
        }
    }

    fn feature_bool_set(&self, name: &str, value: bool) -> ci2::Result<()> {
        let mut state = self.dev.state.lock();
        self.dev.check_camera(&state)?;
        self.dev
            .take_fault(&mut state, &FaultSite::FeatureWrite(name.to_string()))?;
        self.dev.require_writable(&state, name)?;
        match name {
            feature::CHUNK_MODE_ACTIVE => state.chunk_mode_active = value,
            feature::CHUNK_ENABLE => state.chunk_enable = value,
            _ => return Err(ci2::Error::FeatureNotPresent(name.to_string())),
        }
        self.dev.record(DeviceOp::SetBool(name.to_string(), value));
        Ok(())
    }

    fn feature_enum(&self, name: &str) -> ci2::Result<String> {
        let state = self.dev.state.lock();
        self.dev.check_camera(&state)?;
        self.dev.require(name)?;
        match name {
            feature::CHUNK_SELECTOR => Ok(state.chunk_selector.clone()),
            _ => Err(ci2::Error::FeatureNotPresent(name.to_string())),
        }
    }

    fn feature_enum_set(&self, name: &str, value: &str) -> ci2::Result<()> {
        let mut state = self.dev.state.lock();
        self.dev.check_camera(&state)?;
        self.dev
            .take_fault(&mut state, &FaultSite::FeatureWrite(name.to_string()))?;
        self.dev.require_writable(&state, name)?;
        match (name, value) {
            (feature::CHUNK_SELECTOR, "FrameID" | "Timestamp") => {
                state.chunk_selector = value.to_string();
            }
            (feature::CHUNK_SELECTOR, _) => {
                return Err(ci2::Error::Device {
                    code: codes::INVALID_PARAMETER,
                    msg: format!("{value} is not a valid {name}"),
                });
            }
            _ => return Err(ci2::Error::FeatureNotPresent(name.to_string())),
        }
        self.dev
            .record(DeviceOp::SetEnum(name.to_string(), value.to_string()));
        Ok(())
    }

    fn feature_int(&self, name: &str) -> ci2::Result<i64> {
        let state = self.dev.state.lock();
        self.dev.check_camera(&state)?;
        self.dev.require(name)?;
        let value = match name {
            feature::WIDTH => state.width,
            feature::HEIGHT => state.height,
            feature::OFFSET_X => state.offset_x,
            feature::OFFSET_Y => state.offset_y,
            SENSOR_WIDTH => self.dev.sensor.sensor_width,
            SENSOR_HEIGHT => self.dev.sensor.sensor_height,
            _ => return Err(ci2::Error::FeatureNotPresent(name.to_string())),
        };
        Ok(value.into())
    }

    fn feature_int_set(&self, name: &str, value: i64) -> ci2::Result<()> {
        let mut state = self.dev.state.lock();
        self.dev.check_camera(&state)?;
        self.dev
            .take_fault(&mut state, &FaultSite::FeatureWrite(name.to_string()))?;
        self.dev.require_writable(&state, name)?;
        let (min, max) = self.dev.int_range(&state, name);
        if value < min || value > max {
            return Err(ci2::Error::Device {
                code: codes::INVALID_PARAMETER,
                msg: format!("{name}={value} out of range [{min}, {max}]"),
            });
        }
        let value_u32: u32 = value.try_into()?;
        match name {
            feature::WIDTH => state.width = value_u32,
            feature::HEIGHT => state.height = value_u32,
            feature::OFFSET_X => state.offset_x = value_u32,
            feature::OFFSET_Y => state.offset_y = value_u32,
            _ => {
                return Err(ci2::Error::Device {
                    code: codes::NOT_IMPLEMENTED,
                    msg: format!("{name} cannot be set"),
                });
            }
        }
        self.dev.record(DeviceOp::SetInt(name.to_string(), value));
        Ok(())
    }

    fn close(&self) -> ci2::Result<()> {
        let mut state = self.dev.state.lock();
        self.dev.check_camera(&state)?;
        state.camera_open = false;
        state.stream_open = false;
        state.grabbing = false;
        state.acquiring = false;
        self.dev.frame_ready.notify_all();
        self.dev.record(DeviceOp::CloseCamera);
        Ok(())
    }
}

// ---------------------------
// stream

pub struct SimStream {
    dev: Arc<Device>,
}

impl ci2::Stream for SimStream {
    type FrameType = SimFrame;

    fn start_grab(&self) -> ci2::Result<()> {
        let mut state = self.dev.state.lock();
        self.dev.check_stream(&state)?;
        self.dev.take_fault(&mut state, &FaultSite::StartGrab)?;
        state.grabbing = true;
        self.dev.frame_ready.notify_all();
        self.dev.record(DeviceOp::StartGrab);
        Ok(())
    }

    fn stop_grab(&self) -> ci2::Result<()> {
        let mut state = self.dev.state.lock();
        self.dev.check_stream(&state)?;
        self.dev.take_fault(&mut state, &FaultSite::StopGrab)?;
        state.grabbing = false;
        self.dev.record(DeviceOp::StopGrab);
        Ok(())
    }

    fn close(&self) -> ci2::Result<()> {
        let mut state = self.dev.state.lock();
        self.dev.check_stream(&state)?;
        state.stream_open = false;
        state.grabbing = false;
        self.dev.frame_ready.notify_all();
        self.dev.record(DeviceOp::CloseStream);
        Ok(())
    }

    fn acquire(&self, timeout: Duration) -> ci2::Result<SimFrame> {
        let deadline = Instant::now() + timeout;
        loop {
            {
                let mut state = self.dev.state.lock();
                loop {
                    self.dev.check_stream(&state)?;
                    if state.streaming() {
                        break;
                    }
                    if self
                        .dev
                        .frame_ready
                        .wait_until(&mut state, deadline)
                        .timed_out()
                    {
                        return Err(ci2::Error::Timeout);
                    }
                }
            }

            // Expose and read out without holding the device lock.
            let remaining = deadline.saturating_duration_since(Instant::now());
            if self.dev.sensor.frame_interval > remaining {
                std::thread::sleep(remaining);
                return Err(ci2::Error::Timeout);
            }
            std::thread::sleep(self.dev.sensor.frame_interval);

            let mut state = self.dev.state.lock();
            self.dev.check_stream(&state)?;
            if !state.streaming() {
                // stopped during exposure, the frame is discarded
                continue;
            }
            self.dev.take_fault(&mut state, &FaultSite::Acquire)?;
            state.frame_count += 1;
            let fno = state.frame_count;
            let readout = state.readout();
            let frame_id = if state.chunk_mode_active {
                Some(fno as i64)
            } else {
                None
            };
            drop(state);

            let status = match self.dev.sensor.incomplete_every {
                Some(n) if n > 0 && fno % n == 0 => FrameStatus::Incomplete,
                _ => FrameStatus::Success,
            };
            let pixel_format = self.dev.sensor.pixel_format;
            let data = self.dev.sensor.pattern.render(&readout, pixel_format);
            return Ok(SimFrame {
                status,
                width: readout.width,
                height: readout.height,
                pixel_format,
                data,
                host_timing: HostTimingInfo {
                    fno: fno as usize,
                    datetime: chrono::Utc::now(),
                },
                frame_id,
            });
        }
    }
}

// ---------------------------
// frame

pub struct SimFrame {
    status: FrameStatus,
    width: u32,
    height: u32,
    pixel_format: PixFmt,
    data: Vec<u8>,
    host_timing: HostTimingInfo,
    frame_id: Option<i64>,
}

impl ci2::AcquiredFrame for SimFrame {
    fn status(&self) -> FrameStatus {
        self.status
    }
    fn width(&self) -> u32 {
        self.width
    }
    fn height(&self) -> u32 {
        self.height
    }
    fn pixel_format(&self) -> PixFmt {
        self.pixel_format
    }
    fn host_timing(&self) -> &HostTimingInfo {
        &self.host_timing
    }
    fn chunk_int(&self, name: &str) -> ci2::Result<i64> {
        match (name, self.frame_id) {
            (feature::CHUNK_FRAME_ID, Some(id)) => Ok(id),
            _ => Err(ci2::Error::FeatureNotPresent(name.to_string())),
        }
    }
    fn to_rgb24(&self) -> ci2::Result<Vec<u8>> {
        pattern::to_rgb24(self.pixel_format, &self.data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ci2::{AcquiredFrame, Camera, CameraModule, Stream};
    use test_log::test;

    fn open_default() -> (SimModule, SimCamera, SimStream) {
        let mut module = SimModule::new(vec![
            SimSensor::default().with_frame_interval(Duration::from_millis(1)),
        ]);
        let cam = module.camera("SIM0001", AccessMode::Exclusive).unwrap();
        let stream = cam.open_stream(0).unwrap();
        (module, cam, stream)
    }

    #[test]
    fn roi_writes_are_validated_incrementally() {
        let (_module, cam, _stream) = open_default();
        cam.feature_int_set(feature::WIDTH, 440).unwrap();
        cam.feature_int_set(feature::OFFSET_X, 24).unwrap();
        // 1280 - 24 is the widest allowed with this offset
        let err = cam.feature_int_set(feature::WIDTH, 1280).unwrap_err();
        assert_eq!(err.code(), Some(codes::INVALID_PARAMETER));
        cam.feature_int_set(feature::WIDTH, 1256).unwrap();
        assert_eq!(cam.readout(), (1256, 1024, 24, 0));
    }

    #[test]
    fn roi_not_writable_while_acquiring() {
        let (_module, cam, _stream) = open_default();
        cam.acquisition_start().unwrap();
        assert!(!cam.is_writable(feature::HEIGHT).unwrap());
        let err = cam.feature_int_set(feature::HEIGHT, 100).unwrap_err();
        assert_eq!(err.code(), Some(codes::INVALID_ACCESS));
        cam.acquisition_stop().unwrap();
        cam.feature_int_set(feature::HEIGHT, 100).unwrap();
    }

    #[test]
    fn acquire_times_out_when_not_streaming() {
        let (_module, _cam, stream) = open_default();
        let r = stream.acquire(Duration::from_millis(5));
        assert!(matches!(r, Err(ci2::Error::Timeout)));
    }

    #[test]
    fn acquire_delivers_frames_at_current_roi() {
        let (_module, cam, stream) = open_default();
        cam.feature_int_set(feature::WIDTH, 4).unwrap();
        cam.feature_int_set(feature::HEIGHT, 2).unwrap();
        cam.feature_bool_set(feature::CHUNK_MODE_ACTIVE, true).unwrap();
        stream.start_grab().unwrap();
        cam.acquisition_start().unwrap();
        let frame = stream.acquire(Duration::from_millis(500)).unwrap();
        assert!(frame.status().is_success());
        assert_eq!((frame.width(), frame.height()), (4, 2));
        assert_eq!(frame.to_rgb24().unwrap().len(), 4 * 2 * 3);
        assert_eq!(frame.chunk_int(feature::CHUNK_FRAME_ID).unwrap(), 1);
    }

    #[test]
    fn injected_fault_is_consumed() {
        let (_module, cam, _stream) = open_default();
        cam.inject_fault(FaultSite::FeatureWrite(feature::WIDTH.into()), Some(1));
        let err = cam.feature_int_set(feature::WIDTH, 10).unwrap_err();
        assert_eq!(err.code(), Some(codes::INJECTED));
        cam.feature_int_set(feature::WIDTH, 10).unwrap();
        assert_eq!(
            cam.operations(),
            vec![DeviceOp::SetInt(feature::WIDTH.into(), 10)]
        );
    }

    #[test]
    fn calls_after_close_are_counted() {
        let (mut module, cam, stream) = open_default();
        stream.close().unwrap();
        cam.close().unwrap();
        assert_eq!(cam.use_after_close_count(), 0);
        assert!(matches!(stream.start_grab(), Err(ci2::Error::Closed)));
        module.uninit().unwrap();
        assert!(module.camera_infos(Duration::ZERO).is_err());
        assert_eq!(cam.use_after_close_count(), 1);
    }

    #[test]
    fn exclusive_open_twice_fails() {
        let (mut module, _cam, _stream) = open_default();
        assert!(module.camera("SIM0001", AccessMode::Exclusive).is_err());
    }
}
