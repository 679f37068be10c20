//! Camera interface (ci2) trait definitions for GenICam-style machine vision
//! cameras.
//!
//! A backend provides a [CameraModule] which enumerates and opens cameras. A
//! [Camera] exposes its feature-control surface (weakly typed accessors keyed
//! by GenICam feature names such as `"Width"` or `"AcquisitionStart"`) and
//! opens a [Stream] from which frames are acquired.
//!
//! Unlike a single-owner camera API, the handles here take `&self` and are
//! `Send + Sync`. Vendor SDK handles are internally synchronized and this
//! lets one thread block in [Stream::acquire] while another thread stops the
//! stream and changes the region of interest.

use machine_vision_formats as formats;

pub use formats::PixFmt;

// ---------------------------
// errors

pub type Result<M> = std::result::Result<M, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// An error reported by the device or its SDK, with the vendor error code.
    #[error("device error {code}: {msg}")]
    Device { code: i32, msg: String },
    #[error("Timeout")]
    Timeout,
    #[error("feature not present: {0}")]
    FeatureNotPresent(String),
    #[error("feature not writable: {0}")]
    FeatureNotWritable(String),
    #[error("handle closed")]
    Closed,
    #[error("CI2Error({msg})")]
    CI2Error { msg: String },
    #[error("BackendError({0})")]
    BackendError(#[from] anyhow::Error),
    #[error("io error: {source}")]
    IoError {
        #[from]
        source: std::io::Error,
    },
    #[error("try from int error: {source}")]
    TryFromIntError {
        #[from]
        source: std::num::TryFromIntError,
    },
}

impl Error {
    /// The hardware-provided error code, if this error carries one.
    pub fn code(&self) -> Option<i32> {
        match self {
            Error::Device { code, .. } => Some(*code),
            _ => None,
        }
    }
}

fn _test_error_is_send() {
    // Compile-time test to ensure Error implements Send trait.
    fn implements<T: Send + Sync>() {}
    implements::<Error>();
}

impl<'a> From<&'a str> for Error {
    fn from(orig: &'a str) -> Error {
        Error::CI2Error {
            msg: orig.to_string(),
        }
    }
}

impl From<String> for Error {
    fn from(msg: String) -> Error {
        Error::CI2Error { msg }
    }
}

// ---------------------------
// feature names

/// GenICam feature names used by this crate's provided methods and callers.
pub mod feature {
    pub const WIDTH: &str = "Width";
    pub const HEIGHT: &str = "Height";
    pub const OFFSET_X: &str = "OffsetX";
    pub const OFFSET_Y: &str = "OffsetY";
    pub const ACQUISITION_START: &str = "AcquisitionStart";
    pub const ACQUISITION_STOP: &str = "AcquisitionStop";
    pub const CHUNK_MODE_ACTIVE: &str = "ChunkModeActive";
    pub const CHUNK_SELECTOR: &str = "ChunkSelector";
    pub const CHUNK_ENABLE: &str = "ChunkEnable";
    pub const CHUNK_FRAME_ID: &str = "ChunkFrameID";
}

// ---------------------------
// CameraModule

/// How a camera is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    /// No other process may open the camera.
    #[default]
    Exclusive,
    /// Other processes may open the camera for control.
    Control,
    /// Read-only access.
    ReadOnly,
}

/// A module for opening cameras (e.g. a vendor SDK).
pub trait CameraModule: Send {
    type CameraType: Camera;

    fn name(&self) -> &str;
    /// Enumerate attached cameras, waiting at most `timeout` for discovery.
    fn camera_infos(&self, timeout: std::time::Duration) -> Result<Vec<Box<dyn CameraInfo>>>;
    /// Open the camera with the given serial number.
    fn camera(&mut self, serial: &str, access: AccessMode) -> Result<Self::CameraType>;
    /// Release the library. No camera from this module may be used afterwards.
    fn uninit(&mut self) -> Result<()>;
}

// ---------------------------
// CameraInfo

pub trait CameraInfo {
    fn name(&self) -> &str;
    fn serial(&self) -> &str;
    fn model(&self) -> &str;
    fn vendor(&self) -> &str;
}

// ---------------------------
// Camera

pub trait Camera: CameraInfo + Send + Sync {
    type StreamType: Stream;

    fn stream_count(&self) -> Result<u32>;
    fn open_stream(&self, index: u32) -> Result<Self::StreamType>;

    // ----- start: weakly typed but easier to implement API -----

    fn is_implemented(&self, name: &str) -> Result<bool>;
    fn is_writable(&self, name: &str) -> Result<bool>;
    fn command_execute(&self, name: &str) -> Result<()>;
    fn feature_bool(&self, name: &str) -> Result<bool>;
    fn feature_bool_set(&self, name: &str, value: bool) -> Result<()>;
    fn feature_enum(&self, name: &str) -> Result<String>;
    fn feature_enum_set(&self, name: &str, value: &str) -> Result<()>;
    fn feature_int(&self, name: &str) -> Result<i64>;
    fn feature_int_set(&self, name: &str, value: i64) -> Result<()>;

    // ----- end: weakly typed but easier to implement API -----

    /// Close the device. Any further call fails with [Error::Closed].
    fn close(&self) -> Result<()>;

    /// Return true if the feature exists and may currently be written.
    fn is_usable(&self, name: &str) -> Result<bool> {
        Ok(self.is_implemented(name)? && self.is_writable(name)?)
    }

    // Acquisition ----------------------------
    fn acquisition_start(&self) -> Result<()> {
        self.command_execute(feature::ACQUISITION_START)
    }
    fn acquisition_stop(&self) -> Result<()> {
        self.command_execute(feature::ACQUISITION_STOP)
    }
}

// ---------------------------
// Stream

pub trait Stream: Send + Sync {
    type FrameType: AcquiredFrame;

    fn start_grab(&self) -> Result<()>;
    fn stop_grab(&self) -> Result<()>;
    /// Close the stream. Any further call fails with [Error::Closed].
    fn close(&self) -> Result<()>;
    /// Synchronous (blocking) frame acquisition.
    ///
    /// Returns [Error::Timeout] if no frame arrives within `timeout`.
    fn acquire(&self, timeout: std::time::Duration) -> Result<Self::FrameType>;
}

// ---------------------------
// frames

/// Completion status reported by the device for an acquired frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Success,
    /// Data is missing, e.g. due to packet loss.
    Incomplete,
    InvalidImageInfo,
    Other(i32),
}

impl FrameStatus {
    pub fn from_code(code: i32) -> Self {
        match code {
            0 => FrameStatus::Success,
            -1 => FrameStatus::Incomplete,
            -2 => FrameStatus::InvalidImageInfo,
            other => FrameStatus::Other(other),
        }
    }
    pub fn code(&self) -> i32 {
        match self {
            FrameStatus::Success => 0,
            FrameStatus::Incomplete => -1,
            FrameStatus::InvalidImageInfo => -2,
            FrameStatus::Other(code) => *code,
        }
    }
    pub fn is_success(&self) -> bool {
        matches!(self, FrameStatus::Success)
    }
}

impl std::fmt::Display for FrameStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Timing information acquired on the host computer.
///
/// This can be considered the "least common denominator" of frame timing
/// information, as it will always be present but is not necessarily as accurate
/// as desired.
#[derive(Debug, Clone)]
pub struct HostTimingInfo {
    /// The frame number as counted by the host.
    ///
    /// This can deviate from the "real" frame number if the frames were
    /// dropped, as might happen if the computer was busy with a different task.
    pub fno: usize,
    /// The timestamp of the frame when it was acquired by the host.
    pub datetime: chrono::DateTime<chrono::Utc>,
}

/// A frame returned by [Stream::acquire].
///
/// The frame owns its buffer only until it is dropped; callers should not
/// retain it beyond processing.
pub trait AcquiredFrame: Send {
    fn status(&self) -> FrameStatus;
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn pixel_format(&self) -> formats::PixFmt;
    fn host_timing(&self) -> &HostTimingInfo;
    /// Read an integer chunk feature (e.g. [feature::CHUNK_FRAME_ID]).
    fn chunk_int(&self, name: &str) -> Result<i64>;
    /// Convert the raw image to interleaved 8-bit RGB, `width*height*3` bytes,
    /// rows packed without padding.
    fn to_rgb24(&self) -> Result<Vec<u8>>;
}
