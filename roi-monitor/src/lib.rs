//! Acquire frames from a camera, publish per-frame RGB statistics to Modbus
//! holding registers and rotate the camera's region of interest while
//! acquisition is running.
//!
//! The pieces, from the leaves up:
//!
//! - [pixel_stats] computes [FrameMetrics] from an RGB8 buffer.
//! - [publish] maps metrics to ten registers and writes them through a
//!   [RegisterTransport].
//! - [roi] holds the region list and applies regions under the region-change
//!   lock.
//! - [acquisition] and [rotation] are the two worker loops.
//! - [supervisor] owns the device and the threads.
//! - [console] is the operator front end.

pub mod acquisition;
pub mod config;
pub mod console;
pub mod controlled_join;
pub mod logging;
pub mod pixel_stats;
pub mod publish;
pub mod roi;
pub mod rotation;
pub mod supervisor;

pub use crate::{
    acquisition::{AcquisitionLoop, AcquisitionSummary, FrameOutcome},
    config::{Config, parse_config_file},
    pixel_stats::{ChannelHistogram, FrameMetrics, compute_frame_metrics},
    publish::{PublishError, RegisterPublisher, RegisterTransport, TransportError},
    roi::{
        ReconfigureError, ReconfigureStep, RegionConfig, RegionReconfigurer, RoiError,
        RoiRegistry,
    },
    rotation::RotationScheduler,
    supervisor::{RunningSupervisor, ShutdownReport, StartupError, Supervisor},
};
