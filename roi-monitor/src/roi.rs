//! Regions of interest and their application to a streaming camera.
//!
//! [RoiRegistry] holds the fixed list of regions and the index of the one
//! currently applied. The index lives inside the region-change lock, so it can
//! only be changed while holding that lock, by [RegionReconfigurer].

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use parking_lot::{Mutex, MutexGuard};
use serde::Deserialize;
use tracing::debug;

use ci2::{Camera, Stream, feature};

/// A capture window on the sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegionConfig {
    pub width: u32,
    pub height: u32,
    pub offset_x: u32,
    pub offset_y: u32,
}

impl RegionConfig {
    pub const fn new(width: u32, height: u32, offset_x: u32, offset_y: u32) -> Self {
        Self {
            width,
            height,
            offset_x,
            offset_y,
        }
    }
}

impl std::fmt::Display for RegionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{} offset({}, {})",
            self.width, self.height, self.offset_x, self.offset_y
        )
    }
}

/// The regions rotated through when none are configured.
pub const DEFAULT_REGIONS: [RegionConfig; 3] = [
    RegionConfig::new(440, 322, 24, 26),
    RegionConfig::new(640, 480, 0, 0),
    RegionConfig::new(320, 58, 24, 26),
];

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum RoiError {
    #[error("no regions of interest given")]
    Empty,
    #[error("initial region {index} out of range (have {len})")]
    InitialOutOfRange { index: usize, len: usize },
}

pub struct RoiRegistry {
    configs: Vec<RegionConfig>,
    /// The region-change lock. The value is the index of the applied region.
    active_index: Mutex<usize>,
    /// Index the rotation scheduler advances from.
    cursor: AtomicUsize,
}

impl RoiRegistry {
    pub fn new(configs: Vec<RegionConfig>, initial_index: usize) -> Result<Self, RoiError> {
        if configs.is_empty() {
            return Err(RoiError::Empty);
        }
        if initial_index >= configs.len() {
            return Err(RoiError::InitialOutOfRange {
                index: initial_index,
                len: configs.len(),
            });
        }
        Ok(Self {
            configs,
            active_index: Mutex::new(initial_index),
            cursor: AtomicUsize::new(initial_index),
        })
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    pub fn configs(&self) -> &[RegionConfig] {
        &self.configs
    }

    pub fn get(&self, index: usize) -> Option<RegionConfig> {
        self.configs.get(index).copied()
    }

    /// Index of the applied region. Blocks while a reconfiguration is running.
    pub fn active_index(&self) -> usize {
        *self.active_index.lock()
    }

    /// True while a reconfiguration holds the region-change lock.
    pub fn is_locked(&self) -> bool {
        self.active_index.is_locked()
    }

    pub fn cursor(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }

    pub fn set_cursor(&self, index: usize) {
        self.cursor.store(index, Ordering::SeqCst);
    }

    /// The region following `index`, wrapping around.
    pub fn next_after(&self, index: usize) -> usize {
        (index + 1) % self.configs.len()
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.active_index.lock()
    }
}

/// The device call that failed during a reconfiguration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconfigureStep {
    AcquisitionStop,
    StopGrab,
    Width,
    Height,
    OffsetX,
    OffsetY,
    StartGrab,
    AcquisitionStart,
}

impl std::fmt::Display for ReconfigureStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ReconfigureStep::AcquisitionStop => feature::ACQUISITION_STOP,
            ReconfigureStep::StopGrab => "stop grab",
            ReconfigureStep::Width => feature::WIDTH,
            ReconfigureStep::Height => feature::HEIGHT,
            ReconfigureStep::OffsetX => feature::OFFSET_X,
            ReconfigureStep::OffsetY => feature::OFFSET_Y,
            ReconfigureStep::StartGrab => "start grab",
            ReconfigureStep::AcquisitionStart => feature::ACQUISITION_START,
        };
        f.write_str(name)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ReconfigureError {
    #[error("region index {index} out of range (have {len})")]
    IndexOutOfRange { index: usize, len: usize },
    #[error("{step} failed: {source}")]
    Device {
        step: ReconfigureStep,
        #[source]
        source: ci2::Error,
    },
}

impl ReconfigureError {
    /// The hardware error code, if the device reported one.
    pub fn code(&self) -> Option<i32> {
        match self {
            ReconfigureError::Device { source, .. } => source.code(),
            ReconfigureError::IndexOutOfRange { .. } => None,
        }
    }
}

fn at(step: ReconfigureStep) -> impl FnOnce(ci2::Error) -> ReconfigureError {
    move |source| ReconfigureError::Device { step, source }
}

/// Applies regions from a [RoiRegistry] to a camera and its stream.
///
/// Shared between the rotation thread and the operator through an [Arc].
pub struct RegionReconfigurer<C, S> {
    camera: Arc<C>,
    stream: Arc<S>,
    registry: RoiRegistry,
}

impl<C, S> RegionReconfigurer<C, S>
where
    C: Camera,
    S: Stream,
{
    pub fn new(camera: Arc<C>, stream: Arc<S>, registry: RoiRegistry) -> Self {
        Self {
            camera,
            stream,
            registry,
        }
    }

    pub fn registry(&self) -> &RoiRegistry {
        &self.registry
    }

    /// Stop acquisition, apply region `index` and restart acquisition.
    ///
    /// The whole sequence runs under the region-change lock. If a device call
    /// fails the sequence is abandoned at that step: the lock is released, the
    /// active index keeps its old value and the device is left as the failing
    /// call left it. Nothing is rolled back.
    pub fn apply_config(&self, index: usize) -> Result<RegionConfig, ReconfigureError> {
        let config = self.lookup(index)?;
        let mut active = self.registry.lock();
        debug!("applying region {index}: {config}");

        self.camera
            .acquisition_stop()
            .map_err(at(ReconfigureStep::AcquisitionStop))?;
        self.stream
            .stop_grab()
            .map_err(at(ReconfigureStep::StopGrab))?;
        self.write_region(&config)?;
        self.stream
            .start_grab()
            .map_err(at(ReconfigureStep::StartGrab))?;
        self.camera
            .acquisition_start()
            .map_err(at(ReconfigureStep::AcquisitionStart))?;

        *active = index;
        Ok(config)
    }

    /// Write region `index` to a camera that is not acquiring.
    pub fn apply_initial(&self, index: usize) -> Result<RegionConfig, ReconfigureError> {
        let config = self.lookup(index)?;
        let mut active = self.registry.lock();
        self.write_region(&config)?;
        *active = index;
        self.registry.set_cursor(index);
        Ok(config)
    }

    fn lookup(&self, index: usize) -> Result<RegionConfig, ReconfigureError> {
        self.registry
            .get(index)
            .ok_or(ReconfigureError::IndexOutOfRange {
                index,
                len: self.registry.len(),
            })
    }

    fn write_region(&self, config: &RegionConfig) -> Result<(), ReconfigureError> {
        let writes = [
            (ReconfigureStep::Width, feature::WIDTH, config.width),
            (ReconfigureStep::Height, feature::HEIGHT, config.height),
            (ReconfigureStep::OffsetX, feature::OFFSET_X, config.offset_x),
            (ReconfigureStep::OffsetY, feature::OFFSET_Y, config.offset_y),
        ];
        for (step, name, value) in writes {
            self.camera
                .feature_int_set(name, value.into())
                .map_err(at(step))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        assert_eq!(DEFAULT_REGIONS[0].to_string(), "440x322 offset(24, 26)");
    }

    #[test]
    fn registry_rejects_bad_construction() {
        assert_eq!(RoiRegistry::new(vec![], 0).err(), Some(RoiError::Empty));
        assert_eq!(
            RoiRegistry::new(DEFAULT_REGIONS.to_vec(), 3).err(),
            Some(RoiError::InitialOutOfRange { index: 3, len: 3 })
        );
    }

    #[test]
    fn next_wraps() {
        let reg = RoiRegistry::new(DEFAULT_REGIONS.to_vec(), 0).unwrap();
        assert_eq!(reg.next_after(0), 1);
        assert_eq!(reg.next_after(2), 0);
        let single = RoiRegistry::new(vec![DEFAULT_REGIONS[1]], 0).unwrap();
        assert_eq!(single.next_after(0), 0);
    }

    #[test]
    fn step_names() {
        assert_eq!(ReconfigureStep::OffsetY.to_string(), "OffsetY");
        assert_eq!(ReconfigureStep::StopGrab.to_string(), "stop grab");
    }
}
