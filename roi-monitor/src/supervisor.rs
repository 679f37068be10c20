//! Device lifecycle and the worker threads.
//!
//! [Supervisor::open] finds and prepares the camera. [Supervisor::start]
//! begins acquisition and spawns the acquisition and rotation threads,
//! returning a [RunningSupervisor] which takes operator requests until
//! [RunningSupervisor::request_shutdown]. Shutdown joins rotation first, then
//! acquisition, and only then tears down the device.

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use ci2::{AccessMode, Camera, CameraModule, Stream, feature};

use crate::{
    acquisition::{AcquisitionLoop, AcquisitionSummary},
    config::Config,
    controlled_join::ControlledJoinHandle,
    publish::{RegisterPublisher, RegisterTransport},
    roi::{ReconfigureError, RegionConfig, RegionReconfigurer, RoiError, RoiRegistry},
    rotation::RotationScheduler,
};

type CameraOf<M> = <M as CameraModule>::CameraType;
type StreamOf<M> = <CameraOf<M> as Camera>::StreamType;
type ReconfigurerOf<M> = RegionReconfigurer<CameraOf<M>, StreamOf<M>>;

/// How long to wait for cameras to be discovered.
const ENUMERATION_TIMEOUT: Duration = Duration::from_millis(1000);

#[derive(thiserror::Error, Debug)]
pub enum StartupError {
    #[error("no camera found")]
    NoDevice,
    #[error("camera with serial \"{0}\" not found")]
    CameraNotFound(String),
    #[error("camera has no stream")]
    NoStream,
    #[error("required feature {0} is not available")]
    MissingFeature(String),
    #[error("{0}")]
    Roi(#[from] RoiError),
    #[error("cannot apply initial region: {0}")]
    InitialRegion(#[source] ReconfigureError),
    #[error("device error: {0}")]
    Device(#[from] ci2::Error),
    #[error("cannot spawn acquisition thread: {0}")]
    Spawn(#[source] std::io::Error),
}

struct RunSettings {
    /// `None` disables rotation.
    rotation_interval: Option<Duration>,
    acquire_timeout: Duration,
    base_address: u16,
}

/// An opened and configured camera which is not yet acquiring.
pub struct Supervisor<M: CameraModule> {
    module: M,
    camera: Arc<CameraOf<M>>,
    stream: Arc<StreamOf<M>>,
    reconfigurer: Arc<ReconfigurerOf<M>>,
    settings: RunSettings,
}

impl<M> Supervisor<M>
where
    M: CameraModule,
    CameraOf<M>: 'static,
    StreamOf<M>: 'static,
{
    /// Open the configured camera (or the first one found), apply the initial
    /// region and enable chunk data.
    ///
    /// On failure everything opened so far is closed again.
    pub fn open(mut module: M, config: &Config) -> Result<Self, StartupError> {
        let camera = match open_camera(&mut module, config.camera_serial.as_deref()) {
            Ok(camera) => Arc::new(camera),
            Err(e) => {
                if let Err(uninit_err) = module.uninit() {
                    warn!(source = "startup", "releasing camera library failed: {uninit_err}");
                }
                return Err(e);
            }
        };

        let stream = match open_stream(&*camera) {
            Ok(stream) => Arc::new(stream),
            Err(e) => {
                shutdown_device(&mut module, &*camera, None, false);
                return Err(e);
            }
        };

        let reconfigurer = match prepare(camera.clone(), stream.clone(), config) {
            Ok(reconfigurer) => Arc::new(reconfigurer),
            Err(e) => {
                shutdown_device(&mut module, &*camera, Some(&*stream), false);
                return Err(e);
            }
        };

        Ok(Self {
            module,
            camera,
            stream,
            reconfigurer,
            settings: RunSettings {
                rotation_interval: config.rotation.enabled.then(|| config.rotation.interval()),
                acquire_timeout: config.acquisition.timeout(),
                base_address: config.modbus.base_address,
            },
        })
    }

    pub fn registry(&self) -> &RoiRegistry {
        self.reconfigurer.registry()
    }

    /// Start acquisition and spawn the worker threads.
    ///
    /// If acquisition cannot be started the device is torn down. A rotation
    /// thread which cannot be spawned is logged and skipped.
    pub fn start<T>(self, transport: T) -> Result<RunningSupervisor<M>, StartupError>
    where
        T: RegisterTransport + 'static,
    {
        let Supervisor {
            mut module,
            camera,
            stream,
            reconfigurer,
            settings,
        } = self;

        if let Err(e) = stream.start_grab().and_then(|()| camera.acquisition_start()) {
            shutdown_device(&mut module, &*camera, Some(&*stream), true);
            return Err(e.into());
        }

        let acquisition_loop = AcquisitionLoop::new(
            stream.clone(),
            RegisterPublisher::new(transport, settings.base_address),
            settings.acquire_timeout,
        );
        let acquisition =
            match ControlledJoinHandle::spawn("acquisition", move |flag| acquisition_loop.run(&flag)) {
                Ok(cjh) => cjh,
                Err(e) => {
                    shutdown_device(&mut module, &*camera, Some(&*stream), true);
                    return Err(StartupError::Spawn(e));
                }
            };

        let rotation = match settings.rotation_interval {
            Some(interval) => {
                let scheduler = RotationScheduler::new(reconfigurer.clone(), interval);
                match ControlledJoinHandle::spawn("roi rotation", move |flag| {
                    scheduler.run(&flag);
                }) {
                    Ok(cjh) => Some(cjh),
                    Err(e) => {
                        error!(
                            source = "startup",
                            "cannot spawn rotation thread, continuing without rotation: {e}"
                        );
                        None
                    }
                }
            }
            None => {
                info!(source = "startup", "region rotation disabled");
                None
            }
        };

        info!(source = "startup", "acquisition started");
        Ok(RunningSupervisor {
            module,
            camera,
            stream,
            reconfigurer,
            acquisition,
            rotation,
        })
    }

    /// Close a supervisor which was never started.
    pub fn close(self) {
        let Supervisor {
            mut module,
            camera,
            stream,
            ..
        } = self;
        shutdown_device(&mut module, &*camera, Some(&*stream), false);
        info!(source = "shutdown", "camera closed");
    }
}

/// What happened during a run, returned by [RunningSupervisor::request_shutdown].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    /// `None` if the acquisition thread panicked.
    pub acquisition: Option<AcquisitionSummary>,
    /// Number of teardown calls which failed.
    pub teardown_errors: usize,
}

/// A camera acquiring with the worker threads running.
pub struct RunningSupervisor<M: CameraModule> {
    module: M,
    camera: Arc<CameraOf<M>>,
    stream: Arc<StreamOf<M>>,
    reconfigurer: Arc<ReconfigurerOf<M>>,
    acquisition: ControlledJoinHandle<AcquisitionSummary>,
    rotation: Option<ControlledJoinHandle<()>>,
}

impl<M: CameraModule> RunningSupervisor<M> {
    pub fn registry(&self) -> &RoiRegistry {
        self.reconfigurer.registry()
    }

    pub fn is_rotating(&self) -> bool {
        self.rotation.is_some()
    }

    /// Switch to region `index` on behalf of the operator.
    ///
    /// Rotation continues from the selected region, also if applying it
    /// failed.
    pub fn select_region(&self, index: usize) -> Result<RegionConfig, ReconfigureError> {
        let registry = self.reconfigurer.registry();
        if index >= registry.len() {
            warn!(
                source = "manual",
                "region {} does not exist, {} configured",
                index + 1,
                registry.len()
            );
            return Err(ReconfigureError::IndexOutOfRange {
                index,
                len: registry.len(),
            });
        }
        let result = self.reconfigurer.apply_config(index);
        registry.set_cursor(index);
        match &result {
            Ok(config) => info!(source = "manual", "switched to region {}: {config}", index + 1),
            Err(e) => error!(
                source = "manual",
                code = ?e.code(),
                "switching to region {} failed: {e}",
                index + 1
            ),
        }
        result
    }

    /// Stop and join both threads, then close the device.
    pub fn request_shutdown(self) -> ShutdownReport {
        let RunningSupervisor {
            mut module,
            camera,
            stream,
            reconfigurer,
            acquisition,
            rotation,
        } = self;
        info!(source = "shutdown", "stopping acquisition");

        acquisition.stop();
        if let Some(rotation) = rotation {
            if rotation.close_and_join().is_err() {
                error!(source = "shutdown", "rotation thread panicked");
            }
        }
        let summary = match acquisition.close_and_join() {
            Ok(summary) => Some(summary),
            Err(_) => {
                error!(source = "shutdown", "acquisition thread panicked");
                None
            }
        };
        drop(reconfigurer);

        let teardown_errors = shutdown_device(&mut module, &*camera, Some(&*stream), true);
        info!(source = "shutdown", "shutdown complete");
        ShutdownReport {
            acquisition: summary,
            teardown_errors,
        }
    }
}

fn open_camera<M: CameraModule>(
    module: &mut M,
    serial: Option<&str>,
) -> Result<CameraOf<M>, StartupError> {
    let infos = module.camera_infos(ENUMERATION_TIMEOUT)?;
    if infos.is_empty() {
        return Err(StartupError::NoDevice);
    }
    info!(source = "startup", "found {} camera(s)", infos.len());
    let serial = match serial {
        Some(serial) => {
            if !infos.iter().any(|info| info.serial() == serial) {
                return Err(StartupError::CameraNotFound(serial.to_string()));
            }
            serial.to_string()
        }
        None => infos[0].serial().to_string(),
    };
    Ok(module.camera(&serial, AccessMode::Exclusive)?)
}

fn open_stream<C: Camera>(camera: &C) -> Result<C::StreamType, StartupError> {
    if camera.stream_count()? == 0 {
        return Err(StartupError::NoStream);
    }
    Ok(camera.open_stream(0)?)
}

fn prepare<C: Camera, S: Stream>(
    camera: Arc<C>,
    stream: Arc<S>,
    config: &Config,
) -> Result<RegionReconfigurer<C, S>, StartupError> {
    let registry = RoiRegistry::new(config.regions.clone(), config.initial_roi)?;
    let reconfigurer = RegionReconfigurer::new(camera.clone(), stream, registry);
    let initial = reconfigurer
        .apply_initial(config.initial_roi)
        .map_err(StartupError::InitialRegion)?;
    info!(
        source = "startup",
        "initial region {}: {initial}",
        config.initial_roi + 1
    );
    enable_chunks(&*camera)?;
    info!(
        source = "startup",
        "opened {} {} (serial {})",
        camera.vendor(),
        camera.model(),
        camera.serial()
    );
    Ok(reconfigurer)
}

fn enable_chunks<C: Camera>(camera: &C) -> Result<(), StartupError> {
    if !camera.is_usable(feature::CHUNK_MODE_ACTIVE)? {
        return Err(StartupError::MissingFeature(
            feature::CHUNK_MODE_ACTIVE.to_string(),
        ));
    }
    camera.feature_bool_set(feature::CHUNK_MODE_ACTIVE, true)?;
    if camera.is_usable(feature::CHUNK_SELECTOR)? {
        camera.feature_enum_set(feature::CHUNK_SELECTOR, "FrameID")?;
    }
    if camera.is_usable(feature::CHUNK_ENABLE)? {
        camera.feature_bool_set(feature::CHUNK_ENABLE, true)?;
    }
    Ok(())
}

/// Close the device, continuing past failures. Returns the number of failures.
fn shutdown_device<M: CameraModule>(
    module: &mut M,
    camera: &CameraOf<M>,
    stream: Option<&StreamOf<M>>,
    was_acquiring: bool,
) -> usize {
    let mut n_errors = 0;
    let mut check = |what: &str, result: ci2::Result<()>| {
        if let Err(e) = result {
            error!(source = "shutdown", code = ?e.code(), "{what} failed: {e}");
            n_errors += 1;
        }
    };
    if was_acquiring {
        check(feature::ACQUISITION_STOP, camera.acquisition_stop());
        if let Some(stream) = stream {
            check("stop grab", stream.stop_grab());
        }
    }
    if let Some(stream) = stream {
        check("closing stream", stream.close());
    }
    check("closing camera", camera.close());
    check("releasing camera library", module.uninit());
    n_errors
}
