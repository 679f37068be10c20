#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use ci2::{AccessMode, Camera, CameraModule};
use ci2_sim::{SimCamera, SimModule, SimSensor, SimStream};
use roi_monitor::{
    RegionReconfigurer, RegisterTransport, RoiRegistry, TransportError, roi::DEFAULT_REGIONS,
};

pub const SERIAL: &str = "SIM0001";

/// Records every register write. Clones share the record.
#[derive(Clone, Default)]
pub struct SharedTransport {
    pub writes: Arc<Mutex<Vec<(u16, Vec<u16>)>>>,
}

impl SharedTransport {
    pub fn n_writes(&self) -> usize {
        self.writes.lock().len()
    }
}

impl RegisterTransport for SharedTransport {
    fn write_registers(&mut self, base_address: u16, values: &[u16]) -> Result<(), TransportError> {
        self.writes.lock().push((base_address, values.to_vec()));
        Ok(())
    }
}

pub fn fast_sensor() -> SimSensor {
    SimSensor::default().with_frame_interval(Duration::from_millis(2))
}

/// An opened camera and stream with a reconfigurer over the default regions.
pub fn open_reconfigurer() -> (
    SimModule,
    SimCamera,
    Arc<RegionReconfigurer<SimCamera, SimStream>>,
) {
    let mut module = SimModule::new(vec![fast_sensor()]);
    let camera = module.camera(SERIAL, AccessMode::Exclusive).unwrap();
    let stream = camera.open_stream(0).unwrap();
    let registry = RoiRegistry::new(DEFAULT_REGIONS.to_vec(), 0).unwrap();
    let reconfigurer = RegionReconfigurer::new(Arc::new(camera.clone()), Arc::new(stream), registry);
    reconfigurer.apply_initial(0).unwrap();
    (module, camera, Arc::new(reconfigurer))
}

/// Poll `cond` until it holds or `timeout` passes.
pub fn wait_for<F: FnMut() -> bool>(timeout: Duration, mut cond: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}
