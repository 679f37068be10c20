mod common;

use std::time::Duration;

use ci2::feature;
use ci2_sim::{DeviceOp, FaultSite, FramePattern, SimModule, SimSensor};
use roi_monitor::{Config, ReconfigureError, StartupError, Supervisor};
use test_log::test;

use common::{SERIAL, SharedTransport, fast_sensor, wait_for};

fn test_config() -> Config {
    let mut cfg = Config::default();
    cfg.rotation.interval_msec = 30;
    cfg.acquisition.timeout_msec = 200;
    cfg
}

#[test]
fn startup_without_cameras() {
    let r = Supervisor::open(SimModule::new(vec![]), &test_config());
    assert!(matches!(r, Err(StartupError::NoDevice)));
}

#[test]
fn startup_with_unknown_serial() {
    let module = SimModule::new(vec![fast_sensor()]);
    let camera = module.inspect(SERIAL).unwrap();
    let mut cfg = test_config();
    cfg.camera_serial = Some("NOPE".into());
    let r = Supervisor::open(module, &cfg);
    assert!(matches!(r, Err(StartupError::CameraNotFound(ref s)) if s == "NOPE"));
    assert!(!camera.is_open());
}

#[test]
fn startup_without_stream_closes_camera() {
    let module = SimModule::new(vec![fast_sensor().with_stream_count(0)]);
    let camera = module.inspect(SERIAL).unwrap();
    let r = Supervisor::open(module, &test_config());
    assert!(matches!(r, Err(StartupError::NoStream)));
    assert!(!camera.is_open());
}

#[test]
fn startup_requires_chunk_mode() {
    let module = SimModule::new(vec![fast_sensor().without_chunks()]);
    let camera = module.inspect(SERIAL).unwrap();
    match Supervisor::open(module, &test_config()) {
        Err(StartupError::MissingFeature(name)) => assert_eq!(name, feature::CHUNK_MODE_ACTIVE),
        Err(e) => panic!("unexpected error {e}"),
        Ok(_) => panic!("expected startup failure"),
    }
    assert!(!camera.is_open());
    assert_eq!(camera.use_after_close_count(), 0);
}

#[test]
fn open_applies_initial_region_and_enables_chunks() {
    let module = SimModule::new(vec![fast_sensor()]);
    let camera = module.inspect(SERIAL).unwrap();
    let mut cfg = test_config();
    cfg.initial_roi = 2;
    let supervisor = Supervisor::open(module, &cfg).unwrap();

    assert_eq!(camera.readout(), (320, 58, 24, 26));
    assert_eq!(supervisor.registry().active_index(), 2);
    let ops = camera.operations();
    assert!(ops.contains(&DeviceOp::SetBool(feature::CHUNK_MODE_ACTIVE.into(), true)));
    assert!(ops.contains(&DeviceOp::SetEnum(
        feature::CHUNK_SELECTOR.into(),
        "FrameID".into()
    )));
    assert!(ops.contains(&DeviceOp::SetBool(feature::CHUNK_ENABLE.into(), true)));
    assert!(!camera.is_acquiring());

    supervisor.close();
    assert!(!camera.is_open());
    assert_eq!(camera.use_after_close_count(), 0);
}

#[test]
fn publishes_statistics_and_shuts_down_in_order() {
    let sensor = fast_sensor().with_pattern(FramePattern::Uniform([10, 20, 30]));
    let module = SimModule::new(vec![sensor]);
    let camera = module.inspect(SERIAL).unwrap();
    let transport = SharedTransport::default();

    let mut cfg = test_config();
    cfg.modbus.base_address = 7;
    let running = Supervisor::open(module, &cfg)
        .unwrap()
        .start(transport.clone())
        .unwrap();
    assert!(running.is_rotating());

    assert!(wait_for(Duration::from_secs(5), || transport.n_writes() >= 5));
    // let rotation run a few times with acquisition live
    assert!(wait_for(Duration::from_secs(5), || running.registry().cursor() == 2));

    let report = running.request_shutdown();
    let summary = report.acquisition.unwrap();
    assert!(summary.frames_published >= 5);
    assert_eq!(summary.decode_errors, 0);
    assert_eq!(summary.publish_failures, 0);
    assert_eq!(report.teardown_errors, 0);

    for (base, values) in transport.writes.lock().iter() {
        assert_eq!(*base, 7);
        assert_eq!(&values[..9], &[10, 20, 30, 10, 20, 30, 100, 100, 100]);
        assert!(DEFAULT_HEIGHTS.contains(&values[9]), "height {}", values[9]);
    }

    assert_eq!(camera.use_after_close_count(), 0);
    assert!(!camera.is_open());
    let ops = camera.operations();
    assert_eq!(
        &ops[ops.len() - 4..],
        &[
            DeviceOp::Command(feature::ACQUISITION_STOP.into()),
            DeviceOp::StopGrab,
            DeviceOp::CloseStream,
            DeviceOp::CloseCamera,
        ]
    );
}

const DEFAULT_HEIGHTS: [u16; 3] = [322, 480, 58];

#[test]
fn manual_selection_steers_rotation() {
    let module = SimModule::new(vec![fast_sensor()]);
    let camera = module.inspect(SERIAL).unwrap();
    let mut cfg = test_config();
    cfg.rotation.enabled = false;
    let running = Supervisor::open(module, &cfg)
        .unwrap()
        .start(SharedTransport::default())
        .unwrap();
    assert!(!running.is_rotating());

    let applied = running.select_region(1).unwrap();
    assert_eq!(applied.width, 640);
    assert_eq!(running.registry().active_index(), 1);
    assert_eq!(running.registry().cursor(), 1);

    assert!(matches!(
        running.select_region(5),
        Err(ReconfigureError::IndexOutOfRange { index: 5, len: 3 })
    ));
    assert_eq!(running.registry().cursor(), 1);

    // a failed selection still moves the cursor but not the active region
    camera.inject_fault(FaultSite::FeatureWrite(feature::HEIGHT.into()), Some(1));
    assert!(running.select_region(2).is_err());
    assert_eq!(running.registry().active_index(), 1);
    assert_eq!(running.registry().cursor(), 2);
    assert!(!running.registry().is_locked());

    let report = running.request_shutdown();
    assert!(report.acquisition.is_some());
    assert_eq!(camera.use_after_close_count(), 0);
}

#[test]
fn acquisition_survives_bad_frames_and_faults() {
    let sensor = SimSensor::default()
        .with_frame_interval(Duration::from_millis(2))
        .with_incomplete_every(3);
    let module = SimModule::new(vec![sensor]);
    let camera = module.inspect(SERIAL).unwrap();
    let transport = SharedTransport::default();
    let mut cfg = test_config();
    cfg.rotation.enabled = false;

    camera.inject_fault(FaultSite::Acquire, Some(2));
    let running = Supervisor::open(module, &cfg)
        .unwrap()
        .start(transport.clone())
        .unwrap();
    assert!(wait_for(Duration::from_secs(5), || transport.n_writes() >= 6));

    let summary = running.request_shutdown().acquisition.unwrap();
    assert_eq!(summary.acquire_errors, 2);
    assert!(summary.bad_status_frames >= 1);
    assert!(summary.frames_published >= 6);
}
