use std::cell::Cell;
use std::path::Path;
use std::time::{Duration, Instant};

use sense_emu::registers::SensorFile;
use sense_emu::stick::{Action, Direction, StickClient};
use sense_emu::{
    Clock, DataRecord, Emulator, EmulatorConfig, EmulatorError, ImuClient, LockError, Playback,
    PressureClient, Recorder, RecordingReader, RecordingWriter, SensorError, SimulationModes,
    SystemClock,
};

fn config_in(dir: &Path, simulate: bool) -> EmulatorConfig {
    let mut config = EmulatorConfig::default();
    config.state_dir = Some(dir.to_path_buf());
    config.simulation.simulate_env = simulate;
    config.simulation.simulate_imu = simulate;
    config.simulation.seed = 1234;
    // Ephemeral port where the bus runs over UDP
    config.stick.port = 0;
    config
}

/// Clock that jumps forward instead of sleeping
struct ManualClock(Cell<f64>);

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        self.0.get()
    }

    fn sleep(&self, duration: Duration) {
        self.0.set(self.0.get() + duration.as_secs_f64());
    }
}

fn record_at(timestamp: f64, pressure: f64) -> DataRecord {
    DataRecord {
        timestamp,
        pressure,
        ptemp: 25.0,
        humidity: 40.0,
        htemp: 22.0,
        accel: [0.0, 0.0, 1.0],
        gyro: [0.0, 0.0, 0.0],
        compass: [33.0, 0.0, 0.0],
        orientation: [0.0, 0.0, std::f64::consts::FRAC_PI_2],
    }
}

#[test]
fn test_start_takes_lock_and_stop_releases_it() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path(), false);
    let lock_path = SensorFile::Lock.path_in(dir.path());

    let emulator = Emulator::start(&config).unwrap();
    assert!(emulator.lock().is_mine());
    assert!(SensorFile::Pressure.path_in(dir.path()).exists());
    assert!(SensorFile::Humidity.path_in(dir.path()).exists());
    assert!(SensorFile::Imu.path_in(dir.path()).exists());

    match Emulator::start(&config) {
        Err(EmulatorError::Lock(LockError::AlreadyLocked { pid })) => {
            assert_eq!(pid, std::process::id())
        }
        Err(e) => panic!("expected AlreadyLocked, got {e}"),
        Ok(_) => panic!("second emulator started"),
    }
    // The failed start must not have released the live lock
    assert!(lock_path.exists());

    drop(emulator);
    assert!(!lock_path.exists());
}

#[test]
fn test_start_breaks_stale_lock() {
    let dir = tempfile::tempdir().unwrap();
    let lock_path = SensorFile::Lock.path_in(dir.path());
    std::fs::write(&lock_path, format!("{}\n", i32::MAX)).unwrap();

    let emulator = Emulator::start(&config_in(dir.path(), false)).unwrap();
    assert_eq!(emulator.lock().holder(), Some(std::process::id()));
}

#[test]
fn test_send_stick_reaches_reader() {
    let dir = tempfile::tempdir().unwrap();
    let emulator = Emulator::start(&config_in(dir.path(), false)).unwrap();
    let client = StickClient::connect(emulator.stick().address().clone()).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while emulator.stick().reader_count() == 0 {
        assert!(Instant::now() < deadline, "reader never registered");
        std::thread::sleep(Duration::from_millis(20));
    }

    emulator
        .send_stick(Direction::Middle, Action::Pressed)
        .unwrap();
    let event = client
        .read_event(Some(Duration::from_secs(2)))
        .unwrap()
        .expect("event delivered");
    assert_eq!(event.direction, Direction::Middle);
    assert_eq!(event.action, Action::Pressed);
}

#[test]
fn test_apply_record_converts_units() {
    let dir = tempfile::tempdir().unwrap();
    let emulator = Emulator::start(&config_in(dir.path(), false)).unwrap();
    let mut imu = ImuClient::open(SensorFile::Imu.path_in(dir.path())).unwrap();
    assert!(imu.init());

    emulator.apply_record(&record_at(0.0, 1001.0)).unwrap();
    assert_eq!(emulator.pressure().pressure(), 1001.0);
    assert_eq!(emulator.humidity().humidity(), 40.0);
    // Stored in gauss and degrees
    assert!((emulator.imu().compass().x - 0.33).abs() < 1e-9);
    assert!((emulator.imu().orientation().z - 90.0).abs() < 1e-9);

    // Read back in microtesla and radians
    let reading = imu.read().expect("new IMU sample");
    assert!((reading.compass.x - 33.0).abs() < 0.02);
    assert!((reading.fusion_pose.z - std::f64::consts::FRAC_PI_2).abs() < 0.001);
}

#[test]
fn test_apply_record_refused_while_simulating() {
    let dir = tempfile::tempdir().unwrap();
    let emulator = Emulator::start(&config_in(dir.path(), true)).unwrap();
    assert!(matches!(
        emulator.apply_record(&record_at(0.0, 1000.0)),
        Err(SensorError::SimulationActive)
    ));
}

#[test]
fn test_play_restores_simulation_modes() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("session.hat");
    let mut writer = RecordingWriter::create(&file, 50.0).unwrap();
    for i in 0..5 {
        writer
            .write_record(&record_at(50.1 + i as f64 * 0.1, 990.0 + i as f64))
            .unwrap();
    }
    writer.into_inner().unwrap();

    let mut emulator = Emulator::start(&config_in(dir.path(), true)).unwrap();
    let playback = Playback::new(ManualClock(Cell::new(10_000.0)));
    let stats = emulator.play_with(&file, &playback).unwrap();

    assert_eq!(stats.played, 5);
    assert_eq!(stats.skipped, 0);
    assert_eq!(emulator.pressure().pressure(), 994.0);
    assert_eq!(
        emulator.modes(),
        SimulationModes {
            env: true,
            imu: true
        }
    );
}

#[test]
fn test_play_missing_file_keeps_modes() {
    let dir = tempfile::tempdir().unwrap();
    let mut emulator = Emulator::start(&config_in(dir.path(), true)).unwrap();
    let result = emulator.play_with(dir.path().join("missing.hat"), &Playback::new(SystemClock));
    assert!(matches!(result, Err(EmulatorError::Recording(_))));
    assert_eq!(
        emulator.modes(),
        SimulationModes {
            env: true,
            imu: true
        }
    );
}

#[test]
fn test_recorder_captures_live_sensors() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path(), true);
    config.simulation.simulate_env = false;
    let emulator = Emulator::start(&config).unwrap();
    emulator.pressure().set_values(1005.0, 23.0).unwrap();

    let mut recorder = Recorder::open_in(dir.path()).unwrap();
    let mut writer = RecordingWriter::new(Vec::new(), SystemClock.now()).unwrap();
    let written = recorder
        .record(&mut writer, &SystemClock, Duration::from_millis(300), None)
        .unwrap();
    assert!(written >= 5, "only {written} records");

    let bytes = writer.into_inner().unwrap();
    let records: Vec<_> = RecordingReader::new(std::io::Cursor::new(bytes))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(records.len() as u64, written);
    assert!(records.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    for record in &records {
        assert!((record.pressure - 1005.0).abs() < 0.001);
        assert!((record.ptemp - 23.0).abs() < 0.01);
        assert!((record.accel[2] - 1.0).abs() < 0.2);
    }

    // A reader process sees the same registers
    let mut client = PressureClient::open(SensorFile::Pressure.path_in(dir.path())).unwrap();
    assert!(client.init());
    assert!((client.read().pressure.unwrap() - 1005.0).abs() < 0.001);
}

#[test]
fn test_recorder_needs_running_emulator() {
    let dir = tempfile::tempdir().unwrap();
    assert!(matches!(
        Recorder::open_in(dir.path()),
        Err(sense_emu::RecordingError::SensorNotReady("IMU"))
    ));
}
