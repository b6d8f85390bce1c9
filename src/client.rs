//! Read side of the sensor registers
//!
//! These clients mirror what the board's hardware library does against the
//! real chips: `init` checks that a device is present, `read` converts raw
//! register values to physical units. Environmental reads are cached for
//! the sensor's poll interval, as the hardware library does.

use std::path::Path;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use sense_emu_registers::{
    CalibrationCurve, CalibrationError, HumidityBlock, ImuBlock, PressureBlock, RegisterBlock,
    RegisterError, RegisterStore, SensorFile, Vector3,
};

/// Pressure reads are served from cache for this long
pub const PRESSURE_POLL: Duration = Duration::from_millis(40);

/// Humidity reads are served from cache for this long
pub const HUMIDITY_POLL: Duration = Duration::from_millis(130);

/// Suggested interval between IMU reads
pub const IMU_POLL: Duration = Duration::from_millis(10);

/// Read-only block whose snapshot is refreshed at most once per interval
struct CachedBlock<T: RegisterBlock> {
    store: RegisterStore<T>,
    interval: Duration,
    cached: T,
    read_at: Option<Instant>,
}

impl<T: RegisterBlock> CachedBlock<T> {
    fn open(path: &Path, interval: Duration) -> Result<Self, RegisterError> {
        let store = RegisterStore::<T>::open_read_only(path)?;
        let cached = store.read();
        Ok(Self {
            store,
            interval,
            cached,
            read_at: None,
        })
    }

    fn get(&mut self) -> T {
        if self.read_at.map_or(true, |t| t.elapsed() > self.interval) {
            self.refresh()
        } else {
            self.cached
        }
    }

    fn refresh(&mut self) -> T {
        self.cached = self.store.read();
        self.read_at = Some(Instant::now());
        self.cached
    }
}

/// Pressure sensor reading; `None` where the register is flagged invalid
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PressureReading {
    /// hPa
    pub pressure: Option<f64>,
    /// Degrees Celsius
    pub temperature: Option<f64>,
}

/// Reader of the LPS25H pressure block
pub struct PressureClient {
    block: CachedBlock<PressureBlock>,
    initialized: bool,
}

impl PressureClient {
    pub fn new() -> Result<Self, RegisterError> {
        Self::open(SensorFile::Pressure.path())
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, RegisterError> {
        Ok(Self {
            block: CachedBlock::open(path.as_ref(), PRESSURE_POLL)?,
            initialized: false,
        })
    }

    /// Whether a server has initialized the block
    pub fn init(&mut self) -> bool {
        self.initialized = self.block.refresh().kind != 0;
        self.initialized
    }

    pub fn device_type(&mut self) -> u8 {
        self.block.get().kind
    }

    pub fn device_name(&mut self) -> String {
        self.block.get().device_name()
    }

    /// Current readings; both invalid before [`init`](Self::init) succeeds
    pub fn read(&mut self) -> PressureReading {
        if !self.initialized {
            return PressureReading::default();
        }
        let block = self.block.get();
        PressureReading {
            pressure: block.pressure(),
            temperature: block.temperature(),
        }
    }
}

/// Humidity sensor reading; `None` where the register is flagged invalid
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct HumidityReading {
    /// %RH
    pub humidity: Option<f64>,
    /// Degrees Celsius
    pub temperature: Option<f64>,
}

struct HumidityCalibration {
    humidity: CalibrationCurve,
    temperature: CalibrationCurve,
}

impl HumidityCalibration {
    fn from_block(block: &HumidityBlock) -> Result<Self, CalibrationError> {
        Ok(Self {
            humidity: CalibrationCurve::from_points(
                (block.h0_out as f64, block.h0 as f64),
                (block.h1_out as f64, block.h1 as f64),
            )?,
            temperature: CalibrationCurve::from_points(
                (block.t0_out as f64, block.t0 as f64),
                (block.t1_out as f64, block.t1 as f64),
            )?,
        })
    }
}

/// Reader of the HTS221 humidity block
///
/// Converts through the calibration pairs published in the block rather
/// than fixed factors, as the hardware library does.
pub struct HumidityClient {
    block: CachedBlock<HumidityBlock>,
    calibration: Option<HumidityCalibration>,
}

impl HumidityClient {
    pub fn new() -> Result<Self, RegisterError> {
        Self::open(SensorFile::Humidity.path())
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, RegisterError> {
        Ok(Self {
            block: CachedBlock::open(path.as_ref(), HUMIDITY_POLL)?,
            calibration: None,
        })
    }

    /// Whether the block is initialized and its calibration is usable
    pub fn init(&mut self) -> bool {
        let block = self.block.refresh();
        self.calibration = None;
        if block.kind == 0 {
            return false;
        }
        match HumidityCalibration::from_block(&block) {
            Ok(calibration) => {
                debug!(
                    "Humidity calibration: {:.5}/count, temperature {:.5}/count",
                    calibration.humidity.slope(),
                    calibration.temperature.slope()
                );
                self.calibration = Some(calibration);
                true
            }
            Err(e) => {
                warn!("Humidity sensor not ready: {}", e);
                false
            }
        }
    }

    pub fn device_type(&mut self) -> u8 {
        self.block.get().kind
    }

    pub fn device_name(&mut self) -> String {
        self.block.get().device_name()
    }

    /// Current readings; both invalid before [`init`](Self::init) succeeds
    pub fn read(&mut self) -> HumidityReading {
        let Some(calibration) = &self.calibration else {
            return HumidityReading::default();
        };
        let block = self.block.get();
        HumidityReading {
            humidity: (block.h_valid != 0)
                .then(|| calibration.humidity.to_physical(block.h_out as f64)),
            temperature: (block.t_valid != 0)
                .then(|| calibration.temperature.to_physical(block.t_out as f64)),
        }
    }
}

/// One IMU sample in the hardware library's units
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ImuReading {
    /// Monotonic microseconds at which the server wrote the sample
    pub timestamp: u64,
    /// g
    pub accel: Vector3,
    /// Degrees/second
    pub gyro: Vector3,
    /// Microtesla
    pub compass: Vector3,
    /// Roll, pitch and yaw in radians
    pub fusion_pose: Vector3,
}

impl ImuReading {
    pub fn from_block(block: &ImuBlock) -> Self {
        Self {
            timestamp: block.timestamp,
            accel: block.accel(),
            gyro: block.gyro(),
            // 1 gauss = 100 uT
            compass: 100.0 * block.compass(),
            fusion_pose: Vector3::from(
                block
                    .orientation
                    .map(|r| r as f64 / ImuBlock::ORIENT_FACTOR),
            ),
        }
    }
}

/// Reader of the LSM9DS1 IMU block
pub struct ImuClient {
    store: RegisterStore<ImuBlock>,
    last: Option<ImuReading>,
    initialized: bool,
}

impl ImuClient {
    pub fn new() -> Result<Self, RegisterError> {
        Self::open(SensorFile::Imu.path())
    }

    pub fn open(path: impl AsRef<Path>) -> Result<Self, RegisterError> {
        Ok(Self {
            store: RegisterStore::open_read_only(path)?,
            last: None,
            initialized: false,
        })
    }

    /// Whether a server has initialized the block
    ///
    /// The sample present at init is taken as already seen.
    pub fn init(&mut self) -> bool {
        let block = self.store.read();
        self.initialized = block.kind != 0;
        self.last = Some(ImuReading::from_block(&block));
        self.initialized
    }

    pub fn device_type(&self) -> u8 {
        self.store.read().kind
    }

    pub fn device_name(&self) -> String {
        self.store.read().device_name()
    }

    pub fn poll_interval(&self) -> Duration {
        IMU_POLL
    }

    /// The next sample, if the server wrote one since the last read
    pub fn read(&mut self) -> Option<ImuReading> {
        if !self.initialized {
            return None;
        }
        let reading = ImuReading::from_block(&self.store.read());
        if self.last.is_some_and(|last| last.timestamp == reading.timestamp) {
            return None;
        }
        self.last = Some(reading);
        Some(reading)
    }

    /// The most recent sample returned by [`read`](Self::read) or seen at init
    pub fn last(&self) -> Option<ImuReading> {
        self.last
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uninitialized_blocks_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let mut pressure = PressureClient::open(dir.path().join("p")).unwrap();
        let mut humidity = HumidityClient::open(dir.path().join("h")).unwrap();
        let mut imu = ImuClient::open(dir.path().join("i")).unwrap();

        assert!(!pressure.init());
        assert!(!humidity.init());
        assert!(!imu.init());
        assert_eq!(pressure.read(), PressureReading::default());
        assert_eq!(humidity.read(), HumidityReading::default());
        assert!(imu.read().is_none());
    }

    #[test]
    fn test_pressure_read_decodes_and_caches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p");
        let mut writer = RegisterStore::<PressureBlock>::open(&path).unwrap();
        let mut block = PressureBlock::device();
        block.set_pressure(1000.0);
        block.set_temperature(25.0);
        writer.write(&block).unwrap();

        let mut client = PressureClient::open(&path).unwrap();
        assert!(client.init());
        assert_eq!(client.device_type(), PressureBlock::KIND);
        let reading = client.read();
        assert!((reading.pressure.unwrap() - 1000.0).abs() < 0.001);
        assert!((reading.temperature.unwrap() - 25.0).abs() < 0.01);

        writer.update(|b| b.set_pressure(900.0)).unwrap();
        // Still inside the poll interval
        assert!((client.read().pressure.unwrap() - 1000.0).abs() < 0.001);
        std::thread::sleep(PRESSURE_POLL * 2);
        assert!((client.read().pressure.unwrap() - 900.0).abs() < 0.001);
    }

    #[test]
    fn test_humidity_uses_block_calibration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("h");
        let mut writer = RegisterStore::<HumidityBlock>::open(&path).unwrap();
        let mut block = HumidityBlock::device();
        // Twice the default sensitivity
        block.h1_out = 12800;
        block.h_out = 6400;
        block.h_valid = 1;
        block.set_temperature(f64::NAN);
        writer.write(&block).unwrap();

        let mut client = HumidityClient::open(&path).unwrap();
        assert!(client.init());
        let reading = client.read();
        assert!((reading.humidity.unwrap() - 50.0).abs() < 1e-9);
        assert_eq!(reading.temperature, None);
    }

    #[test]
    fn test_humidity_degenerate_calibration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("h");
        let mut writer = RegisterStore::<HumidityBlock>::open(&path).unwrap();
        let mut block = HumidityBlock::device();
        block.t1_out = block.t0_out;
        writer.write(&block).unwrap();

        let mut client = HumidityClient::open(&path).unwrap();
        assert!(!client.init());
        assert_eq!(client.read(), HumidityReading::default());
    }

    #[test]
    fn test_imu_reads_only_new_samples() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("i");
        let mut writer = RegisterStore::<ImuBlock>::open(&path).unwrap();
        writer.write(&ImuBlock::device(100)).unwrap();

        let mut client = ImuClient::open(&path).unwrap();
        assert!(client.init());
        assert!(client.read().is_none());

        writer
            .update(|b| {
                b.timestamp = 200;
                b.set_accel(Vector3::Z);
                b.set_compass(Vector3::new(0.33, 0.0, 0.0));
                b.set_orientation(Vector3::new(0.0, 0.0, 90.0));
            })
            .unwrap();
        let reading = client.read().expect("new sample");
        assert_eq!(reading.timestamp, 200);
        assert!((reading.accel.z - 1.0).abs() < 0.001);
        assert!((reading.compass.x - 33.0).abs() < 0.02);
        assert!((reading.fusion_pose.z - std::f64::consts::FRAC_PI_2).abs() < 0.001);
        assert!(client.read().is_none());
    }
}
