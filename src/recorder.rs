//! Capture of live sensor readings into a recording

use std::io::Write;
use std::path::Path;
use std::time::{Duration, Instant};

use tracing::info;

use sense_emu_registers::SensorFile;

use crate::client::{HumidityClient, ImuClient, ImuReading, PressureClient};
use crate::clock::Clock;
use crate::error::RecordingError;
use crate::recording::{DataRecord, RecordingWriter};

/// How often progress is logged while recording
const STATUS_INTERVAL: Duration = Duration::from_secs(1);

/// Samples all three sensor clients into [`DataRecord`]s
///
/// A record is produced only when the IMU publishes a new sample, so the
/// recording rate follows the IMU server.
pub struct Recorder {
    pressure: PressureClient,
    humidity: HumidityClient,
    imu: ImuClient,
}

impl Recorder {
    /// Open the sensors in the default state directory and initialize them
    pub fn new() -> Result<Self, RecordingError> {
        Self::open_in(&sense_emu_registers::state_dir())
    }

    /// Open the sensors in `dir` and initialize them
    pub fn open_in(dir: &Path) -> Result<Self, RecordingError> {
        let mut recorder = Self {
            pressure: PressureClient::open(SensorFile::Pressure.path_in(dir))?,
            humidity: HumidityClient::open(SensorFile::Humidity.path_in(dir))?,
            imu: ImuClient::open(SensorFile::Imu.path_in(dir))?,
        };
        if !recorder.imu.init() {
            return Err(RecordingError::SensorNotReady("IMU"));
        }
        if !recorder.pressure.init() {
            return Err(RecordingError::SensorNotReady("pressure"));
        }
        if !recorder.humidity.init() {
            return Err(RecordingError::SensorNotReady("humidity"));
        }
        Ok(recorder)
    }

    /// A record stamped `timestamp` if the IMU has a new sample
    pub fn sample(&mut self, timestamp: f64) -> Option<DataRecord> {
        let imu = self.imu.read()?;
        Some(self.record_from(timestamp, &imu))
    }

    fn record_from(&mut self, timestamp: f64, imu: &ImuReading) -> DataRecord {
        let pressure = self.pressure.read();
        let humidity = self.humidity.read();
        DataRecord {
            timestamp,
            pressure: pressure.pressure.unwrap_or(f64::NAN),
            ptemp: pressure.temperature.unwrap_or(f64::NAN),
            humidity: humidity.humidity.unwrap_or(f64::NAN),
            htemp: humidity.temperature.unwrap_or(f64::NAN),
            accel: imu.accel.to_array(),
            gyro: imu.gyro.to_array(),
            compass: imu.compass.to_array(),
            orientation: imu.fusion_pose.to_array(),
        }
    }

    /// Record for `duration`, polling every `interval`
    ///
    /// `None` for `interval` uses the IMU poll interval. Returns the number
    /// of records written.
    pub fn record<W: Write, C: Clock>(
        &mut self,
        writer: &mut RecordingWriter<W>,
        clock: &C,
        duration: Duration,
        interval: Option<Duration>,
    ) -> Result<u64, RecordingError> {
        let interval = interval.unwrap_or_else(|| self.imu.poll_interval());
        let terminate_at = clock.now() + duration.as_secs_f64();
        let mut written = 0;
        let mut last_status = Instant::now();

        info!("Starting recording");
        loop {
            let timestamp = clock.now();
            if let Some(record) = self.sample(timestamp) {
                writer.write_record(&record)?;
                written += 1;
            }
            if last_status.elapsed() >= STATUS_INTERVAL {
                info!("{} records written", written);
                last_status = Instant::now();
            }
            if timestamp > terminate_at {
                break;
            }
            let delay = timestamp + interval.as_secs_f64() - clock.now();
            if delay > 0.0 {
                clock.sleep(Duration::from_secs_f64(delay));
            }
        }
        writer.flush()?;
        info!("Finishing recording after {} records", written);
        Ok(written)
    }
}
