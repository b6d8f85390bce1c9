//! HTS221 relative humidity sensor

use std::time::Duration;

use sense_emu_registers::{HumidityBlock, SensorFile};

use crate::environment::{EnvironmentSensor, EnvironmentServer};

/// Device parameters of the HTS221
pub struct Hts221;

impl EnvironmentSensor for Hts221 {
    type Block = HumidityBlock;

    const LABEL: &'static str = "humidity";
    const FILE: SensorFile = SensorFile::Humidity;
    const TICK: Duration = Duration::from_millis(130);
    const WINDOWS: (usize, usize) = (10, 31);
    const DEFAULTS: (f64, f64) = (45.0, 20.0);

    fn device() -> HumidityBlock {
        HumidityBlock::device()
    }

    fn is_device(block: &HumidityBlock) -> bool {
        block.is_device()
    }

    fn decode(block: &HumidityBlock) -> (f64, f64) {
        (
            block.humidity().unwrap_or(f64::NAN),
            block.temperature().unwrap_or(f64::NAN),
        )
    }

    fn encode(block: &mut HumidityBlock, humidity: f64, temperature: f64) {
        block.set_humidity(humidity);
        block.set_temperature(temperature);
    }

    fn error_bands(humidity: f64, temperature: f64) -> (f64, f64) {
        let humidity_error = if (20.0..=80.0).contains(&humidity) {
            3.5
        } else {
            5.0
        };
        let temperature_error = if (15.0..=40.0).contains(&temperature) {
            0.5
        } else if (0.0..=60.0).contains(&temperature) {
            1.0
        } else {
            2.0
        };
        (humidity_error, temperature_error)
    }
}

/// Humidity server: readings are %RH and degrees Celsius
pub type HumidityServer = EnvironmentServer<Hts221>;

impl EnvironmentServer<Hts221> {
    /// True relative humidity in %RH
    pub fn humidity(&self) -> f64 {
        self.values().0
    }

    /// True temperature in degrees Celsius
    pub fn temperature(&self) -> f64 {
        self.values().1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_bands() {
        assert_eq!(Hts221::error_bands(45.0, 20.0), (3.5, 0.5));
        assert_eq!(Hts221::error_bands(85.0, 50.0), (5.0, 1.0));
        assert_eq!(Hts221::error_bands(10.0, -5.0), (5.0, 2.0));
    }

    #[test]
    fn test_calibration_registers_written() {
        let dir = tempfile::tempdir().unwrap();
        let server = HumidityServer::open(dir.path().join("humidity"), false).unwrap();
        let block = server.block();
        assert_eq!((block.h0, block.h1), (0, 100));
        assert_eq!((block.t0, block.t1), (0, 100));
        assert_eq!((block.h1_out, block.t1_out), (25600, 6400));
        assert_eq!(block.humidity(), Some(45.0));
        assert_eq!(block.temperature(), Some(20.0));
    }

    #[test]
    fn test_nan_marks_reading_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let server = HumidityServer::open(dir.path().join("humidity"), false).unwrap();
        server.set_values(f64::NAN, 25.0).unwrap();
        let block = server.block();
        assert_eq!((block.h_valid, block.h_out), (0, 0));
        assert_eq!(block.t_valid, 1);
        assert_eq!(block.temperature(), Some(25.0));
    }

    #[test]
    fn test_out_of_range_clamped() {
        let dir = tempfile::tempdir().unwrap();
        let server = HumidityServer::open(dir.path().join("humidity"), false).unwrap();
        server.set_values(150.0, -60.0).unwrap();
        let block = server.block();
        assert_eq!(block.h_out, 100 * 256);
        assert_eq!(block.t_out, -40 * 64);
        // The true values are kept as given
        assert_eq!(server.humidity(), 150.0);
    }
}
