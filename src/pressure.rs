//! LPS25H barometric pressure sensor

use std::time::Duration;

use sense_emu_registers::{PressureBlock, SensorFile};

use crate::environment::{EnvironmentSensor, EnvironmentServer};

/// Device parameters of the LPS25H
pub struct Lps25h;

impl EnvironmentSensor for Lps25h {
    type Block = PressureBlock;

    const LABEL: &'static str = "pressure";
    const FILE: SensorFile = SensorFile::Pressure;
    const TICK: Duration = Duration::from_millis(40);
    const WINDOWS: (usize, usize) = (25, 25);
    const DEFAULTS: (f64, f64) = (1013.0, 20.0);

    fn device() -> PressureBlock {
        PressureBlock::device()
    }

    fn is_device(block: &PressureBlock) -> bool {
        block.is_device()
    }

    fn decode(block: &PressureBlock) -> (f64, f64) {
        (
            block.pressure().unwrap_or(f64::NAN),
            block.temperature().unwrap_or(f64::NAN),
        )
    }

    fn encode(block: &mut PressureBlock, pressure: f64, temperature: f64) {
        block.set_pressure(pressure);
        block.set_temperature(temperature);
    }

    fn error_bands(pressure: f64, temperature: f64) -> (f64, f64) {
        let pressure_error =
            if (800.0..=1100.0).contains(&pressure) && (20.0..=60.0).contains(&temperature) {
                0.2
            } else {
                1.0
            };
        let temperature_error = if (0.0..=65.0).contains(&temperature) {
            2.0
        } else {
            4.0
        };
        (pressure_error, temperature_error)
    }
}

/// Pressure server: readings are hPa and degrees Celsius
pub type PressureServer = EnvironmentServer<Lps25h>;

impl EnvironmentServer<Lps25h> {
    /// True pressure in hPa
    pub fn pressure(&self) -> f64 {
        self.values().0
    }

    /// True temperature in degrees Celsius
    pub fn temperature(&self) -> f64 {
        self.values().1
    }
}
