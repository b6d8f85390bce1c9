//! Two-point linear calibration
//!
//! Sensors such as the HTS221 publish two (raw, physical) reference pairs in
//! their registers. A reader fits a line through them once and uses it to
//! convert every subsequent raw output.

use thiserror::Error;

/// Why a calibration curve could not be built
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum CalibrationError {
    #[error("Calibration points share raw value {raw}; sensor cannot be calibrated")]
    Degenerate { raw: f64 },

    #[error("Calibration points are not finite")]
    NotFinite,
}

/// Linear fit `physical = slope * raw + intercept`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationCurve {
    slope: f64,
    intercept: f64,
}

impl CalibrationCurve {
    /// Fit a line through `(raw0, physical0)` and `(raw1, physical1)`
    pub fn from_points(
        (raw0, physical0): (f64, f64),
        (raw1, physical1): (f64, f64),
    ) -> Result<Self, CalibrationError> {
        if ![raw0, physical0, raw1, physical1]
            .iter()
            .all(|v| v.is_finite())
        {
            return Err(CalibrationError::NotFinite);
        }
        let delta = raw1 - raw0;
        if delta == 0.0 {
            return Err(CalibrationError::Degenerate { raw: raw0 });
        }
        let slope = (physical1 - physical0) / delta;
        Ok(Self {
            slope,
            intercept: physical0 - slope * raw0,
        })
    }

    pub fn slope(&self) -> f64 {
        self.slope
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    /// Convert a raw register value to physical units
    pub fn to_physical(&self, raw: f64) -> f64 {
        raw * self.slope + self.intercept
    }

    /// Convert a physical value back to raw register units
    ///
    /// A flat curve (zero slope) cannot be inverted and yields NaN.
    pub fn to_raw(&self, physical: f64) -> f64 {
        if self.slope == 0.0 {
            f64::NAN
        } else {
            (physical - self.intercept) / self.slope
        }
    }
}
