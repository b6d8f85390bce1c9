//! Byte-exact register block layouts
//!
//! Every block is `#[repr(C)]` with explicit padding so the in-memory image
//! matches the native struct layout that other processes expect when they
//! map the same file. Field order must never change.
//!
//! ```text
//! Pressure  (20 bytes)  type | name[6] | pad | P_REF i32 | P_OUT i32 | T_OUT i16 | P_VALID | T_VALID
//! Humidity  (28 bytes)  type | name[6] | H0 | H1 | pad | T0 u16 | T1 u16 | H0_OUT .. T_OUT i16 x6 | H_VALID | T_VALID
//! IMU       (56 bytes)  type | name[20] | pad[3] | timestamp u64 | gyro i16x3 | accel i16x3 | compass i16x3 | orient i16x3
//! Display  (160 bytes)  pixels u16x64 | gamma u8x32
//! ```

use zerocopy::{FromBytes, FromZeros, Immutable, IntoBytes, KnownLayout};

use crate::vector::Vector3;

/// A fixed-layout record that can live in a [`RegisterStore`](crate::RegisterStore)
pub trait RegisterBlock:
    FromBytes + IntoBytes + KnownLayout + Immutable + Copy + Send + Sync + 'static
{
    /// Size of the block in bytes (the size of its backing file)
    const SIZE: usize = std::mem::size_of::<Self>();

    /// Contents written when the backing file is created for the first time
    fn initial() -> Self {
        Self::new_zeroed()
    }
}

/// Encode `name` as a Pascal string in an `N`-byte field
///
/// The first byte holds the length; at most `N - 1` bytes of the name are
/// kept, the rest of the field is zero.
pub fn encode_name<const N: usize>(name: &str) -> [u8; N] {
    let mut field = [0u8; N];
    if N == 0 {
        return field;
    }
    let bytes = name.as_bytes();
    let len = bytes.len().min(N - 1).min(u8::MAX as usize);
    field[0] = len as u8;
    field[1..=len].copy_from_slice(&bytes[..len]);
    field
}

/// Clamp `value` into `range` and scale it to raw register counts
///
/// The float-to-int cast saturates, and NaN becomes 0.
fn to_raw_i16(value: f64, (lo, hi): (f64, f64), factor: f64) -> i16 {
    (value.clamp(lo, hi) * factor) as i16
}

/// Decode a Pascal string field written by [`encode_name`]
pub fn decode_name(field: &[u8]) -> String {
    match field.split_first() {
        Some((&len, rest)) => {
            let len = (len as usize).min(rest.len());
            String::from_utf8_lossy(&rest[..len]).into_owned()
        }
        None => String::new(),
    }
}

// =============================================================================
// Pressure (LPS25H)
// =============================================================================

/// Pressure sensor register block (LPS25H)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct PressureBlock {
    /// Sensor type tag; 0 until a server initializes the block
    pub kind: u8,
    pub name: [u8; 6],
    pub _pad0: u8,
    pub p_ref: i32,
    pub p_out: i32,
    pub t_out: i16,
    pub p_valid: u8,
    pub t_valid: u8,
}

impl PressureBlock {
    pub const KIND: u8 = 3;
    pub const NAME: &'static str = "LPS25H";
    /// Raw counts per hPa
    pub const PRESSURE_FACTOR: f64 = 4096.0;
    /// Raw counts per degree Celsius
    pub const TEMP_FACTOR: f64 = 480.0;
    /// Temperature at which `T_OUT` reads zero
    pub const TEMP_OFFSET: f64 = 37.0;
    pub const PRESSURE_RANGE: (f64, f64) = (260.0, 1260.0);
    pub const TEMP_RANGE: (f64, f64) = (-30.0, 105.0);

    /// Freshly initialized block as written by a server on first start
    pub fn device() -> Self {
        Self {
            kind: Self::KIND,
            name: encode_name(Self::NAME),
            ..Self::default()
        }
    }

    pub fn device_name(&self) -> String {
        decode_name(&self.name)
    }

    /// Whether a server has initialized this block
    pub fn is_device(&self) -> bool {
        self.kind == Self::KIND
    }

    /// Store a pressure in hPa; NaN marks the reading invalid
    pub fn set_pressure(&mut self, hpa: f64) {
        if hpa.is_nan() {
            self.p_valid = 0;
            self.p_out = 0;
        } else {
            let (lo, hi) = Self::PRESSURE_RANGE;
            self.p_valid = 1;
            self.p_out = (hpa.clamp(lo, hi) * Self::PRESSURE_FACTOR) as i32;
        }
    }

    /// Store a temperature in degrees Celsius; NaN marks the reading invalid
    pub fn set_temperature(&mut self, celsius: f64) {
        if celsius.is_nan() {
            self.t_valid = 0;
            self.t_out = 0;
        } else {
            let (lo, hi) = Self::TEMP_RANGE;
            self.t_valid = 1;
            self.t_out = ((celsius.clamp(lo, hi) - Self::TEMP_OFFSET) * Self::TEMP_FACTOR) as i16;
        }
    }

    /// Pressure in hPa, if valid
    pub fn pressure(&self) -> Option<f64> {
        (self.p_valid != 0).then(|| self.p_out as f64 / Self::PRESSURE_FACTOR)
    }

    /// Temperature in degrees Celsius, if valid
    pub fn temperature(&self) -> Option<f64> {
        (self.t_valid != 0).then(|| self.t_out as f64 / Self::TEMP_FACTOR + Self::TEMP_OFFSET)
    }
}

impl RegisterBlock for PressureBlock {}

// =============================================================================
// Humidity (HTS221)
// =============================================================================

/// Humidity sensor register block (HTS221)
///
/// `H0`/`H1`, `T0`/`T1` and their `*_OUT` counterparts are the two-point
/// calibration pairs a reader uses to convert `H_OUT`/`T_OUT`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct HumidityBlock {
    pub kind: u8,
    pub name: [u8; 6],
    pub h0: u8,
    pub h1: u8,
    pub _pad0: u8,
    pub t0: u16,
    pub t1: u16,
    pub h0_out: i16,
    pub h1_out: i16,
    pub t0_out: i16,
    pub t1_out: i16,
    pub h_out: i16,
    pub t_out: i16,
    pub h_valid: u8,
    pub t_valid: u8,
}

impl HumidityBlock {
    pub const KIND: u8 = 2;
    pub const NAME: &'static str = "HTS221";
    /// Raw counts per %RH
    pub const HUMIDITY_FACTOR: f64 = 256.0;
    /// Raw counts per degree Celsius
    pub const TEMP_FACTOR: f64 = 64.0;
    pub const HUMIDITY_RANGE: (f64, f64) = (0.0, 100.0);
    pub const TEMP_RANGE: (f64, f64) = (-40.0, 120.0);

    /// Freshly initialized block with the default calibration pairs
    pub fn device() -> Self {
        Self {
            kind: Self::KIND,
            name: encode_name(Self::NAME),
            h0: 0,
            h1: 100,
            t0: 0,
            t1: 100,
            h0_out: 0,
            h1_out: 25600,
            t0_out: 0,
            t1_out: 6400,
            ..Self::default()
        }
    }

    pub fn device_name(&self) -> String {
        decode_name(&self.name)
    }

    pub fn is_device(&self) -> bool {
        self.kind == Self::KIND
    }

    /// Store a relative humidity in %RH; NaN marks the reading invalid
    pub fn set_humidity(&mut self, rh: f64) {
        if rh.is_nan() {
            self.h_valid = 0;
            self.h_out = 0;
        } else {
            self.h_valid = 1;
            self.h_out = to_raw_i16(rh, Self::HUMIDITY_RANGE, Self::HUMIDITY_FACTOR);
        }
    }

    /// Store a temperature in degrees Celsius; NaN marks the reading invalid
    pub fn set_temperature(&mut self, celsius: f64) {
        if celsius.is_nan() {
            self.t_valid = 0;
            self.t_out = 0;
        } else {
            self.t_valid = 1;
            self.t_out = to_raw_i16(celsius, Self::TEMP_RANGE, Self::TEMP_FACTOR);
        }
    }

    /// Humidity assuming the default calibration, if valid
    ///
    /// Readers honoring the calibration registers use
    /// [`CalibrationCurve`](crate::CalibrationCurve) instead.
    pub fn humidity(&self) -> Option<f64> {
        (self.h_valid != 0).then(|| self.h_out as f64 / Self::HUMIDITY_FACTOR)
    }

    /// Temperature assuming the default calibration, if valid
    pub fn temperature(&self) -> Option<f64> {
        (self.t_valid != 0).then(|| self.t_out as f64 / Self::TEMP_FACTOR)
    }
}

impl RegisterBlock for HumidityBlock {}

// =============================================================================
// IMU (LSM9DS1)
// =============================================================================

/// Inertial measurement unit register block (LSM9DS1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct ImuBlock {
    pub kind: u8,
    pub name: [u8; 20],
    pub _pad0: [u8; 3],
    /// Monotonic microsecond timestamp of the last write
    pub timestamp: u64,
    // Gyro first; the Python emulator's own files put accel here
    pub gyro: [i16; 3],
    pub accel: [i16; 3],
    pub compass: [i16; 3],
    pub orientation: [i16; 3],
}

impl ImuBlock {
    pub const KIND: u8 = 6;
    pub const NAME: &'static str = "LSM9DS1";
    /// Raw counts per g
    pub const ACCEL_FACTOR: f64 = 4081.6327;
    /// Raw counts per degree/second
    pub const GYRO_FACTOR: f64 = 57.142857;
    /// Raw counts per gauss
    pub const COMPASS_FACTOR: f64 = 7142.8571;
    /// Raw counts per radian of orientation
    pub const ORIENT_FACTOR: f64 = 5214.1892;
    pub const ACCEL_RANGE: (f64, f64) = (-8.0, 8.0);
    pub const GYRO_RANGE: (f64, f64) = (-500.0, 500.0);
    pub const COMPASS_RANGE: (f64, f64) = (-4.0, 4.0);
    /// Orientation range in degrees
    pub const ORIENT_RANGE: (f64, f64) = (-180.0, 180.0);

    pub fn device(timestamp: u64) -> Self {
        Self {
            kind: Self::KIND,
            name: encode_name(Self::NAME),
            timestamp,
            ..Self::default()
        }
    }

    pub fn device_name(&self) -> String {
        decode_name(&self.name)
    }

    pub fn is_device(&self) -> bool {
        self.kind == Self::KIND
    }

    /// Angular rate in degrees/second
    pub fn set_gyro(&mut self, dps: Vector3) {
        self.gyro = encode_axes(dps, Self::GYRO_RANGE, Self::GYRO_FACTOR);
    }

    /// Acceleration in g
    pub fn set_accel(&mut self, g: Vector3) {
        self.accel = encode_axes(g, Self::ACCEL_RANGE, Self::ACCEL_FACTOR);
    }

    /// Magnetic field in gauss
    pub fn set_compass(&mut self, gauss: Vector3) {
        self.compass = encode_axes(gauss, Self::COMPASS_RANGE, Self::COMPASS_FACTOR);
    }

    /// Roll, pitch and yaw in degrees
    pub fn set_orientation(&mut self, degrees: Vector3) {
        let (lo, hi) = Self::ORIENT_RANGE;
        let radians = degrees.map(|d| d.clamp(lo, hi).to_radians());
        self.orientation = encode_axes(
            radians,
            (-std::f64::consts::PI, std::f64::consts::PI),
            Self::ORIENT_FACTOR,
        );
    }

    pub fn gyro(&self) -> Vector3 {
        decode_axes(self.gyro, Self::GYRO_FACTOR)
    }

    pub fn accel(&self) -> Vector3 {
        decode_axes(self.accel, Self::ACCEL_FACTOR)
    }

    pub fn compass(&self) -> Vector3 {
        decode_axes(self.compass, Self::COMPASS_FACTOR)
    }

    /// Orientation in degrees
    pub fn orientation(&self) -> Vector3 {
        decode_axes(self.orientation, Self::ORIENT_FACTOR).map(f64::to_degrees)
    }
}

fn encode_axes(v: Vector3, range: (f64, f64), factor: f64) -> [i16; 3] {
    [
        to_raw_i16(v.x, range, factor),
        to_raw_i16(v.y, range, factor),
        to_raw_i16(v.z, range, factor),
    ]
}

fn decode_axes(raw: [i16; 3], factor: f64) -> Vector3 {
    Vector3::from(raw.map(|r| r as f64 / factor))
}

impl RegisterBlock for ImuBlock {}

// =============================================================================
// Display (8x8 RGB LED matrix)
// =============================================================================

/// Default gamma table of the LED matrix
pub const GAMMA_DEFAULT: [u8; 32] = [
    0, 0, 0, 0, 0, 0, 1, 1, 2, 2, 3, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 14, 15, 17, 18, 20, 21, 23,
    25, 27, 29, 31,
];

/// Low-light gamma table of the LED matrix
pub const GAMMA_LOW: [u8; 32] = [
    0, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 1, 2, 2, 2, 3, 3, 3, 4, 4, 5, 5, 6, 6, 7, 7, 8, 8, 9, 10,
    10,
];

/// LED matrix frame buffer: 64 RGB565 pixels followed by the gamma table
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
#[repr(C)]
pub struct DisplayBlock {
    /// Row-major pixels
    pub pixels: [u16; 64],
    pub gamma: [u8; 32],
}

impl DisplayBlock {
    pub const WIDTH: usize = 8;
    pub const HEIGHT: usize = 8;

    pub fn pixel(&self, x: usize, y: usize) -> u16 {
        self.pixels[y * Self::WIDTH + x]
    }

    pub fn set_pixel(&mut self, x: usize, y: usize, value: u16) {
        self.pixels[y * Self::WIDTH + x] = value;
    }
}

impl Default for DisplayBlock {
    fn default() -> Self {
        Self {
            pixels: [0; 64],
            gamma: GAMMA_DEFAULT,
        }
    }
}

impl RegisterBlock for DisplayBlock {
    fn initial() -> Self {
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_sizes_match_native_layout() {
        assert_eq!(PressureBlock::SIZE, 20);
        assert_eq!(HumidityBlock::SIZE, 28);
        assert_eq!(ImuBlock::SIZE, 56);
        assert_eq!(DisplayBlock::SIZE, 160);
    }

    #[test]
    fn test_pressure_field_offsets() {
        let mut block = PressureBlock::device();
        block.p_out = 0x0102_0304;
        block.t_out = -2;
        block.p_valid = 1;
        let bytes = block.as_bytes();
        assert_eq!(bytes[0], 3);
        assert_eq!(&bytes[1..7], b"\x05LPS25");
        assert_eq!(&bytes[12..16], &0x0102_0304i32.to_ne_bytes());
        assert_eq!(&bytes[16..18], &(-2i16).to_ne_bytes());
        assert_eq!(bytes[18], 1);
    }

    #[test]
    fn test_imu_timestamp_is_8_byte_aligned() {
        let block = ImuBlock::device(0x1122_3344_5566_7788);
        let bytes = block.as_bytes();
        assert_eq!(&bytes[24..32], &0x1122_3344_5566_7788u64.to_ne_bytes());
        assert_eq!(block.device_name(), "LSM9DS1");
    }

    #[test]
    fn test_name_truncated_to_field_width() {
        let field: [u8; 6] = encode_name("LPS25H");
        assert_eq!(decode_name(&field), "LPS25");
        let field: [u8; 6] = encode_name("");
        assert_eq!(decode_name(&field), "");
    }

    #[test]
    fn test_pressure_conversions() {
        let mut block = PressureBlock::device();
        block.set_pressure(1013.25);
        block.set_temperature(20.0);
        assert_eq!(block.p_out, 4_150_272);
        assert_eq!(block.t_out, -8160);
        assert_eq!(block.pressure(), Some(1013.25));
        assert_eq!(block.temperature(), Some(20.0));

        block.set_pressure(5000.0);
        block.set_temperature(-100.0);
        assert_eq!(block.p_out, 1260 * 4096);
        assert_eq!(block.t_out, -67 * 480);

        block.set_pressure(f64::NAN);
        assert_eq!((block.p_valid, block.p_out), (0, 0));
        assert_eq!(block.pressure(), None);
    }

    #[test]
    fn test_humidity_conversions() {
        let mut block = HumidityBlock::device();
        block.set_humidity(45.0);
        block.set_temperature(130.0);
        assert_eq!(block.h_out, 11520);
        assert_eq!(block.t_out, 120 * 64);
        assert_eq!(block.humidity(), Some(45.0));

        block.set_humidity(-3.0);
        assert_eq!(block.h_out, 0);
        assert_eq!(block.h_valid, 1);

        block.set_temperature(f64::NAN);
        assert_eq!(block.temperature(), None);
        assert_eq!(block.t_out, 0);
    }

    #[test]
    fn test_imu_conversions() {
        let mut block = ImuBlock::device(1);
        block.set_accel(Vector3::new(1.0, 0.0, 9.0));
        block.set_gyro(Vector3::new(-600.0, 0.0, 100.0));
        block.set_orientation(Vector3::new(90.0, -200.0, 0.0));
        assert_eq!(block.accel, [4081, 0, 32653]);
        assert_eq!(block.gyro[0], -28571);
        assert!((block.accel().x - 1.0).abs() <= 1.0 / ImuBlock::ACCEL_FACTOR);

        let orientation = block.orientation();
        assert!((orientation.x - 90.0).abs() < 0.02);
        assert!((orientation.y + 180.0).abs() < 0.02);
    }

    #[test]
    fn test_fresh_block_is_all_zero() {
        let zero = PressureBlock::initial();
        assert!(zero.as_bytes().iter().all(|&b| b == 0));
        assert_eq!(zero.kind, 0);
    }

    #[test]
    fn test_display_initial_carries_default_gamma() {
        let display = DisplayBlock::initial();
        assert_eq!(display.gamma, GAMMA_DEFAULT);
        assert!(display.pixels.iter().all(|&p| p == 0));
        assert_eq!(&display.as_bytes()[128..], &GAMMA_DEFAULT);
    }
}
