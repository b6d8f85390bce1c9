//! Read side of the LED matrix frame buffer
//!
//! Pixels are RGB565. The real panel drops the low green bit, runs each
//! 5-bit channel through the user gamma table, and its LEDs are far
//! brighter than a monitor, so [`ScreenClient::rgb_array`] applies a second
//! brightness curve on top of the gamma table.

use std::path::Path;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, UNIX_EPOCH};

use tracing::{debug, trace, warn};

use sense_emu_registers::{DisplayBlock, RegisterError, RegisterStore, SensorFile};

use crate::error::SensorError;
use crate::ticker::Ticker;

/// The frame buffer's mtime is bumped at least this often
const TOUCH_INTERVAL: Duration = Duration::from_secs(1);

/// Gamma table entries are 5-bit values
const GAMMA_LEVELS: usize = 32;

/// Brightness curve mapping a gamma-corrected level to an 8-bit intensity
///
/// Equivalent to a gamma of 1/4 over `0.05..=1`, so unlit LEDs show as a
/// dim grey rather than black.
pub fn led_curve() -> &'static [u8; GAMMA_LEVELS] {
    static CURVE: OnceLock<[u8; GAMMA_LEVELS]> = OnceLock::new();
    CURVE.get_or_init(|| {
        let (start, stop) = (0.05_f64, 1.0_f64);
        let step = (stop - start) / (GAMMA_LEVELS - 1) as f64;
        std::array::from_fn(|i| {
            let level = if i == GAMMA_LEVELS - 1 {
                stop
            } else {
                start + i as f64 * step
            };
            (level.sqrt().sqrt() * 255.0) as u8
        })
    })
}

/// Split an RGB565 pixel into three 5-bit channels
pub fn split_rgb565(pixel: u16) -> [u8; 3] {
    [
        ((pixel & 0xF800) >> 11) as u8,
        ((pixel & 0x07E0) >> 6) as u8,
        (pixel & 0x001F) as u8,
    ]
}

/// Observer of the LED matrix
///
/// Keeps the frame buffer's modification time moving from a background
/// thread, so [`timestamp`](Self::timestamp) advances even when a write
/// lands inside the filesystem's timestamp resolution.
pub struct ScreenClient {
    store: Arc<RegisterStore<DisplayBlock>>,
    touch: Option<Ticker>,
}

impl ScreenClient {
    pub fn new() -> Result<Self, SensorError> {
        Self::open(SensorFile::Screen.path())
    }

    /// Map the frame buffer at `path`, creating a blank one if needed
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SensorError> {
        let store = Arc::new(RegisterStore::<DisplayBlock>::open_read_only(path)?);
        let touched = Arc::clone(&store);
        let touch = Ticker::spawn("screen-touch", TOUCH_INTERVAL, move || {
            match touched.touch() {
                Ok(()) => trace!("Touched {}", touched.path().display()),
                Err(e) => warn!("Screen touch failed: {}", e),
            }
        })?;
        debug!("Screen client on {}", store.path().display());
        Ok(Self {
            store,
            touch: Some(touch),
        })
    }

    pub fn path(&self) -> &Path {
        self.store.path()
    }

    /// Raw RGB565 pixels, indexed `[row][column]`
    pub fn array(&self) -> [[u16; DisplayBlock::WIDTH]; DisplayBlock::HEIGHT] {
        let block = self.store.read();
        std::array::from_fn(|y| std::array::from_fn(|x| block.pixel(x, y)))
    }

    /// Pixels as 8-bit RGB, as the panel would show them
    pub fn rgb_array(&self) -> [[[u8; 3]; DisplayBlock::WIDTH]; DisplayBlock::HEIGHT] {
        let block = self.store.read();
        let curve = led_curve();
        std::array::from_fn(|y| {
            std::array::from_fn(|x| {
                split_rgb565(block.pixel(x, y)).map(|channel| {
                    let level = block.gamma[channel as usize].min(GAMMA_LEVELS as u8 - 1);
                    curve[level as usize]
                })
            })
        })
    }

    /// The user gamma table
    pub fn gamma(&self) -> [u8; GAMMA_LEVELS] {
        self.store.read().gamma
    }

    /// Modification time of the frame buffer in seconds since the epoch
    ///
    /// A larger value than last time means a new frame may be available.
    pub fn timestamp(&self) -> Result<f64, RegisterError> {
        let modified = self.store.modified()?;
        Ok(modified
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0))
    }

    /// Stop the touch thread
    pub fn close(&mut self) {
        if let Some(mut touch) = self.touch.take() {
            touch.stop();
        }
    }
}

impl Drop for ScreenClient {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sense_emu_registers::{GAMMA_DEFAULT, GAMMA_LOW};

    #[test]
    fn test_led_curve_endpoints() {
        let curve = led_curve();
        // (0.05 ^ 0.25) * 255
        assert_eq!(curve[0], 120);
        assert_eq!(curve[31], 255);
        assert!(curve.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_split_rgb565() {
        assert_eq!(split_rgb565(0xFFFF), [31, 31, 31]);
        assert_eq!(split_rgb565(0xF800), [31, 0, 0]);
        // Lowest green bit is dropped
        assert_eq!(split_rgb565(0x0020), [0, 0, 0]);
        assert_eq!(split_rgb565(0x07E0), [0, 31, 0]);
        assert_eq!(split_rgb565(0x001F), [0, 0, 31]);
    }

    #[test]
    fn test_fresh_screen_is_blank() {
        let dir = tempfile::tempdir().unwrap();
        let screen = ScreenClient::open(dir.path().join("screen")).unwrap();
        assert_eq!(screen.array(), [[0u16; 8]; 8]);
        assert_eq!(screen.gamma(), GAMMA_DEFAULT);
        let dim = led_curve()[0];
        assert!(screen
            .rgb_array()
            .iter()
            .flatten()
            .all(|rgb| *rgb == [dim, dim, dim]));
    }

    #[test]
    fn test_rgb_array_applies_gamma_then_curve() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("screen");
        let mut writer = RegisterStore::<DisplayBlock>::open(&path).unwrap();
        let screen = ScreenClient::open(&path).unwrap();

        writer
            .update(|b| {
                b.set_pixel(2, 1, 0xF800);
                b.set_pixel(7, 7, 0xFFFF);
            })
            .unwrap();
        let array = screen.array();
        assert_eq!(array[1][2], 0xF800);
        assert_eq!(array[7][7], 0xFFFF);

        let curve = led_curve();
        let rgb = screen.rgb_array();
        assert_eq!(rgb[1][2], [curve[31], curve[0], curve[0]]);
        assert_eq!(rgb[7][7], [curve[31]; 3]);

        writer.update(|b| b.gamma = GAMMA_LOW).unwrap();
        let rgb = screen.rgb_array();
        assert_eq!(rgb[7][7], [curve[GAMMA_LOW[31] as usize]; 3]);
    }

    #[test]
    fn test_timestamp_advances_without_writes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("screen");
        let screen = ScreenClient::open(&path).unwrap();
        let before = screen.timestamp().unwrap();
        std::thread::sleep(TOUCH_INTERVAL + Duration::from_millis(500));
        assert!(screen.timestamp().unwrap() > before);
    }
}
