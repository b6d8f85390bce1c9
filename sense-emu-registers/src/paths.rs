//! Well-known locations of the emulator's shared state
//!
//! On Windows everything lives in `%TEMP%`. Elsewhere `/dev/shm` is preferred
//! so the register files stay in memory, falling back to `/tmp`.

use std::path::{Path, PathBuf};

/// Shared files and sockets used by the emulator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorFile {
    Imu,
    Pressure,
    Humidity,
    Screen,
    Lock,
    Stick,
}

impl SensorFile {
    /// File name inside the state directory
    pub fn file_name(&self) -> &'static str {
        match self {
            SensorFile::Imu => "rpi-sense-emu-imu",
            SensorFile::Pressure => "rpi-sense-emu-pressure",
            SensorFile::Humidity => "rpi-sense-emu-humidity",
            SensorFile::Screen => "rpi-sense-emu-screen",
            SensorFile::Lock => "rpi-sense-emu-pid",
            SensorFile::Stick => "rpi-sense-emu-stick",
        }
    }

    /// Full path inside the default state directory
    pub fn path(&self) -> PathBuf {
        self.path_in(&state_dir())
    }

    /// Full path inside an explicit state directory
    pub fn path_in(&self, dir: &Path) -> PathBuf {
        dir.join(self.file_name())
    }
}

/// Directory holding the emulator's register files, lock file and sockets
#[cfg(windows)]
pub fn state_dir() -> PathBuf {
    std::env::var_os("TEMP")
        .map(PathBuf::from)
        .unwrap_or_else(std::env::temp_dir)
}

/// Directory holding the emulator's register files, lock file and sockets
#[cfg(not(windows))]
pub fn state_dir() -> PathBuf {
    let shm = Path::new("/dev/shm");
    if shm.exists() {
        shm.to_path_buf()
    } else {
        PathBuf::from("/tmp")
    }
}
