//! Error types for the emulator core

use std::path::PathBuf;

use sense_emu_registers::RegisterError;
use sense_emu_stick::StickError;
use thiserror::Error;

/// Errors from the sensor servers
#[derive(Error, Debug)]
pub enum SensorError {
    /// Direct writes are refused while the simulation loop owns the block
    #[error("Cannot set raw values while simulation is running")]
    SimulationActive,

    #[error(transparent)]
    Register(#[from] RegisterError),

    #[error("Failed to start simulation thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Errors from the emulator lock
#[derive(Error, Debug)]
pub enum LockError {
    #[error("Emulator already running as process {pid}")]
    AlreadyLocked { pid: u32 },

    #[error("Lock file {path} is corrupt: {content:?}")]
    Corrupt { path: PathBuf, content: String },

    #[error("Lock file error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors reading or writing a recording file
#[derive(Error, Debug)]
pub enum RecordingError {
    #[error("Not a Sense HAT recording (bad magic)")]
    BadMagic,

    #[error("Unsupported recording version {0}")]
    UnsupportedVersion(i8),

    #[error("Incomplete data record at end of file")]
    IncompleteRecord,

    #[error("Data record has unusable timestamp {0}")]
    InvalidTimestamp(f64),

    #[error("Failed to initialize {0} sensor")]
    SensorNotReady(&'static str),

    #[error(transparent)]
    Register(#[from] RegisterError),

    #[error("Recording I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from starting or driving the emulator
#[derive(Error, Debug)]
pub enum EmulatorError {
    #[error("Cannot create state directory {path}: {source}")]
    StateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Sensor(#[from] SensorError),

    #[error(transparent)]
    Stick(#[from] StickError),

    #[error(transparent)]
    Recording(#[from] RecordingError),
}

impl From<RegisterError> for EmulatorError {
    fn from(e: RegisterError) -> Self {
        Self::Sensor(SensorError::Register(e))
    }
}
