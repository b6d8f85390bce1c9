//! Register blocks for the emulated Sense HAT
//!
//! Each emulated sensor keeps its hardware state in a small fixed-layout
//! binary record backed by a memory-mapped file. Servers write the records,
//! any number of client processes map the same files and read them.
//!
//! - [`layout`] - byte-exact register block definitions
//! - [`store`] - memory-mapped file holding one block
//! - [`paths`] - well-known locations of the state files
//! - [`vector`] - 3-component vector math used by the IMU world model
//! - [`calibration`] - two-point linear raw/physical conversion

pub mod calibration;
pub mod error;
pub mod layout;
pub mod paths;
pub mod store;
pub mod vector;

pub use calibration::{CalibrationCurve, CalibrationError};
pub use error::RegisterError;
pub use layout::{
    DisplayBlock, HumidityBlock, ImuBlock, PressureBlock, RegisterBlock, GAMMA_DEFAULT,
    GAMMA_LOW,
};
pub use paths::{state_dir, SensorFile};
pub use store::{Access, RegisterStore};
pub use vector::Vector3;
