// Sense HAT emulator - sensor servers, clients and shared-state arbitration
// Register blocks live in sense-emu-registers, the joystick bus in sense-emu-stick

pub mod client;
pub mod clock;
pub mod config;
pub mod emulator;
pub mod environment;
pub mod error;
pub mod humidity;
pub mod imu;
pub mod lock;
pub mod noise;
pub mod playback;
pub mod pressure;
pub mod recorder;
pub mod recording;
pub mod screen;
pub mod ticker;

pub use client::{
    HumidityClient, HumidityReading, ImuClient, ImuReading, PressureClient, PressureReading,
};
pub use clock::{Clock, SystemClock};
pub use config::EmulatorConfig;
pub use emulator::{Emulator, SimulationModes};
pub use environment::{EnvironmentSensor, EnvironmentServer};
pub use error::{EmulatorError, LockError, RecordingError, SensorError};
pub use humidity::{Hts221, HumidityServer};
pub use imu::ImuServer;
pub use lock::{pid_exists, EmulatorLock};
pub use playback::{Playback, PlaybackStats};
pub use pressure::{Lps25h, PressureServer};
pub use recorder::Recorder;
pub use recording::{DataRecord, RecordingHeader, RecordingReader, RecordingWriter};
pub use screen::ScreenClient;

pub use sense_emu_registers as registers;
pub use sense_emu_stick as stick;
