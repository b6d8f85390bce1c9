//! The process driving every emulated sensor
//!
//! Holding the emulator lock, it owns the pressure, humidity and IMU
//! servers plus the writer side of the joystick bus. Dropping it stops the
//! simulation loops, closes the bus and releases the lock.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use sense_emu_registers::SensorFile;
use sense_emu_stick::{Action, Direction, StickError, StickServer};

use crate::clock::{Clock, SystemClock};
use crate::config::EmulatorConfig;
use crate::error::{EmulatorError, SensorError};
use crate::humidity::HumidityServer;
use crate::imu::ImuServer;
use crate::lock::EmulatorLock;
use crate::playback::{Playback, PlaybackStats};
use crate::pressure::PressureServer;
use crate::recording::{DataRecord, RecordingReader};

/// Which simulation loops are running
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulationModes {
    /// Noise on pressure, humidity and their temperatures
    pub env: bool,
    /// IMU readings derived from the orientation
    pub imu: bool,
}

impl SimulationModes {
    /// Everything written directly, nothing simulated
    pub const DIRECT: Self = Self {
        env: false,
        imu: false,
    };
}

pub struct Emulator {
    state_dir: PathBuf,
    lock: EmulatorLock,
    pressure: PressureServer,
    humidity: HumidityServer,
    imu: ImuServer,
    stick: StickServer,
}

impl Emulator {
    /// Take the lock and bring up every server
    ///
    /// Fails with [`LockError::AlreadyLocked`](crate::LockError::AlreadyLocked)
    /// if another live process is driving the sensors.
    pub fn start(config: &EmulatorConfig) -> Result<Self, EmulatorError> {
        let state_dir = config.state_dir();
        std::fs::create_dir_all(&state_dir).map_err(|source| EmulatorError::StateDir {
            path: state_dir.clone(),
            source,
        })?;

        let lock = EmulatorLock::at(SensorFile::Lock.path_in(&state_dir));
        lock.acquire()?;

        match Self::open_servers(config, &state_dir) {
            Ok((pressure, humidity, imu, stick)) => {
                info!("Emulator running in {}", state_dir.display());
                Ok(Self {
                    state_dir,
                    lock,
                    pressure,
                    humidity,
                    imu,
                    stick,
                })
            }
            Err(e) => {
                if let Err(release) = lock.release() {
                    warn!("Failed to release emulator lock: {}", release);
                }
                Err(e)
            }
        }
    }

    fn open_servers(
        config: &EmulatorConfig,
        state_dir: &Path,
    ) -> Result<(PressureServer, HumidityServer, ImuServer, StickServer), EmulatorError> {
        let sim = &config.simulation;
        let pressure = PressureServer::open_seeded(
            SensorFile::Pressure.path_in(state_dir),
            sim.simulate_env,
            sim.seed,
        )?;
        // Distinct seeds keep the sensors' noise uncorrelated
        let humidity = HumidityServer::open_seeded(
            SensorFile::Humidity.path_in(state_dir),
            sim.simulate_env,
            sim.seed.wrapping_mul(3),
        )?;
        let imu = ImuServer::open_seeded(
            SensorFile::Imu.path_in(state_dir),
            sim.simulate_imu,
            sim.seed.wrapping_mul(7),
        )?;
        let stick = StickServer::bind(config.stick_address())?;
        Ok((pressure, humidity, imu, stick))
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn lock(&self) -> &EmulatorLock {
        &self.lock
    }

    pub fn pressure(&self) -> &PressureServer {
        &self.pressure
    }

    pub fn humidity(&self) -> &HumidityServer {
        &self.humidity
    }

    pub fn imu(&self) -> &ImuServer {
        &self.imu
    }

    pub fn stick(&self) -> &StickServer {
        &self.stick
    }

    pub fn modes(&self) -> SimulationModes {
        SimulationModes {
            env: self.pressure.simulate_noise(),
            imu: self.imu.simulate_world(),
        }
    }

    /// Start or stop the simulation loops; stopping joins them
    pub fn set_modes(&mut self, modes: SimulationModes) -> Result<(), SensorError> {
        self.pressure.set_simulate_noise(modes.env)?;
        self.humidity.set_simulate_noise(modes.env)?;
        self.imu.set_simulate_world(modes.imu)?;
        debug!("Simulation modes now {:?}", modes);
        Ok(())
    }

    /// Broadcast a joystick event stamped with the current time
    pub fn send_stick(&self, direction: Direction, action: Action) -> Result<(), StickError> {
        self.stick.send_key(direction, action)
    }

    /// Write one recorded sample straight to the registers
    ///
    /// Needs the IMU in direct mode. Compass and pose are converted from
    /// the recording's microtesla and radians.
    pub fn apply_record(&self, record: &DataRecord) -> Result<(), SensorError> {
        self.pressure.set_values(record.pressure, record.ptemp)?;
        self.humidity.set_values(record.humidity, record.htemp)?;
        self.imu.set_imu_values(
            record.accel(),
            record.gyro(),
            0.01 * record.compass(),
            record.orientation().map(f64::to_degrees),
            None,
        )
    }

    /// Replay a recording in real time
    pub fn play(&mut self, path: impl AsRef<Path>) -> Result<PlaybackStats, EmulatorError> {
        self.play_with(path, &Playback::new(SystemClock))
    }

    /// Replay a recording paced by `playback`
    ///
    /// The simulation loops are stopped for the duration and restored
    /// afterwards, whether or not playback succeeds.
    pub fn play_with<C: Clock>(
        &mut self,
        path: impl AsRef<Path>,
        playback: &Playback<C>,
    ) -> Result<PlaybackStats, EmulatorError> {
        let path = path.as_ref();
        let previous = self.modes();
        self.set_modes(SimulationModes::DIRECT)?;
        info!("Replaying {}", path.display());

        let result = RecordingReader::open(path)
            .map_err(EmulatorError::from)
            .and_then(|reader| {
                playback.run(reader, |record| {
                    self.apply_record(record)?;
                    Ok::<_, EmulatorError>(())
                })
            });

        self.set_modes(previous)?;
        result
    }

    fn shutdown(&mut self) {
        if let Err(e) = self.set_modes(SimulationModes::DIRECT) {
            warn!("Failed to stop simulation: {}", e);
        }
        self.stick.close();
        if self.lock.is_mine() {
            if let Err(e) = self.lock.release() {
                warn!("Failed to release emulator lock: {}", e);
            }
        }
        info!("Emulator stopped");
    }
}

impl Drop for Emulator {
    fn drop(&mut self) {
        self.shutdown();
    }
}
