//! LSM9DS1 inertial measurement unit and its world model
//!
//! The IMU runs in one of two modes:
//!
//! - **World simulation**: the caller sets the board's orientation and a
//!   ticker derives accelerometer, gyroscope and magnetometer readings from
//!   it about 60 times a second, with sensor noise and smoothing.
//! - **Direct**: the caller writes raw readings (e.g. from a recording) and
//!   they are committed unchanged. Orientation is informational only.
//!
//! Position is tracked but never integrated from acceleration.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use sense_emu_registers::{ImuBlock, RegisterError, RegisterStore, SensorFile, Vector3};

use crate::clock::monotonic_micros;
use crate::error::SensorError;
use crate::noise::{NoiseGenerator, RollingWindow};
use crate::ticker::Ticker;

/// World simulation period
const TICK: Duration = Duration::from_millis(16);

/// Shortest interval over which the gyro rate is recomputed, in seconds
const MIN_WORLD_DT: f64 = 0.016;

/// Smoothing window of every derived channel
const WINDOW: usize = 10;

/// Noise amplitude per channel
const GYRO_ERROR: f64 = 1.0;
const ACCEL_ERROR: f64 = 0.1;
const COMPASS_ERROR: f64 = 2.0;

/// Gravity in the world frame, in g
const GRAVITY: Vector3 = Vector3::Z;

/// Magnetic north in the world frame, in gauss
const NORTH: Vector3 = Vector3::new(0.33, 0.0, 0.0);

/// Rotation matrix for roll (x), pitch (y) and yaw (z) in degrees
///
/// Angles compose as yaw, then pitch, then roll (Z-Y-X Tait-Bryan).
pub fn rotation_matrix(orientation: Vector3) -> [[f64; 3]; 3] {
    let Vector3 { x, y, z } = orientation.map(f64::to_radians);
    let (s1, c1) = z.sin_cos();
    let (s2, c2) = y.sin_cos();
    let (s3, c3) = x.sin_cos();
    [
        [c1 * c2, c1 * s2 * s3 - c3 * s1, s1 * s3 + c1 * c3 * s2],
        [c2 * s1, c1 * c3 + s1 * s2 * s3, c3 * s1 * s2 - c1 * s3],
        [-s2, c2 * s3, c2 * c3],
    ]
}

/// `Rᵀ · v`: a world-frame vector as seen from the body frame
pub fn to_body_frame(r: &[[f64; 3]; 3], v: Vector3) -> Vector3 {
    Vector3::new(
        r[0][0] * v.x + r[1][0] * v.y + r[2][0] * v.z,
        r[0][1] * v.x + r[1][1] * v.y + r[2][1] * v.z,
        r[0][2] * v.x + r[1][2] * v.y + r[2][2] * v.z,
    )
}

/// Raw readings derived from the world state
#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct Readings {
    accel: Vector3,
    gyro: Vector3,
    compass: Vector3,
}

struct World {
    store: RegisterStore<ImuBlock>,
    noise: NoiseGenerator,

    orientation: Vector3,
    position: Vector3,
    /// Last committed readings
    current: Readings,

    /// Orientation and time of the last world update
    then: u64,
    last_orientation: Vector3,
    derived: Readings,

    gyros: RollingWindow<Vector3>,
    accels: RollingWindow<Vector3>,
    compasses: RollingWindow<Vector3>,
}

impl World {
    /// Bring the derived readings up to date with the orientation
    ///
    /// The gyro rate needs a minimum interval to be meaningful; with
    /// `force`, accel and compass follow the orientation even when that
    /// interval has not yet passed.
    fn advance(&mut self, now: u64, force: bool) {
        let dt = now.saturating_sub(self.then) as f64 / 1_000_000.0;
        let refresh = dt >= MIN_WORLD_DT;
        if refresh {
            self.derived.gyro = (self.orientation - self.last_orientation) / dt;
            self.last_orientation = self.orientation;
            self.then = now;
        }
        if refresh || force {
            let r = rotation_matrix(self.orientation);
            self.derived.accel = to_body_frame(&r, GRAVITY);
            self.derived.compass = to_body_frame(&r, NORTH);
        }
    }

    /// Derive readings from the orientation and commit them
    fn write_world(&mut self, simulating: bool) -> Result<(), RegisterError> {
        let now = monotonic_micros();
        self.advance(now, !simulating);
        self.current = if simulating {
            let derived = self.derived;
            let gyro = self.noise.perturb_vector(derived.gyro, GYRO_ERROR);
            let accel = self.noise.perturb_vector(derived.accel, ACCEL_ERROR);
            let compass = self.noise.perturb_vector(derived.compass, COMPASS_ERROR);
            self.gyros.push(gyro);
            self.accels.push(accel);
            self.compasses.push(compass);
            Readings {
                accel: self.accels.mean(),
                gyro: self.gyros.mean(),
                compass: self.compasses.mean(),
            }
        } else {
            self.derived
        };
        self.commit(now)
    }

    fn commit(&mut self, now: u64) -> Result<(), RegisterError> {
        let Readings {
            accel,
            gyro,
            compass,
        } = self.current;
        let orientation = self.orientation;
        self.store
            .update(|block| {
                block.timestamp = now;
                block.set_accel(accel);
                block.set_gyro(gyro);
                block.set_compass(compass);
                block.set_orientation(orientation);
            })
            .map(|_| ())
    }

    fn reset_windows(&mut self) {
        self.gyros.fill(self.current.gyro);
        self.accels.fill(self.current.accel);
        self.compasses.fill(self.current.compass);
    }

    fn tick(&mut self) {
        if let Err(e) = self.write_world(true) {
            warn!("IMU world write failed: {}", e);
        }
    }
}

/// Server owning the IMU register block
pub struct ImuServer {
    world: Arc<Mutex<World>>,
    path: PathBuf,
    ticker: Option<Ticker>,
}

impl ImuServer {
    /// Open the block in the default state directory
    pub fn new(simulate_world: bool) -> Result<Self, SensorError> {
        Self::open(SensorFile::Imu.path(), simulate_world)
    }

    pub fn open(path: impl AsRef<Path>, simulate_world: bool) -> Result<Self, SensorError> {
        Self::open_seeded(path, simulate_world, 0)
    }

    /// Open the block at `path`; a non-zero `seed` makes the noise repeatable
    pub fn open_seeded(
        path: impl AsRef<Path>,
        simulate_world: bool,
        seed: u64,
    ) -> Result<Self, SensorError> {
        let path = path.as_ref().to_path_buf();
        let mut store = RegisterStore::<ImuBlock>::open(&path)?;
        let now = monotonic_micros();
        let block = store.read();
        let (current, orientation) = if block.is_device() {
            debug!("IMU resuming from existing block");
            let current = Readings {
                accel: block.accel(),
                gyro: block.gyro(),
                compass: block.compass(),
            };
            (current, block.orientation())
        } else {
            store.write(&ImuBlock::device(now))?;
            info!("Initialized IMU block at {}", path.display());
            (Readings::default(), Vector3::ZERO)
        };

        let mut world = World {
            store,
            noise: NoiseGenerator::new(seed),
            orientation,
            position: Vector3::ZERO,
            current,
            then: now,
            last_orientation: orientation,
            derived: Readings {
                gyro: Vector3::ZERO,
                ..current
            },
            gyros: RollingWindow::filled(WINDOW, current.gyro),
            accels: RollingWindow::filled(WINDOW, current.accel),
            compasses: RollingWindow::filled(WINDOW, current.compass),
        };
        world.write_world(false)?;

        let mut server = Self {
            world: Arc::new(Mutex::new(world)),
            path,
            ticker: None,
        };
        server.set_simulate_world(simulate_world)?;
        Ok(server)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn simulate_world(&self) -> bool {
        self.ticker.is_some()
    }

    /// Start or stop the world simulation
    ///
    /// Stopping waits for the simulation thread to exit, then commits
    /// readings derived exactly (without noise) from the orientation.
    pub fn set_simulate_world(&mut self, enabled: bool) -> Result<(), SensorError> {
        match (enabled, self.ticker.is_some()) {
            (true, false) => {
                self.world.lock().reset_windows();
                let world = Arc::clone(&self.world);
                let ticker = Ticker::spawn("imu-world", TICK, move || world.lock().tick())?;
                self.ticker = Some(ticker);
                info!("IMU world simulation on");
            }
            (false, true) => {
                if let Some(mut ticker) = self.ticker.take() {
                    ticker.stop();
                }
                self.world.lock().write_world(false)?;
                info!("IMU world simulation off");
            }
            _ => {}
        }
        Ok(())
    }

    /// Set the board's orientation in degrees (roll, pitch, yaw)
    ///
    /// Legal in both modes. Without world simulation the derived readings
    /// are committed at once.
    pub fn set_orientation(
        &self,
        orientation: Vector3,
        position: Option<Vector3>,
    ) -> Result<(), SensorError> {
        let mut world = self.world.lock();
        world.orientation = orientation;
        world.position = position.unwrap_or(Vector3::ZERO);
        if self.ticker.is_none() {
            world.write_world(false)?;
        }
        Ok(())
    }

    /// Write raw readings straight to the registers
    ///
    /// Refused with [`SensorError::SimulationActive`] while the world
    /// simulation is running, since it would overwrite them on its next
    /// tick.
    pub fn set_imu_values(
        &self,
        accel: Vector3,
        gyro: Vector3,
        compass: Vector3,
        orientation: Vector3,
        position: Option<Vector3>,
    ) -> Result<(), SensorError> {
        if self.ticker.is_some() {
            return Err(SensorError::SimulationActive);
        }
        let mut world = self.world.lock();
        world.current = Readings {
            accel,
            gyro,
            compass,
        };
        world.orientation = orientation;
        world.position = position.unwrap_or(Vector3::ZERO);
        world.commit(monotonic_micros())?;
        Ok(())
    }

    /// Acceleration in g last committed
    pub fn accel(&self) -> Vector3 {
        self.world.lock().current.accel
    }

    /// Angular rate in degrees/second last committed
    pub fn gyro(&self) -> Vector3 {
        self.world.lock().current.gyro
    }

    /// Magnetic field in gauss last committed
    pub fn compass(&self) -> Vector3 {
        self.world.lock().current.compass
    }

    /// Orientation in degrees
    pub fn orientation(&self) -> Vector3 {
        self.world.lock().orientation
    }

    pub fn position(&self) -> Vector3 {
        self.world.lock().position
    }

    /// Snapshot of the register block
    pub fn block(&self) -> ImuBlock {
        self.world.lock().store.read()
    }

    /// Stop simulation; the block keeps its last contents
    pub fn close(&mut self) -> Result<(), SensorError> {
        self.set_simulate_world(false)
    }
}

impl Drop for ImuServer {
    fn drop(&mut self) {
        if let Some(mut ticker) = self.ticker.take() {
            ticker.stop();
        }
    }
}
