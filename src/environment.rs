//! Shared machinery of the pressure and humidity servers
//!
//! Both sensors hold a primary reading plus a temperature. In direct mode
//! the exact values are committed whenever they change. With noise
//! simulation on, a [`Ticker`] perturbs both values every tick and commits
//! the mean of a rolling window, modelling the sensor's response time.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use sense_emu_registers::{RegisterBlock, RegisterError, RegisterStore, SensorFile};

use crate::error::SensorError;
use crate::noise::{NoiseGenerator, RollingWindow};
use crate::ticker::Ticker;

/// Per-device parameters of an environmental sensor
pub trait EnvironmentSensor: Send + 'static {
    type Block: RegisterBlock;

    /// Short name used for logging and thread names
    const LABEL: &'static str;
    const FILE: SensorFile;
    /// Noise simulation period
    const TICK: Duration;
    /// Rolling window lengths for the primary reading and the temperature
    const WINDOWS: (usize, usize);
    /// Readings seeded into a freshly initialized block
    const DEFAULTS: (f64, f64);

    /// Block contents written when the block is not yet initialized
    fn device() -> Self::Block;

    fn is_device(block: &Self::Block) -> bool;

    /// Readings held by an initialized block; NaN where invalid
    fn decode(block: &Self::Block) -> (f64, f64);

    /// Store readings into the block
    fn encode(block: &mut Self::Block, value: f64, temperature: f64);

    /// Noise amplitude for each reading given the current true values
    fn error_bands(value: f64, temperature: f64) -> (f64, f64);
}

struct State<S: EnvironmentSensor> {
    store: RegisterStore<S::Block>,
    value: f64,
    temperature: f64,
    noise: NoiseGenerator,
    values: RollingWindow<f64>,
    temperatures: RollingWindow<f64>,
}

impl<S: EnvironmentSensor> State<S> {
    fn commit(&mut self, value: f64, temperature: f64) -> Result<(), RegisterError> {
        self.store
            .update(|block| S::encode(block, value, temperature))
            .map(|_| ())
    }

    fn commit_exact(&mut self) -> Result<(), RegisterError> {
        self.commit(self.value, self.temperature)
    }

    fn tick(&mut self) {
        let (value_error, temperature_error) = S::error_bands(self.value, self.temperature);
        let value = self.noise.perturb(self.value, value_error);
        let temperature = self.noise.perturb(self.temperature, temperature_error);
        self.values.push(value);
        self.temperatures.push(temperature);

        let (value, temperature) = (self.values.mean(), self.temperatures.mean());
        if let Err(e) = self.commit(value, temperature) {
            warn!("{} noise write failed: {}", S::LABEL, e);
        }
    }
}

/// Server owning one environmental sensor's register block
pub struct EnvironmentServer<S: EnvironmentSensor> {
    state: Arc<Mutex<State<S>>>,
    path: PathBuf,
    ticker: Option<Ticker>,
}

impl<S: EnvironmentSensor> EnvironmentServer<S> {
    /// Open the block in the default state directory
    pub fn new(simulate_noise: bool) -> Result<Self, SensorError> {
        Self::open(S::FILE.path(), simulate_noise)
    }

    /// Open the block at `path` with an entropy-seeded noise source
    pub fn open(path: impl AsRef<Path>, simulate_noise: bool) -> Result<Self, SensorError> {
        Self::open_seeded(path, simulate_noise, 0)
    }

    /// Open the block at `path`; a non-zero `seed` makes the noise repeatable
    ///
    /// An uninitialized block is stamped with the device tag and the default
    /// readings. An initialized one keeps the readings it already holds.
    pub fn open_seeded(
        path: impl AsRef<Path>,
        simulate_noise: bool,
        seed: u64,
    ) -> Result<Self, SensorError> {
        let path = path.as_ref().to_path_buf();
        let mut store = RegisterStore::<S::Block>::open(&path)?;
        let block = store.read();
        let (value, temperature) = if S::is_device(&block) {
            let values = S::decode(&block);
            debug!("{} resuming at {:?}", S::LABEL, values);
            values
        } else {
            store.write(&S::device())?;
            info!("Initialized {} block at {}", S::LABEL, path.display());
            S::DEFAULTS
        };

        let (value_len, temperature_len) = S::WINDOWS;
        let mut state = State::<S> {
            store,
            value,
            temperature,
            noise: NoiseGenerator::new(seed),
            values: RollingWindow::filled(value_len, value),
            temperatures: RollingWindow::filled(temperature_len, temperature),
        };
        state.commit_exact()?;

        let mut server = Self {
            state: Arc::new(Mutex::new(state)),
            path,
            ticker: None,
        };
        server.set_simulate_noise(simulate_noise)?;
        Ok(server)
    }

    /// Path of the register file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The true (unperturbed) readings
    pub fn values(&self) -> (f64, f64) {
        let state = self.state.lock();
        (state.value, state.temperature)
    }

    /// Set the true readings
    ///
    /// Without noise simulation they are committed at once; otherwise the
    /// smoothed register values drift toward them over the window length.
    pub fn set_values(&self, value: f64, temperature: f64) -> Result<(), SensorError> {
        let mut state = self.state.lock();
        state.value = value;
        state.temperature = temperature;
        if self.ticker.is_none() {
            state.commit_exact()?;
        }
        Ok(())
    }

    pub fn simulate_noise(&self) -> bool {
        self.ticker.is_some()
    }

    /// Start or stop noise simulation
    ///
    /// Stopping waits for the simulation thread to exit, then commits the
    /// exact readings, so the block holds them when this returns.
    pub fn set_simulate_noise(&mut self, enabled: bool) -> Result<(), SensorError> {
        match (enabled, self.ticker.is_some()) {
            (true, false) => {
                let state = Arc::clone(&self.state);
                let ticker = Ticker::spawn(format!("{}-noise", S::LABEL), S::TICK, move || {
                    state.lock().tick()
                })?;
                self.ticker = Some(ticker);
                info!("{} noise simulation on", S::LABEL);
            }
            (false, true) => {
                if let Some(mut ticker) = self.ticker.take() {
                    ticker.stop();
                }
                self.state.lock().commit_exact()?;
                info!("{} noise simulation off", S::LABEL);
            }
            _ => {}
        }
        Ok(())
    }

    /// Snapshot of the register block
    pub fn block(&self) -> S::Block {
        self.state.lock().store.read()
    }

    /// Stop simulation; the block keeps its last contents
    pub fn close(&mut self) -> Result<(), SensorError> {
        self.set_simulate_noise(false)
    }
}

impl<S: EnvironmentSensor> Drop for EnvironmentServer<S> {
    fn drop(&mut self) {
        if let Some(mut ticker) = self.ticker.take() {
            ticker.stop();
        }
    }
}
