//! Emulator configuration
//!
//! Stored as TOML. Every field has a default, so a partial file (or no file
//! at all) is a valid configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use sense_emu_stick::StickAddress;

/// Environment variable naming an alternative config file
pub const CONFIG_ENV: &str = "SENSE_EMU_CONFIG";

/// Which simulation loops run when the emulator starts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Perturb pressure, humidity and temperature with sensor noise
    #[serde(default = "default_true")]
    pub simulate_env: bool,
    /// Derive IMU readings from the orientation
    #[serde(default = "default_true")]
    pub simulate_imu: bool,
    /// Noise seed; 0 seeds from system entropy
    #[serde(default)]
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            simulate_env: true,
            simulate_imu: true,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlaybackConfig {
    /// Recording to replay once the emulator is up
    #[serde(default)]
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StickConfig {
    /// Loopback UDP port of the event bus where UNIX sockets are unavailable
    #[serde(default = "default_stick_port")]
    pub port: u16,
}

impl Default for StickConfig {
    fn default() -> Self {
        Self {
            port: default_stick_port(),
        }
    }
}

/// Complete emulator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmulatorConfig {
    /// Default tracing filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Directory for register files, lock and sockets; platform default if unset
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
    #[serde(default)]
    pub simulation: SimulationConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub stick: StickConfig,
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_stick_port() -> u16 {
    StickAddress::DEFAULT_PORT
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            state_dir: None,
            simulation: SimulationConfig::default(),
            playback: PlaybackConfig::default(),
            stick: StickConfig::default(),
        }
    }
}

impl EmulatorConfig {
    /// Config file path: `$SENSE_EMU_CONFIG` or the user config directory
    pub fn default_path() -> PathBuf {
        if let Some(path) = std::env::var_os(CONFIG_ENV) {
            return PathBuf::from(path);
        }
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sense-emu")
            .join("config.toml")
    }

    /// Load config from a file, or return default if not found
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: EmulatorConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save config to a file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Directory holding the shared state
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(sense_emu_registers::state_dir)
    }

    /// Event bus address for this configuration
    pub fn stick_address(&self) -> StickAddress {
        StickAddress::in_dir(&self.state_dir(), self.stick.port)
    }
}
