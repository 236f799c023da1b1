//! Grid configuration and configuration file handling.
//!
//! [`GridParams`] fixes the size of every buffer owned by an
//! [`OccupancyGridMap`](crate::map::OccupancyGridMap) and the constants of the filter. It is
//! immutable once the map has been constructed.
//!
//! Parameters can be read from and written to TOML, JSON or YAML files through the
//! [`ConfigFile`] trait, which any serde-compatible configuration struct can implement with an
//! empty `impl` block.
//!
//! ## Example
//!
//! ```
//! use dogm::config::GridParams;
//!
//! let params = GridParams {
//!     width: 100,
//!     height: 100,
//!     resolution: 0.5,
//!     particle_count: 20_000,
//!     new_born_particle_count: 2_000,
//!     ..GridParams::default()
//! };
//! assert!(params.validate().is_ok());
//! ```
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{DogmError, Result};

fn default_seed() -> u64 {
    42
}

fn default_birth_velocity_std() -> f64 {
    4.0
}

/// Static parameters of the occupancy grid map.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GridParams {
    /// Grid width in cells.
    pub width: usize,
    /// Grid height in cells.
    pub height: usize,
    /// Edge length of one cell (m).
    pub resolution: f64,
    /// Size of the persistent particle population.
    pub particle_count: usize,
    /// Maximum number of particles spawned by birth per cycle.
    pub new_born_particle_count: usize,
    /// Survival probability applied to every particle weight in prediction.
    pub ps: f64,
    /// Process noise standard deviation on position (m).
    pub process_noise_position: f64,
    /// Process noise standard deviation on velocity (m/s).
    pub process_noise_velocity: f64,
    /// Birth probability used to separate new-born from persistent occupied mass.
    pub pb: f64,
    /// Standard deviation of the zero-mean velocity prior for new particles (m/s).
    #[serde(default = "default_birth_velocity_std")]
    pub birth_velocity_std: f64,
    /// Seed of the map's random number generator.
    #[serde(default = "default_seed")]
    pub seed: u64,
}

impl Default for GridParams {
    fn default() -> Self {
        GridParams {
            width: 250,
            height: 250,
            resolution: 0.2,
            particle_count: 200_000,
            new_born_particle_count: 20_000,
            ps: 0.99,
            process_noise_position: 0.02,
            process_noise_velocity: 0.8,
            pb: 0.02,
            birth_velocity_std: default_birth_velocity_std(),
            seed: default_seed(),
        }
    }
}

impl GridParams {
    /// Number of cells in the grid.
    pub fn grid_cell_count(&self) -> usize {
        self.width * self.height
    }

    /// Check every parameter, returning the first violation found.
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            return Err(DogmError::Configuration(format!(
                "grid dimensions must be positive, got {}x{}",
                self.width, self.height
            )));
        }
        if self.width.checked_mul(self.height).is_none() {
            return Err(DogmError::Configuration(format!(
                "grid dimensions {}x{} overflow the cell count",
                self.width, self.height
            )));
        }
        if !(self.resolution.is_finite() && self.resolution > 0.0) {
            return Err(DogmError::Configuration(format!(
                "resolution must be positive and finite, got {}",
                self.resolution
            )));
        }
        if self.particle_count == 0 {
            return Err(DogmError::Configuration(
                "particle_count must be positive".to_string(),
            ));
        }
        if self.new_born_particle_count == 0 {
            return Err(DogmError::Configuration(
                "new_born_particle_count must be positive".to_string(),
            ));
        }
        for (name, value) in [("ps", self.ps), ("pb", self.pb)] {
            if !(0.0..=1.0).contains(&value) {
                return Err(DogmError::Configuration(format!(
                    "{name} must lie in [0, 1], got {value}"
                )));
            }
        }
        for (name, value) in [
            ("process_noise_position", self.process_noise_position),
            ("process_noise_velocity", self.process_noise_velocity),
            ("birth_velocity_std", self.birth_velocity_std),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(DogmError::Configuration(format!(
                    "{name} must be finite and non-negative, got {value}"
                )));
            }
        }
        Ok(())
    }
}

/// File round-tripping for serde configuration types.
///
/// The format is chosen from the file extension (`.json`, `.yaml`/`.yml`, `.toml`).
pub trait ConfigFile: Serialize + DeserializeOwned {
    /// Write the configuration to a JSON file (pretty-printed).
    fn to_json<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self).map_err(io::Error::other)
    }
    /// Read the configuration from a JSON file.
    fn from_json<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_json::from_reader(file).map_err(io::Error::other)
    }
    /// Write the configuration as YAML.
    fn to_yaml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = serde_yaml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }
    /// Read the configuration from YAML.
    fn from_yaml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        serde_yaml::from_reader(file).map_err(io::Error::other)
    }
    /// Write the configuration as TOML.
    fn to_toml<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        let s = toml::to_string(self).map_err(io::Error::other)?;
        file.write_all(s.as_bytes())
    }
    /// Read the configuration from TOML.
    fn from_toml<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let mut s = String::new();
        let mut file = File::open(path)?;
        file.read_to_string(&mut s)?;
        toml::from_str(&s).map_err(io::Error::other)
    }
    /// Generic write: choose format by file extension (.json/.yaml/.yml/.toml)
    fn to_file<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let p = path.as_ref();
        match extension_of(p).as_deref() {
            Some("json") => self.to_json(p),
            Some("yaml") | Some("yml") => self.to_yaml(p),
            Some("toml") => self.to_toml(p),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unsupported file extension",
            )),
        }
    }
    /// Generic read: choose format by file extension (.json/.yaml/.yml/.toml)
    fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let p = path.as_ref();
        match extension_of(p).as_deref() {
            Some("json") => Self::from_json(p),
            Some("yaml") | Some("yml") => Self::from_yaml(p),
            Some("toml") => Self::from_toml(p),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "unsupported file extension",
            )),
        }
    }
}

fn extension_of(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|s| s.to_str())
        .map(|s| s.to_lowercase())
}

impl ConfigFile for GridParams {}
