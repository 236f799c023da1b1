//! Synthetic scenarios: moving rectangular objects seen by an idealised range sensor.
//!
//! The sensor sits at a fixed position in the grid frame and reports, for every cell centre within
//! its range, occupied evidence when the centre lies inside an object (subject to the detection
//! probability) and free evidence otherwise. Cells beyond the range get no evidence at all.

use nalgebra::Vector2;
use rand::Rng;
use serde::{Deserialize, Serialize};

use dogm::{ConfigFile, GridParams};

/// A rectangle moving at constant velocity. Positions are the lower-left corner in metres.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObjectConfig {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    pub vx: f64,
    pub vy: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Sensor position in the grid frame (m).
    pub x: f64,
    pub y: f64,
    /// Maximum range (m); cells further away carry no evidence.
    pub range: f64,
    /// Occupied mass reported for a detected object cell.
    pub occupied_mass: f64,
    /// Free mass reported for an empty cell in range.
    pub free_mass: f64,
    /// Probability that an object cell is reported as occupied.
    pub detection_probability: f64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        SensorConfig {
            x: 25.0,
            y: 0.0,
            range: 60.0,
            occupied_mass: 0.9,
            free_mass: 0.8,
            detection_probability: 0.95,
        }
    }
}

/// Thresholds used to pick out dynamic cells in the reports.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Minimum pignistic occupancy.
    pub min_occupancy: f64,
    /// Minimum `vᵀΣ⁻¹v` of the cell's velocity estimate.
    pub min_normalized_velocity: f64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        ReportConfig {
            min_occupancy: 0.7,
            min_normalized_velocity: 4.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// Complete description of a simulation run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Number of update cycles.
    pub steps: usize,
    /// Time between cycles (s).
    pub dt: f64,
    pub grid: GridParams,
    #[serde(default)]
    pub objects: Vec<ObjectConfig>,
    #[serde(default)]
    pub sensor: SensorConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        SimulationConfig {
            steps: 50,
            dt: 0.1,
            grid: GridParams {
                width: 250,
                height: 250,
                resolution: 0.2,
                particle_count: 100_000,
                new_born_particle_count: 10_000,
                ..GridParams::default()
            },
            objects: vec![
                ObjectConfig {
                    x: 5.0,
                    y: 20.0,
                    width: 4.0,
                    height: 1.8,
                    vx: 6.0,
                    vy: 0.0,
                },
                ObjectConfig {
                    x: 40.0,
                    y: 30.0,
                    width: 0.6,
                    height: 0.6,
                    vx: -1.0,
                    vy: -1.5,
                },
                ObjectConfig {
                    x: 20.0,
                    y: 8.0,
                    width: 2.0,
                    height: 2.0,
                    vx: 0.0,
                    vy: 0.0,
                },
            ],
            sensor: SensorConfig::default(),
            report: ReportConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ConfigFile for SimulationConfig {}

impl SimulationConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.grid.validate().map_err(|e| e.to_string())?;
        if !(self.dt.is_finite() && self.dt >= 0.0) {
            return Err(format!("dt must be finite and non-negative, got {}", self.dt));
        }
        if !(0.0..=1.0).contains(&self.sensor.detection_probability) {
            return Err(format!(
                "detection_probability must lie in [0, 1], got {}",
                self.sensor.detection_probability
            ));
        }
        for (name, value) in [
            ("occupied_mass", self.sensor.occupied_mass),
            ("free_mass", self.sensor.free_mass),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(format!("{name} must lie in [0, 1], got {value}"));
            }
        }
        Ok(())
    }
}

/// Live state of one object.
#[derive(Clone, Debug)]
struct MovingObject {
    corner: Vector2<f64>,
    size: Vector2<f64>,
    velocity: Vector2<f64>,
}

impl MovingObject {
    fn contains(&self, point: &Vector2<f64>) -> bool {
        let rel = point - self.corner;
        rel.x >= 0.0 && rel.y >= 0.0 && rel.x < self.size.x && rel.y < self.size.y
    }
}

/// Ground truth and sensor model of a running scenario.
pub struct Scenario {
    objects: Vec<MovingObject>,
    sensor: SensorConfig,
    time: f64,
}

impl Scenario {
    pub fn new(objects: &[ObjectConfig], sensor: &SensorConfig) -> Self {
        Scenario {
            objects: objects
                .iter()
                .map(|o| MovingObject {
                    corner: Vector2::new(o.x, o.y),
                    size: Vector2::new(o.width, o.height),
                    velocity: Vector2::new(o.vx, o.vy),
                })
                .collect(),
            sensor: sensor.clone(),
            time: 0.0,
        }
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    /// Move every object forward by `dt`.
    pub fn advance(&mut self, dt: f64) {
        for object in &mut self.objects {
            object.corner += object.velocity * dt;
        }
        self.time += dt;
    }

    /// Whether the point lies inside any object.
    pub fn is_occupied(&self, point: &Vector2<f64>) -> bool {
        self.objects.iter().any(|o| o.contains(point))
    }

    /// True velocity of the object covering `point`, if any.
    pub fn velocity_at(&self, point: &Vector2<f64>) -> Option<Vector2<f64>> {
        self.objects
            .iter()
            .find(|o| o.contains(point))
            .map(|o| o.velocity)
    }

    /// Raw `[free, occ]` measurement grid for the current object positions.
    pub fn measurement_grid<R: Rng + ?Sized>(&self, params: &GridParams, rng: &mut R) -> Vec<f64> {
        let origin = Vector2::new(self.sensor.x, self.sensor.y);
        let mut measurements = Vec::with_capacity(2 * params.grid_cell_count());
        for iy in 0..params.height {
            for ix in 0..params.width {
                let center = Vector2::new(
                    (ix as f64 + 0.5) * params.resolution,
                    (iy as f64 + 0.5) * params.resolution,
                );
                let (free, occ) = if (center - origin).norm() > self.sensor.range {
                    (0.0, 0.0)
                } else if self.is_occupied(&center) {
                    if rng.random::<f64>() < self.sensor.detection_probability {
                        (0.0, self.sensor.occupied_mass)
                    } else {
                        (0.0, 0.0)
                    }
                } else {
                    (self.sensor.free_mass, 0.0)
                };
                measurements.push(free);
                measurements.push(occ);
            }
        }
        measurements
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn small_grid() -> GridParams {
        GridParams {
            width: 4,
            height: 4,
            resolution: 1.0,
            particle_count: 100,
            new_born_particle_count: 10,
            ..GridParams::default()
        }
    }

    fn block() -> ObjectConfig {
        ObjectConfig {
            x: 1.0,
            y: 1.0,
            width: 1.0,
            height: 1.0,
            vx: 1.0,
            vy: 0.0,
        }
    }

    #[test]
    fn test_measurement_grid_marks_object_cells() {
        let sensor = SensorConfig {
            x: 0.0,
            y: 0.0,
            range: 100.0,
            occupied_mass: 0.9,
            free_mass: 0.7,
            detection_probability: 1.0,
        };
        let scenario = Scenario::new(&[block()], &sensor);
        let grid = scenario.measurement_grid(&small_grid(), &mut StdRng::seed_from_u64(1));
        assert_eq!(grid.len(), 32);
        // cell (1, 1)
        assert_eq!(&grid[10..12], &[0.0, 0.9]);
        assert_eq!(&grid[0..2], &[0.7, 0.0]);
    }

    #[test]
    fn test_out_of_range_cells_have_no_evidence() {
        let sensor = SensorConfig {
            x: 0.0,
            y: 0.0,
            range: 1.0,
            ..SensorConfig::default()
        };
        let scenario = Scenario::new(&[], &sensor);
        let grid = scenario.measurement_grid(&small_grid(), &mut StdRng::seed_from_u64(1));
        // cell (0, 0) centre is 0.71 m away, cell (3, 3) is far outside
        assert_eq!(grid[0], sensor.free_mass);
        assert_eq!(&grid[30..32], &[0.0, 0.0]);
    }

    #[test]
    fn test_advance_moves_objects() {
        let mut scenario = Scenario::new(&[block()], &SensorConfig::default());
        assert!(scenario.is_occupied(&Vector2::new(1.5, 1.5)));
        scenario.advance(1.0);
        assert_approx_eq!(scenario.time(), 1.0, 1e-12);
        assert!(!scenario.is_occupied(&Vector2::new(1.5, 1.5)));
        assert_eq!(
            scenario.velocity_at(&Vector2::new(2.5, 1.5)),
            Some(Vector2::new(1.0, 0.0))
        );
    }

    #[test]
    fn test_config_round_trip() {
        let config = SimulationConfig::default();
        let path = std::env::temp_dir().join("dogm_sim_scenario_config.yaml");
        config.to_file(&path).unwrap();
        let loaded = SimulationConfig::from_file(&path).unwrap();
        assert_eq!(config, loaded);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_validate() {
        assert!(SimulationConfig::default().validate().is_ok());
        let config = SimulationConfig {
            dt: -1.0,
            ..SimulationConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
