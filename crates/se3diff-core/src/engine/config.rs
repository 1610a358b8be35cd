use crate::core::diffusion::ScheduleError;
use crate::core::diffusion::r3::R3Config;
use crate::core::diffusion::so3::So3Config;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("File I/O error for '{path}': {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("TOML parsing error for '{path}': {source}")]
    Toml {
        path: String,
        source: toml::de::Error,
    },
    #[error("Invalid diffusion schedule: {source}")]
    Schedule {
        #[from]
        source: ScheduleError,
    },
    #[error("Invalid value for '{name}': {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.to_string_lossy().to_string(),
        source: e,
    })?;
    toml::from_str(&content).map_err(|e| ConfigError::Toml {
        path: path.to_string_lossy().to_string(),
        source: e,
    })
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct Se3DiffuserConfig {
    pub diffuse_rot: bool,
    pub diffuse_trans: bool,
    pub so3: So3Config,
    pub r3: R3Config,
}

impl Default for Se3DiffuserConfig {
    fn default() -> Self {
        Self {
            diffuse_rot: true,
            diffuse_trans: true,
            so3: So3Config::default(),
            r3: R3Config::default(),
        }
    }
}

impl Se3DiffuserConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config: Self = load_toml(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.so3.validate()?;
        self.r3.validate()?;
        Ok(())
    }
}

#[derive(Default)]
pub struct Se3DiffuserConfigBuilder {
    diffuse_rot: Option<bool>,
    diffuse_trans: Option<bool>,
    so3: Option<So3Config>,
    r3: Option<R3Config>,
}

impl Se3DiffuserConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn diffuse_rot(mut self, enabled: bool) -> Self {
        self.diffuse_rot = Some(enabled);
        self
    }
    pub fn diffuse_trans(mut self, enabled: bool) -> Self {
        self.diffuse_trans = Some(enabled);
        self
    }
    pub fn so3(mut self, config: So3Config) -> Self {
        self.so3 = Some(config);
        self
    }
    pub fn r3(mut self, config: R3Config) -> Self {
        self.r3 = Some(config);
        self
    }

    pub fn build(self) -> Result<Se3DiffuserConfig, ConfigError> {
        let defaults = Se3DiffuserConfig::default();
        let config = Se3DiffuserConfig {
            diffuse_rot: self.diffuse_rot.unwrap_or(defaults.diffuse_rot),
            diffuse_trans: self.diffuse_trans.unwrap_or(defaults.diffuse_trans),
            so3: self.so3.unwrap_or(defaults.so3),
            r3: self.r3.unwrap_or(defaults.r3),
        };
        config.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct SamplingConfig {
    pub num_steps: usize,
    pub min_t: f64,
    pub noise_scale: f64,
    pub center: bool,
    pub keep_trajectory: bool,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            num_steps: 500,
            min_t: 0.01,
            noise_scale: 1.0,
            center: true,
            keep_trajectory: false,
        }
    }
}

impl SamplingConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config: Self = load_toml(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_steps == 0 {
            return Err(ConfigError::InvalidParameter {
                name: "sampling.num-steps",
                reason: "must be at least 1".to_string(),
            });
        }
        if !(0.0..1.0).contains(&self.min_t) {
            return Err(ConfigError::InvalidParameter {
                name: "sampling.min-t",
                reason: format!("must lie in [0, 1), got {}", self.min_t),
            });
        }
        if !self.noise_scale.is_finite() || self.noise_scale < 0.0 {
            return Err(ConfigError::InvalidParameter {
                name: "sampling.noise-scale",
                reason: format!("must be a non-negative finite number, got {}", self.noise_scale),
            });
        }
        Ok(())
    }

    /// Step size shared by every reverse step.
    pub fn dt(&self) -> f64 {
        1.0 / self.num_steps as f64
    }

    /// Diffusion times visited by the reverse loop, from `1` down to `min_t`.
    pub fn time_grid(&self) -> Vec<f64> {
        if self.num_steps == 1 {
            return vec![1.0];
        }
        let span = 1.0 - self.min_t;
        let last = (self.num_steps - 1) as f64;
        (0..self.num_steps)
            .map(|i| 1.0 - span * i as f64 / last)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::diffusion::so3::Schedule;
    use std::fs;
    use std::io::Write;
    use tempfile::{NamedTempFile, tempdir};

    #[test]
    fn load_reads_kebab_case_toml_with_defaults() {
        let content = r#"
diffuse-rot = true
diffuse-trans = false

[so3]
schedule = "linear"
num-sigma = 200
use-cached-score = true

[r3]
max-b = 15.0
"#;
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", content).unwrap();

        let config = Se3DiffuserConfig::load(file.path()).unwrap();
        assert!(config.diffuse_rot);
        assert!(!config.diffuse_trans);
        assert_eq!(config.so3.schedule, Schedule::Linear);
        assert_eq!(config.so3.num_sigma, 200);
        assert!(config.so3.use_cached_score);
        assert_eq!(config.so3.num_omega, 1000);
        assert_eq!(config.r3.max_b, 15.0);
        assert_eq!(config.r3.coordinate_scaling, 0.1);
    }

    #[test]
    fn load_fails_for_missing_file() {
        let dir = tempdir().unwrap();
        let result = Se3DiffuserConfig::load(&dir.path().join("missing.toml"));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn load_fails_for_unknown_keys() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("typo.toml");
        fs::write(&path, "[so3]\nmax-sigmaa = 2.0\n").unwrap();
        assert!(matches!(
            Se3DiffuserConfig::load(&path),
            Err(ConfigError::Toml { .. })
        ));
    }

    #[test]
    fn load_rejects_invalid_schedule() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[r3]\nmin-b = -1.0\n").unwrap();
        assert!(matches!(
            Se3DiffuserConfig::load(&path),
            Err(ConfigError::Schedule { .. })
        ));
    }

    #[test]
    fn builder_fills_unset_fields_with_defaults() {
        let config = Se3DiffuserConfigBuilder::new()
            .diffuse_trans(false)
            .build()
            .unwrap();
        assert!(config.diffuse_rot);
        assert!(!config.diffuse_trans);
        assert_eq!(config.so3, So3Config::default());
    }

    #[test]
    fn builder_validates_collaborator_configs() {
        let result = Se3DiffuserConfigBuilder::new()
            .so3(So3Config {
                min_sigma: 2.0,
                ..So3Config::default()
            })
            .build();
        assert!(result.is_err());
    }

    #[test]
    fn sampling_config_validation_rejects_zero_steps_and_bad_min_t() {
        let zero_steps = SamplingConfig {
            num_steps: 0,
            ..SamplingConfig::default()
        };
        assert!(zero_steps.validate().is_err());
        let bad_min_t = SamplingConfig {
            min_t: 1.0,
            ..SamplingConfig::default()
        };
        assert!(matches!(
            bad_min_t.validate(),
            Err(ConfigError::InvalidParameter {
                name: "sampling.min-t",
                ..
            })
        ));
    }

    #[test]
    fn sampling_config_loads_from_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("sampling.toml");
        fs::write(&path, "num-steps = 10\nnoise-scale = 0.5\nkeep-trajectory = true\n").unwrap();
        let config = SamplingConfig::load(&path).unwrap();
        assert_eq!(config.num_steps, 10);
        assert_eq!(config.noise_scale, 0.5);
        assert!(config.keep_trajectory);
        assert!(config.center);
    }

    #[test]
    fn time_grid_descends_from_one_to_min_t() {
        let config = SamplingConfig {
            num_steps: 5,
            min_t: 0.2,
            ..SamplingConfig::default()
        };
        let grid = config.time_grid();
        assert_eq!(grid.len(), 5);
        assert!((grid[0] - 1.0).abs() < 1e-12);
        assert!((grid[4] - 0.2).abs() < 1e-12);
        assert!(grid.windows(2).all(|w| w[0] > w[1]));
        assert!((config.dt() - 0.2).abs() < 1e-12);
    }
}
