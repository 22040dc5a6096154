use crate::catalog::USGS_LIDAR_BOUNDARIES_URL;
use crate::pipeline::{OutlierOptions, PipelineOptions, Resolution};
use crate::selection::SelectionMode;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

const DEFAULT_WORKERS: usize = 8;
const DEFAULT_MIN_POINTS: u64 = 100;
const DEFAULT_MEAN_K: u32 = 8;
const DEFAULT_MULTIPLIER: f64 = 2.0;

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct OutlierConfig {
    pub enabled: bool,
    pub mean_k: u32,
    pub multiplier: f64,
}

impl Default for OutlierConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mean_k: DEFAULT_MEAN_K,
            multiplier: DEFAULT_MULTIPLIER,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Parent directory; each boundary gets its own sub-directory.
    pub output_dir: PathBuf,
    pub catalog_url: String,
    pub region: String,
    pub resolution: Resolution,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_crs: Option<String>,
    pub ground_only: bool,
    pub most_recent: bool,
    pub workers: usize,
    pub min_points: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    pub pdal: PathBuf,
    pub keep_temp: bool,
    pub outlier: OutlierConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("lidar_data"),
            catalog_url: USGS_LIDAR_BOUNDARIES_URL.to_string(),
            region: "us-west-2".to_string(),
            resolution: Resolution::Full,
            target_crs: None,
            ground_only: false,
            most_recent: false,
            workers: DEFAULT_WORKERS,
            min_points: DEFAULT_MIN_POINTS,
            timeout_secs: None,
            pdal: PathBuf::from("pdal"),
            keep_temp: false,
            outlier: OutlierConfig::default(),
        }
    }
}

impl Config {
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Reads the config file, or writes the defaults there when it does not
    /// exist yet. An unreadable file falls back to the defaults.
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        let config = if path.exists() {
            match Self::read(path) {
                Ok(config) => {
                    info!("Loaded configuration from {}", path.display());
                    config
                }
                Err(e) => {
                    warn!("Error loading configuration from {}: {e:#}", path.display());
                    warn!("Using default configuration");
                    Self::default()
                }
            }
        } else {
            let config = Self::default();
            match config.write(path) {
                Ok(()) => info!("Created default configuration file at {}", path.display()),
                Err(e) => warn!("Error creating default configuration file: {e:#}"),
            }
            config
        };
        config.validate()
    }

    /// Replaces invalid values with usable ones.
    pub fn validate(mut self) -> Self {
        if self.workers == 0 {
            warn!("Invalid workers (must be positive). Using {DEFAULT_WORKERS}.");
            self.workers = DEFAULT_WORKERS;
        }
        if let Resolution::Spacing(v) = self.resolution {
            if !v.is_finite() || v <= 0.0 {
                warn!("Invalid resolution {v} (must be positive). Using full resolution.");
                self.resolution = Resolution::Full;
            }
        }
        if self.outlier.mean_k == 0 {
            warn!("Invalid outlier mean_k (must be positive). Using {DEFAULT_MEAN_K}.");
            self.outlier.mean_k = DEFAULT_MEAN_K;
        }
        if !self.outlier.multiplier.is_finite() || self.outlier.multiplier <= 0.0 {
            warn!("Invalid outlier multiplier (must be positive). Using {DEFAULT_MULTIPLIER}.");
            self.outlier.multiplier = DEFAULT_MULTIPLIER;
        }
        if self.timeout_secs == Some(0) {
            warn!("Invalid timeout_secs (must be positive). Disabling the timeout.");
            self.timeout_secs = None;
        }
        self
    }

    pub fn selection_mode(&self) -> SelectionMode {
        if self.most_recent {
            SelectionMode::MostRecentOnly
        } else {
            SelectionMode::AllIntersecting
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn pipeline_options(&self, output_dir: &Path) -> PipelineOptions {
        PipelineOptions {
            output_dir: output_dir.to_path_buf(),
            region: self.region.clone(),
            resolution: self.resolution,
            target_crs: self.target_crs.clone(),
            outlier: self.outlier.enabled.then_some(OutlierOptions {
                mean_k: self.outlier.mean_k,
                multiplier: self.outlier.multiplier,
            }),
            ground_only: self.ground_only,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            workers = 3
            resolution = 1.5
            most_recent = true

            [outlier]
            enabled = true
            "#,
        )
        .unwrap();
        assert_eq!(config.workers, 3);
        assert_eq!(config.resolution, Resolution::Spacing(1.5));
        assert_eq!(config.selection_mode(), SelectionMode::MostRecentOnly);
        assert_eq!(config.outlier.mean_k, DEFAULT_MEAN_K);
        assert_eq!(config.region, "us-west-2");
    }

    #[test]
    fn test_resolution_values() {
        let config: Config = toml::from_str(r#"resolution = "full""#).unwrap();
        assert_eq!(config.resolution, Resolution::Full);
        let config: Config = toml::from_str("resolution = 2").unwrap();
        assert_eq!(config.resolution, Resolution::Spacing(2.0));
        assert!(toml::from_str::<Config>(r#"resolution = "coarse""#).is_err());
    }

    #[test]
    fn test_validate() {
        let config = Config {
            workers: 0,
            resolution: Resolution::Spacing(-1.0),
            timeout_secs: Some(0),
            outlier: OutlierConfig {
                enabled: true,
                mean_k: 0,
                multiplier: 0.0,
            },
            ..Config::default()
        }
        .validate();
        assert_eq!(config.workers, DEFAULT_WORKERS);
        assert_eq!(config.resolution, Resolution::Full);
        assert_eq!(config.timeout(), None);
        assert_eq!(config.outlier, OutlierConfig {
            enabled: true,
            mean_k: DEFAULT_MEAN_K,
            multiplier: DEFAULT_MULTIPLIER,
        });
    }

    #[test]
    fn test_load_or_create_writes_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let config = Config::load_or_create(&path);
        assert_eq!(config, Config::default());
        assert_eq!(path.exists(), true);
        assert_eq!(Config::read(&path).unwrap(), Config::default());
    }

    #[test]
    fn test_load_or_create_survives_bad_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "workers = [").unwrap();
        assert_eq!(Config::load_or_create(&path), Config::default());
    }

    #[test]
    fn test_pipeline_options() {
        let config = Config {
            target_crs: Some("EPSG:26913".to_string()),
            outlier: OutlierConfig {
                enabled: true,
                mean_k: 12,
                multiplier: 2.5,
            },
            ..Config::default()
        };
        let options = config.pipeline_options(Path::new("/out/site"));
        assert_eq!(options.output_dir, PathBuf::from("/out/site"));
        assert_eq!(
            options.outlier,
            Some(OutlierOptions {
                mean_k: 12,
                multiplier: 2.5
            })
        );
        assert_eq!(options.target_crs.as_deref(), Some("EPSG:26913"));
        assert_eq!(Config::default().pipeline_options(Path::new("/o")).outlier, None);
    }
}
