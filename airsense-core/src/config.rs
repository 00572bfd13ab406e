use std::path::{Path, PathBuf};

use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

/// Fully resolved application configuration.
///
/// Built once at startup and handed to every service constructor.
#[derive(Debug, Clone)]
pub struct AirsenseConfig {
    pub service: ServiceConfig,
    pub http: HttpConfig,
    pub paths: PathsConfig,
    pub monitoring: MonitoringConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServiceConfig {
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct MonitoringConfig {
    /// KS p-value below which a single feature counts as drifted
    pub drift_p_value: f64,
    /// Share of drifted features at which the whole dataset counts as drifted
    pub drift_share: f64,
    pub reference_sample_size: usize,
    pub sample_seed: u64,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            drift_p_value: 0.05,
            drift_share: 0.5,
            reference_sample_size: 500,
            sample_seed: 42,
        }
    }
}

/// File-system locations for the model, logs and reports.
#[derive(Debug, Clone, PartialEq)]
pub struct PathsConfig {
    pub base_dir: PathBuf,
    pub model_path: PathBuf,
    pub model_version_path: PathBuf,
    pub reference_data_path: PathBuf,
    pub full_dataset_path: PathBuf,
    pub reports_dir: PathBuf,
    pub prediction_log_path: PathBuf,
    pub ground_truth_log_path: PathBuf,
    pub metrics_cache_path: PathBuf,
}

impl PathsConfig {
    /// Default layout rooted at `base_dir`.
    pub fn from_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        RawPaths {
            base_dir: Some(base_dir.into().display().to_string()),
            ..RawPaths::default()
        }
        .resolve()
    }
}

// Paths as they appear in the file / environment: every entry optional so
// unset ones can be derived from `base_dir` after merging.
#[derive(Debug, Deserialize, Default)]
struct RawPaths {
    base_dir: Option<String>,
    model_path: Option<String>,
    model_version_path: Option<String>,
    reference_data_path: Option<String>,
    full_dataset_path: Option<String>,
    reports_dir: Option<String>,
    prediction_log_path: Option<String>,
    ground_truth_log_path: Option<String>,
    metrics_cache_path: Option<String>,
}

impl RawPaths {
    fn resolve(self) -> PathsConfig {
        let base_dir = expand(self.base_dir.as_deref().unwrap_or("."));
        let data_dir = base_dir.join("app").join("data");
        let reports_dir = self
            .reports_dir
            .as_deref()
            .map(expand)
            .unwrap_or_else(|| base_dir.join("reports"));

        let or = |value: Option<String>, default: PathBuf| {
            value.as_deref().map(expand).unwrap_or(default)
        };

        PathsConfig {
            model_path: or(self.model_path, data_dir.join("indoor_aqi_model.json")),
            model_version_path: or(self.model_version_path, data_dir.join("version.txt")),
            reference_data_path: or(self.reference_data_path, data_dir.join("reference_data.csv")),
            full_dataset_path: or(
                self.full_dataset_path,
                data_dir.join("IoT_Indoor_Air_Quality_Dataset.csv"),
            ),
            prediction_log_path: or(
                self.prediction_log_path,
                reports_dir.join("prediction_data.csv"),
            ),
            ground_truth_log_path: or(
                self.ground_truth_log_path,
                reports_dir.join("ground_truth.csv"),
            ),
            metrics_cache_path: or(
                self.metrics_cache_path,
                reports_dir.join("metrics_cache.json"),
            ),
            reports_dir,
            base_dir,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
struct RawConfig {
    #[serde(default)]
    service: ServiceConfig,
    #[serde(default)]
    http: HttpConfig,
    #[serde(default)]
    paths: RawPaths,
    #[serde(default)]
    monitoring: MonitoringConfig,
}

fn expand(raw: &str) -> PathBuf {
    match shellexpand::full(raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(e) => {
            tracing::warn!(path = raw, error = %e, "Path expansion failed, using it verbatim");
            PathBuf::from(raw)
        }
    }
}

impl Default for AirsenseConfig {
    fn default() -> Self {
        Self::with_base_dir(".")
    }
}

impl AirsenseConfig {
    /// Load from an optional TOML file, then `AIRSENSE__SECTION__KEY` env vars.
    ///
    /// A missing file is not an error; every key has a default.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(
                Environment::with_prefix("AIRSENSE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let raw: RawConfig = s.try_deserialize()?;
        Ok(raw.into())
    }

    /// Defaults rooted at `base_dir`. Handy for tests and one-off tools.
    pub fn with_base_dir(base_dir: impl AsRef<Path>) -> Self {
        Self {
            service: ServiceConfig::default(),
            http: HttpConfig::default(),
            paths: PathsConfig::from_base_dir(base_dir.as_ref()),
            monitoring: MonitoringConfig::default(),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.http.host, self.http.port)
    }
}

impl From<RawConfig> for AirsenseConfig {
    fn from(raw: RawConfig) -> Self {
        Self {
            service: raw.service,
            http: raw.http,
            paths: raw.paths.resolve(),
            monitoring: raw.monitoring,
        }
    }
}
