//! Pipeline configuration
//!
//! Input locations, processing limits, quality thresholds and analysis
//! parameters. Loaded from TOML; every field falls back to a default.

use crate::analysis::records::PriceUnit;
use crate::analysis::season::YearSeason;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Invalid configuration values.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    NoTargetSeasons,
    ZeroWorkers,
    ZeroChunkSize,
    ThresholdOutOfRange { name: &'static str, value: f64 },
    AbsorptionBoundsInverted { min: f64, max: f64 },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoTargetSeasons => write!(f, "analysis.target_seasons must not be empty"),
            Self::ZeroWorkers => write!(f, "processing.parallel_workers must be at least 1"),
            Self::ZeroChunkSize => write!(f, "processing.chunk_size must be at least 1"),
            Self::ThresholdOutOfRange { name, value } => {
                write!(f, "{} = {} is outside 0..=1", name, value)
            }
            Self::AbsorptionBoundsInverted { min, max } => {
                write!(f, "min_absorption_rate {} exceeds max_absorption_rate {}", min, max)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Top-level pipeline configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Input and output locations
    #[serde(default)]
    pub data_paths: DataPaths,

    /// Processing limits
    #[serde(default)]
    pub processing: ProcessingConfig,

    /// Data quality gates
    #[serde(default)]
    pub quality_thresholds: QualityThresholds,

    /// Analysis parameters
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

impl PipelineConfig {
    /// Load from TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load from `PIPELINE_CONFIG_PATH` or the default path, falling back to
    /// defaults when the file is absent or unreadable.
    pub fn from_env() -> Self {
        let path = std::env::var("PIPELINE_CONFIG_PATH")
            .unwrap_or_else(|_| "pipeline_config.toml".to_string());

        Self::load(&path).unwrap_or_else(|e| {
            tracing::debug!("Using default pipeline config ({}): {}", path, e);
            Self::default()
        })
    }

    /// Save to TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let contents = toml::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Reject values the stages cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.analysis.target_seasons.is_empty() {
            return Err(ConfigError::NoTargetSeasons);
        }
        if self.processing.parallel_workers == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        if self.processing.chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }

        let unit_interval = [
            ("processing.memory_threshold", self.processing.memory_threshold),
            ("quality_thresholds.min_completeness", self.quality_thresholds.min_completeness),
            ("quality_thresholds.max_cancellation_rate", self.quality_thresholds.max_cancellation_rate),
            ("quality_thresholds.min_absorption_rate", self.quality_thresholds.min_absorption_rate),
            ("quality_thresholds.max_absorption_rate", self.quality_thresholds.max_absorption_rate),
            ("analysis.cancellation_risk_threshold", self.analysis.cancellation_risk_threshold),
            ("analysis.high_performance_threshold", self.analysis.high_performance_threshold),
        ];
        for (name, value) in unit_interval {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::ThresholdOutOfRange { name, value });
            }
        }

        let q = &self.quality_thresholds;
        if q.min_absorption_rate > q.max_absorption_rate {
            return Err(ConfigError::AbsorptionBoundsInverted {
                min: q.min_absorption_rate,
                max: q.max_absorption_rate,
            });
        }
        Ok(())
    }

    /// Target seasons in ascending order without duplicates.
    pub fn sorted_target_seasons(&self) -> Vec<YearSeason> {
        let mut seasons = self.analysis.target_seasons.clone();
        seasons.sort();
        seasons.dedup();
        seasons
    }
}

/// Input and output locations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPaths {
    /// Presale transaction export
    #[serde(default = "default_pre_sale_data")]
    pub pre_sale_data: PathBuf,

    /// Presale project (community) export
    #[serde(default = "default_sale_data")]
    pub sale_data: PathBuf,

    /// Report output directory
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Log directory
    #[serde(default = "default_logs_dir")]
    pub logs_dir: PathBuf,

    /// Optional SQLite run store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_db: Option<PathBuf>,
}

fn default_pre_sale_data() -> PathBuf {
    PathBuf::from("data/raw/lvr_presale_test.csv")
}
fn default_sale_data() -> PathBuf {
    PathBuf::from("data/raw/lvr_sale_data_test.csv")
}
fn default_output_dir() -> PathBuf {
    PathBuf::from("output")
}
fn default_logs_dir() -> PathBuf {
    PathBuf::from("logs")
}

impl Default for DataPaths {
    fn default() -> Self {
        Self {
            pre_sale_data: default_pre_sale_data(),
            sale_data: default_sale_data(),
            output_dir: default_output_dir(),
            logs_dir: default_logs_dir(),
            run_db: None,
        }
    }
}

/// Processing limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingConfig {
    /// Rows per parallel work unit
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Worker threads for per-project computation
    #[serde(default = "default_parallel_workers")]
    pub parallel_workers: usize,

    /// Share of system memory above which a warning is logged
    #[serde(default = "default_memory_threshold")]
    pub memory_threshold: f64,

    /// Wall-clock budget for the whole run (seconds)
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    /// Unit of the raw price columns
    #[serde(default)]
    pub price_unit: PriceUnit,
}

fn default_chunk_size() -> usize {
    10_000
}
fn default_parallel_workers() -> usize {
    4
}
fn default_memory_threshold() -> f64 {
    0.8
}
fn default_timeout_seconds() -> u64 {
    3600
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            parallel_workers: default_parallel_workers(),
            memory_threshold: default_memory_threshold(),
            timeout_seconds: default_timeout_seconds(),
            price_unit: PriceUnit::default(),
        }
    }
}

/// Data quality gates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QualityThresholds {
    /// Minimum key-field completeness (0..=1)
    #[serde(default = "default_min_completeness")]
    pub min_completeness: f64,

    /// Cancellation ratio above which the input is flagged (0..=1)
    #[serde(default = "default_max_cancellation_rate")]
    pub max_cancellation_rate: f64,

    #[serde(default)]
    pub min_absorption_rate: f64,

    #[serde(default = "default_max_absorption_rate")]
    pub max_absorption_rate: f64,
}

fn default_min_completeness() -> f64 {
    0.95
}
fn default_max_cancellation_rate() -> f64 {
    0.1
}
fn default_max_absorption_rate() -> f64 {
    1.0
}

impl Default for QualityThresholds {
    fn default() -> Self {
        Self {
            min_completeness: default_min_completeness(),
            max_cancellation_rate: default_max_cancellation_rate(),
            min_absorption_rate: 0.0,
            max_absorption_rate: default_max_absorption_rate(),
        }
    }
}

/// Analysis parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Cumulative cancellation ratio counted as a high-cancellation project
    #[serde(default = "default_cancellation_risk_threshold")]
    pub cancellation_risk_threshold: f64,

    /// Net absorption ratio counted as high performance
    #[serde(default = "default_high_performance_threshold")]
    pub high_performance_threshold: f64,

    /// Seasons without a sale before a project counts as stagnant
    #[serde(default = "default_stagnant_threshold")]
    pub stagnant_threshold: u32,

    /// Standard deviations for price outlier reporting
    #[serde(default = "default_price_outlier_threshold")]
    pub price_outlier_threshold: f64,

    /// Seasons the reports are produced for
    #[serde(default = "default_target_seasons")]
    pub target_seasons: Vec<YearSeason>,

    /// Reference date for season completeness
    #[serde(default = "default_analysis_date")]
    pub analysis_date: NaiveDate,
}

fn default_cancellation_risk_threshold() -> f64 {
    0.05
}
fn default_high_performance_threshold() -> f64 {
    0.7
}
fn default_stagnant_threshold() -> u32 {
    12
}
fn default_price_outlier_threshold() -> f64 {
    3.0
}
fn default_target_seasons() -> Vec<YearSeason> {
    (1..=4)
        .filter_map(|q| YearSeason::new(113, q).ok())
        .collect()
}
fn default_analysis_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 12, 31).unwrap_or(NaiveDate::MIN)
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            cancellation_risk_threshold: default_cancellation_risk_threshold(),
            high_performance_threshold: default_high_performance_threshold(),
            stagnant_threshold: default_stagnant_threshold(),
            price_outlier_threshold: default_price_outlier_threshold(),
            target_seasons: default_target_seasons(),
            analysis_date: default_analysis_date(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PipelineConfig::default();
        assert_eq!(config.processing.chunk_size, 10_000);
        assert_eq!(config.analysis.stagnant_threshold, 12);
        assert_eq!(config.analysis.target_seasons.len(), 4);
        assert_eq!(config.analysis.target_seasons[0].to_string(), "113Y1S");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = PipelineConfig::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        let parsed: PipelineConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.analysis.target_seasons, config.analysis.target_seasons);
        assert_eq!(parsed.analysis.analysis_date, config.analysis.analysis_date);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: PipelineConfig = toml::from_str(
            r#"
            [analysis]
            target_seasons = ["112Y4S", "112S3"]

            [processing]
            price_unit = "yuan"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.processing.price_unit, PriceUnit::Yuan);
        assert_eq!(parsed.processing.parallel_workers, 4);
        let sorted = parsed.sorted_target_seasons();
        assert_eq!(sorted[0].to_string(), "112Y3S");
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = PipelineConfig::default();
        config.analysis.target_seasons.clear();
        assert_eq!(config.validate(), Err(ConfigError::NoTargetSeasons));

        let mut config = PipelineConfig::default();
        config.quality_thresholds.min_completeness = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ThresholdOutOfRange { name: "quality_thresholds.min_completeness", .. })
        ));
    }
}
