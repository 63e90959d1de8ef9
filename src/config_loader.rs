// Layered configuration for the CI compliance engine.
// Defaults -> ci_compliance.toml -> CI_* environment variables.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::emissions::{DataQualityLevel, Methodology};
use crate::errors::{CiError, CiResult};

pub const DEFAULT_CONFIG_FILE: &str = "ci_compliance.toml";

/// Longest accepted validity window, roughly a century.
pub const MAX_VALIDITY_DAYS: u32 = 36_500;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CiConfig {
    pub data_dir: String,
    pub db_backend: String,
    /// Days a verified/rejected determination stays current before expiring.
    pub validity_days: u32,
    #[serde(default)]
    pub uncertainty: UncertaintyBands,
    /// Keyed by regulatory name (`RED_II`, `RTFO`, `ISO_14064`, `ISCC`, `RSB`).
    pub methodologies: BTreeMap<String, MethodologyProfile>,
    /// feedstock_id -> supplier_id. Empty means feedstock ownership is not checked.
    #[serde(default)]
    pub feedstocks: BTreeMap<String, String>,
    #[serde(default)]
    pub web: WebConfig,
}

/// Symmetric uncertainty band half-widths, in percent of the CI score.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct UncertaintyBands {
    pub measured_pct: f64,
    pub default_value_pct: f64,
    pub estimated_pct: f64,
}

impl UncertaintyBands {
    pub fn pct_for(&self, quality: DataQualityLevel) -> f64 {
        match quality {
            DataQualityLevel::Measured => self.measured_pct,
            DataQualityLevel::DefaultValue => self.default_value_pct,
            DataQualityLevel::Estimated => self.estimated_pct,
        }
    }
}

impl Default for UncertaintyBands {
    fn default() -> Self {
        Self {
            measured_pct: 5.0,
            default_value_pct: 10.0,
            estimated_pct: 20.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RatingThreshold {
    pub grade: String,
    /// Inclusive upper bound, in the methodology's canonical unit.
    pub max_score: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct MethodologyProfile {
    pub unit: String,
    /// Multiplier from gCO2e/MJ to `unit`.
    pub unit_factor: f64,
    /// Fossil comparator, in `unit`.
    pub fossil_baseline: f64,
    /// Ascending by `max_score`; scores above the last bound get `fallback_grade`.
    pub rating_thresholds: Vec<RatingThreshold>,
    #[serde(default = "default_fallback_grade")]
    pub fallback_grade: String,
}

fn default_fallback_grade() -> String {
    "F".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
    pub sweep_interval_secs: u64,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            sweep_interval_secs: 3600,
        }
    }
}

fn graded(bounds: [f64; 5]) -> Vec<RatingThreshold> {
    ["A", "B", "C", "D", "E"]
        .iter()
        .zip(bounds)
        .map(|(grade, max_score)| RatingThreshold {
            grade: grade.to_string(),
            max_score,
        })
        .collect()
}

fn per_mj_profile(fossil_baseline: f64, bounds: [f64; 5]) -> MethodologyProfile {
    MethodologyProfile {
        unit: "gCO2e/MJ".to_string(),
        unit_factor: 1.0,
        fossil_baseline,
        rating_thresholds: graded(bounds),
        fallback_grade: default_fallback_grade(),
    }
}

/// Placeholder regulatory tables. Deployments override these from the
/// applicable standard.
pub fn default_methodologies() -> BTreeMap<String, MethodologyProfile> {
    let mut profiles = BTreeMap::new();
    profiles.insert(
        Methodology::RedII.as_str().to_string(),
        per_mj_profile(94.0, [20.0, 35.0, 50.0, 65.0, 80.0]),
    );
    profiles.insert(
        Methodology::Rtfo.as_str().to_string(),
        per_mj_profile(94.0, [20.0, 35.0, 50.0, 65.0, 80.0]),
    );
    profiles.insert(
        Methodology::Iscc.as_str().to_string(),
        per_mj_profile(94.0, [20.0, 35.0, 50.0, 65.0, 80.0]),
    );
    profiles.insert(
        Methodology::Rsb.as_str().to_string(),
        per_mj_profile(89.0, [18.0, 32.0, 46.0, 60.0, 75.0]),
    );
    profiles.insert(
        Methodology::Iso14064.as_str().to_string(),
        MethodologyProfile {
            unit: "kgCO2e/MWh".to_string(),
            unit_factor: 3.6,
            fossil_baseline: 338.4,
            rating_thresholds: graded([72.0, 126.0, 180.0, 234.0, 288.0]),
            fallback_grade: default_fallback_grade(),
        },
    );
    profiles
}

impl Default for CiConfig {
    fn default() -> Self {
        Self {
            data_dir: "data/ci_store".to_string(),
            db_backend: "sled".to_string(),
            validity_days: 365,
            uncertainty: UncertaintyBands::default(),
            methodologies: default_methodologies(),
            feedstocks: BTreeMap::new(),
            web: WebConfig::default(),
        }
    }
}

impl CiConfig {
    pub fn profile(&self, methodology: Methodology) -> Option<&MethodologyProfile> {
        self.methodologies.get(methodology.as_str())
    }

    pub fn validate(&self) -> CiResult<()> {
        if self.data_dir.trim().is_empty() {
            return Err(CiError::config("data_dir cannot be empty"));
        }
        if !matches!(self.db_backend.as_str(), "sled" | "memory") {
            return Err(CiError::config(format!(
                "unknown db_backend '{}', expected 'sled' or 'memory'",
                self.db_backend
            )));
        }
        if !(1..=MAX_VALIDITY_DAYS).contains(&self.validity_days) {
            return Err(CiError::config(format!(
                "validity_days must be between 1 and {MAX_VALIDITY_DAYS}"
            )));
        }

        let bands = &self.uncertainty;
        let widths = [bands.measured_pct, bands.default_value_pct, bands.estimated_pct];
        if widths.iter().any(|w| !w.is_finite() || *w < 0.0 || *w > 100.0) {
            return Err(CiError::config("uncertainty bands must be between 0 and 100 percent"));
        }
        if !(widths[0] <= widths[1] && widths[1] <= widths[2]) {
            return Err(CiError::config(
                "uncertainty bands must widen as data quality degrades",
            ));
        }

        for methodology in Methodology::ALL {
            let profile = self.profile(methodology).ok_or_else(|| {
                CiError::config(format!("missing methodology profile for {methodology}"))
            })?;
            validate_profile(methodology, profile)?;
        }
        Ok(())
    }
}

fn validate_profile(methodology: Methodology, profile: &MethodologyProfile) -> CiResult<()> {
    if !(profile.unit_factor.is_finite() && profile.unit_factor > 0.0) {
        return Err(CiError::config(format!(
            "{methodology}: unit_factor must be positive"
        )));
    }
    if !(profile.fossil_baseline.is_finite() && profile.fossil_baseline > 0.0) {
        return Err(CiError::config(format!(
            "{methodology}: fossil_baseline must be positive"
        )));
    }
    if profile.rating_thresholds.is_empty() {
        return Err(CiError::config(format!(
            "{methodology}: rating_thresholds cannot be empty"
        )));
    }
    if profile.fallback_grade.trim().is_empty()
        || profile
            .rating_thresholds
            .iter()
            .any(|t| t.grade.trim().is_empty())
    {
        return Err(CiError::config(format!("{methodology}: grade names cannot be empty")));
    }
    let ascending = profile
        .rating_thresholds
        .windows(2)
        .all(|w| w[0].max_score < w[1].max_score);
    if !ascending || profile.rating_thresholds.iter().any(|t| !t.max_score.is_finite()) {
        return Err(CiError::config(format!(
            "{methodology}: rating thresholds must be finite and strictly ascending"
        )));
    }
    Ok(())
}

pub fn load_config(path: Option<&str>) -> CiResult<CiConfig> {
    let figment = Figment::from(Serialized::defaults(CiConfig::default()))
        .merge(Toml::file(path.unwrap_or(DEFAULT_CONFIG_FILE)))
        .merge(Env::prefixed("CI_").split("__"));

    let config: CiConfig = figment.extract()?;
    config.validate()?;
    Ok(config)
}
