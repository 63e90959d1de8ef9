//! Carbon intensity calculation
//!
//! [`CiEngine::calculate`] is a pure function of the emission inputs, the
//! methodology and the data-quality level. The only state the engine holds is
//! the configured regulatory tables, which never change after construction.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::config_loader::{CiConfig, MethodologyProfile, UncertaintyBands};
use crate::emissions::{
    canonical_sum, DataQualityLevel, EmissionCategory, EmissionInputs, Methodology,
    MAX_CATEGORY_VALUE,
};
use crate::errors::{CiError, CiResult};
use crate::log_sink::alert_defect;

/// Lower clamp for GHG savings. Pathways worse than the fossil comparator
/// report negative savings down to this bound.
pub const MIN_GHG_SAVINGS_PCT: f64 = -1000.0;
pub const MAX_GHG_SAVINGS_PCT: f64 = 100.0;

/// A CI score tied to the methodology and unit it was computed under.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CiScore {
    pub value: f64,
    pub methodology: Methodology,
    pub unit: String,
}

impl CiScore {
    /// Order two scores. Scores from different methodologies are not comparable.
    pub fn compare(&self, other: &CiScore) -> CiResult<Ordering> {
        if self.methodology != other.methodology {
            return Err(CiError::validation(
                "methodology",
                format!(
                    "cannot compare a {} score with a {} score",
                    self.methodology, other.methodology
                ),
            ));
        }
        Ok(self.value.total_cmp(&other.value))
    }
}

/// Everything the engine derives for a report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CiCalculation {
    pub methodology: Methodology,
    pub data_quality: DataQualityLevel,
    /// Plain sum of the nine categories, gCO2e/MJ.
    pub total_ci_value: f64,
    pub ci_score: CiScore,
    pub uncertainty_range_low: f64,
    pub uncertainty_range_high: f64,
    pub ghg_savings_percentage: f64,
    pub ci_rating: String,
}

pub struct CiEngine {
    profiles: BTreeMap<Methodology, MethodologyProfile>,
    bands: UncertaintyBands,
}

impl CiEngine {
    /// Build an engine from a validated configuration.
    pub fn from_config(config: &CiConfig) -> CiResult<Self> {
        config.validate()?;
        let mut profiles = BTreeMap::new();
        for methodology in Methodology::ALL {
            if let Some(profile) = config.profile(methodology) {
                profiles.insert(methodology, profile.clone());
            }
        }
        Ok(Self {
            profiles,
            bands: config.uncertainty.clone(),
        })
    }

    pub fn profile(&self, methodology: Methodology) -> CiResult<&MethodologyProfile> {
        self.profiles.get(&methodology).ok_or_else(|| {
            alert_defect(
                "ci_engine",
                CiError::computation(format!("no profile loaded for {methodology}")),
            )
        })
    }

    pub fn calculate(
        &self,
        inputs: &EmissionInputs,
        methodology: Methodology,
        quality: DataQualityLevel,
    ) -> CiResult<CiCalculation> {
        let mut values = Vec::with_capacity(EmissionCategory::ALL.len());
        for category in EmissionCategory::ALL {
            let value = inputs.value_or_zero(category);
            if !value.is_finite() {
                return Err(CiError::validation(category.field_name(), "must be a finite number"));
            }
            if value < 0.0 {
                return Err(CiError::validation(category.field_name(), "must not be negative"));
            }
            if value > MAX_CATEGORY_VALUE {
                return Err(CiError::validation(
                    category.field_name(),
                    format!("must not exceed {MAX_CATEGORY_VALUE}"),
                ));
            }
            values.push(value);
        }

        let profile = self.profile(methodology)?;
        let total_ci_value = canonical_sum(&mut values);
        let score = total_ci_value * profile.unit_factor;
        if !score.is_finite() {
            return Err(CiError::validation(
                "emissions",
                format!("total is out of range for {} units", profile.unit),
            ));
        }

        let band = self.bands.pct_for(quality) / 100.0;
        let low = score * (1.0 - band);
        let high = score * (1.0 + band);

        let savings = ghg_savings(score, profile.fossil_baseline);
        let rating = rate(score, profile);

        let calculation = CiCalculation {
            methodology,
            data_quality: quality,
            total_ci_value,
            ci_score: CiScore {
                value: score,
                methodology,
                unit: profile.unit.clone(),
            },
            uncertainty_range_low: low,
            uncertainty_range_high: high,
            ghg_savings_percentage: savings,
            ci_rating: rating,
        };
        check_invariants(&calculation)?;
        Ok(calculation)
    }
}

fn ghg_savings(score: f64, fossil_baseline: f64) -> f64 {
    let raw = (fossil_baseline - score) / fossil_baseline * 100.0;
    raw.clamp(MIN_GHG_SAVINGS_PCT, MAX_GHG_SAVINGS_PCT)
}

fn rate(score: f64, profile: &MethodologyProfile) -> String {
    profile
        .rating_thresholds
        .iter()
        .find(|t| score <= t.max_score)
        .map(|t| t.grade.clone())
        .unwrap_or_else(|| profile.fallback_grade.clone())
}

fn check_invariants(calc: &CiCalculation) -> CiResult<()> {
    let score = calc.ci_score.value;
    let finite = [
        calc.total_ci_value,
        score,
        calc.uncertainty_range_low,
        calc.uncertainty_range_high,
        calc.ghg_savings_percentage,
    ]
    .iter()
    .all(|v| v.is_finite());

    if !finite {
        return Err(alert_defect(
            "ci_engine",
            CiError::computation("non-finite derived value"),
        ));
    }
    if !(calc.uncertainty_range_low <= score && score <= calc.uncertainty_range_high) {
        return Err(alert_defect(
            "ci_engine",
            CiError::computation(format!(
                "uncertainty band [{}, {}] does not contain score {}",
                calc.uncertainty_range_low, calc.uncertainty_range_high, score
            )),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> CiEngine {
        CiEngine::from_config(&CiConfig::default()).expect("default engine")
    }

    fn worked_example() -> EmissionInputs {
        EmissionInputs {
            cultivation: Some(10.0),
            processing: Some(5.0),
            transport: Some(3.0),
            electricity: Some(2.0),
            steam: Some(0.0),
            upstream_inputs: Some(8.0),
            land_use_change: Some(0.0),
            distribution: Some(1.0),
            end_of_life: Some(0.0),
        }
    }

    #[test]
    fn worked_example_red_ii_measured() {
        let calc = engine()
            .calculate(&worked_example(), Methodology::RedII, DataQualityLevel::Measured)
            .unwrap();
        assert_eq!(calc.total_ci_value, 29.0);
        assert_eq!(calc.ci_score.value, 29.0);
        assert!((calc.ghg_savings_percentage - 69.148_936).abs() < 1e-4);
        assert!((calc.uncertainty_range_low - 27.55).abs() < 1e-9);
        assert!((calc.uncertainty_range_high - 30.45).abs() < 1e-9);
        assert_eq!(calc.ci_rating, "B");
    }

    #[test]
    fn missing_categories_count_as_zero() {
        let inputs = EmissionInputs {
            cultivation: Some(4.0),
            ..Default::default()
        };
        let calc = engine()
            .calculate(&inputs, Methodology::Iscc, DataQualityLevel::Estimated)
            .unwrap();
        assert_eq!(calc.total_ci_value, 4.0);
    }

    #[test]
    fn negative_value_is_rejected_not_clamped() {
        let mut inputs = worked_example();
        inputs.transport = Some(-0.5);
        let err = engine()
            .calculate(&inputs, Methodology::RedII, DataQualityLevel::Measured)
            .unwrap_err();
        assert!(matches!(err, CiError::Validation { ref field, .. } if field == "transport"));
    }

    #[test]
    fn oversized_inputs_are_validation_errors() {
        let inputs = EmissionInputs {
            cultivation: Some(1e308),
            processing: Some(1e308),
            ..Default::default()
        };
        let err = engine()
            .calculate(&inputs, Methodology::RedII, DataQualityLevel::Measured)
            .unwrap_err();
        assert!(matches!(err, CiError::Validation { ref field, .. } if field == "cultivation"));

        let mut at_bound = EmissionInputs::default();
        for category in EmissionCategory::ALL {
            at_bound.set(category, Some(MAX_CATEGORY_VALUE));
        }
        let calc = engine()
            .calculate(&at_bound, Methodology::Iso14064, DataQualityLevel::Estimated)
            .unwrap();
        assert!(calc.uncertainty_range_high.is_finite());
    }

    #[test]
    fn nan_is_rejected() {
        let mut inputs = worked_example();
        inputs.steam = Some(f64::NAN);
        assert!(engine()
            .calculate(&inputs, Methodology::RedII, DataQualityLevel::Measured)
            .is_err());
    }

    #[test]
    fn score_uses_methodology_unit() {
        let calc = engine()
            .calculate(&worked_example(), Methodology::Iso14064, DataQualityLevel::Measured)
            .unwrap();
        assert_eq!(calc.total_ci_value, 29.0);
        assert!((calc.ci_score.value - 104.4).abs() < 1e-9);
        assert_eq!(calc.ci_score.unit, "kgCO2e/MWh");
    }

    #[test]
    fn scores_from_different_methodologies_do_not_compare() {
        let e = engine();
        let a = e
            .calculate(&worked_example(), Methodology::RedII, DataQualityLevel::Measured)
            .unwrap();
        let b = e
            .calculate(&worked_example(), Methodology::Rsb, DataQualityLevel::Measured)
            .unwrap();
        assert!(a.ci_score.compare(&b.ci_score).is_err());
        assert_eq!(a.ci_score.compare(&a.ci_score).unwrap(), Ordering::Equal);
    }

    #[test]
    fn pathway_worse_than_fossil_reports_negative_savings() {
        let inputs = EmissionInputs {
            land_use_change: Some(150.0),
            ..Default::default()
        };
        let calc = engine()
            .calculate(&inputs, Methodology::RedII, DataQualityLevel::DefaultValue)
            .unwrap();
        assert!(calc.ghg_savings_percentage < 0.0);
        assert_eq!(calc.ci_rating, "F");
    }

    #[test]
    fn identical_inputs_give_identical_outputs() {
        let e = engine();
        let first = e
            .calculate(&worked_example(), Methodology::Rtfo, DataQualityLevel::Estimated)
            .unwrap();
        let second = e
            .calculate(&worked_example(), Methodology::Rtfo, DataQualityLevel::Estimated)
            .unwrap();
        assert_eq!(first, second);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn arb_values() -> impl Strategy<Value = Vec<f64>> {
            prop::collection::vec(0u32..100_000, 9)
                .prop_map(|v| v.into_iter().map(|x| f64::from(x) / 8.0).collect())
        }

        fn inputs_from(values: &[f64]) -> EmissionInputs {
            let mut inputs = EmissionInputs::default();
            for (category, value) in EmissionCategory::ALL.iter().zip(values) {
                inputs.set(*category, Some(*value));
            }
            inputs
        }

        fn arb_methodology() -> impl Strategy<Value = Methodology> {
            prop::sample::select(Methodology::ALL.to_vec())
        }

        fn arb_quality() -> impl Strategy<Value = DataQualityLevel> {
            prop::sample::select(DataQualityLevel::ALL.to_vec())
        }

        proptest! {
            #[test]
            fn total_is_exact_sum_independent_of_order(
                values in arb_values(),
                rotation in 0usize..9,
            ) {
                let e = engine();
                let expected: f64 = values.iter().sum();
                let mut rotated = values.clone();
                rotated.rotate_left(rotation);

                let a = e.calculate(&inputs_from(&values), Methodology::RedII, DataQualityLevel::Measured).unwrap();
                let b = e.calculate(&inputs_from(&rotated), Methodology::RedII, DataQualityLevel::Measured).unwrap();
                prop_assert_eq!(a.total_ci_value, expected);
                prop_assert_eq!(a.total_ci_value, b.total_ci_value);
            }

            #[test]
            fn band_contains_score(
                values in arb_values(),
                methodology in arb_methodology(),
                quality in arb_quality(),
            ) {
                let calc = engine().calculate(&inputs_from(&values), methodology, quality).unwrap();
                prop_assert!(calc.uncertainty_range_low <= calc.ci_score.value);
                prop_assert!(calc.ci_score.value <= calc.uncertainty_range_high);
            }

            #[test]
            fn degrading_quality_never_narrows_band(
                values in arb_values(),
                methodology in arb_methodology(),
            ) {
                let e = engine();
                let inputs = inputs_from(&values);
                let widths: Vec<f64> = DataQualityLevel::ALL
                    .iter()
                    .map(|q| {
                        let c = e.calculate(&inputs, methodology, *q).unwrap();
                        c.uncertainty_range_high - c.uncertainty_range_low
                    })
                    .collect();
                prop_assert!(widths.windows(2).all(|w| w[0] <= w[1]));
            }

            #[test]
            fn savings_strictly_decrease_with_score(
                a in 0u32..50_000,
                b in 0u32..50_000,
                methodology in arb_methodology(),
            ) {
                prop_assume!(a != b);
                let (lo, hi) = if a < b { (a, b) } else { (b, a) };
                let e = engine();
                let low = e.calculate(
                    &EmissionInputs { cultivation: Some(f64::from(lo) / 100.0), ..Default::default() },
                    methodology,
                    DataQualityLevel::Measured,
                ).unwrap();
                let high = e.calculate(
                    &EmissionInputs { cultivation: Some(f64::from(hi) / 100.0), ..Default::default() },
                    methodology,
                    DataQualityLevel::Measured,
                ).unwrap();
                prop_assert!(low.ghg_savings_percentage > high.ghg_savings_percentage);
            }
        }
    }
}
