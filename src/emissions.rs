//! Emission inputs, methodologies and data-quality levels.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Regulatory or standards framework a report is computed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Methodology {
    #[serde(rename = "RED_II")]
    RedII,
    #[serde(rename = "RTFO")]
    Rtfo,
    #[serde(rename = "ISO_14064")]
    Iso14064,
    #[serde(rename = "ISCC")]
    Iscc,
    #[serde(rename = "RSB")]
    Rsb,
}

impl Methodology {
    pub const ALL: [Methodology; 5] = [
        Methodology::RedII,
        Methodology::Rtfo,
        Methodology::Iso14064,
        Methodology::Iscc,
        Methodology::Rsb,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Methodology::RedII => "RED_II",
            Methodology::Rtfo => "RTFO",
            Methodology::Iso14064 => "ISO_14064",
            Methodology::Iscc => "ISCC",
            Methodology::Rsb => "RSB",
        }
    }
}

impl FromStr for Methodology {
    type Err = ();

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_uppercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "RED_II" | "REDII" => Ok(Methodology::RedII),
            "RTFO" => Ok(Methodology::Rtfo),
            "ISO_14064" | "ISO14064" => Ok(Methodology::Iso14064),
            "ISCC" => Ok(Methodology::Iscc),
            "RSB" => Ok(Methodology::Rsb),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Methodology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provenance class of the emission inputs, ordered best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataQualityLevel {
    Measured,
    DefaultValue,
    Estimated,
}

impl DataQualityLevel {
    pub const ALL: [DataQualityLevel; 3] = [
        DataQualityLevel::Measured,
        DataQualityLevel::DefaultValue,
        DataQualityLevel::Estimated,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DataQualityLevel::Measured => "measured",
            DataQualityLevel::DefaultValue => "default_value",
            DataQualityLevel::Estimated => "estimated",
        }
    }
}

impl FromStr for DataQualityLevel {
    type Err = ();

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().replace(['-', ' '], "_").as_str() {
            "measured" => Ok(DataQualityLevel::Measured),
            "default_value" | "default" | "literature" => Ok(DataQualityLevel::DefaultValue),
            "estimated" => Ok(DataQualityLevel::Estimated),
            _ => Err(()),
        }
    }
}

impl fmt::Display for DataQualityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Direct,
    Energy,
    ValueChain,
}

/// Upper bound for a single category value. Real pathways sit several
/// orders of magnitude below it.
pub const MAX_CATEGORY_VALUE: f64 = 1.0e6;

/// The nine emission categories, gCO2e per functional unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmissionCategory {
    Cultivation,
    Processing,
    Transport,
    Electricity,
    Steam,
    UpstreamInputs,
    LandUseChange,
    Distribution,
    EndOfLife,
}

impl EmissionCategory {
    pub const ALL: [EmissionCategory; 9] = [
        EmissionCategory::Cultivation,
        EmissionCategory::Processing,
        EmissionCategory::Transport,
        EmissionCategory::Electricity,
        EmissionCategory::Steam,
        EmissionCategory::UpstreamInputs,
        EmissionCategory::LandUseChange,
        EmissionCategory::Distribution,
        EmissionCategory::EndOfLife,
    ];

    /// Categories that must be reported explicitly before submission.
    pub const REQUIRED: [EmissionCategory; 3] = [
        EmissionCategory::Cultivation,
        EmissionCategory::Processing,
        EmissionCategory::Transport,
    ];

    pub fn scope(self) -> Scope {
        match self {
            EmissionCategory::Cultivation
            | EmissionCategory::Processing
            | EmissionCategory::Transport => Scope::Direct,
            EmissionCategory::Electricity | EmissionCategory::Steam => Scope::Energy,
            EmissionCategory::UpstreamInputs
            | EmissionCategory::LandUseChange
            | EmissionCategory::Distribution
            | EmissionCategory::EndOfLife => Scope::ValueChain,
        }
    }

    pub fn field_name(self) -> &'static str {
        match self {
            EmissionCategory::Cultivation => "cultivation",
            EmissionCategory::Processing => "processing",
            EmissionCategory::Transport => "transport",
            EmissionCategory::Electricity => "electricity",
            EmissionCategory::Steam => "steam",
            EmissionCategory::UpstreamInputs => "upstream_inputs",
            EmissionCategory::LandUseChange => "land_use_change",
            EmissionCategory::Distribution => "distribution",
            EmissionCategory::EndOfLife => "end_of_life",
        }
    }
}

/// Per-category emission values. `None` means not reported and counts as zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmissionInputs {
    #[serde(default)]
    pub cultivation: Option<f64>,
    #[serde(default)]
    pub processing: Option<f64>,
    #[serde(default)]
    pub transport: Option<f64>,
    #[serde(default)]
    pub electricity: Option<f64>,
    #[serde(default)]
    pub steam: Option<f64>,
    #[serde(default)]
    pub upstream_inputs: Option<f64>,
    #[serde(default)]
    pub land_use_change: Option<f64>,
    #[serde(default)]
    pub distribution: Option<f64>,
    #[serde(default)]
    pub end_of_life: Option<f64>,
}

impl EmissionInputs {
    pub fn get(&self, category: EmissionCategory) -> Option<f64> {
        match category {
            EmissionCategory::Cultivation => self.cultivation,
            EmissionCategory::Processing => self.processing,
            EmissionCategory::Transport => self.transport,
            EmissionCategory::Electricity => self.electricity,
            EmissionCategory::Steam => self.steam,
            EmissionCategory::UpstreamInputs => self.upstream_inputs,
            EmissionCategory::LandUseChange => self.land_use_change,
            EmissionCategory::Distribution => self.distribution,
            EmissionCategory::EndOfLife => self.end_of_life,
        }
    }

    pub fn set(&mut self, category: EmissionCategory, value: Option<f64>) {
        let slot = match category {
            EmissionCategory::Cultivation => &mut self.cultivation,
            EmissionCategory::Processing => &mut self.processing,
            EmissionCategory::Transport => &mut self.transport,
            EmissionCategory::Electricity => &mut self.electricity,
            EmissionCategory::Steam => &mut self.steam,
            EmissionCategory::UpstreamInputs => &mut self.upstream_inputs,
            EmissionCategory::LandUseChange => &mut self.land_use_change,
            EmissionCategory::Distribution => &mut self.distribution,
            EmissionCategory::EndOfLife => &mut self.end_of_life,
        };
        *slot = value;
    }

    pub fn value_or_zero(&self, category: EmissionCategory) -> f64 {
        self.get(category).unwrap_or(0.0)
    }

    pub fn scope_total(&self, scope: Scope) -> f64 {
        let mut values: Vec<f64> = EmissionCategory::ALL
            .iter()
            .filter(|c| c.scope() == scope)
            .map(|c| self.value_or_zero(*c))
            .collect();
        canonical_sum(&mut values)
    }

    /// Apply every `Some` value in `incoming`, returning the categories whose
    /// value actually changed.
    pub fn merge(&mut self, incoming: &EmissionInputs) -> Vec<EmissionCategory> {
        let mut changed = Vec::new();
        for category in EmissionCategory::ALL {
            if let Some(value) = incoming.get(category) {
                if self.get(category) != Some(value) {
                    self.set(category, Some(value));
                    changed.push(category);
                }
            }
        }
        changed
    }

    pub fn missing_required(&self) -> Vec<EmissionCategory> {
        EmissionCategory::REQUIRED
            .iter()
            .copied()
            .filter(|c| self.get(*c).is_none())
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        EmissionCategory::ALL.iter().all(|c| self.get(*c).is_none())
    }
}

/// Sum in ascending order so the result does not depend on which category
/// holds which value.
pub(crate) fn canonical_sum(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.total_cmp(b));
    values.iter().sum()
}
