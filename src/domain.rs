use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

pub type ExperimentSet = BTreeSet<String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
#[value(rename_all = "snake_case")]
pub enum AggregationLevel {
    Psms,
    Precursors,
    Peptides,
    ModifiedPeptides,
    ProteinGroups,
    SampleRollupPrecursors,
    SampleRollupPeptides,
    SampleRollupModifiedPeptides,
    SampleRollupProteinGroups,
}

impl AggregationLevel {
    pub const ALL: [AggregationLevel; 9] = [
        AggregationLevel::Psms,
        AggregationLevel::Precursors,
        AggregationLevel::Peptides,
        AggregationLevel::ModifiedPeptides,
        AggregationLevel::ProteinGroups,
        AggregationLevel::SampleRollupPrecursors,
        AggregationLevel::SampleRollupPeptides,
        AggregationLevel::SampleRollupModifiedPeptides,
        AggregationLevel::SampleRollupProteinGroups,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationLevel::Psms => "psms",
            AggregationLevel::Precursors => "precursors",
            AggregationLevel::Peptides => "peptides",
            AggregationLevel::ModifiedPeptides => "modified_peptides",
            AggregationLevel::ProteinGroups => "protein_groups",
            AggregationLevel::SampleRollupPrecursors => "sample_rollup_precursors",
            AggregationLevel::SampleRollupPeptides => "sample_rollup_peptides",
            AggregationLevel::SampleRollupModifiedPeptides => "sample_rollup_modified_peptides",
            AggregationLevel::SampleRollupProteinGroups => "sample_rollup_protein_groups",
        }
    }

    pub fn is_per_run(&self) -> bool {
        matches!(
            self,
            AggregationLevel::Psms
                | AggregationLevel::Precursors
                | AggregationLevel::Peptides
                | AggregationLevel::ModifiedPeptides
        )
    }

    pub fn has_global_q_value(&self) -> bool {
        !matches!(self, AggregationLevel::Psms)
    }

    pub fn is_sample_rollup(&self) -> bool {
        matches!(
            self,
            AggregationLevel::SampleRollupPrecursors
                | AggregationLevel::SampleRollupPeptides
                | AggregationLevel::SampleRollupModifiedPeptides
                | AggregationLevel::SampleRollupProteinGroups
        )
    }
}

impl fmt::Display for AggregationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AggregationLevel {
    type Err = CacheError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase();
        AggregationLevel::ALL
            .into_iter()
            .find(|level| level.as_str() == normalized)
            .ok_or_else(|| CacheError::InvalidLevel(value.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemotePartition {
    pub path: String,
    pub url: String,
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_level_names() {
        let level: AggregationLevel = "protein_groups".parse().unwrap();
        assert_eq!(level, AggregationLevel::ProteinGroups);
        let level: AggregationLevel = " Sample_Rollup_Peptides ".parse().unwrap();
        assert_eq!(level, AggregationLevel::SampleRollupPeptides);
    }

    #[test]
    fn parse_level_invalid() {
        let err = "proteins".parse::<AggregationLevel>().unwrap_err();
        assert_matches!(err, CacheError::InvalidLevel(_));
    }

    #[test]
    fn quality_filters_by_level() {
        assert!(AggregationLevel::Psms.is_per_run());
        assert!(!AggregationLevel::Psms.has_global_q_value());
        assert!(AggregationLevel::ModifiedPeptides.is_per_run());
        assert!(AggregationLevel::ModifiedPeptides.has_global_q_value());
        assert!(!AggregationLevel::ProteinGroups.is_per_run());
        assert!(!AggregationLevel::SampleRollupPrecursors.is_per_run());
        assert!(AggregationLevel::SampleRollupPrecursors.has_global_q_value());
        assert!(AggregationLevel::SampleRollupPrecursors.is_sample_rollup());
        assert!(!AggregationLevel::Precursors.is_sample_rollup());
    }
}
