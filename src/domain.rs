use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use clap::ValueEnum;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CompendiumError;

static RUN_ACCESSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[SED]RR\d+$").expect("run accession pattern"));

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RunAccession(String);

impl RunAccession {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunAccession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RunAccession {
    type Err = CompendiumError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_uppercase();
        if !RUN_ACCESSION.is_match(&normalized) {
            return Err(CompendiumError::InvalidRunAccession(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

impl TryFrom<String> for RunAccession {
    type Error = CompendiumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<RunAccession> for String {
    fn from(value: RunAccession) -> Self {
        value.0
    }
}

/// Species in the `genus_species` form used by the count source,
/// e.g. `homo_sapiens`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Species(String);

impl Species {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Species {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Species {
    type Err = CompendiumError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value
            .trim()
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("_");
        let is_valid = !normalized.is_empty()
            && !normalized.starts_with('_')
            && normalized
                .chars()
                .all(|ch| ch.is_ascii_lowercase() || ch == '_');
        if !is_valid {
            return Err(CompendiumError::InvalidSpecies(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

impl TryFrom<String> for Species {
    type Error = CompendiumError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Species> for String {
    fn from(value: Species) -> Self {
        value.0
    }
}

/// Quality inclusion policy an output is generated under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Pass,
    PassOrWarn,
}

impl Tier {
    pub const ALL: [Tier; 2] = [Tier::Pass, Tier::PassOrWarn];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Pass => "pass",
            Tier::PassOrWarn => "pass_or_warn",
        }
    }

    fn catalogue_prefix(&self) -> &'static str {
        match self {
            Tier::Pass => "PASS",
            Tier::PassOrWarn => "WARN",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    Raw,
    Aggregated,
    SizeFactor,
    Rank,
    Embedded,
}

impl OutputKind {
    pub const ALL: [OutputKind; 5] = [
        OutputKind::Raw,
        OutputKind::Aggregated,
        OutputKind::SizeFactor,
        OutputKind::Rank,
        OutputKind::Embedded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OutputKind::Raw => "raw",
            OutputKind::Aggregated => "aggregated",
            OutputKind::SizeFactor => "size_factor",
            OutputKind::Rank => "rank",
            OutputKind::Embedded => "embedded",
        }
    }

    /// Experiment-level kinds always collapse runs before the transform.
    pub fn requires_aggregation(&self) -> bool {
        matches!(self, OutputKind::Aggregated)
    }

    fn catalogue_suffix(&self) -> Option<&'static str> {
        match self {
            OutputKind::Raw => Some("Raw"),
            OutputKind::Aggregated => Some("Agg"),
            OutputKind::SizeFactor => Some("Deseq2"),
            OutputKind::Rank => Some("Rank"),
            OutputKind::Embedded => None,
        }
    }
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Stable name of a pipeline output, `<tier>_<kind>`.
pub fn output_name(tier: Tier, kind: OutputKind) -> String {
    format!("{}_{}", tier.as_str(), kind.as_str())
}

/// One of the eight canonical archive names (`PASS_Raw` ... `WARN_Rank`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CatalogueName {
    tier: Tier,
    kind: OutputKind,
}

impl CatalogueName {
    pub fn all() -> Vec<CatalogueName> {
        Tier::ALL
            .iter()
            .flat_map(|&tier| {
                OutputKind::ALL
                    .iter()
                    .filter(|kind| kind.catalogue_suffix().is_some())
                    .map(move |&kind| CatalogueName { tier, kind })
            })
            .collect()
    }

    pub fn from_output(tier: Tier, kind: OutputKind) -> Option<Self> {
        kind.catalogue_suffix()
            .map(|_| CatalogueName { tier, kind })
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn kind(&self) -> OutputKind {
        self.kind
    }

    pub fn output_name(&self) -> String {
        output_name(self.tier, self.kind)
    }
}

impl fmt::Display for CatalogueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let suffix = self.kind.catalogue_suffix().unwrap_or("");
        write!(f, "{}_{}", self.tier.catalogue_prefix(), suffix)
    }
}

impl FromStr for CatalogueName {
    type Err = CompendiumError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        CatalogueName::all()
            .into_iter()
            .find(|name| name.to_string().eq_ignore_ascii_case(trimmed))
            .ok_or_else(|| CompendiumError::UnknownCatalogueName(value.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn parse_run_accession_valid() {
        let run: RunAccession = "srr1234567".parse().unwrap();
        assert_eq!(run.as_str(), "SRR1234567");
        assert!("ERR42".parse::<RunAccession>().is_ok());
        assert!("DRR001".parse::<RunAccession>().is_ok());
    }

    #[test]
    fn parse_run_accession_invalid() {
        let err = "SRX123".parse::<RunAccession>().unwrap_err();
        assert_matches!(err, CompendiumError::InvalidRunAccession(_));
    }

    #[test]
    fn parse_species() {
        let species: Species = "Homo sapiens".parse().unwrap();
        assert_eq!(species.as_str(), "homo_sapiens");
        assert_matches!(
            "mus-musculus".parse::<Species>(),
            Err(CompendiumError::InvalidSpecies(_))
        );
    }

    #[test]
    fn catalogue_has_eight_names() {
        let names = CatalogueName::all()
            .iter()
            .map(|name| name.to_string())
            .collect::<Vec<_>>();
        assert_eq!(
            names,
            vec![
                "PASS_Raw",
                "PASS_Agg",
                "PASS_Deseq2",
                "PASS_Rank",
                "WARN_Raw",
                "WARN_Agg",
                "WARN_Deseq2",
                "WARN_Rank"
            ]
        );
    }

    #[test]
    fn catalogue_maps_to_output_names() {
        let name: CatalogueName = "WARN_Deseq2".parse().unwrap();
        assert_eq!(name.output_name(), "pass_or_warn_size_factor");
        assert_eq!(CatalogueName::from_output(Tier::Pass, OutputKind::Embedded), None);
        assert_matches!(
            "PASS_Embedded".parse::<CatalogueName>(),
            Err(CompendiumError::UnknownCatalogueName(_))
        );
    }
}
