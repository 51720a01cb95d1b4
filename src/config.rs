use std::fs;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use serde::{Deserialize, Serialize};

use crate::aggregate::DEFAULT_EXPERIMENT_FIELD;
use crate::calls::DEFAULT_CALL_THRESHOLD;
use crate::domain::{OutputKind, RunAccession, Species, Tier};
use crate::error::CompendiumError;
use crate::join::MissingMetadataPolicy;
use crate::normalize::DesignSpec;
use crate::pipeline::PipelineConfig;
use crate::qc::{DEFAULT_GENE_CUTOFF, DEFAULT_QC_FIELD};

pub const DEFAULT_CONFIG_FILE: &str = "compendium.json";
pub const DEFAULT_OUTPUT_DIR: &str = "compendium-out";
pub const DEFAULT_SOURCE_URL: &str = "https://example.org/compendium";

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    pub species: String,
    #[serde(default)]
    pub runs: Vec<String>,
    #[serde(default)]
    pub curated_runs: Option<String>,
    #[serde(default)]
    pub curated_experiments: Option<String>,
    #[serde(default)]
    pub tiers: Option<Vec<Tier>>,
    #[serde(default)]
    pub outputs: Option<Vec<OutputKind>>,
    #[serde(default)]
    pub gene_cutoff: Option<f64>,
    #[serde(default)]
    pub call_threshold: Option<f64>,
    #[serde(default)]
    pub design: Vec<String>,
    #[serde(default)]
    pub strict_metadata: bool,
    #[serde(default)]
    pub aggregate_experiments: bool,
    #[serde(default)]
    pub qc_field: Option<String>,
    #[serde(default)]
    pub experiment_field: Option<String>,
    #[serde(default)]
    pub output_dir: Option<String>,
    #[serde(default)]
    pub source_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub species: Species,
    pub runs: Vec<RunAccession>,
    pub curated_runs: Option<Utf8PathBuf>,
    pub curated_experiments: Option<Utf8PathBuf>,
    pub pipeline: PipelineConfig,
    pub output_dir: Utf8PathBuf,
    pub source_url: String,
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, CompendiumError> {
        let config_path = match path {
            Some(path) => PathBuf::from(path),
            None => PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Err(CompendiumError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| CompendiumError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| CompendiumError::ConfigParse(err.to_string()))?;

        Self::resolve_config(config)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, CompendiumError> {
        let schema_version = config.schema_version.unwrap_or(1);
        if schema_version != 1 {
            return Err(CompendiumError::ConfigParse(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let species = config.species.parse::<Species>()?;
        let runs = config
            .runs
            .iter()
            .map(|run| run.parse::<RunAccession>())
            .collect::<Result<Vec<_>, CompendiumError>>()?;

        let gene_cutoff = config.gene_cutoff.unwrap_or(DEFAULT_GENE_CUTOFF);
        if !gene_cutoff.is_finite() {
            return Err(CompendiumError::ConfigParse(
                "gene_cutoff must be a finite number".to_string(),
            ));
        }

        let call_threshold = config.call_threshold.unwrap_or(DEFAULT_CALL_THRESHOLD);
        if !call_threshold.is_finite() {
            return Err(CompendiumError::ConfigParse(
                "call_threshold must be a finite number".to_string(),
            ));
        }

        let pipeline = PipelineConfig {
            tiers: config.tiers.unwrap_or_else(|| Tier::ALL.to_vec()),
            outputs: config.outputs.unwrap_or_else(|| OutputKind::ALL.to_vec()),
            gene_cutoff,
            call_threshold,
            design: DesignSpec::with_covariates(config.design),
            metadata_policy: if config.strict_metadata {
                MissingMetadataPolicy::Strict
            } else {
                MissingMetadataPolicy::Permissive
            },
            qc_field: config
                .qc_field
                .unwrap_or_else(|| DEFAULT_QC_FIELD.to_string()),
            experiment_field: config
                .experiment_field
                .unwrap_or_else(|| DEFAULT_EXPERIMENT_FIELD.to_string()),
            aggregate_experiments: config.aggregate_experiments,
        };

        Ok(ResolvedConfig {
            schema_version,
            species,
            runs,
            curated_runs: config.curated_runs.map(Utf8PathBuf::from),
            curated_experiments: config.curated_experiments.map(Utf8PathBuf::from),
            pipeline,
            output_dir: Utf8PathBuf::from(
                config
                    .output_dir
                    .unwrap_or_else(|| DEFAULT_OUTPUT_DIR.to_string()),
            ),
            source_url: config
                .source_url
                .unwrap_or_else(|| DEFAULT_SOURCE_URL.to_string()),
        })
    }
}
