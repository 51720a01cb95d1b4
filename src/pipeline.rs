//! Composes join, quality tiers, aggregation, annotation and the output
//! transforms into named `<tier>_<kind>` outputs.

use std::collections::BTreeMap;

use ndarray::Array2;
use tracing::{debug, info, warn};

use crate::aggregate::{self, DEFAULT_EXPERIMENT_FIELD};
use crate::calls::{self, DEFAULT_CALL_THRESHOLD};
use crate::dataset::Dataset;
use crate::domain::{OutputKind, RunAccession, Species, Tier, output_name};
use crate::embed::{self, Embedder, PcaEmbedder};
use crate::error::CompendiumError;
use crate::fetch::FetchClient;
use crate::join::{self, JoinReport, MissingMetadataPolicy};
use crate::normalize::{self, DesignSpec, MedianOfRatios, SizeFactorEstimator};
use crate::qc::{self, DEFAULT_GENE_CUTOFF, DEFAULT_QC_FIELD};
use crate::table::MetadataTable;

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub tiers: Vec<Tier>,
    pub outputs: Vec<OutputKind>,
    pub gene_cutoff: f64,
    pub call_threshold: f64,
    pub design: DesignSpec,
    pub metadata_policy: MissingMetadataPolicy,
    pub qc_field: String,
    pub experiment_field: String,
    /// Collapse runs into experiments for every kind except `raw`.
    pub aggregate_experiments: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            tiers: Tier::ALL.to_vec(),
            outputs: OutputKind::ALL.to_vec(),
            gene_cutoff: DEFAULT_GENE_CUTOFF,
            call_threshold: DEFAULT_CALL_THRESHOLD,
            design: DesignSpec::intercept_only(),
            metadata_policy: MissingMetadataPolicy::default(),
            qc_field: DEFAULT_QC_FIELD.to_string(),
            experiment_field: DEFAULT_EXPERIMENT_FIELD.to_string(),
            aggregate_experiments: false,
        }
    }
}

impl PipelineConfig {
    /// Requested `(tier, kind)` pairs in canonical order, duplicates removed.
    pub fn branches(&self) -> Vec<(Tier, OutputKind)> {
        Tier::ALL
            .into_iter()
            .filter(|tier| self.tiers.contains(tier))
            .flat_map(|tier| {
                OutputKind::ALL
                    .into_iter()
                    .filter(|kind| self.outputs.contains(kind))
                    .map(move |kind| (tier, kind))
            })
            .collect()
    }

    pub fn is_noop(&self) -> bool {
        self.tiers.is_empty() || self.outputs.is_empty()
    }

    fn aggregates(&self, kind: OutputKind) -> bool {
        kind.requires_aggregation() || (self.aggregate_experiments && kind != OutputKind::Raw)
    }
}

/// Everything a run needs besides the data source.
#[derive(Debug, Clone)]
pub struct PipelineInput {
    pub species: Species,
    pub runs: Vec<RunAccession>,
    /// Run-keyed curated metadata. Fetched from the source when absent.
    pub curated_runs: Option<MetadataTable>,
    pub curated_experiments: Option<MetadataTable>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PipelineOutput {
    Dataset(Dataset),
    /// Bare coordinates, one row per distinct sample vector.
    Embedding(Array2<f64>),
}

impl PipelineOutput {
    pub fn as_dataset(&self) -> Option<&Dataset> {
        match self {
            PipelineOutput::Dataset(dataset) => Some(dataset),
            PipelineOutput::Embedding(_) => None,
        }
    }

    pub fn as_embedding(&self) -> Option<&Array2<f64>> {
        match self {
            PipelineOutput::Dataset(_) => None,
            PipelineOutput::Embedding(coordinates) => Some(coordinates),
        }
    }
}

#[derive(Debug)]
pub struct BranchFailure {
    pub name: String,
    pub tier: Tier,
    pub kind: OutputKind,
    pub error: CompendiumError,
}

#[derive(Debug, Default)]
pub struct PipelineResult {
    pub outputs: BTreeMap<String, PipelineOutput>,
    pub failures: Vec<BranchFailure>,
    pub join: Option<JoinReport>,
}

impl PipelineResult {
    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty() && self.failures.is_empty()
    }

    pub fn dataset(&self, name: &str) -> Option<&Dataset> {
        self.outputs.get(name).and_then(PipelineOutput::as_dataset)
    }

    pub fn embedding(&self, name: &str) -> Option<&Array2<f64>> {
        self.outputs.get(name).and_then(PipelineOutput::as_embedding)
    }
}

pub struct Pipeline {
    config: PipelineConfig,
    estimator: Box<dyn SizeFactorEstimator>,
    embedder: Box<dyn Embedder>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            estimator: Box::new(MedianOfRatios),
            embedder: Box::new(PcaEmbedder::default()),
        }
    }

    pub fn with_estimator(mut self, estimator: impl SizeFactorEstimator + 'static) -> Self {
        self.estimator = Box::new(estimator);
        self
    }

    pub fn with_embedder(mut self, embedder: impl Embedder + 'static) -> Self {
        self.embedder = Box::new(embedder);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Fetches once and runs every requested branch.
    ///
    /// Nothing is fetched when no tier or no output kind is requested.
    pub fn run<F: FetchClient + ?Sized>(
        &self,
        fetch: &F,
        input: &PipelineInput,
    ) -> Result<PipelineResult, CompendiumError> {
        if self.config.is_noop() {
            debug!("no tier or output requested, skipping fetch");
            return Ok(PipelineResult::default());
        }

        let (raw, curated_runs) = fetch_input(fetch, input)?;
        self.run_with_input(raw, &curated_runs, input.curated_experiments.as_ref())
    }

    /// Runs every requested branch on an already fetched dataset.
    pub fn run_with_input(
        &self,
        raw: Dataset,
        curated_runs: &MetadataTable,
        curated_experiments: Option<&MetadataTable>,
    ) -> Result<PipelineResult, CompendiumError> {
        if self.config.is_noop() {
            return Ok(PipelineResult::default());
        }

        let rekeyed;
        let curated_experiments = match curated_experiments {
            Some(table) => table,
            None => {
                rekeyed =
                    aggregate::experiments_from_runs(curated_runs, &self.config.experiment_field)?;
                &rekeyed
            }
        };
        let (joined, report) = join::join_curated(raw, curated_runs, self.config.metadata_policy)?;
        let mut result = PipelineResult {
            join: Some(report),
            ..PipelineResult::default()
        };

        let branches = self.config.branches();
        for tier in Tier::ALL {
            if !branches.iter().any(|(t, _)| *t == tier) {
                continue;
            }
            let tiered = qc::filter_tier(&joined, tier, &self.config.qc_field);
            for kind in branches
                .iter()
                .filter(|(t, _)| *t == tier)
                .map(|(_, kind)| *kind)
            {
                let name = output_name(tier, kind);
                match self.branch(&tiered, kind, curated_experiments) {
                    Ok(output) => {
                        debug!(output = %name, "branch finished");
                        result.outputs.insert(name, output);
                    }
                    Err(error) => {
                        warn!(output = %name, %error, "branch failed");
                        result.failures.push(BranchFailure {
                            name,
                            tier,
                            kind,
                            error,
                        });
                    }
                }
            }
        }

        info!(
            outputs = result.outputs.len(),
            failures = result.failures.len(),
            "pipeline finished"
        );
        Ok(result)
    }

    fn branch(
        &self,
        tiered: &Dataset,
        kind: OutputKind,
        curated_experiments: &MetadataTable,
    ) -> Result<PipelineOutput, CompendiumError> {
        let staged = if self.config.aggregates(kind) {
            aggregate::aggregate_experiments(
                tiered.clone(),
                Some(curated_experiments),
                &self.config.experiment_field,
            )?
        } else {
            tiered.clone()
        };
        let active = qc::filter_active_genes(&staged, self.config.gene_cutoff);
        let threshold = self.config.call_threshold;

        let output = match kind {
            OutputKind::Raw | OutputKind::Aggregated => {
                PipelineOutput::Dataset(calls::annotate(active, threshold)?)
            }
            OutputKind::SizeFactor => {
                let annotated = calls::annotate(active, threshold)?;
                PipelineOutput::Dataset(normalize::size_factor_normalize(
                    annotated,
                    self.estimator.as_ref(),
                    &self.config.design,
                )?)
            }
            OutputKind::Rank => {
                let annotated = calls::annotate_probe_ids(active)?;
                PipelineOutput::Dataset(normalize::rank_normalize(annotated, threshold)?)
            }
            OutputKind::Embedded => {
                PipelineOutput::Embedding(embed::embed_samples(&active, self.embedder.as_ref())?)
            }
        };
        Ok(output)
    }
}

/// Fetches the raw dataset once, fetching source metadata first when no
/// curated run table was supplied. Returns the dataset with the run table
/// it was fetched against.
pub fn fetch_input<F: FetchClient + ?Sized>(
    fetch: &F,
    input: &PipelineInput,
) -> Result<(Dataset, MetadataTable), CompendiumError> {
    let curated_runs = match &input.curated_runs {
        Some(table) => table.clone(),
        None => fetch.fetch_metadata(&input.species)?,
    };
    let raw = fetch.fetch(&input.species, &input.runs, &curated_runs)?;
    info!(
        species = %input.species,
        genes = raw.n_genes(),
        runs = raw.n_samples(),
        "fetched raw counts"
    );
    Ok((raw, curated_runs))
}
