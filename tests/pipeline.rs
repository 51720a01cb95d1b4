use std::sync::Mutex;

use approx::assert_abs_diff_eq;
use assert_matches::assert_matches;
use ndarray::{Array2, array};

use rnaseq_compendium::aggregate::PROVENANCE_FIELD;
use rnaseq_compendium::calls::{FEATURE_ID_FIELD, PROBE_ID_FIELD};
use rnaseq_compendium::dataset::Dataset;
use rnaseq_compendium::domain::{OutputKind, RunAccession, Species, Tier};
use rnaseq_compendium::embed::Embedder;
use rnaseq_compendium::error::CompendiumError;
use rnaseq_compendium::fetch::FetchClient;
use rnaseq_compendium::join::MissingMetadataPolicy;
use rnaseq_compendium::normalize::{DesignSpec, SizeFactorEstimator};
use rnaseq_compendium::pipeline::{Pipeline, PipelineConfig, PipelineInput, fetch_input};
use rnaseq_compendium::table::MetadataTable;

struct MockFetch {
    raw: Dataset,
    curated: MetadataTable,
    metadata_calls: Mutex<usize>,
    fetch_calls: Mutex<usize>,
}

impl MockFetch {
    fn new(raw: Dataset, curated: MetadataTable) -> Self {
        Self {
            raw,
            curated,
            metadata_calls: Mutex::new(0),
            fetch_calls: Mutex::new(0),
        }
    }

    fn metadata_calls(&self) -> usize {
        *self.metadata_calls.lock().unwrap()
    }

    fn fetch_calls(&self) -> usize {
        *self.fetch_calls.lock().unwrap()
    }
}

impl FetchClient for MockFetch {
    fn fetch_metadata(&self, _species: &Species) -> Result<MetadataTable, CompendiumError> {
        *self.metadata_calls.lock().unwrap() += 1;
        Ok(self.curated.clone())
    }

    fn fetch(
        &self,
        _species: &Species,
        _runs: &[RunAccession],
        _metadata: &MetadataTable,
    ) -> Result<Dataset, CompendiumError> {
        *self.fetch_calls.lock().unwrap() += 1;
        Ok(self.raw.clone())
    }
}

struct UnitFactors;

impl SizeFactorEstimator for UnitFactors {
    fn size_factors(
        &self,
        counts: &Array2<f64>,
        _col_metadata: &MetadataTable,
        _row_metadata: &MetadataTable,
        _design: &DesignSpec,
    ) -> Result<Vec<f64>, CompendiumError> {
        Ok(vec![1.0; counts.ncols()])
    }
}

/// Places every point on the diagonal at its row index.
struct IndexEmbedder;

impl Embedder for IndexEmbedder {
    fn embed(&self, points: &Array2<f64>) -> Result<Array2<f64>, CompendiumError> {
        Ok(Array2::from_shape_fn((points.nrows(), 2), |(i, _)| i as f64))
    }
}

fn ids(values: &[&str]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

fn raw_counts() -> Dataset {
    Dataset::from_counts(
        array![[5.0, 3.0, 0.0], [0.0, 0.0, 0.0], [1.0, 2.0, 4.0]],
        ids(&["g1", "g2", "g3"]),
        ids(&["SRR1", "SRR2", "SRR3"]),
    )
    .unwrap()
}

fn curated(rows: &[(&str, Option<&str>, Option<&str>)]) -> MetadataTable {
    let mut table = MetadataTable::new("run", ids(&["qc_status", "experiment"]));
    for (run, qc, experiment) in rows {
        table
            .push_row(
                *run,
                vec![qc.map(str::to_string), experiment.map(str::to_string)],
            )
            .unwrap();
    }
    table
}

fn all_pass() -> MetadataTable {
    curated(&[
        ("SRR1", Some("PASS"), Some("E1")),
        ("SRR2", Some("PASS_lowdepth"), Some("E1")),
        ("SRR3", Some("PASS"), Some("E2")),
    ])
}

fn input() -> PipelineInput {
    PipelineInput {
        species: "mus_musculus".parse().unwrap(),
        runs: vec![
            "SRR1".parse().unwrap(),
            "SRR2".parse().unwrap(),
            "SRR3".parse().unwrap(),
        ],
        curated_runs: None,
        curated_experiments: None,
    }
}

fn config(tiers: &[Tier], outputs: &[OutputKind]) -> PipelineConfig {
    PipelineConfig {
        tiers: tiers.to_vec(),
        outputs: outputs.to_vec(),
        gene_cutoff: 0.0,
        ..PipelineConfig::default()
    }
}

fn assert_consistent(dataset: &Dataset) {
    assert_eq!(dataset.counts().nrows(), dataset.row_metadata().len());
    assert_eq!(dataset.counts().ncols(), dataset.col_metadata().len());
    assert!(dataset.col_metadata().first_duplicate().is_none());
    if let Some(calls) = dataset.calls() {
        assert_eq!(calls.dim(), dataset.counts().dim());
    }
}

#[test]
fn three_runs_two_experiments_end_to_end() {
    let fetch = MockFetch::new(raw_counts(), all_pass());
    let pipeline = Pipeline::new(config(
        &[Tier::Pass],
        &[OutputKind::Raw, OutputKind::Aggregated],
    ));

    let result = pipeline.run(&fetch, &input()).unwrap();
    assert!(result.failures.is_empty());
    assert_eq!(result.outputs.len(), 2);

    let raw = result.dataset("pass_raw").unwrap();
    assert_eq!(raw.sample_ids(), &["SRR1", "SRR2", "SRR3"]);
    assert_eq!(raw.gene_ids(), &["g1", "g3"]);
    assert_eq!(raw.calls(), Some(&array![[1u8, 1, 0], [1, 1, 1]]));
    assert_eq!(raw.row_metadata().get(1, PROBE_ID_FIELD), Some("g3"));
    assert_eq!(raw.row_metadata().get(1, FEATURE_ID_FIELD), Some("g3"));

    let aggregated = result.dataset("pass_aggregated").unwrap();
    assert_eq!(aggregated.sample_ids(), &["E1", "E2"]);
    assert_eq!(aggregated.counts(), &array![[8.0, 0.0], [3.0, 4.0]]);
    assert_eq!(
        aggregated.col_metadata().get(0, PROVENANCE_FIELD),
        Some("SRR1 SRR2")
    );
    assert_eq!(aggregated.col_metadata().get(1, PROVENANCE_FIELD), Some("SRR3"));
    assert_eq!(aggregated.calls(), Some(&array![[1u8, 0], [1, 1]]));

    assert_consistent(raw);
    assert_consistent(aggregated);
    assert_eq!(fetch.fetch_calls(), 1);
    assert_eq!(fetch.metadata_calls(), 1);
}

#[test]
fn nothing_requested_skips_the_fetch() {
    let fetch = MockFetch::new(raw_counts(), all_pass());

    let no_outputs = Pipeline::new(config(&Tier::ALL, &[]));
    assert!(no_outputs.run(&fetch, &input()).unwrap().is_empty());

    let no_tiers = Pipeline::new(config(&[], &OutputKind::ALL));
    assert!(no_tiers.run(&fetch, &input()).unwrap().is_empty());

    assert_eq!(fetch.fetch_calls(), 0);
    assert_eq!(fetch.metadata_calls(), 0);
}

#[test]
fn supplied_curated_table_skips_metadata_fetch() {
    let fetch = MockFetch::new(raw_counts(), MetadataTable::new("run", Vec::new()));
    let mut input = input();
    input.curated_runs = Some(all_pass());

    let pipeline = Pipeline::new(PipelineConfig::default()).with_embedder(IndexEmbedder);
    let result = pipeline.run(&fetch, &input).unwrap();
    assert_eq!(result.outputs.len(), 10);
    assert_eq!(fetch.fetch_calls(), 1);
    assert_eq!(fetch.metadata_calls(), 0);
}

#[test]
fn fetch_input_returns_the_table_it_fetched_against() {
    let fetch = MockFetch::new(raw_counts(), all_pass());
    let (raw, table) = fetch_input(&fetch, &input()).unwrap();
    assert_eq!(raw.n_samples(), 3);
    assert_eq!(table, all_pass());
    assert_eq!(fetch.metadata_calls(), 1);

    let mut supplied = input();
    supplied.curated_runs = Some(curated(&[("SRR1", Some("PASS"), Some("E9"))]));
    let (_, table) = fetch_input(&fetch, &supplied).unwrap();
    assert_eq!(table.index(), ["SRR1"]);
    assert_eq!(fetch.metadata_calls(), 1);
    assert_eq!(fetch.fetch_calls(), 2);
}

#[test]
fn tiers_follow_quality_status() {
    let table = curated(&[
        ("SRR1", Some("PASS"), Some("E1")),
        ("SRR2", Some("WARN_rRNA"), Some("E1")),
        ("SRR3", Some("FAIL"), Some("E2")),
    ]);
    let pipeline = Pipeline::new(config(&Tier::ALL, &[OutputKind::Raw]));
    let result = pipeline.run_with_input(raw_counts(), &table, None).unwrap();

    assert_eq!(result.dataset("pass_raw").unwrap().sample_ids(), &["SRR1"]);
    assert_eq!(
        result.dataset("pass_or_warn_raw").unwrap().sample_ids(),
        &["SRR1", "SRR2"]
    );
}

#[test]
fn failing_branch_is_recorded_and_others_finish() {
    let mut config = config(&Tier::ALL, &[OutputKind::Raw, OutputKind::SizeFactor]);
    config.design = DesignSpec::with_covariates(vec!["batch".to_string()]);
    let pipeline = Pipeline::new(config);

    let result = pipeline
        .run_with_input(raw_counts(), &all_pass(), None)
        .unwrap();
    assert!(result.dataset("pass_raw").is_some());
    assert!(result.dataset("pass_or_warn_raw").is_some());
    assert_eq!(result.failures.len(), 2);
    for failure in &result.failures {
        assert_eq!(failure.kind, OutputKind::SizeFactor);
        assert_matches!(failure.error, CompendiumError::MetadataKeyMissing(_));
    }
}

#[test]
fn missing_experiment_only_fails_aggregated_branches() {
    let table = curated(&[
        ("SRR1", Some("PASS"), Some("E1")),
        ("SRR2", Some("PASS"), None),
        ("SRR3", Some("PASS"), Some("E2")),
    ]);
    let pipeline = Pipeline::new(config(
        &[Tier::Pass],
        &[OutputKind::Raw, OutputKind::Aggregated],
    ));
    let result = pipeline.run_with_input(raw_counts(), &table, None).unwrap();

    assert!(result.dataset("pass_raw").is_some());
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].name, "pass_aggregated");
    assert_matches!(
        result.failures[0].error,
        CompendiumError::InconsistentGrouping(_)
    );
}

#[test]
fn strict_policy_rejects_unannotated_runs() {
    let table = curated(&[
        ("SRR1", Some("PASS"), Some("E1")),
        ("SRR2", Some("PASS"), Some("E1")),
    ]);
    let mut config = config(&Tier::ALL, &[OutputKind::Raw]);
    config.metadata_policy = MissingMetadataPolicy::Strict;

    let err = Pipeline::new(config)
        .run_with_input(raw_counts(), &table, None)
        .unwrap_err();
    assert_matches!(err, CompendiumError::MetadataKeyMissing(_));
}

#[test]
fn permissive_policy_reports_and_drops_unannotated_runs_from_tiers() {
    let table = curated(&[
        ("SRR1", Some("PASS"), Some("E1")),
        ("SRR2", Some("PASS"), Some("E1")),
    ]);
    let result = Pipeline::new(config(&[Tier::PassOrWarn], &[OutputKind::Raw]))
        .run_with_input(raw_counts(), &table, None)
        .unwrap();

    let report = result.join.as_ref().unwrap();
    assert_eq!(report.missing, vec!["SRR3".to_string()]);
    let raw = result.dataset("pass_or_warn_raw").unwrap();
    assert_eq!(raw.sample_ids(), &["SRR1", "SRR2"]);
}

#[test]
fn size_factor_and_rank_outputs() {
    let pipeline = Pipeline::new(config(
        &[Tier::Pass],
        &[OutputKind::SizeFactor, OutputKind::Rank],
    ))
    .with_estimator(UnitFactors);
    let result = pipeline
        .run_with_input(raw_counts(), &all_pass(), None)
        .unwrap();

    let normalized = result.dataset("pass_size_factor").unwrap();
    assert_abs_diff_eq!(normalized.counts()[[0, 0]], 6f64.log2(), epsilon = 1e-12);
    assert_abs_diff_eq!(normalized.counts()[[1, 2]], 5f64.log2(), epsilon = 1e-12);
    assert_eq!(normalized.calls(), Some(&array![[1u8, 1, 0], [1, 1, 1]]));

    let ranked = result.dataset("pass_rank").unwrap();
    assert_eq!(ranked.counts(), &array![[0.5, 0.5, 1.0], [1.0, 1.0, 0.5]]);
    assert!(ranked.counts().iter().all(|&v| v > 0.0 && v <= 1.0));
    assert_eq!(ranked.calls(), Some(&array![[1u8, 1, 0], [1, 1, 1]]));
    assert_eq!(ranked.row_metadata().get(0, PROBE_ID_FIELD), Some("g1"));

    assert_consistent(normalized);
    assert_consistent(ranked);
}

#[test]
fn embedding_has_one_row_per_distinct_sample() {
    let raw = Dataset::from_counts(
        array![[5.0, 5.0, 1.0], [2.0, 2.0, 9.0]],
        ids(&["g1", "g2"]),
        ids(&["SRR1", "SRR2", "SRR3"]),
    )
    .unwrap();
    let pipeline =
        Pipeline::new(config(&[Tier::Pass], &[OutputKind::Embedded])).with_embedder(IndexEmbedder);
    let result = pipeline.run_with_input(raw, &all_pass(), None).unwrap();

    let coordinates = result.embedding("pass_embedded").unwrap();
    assert_eq!(coordinates.dim(), (2, 2));
    assert!(result.dataset("pass_embedded").is_none());
}

#[test]
fn aggregation_switch_uses_curated_experiments() {
    let mut experiments = MetadataTable::new("experiment", ids(&["tissue"]));
    experiments
        .push_row("E2", vec![Some("liver".to_string())])
        .unwrap();
    experiments
        .push_row("E1", vec![Some("brain".to_string())])
        .unwrap();
    experiments
        .push_row("E1", vec![Some("ignored".to_string())])
        .unwrap();

    let mut config = config(&[Tier::Pass], &[OutputKind::Raw, OutputKind::Rank]);
    config.aggregate_experiments = true;
    let result = Pipeline::new(config)
        .run_with_input(raw_counts(), &all_pass(), Some(&experiments))
        .unwrap();

    assert_eq!(result.dataset("pass_raw").unwrap().n_samples(), 3);
    let ranked = result.dataset("pass_rank").unwrap();
    assert_eq!(ranked.sample_ids(), &["E1", "E2"]);
    assert_eq!(ranked.col_metadata().get(0, "tissue"), Some("brain"));
    assert_eq!(ranked.col_metadata().get(1, "tissue"), Some("liver"));
}

#[test]
fn run_table_supplies_experiment_fields_first_row_wins() {
    let table = all_pass()
        .with_column(
            "tissue",
            vec![
                Some("liver".to_string()),
                Some("lung".to_string()),
                Some("gut".to_string()),
            ],
        )
        .unwrap();
    let pipeline = Pipeline::new(config(&[Tier::Pass], &[OutputKind::Aggregated]));
    let result = pipeline.run_with_input(raw_counts(), &table, None).unwrap();

    let aggregated = result.dataset("pass_aggregated").unwrap();
    assert_eq!(aggregated.sample_ids(), &["E1", "E2"]);
    assert_eq!(aggregated.col_metadata().get(0, "tissue"), Some("liver"));
    assert_eq!(aggregated.col_metadata().get(1, "tissue"), Some("gut"));
    assert_eq!(aggregated.col_metadata().get(0, "qc_status"), Some("PASS"));
}

#[test]
fn empty_tier_yields_empty_outputs() {
    let table = curated(&[
        ("SRR1", Some("FAIL"), Some("E1")),
        ("SRR2", Some("FAIL"), Some("E1")),
        ("SRR3", None, Some("E2")),
    ]);
    let pipeline = Pipeline::new(PipelineConfig::default()).with_embedder(IndexEmbedder);
    let result = pipeline.run_with_input(raw_counts(), &table, None).unwrap();

    assert!(result.failures.is_empty(), "{:?}", result.failures);
    let raw = result.dataset("pass_raw").unwrap();
    assert_eq!(raw.n_samples(), 0);
    assert_eq!(raw.n_genes(), 0);
    assert_eq!(result.embedding("pass_embedded").unwrap().dim(), (0, 2));
}
