use std::collections::BTreeMap;
use std::fs::File;
use std::path::Path;
use std::time::{Duration, Instant};

use camino::Utf8Path;
use rayon::prelude::*;
use serde::Serialize;
use tracing::info;

use crate::archive;
use crate::catalogue::{CatalogueEntry, CatalogueSource};
use crate::config::ResolvedConfig;
use crate::domain::{CatalogueName, OutputKind, Tier, output_name};
use crate::error::CompendiumError;
use crate::dataset::Dataset;
use crate::fetch::{FetchClient, SOURCE_KEY, SPECIES_KEY};
use crate::join::JoinReport;
use crate::pipeline::{Pipeline, PipelineInput, PipelineOutput, PipelineResult, fetch_input};
use crate::store::Store;
use crate::table::MetadataTable;
use crate::tsv;

pub const EMBEDDING_INDEX: &str = "point";
pub const EMBEDDING_COLUMNS: [&str; 2] = ["dim1", "dim2"];

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub dry_run: bool,
    pub no_archive: bool,
    pub no_cache: bool,
    /// Also write each dataset as loose TSV tables under `tables/<name>`.
    pub tables: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub species: String,
    pub runs: usize,
    pub input: String,
    pub dry_run: bool,
    pub join: Option<JoinReport>,
    pub outputs: Vec<OutputRecord>,
    pub failures: Vec<FailureRecord>,
    pub summary_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct OutputRecord {
    pub name: String,
    pub tier: Tier,
    pub kind: OutputKind,
    pub catalogue_name: Option<String>,
    pub rows: usize,
    pub columns: usize,
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailureRecord {
    pub name: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogueResult {
    pub entries: Vec<CatalogueEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InspectResult {
    pub name: String,
    pub created_at: String,
    pub tool: String,
    pub genes: usize,
    pub samples: usize,
    pub has_calls: bool,
    pub sample_fields: Vec<String>,
    pub gene_fields: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink: Sync {
    fn event(&self, event: ProgressEvent);
}

fn phase(sink: &dyn ProgressSink, message: impl Into<String>) {
    sink.event(ProgressEvent {
        message: message.into(),
        elapsed: None,
    });
}

#[derive(Clone)]
pub struct App<F: FetchClient> {
    store: Store,
    fetch: F,
}

impl<F: FetchClient> App<F> {
    pub fn new(store: Store, fetch: F) -> Self {
        Self { store, fetch }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn run(
        &self,
        config: &ResolvedConfig,
        options: RunOptions,
        sink: &dyn ProgressSink,
    ) -> Result<RunResult, CompendiumError> {
        let pipeline = Pipeline::new(config.pipeline.clone());
        let mut result = RunResult {
            species: config.species.to_string(),
            runs: config.runs.len(),
            input: "none".to_string(),
            dry_run: options.dry_run,
            join: None,
            outputs: Vec::new(),
            failures: Vec::new(),
            summary_path: None,
        };

        if pipeline.config().is_noop() {
            phase(sink, "phase=Resolve; no tier or output requested");
            return Ok(result);
        }

        let cache_path = self.store.cache_input_path(&config.species, &config.runs);
        if options.dry_run {
            phase(sink, "phase=Resolve; dry run, nothing fetched");
            result.input = if !options.no_cache && self.store.exists(&cache_path) {
                "cache".to_string()
            } else {
                "fetch".to_string()
            };
            result.outputs = pipeline
                .config()
                .branches()
                .into_iter()
                .map(|(tier, kind)| self.planned_record(tier, kind, options))
                .collect();
            return Ok(result);
        }

        phase(sink, "phase=Resolve; loading curated metadata");
        let input = PipelineInput {
            species: config.species.clone(),
            runs: config.runs.clone(),
            curated_runs: config
                .curated_runs
                .as_deref()
                .map(load_table)
                .transpose()?,
            curated_experiments: config
                .curated_experiments
                .as_deref()
                .map(load_table)
                .transpose()?,
        };

        let (raw, curated_runs) = if !options.no_cache && self.store.exists(&cache_path) {
            phase(sink, format!("phase=Fetch; using cached input {cache_path}"));
            result.input = "cache".to_string();
            let raw = self.read_cached_input(config, &cache_path)?;
            let curated = match &input.curated_runs {
                Some(table) => table.clone(),
                None => raw.col_metadata().clone(),
            };
            (raw, curated)
        } else {
            phase(sink, format!("phase=Fetch; {} runs", config.runs.len()));
            result.input = "fetch".to_string();
            let start = Instant::now();
            let (raw, curated) = fetch_input(&self.fetch, &input)?;
            sink.event(ProgressEvent {
                message: format!("fetch.response genes={} runs={}", raw.n_genes(), raw.n_samples()),
                elapsed: Some(start.elapsed()),
            });
            if !options.no_cache {
                self.store.ensure_cache_root()?;
                archive::write_zip(&raw, cache_path.as_std_path(), "input")?;
                Store::write_json(&Store::cache_extra_path(&cache_path), raw.extra_metadata())?;
            }
            (raw, curated)
        };

        phase(sink, "phase=Pipeline; running branches");
        let outcome =
            pipeline.run_with_input(raw, &curated_runs, input.curated_experiments.as_ref())?;
        result.join = outcome.join.clone();
        result.failures = outcome
            .failures
            .iter()
            .map(|failure| FailureRecord {
                name: failure.name.clone(),
                error: failure.error.to_string(),
            })
            .collect();

        if options.no_archive {
            result.outputs = describe_outputs(&outcome, |_| None);
        } else {
            phase(sink, "phase=Store; writing outputs");
            self.store.ensure_output_root()?;
            result.outputs = self.write_outputs(&outcome, options.tables, sink)?;
            let summary_path = self.store.summary_path();
            result.summary_path = Some(summary_path.to_string());
            Store::write_json(&summary_path, &result)?;
        }

        info!(
            outputs = result.outputs.len(),
            failures = result.failures.len(),
            "run finished"
        );
        Ok(result)
    }

    /// Every catalogue name with its archive location, remote when `base_url`
    /// is given and in the local output store otherwise.
    pub fn catalogue(&self, base_url: Option<&str>) -> CatalogueResult {
        let source = match base_url {
            Some(base) => CatalogueSource::Remote(base),
            None => CatalogueSource::Local(&self.store),
        };
        CatalogueResult {
            entries: source.entries(),
        }
    }

    pub fn resolve_catalogue(
        &self,
        name: &str,
        base_url: Option<&str>,
    ) -> Result<CatalogueEntry, CompendiumError> {
        let name = name.parse::<CatalogueName>()?;
        let source = match base_url {
            Some(base) => CatalogueSource::Remote(base),
            None => CatalogueSource::Local(&self.store),
        };
        Ok(source.entry(name))
    }

    /// Summarizes a zip archive or an unpacked table directory.
    pub fn inspect(&self, path: &Path) -> Result<InspectResult, CompendiumError> {
        let (manifest, dataset) = if path.is_dir() {
            (archive::read_dir_manifest(path)?, archive::read_dir(path)?)
        } else {
            (archive::read_manifest(path)?, archive::read_zip(path)?)
        };
        Ok(InspectResult {
            name: manifest.name,
            created_at: manifest.created_at,
            tool: manifest.tool,
            genes: dataset.n_genes(),
            samples: dataset.n_samples(),
            has_calls: dataset.calls().is_some(),
            sample_fields: dataset.col_metadata().columns().to_vec(),
            gene_fields: dataset.row_metadata().columns().to_vec(),
        })
    }

    /// Cached input with the extra metadata the fetch attached, which the
    /// archive itself does not keep.
    fn read_cached_input(
        &self,
        config: &ResolvedConfig,
        cache_path: &Utf8Path,
    ) -> Result<Dataset, CompendiumError> {
        let raw = archive::read_zip(cache_path.as_std_path())?;
        let extra_path = Store::cache_extra_path(cache_path);
        let extra: BTreeMap<String, String> = if self.store.exists(&extra_path) {
            Store::read_json(&extra_path)?
        } else {
            BTreeMap::from([
                (SPECIES_KEY.to_string(), config.species.to_string()),
                (SOURCE_KEY.to_string(), config.source_url.clone()),
            ])
        };
        Ok(extra
            .into_iter()
            .fold(raw, |raw, (key, value)| raw.with_extra(key, value)))
    }

    fn planned_record(&self, tier: Tier, kind: OutputKind, options: RunOptions) -> OutputRecord {
        let name = output_name(tier, kind);
        let path = (!options.no_archive).then(|| self.output_path(&name, kind));
        OutputRecord {
            catalogue_name: CatalogueName::from_output(tier, kind).map(|name| name.to_string()),
            name,
            tier,
            kind,
            rows: 0,
            columns: 0,
            path,
        }
    }

    fn output_path(&self, name: &str, kind: OutputKind) -> String {
        match kind {
            OutputKind::Embedded => self.store.embedding_path(name).to_string(),
            _ => self.store.archive_path(name).to_string(),
        }
    }

    fn write_outputs(
        &self,
        outcome: &PipelineResult,
        write_tables: bool,
        sink: &dyn ProgressSink,
    ) -> Result<Vec<OutputRecord>, CompendiumError> {
        let written = outcome
            .outputs
            .par_iter()
            .map(|(name, output)| -> Result<(String, String), CompendiumError> {
                let path = match output {
                    PipelineOutput::Dataset(dataset) => {
                        let path = self.store.archive_path(name);
                        archive::write_zip(dataset, path.as_std_path(), name)?;
                        if write_tables {
                            let dir = self.store.tables_dir(name);
                            archive::write_dir(dataset, dir.as_std_path(), name)?;
                        }
                        path
                    }
                    PipelineOutput::Embedding(coordinates) => {
                        let path = self.store.embedding_path(name);
                        let ids = (0..coordinates.nrows())
                            .map(|i| i.to_string())
                            .collect::<Vec<_>>();
                        let columns = EMBEDDING_COLUMNS.map(str::to_string);
                        let mut bytes = Vec::new();
                        tsv::write_matrix(&mut bytes, EMBEDDING_INDEX, &ids, &columns, coordinates)?;
                        Store::write_bytes_atomic(path.as_std_path(), &bytes)?;
                        path
                    }
                };
                phase(sink, format!("phase=Store; wrote {path}"));
                Ok((name.clone(), path.to_string()))
            })
            .collect::<Result<Vec<_>, CompendiumError>>()?;

        Ok(describe_outputs(outcome, |name| {
            written
                .iter()
                .find(|(written_name, _)| written_name == name)
                .map(|(_, path)| path.clone())
        }))
    }
}

fn describe_outputs<P>(outcome: &PipelineResult, path_of: P) -> Vec<OutputRecord>
where
    P: Fn(&str) -> Option<String>,
{
    let mut records = Vec::with_capacity(outcome.outputs.len());
    for (tier, kind) in Tier::ALL
        .into_iter()
        .flat_map(|tier| OutputKind::ALL.into_iter().map(move |kind| (tier, kind)))
    {
        let name = output_name(tier, kind);
        let Some(output) = outcome.outputs.get(&name) else {
            continue;
        };
        let (rows, columns) = match output {
            PipelineOutput::Dataset(dataset) => (dataset.n_genes(), dataset.n_samples()),
            PipelineOutput::Embedding(coordinates) => coordinates.dim(),
        };
        records.push(OutputRecord {
            catalogue_name: CatalogueName::from_output(tier, kind).map(|name| name.to_string()),
            path: path_of(&name),
            name,
            tier,
            kind,
            rows,
            columns,
        });
    }
    records
}

/// Reads a curated TSV table, first column as index.
pub fn load_table(path: &Utf8Path) -> Result<MetadataTable, CompendiumError> {
    let file = File::open(path.as_std_path())
        .map_err(|err| CompendiumError::Filesystem(format!("open {path}: {err}")))?;
    tsv::read_table(file, path.as_str())
}
