use std::collections::HashSet;
use std::io::Read;
use std::time::Duration;

use flate2::read::GzDecoder;
use ndarray::Array2;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use tracing::{debug, warn};

use crate::dataset::Dataset;
use crate::domain::{RunAccession, Species};
use crate::error::CompendiumError;
use crate::table::MetadataTable;
use crate::tsv;

pub const SPECIES_KEY: &str = "species";
pub const SOURCE_KEY: &str = "source";

pub trait FetchClient: Send + Sync {
    fn fetch_metadata(&self, species: &Species) -> Result<MetadataTable, CompendiumError>;
    fn fetch(
        &self,
        species: &Species,
        runs: &[RunAccession],
        metadata: &MetadataTable,
    ) -> Result<Dataset, CompendiumError>;
}

/// Reads gzipped TSV files laid out as
/// `<base>/<species>/metadata.tsv.gz` and `<base>/<species>/runs/<run>.tsv.gz`.
#[derive(Clone)]
pub struct HttpFetchClient {
    client: Client,
    base_url: String,
}

impl HttpFetchClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, CompendiumError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("rnaseq-compendium/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| CompendiumError::FetchHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| CompendiumError::FetchHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn metadata_url(&self, species: &Species) -> String {
        format!("{}/{species}/metadata.tsv.gz", self.base_url)
    }

    fn run_url(&self, species: &Species, run: &RunAccession) -> String {
        format!("{}/{species}/runs/{run}.tsv.gz", self.base_url)
    }

    fn get_gzip_text(&self, url: &str) -> Result<String, CompendiumError> {
        debug!(url, "fetching");
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| CompendiumError::FetchHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| format!("request for {url} failed"));
            return Err(CompendiumError::FetchStatus { status, message });
        }
        let bytes = response
            .bytes()
            .map_err(|err| CompendiumError::FetchHttp(err.to_string()))?;
        let mut decoder = GzDecoder::new(bytes.as_ref());
        let mut text = String::new();
        decoder
            .read_to_string(&mut text)
            .map_err(|err| CompendiumError::FetchHttp(format!("{url}: {err}")))?;
        Ok(text)
    }
}

impl FetchClient for HttpFetchClient {
    fn fetch_metadata(&self, species: &Species) -> Result<MetadataTable, CompendiumError> {
        let text = self.get_gzip_text(&self.metadata_url(species))?;
        tsv::read_table(text.as_bytes(), "metadata.tsv.gz")
    }

    fn fetch(
        &self,
        species: &Species,
        runs: &[RunAccession],
        metadata: &MetadataTable,
    ) -> Result<Dataset, CompendiumError> {
        let mut profiles = Vec::with_capacity(runs.len());
        for run in runs {
            let text = self.get_gzip_text(&self.run_url(species, run))?;
            profiles.push((run.clone(), parse_run_counts(&text, run.as_str())?));
        }
        let dataset = assemble_runs(profiles, metadata)?;
        Ok(dataset
            .with_extra(SPECIES_KEY, species.as_str())
            .with_extra(SOURCE_KEY, self.base_url.as_str()))
    }
}

/// Per-run gene counts in file order.
#[derive(Debug, Clone, PartialEq)]
pub struct RunCounts {
    pub genes: Vec<String>,
    pub counts: Vec<f64>,
}

/// Parses a two-column `gene<TAB>count` table with a header line.
pub fn parse_run_counts(text: &str, name: &str) -> Result<RunCounts, CompendiumError> {
    let table = tsv::read_table(text.as_bytes(), name)?;
    if table.columns().len() != 1 {
        return Err(CompendiumError::TableParse {
            name: name.to_string(),
            message: format!("expected 2 columns, found {}", table.columns().len() + 1),
        });
    }
    let mut counts = Vec::with_capacity(table.len());
    for row in table.rows() {
        let cell = table.row_values(row.position())[0].as_deref().unwrap_or("");
        let value = cell
            .parse::<f64>()
            .map_err(|err| CompendiumError::TableParse {
                name: name.to_string(),
                message: format!("gene {}: {err}", row.id()),
            })?;
        if value < 0.0 || !value.is_finite() {
            return Err(CompendiumError::TableParse {
                name: name.to_string(),
                message: format!("gene {}: negative or non-finite count {value}", row.id()),
            });
        }
        counts.push(value);
    }
    Ok(RunCounts {
        genes: table.index().to_vec(),
        counts,
    })
}

/// Builds a gene-by-run dataset. Every run must list the same genes in the
/// same order. Column metadata is taken from `metadata` where a run has a
/// row there.
pub fn assemble_runs(
    profiles: Vec<(RunAccession, RunCounts)>,
    metadata: &MetadataTable,
) -> Result<Dataset, CompendiumError> {
    let genes = profiles
        .first()
        .map(|(_, profile)| profile.genes.clone())
        .unwrap_or_default();
    let mut seen = HashSet::new();
    let mut values = Array2::<f64>::zeros((genes.len(), profiles.len()));
    for (j, (run, profile)) in profiles.iter().enumerate() {
        if !seen.insert(run.as_str()) {
            return Err(CompendiumError::DuplicateIdentifier(format!("run {run}")));
        }
        if profile.genes != genes {
            return Err(CompendiumError::ShapeMismatch(format!(
                "run {run} lists different genes than {}",
                profiles[0].0
            )));
        }
        values
            .column_mut(j)
            .iter_mut()
            .zip(&profile.counts)
            .for_each(|(slot, value)| *slot = *value);
    }

    let run_ids = profiles
        .iter()
        .map(|(run, _)| run.as_str().to_string())
        .collect::<Vec<_>>();
    let (col_metadata, missing) = metadata.dedup_first().reindex(&run_ids);
    for run in &missing {
        warn!(run = %run, "run absent from source metadata");
    }

    let dataset = Dataset::from_counts(values, genes, run_ids)?;
    let index_name = dataset.col_metadata().index_name().to_string();
    dataset.with_col_metadata(col_metadata.with_index_name(index_name))
}
