use crate::dataset::Dataset;
use crate::error::CompendiumError;

pub const DEFAULT_CALL_THRESHOLD: f64 = 0.0;
pub const PROBE_ID_FIELD: &str = "probe_id";
pub const FEATURE_ID_FIELD: &str = "feature_id";

/// Presence/absence matrix: 1 where the count is above `threshold`.
pub fn derive_calls(dataset: Dataset, threshold: f64) -> Result<Dataset, CompendiumError> {
    let calls = dataset
        .counts()
        .mapv(|value| u8::from(value > threshold));
    dataset.with_calls(calls)
}

/// Adds `probe_id` and `feature_id`, both equal to the gene identifier.
pub fn annotate_probe_ids(dataset: Dataset) -> Result<Dataset, CompendiumError> {
    let ids = dataset
        .gene_ids()
        .iter()
        .map(|id| Some(id.clone()))
        .collect::<Vec<_>>();
    let row_metadata = dataset
        .row_metadata()
        .clone()
        .with_column(PROBE_ID_FIELD, ids.clone())?
        .with_column(FEATURE_ID_FIELD, ids)?;
    dataset.with_row_metadata(row_metadata)
}

/// Calls from the current counts followed by probe annotation.
pub fn annotate(dataset: Dataset, threshold: f64) -> Result<Dataset, CompendiumError> {
    annotate_probe_ids(derive_calls(dataset, threshold)?)
}
