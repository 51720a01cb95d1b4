use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::dataset::Dataset;
use crate::error::CompendiumError;
use crate::table::MetadataTable;

/// What to do with a sample that has no curated metadata row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingMetadataPolicy {
    /// Keep the sample with all fields missing and log a warning.
    #[default]
    Permissive,
    /// Fail with [`CompendiumError::MetadataKeyMissing`].
    Strict,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct JoinReport {
    pub matched: usize,
    pub missing: Vec<String>,
    pub duplicates_dropped: usize,
}

/// Replaces the dataset's column metadata with curated rows.
///
/// The curated table is restricted to the dataset's samples and deduplicated
/// with the first row of each identifier winning, then re-indexed to the
/// column order of `counts`.
pub fn join_curated(
    dataset: Dataset,
    curated: &MetadataTable,
    policy: MissingMetadataPolicy,
) -> Result<(Dataset, JoinReport), CompendiumError> {
    let sample_ids = dataset.sample_ids().to_vec();
    let wanted = sample_ids.iter().map(String::as_str).collect::<HashSet<_>>();
    let restricted = curated.restrict_to(&wanted);
    let deduplicated = restricted.dedup_first();
    let duplicates_dropped = restricted.len() - deduplicated.len();

    let (joined, missing) = deduplicated.reindex(&sample_ids);
    if !missing.is_empty() {
        match policy {
            MissingMetadataPolicy::Strict => {
                return Err(CompendiumError::MetadataKeyMissing(missing.join(", ")));
            }
            MissingMetadataPolicy::Permissive => {
                for id in &missing {
                    warn!(sample = %id, "no curated metadata, fields left missing");
                }
            }
        }
    }
    debug!(
        matched = sample_ids.len() - missing.len(),
        duplicates_dropped, "joined curated metadata"
    );

    let report = JoinReport {
        matched: sample_ids.len() - missing.len(),
        missing,
        duplicates_dropped,
    };
    let index_name = dataset.col_metadata().index_name().to_string();
    let dataset = dataset.with_col_metadata(joined.with_index_name(index_name))?;
    Ok((dataset, report))
}
