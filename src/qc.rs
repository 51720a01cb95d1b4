use serde::Serialize;
use tracing::debug;

use crate::dataset::Dataset;
use crate::domain::Tier;

pub const DEFAULT_QC_FIELD: &str = "qc_status";
pub const DEFAULT_GENE_CUTOFF: f64 = 10.0;

/// Severity class of a quality-control status string.
///
/// Source-specific values are classified by prefix (`PASS_...`,
/// `WARN_...`); anything else, including a missing status, fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QcStatus {
    Pass,
    Warn,
    Fail,
}

impl QcStatus {
    pub fn classify(status: Option<&str>) -> Self {
        match status.map(str::trim) {
            Some(value) if value.starts_with("PASS") => QcStatus::Pass,
            Some(value) if value.starts_with("WARN") => QcStatus::Warn,
            _ => QcStatus::Fail,
        }
    }

    pub fn admitted_by(&self, tier: Tier) -> bool {
        match tier {
            Tier::Pass => matches!(self, QcStatus::Pass),
            Tier::PassOrWarn => matches!(self, QcStatus::Pass | QcStatus::Warn),
        }
    }
}

/// Columns whose QC status is admitted by `tier`.
pub fn filter_tier(dataset: &Dataset, tier: Tier, qc_field: &str) -> Dataset {
    let filtered =
        dataset.subset_columns(|row| QcStatus::classify(row.get(qc_field)).admitted_by(tier));
    debug!(
        tier = %tier,
        kept = filtered.n_samples(),
        total = dataset.n_samples(),
        "quality filter"
    );
    filtered
}

/// Keeps genes whose total count across all samples is strictly above
/// `cutoff`.
pub fn filter_active_genes(dataset: &Dataset, cutoff: f64) -> Dataset {
    let sums = dataset.row_sums();
    let positions = sums
        .iter()
        .enumerate()
        .filter(|(_, sum)| **sum > cutoff)
        .map(|(i, _)| i)
        .collect::<Vec<_>>();
    debug!(
        cutoff,
        kept = positions.len(),
        total = dataset.n_genes(),
        "gene activity filter"
    );
    dataset.take_rows(&positions)
}
