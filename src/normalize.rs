//! Size-factor and rank normalization of count matrices.
//!
//! Size factors come from a [`SizeFactorEstimator`]; the crate ships the
//! median-of-ratios estimator ([`MedianOfRatios`]) but any implementation can
//! be injected into the pipeline.

use std::fmt;

use ndarray::{Array2, Axis};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::calls::derive_calls;
use crate::dataset::Dataset;
use crate::error::CompendiumError;
use crate::table::MetadataTable;

/// Covariates of the normalization design. Empty means intercept-only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DesignSpec {
    covariates: Vec<String>,
}

impl DesignSpec {
    pub fn intercept_only() -> Self {
        Self::default()
    }

    pub fn with_covariates(covariates: Vec<String>) -> Self {
        Self { covariates }
    }

    pub fn covariates(&self) -> &[String] {
        &self.covariates
    }

    pub fn is_intercept_only(&self) -> bool {
        self.covariates.is_empty()
    }

    /// Every covariate must be a column of the sample metadata.
    pub fn validate(&self, col_metadata: &MetadataTable) -> Result<(), CompendiumError> {
        match self
            .covariates
            .iter()
            .find(|covariate| !col_metadata.has_column(covariate))
        {
            Some(missing) => Err(CompendiumError::MetadataKeyMissing(format!(
                "design covariate {missing}"
            ))),
            None => Ok(()),
        }
    }
}

impl fmt::Display for DesignSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.covariates.is_empty() {
            write!(f, "~1")
        } else {
            write!(f, "~{}", self.covariates.join(" + "))
        }
    }
}

pub trait SizeFactorEstimator: Send + Sync {
    /// One positive scale factor per column of `counts`.
    fn size_factors(
        &self,
        counts: &Array2<f64>,
        col_metadata: &MetadataTable,
        row_metadata: &MetadataTable,
        design: &DesignSpec,
    ) -> Result<Vec<f64>, CompendiumError>;
}

/// DESeq2-style median-of-ratios size factors.
///
/// Genes with a zero in any sample are left out of the geometric-mean
/// reference. A sample whose factor cannot be estimated gets 1.0.
#[derive(Debug, Clone, Copy, Default)]
pub struct MedianOfRatios;

impl SizeFactorEstimator for MedianOfRatios {
    fn size_factors(
        &self,
        counts: &Array2<f64>,
        col_metadata: &MetadataTable,
        _row_metadata: &MetadataTable,
        design: &DesignSpec,
    ) -> Result<Vec<f64>, CompendiumError> {
        design.validate(col_metadata)?;
        let n_samples = counts.ncols();

        let reference = counts
            .axis_iter(Axis(0))
            .enumerate()
            .filter(|(_, row)| row.iter().all(|&value| value > 0.0))
            .map(|(i, row)| {
                let log_mean = row.iter().map(|value| value.ln()).sum::<f64>() / n_samples as f64;
                (i, log_mean.exp())
            })
            .collect::<Vec<_>>();

        if reference.is_empty() {
            if n_samples > 0 {
                warn!("no gene is expressed in every sample, size factors set to 1.0");
            }
            return Ok(vec![1.0; n_samples]);
        }

        let factors = (0..n_samples)
            .map(|j| {
                let ratios = reference
                    .iter()
                    .map(|&(i, geo_mean)| counts[[i, j]] / geo_mean)
                    .collect::<Vec<_>>();
                let factor = median(ratios);
                if factor > 0.0 && factor.is_finite() {
                    factor
                } else {
                    warn!(sample = j, factor, "invalid size factor, using 1.0");
                    1.0
                }
            })
            .collect();
        Ok(factors)
    }
}

fn median(mut values: Vec<f64>) -> f64 {
    values.sort_by(f64::total_cmp);
    let n = values.len();
    if n == 0 {
        return f64::NAN;
    }
    if n % 2 == 0 {
        (values[n / 2 - 1] + values[n / 2]) / 2.0
    } else {
        values[n / 2]
    }
}

/// `log2(count / size_factor + 1)` with factors from `estimator`.
///
/// Metadata, calls and the extra metadata bag are kept as they are.
pub fn size_factor_normalize(
    dataset: Dataset,
    estimator: &dyn SizeFactorEstimator,
    design: &DesignSpec,
) -> Result<Dataset, CompendiumError> {
    let factors = estimator.size_factors(
        dataset.counts(),
        dataset.col_metadata(),
        dataset.row_metadata(),
        design,
    )?;
    if factors.len() != dataset.n_samples() {
        return Err(CompendiumError::Normalization(format!(
            "estimator returned {} size factors for {} samples",
            factors.len(),
            dataset.n_samples()
        )));
    }
    if let Some(bad) = factors.iter().find(|factor| !(**factor > 0.0 && factor.is_finite())) {
        return Err(CompendiumError::Normalization(format!(
            "size factor {bad} is not a positive finite number"
        )));
    }
    debug!(design = %design, samples = factors.len(), "size factor normalization");

    let mut normalized = dataset.counts().clone();
    for (mut column, factor) in normalized.axis_iter_mut(Axis(1)).zip(&factors) {
        column.mapv_inplace(|value| (value / factor + 1.0).log2());
    }
    dataset.with_counts(normalized)
}

/// Fractional ranks of `values`, rank 1 for the largest value.
///
/// Ties share the mean of the ranks they occupy; every rank is divided by the
/// number of values, so results lie in `(0, 1]`.
pub fn fractional_ranks(values: &[f64]) -> Vec<f64> {
    let n = values.len();
    let mut order = (0..n).collect::<Vec<_>>();
    order.sort_by(|&a, &b| values[b].total_cmp(&values[a]));

    let mut ranks = vec![0.0; n];
    let mut start = 0;
    while start < n {
        let mut end = start + 1;
        while end < n && values[order[end]].total_cmp(&values[order[start]]).is_eq() {
            end += 1;
        }
        // positions start..end hold 1-based ranks start+1..=end
        let shared = (start + 1 + end) as f64 / 2.0;
        for &position in &order[start..end] {
            ranks[position] = shared / n as f64;
        }
        start = end;
    }
    ranks
}

/// Column-wise rank normalization.
///
/// Calls are derived from the counts before ranking, with `call_threshold`,
/// and travel with the ranked matrix.
pub fn rank_normalize(dataset: Dataset, call_threshold: f64) -> Result<Dataset, CompendiumError> {
    let dataset = derive_calls(dataset, call_threshold)?;
    let mut ranked = Array2::<f64>::zeros(dataset.counts().dim());
    for (source, mut target) in dataset
        .counts()
        .axis_iter(Axis(1))
        .zip(ranked.axis_iter_mut(Axis(1)))
    {
        let values = source.to_vec();
        for (slot, rank) in target.iter_mut().zip(fractional_ranks(&values)) {
            *slot = rank;
        }
    }
    debug!(
        genes = dataset.n_genes(),
        samples = dataset.n_samples(),
        "rank normalization"
    );
    dataset.with_counts(ranked)
}
