use std::collections::HashSet;

use ndarray::{Array1, Array2, Axis};
use tracing::debug;

use crate::dataset::Dataset;
use crate::error::CompendiumError;

/// Two-dimensional embedding of points given as matrix rows.
pub trait Embedder: Send + Sync {
    /// Returns one `(x, y)` row per input row, in input order.
    fn embed(&self, points: &Array2<f64>) -> Result<Array2<f64>, CompendiumError>;
}

/// Samples as rows, with repeated count profiles collapsed to their first
/// occurrence.
pub fn distinct_samples(counts: &Array2<f64>) -> Array2<f64> {
    let samples = counts.t();
    let mut seen = HashSet::with_capacity(samples.nrows());
    let keep = samples
        .axis_iter(Axis(0))
        .enumerate()
        .filter(|(_, row)| {
            // +0.0 folds -0.0 into 0.0
            let key = row.iter().map(|v| (v + 0.0).to_bits()).collect::<Vec<_>>();
            seen.insert(key)
        })
        .map(|(i, _)| i)
        .collect::<Vec<_>>();
    samples.select(Axis(0), &keep)
}

/// Embedding coordinates for the distinct samples of `dataset`.
///
/// The result is positional: row `i` is the `i`-th distinct sample in column
/// order, and no identifiers are attached.
pub fn embed_samples(
    dataset: &Dataset,
    embedder: &dyn Embedder,
) -> Result<Array2<f64>, CompendiumError> {
    let points = distinct_samples(dataset.counts());
    debug!(
        samples = dataset.n_samples(),
        distinct = points.nrows(),
        "embedding samples"
    );
    if points.nrows() == 0 {
        return Ok(Array2::zeros((0, 2)));
    }
    let coordinates = embedder.embed(&points)?;
    if coordinates.dim() != (points.nrows(), 2) {
        return Err(CompendiumError::Embedding(format!(
            "embedder returned shape {:?} for {} points",
            coordinates.dim(),
            points.nrows()
        )));
    }
    Ok(coordinates)
}

/// Principal component projection onto the first two axes.
///
/// Counts are `ln(1 + x)` transformed and centred per feature. The leading
/// eigenvectors of the sample Gram matrix are found by power iteration with
/// deflation, so the cost scales with the number of samples squared.
#[derive(Debug, Clone, Copy)]
pub struct PcaEmbedder {
    pub max_iter: usize,
    pub tolerance: f64,
}

impl Default for PcaEmbedder {
    fn default() -> Self {
        Self {
            max_iter: 1000,
            tolerance: 1e-10,
        }
    }
}

impl PcaEmbedder {
    fn leading_eigenpair(&self, gram: &Array2<f64>) -> (f64, Array1<f64>) {
        let n = gram.nrows();
        let mut vector = Array1::from_iter((0..n).map(|i| 1.0 + i as f64));
        unit_normalize(&mut vector);
        let mut value = 0.0;
        for _ in 0..self.max_iter {
            let mut next = gram.dot(&vector);
            let norm = next.dot(&next).sqrt();
            if norm == 0.0 {
                return (0.0, Array1::zeros(n));
            }
            next /= norm;
            let delta = (&next - &vector).mapv(f64::abs).sum();
            vector = next;
            value = vector.dot(&gram.dot(&vector));
            if delta < self.tolerance {
                break;
            }
        }
        // fix the sign so runs are reproducible
        let pivot = vector
            .iter()
            .copied()
            .fold(0.0_f64, |acc, v| if v.abs() > acc.abs() { v } else { acc });
        if pivot < 0.0 {
            vector.mapv_inplace(|v| -v);
        }
        (value, vector)
    }
}

fn unit_normalize(vector: &mut Array1<f64>) {
    let norm = vector.dot(&*vector).sqrt();
    if norm > 0.0 {
        *vector /= norm;
    }
}

impl Embedder for PcaEmbedder {
    fn embed(&self, points: &Array2<f64>) -> Result<Array2<f64>, CompendiumError> {
        let n = points.nrows();
        let mut coordinates = Array2::<f64>::zeros((n, 2));
        if n < 2 {
            return Ok(coordinates);
        }
        let mut centred = points.mapv(f64::ln_1p);
        let means = centred
            .mean_axis(Axis(0))
            .ok_or_else(|| CompendiumError::Embedding("no points to centre".to_string()))?;
        centred -= &means;

        let mut gram = centred.dot(&centred.t());
        for component in 0..2 {
            let (value, vector) = self.leading_eigenpair(&gram);
            if value <= 0.0 || !value.is_finite() {
                break;
            }
            let scale = value.sqrt();
            coordinates
                .column_mut(component)
                .assign(&vector.mapv(|v| v * scale));
            let outer = vector
                .view()
                .insert_axis(Axis(1))
                .dot(&vector.view().insert_axis(Axis(0)));
            gram -= &(outer * value);
        }
        Ok(coordinates)
    }
}
