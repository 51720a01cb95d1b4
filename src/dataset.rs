use std::collections::{BTreeMap, HashSet};

use ndarray::{Array2, Axis, concatenate};

use crate::error::CompendiumError;
use crate::table::{MetadataRow, MetadataTable};

/// Gene-by-sample matrix with row and column metadata kept in lockstep.
///
/// Construction goes through [`Dataset::new`], which checks the structural
/// invariants; every transform consumes or borrows a dataset and returns a
/// new one.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    counts: Array2<f64>,
    calls: Option<Array2<u8>>,
    row_metadata: MetadataTable,
    col_metadata: MetadataTable,
    extra_metadata: BTreeMap<String, String>,
}

impl Dataset {
    pub fn new(
        counts: Array2<f64>,
        calls: Option<Array2<u8>>,
        row_metadata: MetadataTable,
        col_metadata: MetadataTable,
        extra_metadata: BTreeMap<String, String>,
    ) -> Result<Self, CompendiumError> {
        if counts.nrows() != row_metadata.len() {
            return Err(CompendiumError::ShapeMismatch(format!(
                "counts have {} rows, row metadata has {}",
                counts.nrows(),
                row_metadata.len()
            )));
        }
        if counts.ncols() != col_metadata.len() {
            return Err(CompendiumError::ShapeMismatch(format!(
                "counts have {} columns, column metadata has {}",
                counts.ncols(),
                col_metadata.len()
            )));
        }
        if let Some(calls) = &calls {
            if calls.dim() != counts.dim() {
                return Err(CompendiumError::ShapeMismatch(format!(
                    "calls have shape {:?}, counts have {:?}",
                    calls.dim(),
                    counts.dim()
                )));
            }
        }
        if let Some(id) = col_metadata.first_duplicate() {
            return Err(CompendiumError::DuplicateIdentifier(format!("sample {id}")));
        }
        if let Some(id) = row_metadata.first_duplicate() {
            return Err(CompendiumError::DuplicateIdentifier(format!("gene {id}")));
        }
        Ok(Self {
            counts,
            calls,
            row_metadata,
            col_metadata,
            extra_metadata,
        })
    }

    /// Dataset whose metadata tables carry identifiers only.
    pub fn from_counts(
        counts: Array2<f64>,
        gene_ids: Vec<String>,
        sample_ids: Vec<String>,
    ) -> Result<Self, CompendiumError> {
        Self::new(
            counts,
            None,
            MetadataTable::from_index("gene", gene_ids),
            MetadataTable::from_index("sample", sample_ids),
            BTreeMap::new(),
        )
    }

    pub fn counts(&self) -> &Array2<f64> {
        &self.counts
    }

    pub fn calls(&self) -> Option<&Array2<u8>> {
        self.calls.as_ref()
    }

    pub fn row_metadata(&self) -> &MetadataTable {
        &self.row_metadata
    }

    pub fn col_metadata(&self) -> &MetadataTable {
        &self.col_metadata
    }

    pub fn extra_metadata(&self) -> &BTreeMap<String, String> {
        &self.extra_metadata
    }

    pub fn gene_ids(&self) -> &[String] {
        self.row_metadata.index()
    }

    pub fn sample_ids(&self) -> &[String] {
        self.col_metadata.index()
    }

    pub fn n_genes(&self) -> usize {
        self.counts.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.counts.ncols()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn into_parts(
        self,
    ) -> (
        Array2<f64>,
        Option<Array2<u8>>,
        MetadataTable,
        MetadataTable,
        BTreeMap<String, String>,
    ) {
        (
            self.counts,
            self.calls,
            self.row_metadata,
            self.col_metadata,
            self.extra_metadata,
        )
    }

    pub fn row_sums(&self) -> Vec<f64> {
        self.counts.sum_axis(Axis(1)).to_vec()
    }

    /// `positions` must be strictly increasing so identifiers stay unique.
    pub(crate) fn take_columns(&self, positions: &[usize]) -> Self {
        debug_assert!(positions.windows(2).all(|pair| pair[0] < pair[1]));
        Self {
            counts: self.counts.select(Axis(1), positions),
            calls: self
                .calls
                .as_ref()
                .map(|calls| calls.select(Axis(1), positions)),
            row_metadata: self.row_metadata.clone(),
            col_metadata: self.col_metadata.select(positions),
            extra_metadata: self.extra_metadata.clone(),
        }
    }

    pub(crate) fn take_rows(&self, positions: &[usize]) -> Self {
        debug_assert!(positions.windows(2).all(|pair| pair[0] < pair[1]));
        Self {
            counts: self.counts.select(Axis(0), positions),
            calls: self
                .calls
                .as_ref()
                .map(|calls| calls.select(Axis(0), positions)),
            row_metadata: self.row_metadata.select(positions),
            col_metadata: self.col_metadata.clone(),
            extra_metadata: self.extra_metadata.clone(),
        }
    }

    pub fn subset_columns<P>(&self, predicate: P) -> Self
    where
        P: Fn(&MetadataRow<'_>) -> bool,
    {
        let positions = self
            .col_metadata
            .rows()
            .filter(|row| predicate(row))
            .map(|row| row.position())
            .collect::<Vec<_>>();
        self.take_columns(&positions)
    }

    pub fn subset_rows<P>(&self, predicate: P) -> Self
    where
        P: Fn(&MetadataRow<'_>) -> bool,
    {
        let positions = self
            .row_metadata
            .rows()
            .filter(|row| predicate(row))
            .map(|row| row.position())
            .collect::<Vec<_>>();
        self.take_rows(&positions)
    }

    /// Column-wise union of two datasets over the same genes.
    ///
    /// Calls are kept only when both operands carry them. Extra metadata of
    /// `a` wins on key collisions.
    pub fn concat_columns(a: &Dataset, b: &Dataset) -> Result<Self, CompendiumError> {
        if a.gene_ids() != b.gene_ids() {
            return Err(CompendiumError::ShapeMismatch(
                "row identifiers differ between concatenated datasets".to_string(),
            ));
        }
        let left = a.sample_ids().iter().map(String::as_str).collect::<HashSet<_>>();
        if let Some(id) = b.sample_ids().iter().find(|id| left.contains(id.as_str())) {
            return Err(CompendiumError::DuplicateIdentifier(format!("sample {id}")));
        }
        let counts = concatenate(Axis(1), &[a.counts.view(), b.counts.view()])
            .map_err(|err| CompendiumError::ShapeMismatch(err.to_string()))?;
        let calls = match (&a.calls, &b.calls) {
            (Some(left), Some(right)) => Some(
                concatenate(Axis(1), &[left.view(), right.view()])
                    .map_err(|err| CompendiumError::ShapeMismatch(err.to_string()))?,
            ),
            _ => None,
        };
        let mut extra_metadata = b.extra_metadata.clone();
        extra_metadata.extend(a.extra_metadata.clone());
        Self::new(
            counts,
            calls,
            a.row_metadata.clone(),
            a.col_metadata.append_rows(&b.col_metadata),
            extra_metadata,
        )
    }

    /// Replaces the matrix values, keeping metadata. The shape must not change.
    pub fn with_counts(self, counts: Array2<f64>) -> Result<Self, CompendiumError> {
        if counts.dim() != self.counts.dim() {
            return Err(CompendiumError::ShapeMismatch(format!(
                "replacement counts have shape {:?}, expected {:?}",
                counts.dim(),
                self.counts.dim()
            )));
        }
        Ok(Self { counts, ..self })
    }

    pub fn with_calls(self, calls: Array2<u8>) -> Result<Self, CompendiumError> {
        if calls.dim() != self.counts.dim() {
            return Err(CompendiumError::ShapeMismatch(format!(
                "calls have shape {:?}, counts have {:?}",
                calls.dim(),
                self.counts.dim()
            )));
        }
        Ok(Self {
            calls: Some(calls),
            ..self
        })
    }

    pub fn without_calls(self) -> Self {
        Self {
            calls: None,
            ..self
        }
    }

    pub fn with_row_metadata(self, row_metadata: MetadataTable) -> Result<Self, CompendiumError> {
        Self::new(
            self.counts,
            self.calls,
            row_metadata,
            self.col_metadata,
            self.extra_metadata,
        )
    }

    pub fn with_col_metadata(self, col_metadata: MetadataTable) -> Result<Self, CompendiumError> {
        Self::new(
            self.counts,
            self.calls,
            self.row_metadata,
            col_metadata,
            self.extra_metadata,
        )
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_metadata.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use ndarray::array;

    use super::*;

    fn ids(values: &[&str]) -> Vec<String> {
        values.iter().map(|value| value.to_string()).collect()
    }

    fn small() -> Dataset {
        let mut col = MetadataTable::new("sample", vec!["qc_status".to_string()]);
        col.push_row("SRR1", vec![Some("PASS".to_string())]).unwrap();
        col.push_row("SRR2", vec![Some("FAIL".to_string())]).unwrap();
        col.push_row("SRR3", vec![Some("PASS".to_string())]).unwrap();
        Dataset::new(
            array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]],
            None,
            MetadataTable::from_index("gene", ids(&["g1", "g2"])),
            col,
            BTreeMap::new(),
        )
        .unwrap()
    }

    #[test]
    fn new_rejects_mismatched_rows() {
        let err = Dataset::from_counts(array![[1.0, 2.0]], ids(&["g1", "g2"]), ids(&["a", "b"]))
            .unwrap_err();
        assert_matches!(err, CompendiumError::ShapeMismatch(_));
    }

    #[test]
    fn new_rejects_duplicate_samples() {
        let err = Dataset::from_counts(array![[1.0, 2.0]], ids(&["g1"]), ids(&["a", "a"]))
            .unwrap_err();
        assert_matches!(err, CompendiumError::DuplicateIdentifier(_));
    }

    #[test]
    fn subset_columns_keeps_counts_and_metadata_aligned() {
        let subset = small().subset_columns(|row| row.get("qc_status") == Some("PASS"));
        assert_eq!(subset.sample_ids(), ["SRR1", "SRR3"]);
        assert_eq!(subset.counts(), &array![[1.0, 3.0], [4.0, 6.0]]);
        assert_eq!(subset.col_metadata().len(), subset.n_samples());
    }

    #[test]
    fn subset_rows_by_identifier() {
        let subset = small().subset_rows(|row| row.id() == "g2");
        assert_eq!(subset.gene_ids(), ["g2"]);
        assert_eq!(subset.counts(), &array![[4.0, 5.0, 6.0]]);
    }

    #[test]
    fn concat_requires_matching_rows() {
        let a = Dataset::from_counts(array![[1.0]], ids(&["g1"]), ids(&["a"])).unwrap();
        let b = Dataset::from_counts(array![[2.0]], ids(&["g2"]), ids(&["b"])).unwrap();
        assert_matches!(
            Dataset::concat_columns(&a, &b),
            Err(CompendiumError::ShapeMismatch(_))
        );

        let c = Dataset::from_counts(array![[3.0]], ids(&["g1"]), ids(&["c"])).unwrap();
        let joined = Dataset::concat_columns(&a, &c).unwrap();
        assert_eq!(joined.sample_ids(), ["a", "c"]);
        assert_eq!(joined.counts(), &array![[1.0, 3.0]]);
    }

    #[test]
    fn concat_rejects_shared_sample() {
        let a = Dataset::from_counts(array![[1.0, 2.0]], ids(&["g1"]), ids(&["a", "b"])).unwrap();
        let b = Dataset::from_counts(array![[3.0]], ids(&["g1"]), ids(&["b"])).unwrap();
        assert_matches!(
            Dataset::concat_columns(&a, &b),
            Err(CompendiumError::DuplicateIdentifier(_))
        );
    }

    #[test]
    fn concat_keeps_calls_only_when_both_sides_have_them() {
        let a = Dataset::from_counts(array![[1.0]], ids(&["g1"]), ids(&["a"]))
            .unwrap()
            .with_calls(array![[1u8]])
            .unwrap();
        let b = Dataset::from_counts(array![[0.0]], ids(&["g1"]), ids(&["b"]))
            .unwrap()
            .with_calls(array![[0u8]])
            .unwrap();
        let c = Dataset::from_counts(array![[2.0]], ids(&["g1"]), ids(&["c"])).unwrap();

        let both = Dataset::concat_columns(&a, &b).unwrap();
        assert_eq!(both.calls(), Some(&array![[1u8, 0]]));
        let one = Dataset::concat_columns(&a, &c).unwrap();
        assert!(one.calls().is_none());
    }

    #[test]
    #[should_panic]
    fn take_columns_refuses_repeated_positions() {
        let dataset = Dataset::from_counts(array![[1.0, 2.0]], ids(&["g1"]), ids(&["a", "b"])).unwrap();
        dataset.take_columns(&[0, 0]);
    }

    #[test]
    fn take_rows_keeps_identifiers_unique() {
        let taken = small().take_rows(&[0, 1]);
        assert!(taken.row_metadata().first_duplicate().is_none());
        assert_eq!(taken.gene_ids(), ["g1", "g2"]);
    }

    #[test]
    fn with_counts_rejects_new_shape() {
        let err = small().with_counts(array![[1.0]]).unwrap_err();
        assert_matches!(err, CompendiumError::ShapeMismatch(_));
    }
}
