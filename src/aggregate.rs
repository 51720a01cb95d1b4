use std::collections::{HashMap, HashSet};

use ndarray::{Array2, Axis};
use tracing::{debug, warn};

use crate::dataset::Dataset;
use crate::error::CompendiumError;
use crate::table::MetadataTable;

pub const DEFAULT_EXPERIMENT_FIELD: &str = "experiment";
/// Column listing the space-joined runs summed into an experiment.
pub const PROVENANCE_FIELD: &str = "runs";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentGroup {
    pub experiment: String,
    pub members: Vec<usize>,
}

/// Groups column positions by experiment identifier, in order of first
/// appearance.
pub fn group_by_experiment(
    col_metadata: &MetadataTable,
    experiment_field: &str,
) -> Result<Vec<ExperimentGroup>, CompendiumError> {
    let mut groups: Vec<ExperimentGroup> = Vec::new();
    let mut lookup: HashMap<String, usize> = HashMap::new();
    for row in col_metadata.rows() {
        let experiment = row
            .get(experiment_field)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| {
                CompendiumError::InconsistentGrouping(format!(
                    "run {} has no {experiment_field} value",
                    row.id()
                ))
            })?;
        match lookup.get(experiment) {
            Some(&group) => groups[group].members.push(row.position()),
            None => {
                lookup.insert(experiment.to_string(), groups.len());
                groups.push(ExperimentGroup {
                    experiment: experiment.to_string(),
                    members: vec![row.position()],
                });
            }
        }
    }
    Ok(groups)
}

/// Collapses runs of the same experiment into one column by summing counts.
///
/// Experiment fields come from `curated_experiments` when supplied, otherwise
/// from the dataset's run metadata re-keyed by experiment. Either way the
/// first row per experiment wins. Calls are dropped since they no longer
/// describe the summed columns; row and extra metadata pass through.
pub fn aggregate_experiments(
    dataset: Dataset,
    curated_experiments: Option<&MetadataTable>,
    experiment_field: &str,
) -> Result<Dataset, CompendiumError> {
    let groups = group_by_experiment(dataset.col_metadata(), experiment_field)?;

    let counts = dataset.counts();
    let mut summed = Array2::<f64>::zeros((dataset.n_genes(), groups.len()));
    for (j, group) in groups.iter().enumerate() {
        let mut column = summed.column_mut(j);
        for &member in &group.members {
            column += &counts.index_axis(Axis(1), member);
        }
    }

    let experiment_ids = groups
        .iter()
        .map(|group| group.experiment.clone())
        .collect::<Vec<_>>();
    let provenance = groups
        .iter()
        .map(|group| {
            let runs = group
                .members
                .iter()
                .map(|&member| dataset.sample_ids()[member].as_str())
                .collect::<Vec<_>>();
            Some(runs.join(" "))
        })
        .collect::<Vec<_>>();

    let fields = match curated_experiments {
        Some(curated) => experiment_fields(curated, &experiment_ids),
        None => experiment_fields(
            &experiments_from_runs(dataset.col_metadata(), experiment_field)?,
            &experiment_ids,
        ),
    };
    let col_metadata = fields
        .with_index_name(experiment_field)
        .with_column(PROVENANCE_FIELD, provenance)?;

    debug!(
        runs = dataset.n_samples(),
        experiments = groups.len(),
        "aggregated runs into experiments"
    );

    let (_, _, row_metadata, _, extra_metadata) = dataset.into_parts();
    Dataset::new(summed, None, row_metadata, col_metadata, extra_metadata)
}

/// Re-keys run-level metadata by its experiment field, one row per run in
/// table order. Runs without an experiment are skipped.
pub fn experiments_from_runs(
    runs: &MetadataTable,
    experiment_field: &str,
) -> Result<MetadataTable, CompendiumError> {
    let columns = runs
        .columns()
        .iter()
        .filter(|column| column.as_str() != experiment_field && column.as_str() != PROVENANCE_FIELD)
        .cloned()
        .collect::<Vec<_>>();
    let mut table = MetadataTable::new(experiment_field, columns.clone());
    for row in runs.rows() {
        let Some(experiment) = row
            .get(experiment_field)
            .map(str::trim)
            .filter(|value| !value.is_empty())
        else {
            continue;
        };
        let values = columns
            .iter()
            .map(|column| row.get(column).map(str::to_string))
            .collect();
        table.push_row(experiment, values)?;
    }
    Ok(table)
}

fn experiment_fields(curated: &MetadataTable, experiment_ids: &[String]) -> MetadataTable {
    let wanted = experiment_ids
        .iter()
        .map(String::as_str)
        .collect::<HashSet<_>>();
    let (table, missing) = curated
        .restrict_to(&wanted)
        .dedup_first()
        .reindex(experiment_ids);
    for id in &missing {
        warn!(experiment = %id, "no curated experiment metadata, fields left missing");
    }
    table
}
