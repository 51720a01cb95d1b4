//! On-disk layout of a dataset: five TSV tables plus a JSON manifest, either
//! as loose files in a directory or bundled in one zip archive.

use std::collections::BTreeMap;
use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;
use zip::ZipArchive;
use zip::write::{SimpleFileOptions, ZipWriter};

use crate::dataset::Dataset;
use crate::error::CompendiumError;
use crate::store::Store;
use crate::table::MetadataTable;
use crate::tsv::{self, LabelledMatrix};

pub const METADATA_FILE: &str = "metadata.tsv";
pub const COUNTS_FILE: &str = "assay_counts.tsv";
pub const CALLS_FILE: &str = "assay_calls.tsv";
pub const COL_METADATA_FILE: &str = "col_metadata.tsv";
pub const ROW_METADATA_FILE: &str = "row_metadata.tsv";
pub const MANIFEST_FILE: &str = "manifest.json";

pub const DATASET_FILES: [&str; 5] = [
    METADATA_FILE,
    COUNTS_FILE,
    CALLS_FILE,
    COL_METADATA_FILE,
    ROW_METADATA_FILE,
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    pub files: Vec<String>,
    pub created_at: String,
    pub tool: String,
}

impl Manifest {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            files: DATASET_FILES.iter().map(|file| file.to_string()).collect(),
            created_at: chrono::Utc::now().to_rfc3339(),
            tool: format!("rnaseq-compendium/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    fn check(&self) -> Result<(), CompendiumError> {
        match DATASET_FILES
            .iter()
            .find(|file| !self.files.iter().any(|listed| listed == *file))
        {
            Some(missing) => Err(CompendiumError::ArchiveFormat(format!(
                "manifest of {} does not list {missing}",
                self.name
            ))),
            None => Ok(()),
        }
    }
}

fn fs_err(err: impl ToString) -> CompendiumError {
    CompendiumError::Filesystem(err.to_string())
}

/// Serializes the five tables. A dataset without calls gets a calls table
/// holding only the header of the index column.
pub fn encode_tables(dataset: &Dataset) -> Result<Vec<(&'static str, Vec<u8>)>, CompendiumError> {
    let gene_index = dataset.row_metadata().index_name();

    let mut metadata = MetadataTable::new("key", vec!["value".to_string()]);
    for (key, value) in dataset.extra_metadata() {
        metadata.push_row(key.clone(), vec![Some(value.clone())])?;
    }
    let mut metadata_bytes = Vec::new();
    tsv::write_table(&mut metadata_bytes, &metadata)?;

    let mut counts = Vec::new();
    tsv::write_matrix(
        &mut counts,
        gene_index,
        dataset.gene_ids(),
        dataset.sample_ids(),
        dataset.counts(),
    )?;

    let mut calls = Vec::new();
    match dataset.calls() {
        Some(matrix) => tsv::write_matrix(
            &mut calls,
            gene_index,
            dataset.gene_ids(),
            dataset.sample_ids(),
            matrix,
        )?,
        None => tsv::write_table(&mut calls, &MetadataTable::new(gene_index, Vec::new()))?,
    }

    let mut col_metadata = Vec::new();
    tsv::write_table(&mut col_metadata, dataset.col_metadata())?;
    let mut row_metadata = Vec::new();
    tsv::write_table(&mut row_metadata, dataset.row_metadata())?;

    Ok(vec![
        (METADATA_FILE, metadata_bytes),
        (COUNTS_FILE, counts),
        (CALLS_FILE, calls),
        (COL_METADATA_FILE, col_metadata),
        (ROW_METADATA_FILE, row_metadata),
    ])
}

/// Rebuilds a dataset from the five tables. The extra metadata bag is not
/// restored.
pub fn decode_tables<F>(mut open: F) -> Result<Dataset, CompendiumError>
where
    F: FnMut(&str) -> Result<Vec<u8>, CompendiumError>,
{
    let counts: LabelledMatrix<f64> = tsv::read_matrix(open(COUNTS_FILE)?.as_slice(), COUNTS_FILE)?;
    let row_metadata = tsv::read_table(open(ROW_METADATA_FILE)?.as_slice(), ROW_METADATA_FILE)?;
    let col_metadata = tsv::read_table(open(COL_METADATA_FILE)?.as_slice(), COL_METADATA_FILE)?;

    if counts.row_ids != row_metadata.index() {
        return Err(CompendiumError::ShapeMismatch(
            "assay_counts rows differ from row_metadata".to_string(),
        ));
    }
    if counts.col_ids != col_metadata.index() {
        return Err(CompendiumError::ShapeMismatch(
            "assay_counts columns differ from col_metadata".to_string(),
        ));
    }

    let calls: LabelledMatrix<u8> = tsv::read_matrix(open(CALLS_FILE)?.as_slice(), CALLS_FILE)?;
    let calls = if calls.col_ids.is_empty() && calls.row_ids.is_empty() {
        None
    } else {
        if calls.row_ids != counts.row_ids || calls.col_ids != counts.col_ids {
            return Err(CompendiumError::ShapeMismatch(
                "assay_calls identifiers differ from assay_counts".to_string(),
            ));
        }
        Some(calls.values)
    };

    Dataset::new(
        counts.values,
        calls,
        row_metadata,
        col_metadata,
        BTreeMap::new(),
    )
}

/// Writes the tables and manifest into `dir`, one atomic file at a time.
pub fn write_dir(dataset: &Dataset, dir: &Path, name: &str) -> Result<Manifest, CompendiumError> {
    fs::create_dir_all(dir).map_err(fs_err)?;
    for (file, bytes) in encode_tables(dataset)? {
        Store::write_bytes_atomic(&dir.join(file), &bytes)?;
    }
    let manifest = Manifest::new(name);
    let bytes = serde_json::to_vec_pretty(&manifest).map_err(fs_err)?;
    Store::write_bytes_atomic(&dir.join(MANIFEST_FILE), &bytes)?;
    debug!(name, dir = %dir.display(), "wrote dataset tables");
    Ok(manifest)
}

pub fn read_dir_manifest(dir: &Path) -> Result<Manifest, CompendiumError> {
    let path = dir.join(MANIFEST_FILE);
    let bytes = fs::read(&path)
        .map_err(|err| CompendiumError::ArchiveFormat(format!("{}: {err}", path.display())))?;
    serde_json::from_slice(&bytes).map_err(|err| CompendiumError::ArchiveFormat(err.to_string()))
}

pub fn read_dir(dir: &Path) -> Result<Dataset, CompendiumError> {
    read_dir_manifest(dir)?.check()?;
    decode_tables(|file| fs::read(dir.join(file)).map_err(fs_err))
}

/// Bundles the manifest and the five tables into a zip at `path`.
pub fn write_zip(dataset: &Dataset, path: &Path, name: &str) -> Result<Manifest, CompendiumError> {
    let parent = path
        .parent()
        .ok_or_else(|| CompendiumError::Filesystem("invalid archive path".to_string()))?;
    fs::create_dir_all(parent).map_err(fs_err)?;
    let temp = tempfile::Builder::new()
        .prefix("rnaseq-compendium-zip")
        .tempfile_in(parent)
        .map_err(fs_err)?;

    let manifest = Manifest::new(name);
    {
        let mut zip = ZipWriter::new(temp.as_file());
        let options = SimpleFileOptions::default();
        zip.start_file(MANIFEST_FILE, options).map_err(fs_err)?;
        zip.write_all(&serde_json::to_vec_pretty(&manifest).map_err(fs_err)?)
            .map_err(fs_err)?;
        for (file, bytes) in encode_tables(dataset)? {
            zip.start_file(file, options).map_err(fs_err)?;
            zip.write_all(&bytes).map_err(fs_err)?;
        }
        zip.finish().map_err(fs_err)?;
    }
    temp.persist(path).map_err(fs_err)?;
    debug!(name, path = %path.display(), "wrote dataset archive");
    Ok(manifest)
}

pub fn read_manifest(path: &Path) -> Result<Manifest, CompendiumError> {
    let mut archive = open_zip(path)?;
    let manifest = read_zip_entry(&mut archive, MANIFEST_FILE)?;
    serde_json::from_slice(&manifest).map_err(|err| CompendiumError::ArchiveFormat(err.to_string()))
}

pub fn read_zip(path: &Path) -> Result<Dataset, CompendiumError> {
    let mut archive = open_zip(path)?;
    let manifest: Manifest = serde_json::from_slice(&read_zip_entry(&mut archive, MANIFEST_FILE)?)
        .map_err(|err| CompendiumError::ArchiveFormat(err.to_string()))?;
    manifest.check()?;
    decode_tables(|file| read_zip_entry(&mut archive, file))
}

fn open_zip(path: &Path) -> Result<ZipArchive<fs::File>, CompendiumError> {
    let file = fs::File::open(path)
        .map_err(|err| CompendiumError::Filesystem(format!("open zip {}: {err}", path.display())))?;
    ZipArchive::new(file).map_err(|err| CompendiumError::ArchiveFormat(err.to_string()))
}

fn read_zip_entry(archive: &mut ZipArchive<fs::File>, name: &str) -> Result<Vec<u8>, CompendiumError> {
    let mut entry = archive
        .by_name(name)
        .map_err(|err| CompendiumError::ArchiveFormat(format!("{name}: {err}")))?;
    let mut bytes = Vec::new();
    entry.read_to_end(&mut bytes).map_err(fs_err)?;
    Ok(bytes)
}
