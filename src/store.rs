use std::fs;
use std::hash::Hasher;
use std::path::Path;

use camino::{Utf8Path, Utf8PathBuf};
use directories::BaseDirs;
use fnv::FnvHasher;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::{RunAccession, Species};
use crate::error::CompendiumError;

#[derive(Debug, Clone)]
pub struct Store {
    output_root: Utf8PathBuf,
    cache_root: Utf8PathBuf,
}

impl Store {
    pub fn new(output_dir: &Utf8Path) -> Result<Self, CompendiumError> {
        let output_root = if output_dir.is_absolute() {
            output_dir.to_path_buf()
        } else {
            let cwd =
                std::env::current_dir().map_err(|err| CompendiumError::Filesystem(err.to_string()))?;
            Utf8PathBuf::from_path_buf(cwd)
                .map_err(|_| CompendiumError::Filesystem("invalid project path".to_string()))?
                .join(output_dir)
        };

        let cache_root = BaseDirs::new()
            .and_then(|dirs| {
                Utf8PathBuf::from_path_buf(dirs.home_dir().join(".cache").join("rnaseq-compendium"))
                    .ok()
            })
            .ok_or_else(|| {
                CompendiumError::Filesystem("unable to resolve cache directory".to_string())
            })?;

        Ok(Self {
            output_root,
            cache_root,
        })
    }

    pub fn new_with_paths(output_root: Utf8PathBuf, cache_root: Utf8PathBuf) -> Self {
        Self {
            output_root,
            cache_root,
        }
    }

    pub fn output_root(&self) -> &Utf8Path {
        &self.output_root
    }

    pub fn cache_root(&self) -> &Utf8Path {
        &self.cache_root
    }

    pub fn archive_path(&self, name: &str) -> Utf8PathBuf {
        self.output_root.join("archives").join(format!("{name}.zip"))
    }

    pub fn tables_dir(&self, name: &str) -> Utf8PathBuf {
        self.output_root.join("tables").join(name)
    }

    pub fn embedding_path(&self, name: &str) -> Utf8PathBuf {
        self.output_root.join("embeddings").join(format!("{name}.tsv"))
    }

    pub fn summary_path(&self) -> Utf8PathBuf {
        self.output_root.join("summary.json")
    }

    pub fn cache_input_path(&self, species: &Species, runs: &[RunAccession]) -> Utf8PathBuf {
        // run order must not change the key
        let mut sorted = runs.iter().map(RunAccession::as_str).collect::<Vec<_>>();
        sorted.sort_unstable();
        sorted.dedup();
        let mut hasher = FnvHasher::default();
        for run in &sorted {
            hasher.write(run.as_bytes());
            hasher.write_u8(b'\n');
        }
        self.cache_root
            .join("inputs")
            .join(format!("{species}-{:016x}.zip", hasher.finish()))
    }

    pub fn cache_extra_path(input_path: &Utf8Path) -> Utf8PathBuf {
        input_path.with_extension("json")
    }

    pub fn ensure_output_root(&self) -> Result<(), CompendiumError> {
        fs::create_dir_all(self.output_root.as_std_path())
            .map_err(|err| CompendiumError::Filesystem(err.to_string()))
    }

    pub fn ensure_cache_root(&self) -> Result<(), CompendiumError> {
        fs::create_dir_all(self.cache_root.as_std_path())
            .map_err(|err| CompendiumError::Filesystem(err.to_string()))
    }

    pub fn exists(&self, path: &Utf8Path) -> bool {
        path.as_std_path().exists()
    }

    pub fn write_json<T: Serialize>(path: &Utf8Path, value: &T) -> Result<(), CompendiumError> {
        let content = serde_json::to_vec_pretty(value)
            .map_err(|err| CompendiumError::Filesystem(err.to_string()))?;
        Self::write_bytes_atomic(path.as_std_path(), &content)
    }

    pub fn read_json<T: DeserializeOwned>(path: &Utf8Path) -> Result<T, CompendiumError> {
        let content = fs::read_to_string(path.as_std_path())
            .map_err(|err| CompendiumError::Filesystem(err.to_string()))?;
        serde_json::from_str(&content).map_err(|err| CompendiumError::Filesystem(err.to_string()))
    }

    pub fn write_bytes_atomic(path: &Path, content: &[u8]) -> Result<(), CompendiumError> {
        let parent = path
            .parent()
            .ok_or_else(|| CompendiumError::Filesystem("invalid destination path".to_string()))?;
        fs::create_dir_all(parent).map_err(|err| CompendiumError::Filesystem(err.to_string()))?;
        let mut temp = tempfile::Builder::new()
            .prefix("rnaseq-compendium-file")
            .tempfile_in(parent)
            .map_err(|err| CompendiumError::Filesystem(err.to_string()))?;
        std::io::Write::write_all(&mut temp, content)
            .map_err(|err| CompendiumError::Filesystem(err.to_string()))?;
        temp.persist(path)
            .map_err(|err| CompendiumError::Filesystem(err.to_string()))?;
        Ok(())
    }
}
