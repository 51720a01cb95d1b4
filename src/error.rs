use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum CompendiumError {
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("no curated metadata for {0}")]
    MetadataKeyMissing(String),

    #[error("inconsistent grouping: {0}")]
    InconsistentGrouping(String),

    #[error("duplicate identifier: {0}")]
    DuplicateIdentifier(String),

    #[error("invalid run accession: {0}")]
    InvalidRunAccession(String),

    #[error("invalid species name: {0}")]
    InvalidSpecies(String),

    #[error("unknown catalogue name: {0}")]
    #[diagnostic(help("expected one of PASS_Raw, PASS_Agg, PASS_Deseq2, PASS_Rank, WARN_Raw, WARN_Agg, WARN_Deseq2, WARN_Rank"))]
    UnknownCatalogueName(String),

    #[error("fetch request failed: {0}")]
    FetchHttp(String),

    #[error("fetch source returned status {status}: {message}")]
    FetchStatus { status: u16, message: String },

    #[error("failed to parse table {name}: {message}")]
    TableParse { name: String, message: String },

    #[error("invalid archive: {0}")]
    ArchiveFormat(String),

    #[error("normalization failed: {0}")]
    Normalization(String),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("missing config file compendium.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}
