use assert_matches::assert_matches;

use rnaseq_compendium::config::ConfigLoader;
use rnaseq_compendium::domain::{OutputKind, Tier};
use rnaseq_compendium::error::CompendiumError;
use rnaseq_compendium::join::MissingMetadataPolicy;

fn write_config(content: &str) -> (tempfile::TempDir, String) {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("compendium.json");
    std::fs::write(&path, content).unwrap();
    let path = path.to_string_lossy().into_owned();
    (temp, path)
}

#[test]
fn resolves_full_config_file() {
    let (_temp, path) = write_config(
        r#"{
            "schema_version": 1,
            "species": "homo_sapiens",
            "runs": ["SRR0000001", "ERR0000002"],
            "curated_runs": "curated/runs.tsv",
            "curated_experiments": "curated/experiments.tsv",
            "tiers": ["pass_or_warn"],
            "outputs": ["raw", "rank"],
            "gene_cutoff": 2.5,
            "call_threshold": 1.0,
            "design": ["batch"],
            "strict_metadata": true,
            "aggregate_experiments": true,
            "output_dir": "out",
            "source_url": "https://data.example.org"
        }"#,
    );

    let resolved = ConfigLoader::resolve(Some(&path)).unwrap();
    assert_eq!(resolved.runs.len(), 2);
    assert_eq!(resolved.pipeline.tiers, vec![Tier::PassOrWarn]);
    assert_eq!(
        resolved.pipeline.outputs,
        vec![OutputKind::Raw, OutputKind::Rank]
    );
    assert_eq!(resolved.pipeline.gene_cutoff, 2.5);
    assert_eq!(resolved.pipeline.call_threshold, 1.0);
    assert_eq!(
        resolved.pipeline.metadata_policy,
        MissingMetadataPolicy::Strict
    );
    assert!(resolved.pipeline.aggregate_experiments);
    assert_eq!(resolved.curated_runs.unwrap(), "curated/runs.tsv");
    assert_eq!(resolved.source_url, "https://data.example.org");
}

#[test]
fn explicit_missing_file_is_a_read_error() {
    let temp = tempfile::tempdir().unwrap();
    let path = temp.path().join("absent.json");
    let err = ConfigLoader::resolve(Some(path.to_str().unwrap())).unwrap_err();
    assert_matches!(err, CompendiumError::ConfigRead(_));
}

#[test]
fn malformed_json_is_a_parse_error() {
    let (_temp, path) = write_config(r#"{"species": "homo_sapiens", "runs": ["#);
    let err = ConfigLoader::resolve(Some(&path)).unwrap_err();
    assert_matches!(err, CompendiumError::ConfigParse(_));
}

#[test]
fn unknown_output_kind_is_a_parse_error() {
    let (_temp, path) = write_config(r#"{"species": "homo_sapiens", "outputs": ["tpm"]}"#);
    let err = ConfigLoader::resolve(Some(&path)).unwrap_err();
    assert_matches!(err, CompendiumError::ConfigParse(_));
}

#[test]
fn invalid_accession_is_rejected() {
    let (_temp, path) = write_config(r#"{"species": "homo_sapiens", "runs": ["GSM12"]}"#);
    let err = ConfigLoader::resolve(Some(&path)).unwrap_err();
    assert_matches!(err, CompendiumError::InvalidRunAccession(_));
}

#[test]
fn empty_switch_lists_are_kept() {
    let (_temp, path) = write_config(r#"{"species": "homo_sapiens", "tiers": []}"#);
    let resolved = ConfigLoader::resolve(Some(&path)).unwrap();
    assert!(resolved.pipeline.is_noop());
}
