use std::path::PathBuf;
use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use rnaseq_compendium::app::{App, RunOptions, RunResult};
use rnaseq_compendium::config::{ConfigLoader, DEFAULT_OUTPUT_DIR};
use rnaseq_compendium::dataset::Dataset;
use rnaseq_compendium::domain::{RunAccession, Species};
use rnaseq_compendium::error::CompendiumError;
use rnaseq_compendium::fetch::{FetchClient, HttpFetchClient};
use rnaseq_compendium::output::{JsonOutput, LogSink, OutputMode};
use rnaseq_compendium::store::Store;
use rnaseq_compendium::table::MetadataTable;

#[derive(Parser)]
#[command(name = "rnaseq-compendium")]
#[command(about = "Quality-tiered, normalized RNA-seq count compendia")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Fetch counts and build every configured output")]
    Run(RunArgs),
    #[command(about = "List catalogue names and their archive locations")]
    Catalogue(CatalogueArgs),
    #[command(about = "Summarize a dataset archive or table directory")]
    Inspect(InspectArgs),
}

#[derive(Args)]
struct RunArgs {
    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    dry_run: bool,

    #[arg(long)]
    no_archive: bool,

    #[arg(long)]
    no_cache: bool,

    #[arg(long, help = "Also write loose TSV tables per dataset")]
    tables: bool,
}

#[derive(Args)]
struct CatalogueArgs {
    /// Resolve a single name such as PASS_Rank.
    name: Option<String>,

    #[arg(long)]
    base_url: Option<String>,

    #[arg(long, default_value = DEFAULT_OUTPUT_DIR)]
    output_dir: Utf8PathBuf,
}

#[derive(Args)]
struct InspectArgs {
    path: PathBuf,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<CompendiumError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &CompendiumError) -> u8 {
    match error {
        CompendiumError::MissingConfig | CompendiumError::UnknownCatalogueName(_) => 2,
        CompendiumError::FetchHttp(_) | CompendiumError::FetchStatus { .. } => 3,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    match cli.command {
        Commands::Run(args) => run_pipeline(args, output_mode),
        Commands::Catalogue(args) => run_catalogue(args, output_mode),
        Commands::Inspect(args) => run_inspect(args, output_mode),
    }
}

fn run_pipeline(args: RunArgs, output_mode: OutputMode) -> miette::Result<()> {
    let resolved = ConfigLoader::resolve(args.config.as_deref())?;
    let store = Store::new(&resolved.output_dir)?;
    let fetch = HttpFetchClient::new(resolved.source_url.clone())?;
    let app = App::new(store, fetch);
    let options = RunOptions {
        dry_run: args.dry_run,
        no_archive: args.no_archive,
        no_cache: args.no_cache,
        tables: args.tables,
    };

    match output_mode {
        OutputMode::NonInteractive => {
            let result = app.run(&resolved, options, &JsonOutput)?;
            JsonOutput::print_run(&result).into_diagnostic()?;
        }
        OutputMode::Interactive => {
            let result = app.run(&resolved, options, &LogSink)?;
            print_run_summary(&result);
        }
    }
    Ok(())
}

fn run_catalogue(args: CatalogueArgs, output_mode: OutputMode) -> miette::Result<()> {
    let store = Store::new(&args.output_dir)?;
    let app = App::new(store, NopFetch);
    let base_url = args.base_url.as_deref();

    if let Some(name) = args.name {
        let entry = app.resolve_catalogue(&name, base_url)?;
        match output_mode {
            OutputMode::NonInteractive => JsonOutput::print_entry(&entry).into_diagnostic()?,
            OutputMode::Interactive => println!("{}\t{}\t{}", entry.name, entry.output, entry.location),
        }
        return Ok(());
    }

    let result = app.catalogue(base_url);
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_catalogue(&result).into_diagnostic()?,
        OutputMode::Interactive => {
            for entry in &result.entries {
                println!("{}\t{}\t{}", entry.name, entry.output, entry.location);
            }
        }
    }
    Ok(())
}

fn run_inspect(args: InspectArgs, output_mode: OutputMode) -> miette::Result<()> {
    let store = Store::new(&Utf8PathBuf::from(DEFAULT_OUTPUT_DIR))?;
    let app = App::new(store, NopFetch);
    let result = app.inspect(&args.path)?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_inspect(&result).into_diagnostic()?,
        OutputMode::Interactive => {
            println!("{} ({})", result.name, result.tool);
            println!("  created:  {}", result.created_at);
            println!("  shape:    {} genes x {} samples", result.genes, result.samples);
            println!("  calls:    {}", if result.has_calls { "yes" } else { "no" });
            println!("  samples:  {}", result.sample_fields.join(", "));
            println!("  genes:    {}", result.gene_fields.join(", "));
        }
    }
    Ok(())
}

fn print_run_summary(result: &RunResult) {
    let green = "\x1b[32m";
    let yellow = "\x1b[33m";
    let cyan = "\x1b[36m";
    let red = "\x1b[31m";
    let reset = "\x1b[0m";

    println!("{cyan}rnaseq-compendium summary{reset}");
    println!(
        "{cyan}{} with {} runs, input from {}{reset}",
        result.species, result.runs, result.input
    );
    if let Some(join) = &result.join {
        let color = if join.missing.is_empty() { green } else { yellow };
        println!(
            "{color}metadata: {} matched, {} missing{reset}",
            join.matched,
            join.missing.len()
        );
    }
    println!("{green}outputs: {}{reset}", result.outputs.len());
    for output in &result.outputs {
        let label = output.catalogue_name.as_deref().unwrap_or("-");
        println!(
            "{green}  {} [{label}] {} x {}{reset}",
            output.name, output.rows, output.columns
        );
        if let Some(path) = &output.path {
            println!("{green}    {path}{reset}");
        }
    }
    let color = if result.failures.is_empty() { green } else { red };
    println!("{color}failures: {}{reset}", result.failures.len());
    for failure in &result.failures {
        println!("{red}  {}: {}{reset}", failure.name, failure.error);
    }
    if result.dry_run {
        println!("{yellow}dry run: nothing was fetched or written{reset}");
    }
}

/// Stand-in for commands that never touch the data source.
struct NopFetch;

impl FetchClient for NopFetch {
    fn fetch_metadata(&self, _species: &Species) -> Result<MetadataTable, CompendiumError> {
        Err(CompendiumError::FetchHttp("no data source configured".to_string()))
    }

    fn fetch(
        &self,
        _species: &Species,
        _runs: &[RunAccession],
        _metadata: &MetadataTable,
    ) -> Result<Dataset, CompendiumError> {
        Err(CompendiumError::FetchHttp("no data source configured".to_string()))
    }
}
