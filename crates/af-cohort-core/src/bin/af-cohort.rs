//! Command line entry point for the AF cohort pipeline.

use af_cohort_core::annotate::{read_corpus, PrecomputedAnnotator, TaggerAnnotator};
use af_cohort_core::config::PipelineConfig;
use af_cohort_core::pipeline::{import_notes, Pipeline, RunOutput};
use af_cohort_core::validation::{
    load_exported, load_gold, validate, write_metrics_file, DEFAULT_SAMPLE_SEED, DEFAULT_SAMPLE_SIZE,
};
use af_cohort_core::{telemetry, SiteFilter};
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "af-cohort",
    about = "Score stroke and bleeding risk for an atrial fibrillation cohort",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build the cohort from the note store, annotate, score and export
    Run(RunArgs),
    /// Score an annotated corpus JSON file and export
    Score(ScoreArgs),
    /// Import a notes CSV into the note store
    ImportNotes(ImportArgs),
    /// Draw a random sample of the cohort for manual annotation
    Sample(SampleArgs),
    /// Compare an exported table with a gold-standard sample
    Validate(ValidateArgs),
}

#[derive(Args, Debug, Default)]
struct OutputArgs {
    /// Override the configured output table path
    #[arg(long)]
    output: Option<PathBuf>,
    /// Also write the table as JSON here
    #[arg(long)]
    json: Option<PathBuf>,
    /// Override the configured manifest path
    #[arg(long)]
    manifest: Option<PathBuf>,
    /// Treat conflicting definition rows as errors
    #[arg(long)]
    strict: bool,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Precomputed engine output (JSON object keyed by document id);
    /// the dictionary tagger is used when absent
    #[arg(long)]
    annotations: Option<PathBuf>,
    /// Override the configured note store
    #[arg(long)]
    note_store: Option<PathBuf>,
    /// Override the configured demographics CSV
    #[arg(long)]
    demographics: Option<PathBuf>,
    /// Site exclusion rules (none, uclh)
    #[arg(long)]
    site: Option<SiteFilter>,
    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Args, Debug)]
struct ScoreArgs {
    /// Annotated corpus JSON
    #[arg(long)]
    corpus: PathBuf,
    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Args, Debug)]
struct ImportArgs {
    /// Notes CSV (patientprimarymrn, clinicalnotekey, encounterdate, notetext)
    #[arg(long)]
    csv: PathBuf,
    /// Override the configured note store
    #[arg(long)]
    note_store: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct SampleArgs {
    /// Number of documents to sample
    #[arg(short, long = "size", default_value_t = DEFAULT_SAMPLE_SIZE)]
    n: usize,
    /// Random seed; the same seed over the same cohort gives the same sample
    #[arg(long, default_value_t = DEFAULT_SAMPLE_SEED)]
    seed: u64,
    /// Override the configured note store
    #[arg(long)]
    note_store: Option<PathBuf>,
    /// Override the configured demographics CSV
    #[arg(long)]
    demographics: Option<PathBuf>,
    /// Site exclusion rules (none, uclh)
    #[arg(long)]
    site: Option<SiteFilter>,
    /// Where to write the name,text CSV
    #[arg(long, default_value = "output/af_sample_docs.csv")]
    output: PathBuf,
}

#[derive(Args, Debug)]
struct ValidateArgs {
    /// Gold-standard CSV
    #[arg(long)]
    gold: PathBuf,
    /// Exported cohort table; defaults to the configured output table
    #[arg(long)]
    table: Option<PathBuf>,
    /// Where to write the comparison CSV
    #[arg(long, default_value = "output/validation.csv")]
    output: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config = PipelineConfig::load().context("failed to load configuration")?;
    telemetry::init(&config.telemetry).context("failed to initialise logging")?;

    match cli.command {
        Command::Run(args) => {
            if let Some(path) = args.note_store {
                config.note_store = path;
            }
            if let Some(path) = args.demographics {
                config.demographics = path;
            }
            if let Some(site) = args.site {
                config.criteria.site = site;
            }
            apply_output(&mut config, args.output);

            let pipeline = Pipeline::new(&config);
            let definitions = pipeline.load_definitions()?;
            let output = match args.annotations {
                Some(path) => {
                    let annotator = PrecomputedAnnotator::load(&path)
                        .with_context(|| format!("failed to load {}", path.display()))?;
                    pipeline.run(&definitions, &annotator)?
                }
                None => {
                    let annotator =
                        TaggerAnnotator::from_definitions(&definitions.scores, definitions.medications.as_ref());
                    pipeline.run(&definitions, &annotator)?
                }
            };
            report(&output);
        }
        Command::Score(args) => {
            apply_output(&mut config, args.output);
            let file = std::fs::File::open(&args.corpus)
                .with_context(|| format!("failed to open {}", args.corpus.display()))?;
            let documents = read_corpus(std::io::BufReader::new(file))?;

            let pipeline = Pipeline::new(&config);
            let definitions = pipeline.load_definitions()?;
            let output = pipeline.score(&definitions, &documents)?;
            report(&output);
        }
        Command::ImportNotes(args) => {
            let store = args.note_store.unwrap_or(config.note_store);
            let imported = import_notes(&store, &args.csv)?;
            info!(imported, store = %store.display(), "Imported notes");
        }
        Command::Sample(args) => {
            if let Some(path) = args.note_store {
                config.note_store = path;
            }
            if let Some(path) = args.demographics {
                config.demographics = path;
            }
            if let Some(site) = args.site {
                config.criteria.site = site;
            }
            Pipeline::new(&config).sample(args.n, args.seed, &args.output)?;
        }
        Command::Validate(args) => {
            let table = args.table.unwrap_or(config.output.table);
            let gold = load_gold(&args.gold)?;
            let exported = load_exported(&table)?;
            let result = validate(&gold, &exported)?;
            write_metrics_file(&result.metrics, &args.output)?;
            info!(
                documents = result.documents,
                missing = result.missing_documents.len(),
                output = %args.output.display(),
                "Validation written"
            );
        }
    }

    Ok(())
}

fn apply_output(config: &mut PipelineConfig, args: OutputArgs) {
    if let Some(path) = args.output {
        config.output.table = path;
    }
    if let Some(path) = args.json {
        config.output.json = Some(path);
    }
    if let Some(path) = args.manifest {
        config.output.manifest = path;
    }
    config.strict_definitions |= args.strict;
}

fn report(output: &RunOutput) {
    let counts = &output.manifest.counts;
    info!(
        run_id = %output.manifest.run_id,
        complete = counts.complete_cohort,
        scored = counts.final_rows,
        failed = counts.failed,
        "Run finished"
    );
}
