use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use synomix_stager::client::{
    AnalysisAccepted, AnalysisClient, AnalysisHttpClient, ExperimentCatalog,
};
use synomix_stager::config::{ConfigLoader, ResolvedConfig};
use synomix_stager::domain::{CancerType, ExperimentId, LayerType, StagedFile};
use synomix_stager::error::SynomixError;
use synomix_stager::output::{ExperimentList, InspectResult, JsonOutput, OutputMode, SubmitResult};
use synomix_stager::preview::preview_file;
use synomix_stager::progress::LogSink;
use synomix_stager::session::{AnalysisTicket, Session};
use synomix_stager::staging::ItemStatus;
use synomix_stager::tui::Dashboard;

const PREVIEW_ROWS: usize = 1000;

#[derive(Parser)]
#[command(name = "synomix")]
#[command(about = "Stage multi-omics layers, upload them to the analysis service and start the analysis")]
#[command(version)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Create an experiment, upload layers and optionally analyze")]
    Submit(SubmitArgs),
    #[command(about = "Preview local files without uploading them")]
    Inspect(InspectArgs),
    #[command(about = "Browse experiments on the service")]
    Experiments(ExperimentsArgs),
    #[command(about = "Start the analysis of an existing experiment")]
    Analyze(AnalyzeArgs),
}

#[derive(Args)]
struct SubmitArgs {
    #[arg(long)]
    name: String,

    #[arg(long, value_enum)]
    cancer_type: Option<CancerType>,

    #[arg(long)]
    analyze: bool,

    #[arg(required = true, value_name = "FILE[=LAYER]")]
    files: Vec<String>,
}

#[derive(Args)]
struct InspectArgs {
    #[arg(required = true)]
    files: Vec<Utf8PathBuf>,
}

#[derive(Args)]
struct ExperimentsArgs {
    #[command(subcommand)]
    command: ExperimentsCommand,
}

#[derive(Subcommand)]
enum ExperimentsCommand {
    #[command(about = "List experiments")]
    List,
    #[command(about = "Show one experiment")]
    Show(ExperimentRef),
    #[command(about = "Create a public share link")]
    Share(ExperimentRef),
}

#[derive(Args)]
struct ExperimentRef {
    id: String,
}

#[derive(Args)]
struct AnalyzeArgs {
    id: String,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(error) = report.downcast_ref::<SynomixError>() {
            return ExitCode::from(map_exit_code(error));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &SynomixError) -> u8 {
    match error {
        SynomixError::Status { status: 404, .. } => 2,
        SynomixError::InvalidCancerType(_)
        | SynomixError::InvalidLayerType(_)
        | SynomixError::InvalidExperimentId(_)
        | SynomixError::UnsupportedFile(_)
        | SynomixError::SetupIncomplete
        | SynomixError::EmptyStaging
        | SynomixError::InvalidTransition { .. } => 2,
        error if error.is_transport() => 3,
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

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Inspect(args) => run_inspect(args, output_mode),
        Commands::Submit(args) => {
            let (config, client) = connect(config_path)?;
            run_submit(args, &config, client, output_mode)
        }
        Commands::Experiments(args) => {
            let (_, client) = connect(config_path)?;
            run_experiments(args, &client, output_mode)
        }
        Commands::Analyze(args) => {
            let (_, client) = connect(config_path)?;
            run_analyze(args, &client, output_mode)
        }
    }
}

fn connect(config_path: Option<&str>) -> miette::Result<(ResolvedConfig, AnalysisHttpClient)> {
    let config = ConfigLoader::resolve(config_path)?;
    let client = AnalysisHttpClient::new(&config)?;
    Ok((config, client))
}

fn run_submit(
    args: SubmitArgs,
    config: &ResolvedConfig,
    client: AnalysisHttpClient,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let SubmitArgs {
        name,
        cancer_type,
        analyze,
        files,
    } = args;

    let mut staged = Vec::with_capacity(files.len());
    let mut layers = Vec::with_capacity(files.len());
    for value in &files {
        let (path, layer) = parse_file_arg(value)?;
        staged.push(StagedFile::from_path(&path)?);
        layers.push(layer);
    }

    let mut session = Session::new(client);
    session.set_name(name)?;
    if let Some(cancer_type) = cancer_type.or(config.default_cancer_type) {
        session.set_cancer_type(cancer_type)?;
    }
    let experiment = session.create_experiment(&LogSink)?;

    let ids = session.add_files(staged)?;
    for (id, layer) in ids.iter().zip(layers) {
        if let (Some(index), Some(layer)) = (session.staging().position(*id), layer) {
            session.set_layer_type(index, Some(layer))?;
        }
    }

    match output_mode {
        OutputMode::NonInteractive => {
            session.upload_all(&LogSink)?;
        }
        OutputMode::Interactive => {
            let mut dashboard = Dashboard::new(&experiment, session.staging());
            dashboard.run(|sink| session.upload_all(sink))?;
        }
    }

    let (result, analysis_error) = SubmitResult::finish(&mut session, analyze, &LogSink)
        .ok_or_else(|| miette::Report::msg("session ended without an experiment"))?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_submit(&result).into_diagnostic()?,
        OutputMode::Interactive => print_submit_summary(&result),
    }
    match analysis_error {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

fn run_inspect(args: InspectArgs, output_mode: OutputMode) -> miette::Result<()> {
    let mut previews = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let file = StagedFile::from_path(path)?;
        previews.push(preview_file(&file, PREVIEW_ROWS)?);
    }
    let result = InspectResult { files: previews };

    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_inspect(&result).into_diagnostic(),
        OutputMode::Interactive => {
            for preview in &result.files {
                let rows = if preview.truncated {
                    format!("{}+", preview.rows_scanned)
                } else {
                    preview.rows_scanned.to_string()
                };
                println!(
                    "{:<32} {:<12} {:?} separator, {} columns (~{} samples), {} rows",
                    preview.file_name,
                    preview.detected_layer.label(),
                    preview.separator,
                    preview.columns,
                    preview.sample_estimate,
                    rows
                );
            }
            Ok(())
        }
    }
}

fn run_experiments<C: ExperimentCatalog>(
    args: ExperimentsArgs,
    catalog: &C,
    output_mode: OutputMode,
) -> miette::Result<()> {
    match args.command {
        ExperimentsCommand::List => {
            let experiments = catalog.list_experiments()?;
            let result = ExperimentList {
                count: experiments.len(),
                experiments,
            };
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_experiments(&result).into_diagnostic(),
                OutputMode::Interactive => {
                    println!("{} experiments", result.count);
                    for experiment in &result.experiments {
                        println!(
                            "  {:<24} {:<32} {}",
                            experiment.id,
                            experiment.name.as_deref().unwrap_or("-"),
                            experiment
                                .cancer_type
                                .map(|cancer_type| cancer_type.label())
                                .unwrap_or("-")
                        );
                    }
                    Ok(())
                }
            }
        }
        ExperimentsCommand::Show(reference) => {
            let id = reference.id.parse::<ExperimentId>()?;
            let experiment = catalog.get_experiment(&id)?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_experiment(&experiment).into_diagnostic(),
                OutputMode::Interactive => {
                    println!("{} ({})", experiment.name, experiment.id);
                    println!("  cancer type: {}", experiment.cancer_type.label());
                    if let Some(status) = experiment.status {
                        println!("  status:      {status:?}");
                    }
                    if let Some(created_at) = experiment.created_at {
                        println!("  created:     {}", created_at.format("%Y-%m-%d %H:%M"));
                    }
                    println!("  public:      {}", experiment.is_public);
                    Ok(())
                }
            }
        }
        ExperimentsCommand::Share(reference) => {
            let id = reference.id.parse::<ExperimentId>()?;
            let link = catalog.share_experiment(&id)?;
            match output_mode {
                OutputMode::NonInteractive => JsonOutput::print_share(&link).into_diagnostic(),
                OutputMode::Interactive => {
                    println!("{}", link.share_url);
                    Ok(())
                }
            }
        }
    }
}

fn run_analyze<C: AnalysisClient>(
    args: AnalyzeArgs,
    client: &C,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let id = args.id.parse::<ExperimentId>()?;
    let accepted = client.trigger_analysis(&id)?;
    let ticket = AnalysisTicket::new(id, accepted);
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_analysis(&ticket).into_diagnostic(),
        OutputMode::Interactive => {
            println!(
                "analysis started for {}, results at {}",
                ticket.experiment_id, ticket.results_path
            );
            print_analysis_summary(&ticket.accepted);
            Ok(())
        }
    }
}

// `path/to/file.csv=mutation` pins the layer type; a bare path lets the
// service detect it.
fn parse_file_arg(value: &str) -> Result<(Utf8PathBuf, Option<LayerType>), SynomixError> {
    match value.rsplit_once('=') {
        Some((path, layer)) if !path.is_empty() && !layer.is_empty() => {
            Ok((Utf8PathBuf::from(path), Some(layer.parse::<LayerType>()?)))
        }
        _ => Ok((Utf8PathBuf::from(value), None)),
    }
}

fn print_submit_summary(result: &SubmitResult) {
    let green = "\x1b[32m";
    let red = "\x1b[31m";
    let cyan = "\x1b[36m";
    let reset = "\x1b[0m";

    println!(
        "{cyan}SYNOMIX summary{reset}  {} ({}, {})",
        result.experiment.name,
        result.experiment.id,
        result.experiment.cancer_type.label()
    );
    if let Some(summary) = result.summary {
        println!(
            "uploaded {}/{} layers, {} failed, {} skipped",
            summary.succeeded, summary.attempted, summary.failed, summary.skipped
        );
    }

    for item in &result.items {
        let layer = item
            .layer_type
            .map(|layer| layer.label())
            .unwrap_or("auto");
        match &item.status {
            ItemStatus::Success {
                gene_count,
                sample_count,
            } => println!(
                "{green}  ok   {} [{layer}] {gene_count} genes, {sample_count} samples{reset}",
                item.file.name
            ),
            ItemStatus::Error { reason } => {
                println!("{red}  fail {} [{layer}] {reason}{reset}", item.file.name)
            }
            other => println!("  {:<4} {} [{layer}]", other.label(), item.file.name),
        }
    }

    if let Some(ticket) = &result.analysis {
        println!(
            "{cyan}analysis started, results at {}{reset}",
            ticket.results_path
        );
        print_analysis_summary(&ticket.accepted);
    }
    if let Some(reason) = &result.analysis_error {
        println!("{red}analysis not started: {reason}{reset}");
        println!("retry with: synomix analyze {}", result.experiment.id);
    }
}

fn print_analysis_summary(accepted: &AnalysisAccepted) {
    if !accepted.layers_analyzed.is_empty() {
        println!("  layers analyzed: {}", accepted.layers_analyzed.join(", "));
    }
    if let Some(seconds) = accepted.processing_time {
        println!("  processing time: {seconds:.1}s");
    }
    let Some(summary) = &accepted.summary else {
        return;
    };
    let counts = [
        ("total layers", summary.total_layers),
        ("multi-omics hits", summary.multi_omics_hits),
        ("actionable targets", summary.actionable_targets),
        ("pathways enriched", summary.pathways_enriched),
    ];
    for (label, value) in counts {
        if let Some(value) = value {
            println!("  {label}: {value}");
        }
    }
    if let Some(subtype) = &summary.predicted_subtype {
        match summary.confidence {
            Some(confidence) => {
                println!("  predicted subtype: {subtype} ({:.0}% confidence)", confidence * 100.0)
            }
            None => println!("  predicted subtype: {subtype}"),
        }
    }
    if let Some(score) = summary.immune_score {
        println!("  immune score: {score:.2}");
    }
}
