use std::process::ExitCode;

use clap::{Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use kira_pgx_sync::app::{App, ProgressSink};
use kira_pgx_sync::config::{ConfigLoader, ResolvedConfig};
use kira_pgx_sync::error::PgxError;
use kira_pgx_sync::loader::LoadReport;
use kira_pgx_sync::output::{JsonOutput, OutputMode, TextOutput};
use kira_pgx_sync::pharmgkb::{Fetcher, PharmGkbHttpClient, Resource};

#[derive(Parser)]
#[command(name = "kira-pgx")]
#[command(about = "Synchronize a local pharmacogenomics knowledge base with PharmGKB")]
#[command(version, author)]
struct Cli {
    /// Config file (defaults to ./kira-pgx.json when present).
    #[arg(long, global = true)]
    config: Option<String>,

    /// Print JSON results instead of a summary.
    #[arg(long, global = true)]
    non_interactive: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Fetch, normalize and reconcile into review files")]
    Review,
    #[command(about = "Load review files into the knowledge base")]
    Load,
    #[command(about = "Review, then load")]
    Sync,
    #[command(about = "Create an empty knowledge base")]
    Init,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(pgx) = report.downcast_ref::<PgxError>() {
            return ExitCode::from(map_exit_code(pgx));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &PgxError) -> u8 {
    match error {
        PgxError::ConfigRead(_)
        | PgxError::ConfigParse(_)
        | PgxError::InvalidSource(_)
        | PgxError::InvalidHeader(_)
        | PgxError::StoreMissing(_) => 2,
        PgxError::PharmGkbHttp(_) | PgxError::PharmGkbStatus { .. } => 3,
        PgxError::RolledBack(_) => 4,
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
    let config = ConfigLoader::resolve(cli.config.as_deref())?;

    match cli.command {
        Commands::Review => run_review(online_app(config)?, output_mode),
        Commands::Load => run_load(App::new(config, NopFetcher), output_mode),
        Commands::Sync => run_sync(online_app(config)?, output_mode),
        Commands::Init => run_init(App::new(config, NopFetcher), output_mode),
    }
}

fn online_app(config: ResolvedConfig) -> miette::Result<App<PharmGkbHttpClient>> {
    let client = PharmGkbHttpClient::new(&config)?;
    Ok(App::new(config, client))
}

fn sink(output_mode: OutputMode) -> &'static dyn ProgressSink {
    match output_mode {
        OutputMode::NonInteractive => &JsonOutput,
        OutputMode::Interactive => &TextOutput,
    }
}

fn run_review<F: Fetcher>(app: App<F>, output_mode: OutputMode) -> miette::Result<()> {
    let result = app.review(sink(output_mode))?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_review(&result).into_diagnostic()?,
        OutputMode::Interactive => TextOutput::print_review(&result),
    }
    Ok(())
}

fn run_load<F: Fetcher>(app: App<F>, output_mode: OutputMode) -> miette::Result<()> {
    let report = app.load(sink(output_mode))?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_load(&report).into_diagnostic()?,
        OutputMode::Interactive => TextOutput::print_load(&report),
    }
    ensure_committed(&report)
}

fn run_sync<F: Fetcher>(app: App<F>, output_mode: OutputMode) -> miette::Result<()> {
    let result = app.sync(sink(output_mode))?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_sync(&result).into_diagnostic()?,
        OutputMode::Interactive => {
            TextOutput::print_review(&result.review);
            TextOutput::print_load(&result.load);
        }
    }
    ensure_committed(&result.load)
}

fn run_init<F: Fetcher>(app: App<F>, output_mode: OutputMode) -> miette::Result<()> {
    let result = app.init(sink(output_mode))?;
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print_init(&result).into_diagnostic()?,
        OutputMode::Interactive => TextOutput::print_init(&result),
    }
    Ok(())
}

fn ensure_committed(report: &LoadReport) -> miette::Result<()> {
    if report.is_committed() {
        return Ok(());
    }
    Err(PgxError::RolledBack(report.failed_tables()).into())
}

/// Load and init never reach PharmGKB.
struct NopFetcher;

impl Fetcher for NopFetcher {
    fn fetch(&self, resource: Resource) -> Result<Vec<u8>, PgxError> {
        Err(PgxError::PharmGkbHttp(format!(
            "{resource} is not fetched by this command"
        )))
    }
}
