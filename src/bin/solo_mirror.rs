use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand, ValueEnum};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use solo_mirror::archive::SoarHttpClient;
use solo_mirror::config::ConfigLoader;
use solo_mirror::error::MirrorError;
use solo_mirror::relocate::{relocate_tree, RelocateMode, RelocateOptions};
use solo_mirror::sync::sync;

#[derive(Parser)]
#[command(name = "solo-mirror")]
#[command(about = "Mirror a curated subset of the Solar Orbiter Archive")]
#[command(version, author)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Reconcile the local tree with the archive")]
    Sync(SyncArgs),
    #[command(about = "Move or copy dataset files into their canonical subdirectories")]
    Relocate(RelocateArgs),
}

#[derive(clap::Args)]
struct SyncArgs {
    #[arg(long)]
    config: Option<String>,

    #[arg(long)]
    dry_run: bool,
}

#[derive(clap::Args)]
struct RelocateArgs {
    #[arg(value_enum)]
    mode: RelocateArgMode,
    src: Utf8PathBuf,
    dst: Utf8PathBuf,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RelocateArgMode {
    Copy,
    Move,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(mirror) = report.downcast_ref::<MirrorError>() {
            return ExitCode::from(map_exit_code(mirror));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &MirrorError) -> u8 {
    match error {
        MirrorError::MissingConfig
        | MirrorError::ConfigRead(_)
        | MirrorError::ConfigParse(_) => 2,
        MirrorError::ArchiveHttp(_)
        | MirrorError::ArchiveStatus { .. }
        | MirrorError::ItemNotFound(_)
        | MirrorError::Protocol(_) => 3,
        error if error.is_unrecoverable() => 4,
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
    match cli.command {
        Commands::Sync(args) => run_sync(args),
        Commands::Relocate(args) => run_relocate(args),
    }
}

fn run_sync(args: SyncArgs) -> miette::Result<()> {
    let resolved = ConfigLoader::resolve(args.config.as_deref()).into_diagnostic()?;
    let client = SoarHttpClient::new().into_diagnostic()?;
    let options = resolved.sync_options(args.dry_run);
    let remover = resolved.removal_handler();
    let predicate = resolved.predicate();

    let report = sync(&options, &client, &predicate, &remover).into_diagnostic()?;
    let json = serde_json::to_string_pretty(&report).into_diagnostic()?;
    println!("{json}");
    Ok(())
}

fn run_relocate(args: RelocateArgs) -> miette::Result<()> {
    let mode = match args.mode {
        RelocateArgMode::Copy => RelocateMode::Copy,
        RelocateArgMode::Move => RelocateMode::Move,
    };
    let relocated = relocate_tree(&args.src, &args.dst, mode, &RelocateOptions::default())
        .into_diagnostic()?;
    println!("{relocated} files relocated");
    Ok(())
}
