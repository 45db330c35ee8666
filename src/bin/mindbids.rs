use std::process::ExitCode;

use camino::Utf8PathBuf;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use mindbids::error::MindbidsError;
use mindbids::export::MindloggerExport;
use mindbids::layout::BidsLayout;
use mindbids::writer::{BidsWriter, MergeStrategy};

#[derive(Parser)]
#[command(name = "mindbids")]
#[command(about = "Converts MindLogger export data to a BIDS-like dataset layout")]
#[command(version, author)]
struct Cli {
    /// Path to the MindLogger export directory.
    #[arg(long, short = 'm')]
    export_dir: Utf8PathBuf,

    /// Path to the output dataset root.
    #[arg(long, short = 'b')]
    out: Utf8PathBuf,

    /// Merge strategy applied when the root or an entity destination exists.
    #[arg(long, short = 's', value_enum, ignore_case = true, default_value_t = MergeStrategy::Overwrite)]
    strategy: MergeStrategy,

    /// Dataset name written into dataset_description.json.
    #[arg(long, default_value = "MindLogger export")]
    name: String,

    /// Leave an existing dataset_description.json untouched.
    #[arg(long)]
    no_merge_description: bool,

    /// Leave an existing participants.tsv untouched.
    #[arg(long)]
    no_merge_participants: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<MindbidsError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &MindbidsError) -> u8 {
    match error {
        MindbidsError::MissingInput(_) => 2,
        MindbidsError::MergeStrategyRequired(_)
        | MindbidsError::RootNotEmpty(_)
        | MindbidsError::EntityConflict(_)
        | MindbidsError::NotSupported(_) => 3,
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

    let export = MindloggerExport::open(&cli.export_dir)?;
    let model = export.to_model(&cli.name)?;

    let layout = BidsLayout {
        merge_dataset_description: !cli.no_merge_description,
        merge_participants_tsv: !cli.no_merge_participants,
        ..BidsLayout::default()
    };
    let writer = BidsWriter::with_layout(cli.out, cli.strategy, layout);
    writer.write(&model)?;
    Ok(())
}
