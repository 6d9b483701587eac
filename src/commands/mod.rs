mod export;
mod run;

use clap::{Parser, Subcommand};

pub use export::ExportArgs;
pub use run::RunArgs;

/// Iterative map-reduce question answering over long documents.
#[derive(Debug, Parser)]
#[command(name = "longqa", version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Answer every question in a dataset, resuming from earlier results
    Run(RunArgs),
    /// Convert final predictions into a HotpotQA prediction file
    Export(ExportArgs),
}

pub async fn dispatch(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Run(args) => run::run(args).await,
        Command::Export(args) => export::export(&args),
    }
}
