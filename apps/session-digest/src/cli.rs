use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "session-digest", version, about = "Backup and tape session digest")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Reconcile one server's session export into a digest artifact.
    Reconcile(ReconcileArgs),
    /// Merge every digest artifact and hand the result to the sinks.
    Process(ProcessArgs),
}

#[derive(Args)]
pub struct ReconcileArgs {
    #[arg(long)]
    pub input: PathBuf,
    /// Overrides the server name carried by the export.
    #[arg(long)]
    pub server: Option<String>,
    /// Defaults to `<artifacts dir>/<server>.json`.
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Args)]
pub struct ProcessArgs {
    #[arg(long)]
    pub artifacts: Option<PathBuf>,
    #[arg(long)]
    pub report: Option<PathBuf>,
    #[arg(long)]
    pub comment: Option<String>,
    #[arg(long, default_value_t = false)]
    pub no_metrics: bool,
    #[arg(long, default_value_t = false)]
    pub no_mail: bool,
}
