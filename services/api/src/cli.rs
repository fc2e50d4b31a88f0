use crate::demo::{run_demo, DemoArgs};
use crate::server;
use crate::sweep::{run_sweep, SweepArgs};
use clap::{Args, Parser, Subcommand};
use exam_engine::error::AppError;

#[derive(Parser, Debug)]
#[command(
    name = "Exam Lifecycle Engine",
    about = "Serve, sweep, and demonstrate the exam lifecycle and result aggregation engine",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP service (default command)
    Serve(ServeArgs),
    /// Re-classify overdue exams in a store snapshot and write the snapshot back
    Sweep(SweepArgs),
    /// Walk through the classification, scoring, and reconciliation scenarios
    Demo(DemoArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Load the in-memory store from this snapshot file and write it back on shutdown
    #[arg(long)]
    pub(crate) snapshot: Option<std::path::PathBuf>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Sweep(args) => run_sweep(args),
        Command::Demo(args) => run_demo(args),
    }
}
