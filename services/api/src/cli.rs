use crate::demo::{run_demo, DemoArgs};
use crate::export::{run_export, ExportArgs};
use crate::server;
use booking_desk::error::AppError;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "Booking Desk",
    about = "Serve and inspect service-professional booking requests",
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
    /// Work with stored booking requests offline
    Requests {
        #[command(subcommand)]
        command: RequestsCommand,
    },
    /// Submit a booking request and watch it settle after the dwell interval
    Demo(DemoArgs),
}

#[derive(Subcommand, Debug)]
enum RequestsCommand {
    /// Write a store dump as an ordered CSV listing
    Export(ExportArgs),
}

#[derive(Args, Debug, Default)]
pub(crate) struct ServeArgs {
    /// Override the configured host for the HTTP server
    #[arg(long)]
    pub(crate) host: Option<String>,
    /// Override the configured port for the HTTP server
    #[arg(long)]
    pub(crate) port: Option<u16>,
    /// Override the dwell interval before Pending requests are accepted
    #[arg(long)]
    pub(crate) dwell_secs: Option<u64>,
    /// JSON dump of existing booking requests to preload into the store
    #[arg(long)]
    pub(crate) seed: Option<PathBuf>,
    /// Attribute submissions to this user
    #[arg(long)]
    pub(crate) user: Option<String>,
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Requests {
            command: RequestsCommand::Export(args),
        } => run_export(args).await,
        Command::Demo(args) => run_demo(args).await,
    }
}
