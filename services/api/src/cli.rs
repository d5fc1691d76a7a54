use crate::demo::{run_demo, run_resolve, run_variables, DemoArgs, ResolveArgs, VariablesArgs};
use crate::server;
use accreditation_score::error::AppError;
use clap::{Args, Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(
    name = "Accreditation Score",
    about = "Score study program accreditation data from the command line or over HTTP",
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
    /// Resolve one formula against a set of variables
    Resolve(ResolveArgs),
    /// Normalize a section export and print the variables it yields
    Variables(VariablesArgs),
    /// Walk a study program through the combined cooperation score
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
}

pub(crate) async fn run() -> Result<(), AppError> {
    let cli = Cli::parse();
    let command = cli
        .command
        .unwrap_or_else(|| Command::Serve(ServeArgs::default()));

    match command {
        Command::Serve(args) => server::run(args).await,
        Command::Resolve(args) => run_resolve(args).await,
        Command::Variables(args) => run_variables(args),
        Command::Demo(args) => run_demo(args).await,
    }
}
