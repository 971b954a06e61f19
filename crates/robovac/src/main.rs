mod cli;
mod commands;
mod config;
mod error;
mod output;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Setup tracing based on verbosity
    init_tracing(cli.global.verbose);

    // Dispatch and handle errors with proper exit codes
    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        // Offline commands don't need a device connection
        Command::Config(args) => commands::config_cmd::handle(args, &cli.global),
        Command::Decode(args) => commands::decode::handle(args, &cli.global),
        Command::Rooms => {
            let cfg = config::load_config()?;
            commands::status::rooms(&cfg, &cli.global)
        }

        // Shell completions generation
        Command::Completions(args) => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "robovac", &mut std::io::stdout());
            Ok(())
        }

        // All other commands talk to the vacuum
        cmd => {
            let cfg = config::load_config()?;
            let device = config::resolve_device(&cli.global, &cfg)?;

            tracing::debug!(command = ?cmd, device_id = %device.device_id, "dispatching command");
            commands::dispatch(cmd, device, &cli.global).await
        }
    }
}
