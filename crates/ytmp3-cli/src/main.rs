mod args;
mod commands;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use args::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on verbosity
    let filter = match cli.verbose {
        0 => "ytmp3=info,ytmp3_core=info",
        1 => "ytmp3=debug,ytmp3_core=debug",
        2 => "ytmp3=trace,ytmp3_core=trace",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).without_time())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    // Handle commands
    match cli.command {
        Some(Commands::Download { inputs, options }) => {
            commands::download::run(&inputs, &options, cli.config.as_deref()).await
        }
        Some(Commands::Library { action }) => {
            commands::library::run(&action, cli.config.as_deref()).await
        }
        Some(Commands::Doctor) => commands::doctor::run().await,
        Some(Commands::Config) => commands::config::run(cli.config.as_deref()).await,
        None => {
            // Inputs given directly are treated as a download command
            if !cli.inputs.is_empty() {
                commands::download::run(&cli.inputs, &cli.options, cli.config.as_deref()).await
            } else {
                use clap::CommandFactory;
                Cli::command().print_help()?;
                println!();
                Ok(())
            }
        }
    }
}
