//! Reasonflow CLI entry point.

use clap::Parser;

use reasonflow::cli::{commands, handle_error, Cli, Commands};
use reasonflow::infrastructure::config::ConfigLoader;
use reasonflow::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Commands::Init(args) = cli.command {
        if let Err(err) = commands::init::execute(args, cli.json).await {
            handle_error(err, cli.json);
        }
        return;
    }

    let config = match &cli.config {
        Some(path) => ConfigLoader::load_from_file(path),
        None => ConfigLoader::load(),
    }
    .unwrap_or_else(|err| handle_error(err, cli.json));

    let _logger = LoggerImpl::init(&LogConfig::from(&config.logging))
        .unwrap_or_else(|err| handle_error(err, cli.json));

    let result = match cli.command {
        Commands::Init(_) => Ok(()),
        Commands::Run(args) => commands::run::execute(args, &config, cli.json).await,
        Commands::Slots(args) => commands::slots::execute(args, &config, cli.json).await,
        Commands::Reevaluate(args) => {
            commands::reevaluate::execute(args, &config, cli.json).await
        }
        Commands::Picker(args) => commands::picker::execute(args, &config, cli.json).await,
        Commands::Config => commands::config::execute(&config, cli.json),
    };

    if let Err(err) = result {
        handle_error(err, cli.json);
    }
}
