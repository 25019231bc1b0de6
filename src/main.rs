use clap::Parser;
use tracing_subscriber::EnvFilter;

use slack_extract::cli::{Cli, Commands};
use slack_extract::commands;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Extract {
            from,
            to,
            user,
            context,
            format,
            output,
            config,
        } => commands::run_extract(from, to, user, context, format, output, config).await,
        Commands::ExportChannels { output } => commands::run_export_channels(&output).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
