use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "slack-extract")]
#[command(about = "Extract a user's Slack messages with their surrounding context")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Extract messages for a user in a date range
    Extract {
        /// Start date (YYYY-MM-DD), defaults to the end date minus default-days
        #[arg(short, long)]
        from: Option<String>,

        /// End date (YYYY-MM-DD), defaults to today
        #[arg(short, long)]
        to: Option<String>,

        /// Target user id, defaults to settings or the token owner
        #[arg(short, long)]
        user: Option<String>,

        /// Context messages before and after each match
        #[arg(short, long)]
        context: Option<usize>,

        /// Output format: json | markdown
        #[arg(long)]
        format: Option<String>,

        /// Output file name, {datetime} placeholder supported
        #[arg(short, long)]
        output: Option<String>,

        /// Settings file path (settings.toml)
        #[arg(long)]
        config: Option<String>,
    },

    /// Export channels
    ExportChannels {
        /// Output file path
        #[arg(short, long, default_value = "channels.json")]
        output: String,
    },
}
