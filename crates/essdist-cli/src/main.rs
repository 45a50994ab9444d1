use anyhow::Result;
use clap::Parser;
use essdist_cli::cli::{Cli, Commands};
use tracing_subscriber::FmtSubscriber;

mod commands;

fn main() -> Result<()> {
    let cli = Cli::parse();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(cli.log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match &cli.command {
        Commands::Solve {
            request,
            config,
            format,
            out,
        } => commands::solve::handle(request, config.as_deref(), *format, out.as_deref()),
        Commands::ConfigDefaults { out } => commands::config::handle(out.as_deref()),
    }
}
