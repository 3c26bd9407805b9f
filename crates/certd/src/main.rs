//! certd binary entrypoint.

use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use certd::cli::{Cli, Commands};
use certd::commands::{CaCommand, CertsCommand, Maintenance};
use certd::output::OutputFormat;
use certd::state::{StateDir, load_config};
use certd_sdk::LocalClient;

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let format = OutputFormat::new(cli.format);
    let config = load_config(cli.config.as_deref())?;
    let state = StateDir::new(&cli.state_dir);
    let mut stdout = io::stdout().lock();

    match &cli.command {
        Commands::Init { force } => {
            CaCommand::new(&state, &config).init(&mut stdout, &format, *force)?;
        }
        Commands::Ca => {
            CaCommand::new(&state, &config).show(&mut stdout, &format)?;
        }
        Commands::Intermediate { common_name, ttl } => {
            CaCommand::new(&state, &config).intermediate(
                &mut stdout,
                &format,
                common_name,
                ttl.as_deref(),
            )?;
        }
        Commands::Serve(args) => {
            let service = state
                .open_service(config)
                .with_context(|| format!("failed to open {}", cli.state_dir.display()))?;
            let maintenance = Maintenance::new(Arc::new(service), args)?;
            let stats = maintenance
                .run(async {
                    if tokio::signal::ctrl_c().await.is_err() {
                        info!("ctrl-c handler unavailable; stopping");
                    }
                })
                .await;
            format.write(&mut stdout, &stats)?;
        }
        command => {
            let service = state
                .open_service(config)
                .with_context(|| format!("failed to open {}", cli.state_dir.display()))?;
            let client = LocalClient::new(Arc::new(service));
            CertsCommand::new(&client).execute(&mut stdout, &format, command)?;
        }
    }

    Ok(())
}
