use anyhow::Context;
use canvass::cli::{Cli, Output};
use canvass::config::CanvassConfig;
use canvass::db::LocalStore;
use canvass::runner::Runner;
use canvass::types::RunStatus;
use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let output = if cli.no_color {
        Output::no_color()
    } else {
        Output::new()
    };

    match run(&cli, &output).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            output.error(&format!("{:#}", err));
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli, output: &Output) -> anyhow::Result<()> {
    // Credentials come from the environment; a .env file is optional.
    dotenvy::dotenv().ok();
    init_tracing(cli.verbose);

    let config = CanvassConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let store = LocalStore::new(&config.database.path)
        .await
        .context("opening result store")?;

    let runner = Runner::new(config, Arc::new(store));
    let outcome = runner.execute(cli.runs).await?;

    output.summary(&outcome);
    if outcome.reports.iter().any(|r| r.has_failures()) {
        output.warning("some agents ended below full success, see report above");
    }
    if outcome.status == RunStatus::Terminated {
        anyhow::bail!("run interrupted, partial results stored");
    }
    Ok(())
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "canvass=debug"
    } else {
        "canvass=info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}
