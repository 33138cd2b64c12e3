// One-time setup: verify credentials, then lay out the draft document with
// teams, league settings and pre-draft analysis.

use std::process::ExitCode;

use anyhow::Context;
use tracing::{error, info};

use draft_sync::api::yahoo::YahooClient;
use draft_sync::config;
use draft_sync::setup::run_setup;
use draft_sync::sheet;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    if let Err(e) = init_tracing() {
        eprintln!("failed to initialize logging: {e:#}");
        return ExitCode::FAILURE;
    }

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Setup failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "Setting up league {} ({})",
        config.league.league_id, config.league.game_code
    );

    let api = YahooClient::from_config(&config).context("cannot reach the fantasy API")?;

    let document = config.document_path();
    let mut writer = sheet::open_document(config.output.backend, &document)
        .with_context(|| format!("failed to open document {}", document.display()))?;

    let report = run_setup(&api, writer.as_mut())
        .await
        .context("setup did not complete")?;

    println!(
        "Document ready: {} ({} teams, {} players in pre-draft analysis)",
        document.display(),
        report.teams,
        report.analysis_players
    );
    if !report.league_name.is_empty() {
        println!("League: {}", report.league_name);
    }
    Ok(())
}

fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("draft_sync=info,warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}
