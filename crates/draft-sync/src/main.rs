// Draft monitor entry point.
//
// Startup sequence:
// 1. Initialize tracing (stderr; stdout carries one line per recorded pick)
// 2. Load config
// 3. Build the API client and open the output document
// 4. Load teams, scoring settings and projections
// 5. Warm the player cache
// 6. Run the reconciliation loop until Ctrl+C

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{error, info, warn};

use draft_sync::api::yahoo::YahooClient;
use draft_sync::config;
use draft_sync::monitor::Reconciler;
use draft_sync::sheet;

const EXIT_STARTUP: u8 = 1;
const EXIT_AUTH: u8 = 2;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    if let Err(e) = init_tracing() {
        eprintln!("failed to initialize logging: {e:#}");
        return ExitCode::from(EXIT_STARTUP);
    }

    match run().await {
        Ok(code) => code,
        Err(e) => {
            error!("Startup failed: {:#}", e);
            ExitCode::from(EXIT_STARTUP)
        }
    }
}

async fn run() -> anyhow::Result<ExitCode> {
    info!("Draft monitor starting up");

    // 2. Load config
    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "Config loaded: league={}, game={}, every {}s",
        config.league.league_id, config.league.game_code, config.monitor.poll_interval_seconds
    );

    // 3. API client and document
    let api = match YahooClient::from_config(&config) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("{}", e);
            return Ok(ExitCode::from(EXIT_AUTH));
        }
    };

    let document = config.document_path();
    let writer = sheet::open_document(config.output.backend, &document)
        .with_context(|| format!("failed to open document {}", document.display()))?;
    info!("Writing to {} ({:?} backend)", document.display(), config.output.backend);

    let mut monitor = Reconciler::new(api, writer).with_pick_echo(true);

    // 4. League context
    if let Err(e) = monitor.load_league_context(config.projections.path()).await {
        error!("Authentication failed: {}", e);
        return Ok(ExitCode::from(EXIT_AUTH));
    }
    if let Err(e) = monitor.prepare_document().await {
        warn!("Could not prepare Draft Results sheet: {}", e);
    }

    // 5. Warm cache
    if config.monitor.warm_cache {
        if let Err(e) = monitor.warm_cache().await {
            error!("Authentication failed: {}", e);
            return Ok(ExitCode::from(EXIT_AUTH));
        }
    }

    // 6. Run until Ctrl+C
    let (stop_tx, stop_rx) = watch::channel(false);
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {}", e);
            // Keep the sender alive; a dropped sender stops the loop.
            std::future::pending::<()>().await;
        }
        info!("Interrupt received, stopping after the current tick");
        let _ = stop_tx.send(true);
    });

    println!("Monitoring draft... (Ctrl+C to stop)");
    match monitor.run(config.poll_interval(), stop_rx).await {
        Ok(summary) => {
            println!("Stopped. {} picks recorded.", summary.picks_written);
            Ok(ExitCode::SUCCESS)
        }
        Err(_) => Ok(ExitCode::from(EXIT_AUTH)),
    }
}

/// Initialize tracing to stderr so pick lines on stdout stay clean.
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
