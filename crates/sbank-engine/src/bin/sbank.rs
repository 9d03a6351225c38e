//! Sample bank filler binary.

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use sbank_engine::{start, Collaborators, EngineConfig};
use sbank_models::RunState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive("sbank=info".parse()?);

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting sbank");

    let config = EngineConfig::from_env().context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;
    info!(
        themes = config.themes.len(),
        workers = config.workers,
        mode = %config.fetch_mode,
        scoring = config.scoring_enabled,
        "Loaded configuration"
    );

    let collaborators = Collaborators::production(&config)?;
    let handle = start(config, collaborators).await?;
    info!(run_id = %handle.run_id(), session_id = %handle.session_id(), "Run started");

    let stopper = handle.stopper();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received interrupt, finishing in-flight work");
            stopper.stop();
        }
    });

    let status = handle.wait().await;
    println!("{}", serde_json::to_string_pretty(&status)?);

    if status.state == RunState::Failed {
        error!(
            "Run failed: {}",
            status.last_error.as_deref().unwrap_or("unknown error")
        );
        std::process::exit(1);
    }
    Ok(())
}
