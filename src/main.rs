use anyhow::{Context, Result};
use std::path::PathBuf;
use tracing::{Level, info, warn};

use coinjoin_coordinator::{
    CancelSignal, CancelSource, Coordinator, CoordinatorConfig, CoordinatorParameters,
};

const DEFAULT_WORK_DIR: &str = "./coordinator-data";

#[tokio::main]
async fn main() -> Result<()> {
    let work_dir = std::env::var("COINJOIN_WORK_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_WORK_DIR));
    let parameters = CoordinatorParameters::new(&work_dir);

    // File first, then environment on top of it
    let config = load_config(&parameters).map_err(|e| {
        eprintln!("Configuration error: {:#}", e);
        eprintln!(
            "Please check {} and COINJOIN_* environment variables.",
            parameters.config_file_path().display()
        );
        e
    })?;

    init_logging(&config)?;

    info!("Starting coinjoin coordinator");
    info!(
        work_dir = %work_dir.display(),
        penalty_per_coin_secs = config.prison.penalty_per_coin_secs,
        escalation_factor = config.prison.escalation_factor,
        "Prison policy loaded"
    );

    let coordinator = Coordinator::with_config(parameters, config)?;

    let cancel = CancelSource::new();
    let startup = coordinator.start(cancel.signal());
    tokio::pin!(startup);

    tokio::select! {
        result = &mut startup => result?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted during startup");
            cancel.cancel();
            startup.await?;
        }
    }

    if coordinator.is_running().await {
        info!("Coordinator ready, press Ctrl+C to stop");
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        info!("Shutdown signal received");
    }

    coordinator.stop(CancelSignal::none()).await?;

    let prison = coordinator.prison();
    info!(
        offenders = prison.offender_count(),
        "Coordinator shut down"
    );
    Ok(())
}

fn load_config(parameters: &CoordinatorParameters) -> Result<CoordinatorConfig> {
    std::fs::create_dir_all(parameters.work_dir()).with_context(|| {
        format!("Failed to create work dir {}", parameters.work_dir().display())
    })?;

    let mut config = CoordinatorConfig::load_or_create(&parameters.config_file_path())?;
    config.apply_env_overrides(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

fn init_logging(config: &CoordinatorConfig) -> Result<()> {
    let log_level = match config.logging.level.to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" => Level::WARN,
        "info" => Level::INFO,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set logging subscriber: {}", e))?;

    Ok(())
}
