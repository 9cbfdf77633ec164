//! G6 collector binary
//!
//! Entry point for initializing, validating and running periodic option
//! chain collection.

use anyhow::{Context, Result};
use cli::{Cli, Commands, ProviderArg};
use collector::{CollectionScheduler, SessionGate, ShutdownController};
use common::HealthStatus;
use config::{
    generate_default_config, load_config, save_config, validate_config, G6Config, ProviderKind,
};
use observability::{
    init_logging_with_level, init_metrics, HealthMonitor, HealthThresholds, LogFormat,
    MetricsRegistry,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse_args();

    match cli.command {
        Commands::Start { ref config, provider } => {
            let cfg = prepare(config, provider, &cli)?;
            info!("Executing 'start' command");
            start_command(cfg).await
        }
        Commands::Once {
            ref config,
            provider,
            ref symbol,
            ignore_session,
        } => {
            let cfg = prepare(config, provider, &cli)?;
            info!("Executing 'once' command");
            once_command(cfg, symbol.as_deref(), ignore_session).await
        }
        Commands::Validate { ref config } => {
            init_cli_logging(&cli, "pretty", "info")?;
            info!("Executing 'validate' command");
            validate_command(config)
        }
        Commands::Init { ref output } => {
            init_cli_logging(&cli, "pretty", "info")?;
            info!("Executing 'init' command");
            init_command(output)
        }
    }
}

/// Install the subscriber. CLI flags win over configured values.
fn init_cli_logging(cli: &Cli, configured_format: &str, configured_level: &str) -> Result<()> {
    let format = cli
        .log_format
        .map(|f| f.as_str())
        .and_then(LogFormat::parse)
        .or_else(|| LogFormat::parse(configured_format))
        .unwrap_or_default();
    let level = if cli.debug { "debug" } else { configured_level };
    init_logging_with_level("g6", format, level)?;
    debug!("Debug logging enabled");
    Ok(())
}

/// Load and validate configuration, apply overrides and start logging
fn prepare(path: &Path, provider: Option<ProviderArg>, cli: &Cli) -> Result<G6Config> {
    let mut cfg = load_config(path)?;
    if let Some(provider) = provider {
        cfg.provider.kind = match provider {
            ProviderArg::Mock => ProviderKind::Mock,
            ProviderArg::Live => ProviderKind::Live,
        };
    }

    init_cli_logging(
        cli,
        &cfg.observability.log_format,
        &cfg.observability.log_level,
    )?;

    let report = validate_config(&cfg);
    for warning in &report.warnings {
        warn!(field = %warning.field, message = %warning.message, "Configuration warning");
    }
    if !report.is_valid() {
        for err in &report.errors {
            error!("{}", err);
        }
        anyhow::bail!(
            "Configuration is invalid ({} errors); run 'g6 validate --config {:?}'",
            report.errors.len(),
            path
        );
    }

    info!(
        platform = %cfg.platform.name,
        provider = %cfg.provider.kind,
        symbols = ?cfg.platform.symbols,
        "Configuration loaded"
    );
    Ok(cfg)
}

struct Pipeline {
    scheduler: CollectionScheduler,
    health: Arc<HealthMonitor>,
    registry: Arc<MetricsRegistry>,
}

fn build_pipeline(cfg: &G6Config) -> Result<Pipeline> {
    let thresholds = HealthThresholds::try_from(&cfg.health)?;
    let health = Arc::new(HealthMonitor::new(thresholds));
    let registry = Arc::new(MetricsRegistry::new());
    let provider = provider::build_provider(&cfg.provider).context("Failed to build data provider")?;

    let scheduler = CollectionScheduler::new(cfg, provider, health.clone(), registry.clone())
        .context("Failed to create collection scheduler")?;

    Ok(Pipeline {
        scheduler,
        health,
        registry,
    })
}

async fn start_command(cfg: G6Config) -> Result<()> {
    if cfg.observability.metrics_enabled {
        init_metrics(cfg.observability.metrics_port)?;
        info!(port = cfg.observability.metrics_port, "Prometheus exporter listening");
    }

    let pipeline = build_pipeline(&cfg)?;
    let shutdown = ShutdownController::with_ctrl_c();
    pipeline.scheduler.start()?;

    let mut status_timer = tokio::time::interval(Duration::from_secs(
        cfg.scheduler.status_log_interval_seconds.max(1),
    ));
    status_timer.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.wait_for_shutdown() => break,
            _ = status_timer.tick() => {
                let status = pipeline.scheduler.status();
                for symbol in &status.symbols {
                    info!(
                        symbol = %symbol.symbol,
                        phase = %symbol.phase,
                        succeeded = symbol.cycles_succeeded,
                        faulted = symbol.cycles_faulted,
                        skipped = symbol.skipped,
                        "Collection status"
                    );
                }
                if let Some(report) = &status.provider_health {
                    info!(
                        provider = %report.component,
                        health = %report.status,
                        "Provider status"
                    );
                }
                if status.overall_health != HealthStatus::Healthy {
                    warn!(health = %status.overall_health, "Collector is not healthy");
                }
            }
        }
    }

    pipeline.scheduler.stop().await?;
    info!(
        overall = %pipeline.health.overall(),
        metrics = pipeline.registry.len(),
        "G6 stopped"
    );
    Ok(())
}

async fn once_command(cfg: G6Config, only: Option<&str>, ignore_session: bool) -> Result<()> {
    let pipeline = build_pipeline(&cfg)?;
    let gate = if ignore_session {
        SessionGate::Bypass
    } else {
        SessionGate::Enforce
    };

    let symbols: Vec<String> = match only {
        Some(symbol) => vec![symbol.to_string()],
        None => pipeline.scheduler.symbols().to_vec(),
    };

    let provider_health = pipeline.scheduler.check_provider().await;
    if provider_health.status != HealthStatus::Healthy {
        warn!(health = %provider_health.status, "Provider reports it is not healthy");
    }

    let mut results = serde_json::Map::new();
    for symbol in &symbols {
        let outcome = pipeline.scheduler.run_cycle(symbol, gate).await?;
        debug!(?outcome, "Cycle finished");
        let value = match pipeline.scheduler.latest_result(symbol) {
            Some(result) => serde_json::to_value(result)?,
            None => serde_json::Value::Null,
        };
        results.insert(symbol.clone(), value);
    }

    let output = serde_json::json!({
        "status": pipeline.scheduler.status(),
        "results": results,
        "health": pipeline.health.report(),
        "metrics": pipeline.registry.snapshot(),
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

fn validate_command(config_path: &Path) -> Result<()> {
    info!(path = ?config_path, "Validating configuration");

    let config = match load_config(config_path) {
        Ok(c) => c,
        Err(e) => {
            error!(%e, "Failed to load configuration");
            anyhow::bail!(e);
        }
    };

    let report = validate_config(&config);

    println!("\n=== Configuration Validation Report ===\n");

    if !report.warnings.is_empty() {
        println!("Warnings ({}):", report.warnings.len());
        for warning in &report.warnings {
            println!("  [warn] [{}] {}", warning.field, warning.message);
        }
        println!();
    }

    if !report.errors.is_empty() {
        println!("Errors ({}):", report.errors.len());
        for err in &report.errors {
            println!("  [error] {}", err);
        }
        println!();
        anyhow::bail!("Configuration validation failed");
    }

    println!("[ok] Configuration is valid!");
    println!();
    println!("Platform: {} {}", config.platform.name, config.platform.version);
    println!("Symbols: {}", config.platform.symbols.join(", "));
    println!(
        "Session: {} {}-{} (UTC{:+}m), {} holidays",
        config.calendar.exchange,
        config.calendar.session_start,
        config.calendar.session_end,
        config.calendar.utc_offset_minutes,
        config.calendar.holidays.len()
    );
    println!("Provider: {}", config.provider.kind);
    println!(
        "Interval: {}s, retry budget {}",
        config.scheduler.interval_seconds, config.scheduler.retry_budget
    );

    Ok(())
}

fn init_command(output_path: &Path) -> Result<()> {
    info!(?output_path, "Initializing new configuration file");

    let config = generate_default_config();

    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {:?}", parent))?;
    }

    save_config(&config, output_path)?;

    println!("[ok] Configuration file created successfully!");
    println!();
    println!("Location: {:?}", output_path);
    println!();
    println!("This configuration includes:");
    println!("  - NSE session calendar (09:15-15:30 IST)");
    println!("  - {} symbols ({})", config.platform.symbols.len(), config.platform.symbols.join(", "));
    println!("  - Seeded mock provider, live provider credentials read from environment variables");
    println!();
    println!("Next steps:");
    println!("  1. Add exchange holidays to the calendar section");
    println!("  2. Set KITE_API_KEY and KITE_ACCESS_TOKEN to use the live provider");
    println!(
        "  3. Run 'g6 validate --config {:?}' to check configuration",
        output_path
    );
    println!(
        "  4. Run 'g6 start --config {:?}' to start collecting",
        output_path
    );

    Ok(())
}
