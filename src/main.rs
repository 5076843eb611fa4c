#![forbid(unsafe_code)]

//! `session-warden`: local session supervisor binary.
//!
//! Loads configuration, reconciles recorded session state with the OS,
//! then runs the liveness sweep and the observer HTTP surface until a
//! shutdown signal arrives.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use session_warden::context::SupervisorContext;
use session_warden::http;
use session_warden::supervisor::health_check::spawn_health_check;
use session_warden::supervisor::launcher::ProcessLauncher;
use session_warden::supervisor::recovery::{run_startup_recovery, RecoveryCoordinator};
use session_warden::{AppError, GlobalConfig, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "session-warden", about = "Local session supervisor", version, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: PathBuf,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Override the persisted auto-recover policy.
    #[arg(long)]
    auto_recover: Option<bool>,

    /// Print the recovery report as JSON and exit without changing anything.
    #[arg(long)]
    check: bool,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("session-warden bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let config = GlobalConfig::load_from_path(&args.config)?;
    info!(data_dir = %config.data_dir.display(), "configuration loaded");

    // ── Open store and wire components ──────────────────
    let ctx = SupervisorContext::open(config).await?;

    if args.check {
        let coordinator = RecoveryCoordinator::new(Arc::clone(&ctx.store), Arc::clone(&ctx.probe));
        let report = coordinator.recovery_report().await?;
        let rendered = serde_json::to_string_pretty(&report)
            .map_err(|err| AppError::Config(format!("failed to render report: {err}")))?;
        println!("{rendered}");
        ctx.dispose();
        return Ok(());
    }

    let auto_recover = ctx.apply_recovery_policy(args.auto_recover).await?;
    info!(auto_recover, "recovery policy in effect");

    // ── Startup recovery, before sweep and HTTP ─────────
    let launcher = ProcessLauncher::new(Arc::clone(&ctx.store), Arc::clone(&ctx.tracker));
    let recovery = run_startup_recovery(&ctx, &launcher).await?;
    info!(
        marked_stopped = recovery.marked_stopped.len(),
        recovered = recovery.outcome.recovered.len(),
        failed = recovery.outcome.failed.len(),
        adopted = recovery.adopted.len(),
        healthy = recovery.report.healthy.len(),
        "startup recovery complete"
    );

    // ── Background tasks ────────────────────────────────
    let ct = CancellationToken::new();
    let sweep_handle = spawn_health_check(
        Arc::clone(&ctx.tracker),
        ctx.config.sweep_interval(),
        ct.clone(),
    );
    info!(interval_secs = ctx.config.supervisor.sweep_interval_seconds, "health check started");

    let http_handle = match ctx.config.http_port {
        Some(port) => {
            let listener = http::bind_http(port).await?;
            let http_ctx = ctx.clone();
            let http_ct = ct.clone();
            Some(tokio::spawn(async move {
                if let Err(err) = http::serve_http(listener, http_ctx, http_ct).await {
                    error!(%err, "observer HTTP surface failed");
                }
            }))
        }
        None => {
            info!("http_port not set; observer HTTP surface disabled");
            None
        }
    };

    info!("session-warden ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    if let Err(err) = sweep_handle.await {
        error!(%err, "health check task panicked");
    }
    if let Some(handle) = http_handle {
        if let Err(err) = handle.await {
            error!(%err, "HTTP task panicked");
        }
    }

    ctx.dispose();
    info!("session-warden shut down");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                tracing::warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            tracing::error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}
