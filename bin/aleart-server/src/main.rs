//! aleart-server – entry point.
//!
//! Startup order:
//! 1. Parse the command line and configuration from environment variables.
//! 2. Initialise structured tracing (JSON when `ALEART_LOG_JSON=true`).
//! 3. Open the SQLite database and run pending migrations.
//! 4. Either run a reconciliation sweep and exit, or
//! 5. preload the model in the background and serve HTTP with graceful shutdown.

mod cli;
mod config;
mod error;
mod middleware;
mod routes;
mod schemas;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use aleart_core::{
    GenerationService, HttpSynthesizer, LocalArtifactStore, ReconcileReport, ReconciliationJob,
    SqliteJobStore, SynthesizerHandle,
};
use clap::Parser;
use tracing::{info, warn};

use crate::cli::{Cli, Command, ReconcileArgs};
use crate::config::Config;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Command line & configuration ────────────────────────────────────────
    let cli = Cli::parse();
    let cfg = Config::from_env();

    // ── 2. Tracing ─────────────────────────────────────────────────────────────
    init_tracing(&cfg);
    info!(version = env!("CARGO_PKG_VERSION"), "aleart-server starting");

    // ── 3. Database ────────────────────────────────────────────────────────────
    let jobs = Arc::new(SqliteJobStore::connect(&cfg.database_url).await?);
    info!(database_url = %cfg.database_url, "database ready");

    let artifacts = Arc::new(LocalArtifactStore::new(&cfg.artifact_dir));

    match cli.command.unwrap_or(Command::Serve) {
        // ── 4. One-off reconciliation sweep ────────────────────────────────────
        Command::Reconcile(args) => {
            let job = ReconciliationJob::new(artifacts, jobs);
            reconcile(&job, args).await
        }
        // ── 5. HTTP server ─────────────────────────────────────────────────────
        Command::Serve => {
            let synth = HttpSynthesizer::new(cfg.synth_url.clone(), cfg.synth_model.clone())?;
            let handle = Arc::new(SynthesizerHandle::new(Arc::new(synth), cfg.synth_timeout));
            let generation = GenerationService::new(handle, artifacts, jobs)
                .with_unowned_records(cfg.record_unowned);
            serve(cfg, generation).await
        }
    }
}

fn init_tracing(cfg: &Config) {
    // Build the log-level filter, warning loudly if the configured value is
    // not a valid tracing filter expression.
    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match cfg.log_level.parse::<tracing_subscriber::EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: ALEART_LOG='{}' is not a valid tracing filter ({}); \
                     falling back to 'info'",
                    cfg.log_level, e
                );
                tracing_subscriber::EnvFilter::new("info")
            }
        },
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_thread_ids(true);

    if cfg.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

async fn reconcile(job: &ReconciliationJob, args: ReconcileArgs) -> anyhow::Result<()> {
    let reports = match args.token_id {
        Some(token_id) => vec![job.run(&token_id).await?],
        None => job.run_all().await?,
    };
    info!(
        tokens = reports.len(),
        patched = reports.iter().map(ReconcileReport::patched).sum::<usize>(),
        no_candidate = reports.iter().map(ReconcileReport::no_candidate).sum::<usize>(),
        no_op = reports.iter().map(ReconcileReport::no_op).sum::<usize>(),
        failed = reports.iter().map(ReconcileReport::failed).sum::<usize>(),
        "reconcile command finished"
    );
    Ok(())
}

async fn serve(cfg: Config, generation: GenerationService) -> anyhow::Result<()> {
    let state = Arc::new(AppState::new(cfg, generation));

    if state.config.preload_model {
        let preload = state.generation.clone();
        tokio::spawn(async move {
            if preload.synthesizer().ensure_ready().await.is_err() {
                warn!("model preload failed; the first request will retry");
            }
        });
    }

    let app = routes::build(Arc::clone(&state));
    let addr: SocketAddr = state.config.bind_address.parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, artifact_dir = %state.config.artifact_dir.display(), "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("aleart-server stopped");
    Ok(())
}

/// Returns a future that resolves when SIGINT (Ctrl-C) or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install CTRL+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received; starting graceful shutdown");
}
