//! export-worker — runs the occurrence export service against a spool
//! directory.
//!
//! Drains jobs spooled by previous runs and any submitted while it is
//! up, one dispatcher per configured pool. SIGINT or SIGTERM starts
//! the staged shutdown; a second signal is not required.

use std::sync::Arc;

use clap::Parser;
use tracing::info;

use bioexport_core::ExportConfig;
use bioexport_notify::{SmtpMailer, SmtpSettings, TemplateRenderer};
use bioexport_service::{
    DisabledMinting, ExportService, HttpMintingService, HttpSearchEngine,
};

// ── CLI ─────────────────────────────────────────────────────────────

/// Biodiversity occurrence export worker.
#[derive(Parser, Debug)]
#[command(name = "export-worker", version, about)]
struct Cli {
    /// Configuration profile; selects the env-var prefix.
    #[arg(long, env = "BIOEXPORT_PROFILE", default_value = "")]
    profile: String,
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    bioexport_core::config::load_dotenv();
    let config = ExportConfig::for_profile(&cli.profile);
    config.log_summary();

    let search = Arc::new(HttpSearchEngine::new(config.search.service_url.clone()));
    let minting: Arc<dyn bioexport_service::MintingService> =
        match &config.minting.service_url {
            Some(url) => Arc::new(HttpMintingService::new(url.clone())),
            None => Arc::new(DisabledMinting),
        };
    let mailer = Arc::new(SmtpMailer::from_settings(&SmtpSettings {
        host: config.email.smtp_host.clone(),
        port: config.email.smtp_port,
        from: config.email.from.clone(),
    })?);
    let templates = TemplateRenderer::new(config.paths.template_dir.as_deref());

    let service = ExportService::build(config, search, minting, mailer, templates)?;
    service.start();
    service.ready().await;

    os_signal().await;
    info!("shutdown signal received");
    service.shutdown().await;
    info!("export-worker exited cleanly");

    Ok(())
}

/// Wait for SIGINT or SIGTERM (Unix) or Ctrl+C (cross-platform fallback).
async fn os_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to register SIGINT");
        let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM");
        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for ctrl_c");
    }
}
