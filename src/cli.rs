use anyhow::{bail, Context};
use chrono::Utc;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::config_loader::{load_config, CiConfig};
use crate::emissions::EmissionInputs;
use crate::log_sink::init_logging;
use crate::orchestrator::ReportOrchestrator;

/// Top-level CLI for the CI compliance engine
#[derive(Parser)]
#[command(
    name = "ci_compliance",
    version,
    about = "Carbon intensity compliance engine for biofuel feedstock"
)]
pub struct Cli {
    /// Path to a TOML config file (defaults to ci_compliance.toml)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Debug-level logging unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Serve the HTTP API and run the periodic expiry sweep
    Serve {
        /// Host/IP to bind (overrides config)
        #[arg(long)]
        host: Option<String>,
        /// Port to bind (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Compute a CI score without storing anything
    Calculate {
        #[arg(short, long)]
        methodology: String,
        #[arg(short = 'q', long, default_value = "measured")]
        data_quality: String,
        /// Emission values as JSON, e.g. '{"cultivation": 10, "processing": 5}'
        #[arg(short, long)]
        emissions: String,
    },

    /// Print a report's audit history as JSON lines
    History {
        #[arg(long)]
        report_id: String,
    },

    /// Verify audit chains against stored status (all reports if no id given)
    Verify {
        #[arg(long)]
        report_id: Option<String>,
    },

    /// Expire decided reports whose validity window has elapsed
    SweepExpired,

    /// Print the effective configuration as TOML
    ShowConfig,
}

pub fn dispatch(cli: Cli) -> anyhow::Result<()> {
    init_logging(cli.verbose);
    let config = load_config(cli.config.as_deref()).context("Failed to load config")?;

    match cli.command {
        Commands::ShowConfig => {
            let rendered = toml::to_string_pretty(&config).context("Failed to render config")?;
            println!("{rendered}");
        }
        Commands::Calculate {
            methodology,
            data_quality,
            emissions,
        } => {
            let inputs: EmissionInputs =
                serde_json::from_str(&emissions).context("Emissions must be a JSON object")?;
            let orchestrator = calculator(&config)?;
            let calc = orchestrator.calculate(&inputs, &methodology, &data_quality)?;
            println!("{}", serde_json::to_string_pretty(&calc)?);
        }
        Commands::History { report_id } => {
            let orchestrator = ReportOrchestrator::from_config(&config)?;
            let entries = orchestrator.store().history(&report_id)?;
            if entries.is_empty() {
                bail!("No audit history for {report_id}");
            }
            for entry in entries {
                println!("{}", serde_json::to_string(&entry)?);
            }
        }
        Commands::Verify { report_id } => {
            let orchestrator = ReportOrchestrator::from_config(&config)?;
            verify(&orchestrator, report_id)?;
        }
        Commands::SweepExpired => {
            let orchestrator = ReportOrchestrator::from_config(&config)?;
            let expired = orchestrator.sweep_expired(Utc::now())?;
            println!("Expired {} report(s)", expired.len());
            for id in expired {
                println!("  {id}");
            }
        }
        Commands::Serve { host, port } => {
            let host = host.unwrap_or_else(|| config.web.host.clone());
            let port = port.unwrap_or(config.web.port);
            serve(&config, format!("{host}:{port}"))?;
        }
    }
    Ok(())
}

/// Calculation only needs the engine, so it never opens the store.
fn calculator(config: &CiConfig) -> anyhow::Result<ReportOrchestrator> {
    let mut scratch = config.clone();
    scratch.db_backend = "memory".to_string();
    Ok(ReportOrchestrator::from_config(&scratch)?)
}

fn verify(orchestrator: &ReportOrchestrator, report_id: Option<String>) -> anyhow::Result<()> {
    let ids = match report_id {
        Some(id) => vec![id],
        None => orchestrator
            .store()
            .list_reports(None)?
            .into_iter()
            .map(|r| r.report_id)
            .collect(),
    };

    let mut failures = 0usize;
    for id in &ids {
        match orchestrator.reconcile(id) {
            Ok(summary) => println!(
                "ok    {} ({} entries, status {})",
                id,
                summary.entries,
                summary
                    .stored_status
                    .map(|s| s.as_str())
                    .unwrap_or("deleted")
            ),
            Err(e) => {
                failures += 1;
                println!("FAIL  {id}: {e}");
            }
        }
    }
    if failures > 0 {
        bail!("{failures} of {} report(s) failed verification", ids.len());
    }
    Ok(())
}

fn serve(config: &CiConfig, addr: String) -> anyhow::Result<()> {
    let orchestrator = Arc::new(ReportOrchestrator::from_config(config)?);
    let app = crate::ciweb::build_router(orchestrator.clone());
    let sweep_every = Duration::from_secs(config.web.sweep_interval_secs.max(1));

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to build Tokio runtime")?;

    rt.block_on(async move {
        let socket_addr: std::net::SocketAddr = addr
            .parse()
            .with_context(|| format!("Invalid bind address {addr}"))?;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_every);
            loop {
                ticker.tick().await;
                let orc = orchestrator.clone();
                match tokio::task::spawn_blocking(move || orc.sweep_expired(Utc::now())).await {
                    Ok(Ok(_)) => {}
                    Ok(Err(e)) => error!("Expiry sweep failed: {e}"),
                    Err(e) => error!("Expiry sweep task panicked: {e}"),
                }
            }
        });

        let listener = tokio::net::TcpListener::bind(socket_addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;
        info!("HTTP server listening on http://{addr}");
        axum::serve(listener, app).await.context("Server error")?;
        Ok::<(), anyhow::Error>(())
    })
}
