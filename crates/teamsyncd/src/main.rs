//! Team Port Synchronization Daemon
//!
//! Main entry point for the teamsyncd daemon.
//! Keeps the port store of one team device in sync with the kernel and
//! serves the state registry built on top of it.

use anyhow::{Context, Result};
use clap::Parser;
use sonic_teamsyncd::TeamsyncConfig;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Team port synchronization daemon
#[derive(Debug, Parser)]
#[command(name = "teamsyncd", version, about)]
struct Args {
    /// Configuration file
    #[arg(short, long, default_value = sonic_teamsyncd::DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Team device interface index, overrides the configuration file
    #[arg(short, long)]
    ifindex: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = TeamsyncConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    if let Some(ifindex) = args.ifindex {
        config.team.ifindex = ifindex;
    }

    init_logging(&config.logging.level)?;
    config.validate().context("invalid configuration")?;

    info!(team = config.team.ifindex, "teamsyncd: Starting team port synchronization daemon");

    match run_daemon(config).await {
        Ok(()) => {
            info!("teamsyncd: Daemon exiting normally");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "teamsyncd: Daemon exiting with error");
            Err(e)
        }
    }
}

/// Initialize structured logging; `RUST_LOG` wins over the configured level
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_line_number(true)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber).context("failed to set logger")?;
    Ok(())
}

#[cfg(target_os = "linux")]
async fn run_daemon(config: TeamsyncConfig) -> Result<()> {
    use sonic_teamsyncd::{
        BasicsRegistration, GenlTransport, IfinfoWatch, PortReconciler, StateBasics, Teamd,
    };
    use std::sync::Arc;

    let mut teamd = Teamd::new(config.team.ifindex);
    let basics = BasicsRegistration::register(&mut teamd, Arc::new(StateBasics::new()))
        .context("registering basic state items")?;
    let teamd = teamd.into_shared();

    let transport = GenlTransport::connect().context("connecting to generic netlink")?;
    let mut reconciler = PortReconciler::new(Box::new(transport), config.request_timeout());

    reconciler
        .reconcile(&teamd)
        .await
        .context("initial port list reconciliation")?;
    let watch = IfinfoWatch::default();
    refresh_masters(&watch, &teamd);
    info!(ports = teamd.lock().team().ports().len(), "teamsyncd: Initial port list applied");

    let mut interval = tokio::time::interval(config.reconcile_interval());
    // the first tick completes immediately
    interval.tick().await;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                if let Err(e) = reconciler.reconcile(&teamd).await {
                    error!(error = %e, retryable = e.is_retryable(), "teamsyncd: Port list reconciliation failed");
                }
                refresh_masters(&watch, &teamd);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("teamsyncd: Received shutdown signal");
                break;
            }
        }
    }

    let mut teamd = teamd.lock();
    basics.unregister(&mut teamd);
    teamd.shutdown();
    Ok(())
}

#[cfg(target_os = "linux")]
fn refresh_masters(watch: &sonic_teamsyncd::IfinfoWatch, teamd: &sonic_teamsyncd::SharedTeamd) {
    if let Err(e) = watch.refresh(teamd) {
        tracing::warn!(error = %e, "teamsyncd: Interface master refresh failed");
    }
}

#[cfg(not(target_os = "linux"))]
async fn run_daemon(_config: TeamsyncConfig) -> Result<()> {
    anyhow::bail!("team generic netlink is only available on Linux")
}
