//! ---
//! xp_section: "01-core-functionality"
//! xp_subsection: "binary"
//! xp_type: "source"
//! xp_scope: "code"
//! xp_description: "Binary entrypoint for the experience host daemon."
//! xp_version: "v0.0.0-prealpha"
//! xp_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{info, warn};
use xphost_common::{init_tracing, HostConfig, LogFormat};
use xphost_kernel::uri::normalize_manifest_url;
use xphost_kernel::{
    ExperienceOptions, FilePreferenceStore, HttpManifestFetcher, Kernel, KernelDeps, KernelEvent,
    KernelHandle, SimulatedSurfaces, SimulatedTaskManager,
};

/// Grace period on top of the fetch timeout before the daemon gives up waiting.
const SETTLE_MARGIN: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(author, version, about = "Experience host daemon", long_about = None)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, help = "Human readable console logs instead of JSON")]
    pretty: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Open an experience by URI and wait until it is running")]
    Open {
        uri: String,
        #[arg(long, value_name = "JSON", help = "JSON object passed to the experience as options")]
        params: Option<String>,
    },
    #[command(about = "Reload an experience by manifest URL")]
    Reload { url: String },
    #[command(about = "Print the bundle URL the home surface would load")]
    HomeBundleUrl,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut candidates = Vec::new();
    if let Some(path) = &cli.config {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from("configs/xphost.toml"));

    let loaded = HostConfig::load_with_source(&candidates)?;
    let mut config = loaded.config;
    if cli.pretty {
        config.logging.format = LogFormat::Pretty;
    }
    init_tracing("xphostd", &config.logging)?;
    match &loaded.source {
        Some(path) => info!(config_path = %path.display(), "configuration loaded"),
        None => info!("no configuration file found; running with defaults"),
    }

    let kernel = start_kernel(&config)?;
    let outcome = match cli.command {
        Commands::Open { uri, params } => {
            let options = params
                .map(|raw| parse_options(&uri, &raw))
                .transpose()?;
            let target = normalize_manifest_url(&uri, config.host.deep_link_delimiter);
            let events = kernel.subscribe();
            kernel.open_experience(uri, options)?;
            watch_until_settled(&kernel, events, &target, settle_timeout(&config)).await
        }
        Commands::Reload { url } => {
            let target = normalize_manifest_url(&url, config.host.deep_link_delimiter);
            let events = kernel.subscribe();
            kernel.reload_experience(url)?;
            watch_until_settled(&kernel, events, &target, settle_timeout(&config)).await
        }
        Commands::HomeBundleUrl => {
            println!("{}", kernel.home_bundle_url().await?);
            Ok(())
        }
    };

    for entry in kernel.errors().entries() {
        eprintln!("{}", serde_json::to_string(&entry)?);
    }
    kernel.shutdown().await;
    outcome
}

fn start_kernel(config: &HostConfig) -> Result<KernelHandle> {
    let fetcher = HttpManifestFetcher::new(&config.fetcher).context("failed to build manifest fetcher")?;
    let preferences = FilePreferenceStore::open(&config.preferences.path).with_context(|| {
        format!(
            "failed to open preference store {}",
            config.preferences.path.display()
        )
    })?;
    let tasks = Arc::new(SimulatedTaskManager::new());
    let surfaces = Arc::new(SimulatedSurfaces::new(Arc::clone(&tasks)));
    let kernel = Kernel::start(
        config,
        KernelDeps {
            fetcher: Arc::new(fetcher),
            tasks,
            surfaces: surfaces.clone(),
            preferences: Arc::new(preferences),
        },
    );
    surfaces.auto_attach(kernel.clone());
    Ok(kernel)
}

fn parse_options(uri: &str, raw: &str) -> Result<ExperienceOptions> {
    let params: Map<String, Value> =
        serde_json::from_str(raw).context("--params must be a JSON object")?;
    Ok(ExperienceOptions {
        uri: uri.to_owned(),
        params,
    })
}

fn settle_timeout(config: &HostConfig) -> Duration {
    config.fetcher.timeout.max(config.kernel.optimistic_timeout) + SETTLE_MARGIN
}

/// Print kernel events as JSON lines until the open for `target` settles.
async fn watch_until_settled(
    kernel: &KernelHandle,
    mut events: broadcast::Receiver<KernelEvent>,
    target: &str,
    timeout: Duration,
) -> Result<()> {
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => {
                warn!(manifest_url = target, "gave up waiting for the experience to settle");
                return Err(anyhow!("timed out after {timeout:?}"));
            }
            _ = signal::ctrl_c() => {
                info!("interrupted");
                return Ok(());
            }
            received = events.recv() => {
                let event = match received {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event stream lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => return Ok(()),
                };
                println!("{}", serde_json::to_string(&event)?);
                match event {
                    KernelEvent::HomeOpened => return Ok(()),
                    KernelEvent::Delivered { ref manifest_url, .. }
                    | KernelEvent::Activated { ref manifest_url, .. }
                    | KernelEvent::ReloadSkipped { ref manifest_url }
                        if manifest_url == target =>
                    {
                        let snapshot = kernel.registry_snapshot().await?;
                        println!("{}", serde_json::to_string(&snapshot)?);
                        return Ok(());
                    }
                    KernelEvent::Failed { ref manifest_url, ref message, .. } if manifest_url == target => {
                        return Err(anyhow!("failed to open {manifest_url}: {message}"));
                    }
                    KernelEvent::HandoffAbandoned { ref manifest_url } if manifest_url == target => {
                        return Err(anyhow!("no surface picked up {manifest_url}"));
                    }
                    _ => {}
                }
            }
        }
    }
}
