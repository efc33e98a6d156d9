// Daemon module: wires the feed, module service and MISP into the enrichment loop

mod orchestrator;
mod signals;

pub use orchestrator::{CycleReport, EnrichmentContext, LoopState, LoopStats, Orchestrator};
pub use signals::{ReceivedSignal, SignalHandler};

use crate::config::{parse_duration, Config};
use crate::error::{GlueError, Result};
use crate::feed::{ReconnectPolicy, ZmqFeed};
use crate::modules::{AllowList, Catalog, ModuleService};
use crate::sink::MispSink;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Owns the external clients and runs the loop in the foreground
pub struct Daemon {
    config: Config,
    modules: ModuleService,
    sink: MispSink,
}

impl Daemon {
    /// Build clients from configuration. Fails if the MISP API key cannot be resolved.
    pub fn new(config: Config) -> Result<Self> {
        let modules = ModuleService::new(
            config.modules.base_url(),
            timeout(&config.modules.timeout, "modules.timeout")?,
        )?;

        let api_key = config.misp.resolve_api_key()?;
        let sink = MispSink::new(
            &config.misp.url,
            &api_key,
            config.misp.verify_tls,
            timeout(&config.misp.timeout, "misp.timeout")?,
        )?;

        if !config.misp.verify_tls {
            tracing::warn!("TLS certificate verification is disabled for {}", config.misp.url);
        }

        Ok(Self {
            config,
            modules,
            sink,
        })
    }

    /// Fetch the catalog, subscribe to the feed and process events until a
    /// shutdown signal arrives
    pub async fn run_foreground(&mut self) -> Result<LoopStats> {
        let catalog = self.modules.fetch_catalog().await?;
        report_configuration_gaps(&catalog, &self.config);

        let policy = reconnect_policy(&self.config)?;
        let mut feed =
            ZmqFeed::connect(&self.config.feed.host, self.config.feed.port, policy).await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let signal_task = SignalHandler::new()?.forward_to(shutdown_tx);

        let context = EnrichmentContext::new(
            catalog,
            &self.config.enrichment,
            self.config.feed.prefix_len,
        );
        let mut orchestrator = Orchestrator::new(
            context,
            Arc::new(self.modules.clone()),
            Arc::new(self.sink.clone()),
        );

        let stats = orchestrator.run(&mut feed, shutdown_rx).await;

        signal_task.abort();
        tracing::info!("Daemon shutdown complete");

        Ok(stats)
    }
}

fn timeout(value: &str, path: &str) -> Result<Duration> {
    parse_duration(value).ok_or_else(|| GlueError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Invalid duration format: {}", value),
    })
}

fn reconnect_policy(config: &Config) -> Result<ReconnectPolicy> {
    let idle = timeout(&config.feed.idle_reconnect, "feed.idle_reconnect")?;

    Ok(ReconnectPolicy {
        idle_timeout: Some(idle).filter(|d| !d.is_zero()),
        retry_interval: timeout(&config.feed.reconnect_interval, "feed.reconnect_interval")?,
    })
}

/// Warn about allow-list entries and module configs naming modules the
/// service does not offer as expansions
pub fn report_configuration_gaps(catalog: &Catalog, config: &Config) {
    let offered: Vec<&str> = catalog.expansion_modules().map(|m| m.name.as_str()).collect();

    if let AllowList::Only(names) = &config.enrichment.enabled {
        for name in names.iter().filter(|n| !offered.contains(&n.as_str())) {
            tracing::warn!("Enabled module '{}' is not an expansion module in the catalog", name);
        }
    }

    for name in config.enrichment.config.keys() {
        if !offered.contains(&name.as_str()) {
            tracing::warn!("Configuration given for unknown module '{}'", name);
        }
    }

    tracing::info!(
        "{} of {} catalog modules are expansion modules",
        offered.len(),
        catalog.len()
    );
}
