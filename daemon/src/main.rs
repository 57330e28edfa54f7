//! Whistle daemon: entry point for running the bundler watchdog.

mod alerts;

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use whistle_network::{PeerCrawler, PeerDirectory, ReqwestTransport};
use whistle_node::{init_logging, open_store, register_bundler, LogFormat, Watchdog, WatchdogConfig};
use whistle_protocol::HttpTransport;
use whistle_types::SystemClock;

use crate::alerts::JsonLinesAlertSink;

#[derive(Parser)]
#[command(name = "whistle-daemon", about = "Bundler watchdog daemon")]
struct Cli {
    /// Path to a TOML configuration file. File settings are the base; CLI
    /// flags and env vars override them.
    #[arg(long, env = "WHISTLE_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory for the LMDB store.
    #[arg(long, env = "WHISTLE_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Gateway used as the last resort for every request.
    #[arg(long, env = "WHISTLE_GATEWAY_URL")]
    gateway: Option<String>,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[arg(long, env = "WHISTLE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log format: "human" or "json".
    #[arg(long, env = "WHISTLE_LOG_FORMAT")]
    log_format: Option<String>,

    /// Serve Prometheus metrics on this port.
    #[arg(long, env = "WHISTLE_METRICS_PORT")]
    metrics_port: Option<u16>,

    /// Append alerts to this file as JSON lines instead of logging them.
    #[arg(long, env = "WHISTLE_ALERT_LOG")]
    alert_log: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Run the watchdog until SIGINT/SIGTERM.
    Run {
        /// Bundler to watch, in addition to the configured ones (repeatable).
        #[arg(long = "bundler", env = "WHISTLE_BUNDLERS", value_delimiter = ',')]
        bundlers: Vec<String>,

        /// Height to sync posted bundles from for newly added bundlers.
        #[arg(long, env = "WHISTLE_START_HEIGHT")]
        start_height: Option<u64>,
    },
    /// Register a bundler by URL.
    #[command(name = "add-bundler")]
    AddBundler { url: String },
    /// Crawl the peer graph once and store what answers.
    #[command(name = "crawl-peers")]
    CrawlPeers,
}

impl Cli {
    fn resolve_config(&self) -> anyhow::Result<WatchdogConfig> {
        let mut config = match &self.config {
            Some(path) => WatchdogConfig::from_toml_file(path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => WatchdogConfig::default(),
        };
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(gateway) = &self.gateway {
            config.gateway_url = gateway.clone();
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.log_format = format.clone();
        }
        if self.metrics_port.is_some() {
            config.metrics_port = self.metrics_port;
        }
        if let Command::Run { bundlers, start_height } = &self.command {
            for url in bundlers {
                if !config.bundlers.contains(url) {
                    config.bundlers.push(url.clone());
                }
            }
            if start_height.is_some() {
                config.start_height = *start_height;
            }
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.resolve_config()?;

    let format: LogFormat = config.log_format.parse().map_err(anyhow::Error::msg)?;
    init_logging(format, &config.log_level).map_err(anyhow::Error::msg)?;

    match cli.command {
        Command::Run { .. } => {
            tracing::info!(
                gateway = %config.gateway_url,
                data_dir = %config.data_dir.display(),
                bundlers = config.bundlers.len(),
                metrics_port = ?config.metrics_port,
                "starting watchdog"
            );
            let alerts = Arc::new(JsonLinesAlertSink::new(cli.alert_log));
            let watchdog = Watchdog::open(config, alerts)?;
            watchdog.run_until_signal().await?;
            tracing::info!("watchdog exited cleanly");
        }
        Command::AddBundler { url } => {
            let store = open_store(&config)?;
            let transport = ReqwestTransport::new()?;
            let (record, created) = register_bundler(store.as_ref(), &transport, &url).await?;
            if created {
                println!("added bundler {} ({})", record.url, record.address);
            } else {
                println!("bundler {} already registered", record.url);
            }
        }
        Command::CrawlPeers => {
            let store = open_store(&config)?;
            let transport: Arc<dyn HttpTransport> = Arc::new(ReqwestTransport::new()?);
            let directory = Arc::new(PeerDirectory::new(
                store,
                Arc::clone(&transport),
                Arc::new(SystemClock),
                config.peer_directory_config(),
            ));
            let crawler = PeerCrawler::new(directory, transport, config.max_peer_depth);
            let report = crawler.crawl().await?;
            println!("visited {} nodes, added {} peers", report.visited, report.added);
        }
    }

    Ok(())
}
