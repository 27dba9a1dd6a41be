use anyhow::Context;
use clap::Parser;
use std::env;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use opsdeck_core::config::ServerConfig;
use opsdeck_core::server::{AppState, ChannelRegistry, GitCli, SshConnector};

#[derive(Parser, Debug)]
#[command(name = "opsdeck-core", version, about = "OpsDeck control panel backend")]
struct Args {
    /// Config file (defaults to ~/.opsdeck/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen port, overrides the config file and OPSDECK_PORT
    #[arg(short, long)]
    port: Option<u16>,

    /// Listen address
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let path = args.config.clone().or_else(ServerConfig::default_path);
    let mut config = match &path {
        Some(path) => ServerConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ServerConfig::default(),
    };

    if let Some(port) = env::var("OPSDECK_PORT").ok().and_then(|p| p.parse::<u16>().ok()) {
        config.server.port = port;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }

    opsdeck_core::util::init_logging(&config.log);
    info!(
        config = ?path,
        repos = config.repos.len(),
        "Starting OpsDeck core on {}:{}",
        config.server.bind,
        config.server.port
    );
    if !config.auth.disabled && config.auth.tokens.is_empty() {
        warn!("No auth tokens configured, every connection will be rejected");
    }

    let git = GitCli::from_config(&config.git).context("resolving git binary")?;
    let connector = Arc::new(SshConnector::new(&config.ssh));
    let state = AppState {
        config: Arc::new(config),
        git,
        registry: ChannelRegistry::shared(),
        connector,
    };

    opsdeck_core::server::run_server(state)
        .await
        .map_err(|e| anyhow::anyhow!("server error: {}", e))
}
