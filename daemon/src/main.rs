//! Entry point for running a Nebula node.

use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use nebula_network::{AddressCodec, MultiaddrCodec, TcpTransport};
use nebula_node::{init_logging, Node, NodeConfig, ShutdownController};

#[derive(Parser)]
#[command(name = "nebula-daemon", about = "Nebula P2P node daemon")]
struct Cli {
    /// Chain id; peers on other chains are refused.
    #[arg(long, env = "NEBULA_CHAIN_ID")]
    chain_id: Option<u32>,

    /// IP to listen on for P2P connections.
    #[arg(long, env = "NEBULA_IP")]
    ip: Option<IpAddr>,

    /// Port for P2P connections.
    #[arg(long, env = "NEBULA_P2P_PORT")]
    port: Option<u16>,

    /// Identity seed. 0 (the default) uses OS randomness.
    #[arg(long, env = "NEBULA_SEED")]
    seed: Option<u64>,

    /// Maximum peers per routing-table bucket.
    #[arg(long, env = "NEBULA_BUCKET_SIZE")]
    bucket_size: Option<usize>,

    /// Gossip checksums remembered for relay dedup.
    #[arg(long, env = "NEBULA_RELAY_CACHE_SIZE")]
    relay_cache_size: Option<usize>,

    /// Trusted bootstrap nodes (comma-separated
    /// "/ip4/1.2.3.4/tcp/8680/ipfs/<id>,...").
    #[arg(long, env = "NEBULA_TRUSTED_NODES", value_delimiter = ',')]
    trusted_nodes: Vec<String>,

    /// Collect Prometheus metrics and print them on exit.
    #[arg(long, env = "NEBULA_ENABLE_METRICS")]
    metrics: bool,

    /// Log format: "human" or "json".
    #[arg(long, env = "NEBULA_LOG_FORMAT")]
    log_format: Option<String>,

    /// Log level: "trace", "debug", "info", "warn", "error".
    #[arg(long, env = "NEBULA_LOG_LEVEL")]
    log_level: Option<String>,

    /// Path to a TOML configuration file. If provided, file settings
    /// are used as the base; CLI flags and env vars override them.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Subcommand.
    #[command(subcommand)]
    command: Command,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Node operations.
    #[command(name = "node")]
    Node {
        #[command(subcommand)]
        action: NodeAction,
    },
    /// Print the node id the configured seed produces.
    Identity,
}

#[derive(clap::Subcommand)]
enum NodeAction {
    /// Run the node until SIGINT/SIGTERM.
    Run,
}

impl Cli {
    /// File config (or defaults) with CLI flags and env vars laid on top.
    fn resolve_config(&self) -> anyhow::Result<NodeConfig> {
        let base = match &self.config {
            Some(path) => {
                let path = path.to_string_lossy();
                NodeConfig::from_toml_file(&path)
                    .with_context(|| format!("loading config file {path}"))?
            }
            None => NodeConfig::default(),
        };

        let config = NodeConfig {
            chain_id: self.chain_id.unwrap_or(base.chain_id),
            ip: self.ip.unwrap_or(base.ip),
            port: self.port.unwrap_or(base.port),
            random_seed: self.seed.unwrap_or(base.random_seed),
            bucket_size: self.bucket_size.unwrap_or(base.bucket_size),
            relay_cache_size: self.relay_cache_size.unwrap_or(base.relay_cache_size),
            trusted_nodes: if self.trusted_nodes.is_empty() {
                base.trusted_nodes.clone()
            } else {
                self.trusted_nodes.clone()
            },
            enable_metrics: self.metrics || base.enable_metrics,
            log_format: self.log_format.clone().unwrap_or(base.log_format.clone()),
            log_level: self.log_level.clone().unwrap_or(base.log_level.clone()),
            ..base
        };
        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = cli.resolve_config()?;
    init_logging(config.log_format()?, &config.log_level)?;

    match cli.command {
        Command::Identity => {
            let identity = nebula_crypto::generate_identity(config.random_seed)?;
            println!("node id:      {}", identity.id());
            println!(
                "trusted addr: {}",
                MultiaddrCodec.encode(&config.listen_address(), &identity.id())
            );
        }
        Command::Node { action } => match action {
            NodeAction::Run => run(config).await?,
        },
    }

    Ok(())
}

async fn run(config: NodeConfig) -> anyhow::Result<()> {
    tracing::info!(
        chain_id = config.chain_id,
        addr = %config.listen_address(),
        trusted = config.trusted_nodes.len(),
        "starting Nebula node"
    );
    let enable_metrics = config.enable_metrics;

    let mut node = Node::new(config, TcpTransport::new()).await?;
    node.start().await?;

    let reason = ShutdownController::new().wait_for_signal().await;
    tracing::info!(signal = %reason, "stopping node");
    node.stop().await?;

    if enable_metrics {
        print!("{}", node.metrics().encode()?);
    }
    tracing::info!("Nebula daemon exited cleanly");
    Ok(())
}
