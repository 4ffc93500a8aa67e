//! hublink demo agents.
//!
//! `hublink hub` runs a hub that echoes every application message back to
//! its sender and reports client connections and timeouts. `hublink client`
//! runs a client that sends a numbered message every couple of seconds and
//! reports when the hub becomes unreachable. Both stop cleanly on Ctrl+C.

use anyhow::Result;
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use hublink::{
    ClientHandle, ClientNode, Endpoint, Envelope, HubHandle, HubNode, Identity, LinkConfig,
};
use rand::Rng;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "hublink", version, about = "Liveness-aware client/hub messaging demo")]
struct Cli {
    /// Endpoint to bind (hub) or dial (client), e.g. tcp://127.0.0.1:3559
    /// or ipc:///tmp/hublink.sock.
    #[arg(short, long, global = true)]
    endpoint: Option<String>,

    /// Path to a TOML configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the hub agent.
    Hub,
    /// Run a client agent.
    Client {
        /// Client identity; a random one is generated when omitted.
        #[arg(short, long)]
        identity: Option<String>,
    },
}

fn init_tracing_stderr() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}

fn resolve_endpoint(cli_endpoint: Option<&str>, config: &LinkConfig) -> Result<Endpoint> {
    match cli_endpoint {
        Some(s) => Ok(s.parse()?),
        None => Ok(Endpoint::tcp("127.0.0.1", config.default_tcp_port)),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing_stderr();

    let cli = Cli::parse();
    let config = LinkConfig::load(cli.config.as_deref());
    let endpoint = resolve_endpoint(cli.endpoint.as_deref(), &config)?;

    match cli.command {
        Commands::Hub => run_hub(&endpoint, config).await,
        Commands::Client { identity } => {
            let identity = identity
                .unwrap_or_else(|| format!("client-{:04x}", rand::thread_rng().gen::<u16>()));
            run_client(identity, &endpoint, config).await
        }
    }
}

/// Echoes every application message back to its sender.
struct EchoHandler(Arc<HubNode>);

#[async_trait]
impl HubHandle for EchoHandler {
    async fn on_message(&self, sender: Identity, message: Envelope) {
        info!(client = %sender, event = %message.event, data = %message.data, "Received");
        self.0.send(&sender, &message).await;
    }
}

async fn run_hub(endpoint: &Endpoint, config: LinkConfig) -> Result<()> {
    let hub = Arc::new(HubNode::bind(endpoint, config).await?);
    info!(%endpoint, "Hub listening");

    hub.on_connection(Some(Arc::new(|identity: Identity, _up: bool| {
        Box::pin(async move {
            info!(client = %identity, "Client connected");
        })
    })));
    hub.on_timeout(Some(Arc::new(|identity: Identity| {
        Box::pin(async move {
            error!(client = %identity, "Client timed out");
        })
    })));

    let runner = Arc::clone(&hub);
    let echo = Arc::clone(&hub);
    let running = tokio::spawn(async move { runner.start(Arc::new(EchoHandler(echo))).await });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    hub.close();
    running.await??;
    Ok(())
}

/// Prints every envelope the hub sends back.
struct PrintHandler;

#[async_trait]
impl ClientHandle for PrintHandler {
    async fn on_message(&self, message: Envelope) {
        info!(event = %message.event, data = %message.data, "Received");
    }
}

async fn run_client(identity: String, endpoint: &Endpoint, config: LinkConfig) -> Result<()> {
    let client = Arc::new(ClientNode::connect(identity.into(), endpoint, config).await?);
    info!(identity = %client.identity(), %endpoint, "Client connected");

    client.on_timeout(Some(Arc::new(|| {
        Box::pin(async {
            error!("Hub timed out");
        })
    })));

    let runner = Arc::clone(&client);
    let running = tokio::spawn(async move { runner.start(Arc::new(PrintHandler)).await });

    // Chatter loop: one numbered message every two seconds.
    let sender = Arc::clone(&client);
    let chatter = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(2));
        let mut n: u64 = 0;
        loop {
            ticker.tick().await;
            n += 1;
            sender
                .send(&Envelope::new("message", json!({ "n": n })))
                .await;
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    chatter.abort();
    client.close();
    running.await??;
    Ok(())
}
