use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::net::IpAddr;
use tracing::{info, warn};

use unifi_gateway::comms::local_api;
use unifi_gateway::gateway::{Gateway, GatewayConfig};
use unifi_gateway::tools::ToolRegistry;
use unifi_gateway::utils;

#[derive(Parser)]
#[command(name = "unifi-gateway", version, about = "Secure request gateway for UniFi controllers")]
struct AppCli {
    /// Config file path (JSON); UNIFI_* environment variables override it
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Subcommands
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start HTTP server (local API)
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
        /// Address to bind; keep it on loopback unless fronted by a proxy
        #[arg(long, default_value = "127.0.0.1")]
        bind: IpAddr,
    },
    /// Check the controller once and print the result
    Health,
    /// List registered tools
    Tools,
}

fn load_config(path: Option<&str>) -> Result<GatewayConfig> {
    match path {
        Some(p) => {
            let mut config = GatewayConfig::from_file(p)
                .with_context(|| format!("loading config from {p}"))?;
            config.apply_env().context("applying environment overrides")?;
            Ok(config)
        }
        None => GatewayConfig::from_env().context("reading configuration from environment"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    utils::logging::init();

    let args = AppCli::parse();
    match args.command {
        Commands::Serve { port, bind } => {
            let config = load_config(args.config.as_deref())?;
            let gateway = Gateway::from_config(&config)?;
            if gateway.operator_token.is_none() {
                warn!("no operator token configured, credential rotation and session invalidation are disabled");
            }
            info!("Starting gateway API on {bind}:{port}");
            local_api::serve(gateway, bind, port).await?;
        }
        Commands::Health => {
            let config = load_config(args.config.as_deref())?;
            let gateway = Gateway::from_config(&config)?;
            let report = ToolRegistry::with_defaults()
                .invoke(&gateway.dispatcher, "unifi_health", &json!({}))
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if report["ok"] != true {
                std::process::exit(1);
            }
        }
        Commands::Tools => {
            let tools = ToolRegistry::with_defaults().describe();
            println!("{}", serde_json::to_string_pretty(&tools)?);
        }
    }

    Ok(())
}
