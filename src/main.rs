//! Mock HTTP Server - CLI Entry Point

use anyhow::{Context, Result};
use clap::Parser;
use mock_http_server::loader::LayeredProperties;
use mock_http_server::{ConfigLoader, ConfigSource, MockServer, ServerSettings};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "mock-http-server",
    about = "Configuration-driven mock HTTP server - templated stub responses and latency simulation",
    version
)]
struct Args {
    /// Path to configuration file (YAML or JSON)
    #[arg(short, long, default_value = "mock-server.yaml")]
    config: PathBuf,

    /// Server name reported at GET /
    #[arg(long, default_value = "mock-server")]
    name: String,

    /// Address to bind
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to bind (0 picks a free port)
    #[arg(short, long, default_value_t = 8080)]
    port: u16,

    /// Prefix stripped from every request path
    #[arg(long, default_value = "")]
    base_path: String,

    /// Delay applied when a response has none of its own
    #[arg(long, default_value_t = 0)]
    default_delay_ms: u64,

    /// Reload the configuration file when it changes
    #[arg(long)]
    auto_reload: bool,

    /// Poll interval for --auto-reload
    #[arg(long, default_value_t = 1000)]
    reload_interval_ms: u64,

    /// Property for `${key}` placeholders in endpoint paths (repeatable)
    #[arg(long = "property", value_name = "KEY=VALUE", value_parser = parse_property)]
    properties: Vec<(String, String)>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

fn parse_property(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected KEY=VALUE, got '{}'", raw))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if args.print_config {
        let default_config = include_str!("../demos/default-config.yaml");
        println!("{}", default_config);
        return Ok(());
    }

    let properties: HashMap<String, String> = args.properties.into_iter().collect();
    let loader = ConfigLoader::new(Arc::new(LayeredProperties::new(properties)));
    let source = ConfigSource::File(args.config.clone());

    if args.validate {
        if !args.config.exists() {
            anyhow::bail!("Configuration file not found: {:?}", args.config);
        }
        let (config, _) = loader
            .load(&source)
            .with_context(|| format!("invalid configuration {}", args.config.display()))?;
        println!(
            "Configuration is valid ({} endpoints defined)",
            config.endpoints.len()
        );
        return Ok(());
    }

    let settings = ServerSettings {
        name: args.name,
        host: args.host,
        port: args.port,
        base_path: args.base_path,
        default_delay_ms: args.default_delay_ms,
        auto_reload: args.auto_reload,
        reload_interval_ms: args.reload_interval_ms,
        ..Default::default()
    };

    info!(path = %args.config.display(), "Loading configuration");
    let server = MockServer::new(settings, source, loader);
    let address = server.start().await?;
    info!(address = %address, "Listening, press Ctrl-C to stop");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("Shutdown signal received");
    server.stop().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_property() {
        assert_eq!(
            parse_property("api.prefix=v2"),
            Ok(("api.prefix".to_string(), "v2".to_string()))
        );
        assert_eq!(
            parse_property("empty="),
            Ok(("empty".to_string(), String::new()))
        );
        assert!(parse_property("novalue").is_err());
        assert!(parse_property("=v").is_err());
    }

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from([
            "mock-http-server",
            "--port",
            "0",
            "--auto-reload",
            "--property",
            "a=b",
            "--property",
            "c=d",
        ]);
        assert_eq!(args.port, 0);
        assert!(args.auto_reload);
        assert_eq!(args.properties.len(), 2);
        assert_eq!(args.log_level, Level::INFO);
    }
}
