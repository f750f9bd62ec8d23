//! # switchboard
//!
//! Relay binary: loads settings, connects the control-plane bus and serves
//! browsers until SIGINT/SIGTERM.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use switchboard_bus::{EventBus, MemoryBus, Publisher, RedisBus};
use switchboard_core::InstanceId;
use switchboard_core::logging::init_subscriber;
use switchboard_server::connection::CloseReason;
use switchboard_server::dispatcher::EventHandlers;
use switchboard_server::metrics::install_recorder;
use switchboard_server::shutdown::wait_for_signal;
use switchboard_server::transport::tungstenite::WsUpstreamConnector;
use switchboard_server::{Dispatcher, RelayConfig, RelayContext, RelayServer};
use switchboard_settings::{DEFAULT_SETTINGS_PATH, RelaySettings, load_settings_from_path};

/// GraphQL-over-WebSocket relay.
#[derive(Parser, Debug)]
#[command(name = "switchboard", about = "GraphQL-over-WebSocket relay")]
struct Cli {
    /// Settings file (JSON). A missing file means defaults.
    #[arg(long, default_value = DEFAULT_SETTINGS_PATH)]
    config: PathBuf,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Log filter, e.g. `info` or `switchboard_server=debug` (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Use the in-process bus instead of Redis. Single-node and local runs only.
    #[arg(long)]
    memory_bus: bool,
}

impl Cli {
    /// Fold command-line overrides into loaded settings.
    fn apply(&self, settings: &mut RelaySettings) {
        if let Some(ref host) = self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(ref level) = self.log_level {
            settings.logging.level.clone_from(level);
        }
    }
}

fn connect_bus(settings: &RelaySettings, memory: bool) -> Result<Arc<dyn EventBus>> {
    if memory {
        tracing::warn!("using in-process bus; control-plane events stay local");
        return Ok(Arc::new(MemoryBus::new()));
    }
    let bus = RedisBus::new(&settings.bus.redis_url)
        .with_context(|| format!("Invalid Redis URL: {}", settings.bus.redis_url))?;
    Ok(Arc::new(bus))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let mut settings = load_settings_from_path(&args.config)
        .with_context(|| format!("Failed to load settings from {}", args.config.display()))?;
    args.apply(&mut settings);

    init_subscriber(&settings.logging.level, settings.logging.format);
    let metrics = install_recorder().context("Failed to install metrics recorder")?;

    let instance_id = InstanceId::new();
    tracing::info!(%instance_id, upstream = %settings.upstream.url, "starting relay");

    let bus = connect_bus(&settings, args.memory_bus)?;
    let publisher = Publisher::new(bus.clone(), settings.bus.outbound_topic.clone(), instance_id);
    let connector = Arc::new(WsUpstreamConnector::new(
        settings.upstream.url.clone(),
        settings.upstream.subprotocol.clone(),
        settings.upstream.connect_timeout(),
    ));

    let ctx = RelayContext::new(RelayConfig::from(&settings), publisher, connector)
        .with_metrics(metrics);
    let handlers = EventHandlers::from_context(&ctx);
    let server = RelayServer::new(ctx);
    let ctx = server.context().clone();

    // The relay cannot act on control-plane events without a subscription.
    let dispatcher = Dispatcher::new(
        bus,
        settings.bus.inbound_topic.clone(),
        handlers,
        settings.bus.max_concurrent_handlers,
    )
    .start(ctx.shutdown.token())
    .await
    .context("Failed to subscribe to the control-plane bus")?;

    let (addr, serve) = server.listen().await.context("Failed to bind server")?;
    tracing::info!("switchboard listening on ws://{addr}{}", settings.server.path);

    wait_for_signal().await;

    tracing::info!("Shutting down...");
    let closed = ctx
        .connections
        .disconnect_all(&CloseReason::new(CloseReason::GOING_AWAY, "server shutting down"));
    let drained = ctx.shutdown.graceful_shutdown(vec![serve, dispatcher], None).await;
    tracing::info!(closed, drained, "Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults() {
        let cli = Cli::parse_from(["switchboard"]);
        assert_eq!(cli.config, PathBuf::from(DEFAULT_SETTINGS_PATH));
        assert!(cli.host.is_none());
        assert!(cli.port.is_none());
        assert!(!cli.memory_bus);
    }

    #[test]
    fn cli_overrides_settings() {
        let cli = Cli::parse_from([
            "switchboard",
            "--host",
            "127.0.0.1",
            "--port",
            "9000",
            "--log-level",
            "debug",
        ]);
        let mut settings = RelaySettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.logging.level, "debug");
    }

    #[test]
    fn cli_without_flags_keeps_settings() {
        let cli = Cli::parse_from(["switchboard"]);
        let mut settings = RelaySettings::default();
        settings.server.port = 1234;
        cli.apply(&mut settings);
        assert_eq!(settings.server.port, 1234);
        assert_eq!(settings.logging.level, "info");
    }

    #[test]
    fn settings_file_feeds_relay_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"port": 9100, "maxConnections": 5}}"#).unwrap();

        let cli = Cli::parse_from(["switchboard", "--config", path.to_str().unwrap()]);
        let settings = load_settings_from_path(&cli.config).unwrap();
        let config = RelayConfig::from(&settings);
        assert_eq!(config.port, 9100);
        assert_eq!(config.max_connections, 5);
    }

    #[test]
    fn memory_bus_flag_skips_redis() {
        let mut settings = RelaySettings::default();
        settings.bus.redis_url = "not a url".into();
        assert!(connect_bus(&settings, true).is_ok());
        assert!(connect_bus(&settings, false).is_err());
    }
}
