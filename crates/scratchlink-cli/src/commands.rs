//! Command handlers for the scratchlink CLI

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use scratchlink_ble::BtleAdapter;
use scratchlink_core::protocol::DID_DISCOVER_PERIPHERAL;
use scratchlink_core::{
    Agent, BleAdapter, Device, DiscoverFilter, Frame, Outbound, ScanCoordinator, SessionId,
};
use tracing::{debug, info, warn};

use crate::cli::Commands;
use crate::config::AppConfig;
use crate::error::Result;
use crate::server::Server;

/// Owner of the diagnostic scan; session IDs start at 1
const DIAGNOSTIC_SCAN: SessionId = 0;

/// Command dispatcher for handling CLI commands
pub struct CommandDispatcher;

impl CommandDispatcher {
    /// Execute a CLI command
    pub async fn execute(command: Commands, config: AppConfig) -> Result<()> {
        match command {
            Commands::Serve => Self::handle_serve_command(config).await,
            Commands::Peers {
                filter_name,
                name_prefix,
                seconds,
            } => Self::handle_peers_command(config, filter_name, name_prefix, seconds).await,
            Commands::ExampleConfig => {
                print!("{}", AppConfig::example_config());
                Ok(())
            }
        }
    }

    /// Run the WebSocket agent until Ctrl+C
    async fn handle_serve_command(config: AppConfig) -> Result<()> {
        let adapter = Self::open_adapter(&config).await?;
        let agent = Agent::new(adapter, config.session.clone());

        let server = Server::bind(config.socket_addr()?, config.server.path.clone(), agent).await?;
        server
            .run_until(async {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    warn!("Failed to listen for Ctrl+C: {}", e);
                    std::future::pending::<()>().await;
                }
            })
            .await
    }

    /// Scan with the discovery engine and print each new peripheral
    async fn handle_peers_command(
        config: AppConfig,
        filter_name: Option<String>,
        name_prefix: Option<String>,
        seconds: u64,
    ) -> Result<()> {
        let adapter = Self::open_adapter(&config).await?;
        let scanner = ScanCoordinator::new(adapter, config.session.scan_stop_grace());
        let (outbound, mut pushes) = Outbound::channel(config.session.outbound_queue_size);

        let filters = if filter_name.is_some() || name_prefix.is_some() {
            vec![DiscoverFilter {
                name: filter_name,
                name_prefix,
                services: Vec::new(),
            }]
        } else {
            Vec::new()
        };

        info!("Scanning for {} seconds... Press Ctrl+C to stop", seconds);
        scanner.start(DIAGNOSTIC_SCAN, filters, outbound).await;

        let deadline = tokio::time::sleep(Duration::from_secs(seconds));
        tokio::pin!(deadline);
        let mut seen = HashSet::new();

        loop {
            tokio::select! {
                push = pushes.recv() => match push {
                    Some(frame) => {
                        if let Some(device) = discovered_device(frame) {
                            if seen.insert(device.peripheral_id.clone()) {
                                println!("{:<40} {:>5} dBm  {}", device.peripheral_id, device.rssi, device.name);
                            }
                        }
                    }
                    None => break,
                },
                _ = &mut deadline => break,
                _ = tokio::signal::ctrl_c() => break,
            }
        }

        scanner.stop().await;
        println!("{} peripheral(s) found", seen.len());
        Ok(())
    }

    async fn open_adapter(config: &AppConfig) -> Result<Arc<BtleAdapter>> {
        let adapter = BtleAdapter::new(config.ble.clone()).await?;
        adapter.enable().await?;
        Ok(Arc::new(adapter))
    }
}

fn discovered_device(frame: Frame) -> Option<Device> {
    let Frame::Push(message) = frame else {
        return None;
    };
    if message.method != DID_DISCOVER_PERIPHERAL {
        return None;
    }
    match message.params() {
        Ok(device) => Some(device),
        Err(e) => {
            debug!("Unreadable discovery push: {}", e);
            None
        }
    }
}
