mod bridge_core;
mod cli;
mod config;
mod logging;

use std::sync::Arc;

use clap::Parser;
use simbridge_adapters::{Adapter, HttpStreamingAdapter, HttpStreamingConfig, InternalBrokerAdapter, PubSubAdapter, PubSubConfig};
use simbridge_fabric::{BrokerEndpoint, RoutingFabric};
use tracing::{error, info};

use crate::bridge_core::BridgeCore;
use crate::cli::Cli;
use crate::config::BridgeSettings;

const SIGNAL_CHANNEL_CAPACITY: usize = 256;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let raw_config = simbridge_types::Config::load(&cli.config, &cli.profile, "BRIDGE")?;
    let settings = BridgeSettings::from_config(&raw_config)?;

    logging::init_tracing(&settings.logging.level, settings.logging.format);
    info!(bridge_id = %settings.bridge_id, profile = raw_config.profile(), "starting simulation bridge");

    let endpoint = BrokerEndpoint {
        host: settings.rabbitmq.host.clone(),
        port: settings.rabbitmq.port,
        virtual_host: settings.rabbitmq.virtual_host.clone(),
        username: settings.rabbitmq.username.clone(),
        password: settings.rabbitmq.password.clone(),
    };

    let fabric = Arc::new(RoutingFabric::connect(&endpoint).await?);
    fabric.declare_topology(&settings.simulator_ids).await?;
    info!(simulators = ?settings.simulator_ids, "routing topology declared");

    let (signal_tx, signal_rx) = tokio::sync::mpsc::channel(SIGNAL_CHANNEL_CAPACITY);

    let internal = Arc::new(InternalBrokerAdapter::new(fabric.clone(), signal_tx.clone()));
    let pubsub = Arc::new(PubSubAdapter::new(
        PubSubConfig {
            client_id: format!("{}-pubsub", settings.bridge_id),
            host: settings.mqtt.host.clone(),
            port: settings.mqtt.port,
            keepalive_secs: settings.mqtt.keepalive_secs,
            input_topic: settings.mqtt.input_topic.clone(),
            output_topic: settings.mqtt.output_topic.clone(),
            qos: settings.mqtt.qos,
        },
        signal_tx.clone(),
    ));
    let http = Arc::new(HttpStreamingAdapter::new(
        HttpStreamingConfig {
            host: settings.rest.host.clone(),
            port: settings.rest.port,
            input_endpoint: settings.rest.input_endpoint.clone(),
            certfile: settings.rest.certfile.clone(),
            keyfile: settings.rest.keyfile.clone(),
        },
        signal_tx,
    ));

    let core = BridgeCore::connect(endpoint, internal.clone(), pubsub.clone(), http.clone()).await?;
    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

    let internal_task = tokio::spawn({
        let internal = internal.clone();
        async move {
            if let Err(err) = internal.start().await {
                error!(error = %err, "internal broker adapter stopped");
            }
        }
    });
    let pubsub_task = tokio::spawn({
        let pubsub = pubsub.clone();
        async move {
            if let Err(err) = pubsub.start().await {
                error!(error = %err, "pub-sub adapter stopped");
            }
        }
    });
    let http_task = tokio::spawn({
        let http = http.clone();
        async move {
            if let Err(err) = http.start().await {
                error!(error = %err, "http streaming adapter stopped");
            }
        }
    });
    let core_task = tokio::spawn(core.run(signal_rx, shutdown_rx));

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(());
    let _ = internal.stop().await;
    let _ = pubsub.stop().await;
    let _ = http.stop().await;

    let _ = tokio::join!(core_task, internal_task, pubsub_task, http_task);
    info!("simulation bridge stopped");
    Ok(())
}
