mod batch;
mod cli;
mod compute;
mod config;
mod logging;
mod message_handler;
mod performance;
mod response;
mod result_sink;
mod streaming;

use std::sync::Arc;

use clap::Parser;
use simbridge_fabric::{BrokerEndpoint, RoutingFabric};
use tracing::{error, info};

use crate::cli::Cli;
use crate::config::AgentSettings;
use crate::performance::PerformanceMonitor;
use crate::result_sink::{FabricResultSink, ResultSink};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let raw_config = simbridge_types::Config::load(&cli.config, &cli.profile, "AGENT")?;
    let settings = Arc::new(AgentSettings::from_config(&raw_config)?);

    logging::init_tracing(&settings.logging.level, settings.logging.format);
    info!(agent_id = %settings.agent_id, profile = raw_config.profile(), "starting simulation agent");

    let endpoint = BrokerEndpoint {
        host: settings.rabbitmq.host.clone(),
        port: settings.rabbitmq.port,
        virtual_host: settings.rabbitmq.virtual_host.clone(),
        username: settings.rabbitmq.username.clone(),
        password: settings.rabbitmq.password.clone(),
    };

    let fabric = Arc::new(RoutingFabric::connect(&endpoint).await?);
    fabric.declare_topology(std::slice::from_ref(&settings.agent_id)).await?;
    info!(agent_id = %settings.agent_id, "routing topology declared");

    let performance = Arc::new(PerformanceMonitor::new(&settings.performance));
    let sink: Arc<dyn ResultSink> = Arc::new(FabricResultSink::new(fabric.clone(), settings.agent_id.clone()));

    let consumer_task = tokio::spawn({
        let fabric = fabric.clone();
        let settings = settings.clone();
        let performance = performance.clone();
        let sink = sink.clone();
        async move {
            if let Err(err) = message_handler::run(&fabric, settings, performance, sink).await {
                error!(error = %err, "message handler stopped");
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    consumer_task.abort();

    for (metric, min, mean, max) in performance.summary() {
        info!(metric, min, mean, max, "performance summary");
    }

    info!("simulation agent stopped");
    Ok(())
}
