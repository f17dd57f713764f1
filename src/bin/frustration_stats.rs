//! frustration-stats: survey statistics service
//!
//! Subscribes to submitted-form events, recognizes frustration survey
//! results, and republishes organization-wide and team-wide composites.
//!
//! ## Architecture
//! ```text
//! [Bus: form results] -> [summary handler] -> [Fact Store]
//!                              |                   |
//!                              v                   v
//!                        [Directory]       [averaged composite]
//!                                                  |
//!                                                  v
//!                                        [Bus: composite topic]
//! ```
//!
//! ## Configuration
//! - config.yaml in the working directory, or a path as first argument,
//!   or FRUSTRATION_CONFIG pointing at a file
//! - FRUSTRATION__-prefixed environment overrides
//! - FRUSTRATION_LOG: log filter (default "info")

use std::sync::Arc;

use tracing::{error, info};

use frustration_stats::bus::{init_event_bus, BusRole, EventBus};
use frustration_stats::clients::{HttpDirectory, HttpFactStore};
use frustration_stats::config::Config;
use frustration_stats::handlers::{FrustrationSummaryHandler, ResultPublisher};
use frustration_stats::utils::bootstrap::init_tracing;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref()).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    if !config.pipeline.enabled {
        info!("Pipeline disabled, exiting");
        return Ok(());
    }

    if config.pipeline.topic.is_empty() {
        info!("Subscribe topic not configured, listener disabled, exiting");
        return Ok(());
    }

    info!("Starting frustration-stats");

    let facts = Arc::new(HttpFactStore::new(config.facts.client_config())?);
    let directory = Arc::new(HttpDirectory::new(config.directory.client_config())?);

    let bus = init_event_bus(
        &config.messaging,
        BusRole::Subscriber {
            group: config.pipeline.group.clone(),
            topics: vec![config.pipeline.topic.clone()],
        },
    )
    .await?;

    if config.pipeline.send_topic.is_empty() {
        info!("Send topic not configured, composites will be dropped");
    }
    let publisher = Arc::new(ResultPublisher::new(
        bus.clone(),
        config.pipeline.send_topic.clone(),
    ));

    let handler = FrustrationSummaryHandler::new(
        config.pipeline.topic.as_str(),
        facts,
        directory,
        publisher,
        config.pipeline.aggregation,
    );

    bus.subscribe(Box::new(handler)).await?;
    bus.start_consuming().await?;

    info!(
        topic = %config.pipeline.topic,
        send_topic = %config.pipeline.send_topic,
        "frustration-stats running, press Ctrl+C to exit"
    );

    tokio::signal::ctrl_c().await?;

    Ok(())
}
