//! dtu2db - openDTU MQTT to InfluxDB bridge
//!
//! Subscribes to the topic tree of an openDTU gateway, reassembles the
//! per-field fragments into coherent records, and writes a record to
//! InfluxDB only when its values actually changed and the current burst
//! of messages has settled.

mod aggregate;
mod config;
mod decoder;
mod influx;
mod line;
mod mqtt;

use crate::aggregate::AggregationEngine;
use crate::influx::InfluxSink;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{info, warn};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let mut cfg = config::load_config().await;
    if let Some(topic) = std::env::args().nth(1) {
        cfg.mqtt.topic = topic;
    }

    info!(
        "start openDTU gateway to InfluxDB {}@{}",
        cfg.influx.db, cfg.influx.host
    );

    let sink = InfluxSink::new(&cfg.influx);
    let engine = Arc::new(Mutex::new(AggregationEngine::new(Duration::from_secs(1))));

    let listener = mqtt::spawn_mqtt_listener(cfg.mqtt.clone(), engine.clone());

    // settle check on a fixed period, independent of message arrival
    let mut ticker = interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // diff and rebase under the lock, post after releasing it
                let lines = engine.lock().flush();
                for line in lines {
                    if let Err(e) = sink.write(&line).await {
                        warn!("influx write failed: {e}");
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    listener.abort();
    info!("bye");
}
