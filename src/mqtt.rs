use crate::aggregate::AggregationEngine;
use crate::config::MqttConf;
use crate::decoder::TopicDecoder;
use parking_lot::Mutex;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{self, JoinHandle};
use tracing::{error, info, warn};

/// Subscribe to the openDTU topic tree and feed decoded samples into the
/// shared engine. The decoder lives on this task alone; only the engine is
/// behind the lock shared with the flush loop.
pub fn spawn_mqtt_listener(cfg: MqttConf, engine: Arc<Mutex<AggregationEngine>>) -> JoinHandle<()> {
    task::spawn(async move {
        let mut opts = MqttOptions::new("dtu2db", &cfg.host, cfg.port);
        opts.set_keep_alive(Duration::from_secs(15));
        if let (Some(user), Some(pass)) = (&cfg.user, &cfg.pass) {
            opts.set_credentials(user, pass);
        }
        let (client, mut eventloop) = AsyncClient::new(opts, 10);

        if let Err(e) = client.subscribe(format!("{}/#", cfg.topic), QoS::AtLeastOnce).await {
            error!("mqtt subscribe failed: {e:?}");
            return;
        }
        info!("subscribed to mqtt topic {}/#", cfg.topic);

        let mut decoder = TopicDecoder::new();
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(p))) => {
                    // binary payloads are not interesting
                    let Ok(payload) = std::str::from_utf8(&p.payload) else {
                        continue;
                    };
                    // segment 0 is the subscription root; the decoder starts
                    // at the gateway id
                    let segments: Vec<&str> = p.topic.split('/').collect();
                    if let Some(sample) = decoder.decode(&segments[1..], payload) {
                        engine.lock().accept(sample);
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("connected to mqtt broker {}", cfg.host);
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("mqtt error: {e:?}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    })
}
