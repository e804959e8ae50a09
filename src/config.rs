use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::warn;

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct BridgeConfig {
    pub mqtt: MqttConf,
    pub influx: InfluxConf,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub pass: Option<String>,
    /// subscription root, the openDTU base topic
    pub topic: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct InfluxConf {
    pub host: String,
    pub port: u16,
    pub db: String,
    pub user: String,
    pub pass: Option<String>,
}

impl Default for MqttConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 1883,
            user: None,
            pass: None,
            topic: "solar".into(),
        }
    }
}

impl Default for InfluxConf {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 8086,
            db: "openDtu".into(),
            user: "openDtu2Db".into(),
            pass: None,
        }
    }
}

pub async fn load_config() -> BridgeConfig {
    let path = std::env::var("DTU2DB_CONFIG").unwrap_or_else(|_| "dtu2db.yaml".into());
    if Path::new(&path).exists() {
        let txt = fs::read_to_string(&path).await.unwrap_or_default();
        if txt.trim().is_empty() {
            return BridgeConfig::default();
        }
        serde_yaml::from_str(&txt).unwrap_or_else(|e| {
            warn!("invalid config {path}: {e}");
            BridgeConfig::default()
        })
    } else {
        warn!("no {path}, using default config");
        BridgeConfig::default()
    }
}
