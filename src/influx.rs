use crate::config::InfluxConf;
use anyhow::Result;

/// InfluxDB v1 write endpoint. One POST per line, no retry; the caller logs
/// failures and keeps going.
pub struct InfluxSink {
    client: reqwest::Client,
    write_url: String,
}

impl InfluxSink {
    pub fn new(cfg: &InfluxConf) -> Self {
        let mut write_url = format!(
            "http://{}:{}/write?db={}&u={}",
            cfg.host, cfg.port, cfg.db, cfg.user
        );
        if let Some(pass) = &cfg.pass {
            write_url.push_str(&format!("&p={pass}"));
        }
        Self {
            client: reqwest::Client::new(),
            write_url,
        }
    }

    pub async fn write(&self, line: &str) -> Result<()> {
        self.client
            .post(&self.write_url)
            .body(line.to_owned())
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_url_without_password() {
        let sink = InfluxSink::new(&InfluxConf::default());
        assert_eq!(
            sink.write_url,
            "http://localhost:8086/write?db=openDtu&u=openDtu2Db"
        );
    }

    #[test]
    fn test_write_url_with_password() {
        let cfg = InfluxConf {
            pass: Some("secret".into()),
            ..InfluxConf::default()
        };
        let sink = InfluxSink::new(&cfg);
        assert!(sink.write_url.ends_with("&p=secret"));
    }
}
