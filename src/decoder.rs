//! Topic decoding for the openDTU MQTT tree
//!
//! Maps a topic path (gateway id first, subscription root already stripped)
//! plus its payload into a measurement sample, or drops the message. Keeps
//! the serial-to-name tables needed for the two-phase naming scheme: field
//! data for an inverter or panel is dropped until its "name" fragment has
//! been seen.

use std::collections::HashMap;
use time::OffsetDateTime;

/// One decoded field assignment, ready for aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub measurement: String,
    pub tags: Vec<String>,
    pub field: String,
    pub value: String,
}

impl Sample {
    fn new(measurement: &str, tags: Vec<String>, field: &str, value: &str) -> Self {
        Self {
            measurement: measurement.to_string(),
            tags,
            field: field.to_string(),
            value: value.to_string(),
        }
    }
}

pub struct TopicDecoder {
    /// inverter serial -> display name
    inverters: HashMap<String, String>,
    /// (inverter display name, panel number) -> display name
    panels: HashMap<(String, String), String>,
    /// resolved dtu start time (unix seconds)
    start_time: i64,
}

impl TopicDecoder {
    pub fn new() -> Self {
        Self {
            inverters: HashMap::new(),
            panels: HashMap::new(),
            start_time: 0,
        }
    }

    /// Decode one topic path into a sample. `topic[0]` is the gateway id.
    /// Returns `None` for anything not worth forwarding: short topics,
    /// naming fragments, data for serials or panels without a name yet.
    pub fn decode(&mut self, topic: &[&str], payload: &str) -> Option<Sample> {
        if topic.len() < 3 {
            return None;
        }
        let gateway = topic[0];

        if topic[1] == "dtu" {
            return self.decode_dtu(gateway, topic[2], payload);
        }

        if topic[2] == "name" {
            // inverter naming fragment, topic[1] is the hardware serial
            let name = if payload.is_empty() {
                serial_hash16(topic[1]).to_string()
            } else {
                payload.to_string()
            };
            self.inverters.insert(topic[1].to_string(), name);
            return None;
        }

        // topic[1] is a hardware serial; drop everything until it is named
        let inverter = self.inverters.get(topic[1])?.clone();
        if topic.len() != 4 {
            return None;
        }
        let (sub, field) = (topic[2], topic[3]);

        match sub {
            "device" | "status" => Some(Sample::new(
                sub,
                vec![gateway.to_string(), inverter],
                field,
                payload,
            )),
            "0" => Some(Sample::new(
                "inverter",
                vec![gateway.to_string(), inverter],
                field,
                payload,
            )),
            // anything else is a panel number
            _ => {
                if field == "name" {
                    let name = if payload.is_empty() {
                        sub.to_string()
                    } else {
                        payload.to_string()
                    };
                    self.panels.insert((inverter, sub.to_string()), name);
                    return None;
                }
                let panel = self.panels.get(&(inverter.clone(), sub.to_string()))?.clone();
                Some(Sample::new(
                    "string",
                    vec![gateway.to_string(), inverter, panel],
                    field,
                    payload,
                ))
            }
        }
    }

    fn decode_dtu(&mut self, gateway: &str, field: &str, payload: &str) -> Option<Sample> {
        match field {
            "rssi" => Some(Sample::new("signal", vec![gateway.to_string()], "rssi", payload)),
            "uptime" => {
                let uptime: i64 = payload.parse().ok()?;
                let candidate = OffsetDateTime::now_utc().unix_timestamp() - uptime;
                // uptime is reported in whole seconds, so the derived start
                // time wobbles by a second between reports; only accept a
                // candidate that moved by more than that
                if (candidate - self.start_time).abs() > 1 {
                    self.start_time = candidate;
                }
                Some(Sample::new(
                    "dtu",
                    vec![gateway.to_string()],
                    "start_time",
                    &self.start_time.to_string(),
                ))
            }
            _ => Some(Sample::new("dtu", vec![gateway.to_string()], field, payload)),
        }
    }
}

/// 16-bit stand-in name for a serial with an empty name fragment.
/// FNV-1a 32-bit folded to 16 bits by xor of the halves, so the fallback
/// is stable across runs and platforms.
fn serial_hash16(serial: &str) -> u16 {
    let mut hash: u32 = 0x811c_9dc5;
    for byte in serial.bytes() {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    ((hash >> 16) ^ (hash & 0xffff)) as u16
}
