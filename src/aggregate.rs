//! Burst aggregation and change detection
//!
//! Samples arrive as many small fragments per sweep. The engine folds them
//! into a snapshot keyed by `(measurement, tagset)`, keeps the snapshot from
//! the last flush for diffing, and only reports records once the feed has
//! been quiet long enough for the sweep to be complete.

use crate::decoder::Sample;
use crate::line;
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

/// A payload narrowed to the tightest type that parses losslessly.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl FieldValue {
    fn parse(raw: &str) -> Self {
        if let Ok(v) = raw.parse::<i64>() {
            return FieldValue::Int(v);
        }
        if let Ok(v) = raw.parse::<f64>() {
            return FieldValue::Float(v);
        }
        FieldValue::Text(raw.to_string())
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Int(v) => Some(*v as f64),
            FieldValue::Float(v) => Some(*v),
            FieldValue::Text(_) => None,
        }
    }
}

/// Line-protocol field rendering: strings are quoted, numbers are not.
impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Int(v) => write!(f, "{v}"),
            FieldValue::Float(v) => write!(f, "{v}"),
            FieldValue::Text(v) => write!(f, "\"{v}\""),
        }
    }
}

pub type TagSet = Vec<String>;
pub type Record = BTreeMap<String, FieldValue>;
type Snapshot = BTreeMap<String, BTreeMap<TagSet, Record>>;

pub struct AggregationEngine {
    data: Snapshot,
    /// deep copy of `data` taken at the last flush
    prev: Snapshot,
    /// `Some` while changes are pending, stamped at the last accepted change
    last_update: Option<Instant>,
    settle: Duration,
}

impl AggregationEngine {
    pub fn new(settle: Duration) -> Self {
        Self {
            data: Snapshot::new(),
            prev: Snapshot::new(),
            last_update: None,
            settle,
        }
    }

    /// Fold one decoded sample into the current snapshot. Re-publishing an
    /// unchanged value is a no-op and does not mark the engine dirty.
    pub fn accept(&mut self, sample: Sample) {
        let record = self
            .data
            .entry(sample.measurement)
            .or_default()
            .entry(sample.tags)
            .or_default();

        let value = suppress_noise(
            &sample.field,
            FieldValue::parse(&sample.value),
            record.get(&sample.field),
        );

        if record.get(&sample.field) != Some(&value) {
            record.insert(sample.field, value);
            self.last_update = Some(Instant::now());
        }
    }

    /// Collect one line per record that changed since the last flush, then
    /// rebase. Returns nothing while the engine is clean or a burst is still
    /// in flight. The caller posts the lines after releasing the lock.
    pub fn flush(&mut self) -> Vec<String> {
        let Some(dirty_since) = self.last_update else {
            return Vec::new();
        };
        // assume the sweep is complete once the feed has been quiet a while
        if dirty_since.elapsed() < self.settle {
            return Vec::new();
        }

        let mut lines = Vec::new();
        for (measurement, records) in &self.data {
            let prev_records = self.prev.get(measurement);
            for (tags, values) in records {
                if tags.is_empty() || values.is_empty() {
                    continue;
                }
                if prev_records.and_then(|r| r.get(tags)) == Some(values) {
                    continue;
                }
                lines.push(line::render(measurement, tags, values));
            }
        }

        self.prev = self.data.clone();
        self.last_update = None;
        lines
    }
}

/// Keep the stored value when a field is only wobbling: rssi moves a few dB
/// between reports and last_update advances by a second or two even when
/// nothing happened.
fn suppress_noise(field: &str, new: FieldValue, stored: Option<&FieldValue>) -> FieldValue {
    let threshold = match field {
        "rssi" => 5.0,
        "last_update" => 2.0,
        _ => return new,
    };
    let Some(candidate) = new.as_number() else {
        return new;
    };
    let stored_num = stored.and_then(FieldValue::as_number).unwrap_or(0.0);
    if (candidate - stored_num).abs() < threshold {
        stored.cloned().unwrap_or(FieldValue::Int(0))
    } else {
        new
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(measurement: &str, tags: &[&str], field: &str, value: &str) -> Sample {
        Sample {
            measurement: measurement.to_string(),
            tags: tags.iter().map(|t| t.to_string()).collect(),
            field: field.to_string(),
            value: value.to_string(),
        }
    }

    /// Engine with no settle window, so flush emits immediately.
    fn engine() -> AggregationEngine {
        AggregationEngine::new(Duration::ZERO)
    }

    #[test]
    fn test_accept_is_idempotent() {
        let mut engine = engine();
        engine.accept(sample("inverter", &["GW1", "Inv"], "power", "150"));
        assert_eq!(engine.flush().len(), 1);

        engine.accept(sample("inverter", &["GW1", "Inv"], "power", "150"));
        assert!(engine.last_update.is_none());
        assert!(engine.flush().is_empty());
    }

    #[test]
    fn test_value_coercion() {
        let mut engine = engine();
        engine.accept(sample("inverter", &["GW1", "Inv"], "power", "150"));
        engine.accept(sample("inverter", &["GW1", "Inv"], "temperature", "41.5"));
        engine.accept(sample("inverter", &["GW1", "Inv"], "firmware", "v1.0.2"));
        let record = &engine.data["inverter"][&vec!["GW1".to_string(), "Inv".to_string()]];
        assert_eq!(record["power"], FieldValue::Int(150));
        assert_eq!(record["temperature"], FieldValue::Float(41.5));
        assert_eq!(record["firmware"], FieldValue::Text("v1.0.2".to_string()));
    }

    #[test]
    fn test_rssi_noise_suppressed() {
        let mut engine = engine();
        engine.accept(sample("signal", &["GW1"], "rssi", "-70"));
        engine.flush();

        engine.accept(sample("signal", &["GW1"], "rssi", "-72"));
        assert!(engine.flush().is_empty());
        assert_eq!(
            engine.data["signal"][&vec!["GW1".to_string()]]["rssi"],
            FieldValue::Int(-70)
        );

        engine.accept(sample("signal", &["GW1"], "rssi", "-80"));
        let lines = engine.flush();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("rssi=-80"));
    }

    #[test]
    fn test_last_update_jitter_suppressed() {
        let mut engine = engine();
        engine.accept(sample("inverter", &["GW1", "Inv"], "last_update", "100"));
        engine.flush();

        engine.accept(sample("inverter", &["GW1", "Inv"], "last_update", "101"));
        assert!(engine.flush().is_empty());

        engine.accept(sample("inverter", &["GW1", "Inv"], "last_update", "103"));
        assert_eq!(engine.flush().len(), 1);
    }

    #[test]
    fn test_burst_settles_before_flush() {
        let mut engine = AggregationEngine::new(Duration::from_millis(50));
        engine.accept(sample("inverter", &["GW1", "Inv"], "power", "150"));

        // burst still in flight
        assert!(engine.flush().is_empty());

        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(engine.flush().len(), 1);

        // clean again
        assert!(engine.flush().is_empty());
    }

    #[test]
    fn test_flush_emits_only_changed_records() {
        let mut engine = engine();
        engine.accept(sample("inverter", &["GW1", "InvA"], "power", "150"));
        engine.accept(sample("inverter", &["GW1", "InvB"], "power", "90"));
        assert_eq!(engine.flush().len(), 2);

        engine.accept(sample("inverter", &["GW1", "InvA"], "power", "160"));
        let lines = engine.flush();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("inverter=InvA"));
    }

    #[test]
    fn test_empty_tagset_never_emitted() {
        let mut engine = engine();
        engine.accept(sample("inverter", &[], "power", "150"));
        assert!(engine.flush().is_empty());
    }

    #[test]
    fn test_string_values_quoted_in_output() {
        let mut engine = engine();
        engine.accept(sample("string", &["GW1", "Inv", "PanelA"], "voltage", "32.1V"));
        let lines = engine.flush();
        assert!(lines[0].ends_with("voltage=\"32.1V\""));
    }
}
