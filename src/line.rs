//! InfluxDB line-protocol rendering

use crate::aggregate::{Record, TagSet};
use std::collections::BTreeMap;

/// Schema version tag sent with every line. Bump the minor when new data is
/// added, the major when existing series change shape.
/// History: 1.0 all values were strings, 2.0 panel names required,
/// 2.1 panel numbers stand in for empty panel names.
pub const INFLUX_API: &str = "2.1";

/// Tag keys assigned positionally to the tagset, outermost first.
const TAG_KEYS: [&str; 3] = ["dtu", "inverter", "panel"];

/// Render one record as `measurement,tags fields`, both groups sorted by
/// key, string field values quoted.
pub fn render(measurement: &str, tags: &TagSet, values: &Record) -> String {
    let mut tag_map: BTreeMap<&str, &str> = TAG_KEYS
        .iter()
        .copied()
        .zip(tags.iter().map(String::as_str))
        .collect();
    tag_map.insert("version", INFLUX_API);

    let tag_text: Vec<String> = tag_map.iter().map(|(k, v)| format!("{k}={v}")).collect();
    let value_text: Vec<String> = values.iter().map(|(k, v)| format!("{k}={v}")).collect();
    format!("{measurement},{} {}", tag_text.join(","), value_text.join(","))
}
