//! Record composition and encoding conventions shared by every provider type.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// Format used for every date/datetime value placed in an emitted record.
pub const RECORD_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Render a timestamp the way the sink expects it.
pub fn encode_date(dt: DateTime<Utc>) -> String {
    dt.format(RECORD_DATE_FORMAT).to_string()
}

/// Render a byte buffer as upper-case hex with a `0x` prefix.
pub fn encode_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("0x");
    for b in bytes {
        out.push_str(&format!("{b:02X}"));
    }
    out
}

/// True for columns elided from emitted records: an underscore-prefixed
/// name or the literal `DUMMY`, unless it is the column mapped to the
/// TimeGenerated field.
fn is_internal_column(name: &str, col_time_generated: &str) -> bool {
    if name == col_time_generated {
        return false;
    }
    name.starts_with('_') || name == "DUMMY"
}

/// Build one emitted record from a raw result row.
///
/// Seeds `{CONTENT_VERSION, SAPMON_VERSION, PROVIDER_INSTANCE, METADATA}`
/// then copies every non-internal column from `row` by name.
pub fn compose_record(
    content_version: Option<&str>,
    sapmon_version: &str,
    provider_instance: &str,
    metadata: &Map<String, Value>,
    col_time_generated: &str,
    row: &Map<String, Value>,
) -> Map<String, Value> {
    let mut record = Map::new();
    if let Some(version) = content_version {
        record.insert("CONTENT_VERSION".to_string(), Value::String(version.to_string()));
    }
    record.insert("SAPMON_VERSION".to_string(), Value::String(sapmon_version.to_string()));
    record.insert(
        "PROVIDER_INSTANCE".to_string(),
        Value::String(provider_instance.to_string()),
    );
    record.insert("METADATA".to_string(), Value::Object(metadata.clone()));

    for (name, value) in row {
        if is_internal_column(name, col_time_generated) {
            continue;
        }
        record.insert(name.clone(), value.clone());
    }
    record
}

/// Build the record batch for an entire result set, one record per row.
pub fn compose_records(
    content_version: Option<&str>,
    sapmon_version: &str,
    provider_instance: &str,
    metadata: &Map<String, Value>,
    col_time_generated: &str,
    rows: &[Map<String, Value>],
) -> Vec<Value> {
    rows.iter()
        .map(|row| {
            Value::Object(compose_record(
                content_version,
                sapmon_version,
                provider_instance,
                metadata,
                col_time_generated,
                row,
            ))
        })
        .collect()
}

/// `md5(string(resultRows))`, used only for change-detection by tests.
pub fn hash_result_rows(rows: &[Map<String, Value>]) -> String {
    let serialized = serde_json::to_string(rows).unwrap_or_default();
    format!("{:x}", md5::compute(serialized.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn internal_columns_are_elided_from_composed_records() {
        let mut row = Map::new();
        row.insert("HOST".to_string(), Value::String("hdb01".into()));
        row.insert("_SERVER_UTC".to_string(), Value::String("2026-01-01T00:00:00Z".into()));
        row.insert("DUMMY".to_string(), Value::Number(0.into()));

        let record = compose_record(Some("1.0"), "0.7.0", "SapHana/PRD", &Map::new(), "_SERVER_UTC", &row);
        assert!(record.contains_key("HOST"));
        assert!(record.contains_key("_SERVER_UTC"), "time-generated column is kept even though it starts with _");
        assert!(!record.contains_key("DUMMY"));
    }

    #[test]
    fn empty_result_set_produces_empty_record_array() {
        let records = compose_records(None, "0.7.0", "SapHana/PRD", &Map::new(), "_SERVER_UTC", &[]);
        assert!(records.is_empty());
    }

    #[test]
    fn byte_buffers_encode_as_uppercase_hex_with_prefix() {
        assert_eq!(encode_bytes(&[0xde, 0xad, 0xbe, 0xef]), "0xDEADBEEF");
    }

    #[test]
    fn dates_encode_with_fractional_seconds_and_z_suffix() {
        let dt = chrono::Utc.with_ymd_and_hms(2026, 3, 5, 12, 0, 0).unwrap();
        assert_eq!(encode_date(dt), "2026-03-05T12:00:00.000000Z");
    }
}
