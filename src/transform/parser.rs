//! Flattens one raw upstream artifact into per-hour [`Record`]s.

use anyhow::{Context, Result, bail};
use chrono::Timelike;
use serde_json::Value;
use std::path::Path;
use tracing::debug;

use crate::record::{POLLUTANTS, Record, parse_timestamp};

/// Reads and flattens the artifact at `path`.
pub fn load_raw_json(path: &Path) -> Result<Vec<Record>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading raw artifact {}", path.display()))?;
    let payload: Value = serde_json::from_str(&content)
        .with_context(|| format!("parsing raw artifact {}", path.display()))?;
    flatten_hourly(&payload, &city_from_filename(path))
        .with_context(|| format!("flattening raw artifact {}", path.display()))
}

/// Turns the `hourly` column arrays into one record per index.
///
/// The city comes from the payload's `city`, then `meta.city`, then
/// `fallback_city`. A payload without `hourly` yields no records; columns of
/// unequal length are an error.
pub fn flatten_hourly(payload: &Value, fallback_city: &str) -> Result<Vec<Record>> {
    let city = payload["city"]
        .as_str()
        .or_else(|| payload["meta"]["city"].as_str())
        .filter(|c| !c.is_empty())
        .unwrap_or(fallback_city)
        .to_string();

    let Some(hourly) = payload["hourly"].as_object().filter(|h| !h.is_empty()) else {
        return Ok(Vec::new());
    };

    let mut rows = None;
    for (name, column) in hourly {
        let len = match column {
            Value::Array(values) => values.len(),
            _ => bail!("hourly column '{name}' is not an array"),
        };
        match rows {
            None => rows = Some(len),
            Some(expected) if expected != len => {
                bail!("hourly column '{name}' has {len} values, expected {expected}")
            }
            Some(_) => {}
        }
    }

    let missing: Vec<&str> = POLLUTANTS
        .into_iter()
        .filter(|p| !hourly.contains_key(*p))
        .collect();
    if !missing.is_empty() {
        debug!(city = %city, ?missing, "Pollutant columns absent, filled with nulls");
    }

    let column = |name: &str, i: usize| hourly.get(name).and_then(|c| c.get(i));
    let number = |name: &str, i: usize| column(name, i).and_then(coerce_number);

    let records = (0..rows.unwrap_or(0))
        .map(|i| {
            let time = column("time", i).and_then(Value::as_str).and_then(parse_timestamp);
            Record {
                city: city.clone(),
                time,
                pm10: number("pm10", i),
                pm2_5: number("pm2_5", i),
                carbon_monoxide: number("carbon_monoxide", i),
                nitrogen_dioxide: number("nitrogen_dioxide", i),
                sulphur_dioxide: number("sulphur_dioxide", i),
                ozone: number("ozone", i),
                uv_index: number("uv_index", i),
                aqi: None,
                severity: None,
                risk: None,
                hour: time.map(|t| t.hour()),
            }
        })
        .collect();

    Ok(records)
}

/// Numbers pass through, numeric strings parse, everything else (and NaN) is missing.
pub fn coerce_number(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    (!n.is_nan()).then_some(n)
}

/// `new_delhi_raw_20250101T000000Z.json` -> `new_delhi`.
pub fn city_from_filename(path: &Path) -> String {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    match stem.find("_raw_") {
        Some(idx) => stem[..idx].to_string(),
        None => stem.split('_').next().unwrap_or_default().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_flatten_uses_payload_city() {
        let payload = json!({
            "city": "Delhi",
            "hourly": {
                "time": ["2025-01-01T00:00", "2025-01-01T01:00"],
                "pm2_5": [40.5, 61.0],
                "pm10": [80.0, null]
            }
        });

        let rows = flatten_hourly(&payload, "ignored").unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].city, "Delhi");
        assert_eq!(rows[0].pm2_5, Some(40.5));
        assert_eq!(rows[1].pm10, None);
        assert_eq!(rows[1].hour, Some(1));
        assert_eq!(rows[0].ozone, None);
        assert_eq!(rows[0].uv_index, None);
    }

    #[test]
    fn test_flatten_uses_meta_city_then_fallback() {
        let meta = json!({"meta": {"city": "Mumbai"}, "hourly": {"time": ["2025-01-01T00:00"]}});
        assert_eq!(flatten_hourly(&meta, "x").unwrap()[0].city, "Mumbai");

        let bare = json!({"hourly": {"time": ["2025-01-01T00:00"]}});
        assert_eq!(flatten_hourly(&bare, "kolkata").unwrap()[0].city, "kolkata");
    }

    #[test]
    fn test_flatten_without_hourly_is_empty() {
        assert!(flatten_hourly(&json!({"raw_text": "oops"}), "x").unwrap().is_empty());
        assert!(flatten_hourly(&json!({"hourly": {}}), "x").unwrap().is_empty());
    }

    #[test]
    fn test_flatten_rejects_ragged_columns() {
        let payload = json!({"hourly": {"time": ["a", "b"], "pm10": [1.0]}});
        assert!(flatten_hourly(&payload, "x").is_err());
    }

    #[test]
    fn test_coerce_number() {
        assert_eq!(coerce_number(&json!(3)), Some(3.0));
        assert_eq!(coerce_number(&json!("4.5")), Some(4.5));
        assert_eq!(coerce_number(&json!("n/a")), None);
        assert_eq!(coerce_number(&json!("NaN")), None);
        assert_eq!(coerce_number(&json!(null)), None);
        assert_eq!(coerce_number(&json!(true)), None);
    }

    #[test]
    fn test_bad_time_yields_no_hour() {
        let payload = json!({"hourly": {"time": ["soon"], "pm10": [1.0]}});
        let rows = flatten_hourly(&payload, "x").unwrap();
        assert_eq!(rows[0].time, None);
        assert_eq!(rows[0].hour, None);
    }

    #[test]
    fn test_city_from_filename() {
        assert_eq!(
            city_from_filename(Path::new("data/raw/new_delhi_raw_20250101T000000Z.json")),
            "new_delhi"
        );
        assert_eq!(city_from_filename(Path::new("pune_sample.json")), "pune");
    }
}
