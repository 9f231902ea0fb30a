//! Row-level data model shared by the transform, load and analyze stages.

use chrono::{DateTime, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pollutant columns every record carries, in output column order.
pub const POLLUTANTS: [&str; 7] = [
    "pm10",
    "pm2_5",
    "carbon_monoxide",
    "nitrogen_dioxide",
    "sulphur_dioxide",
    "ozone",
    "uv_index",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AqiCategory {
    Good,
    Moderate,
    Unhealthy,
    #[serde(rename = "Very Unhealthy")]
    VeryUnhealthy,
    Hazardous,
}

impl AqiCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            AqiCategory::Good => "Good",
            AqiCategory::Moderate => "Moderate",
            AqiCategory::Unhealthy => "Unhealthy",
            AqiCategory::VeryUnhealthy => "Very Unhealthy",
            AqiCategory::Hazardous => "Hazardous",
        }
    }
}

impl fmt::Display for AqiCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskFlag {
    #[serde(rename = "Low Risk")]
    Low,
    #[serde(rename = "Moderate Risk")]
    Moderate,
    #[serde(rename = "High Risk")]
    High,
}

impl RiskFlag {
    pub const ALL: [RiskFlag; 3] = [RiskFlag::Low, RiskFlag::Moderate, RiskFlag::High];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskFlag::Low => "Low Risk",
            RiskFlag::Moderate => "Moderate Risk",
            RiskFlag::High => "High Risk",
        }
    }
}

impl fmt::Display for RiskFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One city at one timestamp, with derived metrics.
///
/// Serializes to the staged CSV layout. `aqi` is null exactly when `pm2_5`
/// is null; `severity` and `risk` are set for every record the transform
/// emits but stay optional so foreign rows can be read back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub city: String,
    #[serde(with = "csv_time")]
    pub time: Option<NaiveDateTime>,
    pub pm10: Option<f64>,
    pub pm2_5: Option<f64>,
    pub carbon_monoxide: Option<f64>,
    pub nitrogen_dioxide: Option<f64>,
    pub sulphur_dioxide: Option<f64>,
    pub ozone: Option<f64>,
    pub uv_index: Option<f64>,
    #[serde(rename = "AQI")]
    pub aqi: Option<AqiCategory>,
    pub severity: Option<f64>,
    pub risk: Option<RiskFlag>,
    pub hour: Option<u32>,
}

impl Record {
    /// Pollutant readings in [`POLLUTANTS`] order.
    pub fn pollutants(&self) -> [Option<f64>; 7] {
        [
            self.pm10,
            self.pm2_5,
            self.carbon_monoxide,
            self.nitrogen_dioxide,
            self.sulphur_dioxide,
            self.ozone,
            self.uv_index,
        ]
    }

    pub fn all_pollutants_missing(&self) -> bool {
        self.pollutants().iter().all(Option::is_none)
    }
}

/// A [`Record`] in the remote table's shape.
///
/// Column names follow the table schema and values are transport-safe:
/// timestamps are ISO-8601 strings and non-finite floats become null.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub city: String,
    #[serde(default, with = "iso_time")]
    pub time: Option<NaiveDateTime>,
    pub pm10: Option<f64>,
    pub pm2_5: Option<f64>,
    pub carbon_monoxide: Option<f64>,
    pub nitrogen_dioxide: Option<f64>,
    pub sulphur_dioxide: Option<f64>,
    pub ozone: Option<f64>,
    pub uv_index: Option<f64>,
    pub aqi_category: Option<AqiCategory>,
    pub severity_score: Option<f64>,
    pub risk_flag: Option<RiskFlag>,
    pub hour: Option<u32>,
}

fn finite(v: Option<f64>) -> Option<f64> {
    v.filter(|v| v.is_finite())
}

impl From<&Record> for StoredRecord {
    fn from(r: &Record) -> Self {
        StoredRecord {
            city: r.city.clone(),
            time: r.time,
            pm10: finite(r.pm10),
            pm2_5: finite(r.pm2_5),
            carbon_monoxide: finite(r.carbon_monoxide),
            nitrogen_dioxide: finite(r.nitrogen_dioxide),
            sulphur_dioxide: finite(r.sulphur_dioxide),
            ozone: finite(r.ozone),
            uv_index: finite(r.uv_index),
            aqi_category: r.aqi,
            severity_score: finite(r.severity),
            risk_flag: r.risk,
            hour: r.hour,
        }
    }
}

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Lenient timestamp parsing. Offsets are normalized to UTC and dropped.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_utc());
    }
    // Postgres renders timestamptz as "2025-01-01 05:00:00+00"
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%#z") {
        return Some(dt.naive_utc());
    }
    NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
}

/// Serde adapter writing `%Y-%m-%d %H:%M:%S` (plus fractional seconds when
/// present) and reading anything [`parse_timestamp`] accepts. Unparseable
/// input reads as `None`.
pub mod csv_time {
    use super::parse_timestamp;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

    pub fn serialize<S: Serializer>(value: &Option<NaiveDateTime>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(t) => s.serialize_str(&t.format(FORMAT).to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveDateTime>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        Ok(raw.as_deref().and_then(parse_timestamp))
    }
}

/// Same as [`csv_time`] but writes ISO-8601 (`%Y-%m-%dT%H:%M:%S`) for JSON transport.
pub mod iso_time {
    use super::parse_timestamp;
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

    pub fn serialize<S: Serializer>(value: &Option<NaiveDateTime>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(t) => s.serialize_str(&t.format(FORMAT).to_string()),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveDateTime>, D::Error> {
        let raw: Option<String> = Option::deserialize(d)?;
        Ok(raw.as_deref().and_then(parse_timestamp))
    }
}
