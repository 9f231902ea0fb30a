//! Chart output as Vega-Lite v5 specifications with inline data.
//!
//! Rendering to pixels is left to any Vega-Lite renderer (`vl2png`, the
//! online editor, notebook front-ends).

use anyhow::{Context, Result};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::Path;

use crate::analyzers::aggregate::hour_of;
use crate::analyzers::types::CityRiskRow;
use crate::analyzers::utility::mean;
use crate::record::StoredRecord;

const SCHEMA: &str = "https://vega.github.io/schema/vega-lite/v5.json";
pub const HISTOGRAM_BINS: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bin {
    pub start: f64,
    pub end: f64,
    pub count: usize,
}

/// Splits `values` into `bins` equal-width bins spanning min..=max.
/// The last bin is closed on the right.
pub fn histogram(values: &[f64], bins: usize) -> Vec<Bin> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() || bins == 0 {
        return Vec::new();
    }
    let min = finite.iter().copied().fold(f64::INFINITY, f64::min);
    let max = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if min == max {
        return vec![Bin {
            start: min,
            end: max,
            count: finite.len(),
        }];
    }

    let width = (max - min) / bins as f64;
    let mut counts = vec![0usize; bins];
    for v in &finite {
        let idx = (((v - min) / width) as usize).min(bins - 1);
        counts[idx] += 1;
    }
    counts
        .into_iter()
        .enumerate()
        .map(|(i, count)| Bin {
            start: min + width * i as f64,
            end: min + width * (i + 1) as f64,
            count,
        })
        .collect()
}

pub fn pm25_histogram(rows: &[StoredRecord]) -> Value {
    let values: Vec<f64> = rows.iter().filter_map(|r| r.pm2_5).collect();
    let data: Vec<Value> = histogram(&values, HISTOGRAM_BINS)
        .iter()
        .map(|b| json!({"bin_start": b.start, "bin_end": b.end, "count": b.count}))
        .collect();

    json!({
        "$schema": SCHEMA,
        "title": "Histogram of PM2.5",
        "width": 600,
        "height": 400,
        "data": {"values": data},
        "mark": {"type": "bar", "color": "orange"},
        "encoding": {
            "x": {"field": "bin_start", "type": "quantitative", "title": "PM2.5"},
            "x2": {"field": "bin_end"},
            "y": {"field": "count", "type": "quantitative", "title": "Frequency"}
        }
    })
}

pub fn risk_flags_per_city(city_risk: &[CityRiskRow]) -> Value {
    let data: Vec<Value> = city_risk
        .iter()
        .map(|r| json!({"city": r.city, "risk_flag": r.risk_flag, "count": r.count}))
        .collect();

    json!({
        "$schema": SCHEMA,
        "title": "Risk Flags per City",
        "width": 600,
        "height": 400,
        "data": {"values": data},
        "mark": "bar",
        "encoding": {
            "x": {"field": "city", "type": "nominal", "axis": {"labelAngle": -45}},
            "xOffset": {"field": "risk_flag"},
            "y": {"field": "count", "type": "quantitative", "title": "Count"},
            "color": {"field": "risk_flag", "type": "nominal", "title": "Risk Flag"}
        }
    })
}

/// Mean PM2.5 per `(city, hour of day)`.
pub fn hourly_city_pm25(rows: &[StoredRecord]) -> BTreeMap<(String, u32), f64> {
    let mut series: BTreeMap<(String, u32), Vec<f64>> = BTreeMap::new();
    for row in rows {
        if let (Some(hour), Some(v)) = (hour_of(row), row.pm2_5) {
            series.entry((row.city.clone(), hour)).or_default().push(v);
        }
    }
    series
        .into_iter()
        .filter_map(|(key, values)| mean(&values).map(|m| (key, m)))
        .collect()
}

pub fn hourly_pm25_trends(rows: &[StoredRecord]) -> Value {
    let data: Vec<Value> = hourly_city_pm25(rows)
        .into_iter()
        .map(|((city, hour), pm2_5)| json!({"city": city, "hour": hour, "pm2_5": pm2_5}))
        .collect();

    json!({
        "$schema": SCHEMA,
        "title": "Hourly PM2.5 Trends per City",
        "width": 700,
        "height": 400,
        "data": {"values": data},
        "mark": {"type": "line", "point": true},
        "encoding": {
            "x": {"field": "hour", "type": "quantitative", "title": "Hour of Day"},
            "y": {"field": "pm2_5", "type": "quantitative", "title": "PM2.5"},
            "color": {"field": "city", "type": "nominal"}
        }
    })
}

pub fn severity_vs_pm25(rows: &[StoredRecord]) -> Value {
    let data: Vec<Value> = rows
        .iter()
        .filter_map(|r| {
            let (pm2_5, severity) = (r.pm2_5?, r.severity_score?);
            Some(json!({"city": r.city, "pm2_5": pm2_5, "severity_score": severity}))
        })
        .collect();

    json!({
        "$schema": SCHEMA,
        "title": "Severity Score vs PM2.5",
        "width": 600,
        "height": 400,
        "data": {"values": data},
        "mark": "point",
        "encoding": {
            "x": {"field": "pm2_5", "type": "quantitative", "title": "PM2.5"},
            "y": {"field": "severity_score", "type": "quantitative", "title": "Severity Score"},
            "color": {"field": "city", "type": "nominal"}
        }
    })
}

pub fn write_chart(path: &Path, spec: &Value) -> Result<()> {
    let text = serde_json::to_string_pretty(spec)?;
    std::fs::write(path, text).with_context(|| format!("writing chart {}", path.display()))
}
