//! Derived pollution metrics: AQI bucket, weighted severity, risk flag.

use crate::record::{AqiCategory, Record, RiskFlag};

/// Inclusive upper bounds on PM2.5 for each AQI bucket.
///
/// | PM2.5       | Category       |
/// |-------------|----------------|
/// | <= 50       | Good           |
/// | <= 100      | Moderate       |
/// | <= 200      | Unhealthy      |
/// | <= 300      | Very Unhealthy |
/// | > 300       | Hazardous      |
static AQI_BANDS: &[(f64, AqiCategory)] = &[
    (50.0, AqiCategory::Good),
    (100.0, AqiCategory::Moderate),
    (200.0, AqiCategory::Unhealthy),
    (300.0, AqiCategory::VeryUnhealthy),
];

/// Inclusive upper bounds on severity. Above 400 is high risk.
static RISK_BANDS: &[(f64, RiskFlag)] = &[(200.0, RiskFlag::Low), (400.0, RiskFlag::Moderate)];

/// Pollutant weights used in the severity score.
static SEVERITY_WEIGHTS: &[(fn(&Record) -> Option<f64>, f64)] = &[
    (|r: &Record| r.pm2_5, 5.0),
    (|r: &Record| r.pm10, 3.0),
    (|r: &Record| r.nitrogen_dioxide, 4.0),
    (|r: &Record| r.sulphur_dioxide, 4.0),
    (|r: &Record| r.carbon_monoxide, 2.0),
    (|r: &Record| r.ozone, 3.0),
];

/// Returns the label of the first band whose upper bound is `>= value`,
/// or `above` when the value exceeds every bound. Bands must be sorted.
pub fn classify<L: Copy>(value: f64, bands: &[(f64, L)], above: L) -> L {
    bands
        .iter()
        .find(|(upper, _)| value <= *upper)
        .map(|(_, label)| *label)
        .unwrap_or(above)
}

pub fn aqi_category(pm2_5: Option<f64>) -> Option<AqiCategory> {
    let v = pm2_5.filter(|v| !v.is_nan())?;
    Some(classify(v, AQI_BANDS, AqiCategory::Hazardous))
}

/// Weighted sum of the scored pollutants. Missing readings contribute zero.
pub fn severity(record: &Record) -> f64 {
    SEVERITY_WEIGHTS
        .iter()
        .filter_map(|(reading, weight)| reading(record).map(|v| v * weight))
        .sum()
}

pub fn risk_flag(severity: f64) -> RiskFlag {
    classify(severity, RISK_BANDS, RiskFlag::High)
}

/// Fills `aqi`, `severity` and `risk` from the pollutant readings.
pub fn score(record: &mut Record) {
    let s = severity(record);
    record.aqi = aqi_category(record.pm2_5);
    record.severity = Some(s);
    record.risk = Some(risk_flag(s));
}
