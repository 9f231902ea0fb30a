//! Report rows produced by the analysis stage.

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::record::{RiskFlag, csv_time};

/// Headline metrics, written as the single row of `summary_metrics.csv`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Kpis {
    pub city_highest_pm2_5: Option<String>,
    pub avg_pm2_5: Option<f64>,
    pub city_highest_severity: Option<String>,
    pub avg_severity_score: Option<f64>,
    pub high_risk_pct: f64,
    pub moderate_risk_pct: f64,
    pub low_risk_pct: f64,
    pub worst_aqi_hour: Option<u32>,
    pub worst_aqi_pm2_5: Option<f64>,
}

/// One `(city, risk_flag)` cell of the distribution table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CityRiskRow {
    pub city: String,
    pub risk_flag: RiskFlag,
    pub count: usize,
    pub total: usize,
    pub percentage: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendRow {
    pub city: String,
    #[serde(with = "csv_time")]
    pub time: Option<NaiveDateTime>,
    pub pm2_5: Option<f64>,
    pub pm10: Option<f64>,
    pub ozone: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SummaryReport {
    pub kpis: Kpis,
    pub city_risk: Vec<CityRiskRow>,
    pub trends: Vec<TrendRow>,
}
