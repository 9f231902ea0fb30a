use chrono::Timelike;
use std::collections::BTreeMap;

use crate::analyzers::types::{CityRiskRow, Kpis, SummaryReport, TrendRow};
use crate::analyzers::utility::{arg_max, mean, pct, round2};
use crate::record::{RiskFlag, StoredRecord};

/// Hour of day for a row: taken from `time`, else the stored `hour` column.
pub fn hour_of(row: &StoredRecord) -> Option<u32> {
    row.time.map(|t| t.hour()).or(row.hour)
}

/// Per-city mean of `value`, skipping missing values. Cities are sorted.
pub fn city_means(
    rows: &[StoredRecord],
    value: impl Fn(&StoredRecord) -> Option<f64>,
) -> BTreeMap<String, f64> {
    let mut series: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for row in rows {
        if let Some(v) = value(row).filter(|v| !v.is_nan()) {
            series.entry(row.city.as_str()).or_default().push(v);
        }
    }
    series
        .into_iter()
        .filter_map(|(city, values)| mean(&values).map(|m| (city.to_string(), m)))
        .collect()
}

/// Mean PM2.5 per hour of day, across all cities.
pub fn hourly_pm25(rows: &[StoredRecord]) -> BTreeMap<u32, f64> {
    let mut series: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
    for row in rows {
        if let (Some(hour), Some(v)) = (hour_of(row), row.pm2_5) {
            series.entry(hour).or_default().push(v);
        }
    }
    series
        .into_iter()
        .filter_map(|(hour, values)| mean(&values).map(|m| (hour, m)))
        .collect()
}

/// Share of each risk flag among rows that have one, in percent (2 decimals).
pub fn risk_shares(rows: &[StoredRecord]) -> BTreeMap<RiskFlag, f64> {
    let flagged: Vec<RiskFlag> = rows.iter().filter_map(|r| r.risk_flag).collect();
    RiskFlag::ALL
        .iter()
        .map(|flag| {
            let count = flagged.iter().filter(|f| *f == flag).count();
            (*flag, round2(pct(count, flagged.len())))
        })
        .collect()
}

pub fn compute_kpis(rows: &[StoredRecord]) -> Kpis {
    let worst_pm25 = arg_max(city_means(rows, |r| r.pm2_5));
    let worst_severity = arg_max(city_means(rows, |r| r.severity_score));
    let worst_hour = arg_max(hourly_pm25(rows));
    let shares = risk_shares(rows);
    let share = |flag: RiskFlag| shares.get(&flag).copied().unwrap_or(0.0);

    Kpis {
        city_highest_pm2_5: worst_pm25.as_ref().map(|(c, _)| c.clone()),
        avg_pm2_5: worst_pm25.map(|(_, v)| v),
        city_highest_severity: worst_severity.as_ref().map(|(c, _)| c.clone()),
        avg_severity_score: worst_severity.map(|(_, v)| v),
        high_risk_pct: share(RiskFlag::High),
        moderate_risk_pct: share(RiskFlag::Moderate),
        low_risk_pct: share(RiskFlag::Low),
        worst_aqi_hour: worst_hour.map(|(h, _)| h),
        worst_aqi_pm2_5: worst_hour.map(|(_, v)| v),
    }
}

/// Count and percentage of each risk flag per city. Rows without a flag
/// count toward the city total only.
pub fn city_risk_distribution(rows: &[StoredRecord]) -> Vec<CityRiskRow> {
    let mut totals: BTreeMap<&str, usize> = BTreeMap::new();
    let mut counts: BTreeMap<(&str, RiskFlag), usize> = BTreeMap::new();

    for row in rows {
        *totals.entry(row.city.as_str()).or_default() += 1;
        if let Some(flag) = row.risk_flag {
            *counts.entry((row.city.as_str(), flag)).or_default() += 1;
        }
    }

    counts
        .into_iter()
        .map(|((city, risk_flag), count)| {
            let total = totals[city];
            CityRiskRow {
                city: city.to_string(),
                risk_flag,
                count,
                total,
                percentage: round2(pct(count, total)),
            }
        })
        .collect()
}

pub fn pollution_trends(rows: &[StoredRecord]) -> Vec<TrendRow> {
    rows.iter()
        .map(|r| TrendRow {
            city: r.city.clone(),
            time: r.time,
            pm2_5: r.pm2_5,
            pm10: r.pm10,
            ozone: r.ozone,
        })
        .collect()
}

/// Pure summary of `rows`; nothing is written.
pub fn analyze(rows: &[StoredRecord]) -> SummaryReport {
    SummaryReport {
        kpis: compute_kpis(rows),
        city_risk: city_risk_distribution(rows),
        trends: pollution_trends(rows),
    }
}
