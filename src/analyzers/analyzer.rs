use anyhow::{Context, Result};
use std::path::Path;
use tracing::{info, warn};

use crate::analyzers::aggregate::analyze;
use crate::analyzers::charts;
use crate::analyzers::types::SummaryReport;
use crate::config::TABLE_NAME;
use crate::output::write_records;
use crate::services::table_store::TableStore;

/// Reads the stored dataset, summarizes it, and writes report tables and
/// chart specs into `processed_dir`. Returns `None` (writing nothing) when
/// the table is empty.
#[tracing::instrument(skip_all, fields(processed_dir = %processed_dir.display()))]
pub async fn run_analysis<S: TableStore + ?Sized>(
    store: &S,
    processed_dir: &Path,
) -> Result<Option<SummaryReport>> {
    info!(table = TABLE_NAME, "Fetching stored air quality data");
    let rows = store
        .select_all(TABLE_NAME)
        .await
        .with_context(|| format!("reading table {TABLE_NAME}"))?;

    if rows.is_empty() {
        warn!(table = TABLE_NAME, "No data found in table");
        return Ok(None);
    }
    info!(rows = rows.len(), "Computing summary");

    let report = analyze(&rows);

    std::fs::create_dir_all(processed_dir)
        .with_context(|| format!("creating {}", processed_dir.display()))?;

    write_records(&processed_dir.join("summary_metrics.csv"), &[&report.kpis])?;
    write_records(
        &processed_dir.join("city_risk_distribution.csv"),
        &report.city_risk,
    )?;
    write_records(&processed_dir.join("pollution_trends.csv"), &report.trends)?;
    info!("Summary tables written");

    charts::write_chart(
        &processed_dir.join("pm25_histogram.vl.json"),
        &charts::pm25_histogram(&rows),
    )?;
    charts::write_chart(
        &processed_dir.join("risk_flags_per_city.vl.json"),
        &charts::risk_flags_per_city(&report.city_risk),
    )?;
    charts::write_chart(
        &processed_dir.join("hourly_pm25_trends.vl.json"),
        &charts::hourly_pm25_trends(&rows),
    )?;
    charts::write_chart(
        &processed_dir.join("severity_vs_pm25.vl.json"),
        &charts::severity_vs_pm25(&rows),
    )?;
    info!("Chart specifications written");

    Ok(Some(report))
}
