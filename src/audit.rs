//! Audit checks engine: data-quality and anomaly checks that run
//! locally over the full canonical table.
//!
//! Nine checks (exact duplicates, IQR outliers, value concentration,
//! monthly trend anomalies, missing data, round-number patterns,
//! weekend activity, Benford's-law deviation, split transactions),
//! each producing zero or more leveled findings with sampled evidence.
//! The chat layer consumes these results as plain structured data.

use std::collections::HashMap;

use chrono::Datelike;
use serde::Serialize;
use serde_json::{Value as Json, json};

use crate::{
    data::{Cell, ColumnType},
    store::ProjectSettings,
    table::{Column, Table},
};

const MAX_NUMERIC_CHECK_COLUMNS: usize = 20;
const MAX_CONCENTRATION_COLUMNS: usize = 15;
const MAX_BENFORD_COLUMNS: usize = 10;
/// Chi-squared critical value for 8 degrees of freedom at p = 0.05.
const BENFORD_CHI2_CUTOFF: f64 = 15.51;
const SPLIT_THRESHOLDS: &[f64] = &[1_000.0, 5_000.0, 10_000.0, 25_000.0, 50_000.0, 100_000.0];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Serialize)]
pub struct Finding {
    pub check: &'static str,
    pub level: Level,
    pub title: String,
    pub detail: String,
    pub evidence: Json,
}

#[derive(Debug, Serialize)]
pub struct AuditSummary {
    pub total_rows: usize,
    pub total_findings: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

#[derive(Debug, Serialize)]
pub struct AuditReport {
    pub summary: AuditSummary,
    pub findings: Vec<Finding>,
}

fn cell_to_json(cell: &Cell) -> Json {
    match cell {
        Cell::Missing => Json::Null,
        Cell::Integer(i) => json!(i),
        Cell::Float(f) => {
            if f.is_finite() {
                json!(f)
            } else {
                Json::Null
            }
        }
        Cell::Boolean(b) => json!(b),
        Cell::Date(d) => json!(d.format("%Y-%m-%d").to_string()),
        Cell::Text(s) => json!(s),
    }
}

fn numeric_columns(table: &Table) -> Vec<&Column> {
    table
        .columns()
        .iter()
        .filter(|c| matches!(c.column_type(), ColumnType::Integer | ColumnType::Float))
        .collect()
}

fn text_columns(table: &Table) -> Vec<&Column> {
    table
        .columns()
        .iter()
        .filter(|c| c.column_type() == ColumnType::Text)
        .collect()
}

fn present_numerics(column: &Column) -> Vec<f64> {
    (0..column.len()).filter_map(|row| column.numeric(row)).collect()
}

/// Linear-interpolated quantile over a sorted slice.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let position = (sorted.len() - 1) as f64 * q;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let fraction = position - lower as f64;
        sorted[lower] + fraction * (sorted[upper] - sorted[lower])
    }
}

fn pct(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        (part as f64 / whole as f64 * 1000.0).round() / 10.0
    }
}

/// Exact duplicate rows across the key columns (or all columns).
pub fn check_duplicates(table: &Table, key_columns: &[String]) -> Vec<Finding> {
    let columns: Vec<&Column> = if key_columns.is_empty() {
        table.columns().iter().collect()
    } else {
        key_columns
            .iter()
            .filter_map(|name| table.column(name))
            .collect()
    };
    if columns.is_empty() || table.n_rows() == 0 {
        return Vec::new();
    }

    let mut groups: HashMap<Vec<String>, Vec<usize>> = HashMap::new();
    for row in 0..table.n_rows() {
        let key: Vec<String> = columns
            .iter()
            .map(|c| c.display_value(row).unwrap_or_default())
            .collect();
        groups.entry(key).or_default().push(row);
    }

    let duplicate_groups: Vec<&Vec<usize>> =
        groups.values().filter(|rows| rows.len() > 1).collect();
    if duplicate_groups.is_empty() {
        return Vec::new();
    }
    let n_rows: usize = duplicate_groups.iter().map(|g| g.len()).sum();
    let n_groups = duplicate_groups.len();

    let mut evidence = Vec::new();
    'outer: for group in &duplicate_groups {
        for &row in group.iter() {
            if evidence.len() >= 20 {
                break 'outer;
            }
            let object: serde_json::Map<String, Json> = columns
                .iter()
                .map(|c| (c.name().to_string(), cell_to_json(&c.cell(row))))
                .collect();
            evidence.push(Json::Object(object));
        }
    }

    let level = if n_rows > 100 {
        Level::High
    } else if n_rows > 10 {
        Level::Medium
    } else {
        Level::Low
    };
    vec![Finding {
        check: "duplicate",
        level,
        title: format!("{n_rows} duplicate rows found"),
        detail: format!(
            "{n_groups} groups of duplicate records detected across {} columns.",
            columns.len()
        ),
        evidence: Json::Array(evidence),
    }]
}

/// IQR-based outliers per numeric column.
pub fn check_outliers(table: &Table) -> Vec<Finding> {
    let mut findings = Vec::new();
    for column in numeric_columns(table).into_iter().take(MAX_NUMERIC_CHECK_COLUMNS) {
        let mut values = present_numerics(column);
        if values.len() < 10 {
            continue;
        }
        values.sort_by(f64::total_cmp);
        let q1 = quantile(&values, 0.25);
        let q3 = quantile(&values, 0.75);
        let iqr = q3 - q1;
        if iqr == 0.0 {
            continue;
        }
        let lower = q1 - 1.5 * iqr;
        let upper = q3 + 1.5 * iqr;
        let outliers: Vec<f64> = values
            .iter()
            .copied()
            .filter(|v| *v < lower || *v > upper)
            .collect();
        if outliers.is_empty() {
            continue;
        }
        let share = pct(outliers.len(), table.n_rows());
        let level = if share > 10.0 {
            Level::High
        } else if share > 3.0 {
            Level::Medium
        } else {
            Level::Low
        };
        let evidence: Vec<Json> = outliers
            .iter()
            .take(10)
            .map(|v| json!({ "value": v, "expected_range": format!("{lower:.2} - {upper:.2}") }))
            .collect();
        findings.push(Finding {
            check: "outlier",
            level,
            title: format!(
                "{} outliers in \"{}\" ({share}%)",
                outliers.len(),
                column.name()
            ),
            detail: format!(
                "Values outside IQR range [{lower:.2}, {upper:.2}]. Q1={q1:.2}, Q3={q3:.2}."
            ),
            evidence: Json::Array(evidence),
        });
    }
    findings
}

/// A single value dominating a categorical column.
pub fn check_concentration(table: &Table) -> Vec<Finding> {
    let mut findings = Vec::new();
    for column in text_columns(table).into_iter().take(MAX_CONCENTRATION_COLUMNS) {
        let mut counts: HashMap<String, usize> = HashMap::new();
        let mut present = 0usize;
        for row in 0..column.len() {
            if let Some(value) = column.display_value(row) {
                *counts.entry(value).or_insert(0) += 1;
                present += 1;
            }
        }
        if present == 0 {
            continue;
        }
        let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        let (top_value, top_count) = ranked[0].clone();
        let top_pct = pct(top_count, present);
        if top_pct < 25.0 {
            continue;
        }
        let evidence: Vec<Json> = ranked
            .iter()
            .take(5)
            .map(|(value, count)| {
                json!({ "value": value, "percentage": pct(*count, present), "count": count })
            })
            .collect();
        let level = if top_pct > 60.0 {
            Level::High
        } else if top_pct > 40.0 {
            Level::Medium
        } else {
            Level::Low
        };
        findings.push(Finding {
            check: "concentration",
            level,
            title: format!(
                "\"{}\": top value is {top_pct}% of all records",
                column.name()
            ),
            detail: format!("\"{top_value}\" accounts for {top_pct}% ({top_count} rows)."),
            evidence: Json::Array(evidence),
        });
    }
    findings
}

/// Month-over-month volume spikes/drops beyond 2x the average change.
pub fn check_trend_anomalies(table: &Table, date_column: &str) -> Vec<Finding> {
    let Some(column) = table.column(date_column) else {
        return Vec::new();
    };
    let mut monthly: HashMap<String, usize> = HashMap::new();
    for row in 0..column.len() {
        if let Some(date) = column.date(row) {
            let key = format!("{:04}-{:02}", date.year(), date.month());
            *monthly.entry(key).or_insert(0) += 1;
        }
    }
    if monthly.len() < 3 {
        return Vec::new();
    }
    let mut series: Vec<(String, usize)> = monthly.into_iter().collect();
    series.sort();

    let changes: Vec<f64> = series
        .windows(2)
        .map(|pair| (pair[1].1 as f64 - pair[0].1 as f64).abs())
        .collect();
    let avg_change = changes.iter().sum::<f64>() / changes.len() as f64;
    if avg_change == 0.0 {
        return Vec::new();
    }

    let mut evidence = Vec::new();
    for window in series.windows(2) {
        let (prev_count, count) = (window[0].1 as f64, window[1].1 as f64);
        let change = count - prev_count;
        if change.abs() > 2.0 * avg_change {
            let pct_change = if prev_count != 0.0 {
                ((change / prev_count * 1000.0).round()) / 10.0
            } else {
                0.0
            };
            evidence.push(json!({
                "month": window[1].0,
                "count": count as usize,
                "prev_count": prev_count as usize,
                "change": change as i64,
                "pct_change": pct_change,
            }));
        }
    }
    if evidence.is_empty() {
        return Vec::new();
    }
    let anomalies = evidence.len();
    let level = if anomalies > 3 {
        Level::High
    } else if anomalies > 1 {
        Level::Medium
    } else {
        Level::Low
    };
    evidence.truncate(10);
    vec![Finding {
        check: "trend_anomaly",
        level,
        title: format!("{anomalies} monthly trend anomalies detected"),
        detail: format!(
            "Months with volume changes exceeding 2x the average monthly variation ({avg_change:.0})."
        ),
        evidence: Json::Array(evidence),
    }]
}

/// Columns with more than 5% missing values.
pub fn check_missing_data(table: &Table) -> Vec<Finding> {
    let total = table.n_rows();
    if total == 0 {
        return Vec::new();
    }
    let mut findings = Vec::new();
    for column in table.columns() {
        let missing = column.missing_count();
        let share = pct(missing, total);
        if share < 5.0 {
            continue;
        }
        let level = if share > 50.0 {
            Level::High
        } else if share > 20.0 {
            Level::Medium
        } else {
            Level::Low
        };
        findings.push(Finding {
            check: "missing_data",
            level,
            title: format!("\"{}\": {share}% missing ({missing} rows)", column.name()),
            detail: format!(
                "Column has {missing} null/empty values out of {total} total rows."
            ),
            evidence: Json::Array(Vec::new()),
        });
    }
    findings
}

/// Suspicious shares of round hundreds/thousands in numeric columns.
pub fn check_round_numbers(table: &Table) -> Vec<Finding> {
    let mut findings = Vec::new();
    for column in numeric_columns(table).into_iter().take(MAX_CONCENTRATION_COLUMNS) {
        let values = present_numerics(column);
        if values.len() < 20 {
            continue;
        }
        let round_1000 = values.iter().filter(|v| *v % 1_000.0 == 0.0).count();
        let round_100 = values.iter().filter(|v| *v % 100.0 == 0.0).count();
        let pct_1000 = pct(round_1000, values.len());
        let pct_100 = pct(round_100, values.len());
        if pct_1000 > 30.0 {
            let level = if pct_1000 > 50.0 { Level::Medium } else { Level::Low };
            findings.push(Finding {
                check: "round_numbers",
                level,
                title: format!("\"{}\": {pct_1000}% are round thousands", column.name()),
                detail: format!(
                    "{round_1000} values are exact multiples of 1,000, which may indicate estimation or rounding."
                ),
                evidence: Json::Array(Vec::new()),
            });
        } else if pct_100 > 40.0 {
            findings.push(Finding {
                check: "round_numbers",
                level: Level::Low,
                title: format!("\"{}\": {pct_100}% are round hundreds", column.name()),
                detail: format!("{round_100} values are exact multiples of 100."),
                evidence: Json::Array(Vec::new()),
            });
        }
    }
    findings
}

/// Records dated on Saturday or Sunday.
pub fn check_weekend_activity(table: &Table, date_column: &str) -> Vec<Finding> {
    let Some(column) = table.column(date_column) else {
        return Vec::new();
    };
    let dates: Vec<chrono::NaiveDate> =
        (0..column.len()).filter_map(|row| column.date(row)).collect();
    if dates.len() < 10 {
        return Vec::new();
    }
    let weekend = dates
        .iter()
        .filter(|d| d.weekday().number_from_monday() >= 6)
        .count();
    if weekend == 0 {
        return Vec::new();
    }
    let share = pct(weekend, dates.len());

    let mut by_day: HashMap<String, usize> = HashMap::new();
    for date in &dates {
        *by_day.entry(format!("{}", date.weekday())).or_insert(0) += 1;
    }
    let mut evidence: Vec<(String, usize)> = by_day.into_iter().collect();
    evidence.sort_by(|a, b| b.1.cmp(&a.1));
    let evidence: Vec<Json> = evidence
        .into_iter()
        .map(|(day, count)| json!({ "day": day, "count": count }))
        .collect();

    let level = if share > 15.0 { Level::Medium } else { Level::Low };
    vec![Finding {
        check: "weekend_activity",
        level,
        title: format!("{weekend} weekend transactions ({share}%)"),
        detail: format!(
            "{weekend} records dated on Saturday/Sunday out of {} total.",
            dates.len()
        ),
        evidence: Json::Array(evidence),
    }]
}

fn first_digit(value: f64) -> Option<u32> {
    let mut v = value.abs();
    if !v.is_finite() || v == 0.0 {
        return None;
    }
    while v >= 10.0 {
        v /= 10.0;
    }
    while v < 1.0 {
        v *= 10.0;
    }
    Some(v as u32)
}

/// Chi-squared test of first-digit distribution against Benford's Law.
pub fn check_benfords_law(table: &Table) -> Vec<Finding> {
    let mut findings = Vec::new();
    for column in numeric_columns(table).into_iter().take(MAX_BENFORD_COLUMNS) {
        let values: Vec<f64> = present_numerics(column)
            .into_iter()
            .filter(|v| v.abs() > 0.0)
            .collect();
        if values.len() < 100 {
            continue;
        }
        let digits: Vec<u32> = values
            .iter()
            .filter_map(|v| first_digit(*v))
            .filter(|d| (1..=9).contains(d))
            .collect();
        if digits.len() < 50 {
            continue;
        }
        let n = digits.len() as f64;
        let mut observed = [0usize; 10];
        for digit in &digits {
            observed[*digit as usize] += 1;
        }
        let mut chi2 = 0.0;
        let mut evidence = Vec::new();
        for digit in 1..=9u32 {
            let expected_share = (1.0 + 1.0 / digit as f64).log10();
            let observed_share = observed[digit as usize] as f64 / n;
            chi2 += (observed_share - expected_share).powi(2) / expected_share * n;
            evidence.push(json!({
                "digit": digit,
                "observed_pct": (observed_share * 1000.0).round() / 10.0,
                "expected_pct": (expected_share * 1000.0).round() / 10.0,
                "deviation": ((observed_share - expected_share) * 1000.0).round() / 10.0,
            }));
        }
        if chi2 > BENFORD_CHI2_CUTOFF {
            let level = if chi2 > 30.0 { Level::High } else { Level::Medium };
            findings.push(Finding {
                check: "benfords_law",
                level,
                title: format!(
                    "\"{}\" deviates from Benford's Law (chi2={chi2:.1})",
                    column.name()
                ),
                detail: format!(
                    "First-digit distribution significantly deviates from the expected pattern \
                     (chi-squared {chi2:.1} > {BENFORD_CHI2_CUTOFF})."
                ),
                evidence: Json::Array(evidence),
            });
        }
    }
    findings
}

/// Same-day, same-party amounts individually under an approval
/// threshold whose total crosses it.
pub fn check_split_transactions(
    table: &Table,
    date_column: &str,
    vendor_column: Option<&str>,
    amount_column: Option<&str>,
) -> Vec<Finding> {
    let (Some(date_col), Some(amount_col)) = (
        table.column(date_column),
        amount_column.and_then(|name| table.column(name)),
    ) else {
        return Vec::new();
    };
    let vendor_col = vendor_column.and_then(|name| table.column(name));

    let mut groups: HashMap<(String, String), Vec<f64>> = HashMap::new();
    for row in 0..table.n_rows() {
        let (Some(date), Some(amount)) = (date_col.date(row), amount_col.numeric(row)) else {
            continue;
        };
        let vendor = vendor_col
            .map(|c| c.group_key(row))
            .unwrap_or_else(|| "N/A".to_string());
        groups
            .entry((date.format("%Y-%m-%d").to_string(), vendor))
            .or_default()
            .push(amount);
    }

    let mut keys: Vec<&(String, String)> = groups.keys().collect();
    keys.sort();
    let mut evidence = Vec::new();
    for key in keys {
        let amounts = &groups[key];
        if amounts.len() < 2 {
            continue;
        }
        let total: f64 = amounts.iter().sum();
        for &threshold in SPLIT_THRESHOLDS {
            if amounts.iter().all(|a| *a < threshold) && total >= threshold {
                let near = amounts.iter().filter(|a| **a > threshold * 0.5).count();
                if near >= 2 {
                    evidence.push(json!({
                        "date": key.0,
                        "vendor": key.1,
                        "transaction_count": amounts.len(),
                        "individual_amounts": amounts.iter().take(5).collect::<Vec<_>>(),
                        "total": total,
                        "threshold": threshold,
                    }));
                    break;
                }
            }
        }
        if evidence.len() >= 20 {
            break;
        }
    }

    if evidence.is_empty() {
        return Vec::new();
    }
    let level = if evidence.len() > 5 {
        Level::High
    } else if evidence.len() > 2 {
        Level::Medium
    } else {
        Level::Low
    };
    let flagged = evidence.len();
    evidence.truncate(15);
    vec![Finding {
        check: "split_transaction",
        level,
        title: format!("{flagged} potential split transactions detected"),
        detail: "Same-day transactions by the same party with individual amounts below \
                 approval thresholds but combined total exceeding them."
            .to_string(),
        evidence: Json::Array(evidence),
    }]
}

/// Run every check and rank the findings by severity.
pub fn run_all_checks(table: &Table, settings: &ProjectSettings) -> AuditReport {
    let key_columns: Vec<String> = settings
        .top_columns
        .iter()
        .map(|tc| tc.column.clone())
        .collect();

    let vendor_column = settings.top_columns.iter().find_map(|tc| {
        let display = tc.display_name.to_lowercase();
        ["vendor", "supplier", "transporter", "agent", "party"]
            .iter()
            .any(|w| display.contains(w))
            .then(|| tc.column.clone())
    });
    let amount_column = settings
        .top_columns
        .iter()
        .find_map(|tc| {
            let display = tc.display_name.to_lowercase();
            ["amount", "value", "cost", "price", "total"]
                .iter()
                .any(|w| display.contains(w))
                .then(|| tc.column.clone())
        })
        .or_else(|| {
            numeric_columns(table)
                .into_iter()
                .find(|c| {
                    let name = c.name().to_lowercase();
                    ["amount", "value", "cost", "price", "total", "sum"]
                        .iter()
                        .any(|w| name.contains(w))
                })
                .map(|c| c.name().to_string())
        });

    let mut findings = Vec::new();
    findings.extend(check_duplicates(table, &key_columns));
    findings.extend(check_outliers(table));
    findings.extend(check_concentration(table));
    findings.extend(check_trend_anomalies(table, &settings.date_column));
    findings.extend(check_missing_data(table));
    findings.extend(check_round_numbers(table));
    findings.extend(check_weekend_activity(table, &settings.date_column));
    findings.extend(check_benfords_law(table));
    findings.extend(check_split_transactions(
        table,
        &settings.date_column,
        vendor_column.as_deref(),
        amount_column.as_deref(),
    ));

    findings.sort_by_key(|f| f.level);

    let count = |level: Level| findings.iter().filter(|f| f.level == level).count();
    AuditReport {
        summary: AuditSummary {
            total_rows: table.n_rows(),
            total_findings: findings.len(),
            high: count(Level::High),
            medium: count(Level::Medium),
            low: count(Level::Low),
        },
        findings,
    }
}
