//! Derived-view computation engine.
//!
//! Every function here is pure: a borrowed [`Table`] (normally the
//! cached snapshot) plus parameters in, plain structured data out.
//! Nothing mutates the cache or touches disk. Date filters use
//! inclusive `[start, end]` bounds on the designated date column; rows
//! whose date is missing are excluded from any date-filtered view but
//! included in unfiltered full-table views.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use itertools::Itertools;
use serde::{Serialize, Serializer};

use crate::{
    data::ColumnType,
    error::{EngineError, Result},
    table::{Column, Table},
};

pub const COMPARE_VALUE_LIMIT: usize = 25;
pub const COMPARE_GROUP_LIMIT: usize = 50;
const DEFAULT_TREND_GROUPS: usize = 10;

/// Inclusive calendar-date window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Period {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Period {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Period { start, end }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date <= self.end
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Aggregation {
    #[default]
    Count,
    Sum,
    Average,
    Min,
    Max,
}

impl Aggregation {
    pub fn as_str(self) -> &'static str {
        match self {
            Aggregation::Count => "count",
            Aggregation::Sum => "sum",
            Aggregation::Average => "average",
            Aggregation::Min => "min",
            Aggregation::Max => "max",
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Aggregation {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "count" => Ok(Aggregation::Count),
            "sum" => Ok(Aggregation::Sum),
            "average" | "mean" | "avg" => Ok(Aggregation::Average),
            "min" => Ok(Aggregation::Min),
            "max" => Ok(Aggregation::Max),
            other => Err(EngineError::missing_data(format!(
                "unknown aggregation '{other}'"
            ))),
        }
    }
}

/// Running per-cell aggregation state. Sum treats a missing numeric as
/// zero (matching the source system); average/min/max skip it.
#[derive(Debug, Clone, Copy, Default)]
struct AggState {
    rows: usize,
    present: usize,
    sum: f64,
    min: Option<f64>,
    max: Option<f64>,
}

impl AggState {
    fn add(&mut self, value: Option<f64>) {
        self.rows += 1;
        if let Some(v) = value {
            self.present += 1;
            self.sum += v;
            self.min = Some(self.min.map_or(v, |m| m.min(v)));
            self.max = Some(self.max.map_or(v, |m| m.max(v)));
        }
    }

    fn finalize(&self, aggregation: Aggregation) -> f64 {
        match aggregation {
            Aggregation::Count => self.rows as f64,
            Aggregation::Sum => self.sum,
            Aggregation::Average => {
                if self.present > 0 {
                    self.sum / self.present as f64
                } else {
                    0.0
                }
            }
            Aggregation::Min => self.min.unwrap_or(0.0),
            Aggregation::Max => self.max.unwrap_or(0.0),
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn month_key(date: NaiveDate) -> String {
    format!("{:04}-{:02}", date.year(), date.month())
}

/// (min, max) of the designated date column, ignoring missing values.
/// `None` when the table holds no parseable dates.
pub fn date_range(table: &Table, date_column: &str) -> Result<Option<(NaiveDate, NaiveDate)>> {
    let column = table.require_column(date_column)?;
    let mut bounds: Option<(NaiveDate, NaiveDate)> = None;
    for row in 0..column.len() {
        if let Some(date) = column.date(row) {
            bounds = Some(match bounds {
                None => (date, date),
                Some((min, max)) => (min.min(date), max.max(date)),
            });
        }
    }
    Ok(bounds)
}

/// Indices of rows whose designated date falls inside the period.
pub fn date_mask(table: &Table, date_column: &str, period: Period) -> Result<Vec<usize>> {
    let column = table.require_column(date_column)?;
    Ok((0..table.n_rows())
        .filter(|&row| column.date(row).is_some_and(|d| period.contains(d)))
        .collect())
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ValueCount {
    pub value: String,
    pub count: usize,
}

/// The `n` most frequent distinct values of a column, missing cells
/// skipped, ties broken by first-encountered order. `rows` restricts
/// counting to a precomputed row subset (normally a date mask).
pub fn top_n(
    table: &Table,
    column: &str,
    n: usize,
    rows: Option<&[usize]>,
) -> Result<Vec<ValueCount>> {
    let column = table.require_column(column)?;
    let counts = count_values(column, rows, table.n_rows());
    let mut ranked: Vec<(String, usize, usize)> = counts
        .into_iter()
        .map(|(value, (count, first_seen))| (value, count, first_seen))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    ranked.truncate(n);
    Ok(ranked
        .into_iter()
        .map(|(value, count, _)| ValueCount { value, count })
        .collect())
}

fn count_values(
    column: &Column,
    rows: Option<&[usize]>,
    total_rows: usize,
) -> HashMap<String, (usize, usize)> {
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    let mut order = 0usize;
    let mut tally = |row: usize| {
        if let Some(value) = column.display_value(row) {
            let entry = counts.entry(value).or_insert_with(|| {
                order += 1;
                (0, order)
            });
            entry.0 += 1;
        }
    };
    match rows {
        Some(rows) => rows.iter().for_each(|&row| tally(row)),
        None => (0..total_rows).for_each(tally),
    }
    counts
}

#[derive(Debug, Clone, Default)]
pub struct TrendRequest {
    pub group_column: String,
    pub aggregation: Aggregation,
    pub value_column: Option<String>,
    /// Rank-based group selection; ignored when `groups` is given.
    pub top_n: Option<usize>,
    /// Explicit group list; takes precedence over `top_n`.
    pub groups: Option<Vec<String>>,
    pub period: Option<Period>,
    pub baseline_month: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TrendSeries {
    pub months: Vec<String>,
    /// Sorted by total aggregate, descending.
    pub groups: Vec<String>,
    pub series: HashMap<String, Vec<f64>>,
    pub group_totals: HashMap<String, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub movement: Option<MovementSeries>,
}

#[derive(Debug, Serialize)]
pub struct MovementSeries {
    pub baseline_month: String,
    pub baseline_values: HashMap<String, f64>,
    /// Groups with no data in the baseline month are omitted entirely.
    pub series: HashMap<String, Vec<f64>>,
}

/// Monthly trend series: bucket rows by calendar month of the
/// designated date column, then by group value, and aggregate each
/// (month, group) cell. Cells with no rows are reported as zero so
/// every selected group has one value per month.
pub fn trend_series(
    table: &Table,
    date_column: &str,
    request: &TrendRequest,
) -> Result<TrendSeries> {
    let group_col = table.require_column(&request.group_column)?;
    let date_col = table.require_column(date_column)?;
    if date_col.column_type() != ColumnType::Date {
        return Err(EngineError::missing_data(format!(
            "column '{date_column}' is not a date column"
        )));
    }
    let value_col = match (request.aggregation, &request.value_column) {
        (Aggregation::Count, _) => None,
        (_, Some(name)) => Some(table.require_column(name)?),
        (aggregation, None) => {
            return Err(EngineError::missing_data(format!(
                "aggregation '{aggregation}' requires a value column"
            )));
        }
    };

    // (group -> overall state) for ranking, (month, group) -> state for
    // the series itself.
    let mut overall: HashMap<String, AggState> = HashMap::new();
    let mut group_order: Vec<String> = Vec::new();
    let mut cells: HashMap<(String, String), AggState> = HashMap::new();

    for row in 0..table.n_rows() {
        let Some(date) = date_col.date(row) else {
            continue;
        };
        if let Some(period) = request.period
            && !period.contains(date)
        {
            continue;
        }
        let group = group_col.group_key(row);
        let value = value_col.and_then(|c| c.numeric(row));
        if !overall.contains_key(&group) {
            group_order.push(group.clone());
        }
        overall.entry(group.clone()).or_default().add(value);
        cells
            .entry((month_key(date), group))
            .or_default()
            .add(value);
    }

    let selected: Vec<String> = match &request.groups {
        Some(explicit) if !explicit.is_empty() => explicit.clone(),
        _ => {
            let n = request.top_n.unwrap_or(DEFAULT_TREND_GROUPS);
            let mut ranked: Vec<(usize, &String)> = group_order.iter().enumerate().collect();
            ranked.sort_by(|(ia, a), (ib, b)| {
                let ta = overall[*a].finalize(request.aggregation);
                let tb = overall[*b].finalize(request.aggregation);
                tb.total_cmp(&ta).then(ia.cmp(ib))
            });
            ranked.into_iter().take(n).map(|(_, g)| g.clone()).collect()
        }
    };
    let selected_set: HashSet<&String> = selected.iter().collect();

    let months: Vec<String> = cells
        .keys()
        .filter(|(_, group)| selected_set.contains(group))
        .map(|(month, _)| month.clone())
        .unique()
        .sorted()
        .collect();

    let mut series: HashMap<String, Vec<f64>> = HashMap::new();
    let mut group_totals: HashMap<String, f64> = HashMap::new();
    for group in &selected {
        let values: Vec<f64> = months
            .iter()
            .map(|month| {
                cells
                    .get(&(month.clone(), group.clone()))
                    .map(|state| round2(state.finalize(request.aggregation)))
                    .unwrap_or(0.0)
            })
            .collect();
        group_totals.insert(group.clone(), round2(values.iter().sum()));
        series.insert(group.clone(), values);
    }

    let mut groups = selected.clone();
    groups.sort_by(|a, b| {
        let ta = group_totals.get(a).copied().unwrap_or(0.0);
        let tb = group_totals.get(b).copied().unwrap_or(0.0);
        tb.total_cmp(&ta)
    });

    let movement = request.baseline_month.as_ref().and_then(|baseline| {
        let baseline_index = months.iter().position(|m| m == baseline)?;
        let mut baseline_values = HashMap::new();
        let mut movement_series = HashMap::new();
        for group in &groups {
            // No rows for this group in the baseline month means its
            // movement is undefined, not zero.
            if !cells.contains_key(&(baseline.clone(), group.clone())) {
                continue;
            }
            let values = &series[group];
            let base = values[baseline_index];
            baseline_values.insert(group.clone(), base);
            movement_series.insert(
                group.clone(),
                values.iter().map(|v| round2(v - base)).collect(),
            );
        }
        Some(MovementSeries {
            baseline_month: baseline.clone(),
            baseline_values,
            series: movement_series,
        })
    });

    Ok(TrendSeries {
        months,
        groups,
        series,
        group_totals,
        movement,
    })
}

/// Period-over-period change. A value or group with nothing in period 1
/// is "new", never an infinite or fabricated percentage.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Change {
    New,
    Pct(f64),
}

impl Serialize for Change {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Change::New => serializer.serialize_str("new"),
            Change::Pct(pct) => serializer.serialize_f64(*pct),
        }
    }
}

fn percent_change(before: f64, after: f64) -> Change {
    if before == 0.0 {
        Change::New
    } else {
        Change::Pct(round1((after - before) / before * 100.0))
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ValueComparison {
    pub value: String,
    pub count1: usize,
    pub count2: usize,
    pub change: Change,
}

#[derive(Debug, Serialize)]
pub struct PeriodComparison {
    pub column: String,
    pub period1_total: usize,
    pub period2_total: usize,
    pub rows: Vec<ValueComparison>,
}

/// Two-period value-frequency comparison: top 25 distinct values by
/// combined count across both periods.
pub fn compare_values(
    table: &Table,
    column: &str,
    date_column: &str,
    period1: Period,
    period2: Period,
) -> Result<PeriodComparison> {
    let target = table.require_column(column)?;
    let rows1 = date_mask(table, date_column, period1)?;
    let rows2 = date_mask(table, date_column, period2)?;
    let counts1 = count_values(target, Some(&rows1), table.n_rows());
    let counts2 = count_values(target, Some(&rows2), table.n_rows());

    let mut values: HashSet<&String> = counts1.keys().collect();
    values.extend(counts2.keys());

    let mut rows: Vec<ValueComparison> = values
        .into_iter()
        .map(|value| {
            let count1 = counts1.get(value).map(|(c, _)| *c).unwrap_or(0);
            let count2 = counts2.get(value).map(|(c, _)| *c).unwrap_or(0);
            ValueComparison {
                value: value.clone(),
                count1,
                count2,
                change: percent_change(count1 as f64, count2 as f64),
            }
        })
        .collect();
    rows.sort_by(|a, b| {
        (b.count1 + b.count2)
            .cmp(&(a.count1 + a.count2))
            .then(b.count1.cmp(&a.count1))
            .then(a.value.cmp(&b.value))
    });
    rows.truncate(COMPARE_VALUE_LIMIT);

    Ok(PeriodComparison {
        column: column.to_string(),
        period1_total: rows1.len(),
        period2_total: rows2.len(),
        rows,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct GroupComparison {
    pub group: String,
    pub value1: f64,
    pub value2: f64,
    pub change: Change,
}

#[derive(Debug, Serialize)]
pub struct GroupedComparison {
    pub group_column: String,
    pub value_column: String,
    pub aggregation: String,
    pub period1_rows: usize,
    pub period2_rows: usize,
    pub rows: Vec<GroupComparison>,
}

/// Two-period comparison of a group-by aggregation: top 50 groups by
/// combined aggregate.
pub fn compare_grouped(
    table: &Table,
    group_column: &str,
    value_column: &str,
    aggregation: Aggregation,
    date_column: &str,
    period1: Period,
    period2: Period,
) -> Result<GroupedComparison> {
    let group_col = table.require_column(group_column)?;
    let value_col = table.require_column(value_column)?;
    let rows1 = date_mask(table, date_column, period1)?;
    let rows2 = date_mask(table, date_column, period2)?;

    let aggregate = |rows: &[usize]| -> HashMap<String, AggState> {
        let mut states: HashMap<String, AggState> = HashMap::new();
        for &row in rows {
            states
                .entry(group_col.group_key(row))
                .or_default()
                .add(value_col.numeric(row));
        }
        states
    };
    let agg1 = aggregate(&rows1);
    let agg2 = aggregate(&rows2);

    let mut groups: HashSet<&String> = agg1.keys().collect();
    groups.extend(agg2.keys());

    let mut rows: Vec<GroupComparison> = groups
        .into_iter()
        .map(|group| {
            let value1 = agg1
                .get(group)
                .map(|s| round2(s.finalize(aggregation)))
                .unwrap_or(0.0);
            let value2 = agg2
                .get(group)
                .map(|s| round2(s.finalize(aggregation)))
                .unwrap_or(0.0);
            GroupComparison {
                group: group.clone(),
                value1,
                value2,
                change: percent_change(value1, value2),
            }
        })
        .collect();
    rows.sort_by(|a, b| {
        (b.value1 + b.value2)
            .total_cmp(&(a.value1 + a.value2))
            .then(a.group.cmp(&b.group))
    });
    rows.truncate(COMPARE_GROUP_LIMIT);

    Ok(GroupedComparison {
        group_column: group_column.to_string(),
        value_column: value_column.to_string(),
        aggregation: aggregation.as_str().to_string(),
        period1_rows: rows1.len(),
        period2_rows: rows2.len(),
        rows,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct ColumnProfile {
    pub name: String,
    pub dtype: String,
    pub fill_pct: f64,
    pub distinct: usize,
    pub has_duplicates: bool,
    pub samples: Vec<String>,
}

/// Per-column profile: declared type, fill rate, distinct count, a
/// duplicate flag, and the first few present values.
pub fn column_stats(table: &Table) -> Vec<ColumnProfile> {
    let total = table.n_rows();
    table
        .columns()
        .iter()
        .map(|column| {
            let missing = column.missing_count();
            let fill_pct = if total > 0 {
                round1((total - missing) as f64 / total as f64 * 100.0)
            } else {
                0.0
            };
            let distinct = column.distinct_count();
            let samples = (0..column.len())
                .filter_map(|row| column.display_value(row))
                .take(3)
                .collect();
            ColumnProfile {
                name: column.name().to_string(),
                dtype: column.column_type().display_name().to_string(),
                fill_pct,
                distinct,
                has_duplicates: distinct < total,
                samples,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Cell;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn sample_table() -> Table {
        Table::new(vec![
            Column::from_cells(
                "Date",
                ColumnType::Date,
                vec![
                    Cell::Date(day(2024, 1, 15)),
                    Cell::Date(day(2024, 1, 20)),
                    Cell::Date(day(2024, 2, 2)),
                ],
            ),
            Column::from_cells(
                "Region",
                ColumnType::Text,
                vec![
                    Cell::Text("East".into()),
                    Cell::Text("West".into()),
                    Cell::Text("East".into()),
                ],
            ),
            Column::from_cells(
                "Amount",
                ColumnType::Integer,
                vec![Cell::Integer(100), Cell::Integer(50), Cell::Integer(200)],
            ),
        ])
        .unwrap()
    }

    #[test]
    fn date_range_ignores_missing() {
        let table = sample_table();
        let (min, max) = date_range(&table, "Date").unwrap().unwrap();
        assert_eq!(min, day(2024, 1, 15));
        assert_eq!(max, day(2024, 2, 2));
    }

    #[test]
    fn top_n_orders_by_count_then_first_seen() {
        let table = sample_table();
        let top = top_n(&table, "Region", 10, None).unwrap();
        assert_eq!(
            top,
            vec![
                ValueCount { value: "East".into(), count: 2 },
                ValueCount { value: "West".into(), count: 1 },
            ]
        );
    }

    #[test]
    fn trend_sum_fills_absent_cells_with_zero() {
        let table = sample_table();
        let request = TrendRequest {
            group_column: "Region".into(),
            aggregation: Aggregation::Sum,
            value_column: Some("Amount".into()),
            top_n: Some(2),
            ..Default::default()
        };
        let trend = trend_series(&table, "Date", &request).unwrap();
        assert_eq!(trend.months, vec!["2024-01", "2024-02"]);
        assert_eq!(trend.series["East"], vec![100.0, 200.0]);
        assert_eq!(trend.series["West"], vec![50.0, 0.0]);
    }

    #[test]
    fn trend_without_value_column_rejects_sum() {
        let table = sample_table();
        let request = TrendRequest {
            group_column: "Region".into(),
            aggregation: Aggregation::Sum,
            ..Default::default()
        };
        assert!(matches!(
            trend_series(&table, "Date", &request),
            Err(EngineError::MissingData(_))
        ));
    }

    #[test]
    fn movement_reports_zero_for_baseline_month() {
        let table = sample_table();
        let request = TrendRequest {
            group_column: "Region".into(),
            aggregation: Aggregation::Count,
            baseline_month: Some("2024-01".into()),
            ..Default::default()
        };
        let trend = trend_series(&table, "Date", &request).unwrap();
        let movement = trend.movement.unwrap();
        assert_eq!(movement.series["East"][0], 0.0);
        assert_eq!(movement.series["West"][0], 0.0);
        // West has no rows in February; its movement is -1 from baseline.
        assert_eq!(movement.series["West"][1], -1.0);
    }

    #[test]
    fn movement_omits_groups_absent_in_baseline() {
        let table = sample_table();
        let request = TrendRequest {
            group_column: "Region".into(),
            aggregation: Aggregation::Count,
            baseline_month: Some("2024-02".into()),
            ..Default::default()
        };
        let trend = trend_series(&table, "Date", &request).unwrap();
        let movement = trend.movement.unwrap();
        assert!(movement.series.contains_key("East"));
        assert!(!movement.series.contains_key("West"));
    }

    #[test]
    fn compare_marks_new_values() {
        let table = sample_table();
        let jan = Period::new(day(2024, 1, 1), day(2024, 1, 31));
        let feb = Period::new(day(2024, 2, 1), day(2024, 2, 29));
        let comparison = compare_values(&table, "Region", "Date", jan, feb).unwrap();
        let west = comparison.rows.iter().find(|r| r.value == "West").unwrap();
        assert_eq!(west.count1, 1);
        assert_eq!(west.count2, 0);
        assert_eq!(west.change, Change::Pct(-100.0));

        // Reverse the periods: West only exists in the second one now.
        let reversed = compare_values(&table, "Region", "Date", feb, jan).unwrap();
        let west = reversed.rows.iter().find(|r| r.value == "West").unwrap();
        assert_eq!(west.change, Change::New);
    }

    #[test]
    fn column_stats_flags_duplicates() {
        let table = sample_table();
        let stats = column_stats(&table);
        let region = stats.iter().find(|c| c.name == "Region").unwrap();
        assert_eq!(region.distinct, 2);
        assert!(region.has_duplicates);
        assert_eq!(region.fill_pct, 100.0);
        let amount = stats.iter().find(|c| c.name == "Amount").unwrap();
        assert!(!amount.has_duplicates);
    }
}
