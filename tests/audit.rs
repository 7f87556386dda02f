mod common;

use common::{engine, write_file};
use consolidata::audit::Level;
use consolidata::store::{ProjectSettings, TopColumn};

/// One duplicated pair, a missing-heavy column, and weekday-spread
/// dates so several checks fire at once.
fn seed_project() -> (tempfile::TempDir, consolidata::engine::Engine) {
    let (dir, engine) = engine();
    engine.create_project("audit").unwrap();

    let mut csv = String::from("Date,Vendor,Amount,Notes\n");
    for d in 1..=28 {
        csv.push_str(&format!("2024-01-{d:02},Acme,{},\n", d * 10));
    }
    // Exact duplicates of the first data row.
    csv.push_str("2024-01-01,Acme,10,\n");
    csv.push_str("2024-01-01,Acme,10,\n");
    let path = write_file(&dir, "audit.csv", &csv);
    engine.upload_file("audit", &path, None).unwrap();

    let settings = ProjectSettings {
        date_column: "Date".to_string(),
        top_columns: vec![TopColumn {
            column: "Vendor".to_string(),
            display_name: "Vendor".to_string(),
        }],
    };
    engine.update_settings("audit", &settings).unwrap();
    (dir, engine)
}

#[test]
fn report_summarizes_findings_by_level() {
    let (_dir, engine) = seed_project();
    let report = engine.run_audit_checks("audit").unwrap();
    assert_eq!(report.summary.total_rows, 30);
    assert_eq!(
        report.summary.total_findings,
        report.findings.len()
    );
    assert_eq!(
        report.summary.high + report.summary.medium + report.summary.low,
        report.summary.total_findings
    );
}

#[test]
fn duplicate_rows_are_reported() {
    let (_dir, engine) = seed_project();
    let report = engine.run_audit_checks("audit").unwrap();
    let duplicate = report
        .findings
        .iter()
        .find(|f| f.check == "duplicate")
        .expect("duplicate finding");
    assert!(duplicate.title.contains("duplicate rows"));
}

#[test]
fn concentration_flags_a_dominating_value() {
    let (_dir, engine) = seed_project();
    let report = engine.run_audit_checks("audit").unwrap();
    let concentration = report
        .findings
        .iter()
        .find(|f| f.check == "concentration")
        .expect("concentration finding");
    // Every row is the same vendor.
    assert_eq!(concentration.level, Level::High);
    assert!(concentration.title.contains("Vendor"));
}

#[test]
fn missing_data_flags_the_empty_column() {
    let (_dir, engine) = seed_project();
    let report = engine.run_audit_checks("audit").unwrap();
    let missing = report
        .findings
        .iter()
        .find(|f| f.check == "missing_data")
        .expect("missing-data finding");
    assert!(missing.title.contains("Notes"));
    assert_eq!(missing.level, Level::High);
}

#[test]
fn weekend_activity_is_reported_for_january_dates() {
    let (_dir, engine) = seed_project();
    let report = engine.run_audit_checks("audit").unwrap();
    let weekend = report
        .findings
        .iter()
        .find(|f| f.check == "weekend_activity")
        .expect("weekend finding");
    // January 2024 has eight Saturday/Sunday dates in the first 28 days.
    assert!(weekend.title.starts_with("8 weekend"));
}

#[test]
fn findings_are_sorted_most_severe_first() {
    let (_dir, engine) = seed_project();
    let report = engine.run_audit_checks("audit").unwrap();
    let levels: Vec<Level> = report.findings.iter().map(|f| f.level).collect();
    let mut sorted = levels.clone();
    sorted.sort();
    assert_eq!(levels, sorted);
}
