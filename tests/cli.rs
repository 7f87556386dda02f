use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const SALES_CSV: &str = "\
Date,Region,Amount
2024-01-15,East,100
2024-01-20,West,50
2024-02-02,East,200
";

fn cmd(data_dir: &std::path::Path) -> Command {
    let mut command = Command::cargo_bin("consolidata").expect("binary");
    command.arg("--data-dir").arg(data_dir);
    command
}

#[test]
fn upload_then_query_through_the_cli() {
    let dir = TempDir::new().unwrap();
    let data_dir = dir.path().join("data");
    let csv_path = dir.path().join("sales.csv");
    std::fs::write(&csv_path, SALES_CSV).unwrap();

    cmd(&data_dir).args(["create", "fleet"]).assert().success();

    cmd(&data_dir)
        .args(["upload", "--project", "fleet", "--input"])
        .arg(&csv_path)
        .assert()
        .success();

    cmd(&data_dir)
        .args([
            "settings",
            "--project",
            "fleet",
            "--date-column",
            "Date",
            "--top",
            "Region",
        ])
        .assert()
        .success();

    cmd(&data_dir)
        .args(["top", "--project", "fleet", "--column", "Region"])
        .assert()
        .success()
        .stdout(predicate::str::contains("East"))
        .stdout(predicate::str::contains("\"count\": 2"));

    cmd(&data_dir)
        .args(["columns", "--project", "fleet"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"dtype\": \"Date\""));
}

#[test]
fn unknown_project_fails_with_a_clear_error() {
    let dir = TempDir::new().unwrap();
    let data_dir = dir.path().join("data");
    cmd(&data_dir)
        .args(["dashboard", "--project", "ghost"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn export_writes_a_workbook_file() {
    let dir = TempDir::new().unwrap();
    let data_dir = dir.path().join("data");
    let csv_path = dir.path().join("sales.csv");
    let out_path = dir.path().join("out.xlsx");
    std::fs::write(&csv_path, SALES_CSV).unwrap();

    cmd(&data_dir).args(["create", "fleet"]).assert().success();
    cmd(&data_dir)
        .args(["upload", "--project", "fleet", "--input"])
        .arg(&csv_path)
        .assert()
        .success();
    cmd(&data_dir)
        .args(["export", "--project", "fleet", "--output"])
        .arg(&out_path)
        .assert()
        .success();

    let bytes = std::fs::read(&out_path).unwrap();
    // xlsx containers start with the ZIP local-file-header magic.
    assert_eq!(&bytes[..2], b"PK");
}
