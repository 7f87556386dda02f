#![allow(dead_code)]

use std::path::PathBuf;

use consolidata::engine::Engine;
use consolidata::store::{ProjectSettings, TopColumn};
use tempfile::TempDir;

/// Engine over a throwaway store root. Keep the TempDir alive for the
/// duration of the test.
pub fn engine() -> (TempDir, Engine) {
    let dir = TempDir::new().expect("temp dir");
    let engine = Engine::new(dir.path().join("data")).expect("engine");
    (dir, engine)
}

pub fn write_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).expect("write fixture");
    path
}

pub const SALES_CSV: &str = "\
Date,Region,Amount
2024-01-15,East,100
2024-01-20,West,50
2024-02-02,East,200
";

/// Project with the three-row sales fixture uploaded and the date
/// column configured.
pub fn sales_project(name: &str) -> (TempDir, Engine) {
    let (dir, engine) = engine();
    engine.create_project(name).expect("create project");
    let path = write_file(&dir, "sales.csv", SALES_CSV);
    engine
        .upload_file(name, &path, None)
        .expect("upload fixture");
    let settings = ProjectSettings {
        date_column: "Date".to_string(),
        top_columns: vec![TopColumn {
            column: "Region".to_string(),
            display_name: "Region".to_string(),
        }],
    };
    engine.update_settings(name, &settings).expect("settings");
    (dir, engine)
}
