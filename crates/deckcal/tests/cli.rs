use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;

fn deckcal() -> Command {
    Command::cargo_bin("deckcal").expect("binary")
}

#[test]
fn fit_prints_the_transform() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("points.json");
    fs::write(
        &input,
        r#"{
            "nominal": [[12.13, 9.0], [380.87, 9.0], [12.13, 258.0]],
            "measured": [[13.16824337, 8.30855312], [380.50507635, -23.82925545], [34.87002331, 256.36103295]],
            "z_offset": 0.5
        }"#,
    )
    .expect("write input");

    let output = deckcal()
        .args(["--log-level", "warn", "fit"])
        .arg(&input)
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let fit: serde_json::Value = serde_json::from_slice(&output).expect("json");
    let rows = fit["transform"].as_array().expect("matrix");
    assert_eq!(rows.len(), 4);
    let t = [
        rows[0][3].as_f64().expect("tx"),
        rows[1][3].as_f64().expect("ty"),
        rows[2][3].as_f64().expect("tz"),
    ];
    assert!((t[0] - 0.3).abs() < 1e-6, "tx {}", t[0]);
    assert!((t[1] - 0.4).abs() < 1e-6, "ty {}", t[1]);
    assert!((t[2] - 0.5).abs() < 1e-12, "tz {}", t[2]);
}

#[test]
fn fit_rejects_collinear_points() {
    let dir = tempfile::tempdir().expect("tempdir");
    let input = dir.path().join("points.json");
    fs::write(
        &input,
        r#"{"nominal": [[0, 0], [1, 0], [2, 0]], "measured": [[0, 0], [0, 1], [1, 0]]}"#,
    )
    .expect("write input");

    deckcal()
        .arg("fit")
        .arg(&input)
        .assert()
        .failure()
        .stderr(predicate::str::contains("collinear"));
}

#[test]
fn simulate_writes_a_calibration_file_that_show_reads_back() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cal = dir.path().join("deck_calibration.json");

    deckcal()
        .args([
            "simulate",
            "--rotation-deg",
            "-5",
            "--shift",
            "0.3",
            "0.4",
            "0.5",
            "--output",
        ])
        .arg(&cal)
        .assert()
        .success()
        .stdout(predicate::str::contains("max_deviation"));

    assert!(cal.exists());
    deckcal()
        .arg("show")
        .arg(&cal)
        .assert()
        .success()
        .stdout(predicate::str::contains("gantry_calibration"))
        .stdout(predicate::str::contains("p300_multi_v1"));
}

#[test]
fn simulate_reports_unknown_pipettes() {
    deckcal()
        .args(["simulate", "--model", "p20_single_gen2"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown pipette model"));
}

#[test]
fn show_fails_on_missing_file() {
    deckcal()
        .args(["show", "/nonexistent/deck_calibration.json"])
        .assert()
        .failure()
        .stderr(predicate::str::starts_with("error:"));
}

#[test]
fn log_file_mirrors_console_lines() {
    let dir = tempfile::tempdir().expect("tempdir");
    let log = dir.path().join("calibration.log");

    deckcal()
        .args(["--log-level", "info", "--log-file"])
        .arg(&log)
        .args(["simulate", "--rotation-deg", "1.5"])
        .assert()
        .success()
        .stderr(predicate::str::contains("simulating calibration"));

    let written = fs::read_to_string(&log).expect("log file");
    assert!(
        written.contains("simulate] simulating calibration with p300_multi_v1"),
        "log file: {written}"
    );
    assert!(written.contains("deck transform committed"));
}
