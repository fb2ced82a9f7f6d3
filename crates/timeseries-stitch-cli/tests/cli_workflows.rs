#![allow(missing_docs)]

use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde_json::{Value, json};
use tempfile::TempDir;

type TestResult = Result<(), Box<dyn std::error::Error>>;

fn cli_bin() -> &'static str {
    env!("CARGO_BIN_EXE_tsstitch")
}

fn run_cli(args: &[&str]) -> io::Result<Output> {
    Command::new(cli_bin()).args(args).output()
}

fn assert_cli_success(output: &Output) {
    assert!(
        output.status.success(),
        "stdout:\n{}\nstderr:\n{}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

fn samples(indices: impl Iterator<Item = i64>, value: impl Fn(i64) -> f64) -> Value {
    Value::Array(
        indices
            .map(|i| json!([i * 300, value(i)]))
            .collect::<Vec<_>>(),
    )
}

fn write_json(dir: &Path, name: &str, value: &Value) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let path = dir.join(name);
    std::fs::write(&path, serde_json::to_string(value)?)?;
    Ok(path)
}

/// Three recorded stretches at 5 minute spacing: 5h, 50min and ~6h.
fn write_battery_fixture(dir: &Path) -> Result<(PathBuf, PathBuf), Box<dyn std::error::Error>> {
    let rows = || (0..=60).chain(70..=80).chain(100..=170);
    let replay = json!({
        "yield_q": [{ "name": "yield", "samples": samples(rows(), |i| (i % 7) as f64 + 1.0) }],
        "level_q": [{ "name": "level", "samples": samples(rows(), |i| if i < 10 { 100.0 } else { 40.0 }) }],
    });
    let config = json!({
        "fetch": { "max_points_per_query": 25 },
        "dataset": { "queries": ["yield_q", "level_q"] },
    });
    Ok((
        write_json(dir, "replay.json", &replay)?,
        write_json(dir, "pipeline.json", &config)?,
    ))
}

#[test]
fn fetch_stitches_chunks_into_one_csv() -> TestResult {
    let tmp = TempDir::new()?;
    let replay = write_json(
        tmp.path(),
        "replay.json",
        &json!({ "power_q": [{ "name": "power", "samples": samples(0..12, |i| i as f64 + 0.5) }] }),
    )?;
    let replay = replay.to_string_lossy().to_string();

    let output = run_cli(&[
        "fetch", "--query", "power_q", "--start", "0", "--end", "3300", "--step", "5m",
        "--replay", &replay, "--max-points", "4", "--format", "csv", "--time-format", "unix",
    ])?;
    assert_cli_success(&output);

    let stdout = String::from_utf8(output.stdout)?;
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines[0], "timestamp,power");
    assert_eq!(lines.len(), 13, "{stdout}");
    assert_eq!(lines[1], "0,0.5");
    assert_eq!(lines[12], "3300,11.5");
    Ok(())
}

#[test]
fn segments_summary_lists_long_stretches() -> TestResult {
    let tmp = TempDir::new()?;
    let (replay, config) = write_battery_fixture(tmp.path())?;
    let (replay, config) = (
        replay.to_string_lossy().to_string(),
        config.to_string_lossy().to_string(),
    );

    let output = run_cli(&[
        "segments", "--start", "0", "--end", "51000", "--replay", &replay, "--config", &config,
        "--format", "jsonl", "--time-format", "unix",
    ])?;
    assert_cli_success(&output);

    let stdout = String::from_utf8(output.stdout)?;
    let rows: Vec<Value> = stdout
        .lines()
        .map(serde_json::from_str)
        .collect::<Result<_, _>>()?;
    assert_eq!(rows.len(), 2, "{stdout}");
    assert_eq!(rows[0]["start"], json!(0));
    assert_eq!(rows[0]["end"], json!(18000));
    assert_eq!(rows[0]["rows"], json!(61));
    assert_eq!(rows[0]["duration"], json!("5h"));
    assert_eq!(rows[1]["start"], json!(30000));
    assert_eq!(rows[1]["end"], json!(51000));
    Ok(())
}

#[test]
fn segment_rows_mask_full_battery_readings() -> TestResult {
    let tmp = TempDir::new()?;
    let (replay, config) = write_battery_fixture(tmp.path())?;
    let (replay, config) = (
        replay.to_string_lossy().to_string(),
        config.to_string_lossy().to_string(),
    );

    let output = run_cli(&[
        "segments", "--start", "0", "--end", "51000", "--replay", &replay, "--config", &config,
        "--rows", "--format", "csv", "--time-format", "unix",
    ])?;
    assert_cli_success(&output);

    let stdout = String::from_utf8(output.stdout)?;
    let lines: Vec<&str> = stdout.lines().collect();
    assert!(lines[0].starts_with("segment,timestamp,yield,day_sin"), "{}", lines[0]);
    assert!(!lines[0].contains("level"));
    assert_eq!(lines.len(), 1 + 61 + 71);
    // Rows 0..10 were recorded with a full battery.
    assert!(lines[1].starts_with("0,0,,"), "{}", lines[1]);
    assert!(lines[11].starts_with("0,3000,4.0,"), "{}", lines[11]);
    Ok(())
}

#[test]
fn drop_idle_removes_zero_production_stretches() -> TestResult {
    let tmp = TempDir::new()?;
    let rows = || (0..=60).chain(100..=170);
    let replay = write_json(
        tmp.path(),
        "replay.json",
        &json!({
            "yield_q": [{ "name": "yield", "samples": samples(rows(), |i| if i <= 20 { 0.0 } else { 2.0 }) }],
            "level_q": [{ "name": "level", "samples": samples(rows(), |_| 40.0) }],
        }),
    )?;
    let config = write_json(
        tmp.path(),
        "pipeline.json",
        &json!({ "dataset": { "queries": ["yield_q", "level_q"] } }),
    )?;
    let (replay, config) = (
        replay.to_string_lossy().to_string(),
        config.to_string_lossy().to_string(),
    );
    let base: &[&str] = &[
        "segments", "--start", "0", "--end", "51000", "--replay", &replay, "--config", &config,
        "--format", "jsonl", "--time-format", "unix",
    ];

    let output = run_cli(base)?;
    assert_cli_success(&output);
    assert_eq!(String::from_utf8(output.stdout)?.lines().count(), 2);

    // Rows 11..=20 close a trailing window of twelve zeros and are dropped,
    // leaving both halves of the first stretch shorter than four hours.
    let mut with_idle = base.to_vec();
    with_idle.push("--drop-idle");
    let output = run_cli(&with_idle)?;
    assert_cli_success(&output);
    let stdout = String::from_utf8(output.stdout)?;
    let rows: Vec<Value> = stdout
        .lines()
        .map(serde_json::from_str)
        .collect::<Result<_, _>>()?;
    assert_eq!(rows.len(), 1, "{stdout}");
    assert_eq!(rows[0]["start"], json!(30000));
    Ok(())
}

#[test]
fn dataset_preview_includes_solar_columns() -> TestResult {
    let tmp = TempDir::new()?;
    let (replay, config) = write_battery_fixture(tmp.path())?;
    let (replay, config) = (
        replay.to_string_lossy().to_string(),
        config.to_string_lossy().to_string(),
    );

    let output = run_cli(&[
        "dataset", "--start", "0", "--end", "51000", "--replay", &replay, "--config", &config,
        "--latitude", "48.1", "--longitude", "11.6", "--max-rows", "3",
    ])?;
    assert_cli_success(&output);

    let stdout = String::from_utf8(output.stdout)?;
    assert!(stdout.contains("Preview output"), "{stdout}");
    assert!(stdout.contains("elevation"), "{stdout}");
    assert!(stdout.contains("total_rows: 171"), "{stdout}");
    Ok(())
}

#[test]
fn bad_input_fails_with_a_message() -> TestResult {
    let output = run_cli(&[
        "fetch", "--query", "q", "--start", "yesterday", "--end", "0", "--replay", "x.json",
    ])?;
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Invalid timestamp 'yesterday'"));

    let tmp = TempDir::new()?;
    let replay = write_json(tmp.path(), "replay.json", &json!({}))?;
    let replay = replay.to_string_lossy().to_string();
    let output = run_cli(&[
        "fetch", "--query", "q", "--start", "600", "--end", "0", "--replay", &replay,
    ])?;
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Invalid time range"));

    let missing = tmp.path().join("missing.json").to_string_lossy().to_string();
    let output = run_cli(&[
        "fetch", "--query", "q", "--start", "0", "--end", "600", "--replay", &missing,
    ])?;
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("Failed to load replay data"));
    Ok(())
}
