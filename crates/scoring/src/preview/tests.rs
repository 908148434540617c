use super::*;
use serial_test::serial;

fn params() -> CalculationParams {
    CalculationParams {
        cap: 200.0,
        threshold: 0.1,
        ignore_dead_band: false,
    }
}

fn points(n: usize) -> Vec<DataPoint> {
    (0..n)
        .map(|i| DataPoint::single(format!("{:02}:00", i), i as i64 * 3_600_000, i as f64, 1.0))
        .collect()
}

fn sandbox() -> Sandbox {
    Sandbox::new("np", 10_000).unwrap()
}

#[test]
fn test_failing_row_is_isolated() {
    let rows = run_preview(&sandbox(), "result = 1 / (real - 5)", &points(12), &params(), 10);
    assert_eq!(rows.len(), 10);
    for row in &rows {
        if row.index == 5 {
            assert!(row.result.is_failed());
        } else {
            assert_eq!(row.result.value(), Some(1.0 / (row.index as f64 - 5.0)));
        }
    }
    assert_eq!(rows.iter().filter(|r| r.result.is_failed()).count(), 1);
}

#[test]
fn test_short_day_returns_all_rows() {
    let rows = run_preview(&sandbox(), "result = real", &points(3), &params(), 10);
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[2].time, "02:00");
    assert_eq!(rows[2].result, RowOutcome::Value(2.0));
}

#[test]
fn test_syntax_error_marks_every_row() {
    let rows = run_preview(&sandbox(), "result = (", &points(4), &params(), 10);
    assert_eq!(rows.len(), 4);
    for row in rows {
        match row.result {
            RowOutcome::Failed(message) => assert!(message.starts_with("Error: line 1")),
            other => panic!("expected failure: {:?}", other),
        }
    }
}

#[test]
fn test_threshold_follows_dead_band_flag() {
    let ignoring = CalculationParams {
        ignore_dead_band: true,
        ..params()
    };
    let rows = run_preview(&sandbox(), "result = threshold", &points(1), &ignoring, 10);
    assert_eq!(rows[0].result, RowOutcome::Value(0.0));
    let rows = run_preview(&sandbox(), "result = threshold", &points(1), &params(), 10);
    assert_eq!(rows[0].result, RowOutcome::Value(0.1));
}

#[test]
fn test_rows_serialize_camel_case() {
    let rows = run_preview(&sandbox(), "result = real", &points(1), &params(), 1);
    let json = serde_json::to_value(&rows[0]).unwrap();
    assert_eq!(json["index"], 0);
    assert_eq!(json["result"], 0.0);
}

#[test]
#[serial]
fn test_preview_rows_from_config() {
    assert_eq!(preview_rows_from_config(), DEFAULT_PREVIEW_ROWS);
    let _rows = config::ConfigGuard::new("SCORING_PREVIEW_ROWS", "3");
    assert_eq!(preview_rows_from_config(), 3);
}

#[test]
fn test_debouncer_keeps_latest_only() {
    let debouncer = PreviewDebouncer::new();
    let first = debouncer.issue();
    let second = debouncer.issue();
    assert!(second > first);
    assert!(!debouncer.is_latest(first));
    assert_eq!(debouncer.accept(first, "stale"), None);
    assert_eq!(debouncer.accept(second, "fresh"), Some("fresh"));
}
