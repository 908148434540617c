use super::*;
use std::io::Write;
use tempfile::NamedTempFile;

fn cst() -> FixedOffset {
    FixedOffset::east_opt(8 * 3600).unwrap()
}

fn headers(names: &[&str]) -> StringRecord {
    StringRecord::from(names.to_vec())
}

#[test]
fn test_detect_columns_by_name() {
    let layout = detect_columns(
        &headers(&["\u{feff}Time", "Actual_Power", "fore_a", "Fore_b", "note"]),
        &ColumnOverrides::default(),
    )
    .unwrap();
    assert_eq!(
        layout,
        ColumnLayout {
            time: 0,
            real: 1,
            forecasts: vec![2, 3],
        }
    );

    let chinese = detect_columns(
        &headers(&["时间", "实际功率", "预测功率"]),
        &ColumnOverrides::default(),
    )
    .unwrap();
    assert_eq!(chinese.forecasts, vec![2]);
}

#[test]
fn test_overrides_win() {
    let overrides = ColumnOverrides {
        time: Some("ts".to_string()),
        real: Some("measured".to_string()),
        forecasts: vec!["model".to_string()],
    };
    let layout = detect_columns(&headers(&["model", "ts", "measured", "forecast"]), &overrides).unwrap();
    assert_eq!(
        layout,
        ColumnLayout {
            time: 1,
            real: 2,
            forecasts: vec![0],
        }
    );

    let missing = ColumnOverrides {
        real: Some("nope".to_string()),
        ..ColumnOverrides::default()
    };
    assert!(detect_columns(&headers(&["time", "real", "fore"]), &missing).is_err());
}

#[test]
fn test_missing_columns_are_errors() {
    let none = ColumnOverrides::default();
    assert!(detect_columns(&headers(&["real", "fore"]), &none).is_err());
    assert!(detect_columns(&headers(&["time", "fore"]), &none).is_err());
    assert!(detect_columns(&headers(&["time", "real"]), &none).is_err());
}

#[test]
fn test_parse_timestamp_formats() {
    let tz = cst();
    let expected = tz
        .with_ymd_and_hms(2024, 1, 2, 3, 4, 0)
        .unwrap()
        .timestamp_millis();
    for text in [
        "2024-01-02 03:04",
        "2024-01-02 03:04:00",
        "2024/01/02 03:04",
        "2024-01-02T03:04:00",
        "2024-01-02T03:04:00+08:00",
    ] {
        assert_eq!(parse_timestamp(text, tz), Some(expected), "{}", text);
    }
    assert_eq!(parse_timestamp("1700000000", tz), Some(1_700_000_000_000));
    assert_eq!(parse_timestamp("1700000000000", tz), Some(1_700_000_000_000));
    assert_eq!(parse_timestamp("", tz), None);
    assert_eq!(parse_timestamp("yesterday", tz), None);
}

#[test]
fn test_read_points_skips_bad_rows() {
    let csv = "\
time,real,fore1,fore2
2024-01-01 00:00,100,90,110
2024-01-01 00:15,abc,90,110
2024-01-01 00:30,50,,60
bad time,50,40,60
2024-01-01 00:45,80,70,74
";
    let ingested = read_points(csv.as_bytes(), &ColumnOverrides::default(), cst()).unwrap();
    assert_eq!(ingested.skipped, 3);
    assert_eq!(ingested.points.len(), 2);

    let first = &ingested.points[0];
    assert_eq!(first.time, "2024-01-01 00:00");
    assert_eq!(first.real, 100.0);
    assert_eq!(first.forecast, 100.0);
    assert_eq!(first.forecasts, vec![90.0, 110.0]);
    assert_eq!(ingested.points[1].forecast, 72.0);
}

#[test]
fn test_load_csv_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "timestamp,actual,forecast").unwrap();
    writeln!(file, "1700000000,10,12").unwrap();
    let ingested = load_csv(file.path(), &ColumnOverrides::default(), cst()).unwrap();
    assert_eq!(ingested.points.len(), 1);
    assert_eq!(ingested.points[0].timestamp, 1_700_000_000_000);

    assert!(load_csv(Path::new("/nonexistent/data.csv"), &ColumnOverrides::default(), cst()).is_err());
}

#[test]
fn test_load_csv_falls_back_to_gbk() {
    let (bytes, _, had_errors) = GBK.encode("时间,实际,预测\n2024-01-01 00:00,100,90\n");
    assert!(!had_errors);
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(&bytes).unwrap();

    let ingested = load_csv(file.path(), &ColumnOverrides::default(), cst()).unwrap();
    assert_eq!(ingested.layout, ColumnLayout { time: 0, real: 1, forecasts: vec![2] });
    assert_eq!(ingested.points.len(), 1);
    assert_eq!(ingested.points[0].real, 100.0);
    assert_eq!(ingested.points[0].forecast, 90.0);
}

#[test]
fn test_decode_text() {
    assert_eq!(decode_text("实际".as_bytes().to_vec()).unwrap(), "实际");
    assert_eq!(decode_text(vec![0xca, 0xb5, 0xbc, 0xca]).unwrap(), "实际");
    // 0xff は GBK でも不正
    let err = decode_text(vec![b'a', 0xff, 0xfe]).unwrap_err();
    assert!(err.to_string().contains("neither UTF-8 nor GBK"));

    let mut file = NamedTempFile::new().unwrap();
    file.write_all(&[0xff, 0xfe, 0xff]).unwrap();
    assert!(load_csv(file.path(), &ColumnOverrides::default(), cst()).is_err());
}
