use super::*;
use chrono::TimeZone;
use once_cell::sync::Lazy;

fn cst() -> FixedOffset {
    FixedOffset::east_opt(8 * 3600).unwrap()
}

fn date(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 5, d).unwrap()
}

fn point(day: u32, hour: u32, real: f64, fore: f64) -> DataPoint {
    let ts = cst()
        .with_ymd_and_hms(2024, 5, day, hour, 0, 0)
        .unwrap()
        .timestamp_millis();
    DataPoint::single(format!("{:02}:00", hour), ts, real, fore)
}

fn sandbox() -> Sandbox {
    Sandbox::new("np", 10_000).unwrap()
}

/// `calculate` は blocking スレッドに渡すので 'static が要る
fn shared_sandbox() -> &'static Sandbox {
    static SANDBOX: Lazy<Sandbox> = Lazy::new(sandbox);
    &SANDBOX
}

fn assembler() -> ScriptAssembler {
    ScriptAssembler::new("np", AggregationPolicy::default())
}

fn two_days() -> Vec<DataPoint> {
    vec![
        point(2, 1, 100.0, 100.0),
        point(1, 0, 100.0, 90.0),
        point(1, 1, 100.0, 110.0),
        point(2, 0, 100.0, 100.0),
    ]
}

#[test]
fn test_request_defaults_come_from_region() {
    let request = CalculationRequest::for_region(RegionId::Northeast, 200.0);
    assert_eq!(request.params.threshold, 0.10);
    assert_eq!(request.aggregation(), AggregationMethod::Mean);
    assert_eq!(
        request.row_formula(),
        region::profile(RegionId::Northeast).default_row_formula
    );

    let json = r#"{"region":"shanxi","params":{"cap":100.0,"threshold":0.0},"rowFormula":"result = 0"}"#;
    let parsed: CalculationRequest = serde_json::from_str(json).unwrap();
    assert_eq!(parsed.row_formula(), "result = 0");
    assert_eq!(parsed.aggregation(), AggregationMethod::Rmse);
    assert_eq!(parsed.policy, None);
}

#[test]
fn test_days_in_ascending_order() {
    let request = CalculationRequest::for_region(RegionId::General, 200.0);
    let results = calculate_days(&sandbox(), &assembler(), &request, &two_days(), cst()).unwrap();
    let dates: Vec<NaiveDate> = results.iter().map(|r| r.date).collect();
    assert_eq!(dates, vec![date(1), date(2)]);

    assert_eq!(results[0].accuracy, 0.95);
    assert_eq!(results[0].mae, 10.0);
    assert_eq!(results[0].rmse, 10.0);
    assert_eq!(results[0].samples, 2);
    assert_eq!(results[1].accuracy, 1.0);
}

#[test]
fn test_range_filters_days() {
    let request = CalculationRequest {
        start: Some(date(2)),
        ..CalculationRequest::for_region(RegionId::General, 200.0)
    };
    let results = calculate_days(&sandbox(), &assembler(), &request, &two_days(), cst()).unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].date, date(2));
}

#[test]
fn test_empty_range_is_reported_before_assembly() {
    // 行式が壊れていても範囲エラーが先
    let request = CalculationRequest {
        row_formula: Some("result = (".to_string()),
        start: Some(date(10)),
        end: Some(date(11)),
        ..CalculationRequest::for_region(RegionId::General, 200.0)
    };
    let err = calculate_days(&sandbox(), &assembler(), &request, &two_days(), cst()).unwrap_err();
    assert_eq!(
        err,
        Error::DataRangeEmpty {
            start: Some(date(10)),
            end: Some(date(11)),
        }
    );
}

#[test]
fn test_invalid_params_rejected() {
    let mut request = CalculationRequest::for_region(RegionId::General, 0.0);
    assert!(matches!(
        calculate_days(&sandbox(), &assembler(), &request, &two_days(), cst()),
        Err(Error::InvalidParams(_))
    ));
    request.params.cap = 100.0;
    request.params.threshold = 1.5;
    assert!(matches!(
        calculate_days(&sandbox(), &assembler(), &request, &two_days(), cst()),
        Err(Error::InvalidParams(_))
    ));
}

#[test]
fn test_runtime_error_carries_date() {
    let request = CalculationRequest {
        row_formula: Some("result = 1 / (fore - 100)".to_string()),
        ..CalculationRequest::for_region(RegionId::General, 200.0)
    };
    let err = calculate_days(&sandbox(), &assembler(), &request, &two_days(), cst()).unwrap_err();
    match err {
        Error::RowRuntime { date: d, row, .. } => {
            assert_eq!(d, Some(date(2)));
            assert_eq!(row, Some(0));
        }
        other => panic!("unexpected: {:?}", other),
    }
}

#[test]
fn test_request_policy_overrides_assembler() {
    let code = "\
if real < threshold * cap and fore < threshold * cap:
    result = 0
else:
    result = 0.5
";
    let points = vec![point(1, 0, 5.0, 5.0), point(1, 1, 100.0, 50.0)];
    let mut request = CalculationRequest {
        row_formula: Some(code.to_string()),
        aggregation: Some(AggregationMethod::Mean),
        ..CalculationRequest::for_region(RegionId::General, 200.0)
    };
    request.params.threshold = 0.1;

    let retained = calculate_days(&sandbox(), &assembler(), &request, &points, cst()).unwrap();
    assert_eq!(retained[0].accuracy, 0.75);

    request.policy = Some(AggregationPolicy {
        dead_band: common::types::DeadBandPolicy::Exclude,
        clamp_upper: false,
    });
    let excluded = calculate_days(&sandbox(), &assembler(), &request, &points, cst()).unwrap();
    assert_eq!(excluded[0].accuracy, 0.5);
}

#[tokio::test]
async fn test_calculate_publishes_done() {
    let (tx, rx) = watch::channel(CalculationState::Idle);
    let request = CalculationRequest::for_region(RegionId::General, 200.0);
    let results = calculate(shared_sandbox(), &assembler(), &request, &two_days(), cst(), &tx)
        .await
        .unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(*rx.borrow(), CalculationState::Done { days: 2 });
}

#[tokio::test]
async fn test_calculate_publishes_failure() {
    let (tx, rx) = watch::channel(CalculationState::Idle);
    let request = CalculationRequest {
        row_formula: Some("result = = 1".to_string()),
        ..CalculationRequest::for_region(RegionId::General, 200.0)
    };
    let err = calculate(shared_sandbox(), &assembler(), &request, &two_days(), cst(), &tx)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::FormulaSyntax { .. }));
    match &*rx.borrow() {
        CalculationState::Failed { message } => assert!(message.contains("Syntax error")),
        other => panic!("unexpected state: {:?}", other),
    }
}

#[tokio::test]
async fn test_calculate_row_failure_carries_date() {
    let (tx, rx) = watch::channel(CalculationState::Idle);
    let request = CalculationRequest {
        row_formula: Some("result = 1 / (fore - 90)".to_string()),
        ..CalculationRequest::for_region(RegionId::General, 200.0)
    };
    let err = calculate(shared_sandbox(), &assembler(), &request, &two_days(), cst(), &tx)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::RowRuntime { date: Some(d), row: Some(0), .. } if d == date(1)
    ));
    assert!(matches!(*rx.borrow(), CalculationState::Failed { .. }));
}

#[tokio::test]
async fn test_calculating_state_is_visible_during_run() {
    let (tx, mut rx) = watch::channel(CalculationState::Idle);
    let request = CalculationRequest::for_region(RegionId::General, 200.0);
    let points = two_days();
    let assembler = assembler();

    let observer = async {
        let mut seen = Vec::new();
        while rx.changed().await.is_ok() {
            let state = rx.borrow_and_update().clone();
            let finished = matches!(state, CalculationState::Done { .. });
            seen.push(state);
            if finished {
                break;
            }
        }
        seen
    };
    let (outcome, seen) = tokio::join!(
        calculate(shared_sandbox(), &assembler, &request, &points, cst(), &tx),
        observer
    );
    assert!(outcome.is_ok());
    assert_eq!(
        seen,
        vec![
            CalculationState::Calculating { days: 2 },
            CalculationState::Done { days: 2 },
        ]
    );
}

#[test]
fn test_state_serializes_tagged() {
    let json = serde_json::to_value(CalculationState::Calculating { days: 3 }).unwrap();
    assert_eq!(json["state"], "calculating");
    assert_eq!(json["days"], 3);
}
