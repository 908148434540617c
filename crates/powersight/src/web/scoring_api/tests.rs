use super::*;
use crate::web::test_state;
use axum::http::StatusCode;
use common::types::RegionId;
use std::time::Duration;
use tempfile::TempDir;

const CSV: &str = "\
time,real,fore
2024-05-01 00:00,100,90
2024-05-01 00:15,100,110
2024-05-02 00:00,50,50
";

fn params() -> CalculationParams {
    CalculationParams {
        cap: 200.0,
        threshold: 0.0,
        ignore_dead_band: false,
    }
}

fn csv_source() -> DataSource {
    DataSource {
        csv: Some(CSV.to_string()),
        ..DataSource::default()
    }
}

fn preview_body(code: &str) -> PreviewBody {
    PreviewBody {
        code: code.to_string(),
        params: params(),
        date: None,
        rows: None,
        data: csv_source(),
    }
}

#[tokio::test]
async fn test_normalize_endpoint() {
    let dir = TempDir::new().unwrap();
    let state = Arc::new(test_state(dir.path()).await);
    let Json(response) = normalize(
        State(state.clone()),
        Json(NormalizeBody {
            code: "def f(actual, forecast):\n    return actual - forecast".to_string(),
        }),
    )
    .await
    .unwrap();
    assert_eq!(response.code, "result = real - fore\nresult\n");

    let err = normalize(
        State(state),
        Json(NormalizeBody {
            code: "while True:\n    pass".to_string(),
        }),
    )
    .await
    .unwrap_err();
    assert_eq!(err.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_preview_uses_first_day() {
    let dir = TempDir::new().unwrap();
    let state = Arc::new(test_state(dir.path()).await);
    let Json(response) = run_preview(State(state), Json(preview_body("result = real - fore")))
        .await
        .unwrap();
    assert!(!response.superseded);
    assert_eq!(response.date, NaiveDate::from_ymd_opt(2024, 5, 1));
    let values: Vec<Option<f64>> = response.rows.iter().map(|r| r.result.value()).collect();
    assert_eq!(values, vec![Some(10.0), Some(-10.0)]);
}

#[tokio::test]
async fn test_preview_selected_day_and_missing_day() {
    let dir = TempDir::new().unwrap();
    let state = Arc::new(test_state(dir.path()).await);

    let body = PreviewBody {
        date: NaiveDate::from_ymd_opt(2024, 5, 2),
        ..preview_body("result = real")
    };
    let Json(response) = run_preview(State(state.clone()), Json(body)).await.unwrap();
    assert_eq!(response.rows.len(), 1);
    assert_eq!(response.rows[0].result.value(), Some(50.0));

    let body = PreviewBody {
        date: NaiveDate::from_ymd_opt(2024, 6, 1),
        ..preview_body("result = real")
    };
    let err = run_preview(State(state), Json(body)).await.unwrap_err();
    assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_superseded_preview_is_dropped() {
    let dir = TempDir::new().unwrap();
    let mut state = test_state(dir.path()).await;
    state.preview_debounce = Duration::from_millis(50);
    let state = Arc::new(state);

    let first = tokio::spawn(run_preview(
        State(state.clone()),
        Json(preview_body("result = 1")),
    ));
    tokio::time::sleep(Duration::from_millis(10)).await;
    let second = run_preview(State(state), Json(preview_body("result = 2")));

    let Json(latest) = second.await.unwrap();
    let Json(stale) = first.await.unwrap().unwrap();
    assert!(stale.superseded);
    assert!(stale.rows.is_empty());
    assert!(!latest.superseded);
    assert_eq!(latest.rows[0].result.value(), Some(2.0));
}

#[tokio::test]
async fn test_calculate_and_status() {
    let dir = TempDir::new().unwrap();
    let state = Arc::new(test_state(dir.path()).await);
    assert_eq!(status(State(state.clone())).await.0, CalculationState::Idle);

    let body = CalculateBody {
        request: CalculationRequest::for_region(RegionId::General, 200.0),
        data: csv_source(),
    };
    let Json(response) = calculate(State(state.clone()), Json(body)).await.unwrap();
    let accuracies: Vec<f64> = response.results.iter().map(|r| r.accuracy).collect();
    assert_eq!(accuracies, vec![0.95, 1.0]);
    assert!((response.mean_accuracy.unwrap() - 0.975).abs() < 1e-12);
    assert_eq!(
        status(State(state)).await.0,
        CalculationState::Done { days: 2 }
    );
}

#[tokio::test]
async fn test_calculate_error_statuses() {
    let dir = TempDir::new().unwrap();
    let state = Arc::new(test_state(dir.path()).await);

    let runtime = CalculateBody {
        request: CalculationRequest {
            row_formula: Some("result = 1 / (real - fore)".to_string()),
            ..CalculationRequest::for_region(RegionId::General, 200.0)
        },
        data: csv_source(),
    };
    let err = calculate(State(state.clone()), Json(runtime)).await.unwrap_err();
    assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(matches!(
        status(State(state.clone())).await.0,
        CalculationState::Failed { .. }
    ));

    let bad_csv = CalculateBody {
        request: CalculationRequest::for_region(RegionId::General, 200.0),
        data: DataSource {
            csv: Some("a,b\n1,2\n".to_string()),
            ..DataSource::default()
        },
    };
    let err = calculate(State(state), Json(bad_csv)).await.unwrap_err();
    assert_eq!(err.status, StatusCode::BAD_REQUEST);
}

#[test]
fn test_calculate_body_accepts_flat_json() {
    let json = r#"{
        "region": "northeast",
        "params": {"cap": 100.0, "threshold": 0.1},
        "points": [{"time": "00:00", "timestamp": 0, "real": 1.0, "forecast": 2.0}]
    }"#;
    let body: CalculateBody = serde_json::from_str(json).unwrap();
    assert_eq!(body.request.region, RegionId::Northeast);
    assert_eq!(body.data.points.len(), 1);
    assert!(body.data.csv.is_none());
}
