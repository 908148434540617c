use super::*;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use chrono::NaiveDate;
use serial_test::serial;
use tempfile::TempDir;

#[test]
fn test_scoring_errors_map_to_statuses() {
    let cases = [
        (
            scoring::Error::FormulaSyntax {
                line: 1,
                message: "x".to_string(),
            },
            StatusCode::BAD_REQUEST,
        ),
        (
            scoring::Error::InvalidParams("cap".to_string()),
            StatusCode::BAD_REQUEST,
        ),
        (
            scoring::Error::RowRuntime {
                date: NaiveDate::from_ymd_opt(2024, 1, 1),
                row: Some(3),
                message: "division by zero".to_string(),
            },
            StatusCode::UNPROCESSABLE_ENTITY,
        ),
        (
            scoring::Error::DataRangeEmpty {
                start: None,
                end: None,
            },
            StatusCode::UNPROCESSABLE_ENTITY,
        ),
        (
            scoring::Error::SandboxInit("alias".to_string()),
            StatusCode::INTERNAL_SERVER_ERROR,
        ),
        (
            scoring::Error::Internal("calculation task aborted".to_string()),
            StatusCode::INTERNAL_SERVER_ERROR,
        ),
    ];
    for (error, expected) in cases {
        let message = error.to_string();
        let api = ApiError::from(error);
        assert_eq!(api.status, expected);
        assert_eq!(api.detail, message);
    }
}

#[test]
fn test_error_response_status() {
    let response = ApiError::not_found("file not found").into_response();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_router_builds_with_state() {
    let dir = TempDir::new().unwrap();
    let state = Arc::new(test_state(dir.path()).await);
    let _app: Router = router(state);
}

#[tokio::test]
#[serial]
async fn test_state_from_config() {
    let dir = TempDir::new().unwrap();
    let store = dir.path().join("formulas.json");
    let _store = config::ConfigGuard::new("FORMULA_STORE_PATH", store.to_str().unwrap());
    let _root = config::ConfigGuard::new("SERVER_DATA_ROOT", dir.path().to_str().unwrap());
    let _debounce = config::ConfigGuard::new("SERVER_PREVIEW_DEBOUNCE", "1s 500ms");
    let _rows = config::ConfigGuard::new("SCORING_PREVIEW_ROWS", "4");

    let state = AppState::from_config().await.unwrap();
    assert_eq!(state.preview_debounce, Duration::from_millis(1500));
    assert_eq!(state.preview_rows, 4);
    assert_eq!(
        state.data_root,
        Some(std::fs::canonicalize(dir.path()).unwrap())
    );
    assert_eq!(state.store.lock().await.path(), store.as_path());
}

#[tokio::test]
#[serial]
async fn test_bad_debounce_falls_back() {
    let dir = TempDir::new().unwrap();
    let store = dir.path().join("formulas.json");
    let _store = config::ConfigGuard::new("FORMULA_STORE_PATH", store.to_str().unwrap());
    let _debounce = config::ConfigGuard::new("SERVER_PREVIEW_DEBOUNCE", "soon");
    let state = AppState::from_config().await.unwrap();
    assert_eq!(state.preview_debounce, DEFAULT_PREVIEW_DEBOUNCE);
}
