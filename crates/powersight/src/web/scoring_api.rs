use super::{ApiError, AppState};
use crate::ingest::{self, ColumnOverrides};
use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use chrono::{FixedOffset, NaiveDate};
use common::types::{CalculationParams, DailyResult, DataPoint};
use logging::*;
use std::result::Result;
use scoring::{CalculationRequest, CalculationState, PreviewRow, dataset, preview};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub fn add_route(app: Router<Arc<AppState>>) -> Router<Arc<AppState>> {
    app.route("/api/normalize", post(normalize))
        .route("/api/preview", post(run_preview))
        .route("/api/calculate", post(calculate))
        .route("/api/status", get(status))
}

/// サンプルの渡し方。`points` か CSV 本文のどちらか。
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DataSource {
    #[serde(default)]
    points: Vec<DataPoint>,
    #[serde(default)]
    csv: Option<String>,
    #[serde(default)]
    columns: ColumnOverrides,
}

impl DataSource {
    fn load(self, offset: FixedOffset) -> Result<Vec<DataPoint>, ApiError> {
        match self.csv {
            Some(text) => ingest::read_points(text.as_bytes(), &self.columns, offset)
                .map(|ingested| ingested.points)
                .map_err(|e| ApiError::bad_request(format!("{:#}", e))),
            None => Ok(self.points),
        }
    }
}

#[derive(Debug, Deserialize)]
struct NormalizeBody {
    code: String,
}

#[derive(Debug, Serialize, PartialEq)]
struct NormalizeResponse {
    code: String,
}

async fn normalize(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NormalizeBody>,
) -> Result<Json<NormalizeResponse>, ApiError> {
    let code = scoring::normalize::normalize_with_alias(&body.code, state.sandbox.alias())?;
    Ok(Json(NormalizeResponse { code }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreviewBody {
    code: String,
    params: CalculationParams,
    /// 省略時は最初の日
    #[serde(default)]
    date: Option<NaiveDate>,
    #[serde(default)]
    rows: Option<usize>,
    #[serde(flatten)]
    data: DataSource,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct PreviewResponse {
    /// 新しい要求に追い越された場合は true で rows は空
    superseded: bool,
    date: Option<NaiveDate>,
    rows: Vec<PreviewRow>,
}

impl PreviewResponse {
    fn superseded() -> Self {
        Self {
            superseded: true,
            date: None,
            rows: Vec::new(),
        }
    }
}

/// 編集のたびに呼ばれる。待機中に次の要求が来たら評価しない。
async fn run_preview(
    State(state): State<Arc<AppState>>,
    Json(body): Json<PreviewBody>,
) -> Result<Json<PreviewResponse>, ApiError> {
    let log = DEFAULT.new(o!("function" => "run_preview"));
    let ticket = state.debouncer.issue();
    if !state.preview_debounce.is_zero() {
        tokio::time::sleep(state.preview_debounce).await;
    }
    if !state.debouncer.is_latest(ticket) {
        debug!(log, "preview superseded before evaluation");
        return Ok(Json(PreviewResponse::superseded()));
    }

    body.params.validate().map_err(scoring::Error::from)?;
    let points = body.data.load(state.offset)?;
    let days = dataset::group_by_day(&points, state.offset);
    let day = match body.date {
        Some(date) => days.get_key_value(&date),
        None => days.iter().next(),
    };
    let Some((date, day_points)) = day else {
        return Err(scoring::Error::DataRangeEmpty {
            start: body.date,
            end: body.date,
        }
        .into());
    };

    let rows = preview::run_preview(
        state.sandbox,
        &body.code,
        day_points,
        &body.params,
        body.rows.unwrap_or(state.preview_rows),
    );
    let response = PreviewResponse {
        superseded: false,
        date: Some(*date),
        rows,
    };
    Ok(Json(
        state
            .debouncer
            .accept(ticket, response)
            .unwrap_or_else(PreviewResponse::superseded),
    ))
}

#[derive(Debug, Deserialize)]
struct CalculateBody {
    #[serde(flatten)]
    request: CalculationRequest,
    #[serde(flatten)]
    data: DataSource,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
struct CalculateResponse {
    results: Vec<DailyResult>,
    mean_accuracy: Option<f64>,
}

async fn calculate(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CalculateBody>,
) -> Result<Json<CalculateResponse>, ApiError> {
    let log = DEFAULT.new(o!(
        "function" => "calculate",
        "region" => body.request.region.as_str(),
    ));
    let points = body.data.load(state.offset)?;

    let _running = state.calculation.lock().await;
    info!(log, "calculation started"; "samples" => points.len());
    let results = scoring::calculate(
        state.sandbox,
        &state.assembler,
        &body.request,
        &points,
        state.offset,
        &state.status,
    )
    .await?;

    let mean_accuracy = if results.is_empty() {
        None
    } else {
        Some(results.iter().map(|r| r.accuracy).sum::<f64>() / results.len() as f64)
    };
    Ok(Json(CalculateResponse {
        results,
        mean_accuracy,
    }))
}

async fn status(State(state): State<Arc<AppState>>) -> Json<CalculationState> {
    Json(state.status.borrow().clone())
}

#[cfg(test)]
mod tests;
