use super::{ApiError, AppState};
use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};
use common::types::{AggregationMethod, RegionId};
use logging::*;
use std::result::Result;
use persistence::formula_store::StoredFormula;
use scoring::RegionProfile;
use scoring::region;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub fn add_route(app: Router<Arc<AppState>>) -> Router<Arc<AppState>> {
    app.route("/api/regions", get(list_regions)).route(
        "/api/formulas/{region}",
        get(get_formula).put(save_formula).delete(reset_formula),
    )
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RegionView {
    #[serde(flatten)]
    profile: &'static RegionProfile,
    saved: Option<StoredFormula>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
struct FormulaView {
    region: RegionId,
    row_logic: String,
    agg_method: AggregationMethod,
    timestamp: Option<i64>,
    is_default: bool,
}

impl FormulaView {
    fn new(region: RegionId, saved: Option<&StoredFormula>) -> Self {
        match saved {
            Some(saved) => Self {
                region,
                row_logic: saved.row_logic.clone(),
                agg_method: saved.agg_method,
                timestamp: Some(saved.timestamp),
                is_default: false,
            },
            None => {
                let profile = region::profile(region);
                Self {
                    region,
                    row_logic: profile.default_row_formula.to_string(),
                    agg_method: profile.default_aggregation,
                    timestamp: None,
                    is_default: true,
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SaveFormula {
    row_logic: String,
    agg_method: AggregationMethod,
}

fn parse_region(name: &str) -> Result<RegionId, ApiError> {
    name.parse()
        .map_err(|e: common::types::Error| ApiError::not_found(e.to_string()))
}

async fn list_regions(State(state): State<Arc<AppState>>) -> Json<Vec<RegionView>> {
    let store = state.store.lock().await;
    Json(
        region::profiles()
            .iter()
            .map(|profile| RegionView {
                profile,
                saved: store.get(profile.id).cloned(),
            })
            .collect(),
    )
}

async fn get_formula(
    State(state): State<Arc<AppState>>,
    Path(region): Path<String>,
) -> Result<Json<FormulaView>, ApiError> {
    let region = parse_region(&region)?;
    let store = state.store.lock().await;
    Ok(Json(FormulaView::new(region, store.get(region))))
}

/// 組み立てられない行式は保存しない
async fn save_formula(
    State(state): State<Arc<AppState>>,
    Path(region): Path<String>,
    Json(body): Json<SaveFormula>,
) -> Result<Json<FormulaView>, ApiError> {
    let region = parse_region(&region)?;
    let log = DEFAULT.new(o!("function" => "save_formula", "region" => region.as_str()));

    state
        .assembler
        .assemble(&body.row_logic, body.agg_method, region, None)
        .map_err(|e| {
            info!(log, "rejected formula"; "error" => %e);
            ApiError::from(e)
        })?;

    let mut store = state.store.lock().await;
    let saved = store.save(region, body.row_logic, body.agg_method).await?;
    Ok(Json(FormulaView::new(region, Some(&saved))))
}

/// 保存内容を消し、既定の行式を返す
async fn reset_formula(
    State(state): State<Arc<AppState>>,
    Path(region): Path<String>,
) -> Result<Json<FormulaView>, ApiError> {
    let region = parse_region(&region)?;
    let mut store = state.store.lock().await;
    store.remove(region).await?;
    Ok(Json(FormulaView::new(region, None)))
}
