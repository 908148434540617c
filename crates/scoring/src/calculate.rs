//! 日次精度の一括計算
//!
//! 日付の昇順に 1 日ずつ評価する。並列化はしない。

use crate::assemble::{AggregationPolicy, Script, ScriptAssembler};
use crate::dataset::{self, DayStatistics};
use crate::error::{Error, Result};
use crate::region;
use crate::sandbox::{DayBindings, Sandbox};
use chrono::{FixedOffset, NaiveDate};
use common::types::{AggregationMethod, CalculationParams, DailyResult, DataPoint, RegionId};
use logging::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::watch;

/// 計算の進行状況
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum CalculationState {
    Idle,
    Calculating { days: usize },
    Done { days: usize },
    Failed { message: String },
}

/// 計算 1 回分の要求。省略した項目は地域の既定値を使う。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculationRequest {
    pub region: RegionId,
    #[serde(default)]
    pub row_formula: Option<String>,
    #[serde(default)]
    pub aggregation: Option<AggregationMethod>,
    #[serde(default)]
    pub custom_aggregation: Option<String>,
    pub params: CalculationParams,
    #[serde(default)]
    pub start: Option<NaiveDate>,
    #[serde(default)]
    pub end: Option<NaiveDate>,
    /// None なら設定値
    #[serde(default)]
    pub policy: Option<AggregationPolicy>,
}

impl CalculationRequest {
    /// 地域の既定の行式・集計方式・閾値で要求を作る
    pub fn for_region(region: RegionId, cap: f64) -> Self {
        let profile = region::profile(region);
        Self {
            region,
            row_formula: None,
            aggregation: None,
            custom_aggregation: None,
            params: CalculationParams {
                cap,
                threshold: profile.default_threshold,
                ignore_dead_band: false,
            },
            start: None,
            end: None,
            policy: None,
        }
    }

    pub fn row_formula(&self) -> &str {
        self.row_formula
            .as_deref()
            .unwrap_or(region::profile(self.region).default_row_formula)
    }

    pub fn aggregation(&self) -> AggregationMethod {
        self.aggregation
            .unwrap_or(region::profile(self.region).default_aggregation)
    }
}

/// 検証・日別分割・組み立て。サンドボックスはまだ呼ばない。
fn prepare(
    assembler: &ScriptAssembler,
    request: &CalculationRequest,
    points: &[DataPoint],
    offset: FixedOffset,
) -> Result<(Script, BTreeMap<NaiveDate, Vec<DataPoint>>)> {
    request.params.validate()?;

    let days = dataset::filter_range(
        dataset::group_by_day(points, offset),
        request.start,
        request.end,
    );
    if days.is_empty() {
        return Err(Error::DataRangeEmpty {
            start: request.start,
            end: request.end,
        });
    }

    let assembler = match request.policy {
        Some(policy) => assembler.clone().with_policy(policy),
        None => assembler.clone(),
    };
    let script = assembler.assemble(
        request.row_formula(),
        request.aggregation(),
        request.region,
        request.custom_aggregation.as_deref(),
    )?;
    Ok((script, days))
}

fn evaluate_day(
    sandbox: &Sandbox,
    script: &Script,
    params: &CalculationParams,
    date: NaiveDate,
    points: &[DataPoint],
) -> Result<DailyResult> {
    let bindings = DayBindings::from_points(points, params);
    let accuracy = sandbox
        .run_batch(script, &bindings)
        .map_err(|e| e.at(date))?;
    let stats = DayStatistics::from_points(points);
    Ok(DailyResult {
        date,
        accuracy,
        mae: stats.mae,
        rmse: stats.rmse,
        avg_real: stats.avg_real,
        avg_fore: stats.avg_fore,
        samples: points.len(),
    })
}

/// 同期版。最初に失敗した日で中断する。
pub fn calculate_days(
    sandbox: &Sandbox,
    assembler: &ScriptAssembler,
    request: &CalculationRequest,
    points: &[DataPoint],
    offset: FixedOffset,
) -> Result<Vec<DailyResult>> {
    let (script, days) = prepare(assembler, request, points, offset)?;
    days.iter()
        .map(|(date, points)| evaluate_day(sandbox, &script, &request.params, *date, points))
        .collect()
}

/// 進行状況を `status` に流しながら計算する。
///
/// 日ごとの評価は同期処理なので blocking スレッドで走らせる。
pub async fn calculate(
    sandbox: &'static Sandbox,
    assembler: &ScriptAssembler,
    request: &CalculationRequest,
    points: &[DataPoint],
    offset: FixedOffset,
    status: &watch::Sender<CalculationState>,
) -> Result<Vec<DailyResult>> {
    let log = DEFAULT.new(o!(
        "function" => "calculate",
        "region" => request.region.as_str(),
        "samples" => points.len(),
    ));

    let outcome = run(sandbox, assembler, request, points, offset, status, &log).await;
    match &outcome {
        Ok(results) => {
            info!(log, "calculation finished"; "days" => results.len());
            status.send_replace(CalculationState::Done {
                days: results.len(),
            });
        }
        Err(e) => {
            error!(log, "calculation failed"; "error" => %e);
            status.send_replace(CalculationState::Failed {
                message: e.to_string(),
            });
        }
    }
    outcome
}

async fn run(
    sandbox: &'static Sandbox,
    assembler: &ScriptAssembler,
    request: &CalculationRequest,
    points: &[DataPoint],
    offset: FixedOffset,
    status: &watch::Sender<CalculationState>,
    log: &Logger,
) -> Result<Vec<DailyResult>> {
    let (script, days) = prepare(assembler, request, points, offset)?;

    status.send_replace(CalculationState::Calculating { days: days.len() });
    // 状態の変化を購読側に見せてから重い処理に入る
    tokio::task::yield_now().await;

    let params = request.params;
    let log = log.clone();
    tokio::task::spawn_blocking(move || -> Result<Vec<DailyResult>> {
        let mut results = Vec::with_capacity(days.len());
        for (date, day_points) in &days {
            let result = evaluate_day(sandbox, &script, &params, *date, day_points)?;
            debug!(log, "day evaluated";
                "date" => %date,
                "accuracy" => result.accuracy,
                "samples" => result.samples,
            );
            results.push(result);
        }
        Ok(results)
    })
    .await
    .map_err(|e| Error::Internal(format!("calculation task aborted: {}", e)))?
}

#[cfg(test)]
mod tests;
