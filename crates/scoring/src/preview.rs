//! 行式のプレビュー
//!
//! 1 日分の先頭数行だけで行式を評価する。行ごとの失敗は他の行に影響しない。

use crate::formula::parse_formula;
use crate::sandbox::{DayBindings, RowOutcome, Sandbox};
use common::config;
use common::types::{CalculationParams, DataPoint};
use logging::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

pub const DEFAULT_PREVIEW_ROWS: usize = 10;

pub fn preview_rows_from_config() -> usize {
    config::get_or("SCORING_PREVIEW_ROWS", DEFAULT_PREVIEW_ROWS)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewRow {
    pub index: usize,
    pub time: String,
    pub real: f64,
    pub fore: f64,
    pub result: RowOutcome,
}

/// 先頭 `rows` 行に行式を適用する
///
/// 構文エラーは全行に同じ失敗として載せる。
pub fn run_preview(
    sandbox: &Sandbox,
    code: &str,
    points: &[DataPoint],
    params: &CalculationParams,
    rows: usize,
) -> Vec<PreviewRow> {
    let log = DEFAULT.new(o!("function" => "run_preview"));
    let sample = &points[..points.len().min(rows)];
    let day = DayBindings::from_points(sample, params);

    let parsed = parse_formula(code);
    let rows: Vec<PreviewRow> = sample
        .iter()
        .enumerate()
        .map(|(i, point)| {
            let result = match &parsed {
                Ok(program) => sandbox.run_row_program(program, &day.row(i)),
                Err(e) => RowOutcome::Failed(format!("Error: {}", e)),
            };
            PreviewRow {
                index: i,
                time: point.time.clone(),
                real: point.real,
                fore: point.forecast,
                result,
            }
        })
        .collect();

    let failed = rows.iter().filter(|r| r.result.is_failed()).count();
    debug!(log, "preview evaluated"; "rows" => rows.len(), "failed" => failed);
    rows
}

/// プレビュー要求の世代番号
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PreviewTicket(u64);

/// 連続した編集のうち最新の要求だけを通す
#[derive(Debug, Default)]
pub struct PreviewDebouncer {
    latest: AtomicU64,
}

impl PreviewDebouncer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self) -> PreviewTicket {
        PreviewTicket(self.latest.fetch_add(1, Ordering::SeqCst) + 1)
    }

    pub fn is_latest(&self, ticket: PreviewTicket) -> bool {
        self.latest.load(Ordering::SeqCst) == ticket.0
    }

    /// 古い要求の結果は捨てる
    pub fn accept<T>(&self, ticket: PreviewTicket, value: T) -> Option<T> {
        if self.is_latest(ticket) {
            Some(value)
        } else {
            let log = DEFAULT.new(o!("function" => "PreviewDebouncer::accept"));
            debug!(log, "superseded preview dropped"; "ticket" => ticket.0);
            None
        }
    }
}

#[cfg(test)]
mod tests;
