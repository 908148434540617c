//! サンプルの日別グルーピングと日次統計

use chrono::{FixedOffset, NaiveDate, Offset, Utc};
use common::config;
use common::types::DataPoint;
use logging::*;
use std::collections::BTreeMap;

pub const DEFAULT_UTC_OFFSET_HOURS: i32 = 8;

/// 日付の区切りに使うオフセット。範囲外の設定値はデフォルトに戻す。
pub fn utc_offset_from_config() -> FixedOffset {
    let mut hours = config::get_or("SCORING_UTC_OFFSET_HOURS", DEFAULT_UTC_OFFSET_HOURS);
    if !(-23..=23).contains(&hours) {
        let log = DEFAULT.new(o!("function" => "utc_offset_from_config"));
        warn!(log, "utc offset out of range, using default"; "hours" => hours);
        hours = DEFAULT_UTC_OFFSET_HOURS;
    }
    FixedOffset::east_opt(hours * 3600).unwrap_or_else(|| Utc.fix())
}

/// ローカル日付ごとにまとめる。日付内はタイムスタンプ順。
///
/// 日付に変換できないタイムスタンプのサンプルは捨てる。
pub fn group_by_day(points: &[DataPoint], offset: FixedOffset) -> BTreeMap<NaiveDate, Vec<DataPoint>> {
    let mut days: BTreeMap<NaiveDate, Vec<DataPoint>> = BTreeMap::new();
    let mut dropped = 0usize;
    for point in points {
        match point.local_date(offset) {
            Some(date) => days.entry(date).or_default().push(point.clone()),
            None => dropped += 1,
        }
    }
    for day in days.values_mut() {
        day.sort_by_key(|p| p.timestamp);
    }
    if dropped > 0 {
        let log = DEFAULT.new(o!("function" => "group_by_day"));
        warn!(log, "samples with invalid timestamps dropped"; "count" => dropped);
    }
    days
}

/// 両端を含む日付範囲で絞り込む
pub fn filter_range(
    days: BTreeMap<NaiveDate, Vec<DataPoint>>,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> BTreeMap<NaiveDate, Vec<DataPoint>> {
    days.into_iter()
        .filter(|(date, _)| start.is_none_or(|s| *date >= s) && end.is_none_or(|e| *date <= e))
        .collect()
}

/// 集計式とは独立に計算する日次の誤差指標
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DayStatistics {
    pub mae: f64,
    pub rmse: f64,
    pub avg_real: f64,
    pub avg_fore: f64,
}

impl DayStatistics {
    pub fn from_points(points: &[DataPoint]) -> Self {
        if points.is_empty() {
            return Self::default();
        }
        let n = points.len() as f64;
        let abs_sum: f64 = points.iter().map(|p| (p.real - p.forecast).abs()).sum();
        let sq_sum: f64 = points.iter().map(|p| (p.real - p.forecast).powi(2)).sum();
        Self {
            mae: abs_sum / n,
            rmse: (sq_sum / n).sqrt(),
            avg_real: points.iter().map(|p| p.real).sum::<f64>() / n,
            avg_fore: points.iter().map(|p| p.forecast).sum::<f64>() / n,
        }
    }
}
