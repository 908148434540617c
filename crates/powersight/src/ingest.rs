//! CSV からサンプルを読み込む
//!
//! 列名から時刻・実績・予測の列を推定する。明示指定があればそちらを使う。

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone};
use clap::Args;
use common::types::DataPoint;
use csv::StringRecord;
use encoding_rs::GBK;
use logging::*;
use serde::Deserialize;
use std::io::Read;
use std::path::Path;

const TIME_NAMES: [&str; 5] = ["time", "timestamp", "datetime", "date", "时间"];
const REAL_PREFIXES: [&str; 2] = ["real", "actual"];
const FORECAST_PREFIXES: [&str; 3] = ["fore", "forecast", "pred"];

const DATETIME_FORMATS: [&str; 6] = [
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M",
];

/// 列名の明示指定
#[derive(Debug, Clone, Default, PartialEq, Args, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnOverrides {
    /// 時刻列の名前
    #[arg(long = "time-column")]
    #[serde(default)]
    pub time: Option<String>,

    /// 実績列の名前
    #[arg(long = "real-column")]
    #[serde(default)]
    pub real: Option<String>,

    /// 予測列の名前（複数指定可）
    #[arg(long = "forecast-column")]
    #[serde(default)]
    pub forecasts: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnLayout {
    pub time: usize,
    pub real: usize,
    pub forecasts: Vec<usize>,
}

#[derive(Debug)]
pub struct Ingested {
    pub points: Vec<DataPoint>,
    pub layout: ColumnLayout,
    /// 数値・時刻が読めずに捨てた行数
    pub skipped: usize,
}

fn normalize_header(name: &str) -> String {
    name.trim().trim_start_matches('\u{feff}').to_lowercase()
}

fn find_named(headers: &[String], name: &str) -> Result<usize> {
    let wanted = normalize_header(name);
    headers
        .iter()
        .position(|h| *h == wanted)
        .ok_or_else(|| anyhow!("column '{}' not found in {:?}", name, headers))
}

fn is_time(header: &str) -> bool {
    TIME_NAMES.contains(&header) || header.contains("时间")
}

fn is_real(header: &str) -> bool {
    REAL_PREFIXES.iter().any(|p| header.starts_with(p)) || header.contains("实际")
}

fn is_forecast(header: &str) -> bool {
    FORECAST_PREFIXES.iter().any(|p| header.starts_with(p)) || header.contains("预测")
}

/// 列の位置を決める
pub fn detect_columns(headers: &StringRecord, overrides: &ColumnOverrides) -> Result<ColumnLayout> {
    let names: Vec<String> = headers.iter().map(normalize_header).collect();

    let time = match &overrides.time {
        Some(name) => find_named(&names, name)?,
        None => names
            .iter()
            .position(|h| is_time(h))
            .ok_or_else(|| anyhow!("no time column in {:?}", names))?,
    };
    let real = match &overrides.real {
        Some(name) => find_named(&names, name)?,
        None => names
            .iter()
            .enumerate()
            .position(|(i, h)| i != time && is_real(h))
            .ok_or_else(|| anyhow!("no real column in {:?}", names))?,
    };
    let forecasts = if overrides.forecasts.is_empty() {
        names
            .iter()
            .enumerate()
            .filter(|(i, h)| *i != time && *i != real && is_forecast(h))
            .map(|(i, _)| i)
            .collect()
    } else {
        overrides
            .forecasts
            .iter()
            .map(|name| find_named(&names, name))
            .collect::<Result<Vec<_>>>()?
    };
    if forecasts.is_empty() {
        bail!("no forecast column in {:?}", names);
    }

    Ok(ColumnLayout {
        time,
        real,
        forecasts,
    })
}

/// 時刻文字列を epoch ミリ秒にする。タイムゾーンの無い時刻は `offset` の現地時刻。
///
/// 数値だけなら 1e11 以上をミリ秒、それ未満を秒とみなす。
pub fn parse_timestamp(text: &str, offset: FixedOffset) -> Option<i64> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(epoch) = text.parse::<i64>() {
        return Some(if epoch.abs() >= 100_000_000_000 {
            epoch
        } else {
            epoch * 1000
        });
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.timestamp_millis());
    }
    DATETIME_FORMATS.iter().find_map(|format| {
        let naive = NaiveDateTime::parse_from_str(text, format).ok()?;
        offset
            .from_local_datetime(&naive)
            .single()
            .map(|dt| dt.timestamp_millis())
    })
}

fn parse_number(text: &str) -> Option<f64> {
    text.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

pub fn read_points<R: Read>(
    reader: R,
    overrides: &ColumnOverrides,
    offset: FixedOffset,
) -> Result<Ingested> {
    let log = DEFAULT.new(o!("function" => "ingest::read_points"));

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);
    let headers = reader.headers().context("failed to read CSV headers")?.clone();
    let layout = detect_columns(&headers, overrides)?;
    debug!(log, "columns detected";
        "time" => &headers[layout.time],
        "real" => &headers[layout.real],
        "forecasts" => layout.forecasts.len(),
    );

    let mut points = Vec::new();
    let mut skipped = 0usize;
    for record in reader.records() {
        let record = record.context("failed to read CSV record")?;
        let point = record.get(layout.time).and_then(|time| {
            let timestamp = parse_timestamp(time, offset)?;
            let real = parse_number(record.get(layout.real)?)?;
            let forecasts = layout
                .forecasts
                .iter()
                .map(|&i| record.get(i).and_then(parse_number))
                .collect::<Option<Vec<f64>>>()?;
            DataPoint::from_forecasts(time, timestamp, real, forecasts)
        });
        match point {
            Some(point) => points.push(point),
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        warn!(log, "rows skipped"; "skipped" => skipped, "kept" => points.len());
    }
    info!(log, "csv ingested"; "points" => points.len());
    Ok(Ingested {
        points,
        layout,
        skipped,
    })
}

/// UTF-8 で読めなければ GBK として読む。どちらでも読めなければエラー。
pub fn decode_text(bytes: Vec<u8>) -> Result<String> {
    let bytes = match String::from_utf8(bytes) {
        Ok(text) => return Ok(text),
        Err(e) => e.into_bytes(),
    };
    let (text, had_errors) = GBK.decode_without_bom_handling(&bytes);
    if had_errors {
        bail!("unrecognized file encoding (neither UTF-8 nor GBK)");
    }
    Ok(text.into_owned())
}

pub fn load_csv(path: &Path, overrides: &ColumnOverrides, offset: FixedOffset) -> Result<Ingested> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("failed to open CSV '{}'", path.display()))?;
    let text = decode_text(bytes).with_context(|| format!("failed to decode CSV '{}'", path.display()))?;
    read_points(text.as_bytes(), overrides, offset)
}

#[cfg(test)]
mod tests;
