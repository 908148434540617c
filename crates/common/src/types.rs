use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("Unknown region: {0}")]
    UnknownRegion(String),
    #[error("Unknown aggregation method: {0}")]
    UnknownAggregation(String),
    #[error("Unknown dead-band policy: {0}")]
    UnknownDeadBandPolicy(String),
    #[error("Invalid calculation parameter: {0}")]
    InvalidParams(String),
}

// ==================== サンプルデータ ====================

/// 1 タイムスタンプ分の実績・予測サンプル
///
/// 取り込み処理で一度作られた後は変更しない。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPoint {
    /// 表示用の時刻ラベル
    pub time: String,
    /// epoch ミリ秒
    pub timestamp: i64,
    pub real: f64,
    /// 予測値の平均
    pub forecast: f64,
    /// 個別の予測値（予測列の順序を保持）
    #[serde(default)]
    pub forecasts: Vec<f64>,
}

impl DataPoint {
    /// 予測列の値から構築する。`forecast` は平均値になる。
    ///
    /// 予測値が 1 つも無い場合は None。
    pub fn from_forecasts(
        time: impl Into<String>,
        timestamp: i64,
        real: f64,
        forecasts: Vec<f64>,
    ) -> Option<Self> {
        if forecasts.is_empty() {
            return None;
        }
        let forecast = forecasts.iter().sum::<f64>() / forecasts.len() as f64;
        Some(Self {
            time: time.into(),
            timestamp,
            real,
            forecast,
            forecasts,
        })
    }

    /// 単一予測値のサンプル
    pub fn single(time: impl Into<String>, timestamp: i64, real: f64, forecast: f64) -> Self {
        Self {
            time: time.into(),
            timestamp,
            real,
            forecast,
            forecasts: Vec::new(),
        }
    }

    /// 行式に渡す `fore_list`。個別予測が無ければ `[forecast]`。
    pub fn fore_list(&self) -> &[f64] {
        if self.forecasts.is_empty() {
            std::slice::from_ref(&self.forecast)
        } else {
            &self.forecasts
        }
    }

    /// 指定オフセットでのローカル日付
    pub fn local_date(&self, offset: FixedOffset) -> Option<NaiveDate> {
        DateTime::from_timestamp_millis(self.timestamp)
            .map(|utc| utc.with_timezone(&offset).date_naive())
    }
}

// ==================== 地域・集計方式 ====================

/// 電網地域の識別子
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionId {
    Shanxi,
    Northeast,
    Northwest,
    NorthChina,
    EastChina,
    General,
}

impl RegionId {
    pub const ALL: [RegionId; 6] = [
        RegionId::Shanxi,
        RegionId::Northeast,
        RegionId::Northwest,
        RegionId::NorthChina,
        RegionId::EastChina,
        RegionId::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RegionId::Shanxi => "shanxi",
            RegionId::Northeast => "northeast",
            RegionId::Northwest => "northwest",
            RegionId::NorthChina => "north_china",
            RegionId::EastChina => "east_china",
            RegionId::General => "general",
        }
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for RegionId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = s.trim().to_ascii_lowercase().replace('-', "_");
        match key.as_str() {
            "shanxi" | "山西" => Ok(RegionId::Shanxi),
            "northeast" | "东北" => Ok(RegionId::Northeast),
            "northwest" | "西北" => Ok(RegionId::Northwest),
            "north_china" | "northchina" | "华北" => Ok(RegionId::NorthChina),
            "east_china" | "eastchina" | "华东" => Ok(RegionId::EastChina),
            "general" | "default" | "通用" => Ok(RegionId::General),
            _ => Err(Error::UnknownRegion(s.to_string())),
        }
    }
}

/// 日次集計の方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationMethod {
    Mean,
    Sum,
    Rmse,
    /// 自動生成できない。集計ロジックは呼び出し側が用意する。
    Custom,
}

impl AggregationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationMethod::Mean => "mean",
            AggregationMethod::Sum => "sum",
            AggregationMethod::Rmse => "rmse",
            AggregationMethod::Custom => "custom",
        }
    }
}

impl fmt::Display for AggregationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AggregationMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mean" => Ok(AggregationMethod::Mean),
            "sum" => Ok(AggregationMethod::Sum),
            "rmse" => Ok(AggregationMethod::Rmse),
            "custom" => Ok(AggregationMethod::Custom),
            _ => Err(Error::UnknownAggregation(s.to_string())),
        }
    }
}

/// 不感帯で免除されたサンプルを集計の分母に含めるかどうか
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeadBandPolicy {
    /// 免除サンプルも誤差 0 として分母に残す
    #[default]
    Retain,
    /// 免除サンプルを集計から外す
    Exclude,
}

impl FromStr for DeadBandPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "retain" => Ok(DeadBandPolicy::Retain),
            "exclude" => Ok(DeadBandPolicy::Exclude),
            _ => Err(Error::UnknownDeadBandPolicy(s.to_string())),
        }
    }
}

// ==================== 計算パラメータ・結果 ====================

/// 計算 1 回分のパラメータ
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculationParams {
    /// 設備容量（real/fore と同じ単位）
    pub cap: f64,
    /// 不感帯の容量比 [0, 1]
    pub threshold: f64,
    #[serde(default)]
    pub ignore_dead_band: bool,
}

impl CalculationParams {
    pub fn validate(&self) -> Result<(), Error> {
        if !self.cap.is_finite() || self.cap <= 0.0 {
            return Err(Error::InvalidParams(format!(
                "cap must be positive: {}",
                self.cap
            )));
        }
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(Error::InvalidParams(format!(
                "threshold must be within [0, 1]: {}",
                self.threshold
            )));
        }
        Ok(())
    }

    /// 行式に渡す threshold。不感帯を無視する場合は 0。
    pub fn effective_threshold(&self) -> f64 {
        if self.ignore_dead_band {
            0.0
        } else {
            self.threshold
        }
    }

    /// 不感帯の境界値（cap × threshold）
    pub fn dead_band_limit(&self) -> f64 {
        self.cap * self.effective_threshold()
    }
}

/// 1 日分の評価結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyResult {
    pub date: NaiveDate,
    pub accuracy: f64,
    pub mae: f64,
    pub rmse: f64,
    pub avg_real: f64,
    pub avg_fore: f64,
    pub samples: usize,
}

#[cfg(test)]
mod tests;
