//! 日次集計
//!
//! 行ごとの `result` 列から 1 日分の accuracy を求める純関数群。
//! どの関数も NaN や無限大を返さないよう、分母 0 は既定値で扱う。

/// 分母が 0 または有限でなければ 0
pub fn safe_ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 || !denominator.is_finite() {
        0.0
    } else {
        numerator / denominator
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// `1 - mean(results)`。空なら 1。
pub fn mean_accuracy(results: &[f64]) -> f64 {
    match mean(results) {
        Some(m) => 1.0 - m,
        None => 1.0,
    }
}

/// `1 - sqrt(mean(results)) / cap`。空なら 1。
pub fn rmse_accuracy(results: &[f64], cap: f64) -> f64 {
    match mean(results) {
        Some(m) => 1.0 - safe_ratio(m.sqrt(), cap),
        None => 1.0,
    }
}

/// 誤差の絶対値で重み付けした RMSE
///
/// `total_weight = Σ|real - fore|` が 0 のとき（空を含む）は 1。
pub fn weighted_rmse_accuracy(results: &[f64], real: &[f64], fore: &[f64], cap: f64) -> f64 {
    let total_weight: f64 = real.iter().zip(fore).map(|(r, f)| (r - f).abs()).sum();
    if total_weight == 0.0 {
        return 1.0;
    }
    let weighted = safe_ratio(results.iter().sum(), total_weight);
    1.0 - safe_ratio(weighted.sqrt(), cap)
}

/// 合計方式は未定義のため常に 0
pub fn sum_stub(_results: &[f64]) -> f64 {
    0.0
}

/// 下限 0 に丸める。`clamp_upper` なら上限 1 も適用する。
///
/// NaN と ±∞ は行式が数値として意味を持たない結果を返したものとみなし、
/// `clamp_upper` に関係なく 0 にする。
pub fn finalize(raw: f64, clamp_upper: bool) -> f64 {
    if !raw.is_finite() {
        return 0.0;
    }
    let floored = raw.max(0.0);
    if clamp_upper { floored.min(1.0) } else { floored }
}

#[cfg(test)]
mod tests;
