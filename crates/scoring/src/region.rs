//! 地域ごとの既定の行式・集計方式
//!
//! 華北・華東・通用は同じ式を共有する。未知の地域は通用として扱う。

use common::types::{AggregationMethod, RegionId};
use logging::*;
use serde::Serialize;

/// Shanxi の重み付き RMSE を有効にする行式中の宣言
pub const WEIGHTED_RMSE_PRAGMA: &str = "weighted_rmse";

const GENERAL_ROW: &str = "\
diff = abs(real - fore)
result = diff ** 2
";

const SHANXI_ROW: &str = "\
#pragma weighted_rmse
diff = real - fore
result = diff ** 2 * abs(diff)
";

const NORTHEAST_ROW: &str = "\
f = mean(fore_list)
if real < threshold * cap and f < threshold * cap:
    result = 0
elif f == 0:
    result = 0
else:
    result = min(abs(f - real) / f, 1)
";

const NORTHWEST_ROW: &str = "\
total = real + fore
if real < threshold * cap and fore < threshold * cap:
    result = 0
elif total == 0:
    result = 0
else:
    result = abs(real / total - 0.5)
";

/// 不感帯外のサンプルを |real - fore| で重み付けする
const NORTHWEST_AGGREGATION: &str = "\
import numpy as np
weights = np.where(dead_band, 0, np.abs(real - fore))
total_weight = np.sum(weights)
if total_weight == 0:
    accuracy = 1
else:
    accuracy = 1 - 2 * np.sum(results * weights) / total_weight
";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionProfile {
    pub id: RegionId,
    pub display_name: &'static str,
    pub default_row_formula: &'static str,
    pub default_aggregation: AggregationMethod,
    pub default_threshold: f64,
    pub custom_aggregation: Option<&'static str>,
}

const fn general(id: RegionId, display_name: &'static str) -> RegionProfile {
    RegionProfile {
        id,
        display_name,
        default_row_formula: GENERAL_ROW,
        default_aggregation: AggregationMethod::Rmse,
        default_threshold: 0.0,
        custom_aggregation: None,
    }
}

static PROFILES: [RegionProfile; 6] = [
    RegionProfile {
        id: RegionId::Shanxi,
        display_name: "山西",
        default_row_formula: SHANXI_ROW,
        default_aggregation: AggregationMethod::Rmse,
        default_threshold: 0.0,
        custom_aggregation: None,
    },
    RegionProfile {
        id: RegionId::Northeast,
        display_name: "东北",
        default_row_formula: NORTHEAST_ROW,
        default_aggregation: AggregationMethod::Mean,
        default_threshold: 0.10,
        custom_aggregation: None,
    },
    RegionProfile {
        id: RegionId::Northwest,
        display_name: "西北",
        default_row_formula: NORTHWEST_ROW,
        default_aggregation: AggregationMethod::Custom,
        default_threshold: 0.10,
        custom_aggregation: Some(NORTHWEST_AGGREGATION),
    },
    general(RegionId::NorthChina, "华北"),
    general(RegionId::EastChina, "华东"),
    general(RegionId::General, "通用"),
];

pub fn profile(id: RegionId) -> &'static RegionProfile {
    match id {
        RegionId::Shanxi => &PROFILES[0],
        RegionId::Northeast => &PROFILES[1],
        RegionId::Northwest => &PROFILES[2],
        RegionId::NorthChina => &PROFILES[3],
        RegionId::EastChina => &PROFILES[4],
        RegionId::General => &PROFILES[5],
    }
}

/// 文字列の地域名を解決する。未知なら通用。
pub fn resolve(name: &str) -> &'static RegionProfile {
    match name.parse::<RegionId>() {
        Ok(id) => profile(id),
        Err(e) => {
            let log = DEFAULT.new(o!("function" => "region::resolve"));
            warn!(log, "falling back to general profile";
                "region" => name,
                "reason" => %e,
            );
            profile(RegionId::General)
        }
    }
}

pub fn profiles() -> &'static [RegionProfile] {
    &PROFILES
}
