pub mod calculate;
pub mod normalize;
pub mod preview;
pub mod regions;
pub mod serve;

use anyhow::{Context, Result};
use common::types::{AggregationMethod, RegionId};
use persistence::formula_store::FormulaStore;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;

/// 使う行式と集計方式。None は地域の既定値。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormulaChoice {
    pub row_formula: Option<String>,
    pub aggregation: Option<AggregationMethod>,
}

/// ファイル指定 > 保存済み > 地域の既定 の順で行式を選ぶ
pub async fn choose_formula(
    store: &FormulaStore,
    region: RegionId,
    formula: Option<&PathBuf>,
) -> Result<FormulaChoice> {
    if let Some(path) = formula {
        return Ok(FormulaChoice {
            row_formula: Some(read_text(path).await?),
            aggregation: None,
        });
    }
    Ok(match store.get(region) {
        Some(saved) => FormulaChoice {
            row_formula: Some(saved.row_logic.clone()),
            aggregation: Some(saved.agg_method),
        },
        None => FormulaChoice::default(),
    })
}

pub async fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))
}

/// JSON を整形して出力する。`output` が無ければ標準出力。
pub async fn write_json<T: Serialize>(value: &T, output: Option<&Path>) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => println!("{}", json),
    }
    Ok(())
}
