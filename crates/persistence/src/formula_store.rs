//! 地域ごとに最後に編集した行式を JSON ファイルに保存する
//!
//! ファイルは地域 ID をキーにしたオブジェクト:
//! `{ "shanxi": { "rowLogic": "...", "aggMethod": "rmse", "timestamp": 1700000000000 } }`

use crate::Result;
use anyhow::Context;
use chrono::Utc;
use common::config;
use common::types::{AggregationMethod, RegionId};
use logging::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;

pub const DEFAULT_STORE_PATH: &str = "data/formulas.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFormula {
    pub row_logic: String,
    pub agg_method: AggregationMethod,
    /// epoch ミリ秒
    pub timestamp: i64,
}

#[derive(Debug)]
pub struct FormulaStore {
    path: PathBuf,
    entries: BTreeMap<RegionId, StoredFormula>,
}

impl FormulaStore {
    /// ファイルを読み込む。存在しなければ空で始める。
    ///
    /// 未知の地域キーは読み飛ばす。
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let log = DEFAULT.new(o!(
            "function" => "FormulaStore::open",
            "path" => path.display().to_string(),
        ));

        if !fs::try_exists(&path).await? {
            debug!(log, "store file not found, starting empty");
            return Ok(Self {
                path,
                entries: BTreeMap::new(),
            });
        }

        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        let raw: BTreeMap<String, StoredFormula> = if content.trim().is_empty() {
            BTreeMap::new()
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("failed to parse {}", path.display()))?
        };

        let mut entries = BTreeMap::new();
        for (key, formula) in raw {
            match key.parse::<RegionId>() {
                Ok(region) => {
                    entries.insert(region, formula);
                }
                Err(e) => warn!(log, "skipping unknown region"; "key" => &key, "error" => %e),
            }
        }
        info!(log, "formula store loaded"; "entries" => entries.len());
        Ok(Self { path, entries })
    }

    pub async fn from_config() -> Result<Self> {
        let path = config::get("FORMULA_STORE_PATH").unwrap_or_else(|_| DEFAULT_STORE_PATH.to_string());
        Self::open(path).await
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, region: RegionId) -> Option<&StoredFormula> {
        self.entries.get(&region)
    }

    pub fn list(&self) -> &BTreeMap<RegionId, StoredFormula> {
        &self.entries
    }

    /// 上書き保存してファイルに書き出す
    pub async fn save(
        &mut self,
        region: RegionId,
        row_logic: impl Into<String>,
        agg_method: AggregationMethod,
    ) -> Result<StoredFormula> {
        let formula = StoredFormula {
            row_logic: row_logic.into(),
            agg_method,
            timestamp: Utc::now().timestamp_millis(),
        };
        self.entries.insert(region, formula.clone());
        self.persist().await?;

        let log = DEFAULT.new(o!("function" => "FormulaStore::save"));
        info!(log, "formula saved"; "region" => region.as_str(), "method" => agg_method.as_str());
        Ok(formula)
    }

    /// 保存内容を消して既定値に戻す
    pub async fn remove(&mut self, region: RegionId) -> Result<Option<StoredFormula>> {
        let removed = self.entries.remove(&region);
        if removed.is_some() {
            self.persist().await?;
            let log = DEFAULT.new(o!("function" => "FormulaStore::remove"));
            info!(log, "formula reset"; "region" => region.as_str());
        }
        Ok(removed)
    }

    /// 一時ファイルに書いてから置き換える
    async fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }

        let keyed: BTreeMap<&str, &StoredFormula> = self
            .entries
            .iter()
            .map(|(region, formula)| (region.as_str(), formula))
            .collect();
        let json = serde_json::to_string_pretty(&keyed)?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        fs::write(&tmp, json)
            .await
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .await
            .with_context(|| format!("failed to replace {}", self.path.display()))?;
        Ok(())
    }
}
