use super::write_json;
use anyhow::Result;
use persistence::formula_store::{FormulaStore, StoredFormula};
use scoring::{RegionProfile, region};
use serde::Serialize;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionEntry {
    #[serde(flatten)]
    pub profile: &'static RegionProfile,
    pub saved: Option<StoredFormula>,
}

pub fn entries(store: &FormulaStore) -> Vec<RegionEntry> {
    region::profiles()
        .iter()
        .map(|profile| RegionEntry {
            profile,
            saved: store.get(profile.id).cloned(),
        })
        .collect()
}

pub async fn run() -> Result<()> {
    let store = FormulaStore::from_config().await?;
    write_json(&entries(&store), None).await
}
