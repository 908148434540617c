use super::{choose_formula, write_json};
use crate::ingest::{self, ColumnOverrides};
use anyhow::{Result, anyhow};
use chrono::NaiveDate;
use clap::Args;
use common::types::CalculationParams;
use logging::*;
use persistence::formula_store::FormulaStore;
use scoring::{PreviewRow, Sandbox, dataset, preview, region};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Args)]
pub struct PreviewArgs {
    /// 入力 CSV ファイル
    pub file: PathBuf,

    #[arg(short, long, default_value = "general")]
    pub region: String,

    #[arg(long)]
    pub cap: f64,

    #[arg(long)]
    pub threshold: Option<f64>,

    #[arg(long)]
    pub ignore_dead_band: bool,

    /// 行式ファイル。省略時は保存済みの行式、無ければ地域の既定
    #[arg(long)]
    pub formula: Option<PathBuf>,

    /// 対象日。省略時は最初の日
    #[arg(long)]
    pub date: Option<NaiveDate>,

    /// 評価する行数。省略時は SCORING_PREVIEW_ROWS
    #[arg(long)]
    pub rows: Option<usize>,

    #[command(flatten)]
    pub columns: ColumnOverrides,

    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewReport {
    pub date: NaiveDate,
    pub failed: usize,
    pub rows: Vec<PreviewRow>,
}

pub async fn execute(
    args: &PreviewArgs,
    sandbox: &Sandbox,
    store: &FormulaStore,
) -> Result<PreviewReport> {
    let profile = region::resolve(&args.region);
    let log = DEFAULT.new(o!(
        "function" => "commands::preview",
        "region" => profile.id.as_str(),
    ));

    let params = CalculationParams {
        cap: args.cap,
        threshold: args.threshold.unwrap_or(profile.default_threshold),
        ignore_dead_band: args.ignore_dead_band,
    };
    params.validate()?;

    let offset = dataset::utc_offset_from_config();
    let ingested = ingest::load_csv(&args.file, &args.columns, offset)?;
    let days = dataset::group_by_day(&ingested.points, offset);
    let (date, points) = match args.date {
        Some(date) => days.get_key_value(&date),
        None => days.iter().next(),
    }
    .ok_or_else(|| anyhow!("No samples for the requested day"))?;

    let code = choose_formula(store, profile.id, args.formula.as_ref())
        .await?
        .row_formula
        .unwrap_or_else(|| profile.default_row_formula.to_string());
    let rows = preview::run_preview(
        sandbox,
        &code,
        points,
        &params,
        args.rows.unwrap_or_else(preview::preview_rows_from_config),
    );
    let failed = rows.iter().filter(|row| row.result.is_failed()).count();
    debug!(log, "preview evaluated";
        "date" => %date,
        "rows" => rows.len(),
        "failed" => failed,
    );
    Ok(PreviewReport {
        date: *date,
        failed,
        rows,
    })
}

pub async fn run(args: PreviewArgs) -> Result<()> {
    let sandbox = Sandbox::initialize()?;
    let store = FormulaStore::from_config().await?;
    let report = execute(&args, sandbox, &store).await?;
    write_json(&report, args.output.as_deref()).await
}
