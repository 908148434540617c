use super::{choose_formula, read_text, write_json};
use crate::ingest::{self, ColumnOverrides};
use anyhow::Result;
use chrono::NaiveDate;
use clap::Args;
use common::types::{AggregationMethod, CalculationParams, DailyResult, DeadBandPolicy, RegionId};
use logging::*;
use persistence::formula_store::FormulaStore;
use scoring::{
    AggregationPolicy, CalculationRequest, Sandbox, ScriptAssembler, calculate_days, dataset,
    region,
};
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Args)]
pub struct CalculateArgs {
    /// 入力 CSV ファイル
    pub file: PathBuf,

    /// 地域（未知の地域は通用として扱う）
    #[arg(short, long, default_value = "general")]
    pub region: String,

    /// 設備容量
    #[arg(long)]
    pub cap: f64,

    /// 不感帯の容量比。省略時は地域の既定値
    #[arg(long)]
    pub threshold: Option<f64>,

    #[arg(long)]
    pub ignore_dead_band: bool,

    /// 行式ファイル。省略時は保存済みの行式、無ければ地域の既定
    #[arg(long)]
    pub formula: Option<PathBuf>,

    #[arg(long)]
    pub aggregation: Option<AggregationMethod>,

    /// custom 集計のコードファイル
    #[arg(long)]
    pub custom_aggregation: Option<PathBuf>,

    #[arg(long)]
    pub start: Option<NaiveDate>,

    #[arg(long)]
    pub end: Option<NaiveDate>,

    /// 不感帯の扱い（retain / exclude）
    #[arg(long)]
    pub dead_band: Option<DeadBandPolicy>,

    /// accuracy の上限を 1 にする
    #[arg(long)]
    pub clamp_upper: bool,

    #[command(flatten)]
    pub columns: ColumnOverrides,

    /// 出力ファイル。省略時は標準出力
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalculationReport {
    pub region: RegionId,
    pub file: String,
    pub samples: usize,
    pub skipped: usize,
    pub days: Vec<DailyResult>,
    pub mean_accuracy: Option<f64>,
}

impl CalculateArgs {
    fn policy(&self) -> Option<AggregationPolicy> {
        if self.dead_band.is_none() && !self.clamp_upper {
            return None;
        }
        let configured = AggregationPolicy::from_config();
        Some(AggregationPolicy {
            dead_band: self.dead_band.unwrap_or(configured.dead_band),
            clamp_upper: self.clamp_upper || configured.clamp_upper,
        })
    }
}

pub async fn execute(
    args: &CalculateArgs,
    sandbox: &Sandbox,
    store: &FormulaStore,
) -> Result<CalculationReport> {
    let profile = region::resolve(&args.region);
    let log = DEFAULT.new(o!(
        "function" => "commands::calculate",
        "region" => profile.id.as_str(),
        "file" => args.file.display().to_string(),
    ));

    let offset = dataset::utc_offset_from_config();
    let ingested = ingest::load_csv(&args.file, &args.columns, offset)?;
    let choice = choose_formula(store, profile.id, args.formula.as_ref()).await?;
    let custom_aggregation = match &args.custom_aggregation {
        Some(path) => Some(read_text(path).await?),
        None => None,
    };

    let request = CalculationRequest {
        region: profile.id,
        row_formula: choice.row_formula,
        aggregation: args.aggregation.or(choice.aggregation),
        custom_aggregation,
        params: CalculationParams {
            cap: args.cap,
            threshold: args.threshold.unwrap_or(profile.default_threshold),
            ignore_dead_band: args.ignore_dead_band,
        },
        start: args.start,
        end: args.end,
        policy: args.policy(),
    };
    let assembler = ScriptAssembler::new(sandbox.alias(), AggregationPolicy::from_config());
    let days = calculate_days(sandbox, &assembler, &request, &ingested.points, offset)?;

    let mean_accuracy = if days.is_empty() {
        None
    } else {
        Some(days.iter().map(|d| d.accuracy).sum::<f64>() / days.len() as f64)
    };
    info!(log, "calculation finished";
        "days" => days.len(),
        "mean_accuracy" => ?mean_accuracy,
    );
    Ok(CalculationReport {
        region: profile.id,
        file: args.file.display().to_string(),
        samples: ingested.points.len(),
        skipped: ingested.skipped,
        days,
        mean_accuracy,
    })
}

pub async fn run(args: CalculateArgs) -> Result<()> {
    let sandbox = Sandbox::initialize()?;
    let store = FormulaStore::from_config().await?;
    let report = execute(&args, sandbox, &store).await?;
    write_json(&report, args.output.as_deref()).await
}
