//! 行式・集計式の実行環境
//!
//! `Sandbox` が持つのは関数表・ライブラリ別名・ステップ上限だけで、
//! 評価のたびに新しい [`Scope`] を作って捨てる。呼び出し間で変数は残らない。

use crate::aggregate;
use crate::assemble::{AggregationStep, DEFAULT_LIBRARY_ALIAS, Script};
use crate::error::{Error, Result};
use crate::formula::{Interpreter, Library, Module, Program, Scope, parse_formula};
use common::config;
use common::types::{CalculationParams, DataPoint, DeadBandPolicy};
use logging::*;
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_MAX_STEPS: u64 = 100_000;

/// 別名として使えない名前
const RESERVED: [&str; 23] = [
    "if", "elif", "else", "and", "or", "not", "pass", "import", "as", "def", "return", "True",
    "False", "real", "fore", "fore_list", "cap", "threshold", "result", "results", "dead_band",
    "accuracy", "math",
];

static SANDBOX: OnceCell<Sandbox> = OnceCell::new();

/// 1 行分の入力
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RowBindings<'a> {
    pub real: f64,
    pub fore: f64,
    pub fore_list: &'a [f64],
    pub cap: f64,
    pub threshold: f64,
}

/// 1 日分の入力
#[derive(Debug, Clone, PartialEq, Default)]
pub struct DayBindings {
    real: Vec<f64>,
    fore: Vec<f64>,
    fore_lists: Vec<Vec<f64>>,
    cap: f64,
    /// 不感帯を無視する場合は 0
    threshold: f64,
}

impl DayBindings {
    /// `real`・`fore`・`fore_lists` は同じ長さでなければならない
    pub fn new(
        real: Vec<f64>,
        fore: Vec<f64>,
        fore_lists: Vec<Vec<f64>>,
        cap: f64,
        threshold: f64,
    ) -> Result<Self> {
        if fore.len() != real.len() || fore_lists.len() != real.len() {
            return Err(Error::InvalidParams(format!(
                "Column lengths differ: real={}, fore={}, fore_list={}",
                real.len(),
                fore.len(),
                fore_lists.len()
            )));
        }
        Ok(Self {
            real,
            fore,
            fore_lists,
            cap,
            threshold,
        })
    }

    pub fn from_points(points: &[DataPoint], params: &CalculationParams) -> Self {
        Self {
            real: points.iter().map(|p| p.real).collect(),
            fore: points.iter().map(|p| p.forecast).collect(),
            fore_lists: points.iter().map(|p| p.fore_list().to_vec()).collect(),
            cap: params.cap,
            threshold: params.effective_threshold(),
        }
    }

    pub fn len(&self) -> usize {
        self.real.len()
    }

    pub fn real(&self) -> &[f64] {
        &self.real
    }

    pub fn fore(&self) -> &[f64] {
        &self.fore
    }

    pub fn cap(&self) -> f64 {
        self.cap
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn is_empty(&self) -> bool {
        self.real.is_empty()
    }

    pub fn row(&self, i: usize) -> RowBindings<'_> {
        RowBindings {
            real: self.real[i],
            fore: self.fore[i],
            fore_list: &self.fore_lists[i],
            cap: self.cap,
            threshold: self.threshold,
        }
    }

    /// 実績と予測平均がともに `threshold·cap` 未満の行
    pub fn dead_band_mask(&self) -> Vec<bool> {
        let limit = self.cap * self.threshold;
        (0..self.len())
            .map(|i| {
                let list = &self.fore_lists[i];
                let fore_mean = if list.is_empty() {
                    self.fore[i]
                } else {
                    list.iter().sum::<f64>() / list.len() as f64
                };
                limit > 0.0 && self.real[i] < limit && fore_mean < limit
            })
            .collect()
    }
}

/// プレビュー 1 行の結果。失敗は `"Error: …"` の文字列になる。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RowOutcome {
    Value(f64),
    Failed(String),
}

impl RowOutcome {
    fn failed(message: impl fmt::Display) -> Self {
        RowOutcome::Failed(format!("Error: {}", message))
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            RowOutcome::Value(v) => Some(*v),
            RowOutcome::Failed(_) => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, RowOutcome::Failed(_))
    }
}

#[derive(Debug)]
pub struct Sandbox {
    library: Library,
    alias: String,
    max_steps: u64,
}

impl Sandbox {
    /// プロセス共通の実行環境。失敗した初期化は保持しないので再度呼べば再試行する。
    pub fn initialize() -> Result<&'static Sandbox> {
        SANDBOX.get_or_try_init(|| {
            let log = DEFAULT.new(o!("function" => "Sandbox::initialize"));
            let sandbox = Self::from_config();
            match &sandbox {
                Ok(s) => info!(log, "sandbox ready";
                    "alias" => &s.alias,
                    "max_steps" => s.max_steps,
                ),
                Err(e) => error!(log, "sandbox initialization failed"; "error" => %e),
            }
            sandbox
        })
    }

    pub fn from_config() -> Result<Self> {
        let alias = config::get("SCORING_LIBRARY_ALIAS")
            .unwrap_or_else(|_| DEFAULT_LIBRARY_ALIAS.to_string());
        let max_steps = match config::get("SCORING_MAX_EVAL_STEPS") {
            Ok(value) => value.trim().parse::<u64>().map_err(|e| {
                Error::SandboxInit(format!("invalid SCORING_MAX_EVAL_STEPS '{}': {}", value, e))
            })?,
            Err(_) => DEFAULT_MAX_STEPS,
        };
        Self::new(alias, max_steps)
    }

    pub fn new(alias: impl Into<String>, max_steps: u64) -> Result<Self> {
        let alias = alias.into();
        let mut chars = alias.chars();
        let is_identifier = chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !is_identifier || RESERVED.contains(&alias.as_str()) {
            return Err(Error::SandboxInit(format!(
                "invalid library alias '{}'",
                alias
            )));
        }
        if max_steps == 0 {
            return Err(Error::SandboxInit(
                "evaluation step budget must be positive".to_string(),
            ));
        }
        Ok(Self {
            library: Library::standard(),
            alias,
            max_steps,
        })
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn max_steps(&self) -> u64 {
        self.max_steps
    }

    fn scope(&self) -> Scope {
        let mut scope = Scope::new();
        scope.bind_module(self.alias.as_str(), Module::Numpy);
        scope
    }

    /// 1 行を評価して `result` を返す。エラーは `line N: …` の文字列。
    fn eval_row(&self, program: &Program, row: &RowBindings<'_>) -> std::result::Result<f64, String> {
        let mut scope = self.scope();
        scope.set("real", row.real);
        scope.set("fore", row.fore);
        scope.set("fore_list", row.fore_list.to_vec());
        scope.set("cap", row.cap);
        scope.set("threshold", row.threshold);
        scope.set("result", 0.0);

        Interpreter::new(&self.library, self.max_steps)
            .run(program, &mut scope)
            .map_err(|e| e.to_string())?;
        scope
            .number("result")
            .map_err(|e| format!("result: {}", e))
    }

    /// 行式を 1 行分評価する。失敗しても例外にはせず結果に含める。
    pub fn run_row(&self, code: &str, row: &RowBindings<'_>) -> RowOutcome {
        match parse_formula(code) {
            Ok(program) => self.run_row_program(&program, row),
            Err(e) => RowOutcome::failed(e),
        }
    }

    pub fn run_row_program(&self, program: &Program, row: &RowBindings<'_>) -> RowOutcome {
        match self.eval_row(program, row) {
            Ok(value) => RowOutcome::Value(value),
            Err(message) => RowOutcome::failed(message),
        }
    }

    /// 1 日分を評価して accuracy を返す。最初に失敗した行で中断する。
    pub fn run_batch(&self, script: &Script, day: &DayBindings) -> Result<f64> {
        let log = DEFAULT.new(o!(
            "function" => "Sandbox::run_batch",
            "rows" => day.len(),
        ));

        let mut results = Vec::with_capacity(day.len());
        for i in 0..day.len() {
            let value = self
                .eval_row(&script.row, &day.row(i))
                .map_err(|message| Error::RowRuntime {
                    date: None,
                    row: Some(i),
                    message,
                })?;
            results.push(value);
        }

        let dead_band = day.dead_band_mask();
        let keep = |i: &usize| script.policy.dead_band == DeadBandPolicy::Retain || !dead_band[*i];
        let kept: Vec<usize> = (0..day.len()).filter(keep).collect();
        let pick = |values: &[f64]| kept.iter().map(|&i| values[i]).collect::<Vec<_>>();

        let raw = match &script.aggregation {
            AggregationStep::Mean => aggregate::mean_accuracy(&pick(&results)),
            AggregationStep::SumStub => aggregate::sum_stub(&pick(&results)),
            AggregationStep::Rmse => aggregate::rmse_accuracy(&pick(&results), day.cap),
            AggregationStep::WeightedRmse => aggregate::weighted_rmse_accuracy(
                &pick(&results),
                &pick(&day.real),
                &pick(&day.fore),
                day.cap,
            ),
            AggregationStep::Custom(program) => {
                self.run_custom(program.as_ref(), &results, day, &dead_band)?
            }
        };
        let accuracy = aggregate::finalize(raw, script.policy.clamp_upper);
        debug!(log, "batch evaluated";
            "kept" => kept.len(),
            "raw" => raw,
            "accuracy" => accuracy,
        );
        Ok(accuracy)
    }

    fn run_custom(
        &self,
        program: Option<&Program>,
        results: &[f64],
        day: &DayBindings,
        dead_band: &[bool],
    ) -> Result<f64> {
        let runtime = |message: String| Error::RowRuntime {
            date: None,
            row: None,
            message: format!("aggregation: {}", message),
        };
        let Some(program) = program else {
            return Err(runtime(
                "no custom aggregation is defined; 'accuracy' was never bound".to_string(),
            ));
        };

        let mut scope = self.scope();
        scope.set("results", results.to_vec());
        scope.set("real", day.real.clone());
        scope.set("fore", day.fore.clone());
        scope.set(
            "dead_band",
            dead_band
                .iter()
                .map(|&d| if d { 1.0 } else { 0.0 })
                .collect::<Vec<_>>(),
        );
        scope.set("cap", day.cap);
        scope.set("threshold", day.threshold);

        Interpreter::new(&self.library, self.max_steps)
            .run(program, &mut scope)
            .map_err(|e| runtime(e.to_string()))?;
        scope.number("accuracy").map_err(|e| runtime(e.to_string()))
    }
}
