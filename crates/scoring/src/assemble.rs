//! 行式と集計方式から実行単位を組み立てる
//!
//! 組み立て結果は型付きの [`Script`] で、テキストへの展開は表示用の
//! `Display` だけが行う。

use crate::error::{Error, Result};
use crate::formula::ast::{Stmt, StmtKind};
use crate::formula::printer::render_block;
use crate::formula::{Program, parse_formula};
use crate::region::{self, WEIGHTED_RMSE_PRAGMA};
use common::config;
use common::types::{AggregationMethod, DeadBandPolicy, RegionId};
use logging::*;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const DEFAULT_LIBRARY_ALIAS: &str = "np";

/// 集計時の方針
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationPolicy {
    #[serde(default)]
    pub dead_band: DeadBandPolicy,
    #[serde(default)]
    pub clamp_upper: bool,
}

impl AggregationPolicy {
    pub fn from_config() -> Self {
        let log = DEFAULT.new(o!("function" => "AggregationPolicy::from_config"));
        let dead_band = match config::get("SCORING_DEAD_BAND_POLICY") {
            Ok(value) => value.parse().unwrap_or_else(|e| {
                warn!(log, "ignoring dead-band policy"; "error" => %e);
                DeadBandPolicy::default()
            }),
            Err(_) => DeadBandPolicy::default(),
        };
        Self {
            dead_band,
            clamp_upper: config::get_or("SCORING_CLAMP_UPPER", false),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub library_alias: String,
}

/// 日次集計の手順
#[derive(Debug, Clone, PartialEq)]
pub enum AggregationStep {
    Mean,
    SumStub,
    Rmse,
    WeightedRmse,
    /// None は accuracy を束縛しないスタブ
    Custom(Option<Program>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    pub header: Header,
    pub row: Program,
    pub aggregation: AggregationStep,
    pub policy: AggregationPolicy,
    /// 取り除いた import の行番号
    pub neutralized_imports: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct ScriptAssembler {
    alias: String,
    policy: AggregationPolicy,
}

impl ScriptAssembler {
    pub fn new(alias: impl Into<String>, policy: AggregationPolicy) -> Self {
        Self {
            alias: alias.into(),
            policy,
        }
    }

    pub fn from_config() -> Self {
        let alias = config::get("SCORING_LIBRARY_ALIAS")
            .unwrap_or_else(|_| DEFAULT_LIBRARY_ALIAS.to_string());
        Self::new(alias, AggregationPolicy::from_config())
    }

    pub fn alias(&self) -> &str {
        &self.alias
    }

    pub fn policy(&self) -> AggregationPolicy {
        self.policy
    }

    pub fn with_policy(self, policy: AggregationPolicy) -> Self {
        Self { policy, ..self }
    }

    pub fn assemble(
        &self,
        row_formula: &str,
        method: AggregationMethod,
        region: RegionId,
        custom_aggregation: Option<&str>,
    ) -> Result<Script> {
        let log = DEFAULT.new(o!(
            "function" => "ScriptAssembler::assemble",
            "region" => region.as_str(),
            "method" => method.as_str(),
        ));

        let parsed = parse_formula(row_formula)?;
        let mut neutralized = Vec::new();
        let row = Program {
            body: neutralize_imports(parsed.body, &self.alias, &mut neutralized),
            pragmas: parsed.pragmas,
        };
        if !neutralized.is_empty() {
            debug!(log, "neutralized library imports"; "lines" => ?neutralized);
        }

        let aggregation = match method {
            AggregationMethod::Mean => AggregationStep::Mean,
            AggregationMethod::Sum => AggregationStep::SumStub,
            AggregationMethod::Rmse
                if region == RegionId::Shanxi && row.has_pragma(WEIGHTED_RMSE_PRAGMA) =>
            {
                AggregationStep::WeightedRmse
            }
            AggregationMethod::Rmse => AggregationStep::Rmse,
            AggregationMethod::Custom => {
                let code = custom_aggregation
                    .filter(|code| !code.trim().is_empty())
                    .or(region::profile(region).custom_aggregation);
                match code {
                    Some(code) => AggregationStep::Custom(Some(parse_aggregation(code)?)),
                    None => {
                        warn!(log, "no custom aggregation available, using stub");
                        AggregationStep::Custom(None)
                    }
                }
            }
        };

        Ok(Script {
            header: Header {
                library_alias: self.alias.clone(),
            },
            row,
            aggregation,
            policy: self.policy,
            neutralized_imports: neutralized,
        })
    }
}

fn parse_aggregation(code: &str) -> Result<Program> {
    parse_formula(code).map_err(|e| Error::FormulaSyntax {
        line: e.line,
        message: format!("in aggregation: {}", e.message),
    })
}

fn is_header_import(kind: &StmtKind, alias: &str) -> bool {
    matches!(kind, StmtKind::Import { module, .. } if module == "numpy")
        && kind.import_binding() == Some(alias)
}

/// ヘッダの別名を上書きする numpy の import を取り除く
fn neutralize_imports(stmts: Vec<Stmt>, alias: &str, dropped: &mut Vec<usize>) -> Vec<Stmt> {
    let mut out = Vec::with_capacity(stmts.len());
    for stmt in stmts {
        if is_header_import(&stmt.kind, alias) {
            dropped.push(stmt.line);
            continue;
        }
        let kind = match stmt.kind {
            StmtKind::If { branches, orelse } => {
                let mut new_branches = Vec::with_capacity(branches.len());
                for (cond, body) in branches {
                    new_branches.push((cond, neutralize_body(body, stmt.line, alias, dropped)));
                }
                StmtKind::If {
                    branches: new_branches,
                    orelse: orelse.map(|body| neutralize_body(body, stmt.line, alias, dropped)),
                }
            }
            other => other,
        };
        out.push(Stmt::new(stmt.line, kind));
    }
    out
}

fn neutralize_body(body: Vec<Stmt>, line: usize, alias: &str, dropped: &mut Vec<usize>) -> Vec<Stmt> {
    let body = neutralize_imports(body, alias, dropped);
    if body.is_empty() {
        vec![Stmt::new(line, StmtKind::Pass)]
    } else {
        body
    }
}

impl fmt::Display for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let np = &self.header.library_alias;
        writeln!(f, "import numpy as {}", np)?;
        writeln!(f)?;
        for pragma in &self.row.pragmas {
            writeln!(f, "#pragma {}", pragma)?;
        }
        writeln!(f, "results = []")?;
        writeln!(f, "for i in range(len(real_values)):")?;
        writeln!(f, "    real = real_values[i]")?;
        writeln!(f, "    fore = fore_values[i]")?;
        writeln!(f, "    fore_list = fore_lists[i]")?;
        if self.policy.dead_band == DeadBandPolicy::Exclude
            && !matches!(self.aggregation, AggregationStep::Custom(_))
        {
            writeln!(
                f,
                "    if real < threshold * cap and {}.mean(fore_list) < threshold * cap:",
                np
            )?;
            writeln!(f, "        continue")?;
        }
        writeln!(f, "    result = 0.0")?;
        write!(f, "{}", render_block(&self.row.body, 1))?;
        writeln!(f, "    results.append(result)")?;
        writeln!(f)?;

        match &self.aggregation {
            AggregationStep::Mean => {
                writeln!(f, "accuracy = max(0, 1 - {}.mean(results))", np)?;
            }
            AggregationStep::SumStub => {
                writeln!(f, "# sum aggregation is not defined")?;
                writeln!(f, "accuracy = 0")?;
            }
            AggregationStep::Rmse => {
                writeln!(
                    f,
                    "accuracy = max(0, 1 - {0}.sqrt({0}.mean(results)) / cap)",
                    np
                )?;
            }
            AggregationStep::WeightedRmse => {
                writeln!(
                    f,
                    "total_weight = {0}.sum({0}.abs({0}.array(real_values) - {0}.array(fore_values)))",
                    np
                )?;
                writeln!(f, "if total_weight == 0:")?;
                writeln!(f, "    accuracy = 1")?;
                writeln!(f, "else:")?;
                writeln!(
                    f,
                    "    accuracy = max(0, 1 - {0}.sqrt({0}.sum(results) / total_weight) / cap)",
                    np
                )?;
            }
            AggregationStep::Custom(Some(program)) => {
                write!(f, "{}", program)?;
            }
            AggregationStep::Custom(None) => {
                writeln!(f, "# custom aggregation: bind accuracy here")?;
                writeln!(f, "pass")?;
            }
        }
        if self.policy.clamp_upper {
            writeln!(f, "accuracy = min(accuracy, 1)")?;
        }
        writeln!(f, "accuracy")
    }
}
