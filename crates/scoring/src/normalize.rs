//! 貼り付けられたコードを行式の正規形に書き直す
//!
//! 緩い方言で構文解析し、構文木の変換だけで書き直す。
//! - Markdown のコードフェンスを外す
//! - 単一の関数定義を展開し、return を `result = …` に置き換える
//! - 別名の変数名を `real` / `fore` / `fore_list` / `cap` / `threshold` に寄せる
//! - numpy / math の import を 1 つずつに揃える
//! - 末尾に `result` を置く

use crate::assemble::DEFAULT_LIBRARY_ALIAS;
use crate::error::{Error, Result};
use crate::formula::ast::*;
use crate::formula::parser::MAX_NESTING;
use crate::formula::{parse_formula, parse_loose};
use common::config;
use logging::*;
use std::collections::{HashMap, HashSet};

const CANONICAL: [&str; 5] = ["real", "fore", "fore_list", "cap", "threshold"];

/// return の書き換えで後続の文を分岐ごとに複製するので、その総数の上限
const MAX_REWRITTEN_STATEMENTS: usize = 10_000;

fn syntax(line: usize, message: impl Into<String>) -> Error {
    Error::FormulaSyntax {
        line,
        message: message.into(),
    }
}

/// 設定のライブラリ別名で正規化する
pub fn normalize(code: &str) -> Result<String> {
    let alias = config::get("SCORING_LIBRARY_ALIAS")
        .unwrap_or_else(|_| DEFAULT_LIBRARY_ALIAS.to_string());
    normalize_with_alias(code, &alias)
}

pub fn normalize_with_alias(code: &str, alias: &str) -> Result<String> {
    let log = DEFAULT.new(o!("function" => "normalize"));

    let source = strip_fences(code);
    let program = parse_loose(&source)?;
    let body = unwrap_function(program.body)?;
    let body = map_aliases(body);
    let mut body = canonicalize_modules(body, alias);

    let ends_with_result = matches!(
        body.last().map(|s| &s.kind),
        Some(StmtKind::Expr(Expr::Name(name))) if name == "result"
    );
    if !ends_with_result {
        let line = body.last().map(|s| s.line + 1).unwrap_or(1);
        body.push(Stmt::new(line, StmtKind::Expr(Expr::Name("result".to_string()))));
    }

    let rendered = Program {
        body,
        pragmas: program.pragmas,
    }
    .to_string();
    // 出力は実行用の方言で読めなければならない
    parse_formula(&rendered)?;

    info!(log, "formula normalized"; "lines" => rendered.lines().count());
    Ok(rendered)
}

/// 最初のコードフェンスの中身を取り出す
fn strip_fences(code: &str) -> String {
    let lines: Vec<&str> = code.lines().collect();
    let fences: Vec<usize> = lines
        .iter()
        .enumerate()
        .filter(|(_, l)| l.trim_start().starts_with("```"))
        .map(|(i, _)| i)
        .collect();
    match fences.as_slice() {
        [] => code.to_string(),
        [open] => lines[open + 1..].join("\n"),
        [open, close, ..] => lines[open + 1..*close].join("\n"),
    }
}

// ==================== 関数定義の展開 ====================

fn contains_return(stmts: &[Stmt]) -> bool {
    stmts.iter().any(|stmt| match &stmt.kind {
        StmtKind::Return(_) => true,
        StmtKind::If { branches, orelse } => {
            branches.iter().any(|(_, body)| contains_return(body))
                || orelse.as_deref().is_some_and(contains_return)
        }
        _ => false,
    })
}

fn calls_function(stmt: &Stmt, name: &str) -> bool {
    let mut found = false;
    walk_exprs(std::slice::from_ref(stmt), &mut |expr| {
        if let Expr::Call {
            callee: Callee::Builtin(callee),
            ..
        } = expr
            && callee == name
        {
            found = true;
        }
    });
    found
}

fn unwrap_function(body: Vec<Stmt>) -> Result<Vec<Stmt>> {
    let mut defs = body
        .iter()
        .filter(|s| matches!(s.kind, StmtKind::Def { .. }));
    let Some(def) = defs.next() else {
        if let Some(stmt) = body.iter().find(|s| contains_return(std::slice::from_ref(*s))) {
            return Err(syntax(stmt.line, "'return' outside function"));
        }
        return Ok(body);
    };
    if let Some(second) = defs.next() {
        return Err(syntax(
            second.line,
            "only one function definition is supported",
        ));
    }
    let def_line = def.line;
    let def_name = match &def.kind {
        StmtKind::Def { name, .. } => name.clone(),
        _ => String::new(),
    };

    let mut out = Vec::new();
    for stmt in body {
        match stmt.kind {
            StmtKind::Def { params, body, .. } => {
                let renames = parameter_renames(&params, def_line)?;
                let inner = rename_parameters(body, &renames)?;
                let mut budget = MAX_REWRITTEN_STATEMENTS;
                out.extend(eliminate_returns(&inner, 0, &mut budget)?);
            }
            kind => {
                let stmt = Stmt::new(stmt.line, kind);
                // 定義した関数を呼び出すだけの文は取り除く
                if calls_function(&stmt, &def_name) {
                    continue;
                }
                if contains_return(std::slice::from_ref(&stmt)) {
                    return Err(syntax(stmt.line, "'return' outside function"));
                }
                out.push(stmt);
            }
        }
    }
    Ok(out)
}

/// 引数名から正規名への置換
fn parameter_renames(params: &[String], line: usize) -> Result<HashMap<String, Expr>> {
    let mut renames = HashMap::new();
    let mut seen: HashSet<String> = HashSet::new();
    for param in params {
        let replacement = if CANONICAL.contains(&param.as_str()) {
            Expr::Name(param.clone())
        } else if let Some(expr) = alias_expr(param) {
            expr
        } else {
            return Err(syntax(line, format!("unsupported parameter '{}'", param)));
        };
        let key = replacement.to_string();
        if !seen.insert(key.clone()) {
            return Err(syntax(
                line,
                format!("parameter '{}' duplicates '{}'", param, key),
            ));
        }
        if replacement != Expr::Name(param.clone()) {
            renames.insert(param.clone(), replacement);
        }
    }
    Ok(renames)
}

fn rename_parameters(body: Vec<Stmt>, renames: &HashMap<String, Expr>) -> Result<Vec<Stmt>> {
    let body = rename_targets(body, renames)?;
    Ok(rewrite_stmts(body, &mut |expr| match expr {
        Expr::Name(name) => renames.get(&name).cloned().unwrap_or(Expr::Name(name)),
        other => other,
    }))
}

fn rename_target(target: String, line: usize, renames: &HashMap<String, Expr>) -> Result<String> {
    match renames.get(&target) {
        None => Ok(target),
        Some(Expr::Name(name)) => Ok(name.clone()),
        Some(_) => Err(syntax(
            line,
            format!("parameter '{}' cannot be reassigned", target),
        )),
    }
}

fn rename_targets(stmts: Vec<Stmt>, renames: &HashMap<String, Expr>) -> Result<Vec<Stmt>> {
    stmts
        .into_iter()
        .map(|stmt| {
            let line = stmt.line;
            let kind = match stmt.kind {
                StmtKind::Assign { target, value } => StmtKind::Assign {
                    target: rename_target(target, line, renames)?,
                    value,
                },
                StmtKind::AugAssign { target, op, value } => StmtKind::AugAssign {
                    target: rename_target(target, line, renames)?,
                    op,
                    value,
                },
                StmtKind::If { branches, orelse } => StmtKind::If {
                    branches: branches
                        .into_iter()
                        .map(|(cond, body)| Ok((cond, rename_targets(body, renames)?)))
                        .collect::<Result<_>>()?,
                    orelse: orelse.map(|body| rename_targets(body, renames)).transpose()?,
                },
                other => other,
            };
            Ok(Stmt::new(line, kind))
        })
        .collect()
}

/// return を `result = …` に置き換える
///
/// 条件分岐の中の return は、その後ろに続く文を return しない分岐へ
/// 移すことで実行順を保つ。
fn eliminate_returns(stmts: &[Stmt], depth: usize, budget: &mut usize) -> Result<Vec<Stmt>> {
    let mut out = Vec::new();
    for (i, stmt) in stmts.iter().enumerate() {
        if *budget == 0 {
            return Err(syntax(
                stmt.line,
                "too many statements after rewriting early returns",
            ));
        }
        *budget -= 1;
        match &stmt.kind {
            StmtKind::Return(Some(value)) => {
                out.push(Stmt::new(
                    stmt.line,
                    StmtKind::Assign {
                        target: "result".to_string(),
                        value: value.clone(),
                    },
                ));
                return Ok(out);
            }
            StmtKind::Return(None) => {
                return Err(syntax(stmt.line, "bare 'return' is not supported"));
            }
            StmtKind::Def { .. } => {
                return Err(syntax(
                    stmt.line,
                    "nested function definitions are not supported",
                ));
            }
            StmtKind::If { branches, orelse } if contains_return(std::slice::from_ref(stmt)) => {
                if depth >= MAX_NESTING {
                    return Err(syntax(
                        stmt.line,
                        format!("early returns nested deeper than {} levels", MAX_NESTING),
                    ));
                }
                let rest = &stmts[i + 1..];
                let with_rest = |body: &[Stmt]| -> Vec<Stmt> {
                    body.iter().chain(rest).cloned().collect()
                };
                let mut new_branches = Vec::with_capacity(branches.len());
                for (cond, body) in branches {
                    new_branches.push((cond.clone(), eliminate_returns(&with_rest(body.as_slice()), depth + 1, budget)?));
                }
                let else_body = with_rest(orelse.as_deref().unwrap_or_default());
                let orelse = if else_body.is_empty() {
                    None
                } else {
                    Some(eliminate_returns(&else_body, depth + 1, budget)?)
                };
                out.push(Stmt::new(
                    stmt.line,
                    StmtKind::If {
                        branches: new_branches,
                        orelse,
                    },
                ));
                return Ok(out);
            }
            _ => out.push(stmt.clone()),
        }
    }
    Ok(out)
}

// ==================== 変数名の別名 ====================

fn canonical_name(name: &str) -> Option<&'static str> {
    match name {
        "actual" | "actual_power" | "real_power" => Some("real"),
        "forecast" | "pred" | "prediction" | "fore_mean" => Some("fore"),
        "forecasts" | "forecast_list" | "fore_lst" | "fores" | "predictions" => Some("fore_list"),
        "capacity" | "installed_capacity" => Some("cap"),
        "thresh" | "threshold_ratio" => Some("threshold"),
        _ => None,
    }
}

/// `fore1` / `fore_2` / `forecast3` / `fore_list_4` の 0 始まりの位置
fn indexed_forecast(name: &str) -> Option<usize> {
    for prefix in ["fore_list_", "forecast_", "forecast", "fore_", "fore"] {
        if let Some(digits) = name.strip_prefix(prefix)
            && !digits.is_empty()
            && digits.chars().all(|c| c.is_ascii_digit())
        {
            return digits.parse::<usize>().ok()?.checked_sub(1);
        }
    }
    None
}

fn alias_expr(name: &str) -> Option<Expr> {
    if let Some(canonical) = canonical_name(name) {
        return Some(Expr::Name(canonical.to_string()));
    }
    indexed_forecast(name).map(|i| Expr::Index {
        target: Box::new(Expr::Name("fore_list".to_string())),
        index: Box::new(Expr::Number(i as f64)),
    })
}

/// 代入・import で束縛される名前
fn bound_names(stmts: &[Stmt], out: &mut HashSet<String>) {
    for stmt in stmts {
        match &stmt.kind {
            StmtKind::Assign { target, .. } | StmtKind::AugAssign { target, .. } => {
                out.insert(target.clone());
            }
            StmtKind::Import { .. } => {
                if let Some(binding) = stmt.kind.import_binding() {
                    out.insert(binding.to_string());
                }
            }
            StmtKind::If { branches, orelse } => {
                for (_, body) in branches {
                    bound_names(body, out);
                }
                if let Some(body) = orelse {
                    bound_names(body, out);
                }
            }
            StmtKind::Def { name, body, .. } => {
                out.insert(name.clone());
                bound_names(body, out);
            }
            StmtKind::Pass | StmtKind::Expr(_) | StmtKind::Return(_) => {}
        }
    }
}

fn map_aliases(body: Vec<Stmt>) -> Vec<Stmt> {
    let mut bound = HashSet::new();
    bound_names(&body, &mut bound);
    rewrite_stmts(body, &mut |expr| match expr {
        Expr::Name(name) if !bound.contains(&name) => {
            alias_expr(&name).unwrap_or(Expr::Name(name))
        }
        other => other,
    })
}

// ==================== import の整理 ====================

#[derive(Default)]
struct ModuleAliases {
    numpy: HashSet<String>,
    math: HashSet<String>,
}

fn collect_imports(stmts: &[Stmt], aliases: &mut ModuleAliases) {
    for stmt in stmts {
        match &stmt.kind {
            StmtKind::Import { module, .. } => {
                let binding = stmt.kind.import_binding().unwrap_or(module).to_string();
                match module.as_str() {
                    "numpy" => aliases.numpy.insert(binding),
                    _ => aliases.math.insert(binding),
                };
            }
            StmtKind::If { branches, orelse } => {
                for (_, body) in branches {
                    collect_imports(body, aliases);
                }
                if let Some(body) = orelse {
                    collect_imports(body, aliases);
                }
            }
            _ => {}
        }
    }
}

fn drop_imports(stmts: Vec<Stmt>) -> Vec<Stmt> {
    let mut out = Vec::with_capacity(stmts.len());
    for stmt in stmts {
        let line = stmt.line;
        let kind = match stmt.kind {
            StmtKind::Import { .. } => continue,
            StmtKind::If { branches, orelse } => {
                let non_empty = |body: Vec<Stmt>| {
                    let body = drop_imports(body);
                    if body.is_empty() {
                        vec![Stmt::new(line, StmtKind::Pass)]
                    } else {
                        body
                    }
                };
                StmtKind::If {
                    branches: branches
                        .into_iter()
                        .map(|(cond, body)| (cond, non_empty(body)))
                        .collect(),
                    orelse: orelse.map(non_empty),
                }
            }
            other => other,
        };
        out.push(Stmt::new(line, kind));
    }
    out
}

fn canonicalize_modules(body: Vec<Stmt>, alias: &str) -> Vec<Stmt> {
    let mut aliases = ModuleAliases::default();
    collect_imports(&body, &mut aliases);

    let mut assigned = HashSet::new();
    bound_names(&body, &mut assigned);
    for default in ["np", "numpy"] {
        if !assigned.contains(default) {
            aliases.numpy.insert(default.to_string());
        }
    }
    if !assigned.contains("math") {
        aliases.math.insert("math".to_string());
    }

    let retarget = |module: String| -> String {
        if aliases.numpy.contains(&module) {
            alias.to_string()
        } else if aliases.math.contains(&module) {
            "math".to_string()
        } else {
            module
        }
    };
    let body = rewrite_stmts(drop_imports(body), &mut |expr| match expr {
        Expr::Call {
            callee: Callee::Module { module, name },
            args,
        } => Expr::Call {
            callee: Callee::Module {
                module: retarget(module),
                name,
            },
            args,
        },
        Expr::Attr { module, name } => Expr::Attr {
            module: retarget(module),
            name,
        },
        other => other,
    });

    let (mut uses_numpy, mut uses_math) = (false, false);
    walk_exprs(&body, &mut |expr| {
        let module = match expr {
            Expr::Call {
                callee: Callee::Module { module, .. },
                ..
            }
            | Expr::Attr { module, .. } => module,
            _ => return,
        };
        uses_numpy |= module == alias;
        uses_math |= module == "math";
    });

    let mut header = Vec::new();
    if uses_numpy {
        header.push(Stmt::new(
            0,
            StmtKind::Import {
                module: "numpy".to_string(),
                alias: (alias != "numpy").then(|| alias.to_string()),
            },
        ));
    }
    if uses_math && alias != "math" {
        header.push(Stmt::new(
            0,
            StmtKind::Import {
                module: "math".to_string(),
                alias: None,
            },
        ));
    }
    header.extend(body);
    header
}
