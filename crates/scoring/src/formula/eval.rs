//! 構文木の評価
//!
//! スコープは呼び出しごとに呼び出し側が用意する。評価器自身は状態を
//! 持たないので、行をまたいで変数が残ることはない。

use super::ast::*;
use super::builtins::{Library, Module, Namespace};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvalError {
    #[error("name '{0}' is not defined")]
    UnboundName(String),
    #[error("type error: {0}")]
    Type(String),
    #[error("division by zero")]
    ZeroDivision,
    #[error("value error: {0}")]
    Value(String),
    #[error("unknown function '{0}'")]
    UnknownFunction(String),
    #[error("module '{0}' is not imported")]
    UnknownModule(String),
    #[error("evaluation exceeded {0} steps")]
    StepBudget(u64),
}

/// 評価エラーと発生行
#[derive(Error, Debug, Clone, PartialEq)]
#[error("line {line}: {error}")]
pub struct RuntimeError {
    pub line: usize,
    pub error: EvalError,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Bool(bool),
    /// 要素ごとの演算を行う数値列
    List(Vec<f64>),
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<Vec<f64>> for Value {
    fn from(items: Vec<f64>) -> Self {
        Value::List(items)
    }
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "float",
            Value::Bool(_) => "bool",
            Value::List(_) => "list",
        }
    }

    fn scalar(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::List(_) => None,
        }
    }

    /// 数値として取り出す。長さ 1 のリストはその要素。
    pub fn as_number(&self) -> Result<f64, EvalError> {
        match self {
            Value::List(items) if items.len() == 1 => Ok(items[0]),
            Value::List(items) => Err(EvalError::Type(format!(
                "expected a number, found a list of length {}",
                items.len()
            ))),
            other => Ok(other.scalar().unwrap_or_default()),
        }
    }

    pub fn truthy(&self) -> Result<bool, EvalError> {
        match self {
            Value::Number(n) => Ok(*n != 0.0),
            Value::Bool(b) => Ok(*b),
            Value::List(items) => match items.as_slice() {
                [] => Ok(false),
                [x] => Ok(*x != 0.0),
                _ => Err(EvalError::Value(
                    "the truth value of a list with more than one element is ambiguous"
                        .to_string(),
                )),
            },
        }
    }

    /// スカラーは 1 要素として扱う
    pub fn elements(&self) -> Vec<f64> {
        match self {
            Value::List(items) => items.clone(),
            other => other.scalar().into_iter().collect(),
        }
    }

    fn work(&self) -> u64 {
        match self {
            Value::List(items) => items.len() as u64,
            _ => 1,
        }
    }

    pub fn map(&self, f: impl Fn(f64) -> Result<f64, EvalError>) -> Result<Value, EvalError> {
        match self {
            Value::List(items) => Ok(Value::List(
                items.iter().map(|&x| f(x)).collect::<Result<_, _>>()?,
            )),
            other => Ok(Value::Number(f(other.scalar().unwrap_or_default())?)),
        }
    }

    /// 要素ごとの二項演算。スカラーはリストの長さに拡張する。
    pub fn zip_with(
        &self,
        other: &Value,
        f: impl Fn(f64, f64) -> Result<f64, EvalError>,
    ) -> Result<Value, EvalError> {
        match broadcast_len(&[self, other])? {
            None => Ok(Value::Number(f(element(self, 0), element(other, 0))?)),
            Some(n) => Ok(Value::List(
                (0..n)
                    .map(|i| f(element(self, i), element(other, i)))
                    .collect::<Result<_, _>>()?,
            )),
        }
    }
}

/// 引数のリスト長を揃える。リストが無ければ None。
pub fn broadcast_len(values: &[&Value]) -> Result<Option<usize>, EvalError> {
    let mut len: Option<usize> = None;
    for value in values {
        if let Value::List(items) = value {
            match len {
                Some(n) if n != items.len() => {
                    return Err(EvalError::Value(format!(
                        "operands could not be broadcast together ({} vs {})",
                        n,
                        items.len()
                    )));
                }
                _ => len = Some(items.len()),
            }
        }
    }
    Ok(len)
}

/// i 番目の要素。スカラーは常に自身。
pub fn element(value: &Value, i: usize) -> f64 {
    match value {
        Value::List(items) => items.get(i).copied().unwrap_or(f64::NAN),
        other => other.scalar().unwrap_or_default(),
    }
}

fn python_mod(a: f64, b: f64) -> f64 {
    let r = a % b;
    if r != 0.0 && (r < 0.0) != (b < 0.0) {
        r + b
    } else {
        r
    }
}

fn arith(op: BinOp, a: f64, b: f64) -> Result<f64, EvalError> {
    match op {
        BinOp::Add => Ok(a + b),
        BinOp::Sub => Ok(a - b),
        BinOp::Mul => Ok(a * b),
        BinOp::Div if b == 0.0 => Err(EvalError::ZeroDivision),
        BinOp::Div => Ok(a / b),
        BinOp::FloorDiv if b == 0.0 => Err(EvalError::ZeroDivision),
        BinOp::FloorDiv => Ok((a / b).floor()),
        BinOp::Mod if b == 0.0 => Err(EvalError::ZeroDivision),
        BinOp::Mod => Ok(python_mod(a, b)),
        BinOp::Pow if a == 0.0 && b < 0.0 => Err(EvalError::ZeroDivision),
        BinOp::Pow => {
            let out = a.powf(b);
            if out.is_nan() && !a.is_nan() && !b.is_nan() {
                Err(EvalError::Value(format!(
                    "math domain error: {} ** {}",
                    a, b
                )))
            } else {
                Ok(out)
            }
        }
        BinOp::BitAnd | BinOp::BitOr => {
            if a.fract() != 0.0 || b.fract() != 0.0 {
                return Err(EvalError::Type(format!(
                    "unsupported operand for {}: non-integer value",
                    op.symbol()
                )));
            }
            let (x, y) = (a as i64, b as i64);
            let bits = if op == BinOp::BitAnd { x & y } else { x | y };
            Ok(bits as f64)
        }
    }
}

pub fn binary(op: BinOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
    if let (Value::Bool(x), Value::Bool(y)) = (left, right) {
        match op {
            BinOp::BitAnd => return Ok(Value::Bool(*x && *y)),
            BinOp::BitOr => return Ok(Value::Bool(*x || *y)),
            _ => {}
        }
    }
    left.zip_with(right, |a, b| arith(op, a, b))
}

/// スカラー同士なら真偽値、リストを含めば 0/1 の列
pub fn compare(op: CmpOp, left: &Value, right: &Value) -> Result<Value, EvalError> {
    match (left.scalar(), right.scalar()) {
        (Some(a), Some(b)) => Ok(Value::Bool(op.apply(a, b))),
        _ => left.zip_with(right, |a, b| Ok(if op.apply(a, b) { 1.0 } else { 0.0 })),
    }
}

/// 1 回の評価で使う変数とモジュール別名
#[derive(Debug, Clone, Default)]
pub struct Scope {
    vars: HashMap<String, Value>,
    modules: HashMap<String, Module>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        self.modules.remove(&name);
        self.vars.insert(name, value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn bind_module(&mut self, alias: impl Into<String>, module: Module) {
        let alias = alias.into();
        self.vars.remove(&alias);
        self.modules.insert(alias, module);
    }

    pub fn module(&self, alias: &str) -> Result<Module, EvalError> {
        self.modules
            .get(alias)
            .copied()
            .ok_or_else(|| EvalError::UnknownModule(alias.to_string()))
    }

    pub fn lookup(&self, name: &str) -> Result<Value, EvalError> {
        if let Some(value) = self.vars.get(name) {
            return Ok(value.clone());
        }
        if self.modules.contains_key(name) {
            return Err(EvalError::Type(format!(
                "module '{}' cannot be used as a value",
                name
            )));
        }
        Err(EvalError::UnboundName(name.to_string()))
    }

    pub fn number(&self, name: &str) -> Result<f64, EvalError> {
        self.lookup(name)?.as_number()
    }
}

/// 木構造をたどる評価器。ステップ数の上限を持つ。
pub struct Interpreter<'a> {
    library: &'a Library,
    max_steps: u64,
    steps: u64,
}

impl<'a> Interpreter<'a> {
    pub fn new(library: &'a Library, max_steps: u64) -> Self {
        Self {
            library,
            max_steps,
            steps: 0,
        }
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn run(&mut self, program: &Program, scope: &mut Scope) -> Result<(), RuntimeError> {
        self.exec_block(&program.body, scope)
    }

    fn tick(&mut self, n: u64) -> Result<(), EvalError> {
        self.steps = self.steps.saturating_add(n);
        if self.steps > self.max_steps {
            Err(EvalError::StepBudget(self.max_steps))
        } else {
            Ok(())
        }
    }

    fn exec_block(&mut self, stmts: &[Stmt], scope: &mut Scope) -> Result<(), RuntimeError> {
        for stmt in stmts {
            self.exec(stmt, scope)?;
        }
        Ok(())
    }

    fn exec(&mut self, stmt: &Stmt, scope: &mut Scope) -> Result<(), RuntimeError> {
        let line = stmt.line;
        let at = move |error: EvalError| RuntimeError { line, error };
        self.tick(1).map_err(at)?;

        match &stmt.kind {
            StmtKind::Assign { target, value } => {
                let value = self.eval(value, scope).map_err(at)?;
                scope.set(target.as_str(), value);
            }
            StmtKind::AugAssign { target, op, value } => {
                let current = scope.lookup(target).map_err(at)?;
                let rhs = self.eval(value, scope).map_err(at)?;
                let updated = binary(*op, &current, &rhs).map_err(at)?;
                scope.set(target.as_str(), updated);
            }
            StmtKind::If { branches, orelse } => {
                for (cond, body) in branches {
                    let taken = self
                        .eval(cond, scope)
                        .and_then(|v| v.truthy())
                        .map_err(at)?;
                    if taken {
                        return self.exec_block(body, scope);
                    }
                }
                if let Some(body) = orelse {
                    return self.exec_block(body, scope);
                }
            }
            StmtKind::Import { module, alias } => {
                let resolved = Module::from_name(module)
                    .ok_or_else(|| EvalError::UnknownModule(module.clone()))
                    .map_err(at)?;
                scope.bind_module(alias.as_deref().unwrap_or(module), resolved);
            }
            StmtKind::Pass => {}
            StmtKind::Expr(expr) => {
                self.eval(expr, scope).map_err(at)?;
            }
            StmtKind::Return(_) | StmtKind::Def { .. } => {
                return Err(at(EvalError::Type(
                    "functions are not executable in a formula".to_string(),
                )));
            }
        }
        Ok(())
    }

    fn eval(&mut self, expr: &Expr, scope: &Scope) -> Result<Value, EvalError> {
        self.tick(1)?;
        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Name(name) => scope.lookup(name),
            Expr::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match self.eval(item, scope)? {
                        Value::List(_) => {
                            return Err(EvalError::Type(
                                "nested lists are not supported".to_string(),
                            ));
                        }
                        scalar => out.push(scalar.as_number()?),
                    }
                }
                Ok(Value::List(out))
            }
            Expr::Attr { module, name } => {
                let resolved = scope.module(module)?;
                self.library
                    .constant(resolved, name)
                    .map(Value::Number)
                    .ok_or_else(|| EvalError::UnknownFunction(format!("{}.{}", module, name)))
            }
            Expr::Call { callee, args } => {
                let values = args
                    .iter()
                    .map(|arg| self.eval(arg, scope))
                    .collect::<Result<Vec<_>, _>>()?;
                let (ns, name) = match callee {
                    Callee::Builtin(name) => (Namespace::Builtin, name),
                    Callee::Module { module, name } => {
                        (Namespace::Module(scope.module(module)?), name)
                    }
                };
                let result = self.library.call(ns, name, &values)?;
                self.tick(result.work())?;
                Ok(result)
            }
            Expr::Index { target, index } => {
                let target = self.eval(target, scope)?;
                let index = self.eval(index, scope)?.as_number()?;
                index_list(&target, index)
            }
            Expr::Unary { op, operand } => {
                let value = self.eval(operand, scope)?;
                match op {
                    UnaryOp::Neg => value.map(|x| Ok(-x)),
                    UnaryOp::Pos => value.map(Ok),
                    UnaryOp::Not => Ok(Value::Bool(!value.truthy()?)),
                }
            }
            Expr::Binary { op, left, right } => {
                let left = self.eval(left, scope)?;
                let right = self.eval(right, scope)?;
                self.tick(left.work().max(right.work()))?;
                binary(*op, &left, &right)
            }
            Expr::Compare { first, rest } => {
                let mut left = self.eval(first, scope)?;
                if let [(op, right)] = rest.as_slice() {
                    let right = self.eval(right, scope)?;
                    return compare(*op, &left, &right);
                }
                for (op, right) in rest {
                    let right = self.eval(right, scope)?;
                    if !compare(*op, &left, &right)?.truthy()? {
                        return Ok(Value::Bool(false));
                    }
                    left = right;
                }
                Ok(Value::Bool(true))
            }
            Expr::Logical { op, left, right } => {
                let left = self.eval(left, scope)?;
                let short_circuit = match op {
                    LogicalOp::And => !left.truthy()?,
                    LogicalOp::Or => left.truthy()?,
                };
                if short_circuit {
                    Ok(left)
                } else {
                    self.eval(right, scope)
                }
            }
            Expr::IfElse { cond, then, orelse } => {
                if self.eval(cond, scope)?.truthy()? {
                    self.eval(then, scope)
                } else {
                    self.eval(orelse, scope)
                }
            }
        }
    }
}

fn index_list(target: &Value, index: f64) -> Result<Value, EvalError> {
    let Value::List(items) = target else {
        return Err(EvalError::Type(format!(
            "'{}' object is not subscriptable",
            target.type_name()
        )));
    };
    if index.fract() != 0.0 {
        return Err(EvalError::Type("list indices must be integers".to_string()));
    }
    let len = items.len() as i64;
    let raw = index as i64;
    let resolved = if raw < 0 { raw + len } else { raw };
    if resolved < 0 || resolved >= len {
        return Err(EvalError::Value(format!(
            "list index {} out of range for length {}",
            raw, len
        )));
    }
    Ok(Value::Number(items[resolved as usize]))
}
