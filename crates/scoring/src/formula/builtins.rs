//! 式から呼び出せる関数と定数
//!
//! 組み込み関数と numpy / math の一部だけを持つ。ここに無い名前は
//! 呼び出し時に `UnknownFunction` になる。

use super::eval::{EvalError, Value, broadcast_len, element};
use std::collections::HashMap;
use std::f64::consts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Module {
    Numpy,
    Math,
}

impl Module {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "numpy" => Some(Module::Numpy),
            "math" => Some(Module::Math),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Module::Numpy => "numpy",
            Module::Math => "math",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    Builtin,
    Module(Module),
}

pub type NativeFn = fn(&[Value]) -> Result<Value, EvalError>;

/// 関数表と定数表
#[derive(Debug)]
pub struct Library {
    functions: HashMap<Namespace, HashMap<&'static str, NativeFn>>,
    constants: HashMap<Module, HashMap<&'static str, f64>>,
}

impl Library {
    pub fn standard() -> Self {
        let builtin: [(&'static str, NativeFn); 9] = [
            ("abs", abs),
            ("min", builtin_min),
            ("max", builtin_max),
            ("sqrt", sqrt),
            ("mean", mean),
            ("sum", builtin_sum),
            ("len", len),
            ("round", round),
            ("float", float),
        ];
        let numpy: [(&'static str, NativeFn); 13] = [
            ("abs", abs),
            ("absolute", abs),
            ("sqrt", sqrt),
            ("square", square),
            ("mean", mean),
            ("sum", np_sum),
            ("min", np_min),
            ("max", np_max),
            ("maximum", np_maximum),
            ("minimum", np_minimum),
            ("where", np_where),
            ("clip", np_clip),
            ("array", np_array),
        ];
        let math: [(&'static str, NativeFn); 3] =
            [("sqrt", math_sqrt), ("fabs", math_fabs), ("pow", math_pow)];

        let mut functions = HashMap::new();
        functions.insert(Namespace::Builtin, builtin.into_iter().collect());
        functions.insert(
            Namespace::Module(Module::Numpy),
            numpy.into_iter().collect(),
        );
        functions.insert(Namespace::Module(Module::Math), math.into_iter().collect());

        let mut constants = HashMap::new();
        constants.insert(
            Module::Numpy,
            [
                ("pi", consts::PI),
                ("e", consts::E),
                ("inf", f64::INFINITY),
                ("nan", f64::NAN),
            ]
            .into_iter()
            .collect(),
        );
        constants.insert(
            Module::Math,
            [("pi", consts::PI), ("e", consts::E), ("inf", f64::INFINITY)]
                .into_iter()
                .collect(),
        );

        Self {
            functions,
            constants,
        }
    }

    pub fn has_function(&self, ns: Namespace, name: &str) -> bool {
        self.lookup(ns, name).is_some()
    }

    fn lookup(&self, ns: Namespace, name: &str) -> Option<NativeFn> {
        self.functions.get(&ns).and_then(|t| t.get(name)).copied()
    }

    pub fn call(&self, ns: Namespace, name: &str, args: &[Value]) -> Result<Value, EvalError> {
        match self.lookup(ns, name) {
            Some(f) => f(args),
            None => Err(EvalError::UnknownFunction(match ns {
                Namespace::Builtin => name.to_string(),
                Namespace::Module(m) => format!("{}.{}", m.name(), name),
            })),
        }
    }

    pub fn constant(&self, module: Module, name: &str) -> Option<f64> {
        self.constants.get(&module).and_then(|t| t.get(name)).copied()
    }
}

fn arity(name: &str, args: &[Value], expected: usize) -> Result<(), EvalError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(EvalError::Type(format!(
            "{}() takes {} argument(s) ({} given)",
            name,
            expected,
            args.len()
        )))
    }
}

fn domain_sqrt(x: f64) -> Result<f64, EvalError> {
    if x < 0.0 {
        Err(EvalError::Value(format!("math domain error: sqrt({})", x)))
    } else {
        Ok(x.sqrt())
    }
}

/// NaN を伝播する min/max
fn fold(values: &[f64], name: &str, pick: fn(f64, f64) -> f64) -> Result<Value, EvalError> {
    let (first, rest) = values.split_first().ok_or_else(|| {
        EvalError::Value(format!("{}() arg is an empty sequence", name))
    })?;
    let picked = rest.iter().fold(*first, |acc, &x| {
        if acc.is_nan() || x.is_nan() {
            f64::NAN
        } else {
            pick(acc, x)
        }
    });
    Ok(Value::Number(picked))
}

/// 引数 1 つならリストを、複数ならスカラー列を畳み込む
fn builtin_fold(name: &str, args: &[Value], pick: fn(f64, f64) -> f64) -> Result<Value, EvalError> {
    match args {
        [] => Err(EvalError::Type(format!("{}() expected at least 1 argument", name))),
        [Value::List(items)] => fold(items, name, pick),
        [single] => Err(EvalError::Type(format!(
            "'{}' object is not iterable",
            single.type_name()
        ))),
        many => {
            let values = many
                .iter()
                .map(Value::as_number)
                .collect::<Result<Vec<_>, _>>()?;
            fold(&values, name, pick)
        }
    }
}

fn abs(args: &[Value]) -> Result<Value, EvalError> {
    arity("abs", args, 1)?;
    args[0].map(|x| Ok(x.abs()))
}

fn builtin_min(args: &[Value]) -> Result<Value, EvalError> {
    builtin_fold("min", args, f64::min)
}

fn builtin_max(args: &[Value]) -> Result<Value, EvalError> {
    builtin_fold("max", args, f64::max)
}

fn sqrt(args: &[Value]) -> Result<Value, EvalError> {
    arity("sqrt", args, 1)?;
    args[0].map(domain_sqrt)
}

fn mean(args: &[Value]) -> Result<Value, EvalError> {
    arity("mean", args, 1)?;
    let values = args[0].elements();
    if values.is_empty() {
        return Err(EvalError::Value("mean of empty sequence".to_string()));
    }
    Ok(Value::Number(values.iter().sum::<f64>() / values.len() as f64))
}

fn builtin_sum(args: &[Value]) -> Result<Value, EvalError> {
    arity("sum", args, 1)?;
    match &args[0] {
        Value::List(items) => Ok(Value::Number(items.iter().sum())),
        other => Err(EvalError::Type(format!(
            "'{}' object is not iterable",
            other.type_name()
        ))),
    }
}

fn len(args: &[Value]) -> Result<Value, EvalError> {
    arity("len", args, 1)?;
    match &args[0] {
        Value::List(items) => Ok(Value::Number(items.len() as f64)),
        other => Err(EvalError::Type(format!(
            "object of type '{}' has no len()",
            other.type_name()
        ))),
    }
}

/// 偶数丸め。桁数指定は 10 進のスケーリングで近似する。
fn round(args: &[Value]) -> Result<Value, EvalError> {
    let digits = match args {
        [_] => 0,
        [_, n] => {
            let n = n.as_number()?;
            if n.fract() != 0.0 {
                return Err(EvalError::Type("round() ndigits must be an integer".to_string()));
            }
            n as i32
        }
        _ => {
            return Err(EvalError::Type(format!(
                "round() takes 1 or 2 arguments ({} given)",
                args.len()
            )));
        }
    };
    let scale = 10f64.powi(digits);
    args[0].map(|x| {
        if digits == 0 {
            Ok(x.round_ties_even())
        } else {
            Ok((x * scale).round_ties_even() / scale)
        }
    })
}

fn float(args: &[Value]) -> Result<Value, EvalError> {
    arity("float", args, 1)?;
    Ok(Value::Number(args[0].as_number()?))
}

fn square(args: &[Value]) -> Result<Value, EvalError> {
    arity("square", args, 1)?;
    args[0].map(|x| Ok(x * x))
}

fn np_sum(args: &[Value]) -> Result<Value, EvalError> {
    arity("sum", args, 1)?;
    Ok(Value::Number(args[0].elements().iter().sum()))
}

fn np_min(args: &[Value]) -> Result<Value, EvalError> {
    arity("min", args, 1)?;
    fold(&args[0].elements(), "min", f64::min)
}

fn np_max(args: &[Value]) -> Result<Value, EvalError> {
    arity("max", args, 1)?;
    fold(&args[0].elements(), "max", f64::max)
}

fn np_maximum(args: &[Value]) -> Result<Value, EvalError> {
    arity("maximum", args, 2)?;
    args[0].zip_with(&args[1], |a, b| {
        Ok(if a.is_nan() || b.is_nan() {
            f64::NAN
        } else {
            a.max(b)
        })
    })
}

fn np_minimum(args: &[Value]) -> Result<Value, EvalError> {
    arity("minimum", args, 2)?;
    args[0].zip_with(&args[1], |a, b| {
        Ok(if a.is_nan() || b.is_nan() {
            f64::NAN
        } else {
            a.min(b)
        })
    })
}

fn np_where(args: &[Value]) -> Result<Value, EvalError> {
    arity("where", args, 3)?;
    let (cond, yes, no) = (&args[0], &args[1], &args[2]);
    match broadcast_len(&[cond, yes, no])? {
        None => Ok(if cond.truthy()? { yes.clone() } else { no.clone() }),
        Some(n) => Ok(Value::List(
            (0..n)
                .map(|i| {
                    if element(cond, i) != 0.0 {
                        element(yes, i)
                    } else {
                        element(no, i)
                    }
                })
                .collect(),
        )),
    }
}

fn np_clip(args: &[Value]) -> Result<Value, EvalError> {
    arity("clip", args, 3)?;
    let (value, lo, hi) = (&args[0], &args[1], &args[2]);
    let clip = |i: usize| element(value, i).max(element(lo, i)).min(element(hi, i));
    match broadcast_len(&[value, lo, hi])? {
        None => Ok(Value::Number(clip(0))),
        Some(n) => Ok(Value::List((0..n).map(clip).collect())),
    }
}

fn np_array(args: &[Value]) -> Result<Value, EvalError> {
    arity("array", args, 1)?;
    Ok(Value::List(args[0].elements()))
}

fn math_sqrt(args: &[Value]) -> Result<Value, EvalError> {
    arity("sqrt", args, 1)?;
    Ok(Value::Number(domain_sqrt(args[0].as_number()?)?))
}

fn math_fabs(args: &[Value]) -> Result<Value, EvalError> {
    arity("fabs", args, 1)?;
    Ok(Value::Number(args[0].as_number()?.abs()))
}

fn math_pow(args: &[Value]) -> Result<Value, EvalError> {
    arity("pow", args, 2)?;
    let (base, exp) = (args[0].as_number()?, args[1].as_number()?);
    let out = base.powf(exp);
    if out.is_nan() && !base.is_nan() && !exp.is_nan() {
        return Err(EvalError::Value("math domain error: pow".to_string()));
    }
    Ok(Value::Number(out))
}

#[cfg(test)]
mod tests;
