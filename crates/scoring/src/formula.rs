//! 行式 DSL
//!
//! Python 風の小さな式言語。字句解析・構文解析・評価・書き出しを持つ。

pub mod ast;
pub mod builtins;
pub mod eval;
pub mod lexer;
pub mod parser;
pub mod printer;

pub use ast::Program;
pub use builtins::{Library, Module};
pub use eval::{EvalError, Interpreter, RuntimeError, Scope, Value};
pub use parser::{SyntaxError, parse_formula, parse_loose};
