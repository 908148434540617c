//! 構文木をソースとして書き出す
//!
//! 括弧は優先順位上必要な箇所にだけ付ける。インデントは 4 空白。

use super::ast::*;
use std::fmt::{self, Write};

const INDENT: &str = "    ";

// 優先順位（大きいほど強く結合する）
const PREC_IF_ELSE: u8 = 1;
const PREC_OR: u8 = 2;
const PREC_AND: u8 = 3;
const PREC_NOT: u8 = 4;
const PREC_COMPARE: u8 = 5;
const PREC_UNARY: u8 = 10;
const PREC_POW: u8 = 11;
const PREC_ATOM: u8 = 12;

fn binary_prec(op: BinOp) -> u8 {
    match op {
        BinOp::BitOr => 6,
        BinOp::BitAnd => 7,
        BinOp::Add | BinOp::Sub => 8,
        BinOp::Mul | BinOp::Div | BinOp::FloorDiv | BinOp::Mod => 9,
        BinOp::Pow => PREC_POW,
    }
}

fn prec(expr: &Expr) -> u8 {
    match expr {
        Expr::IfElse { .. } => PREC_IF_ELSE,
        Expr::Logical {
            op: LogicalOp::Or, ..
        } => PREC_OR,
        Expr::Logical {
            op: LogicalOp::And,
            ..
        } => PREC_AND,
        Expr::Unary {
            op: UnaryOp::Not, ..
        } => PREC_NOT,
        Expr::Compare { .. } => PREC_COMPARE,
        Expr::Binary { op, .. } => binary_prec(*op),
        Expr::Unary { .. } => PREC_UNARY,
        Expr::Number(n) if n.is_sign_negative() && *n != 0.0 => PREC_UNARY,
        _ => PREC_ATOM,
    }
}

fn write_number(f: &mut impl Write, n: f64) -> fmt::Result {
    if n.is_nan() {
        write!(f, "nan")
    } else if n.is_infinite() {
        write!(f, "{}1e309", if n < 0.0 { "-" } else { "" })
    } else {
        write!(f, "{}", n)
    }
}

fn write_child(f: &mut impl Write, child: &Expr, min: u8) -> fmt::Result {
    if prec(child) < min {
        write!(f, "(")?;
        write_expr(f, child)?;
        write!(f, ")")
    } else {
        write_expr(f, child)
    }
}

fn write_list(f: &mut impl Write, items: &[Expr]) -> fmt::Result {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write_expr(f, item)?;
    }
    Ok(())
}

fn write_expr(f: &mut impl Write, expr: &Expr) -> fmt::Result {
    match expr {
        Expr::Number(n) => write_number(f, *n),
        Expr::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
        Expr::Name(name) => write!(f, "{}", name),
        Expr::List(items) => {
            write!(f, "[")?;
            write_list(f, items)?;
            write!(f, "]")
        }
        Expr::Attr { module, name } => write!(f, "{}.{}", module, name),
        Expr::Call { callee, args } => {
            match callee {
                Callee::Builtin(name) => write!(f, "{}(", name)?,
                Callee::Module { module, name } => write!(f, "{}.{}(", module, name)?,
            }
            write_list(f, args)?;
            write!(f, ")")
        }
        Expr::Index { target, index } => {
            write_child(f, target, PREC_ATOM)?;
            write!(f, "[")?;
            write_expr(f, index)?;
            write!(f, "]")
        }
        Expr::Unary { op, operand } => match op {
            UnaryOp::Neg => {
                write!(f, "-")?;
                write_child(f, operand, PREC_UNARY)
            }
            UnaryOp::Pos => {
                write!(f, "+")?;
                write_child(f, operand, PREC_UNARY)
            }
            UnaryOp::Not => {
                write!(f, "not ")?;
                write_child(f, operand, PREC_NOT)
            }
        },
        Expr::Binary {
            op: BinOp::Pow,
            left,
            right,
        } => {
            write_child(f, left, PREC_ATOM)?;
            write!(f, " ** ")?;
            write_child(f, right, PREC_UNARY)
        }
        Expr::Binary { op, left, right } => {
            let p = binary_prec(*op);
            write_child(f, left, p)?;
            write!(f, " {} ", op.symbol())?;
            write_child(f, right, p + 1)
        }
        Expr::Compare { first, rest } => {
            write_child(f, first, PREC_COMPARE + 1)?;
            for (op, operand) in rest {
                write!(f, " {} ", op.symbol())?;
                write_child(f, operand, PREC_COMPARE + 1)?;
            }
            Ok(())
        }
        Expr::Logical { op, left, right } => {
            let (p, word) = match op {
                LogicalOp::And => (PREC_AND, "and"),
                LogicalOp::Or => (PREC_OR, "or"),
            };
            write_child(f, left, p)?;
            write!(f, " {} ", word)?;
            write_child(f, right, p + 1)
        }
        Expr::IfElse { cond, then, orelse } => {
            write_child(f, then, PREC_OR)?;
            write!(f, " if ")?;
            write_child(f, cond, PREC_OR)?;
            write!(f, " else ")?;
            write_child(f, orelse, PREC_IF_ELSE)
        }
    }
}

fn write_block(f: &mut impl Write, stmts: &[Stmt], depth: usize) -> fmt::Result {
    if stmts.is_empty() {
        return writeln!(f, "{}pass", INDENT.repeat(depth));
    }
    for stmt in stmts {
        write_stmt(f, stmt, depth)?;
    }
    Ok(())
}

fn write_stmt(f: &mut impl Write, stmt: &Stmt, depth: usize) -> fmt::Result {
    let pad = INDENT.repeat(depth);
    match &stmt.kind {
        StmtKind::Assign { target, value } => {
            write!(f, "{}{} = ", pad, target)?;
            write_expr(f, value)?;
            writeln!(f)
        }
        StmtKind::AugAssign { target, op, value } => {
            write!(f, "{}{} {}= ", pad, target, op.symbol())?;
            write_expr(f, value)?;
            writeln!(f)
        }
        StmtKind::If { branches, orelse } => {
            for (i, (cond, body)) in branches.iter().enumerate() {
                write!(f, "{}{} ", pad, if i == 0 { "if" } else { "elif" })?;
                write_expr(f, cond)?;
                writeln!(f, ":")?;
                write_block(f, body, depth + 1)?;
            }
            if let Some(body) = orelse {
                writeln!(f, "{}else:", pad)?;
                write_block(f, body, depth + 1)?;
            }
            Ok(())
        }
        StmtKind::Import { module, alias } => match alias {
            Some(alias) if alias != module => writeln!(f, "{}import {} as {}", pad, module, alias),
            _ => writeln!(f, "{}import {}", pad, module),
        },
        StmtKind::Pass => writeln!(f, "{}pass", pad),
        StmtKind::Expr(expr) => {
            write!(f, "{}", pad)?;
            write_expr(f, expr)?;
            writeln!(f)
        }
        StmtKind::Return(value) => {
            write!(f, "{}return", pad)?;
            if let Some(value) = value {
                write!(f, " ")?;
                write_expr(f, value)?;
            }
            writeln!(f)
        }
        StmtKind::Def { name, params, body } => {
            writeln!(f, "{}def {}({}):", pad, name, params.join(", "))?;
            write_block(f, body, depth + 1)
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_expr(f, self)
    }
}

impl fmt::Display for Stmt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write_stmt(f, self, 0)
    }
}

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for pragma in &self.pragmas {
            writeln!(f, "#pragma {}", pragma)?;
        }
        write_block_unpadded(f, &self.body)
    }
}

fn write_block_unpadded(f: &mut impl Write, stmts: &[Stmt]) -> fmt::Result {
    for stmt in stmts {
        write_stmt(f, stmt, 0)?;
    }
    Ok(())
}

/// 指定の深さでブロックを書き出す
pub fn render_block(stmts: &[Stmt], depth: usize) -> String {
    let mut out = String::new();
    // String への書き込みは失敗しない
    let _ = write_block(&mut out, stmts, depth);
    out
}
