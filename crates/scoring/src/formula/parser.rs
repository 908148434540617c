//! 行式 DSL の構文解析
//!
//! 2 つの方言を扱う。
//! - `Formula`: 実行される行式・集計式。関数定義と return を持たない。
//! - `Loose`: 正規化前の貼り付けコード。単一の関数定義と return を許す。

use super::ast::*;
use super::lexer::{Line, Token, tokenize};
use thiserror::Error;

/// import を許可するモジュール
pub const ALLOWED_MODULES: [&str; 2] = ["numpy", "math"];

/// 括弧・単項演算子・ブロックの入れ子の上限
pub const MAX_NESTING: usize = 64;

/// `a + b + c ...` のような連鎖も含めた式の木の深さの上限
pub const MAX_EXPR_DEPTH: usize = 128;

/// 識別子として字句解析されるが DSL では扱わない構文
const UNSUPPORTED: [&str; 19] = [
    "for", "while", "lambda", "class", "try", "except", "finally", "with", "del", "global",
    "nonlocal", "from", "yield", "raise", "assert", "break", "continue", "async", "await",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Formula,
    Loose,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("line {line}: {message}")]
pub struct SyntaxError {
    pub line: usize,
    pub message: String,
}

impl SyntaxError {
    fn new(line: usize, message: impl Into<String>) -> Self {
        Self {
            line,
            message: message.into(),
        }
    }
}

pub fn parse_formula(source: &str) -> Result<Program, SyntaxError> {
    parse(source, Dialect::Formula)
}

pub fn parse_loose(source: &str) -> Result<Program, SyntaxError> {
    parse(source, Dialect::Loose)
}

pub fn parse(source: &str, dialect: Dialect) -> Result<Program, SyntaxError> {
    let lexed = tokenize(source).map_err(|e| SyntaxError::new(e.line, e.message))?;
    let base = match (dialect, lexed.lines.first()) {
        (Dialect::Loose, Some(first)) => first.indent,
        _ => 0,
    };
    let mut parser = Parser {
        lines: lexed.lines,
        pos: 0,
        dialect,
        blocks: 0,
    };
    let body = parser.parse_block(base)?;
    if let Some(line) = parser.lines.get(parser.pos) {
        return Err(SyntaxError::new(
            line.number,
            "unindent does not match any outer indentation level",
        ));
    }
    Ok(Program {
        body,
        pragmas: lexed.pragmas,
    })
}

#[derive(Clone, Copy)]
enum Clause {
    Elif,
    Else,
}

struct Parser {
    lines: Vec<Line>,
    pos: usize,
    dialect: Dialect,
    /// 入れ子になったブロックの数
    blocks: usize,
}

impl Parser {
    fn parse_block(&mut self, indent: usize) -> Result<Vec<Stmt>, SyntaxError> {
        let mut body = Vec::new();
        while let Some(line) = self.lines.get(self.pos) {
            let (line_indent, number) = (line.indent, line.number);
            if line_indent < indent {
                break;
            }
            if line_indent > indent {
                return Err(SyntaxError::new(number, "unexpected indent"));
            }
            body.push(self.parse_statement()?);
        }
        Ok(body)
    }

    fn next_line(&mut self) -> Line {
        let line = self.lines[self.pos].clone();
        self.pos += 1;
        line
    }

    fn parse_statement(&mut self) -> Result<Stmt, SyntaxError> {
        let line = self.next_line();
        let mut cur = Cursor::new(&line.tokens, line.number);
        match cur.peek() {
            Some(Token::If) => {
                cur.advance();
                self.parse_if(line.indent, cur)
            }
            Some(tok @ (Token::Elif | Token::Else)) => Err(cur.error(format!(
                "'{}' without a matching 'if'",
                tok
            ))),
            Some(Token::Def) => {
                cur.advance();
                self.parse_def(line.indent, cur)
            }
            _ => {
                let kind = self.parse_simple(&mut cur)?;
                Ok(Stmt::new(line.number, kind))
            }
        }
    }

    fn peek_clause(&self, indent: usize) -> Option<Clause> {
        let line = self.lines.get(self.pos)?;
        if line.indent != indent {
            return None;
        }
        match line.tokens.first() {
            Some(Token::Elif) => Some(Clause::Elif),
            Some(Token::Else) => Some(Clause::Else),
            _ => None,
        }
    }

    fn parse_if(&mut self, indent: usize, mut cur: Cursor<'_>) -> Result<Stmt, SyntaxError> {
        let number = cur.line;
        let cond = cur.expr()?;
        cur.expect(&Token::Colon)?;
        let body = self.parse_suite(indent, &mut cur)?;
        let mut branches = vec![(cond, body)];
        let mut orelse = None;

        while let Some(clause) = self.peek_clause(indent) {
            let line = self.next_line();
            let mut cur = Cursor::new(&line.tokens, line.number);
            cur.advance();
            match clause {
                Clause::Elif => {
                    let cond = cur.expr()?;
                    cur.expect(&Token::Colon)?;
                    let body = self.parse_suite(indent, &mut cur)?;
                    branches.push((cond, body));
                }
                Clause::Else => {
                    cur.expect(&Token::Colon)?;
                    orelse = Some(self.parse_suite(indent, &mut cur)?);
                    break;
                }
            }
        }

        Ok(Stmt::new(number, StmtKind::If { branches, orelse }))
    }

    fn parse_def(&mut self, indent: usize, mut cur: Cursor<'_>) -> Result<Stmt, SyntaxError> {
        let number = cur.line;
        if self.dialect == Dialect::Formula {
            return Err(cur.error("function definitions are not allowed in a formula"));
        }
        let name = cur.ident()?;
        cur.expect(&Token::LParen)?;
        let mut params = Vec::new();
        while !cur.eat(&Token::RParen) {
            params.push(cur.ident()?);
            // 型注釈と既定値は読み捨てる
            if cur.eat(&Token::Colon) {
                cur.expr()?;
            }
            if cur.eat(&Token::Assign) {
                cur.expr()?;
            }
            if !cur.eat(&Token::Comma) {
                cur.expect(&Token::RParen)?;
                break;
            }
        }
        if cur.peek() == Some(&Token::Minus) && cur.peek_at(1) == Some(&Token::Gt) {
            cur.advance();
            cur.advance();
            cur.expr()?;
        }
        cur.expect(&Token::Colon)?;
        let body = self.parse_suite(indent, &mut cur)?;
        Ok(Stmt::new(number, StmtKind::Def { name, params, body }))
    }

    /// `:` の後に続く本体。同じ行の単文か、より深いインデントのブロック。
    fn parse_suite(&mut self, indent: usize, cur: &mut Cursor<'_>) -> Result<Vec<Stmt>, SyntaxError> {
        if !cur.at_end() {
            let kind = self.parse_simple(cur)?;
            return Ok(vec![Stmt::new(cur.line, kind)]);
        }
        match self.lines.get(self.pos) {
            Some(next) if next.indent > indent => {
                let inner = next.indent;
                if self.blocks >= MAX_NESTING {
                    return Err(cur.error(format!(
                        "blocks nested deeper than {} levels",
                        MAX_NESTING
                    )));
                }
                self.blocks += 1;
                let body = self.parse_block(inner);
                self.blocks -= 1;
                body
            }
            _ => Err(cur.error("expected an indented block")),
        }
    }

    fn parse_simple(&self, cur: &mut Cursor<'_>) -> Result<StmtKind, SyntaxError> {
        let kind = match cur.peek() {
            Some(Token::Pass) => {
                cur.advance();
                StmtKind::Pass
            }
            Some(Token::Import) => {
                cur.advance();
                let module = cur.ident()?;
                if cur.peek() == Some(&Token::Dot) {
                    return Err(cur.error("submodule imports are not supported"));
                }
                if !ALLOWED_MODULES.contains(&module.as_str()) {
                    return Err(cur.error(format!("module '{}' is not allowed", module)));
                }
                let alias = if cur.eat(&Token::As) {
                    Some(cur.ident()?)
                } else {
                    None
                };
                StmtKind::Import { module, alias }
            }
            Some(Token::Return) => {
                if self.dialect == Dialect::Formula {
                    return Err(cur.error("'return' is not allowed in a formula"));
                }
                cur.advance();
                if cur.at_end() {
                    StmtKind::Return(None)
                } else {
                    StmtKind::Return(Some(cur.expr()?))
                }
            }
            Some(tok @ (Token::If | Token::Elif | Token::Else | Token::Def)) => {
                return Err(cur.error(format!("'{}' must start its own line", tok)));
            }
            Some(Token::Ident(name)) if UNSUPPORTED.contains(&name.as_str()) => {
                return Err(cur.error(format!("unsupported statement '{}'", name)));
            }
            Some(Token::Ident(name)) if cur.peek_at(1).and_then(assign_op).is_some() => {
                let target = name.clone();
                cur.advance();
                let op = cur.advance().and_then(assign_op).flatten();
                let value = cur.expr()?;
                match op {
                    None => StmtKind::Assign { target, value },
                    Some(op) => StmtKind::AugAssign { target, op, value },
                }
            }
            _ => {
                let expr = cur.expr()?;
                if cur.peek().and_then(assign_op).is_some() {
                    return Err(cur.error("assignment target must be a plain name"));
                }
                StmtKind::Expr(expr)
            }
        };
        cur.expect_end()?;
        Ok(kind)
    }
}

/// 代入演算子。`Some(None)` は単純代入。
fn assign_op(token: &Token) -> Option<Option<BinOp>> {
    match token {
        Token::Assign => Some(None),
        Token::PlusAssign => Some(Some(BinOp::Add)),
        Token::MinusAssign => Some(Some(BinOp::Sub)),
        Token::StarAssign => Some(Some(BinOp::Mul)),
        Token::SlashAssign => Some(Some(BinOp::Div)),
        _ => None,
    }
}

fn compare_op(token: &Token) -> Option<CmpOp> {
    match token {
        Token::EqEq => Some(CmpOp::Eq),
        Token::NotEq => Some(CmpOp::Ne),
        Token::Lt => Some(CmpOp::Lt),
        Token::Le => Some(CmpOp::Le),
        Token::Gt => Some(CmpOp::Gt),
        Token::Ge => Some(CmpOp::Ge),
        _ => None,
    }
}

struct Cursor<'a> {
    tokens: &'a [Token],
    pos: usize,
    line: usize,
    /// 式の再帰の深さ
    nesting: usize,
}

impl<'a> Cursor<'a> {
    fn new(tokens: &'a [Token], line: usize) -> Self {
        Self {
            tokens,
            pos: 0,
            line,
            nesting: 0,
        }
    }

    fn peek(&self) -> Option<&'a Token> {
        self.tokens.get(self.pos)
    }

    fn peek_at(&self, n: usize) -> Option<&'a Token> {
        self.tokens.get(self.pos + n)
    }

    fn advance(&mut self) -> Option<&'a Token> {
        let token = self.tokens.get(self.pos);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError::new(self.line, message)
    }

    fn unexpected(&self) -> SyntaxError {
        match self.peek() {
            Some(token) => self.error(format!("unexpected token '{}'", token)),
            None => self.error("unexpected end of line"),
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<(), SyntaxError> {
        if self.eat(expected) {
            Ok(())
        } else {
            match self.peek() {
                Some(found) => Err(self.error(format!("expected '{}', found '{}'", expected, found))),
                None => Err(self.error(format!("expected '{}' at end of line", expected))),
            }
        }
    }

    fn expect_end(&self) -> Result<(), SyntaxError> {
        if self.at_end() {
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    /// 入れ子を 1 段数えて `f` を呼ぶ
    fn nested<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> Result<T, SyntaxError>,
    ) -> Result<T, SyntaxError> {
        if self.nesting >= MAX_NESTING {
            return Err(self.error(format!(
                "expression nested deeper than {} levels",
                MAX_NESTING
            )));
        }
        self.nesting += 1;
        let result = f(self);
        self.nesting -= 1;
        result
    }

    /// 連鎖で伸びた木の深さを確かめる
    fn check_depth(&self, depth: usize) -> Result<usize, SyntaxError> {
        if depth > MAX_EXPR_DEPTH {
            Err(self.error(format!(
                "expression deeper than {} levels",
                MAX_EXPR_DEPTH
            )))
        } else {
            Ok(depth)
        }
    }

    fn ident(&mut self) -> Result<String, SyntaxError> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                self.pos += 1;
                Ok(name.clone())
            }
            _ => Err(match self.peek() {
                Some(token) => self.error(format!("expected a name, found '{}'", token)),
                None => self.error("expected a name at end of line"),
            }),
        }
    }

    // ==================== 式 ====================
    // 優先順位（低い順）:
    // 条件式 < or < and < not < 比較 < | < & < +,- < *,/,//,% < 単項 < ** < 後置

    fn expr(&mut self) -> Result<Expr, SyntaxError> {
        let then = self.or_test()?;
        if self.eat(&Token::If) {
            let cond = self.or_test()?;
            self.expect(&Token::Else)?;
            let orelse = self.nested(Self::expr)?;
            return Ok(Expr::IfElse {
                cond: Box::new(cond),
                then: Box::new(then),
                orelse: Box::new(orelse),
            });
        }
        Ok(then)
    }

    fn or_test(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.and_test()?;
        let mut depth = left.depth();
        while self.eat(&Token::Or) {
            let right = self.and_test()?;
            depth = self.check_depth(depth.max(right.depth()) + 1)?;
            left = Expr::Logical {
                op: LogicalOp::Or,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn and_test(&mut self) -> Result<Expr, SyntaxError> {
        let mut left = self.not_test()?;
        let mut depth = left.depth();
        while self.eat(&Token::And) {
            let right = self.not_test()?;
            depth = self.check_depth(depth.max(right.depth()) + 1)?;
            left = Expr::Logical {
                op: LogicalOp::And,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn not_test(&mut self) -> Result<Expr, SyntaxError> {
        if self.eat(&Token::Not) {
            let operand = self.nested(Self::not_test)?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> Result<Expr, SyntaxError> {
        let first = self.bit_or()?;
        let mut rest = Vec::new();
        while let Some(op) = self.peek().and_then(compare_op) {
            self.pos += 1;
            rest.push((op, self.bit_or()?));
        }
        if rest.is_empty() {
            Ok(first)
        } else {
            Ok(Expr::Compare {
                first: Box::new(first),
                rest,
            })
        }
    }

    fn binary_level(
        &mut self,
        ops: &[(Token, BinOp)],
        next: fn(&mut Self) -> Result<Expr, SyntaxError>,
    ) -> Result<Expr, SyntaxError> {
        let mut left = next(self)?;
        let mut depth = left.depth();
        'outer: loop {
            for (token, op) in ops {
                if self.eat(token) {
                    let right = next(self)?;
                    depth = self.check_depth(depth.max(right.depth()) + 1)?;
                    left = Expr::Binary {
                        op: *op,
                        left: Box::new(left),
                        right: Box::new(right),
                    };
                    continue 'outer;
                }
            }
            return Ok(left);
        }
    }

    fn bit_or(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_level(&[(Token::Pipe, BinOp::BitOr)], Self::bit_and)
    }

    fn bit_and(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_level(&[(Token::Amp, BinOp::BitAnd)], Self::arith)
    }

    fn arith(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_level(
            &[(Token::Plus, BinOp::Add), (Token::Minus, BinOp::Sub)],
            Self::term,
        )
    }

    fn term(&mut self) -> Result<Expr, SyntaxError> {
        self.binary_level(
            &[
                (Token::Star, BinOp::Mul),
                (Token::Slash, BinOp::Div),
                (Token::DoubleSlash, BinOp::FloorDiv),
                (Token::Percent, BinOp::Mod),
            ],
            Self::factor,
        )
    }

    fn factor(&mut self) -> Result<Expr, SyntaxError> {
        let op = match self.peek() {
            Some(Token::Minus) => UnaryOp::Neg,
            Some(Token::Plus) => UnaryOp::Pos,
            _ => return self.power(),
        };
        self.pos += 1;
        let operand = self.nested(Self::factor)?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn power(&mut self) -> Result<Expr, SyntaxError> {
        let base = self.postfix()?;
        if self.eat(&Token::DoubleStar) {
            // 右結合。指数側は単項演算子を許す。
            let exponent = self.nested(Self::factor)?;
            return Ok(Expr::Binary {
                op: BinOp::Pow,
                left: Box::new(base),
                right: Box::new(exponent),
            });
        }
        Ok(base)
    }

    fn postfix(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.atom()?;
        let mut depth = expr.depth();
        while self.eat(&Token::LBracket) {
            let index = self.nested(Self::expr)?;
            self.expect(&Token::RBracket)?;
            depth = self.check_depth(depth.max(index.depth()) + 1)?;
            expr = Expr::Index {
                target: Box::new(expr),
                index: Box::new(index),
            };
        }
        Ok(expr)
    }

    fn atom(&mut self) -> Result<Expr, SyntaxError> {
        let Some(token) = self.peek() else {
            return Err(self.unexpected());
        };
        match token {
            Token::Number(n) => {
                self.pos += 1;
                Ok(Expr::Number(*n))
            }
            Token::True => {
                self.pos += 1;
                Ok(Expr::Bool(true))
            }
            Token::False => {
                self.pos += 1;
                Ok(Expr::Bool(false))
            }
            Token::Ident(name) => {
                if UNSUPPORTED.contains(&name.as_str()) {
                    return Err(self.error(format!("unsupported syntax '{}'", name)));
                }
                self.pos += 1;
                if self.eat(&Token::Dot) {
                    let attr = self.ident()?;
                    if self.eat(&Token::LParen) {
                        let args = self.call_args()?;
                        return Ok(Expr::Call {
                            callee: Callee::Module {
                                module: name.clone(),
                                name: attr,
                            },
                            args,
                        });
                    }
                    return Ok(Expr::Attr {
                        module: name.clone(),
                        name: attr,
                    });
                }
                if self.eat(&Token::LParen) {
                    let args = self.call_args()?;
                    return Ok(Expr::Call {
                        callee: Callee::Builtin(name.clone()),
                        args,
                    });
                }
                Ok(Expr::Name(name.clone()))
            }
            Token::LParen => {
                self.pos += 1;
                let inner = self.nested(Self::expr)?;
                if self.peek() == Some(&Token::Comma) {
                    return Err(self.error("tuples are not supported"));
                }
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Token::LBracket => {
                self.pos += 1;
                let items = self.nested(|cur| cur.sequence(&Token::RBracket))?;
                Ok(Expr::List(items))
            }
            _ => Err(self.unexpected()),
        }
    }

    fn call_args(&mut self) -> Result<Vec<Expr>, SyntaxError> {
        self.nested(|cur| cur.sequence(&Token::RParen))
    }

    /// 閉じ括弧までのカンマ区切り。末尾カンマを許す。
    fn sequence(&mut self, close: &Token) -> Result<Vec<Expr>, SyntaxError> {
        let mut items = Vec::new();
        loop {
            if self.eat(close) {
                return Ok(items);
            }
            if matches!(self.peek(), Some(Token::Ident(_))) && self.peek_at(1) == Some(&Token::Assign)
            {
                return Err(self.error("keyword arguments are not supported"));
            }
            items.push(self.expr()?);
            if !self.eat(&Token::Comma) {
                self.expect(close)?;
                return Ok(items);
            }
        }
    }
}
