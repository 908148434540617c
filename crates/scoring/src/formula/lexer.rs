//! 行式 DSL の字句解析
//!
//! インデントでブロックを表すため、物理行ごとにインデント幅を測ってから
//! 行の中身を logos でトークン化する。括弧の内側と `\` による継続行は
//! 1 つの論理行にまとめる。

use logos::Logos;
use std::fmt;
use thiserror::Error;

/// タブは次の 4 桁境界まで進める
const TAB_WIDTH: usize = 4;

#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\f]+")]
pub enum Token {
    #[token("if")]
    If,
    #[token("elif")]
    Elif,
    #[token("else")]
    Else,
    #[token("and")]
    And,
    #[token("or")]
    Or,
    #[token("not")]
    Not,
    #[token("pass")]
    Pass,
    #[token("import")]
    Import,
    #[token("as")]
    As,
    #[token("def")]
    Def,
    #[token("return")]
    Return,
    #[token("True")]
    True,
    #[token("False")]
    False,

    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("**")]
    DoubleStar,
    #[token("/")]
    Slash,
    #[token("//")]
    DoubleSlash,
    #[token("%")]
    Percent,
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,

    #[token("=")]
    Assign,
    #[token("+=")]
    PlusAssign,
    #[token("-=")]
    MinusAssign,
    #[token("*=")]
    StarAssign,
    #[token("/=")]
    SlashAssign,

    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<")]
    Lt,
    #[token("<=")]
    Le,
    #[token(">")]
    Gt,
    #[token(">=")]
    Ge,

    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
    #[token(":")]
    Colon,
    #[token(".")]
    Dot,

    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    #[regex(r"([0-9]+(\.[0-9]*)?|\.[0-9]+)([eE][+-]?[0-9]+)?", |lex| lex.slice().parse::<f64>().ok())]
    Number(f64),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::If => write!(f, "if"),
            Token::Elif => write!(f, "elif"),
            Token::Else => write!(f, "else"),
            Token::And => write!(f, "and"),
            Token::Or => write!(f, "or"),
            Token::Not => write!(f, "not"),
            Token::Pass => write!(f, "pass"),
            Token::Import => write!(f, "import"),
            Token::As => write!(f, "as"),
            Token::Def => write!(f, "def"),
            Token::Return => write!(f, "return"),
            Token::True => write!(f, "True"),
            Token::False => write!(f, "False"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::DoubleStar => write!(f, "**"),
            Token::Slash => write!(f, "/"),
            Token::DoubleSlash => write!(f, "//"),
            Token::Percent => write!(f, "%"),
            Token::Amp => write!(f, "&"),
            Token::Pipe => write!(f, "|"),
            Token::Assign => write!(f, "="),
            Token::PlusAssign => write!(f, "+="),
            Token::MinusAssign => write!(f, "-="),
            Token::StarAssign => write!(f, "*="),
            Token::SlashAssign => write!(f, "/="),
            Token::EqEq => write!(f, "=="),
            Token::NotEq => write!(f, "!="),
            Token::Lt => write!(f, "<"),
            Token::Le => write!(f, "<="),
            Token::Gt => write!(f, ">"),
            Token::Ge => write!(f, ">="),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Comma => write!(f, ","),
            Token::Colon => write!(f, ":"),
            Token::Dot => write!(f, "."),
            Token::Ident(s) => write!(f, "{}", s),
            Token::Number(n) => write!(f, "{}", n),
        }
    }
}

/// 論理行
#[derive(Debug, Clone, PartialEq)]
pub struct Line {
    /// 開始行番号 (1 始まり)
    pub number: usize,
    pub indent: usize,
    pub tokens: Vec<Token>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct LexedSource {
    pub lines: Vec<Line>,
    /// `#pragma <name>` コメントで宣言された名前
    pub pragmas: Vec<String>,
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("line {line}: {message}")]
pub struct LexError {
    pub line: usize,
    pub message: String,
}

fn measure_indent(raw: &str) -> usize {
    let mut width = 0;
    for c in raw.chars() {
        match c {
            ' ' => width += 1,
            '\t' => width = (width / TAB_WIDTH + 1) * TAB_WIDTH,
            _ => break,
        }
    }
    width
}

/// `#` 以降をコメントとして切り離す。DSL に文字列リテラルは無い。
fn split_comment(raw: &str) -> (&str, Option<&str>) {
    match raw.find('#') {
        Some(pos) => (&raw[..pos], Some(&raw[pos + 1..])),
        None => (raw, None),
    }
}

fn pragma_name(comment: &str) -> Option<String> {
    let rest = comment.trim().strip_prefix("pragma")?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let name = rest.trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

fn lex_fragment(fragment: &str, line: usize) -> Result<Vec<Token>, LexError> {
    let mut tokens = Vec::new();
    let mut lexer = Token::lexer(fragment);
    while let Some(result) = lexer.next() {
        match result {
            Ok(token) => tokens.push(token),
            Err(_) => {
                return Err(LexError {
                    line,
                    message: format!("unexpected input '{}'", lexer.slice()),
                });
            }
        }
    }
    Ok(tokens)
}

fn bracket_delta(tokens: &[Token]) -> isize {
    tokens
        .iter()
        .map(|t| match t {
            Token::LParen | Token::LBracket => 1,
            Token::RParen | Token::RBracket => -1,
            _ => 0,
        })
        .sum()
}

/// ソース全体を論理行に分割してトークン化する
pub fn tokenize(source: &str) -> Result<LexedSource, LexError> {
    let mut out = LexedSource::default();
    let mut pending: Option<Line> = None;
    let mut depth: isize = 0;
    let mut backslash = false;

    for (idx, raw) in source.lines().enumerate() {
        let number = idx + 1;
        let (code, comment) = split_comment(raw);
        if let Some(name) = comment.and_then(pragma_name) {
            out.pragmas.push(name);
        }

        let mut code = code.trim_end();
        let continues_with_backslash = code.ends_with('\\');
        if continues_with_backslash {
            code = code[..code.len() - 1].trim_end();
        }

        let tokens = lex_fragment(code, number)?;
        depth += bracket_delta(&tokens);
        if depth < 0 {
            return Err(LexError {
                line: number,
                message: "unmatched closing bracket".to_string(),
            });
        }

        match pending.as_mut() {
            Some(line) if depth > 0 || backslash || !tokens.is_empty() => {
                line.tokens.extend(tokens);
            }
            Some(_) => {}
            None => {
                if tokens.is_empty() {
                    if continues_with_backslash {
                        return Err(LexError {
                            line: number,
                            message: "line continuation on an empty line".to_string(),
                        });
                    }
                    continue;
                }
                pending = Some(Line {
                    number,
                    indent: measure_indent(raw),
                    tokens,
                });
            }
        }

        backslash = continues_with_backslash;
        if depth == 0
            && !backslash
            && let Some(line) = pending.take()
        {
            out.lines.push(line);
        }
    }

    if let Some(line) = pending {
        return Err(LexError {
            line: line.number,
            message: if depth > 0 {
                "unclosed bracket".to_string()
            } else {
                "unexpected end of input after line continuation".to_string()
            },
        });
    }

    Ok(out)
}
