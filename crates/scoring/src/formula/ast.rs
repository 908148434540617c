//! 行式・集計式の構文木

/// パース済みのプログラム
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub body: Vec<Stmt>,
    pub pragmas: Vec<String>,
}

impl Program {
    pub fn has_pragma(&self, name: &str) -> bool {
        self.pragmas.iter().any(|p| p == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    /// ソース上の行番号 (1 始まり)
    pub line: usize,
    pub kind: StmtKind,
}

impl Stmt {
    pub fn new(line: usize, kind: StmtKind) -> Self {
        Self { line, kind }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Assign {
        target: String,
        value: Expr,
    },
    AugAssign {
        target: String,
        op: BinOp,
        value: Expr,
    },
    If {
        branches: Vec<(Expr, Vec<Stmt>)>,
        orelse: Option<Vec<Stmt>>,
    },
    Import {
        module: String,
        alias: Option<String>,
    },
    Pass,
    Expr(Expr),
    /// 緩い方言のみ
    Return(Option<Expr>),
    /// 緩い方言のみ
    Def {
        name: String,
        params: Vec<String>,
        body: Vec<Stmt>,
    },
}

impl StmtKind {
    /// import で束縛される名前
    pub fn import_binding(&self) -> Option<&str> {
        match self {
            StmtKind::Import { module, alias } => Some(alias.as_deref().unwrap_or(module)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Bool(bool),
    Name(String),
    List(Vec<Expr>),
    /// `np.pi` のようなモジュール属性
    Attr {
        module: String,
        name: String,
    },
    Call {
        callee: Callee,
        args: Vec<Expr>,
    },
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `a < b <= c` の連鎖比較
    Compare {
        first: Box<Expr>,
        rest: Vec<(CmpOp, Expr)>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    IfElse {
        cond: Box<Expr>,
        then: Box<Expr>,
        orelse: Box<Expr>,
    },
}

impl Expr {
    /// 木の深さ。葉は 1。
    ///
    /// パーサーが深さを制限しているので再帰してよい。
    pub fn depth(&self) -> usize {
        let children = match self {
            Expr::Number(_) | Expr::Bool(_) | Expr::Name(_) | Expr::Attr { .. } => 0,
            Expr::List(items) | Expr::Call { args: items, .. } => {
                items.iter().map(Expr::depth).max().unwrap_or(0)
            }
            Expr::Index { target, index } => target.depth().max(index.depth()),
            Expr::Unary { operand, .. } => operand.depth(),
            Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
                left.depth().max(right.depth())
            }
            Expr::Compare { first, rest } => rest
                .iter()
                .map(|(_, e)| e.depth())
                .fold(first.depth(), usize::max),
            Expr::IfElse { cond, then, orelse } => {
                cond.depth().max(then.depth()).max(orelse.depth())
            }
        };
        children + 1
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Callee {
    Builtin(String),
    Module { module: String, name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Pos,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Pow,
    BitAnd,
    BitOr,
}

impl BinOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::FloorDiv => "//",
            BinOp::Mod => "%",
            BinOp::Pow => "**",
            BinOp::BitAnd => "&",
            BinOp::BitOr => "|",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }

    pub fn apply(&self, a: f64, b: f64) -> bool {
        match self {
            CmpOp::Eq => a == b,
            CmpOp::Ne => a != b,
            CmpOp::Lt => a < b,
            CmpOp::Le => a <= b,
            CmpOp::Gt => a > b,
            CmpOp::Ge => a >= b,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

/// 構文木を走査して式を訪問する
pub fn walk_exprs<'a>(stmts: &'a [Stmt], visit: &mut dyn FnMut(&'a Expr)) {
    for stmt in stmts {
        match &stmt.kind {
            StmtKind::Assign { value, .. } | StmtKind::AugAssign { value, .. } => {
                walk_expr(value, visit)
            }
            StmtKind::Expr(e) | StmtKind::Return(Some(e)) => walk_expr(e, visit),
            StmtKind::If { branches, orelse } => {
                for (cond, body) in branches {
                    walk_expr(cond, visit);
                    walk_exprs(body, visit);
                }
                if let Some(body) = orelse {
                    walk_exprs(body, visit);
                }
            }
            StmtKind::Def { body, .. } => walk_exprs(body, visit),
            StmtKind::Import { .. } | StmtKind::Pass | StmtKind::Return(None) => {}
        }
    }
}

pub fn walk_expr<'a>(expr: &'a Expr, visit: &mut dyn FnMut(&'a Expr)) {
    visit(expr);
    match expr {
        Expr::Number(_) | Expr::Bool(_) | Expr::Name(_) | Expr::Attr { .. } => {}
        Expr::List(items) => items.iter().for_each(|e| walk_expr(e, visit)),
        Expr::Call { args, .. } => args.iter().for_each(|e| walk_expr(e, visit)),
        Expr::Index { target, index } => {
            walk_expr(target, visit);
            walk_expr(index, visit);
        }
        Expr::Unary { operand, .. } => walk_expr(operand, visit),
        Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
            walk_expr(left, visit);
            walk_expr(right, visit);
        }
        Expr::Compare { first, rest } => {
            walk_expr(first, visit);
            rest.iter().for_each(|(_, e)| walk_expr(e, visit));
        }
        Expr::IfElse { cond, then, orelse } => {
            walk_expr(cond, visit);
            walk_expr(then, visit);
            walk_expr(orelse, visit);
        }
    }
}

/// 式を後順で書き換える
pub fn rewrite_expr(expr: Expr, f: &mut dyn FnMut(Expr) -> Expr) -> Expr {
    let rebuilt = match expr {
        Expr::List(items) => Expr::List(items.into_iter().map(|e| rewrite_expr(e, f)).collect()),
        Expr::Call { callee, args } => Expr::Call {
            callee,
            args: args.into_iter().map(|e| rewrite_expr(e, f)).collect(),
        },
        Expr::Index { target, index } => Expr::Index {
            target: Box::new(rewrite_expr(*target, f)),
            index: Box::new(rewrite_expr(*index, f)),
        },
        Expr::Unary { op, operand } => Expr::Unary {
            op,
            operand: Box::new(rewrite_expr(*operand, f)),
        },
        Expr::Binary { op, left, right } => Expr::Binary {
            op,
            left: Box::new(rewrite_expr(*left, f)),
            right: Box::new(rewrite_expr(*right, f)),
        },
        Expr::Logical { op, left, right } => Expr::Logical {
            op,
            left: Box::new(rewrite_expr(*left, f)),
            right: Box::new(rewrite_expr(*right, f)),
        },
        Expr::Compare { first, rest } => Expr::Compare {
            first: Box::new(rewrite_expr(*first, f)),
            rest: rest
                .into_iter()
                .map(|(op, e)| (op, rewrite_expr(e, f)))
                .collect(),
        },
        Expr::IfElse { cond, then, orelse } => Expr::IfElse {
            cond: Box::new(rewrite_expr(*cond, f)),
            then: Box::new(rewrite_expr(*then, f)),
            orelse: Box::new(rewrite_expr(*orelse, f)),
        },
        leaf => leaf,
    };
    f(rebuilt)
}

/// 文中のすべての式を書き換える
pub fn rewrite_stmts(stmts: Vec<Stmt>, f: &mut dyn FnMut(Expr) -> Expr) -> Vec<Stmt> {
    stmts
        .into_iter()
        .map(|stmt| {
            let kind = match stmt.kind {
                StmtKind::Assign { target, value } => StmtKind::Assign {
                    target,
                    value: rewrite_expr(value, f),
                },
                StmtKind::AugAssign { target, op, value } => StmtKind::AugAssign {
                    target,
                    op,
                    value: rewrite_expr(value, f),
                },
                StmtKind::Expr(e) => StmtKind::Expr(rewrite_expr(e, f)),
                StmtKind::Return(e) => StmtKind::Return(e.map(|e| rewrite_expr(e, f))),
                StmtKind::If { branches, orelse } => StmtKind::If {
                    branches: branches
                        .into_iter()
                        .map(|(cond, body)| (rewrite_expr(cond, f), rewrite_stmts(body, f)))
                        .collect(),
                    orelse: orelse.map(|body| rewrite_stmts(body, f)),
                },
                StmtKind::Def { name, params, body } => StmtKind::Def {
                    name,
                    params,
                    body: rewrite_stmts(body, f),
                },
                other => other,
            };
            Stmt::new(stmt.line, kind)
        })
        .collect()
}
