use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    None,
    Bool(bool),
    Int(i64),
    Long(i64),
    Float(f64),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equal,
    NotEqual,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
    /// Membership, evaluated against the right operand.
    In,
    NotIn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Name(String),
    Tuple(Vec<Expr>),
    Attribute {
        object: Box<Expr>,
        name: String,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// `and` when `and` is true, `or` otherwise. Short-circuits.
    Logical {
        and: bool,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Lambda {
        params: Vec<String>,
        body: Arc<Expr>,
    },
}

impl Expr {
    /// Longest path from this node down to a leaf, counting both ends.
    pub fn height(&self) -> usize {
        let below = match self {
            Expr::Literal(_) | Expr::Name(_) => 0,
            Expr::Tuple(items) => items.iter().map(Expr::height).max().unwrap_or(0),
            Expr::Attribute { object, .. } | Expr::Unary { operand: object, .. } => object.height(),
            Expr::Call { callee, args } => args
                .iter()
                .map(Expr::height)
                .max()
                .unwrap_or(0)
                .max(callee.height()),
            Expr::Index { object: left, index: right }
            | Expr::Binary { left, right, .. }
            | Expr::Logical { left, right, .. } => left.height().max(right.height()),
            Expr::Lambda { body, .. } => body.height(),
        };
        below + 1
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssignTarget {
    Name(String),
    Attribute { object: Expr, name: String },
    Index { object: Expr, index: Expr },
}

/// Names requested by `from path import ...`.
#[derive(Debug, Clone, PartialEq)]
pub enum ImportNames {
    All,
    Listed(Vec<(String, Option<String>)>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr(Expr),
    Assign { target: AssignTarget, value: Expr },
    Import { path: String, alias: Option<String> },
    FromImport { path: String, names: ImportNames },
    Raise(Option<Expr>),
    Pass,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub line: usize,
    pub stmt: Stmt,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub statements: Vec<Statement>,
}
