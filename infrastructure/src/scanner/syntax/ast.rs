//! Syntax tree for Lua 5.4 chunks.
//!
//! Only what the passes need is kept: names, literal values, structure and
//! the line of every name, index and call.

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Block {
    pub stats: Vec<Stat>,
    pub ret: Option<ReturnStat>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReturnStat {
    pub exprs: Vec<Expr>,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stat {
    Local {
        names: Vec<String>,
        exprs: Vec<Expr>,
        line: u32,
    },
    LocalFunction {
        name: String,
        func: FuncBody,
    },
    Function {
        name: FuncName,
        func: FuncBody,
    },
    Assign {
        targets: Vec<Expr>,
        exprs: Vec<Expr>,
    },
    Call(Expr),
    Do(Block),
    While {
        cond: Expr,
        body: Block,
    },
    Repeat {
        body: Block,
        cond: Expr,
    },
    If {
        branches: Vec<(Expr, Block)>,
        otherwise: Option<Block>,
    },
    NumericFor {
        var: String,
        start: Expr,
        limit: Expr,
        step: Option<Expr>,
        body: Block,
    },
    GenericFor {
        vars: Vec<String>,
        exprs: Vec<Expr>,
        body: Block,
    },
    Goto(String),
    Label(String),
    Break,
}

/// `function a.b.c:m() ... end`: `path = [a, b, c]`, `method = Some(m)`.
#[derive(Debug, Clone, PartialEq)]
pub struct FuncName {
    pub path: Vec<String>,
    pub method: Option<String>,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FuncBody {
    pub params: Vec<String>,
    pub vararg: bool,
    pub body: Block,
    pub line: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Nil,
    True,
    False,
    Vararg,
    Int(i64),
    Float(f64),
    Str(String),
    Function(Box<FuncBody>),
    Table(Vec<Field>),
    Name {
        name: String,
        line: u32,
    },
    Index {
        object: Box<Expr>,
        key: Box<Expr>,
        line: u32,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        line: u32,
    },
    Method {
        object: Box<Expr>,
        method: String,
        args: Vec<Expr>,
        line: u32,
    },
    Paren(Box<Expr>),
    Binary {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    Unary {
        op: UnOp,
        operand: Box<Expr>,
    },
}

impl Expr {
    /// True for expressions that can produce more than one value.
    pub fn is_multi_valued(&self) -> bool {
        matches!(self, Expr::Call { .. } | Expr::Method { .. } | Expr::Vararg)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    /// `name = value`
    Named { key: String, value: Expr },
    /// `[key] = value`
    Keyed { key: Expr, value: Expr },
    Positional(Expr),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Or,
    And,
    Lt,
    Gt,
    Le,
    Ge,
    Ne,
    Eq,
    BOr,
    BXor,
    BAnd,
    Shl,
    Shr,
    Concat,
    Add,
    Sub,
    Mul,
    Div,
    IDiv,
    Mod,
    Pow,
}

impl BinOp {
    /// Left and right binding power.
    pub fn priority(self) -> (u8, u8) {
        match self {
            BinOp::Or => (1, 1),
            BinOp::And => (2, 2),
            BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge | BinOp::Ne | BinOp::Eq => (3, 3),
            BinOp::BOr => (4, 4),
            BinOp::BXor => (5, 5),
            BinOp::BAnd => (6, 6),
            BinOp::Shl | BinOp::Shr => (7, 7),
            BinOp::Concat => (9, 8),
            BinOp::Add | BinOp::Sub => (10, 10),
            BinOp::Mul | BinOp::Div | BinOp::IDiv | BinOp::Mod => (11, 11),
            BinOp::Pow => (14, 13),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
    Len,
    BNot,
}

/// Binding power of every unary operator.
pub const UNARY_PRIORITY: u8 = 12;
