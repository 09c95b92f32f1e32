//! The small expression AST the type checker/folder (C5) walks. Plan
//! generation proper is a non-goal collaborator (spec.md §1); this tree is
//! only as rich as the folding rules and scenarios in spec.md §4.5/§8
//! require.

use super::lattice::Tag;

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    /// SQL three-valued logic: `None` is UNKNOWN.
    Logical(Option<bool>),
    Integer(i32),
    Bigint(i64),
    Smallint(i16),
    Float(f32),
    Double(f64),
    Numeric { unscaled: i64, precision: u8, scale: u8 },
    Monetary(f64),
    Date(i32),
    Time(i32),
    Timestamp(i64),
    Datetime(i64),
    Char(String),
    Varchar(String),
    Bit(Vec<u8>),
    Varbit(Vec<u8>),
}

impl Literal {
    pub fn tag(&self) -> Tag {
        match self {
            Literal::Null => Tag::Null,
            Literal::Logical(_) => Tag::Logical,
            Literal::Integer(_) => Tag::Integer,
            Literal::Bigint(_) => Tag::Bigint,
            Literal::Smallint(_) => Tag::Smallint,
            Literal::Float(_) => Tag::Float,
            Literal::Double(_) => Tag::Double,
            Literal::Numeric { .. } => Tag::Numeric,
            Literal::Monetary(_) => Tag::Monetary,
            Literal::Date(_) => Tag::Date,
            Literal::Time(_) => Tag::Time,
            Literal::Timestamp(_) => Tag::Timestamp,
            Literal::Datetime(_) => Tag::Datetime,
            Literal::Char(_) => Tag::Char,
            Literal::Varchar(_) => Tag::Varchar,
            Literal::Bit(_) => Tag::Bit,
            Literal::Varbit(_) => Tag::Varbit,
        }
    }

    /// Renders the literal the way `alias_print` would for a folded
    /// constant — used only by tests comparing against spec.md §8's
    /// `alias_print == "1+2*3"` scenario, which checks the *pre-fold*
    /// text survives onto the replacement VALUE node, not this.
    pub fn display(&self) -> String {
        match self {
            Literal::Null => "NULL".to_string(),
            Literal::Logical(Some(true)) => "TRUE".to_string(),
            Literal::Logical(Some(false)) => "FALSE".to_string(),
            Literal::Logical(None) => "UNKNOWN".to_string(),
            Literal::Integer(v) => v.to_string(),
            Literal::Bigint(v) => v.to_string(),
            Literal::Smallint(v) => v.to_string(),
            Literal::Float(v) => v.to_string(),
            Literal::Double(v) => v.to_string(),
            Literal::Numeric { unscaled, .. } => unscaled.to_string(),
            Literal::Monetary(v) => v.to_string(),
            Literal::Date(v) => v.to_string(),
            Literal::Time(v) => v.to_string(),
            Literal::Timestamp(v) => v.to_string(),
            Literal::Datetime(v) => v.to_string(),
            Literal::Char(s) | Literal::Varchar(s) => s.clone(),
            Literal::Bit(b) | Literal::Varbit(b) => format!("{b:?}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Plus,
    Minus,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Xor,
    Concat,
}

impl BinaryOp {
    pub fn print(self) -> &'static str {
        match self {
            BinaryOp::Plus => "+",
            BinaryOp::Minus => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Eq => "=",
            BinaryOp::Ne => "<>",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::And => " and ",
            BinaryOp::Or => " or ",
            BinaryOp::Xor => " xor ",
            BinaryOp::Concat => "||",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, BinaryOp::And | BinaryOp::Or | BinaryOp::Xor)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
    IsNull,
    IsNotNull,
}

/// The canonical BETWEEN shape `between_to_comp`/`comp_to_between` convert
/// to and from (spec.md §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BetweenOp {
    GeLe,
    GeLt,
    GtLe,
    GtLt,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    /// Position is 1-based, matching the client-visible host-var ordinal.
    HostVar { position: usize },
    Column { name: String, ty: Tag },
    Unary { op: UnaryOp, operand: Box<Expr> },
    Binary { op: BinaryOp, left: Box<Expr>, right: Box<Expr> },
    Cast { to: Tag, expr: Box<Expr> },
    Case {
        operand: Option<Box<Expr>>,
        whens: Vec<(Expr, Expr)>,
        else_: Option<Box<Expr>>,
    },
    Between {
        expr: Box<Expr>,
        negated: bool,
        low: Box<Expr>,
        high: Box<Expr>,
    },
    /// `LIMIT n`, consumed by the pre-pass and never seen by the post-pass.
    Limit(Box<Expr>),
}

impl Expr {
    pub fn lit(l: Literal) -> Expr {
        Expr::Literal(l)
    }

    pub fn integer(v: i32) -> Expr {
        Expr::Literal(Literal::Integer(v))
    }

    /// Renders the expression the way the parser's `alias_print` would —
    /// used to prove a folded constant retains its original text (spec.md
    /// §8 scenario 3).
    pub fn print(&self) -> String {
        match self {
            Expr::Literal(l) => l.display(),
            Expr::HostVar { position } => format!("?{position}"),
            Expr::Column { name, .. } => name.clone(),
            Expr::Unary { op: UnaryOp::Not, operand } => format!("not {}", operand.print()),
            Expr::Unary { op: UnaryOp::Neg, operand } => format!("-{}", operand.print()),
            Expr::Unary { op: UnaryOp::IsNull, operand } => format!("{} is null", operand.print()),
            Expr::Unary { op: UnaryOp::IsNotNull, operand } => {
                format!("{} is not null", operand.print())
            }
            Expr::Binary { op, left, right } => {
                format!("{}{}{}", left.print(), op.print(), right.print())
            }
            Expr::Cast { expr, .. } => expr.print(),
            Expr::Case { .. } => "case".to_string(),
            Expr::Between { expr, negated, low, high } => format!(
                "{}{} between {} and {}",
                expr.print(),
                if *negated { " not" } else { "" },
                low.print(),
                high.print()
            ),
            Expr::Limit(n) => format!("limit {}", n.print()),
        }
    }
}
