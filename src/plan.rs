//! `PlanExecutor`: the seam standing in for plan generation and bytecode
//! execution, a non-goal collaborator (spec.md §1). A real build compiles
//! a XASL stream and runs it against the storage engine; this crate only
//! needs enough of that boundary to drive spec.md §8's end-to-end
//! scenarios (literal arithmetic, single-table projection, `?`-parameter
//! substitution) through the rest of the request path.

use crate::error::{Result, ServerError};
use crate::typecheck::{BetweenOp, BinaryOp, Expr, Literal, UnaryOp};

pub type Row = Vec<Literal>;

/// A literal in-memory base table a plan scans, column-major name list
/// plus row-major data.
#[derive(Debug, Clone, Default)]
pub struct TableSource {
    pub columns: Vec<String>,
    pub rows: Vec<Row>,
}

/// The minimal shape of a compiled plan this crate executes: a select
/// list evaluated against every row of an optional source (no source
/// means a single constant row, e.g. `SELECT 1+2*3`).
#[derive(Debug, Clone, Default)]
pub struct Plan {
    pub select_list: Vec<Expr>,
    pub source: Option<TableSource>,
}

/// The boundary a real build would cross into the storage/execution
/// engine. `InMemoryExecutor` is the only implementation here; a
/// production server would supply one that runs actual XASL bytecode.
pub trait PlanExecutor: Send + Sync {
    fn execute(&self, plan: &Plan, host_vars: &[Literal]) -> Result<Vec<Row>>;
}

#[derive(Debug, Default)]
pub struct InMemoryExecutor;

impl PlanExecutor for InMemoryExecutor {
    fn execute(&self, plan: &Plan, host_vars: &[Literal]) -> Result<Vec<Row>> {
        match &plan.source {
            None => {
                let row = eval_list(&plan.select_list, &[], &[], host_vars)?;
                Ok(vec![row])
            }
            Some(src) => src
                .rows
                .iter()
                .map(|row| eval_list(&plan.select_list, &src.columns, row, host_vars))
                .collect(),
        }
    }
}

fn eval_list(
    exprs: &[Expr],
    columns: &[String],
    row: &[Literal],
    host_vars: &[Literal],
) -> Result<Row> {
    exprs.iter().map(|e| eval(e, columns, row, host_vars)).collect()
}

fn eval(expr: &Expr, columns: &[String], row: &[Literal], host_vars: &[Literal]) -> Result<Literal> {
    match expr {
        Expr::Literal(l) => Ok(l.clone()),
        Expr::HostVar { position } => host_vars
            .get(position - 1)
            .cloned()
            .ok_or(ServerError::IncorrectHostvarCount { expected: *position, got: host_vars.len() }),
        Expr::Column { name, .. } => {
            let idx = columns
                .iter()
                .position(|c| c == name)
                .ok_or_else(|| ServerError::Semantic(format!("unknown column '{name}'")))?;
            row.get(idx).cloned().ok_or_else(|| ServerError::Semantic(format!("column '{name}' out of range")))
        }
        Expr::Unary { op, operand } => {
            let v = eval(operand, columns, row, host_vars)?;
            eval_unary(*op, v)
        }
        Expr::Binary { op, left, right } => {
            let l = eval(left, columns, row, host_vars)?;
            let r = eval(right, columns, row, host_vars)?;
            eval_binary(*op, l, r)
        }
        Expr::Cast { expr, .. } => eval(expr, columns, row, host_vars),
        Expr::Case { operand, whens, else_ } => {
            let selector = match operand {
                Some(e) => Some(eval(e, columns, row, host_vars)?),
                None => None,
            };
            for (when, then) in whens {
                let matched = match &selector {
                    Some(sel) => {
                        let w = eval(when, columns, row, host_vars)?;
                        values_equal(sel, &w)
                    }
                    None => matches!(eval(when, columns, row, host_vars)?, Literal::Logical(Some(true))),
                };
                if matched {
                    return eval(then, columns, row, host_vars);
                }
            }
            match else_ {
                Some(e) => eval(e, columns, row, host_vars),
                None => Ok(Literal::Null),
            }
        }
        Expr::Between { expr, negated, low, high } => {
            let v = eval(expr, columns, row, host_vars)?;
            let l = eval(low, columns, row, host_vars)?;
            let h = eval(high, columns, row, host_vars)?;
            let (lo_op, hi_op) = crate::typecheck::fold::between_to_comp(BetweenOp::GeLe);
            let ge = eval_binary(lo_op, v.clone(), l)?;
            let le = eval_binary(hi_op, v, h)?;
            let both = eval_binary(BinaryOp::And, ge, le)?;
            if *negated { eval_unary(UnaryOp::Not, both) } else { Ok(both) }
        }
        Expr::Limit(_) => Err(ServerError::Semantic("LIMIT must be rewritten before execution".into())),
    }
}

fn as_f64(v: &Literal) -> Option<f64> {
    match v {
        Literal::Integer(n) => Some(*n as f64),
        Literal::Bigint(n) => Some(*n as f64),
        Literal::Smallint(n) => Some(*n as f64),
        Literal::Float(n) => Some(*n as f64),
        Literal::Double(n) => Some(*n),
        Literal::Monetary(n) => Some(*n),
        Literal::Numeric { unscaled, scale, .. } => Some(*unscaled as f64 / 10f64.powi(*scale as i32)),
        _ => None,
    }
}

fn values_equal(a: &Literal, b: &Literal) -> bool {
    match (as_f64(a), as_f64(b)) {
        (Some(x), Some(y)) => x == y,
        _ => a == b,
    }
}

fn eval_unary(op: UnaryOp, v: Literal) -> Result<Literal> {
    match op {
        UnaryOp::Not => match v {
            Literal::Logical(b) => Ok(Literal::Logical(b.map(|x| !x))),
            Literal::Null => Ok(Literal::Null),
            other => Err(ServerError::IncompatibleDatatype { from: format!("{other:?}"), to: "LOGICAL".into() }),
        },
        UnaryOp::Neg => match v {
            Literal::Integer(n) => Ok(Literal::Integer(-n)),
            Literal::Bigint(n) => Ok(Literal::Bigint(-n)),
            Literal::Smallint(n) => Ok(Literal::Smallint(-n)),
            Literal::Float(n) => Ok(Literal::Float(-n)),
            Literal::Double(n) => Ok(Literal::Double(-n)),
            Literal::Monetary(n) => Ok(Literal::Monetary(-n)),
            Literal::Null => Ok(Literal::Null),
            other => Err(ServerError::IncompatibleDatatype { from: format!("{other:?}"), to: "numeric".into() }),
        },
        UnaryOp::IsNull => Ok(Literal::Logical(Some(matches!(v, Literal::Null)))),
        UnaryOp::IsNotNull => Ok(Literal::Logical(Some(!matches!(v, Literal::Null)))),
    }
}

fn eval_binary(op: BinaryOp, l: Literal, r: Literal) -> Result<Literal> {
    if op.is_logical() {
        return eval_logical(op, l, r);
    }
    if matches!(l, Literal::Null) || matches!(r, Literal::Null) {
        return Ok(if op.is_comparison() { Literal::Logical(None) } else { Literal::Null });
    }
    if op.is_comparison() {
        return eval_comparison(op, &l, &r);
    }
    if op == BinaryOp::Concat {
        return eval_concat(l, r);
    }
    eval_arithmetic(op, l, r)
}

fn eval_logical(op: BinaryOp, l: Literal, r: Literal) -> Result<Literal> {
    let lb = as_tribool(&l)?;
    let rb = as_tribool(&r)?;
    let out = match op {
        BinaryOp::And => match (lb, rb) {
            (Some(false), _) | (_, Some(false)) => Some(false),
            (Some(true), Some(true)) => Some(true),
            _ => None,
        },
        BinaryOp::Or => match (lb, rb) {
            (Some(true), _) | (_, Some(true)) => Some(true),
            (Some(false), Some(false)) => Some(false),
            _ => None,
        },
        BinaryOp::Xor => match (lb, rb) {
            (Some(a), Some(b)) => Some(a != b),
            _ => None,
        },
        _ => unreachable!("eval_logical called with non-logical op"),
    };
    Ok(Literal::Logical(out))
}

fn as_tribool(v: &Literal) -> Result<Option<bool>> {
    match v {
        Literal::Logical(b) => Ok(*b),
        Literal::Null => Ok(None),
        other => Err(ServerError::IncompatibleDatatype { from: format!("{other:?}"), to: "LOGICAL".into() }),
    }
}

fn eval_comparison(op: BinaryOp, l: &Literal, r: &Literal) -> Result<Literal> {
    let ord = match (as_f64(l), as_f64(r)) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        _ => {
            let a = l.display();
            let b = r.display();
            Some(a.cmp(&b))
        }
    };
    let Some(ord) = ord else { return Ok(Literal::Logical(None)) };
    let result = match op {
        BinaryOp::Eq => ord.is_eq(),
        BinaryOp::Ne => !ord.is_eq(),
        BinaryOp::Lt => ord.is_lt(),
        BinaryOp::Le => ord.is_le(),
        BinaryOp::Gt => ord.is_gt(),
        BinaryOp::Ge => ord.is_ge(),
        _ => unreachable!("eval_comparison called with non-comparison op"),
    };
    Ok(Literal::Logical(Some(result)))
}

fn eval_concat(l: Literal, r: Literal) -> Result<Literal> {
    match (l, r) {
        (Literal::Char(a), Literal::Char(b)) | (Literal::Varchar(a), Literal::Varchar(b)) => {
            Ok(Literal::Varchar(a + &b))
        }
        (Literal::Char(a), Literal::Varchar(b)) | (Literal::Varchar(a), Literal::Char(b)) => {
            Ok(Literal::Varchar(a + &b))
        }
        (l, r) => Err(ServerError::IncompatibleDatatype { from: format!("{l:?}"), to: format!("{r:?}") }),
    }
}

fn eval_arithmetic(op: BinaryOp, l: Literal, r: Literal) -> Result<Literal> {
    match (l, r) {
        (Literal::Integer(a), Literal::Integer(b)) => {
            let v = int_op(op, a as i64, b as i64)?;
            i32::try_from(v)
                .map(Literal::Integer)
                .map_err(|_| ServerError::DataOverflow { value: v.to_string(), domain: "INTEGER".into() })
        }
        (a, b) => {
            let (Some(x), Some(y)) = (as_f64(&a), as_f64(&b)) else {
                return Err(ServerError::IncompatibleDatatype { from: format!("{a:?}"), to: format!("{b:?}") });
            };
            let v = float_op(op, x, y)?;
            Ok(Literal::Double(v))
        }
    }
}

fn int_op(op: BinaryOp, a: i64, b: i64) -> Result<i64> {
    match op {
        BinaryOp::Plus => Ok(a + b),
        BinaryOp::Minus => Ok(a - b),
        BinaryOp::Mul => Ok(a * b),
        BinaryOp::Div => {
            if b == 0 {
                Err(ServerError::ZeroDivide)
            } else {
                Ok(a / b)
            }
        }
        BinaryOp::Mod => {
            if b == 0 {
                Err(ServerError::ZeroDivide)
            } else {
                Ok(a % b)
            }
        }
        other => Err(ServerError::Semantic(format!("{} is not an arithmetic operator", other.print()))),
    }
}

fn float_op(op: BinaryOp, a: f64, b: f64) -> Result<f64> {
    match op {
        BinaryOp::Plus => Ok(a + b),
        BinaryOp::Minus => Ok(a - b),
        BinaryOp::Mul => Ok(a * b),
        BinaryOp::Div => {
            if b == 0.0 {
                Err(ServerError::ZeroDivide)
            } else {
                Ok(a / b)
            }
        }
        BinaryOp::Mod => {
            if b == 0.0 {
                Err(ServerError::ZeroDivide)
            } else {
                Ok(a % b)
            }
        }
        other => Err(ServerError::Semantic(format!("{} is not an arithmetic operator", other.print()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_arithmetic_with_no_source() {
        let plan = Plan {
            select_list: vec![Expr::Binary {
                op: BinaryOp::Plus,
                left: Box::new(Expr::integer(1)),
                right: Box::new(Expr::Binary {
                    op: BinaryOp::Mul,
                    left: Box::new(Expr::integer(2)),
                    right: Box::new(Expr::integer(3)),
                }),
            }],
            source: None,
        };
        let rows = InMemoryExecutor.execute(&plan, &[]).unwrap();
        assert_eq!(rows, vec![vec![Literal::Integer(7)]]);
    }

    #[test]
    fn single_table_projection() {
        let plan = Plan {
            select_list: vec![Expr::Column { name: "b".into(), ty: crate::typecheck::Tag::Integer }],
            source: Some(TableSource {
                columns: vec!["a".into(), "b".into()],
                rows: vec![vec![Literal::Integer(1), Literal::Integer(10)], vec![Literal::Integer(2), Literal::Integer(20)]],
            }),
        };
        let rows = InMemoryExecutor.execute(&plan, &[]).unwrap();
        assert_eq!(rows, vec![vec![Literal::Integer(10)], vec![Literal::Integer(20)]]);
    }

    #[test]
    fn host_var_substitution() {
        let plan = Plan { select_list: vec![Expr::HostVar { position: 1 }], source: None };
        let rows = InMemoryExecutor.execute(&plan, &[Literal::Integer(42)]).unwrap();
        assert_eq!(rows, vec![vec![Literal::Integer(42)]]);
    }

    #[test]
    fn divide_by_zero_is_a_runtime_error() {
        let plan = Plan {
            select_list: vec![Expr::Binary {
                op: BinaryOp::Div,
                left: Box::new(Expr::integer(1)),
                right: Box::new(Expr::integer(0)),
            }],
            source: None,
        };
        assert_eq!(InMemoryExecutor.execute(&plan, &[]).unwrap_err(), ServerError::ZeroDivide);
    }
}
