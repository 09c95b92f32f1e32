//! The constant evaluator and coercion kernels driving the post-pass
//! (SPEC_FULL §4.5, Design Note §9's "table-driven evaluator" standing in
//! for `pt_evaluate_db_value_expr`/`pt_fold_const_expr`).

use crate::config::{CompatMode, ServerConfig};
use crate::error::{Result, ServerError};

use super::expr::{BetweenOp, BinaryOp, Expr, Literal, UnaryOp};
use super::lattice::{self, Tag};

/// One compile's worth of fold state: accumulated errors (the walk never
/// aborts on error, per spec.md §7) and the expected domain recorded for
/// every host variable encountered, indexed by 1-based position.
pub struct FoldContext<'a> {
    pub cfg: &'a ServerConfig,
    pub host_var_domains: Vec<Option<Tag>>,
    errors: Vec<ServerError>,
}

impl<'a> FoldContext<'a> {
    pub fn new(cfg: &'a ServerConfig) -> FoldContext<'a> {
        FoldContext {
            cfg,
            host_var_domains: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn has_error(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn errors(&self) -> &[ServerError] {
        &self.errors
    }

    fn push_error(&mut self, e: ServerError) {
        self.errors.push(e);
    }

    fn record_host_var(&mut self, position: usize, domain: Tag) {
        if self.host_var_domains.len() < position {
            self.host_var_domains.resize(position, None);
        }
        self.host_var_domains[position - 1] = Some(domain);
    }
}

/// Two-pass type-and-fold entry point for one scalar expression: assigns a
/// result type bottom-up, inserts implicit CASTs, folds deterministic
/// subtrees into `Expr::Literal`. Errors are accumulated on `ctx`, not
/// raised directly — the caller checks `ctx.has_error()` after the walk
/// (spec.md §7).
pub fn type_and_fold(expr: &Expr, ctx: &mut FoldContext) -> (Expr, Tag) {
    match expr {
        Expr::Literal(l) => (expr.clone(), l.tag()),
        Expr::HostVar { .. } => (expr.clone(), Tag::Maybe),
        Expr::Column { ty, .. } => (expr.clone(), *ty),
        Expr::Cast { to, expr: inner } => {
            let (inner_folded, _) = type_and_fold(inner, ctx);
            if let Expr::Literal(l) = &inner_folded {
                match coerce_concrete(l.clone(), *to) {
                    Ok(coerced) => return (Expr::Literal(coerced), *to),
                    Err(e) => ctx.push_error(e),
                }
            }
            (Expr::Cast { to: *to, expr: Box::new(inner_folded) }, *to)
        }
        Expr::Unary { op, operand } => fold_unary(*op, operand, ctx),
        Expr::Binary { op, left, right } => fold_binary(*op, left, right, ctx),
        Expr::Case { operand, whens, else_ } => fold_case(operand.as_deref(), whens, else_.as_deref(), ctx),
        Expr::Between { expr: inner, negated, low, high } => {
            fold_between(inner, *negated, low, high, ctx)
        }
        Expr::Limit(n) => {
            let (n_folded, _) = type_and_fold(n, ctx);
            (Expr::Limit(Box::new(n_folded)), Tag::Integer)
        }
    }
}

fn contains_maybe(expr: &Expr, ty: Tag) -> bool {
    ty == Tag::Maybe || matches!(expr, Expr::HostVar { .. })
}

fn fold_unary(op: UnaryOp, operand: &Expr, ctx: &mut FoldContext) -> (Expr, Tag) {
    let (operand_folded, operand_ty) = type_and_fold(operand, ctx);
    let result_ty = match op {
        UnaryOp::Not => Tag::Logical,
        UnaryOp::Neg => operand_ty,
        UnaryOp::IsNull | UnaryOp::IsNotNull => Tag::Logical,
    };

    if contains_maybe(&operand_folded, operand_ty) {
        return (Expr::Unary { op, operand: Box::new(operand_folded) }, result_ty);
    }

    if let Expr::Literal(l) = &operand_folded {
        let folded = match op {
            UnaryOp::Not => as_logical(l).map(|v| Literal::Logical(v.map(|b| !b))),
            UnaryOp::Neg => negate_literal(l),
            UnaryOp::IsNull => Some(Literal::Logical(Some(matches!(l, Literal::Null)))),
            UnaryOp::IsNotNull => Some(Literal::Logical(Some(!matches!(l, Literal::Null)))),
        };
        if let Some(lit) = folded {
            return (Expr::Literal(lit), result_ty);
        }
    }
    (Expr::Unary { op, operand: Box::new(operand_folded) }, result_ty)
}

fn negate_literal(l: &Literal) -> Option<Literal> {
    Some(match l {
        Literal::Integer(v) => Literal::Integer(v.checked_neg()?),
        Literal::Bigint(v) => Literal::Bigint(v.checked_neg()?),
        Literal::Smallint(v) => Literal::Smallint(v.checked_neg()?),
        Literal::Float(v) => Literal::Float(-v),
        Literal::Double(v) => Literal::Double(-v),
        Literal::Monetary(v) => Literal::Monetary(-v),
        _ => return None,
    })
}

fn as_logical(l: &Literal) -> Option<Option<bool>> {
    match l {
        Literal::Logical(v) => Some(*v),
        Literal::Null => Some(None),
        _ => None,
    }
}

/// Bounds for arithmetic-overflow detection, by integer-family tag.
fn int_bounds(tag: Tag) -> Option<(i64, i64)> {
    match tag {
        Tag::Smallint => Some((i16::MIN as i64, i16::MAX as i64)),
        Tag::Integer => Some((i32::MIN as i64, i32::MAX as i64)),
        Tag::Bigint => Some((i64::MIN, i64::MAX)),
        _ => None,
    }
}

fn as_int(l: &Literal) -> Option<i64> {
    match l {
        Literal::Smallint(v) => Some(*v as i64),
        Literal::Integer(v) => Some(*v as i64),
        Literal::Bigint(v) => Some(*v),
        _ => None,
    }
}

fn int_from(tag: Tag, v: i64) -> Option<Literal> {
    match tag {
        Tag::Smallint => i16::try_from(v).ok().map(Literal::Smallint),
        Tag::Integer => i32::try_from(v).ok().map(Literal::Integer),
        Tag::Bigint => Some(Literal::Bigint(v)),
        _ => None,
    }
}

fn as_f64(l: &Literal) -> Option<f64> {
    match l {
        Literal::Smallint(v) => Some(*v as f64),
        Literal::Integer(v) => Some(*v as f64),
        Literal::Bigint(v) => Some(*v as f64),
        Literal::Float(v) => Some(*v as f64),
        Literal::Double(v) => Some(*v),
        Literal::Monetary(v) => Some(*v),
        Literal::Numeric { unscaled, scale, .. } => {
            Some(*unscaled as f64 / 10f64.powi(*scale as i32))
        }
        Literal::Date(v) | Literal::Time(v) => Some(*v as f64),
        Literal::Timestamp(v) | Literal::Datetime(v) => Some(*v as f64),
        _ => None,
    }
}

fn float_from(tag: Tag, v: f64) -> Option<Literal> {
    match tag {
        Tag::Float => Some(Literal::Float(v as f32)),
        Tag::Double => Some(Literal::Double(v)),
        Tag::Monetary => Some(Literal::Monetary(v)),
        _ => None,
    }
}

const MAX_STRING_LEN: usize = 1_073_741_823;

fn as_str(l: &Literal) -> Option<&str> {
    match l {
        Literal::Char(s) | Literal::Varchar(s) => Some(s.as_str()),
        _ => None,
    }
}

fn fold_binary(op: BinaryOp, left: &Expr, right: &Expr, ctx: &mut FoldContext) -> (Expr, Tag) {
    let (l_folded, l_ty) = type_and_fold(left, ctx);
    let (r_folded, r_ty) = type_and_fold(right, ctx);

    let common = lattice::common_type(l_ty, r_ty, ctx.cfg.compat_mode);
    let Some(common) = common else {
        ctx.push_error(ServerError::IncompatibleDatatype {
            from: format!("{r_ty:?}"),
            to: format!("{l_ty:?}"),
        });
        return (
            Expr::Binary { op, left: Box::new(l_folded), right: Box::new(r_folded) },
            Tag::None,
        );
    };

    // Record the expected domain for a bare host variable compared
    // against a concrete sibling (spec.md §4.5 point 4).
    if let Expr::HostVar { position } = l_folded {
        ctx.record_host_var(position, r_ty);
    }
    if let Expr::HostVar { position } = r_folded {
        ctx.record_host_var(position, l_ty);
    }

    let l_coerced = insert_cast_if_needed(l_folded, l_ty, common);
    let r_coerced = insert_cast_if_needed(r_folded, r_ty, common);

    let result_ty = if op.is_comparison() {
        Tag::Logical
    } else if op.is_logical() {
        Tag::Logical
    } else {
        common
    };

    let disabled_by_maybe = contains_maybe(&l_coerced, l_ty) || contains_maybe(&r_coerced, r_ty);

    // Out-of-range literal vs. a fixed-width column short-circuits a
    // comparison to TRUE/FALSE without either side being fully constant
    // (spec.md §4.5's "comparison with out-of-range literals").
    if op.is_comparison() && !disabled_by_maybe {
        if let Some(b) = try_fold_out_of_range(op, &l_coerced, l_ty, &r_coerced, r_ty) {
            return (Expr::Literal(Literal::Logical(Some(b))), Tag::Logical);
        }
    }

    if disabled_by_maybe {
        return (
            Expr::Binary { op, left: Box::new(l_coerced), right: Box::new(r_coerced) },
            result_ty,
        );
    }

    if let (Expr::Literal(ll), Expr::Literal(rl)) = (&l_coerced, &r_coerced) {
        match fold_literal_binary(op, ll, rl, common, ctx) {
            Ok(Some(folded)) => return (Expr::Literal(folded), result_ty),
            Ok(None) => {}
            Err(e) => ctx.push_error(e),
        }
    }

    (
        Expr::Binary { op, left: Box::new(l_coerced), right: Box::new(r_coerced) },
        result_ty,
    )
}

fn insert_cast_if_needed(expr: Expr, from: Tag, to: Tag) -> Expr {
    if from == to || matches!(expr, Expr::HostVar { .. }) {
        return expr;
    }
    if let Expr::Literal(l) = &expr {
        if let Ok(coerced) = coerce_concrete(l.clone(), to) {
            return Expr::Literal(coerced);
        }
    }
    Expr::Cast { to, expr: Box::new(expr) }
}

fn try_fold_out_of_range(
    op: BinaryOp,
    left: &Expr,
    l_ty: Tag,
    right: &Expr,
    r_ty: Tag,
) -> Option<bool> {
    let (col_ty, literal, op_normalized) = match (left, right) {
        (Expr::Column { .. }, Expr::Literal(l)) => (l_ty, l, op),
        (Expr::Literal(l), Expr::Column { .. }) => (r_ty, l, flip_comparison(op)),
        _ => return None,
    };
    let bounds = int_bounds(col_ty)?;
    let lit_val = as_int(literal)?;
    if lit_val > bounds.1 {
        Some(match op_normalized {
            BinaryOp::Lt | BinaryOp::Le => true,
            BinaryOp::Gt | BinaryOp::Ge | BinaryOp::Eq => false,
            BinaryOp::Ne => true,
            _ => return None,
        })
    } else if lit_val < bounds.0 {
        Some(match op_normalized {
            BinaryOp::Gt | BinaryOp::Ge => true,
            BinaryOp::Lt | BinaryOp::Le | BinaryOp::Eq => false,
            BinaryOp::Ne => true,
            _ => return None,
        })
    } else {
        None
    }
}

fn flip_comparison(op: BinaryOp) -> BinaryOp {
    match op {
        BinaryOp::Lt => BinaryOp::Gt,
        BinaryOp::Le => BinaryOp::Ge,
        BinaryOp::Gt => BinaryOp::Lt,
        BinaryOp::Ge => BinaryOp::Le,
        other => other,
    }
}

fn fold_literal_binary(
    op: BinaryOp,
    l: &Literal,
    r: &Literal,
    common: Tag,
    ctx: &FoldContext,
) -> Result<Option<Literal>> {
    if op.is_logical() {
        return Ok(fold_logical(op, l, r));
    }
    if op == BinaryOp::Concat {
        return Ok(fold_concat(l, r, ctx.cfg));
    }
    if op.is_comparison() {
        return Ok(fold_compare(op, l, r));
    }

    if let Some(bounds) = int_bounds(common) {
        let (Some(lv), Some(rv)) = (as_int(l), as_int(r)) else {
            return Ok(None);
        };
        if op == BinaryOp::Div && rv == 0 {
            return Err(ServerError::ZeroDivide);
        }
        if op == BinaryOp::Mod && rv == 0 {
            return Err(ServerError::ZeroDivide);
        }
        let result = match op {
            BinaryOp::Plus => lv.checked_add(rv),
            BinaryOp::Minus => lv.checked_sub(rv),
            BinaryOp::Mul => lv.checked_mul(rv),
            BinaryOp::Div => lv.checked_div(rv),
            BinaryOp::Mod => lv.checked_rem(rv),
            _ => return Ok(None),
        };
        return Ok(result.filter(|v| *v >= bounds.0 && *v <= bounds.1).and_then(|v| int_from(common, v)));
    }

    if matches!(common, Tag::Float | Tag::Double | Tag::Monetary) {
        let (Some(lv), Some(rv)) = (as_f64(l), as_f64(r)) else {
            return Ok(None);
        };
        if op == BinaryOp::Div && rv == 0.0 {
            return Err(ServerError::ZeroDivide);
        }
        let result = match op {
            BinaryOp::Plus => lv + rv,
            BinaryOp::Minus => lv - rv,
            BinaryOp::Mul => lv * rv,
            BinaryOp::Div => lv / rv,
            BinaryOp::Mod => lv % rv,
            _ => return Ok(None),
        };
        if !result.is_finite() {
            return Ok(None);
        }
        return Ok(float_from(common, result));
    }

    Ok(None)
}

fn fold_logical(op: BinaryOp, l: &Literal, r: &Literal) -> Option<Literal> {
    let (Some(lv), Some(rv)) = (as_logical(l), as_logical(r)) else {
        return None;
    };
    let result = match op {
        // Short-circuited SQL three-valued logic (spec.md §4.5).
        BinaryOp::And => match (lv, rv) {
            (Some(false), _) | (_, Some(false)) => Some(false),
            (Some(true), Some(true)) => Some(true),
            _ => None,
        },
        BinaryOp::Or => match (lv, rv) {
            (Some(true), _) | (_, Some(true)) => Some(true),
            (Some(false), Some(false)) => Some(false),
            _ => None,
        },
        BinaryOp::Xor => match (lv, rv) {
            (Some(a), Some(b)) => Some(a != b),
            _ => None,
        },
        _ => return None,
    };
    Some(Literal::Logical(result))
}

fn fold_concat(l: &Literal, r: &Literal, cfg: &ServerConfig) -> Option<Literal> {
    if matches!(l, Literal::Null) {
        return Some(if cfg.oracle_style_empty_string { r.clone() } else { Literal::Null });
    }
    if matches!(r, Literal::Null) {
        return Some(if cfg.oracle_style_empty_string { l.clone() } else { Literal::Null });
    }
    let (ls, rs) = (as_str(l)?, as_str(r)?);
    if ls.len() + rs.len() > MAX_STRING_LEN {
        return None;
    }
    Some(Literal::Varchar(format!("{ls}{rs}")))
}

fn fold_compare(op: BinaryOp, l: &Literal, r: &Literal) -> Option<Literal> {
    let ordering = if let (Some(ls), Some(rs)) = (as_str(l), as_str(r)) {
        ls.cmp(rs)
    } else {
        let (lv, rv) = (as_f64(l)?, as_f64(r)?);
        lv.partial_cmp(&rv)?
    };
    let result = match op {
        BinaryOp::Eq => ordering.is_eq(),
        BinaryOp::Ne => !ordering.is_eq(),
        BinaryOp::Lt => ordering.is_lt(),
        BinaryOp::Le => ordering.is_le(),
        BinaryOp::Gt => ordering.is_gt(),
        BinaryOp::Ge => ordering.is_ge(),
        _ => return None,
    };
    Some(Literal::Logical(Some(result)))
}

fn fold_case(
    operand: Option<&Expr>,
    whens: &[(Expr, Expr)],
    else_: Option<&Expr>,
    ctx: &mut FoldContext,
) -> (Expr, Tag) {
    let operand_folded = operand.map(|o| type_and_fold(o, ctx));
    let mut result_ty = Tag::Null;
    let mut branch_folds = Vec::with_capacity(whens.len());
    for (cond, val) in whens {
        let cond_folded = match &operand_folded {
            Some((op_expr, _)) => {
                let (c_folded, _) = type_and_fold(cond, ctx);
                (
                    Expr::Binary {
                        op: BinaryOp::Eq,
                        left: Box::new(op_expr.clone()),
                        right: Box::new(c_folded),
                    },
                    Tag::Logical,
                )
            }
            None => type_and_fold(cond, ctx),
        };
        let (val_folded, val_ty) = type_and_fold(val, ctx);
        if let Some(common) = lattice::common_type(result_ty, val_ty, ctx.cfg.compat_mode) {
            result_ty = common;
        }
        branch_folds.push((cond_folded, val_folded));
    }
    let else_folded = else_.map(|e| type_and_fold(e, ctx));
    if let Some((_, else_ty)) = &else_folded {
        if let Some(common) = lattice::common_type(result_ty, *else_ty, ctx.cfg.compat_mode) {
            result_ty = common;
        }
    }

    // If the selector folds to a known literal, reduce to the chosen
    // branch; the other branches are discarded (spec.md §4.5).
    for (cond, val) in &branch_folds {
        if let Expr::Literal(l) = &cond.0 {
            if matches!(as_logical(l), Some(Some(true))) {
                return (insert_cast_if_needed(val.clone(), val_type_hint(val), result_ty), result_ty);
            }
            continue;
        }
        // A non-constant selector means we cannot fold CASE at all.
        return rebuild_case(operand_folded, branch_folds, else_folded, result_ty);
    }
    match else_folded {
        Some((val, val_ty)) => (insert_cast_if_needed(val, val_ty, result_ty), result_ty),
        None => (Expr::Literal(Literal::Null), result_ty),
    }
}

fn val_type_hint(_e: &Expr) -> Tag {
    // insert_cast_if_needed only special-cases Expr::Literal, for which
    // the "from" tag is unused; any placeholder is fine for non-literals.
    Tag::None
}

fn rebuild_case(
    operand_folded: Option<(Expr, Tag)>,
    branches: Vec<(Expr, Expr)>,
    else_folded: Option<(Expr, Tag)>,
    result_ty: Tag,
) -> (Expr, Tag) {
    (
        Expr::Case {
            operand: operand_folded.map(|(e, _)| Box::new(e)),
            whens: branches,
            else_: else_folded.map(|(e, _)| Box::new(e)),
        },
        result_ty,
    )
}

fn fold_between(
    inner: &Expr,
    negated: bool,
    low: &Expr,
    high: &Expr,
    ctx: &mut FoldContext,
) -> (Expr, Tag) {
    let (inner_folded, _) = type_and_fold(inner, ctx);
    let (low_folded, _) = type_and_fold(low, ctx);
    let (high_folded, _) = type_and_fold(high, ctx);

    if let (Expr::Literal(lo), Expr::Literal(hi)) = (&low_folded, &high_folded) {
        if let (Some(lo_v), Some(hi_v)) = (as_f64(lo), as_f64(hi)) {
            if lo_v == hi_v {
                let op = if negated { BinaryOp::Ne } else { BinaryOp::Eq };
                return (
                    Expr::Binary {
                        op,
                        left: Box::new(inner_folded),
                        right: Box::new(low_folded),
                    },
                    Tag::Logical,
                );
            }
            if !negated {
                let ge = Expr::Binary {
                    op: BinaryOp::Ge,
                    left: Box::new(inner_folded.clone()),
                    right: Box::new(low_folded),
                };
                let le = Expr::Binary { op: BinaryOp::Le, left: Box::new(inner_folded), right: Box::new(high_folded) };
                return (
                    Expr::Binary { op: BinaryOp::And, left: Box::new(ge), right: Box::new(le) },
                    Tag::Logical,
                );
            }
            // NOT BETWEEN, De Morgan over the canonical GE_LE form.
            let lt = Expr::Binary {
                op: BinaryOp::Lt,
                left: Box::new(inner_folded.clone()),
                right: Box::new(low_folded),
            };
            let gt = Expr::Binary { op: BinaryOp::Gt, left: Box::new(inner_folded), right: Box::new(high_folded) };
            return (
                Expr::Binary { op: BinaryOp::Or, left: Box::new(lt), right: Box::new(gt) },
                Tag::Logical,
            );
        }
    }

    (
        Expr::Between {
            expr: Box::new(inner_folded),
            negated,
            low: Box::new(low_folded),
            high: Box::new(high_folded),
        },
        Tag::Logical,
    )
}

/// `between_to_comp`: the canonical (low_op, high_op) pair for a BETWEEN
/// kind.
pub fn between_to_comp(kind: BetweenOp) -> (BinaryOp, BinaryOp) {
    match kind {
        BetweenOp::GeLe => (BinaryOp::Ge, BinaryOp::Le),
        BetweenOp::GeLt => (BinaryOp::Ge, BinaryOp::Lt),
        BetweenOp::GtLe => (BinaryOp::Gt, BinaryOp::Le),
        BetweenOp::GtLt => (BinaryOp::Gt, BinaryOp::Lt),
    }
}

/// Inverse of `between_to_comp`.
pub fn comp_to_between(low_op: BinaryOp, high_op: BinaryOp) -> Option<BetweenOp> {
    match (low_op, high_op) {
        (BinaryOp::Ge, BinaryOp::Le) => Some(BetweenOp::GeLe),
        (BinaryOp::Ge, BinaryOp::Lt) => Some(BetweenOp::GeLt),
        (BinaryOp::Gt, BinaryOp::Le) => Some(BetweenOp::GtLe),
        (BinaryOp::Gt, BinaryOp::Lt) => Some(BetweenOp::GtLt),
        _ => None,
    }
}

/// Coerces a bound host-variable value to its expected domain. Preserves
/// the original's early-return on the late-binding path (DESIGN.md Open
/// Question #3): when late binding is enabled and the domain is still
/// unresolved, the value is accepted as-is rather than forced through a
/// coercion that has nothing concrete to coerce against.
pub fn coerce_value(value: Literal, expected: Option<Tag>, late_binding: bool) -> Result<Literal> {
    let Some(expected) = expected else {
        if late_binding {
            return Ok(value);
        }
        return Err(ServerError::IncompatibleDatatype {
            from: format!("{:?}", value.tag()),
            to: "MAYBE".to_string(),
        });
    };
    coerce_concrete(value, expected)
}

/// Coerces `value` to `to`, or fails with `IncompatibleDatatype` /
/// `DataOverflow`.
pub fn coerce_concrete(value: Literal, to: Tag) -> Result<Literal> {
    if value.tag() == to {
        return Ok(value);
    }
    if matches!(value, Literal::Null) {
        return Ok(Literal::Null);
    }
    if let Some(bounds) = int_bounds(to) {
        let v = as_int(&value).ok_or_else(|| incompatible(&value, to))?;
        if v < bounds.0 || v > bounds.1 {
            return Err(ServerError::DataOverflow {
                value: v.to_string(),
                domain: format!("{to:?}"),
            });
        }
        return int_from(to, v).ok_or_else(|| incompatible(&value, to));
    }
    if matches!(to, Tag::Float | Tag::Double | Tag::Monetary) {
        let v = as_f64(&value).ok_or_else(|| incompatible(&value, to))?;
        return float_from(to, v).ok_or_else(|| incompatible(&value, to));
    }
    if matches!(to, Tag::Char | Tag::Varchar) {
        if let Some(s) = as_str(&value) {
            return Ok(if to == Tag::Char {
                Literal::Char(s.to_string())
            } else {
                Literal::Varchar(s.to_string())
            });
        }
    }
    Err(incompatible(&value, to))
}

fn incompatible(value: &Literal, to: Tag) -> ServerError {
    ServerError::IncompatibleDatatype {
        from: format!("{:?}", value.tag()),
        to: format!("{to:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg() -> ServerConfig {
        ServerConfig::default()
    }

    #[test]
    fn arithmetic_folds_to_literal_with_original_print() {
        let cfg = cfg();
        let mut ctx = FoldContext::new(&cfg);
        // 1 + 2 * 3
        let expr = Expr::Binary {
            op: BinaryOp::Plus,
            left: Box::new(Expr::integer(1)),
            right: Box::new(Expr::Binary {
                op: BinaryOp::Mul,
                left: Box::new(Expr::integer(2)),
                right: Box::new(Expr::integer(3)),
            }),
        };
        assert_eq!(expr.print(), "1+2*3");
        let (folded, ty) = type_and_fold(&expr, &mut ctx);
        assert_eq!(folded, Expr::Literal(Literal::Integer(7)));
        assert_eq!(ty, Tag::Integer);
        assert!(!ctx.has_error());
    }

    #[test]
    fn out_of_range_literal_short_circuits_comparison() {
        let cfg = cfg();
        let mut ctx = FoldContext::new(&cfg);
        let expr = Expr::Binary {
            op: BinaryOp::Lt,
            left: Box::new(Expr::Column { name: "smallint_col".into(), ty: Tag::Smallint }),
            right: Box::new(Expr::integer(40000)),
        };
        let (folded, ty) = type_and_fold(&expr, &mut ctx);
        assert_eq!(folded, Expr::Literal(Literal::Logical(Some(true))));
        assert_eq!(ty, Tag::Logical);
    }

    #[test]
    fn division_by_zero_is_an_error_not_a_fold() {
        let cfg = cfg();
        let mut ctx = FoldContext::new(&cfg);
        let expr = Expr::Binary {
            op: BinaryOp::Div,
            left: Box::new(Expr::integer(1)),
            right: Box::new(Expr::integer(0)),
        };
        let (folded, _) = type_and_fold(&expr, &mut ctx);
        assert!(matches!(folded, Expr::Binary { .. }));
        assert!(ctx.has_error());
        assert_eq!(ctx.errors()[0], ServerError::ZeroDivide);
    }

    #[test]
    fn overflow_leaves_expression_symbolic_without_error() {
        let cfg = cfg();
        let mut ctx = FoldContext::new(&cfg);
        let expr = Expr::Binary {
            op: BinaryOp::Mul,
            left: Box::new(Expr::Literal(Literal::Integer(i32::MAX))),
            right: Box::new(Expr::integer(2)),
        };
        let (folded, _) = type_and_fold(&expr, &mut ctx);
        assert!(matches!(folded, Expr::Binary { .. }));
        assert!(!ctx.has_error());
    }

    #[test]
    fn maybe_disables_fold_but_not_typing() {
        let cfg = cfg();
        let mut ctx = FoldContext::new(&cfg);
        let expr = Expr::Binary {
            op: BinaryOp::Plus,
            left: Box::new(Expr::HostVar { position: 1 }),
            right: Box::new(Expr::integer(1)),
        };
        let (folded, ty) = type_and_fold(&expr, &mut ctx);
        assert!(matches!(folded, Expr::Binary { .. }));
        assert_eq!(ty, Tag::Integer);
        assert_eq!(ctx.host_var_domains, vec![Some(Tag::Integer)]);
    }

    #[test]
    fn between_with_equal_bounds_collapses_to_equality() {
        let cfg = cfg();
        let mut ctx = FoldContext::new(&cfg);
        let expr = Expr::Between {
            expr: Box::new(Expr::Column { name: "a".into(), ty: Tag::Integer }),
            negated: false,
            low: Box::new(Expr::integer(5)),
            high: Box::new(Expr::integer(5)),
        };
        let (folded, _) = type_and_fold(&expr, &mut ctx);
        assert_eq!(
            folded,
            Expr::Binary {
                op: BinaryOp::Eq,
                left: Box::new(Expr::Column { name: "a".into(), ty: Tag::Integer }),
                right: Box::new(Expr::integer(5)),
            }
        );
    }

    #[test]
    fn between_to_comp_round_trips() {
        for kind in [BetweenOp::GeLe, BetweenOp::GeLt, BetweenOp::GtLe, BetweenOp::GtLt] {
            let (lo, hi) = between_to_comp(kind);
            assert_eq!(comp_to_between(lo, hi), Some(kind));
        }
    }

    #[test]
    fn coerce_value_rejects_overflow() {
        let err = coerce_concrete(Literal::Integer(100_000), Tag::Smallint).unwrap_err();
        assert!(matches!(err, ServerError::DataOverflow { .. }));
    }

    #[test]
    fn coerce_value_late_binding_early_return() {
        let v = coerce_value(Literal::Integer(1), None, true).unwrap();
        assert_eq!(v, Literal::Integer(1));
    }

    #[test]
    fn compat_mysql_prefers_integer_in_mixed_comparison() {
        let mut cfg = cfg();
        cfg.compat_mode = CompatMode::Mysql;
        let mut ctx = FoldContext::new(&cfg);
        let expr = Expr::Binary {
            op: BinaryOp::Eq,
            left: Box::new(Expr::Column { name: "i".into(), ty: Tag::Integer }),
            right: Box::new(Expr::Literal(Literal::Date(20260101))),
        };
        let (_, ty) = type_and_fold(&expr, &mut ctx);
        assert_eq!(ty, Tag::Logical);
        assert!(!ctx.has_error());
    }
}
