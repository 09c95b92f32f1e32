//! Type checker & folder (C5): two passes over the expression tree —
//! a pre-pass that rewrites a handful of high-level constructs (LIMIT,
//! outer-join marking), and a post-pass that assigns types, inserts
//! coercions, and folds deterministic subtrees. See spec.md §4.5 and
//! SPEC_FULL §4.5.

pub mod expr;
pub mod fold;
pub mod lattice;

pub use expr::{BetweenOp, BinaryOp, Expr, Literal, UnaryOp};
pub use fold::{coerce_value, type_and_fold, FoldContext};
pub use lattice::{common_type, Tag};

use crate::config::ServerConfig;
use crate::error::Result;

/// The predicate slots a `SELECT`'s `LIMIT` rewrite can land in, and the
/// minimal shape the pre-pass needs of a statement. Full plan construction
/// is the non-goal collaborator (spec.md §1); this is only as much of the
/// AST as the pre-pass and post-pass scenarios in spec.md §8 touch.
#[derive(Debug, Clone, Default)]
pub struct SelectStmt {
    pub where_pred: Option<Expr>,
    pub order_by_for: Option<Expr>,
    pub having_pred: Option<Expr>,
    pub has_order_by: bool,
    pub has_group_by: bool,
    pub limit: Option<Expr>,
    /// Set by the pre-pass on outer-join derived subqueries; disables
    /// constant folding into the false-subquery form (spec.md §4.5).
    pub has_outer_spec: bool,
}

fn and(a: Expr, b: Expr) -> Expr {
    Expr::Binary { op: BinaryOp::And, left: Box::new(a), right: Box::new(b) }
}

/// `LIMIT n` becomes an `instnum < n` / `orderby_num < n` / `groupby_num <
/// n` filter appended to the most specific predicate slot, depending on
/// whether `ORDER BY` or `GROUP BY` is present (spec.md §4.5 pre-pass,
/// scenario 4 in spec.md §8).
pub fn pre_pass(stmt: &mut SelectStmt) {
    let Some(limit) = stmt.limit.take() else { return };

    let (slot, pseudo_col) = if stmt.has_order_by {
        (&mut stmt.order_by_for, "orderby_num")
    } else if stmt.has_group_by {
        (&mut stmt.having_pred, "groupby_num")
    } else {
        (&mut stmt.where_pred, "instnum")
    };

    let filter = Expr::Binary {
        op: BinaryOp::Lt,
        left: Box::new(Expr::Column { name: pseudo_col.to_string(), ty: Tag::Integer }),
        right: Box::new(limit),
    };
    *slot = Some(match slot.take() {
        Some(existing) => and(existing, filter),
        None => filter,
    });
}

/// Runs the post-pass (type assignment, coercion, folding) over every
/// predicate slot of a statement and returns whether any error was
/// accumulated along the way (spec.md §7: the walk never aborts, the
/// caller checks `has_error` afterward).
pub struct PostPassResult {
    pub where_pred: Option<Expr>,
    pub order_by_for: Option<Expr>,
    pub having_pred: Option<Expr>,
    pub host_var_domains: Vec<Option<Tag>>,
}

pub fn post_pass(stmt: &SelectStmt, cfg: &ServerConfig) -> Result<PostPassResult> {
    let mut ctx = FoldContext::new(cfg);
    let where_pred = stmt.where_pred.as_ref().map(|e| type_and_fold(e, &mut ctx).0);
    let order_by_for = stmt.order_by_for.as_ref().map(|e| type_and_fold(e, &mut ctx).0);
    let having_pred = stmt.having_pred.as_ref().map(|e| type_and_fold(e, &mut ctx).0);
    if ctx.has_error() {
        return Err(ctx.errors()[0].clone());
    }
    Ok(PostPassResult {
        where_pred,
        order_by_for,
        having_pred,
        host_var_domains: ctx.host_var_domains,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_with_order_by_rewrites_into_orderby_num() {
        let mut stmt = SelectStmt { has_order_by: true, limit: Some(Expr::integer(5)), ..Default::default() };
        pre_pass(&mut stmt);
        assert!(stmt.limit.is_none());
        assert_eq!(
            stmt.order_by_for,
            Some(Expr::Binary {
                op: BinaryOp::Lt,
                left: Box::new(Expr::Column { name: "orderby_num".into(), ty: Tag::Integer }),
                right: Box::new(Expr::integer(5)),
            })
        );
    }

    #[test]
    fn limit_without_order_or_group_rewrites_into_where() {
        let mut stmt = SelectStmt { limit: Some(Expr::integer(10)), ..Default::default() };
        pre_pass(&mut stmt);
        assert!(stmt.limit.is_none());
        match stmt.where_pred {
            Some(Expr::Binary { op: BinaryOp::Lt, left, .. }) => {
                assert_eq!(*left, Expr::Column { name: "instnum".into(), ty: Tag::Integer });
            }
            other => panic!("unexpected where_pred: {other:?}"),
        }
    }

    #[test]
    fn limit_appends_to_existing_predicate_with_and() {
        let mut stmt = SelectStmt {
            has_group_by: true,
            having_pred: Some(Expr::Literal(Literal::Logical(Some(true)))),
            limit: Some(Expr::integer(3)),
            ..Default::default()
        };
        pre_pass(&mut stmt);
        assert!(matches!(stmt.having_pred, Some(Expr::Binary { op: BinaryOp::And, .. })));
    }

    #[test]
    fn post_pass_folds_where_clause() {
        let cfg = ServerConfig::default();
        let stmt = SelectStmt {
            where_pred: Some(Expr::Binary {
                op: BinaryOp::Plus,
                left: Box::new(Expr::integer(1)),
                right: Box::new(Expr::integer(1)),
            }),
            ..Default::default()
        };
        let result = post_pass(&stmt, &cfg).unwrap();
        assert_eq!(result.where_pred, Some(Expr::Literal(Literal::Integer(2))));
    }
}
