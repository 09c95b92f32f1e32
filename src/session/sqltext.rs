//! Translates a single `sqlparser` statement into the small expression
//! tree the type checker/folder (C5) and the in-tree plan executor
//! understand. SQL grammar/AST construction proper is a non-goal
//! collaborator (spec.md §1): this module only carries enough of
//! `sqlparser`'s `Expr`/`Query`/`Select` shape across the boundary to
//! drive spec.md §8's scenarios, the way `sql::expr::plan_expr` in the
//! teacher crate translates the same AST into its own DAG nodes.

use std::collections::HashMap;

use sqlparser::ast::{
    BinaryOperator, Expr as SqlExpr, GroupByExpr, ObjectName, Query, SelectItem, SetExpr,
    Statement, TableFactor, UnaryOperator, Value as SqlValue,
};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use crate::error::{Result, ServerError};
use crate::typecheck::{BinaryOp, Expr, Literal, SelectStmt, Tag, UnaryOp};

use super::TableDef;

/// Parses `sql_text` and returns exactly one statement. Zero statements is
/// `EmptyStatement`; more than one is `MultipleStatement` (spec.md §7) —
/// a `compile()` call always corresponds to exactly one statement.
pub fn parse_one(sql_text: &str) -> Result<Statement> {
    let dialect = GenericDialect {};
    let mut stmts = Parser::parse_sql(&dialect, sql_text)
        .map_err(|e| ServerError::Syntax(e.to_string()))?;
    match stmts.len() {
        0 => Err(ServerError::EmptyStatement),
        1 => Ok(stmts.remove(0)),
        _ => Err(ServerError::MultipleStatement),
    }
}

/// The shape `compile()` extracts from a `SELECT`: a folded projection
/// list, the predicate slots the pre/post-pass rewrote, and every host
/// variable's expected domain, indexed by its 1-based position.
pub struct CompiledSelect {
    pub select_list: Vec<Expr>,
    pub column_types: Vec<Tag>,
    pub source_table: Option<String>,
    pub host_var_domains: Vec<Option<Tag>>,
}

/// Converts a parsed `Query` into a `CompiledSelect`, running the C5
/// pre-pass (LIMIT rewrite) and post-pass (typing, coercion, folding)
/// over the projection list and every predicate slot with one shared
/// fold context, so a host variable referenced in both the select list
/// and the `WHERE` clause resolves to the same expected domain.
pub fn compile_select(
    query: &Query,
    tables: &HashMap<String, TableDef>,
    cfg: &crate::config::ServerConfig,
) -> Result<CompiledSelect> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s.as_ref(),
        _ => return Err(ServerError::Semantic("only a flat SELECT is supported".into())),
    };

    let (source_table, schema) = match select.from.first() {
        None => (None, None),
        Some(twj) => match &twj.relation {
            TableFactor::Table { name, .. } => {
                let table_name = object_name_to_string(name).to_lowercase();
                let def = tables.get(&table_name).ok_or_else(|| {
                    ServerError::Semantic(format!("unknown table '{table_name}'"))
                })?;
                let schema: HashMap<String, Tag> =
                    def.columns.iter().map(|(n, t)| (n.to_lowercase(), *t)).collect();
                (Some(table_name), Some(schema))
            }
            _ => return Err(ServerError::Semantic("only a plain table reference is supported in FROM".into())),
        },
    };

    let mut host_var_counter = 0usize;
    let mut projection = Vec::with_capacity(select.projection.len());
    for item in &select.projection {
        let e = match item {
            SelectItem::UnnamedExpr(e) => e,
            SelectItem::ExprWithAlias { expr, .. } => expr,
            _ => return Err(ServerError::Semantic("wildcard projections are not supported".into())),
        };
        projection.push(convert_expr(e, schema.as_ref(), &mut host_var_counter)?);
    }

    let where_pred = select
        .selection
        .as_ref()
        .map(|e| convert_expr(e, schema.as_ref(), &mut host_var_counter))
        .transpose()?;
    let having_pred = select
        .having
        .as_ref()
        .map(|e| convert_expr(e, schema.as_ref(), &mut host_var_counter))
        .transpose()?;
    let has_group_by = match &select.group_by {
        GroupByExpr::All(_) => true,
        GroupByExpr::Expressions(exprs, _) => !exprs.is_empty(),
    };
    let has_order_by = query.order_by.is_some();
    let limit = query
        .limit
        .as_ref()
        .map(|e| convert_expr(e, None, &mut host_var_counter))
        .transpose()?;

    let mut stmt = SelectStmt {
        where_pred,
        order_by_for: None,
        having_pred,
        has_order_by,
        has_group_by,
        limit,
        has_outer_spec: false,
    };
    crate::typecheck::pre_pass(&mut stmt);

    let mut ctx = crate::typecheck::FoldContext::new(cfg);
    let mut folded_projection = Vec::with_capacity(projection.len());
    let mut column_types = Vec::with_capacity(projection.len());
    for e in &projection {
        let (folded, ty) = crate::typecheck::type_and_fold(e, &mut ctx);
        folded_projection.push(folded);
        column_types.push(ty);
    }
    if let Some(e) = &stmt.where_pred {
        crate::typecheck::type_and_fold(e, &mut ctx);
    }
    if let Some(e) = &stmt.order_by_for {
        crate::typecheck::type_and_fold(e, &mut ctx);
    }
    if let Some(e) = &stmt.having_pred {
        crate::typecheck::type_and_fold(e, &mut ctx);
    }
    if ctx.has_error() {
        return Err(ctx.errors()[0].clone());
    }

    Ok(CompiledSelect {
        select_list: folded_projection,
        column_types,
        source_table,
        host_var_domains: ctx.host_var_domains,
    })
}

fn object_name_to_string(name: &ObjectName) -> String {
    name.0.iter().map(|i| i.value.clone()).collect::<Vec<_>>().join(".")
}

fn convert_expr(e: &SqlExpr, schema: Option<&HashMap<String, Tag>>, host_vars: &mut usize) -> Result<Expr> {
    match e {
        SqlExpr::Nested(inner) => convert_expr(inner, schema, host_vars),
        SqlExpr::Identifier(ident) => {
            let name = ident.value.to_lowercase();
            let ty = schema
                .and_then(|s| s.get(&name).copied())
                .ok_or_else(|| ServerError::Semantic(format!("unknown column '{name}'")))?;
            Ok(Expr::Column { name, ty })
        }
        SqlExpr::CompoundIdentifier(parts) => {
            let name = parts.last().map(|i| i.value.to_lowercase()).unwrap_or_default();
            let ty = schema
                .and_then(|s| s.get(&name).copied())
                .ok_or_else(|| ServerError::Semantic(format!("unknown column '{name}'")))?;
            Ok(Expr::Column { name, ty })
        }
        SqlExpr::Value(v) => convert_value(v, host_vars),
        SqlExpr::UnaryOp { op, expr } => {
            let inner = convert_expr(expr, schema, host_vars)?;
            let op = match op {
                UnaryOperator::Not => UnaryOp::Not,
                UnaryOperator::Minus => UnaryOp::Neg,
                UnaryOperator::Plus => return Ok(inner),
                other => return Err(ServerError::Semantic(format!("unsupported unary operator {other}"))),
            };
            Ok(Expr::Unary { op, operand: Box::new(inner) })
        }
        SqlExpr::IsNull(inner) => Ok(Expr::Unary {
            op: UnaryOp::IsNull,
            operand: Box::new(convert_expr(inner, schema, host_vars)?),
        }),
        SqlExpr::IsNotNull(inner) => Ok(Expr::Unary {
            op: UnaryOp::IsNotNull,
            operand: Box::new(convert_expr(inner, schema, host_vars)?),
        }),
        SqlExpr::BinaryOp { left, op, right } => {
            let l = convert_expr(left, schema, host_vars)?;
            let r = convert_expr(right, schema, host_vars)?;
            let op = convert_binary_op(op)?;
            Ok(Expr::Binary { op, left: Box::new(l), right: Box::new(r) })
        }
        SqlExpr::Between { expr, negated, low, high } => Ok(Expr::Between {
            expr: Box::new(convert_expr(expr, schema, host_vars)?),
            negated: *negated,
            low: Box::new(convert_expr(low, schema, host_vars)?),
            high: Box::new(convert_expr(high, schema, host_vars)?),
        }),
        SqlExpr::Case { operand, conditions, results, else_result } => {
            let operand = operand
                .as_ref()
                .map(|e| convert_expr(e, schema, host_vars))
                .transpose()?
                .map(Box::new);
            let mut whens = Vec::with_capacity(conditions.len());
            for (c, r) in conditions.iter().zip(results.iter()) {
                whens.push((convert_expr(c, schema, host_vars)?, convert_expr(r, schema, host_vars)?));
            }
            let else_ = else_result
                .as_ref()
                .map(|e| convert_expr(e, schema, host_vars))
                .transpose()?
                .map(Box::new);
            Ok(Expr::Case { operand, whens, else_ })
        }
        SqlExpr::Cast { expr, data_type, .. } => Ok(Expr::Cast {
            to: map_data_type(data_type)?,
            expr: Box::new(convert_expr(expr, schema, host_vars)?),
        }),
        other => Err(ServerError::Semantic(format!("unsupported expression: {other}"))),
    }
}

fn convert_value(v: &SqlValue, host_vars: &mut usize) -> Result<Expr> {
    Ok(match v {
        SqlValue::Number(n, _) => {
            if let Ok(i) = n.parse::<i32>() {
                Expr::Literal(Literal::Integer(i))
            } else if let Ok(i) = n.parse::<i64>() {
                Expr::Literal(Literal::Bigint(i))
            } else {
                let f: f64 = n
                    .parse()
                    .map_err(|_| ServerError::Semantic(format!("invalid numeric literal '{n}'")))?;
                Expr::Literal(Literal::Double(f))
            }
        }
        SqlValue::SingleQuotedString(s) | SqlValue::DoubleQuotedString(s) => {
            Expr::Literal(Literal::Varchar(s.clone()))
        }
        SqlValue::Boolean(b) => Expr::Literal(Literal::Logical(Some(*b))),
        SqlValue::Null => Expr::Literal(Literal::Null),
        SqlValue::Placeholder(_) => {
            *host_vars += 1;
            Expr::HostVar { position: *host_vars }
        }
        other => return Err(ServerError::Semantic(format!("unsupported literal: {other}"))),
    })
}

fn convert_binary_op(op: &BinaryOperator) -> Result<BinaryOp> {
    Ok(match op {
        BinaryOperator::Plus => BinaryOp::Plus,
        BinaryOperator::Minus => BinaryOp::Minus,
        BinaryOperator::Multiply => BinaryOp::Mul,
        BinaryOperator::Divide => BinaryOp::Div,
        BinaryOperator::Modulo => BinaryOp::Mod,
        BinaryOperator::Eq => BinaryOp::Eq,
        BinaryOperator::NotEq => BinaryOp::Ne,
        BinaryOperator::Lt => BinaryOp::Lt,
        BinaryOperator::LtEq => BinaryOp::Le,
        BinaryOperator::Gt => BinaryOp::Gt,
        BinaryOperator::GtEq => BinaryOp::Ge,
        BinaryOperator::And => BinaryOp::And,
        BinaryOperator::Or => BinaryOp::Or,
        BinaryOperator::StringConcat => BinaryOp::Concat,
        other => return Err(ServerError::Semantic(format!("unsupported operator {other}"))),
    })
}

/// Maps a `CAST(... AS <type>)` target to the type-checker's tag set by
/// its textual spelling rather than matching `DataType`'s variant fields
/// directly — the field arity (precision, length, timezone-info) varies
/// across dialects and none of it is needed once we know the tag.
fn map_data_type(dt: &sqlparser::ast::DataType) -> Result<Tag> {
    let s = dt.to_string().to_uppercase();
    if s.starts_with("BIGINT") {
        Ok(Tag::Bigint)
    } else if s.starts_with("SMALLINT") {
        Ok(Tag::Smallint)
    } else if s.starts_with("INT") {
        Ok(Tag::Integer)
    } else if s.starts_with("DOUBLE") {
        Ok(Tag::Double)
    } else if s.starts_with("FLOAT") || s.starts_with("REAL") {
        Ok(Tag::Float)
    } else if s.starts_with("NUMERIC") || s.starts_with("DECIMAL") {
        Ok(Tag::Numeric)
    } else if s.starts_with("VARCHAR") || s.starts_with("CHARACTER VARYING") {
        Ok(Tag::Varchar)
    } else if s.starts_with("CHAR") {
        Ok(Tag::Char)
    } else if s.starts_with("BOOL") {
        Ok(Tag::Logical)
    } else if s.starts_with("DATETIME") {
        Ok(Tag::Datetime)
    } else if s.starts_with("TIMESTAMP") {
        Ok(Tag::Timestamp)
    } else if s.starts_with("DATE") {
        Ok(Tag::Date)
    } else if s.starts_with("TIME") {
        Ok(Tag::Time)
    } else {
        Err(ServerError::Semantic(format!("unsupported CAST target type {dt}")))
    }
}

/// Classifies a parsed statement for `statement_type()`. Only `SELECT` is
/// driven through the rest of the pipeline here (plan generation/execution
/// for DML is the non-goal collaborator, spec.md §1); other kinds are
/// still classified so `statement_type()`/`column_types()` answer
/// correctly for them.
pub fn classify(stmt: &Statement) -> crate::session::StatementType {
    use crate::session::StatementType;
    if matches!(stmt, Statement::Query(_)) {
        return StatementType::Select;
    }
    let text = stmt.to_string();
    let upper = text.trim_start().to_uppercase();
    if upper.starts_with("INSERT") {
        StatementType::Insert
    } else if upper.starts_with("UPDATE") {
        StatementType::Update
    } else if upper.starts_with("DELETE") {
        StatementType::Delete
    } else {
        StatementType::Other
    }
}

pub fn as_query(stmt: &Statement) -> Option<&Query> {
    match stmt {
        Statement::Query(q) => Some(q),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;

    #[test]
    fn simple_arithmetic_select_has_one_host_var() {
        let stmt = parse_one("SELECT ?+1").unwrap();
        let query = as_query(&stmt).unwrap();
        let cfg = ServerConfig::default();
        let compiled = compile_select(query, &HashMap::new(), &cfg).unwrap();
        assert_eq!(compiled.host_var_domains.len(), 1);
        assert_eq!(compiled.host_var_domains[0], Some(Tag::Integer));
        assert_eq!(compiled.column_types, vec![Tag::Integer]);
    }

    #[test]
    fn constant_expression_folds_at_compile_time() {
        let stmt = parse_one("SELECT 1+2*3").unwrap();
        let query = as_query(&stmt).unwrap();
        let cfg = ServerConfig::default();
        let compiled = compile_select(query, &HashMap::new(), &cfg).unwrap();
        assert_eq!(compiled.select_list, vec![Expr::Literal(Literal::Integer(7))]);
    }

    #[test]
    fn multiple_statements_is_rejected() {
        let err = parse_one("SELECT 1; SELECT 2").unwrap_err();
        assert_eq!(err, ServerError::MultipleStatement);
    }

    #[test]
    fn empty_text_is_rejected() {
        let err = parse_one("   ").unwrap_err();
        assert_eq!(err, ServerError::EmptyStatement);
    }

    #[test]
    fn unknown_column_is_semantic_error() {
        let stmt = parse_one("SELECT missing_col").unwrap();
        let query = as_query(&stmt).unwrap();
        let cfg = ServerConfig::default();
        let err = compile_select(query, &HashMap::new(), &cfg).unwrap_err();
        assert!(matches!(err, ServerError::Semantic(_)));
    }

    #[test]
    fn limit_rewrite_runs_during_compile() {
        let stmt = parse_one("SELECT a FROM t ORDER BY a LIMIT 5").unwrap();
        let query = as_query(&stmt).unwrap();
        let cfg = ServerConfig::default();
        let mut tables = HashMap::new();
        tables.insert(
            "t".to_string(),
            TableDef { columns: vec![("a".to_string(), Tag::Integer)], rows: vec![] },
        );
        let compiled = compile_select(query, &tables, &cfg).unwrap();
        assert_eq!(compiled.column_types, vec![Tag::Integer]);
        assert_eq!(compiled.source_table.as_deref(), Some("t"));
    }
}
