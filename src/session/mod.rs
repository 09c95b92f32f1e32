//! Session / statement book (C4): per-connection compile/execute state.
//! A session owns the statements it has compiled (addressed by a 1-based
//! position, the client-visible "statement id") and the named prepared
//! statements it holds server-side (spec.md §4.4, §4.6). Plan caching and
//! execution are delegated to the shared [`xasl::PlanCache`] and
//! [`qmgr::QueryManager`] every session in the process holds a handle to.

mod sqltext;

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use crate::plan::{Plan, TableSource};
use crate::qmgr::{ExecFlags, ExecuteOutcome, QueryManager};
use crate::typecheck::{Literal, Tag};
use crate::xasl::{PlanCache, PlanId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementType {
    Select,
    Insert,
    Update,
    Delete,
    Other,
}

/// A statement's position in the compile/execute lifecycle. Metadata
/// queries (`statement_type`, `column_types`, ...) only require
/// `Compiled`; re-running `execute` on an already-`Executed` statement is
/// allowed and simply reruns the plan (spec.md §4.4: compile and execute
/// are separate, repeatable steps).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Compiled,
    Executed,
}

/// Everything compiled from one piece of SQL text: enough to execute it
/// and to answer metadata queries about it, independent of whether it was
/// reached through `compile()` or `prepare_statement()`.
struct StatementRecord {
    sql_text: String,
    kind: StatementType,
    column_types: Vec<Tag>,
    host_var_domains: Vec<Option<Tag>>,
    plan: Option<Plan>,
    plan_id: Option<PlanId>,
    stage: Stage,
}

/// The metadata a prepared statement keeps answerable by name even after
/// `deallocate()` — deliberately separate from the live [`StatementRecord`]
/// so a `DEALLOCATE` immediately followed by `DESCRIBE`-style metadata
/// queries against the now-freed name still has something to read
/// (DESIGN.md's "name-keyed executed snapshot" decision).
#[derive(Clone)]
struct ExecutedDescriptor {
    kind: StatementType,
    column_types: Vec<Tag>,
}

/// A compile-and-plan-cache owning slot for a named prepared statement.
struct PreparedEntry {
    record: StatementRecord,
}

/// A table this session's `SELECT`s may reference, resolved by name at
/// compile time. A real build would resolve this against the catalog and
/// storage engine (a non-goal collaborator here); tests and the demo
/// server register one directly.
#[derive(Debug, Clone)]
pub struct TableDef {
    pub columns: Vec<(String, Tag)>,
    pub rows: Vec<Vec<Literal>>,
}

impl TableDef {
    fn to_source(&self) -> TableSource {
        TableSource {
            columns: self.columns.iter().map(|(n, _)| n.clone()).collect(),
            rows: self.rows.clone(),
        }
    }
}

/// One client connection's compile/execute state. `user_oid` is the plan
/// cache partitioning key (spec.md §4.6: the cache is keyed on `(sql
/// text, user OID)`, so two users never share a cached plan for
/// textually identical SQL with different privileges).
pub struct Session {
    cfg: Arc<ServerConfig>,
    plan_cache: Arc<PlanCache>,
    query_manager: Arc<QueryManager>,
    user_oid: i32,
    tables: HashMap<String, TableDef>,
    statements: Vec<Option<StatementRecord>>,
    prepared: HashMap<String, PreparedEntry>,
    executed_snapshots: HashMap<String, ExecutedDescriptor>,
    closed: bool,
}

impl Session {
    pub fn new(
        cfg: Arc<ServerConfig>,
        plan_cache: Arc<PlanCache>,
        query_manager: Arc<QueryManager>,
        user_oid: i32,
    ) -> Session {
        Session {
            cfg,
            plan_cache,
            query_manager,
            user_oid,
            tables: HashMap::new(),
            statements: Vec::new(),
            prepared: HashMap::new(),
            executed_snapshots: HashMap::new(),
            closed: false,
        }
    }

    /// Registers (or replaces) a table this session's `SELECT`s may scan.
    pub fn register_table(&mut self, name: &str, def: TableDef) {
        self.tables.insert(name.to_lowercase(), def);
    }

    fn check_open(&self) -> Result<()> {
        if self.closed {
            return Err(ServerError::InvalidSession);
        }
        Ok(())
    }

    /// Builds a `StatementRecord` from one piece of SQL text: parses,
    /// classifies, and — for a `SELECT` — runs the type checker/folder and
    /// installs the resulting plan in the shared plan cache.
    fn build_record(&self, sql_text: &str) -> Result<StatementRecord> {
        let stmt = sqltext::parse_one(sql_text)?;
        let kind = sqltext::classify(&stmt);

        if kind != StatementType::Select {
            return Ok(StatementRecord {
                sql_text: sql_text.to_string(),
                kind,
                column_types: Vec::new(),
                host_var_domains: Vec::new(),
                plan: None,
                plan_id: None,
                stage: Stage::Compiled,
            });
        }

        let query = sqltext::as_query(&stmt).expect("classify() agreed this is a Query");
        let compiled = sqltext::compile_select(query, &self.tables, &self.cfg)?;
        let source = compiled
            .source_table
            .as_ref()
            .and_then(|name| self.tables.get(name))
            .map(TableDef::to_source);
        let plan = Plan { select_list: compiled.select_list, source };
        let plan_id = self.install_plan(sql_text, plan.clone())?;

        Ok(StatementRecord {
            sql_text: sql_text.to_string(),
            kind,
            column_types: compiled.column_types,
            host_var_domains: compiled.host_var_domains,
            plan: Some(plan),
            plan_id: Some(plan_id),
            stage: Stage::Compiled,
        })
    }

    /// Installs `plan` under the plan cache's `(sql_text, user_oid)` key
    /// and mirrors it into the query manager's own plan table, which is
    /// what `execute_query` actually reads (DESIGN.md: the cache stores an
    /// opaque byte stream — here just the SQL text — while the query
    /// manager keeps the structured `Plan` the in-memory executor runs).
    fn install_plan(&self, sql_text: &str, plan: Plan) -> Result<PlanId> {
        let id = self
            .plan_cache
            .prepare(sql_text, self.user_oid, Some(sql_text.as_bytes().to_vec()))?
            .ok_or(ServerError::OutOfVirtualMemory)?;
        self.query_manager.install_plan(id, plan);
        Ok(id)
    }

    /// Compiles one statement and returns its 1-based statement id
    /// (spec.md §4.4).
    pub fn compile(&mut self, sql_text: &str) -> Result<usize> {
        self.check_open()?;
        let record = self.build_record(sql_text)?;
        self.statements.push(Some(record));
        Ok(self.statements.len())
    }

    fn record(&self, position: usize) -> Result<&StatementRecord> {
        self.statements
            .get(position.wrapping_sub(1))
            .and_then(|s| s.as_ref())
            .ok_or(ServerError::InvalidSession)
    }

    fn record_mut(&mut self, position: usize) -> Result<&mut StatementRecord> {
        self.statements
            .get_mut(position.wrapping_sub(1))
            .and_then(|s| s.as_mut())
            .ok_or(ServerError::InvalidSession)
    }

    /// Executes a previously compiled statement. Only `SELECT` carries a
    /// plan through this crate's execution path (DML/DDL execution is the
    /// non-goal storage-engine collaborator, spec.md §1). On
    /// `InvalidXaslNode` — the cached plan was evicted between `compile`
    /// and `execute` — recompiles once from the original SQL text and
    /// retries exactly once more before giving up (spec.md §4.6).
    pub fn execute(
        &mut self,
        position: usize,
        host_vars: Vec<Literal>,
        flags: ExecFlags,
        client_cache_time: Option<u64>,
    ) -> Result<ExecuteOutcome> {
        self.check_open()?;
        let sql_text = self.record(position)?.sql_text.clone();
        let expected = self.record(position)?.host_var_domains.len();
        if host_vars.len() != expected {
            return Err(ServerError::IncorrectHostvarCount { expected, got: host_vars.len() });
        }
        let plan_id = self
            .record(position)?
            .plan_id
            .ok_or_else(|| ServerError::Execution("statement has no executable plan".into()))?;

        let outcome = match self.query_manager.execute_query(plan_id, host_vars.clone(), flags, client_cache_time) {
            Ok(outcome) => outcome,
            Err(ServerError::InvalidXaslNode) => {
                let fresh = self.build_record(&sql_text)?;
                let new_plan_id = fresh.plan_id.ok_or(ServerError::InvalidXaslNode)?;
                *self.record_mut(position)? = fresh;
                self.query_manager.execute_query(new_plan_id, host_vars, flags, client_cache_time)?
            }
            Err(e) => return Err(e),
        };
        self.record_mut(position)?.stage = Stage::Executed;
        Ok(outcome)
    }

    /// Drops one compiled statement. Positions are never reused or
    /// shifted, so later statements keep their ids (spec.md §4.4).
    pub fn drop_statement(&mut self, position: usize) -> Result<()> {
        self.check_open()?;
        let slot = self
            .statements
            .get_mut(position.wrapping_sub(1))
            .ok_or(ServerError::InvalidSession)?;
        *slot = None;
        Ok(())
    }

    pub fn drop_all(&mut self) -> Result<()> {
        self.check_open()?;
        self.statements.clear();
        Ok(())
    }

    pub fn close(&mut self) {
        self.statements.clear();
        self.prepared.clear();
        self.closed = true;
    }

    pub fn statement_count(&self) -> usize {
        self.statements.iter().filter(|s| s.is_some()).count()
    }

    pub fn statement_type(&self, position: usize) -> Result<StatementType> {
        Ok(self.record(position)?.kind)
    }

    pub fn column_types(&self, position: usize) -> Result<Vec<Tag>> {
        Ok(self.record(position)?.column_types.clone())
    }

    /// Number of `?` host variables the statement expects.
    pub fn input_markers(&self, position: usize) -> Result<usize> {
        Ok(self.record(position)?.host_var_domains.len())
    }

    /// Number of projected output columns.
    pub fn output_markers(&self, position: usize) -> Result<usize> {
        Ok(self.record(position)?.column_types.len())
    }

    /// `PREPARE name FROM sql_text` (spec.md §4.6). Non-`SELECT`
    /// statements cannot be held server-side as a named prepared
    /// statement in this crate — there is no plan for the storage engine
    /// to run later, so preparing one would just be dead weight.
    pub fn prepare_statement(&mut self, name: &str, sql_text: &str) -> Result<()> {
        self.check_open()?;
        let record = self.build_record(sql_text)?;
        if record.kind != StatementType::Select {
            return Err(ServerError::DisallowedAsPrepared("non-SELECT statements"));
        }
        let key = name.to_lowercase();
        self.executed_snapshots.insert(
            key.clone(),
            ExecutedDescriptor { kind: record.kind, column_types: record.column_types.clone() },
        );
        self.prepared.insert(key, PreparedEntry { record });
        Ok(())
    }

    /// `EXECUTE name USING host_vars` (spec.md §4.6). Same single-retry
    /// recompile behavior as `execute()`.
    pub fn execute_prepared(
        &mut self,
        name: &str,
        host_vars: Vec<Literal>,
        flags: ExecFlags,
        client_cache_time: Option<u64>,
    ) -> Result<ExecuteOutcome> {
        self.check_open()?;
        let key = name.to_lowercase();
        let entry = self.prepared.get(&key).ok_or_else(|| ServerError::PreparedNameNotFound(name.to_string()))?;
        let expected = entry.record.host_var_domains.len();
        if host_vars.len() != expected {
            return Err(ServerError::IncorrectHostvarCount { expected, got: host_vars.len() });
        }
        let sql_text = entry.record.sql_text.clone();
        let plan_id = entry.record.plan_id.ok_or(ServerError::InvalidXaslNode)?;

        match self.query_manager.execute_query(plan_id, host_vars.clone(), flags, client_cache_time) {
            Ok(outcome) => Ok(outcome),
            Err(ServerError::InvalidXaslNode) => {
                let fresh = self.build_record(&sql_text)?;
                let new_plan_id = fresh.plan_id.ok_or(ServerError::InvalidXaslNode)?;
                if let Some(entry) = self.prepared.get_mut(&key) {
                    entry.record = fresh;
                }
                self.query_manager.execute_query(new_plan_id, host_vars, flags, client_cache_time)
            }
            Err(e) => Err(e),
        }
    }

    /// `DEALLOCATE name` (spec.md §4.6). The name stops being executable
    /// immediately; its metadata stays answerable via `executed_snapshots`
    /// until the session closes.
    pub fn deallocate(&mut self, name: &str) -> Result<()> {
        self.check_open()?;
        let key = name.to_lowercase();
        self.prepared
            .remove(&key)
            .map(|_| ())
            .ok_or_else(|| ServerError::PreparedNameNotFound(name.to_string()))
    }

    pub fn prepared_statement_type(&self, name: &str) -> Result<StatementType> {
        self.executed_snapshots
            .get(&name.to_lowercase())
            .map(|d| d.kind)
            .ok_or_else(|| ServerError::PreparedNameNotFound(name.to_string()))
    }

    pub fn prepared_column_types(&self, name: &str) -> Result<Vec<Tag>> {
        self.executed_snapshots
            .get(&name.to_lowercase())
            .map(|d| d.column_types.clone())
            .ok_or_else(|| ServerError::PreparedNameNotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::InMemoryExecutor;

    fn session() -> Session {
        let cfg = Arc::new(ServerConfig::default());
        let plan_cache = Arc::new(PlanCache::new(100, 1 << 20));
        let query_manager = Arc::new(QueryManager::new(Arc::new(InMemoryExecutor), 8));
        Session::new(cfg, plan_cache, query_manager, 0)
    }

    #[test]
    fn compile_then_execute_literal_select() {
        let mut s = session();
        let pos = s.compile("SELECT 1+2*3").unwrap();
        assert_eq!(pos, 1);
        assert_eq!(s.statement_type(pos).unwrap(), StatementType::Select);
        assert_eq!(s.column_types(pos).unwrap(), vec![Tag::Integer]);
        let outcome = s.execute(pos, vec![], ExecFlags::Sync, None).unwrap();
        assert_eq!(outcome.first_page, Some(vec![Literal::Integer(7)]));
    }

    #[test]
    fn execute_with_host_var_against_known_column() {
        let mut s = session();
        s.register_table(
            "t",
            TableDef { columns: vec![("a".into(), Tag::Integer)], rows: vec![vec![Literal::Integer(5)]] },
        );
        let pos = s.compile("SELECT a FROM t WHERE a = ?").unwrap();
        assert_eq!(s.input_markers(pos).unwrap(), 1);
        let outcome = s.execute(pos, vec![Literal::Integer(5)], ExecFlags::Sync, None).unwrap();
        assert_eq!(outcome.first_page, Some(vec![Literal::Integer(5)]));
    }

    #[test]
    fn wrong_host_var_count_is_rejected() {
        let mut s = session();
        let pos = s.compile("SELECT ?+1").unwrap();
        let err = s.execute(pos, vec![], ExecFlags::Sync, None).unwrap_err();
        assert_eq!(err, ServerError::IncorrectHostvarCount { expected: 1, got: 0 });
    }

    #[test]
    fn drop_statement_invalidates_its_position() {
        let mut s = session();
        let pos = s.compile("SELECT 1").unwrap();
        s.drop_statement(pos).unwrap();
        assert_eq!(s.statement_type(pos).unwrap_err(), ServerError::InvalidSession);
    }

    #[test]
    fn closed_session_rejects_further_compiles() {
        let mut s = session();
        s.close();
        assert_eq!(s.compile("SELECT 1").unwrap_err(), ServerError::InvalidSession);
    }

    #[test]
    fn prepare_execute_deallocate_round_trip() {
        let mut s = session();
        s.prepare_statement("p1", "SELECT ?+1").unwrap();
        assert_eq!(s.prepared_statement_type("p1").unwrap(), StatementType::Select);
        let outcome = s.execute_prepared("p1", vec![Literal::Integer(4)], ExecFlags::Sync, None).unwrap();
        assert_eq!(outcome.first_page, Some(vec![Literal::Integer(5)]));
        s.deallocate("p1").unwrap();
        assert_eq!(
            s.execute_prepared("p1", vec![Literal::Integer(4)], ExecFlags::Sync, None).unwrap_err(),
            ServerError::PreparedNameNotFound("p1".to_string())
        );
        // Metadata stays answerable after deallocate.
        assert_eq!(s.prepared_statement_type("p1").unwrap(), StatementType::Select);
    }

    #[test]
    fn preparing_a_non_select_is_disallowed() {
        let mut s = session();
        let err = s.prepare_statement("p1", "INSERT INTO t VALUES (1)").unwrap_err();
        assert_eq!(err, ServerError::DisallowedAsPrepared("non-SELECT statements"));
    }

    #[test]
    fn unknown_prepared_name_is_reported() {
        let s = session();
        let err = s.prepared_column_types("missing").unwrap_err();
        assert_eq!(err, ServerError::PreparedNameNotFound("missing".to_string()));
    }
}
