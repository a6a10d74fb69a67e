use serde_json::Value;
use tracing::debug;

use crate::audit::restore::{diff_documents, winning_candidates, RestoreSummary};
use crate::audit::{AuditEvent, AuditTransaction};
use crate::driver::conn::{Connection, ConnectionProvider};
use crate::error::{Error, Result};
use crate::sql::generator::build_patch;
use crate::sql::{Generator, Param};
use crate::uql::ast::{CompareOp, Condition, Literal, UriQuery, WhereExpr};
use crate::uql::parser::{parse, parse_path};
use crate::uql::path::Path;

/// Driver configuration: one schema (tenant), one actor identity, and the
/// optional `create`/`read` auditing switches (both off by default).
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub schema: String,
    pub requestor: String,
    pub requestor_name: Option<String>,
    pub audit_create: bool,
    pub audit_read: bool,
}

impl StoreConfig {
    pub fn new(schema: impl Into<String>, requestor: impl Into<String>) -> Self {
        StoreConfig {
            schema: schema.into(),
            requestor: requestor.into(),
            requestor_name: None,
            audit_create: false,
            audit_read: false,
        }
    }
}

/// The result of a select: decoded documents (or projection tuples as JSON
/// arrays). The backing connection is released before this is handed out,
/// so dropping it half-consumed cannot leak anything.
#[derive(Debug)]
pub struct Rows {
    inner: std::vec::IntoIter<Value>,
}

impl Iterator for Rows {
    type Item = Value;

    fn next(&mut self) -> Option<Value> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for Rows {}

/// A versioned document store over one connection provider. Every public
/// operation is one transaction: the mutation and its audit rows commit
/// together or not at all.
pub struct Store<P: ConnectionProvider> {
    provider: P,
    config: StoreConfig,
}

pub(crate) fn audit_table_name(table: &str) -> String {
    format!("{table}_audit")
}

pub(crate) fn is_audit_table(table: &str) -> bool {
    table.ends_with("_audit")
}

fn decode_rows(raw: Vec<Option<String>>) -> Result<Vec<Value>> {
    raw.into_iter()
        .map(|cell| match cell {
            None => Ok(Value::Null),
            Some(text) => serde_json::from_str(&text)
                .map_err(|e| Error::backend("decoding a result row", e)),
        })
        .collect()
}

fn ensure_table<C: Connection>(conn: &mut C, gen: &Generator<'_>, table: &str) -> Result<()> {
    for sql in gen.create_table_sql(table)? {
        conn.execute(&sql, &[])?;
    }
    Ok(())
}

fn table_exists<C: Connection>(conn: &mut C, gen: &Generator<'_>, table: &str) -> Result<bool> {
    let stmt = gen.table_exists_stmt(table)?;
    Ok(!conn.query_stmt(&stmt)?.is_empty())
}

/// Append journal rows for `table`, creating its audit table (and the
/// timestamp index) on first use.
fn write_audit<C: Connection>(
    conn: &mut C,
    gen: &Generator<'_>,
    table: &str,
    events: &[AuditEvent],
) -> Result<()> {
    let audit = audit_table_name(table);
    ensure_table(conn, gen, &audit)?;
    conn.execute(
        &gen.create_index_sql(&audit, &Path::from_key("timestamp"), false)?,
        &[],
    )?;
    let insert = gen.insert_sql(&audit)?;
    for event in events {
        let body =
            serde_json::to_string(event).map_err(|e| Error::backend("encoding an audit row", e))?;
        conn.execute(&insert, &[Param::Json(body)])?;
    }
    Ok(())
}

fn value_literal(value: &Value) -> Result<Literal> {
    match value {
        Value::Null => Ok(Literal::Null),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Literal::Int(i))
            } else if let Some(f) = n.as_f64() {
                Ok(Literal::Float(f))
            } else {
                Err(Error::validation("primary key value out of range"))
            }
        }
        Value::String(s) => Ok(Literal::Str(s.clone())),
        _ => Err(Error::validation("primary key values must be scalars")),
    }
}

impl<P: ConnectionProvider> Store<P> {
    pub fn new(provider: P, config: StoreConfig) -> Self {
        Store { provider, config }
    }

    fn generator(&self) -> Generator<'_> {
        Generator::new(self.provider.dialect(), &self.config.schema)
    }

    fn audit_transaction(&self, reason: Option<&str>, query: &str) -> AuditTransaction {
        AuditTransaction::begin(
            &self.config.requestor,
            self.config.requestor_name.as_deref(),
            reason,
            query,
        )
    }

    fn in_txn<T>(&self, f: impl FnOnce(&mut P::Conn) -> Result<T>) -> Result<T> {
        self.provider.with_conn(|conn| {
            conn.begin()?;
            match f(conn) {
                Ok(value) => match conn.commit() {
                    Ok(()) => Ok(value),
                    Err(e) => {
                        let _ = conn.rollback();
                        Err(e)
                    }
                },
                Err(e) => {
                    let _ = conn.rollback();
                    Err(e)
                }
            }
        })
    }

    // ==================== reads ====================

    /// Run a select query and return the decoded rows.
    pub fn table_select(&self, table: &str, uri_query: &str) -> Result<Rows> {
        let query = parse(uri_query)?;
        query.validate()?;
        let gen = self.generator();
        let stmt = gen.select(table, &query)?;
        let audit_read = self.config.audit_read && !is_audit_table(table);
        let raw = if audit_read {
            self.in_txn(|conn| {
                let raw = conn.query_stmt(&stmt)?;
                let tsc = self.audit_transaction(query.message.as_deref(), uri_query);
                write_audit(conn, &gen, table, &[tsc.read()])?;
                Ok(raw)
            })?
        } else {
            self.provider.with_conn(|conn| conn.query_stmt(&stmt))?
        };
        let values = decode_rows(raw)?;
        debug!(table, rows = values.len(), "select");
        Ok(Rows {
            inner: values.into_iter(),
        })
    }

    /// Names of the document tables in this store's schema (audit tables
    /// are filtered out).
    pub fn tables_list(&self) -> Result<Vec<String>> {
        let gen = self.generator();
        let stmt = gen.tables_list_stmt()?;
        let names = self.provider.with_conn(|conn| conn.query_stmt(&stmt))?;
        let dialect = self.provider.dialect();
        Ok(names
            .into_iter()
            .flatten()
            .filter_map(|physical| dialect.strip_schema(&self.config.schema, &physical))
            .filter(|name| !is_audit_table(name))
            .collect())
    }

    // ==================== writes ====================

    /// Insert one document or a batch. A batch is one transaction: any
    /// failure rolls back every row. Creates the table on first use.
    pub fn table_insert(&self, table: &str, data: &Value) -> Result<u64> {
        let docs: Vec<Value> = match data {
            Value::Object(_) => vec![data.clone()],
            Value::Array(items) => {
                if items.iter().any(|d| !d.is_object()) {
                    return Err(Error::validation("documents must be JSON objects"));
                }
                items.clone()
            }
            _ => return Err(Error::validation("documents must be JSON objects")),
        };
        if docs.is_empty() {
            return Ok(0);
        }
        let gen = self.generator();
        self.in_txn(|conn| {
            ensure_table(conn, &gen, table)?;
            let insert = gen.insert_sql(table)?;
            for doc in &docs {
                conn.execute(&insert, &[Param::Json(doc.to_string())])?;
            }
            if self.config.audit_create && !is_audit_table(table) {
                let tsc = self.audit_transaction(None, "");
                let events: Vec<AuditEvent> = docs.iter().map(|_| tsc.create()).collect();
                write_audit(conn, &gen, table, &events)?;
            }
            debug!(table, inserted = docs.len(), "insert");
            Ok(docs.len() as u64)
        })
    }

    /// Patch the keys listed in `set=` on every matching row, journaling
    /// one `update` audit row per affected document.
    pub fn table_update(&self, table: &str, uri_query: &str, data: &Value) -> Result<u64> {
        if is_audit_table(table) {
            return Err(Error::validation("audit tables are immutable"));
        }
        let query = parse(uri_query)?;
        query.validate()?;
        let set_keys = query
            .set
            .clone()
            .ok_or_else(|| Error::validation_in("update requires a set= clause", "set"))?;
        let patch = build_patch(&set_keys, data)?;
        let gen = self.generator();
        let select_stmt = gen.select_documents(table, query.where_expr.as_ref())?;
        let update_stmt = gen.update(table, &query, data)?;
        self.in_txn(|conn| {
            let previous = decode_rows(conn.query_stmt(&select_stmt)?)?;
            if previous.is_empty() {
                return Ok(0);
            }
            let affected = conn.execute_stmt(&update_stmt)?;
            let tsc = self.audit_transaction(query.message.as_deref(), uri_query);
            let diff = Value::Object(patch);
            let events: Vec<AuditEvent> = previous
                .into_iter()
                .map(|prev| tsc.update(prev, diff.clone()))
                .collect();
            write_audit(conn, &gen, table, &events)?;
            debug!(table, affected, "update");
            Ok(affected)
        })
    }

    /// Delete the matching rows, journaling one `delete` audit row (with
    /// the full prior document) per row. Refuses to run without a filter.
    pub fn table_delete(&self, table: &str, uri_query: &str) -> Result<u64> {
        let query = parse(uri_query)?;
        query.validate()?;
        if query.where_expr.is_none() {
            return Err(Error::validation_in(
                "delete requires a where clause; use table_delete_all to delete every row",
                "where",
            ));
        }
        self.delete_matching(table, &query, uri_query)
    }

    /// The explicit mass-delete entry point: same as [`Store::table_delete`]
    /// but a missing where clause deletes every row (all journaled).
    pub fn table_delete_all(&self, table: &str, uri_query: &str) -> Result<u64> {
        let query = parse(uri_query)?;
        query.validate()?;
        self.delete_matching(table, &query, uri_query)
    }

    fn delete_matching(&self, table: &str, query: &UriQuery, uri_query: &str) -> Result<u64> {
        let gen = self.generator();
        let select_stmt = gen.select_documents(table, query.where_expr.as_ref())?;
        let delete_stmt = gen.delete(table, query.where_expr.as_ref())?;
        self.in_txn(|conn| {
            let previous = decode_rows(conn.query_stmt(&select_stmt)?)?;
            if previous.is_empty() {
                return Ok(0);
            }
            let affected = conn.execute_stmt(&delete_stmt)?;
            if !is_audit_table(table) {
                let tsc = self.audit_transaction(query.message.as_deref(), uri_query);
                let events: Vec<AuditEvent> =
                    previous.into_iter().map(|prev| tsc.delete(prev)).collect();
                write_audit(conn, &gen, table, &events)?;
            }
            debug!(table, affected, "delete");
            Ok(affected)
        })
    }

    // ==================== restore ====================

    /// Rewind documents to their most recent pre-mutation state, as
    /// recorded in the audit journal. Requires the `restore` flag and a
    /// `primary_key=`; an optional `where=` filters the audit rows. The
    /// restore itself is journaled, so it can be restored in turn.
    pub fn table_restore(&self, table: &str, uri_query: &str) -> Result<RestoreSummary> {
        if is_audit_table(table) {
            return Err(Error::validation("audit tables cannot be restored"));
        }
        let query = parse(uri_query)?;
        query.validate()?;
        if !query.restore {
            return Err(Error::validation_in("restore requires the restore flag", "restore"));
        }
        let pk_path = query
            .primary_key
            .clone()
            .ok_or_else(|| Error::validation_in("restore requires primary_key=", "primary_key"))?;
        let gen = self.generator();
        let audit = audit_table_name(table);
        self.in_txn(|conn| {
            if !table_exists(conn, &gen, &audit)? {
                return Err(Error::AuditMissing {
                    table: table.to_string(),
                });
            }
            let audit_stmt = gen.select_documents(&audit, query.where_expr.as_ref())?;
            let events: Vec<AuditEvent> = decode_rows(conn.query_stmt(&audit_stmt)?)?
                .into_iter()
                .map(|row| {
                    serde_json::from_value(row)
                        .map_err(|e| Error::backend("decoding audit rows", e))
                })
                .collect::<Result<_>>()?;
            let candidates = winning_candidates(&events, &pk_path);
            if candidates.is_empty() {
                return Err(Error::AuditMissing {
                    table: table.to_string(),
                });
            }
            // The table may have been dropped since the journal was written.
            ensure_table(conn, &gen, table)?;
            conn.execute(
                &gen.create_index_sql(&audit, &pk_path.prefixed("previous"), false)?,
                &[],
            )?;
            let tsc = self.audit_transaction(query.message.as_deref(), uri_query);
            let insert = gen.insert_sql(table)?;
            let mut summary = RestoreSummary::default();
            let mut journal: Vec<AuditEvent> = Vec::new();
            for candidate in candidates {
                let leaf = WhereExpr::Leaf(Condition {
                    path: pk_path.clone(),
                    op: CompareOp::Eq,
                    negated: false,
                    value: value_literal(&candidate.pk)?,
                });
                let current_stmt = gen.select_documents(table, Some(&leaf))?;
                let current = decode_rows(conn.query_stmt(&current_stmt)?)?;
                match current.len() {
                    // Currently deleted: bring the prior state back.
                    0 => {
                        conn.execute(&insert, &[Param::Json(candidate.previous.to_string())])?;
                        journal.push(tsc.create());
                        summary.restored.push(candidate.pk.clone());
                    }
                    // Present but diverged: overwrite with the journaled
                    // state, so the prior document comes back exactly.
                    1 => {
                        let diff = diff_documents(&current[0], &candidate.previous);
                        if diff.is_empty() {
                            continue;
                        }
                        let replace_stmt =
                            gen.replace(table, &candidate.previous, Some(&leaf))?;
                        conn.execute_stmt(&replace_stmt)?;
                        journal.push(tsc.update(current[0].clone(), Value::Object(diff)));
                        summary.updated.push(candidate.pk.clone());
                    }
                    _ => {
                        return Err(Error::Integrity {
                            reason: format!(
                                "primary key '{}' = {} is not unique",
                                pk_path, candidate.pk
                            ),
                        });
                    }
                }
            }
            if !journal.is_empty() {
                write_audit(conn, &gen, table, &journal)?;
            }
            debug!(
                table,
                restored = summary.restored.len(),
                updated = summary.updated.len(),
                "restore"
            );
            Ok(summary)
        })
    }

    // ==================== schema management ====================

    /// Enforce uniqueness of a JSON path across the table's documents, as a
    /// dialect expression index. Violating inserts fail with
    /// [`Error::Integrity`].
    pub fn ensure_unique_index(&self, table: &str, path: &str) -> Result<()> {
        let pk = parse_path(path)?;
        pk.validate()?;
        if pk.has_wildcard() {
            return Err(Error::validation("unique index paths cannot contain wildcards"));
        }
        let gen = self.generator();
        self.in_txn(|conn| {
            ensure_table(conn, &gen, table)?;
            conn.execute(&gen.create_index_sql(table, &pk, true)?, &[])?;
            Ok(())
        })
    }
}
