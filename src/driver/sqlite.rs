use std::path::Path as FsPath;
use std::sync::Mutex;

use rusqlite::types::{ToSqlOutput, Value as SqlValue, ValueRef};
use rusqlite::params_from_iter;

use crate::driver::conn::{sql_context, Connection, ConnectionProvider};
use crate::error::{Error, Result};
use crate::sql::{Dialect, Param, SqliteDialect};

impl rusqlite::ToSql for Param {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Param::Null => ToSqlOutput::Owned(SqlValue::Null),
            Param::Int(i) => ToSqlOutput::Owned(SqlValue::Integer(*i)),
            Param::Float(f) => ToSqlOutput::Owned(SqlValue::Real(*f)),
            Param::Text(s) | Param::Json(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

/// The embedded backend: one SQLite connection behind a mutex, WAL mode,
/// immediate transactions (SQLite is serialisable by construction).
pub struct SqliteProvider {
    conn: Mutex<SqliteConnection>,
}

pub struct SqliteConnection {
    inner: rusqlite::Connection,
}

impl SqliteProvider {
    /// Open (or create) a store at `path`.
    pub fn open(path: impl AsRef<FsPath>) -> Result<Self> {
        let inner = rusqlite::Connection::open(path)
            .map_err(|e| Error::backend("opening the embedded store", e))?;
        inner
            .execute_batch("pragma journal_mode=wal; pragma foreign_keys=on;")
            .map_err(|e| Error::backend("configuring the embedded store", e))?;
        Ok(SqliteProvider {
            conn: Mutex::new(SqliteConnection { inner }),
        })
    }

    /// Open an in-memory store, useful for testing.
    pub fn open_in_memory() -> Result<Self> {
        let inner = rusqlite::Connection::open_in_memory()
            .map_err(|e| Error::backend("opening the embedded store", e))?;
        Ok(SqliteProvider {
            conn: Mutex::new(SqliteConnection { inner }),
        })
    }
}

impl ConnectionProvider for SqliteProvider {
    type Conn = SqliteConnection;

    fn dialect(&self) -> &'static dyn Dialect {
        &SqliteDialect
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut Self::Conn) -> Result<T>) -> Result<T> {
        let mut guard = self
            .conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }
}

fn map_err(context: &str, err: rusqlite::Error) -> Error {
    if let rusqlite::Error::SqliteFailure(failure, message) = &err {
        if failure.code == rusqlite::ErrorCode::ConstraintViolation {
            let detail = message
                .clone()
                .unwrap_or_else(|| "constraint violation".to_string());
            return Error::Integrity { reason: detail };
        }
    }
    Error::backend(context.to_string(), err)
}

impl Connection for SqliteConnection {
    fn begin(&mut self) -> Result<()> {
        self.inner
            .execute_batch("begin immediate")
            .map_err(|e| map_err("begin immediate", e))
    }

    fn commit(&mut self) -> Result<()> {
        self.inner
            .execute_batch("commit")
            .map_err(|e| map_err("commit", e))
    }

    fn rollback(&mut self) -> Result<()> {
        self.inner
            .execute_batch("rollback")
            .map_err(|e| map_err("rollback", e))
    }

    fn execute(&mut self, sql: &str, params: &[Param]) -> Result<u64> {
        let context = sql_context(sql);
        self.inner
            .execute(sql, params_from_iter(params.iter()))
            .map(|n| n as u64)
            .map_err(|e| map_err(&context, e))
    }

    fn query(&mut self, sql: &str, params: &[Param]) -> Result<Vec<Option<String>>> {
        let context = sql_context(sql);
        let mut stmt = self
            .inner
            .prepare(sql)
            .map_err(|e| map_err(&context, e))?;
        let mut rows = stmt
            .query(params_from_iter(params.iter()))
            .map_err(|e| map_err(&context, e))?;
        let mut out = Vec::new();
        loop {
            let row = match rows.next() {
                Ok(Some(row)) => row,
                Ok(None) => break,
                Err(e) => return Err(map_err(&context, e)),
            };
            let value = match row.get_ref(0).map_err(|e| map_err(&context, e))? {
                ValueRef::Null => None,
                ValueRef::Integer(i) => Some(i.to_string()),
                ValueRef::Real(f) => Some(f.to_string()),
                ValueRef::Text(t) => Some(String::from_utf8_lossy(t).into_owned()),
                ValueRef::Blob(_) => None,
            };
            out.push(value);
        }
        Ok(out)
    }
}
