use std::sync::Mutex;

use postgres::error::SqlState;
use postgres::types::ToSql;
use postgres::{Client, NoTls};

use crate::driver::conn::{sql_context, Connection, ConnectionProvider};
use crate::error::{Error, Result};
use crate::sql::{Dialect, Param, PostgresDialect};

/// The server backend: one PostgreSQL client behind a mutex, serialisable
/// transactions.
pub struct PostgresProvider {
    conn: Mutex<PostgresConnection>,
}

pub struct PostgresConnection {
    client: Client,
}

impl PostgresProvider {
    /// Connect with a libpq-style connection string, e.g.
    /// `host=localhost user=app dbname=app`.
    pub fn connect(params: &str) -> Result<Self> {
        let client = Client::connect(params, NoTls)
            .map_err(|e| Error::backend("connecting to the server backend", e))?;
        Ok(PostgresProvider {
            conn: Mutex::new(PostgresConnection { client }),
        })
    }
}

impl ConnectionProvider for PostgresProvider {
    type Conn = PostgresConnection;

    fn dialect(&self) -> &'static dyn Dialect {
        &PostgresDialect
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut Self::Conn) -> Result<T>) -> Result<T> {
        let mut guard = self
            .conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }
}

fn map_err(context: &str, err: postgres::Error) -> Error {
    if err.code() == Some(&SqlState::UNIQUE_VIOLATION) {
        return Error::Integrity {
            reason: err.to_string(),
        };
    }
    Error::backend(context.to_string(), err)
}

/// Numeric parameters bind as float8: the dialect reads numbers with a
/// `::float8` cast, and text-context numbers were already rendered to text
/// by the generator.
fn bind(params: &[Param]) -> Vec<Box<dyn ToSql + Sync>> {
    params
        .iter()
        .map(|p| -> Box<dyn ToSql + Sync> {
            match p {
                Param::Null => Box::new(Option::<String>::None),
                Param::Int(i) => Box::new(*i as f64),
                Param::Float(f) => Box::new(*f),
                Param::Text(s) | Param::Json(s) => Box::new(s.clone()),
            }
        })
        .collect()
}

impl Connection for PostgresConnection {
    fn begin(&mut self) -> Result<()> {
        self.client
            .batch_execute("begin isolation level serializable")
            .map_err(|e| map_err("begin", e))
    }

    fn commit(&mut self) -> Result<()> {
        self.client
            .batch_execute("commit")
            .map_err(|e| map_err("commit", e))
    }

    fn rollback(&mut self) -> Result<()> {
        self.client
            .batch_execute("rollback")
            .map_err(|e| map_err("rollback", e))
    }

    fn execute(&mut self, sql: &str, params: &[Param]) -> Result<u64> {
        let context = sql_context(sql);
        let owned = bind(params);
        let refs: Vec<&(dyn ToSql + Sync)> = owned.iter().map(|b| b.as_ref()).collect();
        self.client
            .execute(sql, &refs)
            .map_err(|e| map_err(&context, e))
    }

    fn query(&mut self, sql: &str, params: &[Param]) -> Result<Vec<Option<String>>> {
        let context = sql_context(sql);
        let owned = bind(params);
        let refs: Vec<&(dyn ToSql + Sync)> = owned.iter().map(|b| b.as_ref()).collect();
        let rows = self
            .client
            .query(sql, &refs)
            .map_err(|e| map_err(&context, e))?;
        rows.iter()
            .map(|row| row.try_get::<_, Option<String>>(0).map_err(|e| map_err(&context, e)))
            .collect()
    }
}
