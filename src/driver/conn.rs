use crate::error::Result;
use crate::sql::{Dialect, Param, Statement};

/// One transactional backend connection. Every statement the core runs goes
/// through this contract; the core never sees the underlying driver types.
pub trait Connection {
    fn begin(&mut self) -> Result<()>;
    fn commit(&mut self) -> Result<()>;
    fn rollback(&mut self) -> Result<()>;

    /// Run a statement that returns no rows; yields the affected row count.
    fn execute(&mut self, sql: &str, params: &[Param]) -> Result<u64>;

    /// Run a single-column query. `None` is a SQL NULL.
    fn query(&mut self, sql: &str, params: &[Param]) -> Result<Vec<Option<String>>>;

    fn execute_stmt(&mut self, stmt: &Statement) -> Result<u64> {
        self.execute(&stmt.sql, &stmt.params)
    }

    fn query_stmt(&mut self, stmt: &Statement) -> Result<Vec<Option<String>>> {
        self.query(&stmt.sql, &stmt.params)
    }
}

/// Yields scoped access to one connection. The guard scope is the closure:
/// the connection is released on every exit path, including errors.
pub trait ConnectionProvider {
    type Conn: Connection;

    /// The dialect this provider's connections speak.
    fn dialect(&self) -> &'static dyn Dialect;

    fn with_conn<T>(&self, f: impl FnOnce(&mut Self::Conn) -> Result<T>) -> Result<T>;
}

/// Shorten a statement for backend error context. The SQL text carries no
/// user values (those are bound parameters), so it is safe to surface.
pub(crate) fn sql_context(sql: &str) -> String {
    const MAX: usize = 160;
    if sql.len() <= MAX {
        sql.to_string()
    } else {
        let cut: String = sql.chars().take(MAX).collect();
        format!("{cut}…")
    }
}
