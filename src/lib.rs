pub mod audit;
pub mod driver;
pub mod error;
pub mod sql;
pub mod uql;

pub use audit::{AuditEvent, AuditTransaction, EventKind, RestoreSummary};
pub use driver::{Connection, ConnectionProvider, Rows, Store, StoreConfig};
pub use error::{Error, ErrorKind, Result};
pub use sql::{Dialect, Generator, Param, PostgresDialect, SqliteDialect, Statement};
pub use uql::{parse, parse_path, UriQuery};

#[cfg(feature = "postgres")]
pub use driver::PostgresProvider;
#[cfg(feature = "sqlite")]
pub use driver::SqliteProvider;
