pub mod dialect;
pub mod generator;

pub use dialect::{Dialect, PostgresDialect, SqliteDialect};
pub use generator::Generator;

/// A bound statement parameter. Values from the query string and document
/// payloads only ever reach the backend through these; nothing is
/// interpolated into SQL text.
#[derive(Debug, Clone, PartialEq)]
pub enum Param {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    /// A serialised JSON payload (documents, patches, audit events).
    Json(String),
}

/// A parameterised SQL statement, ready for a driver connection.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Param>,
}

impl Statement {
    pub fn bare(sql: impl Into<String>) -> Self {
        Statement {
            sql: sql.into(),
            params: Vec::new(),
        }
    }
}
