use thiserror::Error;

/// Coarse classification of an [`Error`], for callers that map errors onto
/// protocol-level codes without matching on the full variant payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Parse,
    Validation,
    Backend,
    AuditMissing,
    Integrity,
}

#[derive(Error, Debug)]
pub enum Error {
    /// The query string could not be tokenised or did not follow the grammar.
    /// `position` is a character offset into the original query string.
    #[error("parse error at position {position}: expected {expected}")]
    Parse { position: usize, expected: String },

    /// The query parsed but is not executable: aggregate terms without a
    /// covering group_by, a double wildcard, an inverted range window, a
    /// rejected identifier, and similar.
    #[error("invalid query: {reason}")]
    Validation {
        reason: String,
        clause: Option<String>,
    },

    /// A driver failure. `context` names the statement shape being executed,
    /// never parameter values.
    #[error("backend failure while {context}")]
    Backend {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// A restore was requested but no audit rows match the query.
    #[error("no audit rows match the restore query for table '{table}'")]
    AuditMissing { table: String },

    /// A primary-key collision, on insert or during restore.
    #[error("integrity violation: {reason}")]
    Integrity { reason: String },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Parse { .. } => ErrorKind::Parse,
            Error::Validation { .. } => ErrorKind::Validation,
            Error::Backend { .. } => ErrorKind::Backend,
            Error::AuditMissing { .. } => ErrorKind::AuditMissing,
            Error::Integrity { .. } => ErrorKind::Integrity,
        }
    }

    pub(crate) fn parse(position: usize, expected: impl Into<String>) -> Self {
        Error::Parse {
            position,
            expected: expected.into(),
        }
    }

    pub(crate) fn validation(reason: impl Into<String>) -> Self {
        Error::Validation {
            reason: reason.into(),
            clause: None,
        }
    }

    pub(crate) fn validation_in(reason: impl Into<String>, clause: impl Into<String>) -> Self {
        Error::Validation {
            reason: reason.into(),
            clause: Some(clause.into()),
        }
    }

    pub(crate) fn backend<E>(context: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Backend {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = Error::parse(12, "literal");
        assert_eq!(
            err.to_string(),
            "parse error at position 12: expected literal"
        );

        let err = Error::validation("range start 5 is after end 2");
        assert_eq!(err.to_string(), "invalid query: range start 5 is after end 2");

        let err = Error::AuditMissing {
            table: "things".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "no audit rows match the restore query for table 'things'"
        );

        let err = Error::Integrity {
            reason: "primary key 'id' is not unique".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "integrity violation: primary key 'id' is not unique"
        );
    }

    #[test]
    fn test_error_kinds() {
        assert_eq!(Error::parse(0, "x").kind(), ErrorKind::Parse);
        assert_eq!(Error::validation("y").kind(), ErrorKind::Validation);
        assert_eq!(
            Error::AuditMissing {
                table: "t".to_string()
            }
            .kind(),
            ErrorKind::AuditMissing
        );
    }

    #[test]
    fn test_validation_carries_clause() {
        let err = Error::validation_in("unknown function 'med'", "select");
        match err {
            Error::Validation { clause, .. } => assert_eq!(clause.as_deref(), Some("select")),
            _ => panic!("expected validation error"),
        }
    }
}
