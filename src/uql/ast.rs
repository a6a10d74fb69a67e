use crate::error::{Error, Result};
use crate::uql::path::Path;

/// A parsed URI query. One instance per call; immutable once produced.
#[derive(Debug, Clone, PartialEq)]
pub struct UriQuery {
    pub original: String,
    pub select: Option<Vec<SelectTerm>>,
    pub where_expr: Option<WhereExpr>,
    pub order: Option<OrderTerm>,
    pub range: Option<RangeTerm>,
    pub group_by: Option<Vec<Path>>,
    pub set: Option<Vec<String>>,
    pub primary_key: Option<Path>,
    pub message: Option<String>,
    pub restore: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    Count,
    Avg,
    Sum,
    Min,
    Max,
    MinTs,
    MaxTs,
}

impl AggFunc {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "count" => Some(AggFunc::Count),
            "avg" => Some(AggFunc::Avg),
            "sum" => Some(AggFunc::Sum),
            "min" => Some(AggFunc::Min),
            "max" => Some(AggFunc::Max),
            "min_ts" => Some(AggFunc::MinTs),
            "max_ts" => Some(AggFunc::MaxTs),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectTarget {
    /// `*`, legal only inside `count(*)`.
    Star,
    Path(Path),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectTerm {
    pub func: Option<AggFunc>,
    pub target: SelectTarget,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderTerm {
    pub path: Path,
    pub direction: Direction,
}

/// `range=start.end`: `start` is the offset, `end` the row limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeTerm {
    pub start: u64,
    pub end: u64,
}

/// The boolean filter tree. Combinator prefixes are normalised at parse time
/// into left-folded binary nodes; parenthesised groups become subtrees.
#[derive(Debug, Clone, PartialEq)]
pub enum WhereExpr {
    Leaf(Condition),
    And(Box<WhereExpr>, Box<WhereExpr>),
    Or(Box<WhereExpr>, Box<WhereExpr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub path: Path,
    pub op: CompareOp,
    pub negated: bool,
    pub value: Literal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Gt,
    Gte,
    Lt,
    Lte,
    Neq,
    Like,
    Ilike,
    In,
    Is,
}

impl CompareOp {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "eq" => Some(CompareOp::Eq),
            "gt" => Some(CompareOp::Gt),
            "gte" => Some(CompareOp::Gte),
            "lt" => Some(CompareOp::Lt),
            "lte" => Some(CompareOp::Lte),
            "neq" => Some(CompareOp::Neq),
            "like" => Some(CompareOp::Like),
            "ilike" => Some(CompareOp::Ilike),
            "in" => Some(CompareOp::In),
            "is" => Some(CompareOp::Is),
            _ => None,
        }
    }
}

/// A literal from the query string. Barewords that do not parse as numbers
/// are strings; `null` is its own variant; lists only appear under `in`.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Literal>),
}

impl Literal {
    pub fn is_numeric(&self) -> bool {
        matches!(self, Literal::Int(_) | Literal::Float(_))
    }
}

impl WhereExpr {
    fn each_condition<'a>(&'a self, f: &mut impl FnMut(&'a Condition) -> Result<()>) -> Result<()> {
        match self {
            WhereExpr::Leaf(c) => f(c),
            WhereExpr::And(l, r) | WhereExpr::Or(l, r) => {
                l.each_condition(f)?;
                r.each_condition(f)
            }
        }
    }
}

impl UriQuery {
    /// Semantic checks that are independent of the target dialect. The
    /// parser guarantees shape; this guarantees executability.
    pub fn validate(&self) -> Result<()> {
        if let Some(terms) = &self.select {
            let mut has_aggregate = false;
            let mut plain_paths: Vec<&Path> = Vec::new();
            for term in terms {
                match (&term.func, &term.target) {
                    (Some(AggFunc::Count), SelectTarget::Star) => has_aggregate = true,
                    (Some(_), SelectTarget::Star) | (None, SelectTarget::Star) => {
                        return Err(Error::validation_in(
                            "'*' is only legal inside count(*)",
                            "select",
                        ));
                    }
                    (Some(_), SelectTarget::Path(p)) => {
                        p.validate()?;
                        has_aggregate = true;
                    }
                    (None, SelectTarget::Path(p)) => {
                        p.validate()?;
                        plain_paths.push(p);
                    }
                }
            }
            if has_aggregate && !plain_paths.is_empty() {
                let group = self.group_by.as_deref().unwrap_or(&[]);
                for p in &plain_paths {
                    if !group.contains(*p) {
                        return Err(Error::validation_in(
                            format!("'{p}' mixes with aggregates but is not in group_by"),
                            "select",
                        ));
                    }
                }
            }
        }
        if let Some(group) = &self.group_by {
            if self.select.is_none() {
                return Err(Error::validation_in(
                    "group_by requires a select clause",
                    "group_by",
                ));
            }
            for p in group {
                p.validate()?;
                if p.has_wildcard() {
                    return Err(Error::validation_in(
                        format!("wildcard path '{p}' is not allowed in group_by"),
                        "group_by",
                    ));
                }
            }
        }
        if let Some(w) = &self.where_expr {
            w.each_condition(&mut |cond| {
                cond.path.validate()?;
                if cond.path.has_wildcard() {
                    return Err(Error::validation_in(
                        format!("wildcard path '{}' is not allowed in where", cond.path),
                        "where",
                    ));
                }
                Ok(())
            })?;
        }
        if let Some(order) = &self.order {
            order.path.validate()?;
            if order.path.has_wildcard() {
                return Err(Error::validation_in(
                    format!("wildcard path '{}' is not allowed in order", order.path),
                    "order",
                ));
            }
        }
        if let Some(range) = &self.range {
            if range.end < range.start {
                return Err(Error::validation_in(
                    format!("range start {} is after end {}", range.start, range.end),
                    "range",
                ));
            }
        }
        if let Some(pk) = &self.primary_key {
            pk.validate()?;
            if pk.has_wildcard() {
                return Err(Error::validation_in(
                    "primary_key cannot contain wildcards",
                    "primary_key",
                ));
            }
        }
        Ok(())
    }
}
