pub mod ast;
pub mod parser;
pub mod path;

pub use ast::{
    AggFunc, CompareOp, Condition, Direction, Literal, OrderTerm, RangeTerm, SelectTarget,
    SelectTerm, UriQuery, WhereExpr,
};
pub use parser::{parse, parse_path};
pub use path::{Path, PathStep, Selector};
