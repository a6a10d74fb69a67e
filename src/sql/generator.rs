use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::sql::dialect::Dialect;
use crate::sql::{Param, Statement};
use crate::uql::ast::{
    AggFunc, CompareOp, Condition, Direction, Literal, SelectTarget, UriQuery, WhereExpr,
};
use crate::uql::path::Path;

/// Compiles a validated [`UriQuery`] into a parameterised statement for one
/// dialect. The generator itself is dialect-free: every backend-specific
/// fragment comes from the [`Dialect`] strategy.
pub struct Generator<'a> {
    dialect: &'a dyn Dialect,
    schema: &'a str,
}

struct ParamSink<'a> {
    dialect: &'a dyn Dialect,
    params: Vec<Param>,
}

impl<'a> ParamSink<'a> {
    fn new(dialect: &'a dyn Dialect) -> Self {
        ParamSink {
            dialect,
            params: Vec::new(),
        }
    }

    fn push(&mut self, param: Param) -> String {
        self.params.push(param);
        self.dialect.placeholder(self.params.len())
    }
}

impl<'a> Generator<'a> {
    pub fn new(dialect: &'a dyn Dialect, schema: &'a str) -> Self {
        Generator { dialect, schema }
    }

    // ==================== SELECT ====================

    pub fn select(&self, table: &str, query: &UriQuery) -> Result<Statement> {
        query.validate()?;
        let table_ref = self.dialect.table_ref(self.schema, table)?;
        let mut sink = ParamSink::new(self.dialect);

        let projection = match &query.select {
            None => "data".to_string(),
            Some(terms) => {
                let exprs: Vec<String> = terms
                    .iter()
                    .map(|term| self.term_expr(term))
                    .collect::<Result<_>>()?;
                self.dialect.json_array(&exprs)
            }
        };
        let mut sql = format!(
            "select {} from {}",
            self.dialect.render_row(&projection),
            table_ref
        );

        if let Some(w) = &query.where_expr {
            sql.push_str(" where ");
            sql.push_str(&self.where_sql(w, &mut sink)?);
        }

        let group_exprs: Vec<String> = match &query.group_by {
            Some(paths) => paths
                .iter()
                .map(|p| self.dialect.extract_scalar(p))
                .collect::<Result<_>>()?,
            None => Vec::new(),
        };
        if !group_exprs.is_empty() {
            sql.push_str(" group by ");
            sql.push_str(&group_exprs.join(", "));
        }

        match &query.order {
            Some(order) => {
                let expr = self.dialect.extract_scalar(&order.path)?;
                let dir = match order.direction {
                    Direction::Asc => "asc nulls first",
                    Direction::Desc => "desc nulls last",
                };
                sql.push_str(&format!(" order by {expr} {dir}"));
            }
            // Grouped results without an explicit order still need a stable
            // one: ascending group keys, nulls first, on both dialects.
            None if !group_exprs.is_empty() => {
                let keys: Vec<String> = group_exprs
                    .iter()
                    .map(|e| format!("{e} asc nulls first"))
                    .collect();
                sql.push_str(&format!(" order by {}", keys.join(", ")));
            }
            None => {}
        }

        if let Some(range) = &query.range {
            sql.push_str(&format!(" limit {} offset {}", range.end, range.start));
        }

        Ok(Statement {
            sql,
            params: sink.params,
        })
    }

    /// Full-document SELECT under an optional filter; the pre-mutation read
    /// used by update, delete and restore.
    pub fn select_documents(
        &self,
        table: &str,
        where_expr: Option<&WhereExpr>,
    ) -> Result<Statement> {
        let table_ref = self.dialect.table_ref(self.schema, table)?;
        let mut sink = ParamSink::new(self.dialect);
        let mut sql = format!(
            "select {} from {}",
            self.dialect.render_row("data"),
            table_ref
        );
        if let Some(w) = where_expr {
            sql.push_str(" where ");
            sql.push_str(&self.where_sql(w, &mut sink)?);
        }
        Ok(Statement {
            sql,
            params: sink.params,
        })
    }

    fn term_expr(&self, term: &crate::uql::ast::SelectTerm) -> Result<String> {
        match (&term.func, &term.target) {
            (Some(AggFunc::Count), SelectTarget::Star) => Ok("count(1)".to_string()),
            (None, SelectTarget::Path(p)) => {
                if p.has_wildcard() {
                    self.dialect.iterate_array(p)
                } else {
                    self.dialect.extract_scalar(p)
                }
            }
            (Some(func), SelectTarget::Path(p)) => {
                if p.has_wildcard() {
                    return Err(Error::validation_in(
                        format!("aggregate over wildcard path '{p}'"),
                        "select",
                    ));
                }
                let expr = match func {
                    AggFunc::Count => {
                        format!("count({})", self.dialect.extract_compare(p, false)?)
                    }
                    AggFunc::Avg | AggFunc::Sum | AggFunc::Min | AggFunc::Max => {
                        let name = match func {
                            AggFunc::Avg => "avg",
                            AggFunc::Sum => "sum",
                            AggFunc::Min => "min",
                            _ => "max",
                        };
                        format!("{name}({})", self.dialect.extract_compare(p, true)?)
                    }
                    AggFunc::MinTs | AggFunc::MaxTs => {
                        let name = if *func == AggFunc::MinTs { "min" } else { "max" };
                        let arg = self
                            .dialect
                            .cast_timestamp(&self.dialect.extract_compare(p, false)?);
                        format!("{name}({arg})")
                    }
                };
                Ok(expr)
            }
            // '*' outside count(*) is caught by UriQuery::validate.
            _ => Err(Error::validation_in(
                "'*' is only legal inside count(*)",
                "select",
            )),
        }
    }

    // ==================== WHERE ====================

    fn where_sql(&self, expr: &WhereExpr, sink: &mut ParamSink<'_>) -> Result<String> {
        match expr {
            WhereExpr::Leaf(cond) => self.condition_sql(cond, sink),
            WhereExpr::And(l, r) => Ok(format!(
                "({} and {})",
                self.where_sql(l, sink)?,
                self.where_sql(r, sink)?
            )),
            WhereExpr::Or(l, r) => Ok(format!(
                "({} or {})",
                self.where_sql(l, sink)?,
                self.where_sql(r, sink)?
            )),
        }
    }

    fn condition_sql(&self, cond: &Condition, sink: &mut ParamSink<'_>) -> Result<String> {
        match cond.op {
            CompareOp::Is => {
                let col = self.dialect.extract_compare(&cond.path, false)?;
                if cond.negated {
                    Ok(format!("{col} is not null"))
                } else {
                    Ok(format!("{col} is null"))
                }
            }
            CompareOp::In => {
                let Literal::List(items) = &cond.value else {
                    return Err(Error::validation_in("'in' requires a [..] list", "where"));
                };
                let numeric = items.iter().all(Literal::is_numeric);
                let col = self.dialect.extract_compare(&cond.path, numeric)?;
                let placeholders: Vec<String> = items
                    .iter()
                    .map(|item| sink.push(literal_param(item, numeric)))
                    .collect();
                let not = if cond.negated { "not " } else { "" };
                Ok(format!("{col} {not}in ({})", placeholders.join(", ")))
            }
            CompareOp::Like | CompareOp::Ilike => {
                let pattern = match &cond.value {
                    Literal::Str(s) => s.clone(),
                    Literal::Int(i) => i.to_string(),
                    Literal::Float(f) => f.to_string(),
                    _ => {
                        return Err(Error::validation_in(
                            "pattern operators require a string literal",
                            "where",
                        ));
                    }
                };
                let ci = cond.op == CompareOp::Ilike;
                let col = self.dialect.extract_compare(&cond.path, false)?;
                let ph = sink.push(Param::Text(self.dialect.like_param(&pattern, ci)));
                let pred = self.dialect.like_predicate(&col, &ph, ci);
                if cond.negated {
                    Ok(format!("not ({pred})"))
                } else {
                    Ok(pred)
                }
            }
            _ => {
                if matches!(cond.value, Literal::List(_)) {
                    return Err(Error::validation_in(
                        "list literals are only legal with 'in'",
                        "where",
                    ));
                }
                let numeric = cond.value.is_numeric();
                let col = self.dialect.extract_compare(&cond.path, numeric)?;
                let op = match cond.op {
                    CompareOp::Eq => "=",
                    CompareOp::Gt => ">",
                    CompareOp::Gte => ">=",
                    CompareOp::Lt => "<",
                    CompareOp::Lte => "<=",
                    CompareOp::Neq => "!=",
                    _ => unreachable!("handled above"),
                };
                let ph = sink.push(literal_param(&cond.value, numeric));
                let pred = format!("{col} {op} {ph}");
                if cond.negated {
                    Ok(format!("not ({pred})"))
                } else {
                    Ok(pred)
                }
            }
        }
    }

    // ==================== mutations ====================

    pub fn update(&self, table: &str, query: &UriQuery, data: &Value) -> Result<Statement> {
        query.validate()?;
        let set_keys = query
            .set
            .as_ref()
            .ok_or_else(|| Error::validation_in("update requires a set= clause", "set"))?;
        let patch = build_patch(set_keys, data)?;
        let table_ref = self.dialect.table_ref(self.schema, table)?;
        let mut sink = ParamSink::new(self.dialect);
        let ph = sink.push(Param::Json(Value::Object(patch).to_string()));
        let mut sql = format!(
            "update {} set data = {}",
            table_ref,
            self.dialect.merge_patch(&ph)
        );
        if let Some(w) = &query.where_expr {
            sql.push_str(" where ");
            sql.push_str(&self.where_sql(w, &mut sink)?);
        }
        Ok(Statement {
            sql,
            params: sink.params,
        })
    }

    /// Overwrite whole documents under a filter; used by restore, where the
    /// prior state must come back exactly as journaled.
    pub fn replace(
        &self,
        table: &str,
        document: &Value,
        where_expr: Option<&WhereExpr>,
    ) -> Result<Statement> {
        let table_ref = self.dialect.table_ref(self.schema, table)?;
        let mut sink = ParamSink::new(self.dialect);
        let ph = sink.push(Param::Json(document.to_string()));
        let mut sql = format!("update {} set data = {}", table_ref, self.dialect.bind_json(&ph));
        if let Some(w) = where_expr {
            sql.push_str(" where ");
            sql.push_str(&self.where_sql(w, &mut sink)?);
        }
        Ok(Statement {
            sql,
            params: sink.params,
        })
    }

    pub fn delete(&self, table: &str, where_expr: Option<&WhereExpr>) -> Result<Statement> {
        let table_ref = self.dialect.table_ref(self.schema, table)?;
        let mut sink = ParamSink::new(self.dialect);
        let mut sql = format!("delete from {table_ref}");
        if let Some(w) = where_expr {
            sql.push_str(" where ");
            sql.push_str(&self.where_sql(w, &mut sink)?);
        }
        Ok(Statement {
            sql,
            params: sink.params,
        })
    }

    /// One-placeholder insert; the driver binds one document per execution.
    pub fn insert_sql(&self, table: &str) -> Result<String> {
        Ok(format!(
            "insert into {} (data) values ({})",
            self.dialect.table_ref(self.schema, table)?,
            self.dialect.bind_json(&self.dialect.placeholder(1))
        ))
    }

    // ==================== schema management ====================

    pub fn create_table_sql(&self, table: &str) -> Result<Vec<String>> {
        let mut out = Vec::new();
        if let Some(schema_sql) = self.dialect.create_schema_sql(self.schema)? {
            out.push(schema_sql);
        }
        out.push(self.dialect.create_table_sql(self.schema, table)?);
        Ok(out)
    }

    pub fn create_index_sql(&self, table: &str, path: &Path, unique: bool) -> Result<String> {
        let physical = self.dialect.physical_table(self.schema, table)?;
        let suffix: String = path
            .keys()
            .flat_map(|k| k.chars())
            .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        let kind = if unique { "uniq" } else { "idx" };
        let name = format!("{physical}_{suffix}_{kind}");
        self.dialect
            .create_index_sql(self.schema, table, &name, path, unique)
    }

    pub fn table_exists_stmt(&self, table: &str) -> Result<Statement> {
        self.dialect.table_exists_stmt(self.schema, table)
    }

    pub fn tables_list_stmt(&self) -> Result<Statement> {
        self.dialect.tables_list_stmt(self.schema)
    }
}

fn literal_param(literal: &Literal, numeric: bool) -> Param {
    match literal {
        Literal::Null => Param::Null,
        Literal::Int(i) => {
            if numeric {
                Param::Int(*i)
            } else {
                Param::Text(i.to_string())
            }
        }
        Literal::Float(f) => {
            if numeric {
                Param::Float(*f)
            } else {
                Param::Text(f.to_string())
            }
        }
        Literal::Str(s) => Param::Text(s.clone()),
        Literal::List(_) => Param::Null,
    }
}

/// Restrict an update payload to the keys named in `set=`. Every named key
/// must be present in the payload.
pub fn build_patch(set_keys: &[String], data: &Value) -> Result<Map<String, Value>> {
    let obj = data
        .as_object()
        .ok_or_else(|| Error::validation("update payload must be a JSON object"))?;
    let mut patch = Map::new();
    for key in set_keys {
        match obj.get(key) {
            Some(v) => {
                patch.insert(key.clone(), v.clone());
            }
            None => {
                return Err(Error::validation_in(
                    format!("set key '{key}' not found in payload"),
                    "set",
                ));
            }
        }
    }
    Ok(patch)
}
