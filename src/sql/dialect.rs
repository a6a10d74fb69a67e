use crate::error::{Error, Result};
use crate::sql::{Param, Statement};
use crate::uql::path::{Path, Selector};

/// Everything dialect-specific lives behind this trait; the generator and
/// the driver are dialect-free. One implementation per backend.
pub trait Dialect: Send + Sync {
    fn name(&self) -> &'static str;

    /// Placeholder for the n-th parameter (1-based).
    fn placeholder(&self, n: usize) -> String;

    /// Unquoted physical table name. The embedded dialect has no schema
    /// objects and joins the schema into the name instead.
    fn physical_table(&self, schema: &str, table: &str) -> Result<String>;

    /// Quoted, schema-qualified reference for use in SQL text.
    fn table_ref(&self, schema: &str, table: &str) -> Result<String>;

    /// JSON-typed extraction of a wildcard-free path, used in projections,
    /// GROUP BY and ORDER BY.
    fn extract_scalar(&self, path: &Path) -> Result<String>;

    /// Comparison-typed extraction of a wildcard-free path, used in filters
    /// and as aggregate arguments. `numeric` requests a numeric reading.
    fn extract_compare(&self, path: &Path, numeric: bool) -> Result<String>;

    /// Array-valued expansion of a path whose final step carries `[*]` or
    /// `[*|…]`, built on the dialect's array iteration primitive.
    fn iterate_array(&self, path: &Path) -> Result<String>;

    /// Build one JSON array value out of projected expressions.
    fn json_array(&self, items: &[String]) -> String;

    fn cast_timestamp(&self, expr: &str) -> String;

    /// Merge the patch bound at `placeholder` into `data`, touching only the
    /// patch's top-level keys.
    fn merge_patch(&self, placeholder: &str) -> String;

    /// Read a bound parameter as a JSON document (the server dialect casts
    /// the text parameter to jsonb).
    fn bind_json(&self, placeholder: &str) -> String;

    /// Final wrapping of the single projected column so every row decodes as
    /// JSON text on every backend.
    fn render_row(&self, expr: &str) -> String;

    fn create_schema_sql(&self, schema: &str) -> Result<Option<String>>;

    fn create_table_sql(&self, schema: &str, table: &str) -> Result<String>;

    fn create_index_sql(
        &self,
        schema: &str,
        table: &str,
        index_name: &str,
        path: &Path,
        unique: bool,
    ) -> Result<String>;

    fn table_exists_stmt(&self, schema: &str, table: &str) -> Result<Statement>;

    fn tables_list_stmt(&self, schema: &str) -> Result<Statement>;

    /// Map a catalog name from [`Dialect::tables_list_stmt`] back to the
    /// logical table name, or `None` when it belongs to another schema.
    fn strip_schema(&self, schema: &str, physical: &str) -> Option<String>;

    /// Pattern predicate. The embedded dialect uses GLOB for the
    /// case-sensitive form because its LIKE is case-insensitive for ASCII.
    fn like_predicate(&self, col: &str, placeholder: &str, case_insensitive: bool) -> String;

    /// The bound pattern for [`Dialect::like_predicate`]; translates the
    /// grammar's `*` wildcard where the predicate needs `%`.
    fn like_param(&self, pattern: &str, case_insensitive: bool) -> String;
}

/// Conservative identifier allow-list for tables, schemas and index names.
fn check_ident(ident: &str) -> Result<()> {
    let mut chars = ident.chars();
    let head_ok = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    if head_ok && ident.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(Error::validation(format!(
            "identifier '{ident}' rejected (must match [A-Za-z_][A-Za-z0-9_]*)"
        )))
    }
}

fn quote_ident(ident: &str) -> Result<String> {
    check_ident(ident)?;
    Ok(format!("\"{ident}\""))
}

fn last_step_selector(path: &Path) -> Option<&Selector> {
    path.steps.last().and_then(|s| s.selector.as_ref())
}

// ==================== embedded (SQLite json1) ====================

pub struct SqliteDialect;

impl SqliteDialect {
    /// Render `$."a"[0]."b"` style json1 paths. `trim_last_selector` drops
    /// the final step's selector so the caller can address the array itself.
    fn json_path(path: &Path, trim_last_selector: bool, extra_key: Option<&str>) -> String {
        let mut out = String::from("$");
        let last = path.steps.len() - 1;
        for (i, step) in path.steps.iter().enumerate() {
            out.push_str(&format!(".\"{}\"", step.key));
            if trim_last_selector && i == last {
                continue;
            }
            match &step.selector {
                Some(Selector::Index(n)) => out.push_str(&format!("[{n}]")),
                Some(Selector::IndexInto(n, _)) => out.push_str(&format!("[{n}]")),
                _ => {}
            }
        }
        if let Some(key) = extra_key {
            out.push_str(&format!(".\"{key}\""));
        }
        out
    }

    fn extract(&self, path: &Path) -> Result<String> {
        match last_step_selector(path) {
            Some(Selector::IndexInto(_, subs)) if subs.len() > 1 => {
                let parts: Vec<String> = subs
                    .iter()
                    .map(|sub| {
                        format!(
                            "json_extract(data, '{}')",
                            Self::json_path(path, false, Some(sub))
                        )
                    })
                    .collect();
                Ok(self.json_array(&parts))
            }
            Some(Selector::IndexInto(_, subs)) => Ok(format!(
                "json_extract(data, '{}')",
                Self::json_path(path, false, Some(&subs[0]))
            )),
            _ => Ok(format!(
                "json_extract(data, '{}')",
                Self::json_path(path, false, None)
            )),
        }
    }
}

impl Dialect for SqliteDialect {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn placeholder(&self, _n: usize) -> String {
        "?".to_string()
    }

    fn physical_table(&self, schema: &str, table: &str) -> Result<String> {
        check_ident(table)?;
        if schema.is_empty() {
            Ok(table.to_string())
        } else {
            check_ident(schema)?;
            Ok(format!("{schema}_{table}"))
        }
    }

    fn table_ref(&self, schema: &str, table: &str) -> Result<String> {
        quote_ident(&self.physical_table(schema, table)?)
    }

    fn extract_scalar(&self, path: &Path) -> Result<String> {
        self.extract(path)
    }

    fn extract_compare(&self, path: &Path, _numeric: bool) -> Result<String> {
        // json1 preserves numeric affinity, so one extraction form serves
        // both numeric and text comparisons.
        if let Some(Selector::IndexInto(_, subs)) = last_step_selector(path) {
            if subs.len() > 1 {
                return Err(Error::validation(format!(
                    "multi-key selector in '{path}' is only valid in select"
                )));
            }
        }
        self.extract(path)
    }

    fn iterate_array(&self, path: &Path) -> Result<String> {
        let base = Self::json_path(path, true, None);
        match last_step_selector(path) {
            Some(Selector::All) => Ok(format!(
                "(case when json_type(data, '{base}') = 'array' then json_extract(data, '{base}') else null end)"
            )),
            Some(Selector::AllInto(subs)) => {
                let picks: Vec<String> = subs
                    .iter()
                    .map(|sub| format!("json_extract(j.value, '$.\"{sub}\"')"))
                    .collect();
                let inner = if picks.len() > 1 {
                    self.json_array(&picks)
                } else {
                    picks[0].clone()
                };
                Ok(format!(
                    "(case when json_type(data, '{base}') = 'array' then \
                     (select json_group_array({inner}) from json_each(data, '{base}') as j) \
                     else null end)"
                ))
            }
            _ => Err(Error::validation(format!(
                "path '{path}' has no wildcard to iterate"
            ))),
        }
    }

    fn json_array(&self, items: &[String]) -> String {
        format!("json_array({})", items.join(", "))
    }

    fn cast_timestamp(&self, expr: &str) -> String {
        format!("datetime({expr})")
    }

    fn merge_patch(&self, placeholder: &str) -> String {
        format!("json_patch(data, {placeholder})")
    }

    fn bind_json(&self, placeholder: &str) -> String {
        placeholder.to_string()
    }

    fn render_row(&self, expr: &str) -> String {
        expr.to_string()
    }

    fn create_schema_sql(&self, _schema: &str) -> Result<Option<String>> {
        Ok(None)
    }

    fn create_table_sql(&self, schema: &str, table: &str) -> Result<String> {
        Ok(format!(
            "create table if not exists {} (data json not null)",
            self.table_ref(schema, table)?
        ))
    }

    fn create_index_sql(
        &self,
        schema: &str,
        table: &str,
        index_name: &str,
        path: &Path,
        unique: bool,
    ) -> Result<String> {
        let uniq = if unique { "unique " } else { "" };
        Ok(format!(
            "create {uniq}index if not exists {} on {} ({})",
            quote_ident(index_name)?,
            self.table_ref(schema, table)?,
            self.extract_compare(path, false)?
        ))
    }

    fn table_exists_stmt(&self, schema: &str, table: &str) -> Result<Statement> {
        Ok(Statement {
            sql: "select name from sqlite_master where type = 'table' and name = ?".to_string(),
            params: vec![Param::Text(self.physical_table(schema, table)?)],
        })
    }

    fn tables_list_stmt(&self, _schema: &str) -> Result<Statement> {
        Ok(Statement::bare(
            "select name from sqlite_master where type = 'table' \
             and name not like 'sqlite_%' order by name asc",
        ))
    }

    fn strip_schema(&self, schema: &str, physical: &str) -> Option<String> {
        if schema.is_empty() {
            Some(physical.to_string())
        } else {
            physical
                .strip_prefix(&format!("{schema}_"))
                .map(str::to_string)
        }
    }

    fn like_predicate(&self, col: &str, placeholder: &str, case_insensitive: bool) -> String {
        if case_insensitive {
            format!("lower({col}) like lower({placeholder})")
        } else {
            format!("{col} glob {placeholder}")
        }
    }

    fn like_param(&self, pattern: &str, case_insensitive: bool) -> String {
        if case_insensitive {
            pattern.replace('*', "%")
        } else {
            pattern.to_string()
        }
    }
}

// ==================== server (PostgreSQL jsonb) ====================

pub struct PostgresDialect;

impl PostgresDialect {
    /// Render a `'{"a",0,"b"}'` path-array literal.
    fn path_array(path: &Path, trim_last_selector: bool, extra_key: Option<&str>) -> String {
        let mut parts: Vec<String> = Vec::new();
        let last = path.steps.len() - 1;
        for (i, step) in path.steps.iter().enumerate() {
            parts.push(format!("\"{}\"", step.key));
            if trim_last_selector && i == last {
                continue;
            }
            match &step.selector {
                Some(Selector::Index(n)) => parts.push(n.to_string()),
                Some(Selector::IndexInto(n, _)) => parts.push(n.to_string()),
                _ => {}
            }
        }
        if let Some(key) = extra_key {
            parts.push(format!("\"{key}\""));
        }
        format!("'{{{}}}'", parts.join(","))
    }

    fn extract(&self, path: &Path, as_text: bool) -> String {
        let op = if as_text { "#>>" } else { "#>" };
        match last_step_selector(path) {
            Some(Selector::IndexInto(_, subs)) if subs.len() > 1 => {
                let parts: Vec<String> = subs
                    .iter()
                    .map(|sub| format!("data#>{}", Self::path_array(path, false, Some(sub))))
                    .collect();
                self.json_array(&parts)
            }
            Some(Selector::IndexInto(_, subs)) => {
                format!("data{op}{}", Self::path_array(path, false, Some(&subs[0])))
            }
            _ => format!("data{op}{}", Self::path_array(path, false, None)),
        }
    }
}

impl Dialect for PostgresDialect {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn placeholder(&self, n: usize) -> String {
        format!("${n}")
    }

    fn physical_table(&self, schema: &str, table: &str) -> Result<String> {
        check_ident(schema)?;
        check_ident(table)?;
        Ok(table.to_string())
    }

    fn table_ref(&self, schema: &str, table: &str) -> Result<String> {
        Ok(format!("{}.{}", quote_ident(schema)?, quote_ident(table)?))
    }

    fn extract_scalar(&self, path: &Path) -> Result<String> {
        Ok(self.extract(path, false))
    }

    fn extract_compare(&self, path: &Path, numeric: bool) -> Result<String> {
        if let Some(Selector::IndexInto(_, subs)) = last_step_selector(path) {
            if subs.len() > 1 {
                return Err(Error::validation(format!(
                    "multi-key selector in '{path}' is only valid in select"
                )));
            }
        }
        let text = self.extract(path, true);
        if numeric {
            Ok(format!("({text})::float8"))
        } else {
            Ok(text)
        }
    }

    fn iterate_array(&self, path: &Path) -> Result<String> {
        let base = format!("data#>{}", Self::path_array(path, true, None));
        match last_step_selector(path) {
            Some(Selector::All) => Ok(format!(
                "(case when jsonb_typeof({base}) = 'array' then {base} else null end)"
            )),
            Some(Selector::AllInto(subs)) => {
                let picks: Vec<String> = subs
                    .iter()
                    .map(|sub| format!("elem#>'{{\"{sub}\"}}'"))
                    .collect();
                let inner = if picks.len() > 1 {
                    self.json_array(&picks)
                } else {
                    picks[0].clone()
                };
                Ok(format!(
                    "(case when jsonb_typeof({base}) = 'array' then \
                     (select jsonb_agg({inner}) from jsonb_array_elements({base}) as elem) \
                     else null end)"
                ))
            }
            _ => Err(Error::validation(format!(
                "path '{path}' has no wildcard to iterate"
            ))),
        }
    }

    fn json_array(&self, items: &[String]) -> String {
        format!("jsonb_build_array({})", items.join(", "))
    }

    fn cast_timestamp(&self, expr: &str) -> String {
        format!("({expr})::timestamptz")
    }

    fn merge_patch(&self, placeholder: &str) -> String {
        format!("data || ({placeholder})::jsonb")
    }

    fn bind_json(&self, placeholder: &str) -> String {
        format!("({placeholder})::jsonb")
    }

    fn render_row(&self, expr: &str) -> String {
        format!("({expr})::text")
    }

    fn create_schema_sql(&self, schema: &str) -> Result<Option<String>> {
        Ok(Some(format!(
            "create schema if not exists {}",
            quote_ident(schema)?
        )))
    }

    fn create_table_sql(&self, schema: &str, table: &str) -> Result<String> {
        Ok(format!(
            "create table if not exists {} (data jsonb not null)",
            self.table_ref(schema, table)?
        ))
    }

    fn create_index_sql(
        &self,
        schema: &str,
        table: &str,
        index_name: &str,
        path: &Path,
        unique: bool,
    ) -> Result<String> {
        let uniq = if unique { "unique " } else { "" };
        Ok(format!(
            "create {uniq}index if not exists {} on {} (({}))",
            quote_ident(index_name)?,
            self.table_ref(schema, table)?,
            self.extract_compare(path, false)?
        ))
    }

    fn table_exists_stmt(&self, schema: &str, table: &str) -> Result<Statement> {
        check_ident(schema)?;
        check_ident(table)?;
        Ok(Statement {
            sql: "select table_name from information_schema.tables \
                  where table_schema = $1 and table_name = $2"
                .to_string(),
            params: vec![Param::Text(schema.to_string()), Param::Text(table.to_string())],
        })
    }

    fn tables_list_stmt(&self, schema: &str) -> Result<Statement> {
        check_ident(schema)?;
        Ok(Statement {
            sql: "select table_name from information_schema.tables \
                  where table_schema = $1 order by table_name asc"
                .to_string(),
            params: vec![Param::Text(schema.to_string())],
        })
    }

    fn strip_schema(&self, _schema: &str, physical: &str) -> Option<String> {
        Some(physical.to_string())
    }

    fn like_predicate(&self, col: &str, placeholder: &str, case_insensitive: bool) -> String {
        let op = if case_insensitive { "ilike" } else { "like" };
        format!("{col} {op} {placeholder}")
    }

    fn like_param(&self, pattern: &str, _case_insensitive: bool) -> String {
        pattern.replace('*', "%")
    }
}
