use serde_json::Value;

use crate::error::{Error, Result};

/// A dotted address into a JSON document, e.g. `a.b`, `c[0]`, `x[*|a,b]`.
///
/// Selectors other than a plain index are only meaningful on the final step;
/// [`Path::validate`] enforces that, and that at most one step is a wildcard.
#[derive(Debug, Clone, PartialEq)]
pub struct Path {
    pub steps: Vec<PathStep>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathStep {
    pub key: String,
    pub selector: Option<Selector>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Selector {
    /// `[N]` — one array element.
    Index(u64),
    /// `[*]` — every element.
    All,
    /// `[N|k1,k2]` — keys inside one element.
    IndexInto(u64, Vec<String>),
    /// `[*|k1,k2]` — keys inside every element, yielding an array.
    AllInto(Vec<String>),
}

impl Selector {
    pub fn is_wildcard(&self) -> bool {
        matches!(self, Selector::All | Selector::AllInto(_))
    }
}

impl Path {
    pub fn from_key(key: impl Into<String>) -> Self {
        Path {
            steps: vec![PathStep {
                key: key.into(),
                selector: None,
            }],
        }
    }

    /// Prefix this path with another step, e.g. `previous` + `id` → `previous.id`.
    pub fn prefixed(&self, key: impl Into<String>) -> Self {
        let mut steps = vec![PathStep {
            key: key.into(),
            selector: None,
        }];
        steps.extend(self.steps.iter().cloned());
        Path { steps }
    }

    pub fn has_wildcard(&self) -> bool {
        self.steps
            .iter()
            .any(|s| s.selector.as_ref().is_some_and(Selector::is_wildcard))
    }

    /// Keys of every step plus every sub-selection, in order. Used by the
    /// dialects when embedding keys into JSON path syntax.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().flat_map(|s| {
            let subs: &[String] = match &s.selector {
                Some(Selector::IndexInto(_, subs)) | Some(Selector::AllInto(subs)) => subs,
                _ => &[],
            };
            std::iter::once(s.key.as_str()).chain(subs.iter().map(String::as_str))
        })
    }

    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(Error::validation("empty path"));
        }
        let wildcards = self
            .steps
            .iter()
            .filter(|s| s.selector.as_ref().is_some_and(Selector::is_wildcard))
            .count();
        if wildcards > 1 {
            return Err(Error::validation_in(
                format!("path '{self}' contains more than one wildcard"),
                self.to_string(),
            ));
        }
        let last = self.steps.len() - 1;
        for (i, step) in self.steps.iter().enumerate() {
            match step.selector {
                Some(Selector::All) | Some(Selector::AllInto(_)) | Some(Selector::IndexInto(..))
                    if i != last =>
                {
                    return Err(Error::validation_in(
                        format!("selector on '{}' must be the final path step", step.key),
                        self.to_string(),
                    ));
                }
                _ => {}
            }
        }
        for key in self.keys() {
            validate_key(key, self)?;
        }
        Ok(())
    }

    /// Evaluate this path against a document, client side. Any component
    /// that does not exist yields `null`; the same path against the same
    /// document always yields the same value.
    pub fn resolve(&self, doc: &Value) -> Value {
        let mut cur = doc.clone();
        for step in &self.steps {
            cur = match cur.get(&step.key) {
                Some(v) => v.clone(),
                None => return Value::Null,
            };
            if let Some(selector) = &step.selector {
                cur = apply_selector(&cur, selector);
                if cur.is_null() && !matches!(selector, Selector::Index(_)) {
                    return cur;
                }
            }
        }
        cur
    }
}

fn apply_selector(value: &Value, selector: &Selector) -> Value {
    let Some(items) = value.as_array() else {
        return Value::Null;
    };
    match selector {
        Selector::Index(n) => items.get(*n as usize).cloned().unwrap_or(Value::Null),
        Selector::All => value.clone(),
        Selector::IndexInto(n, subs) => match items.get(*n as usize) {
            Some(elem) => pick_keys(elem, subs),
            None => Value::Null,
        },
        Selector::AllInto(subs) => {
            Value::Array(items.iter().map(|elem| pick_keys(elem, subs)).collect())
        }
    }
}

fn pick_keys(elem: &Value, subs: &[String]) -> Value {
    let one = |key: &String| elem.get(key).cloned().unwrap_or(Value::Null);
    if subs.len() == 1 {
        one(&subs[0])
    } else {
        Value::Array(subs.iter().map(one).collect())
    }
}

/// Keys are embedded into dialect path syntax (quoted), so a conservative
/// character check is enough: quotes, backslashes and control characters
/// would escape that quoting.
fn validate_key(key: &str, path: &Path) -> Result<()> {
    if key.is_empty() {
        return Err(Error::validation_in("empty key in path", path.to_string()));
    }
    if key
        .chars()
        .any(|c| c == '\'' || c == '"' || c == '\\' || c == '{' || c == '}' || c.is_control())
    {
        return Err(Error::validation_in(
            format!("key '{key}' contains characters rejected for identifiers"),
            path.to_string(),
        ));
    }
    Ok(())
}

impl std::fmt::Display for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{}", step.key)?;
            match &step.selector {
                None => {}
                Some(Selector::Index(n)) => write!(f, "[{n}]")?,
                Some(Selector::All) => write!(f, "[*]")?,
                Some(Selector::IndexInto(n, subs)) => write!(f, "[{n}|{}]", subs.join(","))?,
                Some(Selector::AllInto(subs)) => write!(f, "[*|{}]", subs.join(","))?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(steps: &[(&str, Option<Selector>)]) -> Path {
        Path {
            steps: steps
                .iter()
                .map(|(k, s)| PathStep {
                    key: k.to_string(),
                    selector: s.clone(),
                })
                .collect(),
        }
    }

    #[test]
    fn test_resolve_plain_keys() {
        let doc = json!({"a": 1, "d": {"e": 4}});
        assert_eq!(path(&[("a", None)]).resolve(&doc), json!(1));
        assert_eq!(path(&[("d", None), ("e", None)]).resolve(&doc), json!(4));
        assert_eq!(path(&[("missing", None)]).resolve(&doc), Value::Null);
        assert_eq!(
            path(&[("d", None), ("missing", None)]).resolve(&doc),
            Value::Null
        );
    }

    #[test]
    fn test_resolve_array_selectors() {
        let doc = json!({"c": [1, 2], "x": [{"a": 0, "b": 1}, {"a": 77, "b": 99}]});
        assert_eq!(
            path(&[("c", Some(Selector::Index(0)))]).resolve(&doc),
            json!(1)
        );
        assert_eq!(
            path(&[("c", Some(Selector::Index(9)))]).resolve(&doc),
            Value::Null
        );
        assert_eq!(
            path(&[("x", Some(Selector::IndexInto(0, vec!["a".into()])))]).resolve(&doc),
            json!(0)
        );
        assert_eq!(
            path(&[("x", Some(Selector::AllInto(vec!["a".into()])))]).resolve(&doc),
            json!([0, 77])
        );
        assert_eq!(
            path(&[("x", Some(Selector::AllInto(vec!["a".into(), "b".into()])))]).resolve(&doc),
            json!([[0, 1], [77, 99]])
        );
        assert_eq!(
            path(&[("x", Some(Selector::All))]).resolve(&doc),
            doc.get("x").cloned().unwrap()
        );
    }

    #[test]
    fn test_resolve_wildcard_on_missing_key_is_null() {
        let doc = json!({"a": 1});
        assert_eq!(
            path(&[("x", Some(Selector::AllInto(vec!["a".into()])))]).resolve(&doc),
            Value::Null
        );
    }

    #[test]
    fn test_resolve_wildcard_on_non_array_is_null() {
        let doc = json!({"x": {"a": 1}});
        assert_eq!(
            path(&[("x", Some(Selector::AllInto(vec!["a".into()])))]).resolve(&doc),
            Value::Null
        );
    }

    #[test]
    fn test_validate_rejects_double_wildcard() {
        let p = path(&[
            ("x", Some(Selector::All)),
            ("y", Some(Selector::AllInto(vec!["a".into()]))),
        ]);
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inner_wildcard() {
        let p = path(&[("x", Some(Selector::All)), ("y", None)]);
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_validate_allows_inner_index() {
        let p = path(&[("x", Some(Selector::Index(0))), ("y", None)]);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_quote_in_key() {
        let p = path(&[("a'b", None)]);
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_display_round_trip() {
        let p = path(&[("x", Some(Selector::AllInto(vec!["a".into(), "b".into()])))]);
        assert_eq!(p.to_string(), "x[*|a,b]");
    }
}
