use percent_encoding::percent_decode_str;

use crate::error::{Error, Result};
use crate::uql::ast::{
    AggFunc, CompareOp, Condition, Direction, Literal, OrderTerm, RangeTerm, SelectTarget,
    SelectTerm, UriQuery, WhereExpr,
};
use crate::uql::path::{Path, PathStep, Selector};

/// Parse a URI query string into a [`UriQuery`].
///
/// The scanner walks the raw string once; `&` only separates clauses outside
/// single-quoted literals, so quoted values may contain any delimiter.
pub fn parse(input: &str) -> Result<UriQuery> {
    Parser::new(input).parse_query()
}

/// Parse a standalone dotted path, e.g. a primary-key or index target.
pub fn parse_path(input: &str) -> Result<Path> {
    let mut parser = Parser::new(input);
    let path = parser.parse_path()?;
    if !parser.at_end() {
        return Err(Error::parse(parser.pos, "end of path"));
    }
    Ok(path)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
    original: String,
}

/// Characters that end a bareword identifier.
const IDENT_STOP: &[char] = &['.', ',', '[', ']', '|', '&', '=', '(', ')', '\'', '*', ':'];

/// Characters that end a raw (unquoted) literal value.
const VALUE_STOP: &[char] = &[',', '&', ')', ']'];

impl Parser {
    fn new(input: &str) -> Self {
        Parser {
            chars: input.chars().collect(),
            pos: 0,
            original: input.to_string(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn eat(&mut self, c: char) -> bool {
        if self.peek() == Some(c) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, c: char) -> Result<()> {
        if self.eat(c) {
            Ok(())
        } else {
            Err(Error::parse(self.pos, format!("'{c}'")))
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.chars.len()
    }

    // ==================== query / clauses ====================

    fn parse_query(mut self) -> Result<UriQuery> {
        let mut query = UriQuery {
            original: self.original.clone(),
            select: None,
            where_expr: None,
            order: None,
            range: None,
            group_by: None,
            set: None,
            primary_key: None,
            message: None,
            restore: false,
        };
        if self.at_end() {
            return Ok(query);
        }
        loop {
            self.parse_clause(&mut query)?;
            if self.at_end() {
                break;
            }
            self.expect('&')?;
            if self.at_end() {
                return Err(Error::parse(self.pos, "clause after '&'"));
            }
        }
        Ok(query)
    }

    fn parse_clause(&mut self, query: &mut UriQuery) -> Result<()> {
        let start = self.pos;
        let key = self.scan_while(|c| c != '=' && c != '&');
        if key.is_empty() {
            return Err(Error::parse(start, "clause"));
        }
        if key == "restore" {
            if self.peek() == Some('=') {
                return Err(Error::parse(self.pos, "no value for the 'restore' flag"));
            }
            if query.restore {
                return Err(Error::parse(start, "each clause at most once"));
            }
            query.restore = true;
            return Ok(());
        }
        self.expect('=')?;
        match key.as_str() {
            "select" => {
                Self::once(query.select.is_some(), start)?;
                query.select = Some(self.parse_select_terms()?);
            }
            "where" => {
                Self::once(query.where_expr.is_some(), start)?;
                query.where_expr = Some(self.parse_where_expr()?);
            }
            "order" => {
                Self::once(query.order.is_some(), start)?;
                query.order = Some(self.parse_order_term()?);
            }
            "range" => {
                Self::once(query.range.is_some(), start)?;
                query.range = Some(self.parse_range_term()?);
            }
            "group_by" => {
                Self::once(query.group_by.is_some(), start)?;
                query.group_by = Some(self.parse_path_list()?);
            }
            "set" => {
                Self::once(query.set.is_some(), start)?;
                query.set = Some(self.parse_set_keys()?);
            }
            "primary_key" => {
                Self::once(query.primary_key.is_some(), start)?;
                query.primary_key = Some(self.parse_path()?);
            }
            "message" => {
                Self::once(query.message.is_some(), start)?;
                query.message = Some(self.parse_message()?);
            }
            _ => {
                return Err(Error::parse(
                    start,
                    "one of select, where, order, range, group_by, set, primary_key, message, restore",
                ));
            }
        }
        Ok(())
    }

    fn once(already: bool, pos: usize) -> Result<()> {
        if already {
            Err(Error::parse(pos, "each clause at most once"))
        } else {
            Ok(())
        }
    }

    // ==================== select ====================

    fn parse_select_terms(&mut self) -> Result<Vec<SelectTerm>> {
        let mut terms = vec![self.parse_select_term()?];
        while self.eat(',') {
            terms.push(self.parse_select_term()?);
        }
        Ok(terms)
    }

    fn parse_select_term(&mut self) -> Result<SelectTerm> {
        if self.eat('*') {
            return Ok(SelectTerm {
                func: None,
                target: SelectTarget::Star,
            });
        }
        let start = self.pos;
        let word = self.parse_ident()?;
        if self.peek() == Some('(') {
            let func = AggFunc::from_name(&word)
                .ok_or_else(|| Error::parse(start, "aggregate function"))?;
            self.expect('(')?;
            let target = if self.eat('*') {
                SelectTarget::Star
            } else {
                SelectTarget::Path(self.parse_path()?)
            };
            self.expect(')')?;
            return Ok(SelectTerm {
                func: Some(func),
                target,
            });
        }
        // Not a function call: rewind and take the whole term as a path.
        self.pos = start;
        Ok(SelectTerm {
            func: None,
            target: SelectTarget::Path(self.parse_path()?),
        })
    }

    // ==================== paths ====================

    fn parse_path(&mut self) -> Result<Path> {
        let mut steps = vec![self.parse_path_step()?];
        while self.eat('.') {
            steps.push(self.parse_path_step()?);
        }
        Ok(Path { steps })
    }

    fn parse_path_step(&mut self) -> Result<PathStep> {
        let key = self.parse_ident()?;
        let selector = self.parse_selector()?;
        Ok(PathStep { key, selector })
    }

    fn parse_selector(&mut self) -> Result<Option<Selector>> {
        if !self.eat('[') {
            return Ok(None);
        }
        let wildcard = self.eat('*');
        let index = if wildcard {
            None
        } else {
            Some(self.parse_number_u64("array index")?)
        };
        let subs = if self.eat('|') {
            let mut subs = vec![self.parse_ident()?];
            while self.eat(',') {
                subs.push(self.parse_ident()?);
            }
            Some(subs)
        } else {
            None
        };
        self.expect(']')?;
        let selector = match (index, subs) {
            (Some(n), None) => Selector::Index(n),
            (Some(n), Some(subs)) => Selector::IndexInto(n, subs),
            (None, None) => Selector::All,
            (None, Some(subs)) => Selector::AllInto(subs),
        };
        Ok(Some(selector))
    }

    fn parse_path_list(&mut self) -> Result<Vec<Path>> {
        let mut paths = vec![self.parse_path()?];
        while self.eat(',') {
            paths.push(self.parse_path()?);
        }
        Ok(paths)
    }

    // ==================== where ====================

    fn parse_where_expr(&mut self) -> Result<WhereExpr> {
        let mut expr = self.parse_where_unit()?;
        while self.eat(',') {
            let and = self.parse_combinator()?;
            let rhs = self.parse_where_unit()?;
            expr = if and {
                WhereExpr::And(Box::new(expr), Box::new(rhs))
            } else {
                WhereExpr::Or(Box::new(expr), Box::new(rhs))
            };
        }
        Ok(expr)
    }

    fn parse_where_unit(&mut self) -> Result<WhereExpr> {
        if self.eat('(') {
            let expr = self.parse_where_expr()?;
            self.expect(')')?;
            Ok(expr)
        } else {
            self.parse_condition().map(WhereExpr::Leaf)
        }
    }

    /// Returns true for `and:`, false for `or:`.
    fn parse_combinator(&mut self) -> Result<bool> {
        let start = self.pos;
        let word = self.scan_while(|c| c.is_ascii_alphabetic());
        if self.eat(':') {
            match word.as_str() {
                "and" => return Ok(true),
                "or" => return Ok(false),
                _ => {}
            }
        }
        Err(Error::parse(start, "'and:' or 'or:'"))
    }

    fn parse_condition(&mut self) -> Result<Condition> {
        let path = self.parse_path()?;
        self.expect('=')?;
        let mut negated = false;
        let op_start = self.pos;
        let mut word = self.parse_bare_word(op_start)?;
        if word == "not" {
            negated = true;
            self.expect('.')?;
            word = self.parse_bare_word(self.pos)?;
        }
        let op = CompareOp::from_name(&word)
            .ok_or_else(|| Error::parse(op_start, "comparison operator"))?;
        self.expect('.')?;
        let value = match op {
            CompareOp::Is => {
                let vstart = self.pos;
                match self.parse_literal()? {
                    Literal::Null => Literal::Null,
                    _ => return Err(Error::parse(vstart, "'null'")),
                }
            }
            CompareOp::In => {
                self.expect('[')?;
                let mut items = vec![self.parse_literal()?];
                while self.eat(',') {
                    items.push(self.parse_literal()?);
                }
                self.expect(']')?;
                Literal::List(items)
            }
            _ => self.parse_literal()?,
        };
        Ok(Condition {
            path,
            op,
            negated,
            value,
        })
    }

    // ==================== other clauses ====================

    fn parse_order_term(&mut self) -> Result<OrderTerm> {
        let mut steps = vec![self.parse_path_step()?];
        while self.eat('.') {
            steps.push(self.parse_path_step()?);
        }
        let end = self.pos;
        let last = steps.pop().expect("at least one step");
        let direction = match (last.key.as_str(), &last.selector) {
            ("asc", None) => Direction::Asc,
            ("desc", None) => Direction::Desc,
            _ => return Err(Error::parse(end, "'.asc' or '.desc'")),
        };
        if steps.is_empty() {
            return Err(Error::parse(end, "path before '.asc'/'.desc'"));
        }
        Ok(OrderTerm {
            path: Path { steps },
            direction,
        })
    }

    fn parse_range_term(&mut self) -> Result<RangeTerm> {
        let start = self.parse_number_u64("range start")?;
        self.expect('.')?;
        let end = self.parse_number_u64("range end")?;
        Ok(RangeTerm { start, end })
    }

    fn parse_set_keys(&mut self) -> Result<Vec<String>> {
        let mut keys = vec![self.parse_set_key()?];
        while self.eat(',') {
            keys.push(self.parse_set_key()?);
        }
        Ok(keys)
    }

    fn parse_set_key(&mut self) -> Result<String> {
        let key = self.parse_ident()?;
        if self.peek() == Some('.') || self.peek() == Some('[') {
            return Err(Error::parse(
                self.pos,
                "top-level key in set (no dots or selectors)",
            ));
        }
        Ok(key)
    }

    /// A quoted string, or a bare token which is percent-decoded (free text
    /// arrives URL-encoded when the query rides in a URI).
    fn parse_message(&mut self) -> Result<String> {
        if self.peek() == Some('\'') {
            return self.parse_quoted();
        }
        let start = self.pos;
        let raw = self.scan_while(|c| c != '&');
        if raw.is_empty() {
            return Err(Error::parse(start, "message text"));
        }
        percent_decode_str(&raw)
            .decode_utf8()
            .map(|decoded| decoded.into_owned())
            .map_err(|_| Error::parse(start, "valid percent-encoded message text"))
    }

    // ==================== tokens ====================

    fn parse_ident(&mut self) -> Result<String> {
        if self.peek() == Some('\'') {
            return self.parse_quoted();
        }
        let start = self.pos;
        let word = self.scan_while(|c| !IDENT_STOP.contains(&c));
        if word.is_empty() {
            return Err(Error::parse(start, "identifier"));
        }
        Ok(word)
    }

    /// A bareword that also stops at ':' and '.', for operator segments.
    fn parse_bare_word(&mut self, start: usize) -> Result<String> {
        let word = self.scan_while(|c| c.is_ascii_alphanumeric() || c == '_');
        if word.is_empty() {
            return Err(Error::parse(start, "comparison operator"));
        }
        Ok(word)
    }

    fn parse_literal(&mut self) -> Result<Literal> {
        if self.peek() == Some('\'') {
            return self.parse_quoted().map(Literal::Str);
        }
        let start = self.pos;
        let raw = self.scan_while(|c| !VALUE_STOP.contains(&c));
        if raw.is_empty() {
            return Err(Error::parse(start, "literal"));
        }
        Ok(classify_literal(raw))
    }

    fn parse_quoted(&mut self) -> Result<String> {
        self.expect('\'')?;
        let mut out = String::new();
        loop {
            match self.advance() {
                None => return Err(Error::parse(self.pos, "closing quote")),
                Some('\\') => match self.advance() {
                    Some(c) => out.push(c),
                    None => return Err(Error::parse(self.pos, "escaped character")),
                },
                Some('\'') => return Ok(out),
                Some(c) => out.push(c),
            }
        }
    }

    fn parse_number_u64(&mut self, what: &str) -> Result<u64> {
        let start = self.pos;
        let digits = self.scan_while(|c| c.is_ascii_digit());
        digits
            .parse::<u64>()
            .map_err(|_| Error::parse(start, what.to_string()))
    }

    fn scan_while(&mut self, keep: impl Fn(char) -> bool) -> String {
        let mut out = String::new();
        while let Some(c) = self.peek() {
            if !keep(c) {
                break;
            }
            out.push(c);
            self.pos += 1;
        }
        out
    }
}

/// Barewords that look like numbers become numbers; `null` is null;
/// everything else is a string.
fn classify_literal(raw: String) -> Literal {
    if raw == "null" {
        return Literal::Null;
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Literal::Int(i);
    }
    let numeric_shape = raw
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '.' | '+' | '-' | 'e' | 'E'));
    if numeric_shape {
        if let Ok(f) = raw.parse::<f64>() {
            return Literal::Float(f);
        }
    }
    Literal::Str(raw)
}
