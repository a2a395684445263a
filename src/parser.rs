//! Target expression grammar.
//!
//! ```text
//! expr   := call | path | number | string | boolean
//! call   := name '(' (arg (',' arg)*)? ')'
//! arg    := expr | name '=' expr
//! ```
//!
//! Paths are dotted globs; `{a,b}` and `[...]` may contain commas, and a backslash
//! escapes any character.

use crate::error::{Result, StrataError};

use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Call(Call),
    /// A path expression, kept in its escaped source form.
    Path(String),
    Number(f64),
    Str(String),
    Bool(bool),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Call {
    pub name: String,
    pub args: Vec<Expr>,
    pub kwargs: Vec<(String, Expr)>,
}

impl Expr {
    /// Every function name referenced in the expression, outermost first.
    pub fn function_names(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_function_names(&mut out);
        out
    }

    fn collect_function_names<'a>(&'a self, out: &mut Vec<&'a str>) {
        if let Expr::Call(call) = self {
            out.push(&call.name);
            for arg in call.args.iter().chain(call.kwargs.iter().map(|(_, v)| v)) {
                arg.collect_function_names(out);
            }
        }
    }
}

/// Renders back to source form. Used to name series after the expression that made them.
impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Call(call) => {
                write!(f, "{}(", call.name)?;
                let mut first = true;
                for arg in &call.args {
                    if !first {
                        f.write_str(",")?;
                    }
                    first = false;
                    write!(f, "{}", arg)?;
                }
                for (k, v) in &call.kwargs {
                    if !first {
                        f.write_str(",")?;
                    }
                    first = false;
                    write!(f, "{}={}", k, v)?;
                }
                f.write_str(")")
            }
            Expr::Path(p) => f.write_str(p),
            Expr::Number(n) => write!(f, "{}", n),
            Expr::Str(s) => write!(f, "'{}'", s.replace('\'', "\\'")),
            Expr::Bool(b) => write!(f, "{}", b),
        }
    }
}

/// Parses one complete target expression.
pub fn parse(input: &str) -> Result<Expr> {
    let mut parser = Parser {
        chars: input.chars().collect(),
        pos: 0,
    };
    parser.skip_ws();
    let expr = parser.parse_expr()?;
    parser.skip_ws();
    if parser.pos < parser.chars.len() {
        return Err(parser.error(format!("unexpected '{}'", parser.chars[parser.pos])));
    }
    Ok(expr)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

enum Arg {
    Positional(Expr),
    Keyword(String, Expr),
}

impl Parser {
    fn error(&self, message: impl Into<String>) -> StrataError {
        StrataError::Parse {
            position: self.pos,
            message: message.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn parse_expr(&mut self) -> Result<Expr> {
        match self.peek() {
            None => Err(self.error("unexpected end of expression")),
            Some(q @ ('\'' | '"')) => self.parse_string(q),
            Some(_) => {
                let start = self.pos;
                let token = self.read_token()?;
                if token.is_empty() {
                    return Err(self.error("expected an expression"));
                }
                self.skip_ws();
                if self.peek() == Some('(') {
                    if !is_identifier(&token) {
                        self.pos = start;
                        return Err(self.error(format!("invalid function name '{}'", token)));
                    }
                    self.pos += 1;
                    return self.parse_call(token);
                }
                Ok(classify(token))
            }
        }
    }

    fn parse_call(&mut self, name: String) -> Result<Expr> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        self.skip_ws();
        if self.peek() == Some(')') {
            self.pos += 1;
            return Ok(Expr::Call(Call { name, args, kwargs }));
        }
        loop {
            self.skip_ws();
            match self.parse_arg()? {
                Arg::Positional(expr) => {
                    if !kwargs.is_empty() {
                        return Err(self.error("positional argument follows keyword argument"));
                    }
                    args.push(expr);
                }
                Arg::Keyword(key, expr) => kwargs.push((key, expr)),
            }
            self.skip_ws();
            match self.peek() {
                Some(',') => self.pos += 1,
                Some(')') => {
                    self.pos += 1;
                    return Ok(Expr::Call(Call { name, args, kwargs }));
                }
                Some(c) => return Err(self.error(format!("expected ',' or ')', found '{}'", c))),
                None => return Err(self.error(format!("unclosed call to '{}'", name))),
            }
        }
    }

    fn parse_arg(&mut self) -> Result<Arg> {
        // `name=` introduces a keyword argument.
        let start = self.pos;
        let mut end = start;
        while self
            .chars
            .get(end)
            .is_some_and(|c| c.is_ascii_alphanumeric() || *c == '_')
        {
            end += 1;
        }
        if end > start {
            let mut after = end;
            while self.chars.get(after).is_some_and(|c| c.is_whitespace()) {
                after += 1;
            }
            if self.chars.get(after) == Some(&'=') && self.chars.get(after + 1) != Some(&'=') {
                let key: String = self.chars[start..end].iter().collect();
                self.pos = after + 1;
                self.skip_ws();
                return Ok(Arg::Keyword(key, self.parse_expr()?));
            }
        }
        Ok(Arg::Positional(self.parse_expr()?))
    }

    fn parse_string(&mut self, quote: char) -> Result<Expr> {
        let start = self.pos;
        self.pos += 1;
        let mut out = String::new();
        while let Some(c) = self.peek() {
            self.pos += 1;
            match c {
                '\\' => {
                    if let Some(next) = self.peek() {
                        out.push(next);
                        self.pos += 1;
                    }
                }
                c if c == quote => return Ok(Expr::Str(out)),
                c => out.push(c),
            }
        }
        self.pos = start;
        Err(self.error("unterminated string"))
    }

    /// Reads a bare token: a path, number, boolean or function name.
    fn read_token(&mut self) -> Result<String> {
        let mut out = String::new();
        let mut braces = 0usize;
        let mut in_class = false;
        while let Some(c) = self.peek() {
            match c {
                '\\' => {
                    out.push(c);
                    self.pos += 1;
                    match self.peek() {
                        Some(next) => {
                            out.push(next);
                            self.pos += 1;
                        }
                        None => return Err(self.error("dangling escape")),
                    }
                    continue;
                }
                '[' if !in_class => in_class = true,
                ']' if in_class => in_class = false,
                '{' if !in_class => braces += 1,
                '}' if !in_class && braces > 0 => braces -= 1,
                ',' if braces > 0 || in_class => {}
                '(' | ')' | ',' | '=' | '\'' | '"' => break,
                c if c.is_whitespace() => break,
                _ => {}
            }
            out.push(c);
            self.pos += 1;
        }
        if braces > 0 {
            return Err(self.error("unclosed '{' in path expression"));
        }
        Ok(out)
    }
}

fn is_identifier(token: &str) -> bool {
    let mut chars = token.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Integer, decimal or scientific notation, optionally signed.
fn is_number(token: &str) -> bool {
    let bytes = token.as_bytes();
    let mut i = 0;
    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        i += 1;
    }
    let int_start = i;
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        i += 1;
    }
    let mut digits = i - int_start;
    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        let frac_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        digits += i - frac_start;
    }
    if digits == 0 {
        return false;
    }
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        i += 1;
        if matches!(bytes.get(i), Some(b'+') | Some(b'-')) {
            i += 1;
        }
        let exp_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i == exp_start {
            return false;
        }
    }
    i == bytes.len()
}

fn classify(token: String) -> Expr {
    if is_number(&token) {
        if let Ok(n) = token.parse::<f64>() {
            return Expr::Number(n);
        }
    }
    match token.as_str() {
        "true" | "True" => Expr::Bool(true),
        "false" | "False" => Expr::Bool(false),
        _ => Expr::Path(token),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(name: &str, args: Vec<Expr>) -> Expr {
        Expr::Call(Call {
            name: name.to_string(),
            args,
            kwargs: Vec::new(),
        })
    }

    #[test]
    fn bare_path() {
        assert_eq!(parse("a.b.*").unwrap(), Expr::Path("a.b.*".to_string()));
    }

    #[test]
    fn nested_calls_and_literals() {
        let expr = parse("scale(sumSeries(a.*, b.{c,d}), -1.5e2)").unwrap();
        assert_eq!(
            expr,
            call(
                "scale",
                vec![
                    call(
                        "sumSeries",
                        vec![Expr::Path("a.*".into()), Expr::Path("b.{c,d}".into())]
                    ),
                    Expr::Number(-150.0),
                ]
            )
        );
        assert_eq!(expr.function_names(), vec!["scale", "sumSeries"]);
    }

    #[test]
    fn strings_booleans_and_kwargs() {
        let expr = parse(r#"alias(a.b, "x \"y\"", fake=true, n = 'q')"#).unwrap();
        let Expr::Call(c) = expr else { panic!() };
        assert_eq!(c.args[1], Expr::Str("x \"y\"".into()));
        assert_eq!(c.kwargs[0], ("fake".to_string(), Expr::Bool(true)));
        assert_eq!(c.kwargs[1], ("n".to_string(), Expr::Str("q".into())));
    }

    #[test]
    fn numbers_vs_paths() {
        assert_eq!(parse("42").unwrap(), Expr::Number(42.0));
        assert_eq!(parse(".5").unwrap(), Expr::Number(0.5));
        assert_eq!(parse("5xx.count").unwrap(), Expr::Path("5xx.count".into()));
        assert_eq!(parse("inf").unwrap(), Expr::Path("inf".into()));
    }

    #[test]
    fn escapes_stay_in_paths() {
        assert_eq!(parse(r"a.b\(1\).c").unwrap(), Expr::Path(r"a.b\(1\).c".into()));
    }

    #[test]
    fn errors_report_position() {
        for bad in ["sum(a.b", "sum(a.b,", "'open", "a.{b,c", "sum(x=1, a.b)", "a.b)"] {
            assert!(
                matches!(parse(bad), Err(StrataError::Parse { .. })),
                "{} should not parse",
                bad
            );
        }
    }

    #[test]
    fn display_round_trips_structure() {
        let src = "movingAverage(a.b,'5min',xFilesFactor=0.5)";
        let expr = parse(src).unwrap();
        assert_eq!(parse(&expr.to_string()).unwrap(), expr);
    }
}
