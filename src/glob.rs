//! Glob matching over dot-separated metric paths.
//!
//! Per segment: `*` matches any run, `?` one character, `[...]` a character class
//! (`[!...]` or `[^...]` negated, `a-z` ranges) and `{a,b}` any of the alternatives.
//! A backslash makes the next character literal, including `.`.

use crate::error::{Result, StrataError};

/// Expansions beyond this many alternatives are rejected.
const MAX_BRACE_EXPANSIONS: usize = 4096;

#[derive(Debug, Clone, PartialEq)]
enum ClassItem {
    Char(char),
    Range(char, char),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Literal(char),
    AnyRun,
    AnyOne,
    Class { negated: bool, items: Vec<ClassItem> },
}

impl Token {
    fn matches_char(&self, c: char) -> bool {
        match self {
            Token::Literal(l) => *l == c,
            Token::AnyRun | Token::AnyOne => true,
            Token::Class { negated, items } => {
                let hit = items.iter().any(|item| match *item {
                    ClassItem::Char(x) => x == c,
                    ClassItem::Range(lo, hi) => lo <= c && c <= hi,
                });
                hit != *negated
            }
        }
    }
}

/// One compiled path segment.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobSegment {
    source: String,
    alternatives: Vec<Vec<Token>>,
    literal: Option<String>,
}

impl GlobSegment {
    pub fn compile(segment: &str) -> Result<Self> {
        let expanded = expand_braces(segment)?;
        let alternatives: Vec<Vec<Token>> = expanded.iter().map(|alt| tokenize(alt)).collect();
        let literal = if has_metachar(segment) {
            None
        } else {
            Some(unescape(segment))
        };
        Ok(Self {
            source: segment.to_string(),
            alternatives,
            literal,
        })
    }

    /// True if the segment can match more than one name.
    pub fn is_pattern(&self) -> bool {
        self.literal.is_none()
    }

    /// The unescaped name this segment stands for, if it is not a pattern.
    pub fn literal(&self) -> Option<&str> {
        self.literal.as_deref()
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, name: &str) -> bool {
        if let Some(lit) = &self.literal {
            return lit == name;
        }
        let chars: Vec<char> = name.chars().collect();
        self.alternatives
            .iter()
            .any(|tokens| match_tokens(tokens, &chars))
    }
}

/// A compiled dotted pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct GlobPattern {
    segments: Vec<GlobSegment>,
}

impl GlobPattern {
    pub fn compile(pattern: &str) -> Result<Self> {
        let segments = split_segments(pattern)
            .into_iter()
            .map(GlobSegment::compile)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[GlobSegment] {
        &self.segments
    }

    /// Matches an unescaped dotted path segment-by-segment.
    pub fn matches(&self, path: &str) -> bool {
        let parts: Vec<&str> = path.split('.').collect();
        parts.len() == self.segments.len()
            && self
                .segments
                .iter()
                .zip(parts)
                .all(|(seg, part)| seg.matches(part))
    }
}

/// Splits on dots that are neither escaped nor inside `{}` / `[]`.
pub fn split_segments(pattern: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut brace_depth = 0usize;
    let mut in_class = false;
    let mut chars = pattern.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '[' if !in_class => in_class = true,
            ']' if in_class => in_class = false,
            '{' if !in_class => brace_depth += 1,
            '}' if !in_class && brace_depth > 0 => brace_depth -= 1,
            '.' if !in_class && brace_depth == 0 => {
                out.push(&pattern[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    out.push(&pattern[start..]);
    out
}

/// True if `segment` contains an unescaped glob metacharacter.
pub fn has_metachar(segment: &str) -> bool {
    let mut chars = segment.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                chars.next();
            }
            '*' | '?' | '[' | '{' => return true,
            _ => {}
        }
    }
    false
}

/// True if any segment of a dotted pattern is a glob.
pub fn is_pattern(pattern: &str) -> bool {
    has_metachar(pattern)
}

/// Removes escaping backslashes.
pub fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Escapes characters that would otherwise be read as syntax in a path expression.
pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(
            c,
            '(' | ')' | '{' | '}' | ',' | '=' | '.' | '\'' | '"' | '\\' | '*' | '?' | '[' | ']'
        ) {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Finds the `}` closing the `{` at `open`, and the top-level comma positions between them.
fn find_brace_group(chars: &[char], open: usize) -> Option<(usize, Vec<usize>)> {
    let mut depth = 0usize;
    let mut commas = Vec::new();
    let mut i = open;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 1,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some((i, commas));
                }
            }
            ',' if depth == 1 => commas.push(i),
            _ => {}
        }
        i += 1;
    }
    None
}

fn expand_braces(segment: &str) -> Result<Vec<String>> {
    let mut out = Vec::new();
    expand_into(segment, &mut out)?;
    Ok(out)
}

fn expand_into(segment: &str, out: &mut Vec<String>) -> Result<()> {
    let chars: Vec<char> = segment.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            '{' => {
                if let Some((close, commas)) = find_brace_group(&chars, i) {
                    let prefix: String = chars[..i].iter().collect();
                    let suffix: String = chars[close + 1..].iter().collect();
                    let mut bounds = vec![i];
                    bounds.extend(commas);
                    bounds.push(close);
                    for pair in bounds.windows(2) {
                        let alt: String = chars[pair[0] + 1..pair[1]].iter().collect();
                        expand_into(&format!("{}{}{}", prefix, alt, suffix), out)?;
                        if out.len() > MAX_BRACE_EXPANSIONS {
                            return Err(StrataError::ArgumentShape(format!(
                                "pattern '{}' expands to too many alternatives",
                                segment
                            )));
                        }
                    }
                    return Ok(());
                }
                i += 1;
            }
            _ => i += 1,
        }
    }
    out.push(segment.to_string());
    Ok(())
}

fn tokenize(pattern: &str) -> Vec<Token> {
    let chars: Vec<char> = pattern.chars().collect();
    let mut tokens = Vec::with_capacity(chars.len());
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '\\' => {
                if let Some(&c) = chars.get(i + 1) {
                    tokens.push(Token::Literal(c));
                }
                i += 2;
            }
            '*' => {
                if tokens.last() != Some(&Token::AnyRun) {
                    tokens.push(Token::AnyRun);
                }
                i += 1;
            }
            '?' => {
                tokens.push(Token::AnyOne);
                i += 1;
            }
            '[' => match parse_class(&chars, i) {
                Some((token, next)) => {
                    tokens.push(token);
                    i = next;
                }
                None => {
                    tokens.push(Token::Literal('['));
                    i += 1;
                }
            },
            c => {
                tokens.push(Token::Literal(c));
                i += 1;
            }
        }
    }
    tokens
}

/// Parses `[...]` starting at `open`. Returns the token and the index after `]`.
fn parse_class(chars: &[char], open: usize) -> Option<(Token, usize)> {
    let mut i = open + 1;
    let negated = matches!(chars.get(i), Some('!') | Some('^'));
    if negated {
        i += 1;
    }
    let mut items = Vec::new();
    let mut first = true;
    while i < chars.len() {
        let mut c = chars[i];
        if c == ']' && !first {
            return Some((Token::Class { negated, items }, i + 1));
        }
        first = false;
        if c == '\\' {
            i += 1;
            c = *chars.get(i)?;
        }
        if chars.get(i + 1) == Some(&'-') && chars.get(i + 2).is_some_and(|&n| n != ']') {
            let mut hi = chars[i + 2];
            let mut next = i + 3;
            if hi == '\\' {
                hi = *chars.get(i + 3)?;
                next = i + 4;
            }
            items.push(ClassItem::Range(c, hi));
            i = next;
        } else {
            items.push(ClassItem::Char(c));
            i += 1;
        }
    }
    None
}

/// Wildcard match with single-star backtracking.
fn match_tokens(tokens: &[Token], text: &[char]) -> bool {
    let (mut p, mut t) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;
    while t < text.len() {
        if let Some(token) = tokens.get(p) {
            if *token == Token::AnyRun {
                star = Some((p, t));
                p += 1;
                continue;
            }
            if token.matches_char(text[t]) {
                p += 1;
                t += 1;
                continue;
            }
        }
        match star {
            Some((sp, st)) => {
                p = sp + 1;
                t = st + 1;
                star = Some((sp, st + 1));
            }
            None => return false,
        }
    }
    tokens[p..].iter().all(|tok| *tok == Token::AnyRun)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(s: &str) -> GlobSegment {
        GlobSegment::compile(s).unwrap()
    }

    #[test]
    fn star_matches_single_segment_only() {
        let p = GlobPattern::compile("a.*.c").unwrap();
        assert!(p.matches("a.b.c"));
        assert!(p.matches("a.x.c"));
        assert!(!p.matches("a.b.b.c"));
    }

    #[test]
    fn escaped_star_is_literal() {
        let p = GlobPattern::compile(r"a.\*.c").unwrap();
        assert!(p.matches("a.*.c"));
        assert!(!p.matches("a.b.c"));
        assert!(!p.segments()[1].is_pattern());
        assert_eq!(p.segments()[1].literal(), Some("*"));
    }

    #[test]
    fn question_mark_and_classes() {
        assert!(seg("cpu?").matches("cpu0"));
        assert!(!seg("cpu?").matches("cpu"));
        assert!(seg("cpu[0-3]").matches("cpu2"));
        assert!(!seg("cpu[0-3]").matches("cpu7"));
        assert!(seg("cpu[!0-3]").matches("cpu7"));
        assert!(seg("x[]]").matches("x]"));
    }

    #[test]
    fn brace_alternation() {
        let s = seg("{web,db}[12]");
        assert!(s.matches("web1"));
        assert!(s.matches("db2"));
        assert!(!s.matches("cache1"));
        assert!(seg("{foo}").matches("foo"));
        assert!(seg("a{b,{c,d}}e").matches("ade"));
    }

    #[test]
    fn unmatched_brackets_are_literal() {
        assert!(seg("a[b").matches("a[b"));
        assert!(seg("a{b").matches("a{b"));
    }

    #[test]
    fn split_respects_escapes_and_groups() {
        assert_eq!(split_segments(r"a\.b.c"), vec![r"a\.b", "c"]);
        assert_eq!(split_segments("a.{b.c,d}.e"), vec!["a", "{b.c,d}", "e"]);
        assert_eq!(split_segments("a.[.].e"), vec!["a", "[.]", "e"]);
    }

    #[test]
    fn escape_round_trips() {
        let name = "host(1).load=avg";
        assert_eq!(unescape(&escape(name)), name);
        assert!(!is_pattern(&escape("a*b")));
    }

    #[test]
    fn star_backtracks() {
        assert!(seg("*a*b").matches("xxaxxab"));
        assert!(!seg("*a*b").matches("xxaxxa"));
        assert!(seg("*").matches(""));
    }
}
