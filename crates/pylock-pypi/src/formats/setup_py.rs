//! Static reading of `setup.py`.
//!
//! The script is never executed. The `setup(...)` call is located and its
//! keyword arguments are read when they are plain literals (strings,
//! lists, tuples, dicts, booleans). Anything computed is skipped.

use crate::error::Result;
use crate::metadata::Metadata;
use crate::requirements::Requirement;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

static SETUP_CALL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?m)\bsetup\s*\(").unwrap());

/// A Python literal value.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(String),
    List(Vec<Literal>),
    Dict(Vec<(Literal, Literal)>),
    Bool(bool),
    None,
}

impl Literal {
    fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    /// A string or a list of strings as a list.
    fn string_list(&self) -> Vec<String> {
        match self {
            Self::Str(s) => s
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
            Self::List(items) => items
                .iter()
                .filter_map(|i| i.as_str().map(str::to_string))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Reads the literal keyword arguments of the last `setup(...)` call.
pub fn setup_kwargs(content: &str) -> BTreeMap<String, Literal> {
    let mut kwargs = BTreeMap::new();
    for found in SETUP_CALL.find_iter(content) {
        let mut scanner = Scanner::new(&content[found.end()..]);
        let parsed = scanner.call_arguments();
        if !parsed.is_empty() {
            kwargs = parsed;
        }
    }
    kwargs
}

/// Builds metadata from the literal arguments of `setup(...)`.
///
/// Returns `Ok(None)` if no call with a literal `name` is found.
pub fn scan(content: &str) -> Result<Option<Metadata>> {
    let kwargs = setup_kwargs(content);
    let Some(name) = kwargs.get("name").and_then(Literal::as_str) else {
        return Ok(None);
    };

    let canonical = |lines: Vec<String>| -> Result<Vec<String>> {
        lines
            .iter()
            .map(|line| Ok(Requirement::parse_dependency(line)?.as_line()))
            .collect()
    };

    let dependencies = canonical(
        kwargs
            .get("install_requires")
            .map(Literal::string_list)
            .unwrap_or_default(),
    )?;

    let mut extras = BTreeMap::new();
    if let Some(Literal::Dict(entries)) = kwargs.get("extras_require") {
        for (key, value) in entries {
            if let Some(extra) = key.as_str() {
                extras.insert(extra.to_string(), canonical(value.string_list())?);
            }
        }
    }

    Metadata::from_groups(
        name.to_string(),
        kwargs.get("version").and_then(Literal::as_str).map(str::to_string),
        kwargs
            .get("python_requires")
            .and_then(Literal::as_str)
            .map(str::to_string),
        dependencies,
        &extras,
    )
    .map(Some)
}

struct Scanner {
    chars: Vec<char>,
    pos: usize,
}

impl Scanner {
    fn new(source: &str) -> Self {
        Self {
            chars: source.chars().collect(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_trivia(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_whitespace() || c == '\\' {
                self.pos += 1;
            } else if c == '#' {
                while self.peek().is_some_and(|c| c != '\n') {
                    self.pos += 1;
                }
            } else {
                break;
            }
        }
    }

    /// Parses `name=value, ...)` up to the closing parenthesis.
    fn call_arguments(&mut self) -> BTreeMap<String, Literal> {
        let mut kwargs = BTreeMap::new();
        loop {
            self.skip_trivia();
            match self.peek() {
                None | Some(')') => break,
                Some(',') => {
                    self.pos += 1;
                    continue;
                }
                _ => {}
            }

            let start = self.pos;
            let ident = self.identifier();
            self.skip_trivia();
            if !ident.is_empty() && self.peek() == Some('=') && self.chars.get(self.pos + 1) != Some(&'=') {
                self.pos += 1;
                self.skip_trivia();
                let value_start = self.pos;
                match self.literal() {
                    Some(value) if self.at_argument_end() => {
                        kwargs.insert(ident, value);
                    }
                    _ => {
                        self.pos = value_start;
                        self.skip_expression();
                    }
                }
            } else {
                // Positional argument or `**kwargs`.
                self.pos = start;
                self.skip_expression();
            }
            if self.pos == start {
                self.pos += 1;
            }
        }
        kwargs
    }

    fn at_argument_end(&mut self) -> bool {
        self.skip_trivia();
        matches!(self.peek(), None | Some(',') | Some(')'))
    }

    fn identifier(&mut self) -> String {
        let mut ident = String::new();
        while let Some(c) = self.peek() {
            if c.is_alphanumeric() || c == '_' {
                ident.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }
        ident
    }

    /// Skips one argument expression, respecting nesting and strings.
    fn skip_expression(&mut self) {
        let mut depth = 0usize;
        while let Some(c) = self.peek() {
            match c {
                '(' | '[' | '{' => depth += 1,
                ')' | ']' | '}' => {
                    if depth == 0 {
                        return;
                    }
                    depth -= 1;
                }
                ',' if depth == 0 => return,
                '\'' | '"' => {
                    self.string();
                    continue;
                }
                '#' => {
                    self.skip_trivia();
                    continue;
                }
                _ => {}
            }
            self.pos += 1;
        }
    }

    fn literal(&mut self) -> Option<Literal> {
        self.skip_trivia();
        match self.peek()? {
            '\'' | '"' => {
                let mut value = self.string()?;
                // Implicit concatenation of adjacent string literals.
                loop {
                    self.skip_trivia();
                    match self.peek() {
                        Some('\'') | Some('"') => value.push_str(&self.string()?),
                        _ => break,
                    }
                }
                Some(Literal::Str(value))
            }
            '[' => self.sequence(']'),
            '(' => self.sequence(')'),
            '{' => self.dict(),
            _ => match self.identifier().as_str() {
                "True" => Some(Literal::Bool(true)),
                "False" => Some(Literal::Bool(false)),
                "None" => Some(Literal::None),
                _ => None,
            },
        }
    }

    fn sequence(&mut self, close: char) -> Option<Literal> {
        self.pos += 1;
        let mut items = Vec::new();
        loop {
            self.skip_trivia();
            match self.peek()? {
                c if c == close => {
                    self.pos += 1;
                    return Some(Literal::List(items));
                }
                ',' => self.pos += 1,
                _ => items.push(self.literal()?),
            }
        }
    }

    fn dict(&mut self) -> Option<Literal> {
        self.pos += 1;
        let mut entries = Vec::new();
        loop {
            self.skip_trivia();
            match self.peek()? {
                '}' => {
                    self.pos += 1;
                    return Some(Literal::Dict(entries));
                }
                ',' => self.pos += 1,
                _ => {
                    let key = self.literal()?;
                    self.skip_trivia();
                    if self.peek()? != ':' {
                        return None;
                    }
                    self.pos += 1;
                    let value = self.literal()?;
                    entries.push((key, value));
                }
            }
        }
    }

    /// Reads a quoted string, including triple-quoted ones.
    fn string(&mut self) -> Option<String> {
        let quote = self.peek()?;
        let triple = self.chars.get(self.pos + 1) == Some(&quote)
            && self.chars.get(self.pos + 2) == Some(&quote);
        self.pos += if triple { 3 } else { 1 };

        let mut value = String::new();
        loop {
            let c = self.peek()?;
            if c == '\\' {
                let escaped = *self.chars.get(self.pos + 1)?;
                value.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    other => other,
                });
                self.pos += 2;
                continue;
            }
            if c == quote {
                if !triple {
                    self.pos += 1;
                    return Some(value);
                }
                if self.chars.get(self.pos + 1) == Some(&quote)
                    && self.chars.get(self.pos + 2) == Some(&quote)
                {
                    self.pos += 3;
                    return Some(value);
                }
            }
            if c == '\n' && !triple {
                return None;
            }
            value.push(c);
            self.pos += 1;
        }
    }
}
