//! PEP 508 environment markers.
//!
//! A [`Marker`] is a boolean expression over environment variables such as
//! `os_name` or `python_version`. Parsing and evaluation go through
//! [`pep508_rs::MarkerTree`]; the textual form keeps the clause order of the
//! declaration and renders literals with double quotes. Markers can be
//! projected onto a [`PySpecSet`].

use crate::error::MarkerError;
use crate::specifiers::PySpecSet;
use pep440_rs::Version;
use pep508_rs::{ExtraName, MarkerEnvironmentBuilder, MarkerTree, MarkerTreeKind, MarkerValueVersion};
use std::collections::BTreeSet;
use std::fmt;
use std::ops::Bound;
use std::str::FromStr;

/// Dotted names accepted for backwards compatibility.
const LEGACY_ALIASES: &[(&str, &str)] = &[
    ("os.name", "os_name"),
    ("sys.platform", "sys_platform"),
    ("platform.version", "platform_version"),
    ("platform.machine", "platform_machine"),
    ("platform.python_implementation", "platform_python_implementation"),
    ("python_implementation", "platform_python_implementation"),
];

const VERSION_VARIABLES: &[&str] = &[
    "python_version",
    "python_full_version",
    "implementation_version",
];

/// Normalizes a project or extra name: lowercase, runs of `-_.` become `-`.
pub fn normalize_name(name: &str) -> String {
    let mut normalized = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.trim().chars() {
        if matches!(c, '-' | '_' | '.') {
            pending_dash = true;
            continue;
        }
        if pending_dash && !normalized.is_empty() {
            normalized.push('-');
        }
        pending_dash = false;
        normalized.push(c.to_ascii_lowercase());
    }
    normalized
}

/// Parsed environment marker.
///
/// # Examples
///
/// ```
/// use pylock_pypi::Marker;
///
/// let marker: Marker = "os_name=='nt' and (python_version<'3' or extra == 'tests')"
///     .parse()
///     .unwrap();
/// assert_eq!(
///     marker.to_string(),
///     r#"os_name == "nt" and (python_version < "3" or extra == "tests")"#
/// );
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Marker {
    tree: MarkerTree,
    text: String,
}

impl Marker {
    pub fn parse(input: &str) -> Result<Self, MarkerError> {
        let tree = MarkerTree::from_str(input).map_err(|e| MarkerError {
            position: input.get(..e.start).map_or(e.start, |prefix| prefix.chars().count()),
            reason: e.message.to_string(),
        })?;
        Ok(Self {
            tree,
            text: render(&tokenize(input)),
        })
    }

    /// `extra == "<name>"`
    pub fn extra(name: &str) -> Result<Self, MarkerError> {
        Self::parse(&format!("extra == \"{}\"", name))
    }

    /// Conjunction of two markers.
    pub fn and(self, other: Self) -> Self {
        let mut tree = self.tree;
        tree.and(other.tree);
        let text = format!("{} and {}", grouped(&self.text), grouped(&other.text));
        Self { tree, text }
    }

    /// Conjunction of any number of markers; `None` when empty.
    pub fn and_all(markers: impl IntoIterator<Item = Self>) -> Option<Self> {
        markers.into_iter().reduce(Self::and)
    }

    /// Disjunction of two markers.
    pub fn or(self, other: Self) -> Self {
        let mut tree = self.tree;
        tree.or(other.tree);
        let text = format!("{} or {}", self.text, other.text);
        Self { tree, text }
    }

    /// Evaluates the marker against an environment and the active extras.
    pub fn evaluate(&self, env: &MarkerEnvironment, extras: &BTreeSet<String>) -> bool {
        let Some(env) = env.to_pep508() else {
            return false;
        };
        let extras: Vec<ExtraName> = extras
            .iter()
            .filter_map(|extra| ExtraName::from_str(extra).ok())
            .collect();
        self.tree.evaluate(&env, &extras)
    }

    /// Separates `extra == "x"` clauses from the rest of the marker.
    ///
    /// Returns the extras the marker is gated on and the remaining marker,
    /// if anything remains.
    ///
    /// # Examples
    ///
    /// ```
    /// use pylock_pypi::Marker;
    ///
    /// let marker: Marker = r#"python_version >= "3.6" and extra == "security""#.parse().unwrap();
    /// let (extras, rest) = marker.split_extras();
    /// assert!(extras.contains("security"));
    /// assert_eq!(rest.unwrap().to_string(), r#"python_version >= "3.6""#);
    /// ```
    pub fn split_extras(&self) -> (BTreeSet<String>, Option<Self>) {
        let tokens = tokenize(&self.text);
        let mut extras = BTreeSet::new();
        let mut rest = Vec::new();
        for clause in conjuncts(&tokens) {
            let Ok(marker) = Self::parse(&render(clause)) else {
                return (BTreeSet::new(), Some(self.clone()));
            };
            match extras_gate(&marker.tree) {
                Some(found) => extras.extend(found),
                None => rest.push(marker),
            }
        }
        (extras, Self::and_all(rest))
    }

    /// Projects the Python version constraints of the marker onto a
    /// [`PySpecSet`]. Clauses on other variables are unconstrained.
    ///
    /// # Examples
    ///
    /// ```
    /// use pylock_pypi::Marker;
    ///
    /// let marker: Marker = r#"python_version > "3.6" and os_name == "nt""#.parse().unwrap();
    /// assert_eq!(marker.python_spec().to_string(), ">=3.7");
    /// ```
    pub fn python_spec(&self) -> PySpecSet {
        python_projection(&self.tree)
    }
}

impl FromStr for Marker {
    type Err = MarkerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Extras a marker made only of `extra` comparisons is gated on.
///
/// `None` if the marker references other variables or holds with no extra
/// active.
fn extras_gate(tree: &MarkerTree) -> Option<BTreeSet<String>> {
    let mut extras = BTreeSet::new();
    let holds_without_extras = collect_extras(tree, &mut extras)?;
    (!holds_without_extras && !extras.is_empty()).then_some(extras)
}

/// Walks `extra` decisions, returning whether the tree holds with every
/// extra inactive.
fn collect_extras(tree: &MarkerTree, extras: &mut BTreeSet<String>) -> Option<bool> {
    match tree.kind() {
        MarkerTreeKind::True => Some(true),
        MarkerTreeKind::False => Some(false),
        MarkerTreeKind::Extra(node) => {
            extras.insert(normalize_name(&node.name().to_string()));
            let mut holds = false;
            for (active, child) in node.children() {
                let child_holds = collect_extras(&child, extras)?;
                if !active {
                    holds = child_holds;
                }
            }
            Some(holds)
        }
        _ => None,
    }
}

fn python_projection(tree: &MarkerTree) -> PySpecSet {
    match tree.kind() {
        MarkerTreeKind::True => PySpecSet::any(),
        MarkerTreeKind::False => PySpecSet::impossible(),
        MarkerTreeKind::Version(node) if is_python_version(node.key()) => {
            node.edges().fold(PySpecSet::impossible(), |acc, (range, child)| {
                let spec = &range_spec(range.iter()) & &python_projection(&child);
                &acc | &spec
            })
        }
        MarkerTreeKind::Version(node) => union(node.edges().map(|(_, child)| python_projection(&child))),
        MarkerTreeKind::String(node) => {
            union(node.children().map(|(_, child)| python_projection(&child)))
        }
        MarkerTreeKind::In(node) => union(node.children().map(|(_, child)| python_projection(&child))),
        MarkerTreeKind::Contains(node) => {
            union(node.children().map(|(_, child)| python_projection(&child)))
        }
        MarkerTreeKind::Extra(node) => {
            union(node.children().map(|(_, child)| python_projection(&child)))
        }
    }
}

fn is_python_version(key: &MarkerValueVersion) -> bool {
    matches!(
        key,
        MarkerValueVersion::PythonVersion | MarkerValueVersion::PythonFullVersion
    )
}

fn union(specs: impl Iterator<Item = PySpecSet>) -> PySpecSet {
    specs.fold(PySpecSet::impossible(), |acc, spec| &acc | &spec)
}

/// Interpreter versions covered by a set of version intervals.
fn range_spec<'a>(segments: impl Iterator<Item = (&'a Bound<Version>, &'a Bound<Version>)>) -> PySpecSet {
    let mut result = PySpecSet::impossible();
    for (lower, upper) in segments {
        let lower = match lower {
            Bound::Included(v) => Some(format!(">={}", release(v))),
            Bound::Excluded(v) => Some(format!(">{}", release(v))),
            Bound::Unbounded => None,
        };
        let upper = match upper {
            Bound::Included(v) => Some(format!("<={}", release(v))),
            Bound::Excluded(v) => Some(format!("<{}", release(v))),
            Bound::Unbounded => None,
        };
        let clauses: Vec<String> = lower.into_iter().chain(upper).collect();
        let segment = PySpecSet::parse(&clauses.join(",")).unwrap_or_else(|e| {
            tracing::debug!("ignoring python constraint in marker: {}", e);
            PySpecSet::any()
        });
        result = &result | &segment;
    }
    result
}

fn release(version: &Version) -> String {
    version
        .release()
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(".")
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Word(String),
    Literal(String),
    Op(String),
    Open,
    Close,
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.'
}

fn tokenize(input: &str) -> Vec<Token> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::Open);
                i += 1;
            }
            ')' => {
                tokens.push(Token::Close);
                i += 1;
            }
            '"' | '\'' => {
                let end = chars[i + 1..]
                    .iter()
                    .position(|&q| q == c)
                    .map_or(chars.len(), |p| i + 1 + p);
                tokens.push(Token::Literal(chars[i + 1..end].iter().collect()));
                i = end + 1;
            }
            c if is_word_char(c) => {
                let start = i;
                while i < chars.len() && is_word_char(chars[i]) {
                    i += 1;
                }
                tokens.push(Token::Word(chars[start..i].iter().collect()));
            }
            _ => {
                let start = i;
                while i < chars.len() && matches!(chars[i], '=' | '!' | '<' | '>' | '~') {
                    i += 1;
                }
                if i == start {
                    i += 1;
                }
                tokens.push(Token::Op(chars[start..i].iter().collect()));
            }
        }
    }
    tokens
}

/// Canonical text: single spaces, double-quoted literals, current variable
/// names.
fn render(tokens: &[Token]) -> String {
    let mut out = String::new();
    for token in tokens {
        let piece = match token {
            Token::Word(word) => LEGACY_ALIASES
                .iter()
                .find(|(alias, _)| *alias == word.as_str())
                .map_or(word.clone(), |(_, name)| (*name).to_string()),
            Token::Literal(value) if value.contains('"') => format!("'{}'", value),
            Token::Literal(value) => format!("\"{}\"", value),
            Token::Op(op) => op.clone(),
            Token::Open => "(".to_string(),
            Token::Close => ")".to_string(),
        };
        if !out.is_empty() && !out.ends_with('(') && *token != Token::Close {
            out.push(' ');
        }
        out.push_str(&piece);
    }
    out
}

/// Parenthesizes a marker containing a top-level `or`.
fn grouped(text: &str) -> String {
    if split_top_level(&tokenize(text), "or").len() > 1 {
        format!("({})", text)
    } else {
        text.to_string()
    }
}

/// Splits tokens at occurrences of `keyword` outside parentheses.
fn split_top_level<'a>(tokens: &'a [Token], keyword: &str) -> Vec<&'a [Token]> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (i, token) in tokens.iter().enumerate() {
        match token {
            Token::Open => depth += 1,
            Token::Close => depth = depth.saturating_sub(1),
            Token::Word(word) if depth == 0 && word == keyword => {
                parts.push(&tokens[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&tokens[start..]);
    parts
}

/// `true` if the parentheses of `tokens` balance without closing early.
fn balanced(tokens: &[Token]) -> bool {
    let mut depth = 0usize;
    for token in tokens {
        match token {
            Token::Open => depth += 1,
            Token::Close if depth == 0 => return false,
            Token::Close => depth -= 1,
            _ => {}
        }
    }
    depth == 0
}

fn unwrap_parens(mut tokens: &[Token]) -> &[Token] {
    while let [Token::Open, inner @ .., Token::Close] = tokens
        && balanced(inner)
    {
        tokens = inner;
    }
    tokens
}

/// The `and`-joined clauses of a marker, with nested conjunctions flattened.
fn conjuncts(tokens: &[Token]) -> Vec<&[Token]> {
    let tokens = unwrap_parens(tokens);
    if split_top_level(tokens, "or").len() > 1 {
        return vec![tokens];
    }
    let parts = split_top_level(tokens, "and");
    if parts.len() == 1 {
        return parts;
    }
    parts.into_iter().flat_map(conjuncts).collect()
}

/// Values of marker variables for one target interpreter and platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerEnvironment {
    pub python_version: String,
    pub python_full_version: String,
    pub os_name: String,
    pub sys_platform: String,
    pub platform_release: String,
    pub platform_system: String,
    pub platform_version: String,
    pub platform_machine: String,
    pub platform_python_implementation: String,
    pub implementation_name: String,
    pub implementation_version: String,
}

impl MarkerEnvironment {
    /// Environment for a CPython interpreter of `version` on the host
    /// platform.
    ///
    /// # Examples
    ///
    /// ```
    /// use pylock_pypi::MarkerEnvironment;
    ///
    /// let env = MarkerEnvironment::for_python("3.7.4");
    /// assert_eq!(env.python_version, "3.7");
    /// assert_eq!(env.python_full_version, "3.7.4");
    /// ```
    pub fn for_python(version: &str) -> Self {
        let parts: Vec<&str> = version.trim().split('.').collect();
        let python_version = parts.iter().take(2).copied().collect::<Vec<_>>().join(".");
        let python_full_version = if parts.len() >= 3 {
            version.trim().to_string()
        } else {
            format!("{}.0", python_version)
        };
        let (os_name, sys_platform, platform_system) = match std::env::consts::OS {
            "windows" => ("nt", "win32", "Windows"),
            "macos" => ("posix", "darwin", "Darwin"),
            "linux" => ("posix", "linux", "Linux"),
            other => ("posix", other, other),
        };
        Self {
            python_version,
            python_full_version: python_full_version.clone(),
            os_name: os_name.into(),
            sys_platform: sys_platform.into(),
            platform_release: String::new(),
            platform_system: platform_system.into(),
            platform_version: String::new(),
            platform_machine: std::env::consts::ARCH.into(),
            platform_python_implementation: "CPython".into(),
            implementation_name: "cpython".into(),
            implementation_version: python_full_version,
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        let value = match name {
            "python_version" => &self.python_version,
            "python_full_version" => &self.python_full_version,
            "os_name" => &self.os_name,
            "sys_platform" => &self.sys_platform,
            "platform_release" => &self.platform_release,
            "platform_system" => &self.platform_system,
            "platform_version" => &self.platform_version,
            "platform_machine" => &self.platform_machine,
            "platform_python_implementation" => &self.platform_python_implementation,
            "implementation_name" => &self.implementation_name,
            "implementation_version" => &self.implementation_version,
            _ => return None,
        };
        Some(value)
    }

    /// `true` for variables compared with PEP 440 semantics.
    pub fn is_version_variable(name: &str) -> bool {
        VERSION_VARIABLES.contains(&name)
    }

    fn to_pep508(&self) -> Option<pep508_rs::MarkerEnvironment> {
        let implementation_version = if self.implementation_version.is_empty() {
            &self.python_full_version
        } else {
            &self.implementation_version
        };
        pep508_rs::MarkerEnvironment::try_from(MarkerEnvironmentBuilder {
            implementation_name: &self.implementation_name,
            implementation_version,
            os_name: &self.os_name,
            platform_machine: &self.platform_machine,
            platform_python_implementation: &self.platform_python_implementation,
            platform_release: &self.platform_release,
            platform_system: &self.platform_system,
            platform_version: &self.platform_version,
            python_full_version: &self.python_full_version,
            python_version: &self.python_version,
            sys_platform: &self.sys_platform,
        })
        .map_err(|e| tracing::debug!("invalid marker environment: {}", e))
        .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn marker(s: &str) -> Marker {
        Marker::parse(s).unwrap()
    }

    fn linux_env(version: &str) -> MarkerEnvironment {
        MarkerEnvironment {
            os_name: "posix".into(),
            sys_platform: "linux".into(),
            platform_system: "Linux".into(),
            ..MarkerEnvironment::for_python(version)
        }
    }

    #[test]
    fn test_canonical_rendering() {
        assert_eq!(marker("os_name=='nt'").to_string(), r#"os_name == "nt""#);
        assert_eq!(
            marker(r#"python_version<"2.7""#).to_string(),
            r#"python_version < "2.7""#
        );
        assert_eq!(
            marker("python_version >= '3' and (os_name == 'nt' or sys_platform == 'darwin')")
                .to_string(),
            r#"python_version >= "3" and (os_name == "nt" or sys_platform == "darwin")"#
        );
        assert_eq!(
            marker("'linux' in sys_platform").to_string(),
            r#""linux" in sys_platform"#
        );
        assert_eq!(
            marker("platform_machine not in 'arm64 aarch64'").to_string(),
            r#"platform_machine not in "arm64 aarch64""#
        );
    }

    #[test]
    fn test_composition() {
        let either = marker("os_name == 'nt' or os_name == 'posix'");
        let combined = either.and(Marker::extra("tests").unwrap());
        assert_eq!(
            combined.to_string(),
            r#"(os_name == "nt" or os_name == "posix") and extra == "tests""#
        );

        let any = marker("python_version < '3'").or(marker("os_name == 'nt'"));
        assert_eq!(any.to_string(), r#"python_version < "3" or os_name == "nt""#);

        let all = Marker::and_all([
            marker("os_name == 'nt'"),
            marker("python_version >= '3.6'"),
        ]);
        assert_eq!(
            all.unwrap().to_string(),
            r#"os_name == "nt" and python_version >= "3.6""#
        );
        assert!(Marker::and_all([]).is_none());
    }

    #[test]
    fn test_parse_errors() {
        let err = Marker::parse("os_name=>'nt'").unwrap_err();
        assert_eq!(err.position, 7);

        assert!(Marker::parse("os_name == 'nt").is_err());
        assert!(Marker::parse("foo == 'bar'").is_err());
        assert!(Marker::parse("os_name == 'nt' and").is_err());
        assert!(Marker::parse("(os_name == 'nt'").is_err());
        assert!(Marker::parse("os_name == 'nt' os_name").is_err());
    }

    #[test]
    fn test_evaluate() {
        let env = linux_env("3.7.4");
        let none = BTreeSet::new();
        assert!(marker("os_name == 'posix'").evaluate(&env, &none));
        assert!(!marker("os_name == 'nt'").evaluate(&env, &none));
        assert!(marker("python_version >= '3.6'").evaluate(&env, &none));
        assert!(!marker("python_version > '3.10'").evaluate(&env, &none));
        assert!(marker("python_full_version == '3.7.*'").evaluate(&env, &none));
        assert!(marker("'3.6' < python_version").evaluate(&env, &none));
        assert!(marker("'linux' in sys_platform").evaluate(&env, &none));
        assert!(marker("os_name == 'nt' or python_version < '4'").evaluate(&env, &none));
    }

    #[test]
    fn test_evaluate_extras() {
        let env = linux_env("3.8");
        let extras = BTreeSet::from(["Security".to_string()]);
        assert!(marker("extra == 'security'").evaluate(&env, &extras));
        assert!(!marker("extra == 'tests'").evaluate(&env, &extras));
        assert!(!marker("extra == 'security'").evaluate(&env, &BTreeSet::new()));
    }

    #[test]
    fn test_split_extras() {
        let (extras, rest) = marker("extra == 'tests'").split_extras();
        assert_eq!(extras, BTreeSet::from(["tests".to_string()]));
        assert!(rest.is_none());

        let (extras, rest) =
            marker("python_version >= '3.6' and extra == 'security'").split_extras();
        assert_eq!(extras, BTreeSet::from(["security".to_string()]));
        assert_eq!(rest.unwrap().to_string(), r#"python_version >= "3.6""#);

        let (extras, rest) =
            marker("(extra == 'a' or extra == 'B_c') and os_name == 'nt'").split_extras();
        assert_eq!(
            extras,
            BTreeSet::from(["a".to_string(), "b-c".to_string()])
        );
        assert_eq!(rest.unwrap().to_string(), r#"os_name == "nt""#);

        let (extras, rest) =
            marker("os_name == 'nt' and (sys_platform == 'win32' and extra == 'gui')")
                .split_extras();
        assert_eq!(extras, BTreeSet::from(["gui".to_string()]));
        assert_eq!(
            rest.unwrap().to_string(),
            r#"os_name == "nt" and sys_platform == "win32""#
        );

        let (extras, rest) = marker("os_name == 'nt'").split_extras();
        assert!(extras.is_empty());
        assert!(rest.is_some());

        let (extras, rest) = marker("extra != 'tests'").split_extras();
        assert!(extras.is_empty());
        assert_eq!(rest.unwrap().to_string(), r#"extra != "tests""#);
    }

    #[test]
    fn test_python_spec() {
        let cases = [
            ("python_version > '3.6'", ">=3.7"),
            ("python_version >= '3.6'", ">=3.6"),
            ("python_version <= '3.6'", "<3.7"),
            ("python_version < '3'", "<3.0"),
            ("python_version == '2.7'", ">=2.7,<2.8"),
            ("'3.6' <= python_version", ">=3.6"),
            ("python_full_version >= '3.6.2'", ">=3.6.2"),
            ("os_name == 'nt'", ""),
            ("python_version >= '3.6' and os_name == 'nt'", ">=3.6"),
            (
                "python_version >= '2.7' and python_version != '3.0' and os_name == 'nt'",
                ">=2.7,!=3.0.*",
            ),
            (
                "python_version < '2.7' or python_version >= '3.6'",
                "!=2.7.*,!=3.0.*,!=3.1.*,!=3.2.*,!=3.3.*,!=3.4.*,!=3.5.*",
            ),
        ];
        for (input, expected) in cases {
            assert_eq!(
                marker(input).python_spec().to_string(),
                expected,
                "projecting {:?}",
                input
            );
        }
    }

    #[test]
    fn test_python_spec_of_disjoint_markers() {
        let spec = marker("python_version < '3' and python_version >= '3.6'").python_spec();
        assert!(spec.is_impossible());
    }

    #[test]
    fn test_version_variables() {
        assert!(MarkerEnvironment::is_version_variable("python_full_version"));
        assert!(!MarkerEnvironment::is_version_variable("os_name"));
        let env = linux_env("3.9.1");
        assert_eq!(env.get("implementation_version"), Some("3.9.1"));
        assert_eq!(env.get("extra"), None);
    }

    #[test]
    fn test_normalize_name() {
        assert_eq!(normalize_name("Foo_Bar"), "foo-bar");
        assert_eq!(normalize_name("foo.._bar"), "foo-bar");
        assert_eq!(normalize_name("requests"), "requests");
    }
}
