//! Version specifiers.
//!
//! Two types live here:
//!
//! - [`SpecifierSet`]: the specifier exactly as a requirement declares it,
//!   kept in sorted textual form and validated with `pep440_rs`.
//! - [`PySpecSet`]: an algebraic set of Python interpreter versions used to
//!   reason about `requires-python` ranges. It supports intersection, union
//!   and subset checks, and always prints in a canonical form so that two
//!   sets with the same string denote the same versions.
//!
//! The version universe of [`PySpecSet`] is `[0, 4.0)`. Internally a set is a
//! sorted list of half-open intervals; the canonical form is a lower bound,
//! an upper bound and a list of excluded micro versions or whole minors that
//! fill the holes between intervals.

use crate::error::SpecifierError;
use pep440_rs::{Version, VersionSpecifier, VersionSpecifiers};
use std::fmt;
use std::ops::{BitAnd, BitOr};
use std::str::FromStr;

/// Last released minor version per major series.
fn max_minor(major: u32) -> u32 {
    match major {
        1 => 6,
        2 => 7,
        3 => 14,
        _ => DEFAULT_MAX_MINOR,
    }
}

/// Last released micro version per minor series.
fn max_micro(major: u32, minor: u32) -> u32 {
    match (major, minor) {
        (2, 0) => 1,
        (2, 1) | (2, 2) => 3,
        (2, 3) => 7,
        (2, 4) | (2, 5) => 6,
        (2, 6) => 9,
        (2, 7) => 18,
        (3, 0) => 1,
        (3, 1) => 5,
        (3, 2) => 6,
        (3, 3) => 7,
        (3, 4) | (3, 5) => 10,
        (3, 6) => 15,
        (3, 7) => 17,
        (3, 8) => 20,
        (3, 9) => 25,
        (3, 10) => 19,
        (3, 11) => 14,
        (3, 12) => 12,
        (3, 13) => 9,
        (3, 14) => 0,
        _ => DEFAULT_MAX_MICRO,
    }
}

const DEFAULT_MAX_MINOR: u32 = 20;
const DEFAULT_MAX_MICRO: u32 = 20;

/// A Python release at micro granularity.
///
/// Displays without a trailing `.0` micro (`2.7`, `3.6.1`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PyVersion {
    pub major: u32,
    pub minor: u32,
    pub micro: u32,
}

impl PyVersion {
    pub const MIN: Self = Self::new(0, 0, 0);
    /// Exclusive end of the version universe.
    pub const MAX: Self = Self::new(4, 0, 0);

    pub const fn new(major: u32, minor: u32, micro: u32) -> Self {
        Self {
            major,
            minor,
            micro,
        }
    }

    /// Builds a version from release segments, padding with zeros.
    ///
    /// Segments past the third are ignored.
    pub fn from_parts(parts: &[u32]) -> Self {
        let get = |i: usize| parts.get(i).copied().unwrap_or(0);
        Self::new(get(0), get(1), get(2))
    }

    /// The following micro release, carrying into the minor and major.
    fn checked_next_micro(self) -> Option<Self> {
        match self.micro.checked_add(1) {
            Some(micro) => Some(Self::new(self.major, self.minor, micro)),
            None => self.checked_next_minor(),
        }
    }

    fn checked_next_minor(self) -> Option<Self> {
        match self.minor.checked_add(1) {
            Some(minor) => Some(Self::new(self.major, minor, 0)),
            None => self.major.checked_add(1).map(|major| Self::new(major, 0, 0)),
        }
    }

    /// Only called on versions inside the universe, where a successor exists.
    fn next_micro(self) -> Self {
        self.checked_next_micro().unwrap_or(Self::MAX)
    }

    fn next_minor(self) -> Self {
        self.checked_next_minor().unwrap_or(Self::MAX)
    }

    fn same_minor(self, other: Self) -> bool {
        self.major == other.major && self.minor == other.minor
    }

    fn clamp(self) -> Self {
        self.min(Self::MAX)
    }
}

impl fmt::Display for PyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.micro == 0 {
            write!(f, "{}.{}", self.major, self.minor)
        } else {
            write!(f, "{}.{}.{}", self.major, self.minor, self.micro)
        }
    }
}

impl FromStr for PyVersion {
    type Err = SpecifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from_parts(&release_parts(s.trim())?))
    }
}

/// Release segments of a version, using PEP 440 parsing.
fn release_parts(version: &str) -> Result<Vec<u32>, SpecifierError> {
    let parsed =
        Version::from_str(version).map_err(|e| SpecifierError::new(version, e.to_string()))?;
    parsed
        .release()
        .iter()
        .map(|&n| u32::try_from(n).map_err(|_| SpecifierError::new(version, "segment too large")))
        .collect()
}

/// Release segments of a wildcard prefix such as `3.6` in `3.6.*`.
fn wildcard_parts(spec: &str, prefix: &str) -> Result<Vec<u32>, SpecifierError> {
    prefix
        .split('.')
        .map(|part| {
            part.parse::<u32>()
                .map_err(|_| SpecifierError::new(spec, format!("invalid wildcard segment '{}'", part)))
        })
        .collect()
}

/// The version reached by incrementing `parts[index]` and dropping the rest.
///
/// `None` when the segment is already at its maximum.
fn bump(parts: &[u32], index: usize) -> Option<PyVersion> {
    let mut bumped: Vec<u32> = parts.iter().take(index + 1).copied().collect();
    if let Some(last) = bumped.last_mut() {
        *last = last.checked_add(1)?;
    }
    Some(PyVersion::from_parts(&bumped))
}

fn overflow(clause: &str) -> SpecifierError {
    SpecifierError::new(clause, "version segment overflows")
}

/// Sorted, disjoint, non-adjacent half-open intervals inside the universe.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Ranges(Vec<(PyVersion, PyVersion)>);

impl Ranges {
    fn full() -> Self {
        Self(vec![(PyVersion::MIN, PyVersion::MAX)])
    }

    fn empty() -> Self {
        Self(Vec::new())
    }

    fn interval(start: PyVersion, end: PyVersion) -> Self {
        Self::from_intervals(vec![(start, end)])
    }

    fn from_intervals(mut intervals: Vec<(PyVersion, PyVersion)>) -> Self {
        intervals = intervals
            .into_iter()
            .map(|(a, b)| (a.clamp(), b.clamp()))
            .filter(|(a, b)| a < b)
            .collect();
        intervals.sort();

        let mut merged: Vec<(PyVersion, PyVersion)> = Vec::with_capacity(intervals.len());
        for (start, end) in intervals {
            if let Some(last) = merged.last_mut()
                && start <= last.1
            {
                last.1 = last.1.max(end);
                continue;
            }
            merged.push((start, end));
        }
        Self(merged)
    }

    fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn intersect(&self, other: &Self) -> Self {
        let mut result = Vec::new();
        let (mut i, mut j) = (0, 0);
        while i < self.0.len() && j < other.0.len() {
            let (a0, a1) = self.0[i];
            let (b0, b1) = other.0[j];
            let start = a0.max(b0);
            let end = a1.min(b1);
            if start < end {
                result.push((start, end));
            }
            if a1 < b1 {
                i += 1;
            } else {
                j += 1;
            }
        }
        Self::from_intervals(result)
    }

    fn union(&self, other: &Self) -> Self {
        Self::from_intervals(self.0.iter().chain(other.0.iter()).copied().collect())
    }

    fn complement(&self) -> Self {
        let mut result = Vec::new();
        let mut cursor = PyVersion::MIN;
        for &(start, end) in &self.0 {
            if cursor < start {
                result.push((cursor, start));
            }
            cursor = end;
        }
        if cursor < PyVersion::MAX {
            result.push((cursor, PyVersion::MAX));
        }
        Self::from_intervals(result)
    }

    fn difference(&self, other: &Self) -> Self {
        self.intersect(&other.complement())
    }

    fn contains(&self, version: PyVersion) -> bool {
        self.0
            .iter()
            .any(|&(start, end)| start <= version && version < end)
    }
}

/// A version hole in the canonical form of a [`PySpecSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Exclusion {
    /// `!=X.Y.Z`
    Micro(PyVersion),
    /// `!=X.Y.*`
    Minor(u32, u32),
}

impl Exclusion {
    fn range(self) -> Ranges {
        match self {
            Self::Micro(v) => Ranges::interval(v, v.next_micro()),
            Self::Minor(major, minor) => {
                let start = PyVersion::new(major, minor, 0);
                Ranges::interval(start, start.next_minor())
            }
        }
    }
}

impl fmt::Display for Exclusion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Micro(v) => write!(f, "!={}.{}.{}", v.major, v.minor, v.micro),
            Self::Minor(major, minor) => write!(f, "!={}.{}.*", major, minor),
        }
    }
}

/// Enumerates exclusions covering the gap `[start, end)`.
///
/// Partial minors are excluded micro by micro up to the last known micro
/// release. Whole minors become `!=X.Y.*`. Minors past the last known one of
/// a major series are skipped.
fn fill_gap(start: PyVersion, end: PyVersion) -> Vec<Exclusion> {
    let mut excludes = Vec::new();
    let mut cursor = start;

    while cursor < end {
        if cursor.micro > 0 || cursor.same_minor(end) {
            let limit = if cursor.same_minor(end) {
                end.micro
            } else {
                max_micro(cursor.major, cursor.minor) + 1
            };
            while cursor.micro < limit {
                excludes.push(Exclusion::Micro(cursor));
                cursor = cursor.next_micro();
            }
            if cursor.same_minor(end) {
                break;
            }
            cursor = cursor.next_minor();
        } else if cursor.minor > max_minor(cursor.major) {
            cursor = PyVersion::new(cursor.major + 1, 0, 0);
        } else {
            excludes.push(Exclusion::Minor(cursor.major, cursor.minor));
            cursor = cursor.next_minor();
        }
    }
    excludes
}

/// An algebraic set of Python versions.
///
/// Parses PEP 440 style clauses (`>=3.6,!=3.6.*`) and normalizes them to a
/// canonical form. The empty string means every version; a contradictory set
/// prints as `impossible`.
///
/// # Examples
///
/// ```
/// use pylock_pypi::PySpecSet;
///
/// let spec: PySpecSet = "~=2.7.0".parse().unwrap();
/// assert_eq!(spec.to_string(), ">=2.7,<2.8");
///
/// let union = &"~=2.7".parse::<PySpecSet>().unwrap() | &">=3.6".parse().unwrap();
/// assert_eq!(
///     union.to_string(),
///     ">=2.7,!=3.0.*,!=3.1.*,!=3.2.*,!=3.3.*,!=3.4.*,!=3.5.*"
/// );
///
/// let impossible: PySpecSet = ">=3.6,<3.4".parse().unwrap();
/// assert!(impossible.is_impossible());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PySpecSet {
    lower: PyVersion,
    upper: PyVersion,
    excludes: Vec<Exclusion>,
    impossible: bool,
}

impl Default for PySpecSet {
    fn default() -> Self {
        Self::any()
    }
}

impl PySpecSet {
    /// The set of every version.
    pub fn any() -> Self {
        Self {
            lower: PyVersion::MIN,
            upper: PyVersion::MAX,
            excludes: Vec::new(),
            impossible: false,
        }
    }

    /// The empty set.
    pub fn impossible() -> Self {
        Self {
            impossible: true,
            ..Self::any()
        }
    }

    pub fn parse(spec: &str) -> Result<Self, SpecifierError> {
        let mut ranges = Ranges::full();
        for clause in spec.split(',') {
            let clause: String = clause.chars().filter(|c| !c.is_whitespace()).collect();
            if clause.is_empty() {
                continue;
            }
            ranges = ranges.intersect(&clause_ranges(&clause)?);
        }
        Ok(Self::from_ranges(&ranges))
    }

    fn from_ranges(ranges: &Ranges) -> Self {
        let (Some(first), Some(last)) = (ranges.0.first(), ranges.0.last()) else {
            return Self::impossible();
        };
        let excludes = ranges
            .0
            .windows(2)
            .flat_map(|pair| fill_gap(pair[0].1, pair[1].0))
            .collect();
        Self {
            lower: first.0,
            upper: last.1,
            excludes,
            impossible: false,
        }
    }

    fn ranges(&self) -> Ranges {
        if self.impossible {
            return Ranges::empty();
        }
        self.excludes
            .iter()
            .fold(Ranges::interval(self.lower, self.upper), |acc, ex| {
                acc.difference(&ex.range())
            })
    }

    pub fn is_impossible(&self) -> bool {
        self.impossible
    }

    /// `true` when the set has no constraint at all.
    pub fn is_any(&self) -> bool {
        *self == Self::any()
    }

    pub fn lower(&self) -> Option<PyVersion> {
        (!self.impossible && self.lower != PyVersion::MIN).then_some(self.lower)
    }

    pub fn upper(&self) -> Option<PyVersion> {
        (!self.impossible && self.upper != PyVersion::MAX).then_some(self.upper)
    }

    pub fn excludes(&self) -> &[Exclusion] {
        &self.excludes
    }

    /// Every version of the universe not in `self`.
    pub fn complement(&self) -> Self {
        Self::from_ranges(&self.ranges().complement())
    }

    /// Tests whether a concrete interpreter version is in the set.
    pub fn contains(&self, version: PyVersion) -> bool {
        self.ranges().contains(version)
    }

    /// Every version of `self` is also in `other`.
    ///
    /// An impossible set is neither a subset nor a superset of anything.
    pub fn is_subset(&self, other: &Self) -> bool {
        if self.impossible || other.impossible {
            return false;
        }
        self.ranges().difference(&other.ranges()).is_empty()
    }

    pub fn is_superset(&self, other: &Self) -> bool {
        other.is_subset(self)
    }
}

fn clause_ranges(clause: &str) -> Result<Ranges, SpecifierError> {
    const OPERATORS: [&str; 8] = ["===", "~=", "==", "!=", "<=", ">=", "<", ">"];

    let (op, version) = OPERATORS
        .iter()
        .find_map(|op| clause.strip_prefix(op).map(|rest| (*op, rest)))
        .ok_or_else(|| SpecifierError::new(clause, "missing comparison operator"))?;

    if let Some(prefix) = version.strip_suffix(".*") {
        let parts: Vec<u32> = wildcard_parts(clause, prefix)?.into_iter().take(3).collect();
        let start = PyVersion::from_parts(&parts);
        let next = bump(&parts, parts.len().saturating_sub(1)).ok_or_else(|| overflow(clause))?;
        return Ok(match op {
            "==" => Ranges::interval(start, next),
            "!=" => Ranges::interval(start, next).complement(),
            ">=" => Ranges::interval(start, PyVersion::MAX),
            ">" => Ranges::interval(next, PyVersion::MAX),
            "<=" | "<" => Ranges::interval(PyVersion::MIN, start),
            _ => {
                return Err(SpecifierError::new(
                    clause,
                    format!("wildcard is not allowed with '{}'", op),
                ));
            }
        });
    }

    if version.contains('*') {
        return Err(SpecifierError::new(clause, "wildcard must be the last segment"));
    }
    let parts = release_parts(version)?;
    let exact = PyVersion::from_parts(&parts);
    let next = || exact.checked_next_micro().ok_or_else(|| overflow(clause));
    Ok(match op {
        "==" | "===" => Ranges::interval(exact, next()?),
        "!=" => Ranges::interval(exact, next()?).complement(),
        ">=" => Ranges::interval(exact, PyVersion::MAX),
        ">" => Ranges::interval(next()?, PyVersion::MAX),
        "<=" => Ranges::interval(PyVersion::MIN, next()?),
        "<" => Ranges::interval(PyVersion::MIN, exact),
        _ => {
            if parts.len() < 2 {
                return Err(SpecifierError::new(
                    clause,
                    "compatible release needs at least two segments",
                ));
            }
            // The second-to-last segment is bumped. Below micro granularity
            // the whole range lies inside one micro release.
            let index = parts.len() - 2;
            let upper = if index < 3 {
                bump(&parts, index).ok_or_else(|| overflow(clause))?
            } else {
                next()?
            };
            Ranges::interval(exact, upper)
        }
    })
}

impl FromStr for PySpecSet {
    type Err = SpecifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for PySpecSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.impossible {
            return f.write_str("impossible");
        }
        let mut clauses = Vec::new();
        if self.lower != PyVersion::MIN {
            clauses.push(format!(">={}", self.lower));
        }
        if self.upper != PyVersion::MAX {
            clauses.push(format!("<{}", self.upper));
        }
        clauses.extend(self.excludes.iter().map(ToString::to_string));
        f.write_str(&clauses.join(","))
    }
}

impl BitAnd for &PySpecSet {
    type Output = PySpecSet;

    fn bitand(self, rhs: Self) -> PySpecSet {
        PySpecSet::from_ranges(&self.ranges().intersect(&rhs.ranges()))
    }
}

impl BitAnd for PySpecSet {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        &self & &rhs
    }
}

impl BitOr for &PySpecSet {
    type Output = PySpecSet;

    fn bitor(self, rhs: Self) -> PySpecSet {
        PySpecSet::from_ranges(&self.ranges().union(&rhs.ranges()))
    }
}

impl BitOr for PySpecSet {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        &self | &rhs
    }
}

/// A version specifier as written on a requirement.
///
/// Clauses are stripped of whitespace, deduplicated and sorted, which gives
/// a stable textual form (`<2.21.0,>=2.20.0`).
///
/// # Examples
///
/// ```
/// use pylock_pypi::SpecifierSet;
///
/// let spec: SpecifierSet = ">=2.20.0, <2.21.0".parse().unwrap();
/// assert_eq!(spec.to_string(), "<2.21.0,>=2.20.0");
/// assert!(spec.contains("2.20.1"));
/// assert!(!spec.contains("2.21.0"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct SpecifierSet {
    clauses: Vec<String>,
}

impl SpecifierSet {
    pub fn parse(spec: &str) -> Result<Self, SpecifierError> {
        let mut clauses = Vec::new();
        for clause in spec.split(',') {
            let clause: String = clause.chars().filter(|c| !c.is_whitespace()).collect();
            if clause.is_empty() {
                continue;
            }
            VersionSpecifier::from_str(&clause)
                .map_err(|e| SpecifierError::new(clause.clone(), e.to_string()))?;
            clauses.push(clause);
        }
        clauses.sort();
        clauses.dedup();
        Ok(Self { clauses })
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn clauses(&self) -> &[String] {
        &self.clauses
    }

    /// Pinned version for a single `==X` clause.
    pub fn pinned_version(&self) -> Option<&str> {
        match self.clauses.as_slice() {
            [only] => only
                .strip_prefix("===")
                .or_else(|| only.strip_prefix("=="))
                .filter(|v| !v.ends_with(".*")),
            _ => None,
        }
    }

    /// Tests a concrete version with PEP 440 semantics.
    pub fn contains(&self, version: &str) -> bool {
        let Ok(version) = Version::from_str(version) else {
            return false;
        };
        match VersionSpecifiers::from_str(&self.to_string()) {
            Ok(specs) => specs.contains(&version),
            Err(_) => false,
        }
    }

    /// Interprets the specifier as a Python version range.
    pub fn to_py_spec(&self) -> Result<PySpecSet, SpecifierError> {
        PySpecSet::parse(&self.to_string())
    }
}

impl FromStr for SpecifierSet {
    type Err = SpecifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for SpecifierSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.clauses.join(","))
    }
}
