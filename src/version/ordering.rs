//! Candidate-specific version ordering
//!
//! Version identifiers are not assumed to be strict semver. A candidate
//! declares a [`VersionScheme`]; undeclared candidates sort textually.

use std::cmp::Ordering;
use std::sync::LazyLock;

use regex::Regex;
use semver::Prerelease;
use serde::Deserialize;

/// Vendor suffix of an identifier such as `21.0.1-tem` or `22.3.r17-grl`
static VENDOR_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^.+-([A-Za-z][A-Za-z0-9]*)$").expect("vendor suffix pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionScheme {
    /// Dot-separated numeric segments, any count ("17" == 17.0.0)
    Numeric,
    /// Plain text ordering
    #[default]
    Lexical,
}

/// One dot-separated piece of a version core.
///
/// Variant order matters: numbers sort before text, so `Number(0)` is the
/// smallest segment and padding with it never reorders anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Segment<'a> {
    Number(u64),
    Text(&'a str),
}

/// Part after the first `-`.
///
/// Tags follow semver prerelease precedence and sort below a bare release of
/// the same core; suffixes semver rejects sort above it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum Suffix<'a> {
    Tag(Prerelease),
    Release,
    Other(&'a str),
}

/// Sort key of an identifier under [`VersionScheme::Numeric`]
#[derive(Debug, Clone)]
struct NumericKey<'a> {
    segments: Vec<Segment<'a>>,
    suffix: Suffix<'a>,
}

impl<'a> NumericKey<'a> {
    fn parse(identifier: &'a str) -> Self {
        let (core, suffix) = match identifier.split_once('-') {
            Some((core, suffix)) => (core, Some(suffix)),
            None => (identifier, None),
        };

        let segments = core
            .split('.')
            .map(|s| s.parse().map(Segment::Number).unwrap_or(Segment::Text(s)))
            .collect();
        let suffix = match suffix {
            None => Suffix::Release,
            Some(s) => Prerelease::new(s)
                .map(Suffix::Tag)
                .unwrap_or(Suffix::Other(s)),
        };

        Self { segments, suffix }
    }

    fn cmp_segments(&self, other: &Self) -> Ordering {
        let len = self.segments.len().max(other.segments.len());
        let pad = Segment::Number(0);
        (0..len)
            .map(|i| {
                let a = self.segments.get(i).unwrap_or(&pad);
                let b = other.segments.get(i).unwrap_or(&pad);
                a.cmp(b)
            })
            .find(|ordering| ordering.is_ne())
            .unwrap_or(Ordering::Equal)
    }
}

impl Ord for NumericKey<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_segments(other)
            .then_with(|| self.suffix.cmp(&other.suffix))
    }
}

impl PartialEq for NumericKey<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other).is_eq()
    }
}

impl Eq for NumericKey<'_> {}

impl PartialOrd for NumericKey<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Compare two identifiers under the given scheme.
///
/// Numeric keys compare segment by segment with missing segments read as
/// zero, then by suffix. Identifiers with equal keys ("17" and "17.0") fall
/// back to text order, so the result is a total order for any input.
pub fn compare_versions(a: &str, b: &str, scheme: VersionScheme) -> Ordering {
    match scheme {
        VersionScheme::Lexical => a.cmp(b),
        VersionScheme::Numeric => NumericKey::parse(a)
            .cmp(&NumericKey::parse(b))
            .then_with(|| a.cmp(b)),
    }
}

/// Find the maximum version from a list under the given scheme
pub fn find_max<'a, I>(versions: I, scheme: VersionScheme) -> Option<&'a str>
where
    I: IntoIterator<Item = &'a str>,
{
    versions
        .into_iter()
        .max_by(|a, b| compare_versions(a, b, scheme))
}

/// Sort identifiers newest first
pub fn sort_descending(versions: &mut [String], scheme: VersionScheme) {
    versions.sort_by(|a, b| compare_versions(b, a, scheme));
}

/// Extract the vendor suffix from an identifier, if any
pub fn vendor_suffix(identifier: &str) -> Option<&str> {
    VENDOR_SUFFIX
        .captures(identifier)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}
