//! Extraction of BHL title identifiers from free-text user input.
//!
//! Users paste whatever they have at hand: a bare number, a BHL DOI such as
//! `10.5962/bhl.title.12345`, or a permalink like
//! `https://www.biodiversitylibrary.org/bibliography/12345`. Everything here
//! is pure string handling; no network access.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

/// DOI prefix registered to the Biodiversity Heritage Library.
pub const BHL_DOI_PREFIX: &str = "10.5962";

static RE_BHL_TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"bhl\.title\.([0-9]+)").expect("Regexp error"));
static RE_TRAILING_DIGITS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([0-9]+)$").expect("Regexp error"));
static RE_DOI: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(10\.[0-9]{4,9})/\S+").expect("Regexp error"));

/// Path segments that point at BHL resources other than titles.
const NON_TITLE_SEGMENTS: [&str; 3] = ["/item/", "/page/", "/part/"];

/// A BHL title identifier. Always a non-empty run of ASCII digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TitleId(String);

impl TitleId {
    /// Accepts only strings made entirely of ASCII digits.
    pub fn parse(value: &str) -> Option<Self> {
        if is_all_digits(value) {
            Some(Self(value.to_string()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TitleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a piece of user input could not be turned into a [`TitleId`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputRejection {
    Missing,
    Unparseable { input: String },
    WrongSource { doi: String },
}

impl fmt::Display for InputRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Missing => f.write_str("No id provided."),
            Self::Unparseable { .. } => f.write_str("Invalid id provided."),
            Self::WrongSource { doi } => write!(
                f,
                "DOI {doi} is not a Biodiversity Heritage Library DOI (expected prefix {BHL_DOI_PREFIX})."
            ),
        }
    }
}

/// Extract a title ID from `input`, or `None` when nothing usable is found.
///
/// Rules, first match wins:
/// 1. `bhl.title.<digits>` anywhere in the input yields `<digits>`.
/// 2. An all-digit input is returned unchanged.
/// 3. Item, page, and part URLs are refused even if they end in digits.
/// 4. Otherwise the trailing run of digits, if any.
pub fn normalize(input: &str) -> Option<TitleId> {
    let input = input.trim();
    if let Some(captures) = RE_BHL_TITLE.captures(input) {
        return TitleId::parse(captures.get(1)?.as_str());
    }
    if let Some(id) = TitleId::parse(input) {
        return Some(id);
    }
    if NON_TITLE_SEGMENTS
        .iter()
        .any(|segment| input.contains(segment))
    {
        return None;
    }
    let captures = RE_TRAILING_DIGITS.captures(input)?;
    TitleId::parse(captures.get(1)?.as_str())
}

/// Validate raw input the way a request does: empty input and foreign DOIs
/// are refused before normalization is attempted.
pub fn classify(input: &str) -> Result<TitleId, InputRejection> {
    let input = input.trim();
    if input.is_empty() {
        return Err(InputRejection::Missing);
    }
    if let Some(doi) = foreign_doi(input) {
        return Err(InputRejection::WrongSource { doi });
    }
    normalize(input).ok_or_else(|| InputRejection::Unparseable {
        input: input.to_string(),
    })
}

/// The first DOI in `input` whose prefix is not [`BHL_DOI_PREFIX`].
pub fn foreign_doi(input: &str) -> Option<String> {
    RE_DOI
        .captures_iter(input)
        .find(|captures| {
            captures
                .get(1)
                .is_some_and(|prefix| prefix.as_str() != BHL_DOI_PREFIX)
        })
        .and_then(|captures| captures.get(0))
        .map(|doi| doi.as_str().to_string())
}

fn is_all_digits(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|byte| byte.is_ascii_digit())
}
