//! Canonical record identity: title normalization, author parsing and id generation.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::models::Author;

/// Normalized titles are truncated to this many characters
pub const MAX_TITLE_LEN: usize = 200;

const TITLE_PUNCTUATION: &str = "\"#$%&'()*+,-./:;<=>?¿!¡@[\\]^_`{|}~";

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "by", "for", "from", "in", "into", "is", "of", "on", "or", "the", "to",
    "via", "with",
];

static AUTHOR_SEPARATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+and\s+").unwrap());
static ID_AUTHOR_SEPARATOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\s+and\s+").unwrap());
// "JA Smith": upper-case initials followed by the family name
static INITIALS_FAMILY: Lazy<Regex> = Lazy::new(|| Regex::new(r"([A-Z]+)\s+(\w+)").unwrap());
// "Smith, John Adam"
static FAMILY_COMMA_GIVEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([A-Z]\w+)\s*,\s*([A-Z]\w*)\.?(?:\s+([A-Z][\w.]*))?").unwrap());

/// Lowercase, strip diacritics and punctuation, collapse whitespace and cap the length.
///
/// Diacritics are removed by decomposition, so accented Latin letters fold to
/// ASCII. Letters with no ASCII decomposition (`ß`, `ø`, Greek, CJK) are kept
/// as lowercase letters rather than dropped, so such titles still compare by
/// their words. Applying it twice yields the same string.
pub fn normalize_title(title: &str) -> String {
    let folded: String = title
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase()
        .chars()
        .map(|c| {
            if c == '–' || c == '—' || TITLE_PUNCTUATION.contains(c) {
                ' '
            } else {
                c
            }
        })
        .filter(|c| !is_combining_mark(*c))
        .collect();

    let collapsed = folded.split_whitespace().collect::<Vec<_>>().join(" ");
    let truncated: String = collapsed.chars().take(MAX_TITLE_LEN).collect();
    truncated.trim_end().to_string()
}

/// Significant words of a normalized title, for the store's token index
pub fn title_tokens(title: &str) -> Vec<String> {
    let normalized = normalize_title(title);
    let mut seen = HashSet::new();
    normalized
        .split(' ')
        .filter(|w| w.chars().count() > 1 && !STOPWORDS.contains(w))
        .filter(|w| seen.insert(w.to_string()))
        .map(str::to_string)
        .collect()
}

/// Parse a BibTeX-style `A and B and C` author list.
///
/// Each entry is tried as `INITIALS Family`, then as `Family, Given`;
/// anything else is kept whole as a family name. Never fails.
pub fn parse_author_list(authors: &str) -> Vec<Author> {
    AUTHOR_SEPARATOR
        .split(authors.trim())
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            if let Some(caps) = INITIALS_FAMILY.captures(segment) {
                Author::new(&caps[1], &caps[2])
            } else if let Some(caps) = FAMILY_COMMA_GIVEN.captures(segment) {
                let mut author = Author::new(&caps[2], &caps[1]);
                author.middle = caps.get(3).map(|m| m.as_str().to_string());
                author
            } else {
                tracing::debug!("Could not parse author name {:?}, keeping it as family name", segment);
                Author::new("", segment)
            }
        })
        .collect()
}

/// Structured author from a display name such as `John A. Smith`
pub fn author_from_display_name(name: &str) -> Author {
    let tokens: Vec<&str> = name.split_whitespace().collect();
    match tokens.as_slice() {
        [] => Author::default(),
        [family] => Author::new("", *family),
        [given, middle @ .., family] => {
            let mut author = Author::new(*given, *family);
            if !middle.is_empty() {
                author.middle = Some(middle.join(" "));
            }
            author
        }
    }
}

/// Render authors as a BibTeX author list
pub fn author_list_to_string(authors: &[Author]) -> String {
    authors
        .iter()
        .filter(|a| !a.family.is_empty() || !a.given.is_empty())
        .map(Author::bibtex_name)
        .collect::<Vec<_>>()
        .join(" and ")
}

fn author_initials(authors: &str) -> String {
    ID_AUTHOR_SEPARATOR
        .split(authors.trim())
        .filter_map(|segment| {
            let segment = segment.trim();
            let (family, given) = match segment.split_once(',') {
                Some((family, given)) => (family.trim(), given.trim()),
                None => {
                    let mut tokens = segment.split_whitespace();
                    let first = tokens.next().unwrap_or("");
                    match tokens.last() {
                        Some(last) => (last, first),
                        None => (first, ""),
                    }
                }
            };
            let mut initials = String::new();
            initials.push(family.chars().next()?);
            initials.extend(given.chars().next());
            Some(initials)
        })
        .collect()
}

/// Deterministic record id: author initials, then the normalized title without spaces.
///
/// Independent of letter case in either input.
pub fn generate_id(title: &str, authors: &str) -> String {
    let title: String = normalize_title(title).split_whitespace().collect();
    format!("{}_{}", author_initials(authors), title).to_lowercase()
}
