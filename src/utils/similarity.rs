//! Title and author-list distances used to accept or reject candidate matches.

use strsim::normalized_levenshtein;

use crate::models::{Author, Bibliographic};

fn clean_title(title: &str) -> String {
    title.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// Normalized edit distance between two titles, in `[0, 1]`.
///
/// Case and whitespace runs are ignored; `0.0` means identical.
pub fn title_distance(a: &str, b: &str) -> f64 {
    let distance = 1.0 - normalized_levenshtein(&clean_title(a), &clean_title(b));
    distance.clamp(0.0, 1.0)
}

/// Position-weighted disagreement between two author lists, in `[0, 1]`.
///
/// The shorter list is compared position by position against the longer one.
/// Earlier positions weigh more: position `i` has weight `(n - i)^2` where `n`
/// is the shorter length. Two authors agree when their family names are equal
/// ignoring case. An empty list on either side gives `1.0`.
pub fn author_distance(a: &[Author], b: &[Author]) -> f64 {
    let (shorter, longer) = if a.len() <= b.len() { (a, b) } else { (b, a) };
    let n = shorter.len();
    if n == 0 {
        return 1.0;
    }

    let mut total = 0.0;
    let mut agreed = 0.0;
    for (i, (left, right)) in shorter.iter().zip(longer.iter()).enumerate() {
        let weight = ((n - i) * (n - i)) as f64;
        total += weight;
        if families_agree(left, right) {
            agreed += weight;
        }
    }
    1.0 - agreed / total
}

fn families_agree(a: &Author, b: &Author) -> bool {
    let a = a.family.trim();
    let b = b.family.trim();
    !a.is_empty() && a.to_lowercase() == b.to_lowercase()
}

/// Title and author distance ceilings for accepting a match
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerance {
    pub title: f64,
    pub author: f64,
}

impl Tolerance {
    pub fn new(title: f64, author: f64) -> Self {
        Self { title, author }
    }

    /// Both distances must be within their ceiling; title similarity alone never suffices
    pub fn accepts(&self, title_distance: f64, author_distance: f64) -> bool {
        title_distance <= self.title && author_distance <= self.author
    }
}

/// A scored item from [`rerank_by_similarity`]
#[derive(Debug, Clone)]
pub struct Ranked<T> {
    pub title_distance: f64,
    pub item: T,
}

/// Order items by ascending title distance to `reference`; ties keep their input order
pub fn rerank_by_similarity<T: Bibliographic>(items: Vec<T>, reference: &str) -> Vec<Ranked<T>> {
    let mut ranked: Vec<Ranked<T>> = items
        .into_iter()
        .map(|item| Ranked {
            title_distance: title_distance(item.title(), reference),
            item,
        })
        .collect();
    ranked.sort_by(|a, b| a.title_distance.total_cmp(&b.title_distance));
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{BibFields, CandidateRecord, SourceType};

    fn authors(families: &[&str]) -> Vec<Author> {
        families.iter().map(|f| Author::new("X", *f)).collect()
    }

    fn candidate(index: usize, title: &str) -> CandidateRecord {
        CandidateRecord::new(index, SourceType::Crossref).with_bib(BibFields::new().with("title", title))
    }

    #[test]
    fn test_title_distance_bounds() {
        assert_eq!(title_distance("Deep Learning", "deep   learning"), 0.0);
        assert_eq!(title_distance("", ""), 0.0);
        assert_eq!(title_distance("abc", ""), 1.0);
        let d = title_distance("Deep Learning for Radiology", "Deep Learning for Radiology Reports");
        assert!(d > 0.0 && d < 0.3);
    }

    #[test]
    fn test_title_distance_symmetric() {
        let pairs = [("kitten", "sitting"), ("A Study of Things", "Study of Some Things"), ("x", "")];
        for (a, b) in pairs {
            assert_eq!(title_distance(a, b), title_distance(b, a));
        }
    }

    #[test]
    fn test_author_distance_identical() {
        let list = authors(&["Smith", "Doe"]);
        assert_eq!(author_distance(&list, &list), 0.0);
        assert_eq!(author_distance(&authors(&["SMITH"]), &authors(&["smith"])), 0.0);
    }

    #[test]
    fn test_author_distance_empty() {
        assert_eq!(author_distance(&[], &authors(&["Smith"])), 1.0);
        assert_eq!(author_distance(&[], &[]), 1.0);
    }

    #[test]
    fn test_author_distance_weights_first_positions() {
        let reference = authors(&["Smith", "Doe", "Roe"]);
        // weights 9, 4, 1
        let first_wrong = authors(&["Jones", "Doe", "Roe"]);
        let last_wrong = authors(&["Smith", "Doe", "Jones"]);
        assert!((author_distance(&reference, &first_wrong) - 9.0 / 14.0).abs() < 1e-9);
        assert!((author_distance(&reference, &last_wrong) - 1.0 / 14.0).abs() < 1e-9);
    }

    #[test]
    fn test_author_distance_uses_shorter_list() {
        let long = authors(&["Smith", "Doe", "Roe", "Poe"]);
        let short = authors(&["Smith", "Doe"]);
        assert_eq!(author_distance(&long, &short), 0.0);
        assert_eq!(author_distance(&short, &long), 0.0);
    }

    #[test]
    fn test_tolerance_gate() {
        let gate = Tolerance::new(0.35, 0.1);
        assert!(gate.accepts(0.1, 0.05));
        assert!(!gate.accepts(0.5, 0.05));
        assert!(!gate.accepts(0.1, 0.2));
        assert!(gate.accepts(0.35, 0.1));
    }

    #[test]
    fn test_rerank_orders_and_keeps_ties_stable() {
        let items = vec![
            candidate(0, "Something unrelated"),
            candidate(1, "Deep learning for radiology"),
            candidate(2, "Deep Learning for Radiology"),
        ];
        let ranked = rerank_by_similarity(items, "deep learning for radiology");
        let order: Vec<usize> = ranked.iter().map(|r| r.item.index).collect();
        assert_eq!(order, vec![1, 2, 0]);
        assert!(ranked.windows(2).all(|w| w[0].title_distance <= w[1].title_distance));
    }
}
