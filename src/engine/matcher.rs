//! Search-then-gate matching of a record against one source.

use crate::models::{Bibliographic, CandidateRecord, SearchQuery};
use crate::sources::{Source, SourceError};
use crate::utils::{author_distance, rerank_by_similarity, Ranked, Tolerance};

/// Decision for one source search
#[derive(Debug, Clone)]
pub enum MatchOutcome {
    /// The top-ranked candidate passed both distance checks
    Matched {
        candidate: CandidateRecord,
        title_distance: f64,
        author_distance: f64,
    },
    /// Results came back but the best one was too far away
    Rejected {
        candidates: Vec<Ranked<CandidateRecord>>,
        author_distance: f64,
    },
    NoResults,
}

/// Search `source` for `record`'s title and accept the best result only if it is close enough.
///
/// Candidates are reranked by title distance; only the top one is gated, so a
/// near-miss at the top is never replaced by a worse candidate further down.
pub async fn find_best_match<R>(
    source: &dyn Source,
    record: &R,
    tolerance: Tolerance,
    query: SearchQuery,
) -> Result<MatchOutcome, SourceError>
where
    R: Bibliographic + Sync,
{
    let results = source.search(&query).await?;
    if results.is_empty() {
        tracing::info!("{}: no results for '{}'", source.name(), record.title());
        return Ok(MatchOutcome::NoResults);
    }

    let mut ranked = rerank_by_similarity(results, record.title());
    let best = &ranked[0];
    let author_d = author_distance(&record.authors(), &best.item.authors());

    if tolerance.accepts(best.title_distance, author_d) {
        tracing::info!(
            "{}: matched '{}' to '{}' (title {:.3}, authors {:.3})",
            source.name(),
            record.title(),
            best.item.title(),
            best.title_distance,
            author_d
        );
        let best = ranked.swap_remove(0);
        return Ok(MatchOutcome::Matched {
            title_distance: best.title_distance,
            author_distance: author_d,
            candidate: best.item,
        });
    }

    tracing::warn!(
        "{}: no confident match for '{}' (best '{}', title {:.3} > {:.3} or authors {:.3} > {:.3})",
        source.name(),
        record.title(),
        best.item.title(),
        best.title_distance,
        tolerance.title,
        author_d,
        tolerance.author
    );
    for other in ranked.iter().skip(1) {
        tracing::debug!("  also considered '{}' (title {:.3})", other.item.title(), other.title_distance);
    }
    Ok(MatchOutcome::Rejected {
        candidates: ranked,
        author_distance: author_d,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AuxData, BibFields, CanonicalRecord, SourceType};
    use crate::sources::mock::make_candidate;
    use crate::sources::MockSource;

    fn record() -> CanonicalRecord {
        CanonicalRecord::new(
            BibFields::new()
                .with("title", "Deep Learning for Radiology Reports")
                .with("author", "Smith, J and Doe, A"),
            AuxData::default(),
        )
    }

    fn query() -> SearchQuery {
        SearchQuery::new("Deep Learning for Radiology Reports")
    }

    #[tokio::test]
    async fn test_matches_best_candidate() {
        let source = MockSource::for_source(SourceType::Crossref);
        source.set_search_results(vec![
            make_candidate(0, "Radiology in Practice", "Smith, J", SourceType::Crossref),
            make_candidate(1, "Deep Learning for Radiology Reports.", "Smith, John and Doe, Alice", SourceType::Crossref),
        ]);

        let outcome = find_best_match(&source, &record(), Tolerance::new(0.1, 0.1), query())
            .await
            .unwrap();
        match outcome {
            MatchOutcome::Matched { candidate, .. } => assert_eq!(candidate.index, 1),
            other => panic!("expected a match, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rejects_wrong_authors() {
        let source = MockSource::for_source(SourceType::Crossref);
        source.set_search_results(vec![make_candidate(
            0,
            "Deep Learning for Radiology Reports",
            "Jones, K and Roe, B",
            SourceType::Crossref,
        )]);

        let outcome = find_best_match(&source, &record(), Tolerance::new(0.1, 0.1), query())
            .await
            .unwrap();
        assert!(matches!(outcome, MatchOutcome::Rejected { author_distance, .. } if author_distance == 1.0));
    }

    #[tokio::test]
    async fn test_no_results() {
        let source = MockSource::for_source(SourceType::Arxiv);
        let outcome = find_best_match(&source, &record(), Tolerance::new(0.35, 0.1), query())
            .await
            .unwrap();
        assert!(matches!(outcome, MatchOutcome::NoResults));
    }

    #[tokio::test]
    async fn test_source_error_propagates() {
        let source = MockSource::for_source(SourceType::PubMed);
        source.fail_with("connection reset");
        let result = find_best_match(&source, &record(), Tolerance::new(0.4, 0.1), query()).await;
        assert!(matches!(result, Err(SourceError::Network(_))));
    }
}
