//! Integration tests for litreview
//!
//! These tests drive the engine against real source adapters pointed at
//! local mock HTTP servers, with a real SQLite store.

use litreview::config::MatchingConfig;
use litreview::models::{AuxData, BibFields, Bibliographic, CandidateRecord, CanonicalRecord, EnrichmentState, SourceType};
use litreview::sources::{CrossRefSource, SourceRegistry, UnpaywallSource};
use litreview::store::RecordStore;
use litreview::utils::{HttpClient, PolitenessGovernor};
use litreview::ReconciliationEngine;
use mockito::Matcher;
use std::sync::Arc;
use tokio_test::assert_ok;

const SEARCH_BODY: &str = r#"{
    "status": "ok",
    "message-type": "work-list",
    "message": {
        "items": [
            {
                "DOI": "10.1/xyz",
                "title": ["Deep Learning for Radiology Reports."],
                "container-title": ["Journal of Radiology"],
                "type": "journal-article",
                "issued": {"date-parts": [[2020, 3]]},
                "author": [
                    {"given": "John", "family": "Smith"},
                    {"given": "Alice", "family": "Doe"}
                ]
            },
            {
                "DOI": "10.9/other",
                "title": ["Radiology Reporting Standards"],
                "author": [{"given": "Kim", "family": "Jones"}]
            }
        ]
    }
}"#;

const WORK_BODY: &str = r#"{
    "status": "ok",
    "message": {
        "DOI": "10.1/xyz",
        "title": ["Deep Learning for Radiology Reports"],
        "container-title": ["Journal of Radiology"],
        "type": "journal-article",
        "issued": {"date-parts": [[2020, 3]]},
        "volume": "12",
        "page": "100-110",
        "author": [
            {"given": "John", "family": "Smith"},
            {"given": "Alice", "family": "Doe"}
        ]
    }
}"#;

fn radiology_record() -> CanonicalRecord {
    CanonicalRecord::new(
        BibFields::new()
            .with("title", "Deep Learning for Radiology Reports")
            .with("author", "Smith, J and Doe, A")
            .with("year", ""),
        AuxData::default(),
    )
}

fn registry(server: &mockito::ServerGuard) -> SourceRegistry {
    let client = Arc::new(HttpClient::new(Arc::new(PolitenessGovernor::new())).unwrap());
    let mut registry = SourceRegistry::empty();
    registry.register(Arc::new(
        CrossRefSource::new(client.clone()).with_base_url(server.url()),
    ));
    // No contact email: Unpaywall reports itself disabled
    registry.register(Arc::new(UnpaywallSource::new(client).with_base_url(server.url())));
    registry
}

#[tokio::test]
async fn test_crossref_enrichment_end_to_end() {
    let mut server = mockito::Server::new_async().await;
    let search = server
        .mock("GET", "/works")
        .match_query(Matcher::UrlEncoded(
            "query.title".into(),
            "Deep Learning for Radiology Reports".into(),
        ))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(SEARCH_BODY)
        .expect(1)
        .create_async()
        .await;
    let refresh = server
        .mock("GET", Matcher::Regex(r"^/works/10\.1".to_string()))
        .match_query(Matcher::Any)
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(WORK_BODY)
        .expect(1)
        .create_async()
        .await;

    let store = Arc::new(RecordStore::open_in_memory().unwrap());
    let engine = ReconciliationEngine::new(
        Arc::new(registry(&server)),
        Some(store.clone()),
        MatchingConfig::default(),
    );

    let mut record = radiology_record();
    let report = assert_ok!(engine.enrich_record(&mut record).await);

    assert_eq!(record.bib.doi(), Some("10.1/xyz"));
    assert_eq!(record.bib.year(), Some("2020"));
    assert_eq!(record.bib.get("journal"), Some("Journal of Radiology"));
    assert_eq!(record.bib.get("pages"), Some("100-110"));
    assert_eq!(record.aux.enrichment_state(&SourceType::Crossref), EnrichmentState::Done);
    assert_eq!(report.merged(), 1);

    // Unregistered and disabled sources leave no state behind
    assert!(record.aux.enrichment.get("unpaywall").is_none());
    assert!(record.aux.enrichment.get("pubmed").is_none());

    let stored = store.get(&record.id()).unwrap().unwrap();
    assert_eq!(stored.bib.doi(), Some("10.1/xyz"));
    assert_eq!(stored.aux.enrichment_state(&SourceType::Crossref), EnrichmentState::Done);

    // A second pass, even from the stored copy, calls Crossref no more
    let mut again = stored;
    let second = assert_ok!(engine.enrich_record(&mut again).await);
    assert_eq!(second.merged(), 0);

    search.assert_async().await;
    refresh.assert_async().await;
}

#[tokio::test]
async fn test_rejected_match_is_not_retried() {
    let mut server = mockito::Server::new_async().await;
    let search = server
        .mock("GET", "/works")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(
            r#"{"status": "ok", "message": {"items": [
                {"DOI": "10.9/other", "title": ["Radiology Reporting Standards"], "author": [{"family": "Jones", "given": "K"}]}
            ]}}"#,
        )
        .expect(1)
        .create_async()
        .await;

    let store = Arc::new(RecordStore::open_in_memory().unwrap());
    let engine = ReconciliationEngine::new(Arc::new(registry(&server)), Some(store), MatchingConfig::default());

    let mut record = radiology_record();
    engine.enrich_record(&mut record).await.unwrap();
    assert!(record.bib.doi().is_none());
    assert_eq!(record.aux.enrichment_state(&SourceType::Crossref), EnrichmentState::Skipped);

    engine.enrich_record(&mut record).await.unwrap();
    search.assert_async().await;
}

#[tokio::test]
async fn test_source_error_does_not_abort() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/works")
        .match_query(Matcher::Any)
        .with_status(503)
        .create_async()
        .await;

    let store = Arc::new(RecordStore::open_in_memory().unwrap());
    let engine = ReconciliationEngine::new(Arc::new(registry(&server)), Some(store), MatchingConfig::default());

    let mut records = vec![radiology_record()];
    let batch = engine.enrich_batch(&mut records).await.unwrap();
    assert_eq!(batch.records, 1);
    assert_eq!(batch.failed, 1);
    assert_eq!(
        records[0].aux.enrichment_state(&SourceType::Crossref),
        EnrichmentState::Pending
    );
}

#[tokio::test]
async fn test_import_then_enrich_persists_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("papers.sqlite");

    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/works")
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(SEARCH_BODY)
        .create_async()
        .await;
    server
        .mock("GET", Matcher::Regex(r"^/works/10\.1".to_string()))
        .match_query(Matcher::Any)
        .with_status(200)
        .with_body(WORK_BODY)
        .create_async()
        .await;

    {
        let store = Arc::new(RecordStore::open(&path).unwrap());
        let engine = ReconciliationEngine::new(Arc::new(registry(&server)), Some(store), MatchingConfig::default());

        let imported = engine
            .import(vec![CandidateRecord::from_record(0, radiology_record())])
            .unwrap();
        assert_eq!(imported.added, 1);

        let mut records = imported.records;
        engine.enrich_batch(&mut records).await.unwrap();
    }

    let reopened = RecordStore::open(&path).unwrap();
    let all = reopened.all().unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].bib.doi(), Some("10.1/xyz"));
    assert!(all[0].bib.cite_key().is_some());
    assert_eq!(all[0].title(), "Deep Learning for Radiology Reports.");

    // Re-importing the original entry reconciles by title instead of duplicating
    let engine = ReconciliationEngine::new(
        Arc::new(SourceRegistry::empty()),
        Some(Arc::new(reopened)),
        MatchingConfig::default(),
    );
    let again = engine
        .import(vec![CandidateRecord::from_record(0, radiology_record())])
        .unwrap();
    assert_eq!(again.updated, 1);
    assert_eq!(again.added, 0);
}
