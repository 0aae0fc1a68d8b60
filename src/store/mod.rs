//! Persistent record store backed by SQLite.
//!
//! One `papers` row per canonical record, keyed by its storage id. External
//! identifiers are unique across rows when present, and a `title_tokens`
//! inverted index narrows approximate title lookups to a small shortlist.

mod schema;

use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

use crate::config::MatchingConfig;
use crate::models::{Bibliographic, CandidateRecord, CanonicalRecord, IdType};
use crate::utils::{author_distance, normalize_title, rerank_by_similarity, title_tokens, Tolerance};

/// Records sharing the most title tokens considered for an approximate match
const SHORTLIST_SIZE: usize = 50;

const SELECT_COLUMNS: &str = "id, bib, aux";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Identifier already belongs to another record: {0}")]
    Conflict(String),

    #[error("Store lock poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// How a candidate was matched to a stored record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchRoute {
    Identifier(IdType),
    ExactTitle,
    ApproximateTitle,
}

impl std::fmt::Display for MatchRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchRoute::Identifier(id_type) => write!(f, "{}", id_type),
            MatchRoute::ExactTitle => write!(f, "exact title"),
            MatchRoute::ApproximateTitle => write!(f, "approximate title"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreMatch {
    pub candidate: CandidateRecord,
    pub record: CanonicalRecord,
    pub route: MatchRoute,
}

/// Result of [`RecordStore::reconcile`]
#[derive(Debug, Clone, Default)]
pub struct Reconciliation {
    pub matched: Vec<StoreMatch>,
    pub unmatched: Vec<CandidateRecord>,
}

impl From<&MatchingConfig> for Tolerance {
    fn from(config: &MatchingConfig) -> Self {
        Tolerance::new(config.store_title_threshold, config.store_author_threshold)
    }
}

/// SQLite-backed store of canonical records
pub struct RecordStore {
    conn: Mutex<Connection>,
}

impl std::fmt::Debug for RecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore").finish_non_exhaustive()
    }
}

impl RecordStore {
    /// Open (or create) a store at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        schema::init_schema(&conn)?;
        tracing::debug!("Opened record store at {}", path.display());
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Look up the record holding an external identifier
    pub fn get_by_exact_id(&self, value: &str, id_type: IdType) -> Result<Option<CanonicalRecord>> {
        let value = normalize_identifier(value, id_type);
        if value.is_empty() {
            return Ok(None);
        }
        let conn = self.conn()?;
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM papers WHERE {} = ?1 LIMIT 1",
            id_type.column()
        );
        let row = conn
            .query_row(&sql, [&value], raw_row)
            .optional()?;
        row.map(into_record).transpose()
    }

    /// All records whose normalized title equals that of `title`
    pub fn find_by_normalized_title(&self, title: &str) -> Result<Vec<CanonicalRecord>> {
        let normalized = normalize_title(title);
        if normalized.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {SELECT_COLUMNS} FROM papers WHERE norm_title = ?1 ORDER BY id"
        ))?;
        let rows = stmt
            .query_map([&normalized], raw_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(into_record).collect()
    }

    /// Best stored record for `reference` by title, gated on title and author distance.
    ///
    /// Only the top-ranked shortlist entry is considered; if it fails the gate
    /// there is no match.
    pub fn find_by_approximate_title<R: Bibliographic>(
        &self,
        reference: &R,
        tolerance: Tolerance,
    ) -> Result<Option<CanonicalRecord>> {
        let tokens = title_tokens(reference.title());
        if tokens.is_empty() {
            return Ok(None);
        }

        let shortlist = self.shortlist(&tokens)?;
        let Some(best) = rerank_by_similarity(shortlist, reference.title()).into_iter().next() else {
            return Ok(None);
        };

        let author_d = author_distance(&reference.authors(), &best.item.authors());
        let accepted = tolerance.accepts(best.title_distance, author_d);
        tracing::debug!(
            "Approximate title lookup for '{}': best '{}' (title {:.3}, authors {:.3}) {}",
            reference.title(),
            best.item.title(),
            best.title_distance,
            author_d,
            if accepted { "accepted" } else { "rejected" }
        );
        Ok(accepted.then_some(best.item))
    }

    fn shortlist(&self, tokens: &[String]) -> Result<Vec<CanonicalRecord>> {
        let placeholders = vec!["?"; tokens.len()].join(", ");
        let sql = format!(
            "SELECT p.id, p.bib, p.aux FROM papers p
             JOIN (SELECT paper_id, COUNT(*) AS hits FROM title_tokens
                   WHERE token IN ({placeholders}) GROUP BY paper_id) t ON t.paper_id = p.id
             ORDER BY t.hits DESC, p.id
             LIMIT {SHORTLIST_SIZE}"
        );
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(tokens.iter()), raw_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(into_record).collect()
    }

    /// Write a record under its storage key.
    ///
    /// Fields present in the stored row but missing from `record` are copied
    /// into `record` before writing, so nothing previously stored is lost.
    /// Returns the storage key.
    pub fn upsert(&self, record: &mut CanonicalRecord) -> Result<String> {
        let key = record.id();
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let existing = tx
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM papers WHERE id = ?1"),
                [&key],
                raw_row,
            )
            .optional()?
            .map(into_record)
            .transpose()?;
        if let Some(existing) = existing {
            record.bib.absorb_missing(&existing.bib);
            record.aux.absorb_missing(&existing.aux);
        }

        let ids: Vec<Option<String>> = IdType::BY_PRIORITY
            .iter()
            .map(|t| record.identifier(*t).map(|v| normalize_identifier(v, *t)))
            .collect();

        tx.execute(
            "INSERT INTO papers (id, doi, pmid, arxivid, scholarid, title, norm_title, authors, year, venue, bib, aux, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(id) DO UPDATE SET
                doi = excluded.doi,
                pmid = excluded.pmid,
                arxivid = excluded.arxivid,
                scholarid = excluded.scholarid,
                title = excluded.title,
                norm_title = excluded.norm_title,
                authors = excluded.authors,
                year = excluded.year,
                venue = excluded.venue,
                bib = excluded.bib,
                aux = excluded.aux,
                updated_at = excluded.updated_at",
            params![
                key,
                ids[0],
                ids[1],
                ids[2],
                ids[3],
                record.title(),
                record.normalized_title(),
                record.bib.author().unwrap_or(""),
                record.bib.year(),
                record.venue(),
                serde_json::to_string(&record.bib)?,
                serde_json::to_string(&record.aux)?,
                chrono::Utc::now().to_rfc3339(),
            ],
        )
        .map_err(|e| conflict_or(e, &key))?;

        tx.execute("DELETE FROM title_tokens WHERE paper_id = ?1", [&key])?;
        {
            let mut stmt = tx.prepare("INSERT OR IGNORE INTO title_tokens (token, paper_id) VALUES (?1, ?2)")?;
            for token in title_tokens(record.title()) {
                stmt.execute(params![token, key])?;
            }
        }
        tx.commit()?;

        record.set_stored_key(key.clone());
        tracing::debug!("Stored record {}", key);
        Ok(key)
    }

    /// Split candidates into those matching a stored record and those that don't.
    ///
    /// Identifiers are tried in priority order, then the exact normalized
    /// title, then an approximate title match.
    pub fn reconcile(&self, candidates: Vec<CandidateRecord>, tolerance: Tolerance) -> Result<Reconciliation> {
        let mut result = Reconciliation::default();
        for candidate in candidates {
            match self.lookup(&candidate, tolerance)? {
                Some((record, route)) => {
                    tracing::debug!("'{}' matched {} by {}", candidate.title(), record.id(), route);
                    result.matched.push(StoreMatch {
                        candidate,
                        record,
                        route,
                    });
                }
                None => result.unmatched.push(candidate),
            }
        }
        Ok(result)
    }

    /// Find the stored counterpart of a single record
    pub fn lookup<R: Bibliographic>(
        &self,
        reference: &R,
        tolerance: Tolerance,
    ) -> Result<Option<(CanonicalRecord, MatchRoute)>> {
        for id_type in IdType::BY_PRIORITY {
            if let Some(value) = reference.identifier(id_type) {
                if let Some(record) = self.get_by_exact_id(value, id_type)? {
                    return Ok(Some((record, MatchRoute::Identifier(id_type))));
                }
            }
        }

        if let Some(record) = self.find_by_normalized_title(reference.title())?.into_iter().next() {
            return Ok(Some((record, MatchRoute::ExactTitle)));
        }

        Ok(self
            .find_by_approximate_title(reference, tolerance)?
            .map(|record| (record, MatchRoute::ApproximateTitle)))
    }

    /// Stored records other than `record` itself holding one of its identifiers, in priority order
    pub fn identifier_clashes(&self, record: &CanonicalRecord) -> Result<Vec<(IdType, CanonicalRecord)>> {
        let key = record.id();
        let mut clashes = Vec::new();
        for id_type in IdType::BY_PRIORITY {
            let Some(value) = record.identifier(id_type) else {
                continue;
            };
            if let Some(owner) = self.get_by_exact_id(value, id_type)? {
                if owner.id() != key {
                    clashes.push((id_type, owner));
                }
            }
        }
        Ok(clashes)
    }

    /// Remove a record and its title tokens. Returns whether it existed.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM title_tokens WHERE paper_id = ?1", [id])?;
        let removed = tx.execute("DELETE FROM papers WHERE id = ?1", [id])?;
        tx.commit()?;
        if removed > 0 {
            tracing::debug!("Deleted record {}", id);
        }
        Ok(removed > 0)
    }

    pub fn get(&self, id: &str) -> Result<Option<CanonicalRecord>> {
        let conn = self.conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM papers WHERE id = ?1"),
                [id],
                raw_row,
            )
            .optional()?;
        row.map(into_record).transpose()
    }

    /// Every stored record, ordered by key
    pub fn all(&self) -> Result<Vec<CanonicalRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("SELECT {SELECT_COLUMNS} FROM papers ORDER BY id"))?;
        let rows = stmt
            .query_map([], raw_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(into_record).collect()
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM papers", [], |row| row.get(0))?;
        Ok(count as usize)
    }
}

type RawRow = (String, String, String);

fn raw_row(row: &Row<'_>) -> rusqlite::Result<RawRow> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?))
}

fn into_record((id, bib, aux): RawRow) -> Result<CanonicalRecord> {
    let mut record = CanonicalRecord::new(serde_json::from_str(&bib)?, serde_json::from_str(&aux)?);
    record.set_stored_key(id);
    Ok(record)
}

/// DOIs compare case-insensitively; other identifiers are only trimmed
fn normalize_identifier(value: &str, id_type: IdType) -> String {
    match id_type {
        IdType::Doi => value.trim().to_lowercase(),
        _ => value.trim().to_string(),
    }
}

fn conflict_or(error: rusqlite::Error, key: &str) -> StoreError {
    match error.sqlite_error_code() {
        Some(ErrorCode::ConstraintViolation) => {
            StoreError::Conflict(format!("record {} shares an identifier with another stored record", key))
        }
        _ => StoreError::Database(error),
    }
}
