use rusqlite::Connection;

const SCHEMA_VERSION: i64 = 1;

/// Create all tables and indexes if they don't exist.
pub(crate) fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;

        CREATE TABLE IF NOT EXISTS schema_migrations (
            version    INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS papers (
            id          TEXT PRIMARY KEY,
            doi         TEXT,
            pmid        TEXT,
            arxivid     TEXT,
            scholarid   TEXT,
            title       TEXT NOT NULL DEFAULT '',
            norm_title  TEXT NOT NULL DEFAULT '',
            authors     TEXT NOT NULL DEFAULT '',
            year        TEXT,
            venue       TEXT NOT NULL DEFAULT '',
            bib         TEXT NOT NULL,
            aux         TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS title_tokens (
            token     TEXT NOT NULL,
            paper_id  TEXT NOT NULL,
            PRIMARY KEY (token, paper_id),
            FOREIGN KEY (paper_id) REFERENCES papers(id) ON DELETE CASCADE
        );
        ",
    )?;

    // Each external identifier belongs to at most one record
    conn.execute_batch(
        "
        CREATE UNIQUE INDEX IF NOT EXISTS idx_papers_doi       ON papers(doi)       WHERE doi IS NOT NULL;
        CREATE UNIQUE INDEX IF NOT EXISTS idx_papers_pmid      ON papers(pmid)      WHERE pmid IS NOT NULL;
        CREATE UNIQUE INDEX IF NOT EXISTS idx_papers_arxivid   ON papers(arxivid)   WHERE arxivid IS NOT NULL;
        CREATE UNIQUE INDEX IF NOT EXISTS idx_papers_scholarid ON papers(scholarid) WHERE scholarid IS NOT NULL;
        CREATE INDEX IF NOT EXISTS idx_papers_title      ON papers(title);
        CREATE INDEX IF NOT EXISTS idx_papers_norm_title ON papers(norm_title);
        CREATE INDEX IF NOT EXISTS idx_title_tokens_paper ON title_tokens(paper_id);
        ",
    )?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        rusqlite::params![SCHEMA_VERSION, chrono::Utc::now().to_rfc3339()],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_is_repeatable() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();

        let versions: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(versions, 1);
    }
}
