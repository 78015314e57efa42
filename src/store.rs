//! SQLite-backed feedback store.
//!
//! The connection sits behind a mutex: readers and the single analysis
//! writer serialize through it, and WAL mode keeps the file friendly to
//! concurrent access from outside the process.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::model::{Feedback, FeedbackKind};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS feedback (
    id INTEGER PRIMARY KEY AUTOINCREMENT,

    user_email TEXT,
    user_name TEXT,

    title TEXT NOT NULL,
    description TEXT NOT NULL,
    kind TEXT NOT NULL DEFAULT 'other',

    url TEXT,
    user_agent TEXT,
    console_logs TEXT,

    analysis TEXT,
    analysis_at DATETIME,

    created_at DATETIME NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_feedback_kind ON feedback(kind);
CREATE INDEX IF NOT EXISTS idx_feedback_created_at ON feedback(created_at);
";

pub struct FeedbackStore {
    conn: Mutex<Connection>,
}

impl FeedbackStore {
    /// Open (or create) the database file and ensure the schema exists.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path)?;
        // WAL allows simultaneous readers alongside the writer.
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::with_connection(conn)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> anyhow::Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> anyhow::Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(FeedbackStore {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert a new submission and return its id. Timestamps are set
    /// server-side; whatever the caller put in `created_at` is ignored.
    pub fn create(&self, feedback: &Feedback) -> anyhow::Result<i64> {
        let conn = self.lock();
        conn.execute(
            "INSERT INTO feedback (
                user_email, user_name, title, description, kind,
                url, user_agent, console_logs, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                feedback.user_email,
                feedback.user_name,
                feedback.title,
                feedback.description,
                feedback.kind.as_str(),
                feedback.url,
                feedback.user_agent,
                feedback.console_logs,
                Utc::now(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Attach the agent's report to a submission. Called at most once per
    /// successful run; the analysis is never mutated afterwards.
    pub fn update_analysis(&self, id: i64, analysis: &str) -> anyhow::Result<()> {
        let updated = self.lock().execute(
            "UPDATE feedback SET analysis = ?1, analysis_at = ?2 WHERE id = ?3",
            params![analysis, Utc::now(), id],
        )?;
        if updated == 0 {
            anyhow::bail!("feedback #{} not found", id);
        }
        Ok(())
    }

    pub fn get(&self, id: i64) -> anyhow::Result<Option<Feedback>> {
        let conn = self.lock();
        let feedback = conn
            .query_row(
                &format!("{} WHERE id = ?1", SELECT_COLUMNS),
                params![id],
                row_to_feedback,
            )
            .optional()?;
        Ok(feedback)
    }

    /// Newest first.
    pub fn list(&self, limit: i64, offset: i64) -> anyhow::Result<Vec<Feedback>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "{} ORDER BY created_at DESC, id DESC LIMIT ?1 OFFSET ?2",
            SELECT_COLUMNS
        ))?;
        let rows = stmt.query_map(params![limit, offset], row_to_feedback)?;
        let mut feedbacks = Vec::new();
        for row in rows {
            feedbacks.push(row?);
        }
        Ok(feedbacks)
    }
}

const SELECT_COLUMNS: &str = "SELECT
    id, user_email, user_name, title, description, kind,
    url, user_agent, console_logs, analysis, analysis_at, created_at
FROM feedback";

fn row_to_feedback(row: &Row<'_>) -> rusqlite::Result<Feedback> {
    let kind: String = row.get(5)?;
    Ok(Feedback {
        id: row.get(0)?,
        user_email: row.get(1)?,
        user_name: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        kind: FeedbackKind::from_str(&kind),
        url: row.get(6)?,
        user_agent: row.get(7)?,
        console_logs: row.get(8)?,
        analysis: row.get(9)?,
        analysis_at: row.get(10)?,
        created_at: row.get(11)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(title: &str) -> Feedback {
        let mut feedback = Feedback::new(title, "Something is wrong.", FeedbackKind::Bug);
        feedback.user_email = Some("user@example.test".to_string());
        feedback.console_logs = Some("TypeError: x".to_string());
        feedback
    }

    #[test]
    fn create_then_get_roundtrips() {
        let store = FeedbackStore::open_in_memory().unwrap();
        let id = store.create(&sample("Broken page")).unwrap();
        assert!(id > 0);

        let loaded = store.get(id).unwrap().unwrap();
        assert_eq!(loaded.id, id);
        assert_eq!(loaded.title, "Broken page");
        assert_eq!(loaded.kind, FeedbackKind::Bug);
        assert_eq!(loaded.user_email.as_deref(), Some("user@example.test"));
        assert!(loaded.analysis.is_none());
        assert!(loaded.analysis_at.is_none());
    }

    #[test]
    fn get_missing_is_none() {
        let store = FeedbackStore::open_in_memory().unwrap();
        assert!(store.get(999).unwrap().is_none());
    }

    #[test]
    fn update_analysis_sets_text_and_timestamp() {
        let store = FeedbackStore::open_in_memory().unwrap();
        let id = store.create(&sample("Broken page")).unwrap();

        store.update_analysis(id, "## Summary\nIt broke.").unwrap();

        let loaded = store.get(id).unwrap().unwrap();
        assert_eq!(loaded.analysis.as_deref(), Some("## Summary\nIt broke."));
        assert!(loaded.analysis_at.is_some());
    }

    #[test]
    fn update_analysis_on_missing_row_fails() {
        let store = FeedbackStore::open_in_memory().unwrap();
        assert!(store.update_analysis(42, "report").is_err());
    }

    #[test]
    fn list_is_newest_first_and_paginated() {
        let store = FeedbackStore::open_in_memory().unwrap();
        for i in 1..=5 {
            store.create(&sample(&format!("report {}", i))).unwrap();
        }

        let page = store.list(2, 0).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].title, "report 5");
        assert_eq!(page[1].title, "report 4");

        let rest = store.list(10, 2).unwrap();
        assert_eq!(rest.len(), 3);
        assert_eq!(rest[0].title, "report 3");
    }
}
