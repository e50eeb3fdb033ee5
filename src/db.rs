use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, params, types::Type};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{TrackerError, TrackerResult};
use crate::models::JobSource;

/// Durable record of job sources and when each was last checked.
///
/// One handle owns one connection. Handles are constructed by the caller
/// and passed down; nothing in the crate holds a global connection.
pub struct Database {
    conn: Connection,
    path: PathBuf,
}

impl Database {
    pub fn open(path: &Path) -> TrackerResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Ok(Self { conn, path: path.to_path_buf() })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> TrackerResult<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn, path: PathBuf::from(":memory:") })
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    pub fn default_path() -> PathBuf {
        // XDG data directory, or the working directory as a fallback
        match directories::ProjectDirs::from("", "", "careerwatch") {
            Some(proj_dirs) => proj_dirs.data_dir().join("careerwatch.db"),
            None => PathBuf::from("careerwatch.db"),
        }
    }

    pub fn init(&self) -> TrackerResult<()> {
        self.conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS job_sources (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                url TEXT NOT NULL UNIQUE,
                last_checked TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_job_sources_url ON job_sources(url);
            "#,
        )?;
        Ok(())
    }

    pub fn ensure_initialized(&self) -> anyhow::Result<()> {
        let tables: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='job_sources'",
            [],
            |row| row.get(0),
        )?;
        if tables == 0 {
            anyhow::bail!("Database not initialized. Run 'careerwatch init' first.");
        }
        Ok(())
    }

    // --- Source tracker operations ---

    /// Insert-if-absent. Registering a known URL returns the existing row untouched.
    pub fn register(&self, url: &str) -> TrackerResult<JobSource> {
        let url = url.trim();
        if url.is_empty() {
            return Err(TrackerError::InvalidUrl(url.to_string()));
        }

        let inserted = self.conn.execute(
            "INSERT INTO job_sources (url) VALUES (?1) ON CONFLICT(url) DO NOTHING",
            [url],
        )?;
        if inserted == 1 {
            tracing::info!(url, id = self.conn.last_insert_rowid(), "registered job source");
        } else {
            tracing::debug!(url, "job source already registered");
        }

        self.find_by_url(url)?
            .ok_or_else(|| TrackerError::Storage(rusqlite::Error::QueryReturnedNoRows))
    }

    /// Sources never checked, or whose last check is at least `interval` before `now`.
    pub fn due_sources(
        &self,
        now: DateTime<Utc>,
        interval: chrono::Duration,
    ) -> TrackerResult<Vec<JobSource>> {
        // Timestamps share one fixed-width format, so text order is time order.
        let cutoff = now.checked_sub_signed(interval).map(format_timestamp);

        let mut stmt = self.conn.prepare(
            "SELECT id, url, last_checked FROM job_sources
             WHERE last_checked IS NULL OR (?1 IS NOT NULL AND last_checked <= ?1)
             ORDER BY id",
        )?;
        let rows = stmt.query_map([cutoff], Self::row_to_source)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    /// Record a completed check. Safe to repeat with the same arguments; an
    /// older `checked_at` than the stored one leaves the stored value alone.
    pub fn mark_checked(&self, source_id: i64, checked_at: DateTime<Utc>) -> TrackerResult<()> {
        let updated = self.conn.execute(
            "UPDATE job_sources
             SET last_checked = CASE
                 WHEN last_checked IS NULL OR last_checked < ?2 THEN ?2
                 ELSE last_checked
             END
             WHERE id = ?1",
            params![source_id, format_timestamp(checked_at)],
        )?;
        if updated == 0 {
            return Err(TrackerError::NotFound { id: source_id });
        }
        tracing::debug!(source_id, %checked_at, "marked job source checked");
        Ok(())
    }

    pub fn list_sources(&self) -> TrackerResult<Vec<JobSource>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, url, last_checked FROM job_sources ORDER BY id")?;
        let rows = stmt.query_map([], Self::row_to_source)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    pub fn get_source(&self, id: i64) -> TrackerResult<Option<JobSource>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, url, last_checked FROM job_sources WHERE id = ?1",
                [id],
                Self::row_to_source,
            )
            .optional()?)
    }

    pub fn find_by_url(&self, url: &str) -> TrackerResult<Option<JobSource>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, url, last_checked FROM job_sources WHERE url = ?1",
                [url.trim()],
                Self::row_to_source,
            )
            .optional()?)
    }

    /// Administrative delete. Ids are not reused afterwards.
    pub fn remove(&self, url: &str) -> TrackerResult<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM job_sources WHERE url = ?1", [url.trim()])?;
        if removed > 0 {
            tracing::info!(url, "removed job source");
        }
        Ok(removed > 0)
    }

    fn row_to_source(row: &rusqlite::Row) -> rusqlite::Result<JobSource> {
        let last_checked: Option<String> = row.get(2)?;
        let last_checked = last_checked
            .map(|raw| {
                DateTime::parse_from_rfc3339(&raw)
                    .map(|ts| ts.with_timezone(&Utc))
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))
            })
            .transpose()?;

        Ok(JobSource {
            id: row.get(0)?,
            url: row.get(1)?,
            last_checked,
        })
    }
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn test_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        db
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap()
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("careerwatch-{}-{}", name, std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_register_is_idempotent() {
        let db = test_db();
        let first = db.register("https://acme.com/careers").unwrap();
        let second = db.register("https://acme.com/careers").unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first, second);
        assert_eq!(db.list_sources().unwrap().len(), 1);
    }

    #[test]
    fn test_register_duplicate_keeps_last_checked() {
        let db = test_db();
        let source = db.register("https://acme.com/careers").unwrap();
        db.mark_checked(source.id, t0()).unwrap();

        let again = db.register("  https://acme.com/careers ").unwrap();
        assert_eq!(again.id, source.id);
        assert_eq!(again.last_checked, Some(t0()));
    }

    #[test]
    fn test_register_rejects_blank_url() {
        let db = test_db();
        assert!(matches!(db.register("   "), Err(TrackerError::InvalidUrl(_))));
        assert!(db.list_sources().unwrap().is_empty());
    }

    #[test]
    fn test_due_sources_empty_table() {
        let db = test_db();
        assert!(db.due_sources(t0(), Duration::days(7)).unwrap().is_empty());
    }

    #[test]
    fn test_never_checked_always_due() {
        let db = test_db();
        db.register("https://acme.com/careers").unwrap();

        for interval in [Duration::zero(), Duration::minutes(15), Duration::weeks(52 * 100)] {
            let due = db.due_sources(t0(), interval).unwrap();
            assert_eq!(due.len(), 1);
            assert_eq!(due[0].last_checked, None);
        }
    }

    #[test]
    fn test_due_boundary() {
        let db = test_db();
        let source = db.register("https://acme.com/careers").unwrap();
        db.mark_checked(source.id, t0()).unwrap();
        let interval = Duration::minutes(15);

        let before = t0() + interval - Duration::seconds(1);
        assert!(db.due_sources(before, interval).unwrap().is_empty());

        let exactly = t0() + interval;
        assert_eq!(db.due_sources(exactly, interval).unwrap().len(), 1);
    }

    #[test]
    fn test_weekly_scenario() {
        let db = test_db();
        let source = db.register("https://acme.com/careers").unwrap();
        let week = Duration::days(7);

        let due = db.due_sources(t0(), week).unwrap();
        assert_eq!(due.iter().map(|s| s.id).collect::<Vec<_>>(), vec![source.id]);

        db.mark_checked(source.id, t0()).unwrap();
        assert!(db.due_sources(t0() + Duration::hours(1), week).unwrap().is_empty());

        let due = db.due_sources(t0() + Duration::days(8), week).unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].url, "https://acme.com/careers");
    }

    #[test]
    fn test_mark_checked_unknown_id() {
        let db = test_db();
        let a = db.register("https://a.example/jobs").unwrap();
        db.mark_checked(a.id, t0()).unwrap();
        let before = db.list_sources().unwrap();

        let err = db.mark_checked(a.id + 100, t0() + Duration::days(1)).unwrap_err();
        assert!(matches!(err, TrackerError::NotFound { id } if id == a.id + 100));
        assert_eq!(db.list_sources().unwrap(), before);
    }

    #[test]
    fn test_mark_checked_touches_one_row() {
        let db = test_db();
        let a = db.register("https://a.example/jobs").unwrap();
        let b = db.register("https://b.example/jobs").unwrap();

        db.mark_checked(a.id, t0()).unwrap();

        assert_eq!(db.get_source(a.id).unwrap().unwrap().last_checked, Some(t0()));
        assert_eq!(db.get_source(b.id).unwrap().unwrap().last_checked, None);
    }

    #[test]
    fn test_mark_checked_is_monotonic_and_repeatable() {
        let db = test_db();
        let a = db.register("https://a.example/jobs").unwrap();
        let later = t0() + Duration::hours(2);

        db.mark_checked(a.id, later).unwrap();
        db.mark_checked(a.id, later).unwrap();
        db.mark_checked(a.id, t0()).unwrap();

        assert_eq!(db.get_source(a.id).unwrap().unwrap().last_checked, Some(later));
    }

    #[test]
    fn test_mixed_sources_due_selection() {
        let db = test_db();
        let fresh = db.register("https://fresh.example/jobs").unwrap();
        let stale = db.register("https://stale.example/jobs").unwrap();
        let never = db.register("https://never.example/jobs").unwrap();

        db.mark_checked(fresh.id, t0()).unwrap();
        db.mark_checked(stale.id, t0() - Duration::days(3)).unwrap();

        let due: Vec<i64> = db
            .due_sources(t0() + Duration::hours(1), Duration::days(1))
            .unwrap()
            .into_iter()
            .map(|s| s.id)
            .collect();
        assert_eq!(due, vec![stale.id, never.id]);
    }

    #[test]
    fn test_remove_does_not_reuse_ids() {
        let db = test_db();
        let a = db.register("https://a.example/jobs").unwrap();
        assert!(db.remove("https://a.example/jobs").unwrap());
        assert!(!db.remove("https://a.example/jobs").unwrap());

        let b = db.register("https://a.example/jobs").unwrap();
        assert!(b.id > a.id);
    }

    #[test]
    fn test_ensure_initialized() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.ensure_initialized().is_err());
        db.init().unwrap();
        assert!(db.ensure_initialized().is_ok());
    }

    #[test]
    fn test_due_boundary_sub_microsecond() {
        let db = test_db();
        let source = db.register("https://acme.com/careers").unwrap();
        let checked_at = t0() + Duration::nanoseconds(1_500);
        let interval = Duration::days(1);

        db.mark_checked(source.id, checked_at).unwrap();
        assert_eq!(db.get_source(source.id).unwrap().unwrap().last_checked, Some(checked_at));

        let just_before = checked_at + interval - Duration::nanoseconds(1);
        assert!(db.due_sources(just_before, interval).unwrap().is_empty());
        assert_eq!(db.due_sources(checked_at + interval, interval).unwrap().len(), 1);
    }

    #[test]
    fn test_open_file_creates_parent_and_persists() {
        let dir = scratch_dir("persist");
        let path = dir.join("nested").join("sources.db");

        let db = Database::open(&path).unwrap();
        db.init().unwrap();
        let source = db.register("https://acme.com/careers").unwrap();
        db.mark_checked(source.id, t0()).unwrap();
        drop(db);

        let reopened = Database::open(&path).unwrap();
        reopened.ensure_initialized().unwrap();
        assert_eq!(reopened.get_source(source.id).unwrap().unwrap().last_checked, Some(t0()));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_concurrent_marks_through_separate_handles() {
        let dir = scratch_dir("concurrent");
        let path = dir.join("sources.db");

        let db = Database::open(&path).unwrap();
        db.init().unwrap();
        let ids: Vec<i64> = (0..8)
            .map(|i| db.register(&format!("https://site{}.example/jobs", i)).unwrap().id)
            .collect();

        let handles: Vec<_> = ids
            .iter()
            .map(|&id| {
                let path = path.clone();
                std::thread::spawn(move || {
                    let db = Database::open(&path).unwrap();
                    for minute in 0..50 {
                        db.mark_checked(id, t0() + Duration::minutes(minute)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let latest = t0() + Duration::minutes(49);
        for source in db.list_sources().unwrap() {
            assert_eq!(source.last_checked, Some(latest), "source {}", source.id);
        }
        drop(db);
        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_open_unusable_paths_report_storage_errors() {
        let dir = scratch_dir("unusable");
        std::fs::create_dir_all(&dir).unwrap();

        // A directory is not a database file
        let result = Database::open(&dir).and_then(|db| db.init());
        assert!(matches!(result, Err(TrackerError::Storage(_))));

        // A regular file cannot act as the parent directory
        let file = dir.join("plain-file");
        std::fs::write(&file, "not a directory").unwrap();
        let result = Database::open(&file.join("sources.db"));
        assert!(matches!(result, Err(TrackerError::StorageIo(_))));

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
