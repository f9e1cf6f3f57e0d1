//! SQLite label store
//!
//! Many-to-many mapping between audio file paths and free-form labels.
//! Write and query failures are logged and reported as `false` / empty
//! results; only failing to open the database is an error.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection};
use tracing::{debug, error, info};

#[derive(Debug, thiserror::Error)]
pub enum TagError {
    #[error("failed to open tag database {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    #[error("failed to initialize tag database: {0}")]
    Schema(#[from] rusqlite::Error),
}

pub struct TagStore {
    conn: Mutex<Connection>,
}

impl TagStore {
    /// Open (or create) the database at `path`
    pub fn open(path: &Path) -> Result<Self, TagError> {
        let conn = Connection::open(path).map_err(|source| TagError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        let store = Self::with_connection(conn)?;
        info!(path = %path.display(), "tag database opened");
        Ok(store)
    }

    /// In-memory store, used by tests
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, TagError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, TagError> {
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            CREATE TABLE IF NOT EXISTS audios (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                path TEXT NOT NULL UNIQUE
            );
            CREATE TABLE IF NOT EXISTS labels (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE
            );
            CREATE TABLE IF NOT EXISTS audio_labels (
                audio_id INTEGER,
                label_id INTEGER,
                PRIMARY KEY (audio_id, label_id),
                FOREIGN KEY (audio_id) REFERENCES audios(id) ON DELETE CASCADE,
                FOREIGN KEY (label_id) REFERENCES labels(id) ON DELETE CASCADE
            );
            ",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Attach `label` to `path`, creating either as needed
    pub fn add_label(&self, path: &Path, label: &str) -> bool {
        let label = label.trim();
        if label.is_empty() {
            return false;
        }
        let path_text = path.to_string_lossy().into_owned();
        let result = insert_label(&mut self.conn(), &path_text, label);

        match result {
            Ok(()) => {
                debug!(path = %path.display(), label, "label added");
                true
            }
            Err(e) => {
                error!(path = %path.display(), label, error = %e, "failed to add label");
                false
            }
        }
    }

    /// Attach every comma-separated label in `labels`; returns how many stuck
    pub fn add_labels(&self, path: &Path, labels: &str) -> usize {
        labels
            .split(',')
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .filter(|l| self.add_label(path, l))
            .count()
    }

    /// Files carrying any label that contains `query`
    pub fn find_by_label(&self, query: &str) -> Vec<PathBuf> {
        let pattern = format!("%{}%", query.trim());
        let conn = self.conn();
        let result = conn
            .prepare(
                "SELECT DISTINCT a.path
                 FROM audios a
                 JOIN audio_labels al ON a.id = al.audio_id
                 JOIN labels l ON l.id = al.label_id
                 WHERE l.name LIKE ?1
                 ORDER BY a.path",
            )
            .and_then(|mut stmt| {
                let rows = stmt
                    .query_map(params![pattern], |row| row.get::<_, String>(0))?
                    .collect::<rusqlite::Result<Vec<_>>>();
                rows
            });

        match result {
            Ok(paths) => {
                debug!(query, count = paths.len(), "label search");
                paths.into_iter().map(PathBuf::from).collect()
            }
            Err(e) => {
                error!(query, error = %e, "label search failed");
                Vec::new()
            }
        }
    }

    /// Labels attached to `path`
    pub fn labels_for(&self, path: &Path) -> Vec<String> {
        let path_text = path.to_string_lossy().into_owned();
        let conn = self.conn();
        let result = conn
            .prepare(
                "SELECT l.name
                 FROM labels l
                 JOIN audio_labels al ON l.id = al.label_id
                 JOIN audios a ON a.id = al.audio_id
                 WHERE a.path = ?1
                 ORDER BY l.name",
            )
            .and_then(|mut stmt| {
                let rows = stmt
                    .query_map(params![path_text], |row| row.get::<_, String>(0))?
                    .collect::<rusqlite::Result<Vec<_>>>();
                rows
            });

        result.unwrap_or_else(|e| {
            error!(path = %path.display(), error = %e, "failed to read labels");
            Vec::new()
        })
    }
}

fn insert_label(conn: &mut Connection, path: &str, label: &str) -> rusqlite::Result<()> {
    let tx = conn.transaction()?;
    tx.execute("INSERT OR IGNORE INTO audios (path) VALUES (?1)", params![path])?;
    let audio_id: i64 = tx.query_row("SELECT id FROM audios WHERE path = ?1", params![path], |row| {
        row.get(0)
    })?;
    tx.execute("INSERT OR IGNORE INTO labels (name) VALUES (?1)", params![label])?;
    let label_id: i64 = tx.query_row("SELECT id FROM labels WHERE name = ?1", params![label], |row| {
        row.get(0)
    })?;
    tx.execute(
        "INSERT OR IGNORE INTO audio_labels (audio_id, label_id) VALUES (?1, ?2)",
        params![audio_id, label_id],
    )?;
    tx.commit()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_search() {
        let store = TagStore::open_in_memory().unwrap();
        let kick = Path::new("C:/samples/kick.wav");
        let snare = Path::new("C:/samples/snare.wav");

        assert!(store.add_label(kick, "drums"));
        assert!(store.add_label(kick, "punchy"));
        assert!(store.add_label(snare, "drums"));
        // adding the same pair again is fine
        assert!(store.add_label(kick, "drums"));

        assert_eq!(store.find_by_label("drum"), vec![kick.to_path_buf(), snare.to_path_buf()]);
        assert_eq!(store.find_by_label("punch"), vec![kick.to_path_buf()]);
        assert!(store.find_by_label("vocal").is_empty());
        assert_eq!(store.labels_for(kick), vec!["drums".to_string(), "punchy".to_string()]);
    }

    #[test]
    fn test_search_results_are_distinct() {
        let store = TagStore::open_in_memory().unwrap();
        let pad = Path::new("/tmp/pad.flac");
        store.add_labels(pad, "ambient, ambient pad, dark");
        assert_eq!(store.find_by_label("amb"), vec![pad.to_path_buf()]);
    }

    #[test]
    fn test_add_labels_skips_blanks() {
        let store = TagStore::open_in_memory().unwrap();
        let loop_ = Path::new("/tmp/loop.wav");
        assert_eq!(store.add_labels(loop_, " bass , ,  120bpm,"), 2);
        assert!(!store.add_label(loop_, "   "));
        assert_eq!(store.labels_for(loop_), vec!["120bpm".to_string(), "bass".to_string()]);
        assert!(store.labels_for(Path::new("/tmp/other.wav")).is_empty());
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("audio_labels.db");
        let clip = Path::new("/music/clip.mp3");
        {
            let store = TagStore::open(&db).unwrap();
            assert!(store.add_label(clip, "intro"));
        }
        let store = TagStore::open(&db).unwrap();
        assert_eq!(store.labels_for(clip), vec!["intro".to_string()]);
    }

    #[test]
    fn test_open_failure_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let db = dir.path().join("missing").join("labels.db");
        assert!(matches!(TagStore::open(&db), Err(TagError::Open { .. })));
    }
}
