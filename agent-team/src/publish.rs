//! Publishing of final outputs.
//!
//! Issue trackers, VCS hosts and CI systems sit behind [`Publish`]; the
//! bundled [`ArtifactStore`] keeps every output in SQLite.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use futures::future::BoxFuture;
use rusqlite::{Connection, OptionalExtension};

use crate::factory::FinalOutput;

/// A sink for final outputs. Returns the external id of the published item.
pub trait Publish: Send + Sync {
    fn name(&self) -> &str;

    fn publish<'a>(&'a self, output: &'a FinalOutput) -> BoxFuture<'a, Result<String>>;
}

/// A stored artifact row.
#[derive(Debug, Clone)]
pub struct StoredArtifact {
    pub id: i64,
    pub requirement: String,
    pub status: String,
    pub iterations: u32,
    pub created_at: String,
}

/// SQLite-backed artifact store.
pub struct ArtifactStore {
    db: Mutex<Connection>,
}

impl ArtifactStore {
    /// Open or create an artifact database.
    pub fn open(path: &Path) -> Result<Self> {
        let db = Connection::open(path)
            .with_context(|| format!("Failed to open artifact database {}", path.display()))?;
        db.execute_batch(
            "CREATE TABLE IF NOT EXISTS artifacts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                requirement TEXT NOT NULL,
                status TEXT NOT NULL,
                iterations INTEGER NOT NULL,
                payload TEXT NOT NULL,
                created_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_artifacts_status ON artifacts(status);",
        )?;
        Ok(Self { db: Mutex::new(db) })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        Self::open(Path::new(":memory:"))
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|_| anyhow!("artifact store lock poisoned"))
    }

    /// Store an output, returning its row id.
    pub fn save(&self, output: &FinalOutput) -> Result<i64> {
        let payload = serde_json::to_string(output)?;
        let now = Utc::now().to_rfc3339();
        let db = self.conn()?;
        db.execute(
            "INSERT INTO artifacts (requirement, status, iterations, payload, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                output.requirement,
                output.status.to_string(),
                output.iterations,
                payload,
                now
            ],
        )?;
        Ok(db.last_insert_rowid())
    }

    /// Load a stored output.
    pub fn get(&self, id: i64) -> Result<Option<FinalOutput>> {
        let db = self.conn()?;
        let payload: Option<String> = db
            .query_row(
                "SELECT payload FROM artifacts WHERE id = ?1",
                rusqlite::params![id],
                |row| row.get(0),
            )
            .optional()?;
        payload
            .map(|p| serde_json::from_str(&p).context("Corrupt artifact payload"))
            .transpose()
    }

    /// All stored artifacts, oldest first.
    pub fn list(&self) -> Result<Vec<StoredArtifact>> {
        let db = self.conn()?;
        let mut stmt = db.prepare(
            "SELECT id, requirement, status, iterations, created_at
             FROM artifacts ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok(StoredArtifact {
                    id: row.get(0)?,
                    requirement: row.get(1)?,
                    status: row.get(2)?,
                    iterations: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

impl Publish for ArtifactStore {
    fn name(&self) -> &str {
        "artifact-store"
    }

    fn publish<'a>(&'a self, output: &'a FinalOutput) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let id = self.save(output)?;
            Ok(format!("artifact-{id}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::factory::Status;

    fn output(requirement: &str) -> FinalOutput {
        FinalOutput {
            requirement: requirement.into(),
            plan: "plan".into(),
            code: "code".into(),
            tests: "tests".into(),
            review: "APPROVED".into(),
            iterations: 1,
            status: Status::Approved,
            project: None,
        }
    }

    #[tokio::test]
    async fn publish_returns_artifact_ids() {
        let store = ArtifactStore::in_memory().unwrap();
        assert_eq!(store.publish(&output("a")).await.unwrap(), "artifact-1");
        assert_eq!(store.publish(&output("b")).await.unwrap(), "artifact-2");

        let rows = store.list().unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].requirement, "b");
        assert_eq!(rows[0].status, "approved");

        assert_eq!(store.get(1).unwrap(), Some(output("a")));
        assert!(store.get(99).unwrap().is_none());
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifacts.db");
        ArtifactStore::open(&path).unwrap().save(&output("x")).unwrap();
        let store = ArtifactStore::open(&path).unwrap();
        assert_eq!(store.list().unwrap().len(), 1);
    }
}
