//! Local libsql-backed [`ResultStore`].

use crate::db::ResultStore;
use crate::types::{AppError, QueryResult, Result, RunStatus};
use async_trait::async_trait;
use chrono::Utc;
use libsql::{Builder, Connection, Database};
use std::collections::HashMap;
use uuid::Uuid;

pub struct LocalStore {
    db: Database,
}

impl LocalStore {
    /// Open (or create) a local database file and initialize the schema.
    pub async fn new(path: &str) -> Result<Self> {
        let db = Builder::new_local(path)
            .build()
            .await
            .map_err(|e| AppError::Database(format!("Failed to open database: {}", e)))?;

        let store = Self { db };
        store.initialize_schema().await?;

        Ok(store)
    }

    pub fn connection(&self) -> Result<Connection> {
        self.db
            .connect()
            .map_err(|e| AppError::Database(format!("Failed to get connection: {}", e)))
    }

    async fn initialize_schema(&self) -> Result<()> {
        let conn = self.connection()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS runs (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                status TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                completed_at INTEGER
            )",
            (),
        )
        .await
        .map_err(|e| AppError::Database(format!("Failed to create runs table: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS agents (
                id TEXT PRIMARY KEY,
                name TEXT UNIQUE NOT NULL,
                created_at INTEGER NOT NULL
            )",
            (),
        )
        .await
        .map_err(|e| AppError::Database(format!("Failed to create agents table: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS queries (
                id TEXT PRIMARY KEY,
                text TEXT UNIQUE NOT NULL,
                created_at INTEGER NOT NULL
            )",
            (),
        )
        .await
        .map_err(|e| AppError::Database(format!("Failed to create queries table: {}", e)))?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS responses (
                id TEXT PRIMARY KEY,
                run_id TEXT NOT NULL,
                query_id TEXT NOT NULL,
                agent_id TEXT NOT NULL,
                response TEXT,
                metadata TEXT,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (run_id) REFERENCES runs(id),
                FOREIGN KEY (query_id) REFERENCES queries(id),
                FOREIGN KEY (agent_id) REFERENCES agents(id),
                UNIQUE(run_id, query_id, agent_id)
            )",
            (),
        )
        .await
        .map_err(|e| AppError::Database(format!("Failed to create responses table: {}", e)))?;

        Ok(())
    }

    async fn get_or_create_agent(&self, conn: &Connection, name: &str) -> Result<String> {
        conn.execute(
            "INSERT OR IGNORE INTO agents (id, name, created_at) VALUES (?, ?, ?)",
            (Uuid::new_v4().to_string(), name, Utc::now().timestamp()),
        )
        .await
        .map_err(|e| AppError::Database(format!("Failed to create agent row: {}", e)))?;

        let mut rows = conn
            .query("SELECT id FROM agents WHERE name = ?", [name])
            .await
            .map_err(|e| AppError::Database(format!("Failed to query agent: {}", e)))?;
        let row = rows
            .next()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
            .ok_or_else(|| AppError::Database(format!("Agent row missing: {}", name)))?;
        row.get(0).map_err(|e| AppError::Database(e.to_string()))
    }

    async fn get_or_create_query(&self, conn: &Connection, text: &str) -> Result<String> {
        conn.execute(
            "INSERT OR IGNORE INTO queries (id, text, created_at) VALUES (?, ?, ?)",
            (Uuid::new_v4().to_string(), text, Utc::now().timestamp()),
        )
        .await
        .map_err(|e| AppError::Database(format!("Failed to create query row: {}", e)))?;

        let mut rows = conn
            .query("SELECT id FROM queries WHERE text = ?", [text])
            .await
            .map_err(|e| AppError::Database(format!("Failed to query queries: {}", e)))?;
        let row = rows
            .next()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
            .ok_or_else(|| AppError::Database("Query row missing".to_string()))?;
        row.get(0).map_err(|e| AppError::Database(e.to_string()))
    }
}

#[async_trait]
impl ResultStore for LocalStore {
    async fn create_run(&self, name: &str, planned_runs: u32) -> Result<String> {
        let conn = self.connection()?;
        let id = Uuid::new_v4().to_string();
        let stored_name = format!("{} (Plan: {})", name, planned_runs);

        conn.execute(
            "INSERT INTO runs (id, name, status, created_at) VALUES (?, ?, ?, ?)",
            (
                id.clone(),
                stored_name,
                RunStatus::Running.as_str(),
                Utc::now().timestamp(),
            ),
        )
        .await
        .map_err(|e| AppError::Database(format!("Failed to create run: {}", e)))?;

        Ok(id)
    }

    async fn update_run_status(&self, run_id: &str, status: RunStatus) -> Result<()> {
        let conn = self.connection()?;

        let affected = if matches!(status, RunStatus::Completed | RunStatus::Terminated) {
            conn.execute(
                "UPDATE runs SET status = ?, completed_at = ? WHERE id = ?",
                (status.as_str(), Utc::now().timestamp(), run_id),
            )
            .await
        } else {
            conn.execute(
                "UPDATE runs SET status = ? WHERE id = ?",
                (status.as_str(), run_id),
            )
            .await
        }
        .map_err(|e| AppError::Database(format!("Failed to update run status: {}", e)))?;

        if affected == 0 {
            return Err(AppError::Database(format!("Run not found: {}", run_id)));
        }
        Ok(())
    }

    async fn register_agents(&self, names: &[String]) -> Result<HashMap<String, String>> {
        let conn = self.connection()?;
        let mut ids = HashMap::with_capacity(names.len());
        for name in names {
            let id = self.get_or_create_agent(&conn, name).await?;
            ids.insert(name.clone(), id);
        }
        Ok(ids)
    }

    async fn upsert_result(&self, run_id: &str, result: &QueryResult) -> Result<()> {
        let conn = self.connection()?;
        let agent_id = self.get_or_create_agent(&conn, &result.agent).await?;
        let query_id = self.get_or_create_query(&conn, &result.query).await?;
        let metadata = result.metrics_json().to_string();

        conn.execute(
            "INSERT INTO responses (id, run_id, query_id, agent_id, response, metadata, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT (run_id, query_id, agent_id)
             DO UPDATE SET response = excluded.response,
                           metadata = excluded.metadata,
                           created_at = excluded.created_at",
            (
                Uuid::new_v4().to_string(),
                run_id,
                query_id,
                agent_id,
                result.response.clone(),
                metadata,
                Utc::now().timestamp(),
            ),
        )
        .await
        .map_err(|e| AppError::Database(format!("Failed to upsert result: {}", e)))?;

        Ok(())
    }

    async fn response_count(&self, run_id: &str) -> Result<u64> {
        let conn = self.connection()?;
        let mut rows = conn
            .query("SELECT COUNT(*) FROM responses WHERE run_id = ?", [run_id])
            .await
            .map_err(|e| AppError::Database(format!("Failed to count responses: {}", e)))?;
        let row = rows
            .next()
            .await
            .map_err(|e| AppError::Database(e.to_string()))?
            .ok_or_else(|| AppError::Database("COUNT returned no row".to_string()))?;
        let count: i64 = row.get(0).map_err(|e| AppError::Database(e.to_string()))?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{QueryResult, QueryStatus};

    async fn temp_store() -> (tempfile::TempDir, LocalStore) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("canvass.db");
        let store = LocalStore::new(path.to_str().unwrap()).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn run_name_carries_the_planned_count() {
        let (_dir, store) = temp_store().await;
        let run_id = store.create_run("nightly", 3).await.unwrap();

        let conn = store.connection().unwrap();
        let mut rows = conn
            .query("SELECT name, status FROM runs WHERE id = ?", [run_id])
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        let name: String = row.get(0).unwrap();
        let status: String = row.get(1).unwrap();
        assert_eq!(name, "nightly (Plan: 3)");
        assert_eq!(status, "running");
    }

    #[tokio::test]
    async fn redelivery_leaves_exactly_one_row() {
        let (_dir, store) = temp_store().await;
        let run_id = store.create_run("upsert", 1).await.unwrap();

        let first = QueryResult::success("alpha", "Q1", "draft answer".to_string(), 1.0);
        store.upsert_result(&run_id, &first).await.unwrap();
        let second = QueryResult::success("alpha", "Q1", "final answer".to_string(), 2.0);
        store.upsert_result(&run_id, &second).await.unwrap();

        assert_eq!(store.response_count(&run_id).await.unwrap(), 1);

        let conn = store.connection().unwrap();
        let mut rows = conn
            .query("SELECT response FROM responses WHERE run_id = ?", [run_id])
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        let response: String = row.get(0).unwrap();
        assert_eq!(response, "final answer");
    }

    #[tokio::test]
    async fn distinct_agents_store_distinct_rows() {
        let (_dir, store) = temp_store().await;
        let run_id = store.create_run("fanout", 1).await.unwrap();

        for agent in ["alpha", "beta"] {
            let result = QueryResult::failed(agent, "Q1", QueryStatus::Timeout, "slow", 60.0);
            store.upsert_result(&run_id, &result).await.unwrap();
        }
        assert_eq!(store.response_count(&run_id).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn query_text_is_deduplicated() {
        let (_dir, store) = temp_store().await;
        let run_a = store.create_run("a", 1).await.unwrap();
        let run_b = store.create_run("b", 1).await.unwrap();

        let result = QueryResult::success("alpha", "Q1", "hi".to_string(), 0.5);
        store.upsert_result(&run_a, &result).await.unwrap();
        store.upsert_result(&run_b, &result).await.unwrap();

        let conn = store.connection().unwrap();
        let mut rows = conn.query("SELECT COUNT(*) FROM queries", ()).await.unwrap();
        let row = rows.next().await.unwrap().unwrap();
        let count: i64 = row.get(0).unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn terminal_status_stamps_completed_at() {
        let (_dir, store) = temp_store().await;
        let run_id = store.create_run("lifecycle", 1).await.unwrap();
        store
            .update_run_status(&run_id, RunStatus::Completed)
            .await
            .unwrap();

        let conn = store.connection().unwrap();
        let mut rows = conn
            .query(
                "SELECT status, completed_at IS NOT NULL FROM runs WHERE id = ?",
                [run_id],
            )
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        let status: String = row.get(0).unwrap();
        let has_completed_at: i64 = row.get(1).unwrap();
        assert_eq!(status, "completed");
        assert_eq!(has_completed_at, 1);
    }

    #[tokio::test]
    async fn unknown_run_status_update_is_an_error() {
        let (_dir, store) = temp_store().await;
        let err = store
            .update_run_status("missing", RunStatus::Failed)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Run not found"));
    }
}
