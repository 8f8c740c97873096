//! SQLite-backed execution store.
//!
//! Records are stored as JSON documents next to the indexed columns the
//! engine queries on (plan id, status/state, interrupt type) and an integer
//! version. Every update is a read-modify-write inside an immediate
//! transaction that only commits when the version it read is still current,
//! so concurrent writers from other processes surface as version conflicts.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, TransactionBehavior};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::domain::{Interrupt, InterruptState, NodeExecution, PlanExecution, Status};

use super::store::{ExecutionStore, StoreError};

const PLAN: &str = "plan execution";
const NODE: &str = "node execution";
const INTERRUPT: &str = "interrupt";

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS plan_executions (
        id TEXT PRIMARY KEY,
        status TEXT NOT NULL,
        version INTEGER NOT NULL,
        doc TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS node_executions (
        id TEXT PRIMARY KEY,
        plan_execution_id TEXT NOT NULL,
        status TEXT NOT NULL,
        version INTEGER NOT NULL,
        doc TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_node_executions_plan
    ON node_executions (plan_execution_id);
    CREATE TABLE IF NOT EXISTS interrupts (
        id TEXT PRIMARY KEY,
        plan_execution_id TEXT NOT NULL,
        interrupt_type TEXT NOT NULL,
        state TEXT NOT NULL,
        created_at_ms INTEGER NOT NULL,
        version INTEGER NOT NULL,
        doc TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_interrupts_plan_state
    ON interrupts (plan_execution_id, state);
    CREATE UNIQUE INDEX IF NOT EXISTS idx_interrupts_exclusive_active
    ON interrupts (plan_execution_id, interrupt_type)
    WHERE state IN ('REGISTERED', 'PROCESSING')
      AND interrupt_type IN ('PAUSE_ALL', 'RESUME_ALL', 'ABORT_ALL');
";

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
                StoreError::Unavailable(err.to_string())
            }
            _ => StoreError::Database(err.to_string()),
        }
    }
}

fn is_constraint_violation(err: &rusqlite::Error) -> bool {
    err.sqlite_error_code() == Some(ErrorCode::ConstraintViolation)
}

/// SQLite execution store
pub struct SqliteExecutionStore {
    conn: Mutex<Connection>,
}

impl SqliteExecutionStore {
    /// Open (or create) a store at the given database path
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                StoreError::Database(format!("create {}: {}", parent.display(), e))
            })?;
        }

        let conn = Connection::open(path)?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        conn.busy_timeout(Duration::from_millis(250))?;
        Self::from_connection(conn)
    }

    /// Private in-memory store (tests, embedding)
    pub fn in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("connection mutex poisoned".to_string()))
    }
}

/// Read a document and its version from `table`
fn read_doc<T: DeserializeOwned>(
    conn: &Connection,
    table: &str,
    entity: &'static str,
    id: &str,
) -> Result<(T, u64), StoreError> {
    let sql = format!("SELECT doc, version FROM {} WHERE id = ?1", table);
    let row: Option<(String, i64)> = conn
        .query_row(&sql, params![id], |row| Ok((row.get(0)?, row.get(1)?)))
        .optional()?;

    let (doc, version) = row.ok_or_else(|| StoreError::NotFound {
        entity,
        id: id.to_string(),
    })?;
    Ok((serde_json::from_str(&doc)?, version as u64))
}

/// Collect every document returned by a single-column query
fn query_docs<T: DeserializeOwned>(
    conn: &Connection,
    sql: &str,
    plan_execution_id: &str,
) -> Result<Vec<T>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![plan_execution_id], |row| row.get::<_, String>(0))?;

    let mut docs = Vec::new();
    for row in rows {
        docs.push(serde_json::from_str(&row?)?);
    }
    Ok(docs)
}

/// Fail with a version conflict when a conditional write touched nothing
fn ensure_written(changed: usize, entity: &'static str, id: &str, expected: u64) -> Result<(), StoreError> {
    if changed == 0 {
        return Err(StoreError::VersionConflict {
            entity,
            id: id.to_string(),
            expected,
        });
    }
    Ok(())
}

#[async_trait]
impl ExecutionStore for SqliteExecutionStore {
    async fn save_plan_execution(&self, plan: &PlanExecution) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let doc = serde_json::to_string(plan)?;
        conn.execute(
            "INSERT INTO plan_executions (id, status, version, doc) VALUES (?1, ?2, ?3, ?4)",
            params![plan.id, plan.status.as_str(), plan.version as i64, doc],
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                StoreError::AlreadyExists {
                    entity: PLAN,
                    id: plan.id.clone(),
                }
            } else {
                e.into()
            }
        })?;
        Ok(())
    }

    async fn get_plan_execution(&self, id: &str) -> Result<PlanExecution, StoreError> {
        let conn = self.lock()?;
        let (plan, _) = read_doc(&conn, "plan_executions", PLAN, id)?;
        Ok(plan)
    }

    async fn update_plan_status(
        &self,
        id: &str,
        status: Status,
        allowed_from: &[Status],
    ) -> Result<PlanExecution, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let (mut plan, version): (PlanExecution, u64) = read_doc(&tx, "plan_executions", PLAN, id)?;
        if !allowed_from.contains(&plan.status) {
            return Err(StoreError::StatusMismatch {
                entity: PLAN,
                id: id.to_string(),
                actual: plan.status,
                allowed: allowed_from.to_vec(),
            });
        }

        plan.status = status;
        plan.version = version + 1;
        plan.last_updated_at = Utc::now();
        let changed = tx.execute(
            "UPDATE plan_executions SET status = ?1, version = ?2, doc = ?3 WHERE id = ?4 AND version = ?5",
            params![
                status.as_str(),
                plan.version as i64,
                serde_json::to_string(&plan)?,
                id,
                version as i64
            ],
        )?;
        ensure_written(changed, PLAN, id, version)?;
        tx.commit()?;

        debug!(plan_execution_id = %id, %status, "Plan status updated");
        Ok(plan)
    }

    async fn save_node_execution(&self, node: &NodeExecution) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let doc = serde_json::to_string(node)?;
        conn.execute(
            "INSERT INTO node_executions (id, plan_execution_id, status, version, doc) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                node.id,
                node.plan_execution_id,
                node.status.as_str(),
                node.version as i64,
                doc
            ],
        )
        .map_err(|e| {
            if is_constraint_violation(&e) {
                StoreError::AlreadyExists {
                    entity: NODE,
                    id: node.id.clone(),
                }
            } else {
                e.into()
            }
        })?;
        Ok(())
    }

    async fn get_node_execution(&self, id: &str) -> Result<NodeExecution, StoreError> {
        let conn = self.lock()?;
        let (node, _) = read_doc(&conn, "node_executions", NODE, id)?;
        Ok(node)
    }

    async fn fetch_node_executions(
        &self,
        plan_execution_id: &str,
    ) -> Result<Vec<NodeExecution>, StoreError> {
        let conn = self.lock()?;
        query_docs(
            &conn,
            "SELECT doc FROM node_executions WHERE plan_execution_id = ?1 ORDER BY rowid",
            plan_execution_id,
        )
    }

    async fn update_node_execution_status(
        &self,
        id: &str,
        status: Status,
        allowed_from: &[Status],
        mutator: &(dyn for<'n> Fn(&'n mut NodeExecution) + Send + Sync),
    ) -> Result<NodeExecution, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let (mut node, version): (NodeExecution, u64) = read_doc(&tx, "node_executions", NODE, id)?;
        if !allowed_from.contains(&node.status) {
            return Err(StoreError::StatusMismatch {
                entity: NODE,
                id: id.to_string(),
                actual: node.status,
                allowed: allowed_from.to_vec(),
            });
        }

        mutator(&mut node);
        node.status = status;
        node.version = version + 1;
        node.last_updated_at = Utc::now();
        let changed = tx.execute(
            "UPDATE node_executions SET status = ?1, version = ?2, doc = ?3 WHERE id = ?4 AND version = ?5",
            params![
                status.as_str(),
                node.version as i64,
                serde_json::to_string(&node)?,
                id,
                version as i64
            ],
        )?;
        ensure_written(changed, NODE, id, version)?;
        tx.commit()?;

        debug!(node_execution_id = %id, %status, "Node status updated");
        Ok(node)
    }

    async fn create_interrupt(&self, interrupt: &Interrupt) -> Result<String, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let conflict = || StoreError::ActiveInterruptExists {
            plan_execution_id: interrupt.plan_execution_id.clone(),
            interrupt_type: interrupt.interrupt_type,
        };

        if interrupt.interrupt_type.is_exclusive() && interrupt.is_active() {
            let active: i64 = tx.query_row(
                "SELECT COUNT(*) FROM interrupts
                 WHERE plan_execution_id = ?1 AND interrupt_type = ?2
                   AND state IN ('REGISTERED', 'PROCESSING')",
                params![interrupt.plan_execution_id, interrupt.interrupt_type.as_str()],
                |row| row.get(0),
            )?;
            if active > 0 {
                return Err(conflict());
            }
        }

        let exists: Option<i64> = tx
            .query_row(
                "SELECT 1 FROM interrupts WHERE id = ?1",
                params![interrupt.id],
                |row| row.get(0),
            )
            .optional()?;
        if exists.is_some() {
            return Err(StoreError::AlreadyExists {
                entity: INTERRUPT,
                id: interrupt.id.clone(),
            });
        }

        tx.execute(
            "INSERT INTO interrupts (id, plan_execution_id, interrupt_type, state, created_at_ms, version, doc)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                interrupt.id,
                interrupt.plan_execution_id,
                interrupt.interrupt_type.as_str(),
                interrupt.state.as_str(),
                interrupt.created_at.timestamp_millis(),
                interrupt.version as i64,
                serde_json::to_string(interrupt)?
            ],
        )
        .map_err(|e| if is_constraint_violation(&e) { conflict() } else { e.into() })?;
        tx.commit()?;

        debug!(
            interrupt_id = %interrupt.id,
            interrupt_type = %interrupt.interrupt_type,
            "Interrupt created"
        );
        Ok(interrupt.id.clone())
    }

    async fn get_interrupt(&self, id: &str) -> Result<Interrupt, StoreError> {
        let conn = self.lock()?;
        let (interrupt, _) = read_doc(&conn, "interrupts", INTERRUPT, id)?;
        Ok(interrupt)
    }

    async fn get_active_interrupts(
        &self,
        plan_execution_id: &str,
    ) -> Result<Vec<Interrupt>, StoreError> {
        let conn = self.lock()?;
        query_docs(
            &conn,
            "SELECT doc FROM interrupts
             WHERE plan_execution_id = ?1 AND state IN ('REGISTERED', 'PROCESSING')
             ORDER BY created_at_ms, rowid",
            plan_execution_id,
        )
    }

    async fn list_interrupts(&self, plan_execution_id: &str) -> Result<Vec<Interrupt>, StoreError> {
        let conn = self.lock()?;
        query_docs(
            &conn,
            "SELECT doc FROM interrupts WHERE plan_execution_id = ?1 ORDER BY created_at_ms, rowid",
            plan_execution_id,
        )
    }

    async fn mark_interrupt_processing(&self, id: &str) -> Result<Interrupt, StoreError> {
        transition_interrupt(self, id, InterruptState::Processing, &[InterruptState::Registered])
    }

    async fn mark_interrupt_processed(
        &self,
        id: &str,
        terminal_state: InterruptState,
    ) -> Result<Interrupt, StoreError> {
        if terminal_state.is_active() {
            return Err(StoreError::InvalidTerminalState(terminal_state));
        }
        transition_interrupt(
            self,
            id,
            terminal_state,
            &[InterruptState::Registered, InterruptState::Processing],
        )
    }
}

fn transition_interrupt(
    store: &SqliteExecutionStore,
    id: &str,
    state: InterruptState,
    allowed_from: &[InterruptState],
) -> Result<Interrupt, StoreError> {
    let mut conn = store.lock()?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let (mut interrupt, version): (Interrupt, u64) = read_doc(&tx, "interrupts", INTERRUPT, id)?;
    if !allowed_from.contains(&interrupt.state) {
        return Err(StoreError::InterruptNotActive {
            id: id.to_string(),
            state: interrupt.state,
        });
    }

    interrupt.state = state;
    interrupt.version = version + 1;
    interrupt.last_updated_at = Utc::now();
    let changed = tx.execute(
        "UPDATE interrupts SET state = ?1, version = ?2, doc = ?3 WHERE id = ?4 AND version = ?5",
        params![
            state.as_str(),
            interrupt.version as i64,
            serde_json::to_string(&interrupt)?,
            id,
            version as i64
        ],
    )?;
    ensure_written(changed, INTERRUPT, id, version)?;
    tx.commit()?;

    debug!(interrupt_id = %id, %state, "Interrupt state updated");
    Ok(interrupt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{InterruptEffect, InterruptRequest, InterruptType};
    use tempfile::TempDir;

    fn request(interrupt_type: InterruptType, plan_id: &str) -> Interrupt {
        Interrupt::from_request(
            &InterruptRequest::new(interrupt_type, plan_id),
            InterruptState::Processing,
        )
    }

    #[tokio::test]
    async fn test_plan_status_update_is_conditional() {
        let store = SqliteExecutionStore::in_memory().unwrap();
        let plan = PlanExecution::new("deploy");
        store.save_plan_execution(&plan).await.unwrap();

        let updated = store
            .update_plan_status(&plan.id, Status::Paused, &[Status::Running])
            .await
            .unwrap();
        assert_eq!(updated.status, Status::Paused);
        assert_eq!(updated.version, 1);

        let err = store
            .update_plan_status(&plan.id, Status::Paused, &[Status::Running])
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::StatusMismatch { actual: Status::Paused, .. }));
    }

    #[tokio::test]
    async fn test_node_update_applies_mutator() {
        let store = SqliteExecutionStore::in_memory().unwrap();
        let node = NodeExecution::leaf("plan", "build", Status::Running);
        store.save_node_execution(&node).await.unwrap();

        let effect = InterruptEffect::new("i-1".into(), InterruptType::PauseAll);
        let updated = store
            .update_node_execution_status(&node.id, Status::Paused, &[Status::Running], &|n| {
                n.add_interrupt_effect(effect.clone());
            })
            .await
            .unwrap();

        assert_eq!(updated.status, Status::Paused);
        assert_eq!(updated.interrupt_histories.len(), 1);

        let reloaded = store.get_node_execution(&node.id).await.unwrap();
        assert_eq!(reloaded.interrupt_histories, updated.interrupt_histories);
        assert_eq!(reloaded.version, 1);
    }

    #[tokio::test]
    async fn test_second_active_exclusive_interrupt_rejected() {
        let store = SqliteExecutionStore::in_memory().unwrap();

        let first = request(InterruptType::PauseAll, "plan");
        store.create_interrupt(&first).await.unwrap();

        let second = request(InterruptType::PauseAll, "plan");
        let err = store.create_interrupt(&second).await.unwrap_err();
        assert!(matches!(err, StoreError::ActiveInterruptExists { .. }));

        // A different plan is unaffected
        store
            .create_interrupt(&request(InterruptType::PauseAll, "other"))
            .await
            .unwrap();

        // Once processed, a new pause may be created
        store
            .mark_interrupt_processed(&first.id, InterruptState::ProcessedSuccessfully)
            .await
            .unwrap();
        store.create_interrupt(&second).await.unwrap();

        let active = store.get_active_interrupts("plan").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, second.id);
        assert_eq!(store.list_interrupts("plan").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_mark_processed_only_once() {
        let store = SqliteExecutionStore::in_memory().unwrap();
        let interrupt = request(InterruptType::Retry, "plan");
        store.create_interrupt(&interrupt).await.unwrap();

        store
            .mark_interrupt_processed(&interrupt.id, InterruptState::ProcessedSuccessfully)
            .await
            .unwrap();
        let err = store
            .mark_interrupt_processed(&interrupt.id, InterruptState::Discarded)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::InterruptNotActive {
                state: InterruptState::ProcessedSuccessfully,
                ..
            }
        ));

        let err = store
            .mark_interrupt_processed(&interrupt.id, InterruptState::Processing)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidTerminalState(_)));
    }

    #[tokio::test]
    async fn test_file_store_persists_across_reopen() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("state").join("executions.db");

        let plan = PlanExecution::new("nightly");
        {
            let store = SqliteExecutionStore::open(&path).unwrap();
            store.save_plan_execution(&plan).await.unwrap();
            store
                .save_node_execution(&NodeExecution::leaf(&plan.id, "a", Status::Running))
                .await
                .unwrap();
        }

        let store = SqliteExecutionStore::open(&path).unwrap();
        assert_eq!(store.get_plan_execution(&plan.id).await.unwrap().name, "nightly");
        assert_eq!(store.fetch_node_executions(&plan.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_records() {
        let store = SqliteExecutionStore::in_memory().unwrap();
        assert!(matches!(
            store.get_node_execution("nope").await,
            Err(StoreError::NotFound { entity: NODE, .. })
        ));
        assert!(matches!(
            store.mark_interrupt_processing("nope").await,
            Err(StoreError::NotFound { entity: INTERRUPT, .. })
        ));
    }
}
