//! Action log: append-only audit trail of who did what to which entity.

use rusqlite::{Connection, params};
use serde_json::Value;
use vendhub_core::error::Result;
use vendhub_core::types::ActionLogEntry;

use crate::{VendDb, db_err, now_ts};

/// An audit entry to be written alongside a mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAction {
    pub actor_id: String,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    pub details: Option<Value>,
}

impl NewAction {
    pub fn new(actor_id: &str, action: &str, entity_type: &str, entity_id: &str) -> Self {
        Self {
            actor_id: actor_id.to_string(),
            action: action.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Insert an action inside an open connection or transaction.
pub(crate) fn insert_action(conn: &Connection, action: &NewAction) -> Result<i64> {
    conn.execute(
        "INSERT INTO action_log (actor_id, action, entity_type, entity_id, details, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            action.actor_id,
            action.action,
            action.entity_type,
            action.entity_id,
            action.details.as_ref().map(|d| d.to_string()),
            now_ts(),
        ],
    )
    .map_err(db_err("Log action"))?;
    Ok(conn.last_insert_rowid())
}

fn row_to_entry(row: &rusqlite::Row) -> rusqlite::Result<ActionLogEntry> {
    let details: Option<String> = row.get(5)?;
    Ok(ActionLogEntry {
        id: row.get(0)?,
        actor_id: row.get(1)?,
        action: row.get(2)?,
        entity_type: row.get(3)?,
        entity_id: row.get(4)?,
        details: details.and_then(|d| serde_json::from_str(&d).ok()),
        created_at: row.get(6)?,
    })
}

impl VendDb {
    /// Log a standalone action (no accompanying mutation).
    pub fn log_action(&self, action: &NewAction) -> Result<i64> {
        let conn = self.lock()?;
        insert_action(&conn, action)
    }

    /// Most recent entries first.
    pub fn recent_actions(&self, limit: usize) -> Result<Vec<ActionLogEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, actor_id, action, entity_type, entity_id, details, created_at
                 FROM action_log ORDER BY id DESC LIMIT ?1",
            )
            .map_err(db_err("Prepare"))?;
        let entries = stmt
            .query_map(params![limit as i64], row_to_entry)
            .map_err(db_err("Query"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("Read action"))?;
        Ok(entries)
    }

    /// Full history of one entity, oldest first.
    pub fn actions_for(&self, entity_type: &str, entity_id: &str) -> Result<Vec<ActionLogEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, actor_id, action, entity_type, entity_id, details, created_at
                 FROM action_log WHERE entity_type=?1 AND entity_id=?2 ORDER BY id ASC",
            )
            .map_err(db_err("Prepare"))?;
        let entries = stmt
            .query_map(params![entity_type, entity_id], row_to_entry)
            .map_err(db_err("Query"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("Read action"))?;
        Ok(entries)
    }

    /// Everything one user did, most recent first.
    pub fn actions_by(&self, actor_id: &str, limit: usize) -> Result<Vec<ActionLogEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT id, actor_id, action, entity_type, entity_id, details, created_at
                 FROM action_log WHERE actor_id=?1 ORDER BY id DESC LIMIT ?2",
            )
            .map_err(db_err("Prepare"))?;
        let entries = stmt
            .query_map(params![actor_id, limit as i64], row_to_entry)
            .map_err(db_err("Query"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("Read action"))?;
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_and_query() {
        let db = VendDb::in_memory().unwrap();
        db.log_action(&NewAction::new("u1", "task.created", "task", "t1")).unwrap();
        db.log_action(
            &NewAction::new("u2", "task.started", "task", "t1")
                .with_details(serde_json::json!({"from": "CREATED"})),
        )
        .unwrap();
        db.log_action(&NewAction::new("u1", "machine.created", "machine", "m1")).unwrap();

        let recent = db.recent_actions(10).unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].action, "machine.created"); // most recent first

        let history = db.actions_for("task", "t1").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].action, "task.created");
        assert_eq!(history[1].details.as_ref().unwrap()["from"], "CREATED");

        let by_u1 = db.actions_by("u1", 10).unwrap();
        assert_eq!(by_u1.len(), 2);
    }

    #[test]
    fn test_recent_respects_limit() {
        let db = VendDb::in_memory().unwrap();
        for i in 0..5 {
            db.log_action(&NewAction::new("u", "ping", "system", &i.to_string())).unwrap();
        }
        assert_eq!(db.recent_actions(2).unwrap().len(), 2);
    }
}
