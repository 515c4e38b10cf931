//! Vending machines.

use rusqlite::{OptionalExtension, params};
use vendhub_core::error::{Result, VendHubError};
use vendhub_core::types::{Machine, MachineStatus};

use crate::action_log::{NewAction, insert_action};
use crate::{VendDb, db_err, now_ts, parse_enum};

fn row_to_machine(row: &rusqlite::Row) -> rusqlite::Result<Machine> {
    let status: String = row.get(4)?;
    Ok(Machine {
        id: row.get(0)?,
        code: row.get(1)?,
        name: row.get(2)?,
        location: row.get(3)?,
        status: parse_enum(&status)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

impl VendDb {
    pub fn create_machine(
        &self,
        code: &str,
        name: &str,
        location: &str,
        action: &NewAction,
    ) -> Result<Machine> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_ts();
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err("Begin"))?;
        tx.execute(
            "INSERT INTO machines (id, code, name, location, status, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'OFFLINE', ?5, ?5)",
            params![id, code, name, location, now],
        )
        .map_err(|e| match db_err("Create machine")(e) {
            VendHubError::Conflict(_) => VendHubError::Conflict(format!("Machine code already used: {code}")),
            other => other,
        })?;
        insert_action(&tx, &NewAction { entity_id: id.clone(), ..action.clone() })?;
        tx.commit().map_err(db_err("Commit"))?;
        drop(conn);
        self.get_machine(&id)
    }

    pub fn get_machine(&self, id: &str) -> Result<Machine> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, code, name, location, status, created_at, updated_at FROM machines WHERE id=?1",
            params![id],
            row_to_machine,
        )
        .optional()
        .map_err(db_err("Get machine"))?
        .ok_or_else(|| VendHubError::not_found("Machine", id))
    }

    pub fn list_machines(&self) -> Result<Vec<Machine>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT id, code, name, location, status, created_at, updated_at FROM machines ORDER BY code ASC")
            .map_err(db_err("Prepare"))?;
        let machines = stmt
            .query_map([], row_to_machine)
            .map_err(db_err("Query"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("Read machine"))?;
        Ok(machines)
    }

    /// Set status, returning the previous one.
    pub fn set_machine_status(
        &self,
        id: &str,
        status: MachineStatus,
        action: &NewAction,
    ) -> Result<MachineStatus> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err("Begin"))?;
        let previous: String = tx
            .query_row("SELECT status FROM machines WHERE id=?1", params![id], |r| r.get(0))
            .optional()
            .map_err(db_err("Get machine"))?
            .ok_or_else(|| VendHubError::not_found("Machine", id))?;
        tx.execute(
            "UPDATE machines SET status=?2, updated_at=?3 WHERE id=?1",
            params![id, status.as_str(), now_ts()],
        )
        .map_err(db_err("Update machine"))?;
        insert_action(&tx, action)?;
        tx.commit().map_err(db_err("Commit"))?;
        previous.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_machine_crud() {
        let db = VendDb::in_memory().unwrap();
        let act = NewAction::new("u", "machine.created", "machine", "");
        let m = db.create_machine("VM-002", "Lobby", "Tashkent City", &act).unwrap();
        db.create_machine("VM-001", "Office", "Chilonzor", &act).unwrap();
        assert_eq!(m.status, MachineStatus::Offline);

        let all = db.list_machines().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].code, "VM-001");

        let err = db.create_machine("VM-001", "Dup", "", &act).unwrap_err();
        assert!(matches!(err, VendHubError::Conflict(_)));
    }

    #[test]
    fn test_set_status_returns_previous() {
        let db = VendDb::in_memory().unwrap();
        let act = NewAction::new("u", "machine.status", "machine", "");
        let m = db.create_machine("VM-1", "A", "", &act).unwrap();
        let prev = db.set_machine_status(&m.id, MachineStatus::Online, &act).unwrap();
        assert_eq!(prev, MachineStatus::Offline);
        assert_eq!(db.get_machine(&m.id).unwrap().status, MachineStatus::Online);

        let err = db.set_machine_status("nope", MachineStatus::Error, &act).unwrap_err();
        assert!(matches!(err, VendHubError::NotFound { .. }));
    }
}
