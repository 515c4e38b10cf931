//! Bunkers and inventory movements.

use rusqlite::{Connection, OptionalExtension, params};
use vendhub_core::error::{Result, VendHubError};
use vendhub_core::types::{Bunker, BunkerLocation, InventoryMovement, MovementKind};

use crate::action_log::{NewAction, insert_action};
use crate::{VendDb, db_err, now_ts, parse_enum};

const BUNKER_COLUMNS: &str = "id, code, ingredient, capacity_grams, current_grams, machine_id, updated_at";

fn row_to_bunker(row: &rusqlite::Row) -> rusqlite::Result<Bunker> {
    let machine_id: Option<String> = row.get(5)?;
    Ok(Bunker {
        id: row.get(0)?,
        code: row.get(1)?,
        ingredient: row.get(2)?,
        capacity_grams: row.get(3)?,
        current_grams: row.get(4)?,
        location: machine_id.map_or(BunkerLocation::Warehouse, BunkerLocation::Machine),
        updated_at: row.get(6)?,
    })
}

fn row_to_movement(row: &rusqlite::Row) -> rusqlite::Result<InventoryMovement> {
    let kind: String = row.get(2)?;
    Ok(InventoryMovement {
        id: row.get(0)?,
        bunker_id: row.get(1)?,
        kind: parse_enum(&kind)?,
        delta_grams: row.get(3)?,
        weight_after: row.get(4)?,
        machine_id: row.get(5)?,
        actor_id: row.get(6)?,
        created_at: row.get(7)?,
    })
}

fn load_bunker(conn: &Connection, id: &str) -> Result<Bunker> {
    conn.query_row(
        &format!("SELECT {BUNKER_COLUMNS} FROM bunkers WHERE id=?1"),
        params![id],
        row_to_bunker,
    )
    .optional()
    .map_err(db_err("Get bunker"))?
    .ok_or_else(|| VendHubError::not_found("Bunker", id))
}

fn insert_movement(
    conn: &Connection,
    bunker_id: &str,
    kind: MovementKind,
    delta: f64,
    weight_after: f64,
    machine_id: Option<&str>,
    actor_id: &str,
) -> Result<()> {
    conn.execute(
        "INSERT INTO inventory_movements (bunker_id, kind, delta_grams, weight_after, machine_id, actor_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![bunker_id, kind.as_str(), delta, weight_after, machine_id, actor_id, now_ts()],
    )
    .map_err(db_err("Record movement"))?;
    Ok(())
}

/// A bunker before and after a recorded weight.
#[derive(Debug, Clone)]
pub struct Weighing {
    pub before: Bunker,
    pub after: Bunker,
}

impl Weighing {
    /// True only when this weighing took the bunker below the threshold.
    pub fn crossed_below(&self, low_stock_percent: f64) -> bool {
        self.after.is_low(low_stock_percent) && !self.before.is_low(low_stock_percent)
    }
}

/// Record a measured weight. A drop while installed counts as consumption.
pub(crate) fn record_weighing(conn: &Connection, bunker_id: &str, weight: f64, actor_id: &str) -> Result<Weighing> {
    if !weight.is_finite() || weight < 0.0 {
        return Err(VendHubError::validation("Weight must be a non-negative number"));
    }
    let bunker = load_bunker(conn, bunker_id)?;
    if weight > bunker.capacity_grams {
        return Err(VendHubError::validation(format!(
            "Weight exceeds capacity ({weight} > {} g)",
            bunker.capacity_grams
        )));
    }
    let delta = weight - bunker.current_grams;
    let kind = match bunker.location {
        BunkerLocation::Machine(_) if delta < 0.0 => MovementKind::Consume,
        _ => MovementKind::Weighing,
    };
    conn.execute(
        "UPDATE bunkers SET current_grams=?2, updated_at=?3 WHERE id=?1",
        params![bunker_id, weight, now_ts()],
    )
    .map_err(db_err("Update bunker"))?;
    insert_movement(conn, bunker_id, kind, delta, weight, bunker.location.machine_id(), actor_id)?;
    let after = load_bunker(conn, bunker_id)?;
    Ok(Weighing { before: bunker, after })
}

impl VendDb {
    /// Register an empty bunker in the warehouse.
    pub fn create_bunker(
        &self,
        code: &str,
        ingredient: &str,
        capacity_grams: f64,
        action: &NewAction,
    ) -> Result<Bunker> {
        if !capacity_grams.is_finite() || capacity_grams <= 0.0 {
            return Err(VendHubError::validation("Capacity must be positive"));
        }
        let id = uuid::Uuid::new_v4().to_string();
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err("Begin"))?;
        tx.execute(
            "INSERT INTO bunkers (id, code, ingredient, capacity_grams, current_grams, updated_at)
             VALUES (?1, ?2, ?3, ?4, 0, ?5)",
            params![id, code, ingredient, capacity_grams, now_ts()],
        )
        .map_err(|e| match db_err("Create bunker")(e) {
            VendHubError::Conflict(_) => VendHubError::Conflict(format!("Bunker code already used: {code}")),
            other => other,
        })?;
        insert_action(&tx, &NewAction { entity_id: id.clone(), ..action.clone() })?;
        let bunker = load_bunker(&tx, &id)?;
        tx.commit().map_err(db_err("Commit"))?;
        Ok(bunker)
    }

    pub fn get_bunker(&self, id: &str) -> Result<Bunker> {
        let conn = self.lock()?;
        load_bunker(&conn, id)
    }

    pub fn list_bunkers(&self) -> Result<Vec<Bunker>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!("SELECT {BUNKER_COLUMNS} FROM bunkers ORDER BY code ASC"))
            .map_err(db_err("Prepare"))?;
        let bunkers = stmt
            .query_map([], row_to_bunker)
            .map_err(db_err("Query"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("Read bunker"))?;
        Ok(bunkers)
    }

    /// Bunkers filled below `percent` of their capacity.
    pub fn low_stock(&self, percent: f64) -> Result<Vec<Bunker>> {
        Ok(self
            .list_bunkers()?
            .into_iter()
            .filter(|b| b.fill_percent() < percent)
            .collect())
    }

    /// Add ingredient to a bunker. Only bunkers in the warehouse can be filled.
    pub fn fill_bunker(&self, id: &str, grams: f64, actor_id: &str, action: &NewAction) -> Result<Bunker> {
        if !grams.is_finite() || grams <= 0.0 {
            return Err(VendHubError::validation("Fill amount must be positive"));
        }
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err("Begin"))?;
        let bunker = load_bunker(&tx, id)?;
        if bunker.location != BunkerLocation::Warehouse {
            return Err(VendHubError::Conflict(format!(
                "Bunker {} is installed; remove it to the warehouse before filling",
                bunker.code
            )));
        }
        let after = bunker.current_grams + grams;
        if after > bunker.capacity_grams {
            return Err(VendHubError::validation(format!(
                "Fill would exceed capacity ({after} > {} g)",
                bunker.capacity_grams
            )));
        }
        tx.execute(
            "UPDATE bunkers SET current_grams=?2, updated_at=?3 WHERE id=?1",
            params![id, after, now_ts()],
        )
        .map_err(db_err("Fill bunker"))?;
        insert_movement(&tx, id, MovementKind::Fill, grams, after, None, actor_id)?;
        insert_action(&tx, action)?;
        let bunker = load_bunker(&tx, id)?;
        tx.commit().map_err(db_err("Commit"))?;
        Ok(bunker)
    }

    /// Move a warehouse bunker into a machine.
    pub fn install_bunker(&self, id: &str, machine_id: &str, actor_id: &str, action: &NewAction) -> Result<Bunker> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err("Begin"))?;
        let bunker = load_bunker(&tx, id)?;
        if let BunkerLocation::Machine(current) = &bunker.location {
            return Err(VendHubError::Conflict(format!(
                "Bunker {} is already installed in machine {current}",
                bunker.code
            )));
        }
        let exists: Option<String> = tx
            .query_row("SELECT id FROM machines WHERE id=?1", params![machine_id], |r| r.get(0))
            .optional()
            .map_err(db_err("Get machine"))?;
        if exists.is_none() {
            return Err(VendHubError::not_found("Machine", machine_id));
        }
        tx.execute(
            "UPDATE bunkers SET machine_id=?2, updated_at=?3 WHERE id=?1",
            params![id, machine_id, now_ts()],
        )
        .map_err(db_err("Install bunker"))?;
        insert_movement(&tx, id, MovementKind::Install, 0.0, bunker.current_grams, Some(machine_id), actor_id)?;
        insert_action(&tx, action)?;
        let bunker = load_bunker(&tx, id)?;
        tx.commit().map_err(db_err("Commit"))?;
        Ok(bunker)
    }

    /// Take a bunker out of its machine back to the warehouse.
    pub fn remove_bunker(&self, id: &str, actor_id: &str, action: &NewAction) -> Result<Bunker> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err("Begin"))?;
        let bunker = load_bunker(&tx, id)?;
        let Some(machine_id) = bunker.location.machine_id().map(str::to_string) else {
            return Err(VendHubError::Conflict(format!("Bunker {} is already in the warehouse", bunker.code)));
        };
        tx.execute(
            "UPDATE bunkers SET machine_id=NULL, updated_at=?2 WHERE id=?1",
            params![id, now_ts()],
        )
        .map_err(db_err("Remove bunker"))?;
        insert_movement(&tx, id, MovementKind::Remove, 0.0, bunker.current_grams, Some(&machine_id), actor_id)?;
        insert_action(&tx, action)?;
        let bunker = load_bunker(&tx, id)?;
        tx.commit().map_err(db_err("Commit"))?;
        Ok(bunker)
    }

    /// Record a standalone weighing.
    pub fn weigh_bunker(&self, id: &str, weight: f64, actor_id: &str, action: &NewAction) -> Result<Weighing> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err("Begin"))?;
        let weighing = record_weighing(&tx, id, weight, actor_id)?;
        insert_action(&tx, action)?;
        tx.commit().map_err(db_err("Commit"))?;
        Ok(weighing)
    }

    /// Movement history of a bunker, oldest first.
    pub fn list_movements(&self, bunker_id: &str) -> Result<Vec<InventoryMovement>> {
        let conn = self.lock()?;
        load_bunker(&conn, bunker_id)?;
        let mut stmt = conn
            .prepare(
                "SELECT id, bunker_id, kind, delta_grams, weight_after, machine_id, actor_id, created_at
                 FROM inventory_movements WHERE bunker_id=?1 ORDER BY id ASC",
            )
            .map_err(db_err("Prepare"))?;
        let movements = stmt
            .query_map(params![bunker_id], row_to_movement)
            .map_err(db_err("Query"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("Read movement"))?;
        Ok(movements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn act(action: &str) -> NewAction {
        NewAction::new("wh", action, "bunker", "")
    }

    fn setup() -> (VendDb, Bunker, String) {
        let db = VendDb::in_memory().unwrap();
        let bunker = db.create_bunker("B-01", "coffee beans", 2000.0, &act("bunker.created")).unwrap();
        let machine = db
            .create_machine("VM-1", "Lobby", "", &NewAction::new("wh", "machine.created", "machine", ""))
            .unwrap();
        (db, bunker, machine.id)
    }

    #[test]
    fn test_fill_respects_capacity() {
        let (db, b, _) = setup();
        assert_eq!(b.location, BunkerLocation::Warehouse);
        let b = db.fill_bunker(&b.id, 1500.0, "wh", &act("bunker.filled")).unwrap();
        assert!((b.current_grams - 1500.0).abs() < 1e-9);

        let err = db.fill_bunker(&b.id, 600.0, "wh", &act("bunker.filled")).unwrap_err();
        assert!(matches!(err, VendHubError::Validation(_)));
        assert!(db.fill_bunker(&b.id, -5.0, "wh", &act("bunker.filled")).is_err());
        assert!((db.get_bunker(&b.id).unwrap().current_grams - 1500.0).abs() < 1e-9);
    }

    #[test]
    fn test_install_remove_cycle() {
        let (db, b, machine_id) = setup();
        db.fill_bunker(&b.id, 1000.0, "wh", &act("bunker.filled")).unwrap();
        let b = db.install_bunker(&b.id, &machine_id, "wh", &act("bunker.installed")).unwrap();
        assert_eq!(b.location.machine_id(), Some(machine_id.as_str()));

        // Installed bunkers can't be filled or installed twice
        assert!(matches!(
            db.fill_bunker(&b.id, 10.0, "wh", &act("bunker.filled")),
            Err(VendHubError::Conflict(_))
        ));
        assert!(db.install_bunker(&b.id, &machine_id, "wh", &act("bunker.installed")).is_err());

        let b = db.remove_bunker(&b.id, "wh", &act("bunker.removed")).unwrap();
        assert_eq!(b.location, BunkerLocation::Warehouse);
        assert!(db.remove_bunker(&b.id, "wh", &act("bunker.removed")).is_err());

        let kinds: Vec<MovementKind> = db.list_movements(&b.id).unwrap().into_iter().map(|m| m.kind).collect();
        assert_eq!(kinds, vec![MovementKind::Fill, MovementKind::Install, MovementKind::Remove]);
    }

    #[test]
    fn test_install_into_unknown_machine() {
        let (db, b, _) = setup();
        let err = db.install_bunker(&b.id, "ghost", "wh", &act("bunker.installed")).unwrap_err();
        assert!(matches!(err, VendHubError::NotFound { .. }));
    }

    #[test]
    fn test_weighing_records_consumption_when_installed() {
        let (db, b, machine_id) = setup();
        db.fill_bunker(&b.id, 1800.0, "wh", &act("bunker.filled")).unwrap();
        db.weigh_bunker(&b.id, 1790.0, "wh", &act("bunker.weighed")).unwrap();
        db.install_bunker(&b.id, &machine_id, "wh", &act("bunker.installed")).unwrap();
        let w = db.weigh_bunker(&b.id, 300.0, "op", &act("bunker.weighed")).unwrap();
        assert!((w.before.current_grams - 1790.0).abs() < 1e-9);
        let b = w.after;
        assert!((b.current_grams - 300.0).abs() < 1e-9);

        let movements = db.list_movements(&b.id).unwrap();
        assert_eq!(movements[1].kind, MovementKind::Weighing);
        let last = movements.last().unwrap();
        assert_eq!(last.kind, MovementKind::Consume);
        assert!((last.delta_grams + 1490.0).abs() < 1e-9);
        assert_eq!(last.machine_id.as_deref(), Some(machine_id.as_str()));

        assert!(db.weigh_bunker(&b.id, -1.0, "op", &act("bunker.weighed")).is_err());
    }

    #[test]
    fn test_weighing_above_capacity_rejected() {
        let (db, b, _) = setup();
        let over = b.capacity_grams + 1.0;
        let err = db.weigh_bunker(&b.id, over, "op", &act("bunker.weighed")).unwrap_err();
        assert!(matches!(err, VendHubError::Validation(_)));
        assert!(db.list_movements(&b.id).unwrap().is_empty());

        let w = db.weigh_bunker(&b.id, b.capacity_grams, "op", &act("bunker.weighed")).unwrap();
        assert!((w.after.fill_percent() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_weighing_crosses_threshold_once() {
        let (db, b, _) = setup();
        let cap = b.capacity_grams;
        db.fill_bunker(&b.id, cap, "wh", &act("bunker.filled")).unwrap();
        let first = db.weigh_bunker(&b.id, cap * 0.1, "op", &act("bunker.weighed")).unwrap();
        assert!(first.crossed_below(20.0));
        let second = db.weigh_bunker(&b.id, cap * 0.05, "op", &act("bunker.weighed")).unwrap();
        assert!(!second.crossed_below(20.0));
    }

    #[test]
    fn test_low_stock() {
        let (db, b, _) = setup();
        let full = db.create_bunker("B-02", "milk powder", 1000.0, &act("bunker.created")).unwrap();
        db.fill_bunker(&full.id, 900.0, "wh", &act("bunker.filled")).unwrap();
        db.fill_bunker(&b.id, 100.0, "wh", &act("bunker.filled")).unwrap();

        let low = db.low_stock(20.0).unwrap();
        assert_eq!(low.len(), 1);
        assert_eq!(low[0].code, "B-01");
    }
}
