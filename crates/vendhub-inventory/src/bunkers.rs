//! Bunker inventory operations.

use std::sync::Arc;

use serde_json::json;
use vendhub_core::error::{Result, VendHubError};
use vendhub_core::types::{Actor, Bunker, InventoryMovement};
use vendhub_db::{NewAction, VendDb};
use vendhub_notify::{Event, EventHub};

#[derive(Clone)]
pub struct InventoryService {
    db: Arc<VendDb>,
    hub: EventHub,
    low_stock_percent: f64,
}

fn require_inventory(actor: &Actor) -> Result<()> {
    if actor.role.can_manage_inventory() {
        Ok(())
    } else {
        Err(VendHubError::forbidden(format!("{} cannot manage inventory", actor.role)))
    }
}

fn bunker_action(actor: &Actor, action: &str, id: &str) -> NewAction {
    NewAction::new(&actor.user_id, action, "bunker", id)
}

impl InventoryService {
    pub fn new(db: Arc<VendDb>, hub: EventHub, low_stock_percent: f64) -> Self {
        Self {
            db,
            hub,
            low_stock_percent,
        }
    }

    pub fn low_stock_percent(&self) -> f64 {
        self.low_stock_percent
    }

    fn alert_low(&self, bunker: &Bunker, actor: &Actor) {
        tracing::warn!(
            "⚠️ Bunker {} ({}) low: {:.0}%",
            bunker.code,
            bunker.ingredient,
            bunker.fill_percent()
        );
        self.hub.publish(Event::LowStock { bunker: bunker.clone() }, &actor.user_id);
    }

    pub fn create_bunker(
        &self,
        actor: &Actor,
        code: &str,
        ingredient: &str,
        capacity_grams: f64,
    ) -> Result<Bunker> {
        require_inventory(actor)?;
        let (code, ingredient) = (code.trim(), ingredient.trim());
        if code.is_empty() || ingredient.is_empty() {
            return Err(VendHubError::validation("Bunker code and ingredient are required"));
        }
        let action = bunker_action(actor, "bunker.created", "")
            .with_details(json!({ "code": code, "ingredient": ingredient, "capacity_grams": capacity_grams }));
        let bunker = self.db.create_bunker(code, ingredient, capacity_grams, &action)?;
        tracing::info!("📦 Bunker {} ({}) registered", bunker.code, bunker.ingredient);
        Ok(bunker)
    }

    pub fn get_bunker(&self, id: &str) -> Result<Bunker> {
        self.db.get_bunker(id)
    }

    pub fn list_bunkers(&self) -> Result<Vec<Bunker>> {
        self.db.list_bunkers()
    }

    pub fn low_stock(&self) -> Result<Vec<Bunker>> {
        self.db.low_stock(self.low_stock_percent)
    }

    pub fn movements(&self, id: &str) -> Result<Vec<InventoryMovement>> {
        self.db.list_movements(id)
    }

    pub fn fill(&self, actor: &Actor, id: &str, grams: f64) -> Result<Bunker> {
        require_inventory(actor)?;
        let action = bunker_action(actor, "bunker.filled", id).with_details(json!({ "grams": grams }));
        let bunker = self.db.fill_bunker(id, grams, &actor.user_id, &action)?;
        tracing::info!("📦 Bunker {} filled +{grams} g → {} g", bunker.code, bunker.current_grams);
        Ok(bunker)
    }

    pub fn install(&self, actor: &Actor, id: &str, machine_id: &str) -> Result<Bunker> {
        require_inventory(actor)?;
        let action =
            bunker_action(actor, "bunker.installed", id).with_details(json!({ "machine_id": machine_id }));
        let bunker = self.db.install_bunker(id, machine_id, &actor.user_id, &action)?;
        tracing::info!("📦 Bunker {} installed in machine {machine_id}", bunker.code);
        if bunker.is_low(self.low_stock_percent) {
            self.alert_low(&bunker, actor);
        }
        Ok(bunker)
    }

    pub fn remove(&self, actor: &Actor, id: &str) -> Result<Bunker> {
        require_inventory(actor)?;
        let action = bunker_action(actor, "bunker.removed", id);
        let bunker = self.db.remove_bunker(id, &actor.user_id, &action)?;
        tracing::info!("📦 Bunker {} returned to warehouse", bunker.code);
        Ok(bunker)
    }

    /// Any staff member may record a weighing.
    pub fn weigh(&self, actor: &Actor, id: &str, weight_grams: f64) -> Result<Bunker> {
        if !actor.role.can_execute_tasks() {
            return Err(VendHubError::forbidden("Cannot record weights"));
        }
        let action =
            bunker_action(actor, "bunker.weighed", id).with_details(json!({ "weight_grams": weight_grams }));
        let weighing = self.db.weigh_bunker(id, weight_grams, &actor.user_id, &action)?;
        if weighing.crossed_below(self.low_stock_percent) {
            self.alert_low(&weighing.after, actor);
        }
        Ok(weighing.after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vendhub_core::types::{BunkerLocation, MovementKind, Role};

    fn setup() -> (InventoryService, EventHub, Actor, Actor) {
        let db = Arc::new(VendDb::in_memory().unwrap());
        let hub = EventHub::default();
        let svc = InventoryService::new(db, hub.clone(), 20.0);
        (svc, hub, Actor::new("wh-1", Role::Warehouse), Actor::new("drv-1", Role::Driver))
    }

    #[test]
    fn test_permissions() {
        let (svc, _, warehouse, driver) = setup();
        assert!(matches!(
            svc.create_bunker(&driver, "B-1", "sugar", 1000.0),
            Err(VendHubError::Forbidden(_))
        ));
        let b = svc.create_bunker(&warehouse, "B-1", "sugar", 1000.0).unwrap();
        assert!(matches!(svc.fill(&driver, &b.id, 10.0), Err(VendHubError::Forbidden(_))));
        // Weighing is open to every role
        svc.weigh(&driver, &b.id, 0.0).unwrap();
    }

    #[test]
    fn test_weighing_below_threshold_publishes_low_stock() {
        let (svc, hub, warehouse, driver) = setup();
        let b = svc.create_bunker(&warehouse, "B-1", "milk", 1000.0).unwrap();
        svc.fill(&warehouse, &b.id, 900.0).unwrap();
        assert!(hub.history(None, 10).is_empty());

        svc.weigh(&driver, &b.id, 100.0).unwrap();
        let history = hub.history(None, 10);
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].event.name(), "inventory.low_stock");
        assert_eq!(svc.low_stock().unwrap().len(), 1);

        // Still low: no second alert until the level recovers
        svc.weigh(&driver, &b.id, 50.0).unwrap();
        assert_eq!(hub.history(None, 10).len(), 1);
        svc.weigh(&driver, &b.id, 500.0).unwrap();
        svc.weigh(&driver, &b.id, 150.0).unwrap();
        assert_eq!(hub.history(None, 10).len(), 2);
    }

    #[test]
    fn test_install_and_remove() {
        let (svc, _, warehouse, _) = setup();
        let machine = svc
            .db
            .create_machine("VM-1", "Lobby", "", &NewAction::new("s", "machine.created", "machine", ""))
            .unwrap();
        let b = svc.create_bunker(&warehouse, "B-1", "coffee", 2000.0).unwrap();
        svc.fill(&warehouse, &b.id, 2000.0).unwrap();
        let b = svc.install(&warehouse, &b.id, &machine.id).unwrap();
        assert_eq!(b.location, BunkerLocation::Machine(machine.id.clone()));
        let b = svc.remove(&warehouse, &b.id).unwrap();
        assert_eq!(b.location, BunkerLocation::Warehouse);

        let kinds: Vec<MovementKind> = svc.movements(&b.id).unwrap().iter().map(|m| m.kind).collect();
        assert_eq!(kinds, vec![MovementKind::Fill, MovementKind::Install, MovementKind::Remove]);
    }

    #[test]
    fn test_blank_code_rejected() {
        let (svc, _, warehouse, _) = setup();
        assert!(matches!(
            svc.create_bunker(&warehouse, " ", "x", 10.0),
            Err(VendHubError::Validation(_))
        ));
    }
}
