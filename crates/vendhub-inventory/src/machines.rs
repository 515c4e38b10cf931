//! Machine fleet operations.

use std::sync::Arc;

use serde_json::json;
use vendhub_core::error::{Result, VendHubError};
use vendhub_core::types::{Actor, Machine, MachineStatus};
use vendhub_db::{NewAction, VendDb};
use vendhub_notify::{Event, EventHub};

#[derive(Clone)]
pub struct MachineService {
    db: Arc<VendDb>,
    hub: EventHub,
}

fn require_machines(actor: &Actor) -> Result<()> {
    if actor.role.can_manage_machines() {
        Ok(())
    } else {
        Err(VendHubError::forbidden(format!("{} cannot manage machines", actor.role)))
    }
}

impl MachineService {
    pub fn new(db: Arc<VendDb>, hub: EventHub) -> Self {
        Self { db, hub }
    }

    pub fn create_machine(&self, actor: &Actor, code: &str, name: &str, location: &str) -> Result<Machine> {
        require_machines(actor)?;
        let (code, name) = (code.trim(), name.trim());
        if code.is_empty() || name.is_empty() {
            return Err(VendHubError::validation("Machine code and name are required"));
        }
        let action = NewAction::new(&actor.user_id, "machine.created", "machine", "")
            .with_details(json!({ "code": code, "name": name }));
        let machine = self.db.create_machine(code, name, location.trim(), &action)?;
        tracing::info!("🏪 Machine {} '{}' registered", machine.code, machine.name);
        Ok(machine)
    }

    pub fn get_machine(&self, id: &str) -> Result<Machine> {
        self.db.get_machine(id)
    }

    pub fn list_machines(&self) -> Result<Vec<Machine>> {
        self.db.list_machines()
    }

    /// Change status. An unchanged status is a no-op: nothing logged or published.
    pub fn set_machine_status(&self, actor: &Actor, id: &str, status: MachineStatus) -> Result<Machine> {
        require_machines(actor)?;
        let current = self.db.get_machine(id)?;
        if current.status == status {
            return Ok(current);
        }
        let action = NewAction::new(&actor.user_id, "machine.status_changed", "machine", id)
            .with_details(json!({ "from": current.status, "to": status }));
        let previous = self.db.set_machine_status(id, status, &action)?;
        let machine = self.db.get_machine(id)?;
        tracing::info!("🔧 Machine {} status {previous} → {status}", machine.code);
        self.hub.publish(
            Event::MachineStatusChanged {
                machine: machine.clone(),
                previous,
            },
            &actor.user_id,
        );
        Ok(machine)
    }
}
