//! Events, rooms and the envelope that carries an event to its rooms.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use vendhub_core::error::VendHubError;
use vendhub_core::types::{Bunker, Machine, MachineStatus, Role, Task};

/// A fan-out target. Serialized as `role:MANAGER`, `user:<id>` or `all`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Room {
    Role(Role),
    User(String),
    All,
}

impl Room {
    /// Rooms a connection joins automatically.
    pub fn defaults_for(user_id: &str, role: Role) -> Vec<Room> {
        vec![Room::Role(role), Room::User(user_id.to_string()), Room::All]
    }

    /// Whether a user may join this room. Admins may join any room.
    pub fn allowed_for(&self, user_id: &str, role: Role) -> bool {
        if role == Role::Admin {
            return true;
        }
        match self {
            Room::Role(r) => *r == role,
            Room::User(id) => id == user_id,
            Room::All => true,
        }
    }
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Room::Role(r) => write!(f, "role:{}", r.as_str()),
            Room::User(id) => write!(f, "user:{id}"),
            Room::All => f.write_str("all"),
        }
    }
}

impl FromStr for Room {
    type Err = VendHubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(Room::All);
        }
        match s.split_once(':') {
            Some(("role", role)) => Ok(Room::Role(role.parse()?)),
            Some(("user", id)) if !id.is_empty() => Ok(Room::User(id.to_string())),
            _ => Err(VendHubError::validation(format!("Unknown room: {s}"))),
        }
    }
}

impl From<Room> for String {
    fn from(room: Room) -> Self {
        room.to_string()
    }
}

impl TryFrom<String> for Room {
    type Error = VendHubError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

/// Something that happened in the back office.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    TaskCreated { task: Task },
    TaskAssigned { task: Task },
    TaskStarted { task: Task },
    StepCompleted { task: Task, position: u32, step_title: String },
    TaskCompleted { task: Task },
    TaskCancelled { task: Task },
    MachineStatusChanged { machine: Machine, previous: MachineStatus },
    LowStock { bunker: Bunker },
}

impl Event {
    /// Dotted name, matching the action-log vocabulary.
    pub fn name(&self) -> &'static str {
        match self {
            Event::TaskCreated { .. } => "task.created",
            Event::TaskAssigned { .. } => "task.assigned",
            Event::TaskStarted { .. } => "task.started",
            Event::StepCompleted { .. } => "task.step_completed",
            Event::TaskCompleted { .. } => "task.completed",
            Event::TaskCancelled { .. } => "task.cancelled",
            Event::MachineStatusChanged { .. } => "machine.status_changed",
            Event::LowStock { .. } => "inventory.low_stock",
        }
    }

    pub fn task(&self) -> Option<&Task> {
        match self {
            Event::TaskCreated { task }
            | Event::TaskAssigned { task }
            | Event::TaskStarted { task }
            | Event::StepCompleted { task, .. }
            | Event::TaskCompleted { task }
            | Event::TaskCancelled { task } => Some(task),
            _ => None,
        }
    }

    /// Rooms this event is delivered to.
    pub fn rooms(&self) -> Vec<Room> {
        match self {
            Event::MachineStatusChanged { .. } => vec![
                Room::Role(Role::Admin),
                Room::Role(Role::Manager),
                Room::Role(Role::Technician),
            ],
            Event::LowStock { .. } => vec![
                Room::Role(Role::Admin),
                Room::Role(Role::Manager),
                Room::Role(Role::Warehouse),
            ],
            _ => {
                let mut rooms = vec![Room::Role(Role::Admin), Room::Role(Role::Manager)];
                if let Some(assignee) = self.task().and_then(|t| t.assigned_to.as_ref()) {
                    rooms.push(Room::User(assignee.clone()));
                }
                rooms
            }
        }
    }

    /// One-line human summary, used for history and chat pushes.
    pub fn summary(&self) -> String {
        match self {
            Event::TaskCreated { task } => format!("🆕 New task: {} [{}]", task.title, task.priority),
            Event::TaskAssigned { task } => format!("📌 Task assigned to you: {}", task.title),
            Event::TaskStarted { task } => format!("▶️ Task started: {}", task.title),
            Event::StepCompleted { task, position, step_title } => {
                format!("✔️ {}: step {position} done ({step_title})", task.title)
            }
            Event::TaskCompleted { task } => format!("✅ Task completed: {}", task.title),
            Event::TaskCancelled { task } => format!(
                "❌ Task cancelled: {} ({})",
                task.title,
                task.cancel_reason.as_deref().unwrap_or("no reason")
            ),
            Event::MachineStatusChanged { machine, previous } => format!(
                "🔧 Machine {} {}: {previous} → {}",
                machine.code, machine.name, machine.status
            ),
            Event::LowStock { bunker } => format!(
                "⚠️ Low stock: {} ({}) at {:.0}%",
                bunker.code,
                bunker.ingredient,
                bunker.fill_percent()
            ),
        }
    }
}

/// An event stamped with its sequence number, author and resolved rooms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub seq: u64,
    pub event: Event,
    pub rooms: Vec<Room>,
    pub actor_id: String,
    pub summary: String,
    pub at: DateTime<Utc>,
}

impl Envelope {
    pub fn is_for(&self, rooms: &std::collections::HashSet<Room>) -> bool {
        self.rooms.iter().any(|r| rooms.contains(r))
    }

    /// Users addressed directly, excluding whoever caused the event.
    pub fn direct_recipients(&self) -> impl Iterator<Item = &str> {
        self.rooms.iter().filter_map(move |r| match r {
            Room::User(id) if *id != self.actor_id => Some(id.as_str()),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vendhub_core::types::{TaskPriority, TaskStatus, TaskType};

    fn sample_task(assigned_to: Option<&str>) -> Task {
        let now = Utc::now();
        Task {
            id: "t-1".into(),
            title: "Refill VM-7".into(),
            description: String::new(),
            task_type: TaskType::Refill,
            status: TaskStatus::Created,
            priority: TaskPriority::High,
            machine_id: None,
            assigned_to: assigned_to.map(str::to_string),
            created_by: "mgr".into(),
            template_id: None,
            due_at: None,
            started_at: None,
            completed_at: None,
            cancel_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_room_parse_and_display() {
        assert_eq!("role:manager".parse::<Room>().unwrap(), Room::Role(Role::Manager));
        assert_eq!("user:u-1".parse::<Room>().unwrap(), Room::User("u-1".into()));
        assert_eq!("ALL".parse::<Room>().unwrap(), Room::All);
        assert!("user:".parse::<Room>().is_err());
        assert!("team:x".parse::<Room>().is_err());
        assert_eq!(Room::Role(Role::Warehouse).to_string(), "role:WAREHOUSE");

        let json = serde_json::to_string(&Room::User("u-9".into())).unwrap();
        assert_eq!(json, "\"user:u-9\"");
    }

    #[test]
    fn test_room_permissions() {
        assert!(Room::Role(Role::Driver).allowed_for("a", Role::Admin));
        assert!(Room::Role(Role::Driver).allowed_for("d", Role::Driver));
        assert!(!Room::Role(Role::Manager).allowed_for("d", Role::Driver));
        assert!(!Room::User("x".into()).allowed_for("d", Role::Operator));
        assert!(Room::User("d".into()).allowed_for("d", Role::Operator));
    }

    #[test]
    fn test_task_event_routing() {
        let rooms = Event::TaskCreated { task: sample_task(Some("op-1")) }.rooms();
        assert_eq!(
            rooms,
            vec![Room::Role(Role::Admin), Room::Role(Role::Manager), Room::User("op-1".into())]
        );
        let rooms = Event::TaskCreated { task: sample_task(None) }.rooms();
        assert_eq!(rooms.len(), 2);
    }

    #[test]
    fn test_event_serializes_with_kind_tag() {
        let event = Event::TaskStarted { task: sample_task(None) };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["kind"], "task_started");
        assert_eq!(json["task"]["status"], "CREATED");
        assert_eq!(event.name(), "task.started");
    }

    #[test]
    fn test_direct_recipients_skip_actor() {
        let event = Event::TaskAssigned { task: sample_task(Some("op-1")) };
        let mut env = Envelope {
            seq: 1,
            rooms: event.rooms(),
            summary: event.summary(),
            event,
            actor_id: "mgr".into(),
            at: Utc::now(),
        };
        assert_eq!(env.direct_recipients().collect::<Vec<_>>(), vec!["op-1"]);
        env.actor_id = "op-1".into();
        assert_eq!(env.direct_recipients().count(), 0);
    }
}
