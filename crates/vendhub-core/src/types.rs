//! Domain types: users, machines, tasks, checklists, bunkers and audit entries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::VendHubError;

// ── Roles ──────────────────────────────

/// Staff role. Gates both the HTTP API and the Telegram keyboards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Admin,
    Manager,
    Warehouse,
    Operator,
    Technician,
    Driver,
}

impl Role {
    pub const ALL: [Role; 6] = [
        Role::Admin,
        Role::Manager,
        Role::Warehouse,
        Role::Operator,
        Role::Technician,
        Role::Driver,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "ADMIN",
            Role::Manager => "MANAGER",
            Role::Warehouse => "WAREHOUSE",
            Role::Operator => "OPERATOR",
            Role::Technician => "TECHNICIAN",
            Role::Driver => "DRIVER",
        }
    }

    pub fn can_manage_users(&self) -> bool {
        matches!(self, Role::Admin)
    }

    /// Create, assign and cancel any task; edit checklist templates.
    pub fn can_manage_tasks(&self) -> bool {
        matches!(self, Role::Admin | Role::Manager)
    }

    pub fn can_manage_inventory(&self) -> bool {
        matches!(self, Role::Admin | Role::Manager | Role::Warehouse)
    }

    pub fn can_manage_machines(&self) -> bool {
        matches!(self, Role::Admin | Role::Manager | Role::Technician)
    }

    pub fn can_execute_tasks(&self) -> bool {
        true
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = VendHubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|r| r.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| VendHubError::validation(format!("Unknown role: {s}")))
    }
}

/// The authenticated caller of a service operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub user_id: String,
    pub role: Role,
}

impl Actor {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }

    /// Internal actor used by seeding and background jobs.
    pub fn system() -> Self {
        Self::new("system", Role::Admin)
    }
}

// ── Users ──────────────────────────────

/// User record. The password hash lives only in the database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: Role,
    pub telegram_id: Option<i64>,
    pub active: bool,
    pub created_at: String,
    pub updated_at: String,
}

// ── Machines ──────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MachineStatus {
    Online,
    Offline,
    Maintenance,
    Error,
}

impl MachineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MachineStatus::Online => "ONLINE",
            MachineStatus::Offline => "OFFLINE",
            MachineStatus::Maintenance => "MAINTENANCE",
            MachineStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for MachineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MachineStatus {
    type Err = VendHubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ONLINE" => Ok(MachineStatus::Online),
            "OFFLINE" => Ok(MachineStatus::Offline),
            "MAINTENANCE" => Ok(MachineStatus::Maintenance),
            "ERROR" => Ok(MachineStatus::Error),
            _ => Err(VendHubError::validation(format!("Unknown machine status: {s}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Machine {
    pub id: String,
    pub code: String,
    pub name: String,
    pub location: String,
    pub status: MachineStatus,
    pub created_at: String,
    pub updated_at: String,
}

// ── Tasks ──────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    Refill,
    Cleaning,
    CashCollection,
    Repair,
    Inspection,
    Other,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Refill => "REFILL",
            TaskType::Cleaning => "CLEANING",
            TaskType::CashCollection => "CASH_COLLECTION",
            TaskType::Repair => "REPAIR",
            TaskType::Inspection => "INSPECTION",
            TaskType::Other => "OTHER",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = VendHubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "REFILL" => Ok(TaskType::Refill),
            "CLEANING" => Ok(TaskType::Cleaning),
            "CASH_COLLECTION" => Ok(TaskType::CashCollection),
            "REPAIR" => Ok(TaskType::Repair),
            "INSPECTION" => Ok(TaskType::Inspection),
            "OTHER" => Ok(TaskType::Other),
            _ => Err(VendHubError::validation(format!("Unknown task type: {s}"))),
        }
    }
}

/// Task lifecycle state. `Completed` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Created,
    InProgress,
    Completed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Created => "CREATED",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = VendHubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CREATED" => Ok(TaskStatus::Created),
            "IN_PROGRESS" => Ok(TaskStatus::InProgress),
            "COMPLETED" => Ok(TaskStatus::Completed),
            "CANCELLED" => Ok(TaskStatus::Cancelled),
            _ => Err(VendHubError::validation(format!("Unknown task status: {s}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Urgent,
}

impl TaskPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskPriority::Low => "LOW",
            TaskPriority::Medium => "MEDIUM",
            TaskPriority::High => "HIGH",
            TaskPriority::Urgent => "URGENT",
        }
    }

    /// Sort weight stored alongside the label so SQL can order by it.
    pub fn rank(&self) -> i64 {
        match self {
            TaskPriority::Low => 0,
            TaskPriority::Medium => 1,
            TaskPriority::High => 2,
            TaskPriority::Urgent => 3,
        }
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskPriority {
    type Err = VendHubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "LOW" => Ok(TaskPriority::Low),
            "MEDIUM" => Ok(TaskPriority::Medium),
            "HIGH" => Ok(TaskPriority::High),
            "URGENT" => Ok(TaskPriority::Urgent),
            _ => Err(VendHubError::validation(format!("Unknown priority: {s}"))),
        }
    }
}

/// A unit of work against a vending machine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    pub machine_id: Option<String>,
    pub assigned_to: Option<String>,
    pub created_by: String,
    pub template_id: Option<String>,
    pub due_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Past its due date and still open.
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        !self.status.is_terminal() && self.due_at.is_some_and(|due| due < now)
    }
}

/// One checklist step attached to a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChecklistStep {
    pub id: String,
    pub task_id: String,
    pub position: u32,
    pub title: String,
    pub description: String,
    pub required: bool,
    pub requires_photo: bool,
    pub requires_weight: bool,
    pub bunker_id: Option<String>,
    pub completed: bool,
    pub completed_by: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub photo_url: Option<String>,
    pub weight_grams: Option<f64>,
    pub notes: Option<String>,
}

/// Evidence submitted when ticking off a checklist step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepEvidence {
    #[serde(default)]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub weight_grams: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// A task together with its ordered checklist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskDetail {
    #[serde(flatten)]
    pub task: Task,
    pub checklist: Vec<ChecklistStep>,
}

impl TaskDetail {
    /// Positions of required steps not yet completed.
    pub fn missing_required(&self) -> Vec<u32> {
        self.checklist
            .iter()
            .filter(|s| s.required && !s.completed)
            .map(|s| s.position)
            .collect()
    }
}

// ── Templates ──────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateStep {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default)]
    pub requires_photo: bool,
    #[serde(default)]
    pub requires_weight: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChecklistTemplate {
    pub id: String,
    pub name: String,
    pub task_type: TaskType,
    pub steps: Vec<TemplateStep>,
    pub created_at: String,
}

// ── Action log ──────────────────────────────

/// Append-only audit entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionLogEntry {
    pub id: i64,
    pub actor_id: String,
    pub action: String,
    pub entity_type: String,
    pub entity_id: String,
    pub details: Option<serde_json::Value>,
    pub created_at: String,
}

// ── Inventory ──────────────────────────────

/// Where a bunker currently sits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "machine_id", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BunkerLocation {
    Warehouse,
    Machine(String),
}

impl BunkerLocation {
    pub fn machine_id(&self) -> Option<&str> {
        match self {
            BunkerLocation::Warehouse => None,
            BunkerLocation::Machine(id) => Some(id),
        }
    }
}

/// An ingredient container tracked by weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bunker {
    pub id: String,
    pub code: String,
    pub ingredient: String,
    pub capacity_grams: f64,
    pub current_grams: f64,
    pub location: BunkerLocation,
    pub updated_at: String,
}

impl Bunker {
    /// Fill level in percent of capacity.
    pub fn fill_percent(&self) -> f64 {
        if self.capacity_grams <= 0.0 {
            return 0.0;
        }
        (self.current_grams / self.capacity_grams * 100.0).clamp(0.0, 100.0)
    }

    pub fn is_low(&self, low_stock_percent: f64) -> bool {
        self.fill_percent() < low_stock_percent
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementKind {
    Fill,
    Install,
    Remove,
    Weighing,
    Consume,
}

impl MovementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementKind::Fill => "FILL",
            MovementKind::Install => "INSTALL",
            MovementKind::Remove => "REMOVE",
            MovementKind::Weighing => "WEIGHING",
            MovementKind::Consume => "CONSUME",
        }
    }
}

impl FromStr for MovementKind {
    type Err = VendHubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "FILL" => Ok(MovementKind::Fill),
            "INSTALL" => Ok(MovementKind::Install),
            "REMOVE" => Ok(MovementKind::Remove),
            "WEIGHING" => Ok(MovementKind::Weighing),
            "CONSUME" => Ok(MovementKind::Consume),
            _ => Err(VendHubError::validation(format!("Unknown movement kind: {s}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryMovement {
    pub id: i64,
    pub bunker_id: String,
    pub kind: MovementKind,
    pub delta_grams: f64,
    pub weight_after: f64,
    pub machine_id: Option<String>,
    pub actor_id: String,
    pub created_at: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_parse_and_permissions() {
        assert_eq!("manager".parse::<Role>().unwrap(), Role::Manager);
        assert_eq!(" ADMIN ".parse::<Role>().unwrap(), Role::Admin);
        assert!("janitor".parse::<Role>().is_err());

        assert!(Role::Admin.can_manage_users());
        assert!(!Role::Manager.can_manage_users());
        assert!(Role::Manager.can_manage_tasks());
        assert!(!Role::Operator.can_manage_tasks());
        assert!(Role::Warehouse.can_manage_inventory());
        assert!(!Role::Driver.can_manage_inventory());
        assert!(Role::Technician.can_manage_machines());
        assert!(Role::Driver.can_execute_tasks());
    }

    #[test]
    fn test_status_serde_names() {
        let json = serde_json::to_string(&TaskStatus::InProgress).unwrap();
        assert_eq!(json, "\"IN_PROGRESS\"");
        assert_eq!(
            serde_json::to_string(&TaskType::CashCollection).unwrap(),
            "\"CASH_COLLECTION\""
        );
        assert_eq!("in_progress".parse::<TaskStatus>().unwrap(), TaskStatus::InProgress);
        assert!(TaskStatus::Cancelled.is_terminal());
        assert!(!TaskStatus::Created.is_terminal());
    }

    #[test]
    fn test_priority_ordering() {
        assert!(TaskPriority::Urgent > TaskPriority::High);
        assert!(TaskPriority::Low.rank() < TaskPriority::Medium.rank());
        assert_eq!(TaskPriority::default(), TaskPriority::Medium);
    }

    #[test]
    fn test_bunker_location_serde() {
        let loc = BunkerLocation::Machine("m-1".into());
        let json = serde_json::to_value(&loc).unwrap();
        assert_eq!(json["kind"], "MACHINE");
        assert_eq!(json["machine_id"], "m-1");
        let back: BunkerLocation = serde_json::from_value(json).unwrap();
        assert_eq!(back.machine_id(), Some("m-1"));
    }

    #[test]
    fn test_fill_percent_clamped() {
        let b = Bunker {
            id: "b".into(),
            code: "B-1".into(),
            ingredient: "coffee".into(),
            capacity_grams: 2000.0,
            current_grams: 500.0,
            location: BunkerLocation::Warehouse,
            updated_at: String::new(),
        };
        assert!((b.fill_percent() - 25.0).abs() < 1e-9);

        let empty_cap = Bunker { capacity_grams: 0.0, ..b };
        assert_eq!(empty_cap.fill_percent(), 0.0);
    }

    #[test]
    fn test_missing_required_steps() {
        let now = Utc::now();
        let task = Task {
            id: "t".into(),
            title: "Refill".into(),
            description: String::new(),
            task_type: TaskType::Refill,
            status: TaskStatus::InProgress,
            priority: TaskPriority::High,
            machine_id: None,
            assigned_to: None,
            created_by: "u".into(),
            template_id: None,
            due_at: Some(now - chrono::Duration::hours(1)),
            started_at: None,
            completed_at: None,
            cancel_reason: None,
            created_at: now,
            updated_at: now,
        };
        assert!(task.is_overdue(now));

        let step = |pos: u32, required: bool, completed: bool| ChecklistStep {
            id: format!("s{pos}"),
            task_id: "t".into(),
            position: pos,
            title: format!("step {pos}"),
            description: String::new(),
            required,
            requires_photo: false,
            requires_weight: false,
            bunker_id: None,
            completed,
            completed_by: None,
            completed_at: None,
            photo_url: None,
            weight_grams: None,
            notes: None,
        };
        let detail = TaskDetail {
            task,
            checklist: vec![step(1, true, true), step(2, true, false), step(3, false, false)],
        };
        assert_eq!(detail.missing_required(), vec![2]);
    }
}
