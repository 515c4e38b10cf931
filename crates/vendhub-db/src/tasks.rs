//! Tasks and their checklist steps.
//!
//! Status changes are conditional updates (`WHERE status = <expected>`) so two
//! concurrent transitions of the same task cannot both succeed.

use chrono::{DateTime, Utc};
use rusqlite::types::Value as SqlValue;
use rusqlite::{OptionalExtension, Transaction, params, params_from_iter};
use serde::Deserialize;
use vendhub_core::error::{Result, VendHubError};
use vendhub_core::types::{
    ChecklistStep, StepEvidence, Task, TaskDetail, TaskPriority, TaskStatus, TaskType,
    TemplateStep,
};

use crate::action_log::{NewAction, insert_action};
use crate::inventory::{Weighing, record_weighing};
use crate::{VendDb, db_err, now_ts, parse_enum, parse_opt_ts, parse_ts, ts};

const TASK_COLUMNS: &str = "id, title, description, task_type, status, priority, machine_id, \
     assigned_to, created_by, template_id, due_at, started_at, completed_at, cancel_reason, \
     created_at, updated_at";

const STEP_COLUMNS: &str = "id, task_id, position, title, description, required, requires_photo, \
     requires_weight, bunker_id, completed, completed_by, completed_at, photo_url, weight_grams, notes";

/// A task row to insert.
#[derive(Debug, Clone)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub task_type: TaskType,
    pub priority: TaskPriority,
    pub machine_id: Option<String>,
    pub assigned_to: Option<String>,
    pub created_by: String,
    pub template_id: Option<String>,
    pub due_at: Option<DateTime<Utc>>,
}

/// A checklist step to insert. Positions are assigned in slice order.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct NewStep {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default)]
    pub requires_photo: bool,
    #[serde(default)]
    pub requires_weight: bool,
    #[serde(default)]
    pub bunker_id: Option<String>,
}

fn default_required() -> bool {
    true
}

impl From<&TemplateStep> for NewStep {
    fn from(s: &TemplateStep) -> Self {
        Self {
            title: s.title.clone(),
            description: s.description.clone(),
            required: s.required,
            requires_photo: s.requires_photo,
            requires_weight: s.requires_weight,
            bunker_id: None,
        }
    }
}

/// A status transition applied only if the task is still in `from`.
#[derive(Debug, Clone)]
pub struct TaskUpdate {
    pub from: TaskStatus,
    pub to: TaskStatus,
    pub assigned_to: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancel_reason: Option<String>,
    /// Refuse the update while required steps are open.
    pub require_checklist: bool,
}

impl TaskUpdate {
    pub fn new(from: TaskStatus, to: TaskStatus) -> Self {
        Self {
            from,
            to,
            assigned_to: None,
            started_at: None,
            completed_at: None,
            cancel_reason: None,
            require_checklist: false,
        }
    }
}

/// Query filter for task listings. Deserializes straight from a query string.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TaskFilter {
    pub status: Option<TaskStatus>,
    pub assigned_to: Option<String>,
    pub machine_id: Option<String>,
    pub task_type: Option<TaskType>,
    pub priority: Option<TaskPriority>,
    /// Only `Created` and `InProgress` tasks.
    #[serde(default)]
    pub open: bool,
    /// Only open tasks whose due date has passed.
    #[serde(default)]
    pub overdue: bool,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// Result of ticking off a step.
#[derive(Debug, Clone)]
pub struct StepCompletion {
    pub step: ChecklistStep,
    /// The weighed bunker, when the step recorded a weight for one.
    pub weighing: Option<Weighing>,
}

pub(crate) fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<Task> {
    let task_type: String = row.get(3)?;
    let status: String = row.get(4)?;
    let priority: String = row.get(5)?;
    let created_at: String = row.get(14)?;
    let updated_at: String = row.get(15)?;
    Ok(Task {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        task_type: parse_enum(&task_type)?,
        status: parse_enum(&status)?,
        priority: parse_enum(&priority)?,
        machine_id: row.get(6)?,
        assigned_to: row.get(7)?,
        created_by: row.get(8)?,
        template_id: row.get(9)?,
        due_at: parse_opt_ts(row.get(10)?)?,
        started_at: parse_opt_ts(row.get(11)?)?,
        completed_at: parse_opt_ts(row.get(12)?)?,
        cancel_reason: row.get(13)?,
        created_at: parse_ts(&created_at)?,
        updated_at: parse_ts(&updated_at)?,
    })
}

fn row_to_step(row: &rusqlite::Row) -> rusqlite::Result<ChecklistStep> {
    Ok(ChecklistStep {
        id: row.get(0)?,
        task_id: row.get(1)?,
        position: row.get(2)?,
        title: row.get(3)?,
        description: row.get(4)?,
        required: row.get::<_, i32>(5)? != 0,
        requires_photo: row.get::<_, i32>(6)? != 0,
        requires_weight: row.get::<_, i32>(7)? != 0,
        bunker_id: row.get(8)?,
        completed: row.get::<_, i32>(9)? != 0,
        completed_by: row.get(10)?,
        completed_at: parse_opt_ts(row.get(11)?)?,
        photo_url: row.get(12)?,
        weight_grams: row.get(13)?,
        notes: row.get(14)?,
    })
}

fn current_status(tx: &Transaction, id: &str) -> Result<TaskStatus> {
    let status: String = tx
        .query_row("SELECT status FROM tasks WHERE id=?1", params![id], |r| r.get(0))
        .optional()
        .map_err(db_err("Get task status"))?
        .ok_or_else(|| VendHubError::not_found("Task", id))?;
    status.parse()
}

fn open_required_positions(tx: &Transaction, task_id: &str) -> Result<Vec<u32>> {
    let mut stmt = tx
        .prepare(
            "SELECT position FROM checklist_steps
             WHERE task_id=?1 AND required=1 AND completed=0 ORDER BY position",
        )
        .map_err(db_err("Prepare"))?;
    let positions = stmt
        .query_map(params![task_id], |r| r.get(0))
        .map_err(db_err("Query"))?
        .collect::<rusqlite::Result<Vec<u32>>>()
        .map_err(db_err("Read step"))?;
    Ok(positions)
}

fn query_steps(conn: &rusqlite::Connection, task_id: &str) -> Result<Vec<ChecklistStep>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {STEP_COLUMNS} FROM checklist_steps WHERE task_id=?1 ORDER BY position ASC"
        ))
        .map_err(db_err("Prepare"))?;
    let steps = stmt
        .query_map(params![task_id], row_to_step)
        .map_err(db_err("Query"))?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db_err("Read step"))?;
    Ok(steps)
}

impl VendDb {
    /// Insert a task with its checklist and audit entry in one transaction.
    pub fn insert_task(&self, task: &NewTask, steps: &[NewStep], action: &NewAction) -> Result<TaskDetail> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_ts();
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err("Begin"))?;
        tx.execute(
            "INSERT INTO tasks (id, title, description, task_type, status, priority, priority_rank,
                 machine_id, assigned_to, created_by, template_id, due_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, 'CREATED', ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
            params![
                id,
                task.title,
                task.description,
                task.task_type.as_str(),
                task.priority.as_str(),
                task.priority.rank(),
                task.machine_id,
                task.assigned_to,
                task.created_by,
                task.template_id,
                task.due_at.map(ts),
                now,
            ],
        )
        .map_err(db_err("Create task"))?;

        for (i, step) in steps.iter().enumerate() {
            tx.execute(
                "INSERT INTO checklist_steps (id, task_id, position, title, description, required,
                     requires_photo, requires_weight, bunker_id)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    uuid::Uuid::new_v4().to_string(),
                    id,
                    (i + 1) as u32,
                    step.title,
                    step.description,
                    step.required,
                    step.requires_photo,
                    step.requires_weight,
                    step.bunker_id,
                ],
            )
            .map_err(db_err("Create step"))?;
        }

        insert_action(&tx, &NewAction { entity_id: id.clone(), ..action.clone() })?;
        tx.commit().map_err(db_err("Commit"))?;
        drop(conn);
        self.get_task_detail(&id)
    }

    pub fn get_task(&self, id: &str) -> Result<Task> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id=?1"),
            params![id],
            row_to_task,
        )
        .optional()
        .map_err(db_err("Get task"))?
        .ok_or_else(|| VendHubError::not_found("Task", id))
    }

    pub fn get_task_detail(&self, id: &str) -> Result<TaskDetail> {
        let task = self.get_task(id)?;
        let conn = self.lock()?;
        let checklist = query_steps(&conn, id)?;
        Ok(TaskDetail { task, checklist })
    }

    pub fn get_step(&self, task_id: &str, position: u32) -> Result<ChecklistStep> {
        let conn = self.lock()?;
        conn.query_row(
            &format!("SELECT {STEP_COLUMNS} FROM checklist_steps WHERE task_id=?1 AND position=?2"),
            params![task_id, position],
            row_to_step,
        )
        .optional()
        .map_err(db_err("Get step"))?
        .ok_or_else(|| VendHubError::not_found("Step", format!("{task_id}#{position}")))
    }

    /// List tasks matching a filter, highest priority first, then oldest first.
    pub fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let mut clauses: Vec<&str> = Vec::new();
        let mut args: Vec<SqlValue> = Vec::new();

        if let Some(status) = filter.status {
            clauses.push("status = ?");
            args.push(SqlValue::Text(status.as_str().into()));
        }
        if let Some(ref assignee) = filter.assigned_to {
            clauses.push("assigned_to = ?");
            args.push(SqlValue::Text(assignee.clone()));
        }
        if let Some(ref machine) = filter.machine_id {
            clauses.push("machine_id = ?");
            args.push(SqlValue::Text(machine.clone()));
        }
        if let Some(task_type) = filter.task_type {
            clauses.push("task_type = ?");
            args.push(SqlValue::Text(task_type.as_str().into()));
        }
        if let Some(priority) = filter.priority {
            clauses.push("priority = ?");
            args.push(SqlValue::Text(priority.as_str().into()));
        }
        if filter.open || filter.overdue {
            clauses.push("status IN ('CREATED', 'IN_PROGRESS')");
        }
        if filter.overdue {
            clauses.push("due_at IS NOT NULL AND due_at < ?");
            args.push(SqlValue::Text(now_ts()));
        }

        let mut sql = format!("SELECT {TASK_COLUMNS} FROM tasks");
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY priority_rank DESC, created_at ASC, rowid ASC LIMIT ? OFFSET ?");
        args.push(SqlValue::Integer(filter.limit.map_or(-1, i64::from)));
        args.push(SqlValue::Integer(filter.offset.map_or(0, i64::from)));

        let conn = self.lock()?;
        let mut stmt = conn.prepare(&sql).map_err(db_err("Prepare"))?;
        let tasks = stmt
            .query_map(params_from_iter(args), row_to_task)
            .map_err(db_err("Query"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("Read task"))?;
        Ok(tasks)
    }

    /// Number of tasks per status.
    pub fn task_counts(&self) -> Result<Vec<(TaskStatus, u32)>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT status, COUNT(*) FROM tasks GROUP BY status ORDER BY status")
            .map_err(db_err("Prepare"))?;
        let counts = stmt
            .query_map([], |r| {
                let status: String = r.get(0)?;
                Ok((parse_enum::<TaskStatus>(&status)?, r.get::<_, u32>(1)?))
            })
            .map_err(db_err("Query"))?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(db_err("Read count"))?;
        Ok(counts)
    }

    /// Apply a status transition if the task is still in `update.from`.
    pub fn transition_task(&self, id: &str, update: &TaskUpdate, action: &NewAction) -> Result<Task> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err("Begin"))?;

        if update.require_checklist {
            let missing = open_required_positions(&tx, id)?;
            if !missing.is_empty() {
                return Err(VendHubError::validation(format!(
                    "Required steps not completed: {}",
                    missing.iter().map(u32::to_string).collect::<Vec<_>>().join(", ")
                )));
            }
        }

        let changed = tx
            .execute(
                "UPDATE tasks SET status=?3,
                     assigned_to=COALESCE(?4, assigned_to),
                     started_at=COALESCE(?5, started_at),
                     completed_at=COALESCE(?6, completed_at),
                     cancel_reason=COALESCE(?7, cancel_reason),
                     updated_at=?8
                 WHERE id=?1 AND status=?2",
                params![
                    id,
                    update.from.as_str(),
                    update.to.as_str(),
                    update.assigned_to,
                    update.started_at.map(ts),
                    update.completed_at.map(ts),
                    update.cancel_reason,
                    now_ts(),
                ],
            )
            .map_err(db_err("Update task"))?;
        if changed == 0 {
            let actual = current_status(&tx, id)?;
            return Err(VendHubError::InvalidTransition {
                from: actual.to_string(),
                to: update.to.to_string(),
            });
        }

        insert_action(&tx, action)?;
        tx.commit().map_err(db_err("Commit"))?;
        drop(conn);
        self.get_task(id)
    }

    /// Set the assignee of an open task.
    pub fn assign_task(&self, id: &str, user_id: &str, action: &NewAction) -> Result<Task> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err("Begin"))?;
        let changed = tx
            .execute(
                "UPDATE tasks SET assigned_to=?2, updated_at=?3
                 WHERE id=?1 AND status IN ('CREATED', 'IN_PROGRESS')",
                params![id, user_id, now_ts()],
            )
            .map_err(db_err("Assign task"))?;
        if changed == 0 {
            let actual = current_status(&tx, id)?;
            return Err(VendHubError::Conflict(format!("Cannot reassign a {actual} task")));
        }
        insert_action(&tx, action)?;
        tx.commit().map_err(db_err("Commit"))?;
        drop(conn);
        self.get_task(id)
    }

    /// Mark a step completed. The task must still be in progress and the step
    /// still open; a weight on a bunker-linked step is recorded against the bunker.
    pub fn complete_step(
        &self,
        task_id: &str,
        position: u32,
        actor_id: &str,
        evidence: &StepEvidence,
        action: &NewAction,
    ) -> Result<StepCompletion> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(db_err("Begin"))?;

        let status = current_status(&tx, task_id)?;
        if status != TaskStatus::InProgress {
            return Err(VendHubError::Conflict(format!(
                "Task is {status}; steps can only be completed while IN_PROGRESS"
            )));
        }

        let step = tx
            .query_row(
                &format!("SELECT {STEP_COLUMNS} FROM checklist_steps WHERE task_id=?1 AND position=?2"),
                params![task_id, position],
                row_to_step,
            )
            .optional()
            .map_err(db_err("Get step"))?
            .ok_or_else(|| VendHubError::not_found("Step", format!("{task_id}#{position}")))?;
        if step.completed {
            return Err(VendHubError::Conflict(format!("Step {position} already completed")));
        }

        let now = now_ts();
        tx.execute(
            "UPDATE checklist_steps SET completed=1, completed_by=?3, completed_at=?4,
                 photo_url=?5, weight_grams=?6, notes=?7
             WHERE task_id=?1 AND position=?2 AND completed=0",
            params![
                task_id,
                position,
                actor_id,
                now,
                evidence.photo_url,
                evidence.weight_grams,
                evidence.notes,
            ],
        )
        .map_err(db_err("Complete step"))?;
        tx.execute("UPDATE tasks SET updated_at=?2 WHERE id=?1", params![task_id, now])
            .map_err(db_err("Touch task"))?;

        let weighing = match (&step.bunker_id, evidence.weight_grams) {
            (Some(bunker_id), Some(weight)) => Some(record_weighing(&tx, bunker_id, weight, actor_id)?),
            _ => None,
        };

        insert_action(&tx, action)?;
        let step = tx
            .query_row(
                &format!("SELECT {STEP_COLUMNS} FROM checklist_steps WHERE id=?1"),
                params![step.id],
                row_to_step,
            )
            .map_err(db_err("Get step"))?;
        tx.commit().map_err(db_err("Commit"))?;
        Ok(StepCompletion { step, weighing })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vendhub_core::types::Role;

    fn new_task(title: &str, priority: TaskPriority) -> NewTask {
        NewTask {
            title: title.into(),
            description: String::new(),
            task_type: TaskType::Refill,
            priority,
            machine_id: None,
            assigned_to: None,
            created_by: "system".into(),
            template_id: None,
            due_at: None,
        }
    }

    fn steps(n: usize) -> Vec<NewStep> {
        (1..=n)
            .map(|i| NewStep {
                title: format!("Step {i}"),
                required: true,
                ..Default::default()
            })
            .collect()
    }

    fn act(action: &str, id: &str) -> NewAction {
        NewAction::new("system", action, "task", id)
    }

    #[test]
    fn test_insert_task_with_checklist() {
        let db = VendDb::in_memory().unwrap();
        let detail = db
            .insert_task(&new_task("Refill VM-1", TaskPriority::High), &steps(3), &act("task.created", ""))
            .unwrap();
        assert_eq!(detail.task.status, TaskStatus::Created);
        assert_eq!(detail.checklist.len(), 3);
        assert_eq!(
            detail.checklist.iter().map(|s| s.position).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(db.actions_for("task", &detail.task.id).unwrap().len(), 1);
    }

    #[test]
    fn test_list_orders_by_priority_then_age() {
        let db = VendDb::in_memory().unwrap();
        db.insert_task(&new_task("low", TaskPriority::Low), &[], &act("c", "")).unwrap();
        db.insert_task(&new_task("urgent", TaskPriority::Urgent), &[], &act("c", "")).unwrap();
        db.insert_task(&new_task("medium-1", TaskPriority::Medium), &[], &act("c", "")).unwrap();
        db.insert_task(&new_task("medium-2", TaskPriority::Medium), &[], &act("c", "")).unwrap();

        let titles: Vec<String> = db
            .list_tasks(&TaskFilter::default())
            .unwrap()
            .into_iter()
            .map(|t| t.title)
            .collect();
        assert_eq!(titles, vec!["urgent", "medium-1", "medium-2", "low"]);

        let page = db
            .list_tasks(&TaskFilter { limit: Some(2), offset: Some(1), ..Default::default() })
            .unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].title, "medium-1");
    }

    #[test]
    fn test_list_filters() {
        let db = VendDb::in_memory().unwrap();
        let user = db
            .create_user("Op", "op@x.uz", "h", Role::Operator, &NewAction::new("s", "c", "user", ""))
            .unwrap();
        let mut mine = new_task("mine", TaskPriority::Medium);
        mine.assigned_to = Some(user.id.clone());
        mine.due_at = Some(Utc::now() - chrono::Duration::hours(2));
        db.insert_task(&mine, &[], &act("c", "")).unwrap();
        let mut cleaning = new_task("cleaning", TaskPriority::Medium);
        cleaning.task_type = TaskType::Cleaning;
        cleaning.due_at = Some(Utc::now() + chrono::Duration::hours(2));
        db.insert_task(&cleaning, &[], &act("c", "")).unwrap();

        let by_user = db
            .list_tasks(&TaskFilter { assigned_to: Some(user.id.clone()), ..Default::default() })
            .unwrap();
        assert_eq!(by_user.len(), 1);

        let by_type = db
            .list_tasks(&TaskFilter { task_type: Some(TaskType::Cleaning), ..Default::default() })
            .unwrap();
        assert_eq!(by_type[0].title, "cleaning");

        let overdue = db.list_tasks(&TaskFilter { overdue: true, ..Default::default() }).unwrap();
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].title, "mine");
    }

    #[test]
    fn test_filter_from_query_string_shape() {
        let filter: TaskFilter = serde_json::from_value(serde_json::json!({
            "status": "IN_PROGRESS",
            "priority": "URGENT",
            "overdue": true,
            "limit": 10
        }))
        .unwrap();
        assert_eq!(filter.status, Some(TaskStatus::InProgress));
        assert_eq!(filter.priority, Some(TaskPriority::Urgent));
        assert!(filter.overdue);
        assert!(!filter.open);
    }

    #[test]
    fn test_conditional_transition() {
        let db = VendDb::in_memory().unwrap();
        let t = db.insert_task(&new_task("t", TaskPriority::Medium), &[], &act("c", "")).unwrap().task;

        let mut start = TaskUpdate::new(TaskStatus::Created, TaskStatus::InProgress);
        start.started_at = Some(Utc::now());
        let started = db.transition_task(&t.id, &start, &act("task.started", &t.id)).unwrap();
        assert_eq!(started.status, TaskStatus::InProgress);
        assert!(started.started_at.is_some());

        // Second start loses the race
        let err = db.transition_task(&t.id, &start, &act("task.started", &t.id)).unwrap_err();
        assert!(matches!(err, VendHubError::InvalidTransition { .. }));
        assert_eq!(db.actions_for("task", &t.id).unwrap().len(), 2);
    }

    #[test]
    fn test_complete_requires_checklist() {
        let db = VendDb::in_memory().unwrap();
        let d = db.insert_task(&new_task("t", TaskPriority::Medium), &steps(2), &act("c", "")).unwrap();
        let id = d.task.id.clone();
        db.transition_task(&id, &TaskUpdate::new(TaskStatus::Created, TaskStatus::InProgress), &act("s", &id))
            .unwrap();

        let mut done = TaskUpdate::new(TaskStatus::InProgress, TaskStatus::Completed);
        done.require_checklist = true;
        done.completed_at = Some(Utc::now());
        let err = db.transition_task(&id, &done, &act("d", &id)).unwrap_err();
        assert!(err.to_string().contains("1, 2"));

        db.complete_step(&id, 1, "system", &StepEvidence::default(), &act("step", &id)).unwrap();
        db.complete_step(&id, 2, "system", &StepEvidence::default(), &act("step", &id)).unwrap();
        let task = db.transition_task(&id, &done, &act("d", &id)).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
    }

    #[test]
    fn test_completed_step_is_immutable() {
        let db = VendDb::in_memory().unwrap();
        let d = db.insert_task(&new_task("t", TaskPriority::Medium), &steps(1), &act("c", "")).unwrap();
        let id = d.task.id.clone();

        // Not started yet
        let err = db.complete_step(&id, 1, "u", &StepEvidence::default(), &act("s", &id)).unwrap_err();
        assert!(matches!(err, VendHubError::Conflict(_)));

        db.transition_task(&id, &TaskUpdate::new(TaskStatus::Created, TaskStatus::InProgress), &act("s", &id))
            .unwrap();
        let evidence = StepEvidence { notes: Some("ok".into()), ..Default::default() };
        let done = db.complete_step(&id, 1, "u", &evidence, &act("s", &id)).unwrap();
        assert!(done.step.completed);
        assert_eq!(done.step.notes.as_deref(), Some("ok"));
        assert!(done.weighing.is_none());

        let err = db.complete_step(&id, 1, "u", &StepEvidence::default(), &act("s", &id)).unwrap_err();
        assert!(matches!(err, VendHubError::Conflict(_)));
        assert_eq!(db.get_step(&id, 1).unwrap().notes.as_deref(), Some("ok"));

        let err = db.complete_step(&id, 9, "u", &StepEvidence::default(), &act("s", &id)).unwrap_err();
        assert!(matches!(err, VendHubError::NotFound { .. }));
    }

    #[test]
    fn test_assign_rejects_terminal_task() {
        let db = VendDb::in_memory().unwrap();
        let user = db
            .create_user("Op", "op@x.uz", "h", Role::Operator, &NewAction::new("s", "c", "user", ""))
            .unwrap();
        let t = db.insert_task(&new_task("t", TaskPriority::Medium), &[], &act("c", "")).unwrap().task;
        let assigned = db.assign_task(&t.id, &user.id, &act("a", &t.id)).unwrap();
        assert_eq!(assigned.assigned_to.as_deref(), Some(user.id.as_str()));

        let mut cancel = TaskUpdate::new(TaskStatus::Created, TaskStatus::Cancelled);
        cancel.cancel_reason = Some("duplicate".into());
        db.transition_task(&t.id, &cancel, &act("x", &t.id)).unwrap();
        let err = db.assign_task(&t.id, &user.id, &act("a", &t.id)).unwrap_err();
        assert!(matches!(err, VendHubError::Conflict(_)));
    }

    #[test]
    fn test_task_counts() {
        let db = VendDb::in_memory().unwrap();
        db.insert_task(&new_task("a", TaskPriority::Medium), &[], &act("c", "")).unwrap();
        db.insert_task(&new_task("b", TaskPriority::Medium), &[], &act("c", "")).unwrap();
        assert_eq!(db.task_counts().unwrap(), vec![(TaskStatus::Created, 2)]);
    }
}
