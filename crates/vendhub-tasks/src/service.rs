//! Task service: every task and template operation, with permission checks,
//! transition guards, audit entries and event publication.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use vendhub_core::error::{Result, VendHubError};
use vendhub_core::types::{
    ActionLogEntry, Actor, ChecklistStep, ChecklistTemplate, StepEvidence, Task, TaskDetail,
    TaskPriority, TaskStatus, TaskType, TemplateStep,
};
use vendhub_db::{NewAction, NewStep, NewTask, TaskFilter, TaskUpdate, VendDb};
use vendhub_notify::{Event, EventHub};

use crate::transitions::check_transition;

/// Input for [`TaskService::create_task`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateTask {
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Required unless a template supplies it.
    pub task_type: Option<TaskType>,
    #[serde(default)]
    pub priority: TaskPriority,
    pub machine_id: Option<String>,
    pub assigned_to: Option<String>,
    pub template_id: Option<String>,
    pub due_at: Option<DateTime<Utc>>,
    /// Extra steps appended after the template's steps.
    #[serde(default)]
    pub steps: Vec<NewStep>,
}

/// Task lifecycle operations.
#[derive(Clone)]
pub struct TaskService {
    db: Arc<VendDb>,
    hub: EventHub,
    low_stock_percent: f64,
}

fn task_action(actor: &Actor, action: &str, task_id: &str) -> NewAction {
    NewAction::new(&actor.user_id, action, "task", task_id)
}

fn require_manager(actor: &Actor, what: &str) -> Result<()> {
    if actor.role.can_manage_tasks() {
        Ok(())
    } else {
        Err(VendHubError::forbidden(format!("{} cannot {what}", actor.role)))
    }
}

/// Assignee or task manager.
fn require_executor(actor: &Actor, task: &Task) -> Result<()> {
    if actor.role.can_manage_tasks() || task.assigned_to.as_deref() == Some(actor.user_id.as_str()) {
        Ok(())
    } else {
        Err(VendHubError::forbidden("Task is assigned to someone else"))
    }
}

impl TaskService {
    pub fn new(db: Arc<VendDb>, hub: EventHub) -> Self {
        Self {
            db,
            hub,
            low_stock_percent: 20.0,
        }
    }

    /// Fill level below which a weighed bunker raises a low-stock event.
    pub fn with_low_stock_percent(mut self, percent: f64) -> Self {
        self.low_stock_percent = percent;
        self
    }

    pub fn db(&self) -> &Arc<VendDb> {
        &self.db
    }

    fn publish(&self, event: Event, actor: &Actor) {
        self.hub.publish(event, &actor.user_id);
    }

    fn require_active_user(&self, user_id: &str) -> Result<()> {
        let user = self.db.get_user(user_id)?;
        if !user.active {
            return Err(VendHubError::validation(format!("User {} is inactive", user.name)));
        }
        Ok(())
    }

    pub fn create_task(&self, actor: &Actor, req: CreateTask) -> Result<TaskDetail> {
        require_manager(actor, "create tasks")?;
        let title = req.title.trim();
        if title.is_empty() {
            return Err(VendHubError::validation("Title must not be empty"));
        }

        let template = req
            .template_id
            .as_deref()
            .map(|id| self.db.get_template(id))
            .transpose()?;
        let task_type = req
            .task_type
            .or(template.as_ref().map(|t| t.task_type))
            .ok_or_else(|| VendHubError::validation("task_type is required without a template"))?;

        if let Some(ref machine_id) = req.machine_id {
            self.db.get_machine(machine_id)?;
        }
        if let Some(ref user_id) = req.assigned_to {
            self.require_active_user(user_id)?;
        }

        let mut steps: Vec<NewStep> = template
            .as_ref()
            .map(|t| t.steps.iter().map(NewStep::from).collect())
            .unwrap_or_default();
        for extra in &req.steps {
            if extra.title.trim().is_empty() {
                return Err(VendHubError::validation("Step title must not be empty"));
            }
            if let Some(ref bunker_id) = extra.bunker_id {
                self.db.get_bunker(bunker_id)?;
            }
            steps.push(extra.clone());
        }

        let new_task = NewTask {
            title: title.to_string(),
            description: req.description,
            task_type,
            priority: req.priority,
            machine_id: req.machine_id,
            assigned_to: req.assigned_to,
            created_by: actor.user_id.clone(),
            template_id: req.template_id,
            due_at: req.due_at,
        };
        let action = task_action(actor, "task.created", "").with_details(json!({
            "title": new_task.title,
            "task_type": task_type,
            "steps": steps.len(),
            "template_id": new_task.template_id,
        }));
        let detail = self.db.insert_task(&new_task, &steps, &action)?;

        tracing::info!(
            "🆕 Task created: '{}' ({}) by {} with {} steps",
            detail.task.title,
            detail.task.id,
            actor.user_id,
            detail.checklist.len()
        );
        self.publish(Event::TaskCreated { task: detail.task.clone() }, actor);
        Ok(detail)
    }

    pub fn get_task(&self, id: &str) -> Result<TaskDetail> {
        self.db.get_task_detail(id)
    }

    pub fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        self.db.list_tasks(filter)
    }

    /// Like [`list_tasks`](Self::list_tasks), but staff without task management
    /// rights only ever see their own tasks.
    pub fn list_tasks_for(&self, actor: &Actor, filter: &TaskFilter) -> Result<Vec<Task>> {
        if actor.role.can_manage_tasks() {
            return self.db.list_tasks(filter);
        }
        let own = TaskFilter {
            assigned_to: Some(actor.user_id.clone()),
            ..filter.clone()
        };
        self.db.list_tasks(&own)
    }

    /// A task the actor is allowed to look at.
    pub fn get_task_for(&self, actor: &Actor, id: &str) -> Result<TaskDetail> {
        let detail = self.db.get_task_detail(id)?;
        if !actor.role.can_manage_tasks()
            && detail.task.assigned_to.as_deref() != Some(actor.user_id.as_str())
            && detail.task.created_by != actor.user_id
        {
            return Err(VendHubError::forbidden("Not your task"));
        }
        Ok(detail)
    }

    pub fn assign_task(&self, actor: &Actor, id: &str, user_id: &str) -> Result<Task> {
        require_manager(actor, "assign tasks")?;
        let task = self.db.get_task(id)?;
        if task.status.is_terminal() {
            return Err(VendHubError::Conflict(format!("Cannot reassign a {} task", task.status)));
        }
        self.require_active_user(user_id)?;

        let action = task_action(actor, "task.assigned", id)
            .with_details(json!({ "from": task.assigned_to, "to": user_id }));
        let task = self.db.assign_task(id, user_id, &action)?;
        tracing::info!("📌 Task {} assigned to {} by {}", id, user_id, actor.user_id);
        self.publish(Event::TaskAssigned { task: task.clone() }, actor);
        Ok(task)
    }

    pub fn start_task(&self, actor: &Actor, id: &str) -> Result<Task> {
        let task = self.db.get_task(id)?;
        check_transition(task.status, TaskStatus::InProgress)?;

        let mut update = TaskUpdate::new(task.status, TaskStatus::InProgress);
        update.started_at = Some(Utc::now());
        match task.assigned_to {
            Some(_) => require_executor(actor, &task)?,
            None => update.assigned_to = Some(actor.user_id.clone()),
        }

        let action = task_action(actor, "task.started", id).with_details(json!({
            "from": task.status,
            "to": TaskStatus::InProgress,
            "self_assigned": update.assigned_to.is_some(),
        }));
        let task = self.db.transition_task(id, &update, &action)?;
        tracing::info!("▶️ Task {} started by {}", id, actor.user_id);
        self.publish(Event::TaskStarted { task: task.clone() }, actor);
        Ok(task)
    }

    pub fn complete_step(
        &self,
        actor: &Actor,
        task_id: &str,
        position: u32,
        evidence: StepEvidence,
    ) -> Result<ChecklistStep> {
        let task = self.db.get_task(task_id)?;
        if task.status != TaskStatus::InProgress {
            return Err(VendHubError::Conflict(format!(
                "Task is {}; start it before completing steps",
                task.status
            )));
        }
        require_executor(actor, &task)?;

        let step = self.db.get_step(task_id, position)?;
        if step.completed {
            return Err(VendHubError::Conflict(format!("Step {position} already completed")));
        }
        let evidence = normalize_evidence(evidence);
        validate_evidence(&step, &evidence)?;

        let action = task_action(actor, "task.step_completed", task_id).with_details(json!({
            "position": position,
            "title": step.title,
            "photo_url": evidence.photo_url,
            "weight_grams": evidence.weight_grams,
        }));
        let done = self
            .db
            .complete_step(task_id, position, &actor.user_id, &evidence, &action)?;
        tracing::info!("✔️ Task {} step {} completed by {}", task_id, position, actor.user_id);

        let task = self.db.get_task(task_id)?;
        self.publish(
            Event::StepCompleted {
                task,
                position,
                step_title: done.step.title.clone(),
            },
            actor,
        );
        if let Some(weighing) = done.weighing
            && weighing.crossed_below(self.low_stock_percent)
        {
            let bunker = weighing.after;
            tracing::warn!("⚠️ Bunker {} low after weighing: {:.0}%", bunker.code, bunker.fill_percent());
            self.publish(Event::LowStock { bunker }, actor);
        }
        Ok(done.step)
    }

    pub fn complete_task(&self, actor: &Actor, id: &str) -> Result<Task> {
        let detail = self.db.get_task_detail(id)?;
        check_transition(detail.task.status, TaskStatus::Completed)?;
        require_executor(actor, &detail.task)?;

        let missing = detail.missing_required();
        if !missing.is_empty() {
            return Err(VendHubError::validation(format!(
                "Required steps not completed: {}",
                missing.iter().map(u32::to_string).collect::<Vec<_>>().join(", ")
            )));
        }

        let mut update = TaskUpdate::new(detail.task.status, TaskStatus::Completed);
        update.completed_at = Some(Utc::now());
        update.require_checklist = true;
        let action = task_action(actor, "task.completed", id).with_details(json!({
            "from": detail.task.status,
            "to": TaskStatus::Completed,
        }));
        let task = self.db.transition_task(id, &update, &action)?;
        tracing::info!("✅ Task {} completed by {}", id, actor.user_id);
        self.publish(Event::TaskCompleted { task: task.clone() }, actor);
        Ok(task)
    }

    pub fn cancel_task(&self, actor: &Actor, id: &str, reason: &str) -> Result<Task> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(VendHubError::validation("A cancellation reason is required"));
        }
        let task = self.db.get_task(id)?;
        if !actor.role.can_manage_tasks() && task.created_by != actor.user_id {
            return Err(VendHubError::forbidden("Only managers or the creator can cancel a task"));
        }
        check_transition(task.status, TaskStatus::Cancelled)?;

        let mut update = TaskUpdate::new(task.status, TaskStatus::Cancelled);
        update.cancel_reason = Some(reason.to_string());
        let action = task_action(actor, "task.cancelled", id).with_details(json!({
            "from": task.status,
            "to": TaskStatus::Cancelled,
            "reason": reason,
        }));
        let task = self.db.transition_task(id, &update, &action)?;
        tracing::info!("❌ Task {} cancelled by {}: {}", id, actor.user_id, reason);
        self.publish(Event::TaskCancelled { task: task.clone() }, actor);
        Ok(task)
    }

    /// Audit trail of a task, oldest first.
    pub fn task_history(&self, id: &str) -> Result<Vec<ActionLogEntry>> {
        self.db.get_task(id)?;
        self.db.actions_for("task", id)
    }

    // ── Templates ──────────────────────────────

    pub fn create_template(
        &self,
        actor: &Actor,
        name: &str,
        task_type: TaskType,
        steps: Vec<TemplateStep>,
    ) -> Result<ChecklistTemplate> {
        require_manager(actor, "edit templates")?;
        let name = name.trim();
        if name.is_empty() {
            return Err(VendHubError::validation("Template name must not be empty"));
        }
        if steps.is_empty() {
            return Err(VendHubError::validation("A template needs at least one step"));
        }
        if steps.iter().any(|s| s.title.trim().is_empty()) {
            return Err(VendHubError::validation("Step title must not be empty"));
        }
        let action = NewAction::new(&actor.user_id, "template.created", "template", "")
            .with_details(json!({ "name": name, "steps": steps.len() }));
        let template = self.db.create_template(name, task_type, &steps, &action)?;
        tracing::info!("📋 Template '{}' created by {}", template.name, actor.user_id);
        Ok(template)
    }

    pub fn list_templates(&self) -> Result<Vec<ChecklistTemplate>> {
        self.db.list_templates()
    }

    pub fn get_template(&self, id: &str) -> Result<ChecklistTemplate> {
        self.db.get_template(id)
    }

    pub fn delete_template(&self, actor: &Actor, id: &str) -> Result<()> {
        require_manager(actor, "edit templates")?;
        let action = NewAction::new(&actor.user_id, "template.deleted", "template", id);
        self.db.delete_template(id, &action)?;
        tracing::info!("🗑️ Template {} deleted by {}", id, actor.user_id);
        Ok(())
    }
}

/// Blank strings count as absent.
fn normalize_evidence(evidence: StepEvidence) -> StepEvidence {
    let clean = |s: Option<String>| s.map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
    StepEvidence {
        photo_url: clean(evidence.photo_url),
        weight_grams: evidence.weight_grams,
        notes: clean(evidence.notes),
    }
}

fn validate_evidence(step: &ChecklistStep, evidence: &StepEvidence) -> Result<()> {
    if step.requires_photo && evidence.photo_url.is_none() {
        return Err(VendHubError::validation(format!("Step {} requires a photo", step.position)));
    }
    match evidence.weight_grams {
        Some(w) if !w.is_finite() || w < 0.0 => {
            Err(VendHubError::validation("Weight must be a non-negative number"))
        }
        None if step.requires_weight => Err(VendHubError::validation(format!(
            "Step {} requires a weight",
            step.position
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::templates::seed_default_templates;
    use vendhub_core::types::{Role, User};

    struct Fixture {
        svc: TaskService,
        hub: EventHub,
        manager: Actor,
        operator: Actor,
        other: Actor,
    }

    fn user(db: &VendDb, email: &str, role: Role) -> User {
        db.create_user(email, email, "hash", role, &NewAction::new("system", "user.created", "user", ""))
            .unwrap()
    }

    fn fixture() -> Fixture {
        let db = Arc::new(VendDb::in_memory().unwrap());
        let hub = EventHub::default();
        let m = user(&db, "mgr@x.uz", Role::Manager);
        let o = user(&db, "op@x.uz", Role::Operator);
        let x = user(&db, "op2@x.uz", Role::Operator);
        Fixture {
            svc: TaskService::new(db, hub.clone()),
            hub,
            manager: Actor::new(m.id, Role::Manager),
            operator: Actor::new(o.id, Role::Operator),
            other: Actor::new(x.id, Role::Operator),
        }
    }

    fn simple(title: &str, steps: Vec<NewStep>) -> CreateTask {
        CreateTask {
            title: title.into(),
            task_type: Some(TaskType::Other),
            steps,
            ..Default::default()
        }
    }

    fn plain_step(title: &str) -> NewStep {
        NewStep {
            title: title.into(),
            required: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_create_requires_manager_and_title() {
        let f = fixture();
        let err = f.svc.create_task(&f.operator, simple("x", vec![])).unwrap_err();
        assert!(matches!(err, VendHubError::Forbidden(_)));

        let err = f.svc.create_task(&f.manager, simple("   ", vec![])).unwrap_err();
        assert!(matches!(err, VendHubError::Validation(_)));

        let err = f
            .svc
            .create_task(&f.manager, CreateTask { title: "no type".into(), ..Default::default() })
            .unwrap_err();
        assert!(matches!(err, VendHubError::Validation(_)));
    }

    #[test]
    fn test_create_from_template_copies_steps() {
        let f = fixture();
        seed_default_templates(f.svc.db(), &Actor::system()).unwrap();
        let template = f.svc.db().get_template_by_name("Machine cleaning").unwrap().unwrap();

        let detail = f
            .svc
            .create_task(
                &f.manager,
                CreateTask {
                    title: "Clean VM-1".into(),
                    template_id: Some(template.id.clone()),
                    steps: vec![plain_step("Extra check")],
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(detail.task.task_type, TaskType::Cleaning);
        assert_eq!(detail.checklist.len(), template.steps.len() + 1);
        assert_eq!(detail.checklist[0].title, template.steps[0].title);
        assert_eq!(detail.checklist.last().unwrap().title, "Extra check");
        assert_eq!(detail.checklist.last().unwrap().position as usize, template.steps.len() + 1);
    }

    #[test]
    fn test_create_validates_references() {
        let f = fixture();
        let err = f
            .svc
            .create_task(
                &f.manager,
                CreateTask { machine_id: Some("nope".into()), ..simple("t", vec![]) },
            )
            .unwrap_err();
        assert!(matches!(err, VendHubError::NotFound { .. }));

        let db = f.svc.db();
        db.update_user(&f.other.user_id, None, Some(false), &NewAction::new("s", "u", "user", ""))
            .unwrap();
        let err = f
            .svc
            .create_task(
                &f.manager,
                CreateTask { assigned_to: Some(f.other.user_id.clone()), ..simple("t", vec![]) },
            )
            .unwrap_err();
        assert!(matches!(err, VendHubError::Validation(_)));
    }

    #[test]
    fn test_full_lifecycle() {
        let f = fixture();
        let detail = f
            .svc
            .create_task(
                &f.manager,
                CreateTask {
                    assigned_to: Some(f.operator.user_id.clone()),
                    ..simple("Refill", vec![plain_step("a"), plain_step("b")])
                },
            )
            .unwrap();
        let id = detail.task.id.clone();

        // Someone else can't start it
        let err = f.svc.start_task(&f.other, &id).unwrap_err();
        assert!(matches!(err, VendHubError::Forbidden(_)));

        let task = f.svc.start_task(&f.operator, &id).unwrap();
        assert_eq!(task.status, TaskStatus::InProgress);
        assert!(task.started_at.is_some());

        let err = f.svc.complete_task(&f.operator, &id).unwrap_err();
        assert!(err.to_string().contains("1, 2"));

        f.svc.complete_step(&f.operator, &id, 1, StepEvidence::default()).unwrap();
        f.svc.complete_step(&f.manager, &id, 2, StepEvidence::default()).unwrap();
        let task = f.svc.complete_task(&f.operator, &id).unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(task.completed_at.is_some());

        // Terminal
        let err = f.svc.start_task(&f.manager, &id).unwrap_err();
        assert!(matches!(err, VendHubError::InvalidTransition { .. }));
        let err = f.svc.cancel_task(&f.manager, &id, "late").unwrap_err();
        assert!(matches!(err, VendHubError::InvalidTransition { .. }));

        // created, started, 2 steps, completed
        let history = f.svc.task_history(&id).unwrap();
        let actions: Vec<&str> = history.iter().map(|e| e.action.as_str()).collect();
        assert_eq!(
            actions,
            vec!["task.created", "task.started", "task.step_completed", "task.step_completed", "task.completed"]
        );
    }

    #[test]
    fn test_unassigned_task_is_self_assigned_on_start() {
        let f = fixture();
        let id = f.svc.create_task(&f.manager, simple("t", vec![])).unwrap().task.id;
        let task = f.svc.start_task(&f.operator, &id).unwrap();
        assert_eq!(task.assigned_to.as_deref(), Some(f.operator.user_id.as_str()));
        // And now the other operator is locked out of its steps
        let err = f.svc.complete_task(&f.other, &id).unwrap_err();
        assert!(matches!(err, VendHubError::Forbidden(_)));
    }

    #[test]
    fn test_step_evidence_rules() {
        let f = fixture();
        let steps = vec![
            NewStep { title: "photo".into(), required: true, requires_photo: true, ..Default::default() },
            NewStep { title: "weight".into(), required: true, requires_weight: true, ..Default::default() },
        ];
        let id = f.svc.create_task(&f.manager, simple("t", steps)).unwrap().task.id;

        // Not started
        let err = f.svc.complete_step(&f.manager, &id, 1, StepEvidence::default()).unwrap_err();
        assert!(matches!(err, VendHubError::Conflict(_)));
        f.svc.start_task(&f.operator, &id).unwrap();

        let blank_photo = StepEvidence { photo_url: Some("  ".into()), ..Default::default() };
        let err = f.svc.complete_step(&f.operator, &id, 1, blank_photo).unwrap_err();
        assert!(matches!(err, VendHubError::Validation(_)));
        let photo = StepEvidence { photo_url: Some("telegram:AgAD".into()), ..Default::default() };
        let step = f.svc.complete_step(&f.operator, &id, 1, photo.clone()).unwrap();
        assert_eq!(step.photo_url.as_deref(), Some("telegram:AgAD"));
        let err = f.svc.complete_step(&f.operator, &id, 1, photo).unwrap_err();
        assert!(matches!(err, VendHubError::Conflict(_)));

        let err = f.svc.complete_step(&f.operator, &id, 2, StepEvidence::default()).unwrap_err();
        assert!(matches!(err, VendHubError::Validation(_)));
        let negative = StepEvidence { weight_grams: Some(-3.0), ..Default::default() };
        assert!(f.svc.complete_step(&f.operator, &id, 2, negative).is_err());
        let ok = StepEvidence { weight_grams: Some(0.0), ..Default::default() };
        assert_eq!(f.svc.complete_step(&f.operator, &id, 2, ok).unwrap().weight_grams, Some(0.0));
    }

    #[test]
    fn test_weighing_step_updates_bunker_and_raises_low_stock() {
        let f = fixture();
        let db = f.svc.db();
        let bunker = db
            .create_bunker("B-7", "cocoa", 1000.0, &NewAction::new("s", "bunker.created", "bunker", ""))
            .unwrap();
        db.fill_bunker(&bunker.id, 900.0, "s", &NewAction::new("s", "bunker.filled", "bunker", &bunker.id))
            .unwrap();
        let weigh = |title: &str| NewStep {
            title: title.into(),
            required: true,
            requires_weight: true,
            bunker_id: Some(bunker.id.clone()),
            ..Default::default()
        };
        let steps = vec![weigh("Weigh cocoa"), weigh("Weigh cocoa again")];
        let id = f.svc.create_task(&f.manager, simple("t", steps)).unwrap().task.id;
        f.svc.start_task(&f.operator, &id).unwrap();

        f.svc
            .complete_step(&f.operator, &id, 1, StepEvidence { weight_grams: Some(150.0), ..Default::default() })
            .unwrap();
        assert!((db.get_bunker(&bunker.id).unwrap().current_grams - 150.0).abs() < 1e-9);

        let names: Vec<&str> = f
            .hub
            .history(None, 10)
            .iter()
            .map(|e| e.event.name())
            .collect();
        assert_eq!(names[0], "inventory.low_stock");
        assert_eq!(names[1], "task.step_completed");

        // Already below the threshold: no repeat alert
        f.svc
            .complete_step(&f.operator, &id, 2, StepEvidence { weight_grams: Some(120.0), ..Default::default() })
            .unwrap();
        let alerts = f
            .hub
            .history(None, 10)
            .iter()
            .filter(|e| e.event.name() == "inventory.low_stock")
            .count();
        assert_eq!(alerts, 1);
    }

    #[test]
    fn test_cancel_rules() {
        let f = fixture();
        let id = f.svc.create_task(&f.manager, simple("t", vec![])).unwrap().task.id;

        let err = f.svc.cancel_task(&f.manager, &id, "  ").unwrap_err();
        assert!(matches!(err, VendHubError::Validation(_)));
        let err = f.svc.cancel_task(&f.operator, &id, "nope").unwrap_err();
        assert!(matches!(err, VendHubError::Forbidden(_)));

        let task = f.svc.cancel_task(&f.manager, &id, "machine removed").unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert_eq!(task.cancel_reason.as_deref(), Some("machine removed"));
    }

    #[test]
    fn test_assign_rules() {
        let f = fixture();
        let id = f.svc.create_task(&f.manager, simple("t", vec![])).unwrap().task.id;
        assert!(matches!(
            f.svc.assign_task(&f.operator, &id, &f.operator.user_id),
            Err(VendHubError::Forbidden(_))
        ));
        let task = f.svc.assign_task(&f.manager, &id, &f.other.user_id).unwrap();
        assert_eq!(task.assigned_to.as_deref(), Some(f.other.user_id.as_str()));
        assert!(matches!(
            f.svc.assign_task(&f.manager, &id, "ghost"),
            Err(VendHubError::NotFound { .. })
        ));

        f.svc.cancel_task(&f.manager, &id, "dup").unwrap();
        assert!(matches!(
            f.svc.assign_task(&f.manager, &id, &f.operator.user_id),
            Err(VendHubError::Conflict(_))
        ));
    }

    #[test]
    fn test_operator_listing_is_scoped() {
        let f = fixture();
        f.svc
            .create_task(&f.manager, CreateTask { assigned_to: Some(f.operator.user_id.clone()), ..simple("mine", vec![]) })
            .unwrap();
        f.svc.create_task(&f.manager, simple("unassigned", vec![])).unwrap();

        assert_eq!(f.svc.list_tasks_for(&f.manager, &TaskFilter::default()).unwrap().len(), 2);
        let mine = f.svc.list_tasks_for(&f.operator, &TaskFilter::default()).unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].title, "mine");
    }

    #[tokio::test]
    async fn test_events_reach_assignee_room() {
        let f = fixture();
        let mut sub = f.hub.subscribe(&f.operator.user_id, Role::Operator);
        let id = f
            .svc
            .create_task(&f.manager, CreateTask { assigned_to: Some(f.operator.user_id.clone()), ..simple("t", vec![]) })
            .unwrap()
            .task
            .id;
        f.svc.start_task(&f.operator, &id).unwrap();

        assert_eq!(sub.next().await.unwrap().event.name(), "task.created");
        assert_eq!(sub.next().await.unwrap().event.name(), "task.started");
    }

    #[test]
    fn test_templates_require_manager() {
        let f = fixture();
        let steps = vec![TemplateStep {
            title: "Check".into(),
            description: String::new(),
            required: true,
            requires_photo: false,
            requires_weight: false,
        }];
        assert!(matches!(
            f.svc.create_template(&f.operator, "Mine", TaskType::Other, steps.clone()),
            Err(VendHubError::Forbidden(_))
        ));
        assert!(f.svc.create_template(&f.manager, "Empty", TaskType::Other, vec![]).is_err());
        let t = f.svc.create_template(&f.manager, "Quick check", TaskType::Inspection, steps).unwrap();
        assert_eq!(f.svc.get_template(&t.id).unwrap().name, "Quick check");
        assert!(f.svc.delete_template(&f.operator, &t.id).is_err());
        f.svc.delete_template(&f.manager, &t.id).unwrap();
        assert!(f.svc.list_templates().unwrap().is_empty());
    }
}
