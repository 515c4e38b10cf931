//! REST handlers. Every response is JSON with an `ok` flag.

use std::collections::HashSet;
use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{FromRequest, FromRequestParts, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::{Value, json};
use vendhub_core::error::VendHubError;
use vendhub_core::types::{Actor, MachineStatus, Role, StepEvidence, TaskType, TemplateStep};
use vendhub_db::TaskFilter;
use vendhub_notify::Room;
use vendhub_tasks::CreateTask;

use crate::server::AppState;
use crate::users::{CreateUser, UpdateUser};

/// A [`VendHubError`] rendered as `{"ok": false, "error": "..."}`.
#[derive(Debug)]
pub struct ApiError(pub VendHubError);

impl From<VendHubError> for ApiError {
    fn from(e: VendHubError) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            VendHubError::NotFound { .. } => StatusCode::NOT_FOUND,
            VendHubError::Validation(_) | VendHubError::Json(_) => StatusCode::BAD_REQUEST,
            VendHubError::AuthFailed(_) => StatusCode::UNAUTHORIZED,
            VendHubError::Forbidden(_) => StatusCode::FORBIDDEN,
            VendHubError::InvalidTransition { .. } | VendHubError::Conflict(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self.0);
        }
        (status, Json(json!({ "ok": false, "error": self.0.to_string() }))).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(VendHubError::validation(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self(VendHubError::validation(rejection.body_text()))
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        Self(VendHubError::validation(rejection.body_text()))
    }
}

/// JSON body whose rejection is rendered as an [`ApiError`].
#[derive(FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct ApiPath<T>(pub T);

pub type ApiResult = Result<Json<Value>, ApiError>;

/// Health check endpoint.
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "vendhub-gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

// ── Auth & users ──────────────────────────────

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

pub async fn login(State(state): State<Arc<AppState>>, ApiJson(req): ApiJson<LoginRequest>) -> ApiResult {
    let user = state.users.login(&req.email, &req.password).await?;
    let token = state.jwt.issue(&user)?;
    tracing::info!("🔑 {} logged in", user.email);
    Ok(Json(json!({ "ok": true, "token": token, "user": user })))
}

pub async fn me(State(state): State<Arc<AppState>>, Extension(actor): Extension<Actor>) -> ApiResult {
    let user = state.db.get_user(&actor.user_id)?;
    Ok(Json(json!({ "ok": true, "user": user })))
}

#[derive(Deserialize)]
pub struct ChangePassword {
    pub current_password: String,
    pub new_password: String,
}

pub async fn change_password(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    ApiJson(req): ApiJson<ChangePassword>,
) -> ApiResult {
    state
        .users
        .change_password(&actor, &req.current_password, &req.new_password)
        .await?;
    Ok(Json(json!({ "ok": true })))
}

pub async fn list_users(State(state): State<Arc<AppState>>, Extension(actor): Extension<Actor>) -> ApiResult {
    let users = state.users.list_users(&actor)?;
    Ok(Json(json!({ "ok": true, "users": users })))
}

pub async fn create_user(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    ApiJson(req): ApiJson<CreateUser>,
) -> ApiResult {
    let user = state.users.create_user(&actor, req).await?;
    Ok(Json(json!({ "ok": true, "user": user })))
}

pub async fn get_user(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    ApiPath(id): ApiPath<String>,
) -> ApiResult {
    let user = state.users.get_user(&actor, &id)?;
    Ok(Json(json!({ "ok": true, "user": user })))
}

pub async fn update_user(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    ApiPath(id): ApiPath<String>,
    ApiJson(req): ApiJson<UpdateUser>,
) -> ApiResult {
    let user = state.users.update_user(&actor, &id, req)?;
    Ok(Json(json!({ "ok": true, "user": user })))
}

#[derive(Deserialize)]
pub struct LinkTelegram {
    pub telegram_id: Option<i64>,
}

pub async fn link_telegram(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    ApiPath(id): ApiPath<String>,
    ApiJson(req): ApiJson<LinkTelegram>,
) -> ApiResult {
    let user = state.users.link_telegram(&actor, &id, req.telegram_id)?;
    Ok(Json(json!({ "ok": true, "user": user })))
}

pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    ApiPath(id): ApiPath<String>,
) -> ApiResult {
    state.users.delete_user(&actor, &id)?;
    Ok(Json(json!({ "ok": true })))
}

// ── Machines ──────────────────────────────

#[derive(Deserialize)]
pub struct CreateMachine {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub location: String,
}

pub async fn list_machines(State(state): State<Arc<AppState>>) -> ApiResult {
    let machines = state.machines.list_machines()?;
    Ok(Json(json!({ "ok": true, "machines": machines })))
}

pub async fn create_machine(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    ApiJson(req): ApiJson<CreateMachine>,
) -> ApiResult {
    let machine = state
        .machines
        .create_machine(&actor, &req.code, &req.name, &req.location)?;
    Ok(Json(json!({ "ok": true, "machine": machine })))
}

pub async fn get_machine(State(state): State<Arc<AppState>>, ApiPath(id): ApiPath<String>) -> ApiResult {
    let machine = state.machines.get_machine(&id)?;
    let bunkers: Vec<_> = state
        .inventory
        .list_bunkers()?
        .into_iter()
        .filter(|b| b.location.machine_id() == Some(id.as_str()))
        .collect();
    Ok(Json(json!({ "ok": true, "machine": machine, "bunkers": bunkers })))
}

#[derive(Deserialize)]
pub struct SetStatus {
    pub status: MachineStatus,
}

pub async fn set_machine_status(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    ApiPath(id): ApiPath<String>,
    ApiJson(req): ApiJson<SetStatus>,
) -> ApiResult {
    let machine = state.machines.set_machine_status(&actor, &id, req.status)?;
    Ok(Json(json!({ "ok": true, "machine": machine })))
}

// ── Tasks ──────────────────────────────

pub async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    ApiQuery(filter): ApiQuery<TaskFilter>,
) -> ApiResult {
    let tasks = state.tasks.list_tasks_for(&actor, &filter)?;
    Ok(Json(json!({ "ok": true, "count": tasks.len(), "tasks": tasks })))
}

pub async fn create_task(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    ApiJson(req): ApiJson<CreateTask>,
) -> ApiResult {
    let task = state.tasks.create_task(&actor, req)?;
    Ok(Json(json!({ "ok": true, "task": task })))
}

pub async fn get_task(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    ApiPath(id): ApiPath<String>,
) -> ApiResult {
    let task = state.tasks.get_task_for(&actor, &id)?;
    Ok(Json(json!({ "ok": true, "task": task })))
}

#[derive(Deserialize)]
pub struct AssignRequest {
    pub user_id: String,
}

pub async fn assign_task(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    ApiPath(id): ApiPath<String>,
    ApiJson(req): ApiJson<AssignRequest>,
) -> ApiResult {
    let task = state.tasks.assign_task(&actor, &id, &req.user_id)?;
    Ok(Json(json!({ "ok": true, "task": task })))
}

pub async fn start_task(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    ApiPath(id): ApiPath<String>,
) -> ApiResult {
    let task = state.tasks.start_task(&actor, &id)?;
    Ok(Json(json!({ "ok": true, "task": task })))
}

pub async fn complete_task(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    ApiPath(id): ApiPath<String>,
) -> ApiResult {
    let task = state.tasks.complete_task(&actor, &id)?;
    Ok(Json(json!({ "ok": true, "task": task })))
}

#[derive(Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: String,
}

pub async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    ApiPath(id): ApiPath<String>,
    ApiJson(req): ApiJson<CancelRequest>,
) -> ApiResult {
    let task = state.tasks.cancel_task(&actor, &id, &req.reason)?;
    Ok(Json(json!({ "ok": true, "task": task })))
}

pub async fn complete_step(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    ApiPath((id, position)): ApiPath<(String, u32)>,
    ApiJson(evidence): ApiJson<StepEvidence>,
) -> ApiResult {
    let step = state.tasks.complete_step(&actor, &id, position, evidence)?;
    Ok(Json(json!({ "ok": true, "step": step })))
}

pub async fn task_history(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    ApiPath(id): ApiPath<String>,
) -> ApiResult {
    state.tasks.get_task_for(&actor, &id)?;
    let entries = state.tasks.task_history(&id)?;
    Ok(Json(json!({ "ok": true, "history": entries })))
}

/// Task counts per status, for dashboard tiles.
pub async fn task_stats(State(state): State<Arc<AppState>>, Extension(actor): Extension<Actor>) -> ApiResult {
    if !actor.role.can_manage_tasks() {
        return Err(VendHubError::forbidden("Only managers can see fleet task statistics").into());
    }
    let counts: serde_json::Map<String, Value> = state
        .db
        .task_counts()?
        .into_iter()
        .map(|(status, n)| (status.to_string(), json!(n)))
        .collect();
    let overdue = state
        .tasks
        .list_tasks(&TaskFilter { overdue: true, ..Default::default() })?
        .len();
    Ok(Json(json!({ "ok": true, "by_status": counts, "overdue": overdue })))
}

// ── Templates ──────────────────────────────

#[derive(Deserialize)]
pub struct CreateTemplate {
    pub name: String,
    pub task_type: TaskType,
    pub steps: Vec<TemplateStep>,
}

pub async fn list_templates(State(state): State<Arc<AppState>>) -> ApiResult {
    let templates = state.tasks.list_templates()?;
    Ok(Json(json!({ "ok": true, "templates": templates })))
}

pub async fn create_template(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    ApiJson(req): ApiJson<CreateTemplate>,
) -> ApiResult {
    let template = state
        .tasks
        .create_template(&actor, &req.name, req.task_type, req.steps)?;
    Ok(Json(json!({ "ok": true, "template": template })))
}

pub async fn get_template(State(state): State<Arc<AppState>>, ApiPath(id): ApiPath<String>) -> ApiResult {
    let template = state.tasks.get_template(&id)?;
    Ok(Json(json!({ "ok": true, "template": template })))
}

pub async fn delete_template(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    ApiPath(id): ApiPath<String>,
) -> ApiResult {
    state.tasks.delete_template(&actor, &id)?;
    Ok(Json(json!({ "ok": true })))
}

// ── Bunkers ──────────────────────────────

#[derive(Deserialize)]
pub struct CreateBunker {
    pub code: String,
    pub ingredient: String,
    pub capacity_grams: f64,
}

#[derive(Deserialize)]
pub struct FillRequest {
    pub grams: f64,
}

#[derive(Deserialize)]
pub struct InstallRequest {
    pub machine_id: String,
}

#[derive(Deserialize)]
pub struct WeighRequest {
    pub weight_grams: f64,
}

pub async fn list_bunkers(State(state): State<Arc<AppState>>) -> ApiResult {
    let bunkers = state.inventory.list_bunkers()?;
    Ok(Json(json!({ "ok": true, "bunkers": bunkers })))
}

pub async fn create_bunker(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    ApiJson(req): ApiJson<CreateBunker>,
) -> ApiResult {
    let bunker = state
        .inventory
        .create_bunker(&actor, &req.code, &req.ingredient, req.capacity_grams)?;
    Ok(Json(json!({ "ok": true, "bunker": bunker })))
}

pub async fn low_stock(State(state): State<Arc<AppState>>) -> ApiResult {
    let bunkers = state.inventory.low_stock()?;
    Ok(Json(json!({
        "ok": true,
        "threshold_percent": state.inventory.low_stock_percent(),
        "bunkers": bunkers,
    })))
}

pub async fn get_bunker(State(state): State<Arc<AppState>>, ApiPath(id): ApiPath<String>) -> ApiResult {
    let bunker = state.inventory.get_bunker(&id)?;
    Ok(Json(json!({ "ok": true, "bunker": bunker, "fill_percent": bunker.fill_percent() })))
}

pub async fn fill_bunker(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    ApiPath(id): ApiPath<String>,
    ApiJson(req): ApiJson<FillRequest>,
) -> ApiResult {
    let bunker = state.inventory.fill(&actor, &id, req.grams)?;
    Ok(Json(json!({ "ok": true, "bunker": bunker })))
}

pub async fn install_bunker(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    ApiPath(id): ApiPath<String>,
    ApiJson(req): ApiJson<InstallRequest>,
) -> ApiResult {
    let bunker = state.inventory.install(&actor, &id, &req.machine_id)?;
    Ok(Json(json!({ "ok": true, "bunker": bunker })))
}

pub async fn remove_bunker(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    ApiPath(id): ApiPath<String>,
) -> ApiResult {
    let bunker = state.inventory.remove(&actor, &id)?;
    Ok(Json(json!({ "ok": true, "bunker": bunker })))
}

pub async fn weigh_bunker(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    ApiPath(id): ApiPath<String>,
    ApiJson(req): ApiJson<WeighRequest>,
) -> ApiResult {
    let bunker = state.inventory.weigh(&actor, &id, req.weight_grams)?;
    Ok(Json(json!({ "ok": true, "bunker": bunker })))
}

pub async fn bunker_movements(State(state): State<Arc<AppState>>, ApiPath(id): ApiPath<String>) -> ApiResult {
    state.inventory.get_bunker(&id)?;
    let movements = state.inventory.movements(&id)?;
    Ok(Json(json!({ "ok": true, "movements": movements })))
}

// ── Audit, notifications, rooms ──────────────────────────────

#[derive(Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
    pub actor_id: Option<String>,
}

pub async fn action_log(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    ApiQuery(q): ApiQuery<LimitQuery>,
) -> ApiResult {
    if !actor.role.can_manage_tasks() {
        return Err(VendHubError::forbidden("Only managers can read the action log").into());
    }
    let limit = q.limit.unwrap_or(50).min(500);
    let entries = match q.actor_id {
        Some(ref id) => state.db.actions_by(id, limit)?,
        None => state.db.recent_actions(limit)?,
    };
    Ok(Json(json!({ "ok": true, "entries": entries })))
}

/// Recent notifications the caller's default rooms can see. Admins see all.
pub async fn notifications(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    ApiQuery(q): ApiQuery<LimitQuery>,
) -> ApiResult {
    let limit = q.limit.unwrap_or(50).min(500);
    let rooms: HashSet<Room> = Room::defaults_for(&actor.user_id, actor.role).into_iter().collect();
    let visible = if actor.role == Role::Admin {
        state.hub.history(None, limit)
    } else {
        state.hub.history(Some(&rooms), limit)
    };
    let items: Vec<&vendhub_notify::Envelope> = visible.iter().map(|e| e.as_ref()).collect();
    Ok(Json(json!({ "ok": true, "notifications": items })))
}

pub async fn rooms(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "ok": true, "rooms": state.hub.room_counts() }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (VendHubError::not_found("Task", "x"), StatusCode::NOT_FOUND),
            (VendHubError::validation("bad"), StatusCode::BAD_REQUEST),
            (VendHubError::AuthFailed("no".into()), StatusCode::UNAUTHORIZED),
            (VendHubError::forbidden("no"), StatusCode::FORBIDDEN),
            (VendHubError::Conflict("dup".into()), StatusCode::CONFLICT),
            (
                VendHubError::InvalidTransition { from: "COMPLETED".into(), to: "IN_PROGRESS".into() },
                StatusCode::CONFLICT,
            ),
            (VendHubError::Database("down".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).status(), status);
        }
    }

    #[tokio::test]
    async fn test_health_check() {
        let state = Arc::new(crate::server::test_state());
        let Json(body) = health_check(State(state)).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "vendhub-gateway");
    }
}
