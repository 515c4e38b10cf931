//! Reply and inline keyboards shown by the bot.

use serde::Serialize;
use vendhub_core::types::{Role, TaskDetail, TaskStatus};

pub const BTN_MY_TASKS: &str = "📋 My tasks";
pub const BTN_OPEN_TASKS: &str = "🗂 All open tasks";
pub const BTN_MACHINES: &str = "🏪 Machines";
pub const BTN_LOW_STOCK: &str = "📉 Low stock";
pub const BTN_HELP: &str = "❓ Help";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ReplyMarkup {
    Keyboard(ReplyKeyboard),
    Inline(InlineKeyboard),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplyKeyboard {
    pub keyboard: Vec<Vec<KeyboardButton>>,
    pub resize_keyboard: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct KeyboardButton {
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InlineKeyboard {
    pub inline_keyboard: Vec<Vec<InlineButton>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InlineButton {
    pub text: String,
    pub callback_data: String,
}

impl InlineButton {
    fn new(text: impl Into<String>, callback_data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            callback_data: callback_data.into(),
        }
    }
}

/// Main menu for a role. Buttons a role cannot use are left out.
pub fn main_menu(role: Role) -> ReplyMarkup {
    let mut rows = vec![vec![BTN_MY_TASKS]];
    if role.can_manage_tasks() {
        rows[0].push(BTN_OPEN_TASKS);
    }

    let mut second = Vec::new();
    if role.can_manage_machines() {
        second.push(BTN_MACHINES);
    }
    if role.can_manage_inventory() {
        second.push(BTN_LOW_STOCK);
    }
    if !second.is_empty() {
        rows.push(second);
    }
    rows.push(vec![BTN_HELP]);

    ReplyMarkup::Keyboard(ReplyKeyboard {
        keyboard: rows
            .into_iter()
            .map(|row| {
                row.into_iter()
                    .map(|t| KeyboardButton { text: t.to_string() })
                    .collect()
            })
            .collect(),
        resize_keyboard: true,
    })
}

/// Action buttons for a task, depending on where it is in its lifecycle.
/// Returns `None` for finished tasks.
pub fn task_actions(detail: &TaskDetail) -> Option<ReplyMarkup> {
    let id = &detail.task.id;
    let mut rows = Vec::new();
    match detail.task.status {
        TaskStatus::Created => {
            rows.push(vec![InlineButton::new("▶️ Start", format!("begin:{id}"))]);
        }
        TaskStatus::InProgress => {
            // Steps needing a photo are completed by sending one with a /step caption.
            for step in detail
                .checklist
                .iter()
                .filter(|s| !s.completed && !s.requires_photo && !s.requires_weight)
            {
                rows.push(vec![InlineButton::new(
                    format!("☑️ {}. {}", step.position, step.title),
                    format!("step:{id}:{}", step.position),
                )]);
            }
            if detail.missing_required().is_empty() {
                rows.push(vec![InlineButton::new("✅ Complete", format!("done:{id}"))]);
            }
        }
        TaskStatus::Completed | TaskStatus::Cancelled => return None,
    }
    rows.push(vec![InlineButton::new("🔄 Refresh", format!("view:{id}"))]);
    Some(ReplyMarkup::Inline(InlineKeyboard { inline_keyboard: rows }))
}
