//! Telegram bot front end. Commands, photo captions and inline buttons map
//! onto the same services as the HTTP API, acting as the linked user.

use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use vendhub_channels::keyboards::{BTN_HELP, BTN_LOW_STOCK, BTN_MACHINES, BTN_MY_TASKS, BTN_OPEN_TASKS};
use vendhub_channels::{BotInput, ReplyMarkup, TelegramBot, main_menu, task_actions};
use vendhub_core::error::{Result, VendHubError};
use vendhub_core::types::{Actor, StepEvidence, Task, TaskDetail, TaskStatus, User};
use vendhub_db::TaskFilter;
use vendhub_notify::escape_markdown;

use crate::server::AppState;

const LIST_LIMIT: u32 = 20;
/// Shortest id prefix accepted in place of a full task id.
const MIN_ID_PREFIX: usize = 6;

const HELP: &str = "*Commands*\n\
/tasks - my open tasks\n\
/task <id> - task card\n\
/begin <id> - start a task\n\
/step <id> <n> [weight] [notes] - complete step n\n\
/done <id> - complete a task\n\
/cancel <id> <reason> - cancel a task\n\
/machines - machine fleet\n\n\
Photo steps: send the photo with caption `/step <id> <n>`.\n\
Task ids may be shortened to their first 8 characters.";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start,
    Help,
    MyTasks,
    OpenTasks,
    Task(String),
    Begin(String),
    Step {
        task_id: String,
        position: u32,
        weight: Option<f64>,
        notes: Option<String>,
    },
    Done(String),
    Cancel { task_id: String, reason: String },
    Machines,
    LowStock,
}

fn usage(text: &str) -> VendHubError {
    VendHubError::validation(format!("Usage: {text}"))
}

impl Command {
    /// Parse a chat message: a slash command or a main-menu button label.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        match text {
            BTN_MY_TASKS => return Ok(Command::MyTasks),
            BTN_OPEN_TASKS => return Ok(Command::OpenTasks),
            BTN_MACHINES => return Ok(Command::Machines),
            BTN_LOW_STOCK => return Ok(Command::LowStock),
            BTN_HELP => return Ok(Command::Help),
            _ => {}
        }

        let mut words = text.split_whitespace();
        let head = words.next().unwrap_or_default();
        // Group chats address commands as /cmd@BotName
        let cmd = head.split('@').next().unwrap_or_default().to_ascii_lowercase();
        let args: Vec<&str> = words.collect();
        let id_arg = |name: &str| {
            args.first()
                .map(|s| s.to_string())
                .ok_or_else(|| usage(&format!("/{name} <task id>")))
        };

        match cmd.as_str() {
            "/start" => Ok(Command::Start),
            "/help" => Ok(Command::Help),
            "/tasks" => Ok(Command::MyTasks),
            "/open" => Ok(Command::OpenTasks),
            "/machines" => Ok(Command::Machines),
            "/lowstock" => Ok(Command::LowStock),
            "/task" => Ok(Command::Task(id_arg("task")?)),
            "/begin" => Ok(Command::Begin(id_arg("begin")?)),
            "/done" => Ok(Command::Done(id_arg("done")?)),
            "/cancel" => {
                let (Some(task_id), true) = (args.first(), args.len() > 1) else {
                    return Err(usage("/cancel <task id> <reason>"));
                };
                Ok(Command::Cancel {
                    task_id: task_id.to_string(),
                    reason: args[1..].join(" "),
                })
            }
            "/step" => {
                let step_usage = || usage("/step <task id> <position> [weight] [notes]");
                let (Some(task_id), Some(position)) = (args.first(), args.get(1)) else {
                    return Err(step_usage());
                };
                let position: u32 = position.parse().map_err(|_| step_usage())?;
                let mut rest = &args[2..];
                let weight = rest.first().and_then(|w| w.replace(',', ".").parse::<f64>().ok());
                if weight.is_some() {
                    rest = &rest[1..];
                }
                let notes = (!rest.is_empty()).then(|| rest.join(" "));
                Ok(Command::Step {
                    task_id: task_id.to_string(),
                    position,
                    weight,
                    notes,
                })
            }
            _ => Err(VendHubError::validation("Unknown command. Send /help for the list.")),
        }
    }

    /// Parse inline button data: `begin:<id>`, `done:<id>`, `view:<id>`, `step:<id>:<n>`.
    pub fn from_callback(data: &str) -> Result<Self> {
        let unknown = || VendHubError::validation(format!("Unknown action: {data}"));
        let (action, rest) = data.split_once(':').ok_or_else(unknown)?;
        match action {
            "begin" => Ok(Command::Begin(rest.to_string())),
            "done" => Ok(Command::Done(rest.to_string())),
            "view" => Ok(Command::Task(rest.to_string())),
            "step" => {
                let (task_id, pos) = rest.rsplit_once(':').ok_or_else(unknown)?;
                Ok(Command::Step {
                    task_id: task_id.to_string(),
                    position: pos.parse().map_err(|_| unknown())?,
                    weight: None,
                    notes: None,
                })
            }
            _ => Err(unknown()),
        }
    }
}

/// What to send back for one input.
#[derive(Debug, Clone, PartialEq)]
pub struct BotReply {
    pub text: String,
    pub markup: Option<ReplyMarkup>,
    /// Callback query to acknowledge, if the input was a button press.
    pub ack: Option<String>,
}

impl BotReply {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            markup: None,
            ack: None,
        }
    }

    fn with_markup(mut self, markup: Option<ReplyMarkup>) -> Self {
        self.markup = markup;
        self
    }
}

fn error_text(e: &VendHubError) -> String {
    match e {
        VendHubError::Validation(m) | VendHubError::Conflict(m) | VendHubError::Forbidden(m) => {
            format!("⚠️ {}", escape_markdown(m))
        }
        VendHubError::NotFound { .. } | VendHubError::InvalidTransition { .. } => {
            format!("⛔ {}", escape_markdown(&e.to_string()))
        }
        other => {
            tracing::error!("Bot command failed: {other}");
            "❌ Something went wrong, please try again later.".into()
        }
    }
}

fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

fn status_icon(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Created => "🆕",
        TaskStatus::InProgress => "🔄",
        TaskStatus::Completed => "✅",
        TaskStatus::Cancelled => "❌",
    }
}

/// Enum labels such as `IN_PROGRESS` carry underscores.
fn label(value: &impl std::fmt::Display) -> String {
    escape_markdown(&value.to_string())
}

fn task_line(task: &Task) -> String {
    format!(
        "{} `{}` {} [{}]",
        status_icon(task.status),
        short_id(&task.id),
        escape_markdown(&task.title),
        label(&task.priority)
    )
}

fn task_card(state: &AppState, detail: &TaskDetail) -> String {
    let task = &detail.task;
    let mut out = format!(
        "{} *{}*\n`{}`\n{} · {} · {}",
        status_icon(task.status),
        escape_markdown(&task.title),
        task.id,
        label(&task.task_type),
        label(&task.priority),
        label(&task.status)
    );
    if let Some(ref machine_id) = task.machine_id {
        let machine = state
            .db
            .get_machine(machine_id)
            .map(|m| format!("{} {}", m.code, m.name))
            .unwrap_or_else(|_| machine_id.clone());
        out.push_str(&format!("\n🏪 {}", escape_markdown(&machine)));
    }
    if let Some(due) = task.due_at {
        out.push_str(&format!("\n⏰ Due {}", due.format("%Y-%m-%d %H:%M UTC")));
    }
    if !task.description.is_empty() {
        out.push_str(&format!("\n\n{}", escape_markdown(&task.description)));
    }
    if !detail.checklist.is_empty() {
        out.push_str("\n\n*Checklist*");
        for step in &detail.checklist {
            out.push_str(&format!(
                "\n{} {}. {}{}{}{}",
                if step.completed { "✅" } else { "⬜" },
                step.position,
                escape_markdown(&step.title),
                if step.requires_photo { " 📷" } else { "" },
                if step.requires_weight { " ⚖️" } else { "" },
                if step.required { "" } else { " (optional)" },
            ));
        }
    }
    out
}

/// Accept a full id or a unique prefix of a task the actor can see.
fn resolve_task_id(state: &AppState, actor: &Actor, raw: &str) -> Result<String> {
    match state.db.get_task(raw) {
        Ok(task) => return Ok(task.id),
        Err(VendHubError::NotFound { .. }) if raw.len() >= MIN_ID_PREFIX => {}
        Err(e) => return Err(e),
    }
    let matches: Vec<Task> = state
        .tasks
        .list_tasks_for(actor, &TaskFilter::default())?
        .into_iter()
        .filter(|t| t.id.starts_with(raw))
        .collect();
    match matches.as_slice() {
        [one] => Ok(one.id.clone()),
        [] => Err(VendHubError::not_found("Task", raw)),
        _ => Err(VendHubError::validation(format!("Ambiguous task id {raw}; use more characters"))),
    }
}

fn card_reply(state: &AppState, header: &str, detail: &TaskDetail) -> BotReply {
    let card = task_card(state, detail);
    let text = if header.is_empty() { card } else { format!("{header}\n\n{card}") };
    BotReply::text(text).with_markup(task_actions(detail))
}

fn list_reply(title: &str, tasks: &[Task], empty: &str) -> BotReply {
    if tasks.is_empty() {
        return BotReply::text(empty);
    }
    let lines: Vec<String> = tasks.iter().map(task_line).collect();
    BotReply::text(format!("*{title}* ({})\n{}\n\nOpen one with /task <id>", tasks.len(), lines.join("\n")))
}

fn execute(state: &AppState, user: &User, actor: &Actor, cmd: Command, photo: Option<String>) -> Result<BotReply> {
    match cmd {
        Command::Start => Ok(BotReply::text(format!(
            "👋 Hello, {}! You are signed in as *{}*.\nUse the menu below or /help.",
            escape_markdown(&user.name),
            label(&user.role)
        ))
        .with_markup(Some(main_menu(user.role)))),
        Command::Help => Ok(BotReply::text(HELP).with_markup(Some(main_menu(user.role)))),
        Command::MyTasks => {
            let filter = TaskFilter {
                assigned_to: Some(actor.user_id.clone()),
                open: true,
                limit: Some(LIST_LIMIT),
                ..Default::default()
            };
            let tasks = state.tasks.list_tasks(&filter)?;
            Ok(list_reply("My tasks", &tasks, "No open tasks 🎉"))
        }
        Command::OpenTasks => {
            if !actor.role.can_manage_tasks() {
                return Err(VendHubError::forbidden("Only managers can see all tasks"));
            }
            let filter = TaskFilter {
                open: true,
                limit: Some(LIST_LIMIT),
                ..Default::default()
            };
            let tasks = state.tasks.list_tasks_for(actor, &filter)?;
            Ok(list_reply("Open tasks", &tasks, "No open tasks 🎉"))
        }
        Command::Task(raw) => {
            let id = resolve_task_id(state, actor, &raw)?;
            let detail = state.tasks.get_task_for(actor, &id)?;
            Ok(card_reply(state, "", &detail))
        }
        Command::Begin(raw) => {
            let id = resolve_task_id(state, actor, &raw)?;
            state.tasks.start_task(actor, &id)?;
            let detail = state.tasks.get_task(&id)?;
            Ok(card_reply(state, "▶️ Task started", &detail))
        }
        Command::Step { task_id, position, weight, notes } => {
            let id = resolve_task_id(state, actor, &task_id)?;
            let evidence = StepEvidence {
                photo_url: photo,
                weight_grams: weight,
                notes,
            };
            let step = state.tasks.complete_step(actor, &id, position, evidence)?;
            let detail = state.tasks.get_task(&id)?;
            let header = format!("✔️ Step {} done: {}", step.position, escape_markdown(&step.title));
            Ok(card_reply(state, &header, &detail))
        }
        Command::Done(raw) => {
            let id = resolve_task_id(state, actor, &raw)?;
            let task = state.tasks.complete_task(actor, &id)?;
            Ok(BotReply::text(format!("✅ Task completed: {}", escape_markdown(&task.title))))
        }
        Command::Cancel { task_id, reason } => {
            let id = resolve_task_id(state, actor, &task_id)?;
            let task = state.tasks.cancel_task(actor, &id, &reason)?;
            Ok(BotReply::text(format!("❌ Task cancelled: {}", escape_markdown(&task.title))))
        }
        Command::Machines => {
            if !actor.role.can_manage_machines() {
                return Err(VendHubError::forbidden("Machines are visible to managers and technicians"));
            }
            let machines = state.machines.list_machines()?;
            if machines.is_empty() {
                return Ok(BotReply::text("No machines registered"));
            }
            let lines: Vec<String> = machines
                .iter()
                .map(|m| {
                    format!(
                        "`{}` {} · {} · {}",
                        m.code,
                        escape_markdown(&m.name),
                        escape_markdown(&m.location),
                        label(&m.status)
                    )
                })
                .collect();
            Ok(BotReply::text(format!("*Machines* ({})\n{}", machines.len(), lines.join("\n"))))
        }
        Command::LowStock => {
            if !actor.role.can_manage_inventory() {
                return Err(VendHubError::forbidden("Stock levels are visible to managers and warehouse staff"));
            }
            let bunkers = state.inventory.low_stock()?;
            if bunkers.is_empty() {
                return Ok(BotReply::text("All bunkers above the low-stock threshold 👍"));
            }
            let lines: Vec<String> = bunkers
                .iter()
                .map(|b| {
                    format!(
                        "`{}` {} {:.0}% ({:.0}/{:.0} g)",
                        b.code,
                        escape_markdown(&b.ingredient),
                        b.fill_percent(),
                        b.current_grams,
                        b.capacity_grams
                    )
                })
                .collect();
            Ok(BotReply::text(format!("*Low stock*\n{}", lines.join("\n"))))
        }
    }
}

/// Build the reply for one input. Never fails: errors become chat text.
pub fn respond(state: &AppState, input: &BotInput) -> BotReply {
    let ack = match input {
        BotInput::Callback { query_id, .. } => Some(query_id.clone()),
        _ => None,
    };
    let mut reply = respond_inner(state, input).unwrap_or_else(|e| BotReply::text(error_text(&e)));
    reply.ack = ack;
    reply
}

fn respond_inner(state: &AppState, input: &BotInput) -> Result<BotReply> {
    let from_id = input.from_id();
    let Some(user) = state.db.get_user_by_telegram(from_id)? else {
        tracing::info!("Telegram user {from_id} is not linked");
        return Ok(BotReply::text(format!(
            "👋 This bot is for VendHub staff.\nYour Telegram id is `{from_id}`.\n\
             Ask an administrator to link it to your account."
        )));
    };
    if !user.active {
        return Ok(BotReply::text("🚫 Your account is deactivated."));
    }
    let actor = Actor::new(user.id.clone(), user.role);

    match input {
        BotInput::Text { text, .. } => execute(state, &user, &actor, Command::parse(text)?, None),
        BotInput::Photo { file_id, caption, .. } => {
            let cmd = caption.as_deref().map(Command::parse).transpose()?;
            match cmd {
                Some(cmd @ Command::Step { .. }) => {
                    execute(state, &user, &actor, cmd, Some(format!("telegram:{file_id}")))
                }
                _ => Ok(BotReply::text(
                    "📷 To attach a photo to a step, send it with the caption `/step <task id> <position>`",
                )),
            }
        }
        BotInput::Callback { data, .. } => execute(state, &user, &actor, Command::from_callback(data)?, None),
    }
}

/// Poll Telegram and answer every input until `stop` is cancelled.
pub async fn run_bot(state: Arc<AppState>, bot: TelegramBot, stop: CancellationToken) {
    let mut stream = bot.clone().start_polling(stop);
    tracing::info!("🤖 Telegram bot handler running");

    while let Some(input) = stream.next().await {
        let reply = respond(&state, &input);
        if let Some(ref query_id) = reply.ack
            && let Err(e) = bot.answer_callback_query(query_id, None).await
        {
            tracing::debug!("answerCallbackQuery failed: {e}");
        }
        if let Err(e) = bot
            .send_message(input.chat_id(), &reply.text, reply.markup.as_ref())
            .await
        {
            tracing::warn!("Telegram reply to {} failed: {e}", input.chat_id());
        }
    }
    tracing::info!("Telegram bot handler stopped");
}
