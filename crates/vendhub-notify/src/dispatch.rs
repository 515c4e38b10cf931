//! Notification dispatch: pushes events addressed to a user out to their chat.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_util::sync::CancellationToken;
use vendhub_core::error::Result;
use vendhub_db::VendDb;

use crate::events::Envelope;
use crate::hub::EventHub;

/// A channel capable of delivering a text message to a chat.
///
/// Implemented by the Telegram bot client in `vendhub-channels`.
#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;

    async fn notify(&self, chat_id: i64, text: &str) -> Result<()>;
}

/// Escape Telegram Markdown (v1) special characters.
pub fn escape_markdown(s: &str) -> String {
    s.replace('_', "\\_")
        .replace('*', "\\*")
        .replace('[', "\\[")
        .replace('`', "\\`")
}

/// Format an envelope as a chat message.
pub fn render(envelope: &Envelope) -> String {
    let mut text = escape_markdown(&envelope.summary);
    if let Some(task) = envelope.event.task() {
        text.push_str(&format!("\n`/task {}`", task.id));
    }
    text
}

/// Deliver one envelope to every directly addressed user with a linked chat.
/// Returns the number of messages sent.
pub async fn deliver(envelope: &Envelope, db: &VendDb, notifier: &dyn Notifier) -> usize {
    let mut sent = 0;
    for user_id in envelope.direct_recipients() {
        let chat_id = match db.get_user(user_id) {
            Ok(user) if user.active => user.telegram_id,
            Ok(_) => None,
            Err(e) => {
                tracing::debug!("Skip push to {user_id}: {e}");
                None
            }
        };
        let Some(chat_id) = chat_id else { continue };
        match notifier.notify(chat_id, &render(envelope)).await {
            Ok(()) => sent += 1,
            Err(e) => tracing::warn!("{} push to {user_id} failed: {e}", notifier.name()),
        }
    }
    sent
}

/// Background task forwarding hub events to a notifier until `stop` is
/// cancelled or the hub closes.
pub fn spawn_dispatcher(
    hub: &EventHub,
    db: Arc<VendDb>,
    notifier: Arc<dyn Notifier>,
    stop: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    let mut stream = hub.tap();
    tokio::spawn(async move {
        tracing::info!("📨 Notification dispatcher started ({})", notifier.name());
        loop {
            let item = tokio::select! {
                _ = stop.cancelled() => break,
                item = stream.next() => item,
            };
            let Some(item) = item else { break };
            match item {
                Ok(envelope) => {
                    let sent = deliver(&envelope, &db, notifier.as_ref()).await;
                    if sent > 0 {
                        tracing::info!("📨 {} pushed to {sent} chat(s)", envelope.event.name());
                    }
                }
                Err(BroadcastStreamRecvError::Lagged(n)) => {
                    tracing::warn!("Dispatcher lagged, {n} events not pushed");
                }
            }
        }
        tracing::info!("Notification dispatcher stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Event;
    use chrono::Utc;
    use std::sync::Mutex;
    use vendhub_core::types::{Role, Task, TaskPriority, TaskStatus, TaskType};
    use vendhub_db::NewAction;

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<(i64, String)>>,
    }

    #[async_trait]
    impl Notifier for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        async fn notify(&self, chat_id: i64, text: &str) -> Result<()> {
            self.sent.lock().unwrap().push((chat_id, text.to_string()));
            Ok(())
        }
    }

    fn assigned_task(user_id: &str) -> Task {
        let now = Utc::now();
        Task {
            id: "t-42".into(),
            title: "Collect_cash".into(),
            description: String::new(),
            task_type: TaskType::CashCollection,
            status: TaskStatus::Created,
            priority: TaskPriority::Urgent,
            machine_id: None,
            assigned_to: Some(user_id.to_string()),
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
    fn test_escape_markdown() {
        assert_eq!(escape_markdown("a_b*c[d`"), "a\\_b\\*c\\[d\\`");
    }

    #[tokio::test]
    async fn test_deliver_to_linked_assignee() {
        let db = VendDb::in_memory().unwrap();
        let act = NewAction::new("system", "user.created", "user", "");
        let linked = db.create_user("Op", "op@x.uz", "h", Role::Operator, &act).unwrap();
        db.link_telegram(&linked.id, Some(5001), &act).unwrap();
        let unlinked = db.create_user("Dr", "dr@x.uz", "h", Role::Driver, &act).unwrap();

        let hub = EventHub::default();
        let recorder = Recorder::default();

        let env = hub.publish(Event::TaskAssigned { task: assigned_task(&linked.id) }, "mgr");
        assert_eq!(deliver(&env, &db, &recorder).await, 1);

        let env = hub.publish(Event::TaskAssigned { task: assigned_task(&unlinked.id) }, "mgr");
        assert_eq!(deliver(&env, &db, &recorder).await, 0);

        // The assignee acting on their own task is not pinged
        let env = hub.publish(Event::TaskStarted { task: assigned_task(&linked.id) }, &linked.id);
        assert_eq!(deliver(&env, &db, &recorder).await, 0);

        let sent = recorder.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, 5001);
        assert!(sent[0].1.contains("Collect\\_cash"));
        assert!(sent[0].1.contains("/task t-42"));
    }

    #[tokio::test]
    async fn test_dispatcher_pushes_until_stopped() {
        let db = Arc::new(VendDb::in_memory().unwrap());
        let act = NewAction::new("system", "user.created", "user", "");
        let op = db.create_user("Op", "op@x.uz", "h", Role::Operator, &act).unwrap();
        db.link_telegram(&op.id, Some(5001), &act).unwrap();

        let hub = EventHub::default();
        let recorder = Arc::new(Recorder::default());
        let stop = CancellationToken::new();
        let handle = spawn_dispatcher(&hub, db, recorder.clone(), stop.clone());

        hub.publish(Event::TaskAssigned { task: assigned_task(&op.id) }, "mgr");
        for _ in 0..50 {
            if !recorder.sent.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert_eq!(recorder.sent.lock().unwrap().len(), 1);

        stop.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(2), handle)
            .await
            .expect("dispatcher did not stop")
            .unwrap();
    }
}
