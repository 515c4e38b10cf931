//! # VendHub Channels
//! Telegram Bot API client used for the staff bot and push notifications.

pub mod keyboards;
pub mod telegram;

pub use keyboards::{ReplyMarkup, main_menu, task_actions};
pub use telegram::{BotInput, TelegramBot, TelegramPollingStream};
