//! # VendHub Notify
//!
//! In-process event relay. Services publish [`Event`]s to the [`EventHub`];
//! the hub routes each one to a set of [`Room`]s and fans it out to every
//! subscriber whose membership intersects those rooms.
//!
//! ```text
//! TaskService / InventoryService / machines
//!   └── EventHub::publish(event, actor)
//!         ├── routing → rooms (role:ADMIN, role:MANAGER, user:<id>, ...)
//!         ├── NotificationHistory (ring buffer)
//!         └── broadcast channel
//!               ├── WebSocket sessions (filtered by room membership)
//!               └── dispatcher → Notifier (Telegram push to user rooms)
//! ```

pub mod dispatch;
pub mod events;
pub mod hub;
pub mod notify;

pub use dispatch::{Notifier, deliver, escape_markdown, render, spawn_dispatcher};
pub use events::{Envelope, Event, Room};
pub use hub::{EventHub, Subscription};
pub use notify::NotificationHistory;
