//! # VendHub Gateway
//!
//! The outer surface of VendHub Manager:
//! - JSON REST API for the admin dashboard (JWT bearer auth)
//! - WebSocket relay of hub events, filtered by room membership
//! - Telegram bot handlers for field staff

pub mod auth;
pub mod bot;
pub mod routes;
pub mod server;
pub mod users;
pub mod ws;

pub use server::{AppState, build_router, serve};
pub use users::{CreateUser, UserService, generate_password};
