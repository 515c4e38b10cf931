//! # VendHub Tasks
//!
//! Task lifecycle for field staff: creation from checklist templates,
//! assignment, start, step-by-step checklist completion with photo and
//! weight evidence, completion and cancellation.

pub mod service;
pub mod templates;
pub mod transitions;

pub use service::{CreateTask, TaskService};
pub use templates::{default_templates, seed_default_templates};
pub use transitions::{can_transition, check_transition};
