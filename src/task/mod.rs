// src/task/mod.rs

//! Task records and their rules.
//!
//! - [`model`] defines task parameters, status and the stored record.
//! - [`validate`] implements admission control for candidate tasks.
//! - [`store`] owns the records and enforces the legal status transitions.

pub mod model;
pub mod store;
pub mod validate;

pub use model::{AspectRatio, Resolution, Task, TaskId, TaskSpec, TaskStatus, TaskType};
pub use store::{TaskStore, TransitionError};
pub use validate::{ValidationError, validate_spec};
