// src/errors.rs

//! Crate-wide error aliases and helpers.

use thiserror::Error;

use crate::task::{TaskId, TaskStatus, ValidationError};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("no usable sessions in the pool")]
    NoUsableSessions,

    #[error("execution must be started from within a Tokio runtime")]
    NoRuntime,

    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("task {id} is {status}; only failed tasks can be resubmitted")]
    NotResubmittable { id: TaskId, status: TaskStatus },

    #[error("task {id} was already resubmitted as {new_id}")]
    AlreadyResubmitted { id: TaskId, new_id: TaskId },

    #[error("engine has been shut down")]
    ShutDown,

    #[error("invalid task: {0}")]
    Validation(#[from] ValidationError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, EngineError>;
