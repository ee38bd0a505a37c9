pub mod json_store;
pub mod memory;
pub mod transaction;

use crate::error::AppError;
use crate::model::Task;
use serde::{Deserialize, Serialize};

pub use json_store::JsonStore;
pub use memory::MemoryStore;

/// A document together with the revision it was read at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Versioned<T> {
    #[serde(flatten)]
    pub value: T,
    #[serde(default)]
    pub revision: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitError {
    /// The document moved on (or vanished) since it was read.
    Conflict {
        expected: u64,
        actual: Option<u64>,
    },
    Store(AppError),
}

impl From<AppError> for CommitError {
    fn from(err: AppError) -> Self {
        Self::Store(err)
    }
}

/// Persistence for task documents. `commit` is a compare-and-swap on the
/// document revision; everything that appends to or removes from a task's
/// history goes through [`transaction::run`] on top of it.
pub trait TaskStore: Send + Sync {
    fn load(&self, task_id: &str) -> Result<Option<Versioned<Task>>, AppError>;

    fn list(&self) -> Result<Vec<Versioned<Task>>, AppError>;

    /// Stores a new document at revision 0. Fails if the id is taken.
    fn insert(&self, task: Task) -> Result<Versioned<Task>, AppError>;

    /// Replaces the document if its revision still equals `expected_revision`
    /// and returns the new revision.
    fn commit(&self, task: &Task, expected_revision: u64) -> Result<u64, CommitError>;

    fn remove(&self, task_id: &str) -> Result<Option<Task>, AppError>;
}
