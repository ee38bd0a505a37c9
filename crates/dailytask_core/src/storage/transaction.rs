use crate::error::AppError;
use crate::model::Task;
use crate::storage::{CommitError, TaskStore};
use tracing::{debug, warn};

/// What a transaction body decided to do with its draft.
#[derive(Debug)]
pub enum Mutation<T> {
    /// Persist the draft and hand `T` back to the caller.
    Write(T),
    /// Leave the stored document alone.
    Unchanged(T),
}

/// Optimistic read-modify-write of one task document.
///
/// `apply` receives a fresh copy of the document on every attempt and must
/// derive its decision from that copy only. A lost compare-and-swap reloads
/// and re-runs `apply`, up to `max_retries` extra attempts; errors returned
/// by `apply` abort immediately.
pub fn run<S, T, F>(store: &S, task_id: &str, max_retries: u32, mut apply: F) -> Result<T, AppError>
where
    S: TaskStore + ?Sized,
    F: FnMut(&mut Task) -> Result<Mutation<T>, AppError>,
{
    let mut attempts = 0;
    loop {
        attempts += 1;
        let current = store
            .load(task_id)?
            .ok_or_else(|| AppError::not_found(format!("task {task_id} not found")))?;

        let mut draft = current.value.clone();
        let output = match apply(&mut draft)? {
            Mutation::Unchanged(output) => return Ok(output),
            Mutation::Write(output) => output,
        };

        match store.commit(&draft, current.revision) {
            Ok(revision) => {
                debug!(task_id, revision, attempts, "committed task document");
                return Ok(output);
            }
            Err(CommitError::Conflict { expected, actual }) => {
                if attempts > max_retries {
                    warn!(task_id, attempts, "giving up on contended task document");
                    return Err(AppError::Conflict { attempts });
                }
                warn!(
                    task_id,
                    expected,
                    actual = ?actual,
                    attempts,
                    "write conflict on task document, retrying"
                );
            }
            Err(CommitError::Store(err)) => return Err(err),
        }
    }
}
