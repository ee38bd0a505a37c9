use crate::error::AppError;
use crate::model::{SessionUser, Task, TaskKind};
use crate::storage::TaskStore;
use std::collections::BTreeMap;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub title: String,
    pub description: String,
    pub kind: TaskKind,
    pub target_link: String,
    pub departments: Vec<String>,
    pub active_from: OffsetDateTime,
    pub active_until: OffsetDateTime,
}

pub fn parse_instant(raw: &str, field: &str) -> Result<OffsetDateTime, AppError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::invalid_input(format!("{field} is required")));
    }
    OffsetDateTime::parse(trimmed, &Rfc3339)
        .map_err(|_| AppError::invalid_input(format!("{field} must be RFC3339")))
}

pub fn format_instant(instant: OffsetDateTime) -> Result<String, AppError> {
    instant
        .format(&Rfc3339)
        .map_err(|err| AppError::invalid_data(err.to_string()))
}

fn require_admin(session: &SessionUser) -> Result<(), AppError> {
    if session.is_admin() {
        Ok(())
    } else {
        Err(AppError::PermissionDenied(format!(
            "{} is not an admin",
            session.id
        )))
    }
}

pub fn create_task<S: TaskStore + ?Sized>(
    store: &S,
    session: &SessionUser,
    new_task: NewTask,
    now: OffsetDateTime,
) -> Result<Task, AppError> {
    require_admin(session)?;

    let title = new_task.title.trim();
    if title.is_empty() {
        return Err(AppError::invalid_input("title is required"));
    }
    if new_task.active_until <= new_task.active_from {
        return Err(AppError::invalid_input(
            "active_until must be after active_from",
        ));
    }

    let departments = new_task
        .departments
        .iter()
        .map(|department| department.trim())
        .filter(|department| !department.is_empty())
        .map(str::to_string)
        .collect();

    let task = Task {
        id: format!("task-{}", now.unix_timestamp_nanos()),
        title: title.to_string(),
        description: new_task.description.trim().to_string(),
        kind: new_task.kind,
        target_link: new_task.target_link.trim().to_string(),
        departments,
        active_from: new_task.active_from,
        active_until: new_task.active_until,
        created_at: now,
        updated_at: now,
        completions: Vec::new(),
        in_progress: BTreeMap::new(),
    };

    let stored = store.insert(task)?;
    info!(task_id = %stored.value.id, created_by = %session.id, "task created");
    Ok(stored.value)
}

/// Current persisted document. May trail a transaction that is in flight.
pub fn get_task<S: TaskStore + ?Sized>(store: &S, task_id: &str) -> Result<Task, AppError> {
    let trimmed_id = task_id.trim();
    if trimmed_id.is_empty() {
        return Err(AppError::invalid_input("id is required"));
    }

    store
        .load(trimmed_id)?
        .map(|stored| stored.value)
        .ok_or_else(|| AppError::not_found(format!("task {trimmed_id} not found")))
}

pub fn list_tasks<S: TaskStore + ?Sized>(store: &S) -> Result<Vec<Task>, AppError> {
    Ok(store
        .list()?
        .into_iter()
        .map(|stored| stored.value)
        .collect())
}

pub fn list_active_tasks<S: TaskStore + ?Sized>(
    store: &S,
    now: OffsetDateTime,
) -> Result<Vec<Task>, AppError> {
    Ok(list_tasks(store)?
        .into_iter()
        .filter(|task| task.is_active_at(now))
        .collect())
}

pub fn delete_task<S: TaskStore + ?Sized>(
    store: &S,
    session: &SessionUser,
    task_id: &str,
) -> Result<Task, AppError> {
    require_admin(session)?;

    let trimmed_id = task_id.trim();
    if trimmed_id.is_empty() {
        return Err(AppError::invalid_input("id is required"));
    }

    let removed = store
        .remove(trimmed_id)?
        .ok_or_else(|| AppError::not_found(format!("task {trimmed_id} not found")))?;
    info!(task_id = %removed.id, deleted_by = %session.id, "task deleted");
    Ok(removed)
}
