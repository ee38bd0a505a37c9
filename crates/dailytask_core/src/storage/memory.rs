use crate::error::AppError;
use crate::model::Task;
use crate::storage::{CommitError, TaskStore, Versioned};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
pub struct MemoryStore {
    tasks: Mutex<BTreeMap<String, Versioned<Task>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tasks(tasks: Vec<Task>) -> Self {
        let tasks = tasks
            .into_iter()
            .map(|task| {
                (
                    task.id.clone(),
                    Versioned {
                        value: task,
                        revision: 0,
                    },
                )
            })
            .collect();
        Self {
            tasks: Mutex::new(tasks),
        }
    }

    fn guard(&self) -> MutexGuard<'_, BTreeMap<String, Versioned<Task>>> {
        self.tasks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TaskStore for MemoryStore {
    fn load(&self, task_id: &str) -> Result<Option<Versioned<Task>>, AppError> {
        Ok(self.guard().get(task_id).cloned())
    }

    fn list(&self) -> Result<Vec<Versioned<Task>>, AppError> {
        Ok(self.guard().values().cloned().collect())
    }

    fn insert(&self, task: Task) -> Result<Versioned<Task>, AppError> {
        let mut tasks = self.guard();
        if tasks.contains_key(&task.id) {
            return Err(AppError::invalid_input(format!(
                "task {} already exists",
                task.id
            )));
        }

        let stored = Versioned {
            value: task,
            revision: 0,
        };
        tasks.insert(stored.value.id.clone(), stored.clone());
        Ok(stored)
    }

    fn commit(&self, task: &Task, expected_revision: u64) -> Result<u64, CommitError> {
        let mut tasks = self.guard();
        let current = tasks.get_mut(&task.id).ok_or(CommitError::Conflict {
            expected: expected_revision,
            actual: None,
        })?;

        if current.revision != expected_revision {
            return Err(CommitError::Conflict {
                expected: expected_revision,
                actual: Some(current.revision),
            });
        }

        current.value = task.clone();
        current.revision += 1;
        Ok(current.revision)
    }

    fn remove(&self, task_id: &str) -> Result<Option<Task>, AppError> {
        Ok(self.guard().remove(task_id).map(|stored| stored.value))
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryStore;
    use crate::model::{Task, TaskKind};
    use crate::storage::{CommitError, TaskStore};
    use std::collections::BTreeMap;
    use time::macros::datetime;

    fn task(id: &str) -> Task {
        Task {
            id: id.to_string(),
            title: "demo".to_string(),
            description: String::new(),
            kind: TaskKind::Share,
            target_link: String::new(),
            departments: Vec::new(),
            active_from: datetime!(2025-12-20 00:00 UTC),
            active_until: datetime!(2025-12-21 00:00 UTC),
            created_at: datetime!(2025-12-20 00:00 UTC),
            updated_at: datetime!(2025-12-20 00:00 UTC),
            completions: Vec::new(),
            in_progress: BTreeMap::new(),
        }
    }

    #[test]
    fn commit_bumps_revision() {
        let store = MemoryStore::with_tasks(vec![task("task-1")]);
        let mut loaded = store.load("task-1").unwrap().unwrap();
        loaded.value.title = "renamed".to_string();

        let revision = store.commit(&loaded.value, loaded.revision).unwrap();
        let reloaded = store.load("task-1").unwrap().unwrap();

        assert_eq!(revision, 1);
        assert_eq!(reloaded.revision, 1);
        assert_eq!(reloaded.value.title, "renamed");
    }

    #[test]
    fn commit_with_stale_revision_conflicts() {
        let store = MemoryStore::with_tasks(vec![task("task-1")]);
        let first = store.load("task-1").unwrap().unwrap();
        let second = store.load("task-1").unwrap().unwrap();

        store.commit(&first.value, first.revision).unwrap();
        let err = store.commit(&second.value, second.revision).unwrap_err();

        assert_eq!(
            err,
            CommitError::Conflict {
                expected: 0,
                actual: Some(1)
            }
        );
    }

    #[test]
    fn commit_after_remove_conflicts() {
        let store = MemoryStore::with_tasks(vec![task("task-1")]);
        let loaded = store.load("task-1").unwrap().unwrap();
        store.remove("task-1").unwrap();

        let err = store.commit(&loaded.value, loaded.revision).unwrap_err();
        assert!(matches!(err, CommitError::Conflict { actual: None, .. }));
    }

    #[test]
    fn insert_rejects_duplicate_id() {
        let store = MemoryStore::new();
        store.insert(task("task-1")).unwrap();

        let err = store.insert(task("task-1")).unwrap_err();
        assert_eq!(err.code(), "invalid_input");
        assert_eq!(store.list().unwrap().len(), 1);
    }
}
