use crate::error::AppError;
use crate::model::Task;
use crate::storage::{CommitError, TaskStore, Versioned};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

pub const SCHEMA_VERSION: u32 = 2;
const STORE_FILE_NAME: &str = "tasks.json";
const STORE_ENV_VAR: &str = "DAILYTASK_STORE_PATH";

// Serializes read-compare-write cycles on the file within this process.
static FILE_LOCK: Mutex<()> = Mutex::new(());

#[derive(Debug, Serialize, Deserialize)]
struct StoredTasks {
    schema_version: u32,
    tasks: Vec<Versioned<Task>>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TaskState {
    pub tasks: Vec<Versioned<Task>>,
}

pub fn store_path(configured: Option<&str>) -> Result<PathBuf, AppError> {
    if let Ok(path) = std::env::var(STORE_ENV_VAR)
        && !path.trim().is_empty()
    {
        return Ok(PathBuf::from(path));
    }

    if let Some(path) = configured
        && !path.trim().is_empty()
    {
        return Ok(PathBuf::from(path));
    }

    if cfg!(windows) {
        let appdata =
            std::env::var("APPDATA").map_err(|_| AppError::invalid_data("APPDATA is not set"))?;
        Ok(PathBuf::from(appdata)
            .join("dailytask")
            .join(STORE_FILE_NAME))
    } else {
        let home = std::env::var("HOME").map_err(|_| AppError::invalid_data("HOME is not set"))?;
        Ok(PathBuf::from(home)
            .join(".config")
            .join("dailytask")
            .join(STORE_FILE_NAME))
    }
}

pub fn load_state(path: &Path) -> Result<TaskState, AppError> {
    if !path.exists() {
        return Ok(TaskState::default());
    }

    let content = std::fs::read_to_string(path).map_err(|err| AppError::io(err.to_string()))?;
    let raw: Value =
        serde_json::from_str(&content).map_err(|err| AppError::invalid_data(err.to_string()))?;
    let stored: StoredTasks = serde_json::from_value(migrate(raw)?)
        .map_err(|err| AppError::invalid_data(err.to_string()))?;

    let mut seen = HashSet::new();
    for task in &stored.tasks {
        if !seen.insert(task.value.id.as_str()) {
            return Err(AppError::invalid_data(format!(
                "duplicate task id {}",
                task.value.id
            )));
        }
    }

    Ok(TaskState {
        tasks: stored.tasks,
    })
}

pub fn save_state(path: &Path, state: &TaskState) -> Result<(), AppError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|err| AppError::io(err.to_string()))?;
    }

    let stored = StoredTasks {
        schema_version: SCHEMA_VERSION,
        tasks: state.tasks.to_vec(),
    };
    let content = serde_json::to_string_pretty(&stored)
        .map_err(|err| AppError::invalid_data(err.to_string()))?;

    let staging = staging_path(path);
    std::fs::write(&staging, content).map_err(|err| AppError::io(err.to_string()))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let permissions = std::fs::Permissions::from_mode(0o600);
        std::fs::set_permissions(&staging, permissions)
            .map_err(|err| AppError::io(err.to_string()))?;
    }

    std::fs::rename(&staging, path).map_err(|err| AppError::io(err.to_string()))?;
    Ok(())
}

fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Brings a raw document up to [`SCHEMA_VERSION`].
///
/// Version 1 kept open verifications as an array; it is folded into the
/// per-user map, keeping the most recently started record for each user.
pub fn migrate(mut raw: Value) -> Result<Value, AppError> {
    let version = raw
        .get("schema_version")
        .and_then(Value::as_u64)
        .ok_or_else(|| AppError::invalid_data("schema_version is missing"))?;

    if !(1..=u64::from(SCHEMA_VERSION)).contains(&version) {
        return Err(AppError::invalid_data("schema_version mismatch"));
    }

    if version == 1 {
        let tasks = raw
            .get_mut("tasks")
            .and_then(Value::as_array_mut)
            .ok_or_else(|| AppError::invalid_data("tasks must be an array"))?;
        for task in tasks.iter_mut() {
            fold_in_progress(task)?;
        }
        raw["schema_version"] = Value::from(SCHEMA_VERSION);
    }

    Ok(raw)
}

fn fold_in_progress(task: &mut Value) -> Result<(), AppError> {
    let Some(entries) = task.get("in_progress").and_then(Value::as_array).cloned() else {
        return Ok(());
    };

    let mut keyed: Map<String, Value> = Map::new();
    for entry in entries {
        let user_id = entry
            .get("user_id")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::invalid_data("in_progress entry without user_id"))?
            .to_string();
        let started_at = started_at_of(&entry)?;

        let newer = match keyed.get(&user_id) {
            Some(existing) => started_at > started_at_of(existing)?,
            None => true,
        };
        if newer {
            keyed.insert(user_id, entry);
        }
    }

    task["in_progress"] = Value::Object(keyed);
    Ok(())
}

fn started_at_of(entry: &Value) -> Result<OffsetDateTime, AppError> {
    let raw = entry
        .get("started_at")
        .and_then(Value::as_str)
        .ok_or_else(|| AppError::invalid_data("in_progress entry without started_at"))?;
    OffsetDateTime::parse(raw, &Rfc3339)
        .map_err(|_| AppError::invalid_data("started_at must be RFC3339"))
}

/// File-backed [`TaskStore`]: one JSON file holding every task document.
#[derive(Debug, Clone)]
pub struct JsonStore {
    path: PathBuf,
}

impl JsonStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'static, ()> {
        FILE_LOCK
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TaskStore for JsonStore {
    fn load(&self, task_id: &str) -> Result<Option<Versioned<Task>>, AppError> {
        let _guard = self.lock();
        let state = load_state(&self.path)?;
        Ok(state
            .tasks
            .into_iter()
            .find(|stored| stored.value.id == task_id))
    }

    fn list(&self) -> Result<Vec<Versioned<Task>>, AppError> {
        let _guard = self.lock();
        Ok(load_state(&self.path)?.tasks)
    }

    fn insert(&self, task: Task) -> Result<Versioned<Task>, AppError> {
        let _guard = self.lock();
        let mut state = load_state(&self.path)?;
        if state.tasks.iter().any(|stored| stored.value.id == task.id) {
            return Err(AppError::invalid_input(format!(
                "task {} already exists",
                task.id
            )));
        }

        let stored = Versioned {
            value: task,
            revision: 0,
        };
        state.tasks.push(stored.clone());
        save_state(&self.path, &state)?;
        Ok(stored)
    }

    fn commit(&self, task: &Task, expected_revision: u64) -> Result<u64, CommitError> {
        let _guard = self.lock();
        let mut state = load_state(&self.path)?;
        let current = state
            .tasks
            .iter_mut()
            .find(|stored| stored.value.id == task.id)
            .ok_or(CommitError::Conflict {
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
        let revision = current.revision;
        save_state(&self.path, &state)?;
        Ok(revision)
    }

    fn remove(&self, task_id: &str) -> Result<Option<Task>, AppError> {
        let _guard = self.lock();
        let mut state = load_state(&self.path)?;
        let Some(index) = state
            .tasks
            .iter()
            .position(|stored| stored.value.id == task_id)
        else {
            return Ok(None);
        };

        let removed = state.tasks.remove(index);
        save_state(&self.path, &state)?;
        Ok(Some(removed.value))
    }
}

#[cfg(test)]
mod tests {
    use super::{JsonStore, SCHEMA_VERSION, TaskState, load_state, save_state};
    use crate::model::{Task, TaskKind, VerificationRecord};
    use crate::storage::{CommitError, TaskStore, Versioned};
    use std::collections::BTreeMap;
    use std::fs;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};
    use time::macros::datetime;

    fn temp_path(file_name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("dailytask-{nanos}-{file_name}"))
    }

    fn task(id: &str) -> Task {
        Task {
            id: id.to_string(),
            title: "demo".to_string(),
            description: "like the post".to_string(),
            kind: TaskKind::Like,
            target_link: "https://example.org/p/1".to_string(),
            departments: vec!["Marketing".to_string()],
            active_from: datetime!(2025-12-20 00:00 UTC),
            active_until: datetime!(2025-12-27 00:00 UTC),
            created_at: datetime!(2025-12-19 00:00 UTC),
            updated_at: datetime!(2025-12-19 00:00 UTC),
            completions: Vec::new(),
            in_progress: BTreeMap::new(),
        }
    }

    #[test]
    fn save_and_load_preserves_documents() {
        let path = temp_path("tasks.json");
        let mut stored = task("task-1");
        stored.in_progress.insert(
            "u1".to_string(),
            VerificationRecord {
                user_id: "u1".to_string(),
                started_at: datetime!(2025-12-20 10:00 UTC),
                expires_at: datetime!(2025-12-20 10:01 UTC),
            },
        );
        let state = TaskState {
            tasks: vec![Versioned {
                value: stored.clone(),
                revision: 7,
            }],
        };

        save_state(&path, &state).unwrap();
        let loaded = load_state(&path).unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(loaded, state);
    }

    #[test]
    fn missing_file_loads_empty_state() {
        let path = temp_path("absent.json");
        assert!(load_state(&path).unwrap().tasks.is_empty());
    }

    #[test]
    fn migrates_v1_in_progress_array() {
        let path = temp_path("v1-schema.json");
        let content = serde_json::json!({
            "schema_version": 1,
            "tasks": [{
                "id": "task-1",
                "title": "demo",
                "kind": "share",
                "active_from": "2025-12-20T00:00:00Z",
                "active_until": "2025-12-27T00:00:00Z",
                "created_at": "2025-12-19T00:00:00Z",
                "updated_at": "2025-12-19T00:00:00Z",
                "completions": [
                    { "user_id": "u2", "completed_at": "2025-12-20T09:00:00Z", "outcome": true }
                ],
                "in_progress": [
                    { "user_id": "u1", "started_at": "2025-12-20T10:00:00Z", "expires_at": "2025-12-20T10:01:00Z" },
                    { "user_id": "u1", "started_at": "2025-12-20T11:00:00Z", "expires_at": "2025-12-20T11:01:00Z" },
                    { "user_id": "u3", "started_at": "2025-12-20T10:30:00Z", "expires_at": "2025-12-20T10:31:00Z" }
                ]
            }]
        });
        fs::write(&path, serde_json::to_string_pretty(&content).unwrap()).unwrap();

        let loaded = load_state(&path).unwrap();
        fs::remove_file(&path).ok();

        let migrated = &loaded.tasks[0];
        assert_eq!(migrated.revision, 0);
        assert_eq!(migrated.value.in_progress.len(), 2);
        assert_eq!(
            migrated.value.in_progress["u1"].started_at,
            datetime!(2025-12-20 11:00 UTC)
        );
        assert_eq!(migrated.value.completions.len(), 1);
        assert!(migrated.value.departments.is_empty());
    }

    #[test]
    fn schema_version_must_be_known() {
        let path = temp_path("bad-schema.json");
        let bad = format!(
            "{{\n  \"schema_version\": {},\n  \"tasks\": []\n}}",
            SCHEMA_VERSION + 1
        );
        fs::write(&path, bad).unwrap();

        let err = load_state(&path).unwrap_err();
        fs::remove_file(&path).ok();

        assert_eq!(err.code(), "invalid_data");
    }

    #[test]
    fn rejects_duplicate_task_ids() {
        let path = temp_path("dupes.json");
        let state = TaskState {
            tasks: vec![
                Versioned {
                    value: task("task-1"),
                    revision: 0,
                },
                Versioned {
                    value: task("task-1"),
                    revision: 0,
                },
            ],
        };
        save_state(&path, &state).unwrap();

        let err = load_state(&path).unwrap_err();
        fs::remove_file(&path).ok();

        assert_eq!(err.code(), "invalid_data");
    }

    #[test]
    fn store_commit_checks_revision() {
        let path = temp_path("store.json");
        let store = JsonStore::new(&path);
        store.insert(task("task-1")).unwrap();

        let stale = store.load("task-1").unwrap().unwrap();
        let mut fresh = stale.clone();
        fresh.value.title = "first writer".to_string();
        let revision = store.commit(&fresh.value, fresh.revision).unwrap();

        let err = store.commit(&stale.value, stale.revision).unwrap_err();
        let reloaded = store.load("task-1").unwrap().unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(revision, 1);
        assert!(matches!(err, CommitError::Conflict { actual: Some(1), .. }));
        assert_eq!(reloaded.value.title, "first writer");
    }

    #[test]
    fn store_remove_returns_document() {
        let path = temp_path("remove.json");
        let store = JsonStore::new(&path);
        store.insert(task("task-1")).unwrap();

        let removed = store.remove("task-1").unwrap();
        let missing = store.remove("task-1").unwrap();
        let remaining = store.list().unwrap();
        fs::remove_file(&path).ok();

        assert_eq!(removed.map(|task| task.id), Some("task-1".to_string()));
        assert!(missing.is_none());
        assert!(remaining.is_empty());
    }
}
