use crate::error::AppError;
use crate::model::{Member, Role, SessionUser};
use std::path::{Path, PathBuf};

const MEMBERS_FILE_NAME: &str = "members.json";
const MEMBERS_ENV_VAR: &str = "DAILYTASK_MEMBERS_PATH";
const USER_ID_ENV_VAR: &str = "DAILYTASK_USER_ID";
const USER_ROLE_ENV_VAR: &str = "DAILYTASK_USER_ROLE";

pub trait MemberDirectory {
    fn list_members(&self, department: Option<&str>) -> Result<Vec<Member>, AppError>;
}

pub trait SessionContext {
    fn current_user(&self) -> Result<SessionUser, AppError>;
}

fn in_department(member: &Member, department: Option<&str>) -> bool {
    department.is_none_or(|wanted| member.department.eq_ignore_ascii_case(wanted.trim()))
}

/// Fixed member list.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    members: Vec<Member>,
}

impl StaticDirectory {
    pub fn new(members: Vec<Member>) -> Self {
        Self { members }
    }
}

impl MemberDirectory for StaticDirectory {
    fn list_members(&self, department: Option<&str>) -> Result<Vec<Member>, AppError> {
        Ok(self
            .members
            .iter()
            .filter(|member| in_department(member, department))
            .cloned()
            .collect())
    }
}

/// Members exported from the directory service as a JSON array.
#[derive(Debug, Clone)]
pub struct JsonMemberDirectory {
    path: PathBuf,
}

impl JsonMemberDirectory {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }
}

impl MemberDirectory for JsonMemberDirectory {
    fn list_members(&self, department: Option<&str>) -> Result<Vec<Member>, AppError> {
        let members = load_members(&self.path)?;
        Ok(members
            .into_iter()
            .filter(|member| in_department(member, department))
            .collect())
    }
}

pub fn members_path(configured: Option<&str>) -> Result<PathBuf, AppError> {
    if let Ok(path) = std::env::var(MEMBERS_ENV_VAR)
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
            .join(MEMBERS_FILE_NAME))
    } else {
        let home = std::env::var("HOME").map_err(|_| AppError::invalid_data("HOME is not set"))?;
        Ok(PathBuf::from(home)
            .join(".config")
            .join("dailytask")
            .join(MEMBERS_FILE_NAME))
    }
}

fn load_members(path: &Path) -> Result<Vec<Member>, AppError> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|err| AppError::io(format!("{}: {}", path.display(), err)))?;
    serde_json::from_str(&content).map_err(|err| {
        AppError::invalid_data(format!("invalid members file {}: {}", path.display(), err))
    })
}

/// Acting user taken from `DAILYTASK_USER_ID` / `DAILYTASK_USER_ROLE`.
pub struct EnvSession;

impl SessionContext for EnvSession {
    fn current_user(&self) -> Result<SessionUser, AppError> {
        let id = std::env::var(USER_ID_ENV_VAR)
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| AppError::invalid_input(format!("{USER_ID_ENV_VAR} is not set")))?;

        let role = match std::env::var(USER_ROLE_ENV_VAR) {
            Ok(raw) if !raw.trim().is_empty() => Role::parse(&raw)
                .ok_or_else(|| AppError::invalid_input(format!("unknown role '{}'", raw.trim())))?,
            _ => Role::Member,
        };

        Ok(SessionUser { id, role })
    }
}
