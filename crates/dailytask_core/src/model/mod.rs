mod member;
mod task;

pub use member::{Member, Role, SessionUser};
pub use task::{CompletionRecord, Task, TaskKind, VerificationRecord};
