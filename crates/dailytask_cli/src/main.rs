use clap::Parser;
use dailytask_cli::cli::{Cli, Command, TaskCommand, collect_config_overrides};
use dailytask_core::clock::SystemClock;
use dailytask_core::config::{self, Config};
use dailytask_core::directory::{
    EnvSession, JsonMemberDirectory, MemberDirectory, SessionContext, members_path,
};
use dailytask_core::error::AppError;
use dailytask_core::model::{SessionUser, Task, TaskKind};
use dailytask_core::progress::{self, TaskProgress};
use dailytask_core::state::{VerificationState, remaining_seconds};
use dailytask_core::storage::JsonStore;
use dailytask_core::storage::json_store;
use dailytask_core::task_api::{self, NewTask, format_instant, parse_instant};
use dailytask_core::timer::{TimerController, TimerEvent};
use dailytask_core::verification::{
    CompletionResult, Outcome, UserTaskStatus, VerificationService, VerificationWindow,
};
use std::sync::Arc;
use tabled::settings::Style;
use tabled::{Table, Tabled};
use time::OffsetDateTime;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

const LOG_ENV_VAR: &str = "DAILYTASK_LOG";
const WATCH_COMPLETION_RETRIES: u32 = 3;

struct Runtime {
    config: Config,
    service: VerificationService<JsonStore>,
}

impl Runtime {
    fn store(&self) -> &JsonStore {
        self.service.store().as_ref()
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_runtime(raw_overrides: &[String]) -> Result<Runtime, AppError> {
    let overrides = collect_config_overrides(raw_overrides).map_err(AppError::invalid_input)?;
    let loaded = config::load_config_with_fallback();
    if let Some(err) = loaded.error.as_ref() {
        warn!(error = %err, "config unreadable, using defaults");
    }
    let config = config::merge_overrides(&loaded.config, &overrides);
    let settings = config.verification_settings()?;
    let store = JsonStore::new(json_store::store_path(config.store_path.as_deref())?);
    debug!(path = %store.path().display(), "using task store");
    let service = VerificationService::new(Arc::new(store), Box::new(SystemClock), settings);

    Ok(Runtime { config, service })
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), AppError> {
    let rendered =
        serde_json::to_string(value).map_err(|err| AppError::invalid_data(err.to_string()))?;
    println!("{rendered}");
    Ok(())
}

#[derive(Tabled)]
struct TaskRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Title")]
    title: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Active until")]
    active_until: String,
    #[tabled(rename = "Completions")]
    completions: usize,
    #[tabled(rename = "Verifying")]
    verifying: usize,
}

#[derive(Tabled)]
struct ProgressRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Title")]
    title: String,
    #[tabled(rename = "Done")]
    done: String,
    #[tabled(rename = "Progress")]
    percentage: String,
}

#[derive(Tabled)]
struct MemberRow {
    #[tabled(rename = "Member")]
    name: String,
    #[tabled(rename = "Department")]
    department: String,
    #[tabled(rename = "Completed at")]
    completed_at: String,
}

fn print_tasks(tasks: &[Task], json: bool) -> Result<(), AppError> {
    if json {
        return print_json(&tasks);
    }

    let mut rows = Vec::with_capacity(tasks.len());
    for task in tasks {
        rows.push(TaskRow {
            id: task.id.clone(),
            title: task.title.clone(),
            kind: task.kind.label().to_string(),
            active_until: format_instant(task.active_until)?,
            completions: task.completions.len(),
            verifying: task.in_progress.len(),
        });
    }
    println!("{}", Table::new(rows).with(Style::psql()));
    Ok(())
}

fn print_task_details(task: &Task, json: bool) -> Result<(), AppError> {
    if json {
        return print_json(task);
    }

    println!("{} ({})", task.title, task.id);
    println!("kind: {}", task.kind.label());
    if !task.target_link.is_empty() {
        println!("link: {}", task.target_link);
    }
    if !task.description.is_empty() {
        println!("description: {}", task.description);
    }
    let departments = if task.departments.is_empty() {
        "all".to_string()
    } else {
        task.departments.join(", ")
    };
    println!("departments: {departments}");
    println!(
        "active: {} .. {}",
        format_instant(task.active_from)?,
        format_instant(task.active_until)?
    );
    for record in task.in_progress.values() {
        println!(
            "verifying: {} until {}",
            record.user_id,
            format_instant(record.expires_at)?
        );
    }
    for record in &task.completions {
        println!(
            "completed: {} at {}",
            record.user_id,
            format_instant(record.completed_at)?
        );
    }
    Ok(())
}

fn print_window(window: &VerificationWindow, json: bool) -> Result<(), AppError> {
    if json {
        return print_json(window);
    }

    let seconds = remaining_seconds(window.expires_at, window.started_at);
    println!(
        "Verification started on {}: expires at {} ({}s)",
        window.task_id,
        format_instant(window.expires_at)?,
        seconds
    );
    Ok(())
}

fn print_completion(result: &CompletionResult, json: bool) -> Result<(), AppError> {
    if json {
        return print_json(result);
    }

    match result {
        CompletionResult::Recorded { completed_at } => {
            println!("Completion recorded at {}", format_instant(*completed_at)?)
        }
        CompletionResult::AlreadyRecorded { completed_at } => println!(
            "Completion already recorded at {}",
            format_instant(*completed_at)?
        ),
        CompletionResult::Abandoned => println!("Verification abandoned"),
    }
    Ok(())
}

fn print_status(status: &UserTaskStatus, json: bool) -> Result<(), AppError> {
    if json {
        return print_json(status);
    }

    match status.state {
        VerificationState::Idle => println!("idle: ready to start"),
        VerificationState::Verifying { expires_at, .. } => println!(
            "verifying: {}s left (expires at {})",
            remaining_seconds(expires_at, status.now),
            format_instant(expires_at)?
        ),
        VerificationState::CoolingDown { available_at, .. } => println!(
            "cooling down: {}s left (available at {})",
            remaining_seconds(available_at, status.now),
            format_instant(available_at)?
        ),
    }
    Ok(())
}

fn print_timer_event(event: &TimerEvent, json: bool) -> Result<(), AppError> {
    if json {
        let payload = match event {
            TimerEvent::VerificationTick { remaining_seconds } => serde_json::json!({
                "event": "verification_tick",
                "remaining_seconds": remaining_seconds,
            }),
            TimerEvent::VerificationCompleted(result) => serde_json::json!({
                "event": "verification_completed",
                "completion": result,
            }),
            TimerEvent::CompletionFailed(err) => serde_json::json!({
                "event": "completion_failed",
                "code": err.code(),
                "message": err.message(),
            }),
            TimerEvent::CompletionPending => serde_json::json!({ "event": "completion_pending" }),
            TimerEvent::VerificationLapsed => serde_json::json!({ "event": "verification_lapsed" }),
            TimerEvent::CooldownTick { remaining_seconds } => serde_json::json!({
                "event": "cooldown_tick",
                "remaining_seconds": remaining_seconds,
            }),
            TimerEvent::CooldownFinished => serde_json::json!({ "event": "cooldown_finished" }),
        };
        println!("{payload}");
        return Ok(());
    }

    match event {
        TimerEvent::VerificationTick { remaining_seconds } => {
            println!("verifying: {remaining_seconds}s left")
        }
        TimerEvent::VerificationCompleted(result) => print_completion(result, false)?,
        TimerEvent::CompletionFailed(err) => eprintln!("completion failed: {err}"),
        TimerEvent::CompletionPending => println!("waiting for completion to be acknowledged"),
        TimerEvent::VerificationLapsed => println!("verification lapsed without completion"),
        TimerEvent::CooldownTick { remaining_seconds } => {
            println!("cooldown: {remaining_seconds}s left")
        }
        TimerEvent::CooldownFinished => println!("cooldown finished"),
    }
    Ok(())
}

fn print_progress(rows: &[TaskProgress], detailed: bool, json: bool) -> Result<(), AppError> {
    if json {
        return print_json(&rows);
    }

    let table_rows: Vec<ProgressRow> = rows
        .iter()
        .map(|row| ProgressRow {
            id: row.task_id.clone(),
            title: row.title.clone(),
            done: format!("{}/{}", row.completed, row.eligible),
            percentage: format!("{:.1}%", row.percentage),
        })
        .collect();
    println!("{}", Table::new(table_rows).with(Style::psql()));

    if detailed {
        for row in rows {
            let mut members = Vec::new();
            for status in row.completed_members.iter().chain(&row.pending_members) {
                members.push(MemberRow {
                    name: status.display_name.clone(),
                    department: status.department.clone(),
                    completed_at: match status.completed_at {
                        Some(at) => format_instant(at)?,
                        None => "-".to_string(),
                    },
                });
            }
            println!("{}", Table::new(members).with(Style::psql()));
        }
    }
    Ok(())
}

fn current_user() -> Result<SessionUser, AppError> {
    EnvSession.current_user()
}

fn run_task_command(runtime: &Runtime, command: TaskCommand, json: bool) -> Result<(), AppError> {
    match command {
        TaskCommand::Add {
            title,
            kind,
            link,
            description,
            departments,
            from,
            until,
        } => {
            let user = current_user()?;
            let kind = TaskKind::parse(&kind).ok_or_else(|| {
                AppError::invalid_input("kind must be one of like, share, comment")
            })?;
            let new_task = NewTask {
                title,
                description,
                kind,
                target_link: link,
                departments,
                active_from: parse_instant(&from, "from")?,
                active_until: parse_instant(&until, "until")?,
            };
            let task =
                task_api::create_task(runtime.store(), &user, new_task, runtime.service.now())?;
            if json {
                print_json(&task)?;
            } else {
                println!("Created task: {} ({})", task.title, task.id);
            }
        }
        TaskCommand::List { active } => {
            let tasks = if active {
                task_api::list_active_tasks(runtime.store(), runtime.service.now())?
            } else {
                task_api::list_tasks(runtime.store())?
            };
            print_tasks(&tasks, json)?;
        }
        TaskCommand::Show { id } => {
            let task = task_api::get_task(runtime.store(), &id)?;
            print_task_details(&task, json)?;
        }
        TaskCommand::Delete { id } => {
            let user = current_user()?;
            let task = task_api::delete_task(runtime.store(), &user, &id)?;
            if json {
                print_json(&task)?;
            } else {
                println!("Deleted task: {} ({})", task.title, task.id);
            }
        }
    }

    Ok(())
}

fn watch(runtime: &Runtime, task_id: &str, start: bool, json: bool) -> Result<(), AppError> {
    let user = current_user()?;
    let settings = runtime.service.settings();
    let mut timer = TimerController::resume(
        &runtime.service,
        task_id,
        &user.id,
        settings.cooldown,
        OffsetDateTime::now_utc(),
    )?
    .with_completion_grace(settings.completion_grace);

    if start && !timer.is_verifying() {
        let window = timer.start(OffsetDateTime::now_utc())?;
        print_window(&window, json)?;
    }

    if !timer.is_verifying() {
        let status = runtime.service.status(task_id, &user.id)?;
        return print_status(&status, json);
    }

    let mut retries = 0;
    let mut pending_retry = false;
    loop {
        std::thread::sleep(std::time::Duration::from_secs(1));
        let now = OffsetDateTime::now_utc();
        let events = if pending_retry {
            timer.retry_completion(now)
        } else {
            timer.tick(now)
        };
        pending_retry = false;

        for event in events {
            print_timer_event(&event, json)?;
            if let TimerEvent::CompletionFailed(err) = event {
                if err.is_retryable() && retries < WATCH_COMPLETION_RETRIES {
                    retries += 1;
                    pending_retry = true;
                } else {
                    return Err(err);
                }
            }
        }

        if !timer.is_verifying() {
            return Ok(());
        }
    }
}

fn run_command(cli: Cli) -> Result<(), AppError> {
    let runtime = build_runtime(&cli.config_override)?;

    match cli.command {
        Command::Task { task } => run_task_command(&runtime, task, cli.json)?,
        Command::Start { task_id } => {
            let user = current_user()?;
            let window = runtime.service.start_verification(&task_id, &user.id)?;
            print_window(&window, cli.json)?;
        }
        Command::Complete { task_id, failed } => {
            let user = current_user()?;
            let outcome = if failed {
                Outcome::Failure
            } else {
                Outcome::Success
            };
            let result = runtime
                .service
                .complete_verification(&task_id, &user.id, outcome)?;
            print_completion(&result, cli.json)?;
        }
        Command::Status { task_id } => {
            let user = current_user()?;
            let status = runtime.service.status(&task_id, &user.id)?;
            print_status(&status, cli.json)?;
        }
        Command::Watch { task_id, start } => watch(&runtime, &task_id, start, cli.json)?,
        Command::Progress {
            task_id,
            department,
        } => {
            let path = members_path(runtime.config.members_path.as_deref())?;
            let members = JsonMemberDirectory::new(path).list_members(department.as_deref())?;
            let now = runtime.service.now();
            let rows = match task_id.as_deref() {
                Some(id) => {
                    let task = task_api::get_task(runtime.store(), id)?;
                    vec![progress::task_progress(&task, &members, now)]
                }
                None => {
                    let tasks = task_api::list_active_tasks(runtime.store(), now)?;
                    progress::overview(&tasks, &members, now)
                }
            };
            print_progress(&rows, task_id.is_some(), cli.json)?;
        }
        Command::Sweep => {
            let report = runtime.service.sweep_expired()?;
            if cli.json {
                print_json(&report)?;
            } else {
                println!(
                    "Reclaimed {} lapsed verification(s) across {} task(s)",
                    report.reclaimed(),
                    report.tasks.len()
                );
            }
        }
    }

    Ok(())
}

fn normalize_parse_error(err: &clap::Error) -> AppError {
    let rendered = err.to_string();
    let first_line = rendered.lines().next().unwrap_or("invalid command").trim();
    let message = first_line
        .strip_prefix("error: ")
        .unwrap_or(first_line)
        .to_string();
    AppError::invalid_input(message)
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if !err.use_stderr() => {
            // --help and --version
            let _ = err.print();
            return;
        }
        Err(err) => {
            eprintln!("ERROR: {}", normalize_parse_error(&err));
            std::process::exit(1);
        }
    };

    init_logging();

    if let Err(err) = run_command(cli) {
        eprintln!("ERROR: {}", err);
        if let Some(wait) = err.retry_after_seconds() {
            eprintln!("try again in {wait}s");
        }
        std::process::exit(1);
    }
}
