use clap::{Parser, Subcommand};
use dailytask_core::config::ConfigOverrides;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Output JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// Override configuration values (format KEY=VALUE)
    #[arg(long = "config-override", value_name = "KEY=VALUE", global = true)]
    pub config_override: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Manage daily tasks (admin only for add/delete)
    ///
    /// Example: dailytask task list --active
    Task {
        #[command(subcommand)]
        task: TaskCommand,
    },
    /// Start verifying a task for the current user
    ///
    /// Example: dailytask start task-1
    Start { task_id: String },
    /// Finish the current user's verification
    ///
    /// Example: dailytask complete task-1
    /// Example: dailytask complete task-1 --failed
    Complete {
        task_id: String,
        /// Abandon the attempt instead of recording a completion
        #[arg(long)]
        failed: bool,
    },
    /// Show the current user's verification state on a task
    ///
    /// Example: dailytask status task-1
    Status { task_id: String },
    /// Follow the countdown and complete the verification when it runs out
    ///
    /// Example: dailytask watch task-1 --start
    Watch {
        task_id: String,
        /// Start a verification first if none is running
        #[arg(long)]
        start: bool,
    },
    /// Show completion progress for today
    ///
    /// Example: dailytask progress
    /// Example: dailytask progress task-1 --department Marketing
    Progress {
        task_id: Option<String>,
        #[arg(long)]
        department: Option<String>,
    },
    /// Drop verifications that lapsed without completion
    ///
    /// Example: dailytask sweep
    Sweep,
}

#[derive(Subcommand, Debug)]
pub enum TaskCommand {
    /// Create a task
    ///
    /// Example: dailytask task add "Like the launch post" --kind like --link https://example.org/p/1
    ///          --from 2025-12-20T00:00:00Z --until 2025-12-27T00:00:00Z --department Marketing
    Add {
        title: String,
        #[arg(long)]
        kind: String,
        #[arg(long, default_value = "")]
        link: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long = "department")]
        departments: Vec<String>,
        #[arg(long)]
        from: String,
        #[arg(long)]
        until: String,
    },
    /// List tasks
    ///
    /// Example: dailytask task list --active
    List {
        #[arg(long)]
        active: bool,
    },
    /// Show a task with its verification history
    ///
    /// Example: dailytask task show task-1
    Show { id: String },
    /// Delete a task
    ///
    /// Example: dailytask task delete task-1
    Delete { id: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigOverrideTarget {
    VerificationSeconds,
    CooldownSeconds,
    CompletionGraceSeconds,
    MaxRetries,
    StorePath,
    MembersPath,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedConfigOverride {
    pub target: ConfigOverrideTarget,
    pub value: String,
}

/// Parse a raw `KEY=VALUE` override string into a structured target.
pub fn parse_config_override(raw: &str) -> Result<ParsedConfigOverride, String> {
    let trimmed = raw.trim();
    let (key_raw, value_raw) = trimmed
        .split_once('=')
        .ok_or_else(|| "override must be in KEY=VALUE format".to_string())?;

    let value = value_raw.trim().to_string();
    let canonical_field = canonicalize_flag_name(key_raw)
        .ok_or_else(|| "override key cannot be empty".to_string())?;

    let target = match canonical_field.as_str() {
        "verification_seconds" | "verification" => ConfigOverrideTarget::VerificationSeconds,
        "cooldown_seconds" | "cooldown" => ConfigOverrideTarget::CooldownSeconds,
        "completion_grace_seconds" | "completion_grace" => {
            ConfigOverrideTarget::CompletionGraceSeconds
        }
        "max_retries" => ConfigOverrideTarget::MaxRetries,
        "store_path" => ConfigOverrideTarget::StorePath,
        "members_path" => ConfigOverrideTarget::MembersPath,
        other => return Err(format!("unknown config field '{other}'")),
    };

    if value.is_empty() {
        return Err(format!("override for '{canonical_field}' needs a value"));
    }

    Ok(ParsedConfigOverride { target, value })
}

/// Fold every `--config-override` argument into one override set; later
/// arguments win.
pub fn collect_config_overrides(raw: &[String]) -> Result<ConfigOverrides, String> {
    let mut overrides = ConfigOverrides::default();
    for entry in raw {
        let parsed = parse_config_override(entry)?;
        match parsed.target {
            ConfigOverrideTarget::VerificationSeconds => {
                overrides.verification_seconds = Some(parse_number(&parsed.value)?);
            }
            ConfigOverrideTarget::CooldownSeconds => {
                overrides.cooldown_seconds = Some(parse_number(&parsed.value)?);
            }
            ConfigOverrideTarget::CompletionGraceSeconds => {
                overrides.completion_grace_seconds = Some(parse_number(&parsed.value)?);
            }
            ConfigOverrideTarget::MaxRetries => {
                overrides.max_retries = Some(parse_number(&parsed.value)?);
            }
            ConfigOverrideTarget::StorePath => overrides.store_path = Some(parsed.value),
            ConfigOverrideTarget::MembersPath => overrides.members_path = Some(parsed.value),
        }
    }
    Ok(overrides)
}

fn parse_number<T: std::str::FromStr>(value: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("'{value}' is not a non-negative whole number"))
}

fn canonicalize_flag_name(name: &str) -> Option<String> {
    let mut cleaned = String::new();
    let mut previous_underscore = false;

    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            cleaned.push(ch.to_ascii_lowercase());
            previous_underscore = false;
        } else if !previous_underscore && !cleaned.is_empty() {
            cleaned.push('_');
            previous_underscore = true;
        }
    }

    let trimmed = cleaned.trim_matches('_');
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}
