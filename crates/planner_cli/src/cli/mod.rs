use clap::{Parser, Subcommand};
use planner_core::config::ConfigOverrides;
use planner_core::error::AppError;
use serde_json::{Map, Value};
use std::path::PathBuf;
use time::format_description::BorrowedFormatItem;
use time::format_description::well_known::Rfc3339;
use time::macros::format_description;
use time::{Date, OffsetDateTime, PrimitiveDateTime};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Output JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// User whose data to operate on (defaults to the configured default user)
    #[arg(long, global = true, value_name = "USER_ID")]
    pub user: Option<String>,

    /// Override configuration values (format KEY=VALUE)
    #[arg(long = "config-override", value_name = "KEY=VALUE", global = true)]
    pub config_override: Vec<String>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Add a new task
    ///
    /// Example: planner add "Learn Rust" -d "chapters 1-3" --deadline 2025-12-24
    /// Example: planner add "Read chapter 1" --parent <ID>
    Add {
        heading: Option<String>,
        #[arg(short = 'd', long)]
        details: Option<String>,
        #[arg(long)]
        deadline: Option<String>,
        /// Estimated minutes
        #[arg(long)]
        estimate: Option<u32>,
        #[arg(long)]
        link: Option<String>,
        /// Nest the new task under this root task
        #[arg(long, value_name = "ID")]
        parent: Option<String>,
    },
    /// Show details of a task
    ///
    /// Example: planner show <ID>
    Show {
        id: String,
    },
    /// List root tasks
    ///
    /// Example: planner list
    /// Example: planner list --status in_progress
    List {
        #[arg(long)]
        status: Option<String>,
    },
    /// Search headings and details, case-insensitively
    ///
    /// Example: planner search milk
    Search {
        query: String,
    },
    /// Change fields of a task
    ///
    /// Example: planner update <ID> --status in_progress
    /// Example: planner update <ID> --clear-deadline
    Update {
        id: String,
        #[arg(long)]
        heading: Option<String>,
        #[arg(short = 'd', long)]
        details: Option<String>,
        #[arg(long)]
        status: Option<String>,
        #[arg(long, conflicts_with = "clear_deadline")]
        deadline: Option<String>,
        #[arg(long)]
        clear_deadline: bool,
        /// Estimated minutes
        #[arg(long)]
        estimate: Option<u32>,
        #[arg(long)]
        link: Option<String>,
    },
    /// Delete a root task and its subtasks
    ///
    /// Example: planner delete <ID>
    Delete {
        id: String,
    },
    /// Mark a task as done and record how it went
    ///
    /// Example: planner done <ID> --actual 45 --difficulty 6 -m "harder than expected"
    Done {
        id: String,
        /// Minutes actually spent
        #[arg(long, default_value_t = 0)]
        actual: u32,
        #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u8).range(1..=10))]
        difficulty: u8,
        #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u8).range(1..=10))]
        energy: u8,
        #[arg(long, default_value_t = 5, value_parser = clap::value_parser!(u8).range(1..=10))]
        productivity: u8,
        #[arg(short = 'm', long = "notes", value_name = "NOTES")]
        notes: Option<String>,
    },
    /// Start or stop a focus block
    ///
    /// Example: planner focus start <ID>
    /// Example: planner focus stop
    Focus {
        #[command(subcommand)]
        focus: FocusCommand,
    },
    /// Record an energy sample
    ///
    /// Example: planner energy 7 --activity writing --score 0.8
    Energy {
        #[arg(value_parser = clap::value_parser!(u8).range(1..=10))]
        level: u8,
        #[arg(long, default_value = "general")]
        activity: String,
        /// Productivity between 0.0 and 1.0
        #[arg(long, default_value_t = 0.5)]
        score: f64,
    },
    /// Show or change preferences
    ///
    /// Example: planner prefs
    /// Example: planner prefs break_duration=10 peak_energy_hours=[8,9]
    Prefs {
        #[arg(value_name = "KEY=VALUE")]
        settings: Vec<String>,
    },
    /// Record feedback, or list it when no fields are given
    ///
    /// Example: planner feedback rating=4 comment="too many breaks"
    /// Example: planner feedback --limit 5
    Feedback {
        #[arg(value_name = "KEY=VALUE")]
        fields: Vec<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show productivity analytics
    ///
    /// Example: planner analytics
    Analytics,
    /// Manage backups
    ///
    /// Example: planner backup create --reason before-upgrade
    /// Example: planner backup list
    Backup {
        #[command(subcommand)]
        backup: BackupCommand,
    },
    /// Export one user's data to a file
    ///
    /// Example: planner export alice.json
    Export {
        path: PathBuf,
    },
    /// Import a user from an export file, replacing that user
    ///
    /// Example: planner import alice.json
    Import {
        path: PathBuf,
    },
    /// Remove the current user's data, or everyone's with --all
    ///
    /// Example: planner clear --all
    Clear {
        #[arg(long)]
        all: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum FocusCommand {
    /// Start focusing on a root task
    Start { id: String },
    /// Stop the running focus block
    Stop,
}

#[derive(Subcommand, Debug)]
pub enum BackupCommand {
    /// Take a backup now
    Create {
        #[arg(long, default_value = "manual")]
        reason: String,
    },
    /// List backups, newest first
    List,
    /// Replace all data with a backup
    Restore { name: String },
    /// Change automatic backup settings
    ///
    /// Example: planner backup settings --auto false --retention-days 14
    Settings {
        #[arg(long)]
        auto: Option<bool>,
        #[arg(long)]
        retention_days: Option<u32>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigOverrideTarget {
    DataDir,
    DataFile,
    BackupDir,
    DefaultUser,
    AutoBackup,
    RetentionDays,
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
    let canonical_field =
        canonicalize_flag_name(key_raw).ok_or_else(|| "override key cannot be empty".to_string())?;

    let target = match canonical_field.as_str() {
        "data_dir" => ConfigOverrideTarget::DataDir,
        "data_file" => ConfigOverrideTarget::DataFile,
        "backup_dir" => ConfigOverrideTarget::BackupDir,
        "default_user" | "default_user_id" => ConfigOverrideTarget::DefaultUser,
        "auto_backup" => ConfigOverrideTarget::AutoBackup,
        "retention_days" | "backup_retention_days" => ConfigOverrideTarget::RetentionDays,
        other => return Err(format!("unknown config field '{other}'")),
    };

    if value.is_empty() {
        return Err(format!("override '{canonical_field}' needs a value"));
    }
    Ok(ParsedConfigOverride { target, value })
}

/// Folds every `--config-override` into one set of overrides. Later
/// values win.
pub fn parse_config_overrides(raw: &[String]) -> Result<ConfigOverrides, AppError> {
    let mut overrides = ConfigOverrides::default();
    for entry in raw {
        let parsed = parse_config_override(entry).map_err(AppError::invalid_input)?;
        match parsed.target {
            ConfigOverrideTarget::DataDir => overrides.data_dir = Some(PathBuf::from(parsed.value)),
            ConfigOverrideTarget::DataFile => {
                overrides.data_file = Some(PathBuf::from(parsed.value));
            }
            ConfigOverrideTarget::BackupDir => {
                overrides.backup_dir = Some(PathBuf::from(parsed.value));
            }
            ConfigOverrideTarget::DefaultUser => overrides.default_user_id = Some(parsed.value),
            ConfigOverrideTarget::AutoBackup => {
                overrides.auto_backup = Some(parse_flag(&parsed.value)?);
            }
            ConfigOverrideTarget::RetentionDays => {
                let days = parsed.value.parse::<u32>().map_err(|_| {
                    AppError::invalid_input(format!("retention_days must be a number, got '{}'", parsed.value))
                })?;
                overrides.backup_retention_days = Some(days);
            }
        }
    }
    Ok(overrides)
}

fn parse_flag(raw: &str) -> Result<bool, AppError> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        other => Err(AppError::invalid_input(format!("expected true or false, got '{other}'"))),
    }
}

/// Turns `KEY=VALUE` pairs into a JSON object. Values that parse as JSON
/// keep their type; anything else is taken as a string.
pub fn parse_key_values(pairs: &[String]) -> Result<Map<String, Value>, AppError> {
    let mut fields = Map::new();
    for pair in pairs {
        let (key, value) = pair
            .split_once('=')
            .ok_or_else(|| AppError::invalid_input(format!("'{pair}' must be in KEY=VALUE format")))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(AppError::invalid_input("field name cannot be empty"));
        }
        let value = value.trim();
        let parsed = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        fields.insert(key.to_string(), parsed);
    }
    Ok(fields)
}

const DATE_TIME_SECONDS: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
const DATE_TIME: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]");
const DATE_ONLY: &[BorrowedFormatItem<'static>] = format_description!("[year]-[month]-[day]");

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM[:SS]` (UTC) or `YYYY-MM-DD`
/// (midnight UTC).
pub fn parse_deadline(raw: &str) -> Result<OffsetDateTime, AppError> {
    let trimmed = raw.trim();
    if let Ok(parsed) = OffsetDateTime::parse(trimmed, &Rfc3339) {
        return Ok(parsed);
    }
    for format in [DATE_TIME_SECONDS, DATE_TIME] {
        if let Ok(parsed) = PrimitiveDateTime::parse(trimmed, format) {
            return Ok(parsed.assume_utc());
        }
    }
    if let Ok(date) = Date::parse(trimmed, DATE_ONLY) {
        return Ok(date.midnight().assume_utc());
    }
    Err(AppError::invalid_input(format!(
        "invalid deadline '{trimmed}': use YYYY-MM-DD, YYYY-MM-DD HH:MM or RFC 3339"
    )))
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
