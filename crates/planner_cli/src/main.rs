use clap::Parser;
use clap::error::ErrorKind;
use planner_cli::cli::{self, BackupCommand, Cli, Command, FocusCommand};
use planner_core::SnapshotStore;
use planner_core::config::{load_config_with_fallback, merge_overrides};
use planner_core::error::AppError;
use planner_core::model::{
    CompletionReport, PreferencesUpdate, Task, TaskStatus, TaskUpdate, UserPreferences,
};
use planner_core::storage::analytics::AnalyticsReport;
use planner_core::storage::backup::BackupInfo;
use serde_json::{Map, Value, json};
use tabled::{Table, Tabled};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing_subscriber::EnvFilter;

#[derive(Tabled)]
struct TaskRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Heading")]
    heading: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Deadline")]
    deadline: String,
    #[tabled(rename = "Subtasks")]
    subtasks: usize,
}

#[derive(Tabled)]
struct BackupRow {
    #[tabled(rename = "File")]
    file_name: String,
    #[tabled(rename = "Reason")]
    reason: String,
    #[tabled(rename = "Created")]
    created_at: String,
    #[tabled(rename = "Bytes")]
    size_bytes: u64,
}

fn format_time(at: OffsetDateTime) -> String {
    at.format(&Rfc3339).unwrap_or_else(|_| at.to_string())
}

fn task_row(task: &Task, now: OffsetDateTime, focused_task_id: Option<&str>) -> TaskRow {
    let mut status = task.status.as_str().to_string();
    if task.is_overdue(now) {
        status.push_str(" (overdue)");
    }
    let heading = if focused_task_id == Some(task.id.as_str()) {
        format!("[FOCUS] {}", task.heading)
    } else {
        task.heading.clone()
    };

    TaskRow {
        id: task.id.clone(),
        heading,
        status,
        deadline: task.deadline.map(format_time).unwrap_or_else(|| "-".to_string()),
        subtasks: task.subtask_count(),
    }
}

fn print_json(value: Value) -> Result<(), AppError> {
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn print_tasks(tasks: &[Task], focused_task_id: Option<&str>, as_json: bool) -> Result<(), AppError> {
    if as_json {
        return print_json(serde_json::to_value(tasks)?);
    }
    if tasks.is_empty() {
        println!("No tasks.");
        return Ok(());
    }

    let now = OffsetDateTime::now_utc();
    let rows: Vec<TaskRow> = tasks
        .iter()
        .map(|task| task_row(task, now, focused_task_id))
        .collect();
    println!("{}", Table::new(rows));
    Ok(())
}

fn print_task_tree(task: &Task, depth: usize) {
    let indent = "  ".repeat(depth);
    println!(
        "{indent}- {} [{}] ({})",
        task.heading,
        task.status.as_str(),
        task.id
    );
    for subtask in &task.subtasks {
        print_task_tree(subtask, depth + 1);
    }
}

fn print_task_details(task: &Task) {
    println!("ID:        {}", task.id);
    println!("Heading:   {}", task.heading);
    if !task.details.is_empty() {
        println!("Details:   {}", task.details);
    }
    println!("Status:    {}", task.status.as_str());
    if let Some(deadline) = task.deadline {
        println!("Deadline:  {}", format_time(deadline));
    }
    if let Some(minutes) = task.time_estimate {
        println!("Estimate:  {minutes} min");
    }
    if let Some(link) = &task.resource_link {
        println!("Link:      {link}");
    }
    println!("Created:   {}", format_time(task.created_at));
    println!("Updated:   {}", format_time(task.updated_at));
    if !task.subtasks.is_empty() {
        println!("Subtasks:");
        for subtask in &task.subtasks {
            print_task_tree(subtask, 1);
        }
    }
}

fn print_report(report: &AnalyticsReport) {
    let tasks = &report.tasks;
    let stats = &report.productivity;
    println!("User:               {}", report.user_id);
    println!(
        "Tasks:              {} total, {} pending, {} in progress, {} done, {} cancelled, {} overdue",
        tasks.total, tasks.pending, tasks.in_progress, tasks.done, tasks.cancelled, tasks.overdue
    );
    println!("Completions:        {}", stats.total_completions);
    println!("Avg actual time:    {:.1} min", stats.average_actual_time);
    println!("Avg difficulty:     {:.1}", stats.average_difficulty);
    println!("Avg productivity:   {:.1}", stats.average_productivity);
    println!("Completion rate:    {:.0}% (30 days)", stats.completion_rate_30d * 100.0);
    println!("Streak:             {} days", report.streak_days);
    println!("Completed today:    {}", report.tasks_completed_today);
    println!(
        "Focus time:         {} min total, {} min today",
        report.total_focus_time, report.total_focus_time_today
    );
    println!("Sessions:           {}", report.total_sessions);
    println!(
        "Last session:       {}",
        report.last_session.map(format_time).unwrap_or_else(|| "-".to_string())
    );
    println!("Feedback entries:   {}", report.feedback_count);
}

fn backup_json(info: &BackupInfo) -> Value {
    json!({
        "file_name": info.file_name,
        "path": info.path.display().to_string(),
        "reason": info.reason,
        "created_at": format_time(info.created_at),
        "size_bytes": info.size_bytes,
    })
}

fn print_fields(value: Value) {
    if let Value::Object(fields) = value {
        for (key, value) in fields {
            println!("{key}: {value}");
        }
    }
}

fn not_found(what: &str) -> AppError {
    AppError::invalid_input(format!("{what} not found"))
}

fn normalize_parse_error(err: clap::Error) -> AppError {
    let rendered = err.to_string();
    let first_line = rendered.lines().next().unwrap_or("invalid command").trim();
    let message = first_line
        .strip_prefix("error: ")
        .unwrap_or(first_line)
        .to_string();
    AppError::invalid_input(message)
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn open_store(cli: &Cli) -> Result<SnapshotStore, AppError> {
    let loaded = load_config_with_fallback();
    if let Some(err) = loaded.error {
        tracing::warn!(error = %err, "config unreadable; using defaults");
    }
    let overrides = cli::parse_config_overrides(&cli.config_override)?;
    let config = merge_overrides(&loaded.config, &overrides);
    tracing::debug!(data_file = %config.data_file.display(), "opening store");
    SnapshotStore::open(config)
}

fn run_command(cli: Cli) -> Result<(), AppError> {
    let store = open_store(&cli)?;
    let as_json = cli.json;
    let user = cli.user.as_deref().unwrap_or_default();

    match cli.command {
        Command::Add {
            heading,
            details,
            deadline,
            estimate,
            link,
            parent,
        } => {
            let heading = match heading {
                Some(value) if !value.trim().is_empty() => value.trim().to_string(),
                _ => return Err(AppError::invalid_input("heading is required")),
            };

            let mut task = Task::new(heading, details.unwrap_or_default());
            if let Some(raw) = deadline {
                task = task.with_deadline(cli::parse_deadline(&raw)?);
            }
            if let Some(minutes) = estimate {
                task = task.with_time_estimate(minutes);
            }
            if let Some(link) = link {
                task = task.with_resource_link(link);
            }

            match parent {
                Some(parent_id) => {
                    let parent = store
                        .add_subtask(user, parent_id.trim(), task.clone())?
                        .ok_or_else(|| not_found("parent task"))?;
                    if as_json {
                        print_json(serde_json::to_value(&task)?)?;
                    } else {
                        println!(
                            "Added subtask: {} ({}) under {}",
                            task.heading, task.id, parent.heading
                        );
                    }
                }
                None => {
                    let task = store.add_task(user, task)?;
                    if as_json {
                        print_json(serde_json::to_value(&task)?)?;
                    } else {
                        println!("Added task: {} ({})", task.heading, task.id);
                    }
                }
            }
        }
        Command::Show { id } => {
            let task = store
                .get_task(user, id.trim())
                .ok_or_else(|| not_found("task"))?;
            if as_json {
                print_json(serde_json::to_value(&task)?)?;
            } else {
                print_task_details(&task);
            }
        }
        Command::List { status } => {
            let tasks = match status {
                Some(raw) => store.list_tasks_by_status(user, TaskStatus::parse(&raw)?),
                None => store.list_tasks(user),
            };
            let focused_task_id = store
                .get_user_session(user)
                .and_then(|session| session.current_focus_task().map(str::to_string));
            print_tasks(&tasks, focused_task_id.as_deref(), as_json)?;
        }
        Command::Search { query } => {
            if query.trim().is_empty() {
                return Err(AppError::invalid_input("query is required"));
            }
            print_tasks(&store.search_tasks(user, &query), None, as_json)?;
        }
        Command::Update {
            id,
            heading,
            details,
            status,
            deadline,
            clear_deadline,
            estimate,
            link,
        } => {
            let heading = heading.map(|value| value.trim().to_string());
            if heading.as_deref() == Some("") {
                return Err(AppError::invalid_input("heading cannot be empty"));
            }
            let deadline = if clear_deadline {
                Some(None)
            } else {
                deadline
                    .as_deref()
                    .map(cli::parse_deadline)
                    .transpose()?
                    .map(Some)
            };

            let update = TaskUpdate {
                heading,
                details,
                status: status.as_deref().map(TaskStatus::parse).transpose()?,
                deadline,
                time_estimate: estimate.map(Some),
                resource_link: link.map(Some),
                metadata: None,
            };
            if update.is_empty() {
                return Err(AppError::invalid_input("nothing to update"));
            }

            let task = store
                .update_task(user, id.trim(), update)?
                .ok_or_else(|| not_found("task"))?;
            if as_json {
                print_json(serde_json::to_value(&task)?)?;
            } else {
                println!("Updated task: {} ({})", task.heading, task.id);
            }
        }
        Command::Delete { id } => {
            let task = store
                .delete_task(user, id.trim())?
                .ok_or_else(|| not_found("task"))?;
            if as_json {
                print_json(serde_json::to_value(&task)?)?;
            } else {
                println!("Deleted task: {} ({})", task.heading, task.id);
            }
        }
        Command::Done {
            id,
            actual,
            difficulty,
            energy,
            productivity,
            notes,
        } => {
            let id = id.trim();
            let report = CompletionReport {
                actual_time: actual,
                difficulty,
                energy_level: energy,
                productivity,
                notes: notes.unwrap_or_default(),
            };
            if !store.mark_task_done(user, id, report)? {
                return Err(not_found("task"));
            }

            let task = store.get_task(user, id).ok_or_else(|| not_found("task"))?;
            if as_json {
                print_json(serde_json::to_value(&task)?)?;
            } else {
                println!("Completed task: {} ({})", task.heading, task.id);
            }
        }
        Command::Focus { focus } => match focus {
            FocusCommand::Start { id } => {
                let id = id.trim().to_string();
                if !store.with_session(user, |session, now| session.start_focus_at(&id, now))? {
                    return Err(not_found("task"));
                }
                if as_json {
                    print_json(json!({ "focused_task_id": id }))?;
                } else {
                    println!("Focusing on task: {id}");
                }
            }
            FocusCommand::Stop => {
                let minutes = store.with_session(user, |session, now| session.end_focus_at(now))?;
                if as_json {
                    print_json(json!({ "minutes": minutes }))?;
                } else {
                    match minutes {
                        Some(minutes) => println!("Focus ended after {minutes} min."),
                        None => println!("No focus block running."),
                    }
                }
            }
        },
        Command::Energy {
            level,
            activity,
            score,
        } => {
            if !(0.0..=1.0).contains(&score) {
                return Err(AppError::invalid_input("score must be between 0.0 and 1.0"));
            }
            let pattern = store.with_session(user, |session, now| {
                session.record_energy_pattern_at(level, activity, score, Map::new(), now)
            })?;
            if as_json {
                print_json(serde_json::to_value(&pattern)?)?;
            } else {
                println!(
                    "Recorded energy {} ({})",
                    pattern.energy_level, pattern.activity_type
                );
            }
        }
        Command::Prefs { settings } => {
            let preferences = if settings.is_empty() {
                store
                    .get_user_session(user)
                    .map(|session| session.preferences().clone())
                    .unwrap_or_else(UserPreferences::default)
            } else {
                let update = PreferencesUpdate::from_fields(cli::parse_key_values(&settings)?)?;
                store.with_session(user, |session, now| {
                    session.update_preferences_at(update, now);
                    session.preferences().clone()
                })?
            };

            let value = serde_json::to_value(&preferences)?;
            if as_json {
                print_json(value)?;
            } else {
                print_fields(value);
            }
        }
        Command::Feedback { fields, limit } => {
            if fields.is_empty() {
                let entries = store.get_feedback(user, limit);
                if as_json {
                    print_json(serde_json::to_value(&entries)?)?;
                } else if entries.is_empty() {
                    println!("No feedback.");
                } else {
                    for entry in &entries {
                        println!(
                            "{} {}",
                            format_time(entry.timestamp),
                            Value::Object(entry.fields.clone())
                        );
                    }
                }
            } else {
                let entry = store.add_feedback(user, cli::parse_key_values(&fields)?)?;
                if as_json {
                    print_json(serde_json::to_value(&entry)?)?;
                } else {
                    println!("Recorded feedback at {}", format_time(entry.timestamp));
                }
            }
        }
        Command::Analytics => match store.get_analytics(user) {
            Some(report) if as_json => print_json(serde_json::to_value(&report)?)?,
            Some(report) => print_report(&report),
            None if as_json => print_json(Value::Null)?,
            None => println!("No data for this user yet."),
        },
        Command::Backup { backup } => match backup {
            BackupCommand::Create { reason } => {
                let info = store.create_backup(&reason)?;
                if as_json {
                    print_json(backup_json(&info))?;
                } else {
                    println!("Created backup: {}", info.file_name);
                }
            }
            BackupCommand::List => {
                let backups = store.list_backups();
                if as_json {
                    print_json(Value::Array(backups.iter().map(backup_json).collect()))?;
                } else if backups.is_empty() {
                    println!("No backups.");
                } else {
                    let rows: Vec<BackupRow> = backups
                        .into_iter()
                        .map(|info| BackupRow {
                            created_at: format_time(info.created_at),
                            file_name: info.file_name,
                            reason: info.reason,
                            size_bytes: info.size_bytes,
                        })
                        .collect();
                    println!("{}", Table::new(rows));
                }
            }
            BackupCommand::Restore { name } => {
                let name = name.trim();
                if !store.restore_from_backup(name)? {
                    return Err(not_found("backup"));
                }
                if as_json {
                    print_json(json!({ "restored": name }))?;
                } else {
                    println!("Restored from backup: {name}");
                }
            }
            BackupCommand::Settings {
                auto,
                retention_days,
            } => {
                let settings = store.set_backup_settings(auto, retention_days)?;
                if as_json {
                    print_json(serde_json::to_value(&settings)?)?;
                } else {
                    println!(
                        "Auto backup: {}, retention: {} days",
                        settings.auto_backup, settings.backup_retention_days
                    );
                }
            }
        },
        Command::Export { path } => {
            if !store.export_user_data(user, &path)? {
                return Err(not_found("user"));
            }
            if as_json {
                print_json(json!({ "exported_to": path.display().to_string() }))?;
            } else {
                println!("Exported user data to {}", path.display());
            }
        }
        Command::Import { path } => {
            let user_id = store.import_user_data(&path)?;
            if as_json {
                print_json(json!({ "user_id": user_id }))?;
            } else {
                println!("Imported user: {user_id}");
            }
        }
        Command::Clear { all } => {
            let removed = store.clear_all_data(if all { None } else { Some(user) })?;
            if as_json {
                print_json(json!({ "removed": removed }))?;
            } else {
                println!("Removed {removed} user(s).");
            }
        }
    }

    Ok(())
}

fn main() {
    init_tracing();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) if matches!(err.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            err.exit()
        }
        Err(err) => {
            eprintln!("ERROR: {}", normalize_parse_error(err));
            std::process::exit(1);
        }
    };

    if let Err(err) = run_command(cli) {
        eprintln!("ERROR: {}", err);
        std::process::exit(1);
    }
}
