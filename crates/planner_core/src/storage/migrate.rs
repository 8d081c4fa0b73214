//! Forward-only rewrite of older document shapes into the current
//! per-user layout. Runs on the raw JSON before it is typed.

use serde_json::{Map, Value, json};
use time::OffsetDateTime;

use super::document::{Settings, SystemBlock};
use crate::error::{AppError, Result};
use crate::model::UserSession;

/// Inputs for filling in what an old document lacks.
#[derive(Debug, Clone)]
pub struct MigrationContext<'a> {
    pub default_user_id: &'a str,
    pub now: OffsetDateTime,
    pub settings: &'a Settings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Migrated {
    pub value: Value,
    pub changed: bool,
}

/// Accepted inputs:
/// - the current shape (`users` member); missing pieces are filled in,
/// - `{ "tasks": {id: task} | [task], ... }` without `users`,
/// - a bare array of tasks,
/// - a bare `{id: task}` object.
///
/// Applying the result again is a no-op.
pub fn migrate(value: Value, ctx: &MigrationContext<'_>) -> Result<Migrated> {
    match value {
        Value::Object(mut root) if root.contains_key("users") => {
            let changed = complete_current(&mut root, ctx)?;
            Ok(Migrated {
                value: Value::Object(root),
                changed,
            })
        }
        Value::Object(mut root) if root.contains_key("tasks") => {
            let tasks = root.remove("tasks").unwrap_or(Value::Null);
            let registry = registry_from(tasks)?;
            let focus = root
                .get("focused_task_id")
                .and_then(Value::as_str)
                .map(str::to_string);
            legacy_wrap(registry, focus, ctx)
        }
        Value::Array(items) => legacy_wrap(registry_from(Value::Array(items))?, None, ctx),
        Value::Object(root) if !root.contains_key("system") && root.values().all(is_task_shaped) => {
            legacy_wrap(root, None, ctx)
        }
        _ => Err(AppError::invalid_data("unrecognized document shape")),
    }
}

fn is_task_shaped(value: &Value) -> bool {
    value.get("id").is_some_and(Value::is_string)
}

fn registry_from(tasks: Value) -> Result<Map<String, Value>> {
    match tasks {
        Value::Object(map) => Ok(map),
        Value::Array(items) => {
            let mut registry = Map::new();
            for item in items {
                let id = item
                    .get("id")
                    .and_then(Value::as_str)
                    .ok_or_else(|| AppError::invalid_data("legacy task without an id"))?
                    .to_string();
                registry.insert(id, item);
            }
            Ok(registry)
        }
        Value::Null => Ok(Map::new()),
        _ => Err(AppError::invalid_data("legacy tasks must be an object or array")),
    }
}

fn legacy_wrap(
    registry: Map<String, Value>,
    focus: Option<String>,
    ctx: &MigrationContext<'_>,
) -> Result<Migrated> {
    let mut session = fresh_session(ctx.default_user_id, ctx)?;
    if let Some(focus) = focus.filter(|id| registry.contains_key(id)) {
        session["current_focus_task"] = Value::String(focus);
    }

    let mut users = Map::new();
    users.insert(
        ctx.default_user_id.to_string(),
        json!({
            "session": session,
            "tasks": Value::Object(registry),
            "feedback": [],
            "analytics": fresh_analytics(),
        }),
    );

    let mut root = Map::new();
    root.insert("users".to_string(), Value::Object(users));
    root.insert("system".to_string(), fresh_system(ctx)?);

    tracing::info!(user_id = %ctx.default_user_id, "migrated legacy single-user document");
    Ok(Migrated {
        value: Value::Object(root),
        changed: true,
    })
}

fn complete_current(root: &mut Map<String, Value>, ctx: &MigrationContext<'_>) -> Result<bool> {
    let mut changed = false;

    if !root.get("system").is_some_and(Value::is_object) {
        root.insert("system".to_string(), fresh_system(ctx)?);
        changed = true;
    }

    let users = match root.get_mut("users") {
        Some(Value::Object(users)) => users,
        _ => return Err(AppError::invalid_data("users must be an object")),
    };

    for (user_id, record) in users.iter_mut() {
        let Value::Object(record) = record else {
            return Err(AppError::invalid_data(format!("user {user_id} is not an object")));
        };
        if !record.contains_key("session") {
            record.insert("session".to_string(), fresh_session(user_id, ctx)?);
            changed = true;
        }
        if !record.contains_key("tasks") {
            record.insert("tasks".to_string(), Value::Object(Map::new()));
            changed = true;
        }
        if !record.contains_key("feedback") {
            record.insert("feedback".to_string(), Value::Array(Vec::new()));
            changed = true;
        }
        if !record.contains_key("analytics") {
            record.insert("analytics".to_string(), fresh_analytics());
            changed = true;
        }
    }

    Ok(changed)
}

fn fresh_session(user_id: &str, ctx: &MigrationContext<'_>) -> Result<Value> {
    Ok(serde_json::to_value(UserSession::new_at(user_id, ctx.now))?)
}

fn fresh_system(ctx: &MigrationContext<'_>) -> Result<Value> {
    Ok(serde_json::to_value(SystemBlock::new(
        ctx.now,
        ctx.settings.clone(),
    ))?)
}

fn fresh_analytics() -> Value {
    json!({ "total_sessions": 0, "last_session": null })
}
