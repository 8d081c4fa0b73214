use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::{Date, Duration, OffsetDateTime};

use super::history::{CompletionHistory, EnergyPattern};
use super::preferences::{PreferencesUpdate, UserPreferences};
use super::task::{Task, TaskStatus};

const COMPLETION_RATE_WINDOW_DAYS: i64 = 30;

/// Everything one user owns. Mutated only through the intent-level methods
/// below; the daily counters roll over whenever a mutation lands on a new
/// UTC day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSession {
    user_id: String,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    last_updated: OffsetDateTime,
    #[serde(default)]
    tasks: Vec<Task>,
    #[serde(default)]
    preferences: UserPreferences,
    #[serde(default)]
    completion_history: Vec<CompletionHistory>,
    #[serde(default)]
    energy_patterns: Vec<EnergyPattern>,
    #[serde(default)]
    current_focus_task: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    session_start_time: Option<OffsetDateTime>,
    /// Minutes.
    #[serde(default)]
    total_focus_time: u32,
    #[serde(default)]
    tasks_completed_today: u32,
    #[serde(default)]
    total_focus_time_today: u32,
    #[serde(default)]
    streak_days: u32,
}

/// What the user reports when finishing a task.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionReport {
    /// Minutes actually spent.
    pub actual_time: u32,
    pub difficulty: u8,
    pub energy_level: u8,
    pub productivity: u8,
    pub notes: String,
}

/// Derived from the completion log on demand; never stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProductivityStats {
    pub total_completions: usize,
    pub average_actual_time: f64,
    pub average_difficulty: f64,
    pub average_productivity: f64,
    pub completion_rate_30d: f64,
}

impl UserSession {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self::new_at(user_id, OffsetDateTime::now_utc())
    }

    pub fn new_at(user_id: impl Into<String>, now: OffsetDateTime) -> Self {
        Self {
            user_id: user_id.into(),
            created_at: now,
            last_updated: now,
            tasks: Vec::new(),
            preferences: UserPreferences::default(),
            completion_history: Vec::new(),
            energy_patterns: Vec::new(),
            current_focus_task: None,
            session_start_time: None,
            total_focus_time: 0,
            tasks_completed_today: 0,
            total_focus_time_today: 0,
            streak_days: 0,
        }
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn created_at(&self) -> OffsetDateTime {
        self.created_at
    }

    pub fn last_updated(&self) -> OffsetDateTime {
        self.last_updated
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn preferences(&self) -> &UserPreferences {
        &self.preferences
    }

    pub fn completion_history(&self) -> &[CompletionHistory] {
        &self.completion_history
    }

    pub fn energy_patterns(&self) -> &[EnergyPattern] {
        &self.energy_patterns
    }

    pub fn current_focus_task(&self) -> Option<&str> {
        self.current_focus_task.as_deref()
    }

    pub fn session_start_time(&self) -> Option<OffsetDateTime> {
        self.session_start_time
    }

    pub fn total_focus_time(&self) -> u32 {
        self.total_focus_time
    }

    pub fn tasks_completed_today(&self) -> u32 {
        self.tasks_completed_today
    }

    pub fn total_focus_time_today(&self) -> u32 {
        self.total_focus_time_today
    }

    pub fn streak_days(&self) -> u32 {
        self.streak_days
    }

    pub fn add_task(&mut self, task: Task) {
        self.add_task_at(task, OffsetDateTime::now_utc());
    }

    pub fn add_task_at(&mut self, task: Task, now: OffsetDateTime) {
        self.tasks.push(task);
        self.bump(now);
    }

    pub fn remove_task(&mut self, task_id: &str) -> Option<Task> {
        self.remove_task_at(task_id, OffsetDateTime::now_utc())
    }

    /// Root level only. Clears the focus if it pointed at the removed task.
    pub fn remove_task_at(&mut self, task_id: &str, now: OffsetDateTime) -> Option<Task> {
        let index = self.tasks.iter().position(|task| task.id == task_id)?;
        let removed = self.tasks.remove(index);
        if self.current_focus_task.as_deref() == Some(task_id) {
            self.current_focus_task = None;
            self.session_start_time = None;
        }
        self.bump(now);
        Some(removed)
    }

    pub fn get_task(&self, task_id: &str) -> Option<&Task> {
        self.tasks.iter().find(|task| task.id == task_id)
    }

    pub fn mark_task_done(&mut self, task_id: &str, report: CompletionReport) -> bool {
        self.mark_task_done_at(task_id, report, OffsetDateTime::now_utc())
    }

    pub fn mark_task_done_at(
        &mut self,
        task_id: &str,
        report: CompletionReport,
        now: OffsetDateTime,
    ) -> bool {
        let Some(task) = self.tasks.iter_mut().find(|task| task.id == task_id) else {
            return false;
        };
        task.status = TaskStatus::Done;
        task.updated_at = now.max(task.created_at);
        let estimated_time = task.time_estimate;

        self.bump(now);
        self.advance_streak(now.date());
        self.completion_history.push(CompletionHistory {
            task_id: task_id.to_string(),
            estimated_time,
            actual_time: report.actual_time,
            difficulty_rating: report.difficulty,
            energy_level: report.energy_level,
            productivity_rating: report.productivity,
            notes: report.notes,
            completed_at: now,
        });
        self.tasks_completed_today += 1;
        true
    }

    pub fn record_energy_pattern(
        &mut self,
        energy_level: u8,
        activity_type: impl Into<String>,
        productivity_score: f64,
        context: Map<String, Value>,
    ) -> EnergyPattern {
        self.record_energy_pattern_at(
            energy_level,
            activity_type,
            productivity_score,
            context,
            OffsetDateTime::now_utc(),
        )
    }

    pub fn record_energy_pattern_at(
        &mut self,
        energy_level: u8,
        activity_type: impl Into<String>,
        productivity_score: f64,
        context: Map<String, Value>,
        now: OffsetDateTime,
    ) -> EnergyPattern {
        let pattern = EnergyPattern {
            timestamp: now,
            energy_level,
            activity_type: activity_type.into(),
            productivity_score,
            context,
        };
        self.energy_patterns.push(pattern.clone());
        self.bump(now);
        pattern
    }

    pub fn update_preferences(&mut self, update: PreferencesUpdate) {
        self.update_preferences_at(update, OffsetDateTime::now_utc());
    }

    pub fn update_preferences_at(&mut self, update: PreferencesUpdate, now: OffsetDateTime) {
        self.preferences = self.preferences.merged(update);
        self.bump(now);
    }

    pub fn start_focus(&mut self, task_id: &str) -> bool {
        self.start_focus_at(task_id, OffsetDateTime::now_utc())
    }

    /// Focuses a root task. A focus already running is closed out first.
    pub fn start_focus_at(&mut self, task_id: &str, now: OffsetDateTime) -> bool {
        if self.get_task(task_id).is_none() {
            return false;
        }
        self.end_focus_at(now);
        self.current_focus_task = Some(task_id.to_string());
        self.session_start_time = Some(now);
        self.bump(now);
        true
    }

    pub fn end_focus(&mut self) -> Option<u32> {
        self.end_focus_at(OffsetDateTime::now_utc())
    }

    /// Closes the running focus block and returns its length in minutes.
    pub fn end_focus_at(&mut self, now: OffsetDateTime) -> Option<u32> {
        let started = self.session_start_time.take()?;
        self.current_focus_task = None;
        let minutes = u32::try_from((now - started).whole_minutes().max(0)).unwrap_or(u32::MAX);
        self.bump(now);
        self.total_focus_time = self.total_focus_time.saturating_add(minutes);
        self.total_focus_time_today = self.total_focus_time_today.saturating_add(minutes);
        Some(minutes)
    }

    pub fn current_focus(&self) -> Option<&Task> {
        self.current_focus_task
            .as_deref()
            .and_then(|task_id| self.get_task(task_id))
    }

    pub fn get_pending_tasks(&self) -> Vec<&Task> {
        self.tasks
            .iter()
            .filter(|task| task.status == TaskStatus::Pending)
            .collect()
    }

    pub fn get_completed_tasks_today(&self) -> Vec<&Task> {
        self.completed_tasks_on(OffsetDateTime::now_utc().date())
    }

    pub fn completed_tasks_on(&self, day: Date) -> Vec<&Task> {
        self.tasks
            .iter()
            .filter(|task| task.status == TaskStatus::Done)
            .filter(|task| {
                self.completion_history
                    .iter()
                    .any(|entry| entry.task_id == task.id && entry.completed_at.date() == day)
            })
            .collect()
    }

    pub fn get_energy_patterns_today(&self) -> Vec<&EnergyPattern> {
        self.energy_patterns_on(OffsetDateTime::now_utc().date())
    }

    pub fn energy_patterns_on(&self, day: Date) -> Vec<&EnergyPattern> {
        self.energy_patterns
            .iter()
            .filter(|pattern| pattern.timestamp.date() == day)
            .collect()
    }

    pub fn get_productivity_stats(&self) -> ProductivityStats {
        self.productivity_stats_at(OffsetDateTime::now_utc())
    }

    pub fn productivity_stats_at(&self, now: OffsetDateTime) -> ProductivityStats {
        if self.completion_history.is_empty() {
            return ProductivityStats::default();
        }

        let total = self.completion_history.len();
        let count = total as f64;
        let mean = |pick: fn(&CompletionHistory) -> f64| {
            self.completion_history.iter().map(pick).sum::<f64>() / count
        };

        let window_start = now - Duration::days(COMPLETION_RATE_WINDOW_DAYS);
        let completed_in_window = self
            .completion_history
            .iter()
            .filter(|entry| entry.completed_at >= window_start)
            .count();
        let created_in_window = self
            .tasks
            .iter()
            .filter(|task| task.created_at >= window_start)
            .count();

        ProductivityStats {
            total_completions: total,
            average_actual_time: mean(|entry| f64::from(entry.actual_time)),
            average_difficulty: mean(|entry| f64::from(entry.difficulty_rating)),
            average_productivity: mean(|entry| f64::from(entry.productivity_rating)),
            completion_rate_30d: completed_in_window as f64 / created_in_window.max(1) as f64,
        }
    }

    pub(crate) fn task_mut(&mut self, task_id: &str) -> Option<&mut Task> {
        self.tasks.iter_mut().find(|task| task.id == task_id)
    }

    pub(crate) fn replace_tasks(&mut self, tasks: Vec<Task>) {
        self.tasks = tasks;
    }

    pub(crate) fn take_tasks(&mut self) -> Vec<Task> {
        std::mem::take(&mut self.tasks)
    }

    pub(crate) fn touch(&mut self, now: OffsetDateTime) {
        self.bump(now);
    }

    fn bump(&mut self, now: OffsetDateTime) {
        if self.last_updated.date() != now.date() {
            self.tasks_completed_today = 0;
            self.total_focus_time_today = 0;
        }
        self.last_updated = now.max(self.last_updated);
    }

    fn advance_streak(&mut self, today: Date) {
        let previous = self
            .completion_history
            .last()
            .map(|entry| entry.completed_at.date());
        self.streak_days = match previous {
            Some(day) if day == today => self.streak_days.max(1),
            Some(day) if day.next_day() == Some(today) => self.streak_days + 1,
            _ => 1,
        };
    }
}
