use crate::models::{AppMode, DashboardSnapshot};
use regex::Regex;

const CURRENT_ERROR_MAX_CHARS: usize = 260;

fn strip_markup(raw: &str) -> Option<String> {
    let tags = Regex::new(r"<[^>]+>").ok()?;
    let spaces = Regex::new(r"\s+").ok()?;
    let stripped = tags.replace_all(raw, " ");
    Some(spaces.replace_all(&stripped, " ").trim().to_string())
}

pub fn compact_error_text(raw: &str) -> String {
    let text = strip_markup(raw).unwrap_or_else(|| raw.trim().to_string());
    if text.chars().count() > CURRENT_ERROR_MAX_CHARS {
        text.chars().take(CURRENT_ERROR_MAX_CHARS).collect::<String>() + "..."
    } else {
        text
    }
}

/// Formats `raw` and, when the backend's active profile is known, prefixes it
/// with that profile's position and workspace.
pub fn format_current_error(snapshot: &DashboardSnapshot, raw: &str) -> String {
    let normalized = compact_error_text(raw);
    let Some(active) = snapshot.active_profile.as_deref() else {
        return normalized;
    };
    match snapshot
        .profiles
        .iter()
        .position(|profile| profile.name == active)
    {
        Some(index) => format!(
            "账号 #{} ({}): {normalized}",
            index + 1,
            snapshot.profiles[index].display_workspace
        ),
        None => normalized,
    }
}

pub fn scoped_current_error(snapshot: &DashboardSnapshot, mode: AppMode) -> Option<String> {
    let raw = snapshot.current_error.as_deref()?;
    if raw.trim().is_empty() {
        return None;
    }
    if snapshot.current_error_mode.is_some_and(|tagged| tagged != mode) {
        return None;
    }
    Some(format_current_error(snapshot, raw))
}

/// Holds back an error banner until the same text has been observed for
/// `delay_ms`, so one-off sync hiccups never reach the screen.
#[derive(Debug, Clone)]
pub struct CurrentErrorBanner {
    delay_ms: i64,
    candidate: Option<String>,
    since_ms: i64,
    displayed: Option<String>,
}

impl CurrentErrorBanner {
    pub fn new(delay_ms: u64) -> Self {
        Self {
            delay_ms: delay_ms as i64,
            candidate: None,
            since_ms: 0,
            displayed: None,
        }
    }

    pub fn observe(&mut self, raw: Option<&str>, now_ms: i64) -> Option<&str> {
        let Some(raw) = raw else {
            self.candidate = None;
            self.since_ms = 0;
            self.displayed = None;
            return None;
        };
        if self.candidate.as_deref() != Some(raw) {
            self.candidate = Some(raw.to_string());
            self.since_ms = now_ms;
        }
        if now_ms - self.since_ms >= self.delay_ms {
            self.displayed = self.candidate.clone();
        }
        self.displayed.as_deref()
    }

    pub fn displayed(&self) -> Option<&str> {
        self.displayed.as_deref()
    }
}
