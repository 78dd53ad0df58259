use serde::{Deserialize, Serialize};
use std::ops::{Index, IndexMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AppMode {
    #[default]
    Gpt,
    OpenCode,
}

impl AppMode {
    pub fn as_str(self) -> &'static str {
        match self {
            AppMode::Gpt => "gpt",
            AppMode::OpenCode => "opencode",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            AppMode::Gpt => "GPT",
            AppMode::OpenCode => "OpenCode",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "gpt" => Some(AppMode::Gpt),
            "opencode" => Some(AppMode::OpenCode),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModeMap<T> {
    pub gpt: T,
    pub opencode: T,
}

impl<T> ModeMap<T> {
    pub fn get(&self, mode: AppMode) -> &T {
        match mode {
            AppMode::Gpt => &self.gpt,
            AppMode::OpenCode => &self.opencode,
        }
    }

    pub fn get_mut(&mut self, mode: AppMode) -> &mut T {
        match mode {
            AppMode::Gpt => &mut self.gpt,
            AppMode::OpenCode => &mut self.opencode,
        }
    }
}

impl<T> Index<AppMode> for ModeMap<T> {
    type Output = T;

    fn index(&self, mode: AppMode) -> &T {
        self.get(mode)
    }
}

impl<T> IndexMut<AppMode> for ModeMap<T> {
    fn index_mut(&mut self, mode: AppMode) -> &mut T {
        self.get_mut(mode)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileSupport {
    pub gpt: bool,
    pub opencode: bool,
}

impl Default for ProfileSupport {
    fn default() -> Self {
        Self {
            gpt: true,
            opencode: false,
        }
    }
}

impl ProfileSupport {
    pub fn supports(&self, mode: AppMode) -> bool {
        match mode {
            AppMode::Gpt => self.gpt,
            AppMode::OpenCode => self.opencode,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub name: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub workspace_name: Option<String>,
    #[serde(default)]
    pub workspace_id: Option<String>,
    #[serde(default)]
    pub workspace_alias: Option<String>,
    #[serde(default)]
    pub support: ProfileSupport,
    #[serde(default)]
    pub display_workspace: String,
    #[serde(default)]
    pub five_hour_remaining_percent: Option<i64>,
    #[serde(default)]
    pub five_hour_resets_at: Option<i64>,
    #[serde(default)]
    pub one_week_remaining_percent: Option<i64>,
    #[serde(default)]
    pub one_week_resets_at: Option<i64>,
    #[serde(default)]
    pub last_checked_at: Option<String>,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub is_active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrentIdentity {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub workspace_name: Option<String>,
    #[serde(default)]
    pub workspace_id: Option<String>,
    #[serde(default)]
    pub display_workspace: String,
    #[serde(default)]
    pub five_hour_remaining_percent: Option<i64>,
    #[serde(default)]
    pub five_hour_resets_at: Option<i64>,
    #[serde(default)]
    pub one_week_remaining_percent: Option<i64>,
    #[serde(default)]
    pub one_week_resets_at: Option<i64>,
    #[serde(default)]
    pub checked_at: Option<String>,
}

/// Full synchronized state returned by every dashboard-producing backend call.
///
/// The backend speaks `current` / `opencodeCurrent`; in memory the two live
/// identities are kept in a [`ModeMap`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "DashboardWire", into = "DashboardWire")]
pub struct DashboardSnapshot {
    pub app_name: String,
    pub active_profile: Option<String>,
    pub identities: ModeMap<Option<CurrentIdentity>>,
    pub current_error: Option<String>,
    pub current_error_mode: Option<AppMode>,
    pub last_keepalive_at: Option<i64>,
    pub profiles: Vec<Profile>,
}

impl DashboardSnapshot {
    pub fn identity(&self, mode: AppMode) -> Option<&CurrentIdentity> {
        self.identities[mode].as_ref()
    }

    pub fn profile(&self, name: &str) -> Option<&Profile> {
        self.profiles.iter().find(|profile| profile.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.profile(name).is_some()
    }

    pub fn profile_names(&self) -> Vec<String> {
        self.profiles
            .iter()
            .map(|profile| profile.name.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DashboardWire {
    #[serde(default)]
    app_name: String,
    #[serde(default)]
    active_profile: Option<String>,
    #[serde(default)]
    current: Option<CurrentIdentity>,
    #[serde(default)]
    opencode_current: Option<CurrentIdentity>,
    #[serde(default)]
    current_error: Option<String>,
    #[serde(default)]
    current_error_mode: Option<AppMode>,
    #[serde(default)]
    last_keepalive_at: Option<i64>,
    #[serde(default)]
    profiles: Vec<Profile>,
}

impl From<DashboardWire> for DashboardSnapshot {
    fn from(wire: DashboardWire) -> Self {
        Self {
            app_name: wire.app_name,
            active_profile: wire.active_profile,
            identities: ModeMap {
                gpt: wire.current,
                opencode: wire.opencode_current,
            },
            current_error: wire.current_error,
            current_error_mode: wire.current_error_mode,
            last_keepalive_at: wire.last_keepalive_at,
            profiles: wire.profiles,
        }
    }
}

impl From<DashboardSnapshot> for DashboardWire {
    fn from(snapshot: DashboardSnapshot) -> Self {
        Self {
            app_name: snapshot.app_name,
            active_profile: snapshot.active_profile,
            current: snapshot.identities.gpt,
            opencode_current: snapshot.identities.opencode,
            current_error: snapshot.current_error,
            current_error_mode: snapshot.current_error_mode,
            last_keepalive_at: snapshot.last_keepalive_at,
            profiles: snapshot.profiles,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoSwitchTickResult {
    pub action: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub switched_to: Option<String>,
    #[serde(default)]
    pub reload_triggered: bool,
    #[serde(default)]
    pub pending_reason: Option<String>,
    #[serde(default)]
    pub dashboard: Option<DashboardSnapshot>,
}

impl AutoSwitchTickResult {
    pub fn switched(&self) -> bool {
        self.action == "switched"
    }

    /// Routine outcomes that should not overwrite the status line.
    pub fn is_quiet(&self) -> bool {
        matches!(
            self.action.as_str(),
            "idle" | "cooldown" | "no_candidate_cooldown"
        )
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadRecoverTickResult {
    pub action: String,
    #[serde(default)]
    pub message: Option<String>,
}

impl ThreadRecoverTickResult {
    pub fn is_definitive(&self) -> bool {
        matches!(
            self.action.as_str(),
            "thread_recovered" | "thread_recover_failed"
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtensionInfo {
    #[serde(default)]
    pub current_version: Option<String>,
    #[serde(default)]
    pub all_versions: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PostSwitchStrategy {
    Hook,
    #[default]
    RestartExtensionHost,
}

impl PostSwitchStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            PostSwitchStrategy::Hook => "hook",
            PostSwitchStrategy::RestartExtensionHost => "restart_extension_host",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "hook" => Some(PostSwitchStrategy::Hook),
            "restart_extension_host" => Some(PostSwitchStrategy::RestartExtensionHost),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalSettings {
    pub app_mode: AppMode,
    pub auto_switch_enabled: bool,
    pub auto_refresh_on_startup: bool,
    pub keepalive_enabled: bool,
    pub post_switch_strategy: PostSwitchStrategy,
    pub hook_version_snapshot: Option<String>,
    pub active_profile_by_mode: ModeMap<Option<String>>,
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            app_mode: AppMode::Gpt,
            auto_switch_enabled: true,
            auto_refresh_on_startup: false,
            keepalive_enabled: true,
            post_switch_strategy: PostSwitchStrategy::RestartExtensionHost,
            hook_version_snapshot: None,
            active_profile_by_mode: ModeMap::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchHistory {
    pub id: String,
    pub mode: AppMode,
    pub from_profile: Option<String>,
    pub to_profile: String,
    pub result: String,
    pub message: Option<String>,
    pub created_at: String,
}
