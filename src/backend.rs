use crate::models::{
    AppMode, AutoSwitchTickResult, DashboardSnapshot, ExtensionInfo, PostSwitchStrategy,
    ThreadRecoverTickResult,
};
use anyhow::Result;
use async_trait::async_trait;

/// The command backend the runtime drives. Every dashboard-producing call
/// returns a full snapshot that goes through the reconciler.
#[async_trait]
pub trait Backend: Send + Sync {
    /// `sync_identity = false` must stay cheap: the live poller calls it twice
    /// a second.
    async fn fetch_dashboard(&self, sync_identity: bool, mode: AppMode) -> Result<DashboardSnapshot>;

    async fn apply_profile(&self, name: &str, mode: AppMode) -> Result<DashboardSnapshot>;

    async fn refresh_quota(
        &self,
        name: &str,
        mode: AppMode,
        force_token_refresh: bool,
    ) -> Result<DashboardSnapshot>;

    async fn refresh_all_quota(
        &self,
        mode: AppMode,
        force_token_refresh: bool,
    ) -> Result<DashboardSnapshot>;

    async fn reorder_profiles(&self, names: &[String]) -> Result<DashboardSnapshot>;

    async fn run_keepalive_all(&self) -> Result<DashboardSnapshot>;

    async fn auto_switch_tick(&self, mode: AppMode) -> Result<AutoSwitchTickResult>;

    async fn auto_switch_reset(&self) -> Result<()>;

    async fn thread_recover_tick(&self, mode: AppMode) -> Result<ThreadRecoverTickResult>;

    async fn is_hook_installed(&self) -> Result<bool>;

    async fn install_hook(&self) -> Result<String>;

    async fn get_extension_info(&self) -> Result<ExtensionInfo>;

    async fn run_post_switch_action(&self, strategy: PostSwitchStrategy) -> Result<String>;
}
