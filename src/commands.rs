use crate::{
    app_state::EngineState,
    current_error::scoped_current_error,
    error::EngineError,
    jobs::post_switch::run_post_switch,
    models::{AppMode, DashboardSnapshot, PostSwitchStrategy},
    reconcile::DashboardModel,
};
use anyhow::Result;
use std::{future::Future, sync::Arc, time::Duration};
use tracing::warn;

pub fn profile_label(state: &EngineState, name: &str) -> String {
    let Some(model) = state.current_model() else {
        return name.to_string();
    };
    let Some(index) = model
        .display_profiles
        .iter()
        .position(|profile| profile.name == name)
    else {
        return name.to_string();
    };
    let profile = &model.display_profiles[index];
    let title = if profile.display_workspace.trim().is_empty() {
        name
    } else {
        profile.display_workspace.as_str()
    };
    format!("#{} {title}", index + 1)
}

fn require_target(state: &EngineState, name: Option<&str>) -> Result<String> {
    let target = name
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .or_else(|| state.selected_profile());
    match target {
        Some(target) => Ok(target),
        None => {
            state.set_status(EngineError::NoProfileSelected.to_string());
            Err(EngineError::NoProfileSelected.into())
        }
    }
}

async fn run_dashboard_command<F>(
    state: &EngineState,
    task: F,
    success_text: &str,
    before_text: Option<&str>,
) -> Result<Arc<DashboardModel>>
where
    F: Future<Output = Result<DashboardSnapshot>>,
{
    let _busy = state.busy.enter();
    if let Some(before_text) = before_text {
        state.set_status(before_text);
    }
    match task.await {
        Ok(snapshot) => {
            let model = state.apply_snapshot(snapshot, false);
            state.set_status(success_text);
            Ok(model)
        }
        Err(error) => {
            state.set_status(format!("{success_text}失败: {error}"));
            Err(error)
        }
    }
}

pub async fn load_dashboard(
    state: &EngineState,
    sync_identity: bool,
    msg: Option<&str>,
    timeout: Option<Duration>,
) -> Result<Arc<DashboardModel>> {
    let _busy = state.busy.enter();
    let mode = state.mode();
    let task = state.backend.fetch_dashboard(sync_identity, mode);
    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, task).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout {
                label: "加载账号".to_string(),
                secs: limit.as_secs().max(1),
            }
            .into()),
        },
        None => task.await,
    };
    match result {
        Ok(snapshot) => {
            let model = state.apply_snapshot(snapshot, false);
            if let Some(msg) = msg {
                state.set_status(msg);
            }
            if let Some(detail) = scoped_current_error(&model.snapshot, mode) {
                state.set_status(format!("当前账号读取失败: {detail}"));
            }
            Ok(model)
        }
        Err(error) => {
            state.set_status(format!("加载失败: {error}"));
            Err(error)
        }
    }
}

/// Switches the current mode to `name` (or the selected profile), remembers
/// the choice and calibrates its quota. A failed calibration keeps the switch.
pub async fn apply_profile(state: &EngineState, name: Option<&str>) -> Result<Arc<DashboardModel>> {
    let target = require_target(state, name)?;
    let mode = state.mode();
    let label = profile_label(state, &target);
    let switching = format!("正在切换账号: {label}...");
    let switched = format!("已切换到账号: {label}");
    let _blocking = state.blocking.enter(switching.clone());

    let model = run_dashboard_command(
        state,
        state.backend.apply_profile(&target, mode),
        &switched,
        Some(&switching),
    )
    .await?;
    state.remember_active_profile(mode, &target);

    state.blocking.update(format!("正在校准额度: {label}..."));
    match state.backend.refresh_quota(&target, mode, false).await {
        Ok(calibrated) => {
            let model = state.apply_snapshot(calibrated, false);
            state.set_status(switched);
            Ok(model)
        }
        Err(error) => {
            state.set_status(format!("{switched}（额度校准失败: {error}）"));
            Ok(model)
        }
    }
}

pub async fn refresh_quota(
    state: &EngineState,
    name: Option<&str>,
    force_token_refresh: bool,
) -> Result<Arc<DashboardModel>> {
    let target = require_target(state, name)?;
    let mode = state.mode();
    let label = profile_label(state, &target);
    run_dashboard_command(
        state,
        state.backend.refresh_quota(&target, mode, force_token_refresh),
        &format!("已刷新额度: {label}"),
        Some(&format!("正在刷新额度: {label}...")),
    )
    .await
}

pub async fn refresh_all_quota(
    state: &EngineState,
    force_token_refresh: bool,
) -> Result<Arc<DashboardModel>> {
    let mode = state.mode();
    run_dashboard_command(
        state,
        state.backend.refresh_all_quota(mode, force_token_refresh),
        "已刷新全部账号额度",
        Some("正在刷新全部账号额度..."),
    )
    .await
}

pub async fn keepalive_now(state: &EngineState) -> Result<Arc<DashboardModel>> {
    let _busy = state.busy.enter();
    state.set_status("正在手动保活（刷新全部账号 Token）...");
    match state.backend.run_keepalive_all().await {
        Ok(snapshot) => {
            let model = state.apply_snapshot(snapshot, false);
            state.set_status("手动保活完成，全部账号 Token 已刷新。");
            Ok(model)
        }
        Err(error) => {
            state.set_status(format!("手动保活失败: {error}"));
            Err(error)
        }
    }
}

pub async fn run_post_switch_strategy(
    state: &EngineState,
    strategy: PostSwitchStrategy,
) -> Result<String> {
    let _busy = state.busy.enter();
    state.set_status(match strategy {
        PostSwitchStrategy::Hook => "正在执行方案2（Hook 提速重启 Extension Host）...",
        PostSwitchStrategy::RestartExtensionHost => "正在执行方案1（重启 Extension Host）...",
    });
    match run_post_switch(state.backend.as_ref(), strategy, false).await {
        Ok(message) => {
            state.set_status(message.clone());
            Ok(message)
        }
        Err(error) => {
            if error.downcast_ref::<EngineError>().is_some() {
                state.set_status(error.to_string());
            } else {
                state.set_status(format!("执行策略失败: {error}"));
            }
            Err(error)
        }
    }
}

/// Installs or updates the hook and records the extension version it was
/// installed against.
pub async fn install_hook(state: &EngineState) -> Result<String> {
    let _busy = state.busy.enter();
    state.set_status("正在安装/更新方案2 Hook 提速版...");
    let message = match state.backend.install_hook().await {
        Ok(message) => message,
        Err(error) => {
            state.set_status(format!("安装 Hook 失败: {error}"));
            return Err(error);
        }
    };
    match state.backend.get_extension_info().await {
        Ok(info) => {
            if let Some(version) = info.current_version {
                state.update_settings(|settings| settings.hook_version_snapshot = Some(version))?;
            }
        }
        Err(error) => warn!(error = %error, "read extension version after hook install failed"),
    }
    state.set_status(message.clone());
    Ok(message)
}

pub async fn set_mode(state: &EngineState, mode: AppMode) -> Result<Arc<DashboardModel>> {
    state.update_settings(|settings| settings.app_mode = mode)?;
    load_dashboard(state, false, Some(&format!("已切换到 {} 模式", mode.label())), None).await
}

pub fn set_post_switch_strategy(state: &EngineState, strategy: PostSwitchStrategy) -> Result<()> {
    state.update_settings(|settings| settings.post_switch_strategy = strategy)?;
    Ok(())
}

pub fn set_auto_refresh_on_startup(state: &EngineState, enabled: bool) -> Result<()> {
    state.update_settings(|settings| settings.auto_refresh_on_startup = enabled)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{dashboard, harness, FakeBackend};
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn load_dashboard_surfaces_scoped_identity_error() {
        let mut data = dashboard(&["a", "b"]);
        data.current_error = Some("token <i>expired</i>".to_string());
        let h = harness(FakeBackend::with_dashboard(data));
        let model = load_dashboard(&h.state, true, Some("已加载"), None)
            .await
            .expect("load");
        assert_eq!(model.selected.as_deref(), Some("a"));
        assert_eq!(
            h.state.status_text(),
            "当前账号读取失败: 账号 #1 (a-ws): token expired"
        );
        assert!(!h.state.busy.is_busy());
        assert_eq!(h.backend.calls(), vec!["fetch_dashboard:true:gpt"]);
    }

    #[tokio::test]
    async fn apply_profile_remembers_and_calibrates() {
        let h = harness(FakeBackend::with_dashboard(dashboard(&["a", "b"])));
        load_dashboard(&h.state, false, None, None).await.expect("load");
        h.state.select_profile("b");

        apply_profile(&h.state, None).await.expect("apply");
        assert_eq!(
            h.backend.calls()[1..],
            ["apply_profile:b:gpt", "refresh_quota:b:gpt:false"]
        );
        assert_eq!(h.state.remembered_profile(AppMode::Gpt).as_deref(), Some("b"));
        assert_eq!(h.state.status_text(), "已切换到账号: #2 b-ws");
        assert!(!h.state.blocking.is_blocking());
    }

    #[tokio::test]
    async fn failed_calibration_keeps_the_switch() {
        let h = harness(FakeBackend::with_dashboard(dashboard(&["a", "b"])));
        h.backend.fail_refresh.store(true, Ordering::SeqCst);
        load_dashboard(&h.state, false, None, None).await.expect("load");

        apply_profile(&h.state, Some("b")).await.expect("switch stands");
        assert_eq!(h.state.remembered_profile(AppMode::Gpt).as_deref(), Some("b"));
        assert!(h
            .state
            .status_text()
            .starts_with("已切换到账号: #2 b-ws（额度校准失败:"));
    }

    #[tokio::test]
    async fn commands_without_a_target_report_it() {
        let h = harness(FakeBackend::default());
        let error = refresh_quota(&h.state, None, true).await.expect_err("no target");
        assert!(matches!(
            error.downcast_ref::<EngineError>(),
            Some(EngineError::NoProfileSelected)
        ));
        assert_eq!(h.state.status_text(), "请先选择一个账号。");
        assert!(h.backend.calls().is_empty());
    }

    #[tokio::test]
    async fn failed_command_reports_status_and_releases_busy() {
        let h = harness(FakeBackend::with_dashboard(dashboard(&["a"])));
        h.backend.fail_refresh.store(true, Ordering::SeqCst);
        assert!(refresh_all_quota(&h.state, false).await.is_err());
        assert_eq!(
            h.state.status_text(),
            "已刷新全部账号额度失败: quota endpoint rejected"
        );
        assert!(!h.state.busy.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn load_dashboard_times_out() {
        let h = harness(FakeBackend::with_dashboard(dashboard(&["a"])));
        if let Ok(mut delay) = h.backend.fetch_delay.lock() {
            *delay = Some(Duration::from_secs(60));
        }
        let error = load_dashboard(&h.state, false, None, Some(Duration::from_millis(8000)))
            .await
            .expect_err("slow backend");
        assert!(matches!(
            error.downcast_ref::<EngineError>(),
            Some(EngineError::Timeout { secs: 8, .. })
        ));
        assert_eq!(h.state.status_text(), "加载失败: 加载账号超时（>8秒）");
        assert!(h.state.current_model().is_none());
    }

    #[tokio::test]
    async fn manual_hook_strategy_without_hook_fails_loudly() {
        let h = harness(FakeBackend::default());
        let error = run_post_switch_strategy(&h.state, PostSwitchStrategy::Hook)
            .await
            .expect_err("hook missing");
        assert!(matches!(
            error.downcast_ref::<EngineError>(),
            Some(EngineError::HookNotInstalled)
        ));
        assert_eq!(h.backend.count("run_post_switch_action"), 0);
        assert_eq!(h.state.status_text(), EngineError::HookNotInstalled.to_string());

        let message = run_post_switch_strategy(&h.state, PostSwitchStrategy::RestartExtensionHost)
            .await
            .expect("restart always available");
        assert_eq!(message, "已执行 restart_extension_host");
    }

    #[tokio::test]
    async fn install_hook_records_extension_version() {
        let h = harness(FakeBackend::default());
        if let Ok(mut version) = h.backend.extension_version.lock() {
            *version = Some("26.2.1".to_string());
        }
        install_hook(&h.state).await.expect("install");
        assert_eq!(
            h.state.settings().hook_version_snapshot.as_deref(),
            Some("26.2.1")
        );
        assert_eq!(
            h.state.store.load_settings().expect("load").hook_version_snapshot.as_deref(),
            Some("26.2.1")
        );
    }

    #[tokio::test]
    async fn set_mode_persists_and_reloads() {
        let h = harness(FakeBackend::with_dashboard(dashboard(&["a"])));
        set_mode(&h.state, AppMode::OpenCode).await.expect("mode");
        assert_eq!(h.state.mode(), AppMode::OpenCode);
        assert_eq!(h.backend.calls(), vec!["fetch_dashboard:false:opencode"]);
        assert_eq!(h.state.store.load_settings().expect("load").app_mode, AppMode::OpenCode);
    }
}
