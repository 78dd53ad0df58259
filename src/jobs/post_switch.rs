use crate::{backend::Backend, error::EngineError, models::PostSwitchStrategy};
use anyhow::Result;
use tracing::debug;

/// Automatic triggers always take the hook path; manual ones run what was asked.
pub fn effective_strategy(requested: PostSwitchStrategy, automatic: bool) -> PostSwitchStrategy {
    if automatic {
        PostSwitchStrategy::Hook
    } else {
        requested
    }
}

/// Runs the post-switch action. When the hook path is chosen and the hook is
/// missing this fails with [`EngineError::HookNotInstalled`]; it never falls
/// back to the restart path.
pub async fn run_post_switch(
    backend: &dyn Backend,
    requested: PostSwitchStrategy,
    automatic: bool,
) -> Result<String> {
    let strategy = effective_strategy(requested, automatic);
    if strategy == PostSwitchStrategy::Hook && !backend.is_hook_installed().await? {
        debug!(automatic, "post-switch hook missing");
        return Err(EngineError::HookNotInstalled.into());
    }
    backend.run_post_switch_action(strategy).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeBackend;
    use std::sync::atomic::Ordering;

    #[test]
    fn automatic_always_uses_hook() {
        assert_eq!(
            effective_strategy(PostSwitchStrategy::RestartExtensionHost, true),
            PostSwitchStrategy::Hook
        );
        assert_eq!(
            effective_strategy(PostSwitchStrategy::RestartExtensionHost, false),
            PostSwitchStrategy::RestartExtensionHost
        );
    }

    #[tokio::test]
    async fn automatic_without_hook_never_restarts() {
        let backend = FakeBackend::default();
        let error = run_post_switch(&backend, PostSwitchStrategy::RestartExtensionHost, true)
            .await
            .expect_err("hook missing");
        assert!(matches!(
            error.downcast_ref::<EngineError>(),
            Some(EngineError::HookNotInstalled)
        ));
        assert_eq!(backend.count("run_post_switch_action"), 0);
    }

    #[tokio::test]
    async fn installed_hook_runs_hook_action() {
        let backend = FakeBackend::default();
        backend.hook_installed.store(true, Ordering::SeqCst);
        let message = run_post_switch(&backend, PostSwitchStrategy::RestartExtensionHost, true)
            .await
            .expect("hook action");
        assert_eq!(message, "已执行 hook");
    }
}
