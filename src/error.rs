use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("方案2 Hook 提速版未注入或版本过旧，请先安装/更新 Hook")]
    HookNotInstalled,
    #[error("{label}超时（>{secs}秒）")]
    Timeout { label: String, secs: u64 },
    #[error("请先选择一个账号。")]
    NoProfileSelected,
}
