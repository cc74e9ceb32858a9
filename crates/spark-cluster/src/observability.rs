//! 日志安装入口。
//!
//! 库内部只通过 `tracing` 宏发出结构化事件，从不自行安装 Subscriber；
//! 演示程序或宿主在启动时调用 [`install_tracing`] 一次即可看到输出。

use std::sync::OnceLock;

use thiserror::Error;
use tracing::dispatcher;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt};

static INSTALLED: OnceLock<()> = OnceLock::new();

/// 日志安装失败的原因。
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// `install_tracing` 被重复调用。
    #[error("cluster tracing has already been installed")]
    AlreadyInstalled,
    /// 外部提前设置了全局 Subscriber。
    #[error("a global tracing subscriber is already set")]
    SubscriberAlreadySet,
    /// 设置全局 Subscriber 时的底层错误。
    #[error("failed to set the global tracing subscriber: {0}")]
    SetGlobalSubscriber(#[from] tracing::subscriber::SetGlobalDefaultError),
}

/// 安装 `EnvFilter + fmt` 组成的全局 Subscriber。
///
/// # 教案式说明
/// - **逻辑（How）**：先检查本模块与外部是否已安装，再组装 `registry().with(filter).with(fmt)`；
/// - **契约（What）**：过滤规则取自 `RUST_LOG`，缺省为 `info`；重复调用返回
///   [`TelemetryError::AlreadyInstalled`]，外部已设置时返回 [`TelemetryError::SubscriberAlreadySet`]。
pub fn install_tracing() -> Result<(), TelemetryError> {
    if INSTALLED.get().is_some() {
        return Err(TelemetryError::AlreadyInstalled);
    }
    if dispatcher::has_been_set() {
        return Err(TelemetryError::SubscriberAlreadySet);
    }

    let subscriber = tracing_subscriber::registry()
        .with(build_env_filter())
        .with(tracing_subscriber::fmt::layer().with_target(true));
    tracing::subscriber::set_global_default(subscriber)?;

    INSTALLED
        .set(())
        .map_err(|_| TelemetryError::AlreadyInstalled)
}

fn build_env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

