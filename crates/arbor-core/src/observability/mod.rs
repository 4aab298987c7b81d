//! 可观测性：请求级诊断时间线与日志订阅器安装。
//!
//! 库代码只通过 `tracing` 发出事件；订阅器由可执行程序在启动时安装一次。

mod progress;

pub use progress::{ProgressEntry, ProgressTracker, RequestProgressTracker};

#[cfg(feature = "fmt-subscriber")]
pub use subscriber::{InstallError, install_fmt_subscriber};

#[cfg(feature = "fmt-subscriber")]
mod subscriber {
    use thiserror::Error;
    use tracing::dispatcher;
    use tracing_subscriber::{EnvFilter, layer::SubscriberExt};

    use crate::error::{CoreError, codes};

    /// 订阅器安装失败。
    #[derive(Debug, Error)]
    pub enum InstallError {
        /// 进程内已存在全局订阅器。
        #[error("全局 tracing Subscriber 已存在，无法覆盖")]
        SubscriberAlreadySet,
        /// 设置全局订阅器失败。
        #[error("设置 tracing 全局 Subscriber 失败: {0}")]
        SetGlobalSubscriber(#[from] dispatcher::SetGlobalDefaultError),
    }

    impl From<InstallError> for CoreError {
        fn from(err: InstallError) -> Self {
            CoreError::new(codes::OBSERVABILITY_INSTALL, err.to_string()).with_cause(err)
        }
    }

    /// 安装 fmt 输出层，过滤规则取自 `RUST_LOG`，缺省为 `default_directive`。
    pub fn install_fmt_subscriber(default_directive: &str) -> Result<(), InstallError> {
        if dispatcher::has_been_set() {
            return Err(InstallError::SubscriberAlreadySet);
        }
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive));
        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer());
        tracing::subscriber::set_global_default(subscriber)?;
        Ok(())
    }
}
