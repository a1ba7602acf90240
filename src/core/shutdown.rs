//! 停止信号
//!
//! 全局 CancellationToken 即「停止」信号：Runner 在每个 tick 开头检查，
//! 策略在动作之间检查；正在执行的执行器调用不会被打断。

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// 持有停止 token，并把系统信号转成一次取消
#[derive(Clone, Default)]
pub struct ShutdownManager {
    shutdown_token: CancellationToken,
}

/// 外部停止来源，只用于日志
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// Ctrl+C 或上层 UI 的停止按钮
    UserInitiated,
    /// SIGTERM
    Signal,
}

impl ShutdownManager {
    /// 创建尚未取消的管理器
    pub fn new() -> Self {
        Self::default()
    }

    /// 交给 Runner / ExecutionContext 的 token
    pub fn token(&self) -> CancellationToken {
        self.shutdown_token.clone()
    }

    /// 取消 token；重复调用无副作用
    pub fn shutdown(&self, reason: ShutdownReason) {
        if self.shutdown_token.is_cancelled() {
            return;
        }
        tracing::info!(reason = ?reason, "Stop requested, finishing the current action");
        self.shutdown_token.cancel();
    }

    /// 安装系统信号处理器 (Ctrl+C, SIGTERM)
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            if let Ok(()) = tokio::signal::ctrl_c().await {
                manager.shutdown(ShutdownReason::UserInitiated);
            }
        });

        #[cfg(unix)]
        {
            let manager = Arc::clone(self);
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                    sigterm.recv().await;
                    manager.shutdown(ShutdownReason::Signal);
                }
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_follows_shutdown() {
        let manager = ShutdownManager::new();
        let token = manager.token();
        assert!(!token.is_cancelled());
        manager.shutdown(ShutdownReason::UserInitiated);
        assert!(token.is_cancelled());
        // 第二次调用不改变状态
        manager.shutdown(ShutdownReason::Signal);
        assert!(manager.token().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cloned_manager_shares_token() {
        let manager = ShutdownManager::new();
        let waiter = manager.token();
        let handle = tokio::spawn(async move { waiter.cancelled().await });
        manager.clone().shutdown(ShutdownReason::Signal);
        handle.await.unwrap();
    }
}
