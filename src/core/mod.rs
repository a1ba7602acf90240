//! 核心层：错误与停止原因、失败恢复、状态投影、停止信号

pub mod error;
pub mod recovery;
pub mod shutdown;
pub mod state;

pub use error::{FailureReason, QuestError, RecoveryAction, StopReason};
pub use recovery::RecoveryEngine;
pub use shutdown::{ShutdownManager, ShutdownReason};
pub use state::StatusReport;
