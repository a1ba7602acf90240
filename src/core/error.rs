//! 错误类型、失败原因与停止原因
//!
//! 与 RecoveryEngine 配合：策略失败被吸收进 ExecutionOutcome（FailureReason），
//! 由状态机决定重试或放弃；链级失败（死亡、安全上限）以 StopReason 终止任务链。
//! QuestError 只在构造与 API 误用时返回，运行期循环不会向外抛错。

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 执行策略的失败分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// 目标（模板 / 文字）未出现，可重试
    TargetNotFound,
    /// 小地图导航超出策略内上限，可重试
    NavigationTimeout,
    /// 角色死亡，不可重试，整条任务链终止
    CharacterDied,
    /// 界面未按预期响应，每个实例只重试一次
    InteractionRejected,
}

impl FailureReason {
    /// 该失败本身是否允许再次尝试（不考虑次数预算）
    pub fn is_retryable(self) -> bool {
        !matches!(self, FailureReason::CharacterDied)
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureReason::TargetNotFound => "target_not_found",
            FailureReason::NavigationTimeout => "navigation_timeout",
            FailureReason::CharacterDied => "character_died",
            FailureReason::InteractionRejected => "interaction_rejected",
        };
        f.write_str(s)
    }
}

/// 任务链被终止的原因
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum StopReason {
    /// 日程面板确认已完成
    VerifiedComplete,
    /// 检测到角色死亡
    CharacterDied,
    /// maxAttempts / maxRounds / 连续空转上限被触发
    SafetyBoundExceeded { what: String },
    /// 用户中止（Ctrl+C、上层 UI）
    UserAbort,
}

/// 编排核心的构造期 / 调用期错误
#[derive(Error, Debug)]
pub enum QuestError {
    #[error("Invalid task pattern '{name}': {source}")]
    InvalidPattern {
        name: String,
        #[source]
        source: regex::Error,
    },

    #[error("Unknown strategy binding: {0}")]
    UnknownStrategy(String),

    #[error("Quest chain not found: {0}")]
    ChainNotFound(String),

    #[error("Task instance not found: {0}")]
    TaskNotFound(String),

    #[error("Quest chain {chain} is not active ({status:?})")]
    ChainNotActive {
        chain: String,
        status: crate::quest::ChainStatus,
    },

    #[error("Invalid transition for task {task}: {from:?} -> {to}")]
    InvalidTransition {
        task: String,
        from: crate::task::TaskStatus,
        to: &'static str,
    },

    #[error("Config error: {0}")]
    Config(String),

    #[error("Replay script error: {0}")]
    ReplayScript(String),
}

impl From<config::ConfigError> for QuestError {
    fn from(err: config::ConfigError) -> Self {
        QuestError::Config(err.to_string())
    }
}

/// 恢复引擎根据失败给出的建议动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 回到 Pending，等待管理器再次选中
    Retry,
    /// 放弃该实例（终态）
    Abandon,
    /// 终止整条任务链
    AbortChain,
}
