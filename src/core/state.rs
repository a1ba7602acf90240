//! 状态投影：StatusReport
//!
//! 上层 UI / CLI 只持有轻量的 StatusReport（链状态、轮数、最近一次结果）；
//! 完整状态由 QuestManager 维护，Runner 每个 tick 投影一次并通过 watch 通道发布。

use serde::Serialize;

use crate::core::StopReason;
use crate::quest::{ChainStatus, QuestChain, RunStatistics};
use crate::strategy::ExecutionOutcome;

/// 对外展示的状态
#[derive(Clone, Debug, Default, Serialize)]
pub struct StatusReport {
    pub chain_id: Option<String>,
    pub chain_status: Option<ChainStatus>,
    pub round_count: u32,
    /// 当前 / 最近处理的任务原文
    pub current_task: Option<String>,
    pub last_outcome: Option<ExecutionOutcome>,
    pub stop_reason: Option<StopReason>,
    pub statistics: RunStatistics,
}

impl StatusReport {
    /// 将链状态与运行期信息合并为可展示的报告
    pub fn project(
        chain: &QuestChain,
        statistics: &RunStatistics,
        current_task: Option<String>,
        last_outcome: Option<ExecutionOutcome>,
    ) -> Self {
        Self {
            chain_id: Some(chain.id().to_string()),
            chain_status: Some(chain.status()),
            round_count: chain.round_count(),
            current_task,
            last_outcome,
            stop_reason: chain.stop_reason().cloned(),
            statistics: statistics.clone(),
        }
    }

    /// 链已进入终态
    pub fn is_finished(&self) -> bool {
        self.chain_status.is_some_and(ChainStatus::is_terminal)
    }
}
