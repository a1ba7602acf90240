//! 任务链：一个逻辑任务（如一轮师门）的有序任务实例序列

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::core::StopReason;
use crate::task::{TaskDescriptor, TaskInstance, TaskStatus};

/// 任务链状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainStatus {
    Active,
    /// 任务栏已无本链条目，等待日程面板核验
    CompletedLocally,
    VerifiedComplete,
    Aborted,
}

impl ChainStatus {
    /// VerifiedComplete / Aborted 为终态
    pub fn is_terminal(self) -> bool {
        matches!(self, ChainStatus::VerifiedComplete | ChainStatus::Aborted)
    }
}

/// 任务链；状态只由 QuestManager 修改
#[derive(Debug, Clone, Serialize)]
pub struct QuestChain {
    id: String,
    name: String,
    tasks: Vec<TaskInstance>,
    round_count: u32,
    max_rounds: u32,
    status: ChainStatus,
    stop_reason: Option<StopReason>,
    started_at: DateTime<Utc>,
}

impl QuestChain {
    /// 新链为 Active，max_rounds 至少为 1
    pub fn new(name: impl Into<String>, max_rounds: u32) -> Self {
        Self {
            id: format!("chain_{}", uuid::Uuid::new_v4()),
            name: name.into(),
            tasks: Vec::new(),
            round_count: 0,
            max_rounds: max_rounds.max(1),
            status: ChainStatus::Active,
            stop_reason: None,
            started_at: Utc::now(),
        }
    }

    /// 链 ID（chain_ 前缀）
    pub fn id(&self) -> &str {
        &self.id
    }

    /// 链名，即日程面板中的条目名
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 按入队顺序的全部实例
    pub fn tasks(&self) -> &[TaskInstance] {
        &self.tasks
    }

    /// 按 ID 查找实例
    pub fn task(&self, task_id: &str) -> Option<&TaskInstance> {
        self.tasks.iter().find(|t| t.id() == task_id)
    }

    /// 已重新进入的轮数
    pub fn round_count(&self) -> u32 {
        self.round_count
    }

    /// 循环模式的轮数上限，0 表示不限
    pub fn max_rounds(&self) -> u32 {
        self.max_rounds
    }

    /// 当前状态
    pub fn status(&self) -> ChainStatus {
        self.status
    }

    /// 终止原因（仅终态时存在）
    pub fn stop_reason(&self) -> Option<&StopReason> {
        self.stop_reason.as_ref()
    }

    /// 创建时间
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// 未到终态的同一任务实例
    pub fn open_task_for(&self, descriptor: &TaskDescriptor) -> Option<&TaskInstance> {
        self.tasks
            .iter()
            .find(|t| !t.status().is_terminal() && t.descriptor().same_task(descriptor))
    }

    /// 某一状态的实例个数
    pub fn count_with(&self, status: TaskStatus) -> usize {
        self.tasks.iter().filter(|t| t.status() == status).count()
    }

    /// 同一任务最近入队的实例
    pub fn latest_task_for(&self, descriptor: &TaskDescriptor) -> Option<&TaskInstance> {
        self.tasks
            .iter()
            .rev()
            .find(|t| t.descriptor().same_task(descriptor))
    }

    pub(crate) fn task_mut(&mut self, task_id: &str) -> Option<&mut TaskInstance> {
        self.tasks.iter_mut().find(|t| t.id() == task_id)
    }

    pub(crate) fn tasks_mut(&mut self) -> &mut [TaskInstance] {
        &mut self.tasks
    }

    pub(crate) fn push(&mut self, instance: TaskInstance) {
        self.tasks.push(instance);
    }

    pub(crate) fn set_status(&mut self, status: ChainStatus) {
        self.status = status;
    }

    /// 回到 Active（复核后重新进入或循环模式）
    pub(crate) fn resume(&mut self) {
        self.status = ChainStatus::Active;
        self.stop_reason = None;
    }

    pub(crate) fn stop(&mut self, status: ChainStatus, reason: StopReason) {
        self.status = status;
        self.stop_reason = Some(reason);
    }

    /// 轮数 +1；返回是否仍在上限内
    pub(crate) fn next_round(&mut self) -> bool {
        self.round_count = (self.round_count + 1).min(self.max_rounds);
        self.round_count < self.max_rounds
    }
}
