//! 单个任务实例及其状态机
//!
//! Pending -> InProgress -> {Succeeded, Failed}；Failed -> Pending（仍有次数）或 Abandoned（终态）。
//! 状态机只负责单个实例的重试，不决定链上下一步做什么（那是 QuestManager 的职责）。

use serde::Serialize;

use crate::core::{FailureReason, QuestError, RecoveryAction, RecoveryEngine};
use crate::strategy::ExecutionOutcome;
use crate::task::TaskDescriptor;

/// 任务实例 ID
pub type TaskId = String;

/// 任务实例状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Succeeded,
    Failed,
    Abandoned,
}

impl TaskStatus {
    /// Succeeded / Abandoned 不再迁移
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Abandoned)
    }
}

/// 任务实例：只由状态机修改，且只经由 QuestManager 调用
#[derive(Debug, Clone, Serialize)]
pub struct TaskInstance {
    id: TaskId,
    descriptor: TaskDescriptor,
    status: TaskStatus,
    attempt_count: u32,
    max_attempts: u32,
    /// 数值越大越优先
    priority: i32,
    /// InteractionRejected 出现次数
    rejections: u32,
    last_reason: Option<FailureReason>,
}

impl TaskInstance {
    /// 新实例从 Pending 开始，max_attempts 至少为 1
    pub fn new(descriptor: TaskDescriptor, max_attempts: u32, priority: i32) -> Self {
        Self {
            id: format!("task_{}", uuid::Uuid::new_v4()),
            descriptor,
            status: TaskStatus::Pending,
            attempt_count: 0,
            max_attempts: max_attempts.max(1),
            priority,
            rejections: 0,
            last_reason: None,
        }
    }

    /// 实例 ID（task_ 前缀）
    pub fn id(&self) -> &str {
        &self.id
    }

    /// 对应的任务描述符
    pub fn descriptor(&self) -> &TaskDescriptor {
        &self.descriptor
    }

    /// 当前状态
    pub fn status(&self) -> TaskStatus {
        self.status
    }

    /// 已消耗的尝试次数
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// 单个任务的尝试上限
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// 入队时确定的优先级，越大越先执行
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// InteractionRejected 次数
    pub fn rejections(&self) -> u32 {
        self.rejections
    }

    /// 最近一次失败原因
    pub fn last_reason(&self) -> Option<FailureReason> {
        self.last_reason
    }

    /// 尝试次数是否还有余量
    pub fn has_attempts_left(&self) -> bool {
        self.attempt_count < self.max_attempts
    }

    /// Pending -> InProgress，消耗一次尝试
    pub fn begin_attempt(&mut self) -> Result<(), QuestError> {
        if self.status != TaskStatus::Pending || !self.has_attempts_left() {
            return Err(self.invalid("in_progress"));
        }
        self.attempt_count += 1;
        self.status = TaskStatus::InProgress;
        Ok(())
    }

    /// InProgress -> Succeeded
    pub fn record_success(&mut self) -> Result<(), QuestError> {
        if self.status != TaskStatus::InProgress {
            return Err(self.invalid("succeeded"));
        }
        self.status = TaskStatus::Succeeded;
        self.last_reason = None;
        Ok(())
    }

    /// InProgress -> Failed
    pub fn record_failure(&mut self, outcome: &ExecutionOutcome) -> Result<(), QuestError> {
        if self.status != TaskStatus::InProgress {
            return Err(self.invalid("failed"));
        }
        if outcome.reason == Some(FailureReason::InteractionRejected) {
            self.rejections += 1;
        }
        self.last_reason = outcome.reason;
        self.status = TaskStatus::Failed;
        Ok(())
    }

    /// Failed -> Pending
    pub fn requeue(&mut self) -> Result<(), QuestError> {
        if self.status != TaskStatus::Failed || !self.has_attempts_left() {
            return Err(self.invalid("pending"));
        }
        self.status = TaskStatus::Pending;
        Ok(())
    }

    /// Failed / Pending -> Abandoned
    pub fn abandon(&mut self) -> Result<(), QuestError> {
        if !matches!(self.status, TaskStatus::Failed | TaskStatus::Pending) {
            return Err(self.invalid("abandoned"));
        }
        self.status = TaskStatus::Abandoned;
        Ok(())
    }

    /// 应用一次策略结果，返回恢复动作。实例已处于终态或回到 Pending。
    ///
    /// AbortChain 时实例同样被放弃，链级处理交给调用方。
    pub fn apply_outcome(
        &mut self,
        outcome: &ExecutionOutcome,
        recovery: &RecoveryEngine,
    ) -> Result<Option<RecoveryAction>, QuestError> {
        if outcome.success {
            self.record_success()?;
            return Ok(None);
        }

        self.record_failure(outcome)?;
        let action = recovery.handle(outcome, self);
        match action {
            RecoveryAction::Retry => self.requeue()?,
            RecoveryAction::Abandon | RecoveryAction::AbortChain => self.abandon()?,
        }
        Ok(Some(action))
    }

    /// 重置为新一轮（Looping 模式重新进入已完成的链）
    pub(crate) fn reset(&mut self) {
        self.status = TaskStatus::Pending;
        self.attempt_count = 0;
        self.rejections = 0;
        self.last_reason = None;
    }

    fn invalid(&self, to: &'static str) -> QuestError {
        QuestError::InvalidTransition {
            task: self.id.clone(),
            from: self.status,
            to,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskKind;

    fn gathering(max_attempts: u32) -> TaskInstance {
        TaskInstance::new(
            TaskDescriptor::new(TaskKind::Gathering, "草药", Some(2), "采集草药x2"),
            max_attempts,
            0,
        )
    }

    #[test]
    fn test_success_is_terminal() {
        let mut inst = gathering(3);
        inst.begin_attempt().unwrap();
        inst.apply_outcome(&ExecutionOutcome::succeeded(), &RecoveryEngine::new())
            .unwrap();
        assert_eq!(inst.status(), TaskStatus::Succeeded);
        assert!(inst.begin_attempt().is_err());
    }

    #[test]
    fn test_retry_cycle_ends_abandoned_at_max_attempts() {
        let recovery = RecoveryEngine::new();
        let mut inst = gathering(3);
        let miss = ExecutionOutcome::failure(FailureReason::TargetNotFound, true);

        for expected in 1..=3 {
            inst.begin_attempt().unwrap();
            assert_eq!(inst.status(), TaskStatus::InProgress);
            assert_eq!(inst.attempt_count(), expected);
            inst.apply_outcome(&miss, &recovery).unwrap();
        }

        assert_eq!(inst.status(), TaskStatus::Abandoned);
        assert_eq!(inst.attempt_count(), inst.max_attempts());
        assert!(inst.begin_attempt().is_err());
    }

    #[test]
    fn test_cannot_begin_twice() {
        let mut inst = gathering(3);
        inst.begin_attempt().unwrap();
        let err = inst.begin_attempt().unwrap_err();
        assert!(matches!(err, QuestError::InvalidTransition { .. }));
    }

    #[test]
    fn test_death_abandons_immediately() {
        let mut inst = gathering(3);
        inst.begin_attempt().unwrap();
        let action = inst
            .apply_outcome(
                &ExecutionOutcome::failure(FailureReason::CharacterDied, false),
                &RecoveryEngine::new(),
            )
            .unwrap();
        assert_eq!(action, Some(RecoveryAction::AbortChain));
        assert_eq!(inst.status(), TaskStatus::Abandoned);
        assert_eq!(inst.attempt_count(), 1);
    }
}
