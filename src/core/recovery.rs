//! 失败恢复引擎
//!
//! 根据 FailureReason 与实例的历史返回 RecoveryAction，供任务状态机决定是回到 Pending、放弃实例还是终止链。

use crate::core::{FailureReason, RecoveryAction};
use crate::strategy::ExecutionOutcome;
use crate::task::TaskInstance;

/// InteractionRejected 在单个实例上允许的重试次数
const INTERACTION_REJECTED_RETRIES: u32 = 1;

/// 语义化失败恢复：把一次失败结果映射为可执行动作
#[derive(Debug, Default, Clone, Copy)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    /// 默认策略
    pub fn new() -> Self {
        Self
    }

    /// 在 instance 已记录本次失败之后调用；次数预算耗尽一律 Abandon
    pub fn handle(&self, outcome: &ExecutionOutcome, instance: &TaskInstance) -> RecoveryAction {
        let Some(reason) = outcome.reason else {
            // 失败却没有原因：按策略的 should_retry 处理
            return self.budgeted(outcome.should_retry, instance);
        };

        match reason {
            FailureReason::CharacterDied => RecoveryAction::AbortChain,
            FailureReason::InteractionRejected => {
                let allowed = instance.rejections() <= INTERACTION_REJECTED_RETRIES;
                self.budgeted(allowed && outcome.should_retry, instance)
            }
            FailureReason::TargetNotFound | FailureReason::NavigationTimeout => {
                self.budgeted(outcome.should_retry, instance)
            }
        }
    }

    fn budgeted(&self, retry: bool, instance: &TaskInstance) -> RecoveryAction {
        if retry && instance.has_attempts_left() {
            RecoveryAction::Retry
        } else {
            RecoveryAction::Abandon
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskDescriptor, TaskKind};

    fn instance(max_attempts: u32) -> TaskInstance {
        TaskInstance::new(
            TaskDescriptor::new(TaskKind::Gathering, "铁矿", Some(1), "采集铁矿"),
            max_attempts,
            0,
        )
    }

    fn fail(instance: &mut TaskInstance, reason: FailureReason, retry: bool) -> RecoveryAction {
        let engine = RecoveryEngine::new();
        instance.begin_attempt().unwrap();
        let outcome = ExecutionOutcome::failure(reason, retry);
        instance.record_failure(&outcome).unwrap();
        engine.handle(&outcome, instance)
    }

    #[test]
    fn test_target_not_found_retries_while_budget_left() {
        let mut inst = instance(3);
        assert_eq!(fail(&mut inst, FailureReason::TargetNotFound, true), RecoveryAction::Retry);
    }

    #[test]
    fn test_budget_exhausted_abandons() {
        let mut inst = instance(1);
        assert_eq!(
            fail(&mut inst, FailureReason::NavigationTimeout, true),
            RecoveryAction::Abandon
        );
    }

    #[test]
    fn test_character_died_aborts_chain() {
        let mut inst = instance(3);
        assert_eq!(
            fail(&mut inst, FailureReason::CharacterDied, false),
            RecoveryAction::AbortChain
        );
    }

    #[test]
    fn test_interaction_rejected_retries_once() {
        let mut inst = instance(5);
        assert_eq!(
            fail(&mut inst, FailureReason::InteractionRejected, true),
            RecoveryAction::Retry
        );
        inst.requeue().unwrap();
        assert_eq!(
            fail(&mut inst, FailureReason::InteractionRejected, true),
            RecoveryAction::Abandon
        );
    }

    #[test]
    fn test_strategy_veto_is_honoured() {
        let mut inst = instance(3);
        assert_eq!(
            fail(&mut inst, FailureReason::TargetNotFound, false),
            RecoveryAction::Abandon
        );
    }
}
