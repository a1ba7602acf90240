//! 战斗策略：寻敌 -> 锁定 -> 技能循环 -> 敌方血条消失计一次击杀

use async_trait::async_trait;
use tokio::time::Instant;

use crate::core::FailureReason;
use crate::strategy::navigator::{engage, Navigator, TargetSpec};
use crate::strategy::{ExecutionContext, ExecutionOutcome, ExecutionStrategy};
use crate::task::{AssetCategory, TaskDescriptor};

/// 战斗策略
#[derive(Debug, Default, Clone, Copy)]
pub struct CombatStrategy;

enum Engagement {
    Killed,
    Failed(ExecutionOutcome),
}

impl CombatStrategy {
    /// 已锁定目标后等待进入战斗，再循环技能直到敌方血条消失
    async fn fight(&self, ctx: &ExecutionContext, deadline: Instant) -> Engagement {
        let engage_deadline = ctx.deadline(ctx.settings.locate_timeout_ms);
        while !ctx.in_combat().await {
            if Instant::now() >= engage_deadline {
                tracing::warn!("Target locked but combat never started");
                return Engagement::Failed(ExecutionOutcome::from_reason(
                    FailureReason::InteractionRejected,
                ));
            }
            ctx.poll_pause().await;
        }

        loop {
            if let Some(outcome) = ctx.vitals_failure().await {
                return Engagement::Failed(outcome);
            }
            if !ctx.in_combat().await {
                // 血条可能在技能间隙闪烁，间隔一次轮询再确认
                ctx.poll_pause().await;
                if !ctx.in_combat().await {
                    return Engagement::Killed;
                }
            }
            if Instant::now() >= deadline {
                return Engagement::Failed(ExecutionOutcome::from_reason(
                    FailureReason::NavigationTimeout,
                ));
            }
            ctx.cast_rotation().await;
            ctx.poll_pause().await;
        }
    }
}

#[async_trait]
impl ExecutionStrategy for CombatStrategy {
    fn name(&self) -> &str {
        "combat"
    }

    async fn execute(&self, descriptor: &TaskDescriptor, ctx: &ExecutionContext) -> ExecutionOutcome {
        // 重试时从任务栏已记录的击杀数继续
        let (mut killed, required) = ctx.progress_of(descriptor).await;
        let spec = TargetSpec::resolve(ctx, &[AssetCategory::Enemy], descriptor.target_name());
        let navigator = Navigator::new(ctx, "enemy");
        let deadline = ctx.deadline(ctx.settings.combat_timeout_ms);
        tracing::info!(target_name = %descriptor.target_name(), killed, required, "Combat started");

        while killed < required {
            if ctx.is_cancelled() {
                return ExecutionOutcome::from_reason(FailureReason::InteractionRejected);
            }
            if Instant::now() >= deadline {
                tracing::warn!(killed, required, "Combat timed out");
                return ExecutionOutcome::from_reason(FailureReason::NavigationTimeout);
            }

            let located = match navigator.locate(&spec).await {
                Ok(located) => located,
                Err(reason) => return ExecutionOutcome::from_reason(reason),
            };
            engage(ctx, located).await;

            match self.fight(ctx, deadline).await {
                Engagement::Killed => {
                    killed += 1;
                    tracing::info!(killed, required, "Enemy defeated");
                }
                Engagement::Failed(outcome) => return outcome,
            }
        }

        ExecutionOutcome::succeeded()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::config::AppConfig;
    use crate::perception::{Region, ScreenPoint, ScriptedGame};
    use crate::task::TaskKind;

    fn hit() -> Option<ScreenPoint> {
        Some(ScreenPoint::new(0.5, 0.4, 0.9))
    }

    fn context(game: Arc<ScriptedGame>) -> ExecutionContext {
        ExecutionContext::new(game.clone(), game, &AppConfig::default(), CancellationToken::new())
    }

    #[tokio::test(start_paused = true)]
    async fn test_kills_until_health_bar_gone() {
        // 进入战斗后血条持续若干帧，然后消失
        let game = Arc::new(
            ScriptedGame::new()
                .template_at("enemy_boar", 0.5, 0.4)
                .template("combat_hp_bar", vec![hit(), hit(), hit(), hit(), None]),
        );
        let ctx = context(game.clone());
        let d = TaskDescriptor::new(TaskKind::Combat, "野猪", Some(1), "消灭野猪");
        let outcome = CombatStrategy.execute(&d, &ctx).await;
        assert!(outcome.success);
        assert!(game.key_presses("1") >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_resumes_from_tracker_kill_count() {
        // 任务栏显示 3/4，只需再击杀一只
        let game = Arc::new(
            ScriptedGame::new()
                .text(Region::QuestTracker, vec!["师门任务\n击杀野狼 (3/4)"])
                .template_at("enemy_wolf", 0.5, 0.4)
                .template("combat_hp_bar", vec![hit(), hit(), None]),
        );
        let ctx = context(game.clone());
        let d = TaskDescriptor::new(TaskKind::Combat, "野狼", Some(4), "击杀野狼 (3/4)");
        let outcome = CombatStrategy.execute(&d, &ctx).await;
        assert!(outcome.success);
        assert_eq!(game.lookups("enemy_wolf"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_low_resource_drinks_mp_potion() {
        let game = Arc::new(
            ScriptedGame::new()
                .template_at("enemy_boar", 0.5, 0.4)
                .template("combat_hp_bar", vec![hit(), hit(), hit(), hit(), None])
                .text(Region::ResourceBar, vec!["30/400", "380/400"]),
        );
        let ctx = context(game.clone());
        let d = TaskDescriptor::new(TaskKind::Combat, "野猪", Some(1), "消灭野猪");
        let outcome = CombatStrategy.execute(&d, &ctx).await;
        assert!(outcome.success);
        assert_eq!(game.key_presses("9"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_enemy_missing_is_target_not_found() {
        let game = Arc::new(ScriptedGame::new());
        let ctx = context(game);
        let d = TaskDescriptor::new(TaskKind::Combat, "野猪", Some(3), "消灭野猪x3");
        let outcome = CombatStrategy.execute(&d, &ctx).await;
        assert_eq!(outcome, ExecutionOutcome::failure(FailureReason::TargetNotFound, true));
    }

    #[tokio::test(start_paused = true)]
    async fn test_death_mid_fight() {
        let game = Arc::new(
            ScriptedGame::new()
                .template_at("enemy_boar", 0.5, 0.4)
                .template_at("combat_hp_bar", 0.5, 0.1)
                .template("dead_indicator", vec![None, None, hit()]),
        );
        let ctx = context(game);
        let d = TaskDescriptor::new(TaskKind::Combat, "野猪", Some(1), "消灭野猪");
        let outcome = CombatStrategy.execute(&d, &ctx).await;
        assert_eq!(outcome.reason, Some(FailureReason::CharacterDied));
        assert!(!outcome.should_retry);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_engaged_is_rejected() {
        let game = Arc::new(ScriptedGame::new().template_at("enemy_boar", 0.5, 0.4));
        let ctx = context(game);
        let d = TaskDescriptor::new(TaskKind::Combat, "野猪", Some(1), "消灭野猪");
        let outcome = CombatStrategy.execute(&d, &ctx).await;
        assert_eq!(outcome.reason, Some(FailureReason::InteractionRejected));
    }
}
