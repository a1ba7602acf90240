//! 采集策略：定位资源点 -> 交互 -> 等待读条 -> 以任务栏进度或资源点消失确认

use async_trait::async_trait;
use tokio::time::Instant;

use crate::core::FailureReason;
use crate::strategy::navigator::{approach, Navigator, TargetSpec};
use crate::strategy::{ExecutionContext, ExecutionOutcome, ExecutionStrategy};
use crate::task::{AssetCategory, TaskDescriptor};

#[derive(Debug, Default, Clone, Copy)]
pub struct GatheringStrategy;

/// 一次采集后的观测结果
enum Harvest {
    /// 任务栏进度已满
    Complete,
    /// 推进了 n 个
    Advanced(u32),
    /// 没有任何可感知的变化
    NoChange,
}

impl GatheringStrategy {
    async fn observe(
        &self,
        ctx: &ExecutionContext,
        navigator: &Navigator<'_>,
        spec: &TargetSpec,
        needle: &str,
        before: Option<(u32, u32)>,
    ) -> Harvest {
        match (before, ctx.tracker_progress(needle).await) {
            (_, Some((done, total))) if done >= total => return Harvest::Complete,
            (Some((prev, _)), Some((done, _))) if done > prev => return Harvest::Advanced(done - prev),
            _ => {}
        }
        // 无进度文字时退回资源点是否消失
        if spec.is_template() && navigator.probe(spec).await.is_none() {
            Harvest::Advanced(1)
        } else {
            Harvest::NoChange
        }
    }
}

#[async_trait]
impl ExecutionStrategy for GatheringStrategy {
    fn name(&self) -> &str {
        "gathering"
    }

    async fn execute(&self, descriptor: &TaskDescriptor, ctx: &ExecutionContext) -> ExecutionOutcome {
        let name = descriptor.target_name();
        let (mut gathered, required) = ctx.progress_of(descriptor).await;
        let spec = TargetSpec::resolve(ctx, &[AssetCategory::Resource], name);
        let navigator = Navigator::new(ctx, "resource");
        let deadline = ctx.deadline(ctx.settings.gather_timeout_ms);
        tracing::info!(target_name = %name, gathered, required, "Gathering started");

        while gathered < required {
            if let Some(outcome) = ctx.vitals_failure().await {
                return outcome;
            }
            if ctx.is_cancelled() {
                return ExecutionOutcome::from_reason(FailureReason::InteractionRejected);
            }
            if Instant::now() >= deadline {
                tracing::warn!(gathered, required, "Gathering timed out");
                return ExecutionOutcome::from_reason(FailureReason::NavigationTimeout);
            }

            let located = match navigator.locate(&spec).await {
                Ok(located) => located,
                Err(reason) => return ExecutionOutcome::from_reason(reason),
            };
            approach(ctx, located).await;

            let before = ctx.tracker_progress(name).await;
            ctx.press(&ctx.keys.interact).await;
            ctx.sleep_ms(ctx.settings.gather_duration_ms).await;

            match self.observe(ctx, &navigator, &spec, name, before).await {
                Harvest::Complete => {
                    tracing::info!(target_name = %name, "Tracker shows gathering complete");
                    return ExecutionOutcome::succeeded();
                }
                Harvest::Advanced(n) => {
                    gathered += n;
                    tracing::info!(gathered, required, "Gathered");
                }
                Harvest::NoChange => {
                    tracing::warn!(target_name = %name, "Gather produced no visible change");
                    return ExecutionOutcome::from_reason(FailureReason::InteractionRejected);
                }
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
    use crate::perception::{Patch, Region, ScreenPoint, ScriptedGame};
    use crate::task::TaskKind;

    fn hit() -> Option<ScreenPoint> {
        Some(ScreenPoint::new(0.3, 0.6, 0.9))
    }

    fn context(game: Arc<ScriptedGame>) -> ExecutionContext {
        ExecutionContext::new(game.clone(), game, &AppConfig::default(), CancellationToken::new())
    }

    #[tokio::test(start_paused = true)]
    async fn test_node_vanishes_after_each_gather() {
        // 每次交互后资源点先消失一帧，再刷新出下一个
        let game = Arc::new(
            ScriptedGame::new()
                .template("ore_iron", vec![hit()])
                .on_key("f", Patch::new().template("ore_iron", vec![None, hit()]))
                .on_key("f", Patch::new().template("ore_iron", vec![None])),
        );
        let ctx = context(game.clone());
        let d = TaskDescriptor::new(TaskKind::Gathering, "铁矿", Some(2), "采集铁矿x2");
        let outcome = GatheringStrategy.execute(&d, &ctx).await;
        assert!(outcome.success);
        assert_eq!(game.key_presses("f"), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracker_progress_completes() {
        let game = Arc::new(
            ScriptedGame::new()
                .template_at("herb_basic", 0.4, 0.5)
                .text(Region::QuestTracker, vec!["师门任务\n采集草药 (0/1)"])
                .on_key(
                    "f",
                    Patch::new().text(Region::QuestTracker, vec!["师门任务\n采集草药 (1/1)"]),
                ),
        );
        let ctx = context(game.clone());
        let d = TaskDescriptor::new(TaskKind::Gathering, "草药", None, "采集草药");
        let outcome = GatheringStrategy.execute(&d, &ctx).await;
        assert!(outcome.success);
        assert_eq!(game.key_presses("f"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_change_is_rejected() {
        let game = Arc::new(ScriptedGame::new().template_at("ore_iron", 0.4, 0.5));
        let ctx = context(game);
        let d = TaskDescriptor::new(TaskKind::Gathering, "铁矿", Some(1), "采集铁矿");
        let outcome = GatheringStrategy.execute(&d, &ctx).await;
        assert_eq!(
            outcome,
            ExecutionOutcome::failure(FailureReason::InteractionRejected, true)
        );
    }
}
