//! 通用交互策略：自定义任务类型的默认绑定
//!
//! 跟随任务标记走到目标旁，交互并确认对话框；任务栏中原文消失才算完成。

use async_trait::async_trait;
use tokio::time::Instant;

use crate::core::FailureReason;
use crate::perception::{templates, Region};
use crate::strategy::navigator::{approach, Navigator, TargetSpec};
use crate::strategy::{ExecutionContext, ExecutionOutcome, ExecutionStrategy};
use crate::task::{AssetCategory, TaskDescriptor};

#[derive(Debug, Default, Clone, Copy)]
pub struct InteractStrategy;

#[async_trait]
impl ExecutionStrategy for InteractStrategy {
    fn name(&self) -> &str {
        "interact"
    }

    async fn execute(&self, descriptor: &TaskDescriptor, ctx: &ExecutionContext) -> ExecutionOutcome {
        let spec = TargetSpec::resolve(
            ctx,
            &[AssetCategory::Npc, AssetCategory::Resource, AssetCategory::Enemy],
            descriptor.target_name(),
        );

        let located = match Navigator::new(ctx, "quest").locate(&spec).await {
            Ok(located) => located,
            Err(reason) => return ExecutionOutcome::from_reason(reason),
        };
        approach(ctx, located).await;
        ctx.press(&ctx.keys.interact).await;
        ctx.poll_pause().await;

        if ctx
            .perception
            .find_template(templates::DIALOG_PANEL, Some(Region::Dialog))
            .await
            .is_some()
        {
            ctx.confirm_dialog().await;
        }

        let raw = descriptor.raw_text();
        let deadline = ctx.deadline(ctx.settings.locate_timeout_ms);
        loop {
            let tracker = ctx.perception.read_text(Region::QuestTracker).await;
            if !tracker.contains(raw) {
                return ExecutionOutcome::succeeded();
            }
            if Instant::now() >= deadline || ctx.is_cancelled() {
                tracing::warn!(raw = %raw, "Task text still on tracker after interaction");
                return ExecutionOutcome::from_reason(FailureReason::InteractionRejected);
            }
            ctx.poll_pause().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::config::AppConfig;
    use crate::perception::{Patch, ScriptedGame};
    use crate::task::TaskKind;

    fn context(game: Arc<ScriptedGame>) -> ExecutionContext {
        ExecutionContext::new(game.clone(), game, &AppConfig::default(), CancellationToken::new())
    }

    #[tokio::test(start_paused = true)]
    async fn test_interaction_clears_tracker_line() {
        let game = Arc::new(
            ScriptedGame::new()
                .text(Region::Screen, vec!["考官"])
                .text(Region::QuestTracker, vec!["师门任务\n答题考官"])
                .on_key("f", Patch::new().text(Region::QuestTracker, vec!["师门任务"])),
        );
        let ctx = context(game.clone());
        let d = TaskDescriptor::new(TaskKind::Custom, "考官", None, "答题考官");
        let outcome = InteractStrategy.execute(&d, &ctx).await;
        assert!(outcome.success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_tracker_unchanged_is_rejected() {
        let game = Arc::new(
            ScriptedGame::new()
                .text(Region::Screen, vec!["考官"])
                .text(Region::QuestTracker, vec!["答题考官"]),
        );
        let ctx = context(game);
        let d = TaskDescriptor::new(TaskKind::Custom, "考官", None, "答题考官");
        let outcome = InteractStrategy.execute(&d, &ctx).await;
        assert_eq!(outcome.reason, Some(FailureReason::InteractionRejected));
    }
}
