//! 护送策略：与护送对象对话后跟随，途中遇敌则战斗，任务栏中护送行消失即完成

use async_trait::async_trait;
use tokio::time::Instant;

use crate::core::FailureReason;
use crate::perception::Region;
use crate::strategy::delivery::wait_dialog;
use crate::strategy::navigator::{approach, Navigator, TargetSpec};
use crate::strategy::{ExecutionContext, ExecutionOutcome, ExecutionStrategy};
use crate::task::{AssetCategory, TaskDescriptor};

#[derive(Debug, Default, Clone, Copy)]
pub struct EscortStrategy;

#[async_trait]
impl ExecutionStrategy for EscortStrategy {
    fn name(&self) -> &str {
        "escort"
    }

    async fn execute(&self, descriptor: &TaskDescriptor, ctx: &ExecutionContext) -> ExecutionOutcome {
        let escortee = descriptor.target_name();
        let spec = TargetSpec::resolve(ctx, &[AssetCategory::Npc], escortee);

        let located = match Navigator::new(ctx, "npc").locate(&spec).await {
            Ok(located) => located,
            Err(reason) => return ExecutionOutcome::from_reason(reason),
        };
        approach(ctx, located).await;
        ctx.press(&ctx.keys.interact).await;
        ctx.poll_pause().await;
        if wait_dialog(ctx, true).await {
            ctx.confirm_dialog().await;
        }
        tracing::info!(escortee = %escortee, "Escort started");

        let deadline = ctx.deadline(ctx.settings.escort_timeout_ms);
        loop {
            if let Some(outcome) = ctx.vitals_failure().await {
                return outcome;
            }
            if ctx.in_combat().await {
                ctx.cast_rotation().await;
            }

            let tracker = ctx.perception.read_text(Region::QuestTracker).await;
            if !tracker.contains(escortee) {
                tracing::info!(escortee = %escortee, "Escort finished");
                return ExecutionOutcome::succeeded();
            }
            if Instant::now() >= deadline || ctx.is_cancelled() {
                tracing::warn!(escortee = %escortee, "Escort timed out");
                return ExecutionOutcome::from_reason(FailureReason::NavigationTimeout);
            }
            ctx.poll_pause().await;
        }
    }
}
