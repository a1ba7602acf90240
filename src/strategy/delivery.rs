//! 递交 / 拜访策略：找到 NPC，对话，点击提交，确认对话框关闭

use async_trait::async_trait;
use tokio::time::Instant;

use crate::core::FailureReason;
use crate::perception::{templates, Region};
use crate::strategy::navigator::{approach, Navigator, TargetSpec};
use crate::strategy::{ExecutionContext, ExecutionOutcome, ExecutionStrategy};
use crate::task::{AssetCategory, TaskDescriptor};

#[derive(Debug, Default, Clone, Copy)]
pub struct DeliveryStrategy;

async fn dialog_open(ctx: &ExecutionContext) -> bool {
    ctx.perception
        .find_template(templates::DIALOG_PANEL, Some(Region::Dialog))
        .await
        .is_some()
}

/// 轮询直到对话框状态为 open，超时返回 false
pub(crate) async fn wait_dialog(ctx: &ExecutionContext, open: bool) -> bool {
    let deadline = ctx.deadline(ctx.settings.locate_timeout_ms);
    loop {
        if dialog_open(ctx).await == open {
            return true;
        }
        if Instant::now() >= deadline || ctx.is_cancelled() {
            return false;
        }
        ctx.poll_pause().await;
    }
}

#[async_trait]
impl ExecutionStrategy for DeliveryStrategy {
    fn name(&self) -> &str {
        "delivery"
    }

    async fn execute(&self, descriptor: &TaskDescriptor, ctx: &ExecutionContext) -> ExecutionOutcome {
        let npc = descriptor.target_name();
        let spec = TargetSpec::resolve(ctx, &[AssetCategory::Npc], npc);
        tracing::info!(npc = %npc, "Delivery started");

        let located = match Navigator::new(ctx, "npc").locate(&spec).await {
            Ok(located) => located,
            Err(reason) => return ExecutionOutcome::from_reason(reason),
        };
        approach(ctx, located).await;
        ctx.press(&ctx.keys.interact).await;

        if !wait_dialog(ctx, true).await {
            tracing::warn!(npc = %npc, "Dialog did not open");
            return ExecutionOutcome::from_reason(FailureReason::InteractionRejected);
        }

        ctx.confirm_dialog().await;

        if !wait_dialog(ctx, false).await {
            tracing::warn!(npc = %npc, "Dialog still open after submit");
            ctx.press(&ctx.keys.close).await;
            return ExecutionOutcome::from_reason(FailureReason::InteractionRejected);
        }

        tracing::info!(npc = %npc, "Delivered");
        ExecutionOutcome::succeeded()
    }
}
