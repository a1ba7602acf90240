//! 执行策略：按任务类型完成一个具体任务
//!
//! 所有策略实现 ExecutionStrategy（name / execute），由 StrategyRegistry 按绑定名注册与查找；
//! registry.execute 统一计时并输出结构化审计日志（JSON）。策略只读描述符、产出结果，从不修改调度器状态。

pub mod combat;
pub mod delivery;
pub mod escort;
pub mod gathering;
pub mod interact;
pub mod navigator;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, KeysSection, StrategySection};
use crate::core::{FailureReason, QuestError};
use crate::perception::{parse_bar_percent, templates, Actuator, MoveVector, Perception, Region};
use crate::task::{parse_progress, AssetTable, TaskDescriptor};

pub use combat::CombatStrategy;
pub use delivery::DeliveryStrategy;
pub use escort::EscortStrategy;
pub use gathering::GatheringStrategy;
pub use interact::InteractStrategy;
pub use navigator::{approach, engage, Located, Navigator, TargetSpec};

/// 撤退时后退的时长
const FLEE_DURATION_MS: u64 = 3_000;
/// 喝药后等待生效
const POTION_DELAY_MS: u64 = 1_000;
/// 技能后摇
const SKILL_DELAY_MS: u64 = 300;

/// 单次执行结果，每次尝试新建，不持久化
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    pub reason: Option<FailureReason>,
    pub should_retry: bool,
}

impl ExecutionOutcome {
    /// 成功
    pub fn succeeded() -> Self {
        Self {
            success: true,
            reason: None,
            should_retry: false,
        }
    }

    /// 失败，是否重试由调用方指定
    pub fn failure(reason: FailureReason, should_retry: bool) -> Self {
        Self {
            success: false,
            reason: Some(reason),
            should_retry,
        }
    }

    /// 按失败类型的默认可重试性构造
    pub fn from_reason(reason: FailureReason) -> Self {
        Self::failure(reason, reason.is_retryable())
    }
}

/// 角色状态检查结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vitals {
    Healthy,
    Dead,
    /// 喝药后血量仍低于撤退线
    Critical,
}

/// 策略执行上下文：感知、执行器、资产表与各项参数
#[derive(Clone)]
pub struct ExecutionContext {
    pub perception: Arc<dyn Perception>,
    pub actuator: Arc<dyn Actuator>,
    pub assets: Arc<AssetTable>,
    pub settings: StrategySection,
    pub keys: KeysSection,
    pub skill_rotation: Vec<String>,
    pub retreat_health_percent: u8,
    /// 蓝量低于该百分比时喝蓝药
    pub resource_threshold_percent: u8,
    pub cancel: CancellationToken,
}

impl ExecutionContext {
    /// 从配置构造；资产表在此合并 [assets]
    pub fn new(
        perception: Arc<dyn Perception>,
        actuator: Arc<dyn Actuator>,
        cfg: &AppConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            perception,
            actuator,
            assets: Arc::new(AssetTable::from_config(&cfg.assets)),
            settings: cfg.strategy.clone(),
            keys: cfg.keys.clone(),
            skill_rotation: cfg.quest.skill_rotation.clone(),
            retreat_health_percent: cfg.quest.retreat_health_percent,
            resource_threshold_percent: cfg.quest.resource_threshold_percent,
            cancel,
        }
    }

    /// 停止信号是否已触发
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// 从现在起 timeout_ms 后的截止时刻
    pub fn deadline(&self, timeout_ms: u64) -> Instant {
        Instant::now() + Duration::from_millis(timeout_ms)
    }

    /// 固定时长的等待，测试中由暂停的时钟推进
    pub async fn sleep_ms(&self, ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    /// 轮询间隔，至少 1ms 以保证超时能推进
    pub async fn poll_pause(&self) {
        self.sleep_ms(self.settings.poll_interval_ms.max(1)).await;
    }

    /// 按一次键
    pub async fn press(&self, key: &str) {
        self.actuator.press_key(key).await;
    }

    /// 死亡界面是否出现
    pub async fn is_dead(&self) -> bool {
        self.perception
            .find_template(templates::DEAD_INDICATOR, Some(Region::Screen))
            .await
            .is_some()
    }

    /// 敌方血条可见即视为战斗中
    pub async fn in_combat(&self) -> bool {
        self.perception
            .find_template(templates::COMBAT_HP_BAR, Some(Region::Screen))
            .await
            .is_some()
    }

    /// 血条百分比，读不出时为 None
    pub async fn health_percent(&self) -> Option<u8> {
        parse_bar_percent(&self.perception.read_text(Region::HealthBar).await)
    }

    /// 法力条百分比，读不出时为 None
    pub async fn resource_percent(&self) -> Option<u8> {
        parse_bar_percent(&self.perception.read_text(Region::ResourceBar).await)
    }

    /// 蓝量低于阈值时喝蓝药；返回蓝量是否足够放技能（读不到蓝条视为足够）
    pub async fn ensure_resource(&self) -> bool {
        let low = |mp: Option<u8>| mp.is_some_and(|mp| mp < self.resource_threshold_percent);
        let mp = self.resource_percent().await;
        if !low(mp) {
            return true;
        }
        tracing::info!(mp = ?mp, "Resource low, using potion");
        self.press(&self.keys.mp_potion).await;
        self.sleep_ms(POTION_DELAY_MS).await;
        !low(self.resource_percent().await)
    }

    /// 死亡检测 + 低血量喝药；喝药无效时返回 Critical
    pub async fn check_vitals(&self) -> Vitals {
        if self.is_dead().await {
            return Vitals::Dead;
        }
        match self.health_percent().await {
            Some(hp) if hp < self.retreat_health_percent => {
                tracing::warn!(hp, "Health low, using potion");
                self.press(&self.keys.hp_potion).await;
                self.sleep_ms(POTION_DELAY_MS).await;
                match self.health_percent().await {
                    Some(hp) if hp < self.retreat_health_percent => Vitals::Critical,
                    _ => Vitals::Healthy,
                }
            }
            _ => Vitals::Healthy,
        }
    }

    /// Vitals 不健康时对应的失败结果；撤退会先后退脱离
    pub async fn vitals_failure(&self) -> Option<ExecutionOutcome> {
        match self.check_vitals().await {
            Vitals::Healthy => None,
            Vitals::Dead => Some(ExecutionOutcome::from_reason(FailureReason::CharacterDied)),
            Vitals::Critical => {
                tracing::warn!("Health critical, retreating");
                self.actuator
                    .move_direction(MoveVector::BACKWARD, FLEE_DURATION_MS)
                    .await;
                Some(ExecutionOutcome::from_reason(FailureReason::InteractionRejected))
            }
        }
    }

    /// 按顺序释放一轮技能，脱战即停；蓝量不足时本轮不放技能
    pub async fn cast_rotation(&self) {
        if !self.ensure_resource().await {
            tracing::debug!("Resource still low, holding skills");
            return;
        }
        for key in &self.skill_rotation {
            if !self.in_combat().await {
                break;
            }
            self.press(key).await;
            tracing::debug!(key = %key, "Cast skill");
            self.sleep_ms(SKILL_DELAY_MS).await;
        }
    }

    /// 任务栏中包含 needle 的那一行的进度
    pub async fn tracker_progress(&self, needle: &str) -> Option<(u32, u32)> {
        let text = self.perception.read_text(Region::QuestTracker).await;
        text.lines()
            .filter(|l| l.contains(needle))
            .find_map(parse_progress)
    }

    /// 任务进度 (已完成, 需要)：任务栏带进度后缀时以其为准，否则从 0 开始
    pub async fn progress_of(&self, descriptor: &TaskDescriptor) -> (u32, u32) {
        match self.tracker_progress(descriptor.target_name()).await {
            Some((done, total)) if total > 0 => (done.min(total), total),
            _ => (0, descriptor.required_count()),
        }
    }

    /// 对话框确认：有提交按钮就点，否则按确认键
    pub async fn confirm_dialog(&self) {
        match self
            .perception
            .find_template(templates::SUBMIT_BUTTON, Some(Region::Dialog))
            .await
        {
            Some(btn) => self.actuator.click_screen(btn.x, btn.y).await,
            None => self.press(&self.keys.confirm).await,
        }
    }
}

/// 执行策略 trait
#[async_trait]
pub trait ExecutionStrategy: Send + Sync {
    /// 注册表中的绑定名
    fn name(&self) -> &str;

    /// 执行一次；只有后置条件可被独立感知时才返回成功
    async fn execute(&self, descriptor: &TaskDescriptor, ctx: &ExecutionContext) -> ExecutionOutcome;
}

/// 策略注册表：绑定名 -> 策略
#[derive(Default)]
pub struct StrategyRegistry {
    strategies: HashMap<String, Arc<dyn ExecutionStrategy>>,
}

impl StrategyRegistry {
    /// 空注册表
    pub fn new() -> Self {
        Self::default()
    }

    /// 内置策略：combat / gathering / delivery / escort / interact
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(CombatStrategy);
        registry.register(GatheringStrategy);
        registry.register(DeliveryStrategy);
        registry.register(EscortStrategy);
        registry.register(InteractStrategy);
        registry
    }

    /// 按 name() 注册，同名覆盖
    pub fn register(&mut self, strategy: impl ExecutionStrategy + 'static) {
        let name = strategy.name().to_string();
        self.strategies.insert(name, Arc::new(strategy));
    }

    /// 按绑定名查找
    pub fn get(&self, name: &str) -> Option<Arc<dyn ExecutionStrategy>> {
        self.strategies.get(name).cloned()
    }

    /// 是否已注册
    pub fn contains(&self, name: &str) -> bool {
        self.strategies.contains_key(name)
    }

    /// 按描述符的绑定执行，并输出 JSON 审计日志
    pub async fn execute(
        &self,
        descriptor: &TaskDescriptor,
        ctx: &ExecutionContext,
    ) -> Result<ExecutionOutcome, QuestError> {
        let strategy = self
            .get(descriptor.binding())
            .ok_or_else(|| QuestError::UnknownStrategy(descriptor.binding().to_string()))?;

        let start = Instant::now();
        let outcome = strategy.execute(descriptor, ctx).await;
        let audit = serde_json::json!({
            "event": "task_audit",
            "strategy": strategy.name(),
            "kind": descriptor.kind(),
            "target": descriptor.target_name(),
            "quantity": descriptor.quantity(),
            "ok": outcome.success,
            "reason": outcome.reason,
            "retry": outcome.should_retry,
            "duration_ms": start.elapsed().as_millis() as u64,
        });
        tracing::info!(audit = %audit, "task");
        Ok(outcome)
    }
}
