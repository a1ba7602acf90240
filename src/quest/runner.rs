//! 任务链主循环
//!
//! 单线程协作式轮询：一个 tick = 一次感知读取 + 至多一次状态迁移 + 至多一个策略执行。
//! 每个 tick 开头检查停止信号；状态迁移只在动作结果已知之后应用。

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{AppConfig, QuestSection};
use crate::core::{FailureReason, QuestError, RecoveryAction, StatusReport, StopReason};
use crate::perception::{templates, Actuator, Perception, Region};
use crate::quest::{ChainStatus, CompletionVerifier, ExecutionMode, QuestChain, QuestManager, RunStatistics};
use crate::strategy::{ExecutionContext, ExecutionOutcome, StrategyRegistry, Vitals};
use crate::task::{extract_tracker_labels, TaskClassifier, TaskDescriptor, TaskKind};

/// 一次运行的汇总
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub chain_id: String,
    pub status: ChainStatus,
    pub stop_reason: StopReason,
    pub rounds: u32,
    pub ticks: u64,
    pub statistics: RunStatistics,
    pub elapsed_ms: u64,
}

/// 任务链运行器：任务栏感知 -> 识别 -> 管理器 -> 策略 -> 提交 -> 核验
pub struct QuestRunner {
    settings: QuestSection,
    classifier: TaskClassifier,
    registry: StrategyRegistry,
    manager: QuestManager,
    verifier: CompletionVerifier,
    ctx: ExecutionContext,
    chain_id: String,
    /// 连续无进展的 tick 数（无法识别 / 刚结束的任务仍在任务栏）
    idle_ticks: u32,
    ticks: u64,
    current_task: Option<String>,
    last_outcome: Option<ExecutionOutcome>,
    /// 最近一个结束（成功或放弃）的任务
    last_settled: Option<TaskDescriptor>,
    /// 按 skip_task 放弃、但仍挂在任务栏上的任务；任务栏换到别的任务后移除
    skipped: Vec<TaskDescriptor>,
    status_tx: watch::Sender<StatusReport>,
}

impl QuestRunner {
    /// 使用内置策略
    pub fn new(
        cfg: &AppConfig,
        perception: Arc<dyn Perception>,
        actuator: Arc<dyn Actuator>,
        cancel: CancellationToken,
    ) -> Result<Self, QuestError> {
        Self::with_registry(cfg, perception, actuator, cancel, StrategyRegistry::with_builtins())
    }

    /// 使用自定义注册表；每条识别规则的绑定都必须已注册
    pub fn with_registry(
        cfg: &AppConfig,
        perception: Arc<dyn Perception>,
        actuator: Arc<dyn Actuator>,
        cancel: CancellationToken,
        registry: StrategyRegistry,
    ) -> Result<Self, QuestError> {
        let classifier = TaskClassifier::from_config(&cfg.task_types)?;
        if let Some(rule) = classifier.rules().find(|r| !registry.contains(r.binding())) {
            return Err(QuestError::UnknownStrategy(format!(
                "{} (task type '{}')",
                rule.binding(),
                rule.name()
            )));
        }

        let mut manager = QuestManager::new(&cfg.quest);
        let chain_id = manager.add_chain(&cfg.quest.chain_name);
        let initial = manager
            .chain(&chain_id)
            .map(|c| StatusReport::project(c, manager.statistics(), None, None))
            .unwrap_or_default();
        let (status_tx, _) = watch::channel(initial);

        Ok(Self {
            settings: cfg.quest.clone(),
            classifier,
            registry,
            manager,
            verifier: CompletionVerifier::new(&cfg.quest.chain_name, cfg.quest.schedule_check_interval_ms),
            ctx: ExecutionContext::new(perception, actuator, cfg, cancel),
            chain_id,
            idle_ticks: 0,
            ticks: 0,
            current_task: None,
            last_outcome: None,
            last_settled: None,
            skipped: Vec::new(),
            status_tx,
        })
    }

    /// 订阅状态报告
    pub fn subscribe(&self) -> watch::Receiver<StatusReport> {
        self.status_tx.subscribe()
    }

    /// 只读访问管理器
    pub fn manager(&self) -> &QuestManager {
        &self.manager
    }

    /// 本运行器驱动的链 ID
    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    /// 本运行器驱动的链
    pub fn chain(&self) -> Option<&QuestChain> {
        self.manager.chain(&self.chain_id)
    }

    /// 运行到任务链进入终态
    pub async fn run(&mut self) -> RunSummary {
        let started = Instant::now();
        tracing::info!(
            chain = %self.settings.chain_name,
            mode = ?self.settings.execution_mode,
            max_rounds = self.settings.max_rounds,
            "Quest runner started"
        );

        let stop_reason = loop {
            if let Some(reason) = self.tick().await {
                break reason;
            }
        };
        self.publish();

        let (status, rounds) = self
            .chain()
            .map(|c| (c.status(), c.round_count()))
            .unwrap_or((ChainStatus::Aborted, 0));
        let summary = RunSummary {
            chain_id: self.chain_id.clone(),
            status,
            stop_reason,
            rounds,
            ticks: self.ticks,
            statistics: self.manager.statistics().clone(),
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        tracing::info!(
            status = ?summary.status,
            stop_reason = ?summary.stop_reason,
            rounds = summary.rounds,
            tasks = summary.statistics.tasks_completed(),
            elapsed_ms = summary.elapsed_ms,
            "Quest runner finished"
        );
        summary
    }

    /// 执行一个 tick；任务链进入终态时返回停止原因
    pub async fn tick(&mut self) -> Option<StopReason> {
        self.ticks += 1;
        if let Some(reason) = self.stopped() {
            return Some(reason);
        }
        if self.ctx.is_cancelled() {
            tracing::info!("Stop requested");
            self.manager.abort_all(StopReason::UserAbort);
            self.publish();
            return self.stopped();
        }

        match self.ctx.check_vitals().await {
            Vitals::Dead => {
                if let Err(e) = self.manager.on_character_died(&self.chain_id) {
                    tracing::error!(error = %e, "Failed to record death");
                }
                self.publish();
                return self.stopped();
            }
            Vitals::Critical => tracing::warn!("Health still low after potion"),
            Vitals::Healthy => {}
        }

        let tracker = self.ctx.perception.read_text(Region::QuestTracker).await;
        let labels = extract_tracker_labels(&tracker, &self.settings.tracker_keyword);
        if labels.is_empty() {
            self.verify_chain().await;
        } else {
            self.work_on(&labels).await;
        }
        self.publish();

        if let Some(reason) = self.stopped() {
            return Some(reason);
        }
        self.ctx.sleep_ms(self.settings.operation_interval_ms.max(1)).await;
        None
    }

    /// 任务栏为空：标记本地完成，再由日程面板核验
    async fn verify_chain(&mut self) {
        self.current_task = None;
        if let Err(e) = self.manager.mark_completed_locally(&self.chain_id) {
            tracing::warn!(error = %e, "Cannot mark chain completed");
            return;
        }
        let verdict = self.verifier.verify(&self.ctx).await;
        match self.manager.apply_verdict(&self.chain_id, verdict) {
            Ok(status) => tracing::info!(status = ?status, "Verification applied"),
            Err(e) => tracing::error!(error = %e, "Verification could not be applied"),
        }
        self.idle_ticks = 0;
        self.last_settled = None;
        self.skipped.clear();
    }

    /// 本 tick 交给管理器的任务
    ///
    /// priority 模式取任务栏上全部可识别条目，由优先级决定先做哪个；其余模式只看第一条。
    /// 已放弃的任务跳过并顺延到下一条。第二个返回值表示是否有被跳过的任务挡在前面。
    fn visible_tasks(&mut self, labels: &[String]) -> (Vec<TaskDescriptor>, bool) {
        let all = self.manager.mode() == ExecutionMode::Priority;
        let mut tasks: Vec<TaskDescriptor> = Vec::new();
        let mut seen_skipped: Vec<TaskDescriptor> = Vec::new();

        for (i, label) in labels.iter().enumerate() {
            let Some(descriptor) = self.classifier.classify(label) else {
                if i == 0 && !all {
                    break;
                }
                continue;
            };
            if self.skipped.iter().any(|d| d.same_task(&descriptor)) {
                seen_skipped.push(descriptor);
                continue;
            }
            if !tasks.iter().any(|d| d.same_task(&descriptor)) {
                tasks.push(descriptor);
            }
            if !all {
                break;
            }
        }

        if !tasks.is_empty() || !seen_skipped.is_empty() {
            self.skipped
                .retain(|d| seen_skipped.iter().any(|s| s.same_task(d)));
        }
        let blocked = tasks.is_empty() && !seen_skipped.is_empty();
        (tasks, blocked)
    }

    async fn work_on(&mut self, labels: &[String]) {
        let (tasks, blocked) = self.visible_tasks(labels);
        if tasks.is_empty() {
            self.idle_ticks += 1;
            if blocked {
                tracing::debug!(idle_ticks = self.idle_ticks, "Only abandoned tasks on the tracker");
            } else {
                tracing::debug!(label = %labels[0], idle_ticks = self.idle_ticks, "Task text not recognised");
            }
            self.check_idle_bound(blocked);
            return;
        }
        if labels.len() > tasks.len() {
            tracing::debug!(count = labels.len(), handled = tasks.len(), "Several tracker labels");
        }

        // 刚结束的任务仍挂在任务栏上：提交未生效或任务栏刷新滞后
        if self
            .last_settled
            .as_ref()
            .is_some_and(|d| tasks.iter().any(|t| d.same_task(t)))
        {
            self.idle_ticks += 1;
            if self.check_idle_bound(false) {
                return;
            }
        } else {
            self.idle_ticks = 0;
        }

        let visible = tasks
            .into_iter()
            .map(|d| {
                let priority = self.settings.priority_for(&d);
                (d, priority)
            })
            .collect();
        if let Err(e) = self.manager.observe(&self.chain_id, visible) {
            tracing::warn!(error = %e, "Task could not be queued");
            return;
        }
        let Some(assignment) = self.manager.select_next() else {
            tracing::debug!("Nothing selectable this tick");
            return;
        };
        self.current_task = Some(assignment.descriptor.raw_text().to_string());
        tracing::info!(
            task = %assignment.descriptor.raw_text(),
            kind = %assignment.descriptor.kind(),
            strategy = %assignment.descriptor.binding(),
            "Executing task"
        );

        // 点击任务追踪，交给游戏自动寻路
        let (x, y) = Region::QuestTracker.center();
        self.ctx.actuator.click_screen(x, y).await;

        let outcome = match self.registry.execute(&assignment.descriptor, &self.ctx).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, "Strategy dispatch failed");
                ExecutionOutcome::failure(FailureReason::InteractionRejected, false)
            }
        };

        match self
            .manager
            .complete(&assignment.chain_id, &assignment.task_id, &outcome)
        {
            Ok(action) => {
                if outcome.success {
                    self.submit(&assignment.descriptor).await;
                }
                let settled = outcome.success
                    || self
                        .chain()
                        .and_then(|c| c.task(&assignment.task_id))
                        .is_some_and(|t| t.status().is_terminal());
                if settled {
                    self.last_settled = Some(assignment.descriptor.clone());
                }
                let still_active = self
                    .chain()
                    .is_some_and(|c| c.status() == ChainStatus::Active);
                if action == Some(RecoveryAction::Abandon) && still_active {
                    tracing::warn!(task = %assignment.descriptor.raw_text(), "Task skipped after abandonment");
                    self.skipped.push(assignment.descriptor.clone());
                }
                tracing::debug!(action = ?action, "Outcome applied");
            }
            Err(e) => tracing::error!(error = %e, "Outcome could not be applied"),
        }
        self.last_outcome = Some(outcome);
    }

    /// 战斗 / 采集完成后回任务追踪处提交；递交与护送在执行中已交付
    async fn submit(&self, descriptor: &TaskDescriptor) {
        if !matches!(descriptor.kind(), TaskKind::Combat | TaskKind::Gathering) {
            return;
        }
        let tracker = self.ctx.perception.read_text(Region::QuestTracker).await;
        if !tracker.contains(descriptor.target_name()) {
            return;
        }
        tracing::info!(task = %descriptor.raw_text(), "Submitting task");
        let (x, y) = Region::QuestTracker.center();
        self.ctx.actuator.click_screen(x, y).await;
        self.ctx.poll_pause().await;
        self.ctx.press(&self.ctx.keys.interact).await;
        self.ctx.poll_pause().await;
        if self
            .ctx
            .perception
            .find_template(templates::DIALOG_PANEL, Some(Region::Dialog))
            .await
            .is_some()
        {
            self.ctx.confirm_dialog().await;
        }
    }

    /// 连续无进展达到上限则终止；blocked 时以被放弃的任务作为原因
    fn check_idle_bound(&mut self, blocked: bool) -> bool {
        if self.idle_ticks < self.settings.max_idle_ticks {
            return false;
        }
        let abandoned = blocked
            .then(|| self.skipped.first())
            .flatten()
            .and_then(|d| self.chain()?.latest_task_for(d))
            .map(|t| (t.descriptor().raw_text().to_string(), t.attempt_count()));
        let what = match abandoned {
            Some((raw, attempts)) => {
                format!("task '{raw}' abandoned after {attempts} attempts and still on the tracker")
            }
            None => format!("max_idle_ticks ({}) without progress", self.settings.max_idle_ticks),
        };
        if let Err(e) = self
            .manager
            .abort(&self.chain_id, StopReason::SafetyBoundExceeded { what })
        {
            tracing::error!(error = %e, "Failed to abort idle chain");
        }
        true
    }

    /// 链已终止则给出原因；循环模式下已核验的链重新进入
    fn stopped(&mut self) -> Option<StopReason> {
        let status = self.chain()?.status();
        if status == ChainStatus::VerifiedComplete && self.manager.mode() == ExecutionMode::Looping {
            match self.manager.restart_chain(&self.chain_id) {
                Ok(ChainStatus::Active) => return None,
                Ok(_) => {}
                Err(e) => tracing::warn!(error = %e, "Chain restart failed"),
            }
        }
        let chain = self.chain()?;
        chain
            .status()
            .is_terminal()
            .then(|| chain.stop_reason().cloned().unwrap_or(StopReason::UserAbort))
    }

    fn publish(&self) {
        if let Some(chain) = self.chain() {
            self.status_tx.send_replace(StatusReport::project(
                chain,
                self.manager.statistics(),
                self.current_task.clone(),
                self.last_outcome.clone(),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TaskTypeSection;
    use crate::perception::{Patch, ScriptedGame};
    use crate::quest::AbandonPolicy;
    use crate::task::TaskStatus;

    fn runner(cfg: &AppConfig, game: Arc<ScriptedGame>) -> QuestRunner {
        QuestRunner::new(cfg, game.clone(), game, CancellationToken::new()).unwrap()
    }

    #[test]
    fn test_unknown_extension_binding_rejected() {
        let mut cfg = AppConfig::default();
        cfg.task_types.push(TaskTypeSection {
            name: "科举".into(),
            pattern: r"答题(?P<target>.+)".into(),
            kind: TaskKind::Custom,
            strategy: Some("quiz".into()),
            priority: None,
        });
        let game = Arc::new(ScriptedGame::new());
        let result = QuestRunner::new(&cfg, game.clone(), game, CancellationToken::new());
        assert!(matches!(result, Err(QuestError::UnknownStrategy(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_first_tick() {
        let game = Arc::new(ScriptedGame::new());
        let cancel = CancellationToken::new();
        let mut r = QuestRunner::new(&AppConfig::default(), game.clone(), game, cancel.clone()).unwrap();
        cancel.cancel();
        let summary = r.run().await;
        assert_eq!(summary.stop_reason, StopReason::UserAbort);
        assert_eq!(summary.status, ChainStatus::Aborted);
        assert_eq!(summary.ticks, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrecognised_text_hits_idle_bound() {
        let game = Arc::new(ScriptedGame::new().text(Region::QuestTracker, vec!["师门任务：去钓鱼"]));
        let cfg = AppConfig {
            quest: QuestSection {
                max_idle_ticks: 4,
                ..QuestSection::default()
            },
            ..AppConfig::default()
        };
        let mut r = runner(&cfg, game.clone());
        let summary = r.run().await;
        assert!(matches!(summary.stop_reason, StopReason::SafetyBoundExceeded { .. }));
        assert_eq!(summary.ticks, 4);
        // 识别失败不创建实例，也不消耗尝试次数
        assert!(r.chain().unwrap().tasks().is_empty());
        assert!(game.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_death_detected_at_tick_start() {
        let game = Arc::new(
            ScriptedGame::new()
                .template_at("dead_indicator", 0.5, 0.5)
                .text(Region::QuestTracker, vec!["师门任务：消灭野猪x3"]),
        );
        let mut r = runner(&AppConfig::default(), game);
        let summary = r.run().await;
        assert_eq!(summary.stop_reason, StopReason::CharacterDied);
        assert!(r.manager().is_halted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_published_each_tick() {
        let game = Arc::new(
            ScriptedGame::new()
                .text(Region::SchedulePanel, vec!["师门任务 已完成"]),
        );
        let mut r = runner(&AppConfig::default(), game);
        let rx = r.subscribe();
        assert_eq!(rx.borrow().chain_status, Some(ChainStatus::Active));
        let summary = r.run().await;
        assert_eq!(summary.stop_reason, StopReason::VerifiedComplete);
        let report = rx.borrow().clone();
        assert_eq!(report.chain_status, Some(ChainStatus::VerifiedComplete));
        assert!(report.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_combat_then_submit() {
        // 击杀后任务栏仍显示任务，需要回去提交；提交后任务栏清空
        let hp = Some(crate::perception::ScreenPoint::new(0.5, 0.1, 0.9));
        let game = Arc::new(
            ScriptedGame::new()
                .text(Region::QuestTracker, vec!["师门任务：消灭野猪"])
                .template_at("enemy_boar", 0.4, 0.4)
                .template("combat_hp_bar", vec![hp, hp, None])
                .on_key("f", Patch::new().text(Region::QuestTracker, vec![""]))
                .text(Region::SchedulePanel, vec!["师门任务 已完成"]),
        );
        let mut r = runner(&AppConfig::default(), game.clone());
        let summary = r.run().await;
        assert_eq!(summary.stop_reason, StopReason::VerifiedComplete);
        assert_eq!(summary.statistics.combat, 1);
        assert_eq!(game.key_presses("f"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skipped_task_not_requeued() {
        // 矿点始终找不到：三次后放弃，任务栏不变则不再重新入队
        let game = Arc::new(ScriptedGame::new().text(Region::QuestTracker, vec!["师门任务：采集铁矿"]));
        let cfg = AppConfig {
            quest: QuestSection {
                abandon_policy: AbandonPolicy::SkipTask,
                max_idle_ticks: 5,
                ..QuestSection::default()
            },
            ..AppConfig::default()
        };
        let mut r = runner(&cfg, game.clone());
        let summary = r.run().await;

        let tasks = r.chain().unwrap().tasks();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].status(), TaskStatus::Abandoned);
        assert_eq!(summary.statistics.failed_attempts, 3);
        assert_eq!(game.key_presses("f"), 0);
        assert_eq!(summary.ticks, 8);
        match summary.stop_reason {
            StopReason::SafetyBoundExceeded { what } => {
                assert!(what.contains("abandoned after 3 attempts"), "{what}");
            }
            other => panic!("unexpected stop reason {other:?}"),
        }
    }

    fn two_task_game() -> Arc<ScriptedGame> {
        Arc::new(
            ScriptedGame::new()
                .text(Region::QuestTracker, vec!["师门任务：采集铁矿\n师门任务：消灭野猪"])
                .template_at("enemy_boar", 0.4, 0.4)
                .template_at("ore_iron", 0.6, 0.5),
        )
    }

    fn attempts_by_kind(r: &QuestRunner, kind: TaskKind) -> u32 {
        r.chain()
            .unwrap()
            .tasks()
            .iter()
            .filter(|t| t.descriptor().kind() == kind)
            .map(|t| t.attempt_count())
            .sum()
    }

    #[tokio::test(start_paused = true)]
    async fn test_priority_mode_runs_combat_first() {
        let game = two_task_game();
        let cfg = AppConfig {
            quest: QuestSection {
                execution_mode: ExecutionMode::Priority,
                ..QuestSection::default()
            },
            ..AppConfig::default()
        };
        let mut r = runner(&cfg, game);
        assert!(r.tick().await.is_none());

        // 任务栏上的两个任务都已入队，战斗优先级更高
        assert_eq!(r.chain().unwrap().tasks().len(), 2);
        assert_eq!(attempts_by_kind(&r, TaskKind::Combat), 1);
        assert_eq!(attempts_by_kind(&r, TaskKind::Gathering), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_configured_priority_overrides_kind_default() {
        let game = two_task_game();
        let mut cfg = AppConfig {
            quest: QuestSection {
                execution_mode: ExecutionMode::Priority,
                ..QuestSection::default()
            },
            ..AppConfig::default()
        };
        cfg.quest.priorities.gathering = 5;
        let mut r = runner(&cfg, game);
        assert!(r.tick().await.is_none());

        assert_eq!(attempts_by_kind(&r, TaskKind::Gathering), 1);
        assert_eq!(attempts_by_kind(&r, TaskKind::Combat), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_mode_follows_tracker_order() {
        let game = two_task_game();
        let mut r = runner(&AppConfig::default(), game);
        assert!(r.tick().await.is_none());

        assert_eq!(r.chain().unwrap().tasks().len(), 1);
        assert_eq!(attempts_by_kind(&r, TaskKind::Gathering), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrecognised_first_label_blocks_the_rest() {
        // 非 priority 模式只看第一条，后面的任务留给之后的轮询
        let game = Arc::new(
            ScriptedGame::new()
                .text(Region::QuestTracker, vec!["师门任务：与师父对话\n师门任务：消灭野猪"])
                .template_at("enemy_boar", 0.4, 0.4),
        );
        let mut r = runner(&AppConfig::default(), game.clone());
        assert!(r.tick().await.is_none());
        assert!(r.chain().unwrap().tasks().is_empty());
        assert!(game.calls().is_empty());
    }
}
