//! 任务管理器（调度器）
//!
//! 持有所有任务链，按 Sequential / Priority / Looping 模式选出下一个实例，
//! 并执行全局停止条件（死亡、轮数上限、放弃策略）。链状态只在这里修改；
//! 实例的状态迁移委托给 TaskInstance 状态机，但只经由本管理器调用。

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::QuestSection;
use crate::core::{QuestError, RecoveryAction, RecoveryEngine, StopReason};
use crate::quest::{ChainStatus, QuestChain, Verdict};
use crate::strategy::ExecutionOutcome;
use crate::task::{TaskDescriptor, TaskId, TaskInstance, TaskKind, TaskStatus};

/// 历史记录保留条数
const HISTORY_CAPACITY: usize = 100;

/// 选择模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// 按链内顺序
    #[default]
    Sequential,
    /// priority 高者优先
    Priority,
    /// 已完成的链重新进入（可重复内容）
    Looping,
}

/// 同优先级时的次序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TieBreak {
    #[default]
    InsertionOrder,
    LatestFirst,
}

/// 实例被放弃后链的去向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbandonPolicy {
    /// 后续步骤依赖该任务，终止整条链
    #[default]
    AbortChain,
    /// 跳过该任务继续
    SkipTask,
}

/// 被选中执行的任务
#[derive(Debug, Clone)]
pub struct Assignment {
    pub chain_id: String,
    pub task_id: TaskId,
    pub descriptor: TaskDescriptor,
}

/// 运行统计
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStatistics {
    pub combat: u32,
    pub gathering: u32,
    pub delivery: u32,
    pub escort: u32,
    pub custom: u32,
    pub failed_attempts: u32,
    pub abandoned: u32,
    pub total_rounds: u32,
    pub chains_verified: u32,
    pub chains_aborted: u32,
}

impl RunStatistics {
    fn record_success(&mut self, kind: TaskKind) {
        let slot = match kind {
            TaskKind::Combat => &mut self.combat,
            TaskKind::Gathering => &mut self.gathering,
            TaskKind::Delivery => &mut self.delivery,
            TaskKind::Escort => &mut self.escort,
            TaskKind::Custom => &mut self.custom,
        };
        *slot += 1;
    }

    /// 各类型成功任务合计
    pub fn tasks_completed(&self) -> u32 {
        self.combat + self.gathering + self.delivery + self.escort + self.custom
    }
}

/// 一条任务链的结束记录
#[derive(Debug, Clone, Serialize)]
pub struct ChainRecord {
    pub chain_id: String,
    pub name: String,
    pub status: ChainStatus,
    pub stop_reason: Option<StopReason>,
    pub rounds: u32,
    pub succeeded: usize,
    pub abandoned: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_secs: i64,
}

impl ChainRecord {
    fn from_chain(chain: &QuestChain) -> Self {
        let finished_at = Utc::now();
        Self {
            chain_id: chain.id().to_string(),
            name: chain.name().to_string(),
            status: chain.status(),
            stop_reason: chain.stop_reason().cloned(),
            rounds: chain.round_count(),
            succeeded: chain.count_with(TaskStatus::Succeeded),
            abandoned: chain.count_with(TaskStatus::Abandoned),
            started_at: chain.started_at(),
            finished_at,
            duration_secs: (finished_at - chain.started_at()).num_seconds(),
        }
    }
}

/// 任务管理器
pub struct QuestManager {
    chains: Vec<QuestChain>,
    /// 所有实例的全局插入顺序
    insertion: Vec<TaskId>,
    mode: ExecutionMode,
    tie_break: TieBreak,
    abandon_policy: AbandonPolicy,
    stop_on_death: bool,
    max_attempts: u32,
    max_rounds: u32,
    recovery: RecoveryEngine,
    halted: bool,
    history: VecDeque<ChainRecord>,
    stats: RunStatistics,
}

impl QuestManager {
    /// 按 [quest] 段构造
    pub fn new(cfg: &QuestSection) -> Self {
        Self {
            chains: Vec::new(),
            insertion: Vec::new(),
            mode: cfg.execution_mode,
            tie_break: cfg.tie_break,
            abandon_policy: cfg.abandon_policy,
            stop_on_death: cfg.stop_on_death,
            max_attempts: cfg.max_attempts_per_task,
            max_rounds: cfg.max_rounds,
            recovery: RecoveryEngine::new(),
            halted: false,
            history: VecDeque::new(),
            stats: RunStatistics::default(),
        }
    }

    /// 当前选择模式
    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    /// 新建任务链，返回链 ID
    pub fn add_chain(&mut self, name: impl Into<String>) -> String {
        let chain = QuestChain::new(name, self.max_rounds);
        let id = chain.id().to_string();
        tracing::info!(chain_id = %id, chain = %chain.name(), "Quest chain created");
        self.chains.push(chain);
        id
    }

    /// 按 ID 查找任务链
    pub fn chain(&self, chain_id: &str) -> Option<&QuestChain> {
        self.chains.iter().find(|c| c.id() == chain_id)
    }

    /// 全部任务链（含已终止的）
    pub fn chains(&self) -> &[QuestChain] {
        &self.chains
    }

    /// 死亡标志已触发，不再选择任何任务
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// 累计运行统计
    pub fn statistics(&self) -> &RunStatistics {
        &self.stats
    }

    /// 最近结束的任务链（最多 100 条，旧的在前）
    pub fn history(&self) -> impl Iterator<Item = &ChainRecord> {
        self.history.iter()
    }

    /// 加入新任务实例
    pub fn enqueue(
        &mut self,
        chain_id: &str,
        descriptor: TaskDescriptor,
        priority: i32,
    ) -> Result<TaskId, QuestError> {
        let max_attempts = self.max_attempts;
        let chain = self.active_chain_mut(chain_id)?;
        let instance = TaskInstance::new(descriptor, max_attempts, priority);
        let id = instance.id().to_string();
        tracing::info!(
            chain_id = %chain_id,
            task_id = %id,
            kind = %instance.descriptor().kind(),
            target_name = %instance.descriptor().target_name(),
            "Task enqueued"
        );
        chain.push(instance);
        self.insertion.push(id.clone());
        Ok(id)
    }

    /// 任务栏上当前可见的任务 (描述符, 优先级)：已有未结束的同一任务则沿用，否则入队。
    ///
    /// 链中其余仍在 Pending 的实例已从任务栏消失，视为游戏侧已完成。
    /// 返回值与 visible 一一对应。
    pub fn observe(
        &mut self,
        chain_id: &str,
        visible: Vec<(TaskDescriptor, i32)>,
    ) -> Result<Vec<TaskId>, QuestError> {
        let chain = self.active_chain_mut(chain_id)?;
        let existing: Vec<Option<TaskId>> = visible
            .iter()
            .map(|(d, _)| chain.open_task_for(d).map(|t| t.id().to_string()))
            .collect();
        let keep: Vec<TaskDescriptor> = visible.iter().map(|(d, _)| d.clone()).collect();
        self.settle_vanished(chain_id, &keep)?;

        let mut ids: Vec<TaskId> = Vec::with_capacity(visible.len());
        for ((descriptor, priority), existing) in visible.into_iter().zip(existing) {
            let id = match existing {
                Some(id) => id,
                None => self.enqueue(chain_id, descriptor, priority)?,
            };
            ids.push(id);
        }
        Ok(ids)
    }

    /// 选出下一个实例并置为 InProgress；同一时刻至多一个 InProgress
    pub fn select_next(&mut self) -> Option<Assignment> {
        if self.halted {
            tracing::debug!("Selection halted");
            return None;
        }
        let busy = self
            .chains
            .iter()
            .flat_map(|c| c.tasks())
            .any(|t| t.status() == TaskStatus::InProgress);
        if busy {
            return None;
        }
        if self.mode == ExecutionMode::Looping {
            self.recycle_finished();
        }

        let (ci, ti) = match self.mode {
            ExecutionMode::Sequential | ExecutionMode::Looping => self.pick_in_order(),
            ExecutionMode::Priority => self.pick_by_priority(),
        }?;

        let chain = &mut self.chains[ci];
        let chain_id = chain.id().to_string();
        let task = &mut chain.tasks_mut()[ti];
        if let Err(e) = task.begin_attempt() {
            tracing::error!(error = %e, "Selected task could not start");
            return None;
        }
        tracing::debug!(
            task_id = %task.id(),
            attempt = task.attempt_count(),
            max_attempts = task.max_attempts(),
            "Task selected"
        );
        Some(Assignment {
            chain_id,
            task_id: task.id().to_string(),
            descriptor: task.descriptor().clone(),
        })
    }

    /// 应用一次执行结果
    pub fn complete(
        &mut self,
        chain_id: &str,
        task_id: &str,
        outcome: &ExecutionOutcome,
    ) -> Result<Option<RecoveryAction>, QuestError> {
        let recovery = self.recovery;
        let chain = self.chain_mut(chain_id)?;
        let task = chain
            .task_mut(task_id)
            .ok_or_else(|| QuestError::TaskNotFound(task_id.to_string()))?;
        let action = task.apply_outcome(outcome, &recovery)?;
        let kind = task.descriptor().kind();
        let raw = task.descriptor().raw_text().to_string();
        let attempts = task.attempt_count();

        match action {
            None => {
                self.stats.record_success(kind);
                tracing::info!(task_id = %task_id, attempts, "Task succeeded");
            }
            Some(RecoveryAction::Retry) => {
                self.stats.failed_attempts += 1;
                tracing::info!(task_id = %task_id, attempts, reason = ?outcome.reason, "Task will be retried");
            }
            Some(RecoveryAction::Abandon) => {
                self.stats.failed_attempts += 1;
                self.stats.abandoned += 1;
                tracing::warn!(task_id = %task_id, attempts, reason = ?outcome.reason, "Task abandoned");
                if self.abandon_policy == AbandonPolicy::AbortChain {
                    self.abort(
                        chain_id,
                        StopReason::SafetyBoundExceeded {
                            what: format!("task '{raw}' abandoned after {attempts} attempts"),
                        },
                    )?;
                }
            }
            Some(RecoveryAction::AbortChain) => {
                self.stats.failed_attempts += 1;
                self.stats.abandoned += 1;
                self.on_character_died(chain_id)?;
            }
        }
        Ok(action)
    }

    /// 检测到角色死亡
    pub fn on_character_died(&mut self, chain_id: &str) -> Result<(), QuestError> {
        tracing::error!(chain_id = %chain_id, "Character died");
        if self.stop_on_death {
            self.halted = true;
            let open: Vec<String> = self
                .chains
                .iter()
                .filter(|c| !c.status().is_terminal())
                .map(|c| c.id().to_string())
                .collect();
            for id in open {
                self.abort(&id, StopReason::CharacterDied)?;
            }
            Ok(())
        } else {
            self.abort(chain_id, StopReason::CharacterDied)
        }
    }

    /// 终止任务链；未开始的实例一并放弃。已在终态则忽略
    pub fn abort(&mut self, chain_id: &str, reason: StopReason) -> Result<(), QuestError> {
        let chain = self.chain_mut(chain_id)?;
        if chain.status().is_terminal() {
            return Ok(());
        }
        let mut dropped = 0;
        for task in chain.tasks_mut() {
            if task.status() == TaskStatus::Pending && task.abandon().is_ok() {
                dropped += 1;
            }
        }
        match &reason {
            StopReason::SafetyBoundExceeded { what } => {
                tracing::error!(chain_id = %chain_id, bound = %what, "Safety bound exceeded, chain aborted");
            }
            other => tracing::warn!(chain_id = %chain_id, reason = ?other, "Chain aborted"),
        }
        chain.stop(ChainStatus::Aborted, reason);
        self.stats.abandoned += dropped;
        self.stats.chains_aborted += 1;
        self.archive(chain_id);
        Ok(())
    }

    /// 用户中止：终止所有未结束的链
    pub fn abort_all(&mut self, reason: StopReason) {
        let open: Vec<String> = self
            .chains
            .iter()
            .filter(|c| !c.status().is_terminal())
            .map(|c| c.id().to_string())
            .collect();
        for id in open {
            // 链 ID 取自自身列表，不会缺失
            let _ = self.abort(&id, reason.clone());
        }
    }

    /// 任务栏已无本链条目：Active -> CompletedLocally
    pub fn mark_completed_locally(&mut self, chain_id: &str) -> Result<(), QuestError> {
        let chain = self.active_chain_mut(chain_id)?;
        if let Some(running) = chain
            .tasks()
            .iter()
            .find(|t| t.status() == TaskStatus::InProgress)
        {
            return Err(QuestError::InvalidTransition {
                task: running.id().to_string(),
                from: TaskStatus::InProgress,
                to: "completed_locally",
            });
        }
        self.settle_vanished(chain_id, &[])?;
        let chain = self.chain_mut(chain_id)?;
        chain.set_status(ChainStatus::CompletedLocally);
        tracing::info!(chain_id = %chain_id, round = chain.round_count(), "Chain completed locally, awaiting verification");
        Ok(())
    }

    /// 应用日程面板核验结果
    pub fn apply_verdict(&mut self, chain_id: &str, verdict: Verdict) -> Result<ChainStatus, QuestError> {
        let status = self.chain_mut(chain_id)?.status();
        if status != ChainStatus::CompletedLocally {
            return Err(QuestError::ChainNotActive {
                chain: chain_id.to_string(),
                status,
            });
        }
        self.stats.total_rounds += 1;

        let chain = self.chain_mut(chain_id)?;
        match verdict {
            Verdict::Completed => {
                chain.stop(ChainStatus::VerifiedComplete, StopReason::VerifiedComplete);
                tracing::info!(chain_id = %chain_id, rounds = chain.round_count(), "Chain verified complete");
                self.stats.chains_verified += 1;
                self.archive(chain_id);
                Ok(ChainStatus::VerifiedComplete)
            }
            Verdict::Reentered(entry) => {
                if chain.next_round() {
                    chain.resume();
                    tracing::info!(
                        chain_id = %chain_id,
                        round = chain.round_count(),
                        entry = ?entry,
                        "Schedule not completed, chain re-entered"
                    );
                    Ok(ChainStatus::Active)
                } else {
                    let max_rounds = chain.max_rounds();
                    self.abort(
                        chain_id,
                        StopReason::SafetyBoundExceeded {
                            what: format!("max_rounds ({max_rounds}) reached without schedule confirmation"),
                        },
                    )?;
                    Ok(ChainStatus::Aborted)
                }
            }
        }
    }

    /// 循环模式：重新进入已完成的链，轮数 +1
    pub fn restart_chain(&mut self, chain_id: &str) -> Result<ChainStatus, QuestError> {
        let chain = self.chain_mut(chain_id)?;
        let finished = match chain.status() {
            ChainStatus::VerifiedComplete => true,
            ChainStatus::Active => {
                !chain.tasks().is_empty()
                    && chain.tasks().iter().all(|t| t.status() == TaskStatus::Succeeded)
            }
            _ => false,
        };
        if !finished {
            return Err(QuestError::ChainNotActive {
                chain: chain_id.to_string(),
                status: chain.status(),
            });
        }
        if chain.status() == ChainStatus::Active {
            self.stats.total_rounds += 1;
        }

        let chain = self.chain_mut(chain_id)?;
        if !chain.next_round() {
            chain.resume();
            let max_rounds = chain.max_rounds();
            self.abort(
                chain_id,
                StopReason::SafetyBoundExceeded {
                    what: format!("max_rounds ({max_rounds}) reached in looping mode"),
                },
            )?;
            return Ok(ChainStatus::Aborted);
        }
        for task in chain.tasks_mut() {
            task.reset();
        }
        chain.resume();
        tracing::info!(chain_id = %chain_id, round = chain.round_count(), "Chain restarted");
        Ok(ChainStatus::Active)
    }

    fn recycle_finished(&mut self) {
        let finished: Vec<String> = self
            .chains
            .iter()
            .filter(|c| match c.status() {
                ChainStatus::VerifiedComplete => true,
                ChainStatus::Active => {
                    !c.tasks().is_empty() && c.tasks().iter().all(|t| t.status() == TaskStatus::Succeeded)
                }
                _ => false,
            })
            .map(|c| c.id().to_string())
            .collect();
        for id in finished {
            if let Err(e) = self.restart_chain(&id) {
                tracing::warn!(chain_id = %id, error = %e, "Chain restart failed");
            }
        }
    }

    fn pick_in_order(&self) -> Option<(usize, usize)> {
        self.chains
            .iter()
            .enumerate()
            .filter(|(_, c)| c.status() == ChainStatus::Active)
            .find_map(|(ci, c)| {
                c.tasks()
                    .iter()
                    .position(|t| !t.status().is_terminal())
                    .filter(|&ti| c.tasks()[ti].status() == TaskStatus::Pending)
                    .map(|ti| (ci, ti))
            })
    }

    fn pick_by_priority(&self) -> Option<(usize, usize)> {
        let candidates = self
            .chains
            .iter()
            .enumerate()
            .filter(|(_, c)| c.status() == ChainStatus::Active)
            .flat_map(|(ci, c)| {
                c.tasks()
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| t.status() == TaskStatus::Pending)
                    .map(move |(ti, t)| (ci, ti, t.priority(), self.sequence_of(t.id())))
            });

        let best = match self.tie_break {
            TieBreak::InsertionOrder => {
                candidates.min_by_key(|&(_, _, p, seq)| (std::cmp::Reverse(p), seq))
            }
            TieBreak::LatestFirst => candidates.max_by_key(|&(_, _, p, seq)| (p, seq)),
        };
        best.map(|(ci, ti, _, _)| (ci, ti))
    }

    fn sequence_of(&self, task_id: &str) -> usize {
        self.insertion
            .iter()
            .position(|id| id == task_id)
            .unwrap_or(usize::MAX)
    }

    /// 链中已从任务栏消失的 Pending 实例记为完成（keep 为当前可见的任务）
    fn settle_vanished(&mut self, chain_id: &str, keep: &[TaskDescriptor]) -> Result<(), QuestError> {
        let chain = self.chain_mut(chain_id)?;
        let mut settled = Vec::new();
        for task in chain.tasks_mut() {
            if task.status() != TaskStatus::Pending {
                continue;
            }
            if keep.iter().any(|d| task.descriptor().same_task(d)) {
                continue;
            }
            task.begin_attempt()?;
            task.record_success()?;
            tracing::info!(task_id = %task.id(), "Task left the tracker, counted as completed");
            settled.push(task.descriptor().kind());
        }
        for kind in settled {
            self.stats.record_success(kind);
        }
        Ok(())
    }

    fn archive(&mut self, chain_id: &str) {
        if let Some(chain) = self.chain(chain_id) {
            let record = ChainRecord::from_chain(chain);
            self.history.push_back(record);
            while self.history.len() > HISTORY_CAPACITY {
                self.history.pop_front();
            }
        }
    }

    fn chain_mut(&mut self, chain_id: &str) -> Result<&mut QuestChain, QuestError> {
        self.chains
            .iter_mut()
            .find(|c| c.id() == chain_id)
            .ok_or_else(|| QuestError::ChainNotFound(chain_id.to_string()))
    }

    fn active_chain_mut(&mut self, chain_id: &str) -> Result<&mut QuestChain, QuestError> {
        let chain = self.chain_mut(chain_id)?;
        if chain.status() != ChainStatus::Active {
            return Err(QuestError::ChainNotActive {
                chain: chain_id.to_string(),
                status: chain.status(),
            });
        }
        Ok(chain)
    }
}
