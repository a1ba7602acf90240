//! 任务链编排：任务链、调度器、完成核验与主循环

pub mod chain;
pub mod manager;
pub mod runner;
pub mod verifier;

pub use chain::{ChainStatus, QuestChain};
pub use manager::{
    AbandonPolicy, Assignment, ChainRecord, ExecutionMode, QuestManager, RunStatistics, TieBreak,
};
pub use runner::{QuestRunner, RunSummary};
pub use verifier::{CompletionVerifier, EntryStatus, SchedulePanelState, Verdict};
