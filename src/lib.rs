//! Questline - 3D MMORPG 任务链自动化编排核心
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误与停止原因、失败恢复、状态投影、停止信号
//! - **observability**: tracing 初始化
//! - **perception**: 感知 / 执行器能力 trait 与脚本化替身
//! - **quest**: 任务链、调度器、完成核验、主循环
//! - **strategy**: 执行策略（战斗 / 采集 / 递交 / 护送 / 通用交互）与注册表
//! - **task**: 任务描述符、文字识别、资产查找表、单任务状态机

pub mod config;
pub mod core;
pub mod observability;
pub mod perception;
pub mod quest;
pub mod strategy;
pub mod task;

pub use quest::{QuestManager, QuestRunner, RunSummary};
