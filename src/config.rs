//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `QUESTLINE__*` 覆盖（双下划线表示嵌套，如 `QUESTLINE__QUEST__MAX_ROUNDS=10`）。
//! 配置以结构体显式传入各组件，不存在全局可变状态。

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::quest::{AbandonPolicy, ExecutionMode, TieBreak};
use crate::task::{TaskDescriptor, TaskKind};

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub quest: QuestSection,
    pub strategy: StrategySection,
    pub keys: KeysSection,
    pub assets: AssetsSection,
    /// 扩展任务类型：名称 -> 正则 -> 策略
    pub task_types: Vec<TaskTypeSection>,
}

/// [quest] 段：任务链安全上限、执行模式、节奏
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QuestSection {
    /// 日程面板中的条目名，同时作为任务链名
    pub chain_name: String,
    /// 任务栏中识别本链条目的关键字
    pub tracker_keyword: String,
    /// 最大轮数（防止死循环）
    pub max_rounds: u32,
    pub max_attempts_per_task: u32,
    /// 血量低于该百分比时撤退
    pub retreat_health_percent: u8,
    /// 蓝量低于该百分比时喝蓝药
    pub resource_threshold_percent: u8,
    /// 技能释放顺序（按键）
    pub skill_rotation: Vec<String>,
    pub operation_interval_ms: u64,
    pub schedule_check_interval_ms: u64,
    pub execution_mode: ExecutionMode,
    pub tie_break: TieBreak,
    /// 检测到死亡后停止所有任务链
    pub stop_on_death: bool,
    pub abandon_policy: AbandonPolicy,
    /// 连续无法识别任务文字的最大轮询次数
    pub max_idle_ticks: u32,
    /// 各任务类型的默认优先级（priority 模式下数字大的先执行）
    pub priorities: PrioritySection,
}

impl QuestSection {
    /// 任务实例的优先级：扩展类型显式配置的优先，否则按类型默认值
    pub fn priority_for(&self, descriptor: &TaskDescriptor) -> i32 {
        descriptor
            .priority()
            .unwrap_or_else(|| self.priorities.for_kind(descriptor.kind()))
    }
}

/// [quest.priorities] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PrioritySection {
    pub combat: i32,
    pub gathering: i32,
    pub delivery: i32,
    pub escort: i32,
    pub custom: i32,
}

impl Default for PrioritySection {
    fn default() -> Self {
        Self {
            combat: 2,
            gathering: 1,
            delivery: 0,
            escort: 0,
            custom: 0,
        }
    }
}

impl PrioritySection {
    /// 该类型的默认优先级
    pub fn for_kind(&self, kind: TaskKind) -> i32 {
        match kind {
            TaskKind::Combat => self.combat,
            TaskKind::Gathering => self.gathering,
            TaskKind::Delivery => self.delivery,
            TaskKind::Escort => self.escort,
            TaskKind::Custom => self.custom,
        }
    }
}

impl Default for QuestSection {
    fn default() -> Self {
        Self {
            chain_name: "师门任务".to_string(),
            tracker_keyword: "师门".to_string(),
            max_rounds: 20,
            max_attempts_per_task: 3,
            retreat_health_percent: 30,
            resource_threshold_percent: 20,
            skill_rotation: vec!["1".into(), "2".into(), "3".into()],
            operation_interval_ms: 1500,
            schedule_check_interval_ms: 2000,
            execution_mode: ExecutionMode::Sequential,
            tie_break: TieBreak::InsertionOrder,
            stop_on_death: true,
            abandon_policy: AbandonPolicy::AbortChain,
            max_idle_ticks: 30,
            priorities: PrioritySection::default(),
        }
    }
}

/// [strategy] 段：各执行策略的轮询间隔与超时（毫秒）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StrategySection {
    pub poll_interval_ms: u64,
    /// 屏幕上寻找目标的超时
    pub locate_timeout_ms: u64,
    /// 小地图导航总超时
    pub navigation_timeout_ms: u64,
    /// 每次朝标记移动的时长
    pub navigation_step_ms: u64,
    pub combat_timeout_ms: u64,
    pub gather_timeout_ms: u64,
    /// 单次采集读条时长
    pub gather_duration_ms: u64,
    pub escort_timeout_ms: u64,
}

impl Default for StrategySection {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            locate_timeout_ms: 15_000,
            navigation_timeout_ms: 30_000,
            navigation_step_ms: 2_000,
            combat_timeout_ms: 120_000,
            gather_timeout_ms: 120_000,
            gather_duration_ms: 3_000,
            escort_timeout_ms: 180_000,
        }
    }
}

/// [keys] 段：按键绑定
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KeysSection {
    pub interact: String,
    pub confirm: String,
    pub close: String,
    /// 打开日程表
    pub schedule: String,
    pub hp_potion: String,
    pub mp_potion: String,
    /// 切换目标
    pub target: String,
}

impl Default for KeysSection {
    fn default() -> Self {
        Self {
            interact: "f".to_string(),
            confirm: "enter".to_string(),
            close: "escape".to_string(),
            schedule: "l".to_string(),
            hp_potion: "0".to_string(),
            mp_potion: "9".to_string(),
            target: "tab".to_string(),
        }
    }
}

/// [assets] 段：名称 -> 模板 ID，叠加在内置映射之上
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AssetsSection {
    pub enemies: HashMap<String, String>,
    pub resources: HashMap<String, String>,
    pub npcs: HashMap<String, String>,
}

/// [[task_types]]：扩展任务类型
#[derive(Debug, Clone, Deserialize)]
pub struct TaskTypeSection {
    pub name: String,
    /// 必须包含 (?P<target>...)，可选 (?P<count>...)
    pub pattern: String,
    #[serde(default = "default_extension_kind")]
    pub kind: TaskKind,
    /// 策略注册表中的名称；缺省时使用 kind 的默认策略
    #[serde(default)]
    pub strategy: Option<String>,
    /// 覆盖 [quest.priorities] 中该类型的默认优先级
    #[serde(default)]
    pub priority: Option<i32>,
}

fn default_extension_kind() -> TaskKind {
    TaskKind::Custom
}

/// 从 config 目录加载配置，环境变量 QUESTLINE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 QUESTLINE__*
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("QUESTLINE")
            .separator("__")
            .try_parsing(true)
            .list_separator(",")
            .with_list_parse_key("quest.skill_rotation"),
    );

    let c = builder.build()?;
    c.try_deserialize()
}
