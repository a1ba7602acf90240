//! 任务描述符：从任务栏文字解析出的类型化任务

use serde::{Deserialize, Serialize};

/// 任务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// 消灭 / 击杀 / 讨伐
    Combat,
    /// 采集 / 收集 / 获取
    Gathering,
    /// 交给 / 拜访 / 寻找
    Delivery,
    /// 护送
    Escort,
    /// 由扩展规则注册的自定义类型
    Custom,
}

impl TaskKind {
    /// 内置类型默认绑定的策略名
    pub fn default_binding(self) -> &'static str {
        match self {
            TaskKind::Combat => "combat",
            TaskKind::Gathering => "gathering",
            TaskKind::Delivery => "delivery",
            TaskKind::Escort => "escort",
            TaskKind::Custom => "interact",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskKind::Combat => "combat",
            TaskKind::Gathering => "gathering",
            TaskKind::Delivery => "delivery",
            TaskKind::Escort => "escort",
            TaskKind::Custom => "custom",
        };
        f.write_str(s)
    }
}

/// 任务描述符，创建后不可变
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskDescriptor {
    kind: TaskKind,
    target_name: String,
    quantity: Option<u32>,
    raw_text: String,
    /// StrategyRegistry 中的策略名
    binding: String,
    /// 扩展类型配置的优先级；None 时按类型默认值
    priority: Option<i32>,
}

impl TaskDescriptor {
    /// 未绑定策略、无显式优先级的描述
    pub fn new(
        kind: TaskKind,
        target_name: impl Into<String>,
        quantity: Option<u32>,
        raw_text: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            target_name: target_name.into(),
            quantity,
            raw_text: raw_text.into(),
            binding: kind.default_binding().to_string(),
            priority: None,
        }
    }

    /// 指定非默认的策略绑定（扩展任务类型使用）
    pub fn with_binding(mut self, binding: impl Into<String>) -> Self {
        self.binding = binding.into();
        self
    }

    /// 指定优先级（扩展任务类型使用）
    pub fn with_priority(mut self, priority: Option<i32>) -> Self {
        self.priority = priority;
        self
    }

    /// 任务类型
    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    /// 目标名称（怪物 / 资源 / NPC）
    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    /// 文字中给出的数量
    pub fn quantity(&self) -> Option<u32> {
        self.quantity
    }

    /// 目标数量，未给出时为 1
    pub fn required_count(&self) -> u32 {
        self.quantity.unwrap_or(1).max(1)
    }

    /// 任务栏原文
    pub fn raw_text(&self) -> &str {
        &self.raw_text
    }

    /// 策略绑定名
    pub fn binding(&self) -> &str {
        &self.binding
    }

    /// 规则上配置的优先级
    pub fn priority(&self) -> Option<i32> {
        self.priority
    }

    /// 是否为同一任务（忽略原文中随进度变化的部分）
    pub fn same_task(&self, other: &TaskDescriptor) -> bool {
        self.kind == other.kind
            && self.target_name == other.target_name
            && self.binding == other.binding
    }
}
