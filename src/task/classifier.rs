//! 任务类型识别
//!
//! 有序正则规则：扩展规则（配置 [[task_types]]）在前，内置规则（战斗 / 采集 / 递交 / 护送）在后，
//! 首个匹配胜出。无法识别的文字返回 None（ClassificationMiss），调用方不得因此推进状态。

use std::sync::OnceLock;

use regex::Regex;

use crate::config::TaskTypeSection;
use crate::core::QuestError;
use crate::task::{TaskDescriptor, TaskKind};

/// 任务栏进度后缀，如 "(1/3)"、"（0/5）"
fn progress_suffix() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[(（]\s*(\d+)\s*/\s*(\d+)\s*[)）]\s*$").expect("static progress regex")
    })
}

/// 从任务栏文字中读取进度 (已完成, 总数)
pub fn parse_progress(text: &str) -> Option<(u32, u32)> {
    let caps = progress_suffix().captures(text.trim())?;
    let done = caps.get(1)?.as_str().parse().ok()?;
    let total = caps.get(2)?.as_str().parse().ok()?;
    Some((done, total))
}

/// 单条识别规则
#[derive(Debug, Clone)]
pub struct ClassifierRule {
    name: String,
    kind: TaskKind,
    binding: String,
    /// 扩展类型显式配置的优先级
    priority: Option<i32>,
    pattern: Regex,
}

impl ClassifierRule {
    /// 由动词同义词集合构造内置规则：动词 + [数量 量词] + 目标 + [x数量 | 数量 量词]
    pub fn from_verbs(name: &str, kind: TaskKind, verbs: &[&str]) -> Result<Self, QuestError> {
        let pattern = format!(
            r"(?:{})\s*(?:(?P<pre>\d+)\s*[个只份株名头]\s*)?(?P<target>.+?)\s*(?:[xX×*]\s*(?P<count>\d+)|(?P<post>\d+)\s*[个只份株名头次]?)?\s*$",
            verbs.join("|")
        );
        Self::new(name, kind, kind.default_binding(), &pattern)
    }

    /// 自定义规则：pattern 必须包含命名分组 `target`，可选 `count`
    pub fn new(name: &str, kind: TaskKind, binding: &str, pattern: &str) -> Result<Self, QuestError> {
        let regex = Regex::new(pattern).map_err(|source| QuestError::InvalidPattern {
            name: name.to_string(),
            source,
        })?;
        if !regex.capture_names().flatten().any(|n| n == "target") {
            return Err(QuestError::Config(format!(
                "task type '{name}' pattern has no (?P<target>...) group"
            )));
        }
        Ok(Self {
            name: name.to_string(),
            kind,
            binding: binding.to_string(),
            priority: None,
            pattern: regex,
        })
    }

    /// 命中后生成的描述符带上该优先级
    pub fn with_priority(mut self, priority: Option<i32>) -> Self {
        self.priority = priority;
        self
    }

    /// 规则名（扩展类型的 name）
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 命中后的任务类型
    pub fn kind(&self) -> TaskKind {
        self.kind
    }

    /// 命中后使用的策略名
    pub fn binding(&self) -> &str {
        &self.binding
    }

    fn apply(&self, normalized: &str, raw: &str, fallback_qty: Option<u32>) -> Option<TaskDescriptor> {
        let caps = self.pattern.captures(normalized)?;
        let target = caps
            .name("target")
            .map(|m| clean_target(m.as_str()))
            .filter(|t| !t.is_empty())?;
        let quantity = ["count", "pre", "post"]
            .iter()
            .find_map(|g| caps.name(g).and_then(|m| m.as_str().parse::<u32>().ok()))
            .or(fallback_qty);

        Some(
            TaskDescriptor::new(self.kind, target, quantity, raw)
                .with_binding(self.binding.clone())
                .with_priority(self.priority),
        )
    }
}

fn clean_target(s: &str) -> String {
    s.trim()
        .trim_matches(|c: char| "。，,.!！:：\"“”「」".contains(c) || c.is_whitespace())
        .to_string()
}

/// 任务识别器：有序规则列表
#[derive(Debug, Clone)]
pub struct TaskClassifier {
    rules: Vec<ClassifierRule>,
}

impl TaskClassifier {
    /// 仅内置规则
    pub fn builtin() -> Result<Self, QuestError> {
        Ok(Self {
            rules: vec![
                ClassifierRule::from_verbs("combat", TaskKind::Combat, &["消灭", "击杀", "讨伐", "击败"])?,
                ClassifierRule::from_verbs("gathering", TaskKind::Gathering, &["采集", "收集", "获取"])?,
                ClassifierRule::from_verbs("delivery", TaskKind::Delivery, &["交给", "拜访", "寻找"])?,
                ClassifierRule::from_verbs("escort", TaskKind::Escort, &["护送"])?,
            ],
        })
    }

    /// 扩展规则（按配置顺序）+ 内置规则
    pub fn from_config(extensions: &[TaskTypeSection]) -> Result<Self, QuestError> {
        let mut rules = Vec::with_capacity(extensions.len() + 4);
        for ext in extensions {
            let binding = ext
                .strategy
                .clone()
                .unwrap_or_else(|| ext.kind.default_binding().to_string());
            rules.push(
                ClassifierRule::new(&ext.name, ext.kind, &binding, &ext.pattern)?.with_priority(ext.priority),
            );
        }
        rules.extend(Self::builtin()?.rules);
        Ok(Self { rules })
    }

    /// 按匹配顺序遍历规则
    pub fn rules(&self) -> impl Iterator<Item = &ClassifierRule> {
        self.rules.iter()
    }

    /// 识别单条任务文字；无匹配返回 None
    pub fn classify(&self, raw_text: &str) -> Option<TaskDescriptor> {
        let trimmed = raw_text.trim();
        if trimmed.is_empty() {
            return None;
        }
        let fallback_qty = parse_progress(trimmed).map(|(_, total)| total);
        let normalized = progress_suffix().replace(trimmed, "");
        let normalized = normalized.trim();

        self.rules
            .iter()
            .find_map(|rule| rule.apply(normalized, trimmed, fallback_qty))
    }
}

/// 从任务栏 OCR 文字中提取属于某任务链的条目
///
/// 含关键字的行若带有 "：" 分隔的正文则取正文，否则取下一条非空行。
pub fn extract_tracker_labels(tracker_text: &str, keyword: &str) -> Vec<String> {
    let lines: Vec<&str> = tracker_text
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();

    let mut labels = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        if line.contains(keyword) {
            let body = line
                .split_once('：')
                .or_else(|| line.split_once(':'))
                .map(|(_, rest)| rest.trim())
                .unwrap_or("");
            if !body.is_empty() {
                labels.push(body.to_string());
            } else if let Some(next) = lines.get(i + 1) {
                labels.push((*next).to_string());
                i += 1;
            }
        }
        i += 1;
    }
    labels
}
