//! 感知与执行器抽象
//!
//! 宿主框架提供截屏、模板匹配、OCR 与键鼠注入；编排核心只依赖这里的能力 trait
//! （Locate / ReadText / ReadMinimap 与 Actuator），测试中以 scripted 模块的确定性实现替换。

pub mod scripted;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use scripted::{ActuatorCall, Patch, ReplayScript, ScriptedGame};

/// 命名的界面区域；bounds 为相对窗口的比例坐标 (x_start, x_end, y_start, y_end)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Region {
    /// 全屏
    Screen,
    /// 右侧任务追踪栏
    QuestTracker,
    /// 右上角小地图
    Minimap,
    /// 日程表面板
    SchedulePanel,
    /// 左上角角色血条
    HealthBar,
    /// 血条下方的蓝条（法力 / 内力）
    ResourceBar,
    /// NPC 对话框
    Dialog,
}

impl Region {
    /// 区域的比例坐标
    pub fn bounds(self) -> (f32, f32, f32, f32) {
        match self {
            Region::Screen => (0.0, 1.0, 0.0, 1.0),
            Region::QuestTracker => (0.80, 0.98, 0.10, 0.90),
            Region::Minimap => (0.82, 0.98, 0.02, 0.18),
            Region::SchedulePanel => (0.15, 0.85, 0.10, 0.90),
            Region::HealthBar => (0.02, 0.25, 0.02, 0.08),
            Region::ResourceBar => (0.02, 0.25, 0.08, 0.12),
            Region::Dialog => (0.25, 0.75, 0.60, 0.95),
        }
    }

    /// 区域中心，用于点击任务追踪等
    pub fn center(self) -> (f32, f32) {
        let (x0, x1, y0, y1) = self.bounds();
        ((x0 + x1) / 2.0, (y0 + y1) / 2.0)
    }
}

/// 模板匹配命中（比例坐标）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScreenPoint {
    pub x: f32,
    pub y: f32,
    pub confidence: f32,
}

impl ScreenPoint {
    /// 以比例坐标和置信度构造
    pub fn new(x: f32, y: f32, confidence: f32) -> Self {
        Self { x, y, confidence }
    }
}

/// 小地图标记：相对角色朝向的角度（度，顺时针为正）与距离（小地图半径比例）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MinimapMarker {
    pub kind: String,
    pub relative_angle: f32,
    pub relative_distance: f32,
}

/// 移动方向向量（x 向右，y 向前），由执行器转为按键组合
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MoveVector {
    pub x: f32,
    pub y: f32,
}

impl MoveVector {
    /// 后退（撤退时使用）
    pub const BACKWARD: MoveVector = MoveVector { x: 0.0, y: -1.0 };

    /// 由相对角度构造单位向量
    pub fn from_angle(degrees: f32) -> Self {
        let rad = degrees.to_radians();
        Self { x: rad.sin(), y: rad.cos() }
    }
}

/// 模板定位能力
#[async_trait]
pub trait Locate: Send + Sync {
    /// 查找模板；未找到返回 None（PerceptionMiss，不是错误）
    async fn find_template(&self, id: &str, region: Option<Region>) -> Option<ScreenPoint>;
}

/// OCR 能力
#[async_trait]
pub trait ReadText: Send + Sync {
    /// 识别区域内文字；识别不到为空串
    async fn read_text(&self, region: Region) -> String;
}

/// 小地图读取能力
#[async_trait]
pub trait ReadMinimap: Send + Sync {
    /// 当前小地图上的全部标记
    async fn read_minimap_markers(&self) -> Vec<MinimapMarker>;
}

/// 感知服务：三种能力的组合
pub trait Perception: Locate + ReadText + ReadMinimap {}

impl<T: Locate + ReadText + ReadMinimap> Perception for T {}

/// 执行器：键鼠注入，调用返回即代表动作已完成
#[async_trait]
pub trait Actuator: Send + Sync {
    /// 按方向移动 duration_ms 毫秒
    async fn move_direction(&self, vector: MoveVector, duration_ms: u64);

    async fn press_key(&self, key: &str);

    /// 点击比例坐标
    async fn click_screen(&self, x: f32, y: f32);
}

/// 角色状态探针的模板 ID
pub mod templates {
    pub const DEAD_INDICATOR: &str = "dead_indicator";
    pub const COMBAT_HP_BAR: &str = "combat_hp_bar";
    pub const SUBMIT_BUTTON: &str = "submit_button";
    pub const DIALOG_PANEL: &str = "dialog_panel";
    pub const SCHEDULE_BUTTON: &str = "schedule_button";
    pub const ACCEPT_BUTTON: &str = "accept_button";
}

/// 从血条 / 蓝条 OCR 文字（如 "850/1000"、"HP 85%"）解析百分比
///
/// 数字位数过长（OCR 噪声）时解析失败返回 None。
pub fn parse_bar_percent(text: &str) -> Option<u8> {
    let text = text.trim();
    if let Some((cur, max)) = text.rsplit_once('/') {
        let cur: u64 = trailing_digits(cur)?.parse().ok()?;
        let max: u64 = leading_digits(max)?.parse().ok()?;
        if max == 0 {
            return None;
        }
        let percent = cur.min(max).checked_mul(100)? / max;
        return u8::try_from(percent).ok();
    }
    let (before, _) = text.split_once('%')?;
    trailing_digits(before)?.parse::<u8>().ok().map(|p| p.min(100))
}

fn trailing_digits(s: &str) -> Option<&str> {
    let s = s.trim_end();
    let start = s
        .char_indices()
        .rev()
        .take_while(|(_, c)| c.is_ascii_digit())
        .last()
        .map(|(i, _)| i)?;
    Some(&s[start..])
}

fn leading_digits(s: &str) -> Option<&str> {
    let s = s.trim_start();
    let end = s
        .char_indices()
        .find(|(_, c)| !c.is_ascii_digit())
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    (end > 0).then(|| &s[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bar_ratio() {
        assert_eq!(parse_bar_percent("850/1000"), Some(85));
        assert_eq!(parse_bar_percent("HP 120 / 400"), Some(30));
        assert_eq!(parse_bar_percent("0/0"), None);
    }

    #[test]
    fn test_parse_bar_large_numbers() {
        assert_eq!(parse_bar_percent("99999999/99999999"), Some(100));
        assert_eq!(parse_bar_percent("4294967295/4294967295"), Some(100));
        assert_eq!(parse_bar_percent("123456789012/999999999999"), Some(12));
        // 超出 u64 的数字串视为读取失败
        assert_eq!(parse_bar_percent("99999999999999999999999/1"), None);
    }

    #[test]
    fn test_parse_bar_percent_sign() {
        assert_eq!(parse_bar_percent("HP 25%"), Some(25));
        assert_eq!(parse_bar_percent("血量"), None);
    }

    #[test]
    fn test_move_vector_from_angle() {
        let v = MoveVector::from_angle(90.0);
        assert!((v.x - 1.0).abs() < 1e-4);
        assert!(v.y.abs() < 1e-4);
    }
}
