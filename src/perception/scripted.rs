//! 脚本化的游戏替身（用于测试与离线回放，无需真实客户端）
//!
//! 每个模板 / 区域对应一串帧：每次读取消费一帧，最后一帧保持不变。
//! 按键可挂载触发器（Patch），按下时替换帧序列，用来模拟「按确认后对话框关闭」之类的界面反馈。

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde::Deserialize;

use crate::core::QuestError;
use crate::perception::{
    Actuator, Locate, MinimapMarker, MoveVector, ReadMinimap, ReadText, Region, ScreenPoint,
};

/// 执行器调用记录
#[derive(Debug, Clone, PartialEq)]
pub enum ActuatorCall {
    Move { vector: MoveVector, duration_ms: u64 },
    Key(String),
    Click { x: f32, y: f32 },
}

#[derive(Debug, Clone)]
struct Track<T> {
    frames: VecDeque<T>,
}

impl<T: Clone> Track<T> {
    fn new(frames: Vec<T>) -> Self {
        Self { frames: frames.into() }
    }

    fn next(&mut self) -> Option<T> {
        if self.frames.len() > 1 {
            self.frames.pop_front()
        } else {
            self.frames.front().cloned()
        }
    }
}

/// 按键触发的帧替换
#[derive(Debug, Clone, Default)]
pub struct Patch {
    templates: HashMap<String, Vec<Option<ScreenPoint>>>,
    texts: HashMap<Region, Vec<String>>,
}

impl Patch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn template(mut self, id: impl Into<String>, frames: Vec<Option<ScreenPoint>>) -> Self {
        self.templates.insert(id.into(), frames);
        self
    }

    pub fn text<S: Into<String>>(mut self, region: Region, frames: Vec<S>) -> Self {
        self.texts
            .insert(region, frames.into_iter().map(Into::into).collect());
        self
    }
}

#[derive(Debug, Default)]
struct ScriptState {
    templates: HashMap<String, Track<Option<ScreenPoint>>>,
    texts: HashMap<Region, Track<String>>,
    markers: Option<Track<Vec<MinimapMarker>>>,
    triggers: HashMap<String, VecDeque<Patch>>,
    calls: Vec<ActuatorCall>,
    lookups: HashMap<String, usize>,
}

impl ScriptState {
    fn apply(&mut self, patch: Patch) {
        for (id, frames) in patch.templates {
            self.templates.insert(id, Track::new(frames));
        }
        for (region, frames) in patch.texts {
            self.texts.insert(region, Track::new(frames));
        }
    }
}

/// 脚本化游戏：同时实现感知与执行器
#[derive(Debug, Default)]
pub struct ScriptedGame {
    state: Mutex<ScriptState>,
}

impl ScriptedGame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn template(self, id: impl Into<String>, frames: Vec<Option<ScreenPoint>>) -> Self {
        self.lock().templates.insert(id.into(), Track::new(frames));
        self
    }

    /// 模板始终可见
    pub fn template_at(self, id: impl Into<String>, x: f32, y: f32) -> Self {
        self.template(id, vec![Some(ScreenPoint::new(x, y, 0.95))])
    }

    pub fn text<S: Into<String>>(self, region: Region, frames: Vec<S>) -> Self {
        self.lock()
            .texts
            .insert(region, Track::new(frames.into_iter().map(Into::into).collect()));
        self
    }

    pub fn markers(self, frames: Vec<Vec<MinimapMarker>>) -> Self {
        self.lock().markers = Some(Track::new(frames));
        self
    }

    /// 第 n 次按下 key 时应用第 n 个 patch
    pub fn on_key(self, key: impl Into<String>, patch: Patch) -> Self {
        self.lock()
            .triggers
            .entry(key.into())
            .or_default()
            .push_back(patch);
        self
    }

    /// 执行器收到的全部调用
    pub fn calls(&self) -> Vec<ActuatorCall> {
        self.lock().calls.clone()
    }

    /// 某个按键被按下的次数
    pub fn key_presses(&self, key: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, ActuatorCall::Key(k) if k == key))
            .count()
    }

    /// 移动调用次数
    pub fn moves(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| matches!(c, ActuatorCall::Move { .. }))
            .count()
    }

    /// 某模板被查询的次数
    pub fn lookups(&self, id: &str) -> usize {
        self.lock().lookups.get(id).copied().unwrap_or(0)
    }

    /// 从 TOML 回放脚本构造
    pub fn from_replay(source: &str) -> Result<Self, QuestError> {
        let script: ReplayScript =
            toml::from_str(source).map_err(|e| QuestError::ReplayScript(e.to_string()))?;
        Ok(script.into_game())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ScriptState> {
        // 脚本状态只在本模块内短暂持锁，中毒时沿用内部数据
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Locate for ScriptedGame {
    async fn find_template(&self, id: &str, _region: Option<Region>) -> Option<ScreenPoint> {
        let mut state = self.lock();
        *state.lookups.entry(id.to_string()).or_default() += 1;
        state.templates.get_mut(id).and_then(Track::next).flatten()
    }
}

#[async_trait]
impl ReadText for ScriptedGame {
    async fn read_text(&self, region: Region) -> String {
        self.lock()
            .texts
            .get_mut(&region)
            .and_then(Track::next)
            .unwrap_or_default()
    }
}

#[async_trait]
impl ReadMinimap for ScriptedGame {
    async fn read_minimap_markers(&self) -> Vec<MinimapMarker> {
        self.lock()
            .markers
            .as_mut()
            .and_then(Track::next)
            .unwrap_or_default()
    }
}

#[async_trait]
impl Actuator for ScriptedGame {
    async fn move_direction(&self, vector: MoveVector, duration_ms: u64) {
        self.lock().calls.push(ActuatorCall::Move { vector, duration_ms });
    }

    async fn press_key(&self, key: &str) {
        let mut state = self.lock();
        state.calls.push(ActuatorCall::Key(key.to_string()));
        if let Some(patch) = state.triggers.get_mut(key).and_then(VecDeque::pop_front) {
            state.apply(patch);
        }
    }

    async fn click_screen(&self, x: f32, y: f32) {
        self.lock().calls.push(ActuatorCall::Click { x, y });
    }
}

/// 回放脚本（TOML）
///
/// 模板帧写作 `[x, y]` 或 `[x, y, confidence]`，空数组 `[]` 表示未找到。
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct ReplayScript {
    pub templates: HashMap<String, Vec<Vec<f32>>>,
    pub texts: HashMap<Region, Vec<String>>,
    pub markers: Vec<Vec<MinimapMarker>>,
    pub triggers: Vec<ReplayTrigger>,
}

#[derive(Debug, Deserialize)]
pub struct ReplayTrigger {
    pub key: String,
    #[serde(default)]
    pub templates: HashMap<String, Vec<Vec<f32>>>,
    #[serde(default)]
    pub texts: HashMap<Region, Vec<String>>,
}

fn frame_to_point(frame: &[f32]) -> Option<ScreenPoint> {
    match frame {
        [x, y] => Some(ScreenPoint::new(*x, *y, 1.0)),
        [x, y, c, ..] => Some(ScreenPoint::new(*x, *y, *c)),
        _ => None,
    }
}

fn frames_to_points(frames: &[Vec<f32>]) -> Vec<Option<ScreenPoint>> {
    frames.iter().map(|f| frame_to_point(f)).collect()
}

impl ReplayScript {
    pub fn into_game(self) -> ScriptedGame {
        let mut game = ScriptedGame::new();
        for (id, frames) in &self.templates {
            game = game.template(id.clone(), frames_to_points(frames));
        }
        for (region, frames) in self.texts {
            game = game.text(region, frames);
        }
        if !self.markers.is_empty() {
            game = game.markers(self.markers);
        }
        for trigger in self.triggers {
            let mut patch = Patch::new();
            for (id, frames) in &trigger.templates {
                patch = patch.template(id.clone(), frames_to_points(frames));
            }
            for (region, frames) in trigger.texts {
                patch = patch.text(region, frames);
            }
            game = game.on_key(trigger.key, patch);
        }
        game
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_are_sticky() {
        let game = ScriptedGame::new().text(Region::QuestTracker, vec!["a", "b"]);
        assert_eq!(game.read_text(Region::QuestTracker).await, "a");
        assert_eq!(game.read_text(Region::QuestTracker).await, "b");
        assert_eq!(game.read_text(Region::QuestTracker).await, "b");
        assert_eq!(game.read_text(Region::Dialog).await, "");
    }

    #[tokio::test]
    async fn test_key_trigger_applies_patch_once() {
        let game = ScriptedGame::new()
            .template_at("dialog_panel", 0.5, 0.7)
            .on_key("enter", Patch::new().template("dialog_panel", vec![None]));

        assert!(game.find_template("dialog_panel", None).await.is_some());
        game.press_key("enter").await;
        assert!(game.find_template("dialog_panel", None).await.is_none());
        assert_eq!(game.key_presses("enter"), 1);
        assert_eq!(game.lookups("dialog_panel"), 2);
    }

    #[tokio::test]
    async fn test_replay_script_parses() {
        let src = r#"
[templates]
enemy_boar = [[0.4, 0.5], []]

[texts]
quest_tracker = ["师门任务\n消灭野猪x1"]

[[triggers]]
key = "enter"
[triggers.texts]
quest_tracker = [""]
"#;
        let game = ScriptedGame::from_replay(src).unwrap();
        assert!(game.find_template("enemy_boar", None).await.is_some());
        assert!(game.find_template("enemy_boar", None).await.is_none());
        assert!(game.read_text(Region::QuestTracker).await.contains("野猪"));
        game.press_key("enter").await;
        assert_eq!(game.read_text(Region::QuestTracker).await, "");
    }
}
