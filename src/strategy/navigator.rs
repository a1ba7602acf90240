//! 目标定位与小地图导航
//!
//! 屏幕上找不到目标时，读取小地图标记并朝标记方向移动，再重新轮询；
//! 无标记时受 locate_timeout 约束（TargetNotFound），有标记时受 navigation_timeout 约束（NavigationTimeout）。

use tokio::time::Instant;

use crate::core::FailureReason;
use crate::perception::{MoveVector, Region, ScreenPoint};
use crate::strategy::ExecutionContext;
use crate::task::AssetCategory;

/// 所有任务共用的任务目标标记
const QUEST_MARKER: &str = "quest";

/// 如何在屏幕上识别目标
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetSpec {
    /// 模板匹配
    Template(String),
    /// OCR 文字（名字标注）
    Text(String),
}

impl TargetSpec {
    /// 资产表中有模板就用模板，否则退回 OCR
    pub fn resolve(ctx: &ExecutionContext, categories: &[AssetCategory], name: &str) -> Self {
        categories
            .iter()
            .find_map(|c| ctx.assets.resolve(*c, name))
            .map(|id| TargetSpec::Template(id.to_string()))
            .unwrap_or_else(|| TargetSpec::Text(name.to_string()))
    }

    pub fn is_template(&self) -> bool {
        matches!(self, TargetSpec::Template(_))
    }
}

/// 定位结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Located {
    /// 模板命中，可点击
    At(ScreenPoint),
    /// 文字可见，无精确坐标
    Visible,
}

/// 定位器：marker_kind 为小地图上对应的标记类型（enemy / resource / npc）
pub struct Navigator<'a> {
    ctx: &'a ExecutionContext,
    marker_kind: &'a str,
}

impl<'a> Navigator<'a> {
    pub fn new(ctx: &'a ExecutionContext, marker_kind: &'a str) -> Self {
        Self { ctx, marker_kind }
    }

    /// 单次探测，不移动
    pub async fn probe(&self, spec: &TargetSpec) -> Option<Located> {
        match spec {
            TargetSpec::Template(id) => self
                .ctx
                .perception
                .find_template(id, Some(Region::Screen))
                .await
                .map(Located::At),
            TargetSpec::Text(name) => {
                let text = self.ctx.perception.read_text(Region::Screen).await;
                text.contains(name.as_str()).then_some(Located::Visible)
            }
        }
    }

    /// 定位目标，必要时沿小地图导航
    pub async fn locate(&self, spec: &TargetSpec) -> Result<Located, FailureReason> {
        let locate_deadline = self.ctx.deadline(self.ctx.settings.locate_timeout_ms);
        let nav_deadline = self.ctx.deadline(self.ctx.settings.navigation_timeout_ms);
        let mut navigated = false;

        loop {
            if self.ctx.is_dead().await {
                return Err(FailureReason::CharacterDied);
            }
            if let Some(found) = self.probe(spec).await {
                return Ok(found);
            }
            tracing::debug!(spec = ?spec, "Target not on screen");

            if self.ctx.is_cancelled() {
                return Err(FailureReason::TargetNotFound);
            }

            let now = Instant::now();
            match self.nearest_marker().await {
                Some(angle) => {
                    if now >= nav_deadline {
                        tracing::warn!(spec = ?spec, "Navigation timed out");
                        return Err(FailureReason::NavigationTimeout);
                    }
                    navigated = true;
                    self.ctx
                        .actuator
                        .move_direction(
                            MoveVector::from_angle(angle),
                            self.ctx.settings.navigation_step_ms,
                        )
                        .await;
                }
                None if now >= locate_deadline => {
                    return Err(if navigated {
                        FailureReason::NavigationTimeout
                    } else {
                        FailureReason::TargetNotFound
                    });
                }
                None => {}
            }

            self.ctx.poll_pause().await;
        }
    }

    async fn nearest_marker(&self) -> Option<f32> {
        self.ctx
            .perception
            .read_minimap_markers()
            .await
            .into_iter()
            .filter(|m| m.kind == self.marker_kind || m.kind == QUEST_MARKER)
            .min_by(|a, b| a.relative_distance.total_cmp(&b.relative_distance))
            .map(|m| m.relative_angle)
    }
}

/// 模板命中则点击目标，否则按切换目标键
pub async fn engage(ctx: &ExecutionContext, located: Located) {
    match located {
        Located::At(p) => ctx.actuator.click_screen(p.x, p.y).await,
        Located::Visible => ctx.press(&ctx.keys.target).await,
    }
}

/// 走到可交互目标旁：模板命中则点击（寻路），文字可见时已在附近
pub async fn approach(ctx: &ExecutionContext, located: Located) {
    if let Located::At(p) = located {
        ctx.actuator.click_screen(p.x, p.y).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::config::AppConfig;
    use crate::perception::{MinimapMarker, ScriptedGame};

    fn context(game: Arc<ScriptedGame>) -> ExecutionContext {
        ExecutionContext::new(game.clone(), game, &AppConfig::default(), CancellationToken::new())
    }

    #[tokio::test(start_paused = true)]
    async fn test_found_immediately() {
        let game = Arc::new(ScriptedGame::new().template_at("ore_iron", 0.4, 0.6));
        let ctx = context(game.clone());
        let nav = Navigator::new(&ctx, "resource");
        let located = nav
            .locate(&TargetSpec::Template("ore_iron".into()))
            .await
            .unwrap();
        assert!(matches!(located, Located::At(p) if (p.x - 0.4).abs() < 1e-6));
        assert_eq!(game.moves(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_without_markers() {
        let game = Arc::new(ScriptedGame::new());
        let ctx = context(game.clone());
        let started = Instant::now();
        let err = Navigator::new(&ctx, "resource")
            .locate(&TargetSpec::Template("ore_iron".into()))
            .await
            .unwrap_err();
        assert_eq!(err, FailureReason::TargetNotFound);
        assert!(started.elapsed().as_millis() as u64 >= ctx.settings.locate_timeout_ms);
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigates_toward_marker_then_finds() {
        let game = Arc::new(
            ScriptedGame::new()
                .template("ore_iron", vec![None, None, Some(crate::perception::ScreenPoint::new(0.5, 0.5, 0.9))])
                .markers(vec![vec![MinimapMarker {
                    kind: "resource".into(),
                    relative_angle: 45.0,
                    relative_distance: 0.3,
                }]]),
        );
        let ctx = context(game.clone());
        let located = Navigator::new(&ctx, "resource")
            .locate(&TargetSpec::Template("ore_iron".into()))
            .await
            .unwrap();
        assert!(matches!(located, Located::At(_)));
        assert_eq!(game.moves(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_marker_never_reached_times_out() {
        let game = Arc::new(ScriptedGame::new().markers(vec![vec![MinimapMarker {
            kind: "quest".into(),
            relative_angle: -30.0,
            relative_distance: 0.8,
        }]]));
        let ctx = context(game.clone());
        let err = Navigator::new(&ctx, "npc")
            .locate(&TargetSpec::Text("王掌柜".into()))
            .await
            .unwrap_err();
        assert_eq!(err, FailureReason::NavigationTimeout);
        assert!(game.moves() > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_death_during_search() {
        let game = Arc::new(ScriptedGame::new().template(
            "dead_indicator",
            vec![None, Some(crate::perception::ScreenPoint::new(0.5, 0.5, 0.9))],
        ));
        let ctx = context(game);
        let err = Navigator::new(&ctx, "enemy")
            .locate(&TargetSpec::Template("enemy_boar".into()))
            .await
            .unwrap_err();
        assert_eq!(err, FailureReason::CharacterDied);
    }
}
