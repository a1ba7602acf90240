//! 完成核验：任务栏为空并不可信，必须以日程面板上的条目状态为准

use serde::Serialize;

use crate::perception::{templates, Region};
use crate::strategy::ExecutionContext;

/// 日程条目状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Completed,
    Available,
    Unknown,
}

/// 日程面板快照（只读）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SchedulePanelState {
    pub entry_label: String,
    pub entry_status: EntryStatus,
}

impl SchedulePanelState {
    /// 从面板 OCR 文字中找到 chain_name 所在条目并判断状态
    ///
    /// 状态文字可能与名称同行，也可能在下一行。
    pub fn parse(panel_text: &str, chain_name: &str) -> Self {
        let lines: Vec<&str> = panel_text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();

        let Some(pos) = lines.iter().position(|l| l.contains(chain_name)) else {
            return Self {
                entry_label: String::new(),
                entry_status: EntryStatus::Unknown,
            };
        };

        let label = lines[pos];
        let mut status = entry_status_of(label);
        if status == EntryStatus::Unknown {
            if let Some(next) = lines.get(pos + 1).filter(|l| !l.contains(chain_name)) {
                status = entry_status_of(next);
            }
        }
        Self {
            entry_label: label.to_string(),
            entry_status: status,
        }
    }
}

fn entry_status_of(text: &str) -> EntryStatus {
    // "未完成" 包含 "完成"，先判可参与
    if ["未完成", "参与", "前往", "进行中"].iter().any(|k| text.contains(k)) {
        EntryStatus::Available
    } else if ["已完成", "完成", "领取"].iter().any(|k| text.contains(k)) {
        EntryStatus::Completed
    } else {
        EntryStatus::Unknown
    }
}

/// 核验结论
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    /// 面板确认已完成
    Completed,
    /// 未确认完成，已尝试重新参与
    Reentered(EntryStatus),
}

/// 完成核验器
#[derive(Debug, Clone)]
pub struct CompletionVerifier {
    chain_name: String,
    check_interval_ms: u64,
}

impl CompletionVerifier {
    /// chain_name 为日程面板上的条目名
    pub fn new(chain_name: impl Into<String>, check_interval_ms: u64) -> Self {
        Self {
            chain_name: chain_name.into(),
            check_interval_ms,
        }
    }

    /// 打开日程面板并读取本链条目
    pub async fn read_panel(&self, ctx: &ExecutionContext) -> SchedulePanelState {
        match ctx
            .perception
            .find_template(templates::SCHEDULE_BUTTON, Some(Region::Screen))
            .await
        {
            Some(btn) => ctx.actuator.click_screen(btn.x, btn.y).await,
            None => ctx.press(&ctx.keys.schedule).await,
        }
        ctx.sleep_ms(self.check_interval_ms).await;

        let text = ctx.perception.read_text(Region::SchedulePanel).await;
        SchedulePanelState::parse(&text, &self.chain_name)
    }

    /// 核验；未完成时点击「参与」重新接取
    pub async fn verify(&self, ctx: &ExecutionContext) -> Verdict {
        let panel = self.read_panel(ctx).await;
        tracing::info!(
            chain = %self.chain_name,
            entry = %panel.entry_label,
            status = ?panel.entry_status,
            "Schedule panel read"
        );

        if panel.entry_status == EntryStatus::Completed {
            ctx.press(&ctx.keys.close).await;
            return Verdict::Completed;
        }
        if panel.entry_label.is_empty() {
            tracing::warn!(chain = %self.chain_name, "Chain entry not found in schedule");
        }

        match ctx
            .perception
            .find_template(templates::ACCEPT_BUTTON, Some(Region::SchedulePanel))
            .await
        {
            Some(btn) => {
                ctx.actuator.click_screen(btn.x, btn.y).await;
                tracing::info!(chain = %self.chain_name, "Clicked participate");
            }
            None => tracing::warn!(chain = %self.chain_name, "Participate button not found"),
        }
        ctx.press(&ctx.keys.close).await;
        Verdict::Reentered(panel.entry_status)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::config::AppConfig;
    use crate::perception::{ActuatorCall, ScriptedGame};

    fn context(game: Arc<ScriptedGame>) -> ExecutionContext {
        ExecutionContext::new(game.clone(), game, &AppConfig::default(), CancellationToken::new())
    }

    #[test]
    fn test_parse_same_line() {
        let p = SchedulePanelState::parse("活跃度 80\n师门任务 10/10 已完成\n帮派任务 参与", "师门任务");
        assert_eq!(p.entry_status, EntryStatus::Completed);
        assert!(p.entry_label.contains("师门任务"));
    }

    #[test]
    fn test_parse_status_on_next_line() {
        let p = SchedulePanelState::parse("师门任务\n参与\n帮派任务\n已完成", "师门任务");
        assert_eq!(p.entry_status, EntryStatus::Available);
    }

    #[test]
    fn test_parse_unfinished_is_available() {
        let p = SchedulePanelState::parse("师门任务 未完成", "师门任务");
        assert_eq!(p.entry_status, EntryStatus::Available);
    }

    #[test]
    fn test_parse_missing_entry() {
        let p = SchedulePanelState::parse("帮派任务 已完成", "师门任务");
        assert_eq!(p.entry_status, EntryStatus::Unknown);
        assert!(p.entry_label.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_verify_completed_closes_panel() {
        let game = Arc::new(ScriptedGame::new().text(Region::SchedulePanel, vec!["师门任务 已完成"]));
        let ctx = context(game.clone());
        let verdict = CompletionVerifier::new("师门任务", 2000).verify(&ctx).await;
        assert_eq!(verdict, Verdict::Completed);
        assert_eq!(game.key_presses("l"), 1);
        assert_eq!(game.key_presses("escape"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_verify_available_clicks_participate() {
        let game = Arc::new(
            ScriptedGame::new()
                .text(Region::SchedulePanel, vec!["师门任务 参与"])
                .template_at("accept_button", 0.7, 0.3),
        );
        let ctx = context(game.clone());
        let verdict = CompletionVerifier::new("师门任务", 2000).verify(&ctx).await;
        assert_eq!(verdict, Verdict::Reentered(EntryStatus::Available));
        assert!(game
            .calls()
            .contains(&ActuatorCall::Click { x: 0.7, y: 0.3 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_panel_is_never_completed() {
        let game = Arc::new(ScriptedGame::new());
        let ctx = context(game);
        let verdict = CompletionVerifier::new("师门任务", 2000).verify(&ctx).await;
        assert_eq!(verdict, Verdict::Reentered(EntryStatus::Unknown));
    }
}
