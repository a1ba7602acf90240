//! Questline 回放入口
//!
//! 用法：`questline [config.toml] <replay.toml>`
//! 以脚本化的游戏替身驱动任务链主循环，用于离线排查任务识别与流程问题。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use questline::config::load_config;
use questline::core::ShutdownManager;
use questline::perception::ScriptedGame;
use questline::{observability, QuestRunner};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (config_path, replay_path) = match args.as_slice() {
        [replay] => (None, PathBuf::from(replay)),
        [config, replay] => (Some(PathBuf::from(config)), PathBuf::from(replay)),
        _ => bail!("usage: questline [config.toml] <replay.toml>"),
    };

    let cfg = load_config(config_path).context("Failed to load config")?;
    let source = std::fs::read_to_string(&replay_path)
        .with_context(|| format!("Failed to read replay script {}", replay_path.display()))?;
    let game = Arc::new(ScriptedGame::from_replay(&source).context("Invalid replay script")?);

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    let mut runner = QuestRunner::new(&cfg, game.clone(), game, shutdown.token())
        .context("Failed to build quest runner")?;
    let summary = runner.run().await;

    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
