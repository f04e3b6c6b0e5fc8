//! Kronos CLI
//!
//! 对单条消息执行一次（或续跑一段会话），把事件以 SSE 帧写到标准输出，结束时输出 `data: [DONE]`。
//! Ctrl-C 取消执行，此时不输出结束帧。

use std::io::Write;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use kronos::config::load_config;
use kronos::stream::{encode_frame, DONE_FRAME};
use kronos::tools::Toolkit;
use kronos::{AgentRuntime, RunRequest};

#[derive(Debug, Parser)]
#[command(name = "kronos", version, about = "Run one agent turn and print the SSE stream")]
struct Cli {
    /// 用户消息（--resume 时可省略）
    #[arg(default_value = "")]
    message: String,

    /// 会话 id；省略则新建会话
    #[arg(short = 'c', long = "conversation")]
    conversation_id: Option<String>,

    /// 启用的 toolkit，可重复或逗号分隔（如 gmail,slack）
    #[arg(short, long = "toolkit", value_delimiter = ',')]
    toolkits: Vec<String>,

    #[arg(short, long = "user", env = "KRONOS_USER", default_value = "cli")]
    user_id: String,

    /// 从检查点游标继续执行
    #[arg(long)]
    resume: bool,

    #[arg(long)]
    temperature: Option<f32>,

    #[arg(long)]
    max_tokens: Option<u32>,

    /// 额外的配置文件（覆盖 config/default.toml）
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = load_config(cli.config.clone()).context("Failed to load config")?;
    kronos::observability::init(cfg.app.log_json);

    let runtime = AgentRuntime::from_config(cfg).context("Failed to build agent runtime")?;

    let mut request = RunRequest::new(cli.user_id, cli.message);
    request.conversation_id = cli.conversation_id;
    request.toolkits = cli.toolkits.iter().map(|s| Toolkit::from_slug(s)).collect();
    request.resume = cli.resume;
    request.temperature = cli.temperature;
    request.max_tokens = cli.max_tokens;

    let (mut rx, cancel) = runtime.stream(request);
    let ctrl_c_cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, cancelling run");
            ctrl_c_cancel.cancel();
        }
    });

    let mut stdout = std::io::stdout().lock();
    let mut terminal_seen = false;
    while let Some(event) = rx.recv().await {
        terminal_seen |= event.is_terminal();
        stdout.write_all(encode_frame(&event).as_bytes())?;
        stdout.flush()?;
    }
    if terminal_seen {
        stdout.write_all(DONE_FRAME.as_bytes())?;
        stdout.flush()?;
    }
    Ok(())
}
