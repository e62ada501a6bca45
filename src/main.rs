//! Kanbot 命令行
//!
//! 入口：初始化日志、加载配置、用示例数据构建工作区与助手，然后逐行读取 stdin 并打印回复。
//! 参数：`--admin`、`--user <name>`、`--session <id>`、`--config <path>`。
//! 输入 `/reset` 清空当前会话，`/exit` 退出。

use std::path::PathBuf;

use anyhow::{bail, Context};
use kanbot::{
    assistant::create_assistant, config::load_config, observability, process::ChatRequest,
    tools::Workspace,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

struct CliArgs {
    admin: bool,
    user: String,
    session: String,
    config: Option<PathBuf>,
}

fn parse_args() -> anyhow::Result<CliArgs> {
    let mut args = CliArgs {
        admin: false,
        user: "usuario".to_string(),
        session: format!("cli-{}", uuid::Uuid::new_v4()),
        config: None,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--admin" => args.admin = true,
            "--user" => args.user = iter.next().context("--user requires a value")?,
            "--session" => args.session = iter.next().context("--session requires a value")?,
            "--config" => {
                args.config = Some(PathBuf::from(
                    iter.next().context("--config requires a value")?,
                ))
            }
            other => bail!("Unknown argument: {other}"),
        }
    }
    Ok(args)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let args = parse_args()?;
    let cfg = load_config(args.config.clone()).context("Failed to load config")?;
    let workspace = Workspace::with_sample_data().await;
    let assistant = create_assistant(&cfg, &workspace).context("Failed to build assistant")?;

    tracing::info!(
        user = %args.user,
        session = %args.session,
        admin = args.admin,
        "Kanbot ready"
    );

    let mut stdout = tokio::io::stdout();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    stdout.write_all(b"> ").await?;
    stdout.flush().await?;

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let message = line.trim();
        match message {
            "" => {}
            "/exit" | "/quit" => break,
            "/reset" => {
                assistant.reset_session(&args.session).await;
                stdout.write_all(b"(sesion reiniciada)\n").await?;
            }
            _ => {
                let mut request = ChatRequest::new(&args.session, &args.user, message).admin(args.admin);
                request.user_name = Some(args.user.clone());
                let reply = assistant.reply(&request).await;
                stdout
                    .write_all(format!("{}\n\n", reply.response).as_bytes())
                    .await?;
            }
        }
        stdout.write_all(b"> ").await?;
        stdout.flush().await?;
    }

    Ok(())
}
