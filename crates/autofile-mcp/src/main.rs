use anyhow::{Context, Result};
use autofile_core::ai::{build_provider, PromptsConfig};
use autofile_core::automation::SystemAutomation;
use autofile_core::config::{default_app_dir, load_or_init};
use autofile_core::context::RuntimeContext;
use autofile_core::tools::create_default_registry;
use autofile_core::Orchestrator;
use clap::Parser;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

mod context;
mod protocol;
mod server;

use context::McpContext;
use server::McpServer;

#[derive(Parser, Debug)]
#[command(author, version, about = "Open and close whitelisted files with natural language", long_about = None)]
struct Args {
    /// config.json 路径（默认 <data_dir>/autofile/config.json）
    #[arg(long)]
    config: Option<PathBuf>,

    /// 包含 prompts.json 的资源目录
    #[arg(long)]
    resources: Option<PathBuf>,

    /// 执行一条命令，打印 JSON 结果后退出
    #[arg(long, value_name = "MESSAGE")]
    once: Option<String>,

    /// 日志级别（覆盖 RUST_LOG）
    #[arg(long)]
    log_level: Option<String>,
}

fn init_logging(level: Option<&str>) {
    // 日志必须输出到 stderr，stdout 是 JSON-RPC 通道
    let env_filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };

    fmt()
        .with_env_filter(env_filter)
        .with_ansi(false)
        .with_writer(io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.log_level.as_deref());

    let app_dir = default_app_dir();
    let ctx = Arc::new(McpContext::new(app_dir.clone(), args.resources.clone()));
    let config_path = args.config.clone().unwrap_or_else(|| app_dir.join("config.json"));

    let config = load_or_init(&config_path)
        .with_context(|| format!("无法加载配置: {}", config_path.display()))?;
    let prompts = PromptsConfig::load(ctx.resource_dir().as_deref());
    let model = build_provider(&config.provider).context("初始化语言模型失败")?;
    let backend = Arc::new(SystemAutomation::new(&config.automation));

    let orchestrator = Orchestrator::new(
        &config,
        model,
        backend,
        prompts.file_matching_template(),
        ctx.clone(),
    )
    .context("初始化处理流程失败")?;
    let orchestrator = Arc::new(orchestrator);

    if let Some(message) = args.once {
        let result = orchestrator.process(&message).await;
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    let server = McpServer::new(create_default_registry(orchestrator));
    info!("autofile-mcp server loop ready.");
    serve(server).await
}

async fn serve(server: McpServer) -> Result<()> {
    let mut reader = BufReader::new(tokio::io::stdin());
    let mut stdout = tokio::io::stdout();
    let mut line = String::new();

    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 {
            break; // EOF
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        if let Some(response) = server.handle_line(trimmed).await {
            match serde_json::to_string(&response) {
                Ok(json_str) => {
                    stdout.write_all(json_str.as_bytes()).await?;
                    stdout.write_all(b"\n").await?;
                    stdout.flush().await?;
                }
                Err(e) => error!("Failed to serialize response: {}", e),
            }
        }
    }

    info!("stdin closed, shutting down");
    Ok(())
}
