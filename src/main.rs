//! Hive - 抓取模块宿主
//!
//! 入口：加载配置、初始化日志、扫描模块，并按子命令执行（默认 run：启动已启用模块直到收到关闭信号）。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use hive::core::{create_host_builder, ShutdownCoordinator, ShutdownManager, ShutdownReason};
use hive::modules::ModuleManager;
use hive::observability;

#[derive(Parser, Debug)]
#[command(name = "hive")]
#[command(version)]
#[command(about = "抓取模块宿主：发现、配置、启停与定时调度")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// 配置文件路径（覆盖 config/default.toml）
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 启动所有已启用模块并等待关闭信号
    Run,
    /// 列出模块
    List,
    /// 重新扫描模块目录并对账
    Reload,
    /// 查看模块详情（配置项与任务）
    Show { module_id: String },
    /// 预检通过后启用模块
    Enable { module_id: String },
    /// 禁用模块
    Disable { module_id: String },
    /// 运行模块自检
    Test { module_id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let builder = create_host_builder(cli.config);
    observability::init(&builder.config().log.level);

    let manager = builder.build().context("Failed to open module database")?;
    let report = manager.reload().await.context("Failed to scan modules")?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(manager).await?,
        Command::Reload => println!("{}", serde_json::to_string_pretty(&report)?),
        Command::List => {
            for status in manager.list_modules().await? {
                let record = &status.record;
                println!(
                    "{:<24} {:<10} {:<9} {}",
                    record.module_id(),
                    record.identity.version,
                    if record.is_enabled { "enabled" } else { "disabled" },
                    record.identity.name
                );
            }
        }
        Command::Show { module_id } => {
            let detail = manager.module_detail(&module_id).await?;
            println!("{}", serde_json::to_string_pretty(&detail)?);
        }
        Command::Enable { module_id } => {
            manager.enable(&module_id).await?;
            println!("{module_id} enabled");
            manager.shutdown().await;
        }
        Command::Disable { module_id } => {
            manager.disable(&module_id).await?;
            println!("{module_id} disabled");
        }
        Command::Test { module_id } => {
            let outcome = manager.test(&module_id).await;
            println!("{}: {}", if outcome.success { "ok" } else { "failed" }, outcome.message);
            if !outcome.success {
                std::process::exit(1);
            }
        }
    }
    Ok(())
}

async fn run(manager: Arc<ModuleManager>) -> anyhow::Result<()> {
    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    let started = manager.start_enabled().await?;
    tracing::info!(modules = ?started, "Hive running, press Ctrl+C to stop");

    let mut reasons = shutdown.subscribe();
    shutdown.wait_for_shutdown().await;
    let reason = reasons.try_recv().unwrap_or(ShutdownReason::UserInitiated);
    tracing::info!(?reason, "Shutting down");

    let mut coordinator = ShutdownCoordinator::new();
    coordinator.register(manager.clone());
    coordinator.register(Arc::new(manager.database().clone()));
    let completed = coordinator.run_cleanup().await;
    tracing::info!(completed, "Shutdown complete");
    Ok(())
}
