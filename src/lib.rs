//! Hive - 抓取模块的发现、配置与定时调度宿主
//!
//! 模块划分：
//! - **builtin**: 随宿主编译的内置模块（heartbeat）
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 错误分类、时钟、优雅关闭、宿主构建器
//! - **modules**: 模块接口、注册表、上下文、Runner 与 ModuleManager
//! - **observability**: tracing 初始化
//! - **services**: 事件、打标签、结果落库、依赖安装
//! - **store**: SQLite 持久化与 ConfigStore

pub mod builtin;
pub mod config;
pub mod core;
pub mod modules;
pub mod observability;
pub mod services;
pub mod store;

pub use modules::{ModuleCatalog, ModuleContext, ModuleManager, ScraperModule};
