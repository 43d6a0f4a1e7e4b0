//! 模块管理与调度
//!
//! - **traits**: 模块生命周期接口、工厂目录、钩子边界上的错误/panic 捕获
//! - **source**: 模块来源（编译期目录、module.toml 目录）
//! - **registry**: 扫描、身份冲突、与持久化记录对账
//! - **context**: 交给模块的唯一能力对象
//! - **schedule**: Cron 表达式
//! - **runner**: 每模块一个的调度循环与崩溃隔离
//! - **manager**: 对外的 reload / enable / disable / test 入口

pub mod context;
pub mod manager;
pub mod registry;
pub mod runner;
pub mod schedule;
pub mod source;
pub mod traits;

pub use context::{HostServices, ModuleContext};
pub use manager::{
    ModuleDetail, ModuleManager, ModuleManagerBuilder, ModuleStatus, RenderFormat, TestOutcome,
};
pub use registry::{ModuleRegistry, ReconcileReport};
pub use runner::{CrashNotifier, CrashReport, ModuleRunner, RunnerConfig, RunnerHandle, RunnerPhase};
pub use schedule::CronSchedule;
pub use source::{CatalogSource, DirectorySource, ModuleDescriptor, ModuleSource};
pub use traits::{ModuleCatalog, ModuleFactory, ScraperModule};
