//! 宿主错误类型
//!
//! 与 ModuleManager / ModuleRunner 配合：发现期错误只告警跳过，启用期错误同步返回给调用方，
//! 运行期错误在重试上限内重试，超过上限升级为 Fatal 并强制禁用模块。

use thiserror::Error;

/// 持久化层错误（SQLite、序列化、文件系统、脏数据）
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Corrupt row: {0}")]
    Corrupt(String),
}

/// 模块管理与调度过程中的错误分类
#[derive(Error, Debug)]
pub enum ModuleError {
    /// module.toml 缺失必填字段或无法解析
    #[error("Invalid module metadata at {location}: {reason}")]
    Discovery { location: String, reason: String },

    /// 重复的 module_id，保留先扫描到的那一个
    #[error("Duplicate module id '{module_id}' at {location}")]
    Conflict { module_id: String, location: String },

    #[error("Module not found: {0}")]
    NotFound(String),

    /// 预检失败或 enable 钩子失败，启用被拒绝且不改变持久化状态
    #[error("Failed to enable module {module_id}: {reason}")]
    Enable { module_id: String, reason: String },

    /// 运行中的加载 / tick 失败，计入重试
    #[error("Module {module_id} runtime error: {reason}")]
    Runtime { module_id: String, reason: String },

    /// 超过重试上限
    #[error("Module {module_id} crashed: {reason}")]
    Fatal { module_id: String, reason: String },

    #[error("Module code panicked: {0}")]
    Panicked(String),

    #[error("Invalid cron expression '{expr}': {message}")]
    InvalidCron { expr: String, message: String },

    #[error("Invalid config value for '{key}': {reason}")]
    InvalidConfig { key: String, reason: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ModuleError {
    pub fn enable(module_id: &str, reason: impl Into<String>) -> Self {
        Self::Enable {
            module_id: module_id.to_string(),
            reason: reason.into(),
        }
    }

    pub fn runtime(module_id: &str, reason: impl Into<String>) -> Self {
        Self::Runtime {
            module_id: module_id.to_string(),
            reason: reason.into(),
        }
    }
}
