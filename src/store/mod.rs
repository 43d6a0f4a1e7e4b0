//! 持久化层
//!
//! - **database**: SQLite 连接、建表、事务、模块记录 CRUD
//! - **config_store**: 按模块隔离的配置项 / 定时任务存储
//! - **records**: 数据模型（身份、记录、带类型的配置值、任务）

pub mod config_store;
pub mod database;
pub mod records;

pub use config_store::ConfigStore;
pub use database::Database;
pub use records::{
    ConfigDeclaration, ConfigEntry, ConfigOrigin, ConfigType, ConfigValue, ModuleIdentity,
    ModuleRecord, SourceKind, TaskDeclaration, TaskEntry,
};
