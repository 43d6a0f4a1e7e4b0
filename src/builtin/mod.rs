//! 随宿主编译的内置模块

pub mod heartbeat;

use crate::modules::ModuleCatalog;

/// 包含全部内置模块的目录；外部模块的工厂由嵌入方继续登记
pub fn catalog() -> ModuleCatalog {
    let mut catalog = ModuleCatalog::new();
    catalog.register_builtin(heartbeat::identity(), heartbeat::Heartbeat::factory);
    catalog
}
