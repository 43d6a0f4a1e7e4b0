//! 宿主构建器：从 AppConfig 组装数据库、协作方与 ModuleManager
//!
//! CLI 与嵌入方共用同一套初始化逻辑。

use std::path::PathBuf;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::StoreError;
use crate::modules::{ModuleCatalog, ModuleManager};
use crate::services::{
    Classifier, CommandInstaller, DependencyInstaller, DisabledInstaller, EventSink,
    KeywordClassifier, LogEventSink,
};
use crate::store::Database;

/// 宿主构建器
pub struct HostBuilder {
    config: AppConfig,
    catalog: ModuleCatalog,
    events: Arc<dyn EventSink>,
    in_memory: bool,
}

impl HostBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            catalog: crate::builtin::catalog(),
            events: Arc::new(LogEventSink),
            in_memory: false,
        }
    }

    /// 追加外部模块工厂（元数据仍来自磁盘）
    pub fn with_catalog(mut self, f: impl FnOnce(&mut ModuleCatalog)) -> Self {
        f(&mut self.catalog);
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// 使用内存数据库（一次性命令 / 测试）
    pub fn in_memory(mut self, in_memory: bool) -> Self {
        self.in_memory = in_memory;
        self
    }

    pub fn build_database(&self) -> Result<Database, StoreError> {
        if self.in_memory {
            Database::open_in_memory()
        } else {
            Database::open(self.config.db_path())
        }
    }

    pub fn build_classifier(&self) -> Arc<dyn Classifier> {
        Arc::new(KeywordClassifier::new(self.config.classifier.rules.clone()))
    }

    pub fn build_installer(&self) -> Arc<dyn DependencyInstaller> {
        let section = &self.config.installer;
        if !section.enabled {
            return Arc::new(DisabledInstaller);
        }
        Arc::new(CommandInstaller::new(
            section.program.clone(),
            section.args.clone(),
            self.config.installer_root(),
        ))
    }

    /// 构建 ModuleManager（尚未 reload，也未启动任何 Runner）
    pub fn build(self) -> Result<Arc<ModuleManager>, StoreError> {
        let db = self.build_database()?;
        let classifier = self.build_classifier();
        let installer = self.build_installer();
        let runner = &self.config.runner;

        let mut builder = ModuleManager::builder(db, self.catalog)
            .with_classifier(classifier)
            .with_installer(installer)
            .with_events(self.events)
            .with_runner_config(runner.runner_config())
            .with_stop_timeout(runner.stop_timeout());
        for dir in &self.config.modules.builtin_dirs {
            builder = builder.builtin_dir(dir.clone());
        }
        for dir in &self.config.modules.external_dirs {
            builder = builder.external_dir(dir.clone());
        }
        Ok(builder.build())
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}

/// 便捷函数：加载配置并创建 HostBuilder
pub fn create_host_builder(config_path: Option<PathBuf>) -> HostBuilder {
    let config = crate::config::load_config(config_path).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });
    HostBuilder::new(config)
}
