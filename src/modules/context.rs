//! 模块上下文
//!
//! 模块与宿主之间唯一的通道：所有操作都绑定在自己的 module_id 上，
//! 模块拿不到 ConfigStore、注册表或其它模块的上下文。

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;

use crate::core::ModuleError;
use crate::services::{
    Classifier, DependencyInstaller, EventLevel, EventSink, HostEvent, ResultSink, SaveStatus, Tag,
};
use crate::store::{ConfigDeclaration, ConfigEntry, ConfigStore, ConfigValue, TaskDeclaration, TaskEntry};

/// 宿主侧共享的协作方，由 ModuleManager 持有并为每个模块派生上下文
#[derive(Clone)]
pub struct HostServices {
    pub store: ConfigStore,
    pub classifier: Arc<dyn Classifier>,
    pub results: Arc<dyn ResultSink>,
    pub installer: Arc<dyn DependencyInstaller>,
    pub events: Arc<dyn EventSink>,
}

impl HostServices {
    pub fn context_for(&self, module_id: &str, requirements: Option<PathBuf>) -> ModuleContext {
        ModuleContext {
            module_id: Arc::from(module_id),
            requirements,
            services: self.clone(),
        }
    }
}

/// 单个模块可用的能力集合
#[derive(Clone)]
pub struct ModuleContext {
    module_id: Arc<str>,
    requirements: Option<PathBuf>,
    services: HostServices,
}

impl ModuleContext {
    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    /// 声明配置项（已有值默认保留）
    pub fn set_config(&self, decl: ConfigDeclaration) -> Result<ConfigEntry, ModuleError> {
        self.services.store.declare_config(&self.module_id, &decl)
    }

    pub fn get_config(&self, key: &str) -> Result<Option<ConfigValue>, ModuleError> {
        Ok(self.services.store.get_config(&self.module_id, key)?)
    }

    /// 读取文本类配置，缺失时返回 None
    pub fn get_text(&self, key: &str) -> Result<Option<String>, ModuleError> {
        Ok(self
            .get_config(key)?
            .and_then(|v| v.as_str().map(str::to_string)))
    }

    pub fn drop_config(&self, key: &str) -> Result<(), ModuleError> {
        Ok(self.services.store.drop_config(&self.module_id, key)?)
    }

    pub fn list_configs(&self) -> Result<BTreeMap<String, ConfigEntry>, ModuleError> {
        Ok(self.services.store.list_configs(&self.module_id)?)
    }

    /// 声明定时任务（已有 cron 默认保留）
    pub fn set_task(&self, decl: TaskDeclaration) -> Result<TaskEntry, ModuleError> {
        self.services.store.declare_task(&self.module_id, &decl)
    }

    pub fn get_task(&self, key: &str) -> Result<Option<TaskEntry>, ModuleError> {
        Ok(self.services.store.get_task(&self.module_id, key)?)
    }

    pub fn drop_task(&self, key: &str) -> Result<(), ModuleError> {
        Ok(self.services.store.drop_task(&self.module_id, key)?)
    }

    pub fn list_tasks(&self) -> Result<BTreeMap<String, TaskEntry>, ModuleError> {
        Ok(self.services.store.list_tasks(&self.module_id)?)
    }

    /// 给文本打标签；分类器失败时返回空列表
    pub async fn mark_message_tag(&self, text: &str) -> Vec<Tag> {
        match self.services.classifier.tag(text).await {
            Ok(tags) => tags,
            Err(e) => {
                tracing::warn!(module_id = %self.module_id, error = %e, "Classifier failed, no tags applied");
                Vec::new()
            }
        }
    }

    /// 保存结构化结果；fingerprint 相同的结果只保存一次
    pub async fn save_structured_results(
        &self,
        payload: Value,
        fingerprint: Option<String>,
    ) -> anyhow::Result<SaveStatus> {
        self.services
            .results
            .save(&self.module_id, payload, fingerprint)
            .await
    }

    /// 安装本模块的私有依赖；没有依赖描述时返回 false
    pub async fn install_dependencies(&self) -> Result<bool, ModuleError> {
        let Some(requirements) = &self.requirements else {
            return Ok(false);
        };
        match self
            .services
            .installer
            .install(&self.module_id, requirements)
            .await
        {
            Ok(()) => Ok(true),
            Err(e) => {
                self.services.events.record(
                    HostEvent::module(
                        EventLevel::Warning,
                        "dependency_install_failed",
                        &self.module_id,
                        format!("Dependency installation failed: {e:#}"),
                    )
                    .with_details(serde_json::json!({
                        "requirements": requirements.display().to_string(),
                    })),
                );
                Err(ModuleError::runtime(&self.module_id, format!("{e:#}")))
            }
        }
    }
}

impl std::fmt::Debug for ModuleContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleContext")
            .field("module_id", &self.module_id)
            .field("requirements", &self.requirements)
            .finish()
    }
}
