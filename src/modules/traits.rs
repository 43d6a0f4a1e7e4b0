//! 模块接口与编译期目录
//!
//! 宿主对模块代码一无所知，只通过 `ScraperModule` 的固定生命周期钩子与之交互；
//! 具体实现由 `ModuleCatalog` 中按 module_id 登记的工厂函数构造。

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use serde_json::Value;

use crate::core::ModuleError;
use crate::modules::context::ModuleContext;
use crate::store::{ConfigValue, ModuleIdentity};

/// 抓取模块
///
/// 所有钩子都可能失败或 panic，宿主在边界处统一捕获。
#[async_trait]
pub trait ScraperModule: Send + Sync {
    /// 启用钩子，通常在这里声明配置项与定时任务
    async fn enable(&self) -> anyhow::Result<bool> {
        Ok(true)
    }

    async fn disable(&self) -> anyhow::Result<bool> {
        Ok(true)
    }

    /// 预检：连通性 / 可用性检查
    async fn test(&self) -> anyhow::Result<(bool, String)>;

    /// 校验尚未保存的配置
    async fn test_config(
        &self,
        _candidate: &BTreeMap<String, ConfigValue>,
    ) -> anyhow::Result<(bool, String)> {
        Ok((true, "config accepted".to_string()))
    }

    /// 到点执行任务；返回 false 表示本次执行未成功
    async fn execute_scheduled_task(
        &self,
        cron: &str,
        task_key: &str,
        fired_at: DateTime<Utc>,
    ) -> anyhow::Result<bool>;

    fn to_html(&self, _payload: &Value) -> Option<String> {
        None
    }

    fn to_markdown(&self, _payload: &Value) -> Option<String> {
        None
    }
}

/// 模块工厂：以模块专属的 ModuleContext 构造实例
pub type ModuleFactory =
    Arc<dyn Fn(ModuleContext) -> anyhow::Result<Arc<dyn ScraperModule>> + Send + Sync>;

/// 模块钩子的失败形态
#[derive(Debug, thiserror::Error)]
pub enum HookFailure {
    #[error("{0:#}")]
    Failed(anyhow::Error),
    #[error("panicked: {0}")]
    Panicked(String),
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// 执行模块钩子，错误与 panic 都收敛为 HookFailure
pub(crate) async fn guard<T, F>(fut: F) -> Result<T, HookFailure>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(HookFailure::Failed(e)),
        Err(payload) => Err(HookFailure::Panicked(panic_message(payload.as_ref()))),
    }
}

/// 编译进宿主的模块目录
///
/// 内置模块同时登记元数据与工厂；外部模块只登记工厂，元数据来自磁盘上的 module.toml。
#[derive(Default, Clone)]
pub struct ModuleCatalog {
    builtins: Vec<ModuleIdentity>,
    factories: HashMap<String, ModuleFactory>,
}

impl ModuleCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记内置模块
    pub fn register_builtin<F>(&mut self, identity: ModuleIdentity, factory: F) -> &mut Self
    where
        F: Fn(ModuleContext) -> anyhow::Result<Arc<dyn ScraperModule>> + Send + Sync + 'static,
    {
        self.factories
            .insert(identity.module_id.clone(), Arc::new(factory));
        self.builtins.push(identity);
        self
    }

    /// 登记外部模块的实现
    pub fn register_factory<F>(&mut self, module_id: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(ModuleContext) -> anyhow::Result<Arc<dyn ScraperModule>> + Send + Sync + 'static,
    {
        self.factories.insert(module_id.into(), Arc::new(factory));
        self
    }

    pub fn builtins(&self) -> &[ModuleIdentity] {
        &self.builtins
    }

    /// 构造模块实例；工厂缺失、返回错误或 panic 都视为加载失败
    pub fn instantiate(&self, ctx: ModuleContext) -> Result<Arc<dyn ScraperModule>, ModuleError> {
        let module_id = ctx.module_id().to_string();
        let factory = self
            .factories
            .get(&module_id)
            .ok_or_else(|| ModuleError::runtime(&module_id, "no factory registered"))?;

        match std::panic::catch_unwind(AssertUnwindSafe(|| factory(ctx))) {
            Ok(Ok(module)) => Ok(module),
            Ok(Err(e)) => Err(ModuleError::runtime(&module_id, format!("factory failed: {e:#}"))),
            Err(payload) => Err(ModuleError::Panicked(panic_message(payload.as_ref()))),
        }
    }
}

impl std::fmt::Debug for ModuleCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<&String> = self.factories.keys().collect();
        ids.sort();
        f.debug_struct("ModuleCatalog")
            .field("builtins", &self.builtins.len())
            .field("factories", &ids)
            .finish()
    }
}
