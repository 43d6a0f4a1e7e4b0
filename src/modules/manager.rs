//! 模块管理器
//!
//! 持有注册表、配置存储和所有运行中的 Runner，对外提供 reload / enable / disable / test 等操作。
//! 同一模块的启停操作互斥（按 module_id 加锁），不同模块之间互不阻塞。

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{json, Value};

use crate::core::{Clock, ModuleError, ShutdownCleanup, SystemClock};
use crate::modules::context::{HostServices, ModuleContext};
use crate::modules::registry::{ModuleRegistry, ReconcileReport};
use crate::modules::runner::{
    CrashNotifier, CrashReport, ModuleRunner, RunnerConfig, RunnerEnv, RunnerHandle, RunnerPhase,
};
use crate::modules::schedule::CronSchedule;
use crate::modules::source::{CatalogSource, DirectorySource, ModuleSource};
use crate::modules::traits::{guard, ModuleCatalog, ScraperModule};
use crate::services::{
    Classifier, DependencyInstaller, DisabledInstaller, EventCategory, EventLevel, EventSink,
    HostEvent, KeywordClassifier, LogEventSink, ResultSink, SqliteResultSink,
};
use crate::store::{
    ConfigEntry, ConfigStore, ConfigValue, Database, ModuleRecord, SourceKind, TaskEntry,
};

/// test / test_config 的结果，message 可直接展示给运营方
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestOutcome {
    pub success: bool,
    pub message: String,
}

impl TestOutcome {
    fn pass(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/// 列表视图中的一行
#[derive(Debug, Clone, Serialize)]
pub struct ModuleStatus {
    #[serde(flatten)]
    pub record: ModuleRecord,
    pub phase: Option<RunnerPhase>,
    pub last_crash: Option<CrashReport>,
}

/// 详情视图
#[derive(Debug, Clone, Serialize)]
pub struct ModuleDetail {
    #[serde(flatten)]
    pub status: ModuleStatus,
    pub configs: Vec<ConfigEntry>,
    pub tasks: Vec<TaskEntry>,
    /// task_key -> 接下来的触发时间（未调度或表达式非法的任务不出现）
    pub upcoming: BTreeMap<String, Vec<DateTime<Utc>>>,
}

/// 详情视图中每个任务展示的触发时间个数
const UPCOMING_FIRES: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderFormat {
    Html,
    Markdown,
}

pub struct ModuleManagerBuilder {
    db: Database,
    catalog: ModuleCatalog,
    builtin_dirs: Vec<PathBuf>,
    external_dirs: Vec<PathBuf>,
    classifier: Option<Arc<dyn Classifier>>,
    results: Option<Arc<dyn ResultSink>>,
    installer: Option<Arc<dyn DependencyInstaller>>,
    events: Option<Arc<dyn EventSink>>,
    clock: Option<Arc<dyn Clock>>,
    runner_config: RunnerConfig,
    stop_timeout: Duration,
}

impl ModuleManagerBuilder {
    pub fn new(db: Database, catalog: ModuleCatalog) -> Self {
        Self {
            db,
            catalog,
            builtin_dirs: Vec::new(),
            external_dirs: Vec::new(),
            classifier: None,
            results: None,
            installer: None,
            events: None,
            clock: None,
            runner_config: RunnerConfig::default(),
            stop_timeout: Duration::from_secs(5),
        }
    }

    pub fn builtin_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.builtin_dirs.push(dir.into());
        self
    }

    pub fn external_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.external_dirs.push(dir.into());
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn with_results(mut self, results: Arc<dyn ResultSink>) -> Self {
        self.results = Some(results);
        self
    }

    pub fn with_installer(mut self, installer: Arc<dyn DependencyInstaller>) -> Self {
        self.installer = Some(installer);
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_runner_config(mut self, config: RunnerConfig) -> Self {
        self.runner_config = config;
        self
    }

    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    pub fn build(self) -> Arc<ModuleManager> {
        let events = self.events.unwrap_or_else(|| Arc::new(LogEventSink));
        let catalog = Arc::new(self.catalog);

        // 扫描优先级：编译期目录 → 内置目录 → 外部目录
        let mut sources: Vec<Box<dyn ModuleSource>> =
            vec![Box::new(CatalogSource::new(Arc::clone(&catalog)))];
        sources.extend(
            self.builtin_dirs
                .into_iter()
                .map(|d| Box::new(DirectorySource::new(d, SourceKind::BuiltIn)) as Box<dyn ModuleSource>),
        );
        sources.extend(
            self.external_dirs
                .into_iter()
                .map(|d| Box::new(DirectorySource::new(d, SourceKind::External)) as Box<dyn ModuleSource>),
        );

        let services = HostServices {
            store: ConfigStore::new(self.db.clone()),
            classifier: self
                .classifier
                .unwrap_or_else(|| Arc::new(KeywordClassifier::default())),
            results: self
                .results
                .unwrap_or_else(|| Arc::new(SqliteResultSink::new(self.db.clone()))),
            installer: self.installer.unwrap_or_else(|| Arc::new(DisabledInstaller)),
            events: Arc::clone(&events),
        };

        Arc::new_cyclic(|weak: &Weak<ModuleManager>| {
            let notifier: Weak<dyn CrashNotifier> = weak.clone();
            ModuleManager {
                registry: ModuleRegistry::new(sources, Arc::clone(&events)),
                runner_env: RunnerEnv {
                    catalog: Arc::clone(&catalog),
                    store: services.store.clone(),
                    clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
                    config: self.runner_config,
                    events: Arc::clone(&events),
                    notifier,
                },
                db: self.db,
                catalog,
                services,
                events,
                stop_timeout: self.stop_timeout,
                runners: tokio::sync::Mutex::new(HashMap::new()),
                module_locks: Mutex::new(HashMap::new()),
                crashes: Mutex::new(HashMap::new()),
                capabilities: RwLock::new(BTreeMap::new()),
            }
        })
    }
}

pub struct ModuleManager {
    db: Database,
    registry: ModuleRegistry,
    catalog: Arc<ModuleCatalog>,
    services: HostServices,
    events: Arc<dyn EventSink>,
    runner_env: RunnerEnv,
    stop_timeout: Duration,
    runners: tokio::sync::Mutex<HashMap<String, RunnerHandle>>,
    /// 按 module_id 的启停临界区
    module_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    crashes: Mutex<HashMap<String, CrashReport>>,
    /// module_id -> 已声明的任务键
    capabilities: RwLock<BTreeMap<String, Vec<String>>>,
}

impl ModuleManager {
    pub fn builder(db: Database, catalog: ModuleCatalog) -> ModuleManagerBuilder {
        ModuleManagerBuilder::new(db, catalog)
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config_store(&self) -> &ConfigStore {
        &self.services.store
    }

    fn module_lock(&self, module_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.module_locks.lock().unwrap_or_else(|p| p.into_inner());
        Arc::clone(locks.entry(module_id.to_string()).or_default())
    }

    fn emit(&self, level: EventLevel, event_type: &str, module_id: &str, summary: String, details: Value) {
        self.events
            .record(HostEvent::module(level, event_type, module_id, summary).with_details(details));
    }

    fn context_for(&self, module_id: &str) -> ModuleContext {
        let requirements = self
            .registry
            .get(module_id)
            .and_then(|d| d.requirements);
        self.services.context_for(module_id, requirements)
    }

    /// 存在且未被软删除的模块记录
    fn live_record(&self, module_id: &str) -> Result<ModuleRecord, ModuleError> {
        match self.db.get_module(module_id)? {
            Some(record) if !record.is_deleted => Ok(record),
            _ => Err(ModuleError::NotFound(module_id.to_string())),
        }
    }

    async fn runner_alive(&self, module_id: &str) -> bool {
        self.runners
            .lock()
            .await
            .get(module_id)
            .is_some_and(|h| !h.is_finished())
    }

    async fn running_instance(&self, module_id: &str) -> Option<Arc<dyn ScraperModule>> {
        self.runners
            .lock()
            .await
            .get(module_id)
            .filter(|h| !h.is_finished())
            .and_then(|h| h.instance())
    }

    /// 重新扫描并对账；不会启动或停止任何 Runner
    pub async fn reload(&self) -> Result<ReconcileReport, ModuleError> {
        let descriptors = self.registry.scan(true);
        let report = self.registry.reconcile(&descriptors, &self.db)?;

        let mut capabilities = BTreeMap::new();
        for record in self.db.list_modules(false)? {
            let tasks = self.services.store.list_tasks(record.module_id())?;
            capabilities.insert(record.module_id().to_string(), tasks.into_keys().collect());
        }
        *self.capabilities.write().unwrap_or_else(|p| p.into_inner()) = capabilities;

        for module_id in &report.removed {
            self.emit(
                EventLevel::Warning,
                "module_removed",
                module_id,
                format!("Module {module_id} disappeared and was disabled"),
                Value::Null,
            );
        }
        self.events.record(
            HostEvent::new(EventLevel::Normal, EventCategory::System, "modules_reloaded", "Modules reloaded")
                .with_details(serde_json::to_value(&report).unwrap_or(Value::Null)),
        );
        Ok(report)
    }

    /// 预检 → enable 钩子 → 标记启用 → 启动 Runner
    ///
    /// 预检或钩子失败时返回 Enable 错误，is_enabled 不变。
    pub async fn enable(&self, module_id: &str) -> Result<(), ModuleError> {
        let lock = self.module_lock(module_id);
        let _guard = lock.lock().await;

        let record = self.live_record(module_id)?;
        if record.is_enabled && self.runner_alive(module_id).await {
            tracing::debug!(module_id, "Module already enabled and running");
            return Ok(());
        }

        if let Err(e) = self.prepare(module_id).await {
            tracing::warn!(module_id, error = %e, "Enable rejected");
            self.emit(
                EventLevel::Warning,
                "module_enable_failed",
                module_id,
                e.to_string(),
                Value::Null,
            );
            return Err(e);
        }

        self.db.set_module_enabled(module_id, true)?;
        self.crashes
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(module_id);
        self.spawn_runner(module_id).await;

        tracing::info!(module_id, "Module enabled");
        self.emit(
            EventLevel::Normal,
            "module_enabled",
            module_id,
            format!("Module {module_id} enabled"),
            Value::Null,
        );
        Ok(())
    }

    async fn prepare(&self, module_id: &str) -> Result<(), ModuleError> {
        let module = self
            .catalog
            .instantiate(self.context_for(module_id))
            .map_err(|e| ModuleError::enable(module_id, e.to_string()))?;

        match guard(module.test()).await {
            Ok((true, _)) => {}
            Ok((false, message)) => {
                return Err(ModuleError::enable(module_id, format!("pre-flight test failed: {message}")))
            }
            Err(f) => return Err(ModuleError::enable(module_id, format!("pre-flight test failed: {f}"))),
        }

        match guard(module.enable()).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(ModuleError::enable(module_id, "enable hook returned false")),
            Err(f) => Err(ModuleError::enable(module_id, format!("enable hook failed: {f}"))),
        }
    }

    async fn spawn_runner(&self, module_id: &str) {
        let runner = ModuleRunner::new(self.context_for(module_id), self.runner_env.clone());
        let handle = runner.spawn();
        tracing::info!(module_id, run_id = %handle.run_id, "Runner spawned");
        let previous = self
            .runners
            .lock()
            .await
            .insert(module_id.to_string(), handle);
        if let Some(previous) = previous {
            previous.stop(self.stop_timeout).await;
        }
    }

    /// 停止 Runner 并标记禁用（幂等）
    pub async fn disable(&self, module_id: &str) -> Result<(), ModuleError> {
        let lock = self.module_lock(module_id);
        let _guard = lock.lock().await;

        let record = self
            .db
            .get_module(module_id)?
            .ok_or_else(|| ModuleError::NotFound(module_id.to_string()))?;

        let handle = self.runners.lock().await.remove(module_id);
        let was_running = handle.is_some();
        let mut instance = None;
        if let Some(handle) = handle {
            instance = handle.instance();
            if !handle.stop(self.stop_timeout).await {
                tracing::warn!(module_id, "Runner was forcibly terminated");
            }
        }

        if was_running || record.is_enabled {
            let instance = match instance {
                Some(instance) => Some(instance),
                None => self.catalog.instantiate(self.context_for(module_id)).ok(),
            };
            if let Some(instance) = instance {
                match guard(instance.disable()).await {
                    Ok(true) => {}
                    Ok(false) => tracing::warn!(module_id, "Disable hook returned false"),
                    Err(f) => tracing::warn!(module_id, error = %f, "Disable hook failed"),
                }
            }
        }

        self.db.set_module_enabled(module_id, false)?;
        if record.is_enabled || was_running {
            tracing::info!(module_id, "Module disabled");
            self.emit(
                EventLevel::Normal,
                "module_disabled",
                module_id,
                format!("Module {module_id} disabled"),
                Value::Null,
            );
        }
        Ok(())
    }

    /// 运行模块自检；优先使用运行中的实例，不修改任何持久化状态
    pub async fn test(&self, module_id: &str) -> TestOutcome {
        let module = match self.instance_for_check(module_id).await {
            Ok(module) => module,
            Err(e) => return TestOutcome::fail(e.to_string()),
        };
        match guard(module.test()).await {
            Ok((true, message)) => TestOutcome::pass(message),
            Ok((false, message)) => TestOutcome::fail(message),
            Err(f) => TestOutcome::fail(format!("test failed: {f}")),
        }
    }

    /// 校验尚未保存的配置：已有声明时先按类型 / 选项 / 正则检查，再交给模块自己的校验钩子
    pub async fn test_config(
        &self,
        module_id: &str,
        candidate: &BTreeMap<String, ConfigValue>,
    ) -> TestOutcome {
        let declared = match self.services.store.list_configs(module_id) {
            Ok(declared) => declared,
            Err(e) => return TestOutcome::fail(e.to_string()),
        };
        // 首次启用前尚无声明，只能交给模块自己判断
        if !declared.is_empty() {
            for (key, value) in candidate {
                let Some(entry) = declared.get(key) else {
                    return TestOutcome::fail(format!("unknown config key '{key}'"));
                };
                if let Err(e) = entry.validate(value) {
                    return TestOutcome::fail(e.to_string());
                }
            }
        }

        let module = match self.instance_for_check(module_id).await {
            Ok(module) => module,
            Err(e) => return TestOutcome::fail(e.to_string()),
        };
        match guard(module.test_config(candidate)).await {
            Ok((true, message)) => TestOutcome::pass(message),
            Ok((false, message)) => TestOutcome::fail(message),
            Err(f) => TestOutcome::fail(format!("config check failed: {f}")),
        }
    }

    async fn instance_for_check(&self, module_id: &str) -> Result<Arc<dyn ScraperModule>, ModuleError> {
        self.live_record(module_id)?;
        if let Some(module) = self.running_instance(module_id).await {
            return Ok(module);
        }
        self.catalog.instantiate(self.context_for(module_id))
    }

    /// 模块自带的渲染钩子
    pub async fn render(&self, module_id: &str, payload: &Value, format: RenderFormat) -> Option<String> {
        let module = self.instance_for_check(module_id).await.ok()?;
        match format {
            RenderFormat::Html => module.to_html(payload),
            RenderFormat::Markdown => module.to_markdown(payload),
        }
    }

    /// 启动已启用模块的 Runner（不做预检）；已有存活 Runner 时不重复启动
    pub async fn start(&self, module_id: &str) -> Result<(), ModuleError> {
        let lock = self.module_lock(module_id);
        let _guard = lock.lock().await;

        let record = self.live_record(module_id)?;
        if !record.is_enabled {
            return Err(ModuleError::runtime(module_id, "module is not enabled"));
        }
        if !self.runner_alive(module_id).await {
            self.spawn_runner(module_id).await;
        }
        Ok(())
    }

    /// 进程启动时恢复所有已启用模块，返回成功启动的 module_id
    pub async fn start_enabled(&self) -> Result<Vec<String>, ModuleError> {
        let mut started = Vec::new();
        for record in self.db.list_modules(false)? {
            if !record.is_enabled {
                continue;
            }
            match self.start(record.module_id()).await {
                Ok(()) => started.push(record.module_id().to_string()),
                Err(e) => tracing::warn!(module_id = %record.module_id(), error = %e, "Failed to start module"),
            }
        }
        tracing::info!(count = started.len(), "Enabled modules started");
        Ok(started)
    }

    pub async fn runner_phase(&self, module_id: &str) -> Option<RunnerPhase> {
        self.runners.lock().await.get(module_id).map(|h| h.phase())
    }

    pub fn last_crash(&self, module_id: &str) -> Option<CrashReport> {
        self.crashes
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(module_id)
            .cloned()
    }

    /// 上次 reload 时各模块声明的任务键
    pub fn capabilities(&self) -> BTreeMap<String, Vec<String>> {
        self.capabilities
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub async fn list_modules(&self) -> Result<Vec<ModuleStatus>, ModuleError> {
        let records = self.db.list_modules(false)?;
        let mut statuses = Vec::with_capacity(records.len());
        for record in records {
            let phase = self.runner_phase(record.module_id()).await;
            let last_crash = self.last_crash(record.module_id());
            statuses.push(ModuleStatus {
                record,
                phase,
                last_crash,
            });
        }
        Ok(statuses)
    }

    pub async fn module_detail(&self, module_id: &str) -> Result<ModuleDetail, ModuleError> {
        let record = self.live_record(module_id)?;
        let configs = self.services.store.list_configs(module_id)?.into_values().collect();
        let tasks: Vec<TaskEntry> = self.services.store.list_tasks(module_id)?.into_values().collect();
        let now = self.runner_env.clock.now();
        let upcoming = tasks
            .iter()
            .filter_map(|task| {
                let schedule = CronSchedule::parse(task.cron_expression.as_deref()?).ok()?;
                Some((task.task_key.clone(), schedule.upcoming(now, UPCOMING_FIRES)))
            })
            .collect();
        Ok(ModuleDetail {
            status: ModuleStatus {
                record,
                phase: self.runner_phase(module_id).await,
                last_crash: self.last_crash(module_id),
            },
            configs,
            tasks,
            upcoming,
        })
    }

    /// 运营方修改配置值
    pub fn update_config(
        &self,
        module_id: &str,
        key: &str,
        value: ConfigValue,
    ) -> Result<ConfigEntry, ModuleError> {
        self.live_record(module_id)?;
        let entry = self.services.store.set_config_value(module_id, key, value)?;
        self.emit(
            EventLevel::Normal,
            "config_changed",
            module_id,
            format!("Config {key} of module {module_id} updated"),
            json!({ "key": key, "type": entry.config_type() }),
        );
        Ok(entry)
    }

    /// 运营方修改任务调度；Runner 在下一个 tick 发现变化并重新计算触发时间
    pub fn update_task_cron(
        &self,
        module_id: &str,
        task_key: &str,
        cron: Option<&str>,
    ) -> Result<TaskEntry, ModuleError> {
        self.live_record(module_id)?;
        let task = self.services.store.set_task_cron(module_id, task_key, cron)?;
        self.emit(
            EventLevel::Normal,
            "config_changed",
            module_id,
            format!("Schedule of task {task_key} of module {module_id} updated"),
            json!({ "task_key": task_key, "cron": cron }),
        );
        Ok(task)
    }

    /// 停止全部 Runner（有界等待，超时强制终止），返回被强制终止的数量
    pub async fn shutdown(&self) -> usize {
        let handles: Vec<RunnerHandle> = self.runners.lock().await.drain().map(|(_, h)| h).collect();
        if handles.is_empty() {
            return 0;
        }
        tracing::info!(count = handles.len(), "Stopping module runners");
        let timeout = self.stop_timeout;
        let results =
            futures_util::future::join_all(handles.into_iter().map(|h| h.stop(timeout))).await;
        let aborted = results.iter().filter(|graceful| !**graceful).count();
        if aborted > 0 {
            tracing::warn!(aborted, "Some runners were forcibly terminated");
        }
        aborted
    }
}

#[async_trait]
impl CrashNotifier for ModuleManager {
    /// Runner 放弃后调用：回收 Runner、强制禁用并上报
    async fn notify_crashed(&self, report: CrashReport) {
        let module_id = report.module_id.clone();
        let lock = self.module_lock(&module_id);
        let _guard = lock.lock().await;

        let handle = {
            let mut runners = self.runners.lock().await;
            match runners.get(&module_id) {
                Some(h) if h.run_id == report.run_id => runners.remove(&module_id),
                _ => None,
            }
        };
        let Some(handle) = handle else {
            tracing::debug!(module_id = %module_id, run_id = %report.run_id, "Ignoring crash report from a replaced runner");
            return;
        };
        handle.stop(self.stop_timeout).await;

        if let Err(e) = self.db.set_module_enabled(&module_id, false) {
            tracing::error!(module_id = %module_id, error = %e, "Failed to persist crash-disable");
        }

        let err = ModuleError::Fatal {
            module_id: module_id.clone(),
            reason: report.reason.clone(),
        };
        tracing::error!(attempts = report.attempts, "{err}");
        self.emit(
            EventLevel::Fatal,
            "module_crashed",
            &module_id,
            err.to_string(),
            json!({
                "attempts": report.attempts,
                "run_id": report.run_id.to_string(),
                "reason": report.reason,
            }),
        );
        self.crashes
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(module_id, report);
    }
}

#[async_trait]
impl ShutdownCleanup for ModuleManager {
    async fn cleanup(&self) -> anyhow::Result<()> {
        self.shutdown().await;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "module_manager"
    }
}
