//! 集成测试共用：可编排行为的模块与宿主搭建

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use hive::core::{AnchoredClock, Clock};
use hive::modules::{ModuleCatalog, ModuleContext, ModuleManager, RunnerPhase, ScraperModule};
use hive::services::MemoryEventSink;
use hive::store::{ConfigDeclaration, ConfigValue, Database, TaskDeclaration};

/// 一次任务执行：(task_key, 计划触发时间, 实际执行时的时钟)
pub type Firing = (String, DateTime<Utc>, DateTime<Utc>);

/// 模块行为脚本，测试中可随时修改
pub struct Script {
    pub test_ok: AtomicBool,
    pub enable_ok: AtomicBool,
    /// 第几个实例之后的构造全部失败（0 表示不失败）
    pub fail_after_instances: AtomicUsize,
    pub tasks: Vec<(String, String)>,
    pub task_duration: Duration,
    pub instances: AtomicUsize,
    pub disable_calls: AtomicUsize,
    pub fired: Mutex<Vec<Firing>>,
    pub clock: Arc<dyn Clock>,
}

impl Script {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            test_ok: AtomicBool::new(true),
            enable_ok: AtomicBool::new(true),
            fail_after_instances: AtomicUsize::new(0),
            tasks: Vec::new(),
            task_duration: Duration::ZERO,
            instances: AtomicUsize::new(0),
            disable_calls: AtomicUsize::new(0),
            fired: Mutex::new(Vec::new()),
            clock,
        }
    }

    pub fn with_task(mut self, key: &str, cron: &str) -> Self {
        self.tasks.push((key.to_string(), cron.to_string()));
        self
    }

    pub fn with_task_duration(mut self, duration: Duration) -> Self {
        self.task_duration = duration;
        self
    }

    pub fn fired(&self) -> Vec<Firing> {
        self.fired.lock().unwrap().clone()
    }

    pub fn instances(&self) -> usize {
        self.instances.load(Ordering::SeqCst)
    }
}

pub struct ScriptedModule {
    ctx: ModuleContext,
    script: Arc<Script>,
    instance_no: usize,
}

#[async_trait]
impl ScraperModule for ScriptedModule {
    async fn enable(&self) -> anyhow::Result<bool> {
        self.ctx.set_config(
            ConfigDeclaration::new("endpoint", ConfigValue::Text("https://example.org".into()))
                .with_pattern("^https://"),
        )?;
        self.ctx.set_config(
            ConfigDeclaration::new("mode", ConfigValue::Select("fast".into()))
                .with_options(vec!["fast".into(), "slow".into()]),
        )?;
        for (key, cron) in &self.script.tasks {
            self.ctx
                .set_task(TaskDeclaration::new(key.as_str()).with_cron(cron.as_str()))?;
        }
        Ok(self.script.enable_ok.load(Ordering::SeqCst))
    }

    async fn disable(&self) -> anyhow::Result<bool> {
        self.script.disable_calls.fetch_add(1, Ordering::SeqCst);
        Ok(true)
    }

    async fn test(&self) -> anyhow::Result<(bool, String)> {
        if self.script.test_ok.load(Ordering::SeqCst) {
            Ok((true, format!("instance {}", self.instance_no)))
        } else {
            Ok((false, "upstream unreachable".to_string()))
        }
    }

    async fn test_config(
        &self,
        candidate: &BTreeMap<String, ConfigValue>,
    ) -> anyhow::Result<(bool, String)> {
        match candidate.get("mode").and_then(ConfigValue::as_str) {
            Some("slow") => Ok((false, "slow mode is not supported here".to_string())),
            _ => Ok((true, "looks good".to_string())),
        }
    }

    async fn execute_scheduled_task(
        &self,
        _cron: &str,
        task_key: &str,
        fired_at: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let started = self.script.clock.now();
        self.script
            .fired
            .lock()
            .unwrap()
            .push((task_key.to_string(), fired_at, started));
        if !self.script.task_duration.is_zero() {
            tokio::time::sleep(self.script.task_duration).await;
        }
        Ok(true)
    }
}

pub fn register(catalog: &mut ModuleCatalog, module_id: &str, script: Arc<Script>) {
    catalog.register_factory(module_id, move |ctx| {
        let n = script.instances.fetch_add(1, Ordering::SeqCst) + 1;
        let limit = script.fail_after_instances.load(Ordering::SeqCst);
        if limit > 0 && n > limit {
            anyhow::bail!("cannot import module (instance {n})");
        }
        Ok(Arc::new(ScriptedModule {
            ctx,
            script: script.clone(),
            instance_no: n,
        }) as Arc<dyn ScraperModule>)
    });
}

pub fn write_module(root: &Path, module_id: &str) {
    let dir = root.join(module_id);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(
        dir.join("module.toml"),
        format!("[module]\nid = \"{module_id}\"\nname = \"{module_id}\"\nversion = \"1.0.0\"\n"),
    )
    .unwrap();
}

pub fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, h, m, s).unwrap()
}

pub struct Host {
    pub manager: Arc<ModuleManager>,
    pub events: Arc<MemoryEventSink>,
    pub clock: Arc<AnchoredClock>,
    pub db: Database,
}

pub fn host(catalog: ModuleCatalog, external: &Path, start: DateTime<Utc>) -> Host {
    host_on(Database::open_in_memory().unwrap(), catalog, external, start)
}

pub fn host_on(db: Database, catalog: ModuleCatalog, external: &Path, start: DateTime<Utc>) -> Host {
    let events = Arc::new(MemoryEventSink::new());
    let clock = Arc::new(AnchoredClock::starting_at(start));
    let manager = ModuleManager::builder(db.clone(), catalog)
        .external_dir(external)
        .with_events(events.clone())
        .with_clock(clock.clone())
        .build();
    Host {
        manager,
        events,
        clock,
        db,
    }
}

/// 等待 Runner 进入指定阶段（最多约 5 秒）
pub async fn wait_for_phase(manager: &ModuleManager, module_id: &str, phase: RunnerPhase) -> bool {
    for _ in 0..500 {
        if manager.runner_phase(module_id).await == Some(phase) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
