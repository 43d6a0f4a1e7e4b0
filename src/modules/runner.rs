//! 模块运行器
//!
//! 每个启用的模块一个独立的 tokio 任务：
//!
//! ```text
//! Created → Loading → Active ⇄ ExecutingTask → Stopped
//!              │          │
//!              └──────────┴─→ (失败计数达到上限) CrashDisabled
//! ```
//!
//! - 加载失败或 tick 级基础设施错误计入 retry_count，暂停后重新加载；完整跑完一个 tick 后清零
//! - 任务自身的错误 / panic / 返回 false 只记录告警，不计入重试
//! - 停止请求在下一次 tick 开始时（或睡眠中立即）被观察到

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::core::{Clock, ModuleError};
use crate::modules::context::ModuleContext;
use crate::modules::schedule::CronSchedule;
use crate::modules::traits::{guard, HookFailure, ModuleCatalog, ScraperModule};
use crate::services::{EventCategory, EventLevel, EventSink, HostEvent};
use crate::store::ConfigStore;

/// 运行器参数
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// 两次 tick 之间的最长睡眠
    pub max_poll_interval: Duration,
    /// 睡眠下限，避免忙等
    pub min_sleep: Duration,
    /// 失败次数达到该值即进入 CrashDisabled
    pub max_retries: u32,
    /// 两次加载尝试之间的暂停
    pub retry_pause: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_poll_interval: Duration::from_secs(60),
            min_sleep: Duration::from_millis(200),
            max_retries: 3,
            retry_pause: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunnerPhase {
    Created,
    Loading,
    Active,
    ExecutingTask,
    Stopped,
    CrashDisabled,
}

impl RunnerPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunnerPhase::Stopped | RunnerPhase::CrashDisabled)
    }
}

/// 运行器放弃时上报的信息
#[derive(Debug, Clone, Serialize)]
pub struct CrashReport {
    pub module_id: String,
    pub run_id: Uuid,
    pub reason: String,
    pub attempts: u32,
    pub at: DateTime<Utc>,
}

/// 接收崩溃通知的一方（ModuleManager）
#[async_trait]
pub trait CrashNotifier: Send + Sync {
    async fn notify_crashed(&self, report: CrashReport);
}

/// 运行器共享的宿主依赖
#[derive(Clone)]
pub struct RunnerEnv {
    pub catalog: Arc<ModuleCatalog>,
    pub store: ConfigStore,
    pub clock: Arc<dyn Clock>,
    pub config: RunnerConfig,
    pub events: Arc<dyn EventSink>,
    pub notifier: Weak<dyn CrashNotifier>,
}

pub type InstanceSlot = Arc<RwLock<Option<Arc<dyn ScraperModule>>>>;

/// 运行器的内存状态，只归运行器自己所有
#[derive(Debug, Default)]
struct RunnerState {
    retry_count: u32,
    is_crashed: bool,
    next_fire: HashMap<String, DateTime<Utc>>,
    last_cron: HashMap<String, String>,
    schedules: HashMap<String, CronSchedule>,
    /// 已告警过的非法 cron，避免每个 tick 重复告警
    broken_cron: HashSet<String>,
}

impl RunnerState {
    fn forget(&mut self, task_key: &str) {
        self.next_fire.remove(task_key);
        self.last_cron.remove(task_key);
        self.schedules.remove(task_key);
    }
}

pub struct ModuleRunner {
    module_id: String,
    run_id: Uuid,
    context: ModuleContext,
    env: RunnerEnv,
    instance: InstanceSlot,
    phase: watch::Sender<RunnerPhase>,
    cancel: CancellationToken,
}

/// 运行器句柄，由 ModuleManager 持有
pub struct RunnerHandle {
    pub module_id: String,
    pub run_id: Uuid,
    cancel: CancellationToken,
    join: JoinHandle<()>,
    instance: InstanceSlot,
    phase: watch::Receiver<RunnerPhase>,
}

impl RunnerHandle {
    pub fn phase(&self) -> RunnerPhase {
        *self.phase.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<RunnerPhase> {
        self.phase.clone()
    }

    /// 当前已加载的实例
    pub fn instance(&self) -> Option<Arc<dyn ScraperModule>> {
        self.instance
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// 请求停止并等待至多 `timeout`；超时则强制终止，返回 false
    pub async fn stop(mut self, timeout: Duration) -> bool {
        self.cancel.cancel();
        match tokio::time::timeout(timeout, &mut self.join).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::error!(module_id = %self.module_id, error = %e, "Runner task ended abnormally");
                true
            }
            Err(_) => {
                tracing::warn!(
                    module_id = %self.module_id,
                    timeout_ms = timeout.as_millis() as u64,
                    "Runner did not stop in time, aborting"
                );
                self.join.abort();
                false
            }
        }
    }
}

impl ModuleRunner {
    pub fn new(context: ModuleContext, env: RunnerEnv) -> Self {
        let (phase, _) = watch::channel(RunnerPhase::Created);
        Self {
            module_id: context.module_id().to_string(),
            run_id: Uuid::new_v4(),
            context,
            env,
            instance: Arc::new(RwLock::new(None)),
            phase,
            cancel: CancellationToken::new(),
        }
    }

    /// 在 tokio 上启动运行循环
    pub fn spawn(self) -> RunnerHandle {
        let span = tracing::info_span!("runner", module_id = %self.module_id, run_id = %self.run_id);
        let module_id = self.module_id.clone();
        let run_id = self.run_id;
        let cancel = self.cancel.clone();
        let instance = Arc::clone(&self.instance);
        let phase = self.phase.subscribe();
        let join = tokio::spawn(self.run().instrument(span));
        RunnerHandle {
            module_id,
            run_id,
            cancel,
            join,
            instance,
            phase,
        }
    }

    fn set_phase(&self, phase: RunnerPhase) {
        let previous = self.phase.send_replace(phase);
        if previous != phase {
            tracing::trace!(from = ?previous, to = ?phase, "Runner phase changed");
        }
    }

    fn set_instance(&self, module: Option<Arc<dyn ScraperModule>>) {
        *self.instance.write().unwrap_or_else(|p| p.into_inner()) = module;
    }

    async fn run(self) {
        let mut state = RunnerState::default();
        tracing::info!("Runner started");

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            self.set_phase(RunnerPhase::Loading);
            let failure = match self.env.catalog.instantiate(self.context.clone()) {
                Ok(module) => {
                    self.set_instance(Some(Arc::clone(&module)));
                    self.set_phase(RunnerPhase::Active);
                    tracing::info!(attempt = state.retry_count + 1, "Module loaded");
                    let outcome = self.poll(&module, &mut state).await;
                    self.set_instance(None);
                    match outcome {
                        Ok(()) => break,
                        Err(e) => e,
                    }
                }
                Err(e) => e,
            };

            state.retry_count += 1;
            tracing::error!(
                error = %failure,
                error_debug = ?failure,
                retry_count = state.retry_count,
                max_retries = self.env.config.max_retries,
                "Module runner failure"
            );

            state.is_crashed = state.retry_count >= self.env.config.max_retries;
            if state.is_crashed {
                self.crash(&state, failure);
                return;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.env.config.retry_pause) => {}
            }
        }

        self.set_phase(RunnerPhase::Stopped);
        tracing::info!("Runner stopped");
    }

    /// 进入 CrashDisabled 并通知管理器（通知在独立任务中执行，管理器可以安全地回收本运行器）
    fn crash(&self, state: &RunnerState, failure: ModuleError) {
        self.set_phase(RunnerPhase::CrashDisabled);
        let report = CrashReport {
            module_id: self.module_id.clone(),
            run_id: self.run_id,
            reason: failure.to_string(),
            attempts: state.retry_count,
            at: self.env.clock.now(),
        };
        tracing::error!(attempts = report.attempts, reason = %report.reason, "Module crash-disabled");

        let notifier = self.env.notifier.clone();
        tokio::spawn(async move {
            match notifier.upgrade() {
                Some(notifier) => notifier.notify_crashed(report).await,
                None => tracing::warn!(module_id = %report.module_id, "Crash notifier gone, report dropped"),
            }
        });
    }

    /// 轮询循环；返回 Ok 表示收到停止请求，Err 表示 tick 级失败
    async fn poll(
        &self,
        module: &Arc<dyn ScraperModule>,
        state: &mut RunnerState,
    ) -> Result<(), ModuleError> {
        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }

            let tasks = self.env.store.list_tasks(&self.module_id)?;
            state
                .next_fire
                .retain(|key, _| tasks.contains_key(key));
            state.last_cron.retain(|key, _| tasks.contains_key(key));
            state.schedules.retain(|key, _| tasks.contains_key(key));

            for (key, task) in &tasks {
                let Some(expr) = task.cron_expression.as_deref().filter(|e| !e.trim().is_empty()) else {
                    state.forget(key);
                    continue;
                };

                if state.last_cron.get(key).map(String::as_str) != Some(expr) {
                    state.forget(key);
                    state.last_cron.insert(key.clone(), expr.to_string());
                    match CronSchedule::parse(expr) {
                        Ok(schedule) => {
                            state.broken_cron.remove(key);
                            state.schedules.insert(key.clone(), schedule);
                        }
                        Err(e) => {
                            if state.broken_cron.insert(key.clone()) {
                                tracing::warn!(task_key = %key, error = %e, "Task has an invalid schedule, skipping");
                            }
                        }
                    }
                }

                let Some(schedule) = state.schedules.get(key) else {
                    continue;
                };

                let now = self.env.clock.now();
                let next = match state.next_fire.get(key) {
                    Some(next) => *next,
                    None => match schedule.next_after(now) {
                        Some(next) => {
                            tracing::debug!(task_key = %key, next = %next, "Scheduled next fire");
                            state.next_fire.insert(key.clone(), next);
                            next
                        }
                        None => continue,
                    },
                };

                if now >= next {
                    self.set_phase(RunnerPhase::ExecutingTask);
                    self.execute(module, expr, key, next).await;
                    self.set_phase(RunnerPhase::Active);

                    // 从当前时间重新计算，错过的触发点不补跑
                    match schedule.next_after(self.env.clock.now()) {
                        Some(after) => {
                            state.next_fire.insert(key.clone(), after);
                        }
                        None => {
                            state.next_fire.remove(key);
                        }
                    }
                }
            }

            // 完整跑完一个 tick 视为恢复，重试只统计连续失败
            if state.retry_count > 0 {
                tracing::info!(previous_failures = state.retry_count, "Runner recovered, failure count reset");
                state.retry_count = 0;
            }

            let sleep = self.sleep_duration(state);
            tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(sleep) => {}
            }
        }
    }

    fn sleep_duration(&self, state: &RunnerState) -> Duration {
        let config = &self.env.config;
        let now = self.env.clock.now();
        let until_soonest = state
            .next_fire
            .values()
            .min()
            .map(|next| (*next - now).to_std().unwrap_or(Duration::ZERO));

        let sleep = match until_soonest {
            Some(d) => d.min(config.max_poll_interval),
            None => config.max_poll_interval,
        };
        sleep.max(config.min_sleep)
    }

    async fn execute(
        &self,
        module: &Arc<dyn ScraperModule>,
        cron: &str,
        task_key: &str,
        fired_at: DateTime<Utc>,
    ) {
        let started = tokio::time::Instant::now();
        tracing::info!(task_key, cron, fired_at = %fired_at, "Executing scheduled task");

        let problem = match guard(module.execute_scheduled_task(cron, task_key, fired_at)).await {
            Ok(true) => None,
            Ok(false) => Some("task reported failure".to_string()),
            Err(HookFailure::Failed(e)) => Some(format!("{e:#}")),
            Err(HookFailure::Panicked(msg)) => Some(format!("task panicked: {msg}")),
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match problem {
            None => tracing::info!(task_key, elapsed_ms, "Task finished"),
            Some(reason) => {
                tracing::warn!(task_key, elapsed_ms, reason = %reason, "Task failed");
                self.env.events.record(
                    HostEvent::new(
                        EventLevel::Warning,
                        EventCategory::Task,
                        "task_failed",
                        format!("Task {task_key} of module {} failed: {reason}", self.module_id),
                    )
                    .with_source(self.module_id.as_str())
                    .with_details(serde_json::json!({
                        "task_key": task_key,
                        "cron": cron,
                        "fired_at": fired_at,
                        "run_id": self.run_id.to_string(),
                    })),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{AnchoredClock, StoreError};
    use crate::modules::context::HostServices;
    use crate::services::{DisabledInstaller, KeywordClassifier, MemoryEventSink, SqliteResultSink};
    use crate::store::{Database, TaskDeclaration};
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    type Fired = Arc<Mutex<Vec<(String, DateTime<Utc>)>>>;

    struct Recorder {
        fired: Fired,
        fail: bool,
    }

    #[async_trait]
    impl ScraperModule for Recorder {
        async fn test(&self) -> anyhow::Result<(bool, String)> {
            Ok((true, "ok".into()))
        }

        async fn execute_scheduled_task(
            &self,
            _cron: &str,
            task_key: &str,
            fired_at: DateTime<Utc>,
        ) -> anyhow::Result<bool> {
            self.fired.lock().unwrap().push((task_key.to_string(), fired_at));
            if self.fail {
                anyhow::bail!("upstream returned 500");
            }
            Ok(true)
        }
    }

    #[derive(Default)]
    struct CountingNotifier {
        calls: AtomicU32,
    }

    #[async_trait]
    impl CrashNotifier for CountingNotifier {
        async fn notify_crashed(&self, _report: CrashReport) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Harness {
        db: Database,
        store: ConfigStore,
        services: HostServices,
        events: Arc<MemoryEventSink>,
        notifier: Arc<CountingNotifier>,
        clock: Arc<AnchoredClock>,
    }

    fn harness(start: DateTime<Utc>) -> Harness {
        let db = Database::open_in_memory().unwrap();
        let store = ConfigStore::new(db.clone());
        let events = Arc::new(MemoryEventSink::new());
        let services = HostServices {
            store: store.clone(),
            classifier: Arc::new(KeywordClassifier::default()),
            results: Arc::new(SqliteResultSink::new(db.clone())),
            installer: Arc::new(DisabledInstaller),
            events: events.clone(),
        };
        Harness {
            db,
            store,
            services,
            events,
            notifier: Arc::new(CountingNotifier::default()),
            clock: Arc::new(AnchoredClock::starting_at(start)),
        }
    }

    impl Harness {
        fn runner(&self, module_id: &str, catalog: ModuleCatalog) -> ModuleRunner {
            let notifier: Weak<dyn CrashNotifier> = Arc::downgrade(&self.notifier) as Weak<dyn CrashNotifier>;
            let env = RunnerEnv {
                catalog: Arc::new(catalog),
                store: self.store.clone(),
                clock: self.clock.clone(),
                config: RunnerConfig::default(),
                events: self.events.clone(),
                notifier,
            };
            ModuleRunner::new(self.services.context_for(module_id, None), env)
        }
    }

    fn recorder_catalog(module_id: &str, fired: Fired, fail: bool) -> ModuleCatalog {
        let mut catalog = ModuleCatalog::new();
        catalog.register_factory(module_id, move |_ctx| {
            Ok(Arc::new(Recorder {
                fired: fired.clone(),
                fail,
            }) as Arc<dyn ScraperModule>)
        });
        catalog
    }

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, h, m, s).unwrap()
    }

    /// 每次构造都计数的目录
    fn counting_catalog(module_id: &str, loads: Arc<AtomicU32>) -> ModuleCatalog {
        let mut catalog = ModuleCatalog::new();
        catalog.register_factory(module_id, move |_ctx| {
            loads.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(Recorder {
                fired: Arc::default(),
                fail: false,
            }) as Arc<dyn ScraperModule>)
        });
        catalog
    }

    /// 让任务表暂时不可读，tick 中的 list_tasks 随之失败
    fn park_tasks_table(db: &Database, parked: bool) {
        let sql = if parked {
            "ALTER TABLE module_tasks RENAME TO module_tasks_parked"
        } else {
            "ALTER TABLE module_tasks_parked RENAME TO module_tasks"
        };
        db.with_conn(|conn| conn.execute_batch(sql).map_err(StoreError::from))
            .unwrap();
    }

    async fn wait_until(mut done: impl FnMut() -> bool) {
        for _ in 0..600 {
            if done() {
                return;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_fire_waits_for_next_boundary() {
        let h = harness(at(0, 0, 30));
        h.store
            .declare_task("news_x", &TaskDeclaration::new("fetch").with_cron("*/1 * * * *"))
            .unwrap();
        let fired: Fired = Arc::default();
        let handle = h
            .runner("news_x", recorder_catalog("news_x", fired.clone(), false))
            .spawn();

        tokio::time::sleep(Duration::from_secs(29)).await;
        assert!(fired.lock().unwrap().is_empty());
        assert_eq!(handle.phase(), RunnerPhase::Active);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(*fired.lock().unwrap(), vec![("fetch".to_string(), at(0, 1, 0))]);

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(fired.lock().unwrap().len(), 2);
        assert_eq!(fired.lock().unwrap()[1].1, at(0, 2, 0));

        assert!(handle.stop(Duration::from_secs(5)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_failures_crash_after_three_attempts() {
        let h = harness(at(0, 0, 0));
        let attempts = Arc::new(AtomicU32::new(0));
        let mut catalog = ModuleCatalog::new();
        let counter = attempts.clone();
        catalog.register_factory("broken", move |_ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("missing dependency")
        });

        let handle = h.runner("broken", catalog).spawn();
        let mut phase = handle.subscribe();
        tokio::time::sleep(Duration::from_secs(120)).await;

        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert_eq!(h.notifier.calls.load(Ordering::SeqCst), 1);
        assert_eq!(*phase.borrow_and_update(), RunnerPhase::CrashDisabled);
        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_task_failures_do_not_count_as_crashes() {
        let h = harness(at(0, 0, 0));
        h.store
            .declare_task("flaky", &TaskDeclaration::new("fetch").with_cron("*/1 * * * *"))
            .unwrap();
        let fired: Fired = Arc::default();
        let handle = h
            .runner("flaky", recorder_catalog("flaky", fired.clone(), true))
            .spawn();

        tokio::time::sleep(Duration::from_secs(5 * 60 + 1)).await;
        assert_eq!(fired.lock().unwrap().len(), 5);
        assert_eq!(handle.phase(), RunnerPhase::Active);
        assert_eq!(h.events.of_type("task_failed").len(), 5);
        assert_eq!(h.notifier.calls.load(Ordering::SeqCst), 0);

        assert!(handle.stop(Duration::from_secs(5)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_schedule_edit_recomputes_next_fire() {
        let h = harness(at(0, 0, 0));
        h.store
            .declare_task("news", &TaskDeclaration::new("fetch").with_cron("0 * * * *"))
            .unwrap();
        let fired: Fired = Arc::default();
        let handle = h
            .runner("news", recorder_catalog("news", fired.clone(), false))
            .spawn();

        tokio::time::sleep(Duration::from_secs(10 * 60)).await;
        h.store
            .set_task_cron("news", "fetch", Some("*/15 * * * *"))
            .unwrap();

        tokio::time::sleep(Duration::from_secs(6 * 60)).await;
        assert_eq!(*fired.lock().unwrap(), vec![("fetch".to_string(), at(0, 15, 0))]);

        assert!(handle.stop(Duration::from_secs(5)).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_while_sleeping() {
        let h = harness(at(0, 0, 0));
        let fired: Fired = Arc::default();
        let handle = h
            .runner("idle", recorder_catalog("idle", fired, false))
            .spawn();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(handle.instance().is_some());

        let mut phase = handle.subscribe();
        assert!(handle.stop(Duration::from_secs(5)).await);
        assert_eq!(*phase.borrow_and_update(), RunnerPhase::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreadable_store_counts_as_runner_failure() {
        let h = harness(at(0, 0, 0));
        h.store
            .declare_task("news", &TaskDeclaration::new("fetch").with_cron("0 * * * *"))
            .unwrap();
        let loads = Arc::new(AtomicU32::new(0));
        let handle = h.runner("news", counting_catalog("news", loads.clone())).spawn();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(handle.phase(), RunnerPhase::Active);

        park_tasks_table(&h.db, true);
        tokio::time::sleep(Duration::from_secs(5 * 60)).await;

        // 每次失败后重新加载，第三次失败放弃
        assert_eq!(loads.load(Ordering::SeqCst), 3);
        assert_eq!(handle.phase(), RunnerPhase::CrashDisabled);
        assert_eq!(h.notifier.calls.load(Ordering::SeqCst), 1);
        assert!(handle.is_finished());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_count_resets_after_clean_tick() {
        let h = harness(at(0, 0, 0));
        h.store
            .declare_task("news", &TaskDeclaration::new("fetch").with_cron("0 * * * *"))
            .unwrap();
        let loads = Arc::new(AtomicU32::new(0));
        let handle = h.runner("news", counting_catalog("news", loads.clone())).spawn();
        tokio::time::sleep(Duration::from_secs(1)).await;

        for round in 1..=3u32 {
            park_tasks_table(&h.db, true);
            // tick 失败后实例被卸下，暂停期间恢复存储
            wait_until(|| handle.instance().is_none()).await;
            park_tasks_table(&h.db, false);
            wait_until(|| handle.instance().is_some()).await;
            assert_eq!(loads.load(Ordering::SeqCst), round + 1);
        }

        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(handle.phase(), RunnerPhase::Active);
        assert_eq!(h.notifier.calls.load(Ordering::SeqCst), 0);
        assert!(handle.stop(Duration::from_secs(5)).await);
    }

    #[test]
    fn test_crash_report_serializes_run_id() {
        let report = CrashReport {
            module_id: "news".into(),
            run_id: Uuid::new_v4(),
            reason: "missing dependency".into(),
            attempts: 3,
            at: at(0, 0, 0),
        };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["run_id"], report.run_id.to_string());
        assert_eq!(value["attempts"], 3);
    }
}
