//! 调度集成测试：暂停的 tokio 时间 + 锚定时钟，验证触发时刻与模块间隔离

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use common::{at, host, register, write_module, Script};
use hive::core::AnchoredClock;
use hive::modules::{ModuleCatalog, RunnerPhase};
use hive::services::SqliteResultSink;
use tempfile::TempDir;

fn script_at(start: DateTime<Utc>) -> Script {
    Script::new(Arc::new(AnchoredClock::starting_at(start)))
}

fn close_to(actual: DateTime<Utc>, expected: DateTime<Utc>) -> bool {
    (actual - expected).num_milliseconds().abs() < 1_000
}

#[tokio::test(start_paused = true)]
async fn test_first_fire_waits_for_next_boundary() {
    let start = at(0, 0, 30);
    let script = Arc::new(script_at(start).with_task("tick", "* * * * *"));
    let dir = TempDir::new().unwrap();
    write_module(dir.path(), "news_x");
    let mut catalog = ModuleCatalog::new();
    register(&mut catalog, "news_x", script.clone());

    let h = host(catalog, dir.path(), start);
    h.manager.reload().await.unwrap();
    h.manager.enable("news_x").await.unwrap();

    tokio::time::sleep(Duration::from_secs(20)).await;
    assert!(script.fired().is_empty());

    tokio::time::sleep(Duration::from_secs(15)).await;
    let fired = script.fired();
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].0, "tick");
    assert_eq!(fired[0].1, at(0, 1, 0));
    assert!(close_to(fired[0].2, at(0, 1, 0)));

    h.manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_long_task_does_not_delay_other_modules() {
    let start = at(0, 50, 0);
    let slow = Arc::new(
        script_at(start)
            .with_task("hourly", "0 * * * *")
            .with_task_duration(Duration::from_secs(45 * 60)),
    );
    let fast = Arc::new(script_at(start).with_task("half", "30 * * * *"));

    let dir = TempDir::new().unwrap();
    write_module(dir.path(), "mod_a");
    write_module(dir.path(), "mod_b");
    let mut catalog = ModuleCatalog::new();
    register(&mut catalog, "mod_a", slow.clone());
    register(&mut catalog, "mod_b", fast.clone());

    let h = host(catalog, dir.path(), start);
    h.manager.reload().await.unwrap();
    h.manager.enable("mod_a").await.unwrap();
    h.manager.enable("mod_b").await.unwrap();

    // 01:35：mod_a 仍在执行 01:00 的任务
    tokio::time::sleep(Duration::from_secs(45 * 60)).await;
    assert_eq!(
        h.manager.runner_phase("mod_a").await,
        Some(RunnerPhase::ExecutingTask)
    );
    let b = fast.fired();
    assert_eq!(b.len(), 1);
    assert_eq!(b[0].1, at(1, 30, 0));
    assert!(close_to(b[0].2, at(1, 30, 0)));

    // 02:10：mod_a 在 01:45 完成后等待到 02:00 才再次触发
    tokio::time::sleep(Duration::from_secs(35 * 60)).await;
    let a = slow.fired();
    assert_eq!(a.len(), 2);
    assert_eq!(a[0].1, at(1, 0, 0));
    assert_eq!(a[1].1, at(2, 0, 0));
    assert!(close_to(a[1].2, at(2, 0, 0)));
    assert_eq!(fast.fired().len(), 1);

    h.manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_operator_schedule_change_applies_without_restart() {
    let start = at(0, 0, 0);
    let script = Arc::new(script_at(start).with_task("daily", "0 8 * * *"));
    let dir = TempDir::new().unwrap();
    write_module(dir.path(), "news_x");
    let mut catalog = ModuleCatalog::new();
    register(&mut catalog, "news_x", script.clone());

    let h = host(catalog, dir.path(), start);
    h.manager.reload().await.unwrap();
    h.manager.enable("news_x").await.unwrap();

    tokio::time::sleep(Duration::from_secs(5 * 60)).await;
    h.manager
        .update_task_cron("news_x", "daily", Some("*/15 * * * *"))
        .unwrap();

    // 新表达式在下一个 tick（不超过 60 秒）生效
    tokio::time::sleep(Duration::from_secs(11 * 60)).await;
    let fired = script.fired();
    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].1, at(0, 15, 0));

    // 取消调度后不再触发
    h.manager.update_task_cron("news_x", "daily", None).unwrap();
    tokio::time::sleep(Duration::from_secs(60 * 60)).await;
    assert_eq!(script.fired().len(), 1);

    h.manager.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_saves_results_on_schedule() {
    let start = at(0, 4, 0);
    let dir = TempDir::new().unwrap();
    let h = host(hive::builtin::catalog(), dir.path(), start);
    h.manager.reload().await.unwrap();
    h.manager.enable("heartbeat").await.unwrap();

    // 00:05 与 00:10 各一次
    tokio::time::sleep(Duration::from_secs(7 * 60)).await;
    let results = SqliteResultSink::new(h.db.clone());
    assert_eq!(results.count("heartbeat").unwrap(), 2);

    h.manager.disable("heartbeat").await.unwrap();
    tokio::time::sleep(Duration::from_secs(10 * 60)).await;
    assert_eq!(results.count("heartbeat").unwrap(), 2);
}
