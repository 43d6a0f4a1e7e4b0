//! 时钟抽象
//!
//! Runner 用墙上时间（UTC）计算 Cron 触发点，用 tokio 定时器睡眠。
//! `AnchoredClock` 把墙上时间锚定在 tokio 单调时钟上，配合 `start_paused` 测试可得到确定的触发时刻。

use chrono::{DateTime, Utc};

/// 当前时间来源
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// 系统时钟
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// 锚定时钟：origin + (tokio Instant 流逝的时长)
#[derive(Debug, Clone)]
pub struct AnchoredClock {
    origin: DateTime<Utc>,
    started: tokio::time::Instant,
}

impl AnchoredClock {
    /// 从给定时刻开始计时（必须在 tokio 运行时内创建）
    pub fn starting_at(origin: DateTime<Utc>) -> Self {
        Self {
            origin,
            started: tokio::time::Instant::now(),
        }
    }
}

impl Clock for AnchoredClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = self.started.elapsed();
        match chrono::Duration::from_std(elapsed) {
            Ok(d) => self.origin + d,
            Err(_) => self.origin,
        }
    }
}
