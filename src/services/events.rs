//! 事件通知
//!
//! 冲突、崩溃、启停、配置变更等运营可见的事件通过 EventSink 发出（fire-and-forget）。
//! 默认实现只写 tracing 日志；MemoryEventSink 在内存里保留事件，供嵌入方查询。

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventLevel {
    Normal,
    Warning,
    Critical,
    Fatal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventCategory {
    System,
    Module,
    Task,
}

/// 结构化事件
#[derive(Debug, Clone, Serialize)]
pub struct HostEvent {
    pub level: EventLevel,
    pub category: EventCategory,
    /// 事件类型标识，如 module_conflict / module_crashed
    pub event_type: String,
    pub summary: String,
    pub details: Value,
    /// 相关的 module_id
    pub source_id: Option<String>,
    pub at: DateTime<Utc>,
}

impl HostEvent {
    pub fn new(
        level: EventLevel,
        category: EventCategory,
        event_type: impl Into<String>,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            level,
            category,
            event_type: event_type.into(),
            summary: summary.into(),
            details: Value::Null,
            source_id: None,
            at: Utc::now(),
        }
    }

    /// 模块类事件的便捷构造
    pub fn module(level: EventLevel, event_type: &str, module_id: &str, summary: impl Into<String>) -> Self {
        Self::new(level, EventCategory::Module, event_type, summary).with_source(module_id)
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = details;
        self
    }

    pub fn with_source(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }
}

/// 事件接收方；实现不得阻塞调用方，也不得把错误抛回调用方
pub trait EventSink: Send + Sync {
    fn record(&self, event: HostEvent);
}

/// 写入 tracing 日志的事件接收方
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEventSink;

impl EventSink for LogEventSink {
    fn record(&self, event: HostEvent) {
        let source = event.source_id.as_deref().unwrap_or("-");
        match event.level {
            EventLevel::Normal => tracing::info!(
                event_type = %event.event_type,
                category = ?event.category,
                source,
                details = %event.details,
                "{}",
                event.summary
            ),
            EventLevel::Warning => tracing::warn!(
                event_type = %event.event_type,
                category = ?event.category,
                source,
                details = %event.details,
                "{}",
                event.summary
            ),
            EventLevel::Critical | EventLevel::Fatal => tracing::error!(
                event_type = %event.event_type,
                category = ?event.category,
                level = ?event.level,
                source,
                details = %event.details,
                "{}",
                event.summary
            ),
        }
    }
}

/// 内存事件记录（同时转发到日志）
#[derive(Debug, Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<HostEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<HostEvent> {
        self.events
            .lock()
            .map(|e| e.clone())
            .unwrap_or_default()
    }

    /// 指定类型的事件
    pub fn of_type(&self, event_type: &str) -> Vec<HostEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }
}

impl EventSink for MemoryEventSink {
    fn record(&self, event: HostEvent) {
        LogEventSink.record(event.clone());
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
