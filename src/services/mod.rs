//! 模块可用的宿主服务
//!
//! - **events**: 事件通知（冲突、崩溃、启停）
//! - **classifier**: 文本打标签
//! - **results**: 结构化结果落库
//! - **installer**: 模块私有依赖安装

pub mod classifier;
pub mod events;
pub mod installer;
pub mod results;

pub use classifier::{Classifier, KeywordClassifier, Tag};
pub use events::{EventCategory, EventLevel, EventSink, HostEvent, LogEventSink, MemoryEventSink};
pub use installer::{CommandInstaller, DependencyInstaller, DisabledInstaller};
pub use results::{ResultSink, SaveStatus, SqliteResultSink};
