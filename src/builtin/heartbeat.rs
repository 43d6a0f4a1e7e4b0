//! 心跳模块
//!
//! 每次触发保存一条带时间戳的结构化结果，可用来确认调度链路是否通畅。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};

use crate::modules::{ModuleContext, ScraperModule};
use crate::services::SaveStatus;
use crate::store::{ConfigDeclaration, ConfigValue, ModuleIdentity, SourceKind, TaskDeclaration};

pub const MODULE_ID: &str = "heartbeat";
pub const BEAT_TASK: &str = "beat";
const DEFAULT_MESSAGE: &str = "alive";
const DEFAULT_CRON: &str = "*/5 * * * *";

pub fn identity() -> ModuleIdentity {
    ModuleIdentity::new(MODULE_ID, "Heartbeat", env!("CARGO_PKG_VERSION"), SourceKind::BuiltIn)
        .with_description("Periodically records a heartbeat result")
        .with_author("hive")
}

pub struct Heartbeat {
    ctx: ModuleContext,
}

impl Heartbeat {
    pub fn new(ctx: ModuleContext) -> Self {
        Self { ctx }
    }

    pub fn factory(ctx: ModuleContext) -> anyhow::Result<Arc<dyn ScraperModule>> {
        Ok(Arc::new(Self::new(ctx)))
    }
}

#[async_trait]
impl ScraperModule for Heartbeat {
    async fn enable(&self) -> anyhow::Result<bool> {
        self.ctx.set_config(
            ConfigDeclaration::new("message", ConfigValue::Text(DEFAULT_MESSAGE.to_string()))
                .with_description("Text stored with every heartbeat")
                .with_hint("Any non-empty text")
                .with_pattern(r"^\S.*$"),
        )?;
        self.ctx.set_task(
            TaskDeclaration::new(BEAT_TASK)
                .with_display_name("Heartbeat")
                .with_description("Record a heartbeat result")
                .with_cron(DEFAULT_CRON),
        )?;
        Ok(true)
    }

    async fn test(&self) -> anyhow::Result<(bool, String)> {
        Ok((true, "heartbeat ready".to_string()))
    }

    async fn test_config(
        &self,
        candidate: &BTreeMap<String, ConfigValue>,
    ) -> anyhow::Result<(bool, String)> {
        match candidate.get("message").and_then(ConfigValue::as_str) {
            Some(m) if m.trim().is_empty() => Ok((false, "message must not be blank".to_string())),
            _ => Ok((true, "config accepted".to_string())),
        }
    }

    async fn execute_scheduled_task(
        &self,
        _cron: &str,
        task_key: &str,
        fired_at: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        if task_key != BEAT_TASK {
            tracing::warn!(task_key, "Unknown heartbeat task");
            return Ok(false);
        }

        let message = self
            .ctx
            .get_text("message")?
            .unwrap_or_else(|| DEFAULT_MESSAGE.to_string());
        let tags = self.ctx.mark_message_tag(&message).await;
        let stamp = fired_at.to_rfc3339_opts(SecondsFormat::Secs, true);

        let status = self
            .ctx
            .save_structured_results(
                json!({
                    "message": message,
                    "fired_at": stamp,
                    "tags": tags,
                }),
                Some(stamp.clone()),
            )
            .await?;
        if status == SaveStatus::Duplicate {
            tracing::debug!(fired_at = %stamp, "Heartbeat already recorded");
        }
        Ok(true)
    }

    fn to_markdown(&self, payload: &Value) -> Option<String> {
        let message = payload.get("message")?.as_str()?;
        let fired_at = payload.get("fired_at")?.as_str()?;
        Some(format!("**{fired_at}** {message}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::HostServices;
    use crate::services::{
        DisabledInstaller, KeywordClassifier, MemoryEventSink, SqliteResultSink,
    };
    use crate::store::{ConfigStore, Database};
    use chrono::TimeZone;

    fn setup() -> (Heartbeat, SqliteResultSink, ConfigStore) {
        let db = Database::open_in_memory().unwrap();
        let results = SqliteResultSink::new(db.clone());
        let store = ConfigStore::new(db);
        let services = HostServices {
            store: store.clone(),
            classifier: Arc::new(KeywordClassifier::default()),
            results: Arc::new(results.clone()),
            installer: Arc::new(DisabledInstaller),
            events: Arc::new(MemoryEventSink::new()),
        };
        (Heartbeat::new(services.context_for(MODULE_ID, None)), results, store)
    }

    #[tokio::test]
    async fn test_enable_declares_contract() {
        let (module, _, store) = setup();
        assert!(module.enable().await.unwrap());
        assert_eq!(
            store.get_config(MODULE_ID, "message").unwrap(),
            Some(ConfigValue::Text("alive".into()))
        );
        let task = store.get_task(MODULE_ID, BEAT_TASK).unwrap().unwrap();
        assert_eq!(task.cron_expression.as_deref(), Some(DEFAULT_CRON));
    }

    #[tokio::test]
    async fn test_beat_saves_once_per_fire_time() {
        let (module, results, _) = setup();
        module.enable().await.unwrap();
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 0).unwrap();

        assert!(module.execute_scheduled_task(DEFAULT_CRON, BEAT_TASK, at).await.unwrap());
        assert!(module.execute_scheduled_task(DEFAULT_CRON, BEAT_TASK, at).await.unwrap());
        assert_eq!(results.count(MODULE_ID).unwrap(), 1);

        assert!(!module.execute_scheduled_task(DEFAULT_CRON, "other", at).await.unwrap());
    }

    #[tokio::test]
    async fn test_blank_message_rejected() {
        let (module, _, _) = setup();
        let mut candidate = BTreeMap::new();
        candidate.insert("message".to_string(), ConfigValue::Text("  ".into()));
        let (ok, _) = module.test_config(&candidate).await.unwrap();
        assert!(!ok);
    }

    #[test]
    fn test_markdown_rendering() {
        let (module, _, _) = setup();
        let md = module
            .to_markdown(&json!({"message": "alive", "fired_at": "2024-01-01T00:05:00Z"}))
            .unwrap();
        assert_eq!(md, "**2024-01-01T00:05:00Z** alive");
    }
}
