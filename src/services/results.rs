//! 结构化结果落库
//!
//! 模块抓取到的结果以 JSON 形式保存；带 fingerprint 的结果按 (module_id, fingerprint) 去重。

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::params;
use serde::Serialize;
use serde_json::Value;

use crate::store::Database;

/// 保存结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SaveStatus {
    Saved { id: String },
    /// 同一模块下 fingerprint 已存在
    Duplicate,
}

#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn save(
        &self,
        module_id: &str,
        payload: Value,
        fingerprint: Option<String>,
    ) -> anyhow::Result<SaveStatus>;
}

/// 写入 module_results 表
#[derive(Clone)]
pub struct SqliteResultSink {
    db: Database,
}

impl SqliteResultSink {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// 某模块已保存的结果数
    pub fn count(&self, module_id: &str) -> anyhow::Result<usize> {
        let n: i64 = self.db.with_conn(|conn| {
            Ok(conn.query_row(
                "SELECT COUNT(*) FROM module_results WHERE module_id = ?1",
                params![module_id],
                |row| row.get(0),
            )?)
        })?;
        Ok(n as usize)
    }
}

#[async_trait]
impl ResultSink for SqliteResultSink {
    async fn save(
        &self,
        module_id: &str,
        payload: Value,
        fingerprint: Option<String>,
    ) -> anyhow::Result<SaveStatus> {
        let id = uuid::Uuid::new_v4().to_string();
        let body = serde_json::to_string(&payload)?;
        let inserted = self.db.with_conn(|conn| {
            Ok(conn.execute(
                "INSERT OR IGNORE INTO module_results (id, module_id, fingerprint, payload, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![id, module_id, fingerprint, body, Utc::now()],
            )?)
        })?;

        if inserted == 0 {
            tracing::debug!(module_id, fingerprint = ?fingerprint, "Duplicate result skipped");
            return Ok(SaveStatus::Duplicate);
        }
        Ok(SaveStatus::Saved { id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_fingerprint_deduplicates_per_module() {
        let sink = SqliteResultSink::new(Database::open_in_memory().unwrap());

        let first = sink
            .save("news", json!({"title": "a"}), Some("fp-1".into()))
            .await
            .unwrap();
        assert!(matches!(first, SaveStatus::Saved { .. }));

        let again = sink
            .save("news", json!({"title": "a"}), Some("fp-1".into()))
            .await
            .unwrap();
        assert_eq!(again, SaveStatus::Duplicate);

        // 不同模块相同 fingerprint 互不影响
        let other = sink
            .save("weather", json!({"t": 1}), Some("fp-1".into()))
            .await
            .unwrap();
        assert!(matches!(other, SaveStatus::Saved { .. }));

        assert_eq!(sink.count("news").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_results_without_fingerprint_always_saved() {
        let sink = SqliteResultSink::new(Database::open_in_memory().unwrap());
        for _ in 0..3 {
            sink.save("news", json!({"x": 1}), None).await.unwrap();
        }
        assert_eq!(sink.count("news").unwrap(), 3);
    }
}
