//! SQLite 持久化
//!
//! 单连接 + 互斥锁；每个读-改-写操作包在一个事务里（Ok 提交，Err 或 panic 回滚），
//! 并发的 declare_config 不会交错出半写状态。

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};

use crate::core::StoreError;
use crate::store::records::{ModuleIdentity, ModuleRecord, SourceKind};

const SCHEMA_VERSION: i64 = 1;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS modules (
    module_id   TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    version     TEXT NOT NULL,
    author      TEXT,
    meta        TEXT NOT NULL DEFAULT '{}',
    source      TEXT NOT NULL,
    is_enabled  INTEGER NOT NULL DEFAULT 0,
    is_deleted  INTEGER NOT NULL DEFAULT 0,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS module_configs (
    module_id          TEXT NOT NULL,
    config_key         TEXT NOT NULL,
    description        TEXT NOT NULL DEFAULT '',
    value              TEXT NOT NULL,
    options            TEXT NOT NULL DEFAULT '[]',
    hint               TEXT,
    validation_pattern TEXT,
    origin             TEXT NOT NULL,
    is_overridden      INTEGER NOT NULL DEFAULT 0,
    created_at         TEXT NOT NULL,
    updated_at         TEXT NOT NULL,
    PRIMARY KEY (module_id, config_key)
);

CREATE TABLE IF NOT EXISTS module_tasks (
    module_id       TEXT NOT NULL,
    task_key        TEXT NOT NULL,
    display_name    TEXT NOT NULL,
    description     TEXT NOT NULL DEFAULT '',
    cron_expression TEXT,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    PRIMARY KEY (module_id, task_key)
);

CREATE TABLE IF NOT EXISTS module_results (
    id          TEXT PRIMARY KEY,
    module_id   TEXT NOT NULL,
    fingerprint TEXT,
    payload     TEXT NOT NULL,
    created_at  TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_results_fingerprint
    ON module_results(module_id, fingerprint) WHERE fingerprint IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_results_module ON module_results(module_id);
";

/// 数据库句柄，可廉价克隆并在多个 Runner / Manager 之间共享
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// 打开（或创建）文件数据库；父目录不存在时自动创建
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!(journal_mode = %mode, "SQLite journal mode");
        tracing::info!(path = %path.display(), "Opened module database");
        Self::init(conn)
    }

    /// 内存数据库（测试与一次性命令）
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        if version < SCHEMA_VERSION {
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        }
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // 持锁 panic 时事务已随 Drop 回滚，连接本身仍可用
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 只读访问
    pub fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let conn = self.lock();
        f(&conn)
    }

    /// 在单个事务中执行；闭包返回 Err 时回滚
    pub fn transaction<T, E>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T, E>) -> Result<T, E>
    where
        E: From<StoreError>,
    {
        let mut conn = self.lock();
        let tx = conn.transaction().map_err(StoreError::from)?;
        let value = f(&tx)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(value)
    }

    pub fn list_modules(&self, include_deleted: bool) -> Result<Vec<ModuleRecord>, StoreError> {
        self.with_conn(|conn| list_module_records(conn, include_deleted))
    }

    pub fn get_module(&self, module_id: &str) -> Result<Option<ModuleRecord>, StoreError> {
        self.with_conn(|conn| get_module_record(conn, module_id))
    }

    /// 更新启用标记，返回是否命中记录
    pub fn set_module_enabled(&self, module_id: &str, enabled: bool) -> Result<bool, StoreError> {
        self.transaction(|tx| set_module_enabled(tx, module_id, enabled, Utc::now()))
    }
}

#[async_trait::async_trait]
impl crate::core::ShutdownCleanup for Database {
    /// 把 WAL 刷回主库文件
    async fn cleanup(&self) -> anyhow::Result<()> {
        self.with_conn(|conn| {
            conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
            Ok(())
        })?;
        tracing::debug!("Database checkpointed");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "database"
    }
}

const MODULE_COLUMNS: &str = "module_id, name, description, version, author, meta, source, \
                              is_enabled, is_deleted, created_at, updated_at";

struct ModuleRow {
    module_id: String,
    name: String,
    description: String,
    version: String,
    author: Option<String>,
    meta: String,
    source: String,
    is_enabled: bool,
    is_deleted: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ModuleRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            module_id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            version: row.get(3)?,
            author: row.get(4)?,
            meta: row.get(5)?,
            source: row.get(6)?,
            is_enabled: row.get(7)?,
            is_deleted: row.get(8)?,
            created_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    fn into_record(self) -> Result<ModuleRecord, StoreError> {
        let source_kind = SourceKind::parse(&self.source)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown module source '{}'", self.source)))?;
        Ok(ModuleRecord {
            identity: ModuleIdentity {
                meta: serde_json::from_str(&self.meta)?,
                module_id: self.module_id,
                name: self.name,
                description: self.description,
                version: self.version,
                author: self.author,
                source_kind,
            },
            is_enabled: self.is_enabled,
            is_deleted: self.is_deleted,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

pub(crate) fn list_module_records(
    conn: &Connection,
    include_deleted: bool,
) -> Result<Vec<ModuleRecord>, StoreError> {
    let sql = if include_deleted {
        format!("SELECT {MODULE_COLUMNS} FROM modules ORDER BY module_id")
    } else {
        format!("SELECT {MODULE_COLUMNS} FROM modules WHERE is_deleted = 0 ORDER BY module_id")
    };
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], ModuleRow::from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(ModuleRow::into_record).collect()
}

pub(crate) fn get_module_record(
    conn: &Connection,
    module_id: &str,
) -> Result<Option<ModuleRecord>, StoreError> {
    let sql = format!("SELECT {MODULE_COLUMNS} FROM modules WHERE module_id = ?1");
    conn.query_row(&sql, params![module_id], ModuleRow::from_row)
        .optional()?
        .map(ModuleRow::into_record)
        .transpose()
}

/// 新模块记录总是以禁用状态落库
pub(crate) fn insert_module_record(
    conn: &Connection,
    identity: &ModuleIdentity,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO modules (module_id, name, description, version, author, meta, source,
                              is_enabled, is_deleted, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 0, 0, ?8, ?8)",
        params![
            identity.module_id,
            identity.name,
            identity.description,
            identity.version,
            identity.author,
            serde_json::to_string(&identity.meta)?,
            identity.source_kind.as_str(),
            now,
        ],
    )?;
    Ok(())
}

/// 刷新身份字段（name / description / version / author / meta / source）
pub(crate) fn update_module_identity(
    conn: &Connection,
    identity: &ModuleIdentity,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE modules SET name = ?2, description = ?3, version = ?4, author = ?5, meta = ?6,
                            source = ?7, updated_at = ?8
         WHERE module_id = ?1",
        params![
            identity.module_id,
            identity.name,
            identity.description,
            identity.version,
            identity.author,
            serde_json::to_string(&identity.meta)?,
            identity.source_kind.as_str(),
            now,
        ],
    )?;
    Ok(())
}

pub(crate) fn set_module_enabled(
    conn: &Connection,
    module_id: &str,
    enabled: bool,
    now: DateTime<Utc>,
) -> Result<bool, StoreError> {
    let n = conn.execute(
        "UPDATE modules SET is_enabled = ?2, updated_at = ?3 WHERE module_id = ?1",
        params![module_id, enabled, now],
    )?;
    Ok(n > 0)
}

/// 软删除或恢复；两种情况都会强制禁用
pub(crate) fn set_module_deleted(
    conn: &Connection,
    module_id: &str,
    deleted: bool,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    conn.execute(
        "UPDATE modules SET is_deleted = ?2, is_enabled = 0, updated_at = ?3 WHERE module_id = ?1",
        params![module_id, deleted, now],
    )?;
    Ok(())
}
