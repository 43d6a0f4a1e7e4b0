//! 配置 / 任务存储
//!
//! 所有操作都按 module_id 隔离。声明（declare）是幂等的：
//! 元数据（描述、选项、提示、校验正则）每次都用声明刷新，
//! 但已保存的值（配置值 / cron 表达式）只有在 force_reset 时才会被默认值覆盖。

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::core::{ModuleError, StoreError};
use crate::modules::schedule::CronSchedule;
use crate::store::database::Database;
use crate::store::records::{
    compile_pattern, ConfigDeclaration, ConfigEntry, ConfigOrigin, ConfigValue, TaskDeclaration,
    TaskEntry,
};

/// 模块配置与定时任务的持久化存储
#[derive(Clone)]
pub struct ConfigStore {
    db: Database,
}

impl ConfigStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// 声明配置项：新键插入默认值；已有键只刷新元数据，除非 force_reset
    pub fn declare_config(
        &self,
        module_id: &str,
        decl: &ConfigDeclaration,
    ) -> Result<ConfigEntry, ModuleError> {
        if let Some(pattern) = decl.validation_pattern.as_deref().filter(|p| !p.is_empty()) {
            compile_pattern(&decl.key, pattern)?;
        }

        self.db.transaction(|tx| -> Result<_, ModuleError> {
            let now = Utc::now();
            let existing = select_config(tx, module_id, &decl.key)?;

            let reset_value = match &existing {
                None => true,
                Some(_) if decl.force_reset => true,
                Some(entry) if entry.config_type() != decl.default.config_type() => {
                    tracing::warn!(
                        module_id,
                        key = %decl.key,
                        old = ?entry.config_type(),
                        new = ?decl.default.config_type(),
                        "Config type changed, resetting stored value to default"
                    );
                    true
                }
                Some(_) => false,
            };

            let options = serde_json::to_string(&decl.options).map_err(StoreError::from)?;
            if existing.is_none() {
                tx.execute(
                    "INSERT INTO module_configs (module_id, config_key, description, value, options,
                                                 hint, validation_pattern, origin, is_overridden,
                                                 created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?9)",
                    params![
                        module_id,
                        decl.key,
                        decl.description,
                        encode_value(&decl.default)?,
                        options,
                        decl.hint,
                        decl.validation_pattern,
                        ConfigOrigin::Default.as_str(),
                        now,
                    ],
                )
                .map_err(StoreError::from)?;
            } else if reset_value {
                tx.execute(
                    "UPDATE module_configs SET description = ?3, value = ?4, options = ?5, hint = ?6,
                            validation_pattern = ?7, origin = ?8, is_overridden = 0, updated_at = ?9
                     WHERE module_id = ?1 AND config_key = ?2",
                    params![
                        module_id,
                        decl.key,
                        decl.description,
                        encode_value(&decl.default)?,
                        options,
                        decl.hint,
                        decl.validation_pattern,
                        ConfigOrigin::Default.as_str(),
                        now,
                    ],
                )
                .map_err(StoreError::from)?;
            } else {
                tx.execute(
                    "UPDATE module_configs SET description = ?3, options = ?4, hint = ?5,
                            validation_pattern = ?6, updated_at = ?7
                     WHERE module_id = ?1 AND config_key = ?2",
                    params![
                        module_id,
                        decl.key,
                        decl.description,
                        options,
                        decl.hint,
                        decl.validation_pattern,
                        now,
                    ],
                )
                .map_err(StoreError::from)?;
            }

            select_config(tx, module_id, &decl.key)?
                .ok_or_else(|| StoreError::Corrupt(format!("config {} vanished", decl.key)).into())
        })
    }

    pub fn get_config(&self, module_id: &str, key: &str) -> Result<Option<ConfigValue>, StoreError> {
        Ok(self.get_config_entry(module_id, key)?.map(|e| e.value))
    }

    pub fn get_config_entry(
        &self,
        module_id: &str,
        key: &str,
    ) -> Result<Option<ConfigEntry>, StoreError> {
        self.db.with_conn(|conn| select_config(conn, module_id, key))
    }

    /// 删除配置项（幂等）
    pub fn drop_config(&self, module_id: &str, key: &str) -> Result<(), StoreError> {
        self.db.transaction(|tx| -> Result<_, StoreError> {
            tx.execute(
                "DELETE FROM module_configs WHERE module_id = ?1 AND config_key = ?2",
                params![module_id, key],
            )?;
            Ok(())
        })
    }

    pub fn list_configs(&self, module_id: &str) -> Result<BTreeMap<String, ConfigEntry>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CONFIG_COLUMNS} FROM module_configs WHERE module_id = ?1 ORDER BY config_key"
            ))?;
            let rows = stmt
                .query_map(params![module_id], ConfigRow::from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows.into_iter()
                .map(|row| row.into_entry().map(|e| (e.key.clone(), e)))
                .collect()
        })
    }

    /// 运营方覆盖配置值：先按声明校验，再写入并标记为 custom
    pub fn set_config_value(
        &self,
        module_id: &str,
        key: &str,
        value: ConfigValue,
    ) -> Result<ConfigEntry, ModuleError> {
        self.db.transaction(|tx| -> Result<_, ModuleError> {
            let entry = select_config(tx, module_id, key)?.ok_or_else(|| ModuleError::InvalidConfig {
                key: key.to_string(),
                reason: format!("not declared by module {module_id}"),
            })?;
            entry.validate(&value)?;

            tx.execute(
                "UPDATE module_configs SET value = ?3, origin = ?4, is_overridden = 1, updated_at = ?5
                 WHERE module_id = ?1 AND config_key = ?2",
                params![
                    module_id,
                    key,
                    encode_value(&value)?,
                    ConfigOrigin::Custom.as_str(),
                    Utc::now(),
                ],
            )
            .map_err(StoreError::from)?;

            select_config(tx, module_id, key)?
                .ok_or_else(|| StoreError::Corrupt(format!("config {key} vanished")).into())
        })
    }

    /// 声明定时任务：cron 与配置值一样，只有 force_reset 才覆盖
    pub fn declare_task(
        &self,
        module_id: &str,
        decl: &TaskDeclaration,
    ) -> Result<TaskEntry, ModuleError> {
        if let Some(expr) = &decl.cron {
            CronSchedule::parse(expr)?;
        }

        self.db.transaction(|tx| -> Result<_, ModuleError> {
            let now = Utc::now();
            let existing = select_task(tx, module_id, &decl.key)?;

            match existing {
                None => {
                    tx.execute(
                        "INSERT INTO module_tasks (module_id, task_key, display_name, description,
                                                   cron_expression, created_at, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
                        params![module_id, decl.key, decl.display_name, decl.description, decl.cron, now],
                    )
                    .map_err(StoreError::from)?;
                }
                Some(_) if decl.force_reset => {
                    tx.execute(
                        "UPDATE module_tasks SET display_name = ?3, description = ?4, cron_expression = ?5,
                                updated_at = ?6
                         WHERE module_id = ?1 AND task_key = ?2",
                        params![module_id, decl.key, decl.display_name, decl.description, decl.cron, now],
                    )
                    .map_err(StoreError::from)?;
                }
                Some(_) => {
                    tx.execute(
                        "UPDATE module_tasks SET display_name = ?3, description = ?4, updated_at = ?5
                         WHERE module_id = ?1 AND task_key = ?2",
                        params![module_id, decl.key, decl.display_name, decl.description, now],
                    )
                    .map_err(StoreError::from)?;
                }
            }

            select_task(tx, module_id, &decl.key)?
                .ok_or_else(|| StoreError::Corrupt(format!("task {} vanished", decl.key)).into())
        })
    }

    pub fn get_task(&self, module_id: &str, key: &str) -> Result<Option<TaskEntry>, StoreError> {
        self.db.with_conn(|conn| select_task(conn, module_id, key))
    }

    /// 删除定时任务（幂等）
    pub fn drop_task(&self, module_id: &str, key: &str) -> Result<(), StoreError> {
        self.db.transaction(|tx| -> Result<_, StoreError> {
            tx.execute(
                "DELETE FROM module_tasks WHERE module_id = ?1 AND task_key = ?2",
                params![module_id, key],
            )?;
            Ok(())
        })
    }

    /// 按 task_key 排序，Runner 每个 tick 以稳定顺序遍历
    pub fn list_tasks(&self, module_id: &str) -> Result<BTreeMap<String, TaskEntry>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {TASK_COLUMNS} FROM module_tasks WHERE module_id = ?1 ORDER BY task_key"
            ))?;
            let tasks = stmt
                .query_map(params![module_id], task_from_row)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(tasks.into_iter().map(|t| (t.task_key.clone(), t)).collect())
        })
    }

    /// 运营方修改调度；None 表示取消调度
    pub fn set_task_cron(
        &self,
        module_id: &str,
        key: &str,
        cron: Option<&str>,
    ) -> Result<TaskEntry, ModuleError> {
        if let Some(expr) = cron {
            CronSchedule::parse(expr)?;
        }
        self.db.transaction(|tx| -> Result<_, ModuleError> {
            let n = tx
                .execute(
                    "UPDATE module_tasks SET cron_expression = ?3, updated_at = ?4
                     WHERE module_id = ?1 AND task_key = ?2",
                    params![module_id, key, cron, Utc::now()],
                )
                .map_err(StoreError::from)?;
            if n == 0 {
                return Err(ModuleError::NotFound(format!("{module_id}/{key}")));
            }
            select_task(tx, module_id, key)?
                .ok_or_else(|| StoreError::Corrupt(format!("task {key} vanished")).into())
        })
    }

    /// 清除模块的全部配置与任务，返回删除的行数
    pub fn purge_module(&self, module_id: &str) -> Result<usize, StoreError> {
        self.db.transaction(|tx| -> Result<_, StoreError> {
            let configs = tx.execute("DELETE FROM module_configs WHERE module_id = ?1", params![module_id])?;
            let tasks = tx.execute("DELETE FROM module_tasks WHERE module_id = ?1", params![module_id])?;
            Ok(configs + tasks)
        })
    }
}

fn encode_value(value: &ConfigValue) -> Result<String, StoreError> {
    Ok(serde_json::to_string(value)?)
}

const CONFIG_COLUMNS: &str = "module_id, config_key, description, value, options, hint, \
                              validation_pattern, origin, is_overridden, updated_at";

struct ConfigRow {
    module_id: String,
    key: String,
    description: String,
    value: String,
    options: String,
    hint: Option<String>,
    validation_pattern: Option<String>,
    origin: String,
    is_overridden: bool,
    updated_at: DateTime<Utc>,
}

impl ConfigRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            module_id: row.get(0)?,
            key: row.get(1)?,
            description: row.get(2)?,
            value: row.get(3)?,
            options: row.get(4)?,
            hint: row.get(5)?,
            validation_pattern: row.get(6)?,
            origin: row.get(7)?,
            is_overridden: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    fn into_entry(self) -> Result<ConfigEntry, StoreError> {
        let origin = ConfigOrigin::parse(&self.origin)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown config origin '{}'", self.origin)))?;
        Ok(ConfigEntry {
            value: serde_json::from_str(&self.value)?,
            options: serde_json::from_str(&self.options)?,
            module_id: self.module_id,
            key: self.key,
            description: self.description,
            hint: self.hint,
            validation_pattern: self.validation_pattern,
            origin,
            is_overridden: self.is_overridden,
            updated_at: self.updated_at,
        })
    }
}

fn select_config(
    conn: &Connection,
    module_id: &str,
    key: &str,
) -> Result<Option<ConfigEntry>, StoreError> {
    conn.query_row(
        &format!("SELECT {CONFIG_COLUMNS} FROM module_configs WHERE module_id = ?1 AND config_key = ?2"),
        params![module_id, key],
        ConfigRow::from_row,
    )
    .optional()?
    .map(ConfigRow::into_entry)
    .transpose()
}

const TASK_COLUMNS: &str = "module_id, task_key, display_name, description, cron_expression, updated_at";

fn task_from_row(row: &Row<'_>) -> rusqlite::Result<TaskEntry> {
    Ok(TaskEntry {
        module_id: row.get(0)?,
        task_key: row.get(1)?,
        display_name: row.get(2)?,
        description: row.get(3)?,
        cron_expression: row.get(4)?,
        updated_at: row.get(5)?,
    })
}

fn select_task(conn: &Connection, module_id: &str, key: &str) -> Result<Option<TaskEntry>, StoreError> {
    Ok(conn
        .query_row(
            &format!("SELECT {TASK_COLUMNS} FROM module_tasks WHERE module_id = ?1 AND task_key = ?2"),
            params![module_id, key],
            task_from_row,
        )
        .optional()?)
}
