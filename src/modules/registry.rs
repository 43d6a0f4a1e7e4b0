//! 模块注册表
//!
//! 按优先级扫描全部来源（内置先于外部），解析身份冲突，并把结果与持久化记录对账。

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};

use chrono::Utc;
use serde::Serialize;

use crate::core::{ModuleError, StoreError};
use crate::modules::source::{ModuleDescriptor, ModuleSource};
use crate::services::{EventLevel, EventSink, HostEvent};
use crate::store::database::{
    insert_module_record, list_module_records, set_module_deleted, update_module_identity,
};
use crate::store::Database;

pub type DescriptorMap = BTreeMap<String, ModuleDescriptor>;

/// 一次对账的结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    /// 软删除后重新出现，恢复为禁用状态
    pub restored: Vec<String>,
    /// 本次扫描缺失，已软删除并禁用
    pub removed: Vec<String>,
}

impl ReconcileReport {
    pub fn is_noop(&self) -> bool {
        self.created.is_empty()
            && self.updated.is_empty()
            && self.restored.is_empty()
            && self.removed.is_empty()
    }
}

pub struct ModuleRegistry {
    sources: Vec<Box<dyn ModuleSource>>,
    cache: RwLock<Option<Arc<DescriptorMap>>>,
    /// 进程生命周期内已上报过冲突的 module_id
    conflicts_seen: Mutex<HashSet<String>>,
    events: Arc<dyn EventSink>,
}

impl ModuleRegistry {
    /// `sources` 的顺序即扫描优先级
    pub fn new(sources: Vec<Box<dyn ModuleSource>>, events: Arc<dyn EventSink>) -> Self {
        Self {
            sources,
            cache: RwLock::new(None),
            conflicts_seen: Mutex::new(HashSet::new()),
            events,
        }
    }

    /// 扫描所有来源；force=false 且已有缓存时直接返回缓存
    pub fn scan(&self, force: bool) -> Arc<DescriptorMap> {
        if !force {
            let cached = self
                .cache
                .read()
                .unwrap_or_else(|p| p.into_inner())
                .clone();
            if let Some(cached) = cached {
                return cached;
            }
        }

        let mut found = DescriptorMap::new();
        let mut invalid = 0usize;
        for source in &self.sources {
            for candidate in source.discover() {
                let descriptor = match candidate {
                    Ok(d) => d,
                    Err(e) => {
                        invalid += 1;
                        tracing::warn!(source = %source.label(), error = %e, "Skipping invalid module");
                        continue;
                    }
                };

                match found.get(descriptor.module_id()) {
                    Some(kept) => self.report_conflict(kept, &descriptor),
                    None => {
                        found.insert(descriptor.module_id().to_string(), descriptor);
                    }
                }
            }
        }

        tracing::info!(modules = found.len(), invalid, "Module scan complete");
        let found = Arc::new(found);
        *self.cache.write().unwrap_or_else(|p| p.into_inner()) = Some(Arc::clone(&found));
        found
    }

    /// 缓存中的描述（未扫描过时为 None）
    pub fn get(&self, module_id: &str) -> Option<ModuleDescriptor> {
        self.cache
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .and_then(|map| map.get(module_id).cloned())
    }

    fn report_conflict(&self, kept: &ModuleDescriptor, duplicate: &ModuleDescriptor) {
        let first_time = self
            .conflicts_seen
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .insert(duplicate.module_id().to_string());
        if !first_time {
            return;
        }

        let err = ModuleError::Conflict {
            module_id: duplicate.module_id().to_string(),
            location: duplicate.location.clone(),
        };
        tracing::warn!(kept = %kept.location, "{err}");
        self.events.record(
            HostEvent::module(
                EventLevel::Warning,
                "module_conflict",
                duplicate.module_id(),
                err.to_string(),
            )
            .with_details(serde_json::json!({
                "kept": kept.location,
                "ignored": duplicate.location,
            })),
        );
    }

    /// 把扫描结果写回模块记录（单个事务）
    ///
    /// 配置项与任务行从不在这里删除。
    pub fn reconcile(
        &self,
        descriptors: &DescriptorMap,
        db: &Database,
    ) -> Result<ReconcileReport, StoreError> {
        let report = db.transaction(|tx| -> Result<_, StoreError> {
            let now = Utc::now();
            let existing: HashMap<String, _> = list_module_records(tx, true)?
                .into_iter()
                .map(|r| (r.module_id().to_string(), r))
                .collect();
            let mut report = ReconcileReport::default();

            for (module_id, descriptor) in descriptors {
                match existing.get(module_id) {
                    None => {
                        insert_module_record(tx, &descriptor.identity, now)?;
                        report.created.push(module_id.clone());
                    }
                    Some(record) if record.is_deleted => {
                        set_module_deleted(tx, module_id, false, now)?;
                        update_module_identity(tx, &descriptor.identity, now)?;
                        report.restored.push(module_id.clone());
                    }
                    Some(record) if record.identity != descriptor.identity => {
                        update_module_identity(tx, &descriptor.identity, now)?;
                        report.updated.push(module_id.clone());
                    }
                    Some(_) => {}
                }
            }

            for (module_id, record) in &existing {
                if !record.is_deleted && !descriptors.contains_key(module_id) {
                    set_module_deleted(tx, module_id, true, now)?;
                    report.removed.push(module_id.clone());
                }
            }
            report.removed.sort();
            Ok(report)
        })?;

        if !report.is_noop() {
            tracing::info!(
                created = ?report.created,
                updated = ?report.updated,
                restored = ?report.restored,
                removed = ?report.removed,
                "Module records reconciled"
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::MemoryEventSink;
    use crate::store::{
        ConfigDeclaration, ConfigStore, ConfigValue, ModuleIdentity, SourceKind,
    };

    /// 内容可在测试中替换的来源
    struct FixedSource {
        label: &'static str,
        items: Arc<Mutex<Vec<ModuleDescriptor>>>,
    }

    impl FixedSource {
        fn new(label: &'static str, ids: &[&str], kind: SourceKind) -> (Self, Arc<Mutex<Vec<ModuleDescriptor>>>) {
            let items: Vec<_> = ids.iter().map(|id| descriptor(id, label, kind)).collect();
            let items = Arc::new(Mutex::new(items));
            (
                Self {
                    label,
                    items: items.clone(),
                },
                items,
            )
        }
    }

    impl ModuleSource for FixedSource {
        fn label(&self) -> String {
            self.label.to_string()
        }

        fn discover(&self) -> Vec<Result<ModuleDescriptor, ModuleError>> {
            self.items.lock().unwrap().iter().cloned().map(Ok).collect()
        }
    }

    fn descriptor(id: &str, location: &str, kind: SourceKind) -> ModuleDescriptor {
        ModuleDescriptor {
            identity: ModuleIdentity::new(id, id.to_uppercase(), "1.0", kind),
            location: format!("{location}/{id}"),
            requirements: None,
        }
    }

    #[test]
    fn test_first_source_wins_and_conflict_reported_once() {
        let events = Arc::new(MemoryEventSink::new());
        let (builtin, _) = FixedSource::new("builtin", &["news", "weather"], SourceKind::BuiltIn);
        let (external, _) = FixedSource::new("external", &["news", "stocks"], SourceKind::External);
        let registry = ModuleRegistry::new(vec![Box::new(builtin), Box::new(external)], events.clone());

        let found = registry.scan(false);
        assert_eq!(found.len(), 3);
        assert_eq!(found["news"].location, "builtin/news");
        assert_eq!(found["news"].identity.source_kind, SourceKind::BuiltIn);

        registry.scan(true);
        registry.scan(true);
        assert_eq!(events.of_type("module_conflict").len(), 1);
    }

    #[test]
    fn test_scan_cache_and_force() {
        let (source, items) = FixedSource::new("ext", &["a"], SourceKind::External);
        let registry = ModuleRegistry::new(vec![Box::new(source)], Arc::new(MemoryEventSink::new()));
        assert_eq!(registry.scan(false).len(), 1);

        items
            .lock()
            .unwrap()
            .push(descriptor("b", "ext", SourceKind::External));
        assert_eq!(registry.scan(false).len(), 1);
        assert_eq!(registry.scan(true).len(), 2);
        assert!(registry.get("b").is_some());
    }

    #[test]
    fn test_reconcile_soft_delete_and_restore_disabled() {
        let db = Database::open_in_memory().unwrap();
        let store = ConfigStore::new(db.clone());
        let (source, items) = FixedSource::new("ext", &["a", "b"], SourceKind::External);
        let registry = ModuleRegistry::new(vec![Box::new(source)], Arc::new(MemoryEventSink::new()));

        let report = registry.reconcile(&registry.scan(true), &db).unwrap();
        assert_eq!(report.created, vec!["a", "b"]);

        db.set_module_enabled("a", true).unwrap();
        store
            .declare_config("a", &ConfigDeclaration::new("url", ConfigValue::Text("x".into())))
            .unwrap();

        // a 从磁盘消失
        items.lock().unwrap().retain(|d| d.module_id() != "a");
        let report = registry.reconcile(&registry.scan(true), &db).unwrap();
        assert_eq!(report.removed, vec!["a"]);
        let a = db.get_module("a").unwrap().unwrap();
        assert!(a.is_deleted && !a.is_enabled);
        assert!(store.get_config("a", "url").unwrap().is_some());

        // 重新出现：恢复但保持禁用
        items
            .lock()
            .unwrap()
            .push(descriptor("a", "ext", SourceKind::External));
        let report = registry.reconcile(&registry.scan(true), &db).unwrap();
        assert_eq!(report.restored, vec!["a"]);
        let a = db.get_module("a").unwrap().unwrap();
        assert!(!a.is_deleted);
        assert!(!a.is_enabled);
    }

    #[test]
    fn test_reconcile_updates_changed_identity_only() {
        let db = Database::open_in_memory().unwrap();
        let (source, items) = FixedSource::new("ext", &["a", "b"], SourceKind::External);
        let registry = ModuleRegistry::new(vec![Box::new(source)], Arc::new(MemoryEventSink::new()));
        registry.reconcile(&registry.scan(true), &db).unwrap();

        items.lock().unwrap()[0].identity.version = "2.0".to_string();
        let report = registry.reconcile(&registry.scan(true), &db).unwrap();
        assert_eq!(report.updated, vec!["a"]);
        assert!(report.created.is_empty() && report.removed.is_empty());
        assert_eq!(db.get_module("a").unwrap().unwrap().identity.version, "2.0");

        let report = registry.reconcile(&registry.scan(true), &db).unwrap();
        assert!(report.is_noop());
    }
}
