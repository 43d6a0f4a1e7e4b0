//! 模块来源
//!
//! 每个来源产出候选模块的静态元数据；读取元数据不执行任何模块代码。
//! 目录来源下每个子目录是一个模块，子目录里的 module.toml 形如：
//!
//! ```toml
//! [module]
//! id = "news_x"
//! name = "News X"
//! version = "1.0.0"
//! description = "..."
//! author = "..."
//! requirements = "requirements.txt"
//!
//! [module.meta]
//! lang = "en"
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use crate::core::ModuleError;
use crate::modules::traits::ModuleCatalog;
use crate::store::{ModuleIdentity, SourceKind};

pub const METADATA_FILE: &str = "module.toml";

/// 扫描得到的模块描述
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleDescriptor {
    pub identity: ModuleIdentity,
    /// 元数据所在位置（目录路径或 builtin:<id>）
    pub location: String,
    /// 依赖描述文件（绝对或相对于进程工作目录）
    pub requirements: Option<PathBuf>,
}

impl ModuleDescriptor {
    pub fn module_id(&self) -> &str {
        &self.identity.module_id
    }
}

/// 候选模块来源
pub trait ModuleSource: Send + Sync {
    fn label(&self) -> String;

    /// 按稳定顺序列出候选；元数据无效的候选以 Discovery 错误返回
    fn discover(&self) -> Vec<Result<ModuleDescriptor, ModuleError>>;
}

/// 编译进宿主的内置模块
pub struct CatalogSource {
    catalog: Arc<ModuleCatalog>,
}

impl CatalogSource {
    pub fn new(catalog: Arc<ModuleCatalog>) -> Self {
        Self { catalog }
    }
}

impl ModuleSource for CatalogSource {
    fn label(&self) -> String {
        "catalog".to_string()
    }

    fn discover(&self) -> Vec<Result<ModuleDescriptor, ModuleError>> {
        self.catalog
            .builtins()
            .iter()
            .map(|identity| {
                Ok(ModuleDescriptor {
                    location: format!("builtin:{}", identity.module_id),
                    identity: identity.clone(),
                    requirements: None,
                })
            })
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct ModuleToml {
    module: Option<ModuleSection>,
}

#[derive(Debug, Deserialize)]
struct ModuleSection {
    id: Option<String>,
    name: Option<String>,
    version: Option<String>,
    #[serde(default)]
    description: String,
    author: Option<String>,
    requirements: Option<String>,
    #[serde(default)]
    meta: toml::Table,
}

/// 目录来源：子目录按名称排序后依次读取 module.toml
pub struct DirectorySource {
    root: PathBuf,
    kind: SourceKind,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>, kind: SourceKind) -> Self {
        Self {
            root: root.into(),
            kind,
        }
    }

    fn load(&self, dir: &Path) -> Result<ModuleDescriptor, ModuleError> {
        let location = dir.display().to_string();
        let invalid = |reason: String| ModuleError::Discovery {
            location: location.clone(),
            reason,
        };

        let path = dir.join(METADATA_FILE);
        let content = std::fs::read_to_string(&path)
            .map_err(|e| invalid(format!("cannot read {METADATA_FILE}: {e}")))?;
        let parsed: ModuleToml =
            toml::from_str(&content).map_err(|e| invalid(format!("malformed {METADATA_FILE}: {e}")))?;
        let section = parsed
            .module
            .ok_or_else(|| invalid("missing [module] table".to_string()))?;

        let required = |value: Option<String>, field: &str| {
            value
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| invalid(format!("missing required field '{field}'")))
        };
        let id = required(section.id, "id")?;
        let name = required(section.name, "name")?;
        let version = required(section.version, "version")?;

        let mut identity = ModuleIdentity::new(id, name, version, self.kind)
            .with_description(section.description);
        if let Some(author) = section.author.filter(|a| !a.is_empty()) {
            identity = identity.with_author(author);
        }
        for (key, value) in section.meta {
            let value = serde_json::to_value(value)
                .map_err(|e| invalid(format!("unsupported meta value for '{key}': {e}")))?;
            identity = identity.with_meta(key, value);
        }

        Ok(ModuleDescriptor {
            identity,
            location,
            requirements: section.requirements.map(|r| dir.join(r)),
        })
    }
}

impl ModuleSource for DirectorySource {
    fn label(&self) -> String {
        format!("{} ({})", self.root.display(), self.kind.as_str())
    }

    fn discover(&self) -> Vec<Result<ModuleDescriptor, ModuleError>> {
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::debug!(root = %self.root.display(), error = %e, "Module directory not readable, skipping");
                return Vec::new();
            }
        };

        let mut dirs: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| path.is_dir())
            .collect();
        dirs.sort();

        dirs.iter().map(|dir| self.load(dir)).collect()
    }
}
