//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `HIVE__*` 覆盖（双下划线表示嵌套，如 `HIVE__RUNNER__MAX_RETRIES=5`）。
//! 所有字段都有默认值，空文件也是合法配置。

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::modules::RunnerConfig;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub log: LogSection,
    pub storage: StorageSection,
    pub modules: ModulesSection,
    pub runner: RunnerSection,
    pub installer: InstallerSection,
    pub classifier: ClassifierSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    /// 数据根目录；storage.db_path、installer.target_root 未设置时放在其下
    pub data_dir: PathBuf,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "hive".to_string(),
            data_dir: PathBuf::from("data"),
        }
    }
}

/// [log] 段：EnvFilter 指令，RUST_LOG 优先
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSection {
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// [storage] 段
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct StorageSection {
    /// SQLite 文件路径，未设置时为 <data_dir>/hive.db
    pub db_path: Option<PathBuf>,
}

/// [modules] 段：扫描目录（内置目录先于外部目录）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModulesSection {
    pub builtin_dirs: Vec<PathBuf>,
    pub external_dirs: Vec<PathBuf>,
}

impl Default for ModulesSection {
    fn default() -> Self {
        Self {
            builtin_dirs: vec![PathBuf::from("modules/builtin")],
            external_dirs: vec![PathBuf::from("modules/external")],
        }
    }
}

/// [runner] 段：调度循环与崩溃重试
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunnerSection {
    pub max_poll_interval_secs: u64,
    pub min_sleep_ms: u64,
    pub max_retries: u32,
    pub retry_pause_secs: u64,
    /// disable / 关闭时等待 Runner 退出的上限，超时强制终止
    pub stop_timeout_secs: u64,
}

impl Default for RunnerSection {
    fn default() -> Self {
        Self {
            max_poll_interval_secs: 60,
            min_sleep_ms: 200,
            max_retries: 3,
            retry_pause_secs: 5,
            stop_timeout_secs: 5,
        }
    }
}

impl RunnerSection {
    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            max_poll_interval: Duration::from_secs(self.max_poll_interval_secs.max(1)),
            min_sleep: Duration::from_millis(self.min_sleep_ms.max(1)),
            max_retries: self.max_retries.max(1),
            retry_pause: Duration::from_secs(self.retry_pause_secs),
        }
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

/// [installer] 段：模块私有依赖安装
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InstallerSection {
    pub enabled: bool,
    pub program: String,
    /// 参数模板，支持 {requirements} / {target}
    pub args: Vec<String>,
    /// 未设置时为 <data_dir>/deps
    pub target_root: Option<PathBuf>,
}

impl Default for InstallerSection {
    fn default() -> Self {
        Self {
            enabled: false,
            program: "pip".to_string(),
            args: vec![
                "install".into(),
                "--target".into(),
                "{target}".into(),
                "-r".into(),
                "{requirements}".into(),
            ],
            target_root: None,
        }
    }
}

/// [classifier] 段：tag → 关键词
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClassifierSection {
    pub rules: BTreeMap<String, Vec<String>>,
}

impl AppConfig {
    pub fn db_path(&self) -> PathBuf {
        self.storage
            .db_path
            .clone()
            .unwrap_or_else(|| self.app.data_dir.join("hive.db"))
    }

    pub fn installer_root(&self) -> PathBuf {
        self.installer
            .target_root
            .clone()
            .unwrap_or_else(|| self.app.data_dir.join("deps"))
    }
}

/// 从 config 目录加载配置，环境变量 HIVE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 HIVE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!(path = %path.display(), "Config file not found, using defaults");
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("HIVE")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.runner.max_retries, 3);
        assert_eq!(config.runner.runner_config().max_poll_interval, Duration::from_secs(60));
        assert_eq!(config.runner.runner_config().min_sleep, Duration::from_millis(200));
        assert_eq!(config.db_path(), PathBuf::from("data").join("hive.db"));
        assert!(!config.installer.enabled);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hive.toml");
        std::fs::write(
            &path,
            r#"
[runner]
max_retries = 5

[modules]
external_dirs = ["/srv/modules"]

[classifier.rules]
tech = ["rust", "compiler"]
"#,
        )
        .unwrap();

        let config = load_config(Some(path)).unwrap();
        assert_eq!(config.runner.max_retries, 5);
        assert_eq!(config.runner.retry_pause_secs, 5);
        assert_eq!(config.modules.external_dirs, vec![PathBuf::from("/srv/modules")]);
        assert_eq!(config.modules.builtin_dirs, vec![PathBuf::from("modules/builtin")]);
        assert_eq!(config.classifier.rules["tech"].len(), 2);
        assert_eq!(config.log.level, "info");
    }
}
