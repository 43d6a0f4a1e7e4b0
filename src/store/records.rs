//! 持久化数据模型：模块身份 / 模块记录 / 配置项 / 定时任务
//!
//! 配置值用带类型标签的枚举表示（`{"type": "number", "value": 3}`），
//! 而不是无类型的 JSON blob。

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::ModuleError;

/// 模块来源：内置 / 外部
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    BuiltIn,
    External,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::BuiltIn => "built_in",
            SourceKind::External => "external",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "built_in" => Some(SourceKind::BuiltIn),
            "external" => Some(SourceKind::External),
            _ => None,
        }
    }
}

/// 模块身份：以作者声明的 module_id 为准，与文件位置无关
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleIdentity {
    pub module_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub version: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub meta: Map<String, Value>,
    pub source_kind: SourceKind,
}

impl ModuleIdentity {
    pub fn new(
        module_id: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
        source_kind: SourceKind,
    ) -> Self {
        Self {
            module_id: module_id.into(),
            name: name.into(),
            description: String::new(),
            version: version.into(),
            author: None,
            meta: Map::new(),
            source_kind,
        }
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }
}

/// 模块持久化记录
#[derive(Debug, Clone, Serialize)]
pub struct ModuleRecord {
    #[serde(flatten)]
    pub identity: ModuleIdentity,
    pub is_enabled: bool,
    /// 软删除：扫描时缺失则置位，重新出现时清除
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ModuleRecord {
    pub fn module_id(&self) -> &str {
        &self.identity.module_id
    }
}

/// 配置值类型标签
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigType {
    Text,
    Number,
    Boolean,
    Date,
    DateTime,
    Select,
    Password,
    Array,
}

/// 带类型的配置值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ConfigValue {
    Text(String),
    Number(f64),
    Boolean(bool),
    Date(NaiveDate),
    DateTime(DateTime<Utc>),
    Select(String),
    Password(String),
    Array(Vec<String>),
}

impl ConfigValue {
    pub fn config_type(&self) -> ConfigType {
        match self {
            ConfigValue::Text(_) => ConfigType::Text,
            ConfigValue::Number(_) => ConfigType::Number,
            ConfigValue::Boolean(_) => ConfigType::Boolean,
            ConfigValue::Date(_) => ConfigType::Date,
            ConfigValue::DateTime(_) => ConfigType::DateTime,
            ConfigValue::Select(_) => ConfigType::Select,
            ConfigValue::Password(_) => ConfigType::Password,
            ConfigValue::Array(_) => ConfigType::Array,
        }
    }

    /// 文本类值（text / select / password）
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::Text(s) | ConfigValue::Select(s) | ConfigValue::Password(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ConfigValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[String]> {
        match self {
            ConfigValue::Array(items) => Some(items),
            _ => None,
        }
    }
}

/// 配置值来源：模块默认值 / 运营方覆盖
///
/// 首次声明写入 `Default`，只有运营方改值后才是 `Custom`（同时 is_overridden = true）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigOrigin {
    Default,
    Custom,
}

impl ConfigOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigOrigin::Default => "default",
            ConfigOrigin::Custom => "custom",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "default" => Some(ConfigOrigin::Default),
            "custom" => Some(ConfigOrigin::Custom),
            _ => None,
        }
    }
}

/// 已持久化的配置项，(module_id, key) 唯一
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConfigEntry {
    pub module_id: String,
    pub key: String,
    pub value: ConfigValue,
    pub description: String,
    pub options: Vec<String>,
    pub hint: Option<String>,
    pub validation_pattern: Option<String>,
    pub origin: ConfigOrigin,
    pub is_overridden: bool,
    pub updated_at: DateTime<Utc>,
}

impl ConfigEntry {
    pub fn config_type(&self) -> ConfigType {
        self.value.config_type()
    }

    /// 校验候选值：类型一致、select 在选项内、文本类匹配校验正则
    pub fn validate(&self, candidate: &ConfigValue) -> Result<(), ModuleError> {
        validate_value(
            &self.key,
            self.config_type(),
            &self.options,
            self.validation_pattern.as_deref(),
            candidate,
        )
    }
}

pub(crate) fn validate_value(
    key: &str,
    expected: ConfigType,
    options: &[String],
    pattern: Option<&str>,
    candidate: &ConfigValue,
) -> Result<(), ModuleError> {
    let invalid = |reason: String| ModuleError::InvalidConfig {
        key: key.to_string(),
        reason,
    };

    if candidate.config_type() != expected {
        return Err(invalid(format!(
            "expected {:?}, got {:?}",
            expected,
            candidate.config_type()
        )));
    }

    if let ConfigValue::Select(choice) = candidate {
        if !options.is_empty() && !options.iter().any(|o| o == choice) {
            return Err(invalid(format!("'{choice}' is not one of {options:?}")));
        }
    }

    if let Some(pattern) = pattern.filter(|p| !p.is_empty()) {
        let re = compile_pattern(key, pattern)?;
        let texts: Vec<&str> = match candidate {
            ConfigValue::Array(items) => items.iter().map(String::as_str).collect(),
            other => other.as_str().into_iter().collect(),
        };
        if let Some(bad) = texts.iter().find(|t| !re.is_match(t)) {
            return Err(invalid(format!("'{bad}' does not match /{pattern}/")));
        }
    }

    Ok(())
}

pub(crate) fn compile_pattern(key: &str, pattern: &str) -> Result<Regex, ModuleError> {
    Regex::new(pattern).map_err(|e| ModuleError::InvalidConfig {
        key: key.to_string(),
        reason: format!("bad validation pattern: {e}"),
    })
}

/// 模块声明配置项（enable 钩子中调用）
#[derive(Debug, Clone)]
pub struct ConfigDeclaration {
    pub key: String,
    pub description: String,
    pub default: ConfigValue,
    pub options: Vec<String>,
    pub hint: Option<String>,
    pub validation_pattern: Option<String>,
    /// 为 true 时用默认值覆盖已保存的值
    pub force_reset: bool,
}

impl ConfigDeclaration {
    pub fn new(key: impl Into<String>, default: ConfigValue) -> Self {
        Self {
            key: key.into(),
            description: String::new(),
            default,
            options: Vec::new(),
            hint: None,
            validation_pattern: None,
            force_reset: false,
        }
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    pub fn with_options(mut self, options: Vec<String>) -> Self {
        self.options = options;
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.validation_pattern = Some(pattern.into());
        self
    }

    pub fn force_reset(mut self, force: bool) -> Self {
        self.force_reset = force;
        self
    }
}

/// 已持久化的定时任务，(module_id, task_key) 唯一
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskEntry {
    pub module_id: String,
    pub task_key: String,
    pub display_name: String,
    pub description: String,
    /// 为空表示仅声明能力，调度由别处配置
    pub cron_expression: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// 模块声明定时任务
#[derive(Debug, Clone)]
pub struct TaskDeclaration {
    pub key: String,
    pub display_name: String,
    pub description: String,
    pub cron: Option<String>,
    pub force_reset: bool,
}

impl TaskDeclaration {
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            display_name: key.clone(),
            key,
            description: String::new(),
            cron: None,
            force_reset: false,
        }
    }

    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = name.into();
        self
    }

    pub fn with_description(mut self, desc: impl Into<String>) -> Self {
        self.description = desc.into();
        self
    }

    pub fn with_cron(mut self, cron: impl Into<String>) -> Self {
        self.cron = Some(cron.into());
        self
    }

    pub fn force_reset(mut self, force: bool) -> Self {
        self.force_reset = force;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(value: ConfigValue) -> ConfigEntry {
        ConfigEntry {
            module_id: "m".to_string(),
            key: "k".to_string(),
            value,
            description: String::new(),
            options: Vec::new(),
            hint: None,
            validation_pattern: None,
            origin: ConfigOrigin::Default,
            is_overridden: false,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_config_value_tagged_json() {
        let v = ConfigValue::Number(3.0);
        let json = serde_json::to_value(&v).unwrap();
        assert_eq!(json, serde_json::json!({"type": "number", "value": 3.0}));

        let back: ConfigValue =
            serde_json::from_value(serde_json::json!({"type": "array", "value": ["a", "b"]})).unwrap();
        assert_eq!(back.as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_validate_type_mismatch() {
        let e = entry(ConfigValue::Number(1.0));
        assert!(e.validate(&ConfigValue::Text("1".into())).is_err());
        assert!(e.validate(&ConfigValue::Number(7.0)).is_ok());
    }

    #[test]
    fn test_validate_pattern_and_select() {
        let mut e = entry(ConfigValue::Text("3".into()));
        e.validation_pattern = Some(r"^\d+$".to_string());
        assert!(e.validate(&ConfigValue::Text("14".into())).is_ok());
        assert!(e.validate(&ConfigValue::Text("two".into())).is_err());

        let mut s = entry(ConfigValue::Select("fast".into()));
        s.options = vec!["fast".into(), "slow".into()];
        assert!(s.validate(&ConfigValue::Select("slow".into())).is_ok());
        assert!(s.validate(&ConfigValue::Select("medium".into())).is_err());
    }

    #[test]
    fn test_validate_array_elements() {
        let mut e = entry(ConfigValue::Array(vec![]));
        e.validation_pattern = Some("^https://".to_string());
        assert!(e
            .validate(&ConfigValue::Array(vec!["https://a".into(), "https://b".into()]))
            .is_ok());
        assert!(e
            .validate(&ConfigValue::Array(vec!["https://a".into(), "ftp://b".into()]))
            .is_err());
    }

    #[test]
    fn test_source_kind_round_trip_strings() {
        assert_eq!(SourceKind::parse(SourceKind::BuiltIn.as_str()), Some(SourceKind::BuiltIn));
        assert_eq!(SourceKind::parse("bogus"), None);
    }
}
