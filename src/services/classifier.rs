//! 文本打标签
//!
//! ModuleContext::mark_message_tag 通过 Classifier 给一段文本打标签；失败只告警，不中断任务。
//! KeywordClassifier 按配置的关键词规则打分：命中关键词数 / 规则关键词数。

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// 单个标签及置信度
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub tag: String,
    pub confidence: f32,
}

#[async_trait]
pub trait Classifier: Send + Sync {
    async fn tag(&self, text: &str) -> anyhow::Result<Vec<Tag>>;
}

/// 关键词规则分类器
#[derive(Debug, Clone, Default)]
pub struct KeywordClassifier {
    /// tag -> 小写关键词
    rules: BTreeMap<String, Vec<String>>,
}

/// 将文本切分为小写词集合
fn tokenize_lower(s: &str) -> HashSet<String> {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(|w| w.to_lowercase())
        .collect()
}

impl KeywordClassifier {
    pub fn new(rules: BTreeMap<String, Vec<String>>) -> Self {
        let rules = rules
            .into_iter()
            .map(|(tag, words)| (tag, words.into_iter().map(|w| w.to_lowercase()).collect()))
            .collect();
        Self { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[async_trait]
impl Classifier for KeywordClassifier {
    async fn tag(&self, text: &str) -> anyhow::Result<Vec<Tag>> {
        let tokens = tokenize_lower(text);
        let mut tags: Vec<Tag> = self
            .rules
            .iter()
            .filter(|(_, words)| !words.is_empty())
            .filter_map(|(tag, words)| {
                let hits = words.iter().filter(|w| tokens.contains(*w)).count();
                (hits > 0).then(|| Tag {
                    tag: tag.clone(),
                    confidence: hits as f32 / words.len() as f32,
                })
            })
            .collect();
        tags.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
        Ok(tags)
    }
}
