//! `get_external_links`: curated external links keyed by travel topic.
//!
//! The mapping file is a JSON object from topic key to entry:
//!
//! ```json
//! {
//!   "pho_hanoi": {
//!     "keywords": ["phở", "pho", "noodle soup"],
//!     "links": [
//!       { "type": "map", "url": "https://maps.google.com/?q=Pho+Thin", "label": "Phở Thìn" }
//!     ]
//!   }
//! }
//! ```
//!
//! Topics are normalized before matching (lowercase, trimmed, whitespace and
//! hyphens become `_`). Matching tries an exact key, then key containment in
//! either direction, then keyword containment; the first hit in key order
//! wins. An unmatched topic yields no links.

use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use sapa_core::error::SapaError;
use sapa_core::types::Link;

use crate::error::ToolError;
use crate::registry::Tool;

pub const LINK_LOOKUP_TOOL: &str = "get_external_links";

/// Links and match keywords for one topic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopicLinks {
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub links: Vec<Link>,
}

/// Normalize a topic or key for matching.
pub fn normalize_topic(topic: &str) -> String {
    topic
        .trim()
        .to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '-' || c == '_')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

/// Link lookup over a mapping loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct LinkLookupTool {
    /// Keyed by normalized topic; entries keep normalized keywords.
    topics: BTreeMap<String, TopicLinks>,
}

impl LinkLookupTool {
    pub fn new(mapping: BTreeMap<String, TopicLinks>) -> Self {
        let topics = mapping
            .into_iter()
            .map(|(key, mut entry)| {
                entry.keywords = entry.keywords.iter().map(|k| normalize_topic(k)).collect();
                (normalize_topic(&key), entry)
            })
            .collect();
        Self { topics }
    }

    /// Load the mapping from a JSON file. Failure is a configuration error.
    pub fn from_file(path: &Path) -> Result<Self, SapaError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            SapaError::Config(format!("cannot read links file {}: {}", path.display(), e))
        })?;
        let mapping: BTreeMap<String, TopicLinks> = serde_json::from_str(&content).map_err(|e| {
            SapaError::Config(format!("invalid links file {}: {}", path.display(), e))
        })?;
        info!(path = %path.display(), topics = mapping.len(), "Link mapping loaded");
        Ok(Self::new(mapping))
    }

    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    /// Links for `topic`, or an empty list when nothing matches.
    pub fn lookup(&self, topic: &str) -> Vec<Link> {
        let wanted = normalize_topic(topic);
        if wanted.is_empty() {
            return Vec::new();
        }

        if let Some(entry) = self.topics.get(&wanted) {
            return entry.links.clone();
        }

        let contained = |a: &str, b: &str| a.contains(b) || b.contains(a);

        if let Some(entry) = self
            .topics
            .iter()
            .find(|(key, _)| contained(key, &wanted))
            .map(|(_, entry)| entry)
        {
            return entry.links.clone();
        }

        self.topics
            .values()
            .find(|entry| {
                entry
                    .keywords
                    .iter()
                    .any(|k| !k.is_empty() && contained(k, &wanted))
            })
            .map(|entry| entry.links.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Tool for LinkLookupTool {
    fn name(&self) -> &str {
        LINK_LOOKUP_TOOL
    }

    fn description(&self) -> &str {
        "Get external links (maps, reviews, videos, articles) for a Vietnam travel topic. \
         Use it when the user would benefit from a map location, a review, a video or an \
         article about a destination, dish or cultural attraction. Topics look like \
         'ha_long_bay', 'bun_cha', 'pho_hanoi' or 'water_puppet'."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "topic": {
                    "type": "string",
                    "minLength": 1,
                    "description": "Destination, food or cultural topic, e.g. 'ha_long_bay', 'bun_cha'"
                }
            },
            "required": ["topic"]
        })
    }

    async fn invoke(&self, arguments: Value) -> Result<Vec<Link>, ToolError> {
        let topic = arguments
            .get("topic")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::invalid(LINK_LOOKUP_TOOL, "topic must be a string"))?;
        Ok(self.lookup(topic))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sapa_core::types::LinkType;

    use crate::registry::ToolRegistry;

    fn link(link_type: LinkType, url: &str) -> Link {
        Link {
            link_type,
            url: url.to_string(),
            label: url.to_string(),
        }
    }

    fn tool() -> LinkLookupTool {
        let mut mapping = BTreeMap::new();
        mapping.insert(
            "pho_hanoi".to_string(),
            TopicLinks {
                keywords: vec!["phở".into(), "noodle soup".into()],
                links: vec![
                    link(LinkType::Map, "https://maps.example/pho-thin"),
                    link(LinkType::Review, "https://reviews.example/pho-thin"),
                ],
            },
        );
        mapping.insert(
            "Ha Long Bay".to_string(),
            TopicLinks {
                keywords: vec!["vịnh hạ long".into(), "halong".into()],
                links: vec![link(LinkType::Video, "https://video.example/halong")],
            },
        );
        mapping.insert(
            "bun_cha".to_string(),
            TopicLinks {
                keywords: vec!["grilled pork".into()],
                links: vec![link(LinkType::Article, "https://blog.example/bun-cha")],
            },
        );
        LinkLookupTool::new(mapping)
    }

    #[test]
    fn test_normalize_topic() {
        assert_eq!(normalize_topic("  Pho-Hanoi "), "pho_hanoi");
        assert_eq!(normalize_topic("Ha  Long\tBay"), "ha_long_bay");
        assert_eq!(normalize_topic("bun__cha"), "bun_cha");
        assert_eq!(normalize_topic("   "), "");
    }

    #[test]
    fn test_exact_match_returns_map_link() {
        let links = tool().lookup("pho-hanoi");
        assert!(links.iter().any(|l| l.link_type == LinkType::Map));
        assert_eq!(links.len(), 2);
    }

    #[test]
    fn test_key_normalized_at_load() {
        let links = tool().lookup("ha_long_bay");
        assert_eq!(links[0].url, "https://video.example/halong");
    }

    #[test]
    fn test_substring_match_either_direction() {
        assert_eq!(tool().lookup("pho").len(), 2);
        assert_eq!(tool().lookup("best bun cha in hanoi").len(), 1);
    }

    #[test]
    fn test_keyword_match() {
        let links = tool().lookup("Vịnh Hạ Long");
        assert_eq!(links[0].link_type, LinkType::Video);
        let links = tool().lookup("grilled pork");
        assert_eq!(links[0].link_type, LinkType::Article);
    }

    #[test]
    fn test_unmatched_topic_is_empty() {
        assert!(tool().lookup("mekong_delta").is_empty());
        assert!(tool().lookup("   ").is_empty());
        assert!(LinkLookupTool::default().lookup("pho-hanoi").is_empty());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("links.json");
        std::fs::write(
            &path,
            r#"{
                "pho-hanoi": {
                    "keywords": ["phở"],
                    "links": [{"type": "map", "url": "https://maps.example/pho", "label": "Phở Thìn"}]
                }
            }"#,
        )
        .unwrap();

        let tool = LinkLookupTool::from_file(&path).unwrap();
        assert_eq!(tool.topic_count(), 1);
        assert_eq!(tool.lookup("pho hanoi")[0].label, "Phở Thìn");
    }

    #[test]
    fn test_from_file_errors_are_config_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("links.json");
        std::fs::write(&path, r#"{"x": {"links": [{"type": "podcast", "url": "u", "label": "l"}]}}"#)
            .unwrap();
        assert!(matches!(
            LinkLookupTool::from_file(&path),
            Err(SapaError::Config(_))
        ));
        assert!(matches!(
            LinkLookupTool::from_file(&dir.path().join("missing.json")),
            Err(SapaError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_through_registry() {
        let mut registry = ToolRegistry::new();
        registry.register(tool()).unwrap();

        let links = registry
            .invoke(LINK_LOOKUP_TOOL, r#"{"topic": "pho-hanoi"}"#)
            .await
            .unwrap();
        assert!(links.iter().any(|l| l.link_type == LinkType::Map));

        let none = registry
            .invoke(LINK_LOOKUP_TOOL, r#"{"topic": "atlantis"}"#)
            .await
            .unwrap();
        assert!(none.is_empty());

        let err = registry
            .invoke(LINK_LOOKUP_TOOL, r#"{"topic": ""}"#)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }
}
