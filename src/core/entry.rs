//! History entry types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Default vision-analysis provider name recorded on entries.
pub const DEFAULT_ANALYSIS_PROVIDER: &str = "visionati";

/// Default language-model provider name recorded on entries.
pub const DEFAULT_PROMPT_PROVIDER: &str = "straico";

/// A completed generation run, as listed in history.
///
/// `id` and `created_at` are assigned once by whichever adapter stored the
/// entry. Entries are never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Opaque identifier (timestamp string locally, backend id remotely).
    pub id: String,

    /// When the entry was stored.
    pub created_at: DateTime<Utc>,

    /// Everything the caller supplied.
    #[serde(flatten)]
    pub content: NewHistoryEntry,
}

impl HistoryEntry {
    /// Attach an id and creation time to caller-supplied content.
    #[must_use]
    pub fn new(id: impl Into<String>, created_at: DateTime<Utc>, content: NewHistoryEntry) -> Self {
        Self {
            id: id.into(),
            created_at,
            content,
        }
    }

    /// Source image name.
    #[must_use]
    pub fn image_name(&self) -> &str {
        &self.content.image_name
    }

    /// Generated image description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.content.description
    }
}

/// Caller-supplied content of a history entry, before an adapter assigns
/// identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewHistoryEntry {
    /// Source image URL or blob reference.
    pub image_url: Option<String>,

    /// Source image file name.
    pub image_name: String,

    /// Source image size in bytes.
    pub image_size: Option<u64>,

    /// Description returned by the vision-analysis provider.
    pub description: String,

    /// Extracted tags, in provider order.
    pub tags: Vec<String>,

    /// Extracted dominant colors, in provider order.
    pub colors: Vec<String>,

    /// Generated content items, in generation order.
    pub prompts: Vec<GeneratedContent>,

    /// Generation parameters used for this run.
    pub template_params: Map<String, Value>,

    /// Raw analysis metadata.
    pub analysis_data: Map<String, Value>,

    /// End-to-end processing time in milliseconds.
    pub processing_time: Option<u64>,

    /// Credits consumed upstream.
    pub credits_used: f64,

    /// Vision-analysis provider name.
    pub analysis_provider: String,

    /// Language-model provider name.
    pub prompt_provider: String,
}

impl Default for NewHistoryEntry {
    fn default() -> Self {
        Self {
            image_url: None,
            image_name: String::new(),
            image_size: None,
            description: String::new(),
            tags: Vec::new(),
            colors: Vec::new(),
            prompts: Vec::new(),
            template_params: Map::new(),
            analysis_data: Map::new(),
            processing_time: None,
            credits_used: 0.0,
            analysis_provider: DEFAULT_ANALYSIS_PROVIDER.to_string(),
            prompt_provider: DEFAULT_PROMPT_PROVIDER.to_string(),
        }
    }
}

impl NewHistoryEntry {
    /// Start an entry for an image and its description.
    #[must_use]
    pub fn new(image_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            image_name: image_name.into(),
            description: description.into(),
            ..Self::default()
        }
    }

    /// Set the generated content items.
    #[must_use]
    pub fn with_prompts(mut self, prompts: Vec<GeneratedContent>) -> Self {
        self.prompts = prompts;
        self
    }

    /// Set the extracted tags.
    #[must_use]
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
}

/// One generated prompt, title, or product description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedContent {
    /// Prompt text (AI art prompts).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Product title (e-commerce mode).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Product description (e-commerce mode).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Style label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,

    /// Variation label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variation: Option<String>,

    /// When the item was generated.
    pub timestamp: DateTime<Utc>,
}

impl GeneratedContent {
    /// A plain prompt with a style label.
    #[must_use]
    pub fn prompt(text: impl Into<String>, style: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            title: None,
            description: None,
            style: Some(style.into()),
            variation: None,
            timestamp: Utc::now(),
        }
    }

    /// The best single line to show for this item.
    #[must_use]
    pub fn headline(&self) -> &str {
        self.text
            .as_deref()
            .or(self.title.as_deref())
            .or(self.description.as_deref())
            .unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn new_entry_has_provider_defaults() {
        let entry = NewHistoryEntry::new("cat.png", "a cat");
        assert_eq!(entry.analysis_provider, "visionati");
        assert_eq!(entry.prompt_provider, "straico");
        assert!(entry.tags.is_empty());
    }

    #[test]
    fn entry_serializes_flat_camel_case() {
        let entry = HistoryEntry::new("1", Utc::now(), NewHistoryEntry::new("cat.png", "a cat"));
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["id"], "1");
        assert_eq!(value["imageName"], "cat.png");
        assert!(value.get("content").is_none());
        assert!(value.get("createdAt").is_some());
    }

    #[test]
    fn entry_tolerates_missing_optional_fields() {
        let value = json!({
            "id": "42",
            "createdAt": "2025-01-01T00:00:00Z",
            "imageName": "dog.jpg",
            "description": "a dog"
        });
        let entry: HistoryEntry = serde_json::from_value(value).unwrap();
        assert_eq!(entry.image_name(), "dog.jpg");
        assert!(entry.content.prompts.is_empty());
        assert_eq!(entry.content.prompt_provider, "straico");
    }

    #[test]
    fn headline_prefers_text_then_title() {
        let prompt = GeneratedContent::prompt("masterful cat", "photographic");
        assert_eq!(prompt.headline(), "masterful cat");

        let product = GeneratedContent {
            text: None,
            title: Some("Cat Mug".to_string()),
            description: Some("A mug".to_string()),
            style: None,
            variation: None,
            timestamp: Utc::now(),
        };
        assert_eq!(product.headline(), "Cat Mug");
    }
}
