//! Settings record types.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Setting category for API keys.
pub const CATEGORY_API: &str = "api";

/// Setting category for generation templates.
pub const CATEGORY_TEMPLATE: &str = "template";

/// Setting key for the default generation parameters.
pub const KEY_DEFAULT_PARAMS: &str = "default_params";

/// Upstream provider whose API key is stored in settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiProvider {
    /// Vision-analysis provider.
    Visionati,
    /// Language-model provider.
    Straico,
}

impl ApiProvider {
    /// All providers, in display order.
    pub const ALL: [Self; 2] = [Self::Visionati, Self::Straico];

    /// Key of this provider's row in the `api` settings category.
    #[must_use]
    pub fn setting_key(self) -> &'static str {
        match self {
            Self::Visionati => "visionati_key",
            Self::Straico => "straico_key",
        }
    }

    /// Local storage namespace of the standalone key mirror.
    #[must_use]
    pub fn mirror_namespace(self) -> &'static str {
        match self {
            Self::Visionati => "visionati_api_key",
            Self::Straico => "straico_api_key",
        }
    }

    /// Human readable name.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Visionati => "Visionati",
            Self::Straico => "Straico",
        }
    }
}

impl std::str::FromStr for ApiProvider {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "visionati" => Ok(Self::Visionati),
            "straico" => Ok(Self::Straico),
            other => Err(crate::Error::InvalidState(format!(
                "unknown provider: {other}"
            ))),
        }
    }
}

/// Default generation parameters.
///
/// Every known field always has a value. Unknown fields coming back from
/// storage are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TemplateParams {
    pub style: String,
    pub length: String,
    pub tone: String,
    pub artistic_style: String,
    pub mood: String,
    pub lighting: String,
    pub composition: String,
    pub manual_prompt: String,

    /// Free-form fields without a typed slot.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for TemplateParams {
    fn default() -> Self {
        Self {
            style: "Photorealistic".to_string(),
            length: "Medium".to_string(),
            tone: "Descriptive".to_string(),
            artistic_style: "None".to_string(),
            mood: "Neutral".to_string(),
            lighting: "Natural".to_string(),
            composition: "Balanced".to_string(),
            manual_prompt: String::new(),
            extra: Map::new(),
        }
    }
}

impl TemplateParams {
    /// Overlay a stored JSON object onto the defaults.
    ///
    /// Fields missing from `value` keep their default, as do stored fields
    /// of the wrong type. A value that is not an object yields the defaults.
    #[must_use]
    pub fn merged_over_defaults(value: &Value) -> Self {
        let Value::Object(stored) = value else {
            return Self::default();
        };
        let mut merged = match serde_json::to_value(Self::default()) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        };
        for (k, v) in stored {
            let previous = merged.insert(k.clone(), v.clone());
            if serde_json::from_value::<Self>(Value::Object(merged.clone())).is_err() {
                debug!(field = %k, "ignoring stored template param of the wrong type");
                match previous {
                    Some(p) => merged.insert(k.clone(), p),
                    None => merged.remove(k),
                };
            }
        }
        serde_json::from_value(Value::Object(merged)).unwrap_or_default()
    }

    /// Serialize as a JSON object.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// API keys plus default generation parameters.
///
/// An empty key means "not set".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct SettingsRecord {
    pub visionati_key: String,
    pub straico_key: String,
    pub default_template_params: TemplateParams,
}

impl SettingsRecord {
    /// Key for a provider.
    #[must_use]
    pub fn key(&self, provider: ApiProvider) -> &str {
        match provider {
            ApiProvider::Visionati => &self.visionati_key,
            ApiProvider::Straico => &self.straico_key,
        }
    }

    /// Key for a provider, `None` when empty.
    #[must_use]
    pub fn key_if_set(&self, provider: ApiProvider) -> Option<&str> {
        Some(self.key(provider)).filter(|k| !k.is_empty())
    }

    /// Apply one field change.
    pub fn apply(&mut self, field: &SettingField) {
        match field {
            SettingField::ApiKey(ApiProvider::Visionati, key) => {
                self.visionati_key.clone_from(key);
            }
            SettingField::ApiKey(ApiProvider::Straico, key) => self.straico_key.clone_from(key),
            SettingField::TemplateParams(params) => {
                self.default_template_params = params.clone();
            }
        }
    }

    /// Fold backend key/value rows into a record.
    ///
    /// Fields without a row keep the value from `self`. Unknown rows are
    /// ignored.
    #[must_use]
    pub fn with_rows(mut self, rows: &[SettingRow]) -> Self {
        for row in rows {
            match (row.category.as_str(), row.key.as_str()) {
                (CATEGORY_API, "visionati_key") => {
                    self.visionati_key = value_as_string(&row.value);
                }
                (CATEGORY_API, "straico_key") => {
                    self.straico_key = value_as_string(&row.value);
                }
                (CATEGORY_TEMPLATE, KEY_DEFAULT_PARAMS) => {
                    self.default_template_params = TemplateParams::merged_over_defaults(&row.value);
                }
                (category, key) => debug!(category, key, "ignoring unknown setting row"),
            }
        }
        self
    }
}

fn value_as_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// A single settings change, as issued by a setter.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingField {
    /// Set (or clear, with an empty string) a provider API key.
    ApiKey(ApiProvider, String),
    /// Replace the default generation parameters.
    TemplateParams(TemplateParams),
}

impl SettingField {
    /// Backend row for this change, keyed by category and key.
    #[must_use]
    pub fn to_row(&self) -> SettingRow {
        match self {
            Self::ApiKey(provider, key) => SettingRow {
                category: CATEGORY_API.to_string(),
                key: provider.setting_key().to_string(),
                value: Value::String(key.clone()),
            },
            Self::TemplateParams(params) => SettingRow {
                category: CATEGORY_TEMPLATE.to_string(),
                key: KEY_DEFAULT_PARAMS.to_string(),
                value: params.to_value(),
            },
        }
    }
}

/// Owner-scoped settings row, unique on (owner, category, key).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettingRow {
    pub category: String,
    pub key: String,
    pub value: Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn template_defaults() {
        let params = TemplateParams::default();
        assert_eq!(params.style, "Photorealistic");
        assert_eq!(params.composition, "Balanced");
        assert!(params.manual_prompt.is_empty());
    }

    #[test]
    fn merge_keeps_defaults_for_missing_fields() {
        let params = TemplateParams::merged_over_defaults(&json!({
            "mood": "Dramatic",
            "seed": 7
        }));
        assert_eq!(params.mood, "Dramatic");
        assert_eq!(params.style, "Photorealistic");
        assert_eq!(params.extra.get("seed"), Some(&json!(7)));
    }

    #[test]
    fn merge_skips_only_mistyped_fields() {
        let params = TemplateParams::merged_over_defaults(&json!({
            "mood": 5,
            "tone": "Playful",
            "lighting": null
        }));
        assert_eq!(params.mood, "Neutral");
        assert_eq!(params.lighting, "Natural");
        assert_eq!(params.tone, "Playful");
    }

    #[test]
    fn merge_of_non_object_is_default() {
        assert_eq!(
            TemplateParams::merged_over_defaults(&json!("nonsense")),
            TemplateParams::default()
        );
    }

    #[test]
    fn rows_fold_into_record() {
        let rows = vec![
            SettingField::ApiKey(ApiProvider::Visionati, "v-key".to_string()).to_row(),
            SettingRow {
                category: "template".to_string(),
                key: "default_params".to_string(),
                value: json!({"tone": "Playful"}),
            },
            SettingRow {
                category: "ui".to_string(),
                key: "theme".to_string(),
                value: json!("dark"),
            },
        ];
        let record = SettingsRecord::default().with_rows(&rows);
        assert_eq!(record.visionati_key, "v-key");
        assert!(record.straico_key.is_empty());
        assert_eq!(record.default_template_params.tone, "Playful");
        assert_eq!(record.default_template_params.length, "Medium");
    }

    #[test]
    fn absent_rows_keep_existing_values() {
        let mut base = SettingsRecord::default();
        base.straico_key = "kept".to_string();
        let record = base.with_rows(&[]);
        assert_eq!(record.straico_key, "kept");
    }

    #[test]
    fn empty_key_is_unset() {
        let mut record = SettingsRecord::default();
        assert!(record.key_if_set(ApiProvider::Straico).is_none());
        record.apply(&SettingField::ApiKey(ApiProvider::Straico, "s".to_string()));
        assert_eq!(record.key_if_set(ApiProvider::Straico), Some("s"));
    }

    #[test]
    fn provider_from_str() {
        assert_eq!("Visionati".parse::<ApiProvider>().unwrap(), ApiProvider::Visionati);
        assert!("openai".parse::<ApiProvider>().is_err());
    }
}
