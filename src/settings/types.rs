use serde::{Deserialize, Serialize};

use crate::types::SectionPath;

/// A typed setting payload.
///
/// Values arrive from the backend as arbitrary JSON; the fetch boundary
/// narrows them into this union once, so consumers never re-derive types
/// downstream. Anything that is not a scalar lands in [`SettingValue::Json`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    Json(serde_json::Value),
}

impl SettingValue {
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Integer(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for SettingValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for SettingValue {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<f64> for SettingValue {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for SettingValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

/// One configuration value within a settings section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct CachedSetting {
    pub section_path: SectionPath,
    pub name: String,
    pub value: SettingValue,
    #[serde(default)]
    pub default_value: Option<SettingValue>,
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub confidential: bool,
}

impl CachedSetting {
    #[must_use]
    pub fn new(section_path: SectionPath, name: impl Into<String>, value: SettingValue) -> Self {
        Self {
            section_path,
            name: name.into(),
            value,
            default_value: None,
            is_public: false,
            confidential: false,
        }
    }

    #[must_use]
    pub fn with_default_value(mut self, value: SettingValue) -> Self {
        self.default_value = Some(value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_values_narrow_at_the_fetch_boundary() {
        assert_eq!(
            serde_json::from_str::<SettingValue>("true").unwrap(),
            SettingValue::Bool(true)
        );
        assert_eq!(
            serde_json::from_str::<SettingValue>("600").unwrap(),
            SettingValue::Integer(600)
        );
        assert_eq!(
            serde_json::from_str::<SettingValue>("2.5").unwrap(),
            SettingValue::Float(2.5)
        );
        assert_eq!(
            serde_json::from_str::<SettingValue>("\"dark\"").unwrap(),
            SettingValue::Text("dark".into())
        );
    }

    #[test]
    fn structured_values_fall_through_to_json() {
        let value: SettingValue = serde_json::from_str("{\"hosts\":[\"a\",\"b\"]}").unwrap();
        assert!(matches!(value, SettingValue::Json(_)));
    }

    #[test]
    fn cached_setting_deserializes_camel_case() {
        let setting: CachedSetting = serde_json::from_str(
            r#"{
                "sectionPath": "Application.Security",
                "name": "session.timeout",
                "value": 600,
                "defaultValue": 300,
                "isPublic": true,
                "confidential": false
            }"#,
        )
        .unwrap();

        assert_eq!(setting.section_path.as_str(), "Application.Security");
        assert_eq!(setting.name, "session.timeout");
        assert_eq!(setting.value, SettingValue::Integer(600));
        assert_eq!(setting.default_value, Some(SettingValue::Integer(300)));
        assert!(setting.is_public);
    }

    #[test]
    fn optional_fields_default() {
        let setting: CachedSetting = serde_json::from_str(
            r#"{"sectionPath": "Application", "name": "theme", "value": "dark"}"#,
        )
        .unwrap();
        assert_eq!(setting.default_value, None);
        assert!(!setting.is_public);
        assert!(!setting.confidential);
    }
}
