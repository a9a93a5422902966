//! Metadata templates for newly inserted entities.
//!
//! A new entity copies *structural* fields (layout type, alignment, option
//! lists, ...) from a sibling in the same group when one exists, falling
//! back to per-field defaults. Content is never copied.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::models::StoredEntity;

pub const CREATED_AT: &str = "createdAt";
pub const META: &str = "meta";
pub const META_CREATED_AT: &str = "createdAt";
pub const META_UPDATED_AT: &str = "updatedAt";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataTemplate {
    /// Structural fields taken from the sibling when present, else these values.
    #[serde(default)]
    pub defaults: Map<String, Value>,
    /// Fields always set to these values on a new entity.
    #[serde(default)]
    pub reset: Map<String, Value>,
}

impl Default for MetadataTemplate {
    fn default() -> Self {
        Self::builtin()
    }
}

impl MetadataTemplate {
    /// Flashcard-shaped defaults: a centered Q/A card with no media.
    pub fn builtin() -> Self {
        let defaults = json!({
            "type": "qa",
            "textAlign": "center",
            "questionTextAlign": "center",
            "answerTextAlign": "center",
            "optionsTextAlign": "left",
            "options": [],
        });
        let reset = json!({
            "imagesQ": [],
            "imagesA": [],
            "imageDataQ": "",
            "imageDataA": "",
        });
        Self {
            defaults: into_map(defaults),
            reset: into_map(reset),
        }
    }

    /// Every key this template writes.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.defaults.keys().chain(self.reset.keys())
    }

    /// Build the metadata of a new entity.
    ///
    /// Precedence for a `defaults` key: incoming `extra`, then the sibling,
    /// then the default value. `extra` keys the template does not know are
    /// ignored. Creation timestamps are stamped last.
    pub fn instantiate(
        &self,
        sibling: Option<&StoredEntity>,
        extra: &Map<String, Value>,
        now: DateTime<Utc>,
    ) -> Map<String, Value> {
        let mut out = Map::new();
        for (key, default) in &self.defaults {
            let value = extra
                .get(key)
                .or_else(|| sibling.and_then(|s| s.metadata.get(key)))
                .unwrap_or(default);
            out.insert(key.clone(), value.clone());
        }
        for (key, value) in &self.reset {
            out.insert(key.clone(), value.clone());
        }

        let ts = Value::String(iso_millis(now));
        out.insert(CREATED_AT.to_string(), ts.clone());
        out.insert(
            META.to_string(),
            json!({ META_CREATED_AT: ts.clone(), META_UPDATED_AT: ts }),
        );
        out
    }
}

/// Refresh `meta.updatedAt`, replacing `meta` if it is missing or not an object.
pub fn touch(metadata: &mut Map<String, Value>, now: DateTime<Utc>) {
    let meta = metadata
        .entry(META.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !meta.is_object() {
        *meta = Value::Object(Map::new());
    }
    if let Value::Object(obj) = meta {
        obj.insert(META_UPDATED_AT.to_string(), Value::String(iso_millis(now)));
    }
}

/// ISO-8601 UTC with millisecond precision and a `Z` suffix.
pub fn iso_millis(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn into_map(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Content;
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 6, 7, 8, 9).unwrap()
    }

    fn sibling() -> StoredEntity {
        let mut metadata = Map::new();
        metadata.insert("type".into(), json!("mcq"));
        metadata.insert("textAlign".into(), json!("left"));
        metadata.insert("imagesQ".into(), json!(["a.png"]));
        metadata.insert("custom".into(), json!(true));
        StoredEntity {
            id: "s".into(),
            group_key: "g".into(),
            content: Content::new("sibling question", "sibling answer"),
            metadata,
            updated_at: 0,
        }
    }

    #[test]
    fn test_iso_millis_format() {
        assert_eq!(iso_millis(now()), "2024-05-06T07:08:09.000Z");
    }

    #[test]
    fn test_builtin_without_sibling() {
        let m = MetadataTemplate::builtin().instantiate(None, &Map::new(), now());
        assert_eq!(m["type"], json!("qa"));
        assert_eq!(m["optionsTextAlign"], json!("left"));
        assert_eq!(m["imageDataA"], json!(""));
        assert_eq!(m["createdAt"], json!("2024-05-06T07:08:09.000Z"));
        assert_eq!(m["meta"]["updatedAt"], json!("2024-05-06T07:08:09.000Z"));
    }

    #[test]
    fn test_copies_structure_not_content_or_media() {
        let s = sibling();
        let m = MetadataTemplate::builtin().instantiate(Some(&s), &Map::new(), now());
        assert_eq!(m["type"], json!("mcq"));
        assert_eq!(m["textAlign"], json!("left"));
        assert_eq!(m["questionTextAlign"], json!("center"));
        assert_eq!(m["imagesQ"], json!([]));
        assert!(!m.contains_key("custom"));
        assert!(!m.values().any(|v| v == &json!("sibling question")));
    }

    #[test]
    fn test_extra_overrides_known_keys_only() {
        let s = sibling();
        let mut extra = Map::new();
        extra.insert("type".into(), json!("qa"));
        extra.insert("question_id".into(), json!("Q7"));
        let m = MetadataTemplate::builtin().instantiate(Some(&s), &extra, now());
        assert_eq!(m["type"], json!("qa"));
        assert!(!m.contains_key("question_id"));
    }

    #[test]
    fn test_touch_repairs_meta() {
        let mut md = Map::new();
        md.insert("meta".into(), json!("broken"));
        touch(&mut md, now());
        assert_eq!(md["meta"], json!({"updatedAt": "2024-05-06T07:08:09.000Z"}));

        let mut md = Map::new();
        md.insert("meta".into(), json!({"createdAt": "x"}));
        touch(&mut md, now());
        assert_eq!(md["meta"]["createdAt"], json!("x"));
        assert_eq!(md["meta"]["updatedAt"], json!("2024-05-06T07:08:09.000Z"));
    }
}
