//! Mapping between opaque JSON payloads and [`StoredEntity`] values.
//!
//! Stores hold one JSON object per record. The layout names the four fields
//! the core cares about; every other field is carried through untouched as
//! entity metadata.

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::{Content, StoredEntity};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordLayout {
    #[serde(default = "default_id_field")]
    pub id_field: String,
    #[serde(default = "default_group_field")]
    pub group_field: String,
    #[serde(default = "default_primary_field")]
    pub primary_field: String,
    #[serde(default = "default_secondary_field")]
    pub secondary_field: String,
}

fn default_id_field() -> String {
    "id".to_string()
}
fn default_group_field() -> String {
    "topicId".to_string()
}
fn default_primary_field() -> String {
    "prompt".to_string()
}
fn default_secondary_field() -> String {
    "answer".to_string()
}

impl Default for RecordLayout {
    fn default() -> Self {
        Self {
            id_field: default_id_field(),
            group_field: default_group_field(),
            primary_field: default_primary_field(),
            secondary_field: default_secondary_field(),
        }
    }
}

impl RecordLayout {
    /// The four field names, in declaration order.
    pub fn fields(&self) -> [&str; 4] {
        [
            self.id_field.as_str(),
            self.group_field.as_str(),
            self.primary_field.as_str(),
            self.secondary_field.as_str(),
        ]
    }

    /// Field names must be non-empty, distinct, and plain identifiers
    /// (they are embedded in JSON paths by the SQLite store).
    pub fn validate(&self) -> Result<()> {
        let fields = self.fields();
        for (i, name) in fields.iter().enumerate() {
            if name.is_empty() {
                bail!("layout field names must not be empty");
            }
            if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
                bail!("layout field '{}' must only contain [A-Za-z0-9_]", name);
            }
            if fields[..i].contains(name) {
                bail!("layout field '{}' is used twice", name);
            }
        }
        Ok(())
    }

    /// JSON path of the group field, e.g. `$.topicId`.
    pub fn group_path(&self) -> String {
        format!("$.{}", self.group_field)
    }

    /// Decode a stored payload. The record key is authoritative for the id.
    ///
    /// Missing or `null` text fields decode as empty strings; a missing
    /// group field or a non-object payload is an error.
    pub fn decode(&self, id: &str, payload: &Value, updated_at: i64) -> Result<StoredEntity> {
        let obj = payload
            .as_object()
            .ok_or_else(|| anyhow!("payload of '{}' is not a JSON object", id))?;

        let group_key = obj
            .get(&self.group_field)
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("payload of '{}' has no string '{}'", id, self.group_field))?
            .to_string();
        let primary = text_field(obj, &self.primary_field, id)?;
        let secondary = text_field(obj, &self.secondary_field, id)?;

        let metadata: Map<String, Value> = obj
            .iter()
            .filter(|(k, _)| !self.fields().contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        Ok(StoredEntity {
            id: id.to_string(),
            group_key,
            content: Content { primary, secondary },
            metadata,
            updated_at,
        })
    }

    pub fn encode(&self, entity: &StoredEntity) -> Value {
        let mut obj = entity.metadata.clone();
        obj.insert(self.id_field.clone(), Value::String(entity.id.clone()));
        obj.insert(
            self.group_field.clone(),
            Value::String(entity.group_key.clone()),
        );
        obj.insert(
            self.primary_field.clone(),
            Value::String(entity.content.primary.clone()),
        );
        obj.insert(
            self.secondary_field.clone(),
            Value::String(entity.content.secondary.clone()),
        );
        Value::Object(obj)
    }
}

fn text_field(obj: &Map<String, Value>, field: &str, id: &str) -> Result<String> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(String::new()),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(other) => bail!(
            "field '{}' of '{}' is not a string (found {})",
            field,
            id,
            other
        ),
    }
}
