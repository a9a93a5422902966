//! JSON content source.
//!
//! Reads freshly generated records from a JSON file in one of two shapes:
//!
//! ```json
//! { "Topic 1: Global Warming": [ { "question_id": "Q1", "question": "...", "answer": "..." } ] }
//! ```
//!
//! ```json
//! { "cards": [ { "topic": "Topic 1: Global Warming", "question": "...", "answer": "..." } ] }
//! ```
//!
//! Records are partitioned by label, labels are mapped to group keys through
//! the `[groups]` table, and each group is ordered by its records'
//! `question_id` number. Records without usable text, and flat-shape cards
//! without a usable `topic`, are set aside as [`MalformedRecord`]s rather
//! than failing the load.

use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use carryover_core::error::SyncError;
use carryover_core::models::{Content, IncomingRecord, MalformedRecord};

use crate::config::Config;

const QUESTION: &str = "question";
const ANSWER: &str = "answer";
const QUESTION_ID: &str = "question_id";
const TOPIC: &str = "topic";
const FLAT_KEY: &str = "cards";

/// Incoming records for one group key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupInput {
    pub group_key: String,
    /// Source labels mapped to this group, in first-seen order.
    pub labels: Vec<String>,
    /// Ordered by `sequence_hint` (stable).
    pub records: Vec<IncomingRecord>,
    pub malformed: Vec<MalformedRecord>,
}

/// Everything read from a content source.
#[derive(Debug, Default)]
pub struct SourceBatch {
    /// Keyed by group key.
    pub groups: BTreeMap<String, GroupInput>,
    /// Labels that could not be mapped to a group.
    pub unmapped: Vec<SyncError>,
    /// Flat-shape cards without a usable `topic`; they belong to no group.
    pub unassigned: Vec<MalformedRecord>,
}

impl SourceBatch {
    /// Records for `group_key`, ordered by sequence hint. Empty for an
    /// unknown group.
    pub fn fetch_incoming(&self, group_key: &str) -> &[IncomingRecord] {
        self.groups
            .get(group_key)
            .map(|g| g.records.as_slice())
            .unwrap_or(&[])
    }
}

/// Load and parse the configured source file.
pub fn load_source(config: &Config) -> Result<SourceBatch> {
    let path = &config.source.path;
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read content source: {}", path.display()))?;
    let batch = parse_source(&text, &config.groups)
        .with_context(|| format!("Invalid content source: {}", path.display()))?;

    if config.source.require_all_groups {
        let seen: Vec<&String> = batch.groups.values().flat_map(|g| &g.labels).collect();
        let missing: Vec<&String> = config
            .groups
            .keys()
            .filter(|label| !seen.contains(label))
            .collect();
        if !missing.is_empty() {
            bail!(
                "content source is missing configured group(s): {}",
                missing
                    .iter()
                    .map(|s| format!("'{}'", s))
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
    }

    Ok(batch)
}

/// Parse source text. `groups` maps labels to group keys; when empty,
/// labels are used as group keys directly.
pub fn parse_source(text: &str, groups: &BTreeMap<String, String>) -> Result<SourceBatch> {
    let root: Value = serde_json::from_str(text).context("content source is not valid JSON")?;
    let Value::Object(root) = root else {
        bail!("content source must be a JSON object");
    };

    let (labelled, unassigned) = partition(root)?;

    let mut batch = SourceBatch {
        unassigned,
        ..SourceBatch::default()
    };
    for (label, items) in labelled {
        let group_key = if groups.is_empty() {
            label.clone()
        } else {
            match groups.get(&label) {
                Some(key) => key.clone(),
                None => {
                    tracing::warn!(label = %label, records = items.len(), "unmapped source label");
                    batch.unmapped.push(SyncError::GroupNotFound {
                        group: label.clone(),
                        reason: format!("source label has no [groups] entry ({} record(s))", items.len()),
                    });
                    continue;
                }
            }
        };

        let entry = batch
            .groups
            .entry(group_key.clone())
            .or_insert_with(|| GroupInput {
                group_key: group_key.clone(),
                ..GroupInput::default()
            });
        if !entry.labels.contains(&label) {
            entry.labels.push(label.clone());
        }
        for (position, item) in items.into_iter().enumerate() {
            match parse_record(item, &group_key) {
                Ok(record) => entry.records.push(record),
                Err(reason) => {
                    tracing::warn!(label = %label, position, reason = %reason, "malformed record");
                    entry.malformed.push(MalformedRecord {
                        label: label.clone(),
                        position,
                        reason,
                    });
                }
            }
        }
    }

    for group in batch.groups.values_mut() {
        group.records.sort_by_key(|r| r.sequence_hint);
    }
    Ok(batch)
}

/// Records split by label, plus flat-shape cards that carry no usable label.
type Partition = (Vec<(String, Vec<Value>)>, Vec<MalformedRecord>);

/// Split the root object into `(label, items)` pairs.
///
/// The flat shape is a lone `cards` array of objects where at least one card
/// carries a `topic`. Cards whose `topic` is missing, blank or not a string
/// are returned as malformed instead of being filed under `cards`.
fn partition(mut root: Map<String, Value>) -> Result<Partition> {
    let is_flat = root.len() == 1
        && matches!(root.get(FLAT_KEY), Some(Value::Array(items))
            if items.iter().all(Value::is_object)
                && items.iter().any(|i| i.get(TOPIC).is_some()));

    if is_flat {
        let Some(Value::Array(items)) = root.remove(FLAT_KEY) else {
            bail!("'{}' must be an array", FLAT_KEY);
        };
        let mut out: Vec<(String, Vec<Value>)> = Vec::new();
        let mut unassigned = Vec::new();
        for (position, item) in items.into_iter().enumerate() {
            let label = match item.get(TOPIC) {
                Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
                Some(Value::String(_)) => {
                    unassigned.push(unlabelled(position, format!("'{}' is blank", TOPIC)));
                    continue;
                }
                Some(other) => {
                    let reason = format!("'{}' is {}, not a string", TOPIC, kind(other));
                    unassigned.push(unlabelled(position, reason));
                    continue;
                }
                None => {
                    unassigned.push(unlabelled(position, format!("missing '{}'", TOPIC)));
                    continue;
                }
            };
            match out.iter_mut().find(|(l, _)| *l == label) {
                Some((_, list)) => list.push(item),
                None => out.push((label, vec![item])),
            }
        }
        return Ok((out, unassigned));
    }

    let labelled = root
        .into_iter()
        .map(|(label, value)| match value {
            Value::Array(items) => Ok((label, items)),
            other => bail!(
                "label '{}' must map to an array of records, found {}",
                label,
                kind(&other)
            ),
        })
        .collect::<Result<Vec<_>>>()?;
    Ok((labelled, Vec::new()))
}

fn unlabelled(position: usize, reason: String) -> MalformedRecord {
    tracing::warn!(position, reason = %reason, "card has no usable topic");
    MalformedRecord {
        label: FLAT_KEY.to_string(),
        position,
        reason,
    }
}

fn parse_record(item: Value, group_key: &str) -> std::result::Result<IncomingRecord, String> {
    let mut obj = match item {
        Value::Object(obj) => obj,
        other => return Err(format!("record is {}, not an object", kind(&other))),
    };

    let question = required_text(&obj, QUESTION)?;
    let answer = required_text(&obj, ANSWER)?;
    let sequence_hint = obj
        .get(QUESTION_ID)
        .map(sequence_hint)
        .unwrap_or(0);

    obj.remove(QUESTION);
    obj.remove(ANSWER);
    obj.remove(TOPIC);

    Ok(IncomingRecord {
        group_key: group_key.to_string(),
        content: Content::new(question, answer),
        sequence_hint,
        extra: obj,
    })
}

fn required_text(obj: &Map<String, Value>, field: &str) -> std::result::Result<String, String> {
    match obj.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.clone()),
        Some(Value::String(_)) => Err(format!("'{}' is blank", field)),
        Some(other) => Err(format!("'{}' is {}, not a string", field, kind(other))),
        None => Err(format!("missing '{}'", field)),
    }
}

/// First run of ASCII digits in a question id (`"Q12"` → 12); 0 when none.
pub fn sequence_hint(id: &Value) -> i64 {
    match id {
        Value::Number(n) => n.as_i64().unwrap_or(0),
        Value::String(s) => s
            .chars()
            .skip_while(|c| !c.is_ascii_digit())
            .take_while(char::is_ascii_digit)
            .collect::<String>()
            .parse()
            .unwrap_or(0),
        _ => 0,
    }
}

fn kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
