//! Minimal field-level patches between two keyed collections.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::types::SyncRecord;

/// One PATCH body element: the record id plus only the fields that changed.
pub type PatchEntry = Map<String, Value>;

const ID_FIELD: &str = "id";

/// Patch turning `old` into `new`.
///
/// Records absent from `old` are sent whole; unchanged records are dropped.
/// An empty result means there is nothing to send.
pub fn diff<R: SyncRecord>(old: &[R], new: &[R]) -> Vec<PatchEntry> {
    diff_objects(&to_objects(old), &to_objects(new))
}

/// Same as [`diff`] over already-serialized JSON objects keyed by their `id` field.
pub fn diff_objects(old: &[PatchEntry], new: &[PatchEntry]) -> Vec<PatchEntry> {
    let old_by_id: HashMap<String, &PatchEntry> = old
        .iter()
        .filter_map(|record| record.get(ID_FIELD).map(|id| (id_key(id), record)))
        .collect();

    new.iter()
        .filter_map(|record| {
            let previous = record
                .get(ID_FIELD)
                .and_then(|id| old_by_id.get(&id_key(id)));
            match previous {
                None => Some(record.clone()),
                Some(previous) => changed_fields(previous, record),
            }
        })
        .collect()
}

/// Id a patch entry targets, when it is a string.
pub fn entry_id(entry: &PatchEntry) -> Option<&str> {
    entry.get(ID_FIELD).and_then(Value::as_str)
}

/// Copy of `entry` aimed at `id`.
pub fn with_id(entry: &PatchEntry, id: &str) -> PatchEntry {
    let mut entry = entry.clone();
    entry.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
    entry
}

/// Apply `changes` to `records` in place. Listed fields overwrite, `null`
/// clears. An entry for an id not in `records` is appended when `insert`
/// accepts the id and the entry is a whole record.
pub fn apply<R: SyncRecord>(records: &mut Vec<R>, changes: &[PatchEntry], insert: impl Fn(&str) -> bool) {
    for change in changes {
        let Some(id) = entry_id(change) else {
            continue;
        };
        match records.iter().position(|r| r.id() == id) {
            Some(pos) => {
                let Ok(Value::Object(mut fields)) = serde_json::to_value(&records[pos]) else {
                    continue;
                };
                for (key, value) in change {
                    fields.insert(key.clone(), value.clone());
                }
                match serde_json::from_value(Value::Object(fields)) {
                    Ok(patched) => records[pos] = patched,
                    Err(e) => log::warn!("Delta: patch for {} does not fit the record: {}", id, e),
                }
            }
            None if insert(id) => match serde_json::from_value(Value::Object(change.clone())) {
                Ok(record) => records.push(record),
                Err(e) => log::debug!("Delta: partial entry for missing record {} skipped: {}", id, e),
            },
            None => {}
        }
    }
}

fn changed_fields(old: &PatchEntry, new: &PatchEntry) -> Option<PatchEntry> {
    let mut delta = PatchEntry::new();

    for (key, value) in new {
        if key != ID_FIELD && old.get(key) != Some(value) {
            delta.insert(key.clone(), value.clone());
        }
    }
    // A field dropped from the new record is cleared explicitly.
    for key in old.keys() {
        if key != ID_FIELD && !new.contains_key(key) {
            delta.insert(key.clone(), Value::Null);
        }
    }

    if delta.is_empty() {
        return None;
    }
    if let Some(id) = new.get(ID_FIELD) {
        delta.insert(ID_FIELD.to_string(), id.clone());
    }
    Some(delta)
}

fn id_key(id: &Value) -> String {
    match id {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn to_objects<R: SyncRecord>(records: &[R]) -> Vec<PatchEntry> {
    records
        .iter()
        .filter_map(|record| match serde_json::to_value(record) {
            Ok(Value::Object(fields)) => Some(fields),
            Ok(_) | Err(_) => {
                log::warn!("Delta: record {} does not serialize to an object", record.id());
                None
            }
        })
        .collect()
}
