//! Filter, sort and patch evaluation over JSON documents.

use std::cmp::Ordering;

use serde_json::{Map, Value};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::application::repos::{Condition, Filter, Patch, SortDirection, SortKey};

/// Resolve a dotted path; missing segments resolve to `None`.
pub(crate) fn lookup<'a>(document: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(document, |current, segment| current.get(segment))
}

pub(crate) fn matches(document: &Value, filter: &Filter) -> bool {
    filter
        .conditions
        .iter()
        .all(|condition| satisfies(document, condition))
}

fn satisfies(document: &Value, condition: &Condition) -> bool {
    match condition {
        Condition::Eq { field, value } => equals(lookup(document, field), value),
        Condition::Ne { field, value } => !equals(lookup(document, field), value),
        Condition::In { field, values } => {
            let actual = lookup(document, field);
            values.iter().any(|value| equals(actual, value))
        }
        Condition::Gte { field, value } => lookup(document, field)
            .and_then(|actual| compare_values(actual, value))
            .is_some_and(Ordering::is_ge),
        Condition::Lte { field, value } => lookup(document, field)
            .and_then(|actual| compare_values(actual, value))
            .is_some_and(Ordering::is_le),
        Condition::Contains { field, needle } => lookup(document, field)
            .and_then(Value::as_str)
            .is_some_and(|text| text.to_lowercase().contains(&needle.to_lowercase())),
        Condition::StartsWith {
            field,
            prefix,
            case_insensitive,
        } => lookup(document, field)
            .and_then(Value::as_str)
            .is_some_and(|text| {
                if *case_insensitive {
                    text.to_lowercase().starts_with(&prefix.to_lowercase())
                } else {
                    text.starts_with(prefix.as_str())
                }
            }),
        Condition::Present { field } => lookup(document, field).is_some_and(is_filled),
        Condition::Absent { field } => !lookup(document, field).is_some_and(is_filled),
        Condition::Any { filters } => filters.iter().any(|filter| matches(document, filter)),
    }
}

/// Missing fields compare equal to `null`; array fields match any element.
fn equals(actual: Option<&Value>, expected: &Value) -> bool {
    match actual {
        None | Some(Value::Null) => expected.is_null(),
        Some(Value::Array(items)) if !expected.is_array() => items.contains(expected),
        Some(actual) => actual == expected,
    }
}

/// A value counts as set unless it is null, blank text, or a container with nothing set.
fn is_filled(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(text) => !text.trim().is_empty(),
        Value::Array(items) => items.iter().any(is_filled),
        Value::Object(map) => map.values().any(is_filled),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

/// Order two scalars of the same kind. RFC 3339 strings compare as instants.
pub(crate) fn compare_values(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => {
            match (
                OffsetDateTime::parse(a, &Rfc3339),
                OffsetDateTime::parse(b, &Rfc3339),
            ) {
                (Ok(a), Ok(b)) => Some(a.cmp(&b)),
                _ => Some(a.cmp(b)),
            }
        }
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Compare by each key in turn; missing and null values sort first ascending.
pub(crate) fn compare_documents(left: &Value, right: &Value, sort: &[SortKey]) -> Ordering {
    for key in sort {
        let a = lookup(left, &key.field).filter(|value| !value.is_null());
        let b = lookup(right, &key.field).filter(|value| !value.is_null());
        let ordering = match (a, b) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(a), Some(b)) => compare_values(a, b).unwrap_or(Ordering::Equal),
        };
        let ordering = match key.direction {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Apply `$set`-style assignments, creating intermediate objects as needed.
pub(crate) fn apply_patch(document: &mut Value, patch: &Patch) {
    for (path, value) in &patch.sets {
        set_path(document, path, value.clone());
    }
}

fn set_path(document: &mut Value, path: &str, value: Value) {
    let mut current = document;
    let mut segments = path.split('.').peekable();
    while let Some(segment) = segments.next() {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let Value::Object(map) = current else {
            return;
        };
        if segments.peek().is_none() {
            map.insert(segment.to_string(), value);
            return;
        }
        current = map.entry(segment.to_string()).or_insert(Value::Null);
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn server() -> Value {
        json!({
            "id": "s1",
            "general": { "name": "Frankfurt 1", "mode": "live", "categories": ["gaming"] },
            "openvpn_config": { "username": "", "password": null },
            "wireguard_config": { "url": "https://wg.example", "api_token": null },
            "xray_config": null,
            "created_at": "2025-03-01T10:00:00Z"
        })
    }

    #[test]
    fn dotted_paths_and_array_membership() {
        let doc = server();
        assert!(matches(&doc, &Filter::new().eq("general.mode", "live")));
        assert!(matches(&doc, &Filter::new().eq("general.categories", "gaming")));
        assert!(matches(&doc, &Filter::new().eq("general.missing", Value::Null)));
        assert!(!matches(&doc, &Filter::new().ne("general.mode", "live")));
    }

    #[test]
    fn presence_ignores_blank_blocks() {
        let doc = server();
        assert!(matches(&doc, &Filter::new().absent("openvpn_config")));
        assert!(matches(&doc, &Filter::new().present("wireguard_config")));
        assert!(matches(&doc, &Filter::new().absent("xray_config")));
    }

    #[test]
    fn timestamps_compare_as_instants() {
        let doc = server();
        assert!(matches(
            &doc,
            &Filter::new().gte("created_at", "2025-03-01T11:00:00+01:00")
        ));
        assert!(!matches(
            &doc,
            &Filter::new().gte("created_at", "2025-03-01T10:00:01Z")
        ));
    }

    #[test]
    fn any_is_a_disjunction() {
        let doc = server();
        let filter = Filter::new().any(vec![
            Filter::new().contains("general.name", "berlin"),
            Filter::new().contains("general.name", "FRANK"),
        ]);
        assert!(matches(&doc, &filter));
    }

    #[test]
    fn sort_places_missing_values_first() {
        let a = json!({ "name": "b" });
        let b = json!({ "name": null });
        let c = json!({ "name": "a" });
        let mut docs = vec![a, b, c];
        docs.sort_by(|x, y| compare_documents(x, y, &[SortKey::asc("name")]));
        assert_eq!(docs[0]["name"], Value::Null);
        assert_eq!(docs[1]["name"], "a");
        docs.sort_by(|x, y| compare_documents(x, y, &[SortKey::desc("name")]));
        assert_eq!(docs[0]["name"], "b");
    }

    #[test]
    fn patch_creates_missing_parents() {
        let mut doc = server();
        let patch = Patch::new()
            .set("xray_config.vless", "vless://x")
            .set("general.mode", "off");
        apply_patch(&mut doc, &patch);
        assert_eq!(doc["xray_config"]["vless"], "vless://x");
        assert_eq!(doc["general"]["mode"], "off");
        assert_eq!(doc["general"]["name"], "Frankfurt 1");
    }
}
