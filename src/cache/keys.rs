//! Cache key derivation.
//!
//! Key shapes, all prefixed by the collection's namespace:
//!
//! - `<ns>:ver` generation counter
//! - `<ns>:<generation>:list:<fingerprint>` generation-stamped list result
//! - `<ns>:id:<id>`, `<ns>:name:<name>`, `<ns>:type:<type>` point entries
//! - `<ns>:open:<subject>:<resource>` open-session pair lookup

use std::fmt;

use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use super::generation::Generation;

/// Key prefix owned by exactly one collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Namespace(&'static str);

impl Namespace {
    pub const fn new(prefix: &'static str) -> Self {
        Self(prefix)
    }

    pub const fn as_str(&self) -> &'static str {
        self.0
    }

    pub fn version_key(&self) -> String {
        format!("{}:ver", self.0)
    }

    pub fn list_key(&self, generation: &Generation, fingerprint: &Fingerprint) -> String {
        format!("{}:{}:list:{}", self.0, generation, fingerprint)
    }

    pub fn point_key(&self, point: &PointKey) -> String {
        format!("{}:{}", self.0, point)
    }

    /// Key for TTL-only entries outside the generation scheme.
    pub fn scoped_key(&self, scope: &str, fingerprint: &Fingerprint) -> String {
        format!("{}:{}:{}", self.0, scope, fingerprint)
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Natural key addressing a single entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PointKey {
    Id(String),
    Name(String),
    Type(String),
    /// Open session between a subject (user) and a resource (server).
    OpenPair { subject: String, resource: String },
}

impl PointKey {
    pub fn id(value: impl Into<String>) -> Self {
        Self::Id(value.into())
    }

    pub fn open_pair(subject: impl Into<String>, resource: impl Into<String>) -> Self {
        Self::OpenPair {
            subject: subject.into(),
            resource: resource.into(),
        }
    }
}

impl fmt::Display for PointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PointKey::Id(value) => write!(f, "id:{value}"),
            PointKey::Name(value) => write!(f, "name:{value}"),
            PointKey::Type(value) => write!(f, "type:{value}"),
            PointKey::OpenPair { subject, resource } => write!(f, "open:{subject}:{resource}"),
        }
    }
}

/// Deterministic digest of a query description.
///
/// Logically identical queries share a fingerprint regardless of object key
/// order, unset optional fields, or the order of array elements.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint any serializable query description.
    ///
    /// A description that fails to serialize is keyed by the error text.
    pub fn of<Q: Serialize + ?Sized>(query: &Q) -> Self {
        match serde_json::to_value(query) {
            Ok(value) => Self::of_value(&value),
            Err(err) => Self::digest(format!("!unserializable:{err}").as_bytes()),
        }
    }

    pub fn of_value(value: &Value) -> Self {
        let canonical = canonicalize(value);
        Self::digest(canonical.to_string().as_bytes())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn digest(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hex::encode(hasher.finalize()))
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rebuild `value` with sorted object keys, null members dropped and arrays
/// ordered by the canonical text of their elements.
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, Value)> = map
                .iter()
                .filter(|(_, member)| !member.is_null())
                .map(|(key, member)| (key, canonicalize(member)))
                .collect();
            entries.sort_by(|left, right| left.0.cmp(right.0));

            let mut sorted = Map::new();
            for (key, member) in entries {
                sorted.insert(key.clone(), member);
            }
            Value::Object(sorted)
        }
        Value::Array(items) => {
            let mut canonical: Vec<(String, Value)> = items
                .iter()
                .map(|item| {
                    let item = canonicalize(item);
                    (item.to_string(), item)
                })
                .collect();
            canonical.sort_by(|left, right| left.0.cmp(&right.0));
            Value::Array(canonical.into_iter().map(|(_, item)| item).collect())
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use serde_json::json;

    use super::*;

    #[derive(Serialize)]
    struct SampleFilter {
        os_type: Option<&'static str>,
        search: Option<String>,
    }

    #[derive(Serialize)]
    struct SampleQuery {
        page: u32,
        limit: u32,
        filter: SampleFilter,
    }

    /// 10 000 distinct list queries, each paired with the same query written
    /// as a JSON value with reversed key order and unset fields left out.
    fn sample_queries() -> Vec<(SampleQuery, Value)> {
        let mut sample = Vec::new();
        for page in 1..=25u32 {
            for limit in [10u32, 20, 50, 100] {
                for os_type in [None, Some("ios"), Some("android"), Some("macos")] {
                    for term in 0..25u32 {
                        let search = (term > 0).then(|| format!("q{term}"));

                        let mut filter = Map::new();
                        if let Some(search) = &search {
                            filter.insert("search".into(), json!(search));
                        }
                        if let Some(os_type) = os_type {
                            filter.insert("os_type".into(), json!(os_type));
                        }
                        let reordered =
                            json!({"filter": Value::Object(filter), "limit": limit, "page": page});

                        let typed = SampleQuery {
                            page,
                            limit,
                            filter: SampleFilter { os_type, search },
                        };
                        sample.push((typed, reordered));
                    }
                }
            }
        }
        sample
    }

    #[test]
    fn distinct_queries_never_share_a_fingerprint() {
        let sample = sample_queries();
        let fingerprints: HashSet<Fingerprint> = sample
            .iter()
            .map(|(typed, _)| Fingerprint::of(typed))
            .collect();
        assert_eq!(sample.len(), 10_000);
        assert_eq!(fingerprints.len(), sample.len());
    }

    #[test]
    fn equivalent_spellings_share_a_fingerprint() {
        for (typed, reordered) in sample_queries() {
            assert_eq!(Fingerprint::of(&typed), Fingerprint::of(&reordered));
        }
    }

    #[test]
    fn key_shapes() {
        let ns = Namespace::new("v1:servers");
        assert_eq!(ns.version_key(), "v1:servers:ver");
        assert_eq!(ns.point_key(&PointKey::id("abc")), "v1:servers:id:abc");
        assert_eq!(
            ns.point_key(&PointKey::Name("os".into())),
            "v1:servers:name:os"
        );
        assert_eq!(
            Namespace::new("v1:connectivity").point_key(&PointKey::open_pair("u1", "s1")),
            "v1:connectivity:open:u1:s1"
        );

        let fingerprint = Fingerprint::of(&json!({"page": 1}));
        let key = ns.list_key(&Generation::from("7"), &fingerprint);
        assert_eq!(key, format!("v1:servers:7:list:{fingerprint}"));
    }

    #[test]
    fn fingerprint_ignores_key_order() {
        let a = Fingerprint::of(&json!({"page": 1, "limit": 50, "filter": {"os": "ios", "mode": "live"}}));
        let b = Fingerprint::of(&json!({"filter": {"mode": "live", "os": "ios"}, "limit": 50, "page": 1}));
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_treats_null_as_absent() {
        let a = Fingerprint::of(&json!({"page": 1, "os_type": null}));
        let b = Fingerprint::of(&json!({"page": 1}));
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_ignores_array_order() {
        let a = Fingerprint::of(&json!({"ids": ["b", "a", "c"]}));
        let b = Fingerprint::of(&json!({"ids": ["c", "b", "a"]}));
        assert_eq!(a, b);
    }

    #[test]
    fn fingerprint_discriminates_different_queries() {
        let page_one = Fingerprint::of(&json!({"page": 1, "limit": 50}));
        let page_two = Fingerprint::of(&json!({"page": 2, "limit": 50}));
        let as_text = Fingerprint::of(&json!({"page": "1", "limit": 50}));
        assert_ne!(page_one, page_two);
        assert_ne!(page_one, as_text);
    }

    #[test]
    fn fingerprint_is_hex_sha256() {
        let fingerprint = Fingerprint::of(&json!({}));
        assert_eq!(fingerprint.as_str().len(), 64);
        assert!(fingerprint.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    }
}
