//! The runtime-reflection sum type resource payloads are modeled as.
//!
//! The core never interprets a payload's shape except through compiled [`crate::FieldExtractor`]s
//! walking a [`Document`] with [`Document::get_path`]; nothing here does ad hoc reflection at
//! query time.

use std::collections::BTreeMap;

/// One segment of a field path, e.g. `metadata.labels.foo` is `[Key("metadata"), Key("labels"),
/// Key("foo")]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Segment {
    /// A map key.
    Key(String),
    /// A list index.
    Index(usize),
}

impl From<&str> for Segment {
    fn from(s: &str) -> Self {
        Segment::Key(s.to_string())
    }
}

/// Parse a dotted field path (`spec.displayName`) into its segments.
///
/// Indexing (`list[0]`) is not supported in dotted paths; construct a `Vec<Segment>` directly
/// for that case.
pub fn parse_path(path: &str) -> Vec<Segment> {
    path.split('.').map(Segment::from).collect()
}

/// An opaque structured document: the in-memory shape of one resource object's payload.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum Document {
    /// Absence of a value (distinct from an empty string).
    Absent,
    /// A string scalar.
    String(String),
    /// An integer scalar.
    Int(i64),
    /// A boolean scalar.
    Bool(bool),
    /// An ordered list of documents.
    List(Vec<Document>),
    /// An ordered map (insertion order is not significant; `BTreeMap` for deterministic tests).
    Map(BTreeMap<String, Document>),
}

impl Default for Document {
    fn default() -> Self {
        Document::Absent
    }
}

impl Document {
    /// Walk `path`, returning [`Document::Absent`] at the first missing segment instead of
    /// erroring: a missing field is a normal, queryable state (`Exists`/`NotExists` filters rely
    /// on this).
    pub fn get_path(&self, path: &[Segment]) -> &Document {
        let mut cur = self;
        for segment in path {
            cur = match (cur, segment) {
                (Document::Map(m), Segment::Key(k)) => m.get(k).unwrap_or(&Document::Absent),
                (Document::List(items), Segment::Index(i)) => {
                    items.get(*i).unwrap_or(&Document::Absent)
                }
                _ => return &Document::Absent,
            };
        }
        cur
    }

    /// True unless this is [`Document::Absent`].
    pub fn exists(&self) -> bool {
        !matches!(self, Document::Absent)
    }

    /// Render as the string representation used for indexed-column storage, per
    /// [`crate::FieldType`] coercion rules.
    pub fn as_storage_string(&self) -> Option<String> {
        match self {
            Document::Absent => None,
            Document::String(s) => Some(s.clone()),
            Document::Int(i) => Some(i.to_string()),
            Document::Bool(b) => Some(b.to_string()),
            Document::List(items) => {
                let parts: Vec<String> = items.iter().filter_map(Document::as_storage_string).collect();
                Some(parts.join("|"))
            }
            Document::Map(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc() -> Document {
        let mut labels = BTreeMap::new();
        labels.insert("foo".to_string(), Document::String("bar".to_string()));
        let mut metadata = BTreeMap::new();
        metadata.insert("labels".to_string(), Document::Map(labels));
        metadata.insert("name".to_string(), Document::String("widget".to_string()));
        let mut root = BTreeMap::new();
        root.insert("metadata".to_string(), Document::Map(metadata));
        Document::Map(root)
    }

    #[test]
    fn get_path_walks_nested_maps() {
        let d = doc();
        let path = parse_path("metadata.labels.foo");
        assert_eq!(d.get_path(&path), &Document::String("bar".to_string()));
    }

    #[test]
    fn get_path_missing_segment_is_absent() {
        let d = doc();
        let path = parse_path("metadata.labels.missing");
        assert_eq!(d.get_path(&path), &Document::Absent);
    }

    #[test]
    fn list_storage_string_joins_with_pipe() {
        let d = Document::List(vec![
            Document::String("a".to_string()),
            Document::String("b".to_string()),
        ]);
        assert_eq!(d.as_storage_string().as_deref(), Some("a|b"));
    }
}
