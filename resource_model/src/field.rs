//! Field extractors: the compiled-ahead-of-time bridge between a [`crate::Document`] path and a
//! typed, indexed SQL column.

use crate::document::{parse_path, Document, Segment};

/// The coerced storage type of an extracted value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// Stored as `TEXT`.
    String,
    /// Stored as `TEXT` (kept text-typed so sort/filter share one column affinity; compared
    /// numerically by the query compiler when the operator requires it).
    Integer,
    /// Stored as `TEXT`, `"true"`/`"false"`.
    Boolean,
    /// Stored as `TEXT`, `|`-joined.
    ListOfString,
}

/// The result of coercing a [`Document`] value at a field's path into its declared [`FieldType`].
#[derive(Debug, Clone, PartialEq)]
pub enum ExtractedValue {
    /// The field was present and coerced successfully.
    Present(String),
    /// The path resolved to [`Document::Absent`].
    Absent,
}

impl ExtractedValue {
    /// The value as an `Option<&str>`, collapsing [`ExtractedValue::Absent`] to `None`.
    pub fn as_deref(&self) -> Option<&str> {
        match self {
            ExtractedValue::Present(s) => Some(s.as_str()),
            ExtractedValue::Absent => None,
        }
    }
}

/// A named path into a [`Document`], with the column name it is stored under in a kind's
/// `fields` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldExtractor {
    /// Dotted field name, e.g. `spec.displayName`. Also used (sanitized) as the SQL column name.
    pub name: String,
    /// Compiled path segments.
    pub path: Vec<Segment>,
    /// Declared storage type.
    pub field_type: FieldType,
}

impl FieldExtractor {
    /// Compile a dotted field path into an extractor.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        let name = name.into();
        let path = parse_path(&name);
        Self {
            name,
            path,
            field_type,
        }
    }

    /// Extract and coerce this field's value out of `doc`.
    pub fn extract(&self, doc: &Document) -> ExtractedValue {
        let value = doc.get_path(&self.path);
        match value.as_storage_string() {
            Some(s) => ExtractedValue::Present(s),
            None => ExtractedValue::Absent,
        }
    }

    /// The sanitized SQL column identifier for this field.
    ///
    /// Dots and any character outside `[a-zA-Z0-9_]` are replaced with `_`, matching the
    /// identifier-whitelisting requirement in SPEC_FULL §4.2/§9: this is the *only* place a
    /// field name becomes a SQL identifier, so every caller goes through the same sanitizer.
    pub fn column_name(&self) -> String {
        sanitize_identifier(&self.name)
    }
}

/// Sanitize an arbitrary field or kind name into a safe SQL identifier fragment.
pub fn sanitize_identifier(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() || c == '_' {
            out.push(c);
        } else {
            out.push('_');
        }
    }
    if out.is_empty() || out.chars().next().unwrap().is_ascii_digit() {
        out.insert(0, '_');
    }
    out
}

/// An extractor that resolves through a foreign-key lookup into another kind.
///
/// On a row of kind A, the local field [`IndirectField::local_field`] names the join key
/// (often a label); the matching row of kind B is the one whose
/// [`IndirectField::foreign_match_field`] equals it, and
/// [`IndirectField::foreign_projected_field`] is projected as the value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndirectField {
    /// Logical name this indirect field is addressed by in filters/sorts.
    pub name: String,
    /// The kind being joined to.
    pub foreign_kind: String,
    /// Local field (or label name) supplying the join value.
    pub local_field: String,
    /// Whether `local_field` names a label (joined via the `labels` table) rather than a
    /// `fields` column.
    pub local_field_is_label: bool,
    /// Column on the foreign kind's `fields` table the join matches against.
    pub foreign_match_field: String,
    /// Column on the foreign kind's `fields` table projected as this field's value.
    pub foreign_projected_field: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_name_sanitizes_dots() {
        let f = FieldExtractor::new("spec.displayName", FieldType::String);
        assert_eq!(f.column_name(), "spec_displayName");
    }

    #[test]
    fn sanitize_identifier_prefixes_leading_digit() {
        assert_eq!(sanitize_identifier("1kind"), "_1kind");
    }

    #[test]
    fn extract_missing_field_is_absent() {
        let f = FieldExtractor::new("spec.missing", FieldType::String);
        assert_eq!(f.extract(&Document::Absent), ExtractedValue::Absent);
    }
}
