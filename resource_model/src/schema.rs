//! The `Schema` descriptor the core consumes; schema discovery itself is out of scope (§1).

use crate::field::{sanitize_identifier, FieldExtractor, IndirectField};

/// A resource kind identifier: group/version/kind, the unit every cache is keyed on.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KindId {
    /// API group, empty string for the core group.
    pub group: String,
    /// API version.
    pub version: String,
    /// Kind name.
    pub kind: String,
}

impl KindId {
    /// Construct a kind identifier.
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    /// A sanitized identifier safe to use as a SQL table-name prefix / file-name stem.
    pub fn sanitized(&self) -> String {
        sanitize_identifier(&format!("{}_{}_{}", self.group, self.version, self.kind))
    }
}

impl std::fmt::Display for KindId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}/{}", self.version, self.kind)
        } else {
            write!(f, "{}/{}/{}", self.group, self.version, self.kind)
        }
    }
}

/// Everything the core needs to know about a kind ahead of opening its Store.
#[derive(Debug, Clone)]
pub struct Schema {
    /// The kind this schema describes.
    pub kind: KindId,
    /// Whether instances of this kind are namespaced.
    pub namespaced: bool,
    /// Fields materialized into the kind's `fields` table.
    pub indexed_fields: Vec<FieldExtractor>,
    /// Fields resolved through a foreign-key join into another kind.
    pub indirect_fields: Vec<IndirectField>,
}

impl Schema {
    /// Construct a schema with no indexed or indirect fields.
    pub fn new(kind: KindId, namespaced: bool) -> Self {
        Self {
            kind,
            namespaced,
            indexed_fields: Vec::new(),
            indirect_fields: Vec::new(),
        }
    }

    /// Add an indexed field, builder-style.
    pub fn with_field(mut self, field: FieldExtractor) -> Self {
        self.indexed_fields.push(field);
        self
    }

    /// Add an indirect field, builder-style.
    pub fn with_indirect_field(mut self, field: IndirectField) -> Self {
        self.indirect_fields.push(field);
        self
    }

    /// Look up an indexed field by its logical name.
    pub fn field(&self, name: &str) -> Option<&FieldExtractor> {
        self.indexed_fields.iter().find(|f| f.name == name)
    }

    /// Look up an indirect field by its logical name.
    pub fn indirect_field(&self, name: &str) -> Option<&IndirectField> {
        self.indirect_fields.iter().find(|f| f.name == name)
    }

    /// Every SQL column identifier this schema is allowed to reference: the whitelist the query
    /// compiler checks every field path against before it ever becomes part of a SQL string
    /// (SPEC_FULL §4.2/§9).
    pub fn column_whitelist(&self) -> Vec<String> {
        self.indexed_fields.iter().map(FieldExtractor::column_name).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldType;

    #[test]
    fn kind_id_sanitized_is_stable() {
        let k = KindId::new("management.cattle.io", "v3", "Project");
        assert_eq!(k.sanitized(), "management_cattle_io_v3_Project");
    }

    #[test]
    fn whitelist_contains_only_declared_columns() {
        let schema = Schema::new(KindId::new("", "v1", "Secret"), true)
            .with_field(FieldExtractor::new("spec.displayName", FieldType::String));
        assert_eq!(schema.column_whitelist(), vec!["spec_displayName".to_string()]);
        assert!(schema.field("spec.missing").is_none());
    }
}
