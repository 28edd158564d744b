//! `ListOptions`: the structured query the engine compiles into SQL (SPEC_FULL §4.2).

use crate::error::{Error, Result};

/// Comparison operators a [`Filter`] may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    /// `=`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `>`
    Gt,
    /// `IS NOT NULL AND <> ''`
    Exists,
    /// `IS NULL OR = ''`
    NotExists,
    /// `IN (...)`
    In,
    /// `NOT IN (...)`
    NotIn,
}

/// A single predicate on one field.
#[derive(Debug, Clone)]
pub struct Filter {
    /// Dotted field path this predicate applies to.
    pub field_path: String,
    /// Values to compare against. Exactly one for `Eq`/`Ne`/`Lt`/`Gt`; any count for `In`/`NotIn`;
    /// unused for `Exists`/`NotExists`.
    pub match_values: Vec<String>,
    /// The comparison operator.
    pub op: FilterOp,
    /// For `Eq`, whether this is a `LIKE '%match%'` (escaped) partial match instead of an exact one.
    pub partial: bool,
    /// Whether `field_path` names an indirect (foreign-key-joined) field.
    pub indirect: bool,
}

impl Filter {
    /// Construct an exact-match filter.
    pub fn eq(field_path: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field_path: field_path.into(),
            match_values: vec![value.into()],
            op: FilterOp::Eq,
            partial: false,
            indirect: false,
        }
    }

    /// Mark this filter as an indirect-field predicate.
    pub fn indirect(mut self) -> Self {
        self.indirect = true;
        self
    }

    /// Mark this filter as a partial (`LIKE`) match.
    pub fn partial(mut self) -> Self {
        self.partial = true;
        self
    }
}

/// A disjunction of [`Filter`]s (`OR over Filter`); [`ListOptions::filters`] is a conjunction of
/// these (`AND over OrFilter`).
#[derive(Debug, Clone, Default)]
pub struct OrFilter {
    /// The filters OR-ed together.
    pub filters: Vec<Filter>,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

/// One sort directive.
#[derive(Debug, Clone)]
pub struct Sort {
    /// Dotted field path to sort by.
    pub field_path: String,
    /// Direction.
    pub direction: SortDirection,
    /// Whether `field_path` names an indirect field.
    pub indirect: bool,
}

/// 1-based page selection.
#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    /// Rows per page.
    pub page_size: u32,
    /// 1-based page index.
    pub page: u32,
}

/// A parsed `"<revision>,<offset>"` continuation token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResumeToken {
    /// Revision the listing started from.
    pub revision: i64,
    /// Row offset within that revision's result set.
    pub offset: u64,
}

impl ResumeToken {
    /// Render as the opaque `"<revision>,<offset>"` wire form.
    pub fn encode(&self) -> String {
        format!("{},{}", self.revision, self.offset)
    }

    /// Parse the opaque wire form, rejecting anything malformed as [`Error::BadRequest`].
    pub fn decode(s: &str) -> Result<Self> {
        let (rev, offset) = s
            .split_once(',')
            .ok_or_else(|| Error::bad_request(format!("malformed resume token: {s}")))?;
        let revision = rev
            .parse()
            .map_err(|_| Error::bad_request(format!("malformed resume token revision: {s}")))?;
        let offset = offset
            .parse()
            .map_err(|_| Error::bad_request(format!("malformed resume token offset: {s}")))?;
        Ok(Self { revision, offset })
    }
}

/// A namespace- or name-scoped admissibility predicate applied to query results.
#[derive(Debug, Clone, Default)]
pub struct Partition {
    /// No namespace/name constraint at all; overrides the other fields when true.
    pub passthrough: bool,
    /// Namespace this partition admits.
    pub namespace: Option<String>,
    /// If true, every name within `namespace` is admitted.
    pub all: bool,
    /// Specific names admitted within `namespace` when `all` is false.
    pub names: Vec<String>,
}

/// A field path to group-and-count (SPEC_FULL §4.2 rule 11).
#[derive(Debug, Clone)]
pub struct Summary {
    /// Dotted field path to group by.
    pub field_path: String,
}

/// The full structured query the engine compiles (SPEC_FULL §4.2).
#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    /// Conjunction of [`OrFilter`] disjunctions.
    pub filters: Vec<OrFilter>,
    /// Ordered sort directives.
    pub sort: Vec<Sort>,
    /// Page-based pagination.
    pub pagination: Option<Pagination>,
    /// Chunked-paging page size; `resume_token` carries the cursor between calls.
    pub chunk_size: Option<u32>,
    /// Opaque continuation token from a prior call with the same options.
    pub resume_token: Option<String>,
    /// Pin results to a historical revision.
    pub revision: Option<i64>,
    /// Admissible partitions; an empty `Vec` yields zero results.
    pub partitions: Vec<Partition>,
    /// Field paths to summarize.
    pub summary: Vec<Summary>,
    /// Additional namespace constraint.
    pub namespace: Option<String>,
}

impl ListOptions {
    /// An unconstrained, unpaginated query (still subject to the default page-size cap applied
    /// by the caller).
    pub fn all() -> Self {
        Self {
            partitions: vec![Partition {
                passthrough: true,
                ..Default::default()
            }],
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resume_token_round_trips() {
        let token = ResumeToken { revision: 7, offset: 3 };
        assert_eq!(ResumeToken::decode(&token.encode()).unwrap(), token);
    }

    #[test]
    fn resume_token_rejects_malformed_input() {
        assert!(ResumeToken::decode("not-a-token").is_err());
        assert!(ResumeToken::decode("abc,3").is_err());
    }
}
