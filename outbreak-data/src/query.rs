//! Typed query builder for the Lucene-like search syntax
//!
//! Queries are built as a tree of field/operator/value nodes and serialized
//! with `Display`:
//!
//! ```
//! use outbreak_data::query::Query;
//!
//! let q = Query::and(vec![
//!     Query::term("mostRecent", "true"),
//!     Query::range("confirmed_rolling_per_100k", 9.5, 10.5),
//! ]);
//! assert_eq!(q.to_string(), "mostRecent:true AND confirmed_rolling_per_100k:[9.5 TO 10.5]");
//! ```

use std::fmt;
use std::str::FromStr;

/// Lucene-like query expression
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// Match everything (`__all__`)
    All,
    /// `field:value` (value emitted verbatim)
    Term { field: String, value: String },
    /// `field:"value"` (value quoted and escaped)
    Phrase { field: String, value: String },
    /// `field:("a" OR "b")`
    AnyOf { field: String, values: Vec<String> },
    /// `field:("a","b")` (facet filter list)
    Terms { field: String, values: Vec<String> },
    /// `field:[lo TO hi]`
    Range { field: String, lo: f64, hi: f64 },
    /// `-<inner>`
    Not(Box<Query>),
    /// `a AND b AND ...`
    And(Vec<Query>),
    /// `(a OR b OR ...)`
    Or(Vec<Query>),
    /// Pre-built query text (user-entered search strings)
    Raw(String),
}

impl Query {
    pub fn term(field: impl Into<String>, value: impl ToString) -> Self {
        Query::Term {
            field: field.into(),
            value: value.to_string(),
        }
    }

    pub fn phrase(field: impl Into<String>, value: impl Into<String>) -> Self {
        Query::Phrase {
            field: field.into(),
            value: value.into(),
        }
    }

    /// OR-list of quoted values; duplicates are dropped keeping first occurrence
    pub fn any_of<I, S>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut unique: Vec<String> = Vec::new();
        for value in values {
            let value = value.into();
            if !unique.contains(&value) {
                unique.push(value);
            }
        }
        Query::AnyOf {
            field: field.into(),
            values: unique,
        }
    }

    /// Field-less OR-list: `("a" OR "b")`
    pub fn any_value<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Query::any_of(String::new(), values)
    }

    pub fn terms<I, S>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Query::Terms {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn range(field: impl Into<String>, lo: f64, hi: f64) -> Self {
        Query::Range {
            field: field.into(),
            lo,
            hi,
        }
    }

    pub fn not(inner: Query) -> Self {
        Query::Not(Box::new(inner))
    }

    pub fn and(parts: Vec<Query>) -> Self {
        Query::And(parts)
    }

    pub fn or(parts: Vec<Query>) -> Self {
        Query::Or(parts)
    }

    pub fn raw(text: impl Into<String>) -> Self {
        Query::Raw(text.into())
    }

    /// Combine with another query using AND, flattening nested ANDs
    pub fn and_also(self, other: Query) -> Self {
        let mut parts = match self {
            Query::And(parts) => parts,
            Query::All => return other,
            other_self => vec![other_self],
        };
        match other {
            Query::And(more) => parts.extend(more),
            Query::All => {}
            other => parts.push(other),
        }
        Query::And(parts)
    }

    fn needs_group(&self) -> bool {
        matches!(self, Query::And(parts) if parts.len() > 1)
    }
}

fn escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn write_quoted_list(f: &mut fmt::Formatter<'_>, values: &[String], sep: &str) -> fmt::Result {
    f.write_str("(")?;
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            f.write_str(sep)?;
        }
        write!(f, "\"{}\"", escape(value))?;
    }
    f.write_str(")")
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Query::All => f.write_str("__all__"),
            Query::Term { field, value } => write!(f, "{}:{}", field, value),
            Query::Phrase { field, value } => write!(f, "{}:\"{}\"", field, escape(value)),
            Query::AnyOf { field, values } => {
                if !field.is_empty() {
                    write!(f, "{}:", field)?;
                }
                write_quoted_list(f, values, " OR ")
            }
            Query::Terms { field, values } => {
                write!(f, "{}:", field)?;
                write_quoted_list(f, values, ",")
            }
            Query::Range { field, lo, hi } => write!(f, "{}:[{} TO {}]", field, lo, hi),
            Query::Not(inner) => write!(f, "-{}", inner),
            Query::And(parts) => {
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" AND ")?;
                    }
                    write!(f, "{}", part)?;
                }
                Ok(())
            }
            Query::Or(parts) => {
                f.write_str("(")?;
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" OR ")?;
                    }
                    if part.needs_group() {
                        write!(f, "({})", part)?;
                    } else {
                        write!(f, "{}", part)?;
                    }
                }
                f.write_str(")")
            }
            Query::Raw(text) => f.write_str(text),
        }
    }
}

/// Administrative granularity selectable in the similarity filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdminLevel {
    Countries,
    NonUsStates,
    UsStates,
    UsMetros,
    UsCounties,
}

impl AdminLevel {
    /// Canonical predicate order when several levels are selected
    pub const ALL: [AdminLevel; 5] = [
        AdminLevel::Countries,
        AdminLevel::NonUsStates,
        AdminLevel::UsStates,
        AdminLevel::UsMetros,
        AdminLevel::UsCounties,
    ];

    /// Label shown in the dashboard filter
    pub fn label(self) -> &'static str {
        match self {
            AdminLevel::Countries => "countries",
            AdminLevel::NonUsStates => "non-U.S. States/Provinces",
            AdminLevel::UsStates => "U.S. States",
            AdminLevel::UsMetros => "U.S. Metro Areas",
            AdminLevel::UsCounties => "U.S. Counties",
        }
    }

    /// Conjunctive predicate selecting this level
    pub fn predicate(self) -> Query {
        let usa = Query::term("country_iso3", "USA");
        match self {
            AdminLevel::Countries => Query::term("admin_level", 0),
            AdminLevel::NonUsStates => {
                Query::and(vec![Query::term("admin_level", 1), Query::not(usa)])
            }
            AdminLevel::UsStates => Query::and(vec![Query::term("admin_level", 1), usa]),
            AdminLevel::UsMetros => Query::and(vec![Query::phrase("admin_level", "1.5"), usa]),
            AdminLevel::UsCounties => Query::and(vec![Query::term("admin_level", 2), usa]),
        }
    }
}

impl FromStr for AdminLevel {
    type Err = outbreak_common::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AdminLevel::ALL
            .into_iter()
            .find(|level| level.label().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                outbreak_common::Error::InvalidInput(format!("unknown admin level: {}", s))
            })
    }
}

/// OR across the selected levels, in canonical order; `None` when nothing is selected
pub fn admin_level_filter(levels: &[AdminLevel]) -> Option<Query> {
    let predicates: Vec<Query> = AdminLevel::ALL
        .into_iter()
        .filter(|level| levels.contains(level))
        .map(AdminLevel::predicate)
        .collect();
    if predicates.is_empty() {
        None
    } else {
        Some(Query::or(predicates))
    }
}

/// One `key:v1,v2` clause of a facet filter string
#[derive(Debug, Clone, PartialEq)]
pub struct FilterTerm {
    pub key: String,
    pub values: Vec<String>,
}

/// Parse `key:v1,v2;key2:v3` into filter terms; malformed clauses are skipped
pub fn parse_filter_string(filter: &str) -> Vec<FilterTerm> {
    filter
        .split(';')
        .filter_map(|clause| {
            let (key, values) = clause.split_once(':')?;
            let key = key.trim();
            if key.is_empty() {
                return None;
            }
            Some(FilterTerm {
                key: key.to_string(),
                values: values.split(',').map(|v| v.to_string()).collect(),
            })
        })
        .collect()
}

/// Facet filter terms as `key:("v1","v2") AND key2:("v3")`
pub fn filter_query(terms: &[FilterTerm]) -> Query {
    Query::and(
        terms
            .iter()
            .map(|t| Query::terms(t.key.clone(), t.values.clone()))
            .collect(),
    )
}

/// Combine a free-text query with a facet filter string
///
/// Neither present → `__all__`.
pub fn combine_search(query: Option<&str>, filter: Option<&str>) -> (Query, Vec<FilterTerm>) {
    let query = query.map(str::trim).filter(|q| !q.is_empty());
    let terms = filter
        .map(parse_filter_string)
        .unwrap_or_default();

    let combined = match (query, terms.is_empty()) {
        (None, true) => Query::All,
        (None, false) => filter_query(&terms),
        (Some(q), true) => Query::raw(q),
        (Some(q), false) => Query::raw(q).and_also(filter_query(&terms)),
    };
    (combined, terms)
}
