//! Composable entry filters.
//!
//! Filters describe the query shapes the core needs from the store:
//! equality, substring match, chronological less-or-equal, and AND/OR
//! composition. Backends translate them into their native query language;
//! [`Filter::matches`] gives the reference in-memory evaluation.

use time::OffsetDateTime;

use crate::entry::{AttrValue, Entry};

/// A filter over entry attributes.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Attribute equals the given value.
    Eq {
        /// Attribute name.
        attr: String,
        /// Value to compare against.
        value: AttrValue,
    },
    /// String attribute contains the given substring.
    Substring {
        /// Attribute name.
        attr: String,
        /// Substring to search for.
        needle: String,
    },
    /// Timestamp attribute is less than or equal to the cutoff.
    LeTime {
        /// Attribute name.
        attr: String,
        /// Inclusive upper bound.
        cutoff: OffsetDateTime,
    },
    /// All sub-filters must match.
    And(Vec<Filter>),
    /// At least one sub-filter must match.
    Or(Vec<Filter>),
}

impl Filter {
    /// Creates an equality filter.
    #[must_use]
    pub fn eq(attr: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        Self::Eq {
            attr: attr.into(),
            value: value.into(),
        }
    }

    /// Creates a substring filter.
    #[must_use]
    pub fn substring(attr: impl Into<String>, needle: impl Into<String>) -> Self {
        Self::Substring {
            attr: attr.into(),
            needle: needle.into(),
        }
    }

    /// Creates a chronological less-or-equal filter.
    #[must_use]
    pub fn le_time(attr: impl Into<String>, cutoff: OffsetDateTime) -> Self {
        Self::LeTime {
            attr: attr.into(),
            cutoff,
        }
    }

    /// Creates a conjunction of filters.
    #[must_use]
    pub fn and(filters: Vec<Filter>) -> Self {
        Self::And(filters)
    }

    /// Creates a disjunction of filters.
    #[must_use]
    pub fn or(filters: Vec<Filter>) -> Self {
        Self::Or(filters)
    }

    /// Evaluates the filter against an entry.
    ///
    /// Missing or wrong-typed attributes never match; an empty `And` matches
    /// everything and an empty `Or` matches nothing, following the usual
    /// identity elements of conjunction and disjunction.
    #[must_use]
    pub fn matches(&self, entry: &Entry) -> bool {
        match self {
            Self::Eq { attr, value } => entry.attr(attr) == Some(value),
            Self::Substring { attr, needle } => entry
                .attr_str(attr)
                .map(|s| s.contains(needle.as_str()))
                .unwrap_or(false),
            Self::LeTime { attr, cutoff } => entry
                .attr_time(attr)
                .map(|t| t <= *cutoff)
                .unwrap_or(false),
            Self::And(filters) => filters.iter().all(|f| f.matches(entry)),
            Self::Or(filters) => filters.iter().any(|f| f.matches(entry)),
        }
    }
}
