/*
 * Copyright 2025 KeyGrid Project
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */
//! The filter algebra: server-interpretable predicates expressed as tagged,
//! immutable trees.
//!
//! The client only *builds* filters; evaluation happens on the grid, which
//! recognizes each node by its `@class` tag. Literal arguments are captured
//! at construction time, so an unencodable value fails with
//! [`BadValue`](crate::Error::BadValue) before anything touches the wire, and
//! set-valued arguments are materialized into sequences so that the encoded
//! form of a filter is stable.
//!
//! Filters compose with [`and`](Filter::and), [`or`](Filter::or),
//! [`xor`](Filter::xor) and [`negate`](Filter::negate), or with the `&`, `|`,
//! `^` and `!` operators:
//!
//! ```
//! use keygrid::Filter;
//!
//! let adult = Filter::greater_equal("age", 18).unwrap();
//! let local = Filter::equal("address.country", "DE").unwrap();
//! let both = adult & local;
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{extractor::Extractor, Result};

/// Event-mask bits understood by [`Filter::map_event`].
pub mod event_mask {
    /// An entry was inserted.
    pub const INSERTED: u32 = 0x1;
    /// An entry was updated.
    pub const UPDATED: u32 = 0x2;
    /// An entry was deleted.
    pub const DELETED: u32 = 0x4;
    /// An update moved the entry into the filtered set.
    pub const UPDATED_ENTERED: u32 = 0x8;
    /// An update moved the entry out of the filtered set.
    pub const UPDATED_LEFT: u32 = 0x10;
    /// An update kept the entry within the filtered set.
    pub const UPDATED_WITHIN: u32 = 0x20;
    /// The default mask applied when only an inner filter is given.
    pub const STANDARD: u32 = INSERTED | DELETED | UPDATED_ENTERED | UPDATED_LEFT;
}

/// A server-interpretable predicate over map entries.
///
/// Construction happens through the associated factory functions; the
/// resulting tree is immutable. Every variant carries the `@class` tag the
/// server's deserializer dispatches on.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "@class")]
pub enum Filter {
    /// Matches every entry.
    #[serde(rename = "filter.AlwaysFilter")]
    Always,
    /// Matches no entry.
    #[serde(rename = "filter.NeverFilter")]
    Never,
    /// Matches entries that are present in the map.
    #[serde(rename = "filter.PresentFilter")]
    Present,
    #[serde(rename = "filter.EqualsFilter")]
    Equals { extractor: Extractor, value: Value },
    #[serde(rename = "filter.NotEqualsFilter")]
    NotEquals { extractor: Extractor, value: Value },
    #[serde(rename = "filter.GreaterFilter")]
    Greater { extractor: Extractor, value: Value },
    #[serde(rename = "filter.GreaterEqualsFilter")]
    GreaterEquals { extractor: Extractor, value: Value },
    #[serde(rename = "filter.LessFilter")]
    Less { extractor: Extractor, value: Value },
    #[serde(rename = "filter.LessEqualsFilter")]
    LessEquals { extractor: Extractor, value: Value },
    /// A range check, carried as the two comparison children selected by the
    /// inclusion flags at construction time.
    #[serde(rename = "filter.BetweenFilter")]
    Between { filters: Vec<Filter> },
    #[serde(rename = "filter.InFilter")]
    In { extractor: Extractor, values: Vec<Value> },
    #[serde(rename = "filter.ContainsFilter")]
    Contains { extractor: Extractor, value: Value },
    #[serde(rename = "filter.ContainsAllFilter")]
    ContainsAll { extractor: Extractor, values: Vec<Value> },
    #[serde(rename = "filter.ContainsAnyFilter")]
    ContainsAny { extractor: Extractor, values: Vec<Value> },
    #[serde(rename = "filter.LikeFilter", rename_all = "camelCase")]
    Like {
        extractor: Extractor,
        pattern: String,
        escape_char: char,
        ignore_case: bool,
    },
    #[serde(rename = "filter.RegexFilter")]
    Regex { extractor: Extractor, pattern: String },
    /// Wraps an opaque server-side predicate descriptor.
    #[serde(rename = "filter.PredicateFilter")]
    Predicate {
        #[serde(skip_serializing_if = "Option::is_none")]
        extractor: Option<Extractor>,
        predicate: Value,
    },
    /// Restricts which change events an inner filter subscription reports.
    #[serde(rename = "filter.MapEventFilter")]
    MapEvent {
        mask: u32,
        #[serde(skip_serializing_if = "Option::is_none")]
        filter: Option<Box<Filter>>,
    },
    #[serde(rename = "filter.AndFilter")]
    And { filters: Vec<Filter> },
    #[serde(rename = "filter.OrFilter")]
    Or { filters: Vec<Filter> },
    #[serde(rename = "filter.XorFilter")]
    Xor { filters: Vec<Filter> },
    #[serde(rename = "filter.AllFilter")]
    All { filters: Vec<Filter> },
    #[serde(rename = "filter.AnyFilter")]
    Any { filters: Vec<Filter> },
    #[serde(rename = "filter.NotFilter")]
    Not { filter: Box<Filter> },
    /// Restricts a query to the partition owning `hostKey`. By server
    /// contract this may only appear outermost; the client does not enforce
    /// that.
    #[serde(rename = "filter.KeyAssociatedFilter", rename_all = "camelCase")]
    KeyAssociated { filter: Box<Filter>, host_key: Value },
    /// Restricts a query to a fixed key set. Outermost-only, like
    /// `KeyAssociated`. The tag is unqualified on the wire; the server's
    /// deserializer keys on this exact literal.
    #[serde(rename = "InKeySetFilter")]
    InKeySet { filter: Box<Filter>, keys: Vec<Value> },
}

impl Filter {
    pub fn always() -> Filter {
        Filter::Always
    }

    pub fn never() -> Filter {
        Filter::Never
    }

    pub fn present() -> Filter {
        Filter::Present
    }

    pub fn equal<T: Serialize>(extractor: impl Into<Extractor>, value: T) -> Result<Filter> {
        Ok(Filter::Equals {
            extractor: extractor.into(),
            value: serde_json::to_value(value)?,
        })
    }

    pub fn not_equal<T: Serialize>(extractor: impl Into<Extractor>, value: T) -> Result<Filter> {
        Ok(Filter::NotEquals {
            extractor: extractor.into(),
            value: serde_json::to_value(value)?,
        })
    }

    /// Equality against null. Comparison against null follows SQL semantics
    /// on the server; this node serializes exactly like
    /// [`equal`](Filter::equal) with a null literal.
    pub fn is_null(extractor: impl Into<Extractor>) -> Filter {
        Filter::Equals {
            extractor: extractor.into(),
            value: Value::Null,
        }
    }

    pub fn is_not_null(extractor: impl Into<Extractor>) -> Filter {
        Filter::NotEquals {
            extractor: extractor.into(),
            value: Value::Null,
        }
    }

    pub fn greater<T: Serialize>(extractor: impl Into<Extractor>, value: T) -> Result<Filter> {
        Ok(Filter::Greater {
            extractor: extractor.into(),
            value: serde_json::to_value(value)?,
        })
    }

    pub fn greater_equal<T: Serialize>(extractor: impl Into<Extractor>, value: T) -> Result<Filter> {
        Ok(Filter::GreaterEquals {
            extractor: extractor.into(),
            value: serde_json::to_value(value)?,
        })
    }

    pub fn less<T: Serialize>(extractor: impl Into<Extractor>, value: T) -> Result<Filter> {
        Ok(Filter::Less {
            extractor: extractor.into(),
            value: serde_json::to_value(value)?,
        })
    }

    pub fn less_equal<T: Serialize>(extractor: impl Into<Extractor>, value: T) -> Result<Filter> {
        Ok(Filter::LessEquals {
            extractor: extractor.into(),
            value: serde_json::to_value(value)?,
        })
    }

    /// A range check: `and(≥/> from, ≤/< to)` with the comparison operators
    /// selected by the inclusion flags.
    pub fn between<T: Serialize>(
        extractor: impl Into<Extractor>,
        from: T,
        to: T,
        include_lower: bool,
        include_upper: bool,
    ) -> Result<Filter> {
        let extractor = extractor.into();
        let lower = if include_lower {
            Filter::greater_equal(extractor.clone(), from)?
        } else {
            Filter::greater(extractor.clone(), from)?
        };
        let upper = if include_upper {
            Filter::less_equal(extractor, to)?
        } else {
            Filter::less(extractor, to)?
        };
        Ok(Filter::Between {
            filters: vec![lower, upper],
        })
    }

    /// Membership in a fixed collection of values. The input is materialized
    /// into a sequence in iteration order, so pass an ordered collection when
    /// a stable wire form matters.
    pub fn is_in<T: Serialize>(
        extractor: impl Into<Extractor>,
        values: impl IntoIterator<Item = T>,
    ) -> Result<Filter> {
        Ok(Filter::In {
            extractor: extractor.into(),
            values: materialize(values)?,
        })
    }

    pub fn contains<T: Serialize>(extractor: impl Into<Extractor>, value: T) -> Result<Filter> {
        Ok(Filter::Contains {
            extractor: extractor.into(),
            value: serde_json::to_value(value)?,
        })
    }

    pub fn contains_all<T: Serialize>(
        extractor: impl Into<Extractor>,
        values: impl IntoIterator<Item = T>,
    ) -> Result<Filter> {
        Ok(Filter::ContainsAll {
            extractor: extractor.into(),
            values: materialize(values)?,
        })
    }

    pub fn contains_any<T: Serialize>(
        extractor: impl Into<Extractor>,
        values: impl IntoIterator<Item = T>,
    ) -> Result<Filter> {
        Ok(Filter::ContainsAny {
            extractor: extractor.into(),
            values: materialize(values)?,
        })
    }

    /// SQL-LIKE pattern match with `%`/`_` wildcards.
    pub fn like(
        extractor: impl Into<Extractor>,
        pattern: impl Into<String>,
        ignore_case: bool,
    ) -> Filter {
        Filter::Like {
            extractor: extractor.into(),
            pattern: pattern.into(),
            escape_char: '\\',
            ignore_case,
        }
    }

    pub fn regex(extractor: impl Into<Extractor>, pattern: impl Into<String>) -> Filter {
        Filter::Regex {
            extractor: extractor.into(),
            pattern: pattern.into(),
        }
    }

    /// Wraps an opaque predicate descriptor the server knows how to evaluate.
    pub fn predicate<T: Serialize>(predicate: &T, extractor: Option<Extractor>) -> Result<Filter> {
        Ok(Filter::Predicate {
            extractor,
            predicate: serde_json::to_value(predicate)?,
        })
    }

    /// Restricts which change events a filter subscription reports. See
    /// [`event_mask`] for the recognized bits.
    pub fn map_event(mask: u32, filter: Filter) -> Filter {
        Filter::MapEvent {
            mask,
            filter: Some(Box::new(filter)),
        }
    }

    /// [`map_event`](Filter::map_event) with the default mask
    /// ([`event_mask::STANDARD`]).
    pub fn map_event_for(filter: Filter) -> Filter {
        Filter::map_event(event_mask::STANDARD, filter)
    }

    /// Restricts a query to the partition that owns `key`. Outermost-only by
    /// server contract.
    pub fn key_associated_with<K: Serialize>(self, key: K) -> Result<Filter> {
        Ok(Filter::KeyAssociated {
            filter: Box::new(self),
            host_key: serde_json::to_value(key)?,
        })
    }

    /// Restricts a query to the given key set. Outermost-only by server
    /// contract.
    pub fn for_keys<K: Serialize>(self, keys: impl IntoIterator<Item = K>) -> Result<Filter> {
        Ok(Filter::InKeySet {
            filter: Box::new(self),
            keys: materialize(keys)?,
        })
    }

    /// Conjunction of all given filters.
    pub fn all(filters: impl IntoIterator<Item = Filter>) -> Filter {
        Filter::All {
            filters: filters.into_iter().collect(),
        }
    }

    /// Disjunction of all given filters.
    pub fn any(filters: impl IntoIterator<Item = Filter>) -> Filter {
        Filter::Any {
            filters: filters.into_iter().collect(),
        }
    }

    pub fn and(self, other: Filter) -> Filter {
        Filter::And {
            filters: vec![self, other],
        }
    }

    pub fn or(self, other: Filter) -> Filter {
        Filter::Or {
            filters: vec![self, other],
        }
    }

    pub fn xor(self, other: Filter) -> Filter {
        Filter::Xor {
            filters: vec![self, other],
        }
    }

    pub fn negate(self) -> Filter {
        Filter::Not {
            filter: Box::new(self),
        }
    }
}

fn materialize<T: Serialize>(values: impl IntoIterator<Item = T>) -> Result<Vec<Value>> {
    values
        .into_iter()
        .map(|v| serde_json::to_value(v).map_err(Into::into))
        .collect()
}

impl std::ops::BitAnd for Filter {
    type Output = Filter;
    fn bitand(self, that: Self) -> Self {
        self.and(that)
    }
}

impl std::ops::BitOr for Filter {
    type Output = Filter;
    fn bitor(self, that: Self) -> Self {
        self.or(that)
    }
}

impl std::ops::BitXor for Filter {
    type Output = Filter;
    fn bitxor(self, that: Self) -> Self {
        self.xor(that)
    }
}

impl std::ops::Not for Filter {
    type Output = Filter;
    fn not(self) -> Self {
        self.negate()
    }
}
