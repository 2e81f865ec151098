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
//! Opaque descriptors the server interprets: entry processors and index
//! comparators.
//!
//! The client constructs these but never executes them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{extractor::Extractor, Result};

/// A server-side computation over one or more entries, carried as an opaque
/// tagged payload.
///
/// ```
/// use keygrid::Processor;
///
/// let p = Processor::of("processor.NumberIncrementor", [
///     ("property", serde_json::json!("visits")),
///     ("increment", serde_json::json!(1)),
/// ]);
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(transparent)]
pub struct Processor(Value);

impl Processor {
    /// Builds a processor descriptor from its server-recognized type tag and
    /// named arguments.
    pub fn of(
        tag: impl Into<String>,
        properties: impl IntoIterator<Item = (&'static str, Value)>,
    ) -> Processor {
        let mut map = Map::new();
        map.insert("@class".to_owned(), Value::String(tag.into()));
        for (k, v) in properties {
            map.insert(k.to_owned(), v);
        }
        Processor(Value::Object(map))
    }

    /// Builds a processor descriptor from any serializable value that already
    /// carries its own tag.
    pub fn from_value<T: Serialize>(value: &T) -> Result<Processor> {
        Ok(Processor(serde_json::to_value(value)?))
    }
}

/// Orders entries during index maintenance and filtered queries.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "@class")]
pub enum Comparator {
    /// Compares entries by an extracted attribute.
    #[serde(rename = "comparator.ExtractorComparator")]
    OfExtractor { extractor: Extractor },
    /// Reverses the contained comparator.
    #[serde(rename = "comparator.InverseComparator")]
    Inverse { comparator: Box<Comparator> },
}

impl Comparator {
    pub fn of(extractor: impl Into<Extractor>) -> Comparator {
        Comparator::OfExtractor {
            extractor: extractor.into(),
        }
    }

    pub fn inverse(self) -> Comparator {
        Comparator::Inverse {
            comparator: Box::new(self),
        }
    }
}
