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
//! Value extractors: server-interpretable projections from a stored entry to
//! one of its attributes.
//!
//! An extractor never runs on the client; it is serialized into filters,
//! index definitions and entry processors and evaluated by the grid. The
//! tree is immutable once constructed.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A projection from an entry's value to some attribute of it.
///
/// Most call sites accept `impl Into<Extractor>`, so a plain string works
/// wherever an extractor is expected: `"age"` projects the `age` attribute,
/// `"address.city"` chains through `address` into `city`.
///
/// ```
/// use keygrid::Extractor;
///
/// let simple: Extractor = "age".into();
/// assert_eq!(simple, Extractor::universal("age"));
///
/// let nested: Extractor = "address.city".into();
/// assert_eq!(nested, Extractor::chain("address.city"));
/// ```
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "@class")]
pub enum Extractor {
    /// Returns the entry value itself.
    #[serde(rename = "extractor.IdentityExtractor")]
    Identity,
    /// Projects the attribute reachable under `name` on the entry value.
    #[serde(rename = "extractor.UniversalExtractor")]
    Universal { name: String },
    /// Applies the contained extractors left to right.
    #[serde(rename = "extractor.ChainedExtractor")]
    Chained { extractors: Vec<Extractor> },
}

impl Extractor {
    /// The identity projection.
    pub fn identity() -> Extractor {
        Extractor::Identity
    }

    /// Projects a single named attribute. An empty name is the identity
    /// projection and canonicalizes to it, so both spellings share one wire
    /// form.
    pub fn universal(name: impl Into<String>) -> Extractor {
        let name = name.into();
        if name.is_empty() {
            Extractor::Identity
        } else {
            Extractor::Universal { name }
        }
    }

    /// Builds a chain from a dot-separated path: `"a.b.c"` composes the
    /// universal extractors `a`, `b`, `c` left to right. A path without a
    /// dot is a plain universal extractor.
    pub fn chain(path: impl AsRef<str>) -> Extractor {
        let path = path.as_ref();
        if !path.contains('.') {
            return Extractor::universal(path);
        }
        Extractor::Chained {
            extractors: path.split('.').map(Extractor::universal).collect(),
        }
    }
}

impl From<&str> for Extractor {
    fn from(path: &str) -> Self {
        Extractor::chain(path)
    }
}

impl From<String> for Extractor {
    fn from(path: String) -> Self {
        Extractor::chain(&path)
    }
}

impl fmt::Display for Extractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Extractor::Identity => f.write_str("_"),
            Extractor::Universal { name } => f.write_str(name),
            Extractor::Chained { extractors } => {
                for (i, e) in extractors.iter().enumerate() {
                    if i > 0 {
                        f.write_str(".")?;
                    }
                    e.fmt(f)?;
                }
                Ok(())
            }
        }
    }
}
