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
//! Conversion between application values and the opaque byte strings carried
//! on the wire.
//!
//! The grid treats every key and value as an uninterpreted byte string tagged
//! with a format name; the codec is therefore an injected collaborator rather
//! than a fixed serialization scheme. Two codecs ship with the crate: JSON
//! (the default) and CBOR. Encoding must be deterministic for identical
//! inputs because the client uses the encoded form to canonicalize listener
//! targets and to deduplicate filter subscriptions.

use bytes::Bytes;
use serde::{de::DeserializeOwned, Serialize};

use crate::{Error, Result};

/// Serializes application values to the opaque wire representation and back.
///
/// Implementations must be deterministic: encoding the same value twice has
/// to produce identical bytes, since the encoded form doubles as the client's
/// canonical index key for listener registrations.
pub trait Codec: Clone + Send + Sync + 'static {
    /// The format tag sent alongside every payload, e.g. `"json"`.
    fn format(&self) -> &str;

    /// Encode a value; ill-typed input fails with [`Error::BadValue`].
    fn encode<T: Serialize>(&self, value: &T) -> Result<Bytes>;

    /// Decode a payload received from the server.
    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;
}

/// The built-in textual codec. Values travel as JSON documents.
///
/// `serde_json` serializes struct fields in declaration order and map types
/// in iteration order, so identical inputs produce identical bytes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn format(&self) -> &str {
        "json"
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<Bytes> {
        Ok(serde_json::to_vec(value)?.into())
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        if bytes.is_empty() {
            return Err(Error::BadValue("empty payload".to_owned()));
        }
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Compact binary codec. Values travel as CBOR items.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CborCodec;

impl Codec for CborCodec {
    fn format(&self) -> &str {
        "cbor"
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<Bytes> {
        Ok(serde_cbor::to_vec(value)?.into())
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        if bytes.is_empty() {
            return Err(Error::BadValue("empty payload".to_owned()));
        }
        Ok(serde_cbor::from_slice(bytes)?)
    }
}
