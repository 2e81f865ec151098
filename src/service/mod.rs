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
//! The opaque RPC contract between the client core and the grid.
//!
//! [`GridService`] is the seam a concrete transport implements. The client
//! never interprets the wire protocol itself: it hands the transport fully
//! encoded descriptors (keys, values and filters are already codec output)
//! and consumes plain results. Streamed query operations arrive as flat item
//! streams; a transport that receives pages flattens them before yielding.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::Result;

pub mod events;

use events::{ListenerRequest, ListenerResponse};

/// Identifies a named map: its name plus the codec format of its payloads.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CacheRequest {
    pub cache: String,
    pub format: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KeyRequest {
    pub cache: String,
    pub format: String,
    pub key: Bytes,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ValueRequest {
    pub cache: String,
    pub format: String,
    pub value: Bytes,
}

/// A key/value pair with an optional time-to-live. `ttl_millis` of zero means
/// the server default.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct EntryRequest {
    pub cache: String,
    pub format: String,
    pub key: Bytes,
    pub value: Bytes,
    pub ttl_millis: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceMappingRequest {
    pub cache: String,
    pub format: String,
    pub key: Bytes,
    pub expected: Bytes,
    pub replacement: Bytes,
}

/// An encoded key/value pair as it appears in bulk requests and streamed
/// entry responses.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BinaryEntry {
    pub key: Bytes,
    pub value: Bytes,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PutAllRequest {
    pub cache: String,
    pub format: String,
    pub entries: Vec<BinaryEntry>,
    pub ttl_millis: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GetAllRequest {
    pub cache: String,
    pub format: String,
    pub keys: Vec<Bytes>,
}

/// A filtered query over keys, values or entries. An absent filter selects
/// everything.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QueryRequest {
    pub cache: String,
    pub format: String,
    pub filter: Option<Bytes>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IndexRequest {
    pub cache: String,
    pub format: String,
    pub extractor: Bytes,
    pub sorted: bool,
    pub comparator: Option<Bytes>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InvokeRequest {
    pub cache: String,
    pub format: String,
    pub key: Bytes,
    pub processor: Bytes,
}

/// The target of a bulk invocation: an explicit key set or a filter.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum InvokeTarget {
    Keys { keys: Vec<Bytes> },
    Filter { filter: Bytes },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InvokeAllRequest {
    pub cache: String,
    pub format: String,
    pub target: InvokeTarget,
    pub processor: Bytes,
}

/// A nullable result payload.
///
/// The grid cannot distinguish "mapped to null" from "absent" on the wire, so
/// both arrive here; an absent or empty value decodes to `None` exactly once.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OptionalValue {
    pub present: bool,
    pub value: Bytes,
}

impl OptionalValue {
    pub fn of(value: Bytes) -> OptionalValue {
        OptionalValue {
            present: true,
            value,
        }
    }

    pub fn missing() -> OptionalValue {
        OptionalValue::default()
    }

    /// Collapses absent and empty payloads into `None`.
    pub fn into_option(self) -> Option<Bytes> {
        if self.present && !self.value.is_empty() {
            Some(self.value)
        } else {
            None
        }
    }
}

/// The duplex event stream of one named map.
///
/// Requests are written into a bounded channel: a full write buffer
/// suspends the caller, which is the only backpressure mechanism the client
/// applies. Dropping the sender cancels the stream; the transport then ends
/// `responses`.
pub struct EventChannel {
    pub requests: mpsc::Sender<ListenerRequest>,
    pub responses: BoxStream<'static, Result<ListenerResponse>>,
}

/// A remote grid as the client core consumes it.
///
/// One method per named-map operation plus the bidirectional event stream.
/// Implementations serialize channel access internally; callers may invoke
/// any method concurrently. Errors surface unchanged; the core never
/// retries.
#[async_trait]
pub trait GridService: Send + Sync + 'static {
    async fn get(&self, request: KeyRequest) -> Result<OptionalValue>;

    async fn get_all(&self, request: GetAllRequest) -> Result<BoxStream<'static, Result<BinaryEntry>>>;

    async fn put(&self, request: EntryRequest) -> Result<OptionalValue>;

    async fn put_if_absent(&self, request: EntryRequest) -> Result<OptionalValue>;

    async fn put_all(&self, request: PutAllRequest) -> Result<()>;

    async fn remove(&self, request: KeyRequest) -> Result<OptionalValue>;

    /// Removes the entry only when it is currently mapped to the given value.
    async fn remove_mapping(&self, request: EntryRequest) -> Result<bool>;

    async fn replace(&self, request: EntryRequest) -> Result<OptionalValue>;

    /// Replaces the entry only when it is currently mapped to the expected value.
    async fn replace_mapping(&self, request: ReplaceMappingRequest) -> Result<bool>;

    async fn contains_key(&self, request: KeyRequest) -> Result<bool>;

    async fn contains_value(&self, request: ValueRequest) -> Result<bool>;

    async fn contains_entry(&self, request: EntryRequest) -> Result<bool>;

    async fn size(&self, request: CacheRequest) -> Result<u64>;

    async fn is_empty(&self, request: CacheRequest) -> Result<bool>;

    async fn clear(&self, request: CacheRequest) -> Result<()>;

    /// Removes all entries without raising per-entry events.
    async fn truncate(&self, request: CacheRequest) -> Result<()>;

    /// Destroys the map grid-wide.
    async fn destroy(&self, request: CacheRequest) -> Result<()>;

    async fn key_set(&self, request: QueryRequest) -> Result<BoxStream<'static, Result<Bytes>>>;

    async fn entry_set(&self, request: QueryRequest) -> Result<BoxStream<'static, Result<BinaryEntry>>>;

    async fn values(&self, request: QueryRequest) -> Result<BoxStream<'static, Result<Bytes>>>;

    async fn invoke(&self, request: InvokeRequest) -> Result<OptionalValue>;

    async fn invoke_all(&self, request: InvokeAllRequest) -> Result<BoxStream<'static, Result<BinaryEntry>>>;

    async fn add_index(&self, request: IndexRequest) -> Result<()>;

    async fn remove_index(&self, request: IndexRequest) -> Result<()>;

    /// Opens the bidirectional event stream for one named map.
    async fn events(&self, request: CacheRequest) -> Result<EventChannel>;

    /// Closes the underlying channel. Called once, by the owning session.
    async fn close(&self) -> Result<()>;
}
