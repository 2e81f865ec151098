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
//! Messages exchanged on the bidirectional event stream of a named map.
//!
//! The client writes [`ListenerRequest`]s and reads [`ListenerResponse`]s.
//! Correlation ids are opaque strings unique within one stream; the server
//! echoes them back on `subscribed`/`unsubscribed` acknowledgements.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// The kind of change a map event reports.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum MapEventKind {
    Inserted,
    Updated,
    Deleted,
}

/// A change notification as it travels on the wire: encoded key and values
/// plus the server-assigned ids of every filter subscription it matched.
///
/// Lite subscriptions receive events without the value payloads.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EventMessage {
    pub kind: MapEventKind,
    pub key: Bytes,
    pub old_value: Option<Bytes>,
    pub new_value: Option<Bytes>,
    #[serde(default)]
    pub filter_ids: Vec<u64>,
}

/// Client-to-server messages on the event stream.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum ListenerRequest {
    /// Opens the stream; must be the first message and acknowledged before
    /// any subscription is sent.
    #[serde(rename_all = "camelCase")]
    Init { id: String },
    #[serde(rename_all = "camelCase")]
    SubscribeKey { id: String, key: Bytes, lite: bool },
    #[serde(rename_all = "camelCase")]
    UnsubscribeKey { id: String, key: Bytes },
    #[serde(rename_all = "camelCase")]
    SubscribeFilter { id: String, filter: Bytes, lite: bool },
    /// Unsubscribes by the server-assigned filter id returned on the
    /// matching subscribe acknowledgement.
    #[serde(rename_all = "camelCase")]
    UnsubscribeFilter { id: String, filter_id: u64 },
}

impl ListenerRequest {
    /// The correlation id this request carries.
    pub fn id(&self) -> &str {
        match self {
            ListenerRequest::Init { id }
            | ListenerRequest::SubscribeKey { id, .. }
            | ListenerRequest::UnsubscribeKey { id, .. }
            | ListenerRequest::SubscribeFilter { id, .. }
            | ListenerRequest::UnsubscribeFilter { id, .. } => id,
        }
    }
}

/// Server-to-client messages on the event stream.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum ListenerResponse {
    /// Acknowledges an `init` or subscribe request. Filter subscribes
    /// additionally carry the server-assigned filter id used to route
    /// subsequent events.
    #[serde(rename_all = "camelCase")]
    Subscribed { id: String, filter_id: Option<u64> },
    #[serde(rename_all = "camelCase")]
    Unsubscribed { id: String },
    /// A change notification; see [`EventMessage`].
    #[serde(rename_all = "camelCase")]
    Event {
        #[serde(flatten)]
        event: EventMessage,
    },
    /// The map was destroyed server-side; the stream ends after this.
    Destroyed,
    /// The map was truncated server-side.
    Truncated,
    /// A stream-level failure reported by the server.
    #[serde(rename_all = "camelCase")]
    Error { code: i32, message: String },
}
