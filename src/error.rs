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
use derive_more::Display;

/// All failures surfaced by this crate.
///
/// The variants are stable kinds rather than a grab-bag of wrapped causes:
/// callers dispatch on the kind (retry policy, user feedback) and the message
/// carries the detail. Transport and server errors pass through unchanged;
/// the client never retries on its own.
#[derive(Clone, Debug, Display, PartialEq, Eq)]
pub enum Error {
    /// The underlying channel failed while carrying a request or the event stream.
    #[display(fmt = "transport failure: {}", _0)]
    Transport(String),
    /// The configured request deadline elapsed before the server responded.
    #[display(fmt = "request timed out")]
    Timeout,
    /// A value could not be encoded or decoded with the configured codec.
    #[display(fmt = "codec failure: {}", _0)]
    BadValue(String),
    /// The session configuration is invalid (address or TLS options).
    #[display(fmt = "invalid configuration: {}", _0)]
    BadConfig(String),
    /// The owning session has been closed.
    #[display(fmt = "session is closed")]
    SessionClosed,
    /// The named map has been released or destroyed.
    #[display(fmt = "cache '{}' is not active", _0)]
    CacheNotActive(String),
    /// The event stream ended before an outstanding request was acknowledged.
    #[display(fmt = "event stream closed before acknowledgement")]
    StreamClosed,
    /// A failure reported by the server, forwarded verbatim.
    #[display(fmt = "server error {}: {}", code, message)]
    Server { code: i32, message: String },
}

impl std::error::Error for Error {}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::BadValue(e.to_string())
    }
}

impl From<serde_cbor::Error> for Error {
    fn from(e: serde_cbor::Error) -> Self {
        Error::BadValue(e.to_string())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
