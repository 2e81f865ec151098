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
//! The session: owner of the transport channel and the registry of live
//! named maps.

use std::{
    collections::HashMap,
    fmt::Debug,
    sync::{Arc, Mutex, Weak},
};

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::{
    codec::{Codec, JsonCodec},
    config::SessionConfig,
    map::{MapHandle, NamedMap},
    service::GridService,
    Error, Result,
};

/// Lifecycle transitions of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session finished closing. Emitted exactly once.
    Closed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SessionState {
    Open,
    Closing,
    Closed,
}

/// What a named map needs from its owning session: liveness checks and
/// registry removal. Held weakly by every map, so a dropped session never
/// stays alive through its maps.
pub(crate) trait MapRegistry: Send + Sync + 'static {
    fn is_open(&self) -> bool;
    fn deregister(&self, name: &str, format: &str);
}

struct SessionShared {
    config: SessionConfig,
    service: Arc<dyn GridService>,
    state: Mutex<SessionState>,
    maps: Mutex<HashMap<(String, String), Box<dyn MapHandle>>>,
    lifecycle: Mutex<Vec<Arc<dyn Fn(SessionEvent) + Send + Sync>>>,
}

impl MapRegistry for SessionShared {
    fn is_open(&self) -> bool {
        *self.state.lock().unwrap() == SessionState::Open
    }

    fn deregister(&self, name: &str, format: &str) {
        self.maps
            .lock()
            .unwrap()
            .remove(&(name.to_owned(), format.to_owned()));
    }
}

/// A logical session against one grid endpoint.
///
/// The session owns the shared transport and hands out [`NamedMap`] handles.
/// Handles for the same `(name, format)` pair are identity-equal; the
/// registry caches them until they are released, destroyed, or the session
/// closes.
///
/// ```no_run
/// # async fn example(service: std::sync::Arc<dyn keygrid::service::GridService>) -> keygrid::Result<()> {
/// use keygrid::{Session, SessionConfig};
///
/// let session = Session::new(SessionConfig::default(), service)?;
/// let orders = session.cache::<String, u64>("orders")?;
/// orders.put(&"o-1".to_owned(), &100).await?;
/// session.close().await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionShared>,
}

impl Session {
    /// Creates a session over an established transport. The configuration
    /// has already been validated by its builder and is immutable from here
    /// on.
    pub fn new(config: SessionConfig, service: Arc<dyn GridService>) -> Result<Session> {
        Ok(Session {
            inner: Arc::new(SessionShared {
                config,
                service,
                state: Mutex::new(SessionState::Open),
                maps: Mutex::new(HashMap::new()),
                lifecycle: Mutex::new(Vec::new()),
            }),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.state.lock().unwrap() == SessionState::Closed
    }

    /// Registers a callback for session lifecycle events.
    pub fn on_lifecycle(&self, callback: impl Fn(SessionEvent) + Send + Sync + 'static) {
        self.inner.lifecycle.lock().unwrap().push(Arc::new(callback));
    }

    /// Opens (or returns the live handle of) the named map `name` with the
    /// session's default codec. Only the built-in `"json"` format has a
    /// default codec; other configured formats go through
    /// [`cache_with`](Session::cache_with).
    pub fn cache<K, V>(&self, name: &str) -> Result<NamedMap<K, V, JsonCodec>>
    where
        K: Serialize + DeserializeOwned + Send + Sync + 'static,
        V: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let codec = JsonCodec;
        if self.inner.config.format() != codec.format() {
            return Err(Error::BadConfig(format!(
                "no built-in codec for format '{}'; use cache_with",
                self.inner.config.format()
            )));
        }
        self.cache_with(name, codec)
    }

    /// Opens (or returns the live handle of) the named map `name` with an
    /// explicit codec. Maps are registered by `(name, format)`: looking the
    /// same pair up again returns the identical handle, and a lookup with
    /// different entry types fails with [`BadValue`](Error::BadValue).
    pub fn cache_with<K, V, C>(&self, name: &str, codec: C) -> Result<NamedMap<K, V, C>>
    where
        K: Serialize + DeserializeOwned + Send + Sync + 'static,
        V: Serialize + DeserializeOwned + Send + Sync + 'static,
        C: Codec,
    {
        if !self.inner.is_open() {
            return Err(Error::SessionClosed);
        }
        let key = (name.to_owned(), codec.format().to_owned());
        let mut maps = self.inner.maps.lock().unwrap();
        if let Some(handle) = maps.get(&key) {
            return handle
                .as_any()
                .downcast_ref::<NamedMap<K, V, C>>()
                .cloned()
                .ok_or_else(|| {
                    Error::BadValue(format!(
                        "cache '{}' is already open with different entry types",
                        name
                    ))
                });
        }
        let registry_arc: Arc<dyn MapRegistry> = self.inner.clone();
        let registry: Weak<dyn MapRegistry> = Arc::downgrade(&registry_arc);
        let map = NamedMap::new(
            name,
            codec,
            self.inner.service.clone(),
            registry,
            self.inner.config.request_timeout(),
        );
        maps.insert(key, Box::new(map.clone()));
        debug!(cache = name, "opened named map");
        Ok(map)
    }

    /// Closes the session: releases every live map in turn, then closes the
    /// transport channel. Idempotent: only the first call tears down and
    /// emits [`SessionEvent::Closed`]; operations submitted afterwards fail
    /// with [`SessionClosed`](Error::SessionClosed).
    ///
    /// Individual release failures are logged and swallowed; the channel is
    /// closed regardless.
    pub async fn close(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock().unwrap();
            if *state != SessionState::Open {
                return Ok(());
            }
            *state = SessionState::Closing;
        }
        let handles: Vec<Box<dyn MapHandle>> = {
            let mut maps = self.inner.maps.lock().unwrap();
            maps.drain().map(|(_, handle)| handle).collect()
        };
        for handle in handles {
            if let Err(e) = handle.release_handle().await {
                warn!(cache = handle.cache_name(), error = %e, "error releasing map during close");
            }
        }
        if let Err(e) = self.inner.service.close().await {
            warn!(error = %e, "error closing transport channel");
        }
        *self.inner.state.lock().unwrap() = SessionState::Closed;
        let callbacks: Vec<_> = self.inner.lifecycle.lock().unwrap().iter().cloned().collect();
        for cb in callbacks {
            cb(SessionEvent::Closed);
        }
        debug!(address = self.inner.config.address(), "session closed");
        Ok(())
    }
}

impl Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("address", &self.inner.config.address())
            .field("format", &self.inner.config.format())
            .field("state", &*self.inner.state.lock().unwrap())
            .finish()
    }
}
