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
//! Application-facing listener types for map change notifications.

use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::{
    codec::Codec,
    service::events::{EventMessage, MapEventKind},
    Result,
};

/// A decoded change notification delivered to registered listeners.
///
/// Lite subscriptions omit the value payloads, so `old_value` and
/// `new_value` may be absent even for updates.
#[derive(Clone, Debug, PartialEq)]
pub struct MapEvent<K, V> {
    pub kind: MapEventKind,
    pub key: K,
    pub old_value: Option<V>,
    pub new_value: Option<V>,
    /// Server-assigned ids of the filter subscriptions this event matched.
    pub filter_ids: Vec<u64>,
}

impl<K, V> MapEvent<K, V>
where
    K: DeserializeOwned,
    V: DeserializeOwned,
{
    pub(crate) fn from_wire<C: Codec>(codec: &C, message: &EventMessage) -> Result<MapEvent<K, V>> {
        let decode_value = |bytes: &Option<bytes::Bytes>| -> Result<Option<V>> {
            match bytes {
                Some(b) if !b.is_empty() => Ok(Some(codec.decode(b)?)),
                _ => Ok(None),
            }
        };
        Ok(MapEvent {
            kind: message.kind,
            key: codec.decode(&message.key)?,
            old_value: decode_value(&message.old_value)?,
            new_value: decode_value(&message.new_value)?,
            filter_ids: message.filter_ids.clone(),
        })
    }
}

/// Receives change notifications for one named map.
///
/// Listeners are identified by handle: registering the same `Arc` twice with
/// the same lite flag is a no-op, and removal requires the handle used at
/// registration. All hooks default to doing nothing, so implementations
/// override only what they care about.
#[allow(unused_variables)]
pub trait MapListener<K, V>: Send + Sync + 'static {
    fn entry_inserted(&self, event: &MapEvent<K, V>) {}
    fn entry_updated(&self, event: &MapEvent<K, V>) {}
    fn entry_deleted(&self, event: &MapEvent<K, V>) {}
}

type Hook<K, V> = Box<dyn Fn(&MapEvent<K, V>) + Send + Sync>;

/// Builds a [`MapListener`] from closures.
///
/// ```
/// use keygrid::ListenerBuilder;
///
/// let listener = ListenerBuilder::<String, String>::new()
///     .on_inserted(|e| println!("inserted {:?}", e.key))
///     .on_any(|e| println!("changed {:?}", e.key))
///     .build();
/// ```
pub struct ListenerBuilder<K, V> {
    inserted: Vec<Hook<K, V>>,
    updated: Vec<Hook<K, V>>,
    deleted: Vec<Hook<K, V>>,
}

impl<K: 'static, V: 'static> ListenerBuilder<K, V> {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            inserted: Vec::new(),
            updated: Vec::new(),
            deleted: Vec::new(),
        }
    }

    pub fn on_inserted(mut self, f: impl Fn(&MapEvent<K, V>) + Send + Sync + 'static) -> Self {
        self.inserted.push(Box::new(f));
        self
    }

    pub fn on_updated(mut self, f: impl Fn(&MapEvent<K, V>) + Send + Sync + 'static) -> Self {
        self.updated.push(Box::new(f));
        self
    }

    pub fn on_deleted(mut self, f: impl Fn(&MapEvent<K, V>) + Send + Sync + 'static) -> Self {
        self.deleted.push(Box::new(f));
        self
    }

    /// Registers a hook for all three event kinds.
    pub fn on_any(self, f: impl Fn(&MapEvent<K, V>) + Send + Sync + 'static) -> Self {
        let f = Arc::new(f);
        let (f1, f2, f3) = (f.clone(), f.clone(), f);
        self.on_inserted(move |e| (*f1)(e))
            .on_updated(move |e| (*f2)(e))
            .on_deleted(move |e| (*f3)(e))
    }

    pub fn build(self) -> Arc<dyn MapListener<K, V>>
    where
        K: Send + Sync,
        V: Send + Sync,
    {
        Arc::new(HookListener {
            inserted: self.inserted,
            updated: self.updated,
            deleted: self.deleted,
        })
    }
}

struct HookListener<K, V> {
    inserted: Vec<Hook<K, V>>,
    updated: Vec<Hook<K, V>>,
    deleted: Vec<Hook<K, V>>,
}

impl<K: Send + Sync + 'static, V: Send + Sync + 'static> MapListener<K, V> for HookListener<K, V> {
    fn entry_inserted(&self, event: &MapEvent<K, V>) {
        for f in &self.inserted {
            f(event)
        }
    }

    fn entry_updated(&self, event: &MapEvent<K, V>) {
        for f in &self.updated {
            f(event)
        }
    }

    fn entry_deleted(&self, event: &MapEvent<K, V>) {
        for f in &self.deleted {
            f(event)
        }
    }
}

/// Lifecycle transitions of a named map, reported to
/// [`on_lifecycle`](crate::NamedMap::on_lifecycle) callbacks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MapLifecycleEvent {
    /// The local handle released its resources; the map still exists on the
    /// grid.
    Released,
    /// The map was destroyed grid-wide.
    Destroyed,
    /// All entries were removed without per-entry events.
    Truncated,
}
