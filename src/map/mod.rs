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
//! The named map client: entry-level operations against one logically named
//! key-value collection on the grid.

use std::{
    any::Any,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, Weak,
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::{future::Future, stream::BoxStream, StreamExt};
use once_cell::sync::OnceCell;
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    codec::Codec,
    filter::Filter,
    map::dispatcher::{DispatchOwner, Dispatcher, SubscriptionTarget},
    processor::{Comparator, Processor},
    requests::RequestFactory,
    service::GridService,
    session::MapRegistry,
    Error, Extractor, Result,
};

pub(crate) mod dispatcher;
mod listener;

pub use listener::{ListenerBuilder, MapEvent, MapLifecycleEvent, MapListener};

/// A client-side handle to one named map on the grid.
///
/// Handles are cheap to clone and compare by identity: a
/// [`Session`](crate::Session) returns the same underlying handle for every
/// lookup of the same `(name, format)` pair. All operations go to the server;
/// nothing is cached locally.
///
/// `K` and `V` only describe how this handle encodes and decodes payloads;
/// the grid itself stores opaque bytes.
pub struct NamedMap<K, V, C: Codec = crate::codec::JsonCodec> {
    inner: Arc<MapInner<K, V, C>>,
}

impl<K, V, C: Codec> Clone for NamedMap<K, V, C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V, C: Codec> PartialEq for NamedMap<K, V, C> {
    /// Identity equality: two handles are equal when they share the same
    /// underlying map instance.
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<K, V, C: Codec> Eq for NamedMap<K, V, C> {}

impl<K, V, C: Codec> std::fmt::Debug for NamedMap<K, V, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedMap")
            .field("name", &self.inner.name)
            .field("format", &self.inner.factory.codec().format())
            .field("released", &self.inner.released.load(Ordering::SeqCst))
            .field("destroyed", &self.inner.destroyed.load(Ordering::SeqCst))
            .finish()
    }
}

struct MapInner<K, V, C: Codec> {
    name: String,
    session: Weak<dyn MapRegistry>,
    service: Arc<dyn GridService>,
    factory: RequestFactory<C>,
    timeout: Option<Duration>,
    dispatcher: OnceCell<Dispatcher<K, V, C>>,
    released: AtomicBool,
    destroyed: AtomicBool,
    lifecycle: Mutex<Vec<Arc<dyn Fn(MapLifecycleEvent) + Send + Sync>>>,
}

impl<K, V, C> MapInner<K, V, C>
where
    K: DeserializeOwned + Send + Sync + 'static,
    V: DeserializeOwned + Send + Sync + 'static,
    C: Codec,
{
    fn emit(&self, event: MapLifecycleEvent) {
        let callbacks: Vec<_> = self.lifecycle.lock().unwrap().iter().cloned().collect();
        for cb in callbacks {
            cb(event);
        }
    }

    fn deregister(&self) {
        if let Some(session) = self.session.upgrade() {
            session.deregister(&self.name, self.factory.codec().format());
        }
    }

    /// Marks the map destroyed, severs the stream and deregisters. Shared by
    /// the local `destroy()` call and the server's `DESTROYED` notification;
    /// the swap guarantees a single emission.
    fn complete_destroy(&self) {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(dispatcher) = self.dispatcher.get() {
            dispatcher.shutdown();
        }
        self.deregister();
        self.emit(MapLifecycleEvent::Destroyed);
    }
}

impl<K, V, C> DispatchOwner for MapInner<K, V, C>
where
    K: DeserializeOwned + Send + Sync + 'static,
    V: DeserializeOwned + Send + Sync + 'static,
    C: Codec,
{
    fn destroyed_from_stream(&self) {
        self.complete_destroy();
    }

    fn truncated_from_stream(&self) {
        self.emit(MapLifecycleEvent::Truncated);
    }
}

impl<K, V, C> NamedMap<K, V, C>
where
    K: Serialize + DeserializeOwned + Send + Sync + 'static,
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
    C: Codec,
{
    pub(crate) fn new(
        name: &str,
        codec: C,
        service: Arc<dyn GridService>,
        session: Weak<dyn MapRegistry>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            inner: Arc::new(MapInner {
                name: name.to_owned(),
                session,
                service,
                factory: RequestFactory::new(name, codec),
                timeout,
                dispatcher: OnceCell::new(),
                released: AtomicBool::new(false),
                destroyed: AtomicBool::new(false),
                lifecycle: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn format(&self) -> &str {
        self.inner.factory.codec().format()
    }

    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::SeqCst)
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    /// Registers a callback for `released`/`destroyed`/`truncated`
    /// transitions of this map.
    pub fn on_lifecycle(&self, callback: impl Fn(MapLifecycleEvent) + Send + Sync + 'static) {
        self.inner.lifecycle.lock().unwrap().push(Arc::new(callback));
    }

    fn guard(&self) -> Result<()> {
        match self.inner.session.upgrade() {
            Some(session) if session.is_open() => {}
            _ => return Err(Error::SessionClosed),
        }
        if self.is_released() || self.is_destroyed() {
            return Err(Error::CacheNotActive(self.inner.name.clone()));
        }
        Ok(())
    }

    /// Applies the configured request deadline to one server call.
    async fn call<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match self.inner.timeout {
            Some(deadline) => match tokio::time::timeout(deadline, fut).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout),
            },
            None => fut.await,
        }
    }

    fn decode_optional<T: DeserializeOwned>(&self, value: crate::service::OptionalValue) -> Result<Option<T>> {
        match value.into_option() {
            Some(bytes) => Ok(Some(self.inner.factory.codec().decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn dispatcher(&self) -> &Dispatcher<K, V, C> {
        self.inner.dispatcher.get_or_init(|| {
            let owner_arc: Arc<dyn DispatchOwner> = self.inner.clone();
            let owner: Weak<dyn DispatchOwner> = Arc::downgrade(&owner_arc);
            Dispatcher::new(
                self.inner.service.clone(),
                &self.inner.name,
                self.inner.factory.codec().clone(),
                owner,
                self.inner.timeout,
            )
        })
    }

    // -- entry operations ---------------------------------------------------

    /// Returns the value mapped to `key`, or `None`.
    pub async fn get(&self, key: &K) -> Result<Option<V>> {
        self.guard()?;
        let request = self.inner.factory.key(key)?;
        let response = self.call(self.inner.service.get(request)).await?;
        self.decode_optional(response)
    }

    /// Returns the value mapped to `key`, or the given default.
    pub async fn get_or_default(&self, key: &K, default: V) -> Result<V> {
        Ok(self.get(key).await?.unwrap_or(default))
    }

    /// Streams the present entries for the given keys as they arrive.
    pub async fn get_all(
        &self,
        keys: impl IntoIterator<Item = K>,
    ) -> Result<BoxStream<'static, Result<(K, V)>>> {
        self.guard()?;
        let request = self.inner.factory.get_all(keys)?;
        let stream = self.call(self.inner.service.get_all(request)).await?;
        Ok(self.decode_entries(stream))
    }

    /// Maps `key` to `value`, returning the replaced value.
    pub async fn put(&self, key: &K, value: &V) -> Result<Option<V>> {
        self.put_with_ttl(key, value, Duration::ZERO).await
    }

    /// Like [`put`](NamedMap::put) with an explicit time-to-live. A zero TTL
    /// means the server default.
    pub async fn put_with_ttl(&self, key: &K, value: &V, ttl: Duration) -> Result<Option<V>> {
        self.guard()?;
        let request = self.inner.factory.entry(key, value, ttl.as_millis() as i64)?;
        let response = self.call(self.inner.service.put(request)).await?;
        self.decode_optional(response)
    }

    /// Maps `key` to `value` unless present; returns the prior value if the
    /// entry already existed.
    pub async fn put_if_absent(&self, key: &K, value: &V) -> Result<Option<V>> {
        self.put_if_absent_with_ttl(key, value, Duration::ZERO).await
    }

    pub async fn put_if_absent_with_ttl(&self, key: &K, value: &V, ttl: Duration) -> Result<Option<V>> {
        self.guard()?;
        let request = self.inner.factory.entry(key, value, ttl.as_millis() as i64)?;
        let response = self.call(self.inner.service.put_if_absent(request)).await?;
        self.decode_optional(response)
    }

    pub async fn put_all(&self, entries: impl IntoIterator<Item = (K, V)>) -> Result<()> {
        self.put_all_with_ttl(entries, Duration::ZERO).await
    }

    pub async fn put_all_with_ttl(
        &self,
        entries: impl IntoIterator<Item = (K, V)>,
        ttl: Duration,
    ) -> Result<()> {
        self.guard()?;
        let request = self.inner.factory.put_all(entries, ttl.as_millis() as i64)?;
        self.call(self.inner.service.put_all(request)).await
    }

    /// Removes the mapping for `key`, returning the removed value.
    pub async fn remove(&self, key: &K) -> Result<Option<V>> {
        self.guard()?;
        let request = self.inner.factory.key(key)?;
        let response = self.call(self.inner.service.remove(request)).await?;
        self.decode_optional(response)
    }

    /// Removes the entry only if it is currently mapped to `value`.
    pub async fn remove_mapping(&self, key: &K, value: &V) -> Result<bool> {
        self.guard()?;
        let request = self.inner.factory.entry(key, value, 0)?;
        self.call(self.inner.service.remove_mapping(request)).await
    }

    /// Replaces the value only if the key is currently mapped; returns the
    /// prior value.
    pub async fn replace(&self, key: &K, value: &V) -> Result<Option<V>> {
        self.guard()?;
        let request = self.inner.factory.entry(key, value, 0)?;
        let response = self.call(self.inner.service.replace(request)).await?;
        self.decode_optional(response)
    }

    /// Replaces the value only if the key is currently mapped to `expected`.
    pub async fn replace_mapping(&self, key: &K, expected: &V, replacement: &V) -> Result<bool> {
        self.guard()?;
        let request = self.inner.factory.replace_mapping(key, expected, replacement)?;
        self.call(self.inner.service.replace_mapping(request)).await
    }

    pub async fn contains_key(&self, key: &K) -> Result<bool> {
        self.guard()?;
        let request = self.inner.factory.key(key)?;
        self.call(self.inner.service.contains_key(request)).await
    }

    pub async fn contains_value(&self, value: &V) -> Result<bool> {
        self.guard()?;
        let request = self.inner.factory.value(value)?;
        self.call(self.inner.service.contains_value(request)).await
    }

    pub async fn contains_entry(&self, key: &K, value: &V) -> Result<bool> {
        self.guard()?;
        let request = self.inner.factory.entry(key, value, 0)?;
        self.call(self.inner.service.contains_entry(request)).await
    }

    pub async fn size(&self) -> Result<usize> {
        self.guard()?;
        let request = self.inner.factory.cache();
        Ok(self.call(self.inner.service.size(request)).await? as usize)
    }

    pub async fn is_empty(&self) -> Result<bool> {
        self.guard()?;
        let request = self.inner.factory.cache();
        self.call(self.inner.service.is_empty(request)).await
    }

    /// Removes every entry, raising per-entry deletion events on the grid.
    pub async fn clear(&self) -> Result<()> {
        self.guard()?;
        let request = self.inner.factory.cache();
        self.call(self.inner.service.clear(request)).await
    }

    /// Removes every entry without per-entry events and emits the
    /// `truncated` lifecycle event. When the event stream is open the
    /// emission rides on the server's notification; otherwise it happens
    /// locally after the call returns.
    pub async fn truncate(&self) -> Result<()> {
        self.guard()?;
        let request = self.inner.factory.cache();
        self.call(self.inner.service.truncate(request)).await?;
        let stream_open = self
            .inner
            .dispatcher
            .get()
            .map(|d| d.is_stream_open())
            .unwrap_or(false);
        if !stream_open {
            self.inner.emit(MapLifecycleEvent::Truncated);
        }
        Ok(())
    }

    // -- queries ------------------------------------------------------------

    /// Streams the keys matching `filter` (all keys when absent), decoded as
    /// they arrive. Ordering is unspecified.
    pub async fn key_set(&self, filter: Option<&Filter>) -> Result<BoxStream<'static, Result<K>>> {
        self.guard()?;
        let request = self.inner.factory.query(filter)?;
        let stream = self.call(self.inner.service.key_set(request)).await?;
        let codec = self.inner.factory.codec().clone();
        Ok(stream
            .map(move |item| item.and_then(|bytes| codec.decode::<K>(&bytes)))
            .boxed())
    }

    /// Streams the entries matching `filter` (all entries when absent).
    pub async fn entry_set(
        &self,
        filter: Option<&Filter>,
    ) -> Result<BoxStream<'static, Result<(K, V)>>> {
        self.guard()?;
        let request = self.inner.factory.query(filter)?;
        let stream = self.call(self.inner.service.entry_set(request)).await?;
        Ok(self.decode_entries(stream))
    }

    /// Streams the values matching `filter` (all values when absent).
    pub async fn values(&self, filter: Option<&Filter>) -> Result<BoxStream<'static, Result<V>>> {
        self.guard()?;
        let request = self.inner.factory.query(filter)?;
        let stream = self.call(self.inner.service.values(request)).await?;
        let codec = self.inner.factory.codec().clone();
        Ok(stream
            .map(move |item| item.and_then(|bytes| codec.decode::<V>(&bytes)))
            .boxed())
    }

    fn decode_entries<T: DeserializeOwned + Send + 'static>(
        &self,
        stream: BoxStream<'static, Result<crate::service::BinaryEntry>>,
    ) -> BoxStream<'static, Result<(K, T)>> {
        let codec = self.inner.factory.codec().clone();
        stream
            .map(move |item| {
                item.and_then(|entry| {
                    let key = codec.decode::<K>(&entry.key)?;
                    let value = codec.decode::<T>(&entry.value)?;
                    Ok((key, value))
                })
            })
            .boxed()
    }

    // -- entry processors ---------------------------------------------------

    /// Invokes an entry processor against one key; `None` when the processor
    /// produced no result.
    pub async fn invoke<R: DeserializeOwned + Send + 'static>(
        &self,
        key: &K,
        processor: &Processor,
    ) -> Result<Option<R>> {
        self.guard()?;
        let request = self.inner.factory.invoke(key, processor)?;
        let response = self.call(self.inner.service.invoke(request)).await?;
        self.decode_optional(response)
    }

    /// Invokes an entry processor against every entry matching `filter`,
    /// streaming `(key, result)` pairs.
    pub async fn invoke_all<R: DeserializeOwned + Send + 'static>(
        &self,
        filter: &Filter,
        processor: &Processor,
    ) -> Result<BoxStream<'static, Result<(K, R)>>> {
        self.guard()?;
        let request = self.inner.factory.invoke_all_filter(filter, processor)?;
        let stream = self.call(self.inner.service.invoke_all(request)).await?;
        Ok(self.decode_entries(stream))
    }

    /// Invokes an entry processor against an explicit key set.
    pub async fn invoke_all_keys<R: DeserializeOwned + Send + 'static>(
        &self,
        keys: impl IntoIterator<Item = K>,
        processor: &Processor,
    ) -> Result<BoxStream<'static, Result<(K, R)>>> {
        self.guard()?;
        let request = self.inner.factory.invoke_all_keys(keys, processor)?;
        let stream = self.call(self.inner.service.invoke_all(request)).await?;
        Ok(self.decode_entries(stream))
    }

    // -- indexes ------------------------------------------------------------

    pub async fn add_index(&self, extractor: impl Into<Extractor>, sorted: bool) -> Result<()> {
        self.guard()?;
        let request = self.inner.factory.index(&extractor.into(), sorted, None)?;
        self.call(self.inner.service.add_index(request)).await
    }

    pub async fn add_index_with_comparator(
        &self,
        extractor: impl Into<Extractor>,
        sorted: bool,
        comparator: &Comparator,
    ) -> Result<()> {
        self.guard()?;
        let request = self
            .inner
            .factory
            .index(&extractor.into(), sorted, Some(comparator))?;
        self.call(self.inner.service.add_index(request)).await
    }

    pub async fn remove_index(&self, extractor: impl Into<Extractor>) -> Result<()> {
        self.guard()?;
        let request = self.inner.factory.index(&extractor.into(), false, None)?;
        self.call(self.inner.service.remove_index(request)).await
    }

    // -- listeners ----------------------------------------------------------

    /// Registers a listener for every change on this map. Completes once the
    /// server has acknowledged the subscription.
    pub async fn add_map_listener(
        &self,
        listener: &Arc<dyn MapListener<K, V>>,
        lite: bool,
    ) -> Result<()> {
        self.add_filter_listener(&Filter::always(), listener, lite).await
    }

    pub async fn remove_map_listener(&self, listener: &Arc<dyn MapListener<K, V>>) -> Result<()> {
        self.remove_filter_listener(&Filter::always(), listener).await
    }

    /// Registers a listener for changes to one key.
    pub async fn add_key_listener(
        &self,
        key: &K,
        listener: &Arc<dyn MapListener<K, V>>,
        lite: bool,
    ) -> Result<()> {
        self.guard()?;
        let bytes = self.inner.factory.encode(key)?;
        self.dispatcher()
            .add_listener(SubscriptionTarget::Key(bytes), listener.clone(), lite)
            .await
    }

    pub async fn remove_key_listener(
        &self,
        key: &K,
        listener: &Arc<dyn MapListener<K, V>>,
    ) -> Result<()> {
        self.guard()?;
        let bytes = self.inner.factory.encode(key)?;
        self.dispatcher()
            .remove_listener(SubscriptionTarget::Key(bytes), listener)
            .await
    }

    /// Registers a listener for changes matching a filter. Plain filters are
    /// wrapped into a map-event filter with the standard mask; the same
    /// wrapping happens on removal, so both sides canonicalize identically.
    pub async fn add_filter_listener(
        &self,
        filter: &Filter,
        listener: &Arc<dyn MapListener<K, V>>,
        lite: bool,
    ) -> Result<()> {
        self.guard()?;
        let bytes = self.inner.factory.encode(&wrap_listener_filter(filter))?;
        self.dispatcher()
            .add_listener(SubscriptionTarget::Filter(bytes), listener.clone(), lite)
            .await
    }

    pub async fn remove_filter_listener(
        &self,
        filter: &Filter,
        listener: &Arc<dyn MapListener<K, V>>,
    ) -> Result<()> {
        self.guard()?;
        let bytes = self.inner.factory.encode(&wrap_listener_filter(filter))?;
        self.dispatcher()
            .remove_listener(SubscriptionTarget::Filter(bytes), listener)
            .await
    }

    // -- lifecycle ----------------------------------------------------------

    /// Severs the event stream and releases local resources; the map itself
    /// keeps existing on the grid. Idempotent.
    pub async fn release(&self) -> Result<()> {
        if self.inner.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(dispatcher) = self.inner.dispatcher.get() {
            dispatcher.shutdown();
        }
        self.inner.deregister();
        self.inner.emit(MapLifecycleEvent::Released);
        Ok(())
    }

    /// Destroys the map grid-wide. Every client holding this map observes
    /// the `destroyed` event; further operations fail with
    /// [`CacheNotActive`](crate::Error::CacheNotActive).
    pub async fn destroy(&self) -> Result<()> {
        self.guard()?;
        let request = self.inner.factory.cache();
        self.call(self.inner.service.destroy(request)).await?;
        self.inner.complete_destroy();
        Ok(())
    }
}

/// Listener filters ride inside a map-event filter so the server knows which
/// change kinds to report; an explicit map-event filter passes through.
fn wrap_listener_filter(filter: &Filter) -> Filter {
    match filter {
        Filter::MapEvent { .. } => filter.clone(),
        other => Filter::map_event_for(other.clone()),
    }
}

/// Type-erased handle the session registry keeps for ordered teardown.
#[async_trait]
pub(crate) trait MapHandle: Send + Sync + 'static {
    fn as_any(&self) -> &dyn Any;
    fn cache_name(&self) -> &str;
    async fn release_handle(&self) -> Result<()>;
}

#[async_trait]
impl<K, V, C> MapHandle for NamedMap<K, V, C>
where
    K: Serialize + DeserializeOwned + Send + Sync + 'static,
    V: Serialize + DeserializeOwned + Send + Sync + 'static,
    C: Codec,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn cache_name(&self) -> &str {
        self.name()
    }

    async fn release_handle(&self) -> Result<()> {
        self.release().await
    }
}
