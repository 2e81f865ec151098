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
//! An in-memory, scripted `GridService` used by the integration suite.
//!
//! Unary operations run against per-cache byte maps. The event stream side
//! records every `ListenerRequest` it receives and acknowledges them like the
//! real server would (assigning filter ids from a counter); tests inject
//! server-side events and failures explicitly.

#![allow(dead_code)]

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::mpsc;

use keygrid::service::{
    events::{EventMessage, ListenerRequest, ListenerResponse, MapEventKind},
    BinaryEntry, CacheRequest, EntryRequest, EventChannel, GetAllRequest, GridService,
    IndexRequest, InvokeAllRequest, InvokeRequest, KeyRequest, OptionalValue, PutAllRequest,
    QueryRequest, ReplaceMappingRequest, ValueRequest,
};
use keygrid::{Error, MapEvent, MapListener, Result};

type Store = BTreeMap<Vec<u8>, Vec<u8>>;

struct MockInner {
    stores: Mutex<HashMap<String, Store>>,
    log: Mutex<Vec<ListenerRequest>>,
    streams: Mutex<Vec<mpsc::Sender<Result<ListenerResponse>>>>,
    assigned_filter_ids: Mutex<Vec<u64>>,
    next_filter_id: AtomicU64,
    /// While set, listener requests are logged but never acknowledged.
    mute: AtomicBool,
    closed: AtomicBool,
}

#[derive(Clone)]
pub struct MockGrid {
    inner: Arc<MockInner>,
}

impl Default for MockGrid {
    fn default() -> Self {
        Self::new()
    }
}

/// Routes `tracing` output through the test harness so `RUST_LOG` makes the
/// client's stream and lifecycle logging visible. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

impl MockGrid {
    pub fn new() -> Self {
        init_tracing();
        Self {
            inner: Arc::new(MockInner {
                stores: Mutex::new(HashMap::new()),
                log: Mutex::new(Vec::new()),
                streams: Mutex::new(Vec::new()),
                assigned_filter_ids: Mutex::new(Vec::new()),
                next_filter_id: AtomicU64::new(7),
                mute: AtomicBool::new(false),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn listener_log(&self) -> Vec<ListenerRequest> {
        self.inner.log.lock().unwrap().clone()
    }

    pub fn clear_listener_log(&self) {
        self.inner.log.lock().unwrap().clear();
    }

    pub fn assigned_filter_ids(&self) -> Vec<u64> {
        self.inner.assigned_filter_ids.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Stops acknowledging listener requests (they are still logged).
    pub fn set_mute(&self, mute: bool) {
        self.inner.mute.store(mute, Ordering::SeqCst);
    }

    pub fn open_stream_count(&self) -> usize {
        self.inner
            .streams
            .lock()
            .unwrap()
            .iter()
            .filter(|s| !s.is_closed())
            .count()
    }

    /// Pushes a server-side message into every open event stream.
    pub async fn emit(&self, response: ListenerResponse) {
        let senders: Vec<_> = self.inner.streams.lock().unwrap().clone();
        for sender in senders {
            let _ = sender.send(Ok(response.clone())).await;
        }
    }

    /// Fails every open event stream with the given error.
    pub async fn fail_streams(&self, error: Error) {
        let senders: Vec<_> = self.inner.streams.lock().unwrap().drain(..).collect();
        for sender in senders {
            let _ = sender.send(Err(error.clone())).await;
        }
    }

    fn with_store<T>(&self, cache: &str, f: impl FnOnce(&mut Store) -> T) -> T {
        let mut stores = self.inner.stores.lock().unwrap();
        f(stores.entry(cache.to_owned()).or_default())
    }
}

/// A session over a fresh mock with the default configuration.
pub fn session(mock: &MockGrid) -> keygrid::Session {
    keygrid::Session::new(keygrid::SessionConfig::default(), Arc::new(mock.clone())).unwrap()
}

/// Polls a condition until it holds or a generous deadline elapses.
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition never held: {}", what);
}

pub fn json_bytes(value: &impl serde::Serialize) -> Bytes {
    Bytes::from(serde_json::to_vec(value).unwrap())
}

/// A wire-level event as tests inject it.
pub fn event(
    kind: MapEventKind,
    key: &str,
    old_value: Option<&str>,
    new_value: Option<&str>,
    filter_ids: Vec<u64>,
) -> ListenerResponse {
    ListenerResponse::Event {
        event: EventMessage {
            kind,
            key: json_bytes(&key),
            old_value: old_value.map(|v| json_bytes(&v)),
            new_value: new_value.map(|v| json_bytes(&v)),
            filter_ids,
        },
    }
}

#[async_trait]
impl GridService for MockGrid {
    async fn get(&self, request: KeyRequest) -> Result<OptionalValue> {
        Ok(self.with_store(&request.cache, |store| {
            store
                .get(request.key.as_ref())
                .map(|v| OptionalValue::of(Bytes::from(v.clone())))
                .unwrap_or_else(OptionalValue::missing)
        }))
    }

    async fn get_all(
        &self,
        request: GetAllRequest,
    ) -> Result<BoxStream<'static, Result<BinaryEntry>>> {
        let entries = self.with_store(&request.cache, |store| {
            request
                .keys
                .iter()
                .filter_map(|k| {
                    store.get(k.as_ref()).map(|v| BinaryEntry {
                        key: k.clone(),
                        value: Bytes::from(v.clone()),
                    })
                })
                .collect::<Vec<_>>()
        });
        Ok(stream::iter(entries.into_iter().map(Ok)).boxed())
    }

    async fn put(&self, request: EntryRequest) -> Result<OptionalValue> {
        Ok(self.with_store(&request.cache, |store| {
            store
                .insert(request.key.to_vec(), request.value.to_vec())
                .map(|v| OptionalValue::of(Bytes::from(v)))
                .unwrap_or_else(OptionalValue::missing)
        }))
    }

    async fn put_if_absent(&self, request: EntryRequest) -> Result<OptionalValue> {
        Ok(self.with_store(&request.cache, |store| {
            match store.get(request.key.as_ref()) {
                Some(v) => OptionalValue::of(Bytes::from(v.clone())),
                None => {
                    store.insert(request.key.to_vec(), request.value.to_vec());
                    OptionalValue::missing()
                }
            }
        }))
    }

    async fn put_all(&self, request: PutAllRequest) -> Result<()> {
        self.with_store(&request.cache, |store| {
            for entry in request.entries {
                store.insert(entry.key.to_vec(), entry.value.to_vec());
            }
        });
        Ok(())
    }

    async fn remove(&self, request: KeyRequest) -> Result<OptionalValue> {
        Ok(self.with_store(&request.cache, |store| {
            store
                .remove(request.key.as_ref())
                .map(|v| OptionalValue::of(Bytes::from(v)))
                .unwrap_or_else(OptionalValue::missing)
        }))
    }

    async fn remove_mapping(&self, request: EntryRequest) -> Result<bool> {
        Ok(self.with_store(&request.cache, |store| {
            if store.get(request.key.as_ref()) == Some(&request.value.to_vec()) {
                store.remove(request.key.as_ref());
                true
            } else {
                false
            }
        }))
    }

    async fn replace(&self, request: EntryRequest) -> Result<OptionalValue> {
        Ok(self.with_store(&request.cache, |store| {
            if store.contains_key(request.key.as_ref()) {
                store
                    .insert(request.key.to_vec(), request.value.to_vec())
                    .map(|v| OptionalValue::of(Bytes::from(v)))
                    .unwrap_or_else(OptionalValue::missing)
            } else {
                OptionalValue::missing()
            }
        }))
    }

    async fn replace_mapping(&self, request: ReplaceMappingRequest) -> Result<bool> {
        Ok(self.with_store(&request.cache, |store| {
            if store.get(request.key.as_ref()) == Some(&request.expected.to_vec()) {
                store.insert(request.key.to_vec(), request.replacement.to_vec());
                true
            } else {
                false
            }
        }))
    }

    async fn contains_key(&self, request: KeyRequest) -> Result<bool> {
        Ok(self.with_store(&request.cache, |store| store.contains_key(request.key.as_ref())))
    }

    async fn contains_value(&self, request: ValueRequest) -> Result<bool> {
        Ok(self.with_store(&request.cache, |store| {
            store.values().any(|v| v == &request.value.to_vec())
        }))
    }

    async fn contains_entry(&self, request: EntryRequest) -> Result<bool> {
        Ok(self.with_store(&request.cache, |store| {
            store.get(request.key.as_ref()) == Some(&request.value.to_vec())
        }))
    }

    async fn size(&self, request: CacheRequest) -> Result<u64> {
        Ok(self.with_store(&request.cache, |store| store.len() as u64))
    }

    async fn is_empty(&self, request: CacheRequest) -> Result<bool> {
        Ok(self.with_store(&request.cache, |store| store.is_empty()))
    }

    async fn clear(&self, request: CacheRequest) -> Result<()> {
        self.with_store(&request.cache, |store| store.clear());
        Ok(())
    }

    async fn truncate(&self, request: CacheRequest) -> Result<()> {
        self.with_store(&request.cache, |store| store.clear());
        self.emit(ListenerResponse::Truncated).await;
        Ok(())
    }

    async fn destroy(&self, request: CacheRequest) -> Result<()> {
        self.inner.stores.lock().unwrap().remove(&request.cache);
        self.emit(ListenerResponse::Destroyed).await;
        Ok(())
    }

    async fn key_set(&self, request: QueryRequest) -> Result<BoxStream<'static, Result<Bytes>>> {
        let keys = self.with_store(&request.cache, |store| {
            store.keys().map(|k| Bytes::from(k.clone())).collect::<Vec<_>>()
        });
        Ok(stream::iter(keys.into_iter().map(Ok)).boxed())
    }

    async fn entry_set(
        &self,
        request: QueryRequest,
    ) -> Result<BoxStream<'static, Result<BinaryEntry>>> {
        let entries = self.with_store(&request.cache, |store| {
            store
                .iter()
                .map(|(k, v)| BinaryEntry {
                    key: Bytes::from(k.clone()),
                    value: Bytes::from(v.clone()),
                })
                .collect::<Vec<_>>()
        });
        Ok(stream::iter(entries.into_iter().map(Ok)).boxed())
    }

    async fn values(&self, request: QueryRequest) -> Result<BoxStream<'static, Result<Bytes>>> {
        let values = self.with_store(&request.cache, |store| {
            store.values().map(|v| Bytes::from(v.clone())).collect::<Vec<_>>()
        });
        Ok(stream::iter(values.into_iter().map(Ok)).boxed())
    }

    async fn invoke(&self, _request: InvokeRequest) -> Result<OptionalValue> {
        Ok(OptionalValue::missing())
    }

    async fn invoke_all(
        &self,
        _request: InvokeAllRequest,
    ) -> Result<BoxStream<'static, Result<BinaryEntry>>> {
        Ok(stream::empty().boxed())
    }

    async fn add_index(&self, _request: IndexRequest) -> Result<()> {
        Ok(())
    }

    async fn remove_index(&self, _request: IndexRequest) -> Result<()> {
        Ok(())
    }

    async fn events(&self, _request: CacheRequest) -> Result<EventChannel> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(Error::Transport("channel is closed".to_owned()));
        }
        let (req_tx, mut req_rx) = mpsc::channel::<ListenerRequest>(16);
        let (resp_tx, mut resp_rx) = mpsc::channel::<Result<ListenerResponse>>(16);
        self.inner.streams.lock().unwrap().push(resp_tx.clone());

        let inner = self.inner.clone();
        tokio::spawn(async move {
            while let Some(request) = req_rx.recv().await {
                inner.log.lock().unwrap().push(request.clone());
                if inner.mute.load(Ordering::SeqCst) {
                    continue;
                }
                let response = match request {
                    ListenerRequest::Init { id } => ListenerResponse::Subscribed {
                        id,
                        filter_id: None,
                    },
                    ListenerRequest::SubscribeKey { id, .. } => ListenerResponse::Subscribed {
                        id,
                        filter_id: None,
                    },
                    ListenerRequest::UnsubscribeKey { id, .. } => {
                        ListenerResponse::Unsubscribed { id }
                    }
                    ListenerRequest::SubscribeFilter { id, .. } => {
                        let fid = inner.next_filter_id.fetch_add(1, Ordering::SeqCst);
                        inner.assigned_filter_ids.lock().unwrap().push(fid);
                        ListenerResponse::Subscribed {
                            id,
                            filter_id: Some(fid),
                        }
                    }
                    ListenerRequest::UnsubscribeFilter { id, .. } => {
                        ListenerResponse::Unsubscribed { id }
                    }
                };
                if resp_tx.send(Ok(response)).await.is_err() {
                    break;
                }
            }
            // client cancelled: forget this stream so the response channel
            // actually closes
            inner
                .streams
                .lock()
                .unwrap()
                .retain(|s| !s.same_channel(&resp_tx));
        });

        let responses = Box::pin(futures::stream::poll_fn(move |cx| resp_rx.poll_recv(cx)));
        Ok(EventChannel {
            requests: req_tx,
            responses,
        })
    }

    async fn close(&self) -> Result<()> {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.streams.lock().unwrap().clear();
        Ok(())
    }
}

/// Records every delivered event, tagged with the hook that fired.
pub struct RecordingListener {
    events: Mutex<Vec<(MapEventKind, String, Option<String>, Option<String>)>>,
}

impl RecordingListener {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    pub fn events(&self) -> Vec<(MapEventKind, String, Option<String>, Option<String>)> {
        self.events.lock().unwrap().clone()
    }

    pub fn keys(&self) -> Vec<String> {
        self.events().into_iter().map(|(_, k, _, _)| k).collect()
    }

    pub fn count(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    fn record(&self, event: &MapEvent<String, String>) {
        self.events.lock().unwrap().push((
            event.kind,
            event.key.clone(),
            event.old_value.clone(),
            event.new_value.clone(),
        ));
    }
}

impl MapListener<String, String> for RecordingListener {
    fn entry_inserted(&self, event: &MapEvent<String, String>) {
        self.record(event)
    }

    fn entry_updated(&self, event: &MapEvent<String, String>) {
        self.record(event)
    }

    fn entry_deleted(&self, event: &MapEvent<String, String>) {
        self.record(event)
    }
}
