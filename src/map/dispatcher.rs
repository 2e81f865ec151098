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
//! The event dispatcher: one duplex stream per named map, at most one server
//! subscription per distinct target.
//!
//! Listener targets are canonicalized through the codec, so two keys (or
//! filters) that encode identically share one listener group and one server
//! subscription. A group's server registration is lite only while *every*
//! listener in it is lite; the first non-lite listener promotes the
//! registration (unsubscribe, then resubscribe non-lite), and removing the
//! last non-lite listener demotes it again.
//!
//! Locking: a single `std::sync::Mutex` guards all indices, the pending-ack
//! map and the stream state, and is never held across an await or while a
//! listener callback runs. A `tokio::sync::Mutex` serializes add/remove
//! operations end to end (each spans a send plus an acknowledgement await);
//! the inbound reader task never takes it, so acknowledgements always flow.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, Weak},
    time::Duration,
};

use bytes::Bytes;
use futures::{
    future::{BoxFuture, FutureExt, Shared},
    stream::{BoxStream, StreamExt},
};
use serde::de::DeserializeOwned;
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tracing::{debug, error, warn};

use crate::{
    codec::Codec,
    map::listener::{MapEvent, MapListener},
    requests::RequestFactory,
    service::{
        events::{EventMessage, ListenerRequest, ListenerResponse, MapEventKind},
        EventChannel, GridService,
    },
    Error, Result,
};

/// Back-pointer into the owning named map. Held weakly: the dispatcher never
/// extends its owner's lifetime.
pub(crate) trait DispatchOwner: Send + Sync + 'static {
    fn destroyed_from_stream(&self);
    fn truncated_from_stream(&self);
}

/// What a listener registration is scoped to, already canonicalized through
/// the codec.
#[derive(Clone, Debug)]
pub(crate) enum SubscriptionTarget {
    Key(Bytes),
    Filter(Bytes),
}

impl SubscriptionTarget {
    fn into_parts(self) -> (TargetKind, Bytes) {
        match self {
            SubscriptionTarget::Key(b) => (TargetKind::Key, b),
            SubscriptionTarget::Filter(b) => (TargetKind::Filter, b),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum TargetKind {
    Key,
    Filter,
}

type ListenerHandle<K, V> = Arc<dyn MapListener<K, V>>;

struct Group<K, V> {
    /// Listeners with their lite flags, in insertion order.
    listeners: Vec<(ListenerHandle<K, V>, bool)>,
    /// The lite flag of the server-side registration backing this group.
    registered_lite: bool,
    /// Server-assigned id, filter groups only, recorded from the subscribe
    /// acknowledgement.
    filter_id: Option<u64>,
}

impl<K, V> Group<K, V> {
    fn new(listener: ListenerHandle<K, V>, lite: bool) -> Self {
        Self {
            listeners: vec![(listener, lite)],
            registered_lite: lite,
            filter_id: None,
        }
    }

    fn position(&self, listener: &ListenerHandle<K, V>) -> Option<usize> {
        self.listeners.iter().position(|(l, _)| Arc::ptr_eq(l, listener))
    }

    fn non_lite_count(&self) -> usize {
        self.listeners.iter().filter(|(_, lite)| !*lite).count()
    }
}

enum StreamState {
    /// No stream. Either never opened, gracefully closed, or failed (in
    /// which case listener groups are retained and the next registration
    /// rebuilds the stream).
    Idle,
    /// Bootstrap in flight; every concurrent operation awaits the shared
    /// future.
    Opening(Shared<BoxFuture<'static, Result<()>>>),
    /// Live stream; the sender writes into the transport's bounded buffer.
    Open(mpsc::Sender<ListenerRequest>),
}

enum AckAction {
    Plain,
    /// On a filter-subscribe acknowledgement, record the server-assigned
    /// filter id for this canonical filter.
    RecordFilter(Bytes),
    /// On a filter-unsubscribe acknowledgement, drop the id from the index.
    DropFilter(u64),
}

struct PendingAck {
    done: oneshot::Sender<Result<Option<u64>>>,
    action: AckAction,
}

struct State<K, V> {
    stream: StreamState,
    /// Bumped whenever a new stream generation starts (or shutdown orphans
    /// the current one); stale reader tasks compare it before touching state.
    epoch: u64,
    close_requested: bool,
    by_key: HashMap<Bytes, Group<K, V>>,
    by_filter: HashMap<Bytes, Group<K, V>>,
    by_filter_id: HashMap<u64, Bytes>,
    pending: HashMap<String, PendingAck>,
}

struct DispatcherShared<K, V, C: Codec> {
    service: Arc<dyn GridService>,
    factory: RequestFactory<C>,
    owner: Weak<dyn DispatchOwner>,
    timeout: Option<Duration>,
    /// Serializes add/remove operations; never taken by the reader task.
    ops: AsyncMutex<()>,
    state: Mutex<State<K, V>>,
}

pub(crate) struct Dispatcher<K, V, C: Codec> {
    inner: Arc<DispatcherShared<K, V, C>>,
}

impl<K, V, C: Codec> Clone for Dispatcher<K, V, C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K, V, C> Dispatcher<K, V, C>
where
    K: DeserializeOwned + Send + Sync + 'static,
    V: DeserializeOwned + Send + Sync + 'static,
    C: Codec,
{
    pub fn new(
        service: Arc<dyn GridService>,
        cache: &str,
        codec: C,
        owner: Weak<dyn DispatchOwner>,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherShared {
                service,
                factory: RequestFactory::new(cache, codec),
                owner,
                timeout,
                ops: AsyncMutex::new(()),
                state: Mutex::new(State {
                    stream: StreamState::Idle,
                    epoch: 0,
                    close_requested: false,
                    by_key: HashMap::new(),
                    by_filter: HashMap::new(),
                    by_filter_id: HashMap::new(),
                    pending: HashMap::new(),
                }),
            }),
        }
    }

    /// Registers a listener for the given target, opening the stream and
    /// issuing whatever subscription traffic the group transition requires.
    /// Completes once the server has acknowledged.
    pub async fn add_listener(
        &self,
        target: SubscriptionTarget,
        listener: ListenerHandle<K, V>,
        lite: bool,
    ) -> Result<()> {
        let _ops = self.inner.ops.lock().await;
        self.ensure_open().await?;
        let (kind, bytes) = target.into_parts();

        enum Rollback {
            RemoveListener,
            RestoreFlag(usize, bool),
        }
        let (action, rollback) = {
            let mut st = self.inner.state.lock().unwrap();
            let index = match kind {
                TargetKind::Key => &mut st.by_key,
                TargetKind::Filter => &mut st.by_filter,
            };
            match index.get_mut(&bytes) {
                None => {
                    index.insert(bytes.clone(), Group::new(listener.clone(), lite));
                    (AddAction::Subscribe, Rollback::RemoveListener)
                }
                Some(group) => match group.position(&listener) {
                    Some(i) if group.listeners[i].1 == lite => {
                        return Ok(()); // same (listener, lite) pair: no-op
                    }
                    Some(i) => {
                        let previous = group.listeners[i].1;
                        group.listeners[i].1 = lite;
                        let action = if !lite && group.registered_lite {
                            AddAction::Promote {
                                filter_id: group.filter_id,
                            }
                        } else if lite && !group.registered_lite && group.non_lite_count() == 0 {
                            AddAction::Demote {
                                filter_id: group.filter_id,
                            }
                        } else {
                            AddAction::Noop
                        };
                        (action, Rollback::RestoreFlag(i, previous))
                    }
                    None => {
                        group.listeners.push((listener.clone(), lite));
                        let action = if !lite && group.registered_lite {
                            AddAction::Promote {
                                filter_id: group.filter_id,
                            }
                        } else {
                            AddAction::Noop
                        };
                        (action, Rollback::RemoveListener)
                    }
                },
            }
        };

        let result = match action {
            AddAction::Noop => return Ok(()),
            AddAction::Subscribe => self.subscribe(kind, &bytes, lite).await,
            AddAction::Promote { filter_id } => self.resubscribe(kind, &bytes, filter_id, false).await,
            AddAction::Demote { filter_id } => self.resubscribe(kind, &bytes, filter_id, true).await,
        };

        if let Err(e) = result {
            let mut st = self.inner.state.lock().unwrap();
            let State {
                by_key,
                by_filter,
                by_filter_id,
                ..
            } = &mut *st;
            let index = match kind {
                TargetKind::Key => by_key,
                TargetKind::Filter => by_filter,
            };
            if let Some(group) = index.get_mut(&bytes) {
                match rollback {
                    Rollback::RemoveListener => {
                        if let Some(i) = group.position(&listener) {
                            group.listeners.remove(i);
                        }
                        if group.listeners.is_empty() {
                            if let Some(fid) = group.filter_id {
                                by_filter_id.remove(&fid);
                            }
                            index.remove(&bytes);
                        }
                    }
                    Rollback::RestoreFlag(i, previous) => {
                        if i < group.listeners.len() {
                            group.listeners[i].1 = previous;
                        }
                    }
                }
            }
            return Err(e);
        }
        Ok(())
    }

    /// Removes a previously registered listener. Unknown targets or handles
    /// are a no-op. When the last listener of the last group goes, the
    /// stream is cancelled after the final unsubscribe acknowledgement.
    pub async fn remove_listener(
        &self,
        target: SubscriptionTarget,
        listener: &ListenerHandle<K, V>,
    ) -> Result<()> {
        let _ops = self.inner.ops.lock().await;
        let (kind, bytes) = target.into_parts();

        let (action, live) = {
            let mut st = self.inner.state.lock().unwrap();
            let live = matches!(st.stream, StreamState::Open(_));
            let step = {
                let index = match kind {
                    TargetKind::Key => &mut st.by_key,
                    TargetKind::Filter => &mut st.by_filter,
                };
                let group = match index.get_mut(&bytes) {
                    Some(g) => g,
                    None => return Ok(()),
                };
                let i = match group.position(listener) {
                    Some(i) => i,
                    None => return Ok(()),
                };
                let (_, was_lite) = group.listeners.remove(i);
                if group.listeners.is_empty() {
                    let filter_id = group.filter_id;
                    index.remove(&bytes);
                    RemoveAction::Unsubscribe {
                        filter_id,
                        last_group: false,
                    }
                } else if !was_lite && !group.registered_lite && group.non_lite_count() == 0 {
                    RemoveAction::Demote {
                        filter_id: group.filter_id,
                    }
                } else {
                    RemoveAction::Noop
                }
            };
            match step {
                RemoveAction::Unsubscribe { filter_id, .. } => {
                    if !live {
                        if let Some(fid) = filter_id {
                            st.by_filter_id.remove(&fid);
                        }
                    }
                    let last_group = st.by_key.is_empty() && st.by_filter.is_empty();
                    (
                        RemoveAction::Unsubscribe {
                            filter_id,
                            last_group,
                        },
                        live,
                    )
                }
                RemoveAction::Demote { filter_id } if !live => {
                    // no stream to talk to; record the downgrade so a later
                    // rebuild subscribes lite
                    let index = match kind {
                        TargetKind::Key => &mut st.by_key,
                        TargetKind::Filter => &mut st.by_filter,
                    };
                    if let Some(group) = index.get_mut(&bytes) {
                        group.registered_lite = true;
                    }
                    (RemoveAction::Demote { filter_id }, live)
                }
                other => (other, live),
            }
        };

        if !live {
            return Ok(());
        }
        match action {
            RemoveAction::Noop => Ok(()),
            RemoveAction::Demote { filter_id } => self.resubscribe(kind, &bytes, filter_id, true).await,
            RemoveAction::Unsubscribe {
                filter_id,
                last_group,
            } => {
                if let Some((req, ack)) = self.unsubscribe_request(kind, &bytes, filter_id) {
                    self.request_ack(req, ack).await?;
                }
                if last_group {
                    self.cancel_stream();
                }
                Ok(())
            }
        }
    }

    /// Whether the duplex stream is currently established.
    pub fn is_stream_open(&self) -> bool {
        matches!(self.inner.state.lock().unwrap().stream, StreamState::Open(_))
    }

    /// Severs the stream and drops all listener state. Used on release and
    /// destroy; the stream end is reported as graceful.
    pub fn shutdown(&self) {
        let (tx, pending) = {
            let mut st = self.inner.state.lock().unwrap();
            st.close_requested = true;
            st.epoch += 1;
            let tx = match std::mem::replace(&mut st.stream, StreamState::Idle) {
                StreamState::Open(tx) => Some(tx),
                _ => None,
            };
            st.by_key.clear();
            st.by_filter.clear();
            st.by_filter_id.clear();
            let pending: Vec<PendingAck> = st.pending.drain().map(|(_, p)| p).collect();
            (tx, pending)
        };
        drop(tx);
        for p in pending {
            let _ = p.done.send(Err(Error::StreamClosed));
        }
    }

    // -- stream lifecycle ---------------------------------------------------

    async fn ensure_open(&self) -> Result<()> {
        loop {
            let fut = {
                let mut st = self.inner.state.lock().unwrap();
                match &st.stream {
                    StreamState::Open(_) => return Ok(()),
                    StreamState::Opening(f) => f.clone(),
                    StreamState::Idle => {
                        st.epoch += 1;
                        st.close_requested = false;
                        let epoch = st.epoch;
                        let this = self.clone();
                        let fut = async move { this.bootstrap(epoch).await }.boxed().shared();
                        st.stream = StreamState::Opening(fut.clone());
                        fut
                    }
                }
            };
            fut.await?;
        }
    }

    async fn bootstrap(self, epoch: u64) -> Result<()> {
        let result = self.bootstrap_inner(epoch).await;
        if let Err(e) = &result {
            self.abort_bootstrap(epoch, e.clone());
        }
        result
    }

    async fn bootstrap_inner(&self, epoch: u64) -> Result<()> {
        let EventChannel {
            requests: tx,
            responses,
        } = self.inner.service.events(self.inner.factory.cache()).await?;

        let init = self.inner.factory.init();
        let init_id = init.id().to_owned();
        let ack = self.register_pending(&init_id, AckAction::Plain);
        tokio::spawn(self.clone().read_loop(responses, epoch));
        tx.send(init).await.map_err(|_| Error::StreamClosed)?;
        self.await_ack(&init_id, ack).await?;

        // A stream torn down by failure keeps its listener groups; opening a
        // new one replays their subscriptions so the listeners are live again.
        let replay: Vec<(TargetKind, Bytes, bool)> = {
            let st = self.inner.state.lock().unwrap();
            st.by_key
                .iter()
                .map(|(b, g)| (TargetKind::Key, b.clone(), g.registered_lite))
                .chain(
                    st.by_filter
                        .iter()
                        .map(|(b, g)| (TargetKind::Filter, b.clone(), g.registered_lite)),
                )
                .collect()
        };
        for (kind, bytes, lite) in replay {
            let (req, action) = self.subscribe_request(kind, &bytes, lite);
            let id = req.id().to_owned();
            let ack = self.register_pending(&id, action);
            tx.send(req).await.map_err(|_| Error::StreamClosed)?;
            self.await_ack(&id, ack).await?;
        }

        let mut st = self.inner.state.lock().unwrap();
        if st.epoch != epoch {
            return Err(Error::StreamClosed);
        }
        st.stream = StreamState::Open(tx);
        debug!(cache = %self.inner.factory.cache_name(), "event stream established");
        Ok(())
    }

    fn abort_bootstrap(&self, epoch: u64, err: Error) {
        let pending = {
            let mut st = self.inner.state.lock().unwrap();
            if st.epoch != epoch {
                return;
            }
            if matches!(st.stream, StreamState::Opening(_)) {
                st.stream = StreamState::Idle;
            }
            st.pending.drain().map(|(_, p)| p).collect::<Vec<_>>()
        };
        for p in pending {
            let _ = p.done.send(Err(err.clone()));
        }
    }

    /// Cancels the stream after the last group was removed. The decision and
    /// the take happen under one lock, and the ops mutex is held by the
    /// caller, so a concurrent registration cannot race the close.
    fn cancel_stream(&self) {
        let tx = {
            let mut st = self.inner.state.lock().unwrap();
            if !(st.by_key.is_empty() && st.by_filter.is_empty()) {
                return;
            }
            if !matches!(st.stream, StreamState::Open(_)) {
                return;
            }
            st.close_requested = true;
            match std::mem::replace(&mut st.stream, StreamState::Idle) {
                StreamState::Open(tx) => Some(tx),
                _ => None,
            }
        };
        drop(tx);
    }

    async fn read_loop(self, mut responses: BoxStream<'static, Result<ListenerResponse>>, epoch: u64) {
        let mut failure = None;
        while let Some(item) = responses.next().await {
            match item {
                Ok(ListenerResponse::Subscribed { id, filter_id }) => {
                    self.complete_ack(&id, Ok(filter_id))
                }
                Ok(ListenerResponse::Unsubscribed { id }) => self.complete_ack(&id, Ok(None)),
                Ok(ListenerResponse::Event { event }) => self.dispatch(event),
                Ok(ListenerResponse::Destroyed) => {
                    if let Some(owner) = self.inner.owner.upgrade() {
                        owner.destroyed_from_stream();
                    }
                }
                Ok(ListenerResponse::Truncated) => {
                    if let Some(owner) = self.inner.owner.upgrade() {
                        owner.truncated_from_stream();
                    }
                }
                Ok(ListenerResponse::Error { code, message }) => {
                    failure = Some(Error::Server { code, message });
                    break;
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        self.stream_ended(epoch, failure);
    }

    fn stream_ended(&self, epoch: u64, failure: Option<Error>) {
        let (requested, pending) = {
            let mut st = self.inner.state.lock().unwrap();
            if st.epoch != epoch {
                return; // a newer stream generation took over
            }
            st.stream = StreamState::Idle;
            let pending: Vec<PendingAck> = st.pending.drain().map(|(_, p)| p).collect();
            (st.close_requested, pending)
        };
        let err = match failure {
            None if requested => {
                debug!(cache = %self.inner.factory.cache_name(), "event stream closed");
                Error::StreamClosed
            }
            None => Error::Transport("event stream ended unexpectedly".to_owned()),
            Some(e) => e,
        };
        if !requested {
            // Listener groups stay registered; the next registration rebuilds
            // the stream and replays their subscriptions.
            error!(cache = %self.inner.factory.cache_name(), error = %err, "event stream failed");
        }
        for p in pending {
            let _ = p.done.send(Err(err.clone()));
        }
    }

    // -- subscription traffic ----------------------------------------------

    fn subscribe_request(&self, kind: TargetKind, bytes: &Bytes, lite: bool) -> (ListenerRequest, AckAction) {
        match kind {
            TargetKind::Key => (
                self.inner.factory.subscribe_key(bytes.clone(), lite),
                AckAction::Plain,
            ),
            TargetKind::Filter => (
                self.inner.factory.subscribe_filter(bytes.clone(), lite),
                AckAction::RecordFilter(bytes.clone()),
            ),
        }
    }

    fn unsubscribe_request(
        &self,
        kind: TargetKind,
        bytes: &Bytes,
        filter_id: Option<u64>,
    ) -> Option<(ListenerRequest, AckAction)> {
        match kind {
            TargetKind::Key => Some((
                self.inner.factory.unsubscribe_key(bytes.clone()),
                AckAction::Plain,
            )),
            TargetKind::Filter => filter_id.map(|fid| {
                (
                    self.inner.factory.unsubscribe_filter(fid),
                    AckAction::DropFilter(fid),
                )
            }),
        }
    }

    async fn subscribe(&self, kind: TargetKind, bytes: &Bytes, lite: bool) -> Result<()> {
        let (req, action) = self.subscribe_request(kind, bytes, lite);
        self.request_ack(req, action).await.map(|_| ())
    }

    /// Replaces the group's server registration with one carrying the other
    /// lite flag: unsubscribe, subscribe, then record the new flag.
    async fn resubscribe(
        &self,
        kind: TargetKind,
        bytes: &Bytes,
        filter_id: Option<u64>,
        new_lite: bool,
    ) -> Result<()> {
        if let Some((req, action)) = self.unsubscribe_request(kind, bytes, filter_id) {
            self.request_ack(req, action).await?;
        }
        self.subscribe(kind, bytes, new_lite).await?;
        let mut st = self.inner.state.lock().unwrap();
        let index = match kind {
            TargetKind::Key => &mut st.by_key,
            TargetKind::Filter => &mut st.by_filter,
        };
        if let Some(group) = index.get_mut(bytes) {
            group.registered_lite = new_lite;
        }
        Ok(())
    }

    fn register_pending(&self, id: &str, action: AckAction) -> oneshot::Receiver<Result<Option<u64>>> {
        let (done, rx) = oneshot::channel();
        self.inner
            .state
            .lock()
            .unwrap()
            .pending
            .insert(id.to_owned(), PendingAck { done, action });
        rx
    }

    /// Registers the pending callback, then transmits, in that order, so a
    /// fast response cannot race ahead of its registration.
    async fn request_ack(&self, req: ListenerRequest, action: AckAction) -> Result<Option<u64>> {
        let id = req.id().to_owned();
        let tx = {
            let st = self.inner.state.lock().unwrap();
            match &st.stream {
                StreamState::Open(tx) => tx.clone(),
                _ => return Err(Error::StreamClosed),
            }
        };
        let ack = self.register_pending(&id, action);
        if tx.send(req).await.is_err() {
            self.inner.state.lock().unwrap().pending.remove(&id);
            return Err(Error::StreamClosed);
        }
        self.await_ack(&id, ack).await
    }

    async fn await_ack(
        &self,
        id: &str,
        ack: oneshot::Receiver<Result<Option<u64>>>,
    ) -> Result<Option<u64>> {
        let wait = async move {
            match ack.await {
                Ok(result) => result,
                Err(_) => Err(Error::StreamClosed),
            }
        };
        match self.inner.timeout {
            Some(deadline) => match tokio::time::timeout(deadline, wait).await {
                Ok(result) => result,
                Err(_) => {
                    self.inner.state.lock().unwrap().pending.remove(id);
                    Err(Error::Timeout)
                }
            },
            None => wait.await,
        }
    }

    /// Completes a pending acknowledgement. Index bookkeeping for filter ids
    /// happens here, under the state lock and *before* the waiting operation
    /// resumes. An event following its subscribe acknowledgement on the
    /// stream can therefore never miss the group.
    fn complete_ack(&self, id: &str, result: Result<Option<u64>>) {
        let pending = {
            let mut st = self.inner.state.lock().unwrap();
            let pending = match st.pending.remove(id) {
                Some(p) => p,
                None => {
                    debug!(id, "acknowledgement without pending request");
                    return;
                }
            };
            match (&pending.action, &result) {
                (AckAction::RecordFilter(bytes), Ok(Some(fid))) => {
                    st.by_filter_id.insert(*fid, bytes.clone());
                    if let Some(group) = st.by_filter.get_mut(bytes) {
                        group.filter_id = Some(*fid);
                    }
                }
                (AckAction::DropFilter(fid), Ok(_)) => {
                    st.by_filter_id.remove(fid);
                }
                _ => {}
            }
            pending
        };
        let _ = pending.done.send(result);
    }

    // -- event fan-out ------------------------------------------------------

    /// Collects the target listeners under the lock, then decodes once and
    /// invokes every callback with the lock released.
    fn dispatch(&self, event: EventMessage) {
        let listeners: Vec<ListenerHandle<K, V>> = {
            let st = self.inner.state.lock().unwrap();
            let mut out = Vec::new();
            for fid in &event.filter_ids {
                if let Some(bytes) = st.by_filter_id.get(fid) {
                    if let Some(group) = st.by_filter.get(bytes) {
                        out.extend(group.listeners.iter().map(|(l, _)| l.clone()));
                    }
                }
            }
            if let Some(group) = st.by_key.get(&event.key) {
                out.extend(group.listeners.iter().map(|(l, _)| l.clone()));
            }
            out
        };
        if listeners.is_empty() {
            return;
        }
        let decoded: MapEvent<K, V> = match MapEvent::from_wire(self.inner.factory.codec(), &event) {
            Ok(e) => e,
            Err(err) => {
                warn!(cache = %self.inner.factory.cache_name(), error = %err, "dropping undecodable event");
                return;
            }
        };
        for listener in listeners {
            match decoded.kind {
                MapEventKind::Inserted => listener.entry_inserted(&decoded),
                MapEventKind::Updated => listener.entry_updated(&decoded),
                MapEventKind::Deleted => listener.entry_deleted(&decoded),
            }
        }
    }
}

enum AddAction {
    Noop,
    Subscribe,
    Promote { filter_id: Option<u64> },
    Demote { filter_id: Option<u64> },
}

enum RemoveAction {
    Noop,
    Unsubscribe {
        filter_id: Option<u64>,
        last_group: bool,
    },
    Demote {
        filter_id: Option<u64>,
    },
}
