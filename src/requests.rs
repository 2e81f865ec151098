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
//! Builds well-formed request descriptors for one named map.
//!
//! The factory owns the codec boundary: every key, value, filter or
//! processor is encoded here, so an unencodable argument fails before any
//! request exists. Correlation ids for event-stream requests come from a
//! per-factory counter, unique within the owning dispatcher's stream
//! lifetime, formatted as text for the wire.

use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use serde::Serialize;

use crate::{
    codec::Codec,
    filter::Filter,
    processor::{Comparator, Processor},
    service::{
        events::ListenerRequest, BinaryEntry, CacheRequest, EntryRequest, GetAllRequest,
        IndexRequest, InvokeAllRequest, InvokeRequest, InvokeTarget, KeyRequest, PutAllRequest,
        QueryRequest, ReplaceMappingRequest, ValueRequest,
    },
    extractor::Extractor,
    Result,
};

pub(crate) struct RequestFactory<C> {
    cache: String,
    codec: C,
    counter: AtomicU64,
}

impl<C: Codec> RequestFactory<C> {
    pub fn new(cache: impl Into<String>, codec: C) -> Self {
        Self {
            cache: cache.into(),
            codec,
            counter: AtomicU64::new(0),
        }
    }

    pub fn cache_name(&self) -> &str {
        &self.cache
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn encode<T: Serialize>(&self, value: &T) -> Result<Bytes> {
        self.codec.encode(value)
    }

    fn next_id(&self) -> String {
        self.counter.fetch_add(1, Ordering::Relaxed).to_string()
    }

    pub fn cache(&self) -> CacheRequest {
        CacheRequest {
            cache: self.cache.clone(),
            format: self.codec.format().to_owned(),
        }
    }

    pub fn key<K: Serialize>(&self, key: &K) -> Result<KeyRequest> {
        Ok(KeyRequest {
            cache: self.cache.clone(),
            format: self.codec.format().to_owned(),
            key: self.codec.encode(key)?,
        })
    }

    pub fn value<V: Serialize>(&self, value: &V) -> Result<ValueRequest> {
        Ok(ValueRequest {
            cache: self.cache.clone(),
            format: self.codec.format().to_owned(),
            value: self.codec.encode(value)?,
        })
    }

    pub fn entry<K: Serialize, V: Serialize>(
        &self,
        key: &K,
        value: &V,
        ttl_millis: i64,
    ) -> Result<EntryRequest> {
        Ok(EntryRequest {
            cache: self.cache.clone(),
            format: self.codec.format().to_owned(),
            key: self.codec.encode(key)?,
            value: self.codec.encode(value)?,
            ttl_millis,
        })
    }

    pub fn replace_mapping<K: Serialize, V: Serialize>(
        &self,
        key: &K,
        expected: &V,
        replacement: &V,
    ) -> Result<ReplaceMappingRequest> {
        Ok(ReplaceMappingRequest {
            cache: self.cache.clone(),
            format: self.codec.format().to_owned(),
            key: self.codec.encode(key)?,
            expected: self.codec.encode(expected)?,
            replacement: self.codec.encode(replacement)?,
        })
    }

    pub fn put_all<K: Serialize, V: Serialize>(
        &self,
        entries: impl IntoIterator<Item = (K, V)>,
        ttl_millis: i64,
    ) -> Result<PutAllRequest> {
        let entries = entries
            .into_iter()
            .map(|(k, v)| {
                Ok(BinaryEntry {
                    key: self.codec.encode(&k)?,
                    value: self.codec.encode(&v)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(PutAllRequest {
            cache: self.cache.clone(),
            format: self.codec.format().to_owned(),
            entries,
            ttl_millis,
        })
    }

    pub fn get_all<K: Serialize>(&self, keys: impl IntoIterator<Item = K>) -> Result<GetAllRequest> {
        Ok(GetAllRequest {
            cache: self.cache.clone(),
            format: self.codec.format().to_owned(),
            keys: keys
                .into_iter()
                .map(|k| self.codec.encode(&k))
                .collect::<Result<Vec<_>>>()?,
        })
    }

    pub fn query(&self, filter: Option<&Filter>) -> Result<QueryRequest> {
        Ok(QueryRequest {
            cache: self.cache.clone(),
            format: self.codec.format().to_owned(),
            filter: filter.map(|f| self.codec.encode(f)).transpose()?,
        })
    }

    pub fn index(
        &self,
        extractor: &Extractor,
        sorted: bool,
        comparator: Option<&Comparator>,
    ) -> Result<IndexRequest> {
        Ok(IndexRequest {
            cache: self.cache.clone(),
            format: self.codec.format().to_owned(),
            extractor: self.codec.encode(extractor)?,
            sorted,
            comparator: comparator.map(|c| self.codec.encode(c)).transpose()?,
        })
    }

    pub fn invoke<K: Serialize>(&self, key: &K, processor: &Processor) -> Result<InvokeRequest> {
        Ok(InvokeRequest {
            cache: self.cache.clone(),
            format: self.codec.format().to_owned(),
            key: self.codec.encode(key)?,
            processor: self.codec.encode(processor)?,
        })
    }

    pub fn invoke_all_keys<K: Serialize>(
        &self,
        keys: impl IntoIterator<Item = K>,
        processor: &Processor,
    ) -> Result<InvokeAllRequest> {
        Ok(InvokeAllRequest {
            cache: self.cache.clone(),
            format: self.codec.format().to_owned(),
            target: InvokeTarget::Keys {
                keys: keys
                    .into_iter()
                    .map(|k| self.codec.encode(&k))
                    .collect::<Result<Vec<_>>>()?,
            },
            processor: self.codec.encode(processor)?,
        })
    }

    pub fn invoke_all_filter(
        &self,
        filter: &Filter,
        processor: &Processor,
    ) -> Result<InvokeAllRequest> {
        Ok(InvokeAllRequest {
            cache: self.cache.clone(),
            format: self.codec.format().to_owned(),
            target: InvokeTarget::Filter {
                filter: self.codec.encode(filter)?,
            },
            processor: self.codec.encode(processor)?,
        })
    }

    // Event-stream requests operate on pre-encoded targets: the dispatcher
    // canonicalizes keys and filters before it ever touches the factory.

    pub fn init(&self) -> ListenerRequest {
        ListenerRequest::Init { id: self.next_id() }
    }

    pub fn subscribe_key(&self, key: Bytes, lite: bool) -> ListenerRequest {
        ListenerRequest::SubscribeKey {
            id: self.next_id(),
            key,
            lite,
        }
    }

    pub fn unsubscribe_key(&self, key: Bytes) -> ListenerRequest {
        ListenerRequest::UnsubscribeKey {
            id: self.next_id(),
            key,
        }
    }

    pub fn subscribe_filter(&self, filter: Bytes, lite: bool) -> ListenerRequest {
        ListenerRequest::SubscribeFilter {
            id: self.next_id(),
            filter,
            lite,
        }
    }

    pub fn unsubscribe_filter(&self, filter_id: u64) -> ListenerRequest {
        ListenerRequest::UnsubscribeFilter {
            id: self.next_id(),
            filter_id,
        }
    }
}
