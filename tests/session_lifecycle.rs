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
mod common;

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use common::{session, wait_until, MockGrid, RecordingListener};
use keygrid::{
    CborCodec, Error, MapLifecycleEvent, MapListener, Session, SessionConfig, SessionEvent,
    TlsOptions,
};

#[tokio::test]
async fn close_is_idempotent_and_emits_once() {
    let mock = MockGrid::new();
    let session = session(&mock);
    let closed = Arc::new(AtomicUsize::new(0));
    let counter = closed.clone();
    session.on_lifecycle(move |e| {
        assert_eq!(e, SessionEvent::Closed);
        counter.fetch_add(1, Ordering::SeqCst);
    });

    session.close().await.unwrap();
    session.close().await.unwrap();

    assert!(session.is_closed());
    assert_eq!(closed.load(Ordering::SeqCst), 1);
    assert!(mock.is_closed());
}

#[tokio::test]
async fn close_releases_live_maps_before_the_channel() {
    let mock = MockGrid::new();
    let session = session(&mock);
    let map = session.cache::<String, String>("orders").unwrap();
    let released = Arc::new(AtomicUsize::new(0));
    let counter = released.clone();
    map.on_lifecycle(move |e| {
        if e == MapLifecycleEvent::Released {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    session.close().await.unwrap();

    assert!(map.is_released());
    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert_eq!(
        map.get(&"a".to_owned()).await.unwrap_err(),
        Error::SessionClosed
    );
}

#[tokio::test]
async fn operations_after_close_fail_immediately() {
    let mock = MockGrid::new();
    let session = session(&mock);
    session.close().await.unwrap();
    assert_eq!(
        session.cache::<String, String>("orders").unwrap_err(),
        Error::SessionClosed
    );
}

#[tokio::test]
async fn same_name_and_format_share_one_instance() {
    let mock = MockGrid::new();
    let session = session(&mock);

    let a = session.cache::<String, String>("orders").unwrap();
    let b = session.cache::<String, String>("orders").unwrap();
    assert_eq!(a, b); // identity-equal

    // a different format is a distinct map instance
    let c = session
        .cache_with::<String, String, CborCodec>("orders", CborCodec)
        .unwrap();
    assert_eq!(c.format(), "cbor");
    assert_eq!(a.format(), "json");

    // same (name, format) with different entry types is rejected
    assert!(matches!(
        session.cache::<String, u64>("orders"),
        Err(Error::BadValue(_))
    ));
}

#[tokio::test]
async fn released_map_is_deregistered_and_inactive() {
    let mock = MockGrid::new();
    let session = session(&mock);
    let map = session.cache::<String, String>("orders").unwrap();
    let released = Arc::new(AtomicUsize::new(0));
    let counter = released.clone();
    map.on_lifecycle(move |e| {
        if e == MapLifecycleEvent::Released {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    map.release().await.unwrap();
    map.release().await.unwrap();
    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert!(matches!(
        map.get(&"a".to_owned()).await.unwrap_err(),
        Error::CacheNotActive(_)
    ));

    // the registry slot is free again: a new lookup yields a fresh handle
    let fresh = session.cache::<String, String>("orders").unwrap();
    assert_ne!(fresh, map);
    fresh.put(&"a".to_owned(), &"1".to_owned()).await.unwrap();
}

#[tokio::test]
async fn destroy_marks_the_map_and_emits() {
    let mock = MockGrid::new();
    let session = session(&mock);
    let map = session.cache::<String, String>("orders").unwrap();
    map.put(&"a".to_owned(), &"1".to_owned()).await.unwrap();
    let destroyed = Arc::new(AtomicUsize::new(0));
    let counter = destroyed.clone();
    map.on_lifecycle(move |e| {
        if e == MapLifecycleEvent::Destroyed {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    map.destroy().await.unwrap();
    assert!(map.is_destroyed());
    assert_eq!(destroyed.load(Ordering::SeqCst), 1);
    assert!(matches!(
        map.size().await.unwrap_err(),
        Error::CacheNotActive(_)
    ));
}

#[tokio::test]
async fn server_side_destroy_arrives_via_the_stream() {
    let mock = MockGrid::new();
    let session = session(&mock);
    let map = session.cache::<String, String>("orders").unwrap();
    let listener: Arc<dyn MapListener<String, String>> = RecordingListener::new();
    map.add_key_listener(&"a".to_owned(), &listener, false).await.unwrap();

    mock.emit(keygrid::service::events::ListenerResponse::Destroyed).await;
    wait_until("map destroyed", || map.is_destroyed()).await;
    assert!(matches!(
        map.get(&"a".to_owned()).await.unwrap_err(),
        Error::CacheNotActive(_)
    ));
}

#[tokio::test]
async fn truncate_emits_exactly_one_event() {
    let mock = MockGrid::new();
    let session = session(&mock);
    let map = session.cache::<String, String>("orders").unwrap();
    let truncated = Arc::new(AtomicUsize::new(0));
    let counter = truncated.clone();
    map.on_lifecycle(move |e| {
        if e == MapLifecycleEvent::Truncated {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    // no stream open: emitted locally
    map.put(&"a".to_owned(), &"1".to_owned()).await.unwrap();
    map.truncate().await.unwrap();
    assert_eq!(map.size().await.unwrap(), 0);
    assert_eq!(truncated.load(Ordering::SeqCst), 1);

    // stream open: the server's notification carries the event instead
    let listener: Arc<dyn MapListener<String, String>> = RecordingListener::new();
    map.add_key_listener(&"a".to_owned(), &listener, false).await.unwrap();
    map.truncate().await.unwrap();
    wait_until("stream event delivered", || {
        truncated.load(Ordering::SeqCst) == 2
    })
    .await;
    tokio::time::sleep(std::time::Duration::from_millis(30)).await;
    assert_eq!(truncated.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn tls_without_cert_paths_is_rejected() {
    let tls = TlsOptions {
        enabled: true,
        ca_cert_path: None,
        client_cert_path: None,
        client_key_path: None,
    };
    let err = SessionConfig::builder().tls(tls).build().unwrap_err();
    assert!(matches!(err, Error::BadConfig(_)));
}

#[tokio::test]
async fn default_format_mismatch_requires_explicit_codec() {
    let mock = MockGrid::new();
    let config = SessionConfig::builder().format("cbor").build().unwrap();
    let session = Session::new(config, Arc::new(mock.clone())).unwrap();

    assert!(matches!(
        session.cache::<String, String>("orders"),
        Err(Error::BadConfig(_))
    ));
    let map = session
        .cache_with::<String, String, CborCodec>("orders", CborCodec)
        .unwrap();
    map.put(&"a".to_owned(), &"1".to_owned()).await.unwrap();
    assert_eq!(map.get(&"a".to_owned()).await.unwrap(), Some("1".to_owned()));
}
