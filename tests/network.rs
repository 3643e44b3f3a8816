//! Network tracking: promise-style settling, request objects, blacklist.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::CountingWait;
use quiesce::{BlacklistRule, Config, FetchRequest, Host, Method, ReadyState, install};

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

#[tokio::test(start_paused = true)]
async fn fetch_opens_before_dispatch_and_closes_on_fulfil() {
    let host = Host::new();
    let wait = CountingWait::new();
    let session = install(&host, Arc::new(wait.clone()), Config::default()).expect("install");

    let future = host.fetch(FetchRequest::get("http://api.example/items"));
    assert_eq!(wait.pending(), 1, "handle opens at call time");

    let response = future.await.expect("route responds");
    assert_eq!(response.status, 200);

    wait.ready().await;
    wait.assert_balanced();
    session.restore();
}

#[tokio::test(start_paused = true)]
async fn fetch_closes_on_rejection() {
    let host = Host::builder().fail_route("http://down.example/").build();
    let wait = CountingWait::new();
    let session = install(&host, Arc::new(wait.clone()), Config::default()).expect("install");

    let result = host.fetch(FetchRequest::get("http://down.example/")).await;
    assert!(result.is_err());

    wait.ready().await;
    wait.assert_balanced();
    session.restore();
}

#[tokio::test(start_paused = true)]
async fn fetch_closes_when_future_is_dropped() {
    let host = Host::new();
    let wait = CountingWait::new();
    let session = install(&host, Arc::new(wait.clone()), Config::default()).expect("install");

    let future = host.fetch(FetchRequest::get("http://api.example/items"));
    assert_eq!(wait.pending(), 1);

    drop(future);
    wait.ready().await;
    wait.assert_balanced();
    session.restore();
}

#[tokio::test(start_paused = true)]
async fn blacklisted_fetch_opens_no_handle() {
    let host = Host::new();
    let wait = CountingWait::new();
    let config = Config {
        blacklist: vec![BlacklistRule::new("^http://tracker\\.")],
        ..Config::default()
    };
    let session = install(&host, Arc::new(wait.clone()), config).expect("install");

    let response = host
        .fetch(FetchRequest::get("http://tracker.example/ping"))
        .await
        .expect("bypassed call still resolves");
    assert_eq!(response.status, 200);
    assert_eq!(wait.opens(), 0);

    // A non-matching target is tracked as usual.
    let _ = host.fetch(FetchRequest::get("http://api.example/items")).await;
    assert_eq!(wait.opens(), 1);
    wait.ready().await;
    wait.assert_balanced();
    session.restore();
}

#[tokio::test(start_paused = true)]
async fn blacklist_method_discriminates() {
    let host = Host::new();
    let wait = CountingWait::new();
    let config = Config {
        blacklist: vec![BlacklistRule::new("/heartbeat$").with_method(Method::Post)],
        ..Config::default()
    };
    let session = install(&host, Arc::new(wait.clone()), config).expect("install");

    let _ = host
        .fetch(FetchRequest::new(Method::Post, "http://api.example/heartbeat"))
        .await;
    assert_eq!(wait.opens(), 0, "matching method is excluded");

    let _ = host
        .fetch(FetchRequest::new(Method::Get, "http://api.example/heartbeat"))
        .await;
    assert_eq!(wait.opens(), 1, "same pattern, different method is tracked");
    wait.ready().await;
    wait.assert_balanced();
    session.restore();
}

#[tokio::test(start_paused = true)]
async fn request_object_tracks_from_initiating_to_done() {
    let host = Host::new();
    let wait = CountingWait::new();
    let session = install(&host, Arc::new(wait.clone()), Config::default()).expect("install");

    let request = host.new_request();
    request.open(Method::Get, "http://api.example/items");
    assert_eq!(wait.opens(), 0, "configuration alone opens nothing");

    request.send();
    assert_eq!(request.state(), ReadyState::Loading);
    assert_eq!(wait.pending(), 1, "handle opens on the initiating transition");

    tokio::time::sleep(ms(20)).await;
    assert_eq!(request.state(), ReadyState::Done);
    wait.ready().await;
    wait.assert_balanced();
    session.restore();
}

#[tokio::test(start_paused = true)]
async fn abort_releases_then_delegates() {
    let host = Host::new();
    let wait = CountingWait::new();
    let session = install(&host, Arc::new(wait.clone()), Config::default()).expect("install");

    let request = host.new_request();
    request.open(Method::Get, "http://api.example/slow");
    request.send();
    assert_eq!(wait.pending(), 1);

    request.abort();
    assert_eq!(request.state(), ReadyState::Done, "real abort still ran");
    assert!(request.is_aborted());
    wait.ready().await;
    wait.assert_balanced();
    session.restore();
}

#[tokio::test(start_paused = true)]
async fn abort_without_live_handle_is_a_noop() {
    let host = Host::new();
    let wait = CountingWait::new();
    let session = install(&host, Arc::new(wait.clone()), Config::default()).expect("install");

    let request = host.new_request();
    request.open(Method::Get, "http://api.example/items");
    request.abort();

    assert_eq!(wait.opens(), 0);
    assert_eq!(wait.closes(), 0);
    assert_eq!(request.state(), ReadyState::Done, "delegation still happened");
    session.restore();
}

#[tokio::test(start_paused = true)]
async fn request_instance_opens_at_most_one_handle() {
    let host = Host::new();
    let wait = CountingWait::new();
    let session = install(&host, Arc::new(wait.clone()), Config::default()).expect("install");

    let request = host.new_request();
    request.open(Method::Get, "http://api.example/items");
    request.send();
    tokio::time::sleep(ms(20)).await;
    wait.ready().await;
    assert_eq!(wait.opens(), 1);

    // Reusing the instance does not accrue a second handle.
    request.open(Method::Get, "http://api.example/items");
    request.send();
    tokio::time::sleep(ms(20)).await;
    wait.ready().await;
    assert_eq!(wait.opens(), 1, "one handle per instance lifetime");
    wait.assert_balanced();
    session.restore();
}

#[tokio::test(start_paused = true)]
async fn blacklisted_request_object_is_skipped() {
    let host = Host::new();
    let wait = CountingWait::new();
    let config = Config {
        blacklist: vec![BlacklistRule::new("^http://tracker\\.")],
        ..Config::default()
    };
    let session = install(&host, Arc::new(wait.clone()), config).expect("install");

    let request = host.new_request();
    request.open(Method::Get, "http://tracker.example/ping");
    request.send();
    tokio::time::sleep(ms(20)).await;

    assert_eq!(request.state(), ReadyState::Done);
    assert_eq!(wait.opens(), 0);
    session.restore();
}

#[tokio::test(start_paused = true)]
async fn host_without_fetch_installs_and_skips() {
    let host = Host::builder().without_fetch().build();
    let wait = CountingWait::new();
    let session = install(&host, Arc::new(wait.clone()), Config::default()).expect("install");

    let err = host
        .fetch(FetchRequest::get("http://api.example/items"))
        .await
        .err()
        .expect("capability is absent");
    assert_eq!(err.as_label(), "unsupported");
    assert_eq!(wait.opens(), 0);
    session.restore();
}
