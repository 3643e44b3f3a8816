//! Install/restore lifecycle: reference fidelity, double install/restore,
//! reduced hosts, and the end-to-end balance scenario.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::CountingWait;
use quiesce::{
    Config, FetchRequest, Host, InstrumentError, Iterations, Method, MotionKind, MotionStyle, Tag,
    TimerCallback, install,
};

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn noop() -> TimerCallback {
    Arc::new(|| Ok(()))
}

#[tokio::test(start_paused = true)]
async fn restore_returns_exact_entry_point_references() {
    let host = Host::new();

    let set_deferred = host.timers.set_deferred.get();
    let clear_deferred = host.timers.clear_deferred.get();
    let set_immediate = host.timers.set_immediate.as_ref().map(|s| s.get());
    let fetch = host.net.fetch.as_ref().map(|s| s.get());
    let request_open = host.net.request_open.get();
    let request_send = host.net.request_send.get();
    let request_abort = host.net.request_abort.get();
    let create = host.document.create.get();
    let animate = host.document.animate.get();

    let wait = CountingWait::new();
    let session = install(&host, Arc::new(wait.clone()), Config::default()).expect("install");

    assert!(!Arc::ptr_eq(&host.timers.set_deferred.get(), &set_deferred));
    assert!(!Arc::ptr_eq(&host.document.create.get(), &create));
    // The send step is not an instrumented entry point.
    assert!(Arc::ptr_eq(&host.net.request_send.get(), &request_send));

    session.restore();

    assert!(Arc::ptr_eq(&host.timers.set_deferred.get(), &set_deferred));
    assert!(Arc::ptr_eq(&host.timers.clear_deferred.get(), &clear_deferred));
    if let (Some(before), Some(slot)) = (&set_immediate, &host.timers.set_immediate) {
        assert!(Arc::ptr_eq(&slot.get(), before));
    }
    if let (Some(before), Some(slot)) = (&fetch, &host.net.fetch) {
        assert!(Arc::ptr_eq(&slot.get(), before));
    }
    assert!(Arc::ptr_eq(&host.net.request_open.get(), &request_open));
    assert!(Arc::ptr_eq(&host.net.request_abort.get(), &request_abort));
    assert!(Arc::ptr_eq(&host.document.create.get(), &create));
    assert!(Arc::ptr_eq(&host.document.animate.get(), &animate));
}

#[tokio::test(start_paused = true)]
async fn restored_entry_points_stop_tracking() {
    let host = Host::new();
    let wait = CountingWait::new();
    let session = install(&host, Arc::new(wait.clone()), Config::default()).expect("install");
    session.restore();

    let _id = host.set_timeout(noop(), ms(10));
    let _ = host.fetch(FetchRequest::get("http://api.example/items")).await;

    let request = host.new_request();
    request.open(Method::Get, "http://api.example/items");
    request.send();

    let script = host.document.create_element(Tag::Script);
    assert!(!script.is_intercepted());

    tokio::time::sleep(ms(30)).await;
    assert_eq!(wait.opens(), 0, "nothing opens after restore");
    assert_eq!(wait.closes(), 0);
}

#[tokio::test(start_paused = true)]
async fn double_restore_is_safe() {
    let host = Host::new();
    let wait = CountingWait::new();
    let session = install(&host, Arc::new(wait.clone()), Config::default()).expect("install");

    let before = host.timers.set_deferred.get();
    session.restore();
    session.restore();
    assert!(Arc::ptr_eq(&host.timers.set_deferred.get(), &before));
}

#[tokio::test(start_paused = true)]
async fn second_install_requires_restore_first() {
    let host = Host::new();
    let wait = CountingWait::new();

    let first = install(&host, Arc::new(wait.clone()), Config::default()).expect("install");
    let second = install(&host, Arc::new(wait.clone()), Config::default());
    assert!(matches!(second, Err(InstrumentError::AlreadyInstalled)));

    first.restore();
    let third = install(&host, Arc::new(wait.clone()), Config::default()).expect("reinstall");
    third.restore();
}

#[tokio::test(start_paused = true)]
async fn independent_hosts_do_not_interfere() {
    let host_a = Host::new();
    let host_b = Host::new();
    let wait_a = CountingWait::new();
    let wait_b = CountingWait::new();

    let session_a = install(&host_a, Arc::new(wait_a.clone()), Config::default()).expect("a");
    let session_b = install(&host_b, Arc::new(wait_b.clone()), Config::default()).expect("b");

    let _id = host_a.set_timeout(noop(), ms(10));
    assert_eq!(wait_a.pending(), 1);
    assert_eq!(wait_b.pending(), 0, "sessions are per host, not global");

    tokio::time::sleep(ms(11)).await;
    wait_a.ready().await;
    session_a.restore();
    session_b.restore();
}

#[tokio::test(start_paused = true)]
async fn reduced_host_installs_and_restores() {
    let host = Host::builder().without_fetch().without_immediate().build();
    let wait = CountingWait::new();

    let session = install(&host, Arc::new(wait.clone()), Config::default()).expect("install");
    assert!(host.set_immediate(noop()).is_none());
    assert!(!host.net.has_fetch());

    let _id = host.set_timeout(noop(), ms(10));
    assert_eq!(wait.pending(), 1);
    tokio::time::sleep(ms(11)).await;
    wait.ready().await;

    session.restore();
    wait.assert_balanced();
}

#[tokio::test(start_paused = true)]
async fn invalid_blacklist_pattern_fails_before_patching() {
    let host = Host::new();
    let wait = CountingWait::new();
    let before = host.timers.set_deferred.get();

    let config = Config {
        blacklist: vec![quiesce::BlacklistRule::new("([unclosed")],
        ..Config::default()
    };
    let err = install(&host, Arc::new(wait.clone()), config).err().expect("must fail");
    assert_eq!(err.as_label(), "invalid_pattern");
    assert!(
        Arc::ptr_eq(&host.timers.set_deferred.get(), &before),
        "failed install leaves the host untouched"
    );

    // The host was not claimed either.
    let session = install(&host, Arc::new(wait.clone()), Config::default()).expect("install");
    session.restore();
}

#[tokio::test(start_paused = true)]
async fn pending_work_still_settles_after_restore() {
    let host = Host::new();
    let wait = CountingWait::new();
    let session = install(&host, Arc::new(wait.clone()), Config::default()).expect("install");

    let runs = Arc::new(AtomicUsize::new(0));
    let callback: TimerCallback = {
        let runs = Arc::clone(&runs);
        Arc::new(move || {
            let _ = runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    };
    let _id = host.set_timeout(callback, ms(50));
    assert_eq!(wait.pending(), 1);

    session.restore();
    assert_eq!(wait.pending(), 1, "restore does not forge completion");

    tokio::time::sleep(ms(51)).await;
    wait.ready().await;
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    wait.assert_balanced();
}

#[tokio::test(start_paused = true)]
async fn end_to_end_balance_across_families() {
    let host = Host::new();
    let wait = CountingWait::new();
    let session = install(&host, Arc::new(wait.clone()), Config::default()).expect("install");
    let doc = &host.document;

    // Timers: one tracked, one chained link, one background.
    let chained: TimerCallback = {
        let host = Arc::clone(&host);
        Arc::new(move || {
            let _ = host.set_timeout(Arc::new(|| Ok(())), ms(20));
            Ok(())
        })
    };
    let _ = host.set_timeout(chained, ms(20));
    let _ = host.set_timeout(noop(), ms(8000));

    // Network: one promise-style, one request object.
    let fetch = host.fetch(FetchRequest::get("http://api.example/items"));
    let request = host.new_request();
    request.open(Method::Post, "http://api.example/items");
    request.send();

    // Resources and motion.
    let script = doc.create_element(Tag::Script);
    script.set_attr("src", "/assets/app.js");
    doc.root().append_child(&script);

    let element = doc.create_element(Tag::Div);
    element.set_motion_style(MotionStyle::new(ms(10), Iterations::Count(2.0)));
    doc.root().append_child(&element);
    tokio::time::sleep(ms(1)).await;
    doc.start_motion(&element, MotionKind::Animation);

    assert!(wait.pending() >= 4);

    let _ = fetch.await;
    tokio::time::sleep(ms(200)).await;
    wait.ready().await;
    wait.assert_balanced();
    assert!(wait.opens() >= 6, "every tracked family contributed");
    session.restore();
}
