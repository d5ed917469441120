//! Retry, timeout, alternate, delayed and meta-refresh behaviour over a
//! scripted transport.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use common::{MockTransport, Recorder, factory};
use fetchtree_core::{FetchError, LeafOptions, Node, PR_URL, Result};
use serde_json::json;

const A: &str = "https://a.example/file.bin";
const B: &str = "https://b.example/file.bin";
const C: &str = "https://c.example/file.bin";

#[tokio::test]
async fn retry_stops_at_bound() {
    let transport = MockTransport::new();
    transport.fail(A);
    let factory = factory(&transport);
    let retry = factory.retry(factory.url(A).unwrap(), 3).unwrap();

    match retry.download().await.unwrap_err() {
        FetchError::Exhausted { attempts, last } => {
            assert_eq!(attempts, 3);
            assert!(matches!(*last, FetchError::Transport { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(transport.fetch_count(A), 3);
}

#[tokio::test]
async fn retry_recovers_from_transient_failures() {
    let transport = MockTransport::new();
    transport.serve(A, "eventually");
    transport.fail_first(A, 2);
    let factory = factory(&transport);
    let retry = factory.retry(factory.url(A).unwrap(), 3).unwrap();

    let resource = retry.download().await.unwrap();
    assert_eq!(resource.bytes().await.unwrap(), Bytes::from("eventually"));
    assert_eq!(transport.fetch_count(A), 3);
}

#[tokio::test]
async fn retry_of_zero_still_tries_once() {
    let transport = MockTransport::new();
    transport.fail(A);
    let factory = factory(&transport);
    let retry = factory.retry(factory.url(A).unwrap(), 0).unwrap();

    let err = retry.download().await.unwrap_err();
    assert!(matches!(err, FetchError::Exhausted { attempts: 1, .. }));
    assert_eq!(transport.fetch_count(A), 1);
}

#[tokio::test]
async fn alternate_stops_at_first_success() {
    let transport = MockTransport::new();
    transport.fail(A);
    transport.serve(B, "from b");
    transport.serve(C, "from c");
    let factory = factory(&transport);
    let children = [A, B, C].iter().map(|u| factory.url(u).unwrap()).collect();
    let alternate = factory.alternate(children, None, false).unwrap();

    let resource = alternate.download().await.unwrap();
    assert_eq!(resource.bytes().await.unwrap(), Bytes::from("from b"));
    assert_eq!(transport.fetch_count(A), 1);
    assert_eq!(transport.fetch_count(B), 1);
    assert_eq!(transport.fetch_count(C), 0);
}

#[tokio::test]
async fn alternate_respects_max_to_try() {
    let transport = MockTransport::new();
    transport.fail(A);
    transport.serve(B, "from b");
    let factory = factory(&transport);
    let children = vec![factory.url(A).unwrap(), factory.url(B).unwrap()];
    let alternate = factory.alternate(children, Some(1), false).unwrap();

    match alternate.download().await.unwrap_err() {
        FetchError::Exhausted { attempts, last } => {
            assert_eq!(attempts, 1);
            assert!(matches!(*last, FetchError::Transport { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(transport.fetch_count(B), 0);
}

#[tokio::test]
async fn alternate_without_candidates_fails_immediately() {
    let transport = MockTransport::new();
    transport.serve(A, "x");
    let factory = factory(&transport);

    let empty = factory.alternate(Vec::new(), None, true).unwrap();
    assert!(matches!(empty.download().await, Err(FetchError::NoAlternatives)));

    let none_allowed = factory.alternate(vec![factory.url(A).unwrap()], Some(0), false).unwrap();
    assert!(matches!(none_allowed.download().await, Err(FetchError::NoAlternatives)));
    assert_eq!(transport.fetch_count(A), 0);
}

#[tokio::test]
async fn random_alternate_still_tries_every_child() {
    let transport = MockTransport::new();
    transport.fail(A);
    transport.fail(B);
    transport.fail(C);
    let factory = factory(&transport);
    let children = [A, B, C].iter().map(|u| factory.url(u).unwrap()).collect();
    let alternate = factory.alternate(children, None, true).unwrap();

    let err = alternate.download().await.unwrap_err();
    assert!(matches!(err, FetchError::Exhausted { attempts: 3, .. }));
    for url in [A, B, C] {
        assert_eq!(transport.fetch_count(url), 1);
    }
}

#[tokio::test]
async fn random_order_is_fixed_across_retries() {
    let transport = MockTransport::new();
    let urls: Vec<String> = (0..6).map(|i| format!("https://h{i}.example/file.bin")).collect();
    for url in &urls {
        transport.fail(url);
    }
    let factory = factory(&transport);
    let children = urls.iter().map(|u| factory.url(u).unwrap()).collect();
    let alternate = factory.alternate(children, None, true).unwrap();
    let retry = factory.retry(alternate, 3).unwrap();

    assert!(retry.download().await.is_err());

    let order = transport.fetch_order();
    assert_eq!(order.len(), 18);
    let attempts: Vec<&[String]> = order.chunks(6).collect();
    assert_eq!(attempts[0], attempts[1]);
    assert_eq!(attempts[1], attempts[2]);
    let mut seen = attempts[0].to_vec();
    seen.sort();
    assert_eq!(seen, urls);
}

#[tokio::test]
async fn alternate_size_lookup_is_independent_of_download() {
    let transport = MockTransport::new();
    transport.serve(A, "short");
    transport.serve(B, "a longer body");
    transport.fail_probe(A);
    let factory = factory(&transport);
    let children = vec![factory.url(A).unwrap(), factory.url(B).unwrap()];
    let alternate = factory.alternate(children, None, false).unwrap();

    assert_eq!(alternate.probe_size().await.unwrap(), Some(13));
    let resource = alternate.download().await.unwrap();
    assert_eq!(resource.bytes().await.unwrap(), Bytes::from("short"));
}

#[tokio::test]
async fn alternate_size_lookup_surfaces_last_error() {
    let transport = MockTransport::new();
    transport.fail(A);
    transport.fail(B);
    let factory = factory(&transport);
    let children = vec![factory.url(A).unwrap(), factory.url(B).unwrap()];
    let alternate = factory.alternate(children, None, false).unwrap();

    match alternate.probe_size().await.unwrap_err() {
        FetchError::Transport { target, .. } => assert_eq!(target, B),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test(start_paused = true)]
async fn timeout_cancels_slow_child() {
    let transport = MockTransport::new();
    transport.serve(A, "slow");
    transport.delay(A, Duration::from_millis(200));
    let factory = factory(&transport);
    let node = factory.timeout(factory.url(A).unwrap(), Duration::from_millis(50)).unwrap();
    let recorder = Recorder::new();
    node.add_listener(recorder.clone());

    let err = node.download().await.unwrap_err();
    assert!(err.is_timeout());

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(recorder.terminal_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn timeout_lets_fast_child_through_once() {
    let transport = MockTransport::new();
    transport.serve(A, "fast");
    transport.delay(A, Duration::from_millis(10));
    let factory = factory(&transport);
    let node = factory.timeout(factory.url(A).unwrap(), Duration::from_millis(200)).unwrap();
    let recorder = Recorder::new();
    node.add_listener(recorder.clone());

    let resource = node.download().await.unwrap();
    assert_eq!(resource.bytes().await.unwrap(), Bytes::from("fast"));

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(recorder.completed.load(Ordering::SeqCst), 1);
    assert_eq!(recorder.terminal_calls(), 1);
    assert!(!node.is_cancelled());
}

#[tokio::test(start_paused = true)]
async fn timeout_inside_retry_gives_each_attempt_its_own_clock() {
    let transport = MockTransport::new();
    transport.serve(A, "x");
    transport.delay(A, Duration::from_millis(100));
    let factory = factory(&transport);
    let timed = factory.timeout(factory.url(A).unwrap(), Duration::from_millis(20)).unwrap();
    let retry = factory.retry(timed, 2).unwrap();

    let err = retry.download().await.unwrap_err();
    assert!(err.root_cause().is_timeout());
    assert_eq!(transport.fetch_count(A), 2);
}

#[tokio::test(start_paused = true)]
async fn timeout_stops_child_it_has_given_up_on() {
    let transport = MockTransport::new();
    transport.serve(A, "never");
    transport.delay(A, Duration::from_millis(200));
    let factory = factory(&transport);
    let node = factory.timeout(factory.url(A).unwrap(), Duration::from_millis(1)).unwrap();
    let recorder = Recorder::new();
    node.add_listener(recorder.clone());

    assert!(node.download().await.unwrap_err().is_timeout());

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(transport.served_count(A), 0);
    assert_eq!(recorder.terminal_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn timeout_bounds_size_lookup() {
    let transport = MockTransport::new();
    transport.serve(A, "slow");
    transport.delay(A, Duration::from_millis(200));
    let factory = factory(&transport);
    let node = factory.timeout(factory.url(A).unwrap(), Duration::from_millis(50)).unwrap();

    let err = node.probe_size().await.unwrap_err();
    assert!(matches!(err, FetchError::Timeout(d) if d == Duration::from_millis(50)));
    assert_eq!(node.probe_size().await.unwrap(), None);
    assert_eq!(transport.probe_count(A), 1);
}

#[tokio::test]
async fn retry_size_lookup_forks_each_attempt() {
    let transport = MockTransport::new();
    transport.serve(A, "body");
    transport.fail_probe(A);
    let factory = factory(&transport);
    let retry = factory.retry(factory.url(A).unwrap(), 3).unwrap();

    match retry.probe_size().await.unwrap_err() {
        FetchError::Exhausted { attempts, last } => {
            assert_eq!(attempts, 3);
            assert!(matches!(*last, FetchError::Transport { .. }));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(transport.probe_count(A), 3);
    assert_eq!(transport.fetch_count(A), 0);
}

#[tokio::test]
async fn properties_propagate_to_root() {
    let transport = MockTransport::new();
    transport.serve_html(A, "<p>hi</p>");
    let factory = factory(&transport);
    let alternate = factory.alternate(vec![factory.url(A).unwrap()], None, false).unwrap();
    let root = factory.retry(alternate, 2).unwrap();

    root.download().await.unwrap();
    assert_eq!(root.property(PR_URL), Some(json!(A)));
    assert_eq!(root.property("content-type"), Some(json!("text/html; charset=utf-8")));
}

#[tokio::test]
async fn only_first_write_propagates() {
    let transport = MockTransport::new();
    let factory = factory(&transport);
    let leaf = factory.url(A).unwrap();
    let root = factory.retry(leaf.clone(), 1).unwrap();

    leaf.set_property("mirror", json!("first"));
    leaf.set_property("mirror", json!("second"));

    assert_eq!(leaf.property("mirror"), Some(json!("second")));
    assert_eq!(root.property("mirror"), Some(json!("first")));
}

#[tokio::test]
async fn delayed_builds_delegate_on_first_use() {
    let transport = MockTransport::new();
    transport.serve(A, "lazy");
    let factory = factory(&transport);
    let created = Arc::new(AtomicUsize::new(0));

    let node = {
        let created = created.clone();
        let inner = factory.clone();
        factory.delayed(move || -> Result<Node> {
            created.fetch_add(1, Ordering::SeqCst);
            inner.url(A)
        })
    };
    assert_eq!(node.name(), "<delayed>");
    let _fork = node.fork(None);
    assert_eq!(created.load(Ordering::SeqCst), 0);

    let resource = node.download().await.unwrap();
    assert_eq!(resource.bytes().await.unwrap(), Bytes::from("lazy"));
    assert_eq!(node.name(), A);
    assert_eq!(node.property(PR_URL), Some(json!(A)));
    assert_eq!(created.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn delayed_property_read_resolves_delegate() {
    let transport = MockTransport::new();
    let factory = factory(&transport);
    let inner = factory.clone();
    let node = factory.delayed(move || -> Result<Node> {
        let leaf = inner.url(A)?;
        leaf.set_property("url_x-token", json!("abc"));
        Ok(leaf)
    });

    assert_eq!(node.property("url_x-token"), Some(json!("abc")));
}

#[tokio::test]
async fn delayed_factory_error_fails_download_and_size_lookup() {
    let transport = MockTransport::new();
    let factory = factory(&transport);
    let node = factory.delayed(|| -> Result<Node> { Err(FetchError::Config("no mirrors".into())) });

    assert!(matches!(node.probe_size().await, Err(FetchError::Config(_))));
    assert!(matches!(node.download().await, Err(FetchError::Config(_))));
}

#[tokio::test]
async fn meta_refresh_follows_relative_target() {
    let transport = MockTransport::new();
    transport.serve_html(
        A,
        r#"<html><head><meta http-equiv="refresh" content="0; url=/real.bin"></head></html>"#,
    );
    transport.serve("https://a.example/real.bin", "real payload");
    let factory = factory(&transport);
    let node = factory.meta_refresh(factory.url(A).unwrap()).unwrap();
    let recorder = Recorder::new();
    node.add_listener(recorder.clone());

    let resource = node.download().await.unwrap();
    assert_eq!(resource.bytes().await.unwrap(), Bytes::from("real payload"));
    assert_eq!(transport.fetch_count("https://a.example/real.bin"), 1);
    assert!(recorder.activity.lock().iter().any(|a| a.starts_with("Following meta refresh")));
}

#[tokio::test]
async fn meta_refresh_without_tag_returns_page() {
    let transport = MockTransport::new();
    transport.serve(A, "plain bytes");
    let factory = factory(&transport);
    let node = factory.meta_refresh(factory.url(A).unwrap()).unwrap();

    let resource = node.download().await.unwrap();
    assert_eq!(resource.bytes().await.unwrap(), Bytes::from("plain bytes"));
}

#[tokio::test]
async fn meta_refresh_on_consumed_stream_is_not_recoverable() {
    let transport = MockTransport::new();
    transport.serve(A, "plain bytes");
    let factory = factory(&transport);
    let leaf = factory.url_with(A, LeafOptions { streaming: true }).unwrap();
    let node = factory.meta_refresh(leaf).unwrap();

    assert!(matches!(node.download().await, Err(FetchError::RefreshNotRecoverable)));
}
