//! Wire-level tests: a registry against a peer that speaks the protocol by hand.

mod common;

use std::time::Duration;

use serde_json::json;

use isomesh::Error;
use isomesh::Listener;
use isomesh::MemoryHub;
use isomesh::Reflect;
use isomesh::ServiceHandle;
use isomesh::ServiceId;
use isomesh::Services;
use isomesh::wire::Failure;
use isomesh::wire::FailureKind;
use isomesh::wire::Frame;
use isomesh::wire::Outcome;

use common::RawPeer;
use common::WAIT;
use common::fast_config;
use common::hosted;
use common::test_contract;

/// Registry "b" sees `TestService` as "test", advertised by the raw peer "x".
async fn caller() -> (MemoryHub, Services, RawPeer, ServiceHandle) {
    common::init_tracing();
    let hub = MemoryHub::new();
    let b = Services::with_config(hub.node("b"), fast_config()).unwrap();
    let raw = RawPeer::new(&hub, "x");
    b.join().await.unwrap();

    raw.send("b", &Frame::ServiceAvailable {
        id: ServiceId::from("test"),
        shape: test_contract().shape(),
    })
    .await;

    let handle = b.get("test");
    assert!(handle.wait_available(WAIT).await);
    (hub, b, raw, handle)
}

fn is_call(frame: &Frame) -> bool {
    matches!(frame, Frame::CallRequest { .. })
}

fn correlation_of(frame: &Frame) -> u64 {
    match frame {
        Frame::CallRequest { correlation, .. } | Frame::EventSubscribe { correlation, .. } => *correlation,
        other => panic!("frame has no correlation: {:?}", other),
    }
}

fn ok(value: serde_json::Value) -> Outcome {
    Outcome::Ok { value }
}

// --- Calls ---

#[tokio::test(flavor = "multi_thread")]
async fn test_call_request_shape() {
    let (_hub, _b, mut raw, handle) = caller().await;

    let call = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.call("hello", ("world",)).await })
    };

    let request = raw.expect(is_call).await;
    match &request {
        Frame::CallRequest { service, method, args, .. } => {
            assert_eq!(service, &ServiceId::from("test"));
            assert_eq!(method, "hello");
            assert_eq!(args, &vec![json!("world")]);
        }
        _ => unreachable!(),
    }

    raw.send("b", &Frame::CallResponse {
        correlation: correlation_of(&request),
        outcome: ok(json!("Hello world!")),
    })
    .await;
    assert_eq!(call.await.unwrap().unwrap(), json!("Hello world!"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unanswered_call_times_out() {
    let (_hub, _b, mut raw, handle) = caller().await;

    let call = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.call("hello", ("world",)).await })
    };
    let request = raw.expect(is_call).await;

    let err = tokio::time::timeout(WAIT, call).await.unwrap().unwrap().unwrap_err();
    assert!(matches!(err, Error::CallTimeout { method, .. } if method == "hello"));

    // a late answer is dropped, and the registry keeps serving
    raw.send("b", &Frame::CallResponse {
        correlation: correlation_of(&request),
        outcome: ok(json!("too late")),
    })
    .await;

    let call = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.call("hello", ("again",)).await })
    };
    let request = raw.expect(is_call).await;
    raw.send("b", &Frame::CallResponse {
        correlation: correlation_of(&request),
        outcome: ok(json!("Hello again!")),
    })
    .await;
    assert_eq!(call.await.unwrap().unwrap(), json!("Hello again!"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_reversed_responses_reach_their_callers() {
    let (_hub, _b, mut raw, handle) = caller().await;

    let first = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.call("hello", ("first",)).await })
    };
    let first_request = raw.expect(is_call).await;

    let second = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.call("hello", ("second",)).await })
    };
    let second_request = raw.expect(is_call).await;
    assert_ne!(correlation_of(&first_request), correlation_of(&second_request));

    raw.send("b", &Frame::CallResponse {
        correlation: correlation_of(&second_request),
        outcome: ok(json!("second result")),
    })
    .await;
    assert_eq!(second.await.unwrap().unwrap(), json!("second result"));
    assert!(!first.is_finished());

    raw.send("b", &Frame::CallResponse {
        correlation: correlation_of(&first_request),
        outcome: ok(json!("first result")),
    })
    .await;
    assert_eq!(first.await.unwrap().unwrap(), json!("first result"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_response_from_another_peer_is_ignored() {
    let (hub, _b, mut raw, handle) = caller().await;
    let impostor = RawPeer::new(&hub, "y");

    let call = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.call("hello", ("world",)).await })
    };
    let request = raw.expect(is_call).await;
    let correlation = correlation_of(&request);

    impostor
        .send("b", &Frame::CallResponse { correlation, outcome: ok(json!("forged")) })
        .await;
    tokio::time::sleep(Duration::from_millis(30)).await;
    raw.send("b", &Frame::CallResponse { correlation, outcome: ok(json!("genuine")) })
        .await;

    assert_eq!(call.await.unwrap().unwrap(), json!("genuine"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_failure_kinds_surface_as_local_errors() {
    let (_hub, _b, mut raw, handle) = caller().await;

    let call = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.call("hello", ("world",)).await })
    };
    let request = raw.expect(is_call).await;
    raw.send("b", &Frame::CallResponse {
        correlation: correlation_of(&request),
        outcome: Outcome::Err(Failure::new(FailureKind::ServiceNotFound, "gone")),
    })
    .await;

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::ServiceNotFound(id) if id == ServiceId::from("test")));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_malformed_frames_are_ignored() {
    let (_hub, _b, mut raw, handle) = caller().await;

    raw.send_bytes("b", b"\x00\x01 definitely not json").await;
    raw.send_bytes("b", br#"{"type":"call-teleport","where":"mars"}"#).await;
    raw.send_bytes("b", br#"{"type":"service-available","id":"broken","shape":{"name":"X","methods":[{"name":"m","params":[],"returns":"unit"},{"name":"m","params":[],"returns":"unit"}]}}"#)
        .await;
    raw.send("b", &Frame::CallResponse { correlation: 9_999, outcome: ok(json!(null)) })
        .await;

    let call = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.call("hello", ("world",)).await })
    };
    let request = raw.expect(is_call).await;
    raw.send("b", &Frame::CallResponse {
        correlation: correlation_of(&request),
        outcome: ok(json!("still serving")),
    })
    .await;
    assert_eq!(call.await.unwrap().unwrap(), json!("still serving"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_abandoned_calls_leave_no_pending_requests() {
    let (_hub, b, mut raw, handle) = caller().await;

    for i in 0..10 {
        let abandoned = tokio::time::timeout(Duration::from_millis(20), handle.call("hello", (format!("call-{}", i),))).await;
        assert!(abandoned.is_err());
    }
    assert_eq!(b.pending_requests(), 0);

    // the requests did go out; answers to them are simply dropped
    let request = raw.expect(is_call).await;
    raw.send("b", &Frame::CallResponse {
        correlation: correlation_of(&request),
        outcome: ok(json!("nobody listening")),
    })
    .await;
    assert_eq!(b.pending_requests(), 0);
}

// --- Subscriptions ---

#[tokio::test(flavor = "multi_thread")]
async fn test_subscriptions_are_reference_counted() {
    let (_hub, _b, mut raw, handle) = caller().await;
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let first = {
        let tx = tx.clone();
        Listener::new(move |payload| {
            let _ = tx.send(("first", payload.to_vec()));
        })
    };
    let second = Listener::new(move |payload| {
        let _ = tx.send(("second", payload.to_vec()));
    });

    let subscribe = {
        let handle = handle.clone();
        let first = first.clone();
        tokio::spawn(async move { handle.subscribe("greeted", first).await })
    };
    let request = raw.expect(|f| matches!(f, Frame::EventSubscribe { .. })).await;
    raw.send("b", &Frame::EventSubscribed {
        correlation: correlation_of(&request),
        outcome: ok(json!(null)),
    })
    .await;
    subscribe.await.unwrap().unwrap();

    handle.subscribe("greeted", second.clone()).await.unwrap();
    let extra = raw.drain(Duration::from_millis(100)).await;
    assert!(extra.iter().all(|f| !matches!(f, Frame::EventSubscribe { .. })), "{:?}", extra);

    raw.send("b", &Frame::EventFired {
        service: ServiceId::from("test"),
        event: "greeted".into(),
        payload: vec![json!("world")],
    })
    .await;
    let mut seen = vec![
        tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap(),
        tokio::time::timeout(WAIT, rx.recv()).await.unwrap().unwrap(),
    ];
    seen.sort_by_key(|(who, _)| *who);
    assert_eq!(seen, vec![("first", vec![json!("world")]), ("second", vec![json!("world")])]);

    assert!(handle.unsubscribe("greeted", &first).await.unwrap());
    let extra = raw.drain(Duration::from_millis(100)).await;
    assert!(extra.iter().all(|f| !matches!(f, Frame::EventUnsubscribe { .. })), "{:?}", extra);

    assert!(handle.unsubscribe("greeted", &second).await.unwrap());
    let frame = raw.expect(|f| matches!(f, Frame::EventUnsubscribe { .. })).await;
    assert_eq!(frame, Frame::EventUnsubscribe {
        service: ServiceId::from("test"),
        event: "greeted".into(),
    });
}

#[tokio::test(flavor = "multi_thread")]
async fn test_subscriptions_to_different_events_do_not_wait_on_each_other() {
    let (_hub, _b, mut raw, handle) = caller().await;

    let greeted = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.subscribe("greeted", Listener::new(|_| {})).await })
    };
    raw.expect(|f| matches!(f, Frame::EventSubscribe { event, .. } if event == "greeted"))
        .await;

    let parted = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.subscribe("parted", Listener::new(|_| {})).await })
    };
    let request = raw
        .expect(|f| matches!(f, Frame::EventSubscribe { event, .. } if event == "parted"))
        .await;
    raw.send("b", &Frame::EventSubscribed {
        correlation: correlation_of(&request),
        outcome: ok(json!(null)),
    })
    .await;

    parted.await.unwrap().unwrap();
    // "greeted" is still waiting on its acknowledgement
    assert!(!greeted.is_finished());
    let err = greeted.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::SubscriptionFailed { event, .. } if event == "greeted"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unacknowledged_subscription_fails() {
    let (_hub, _b, mut raw, handle) = caller().await;
    let listener = Listener::new(|_| {});

    let subscribe = {
        let handle = handle.clone();
        let listener = listener.clone();
        tokio::spawn(async move { handle.subscribe("greeted", listener).await })
    };
    raw.expect(|f| matches!(f, Frame::EventSubscribe { .. })).await;

    let err = tokio::time::timeout(WAIT, subscribe).await.unwrap().unwrap().unwrap_err();
    assert!(matches!(err, Error::SubscriptionFailed { event, .. } if event == "greeted"));

    // the owner is told to forget the request, and the listener was not kept
    raw.expect(|f| matches!(f, Frame::EventUnsubscribe { .. })).await;
    assert!(!handle.unsubscribe("greeted", &listener).await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rejected_subscription_fails() {
    let (_hub, _b, mut raw, handle) = caller().await;

    let subscribe = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.subscribe("greeted", Listener::new(|_| {})).await })
    };
    let request = raw.expect(|f| matches!(f, Frame::EventSubscribe { .. })).await;
    raw.send("b", &Frame::EventSubscribed {
        correlation: correlation_of(&request),
        outcome: Outcome::Err(Failure::new(FailureKind::UnknownEvent, "no such event")),
    })
    .await;

    let err = subscribe.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::SubscriptionFailed { reason, .. } if reason.contains("greeted")));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_withdrawal_invalidates_remote() {
    let (_hub, _b, mut raw, handle) = caller().await;
    let reflect = handle.reflect().unwrap();

    let call = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.call("hello", ("world",)).await })
    };
    raw.expect(is_call).await;
    raw.send("b", &Frame::ServiceUnavailable { id: ServiceId::from("test") }).await;

    let err = call.await.unwrap().unwrap_err();
    assert!(matches!(err, Error::NodeUnavailable(node) if node == raw.id()));
    assert!(handle.wait_unavailable(WAIT).await);

    // a reflect held past its withdrawal refuses work without touching the network
    let err = reflect.apply("hello", vec![json!("world")]).await.unwrap_err();
    assert!(matches!(err, Error::NodeUnavailable(_)));
}

// --- Serving ---

/// Registry "a" hosting `TestService` as "test", observed by the raw peer "x".
async fn callee() -> (MemoryHub, Services, RawPeer, common::Hosted) {
    common::init_tracing();
    let hub = MemoryHub::new();
    let a = Services::new(hub.node("a"));
    let mut raw = RawPeer::new(&hub, "x");
    let hosted = hosted("test");
    a.register(hosted.reflect.clone()).unwrap();
    a.join().await.unwrap();

    raw.expect(|f| matches!(f, Frame::ServiceAvailable { .. })).await;
    (hub, a, raw, hosted)
}

async fn request(raw: &mut RawPeer, service: &str, method: &str, args: Vec<serde_json::Value>, correlation: u64) -> Outcome {
    raw.send("a", &Frame::CallRequest {
        service: ServiceId::from(service),
        method: method.into(),
        args,
        correlation,
    })
    .await;

    match raw.expect(|f| matches!(f, Frame::CallResponse { correlation: c, .. } if *c == correlation)).await {
        Frame::CallResponse { outcome, .. } => outcome,
        _ => unreachable!(),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_serving_call_requests() {
    let (_hub, _a, mut raw, _hosted) = callee().await;

    let outcome = request(&mut raw, "test", "hello", vec![json!("world")], 1).await;
    assert_eq!(outcome, ok(json!("Hello world!")));

    let outcome = request(&mut raw, "test", "hello", vec![json!("boom")], 2).await;
    assert_eq!(outcome, Outcome::Err(Failure::new(FailureKind::Invocation, "boom")));

    let outcome = request(&mut raw, "nope", "hello", vec![], 3).await;
    assert!(matches!(outcome, Outcome::Err(Failure { kind: FailureKind::ServiceNotFound, .. })));

    let outcome = request(&mut raw, "test", "goodbye", vec![], 4).await;
    assert!(matches!(outcome, Outcome::Err(Failure { kind: FailureKind::UnknownMethod, .. })));

    let outcome = request(&mut raw, "test", "hello", vec![], 5).await;
    assert!(matches!(
        outcome,
        Outcome::Err(Failure { kind: FailureKind::BadArgumentCount, expected: Some(1), found: Some(0), .. })
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_slow_call_does_not_block_others() {
    let (_hub, _a, mut raw, _hosted) = callee().await;

    raw.send("a", &Frame::CallRequest {
        service: ServiceId::from("test"),
        method: "slow".into(),
        args: vec![json!(500), json!("slow")],
        correlation: 1,
    })
    .await;
    raw.send("a", &Frame::CallRequest {
        service: ServiceId::from("test"),
        method: "slow".into(),
        args: vec![json!(0), json!("fast")],
        correlation: 2,
    })
    .await;

    let first = raw.expect(|f| matches!(f, Frame::CallResponse { .. })).await;
    assert_eq!(first, Frame::CallResponse { correlation: 2, outcome: ok(json!("fast")) });
    let second = raw.expect(|f| matches!(f, Frame::CallResponse { .. })).await;
    assert_eq!(second, Frame::CallResponse { correlation: 1, outcome: ok(json!("slow")) });
}

#[tokio::test(flavor = "multi_thread")]
async fn test_solicit_is_answered_with_advertisements() {
    let (_hub, _a, mut raw, _hosted) = callee().await;

    raw.send("a", &Frame::Solicit).await;
    let frame = raw.expect(|f| matches!(f, Frame::ServiceAvailable { .. })).await;
    assert_eq!(frame, Frame::ServiceAvailable {
        id: ServiceId::from("test"),
        shape: test_contract().shape(),
    });
}

#[tokio::test(flavor = "multi_thread")]
async fn test_serving_subscriptions() {
    let (_hub, _a, mut raw, hosted) = callee().await;

    raw.send("a", &Frame::EventSubscribe {
        service: ServiceId::from("test"),
        event: "greeted".into(),
        correlation: 7,
    })
    .await;
    let ack = raw.expect(|f| matches!(f, Frame::EventSubscribed { .. })).await;
    assert_eq!(ack, Frame::EventSubscribed { correlation: 7, outcome: ok(json!(null)) });

    hosted.emitter.emit("greeted", vec![json!("world")]).unwrap();
    let fired = raw.expect(|f| matches!(f, Frame::EventFired { .. })).await;
    assert_eq!(fired, Frame::EventFired {
        service: ServiceId::from("test"),
        event: "greeted".into(),
        payload: vec![json!("world")],
    });

    raw.send("a", &Frame::EventUnsubscribe {
        service: ServiceId::from("test"),
        event: "greeted".into(),
    })
    .await;
    common::eventually("forwarder detached", || hosted.reflect.listener_count("greeted") == 0).await;

    raw.send("a", &Frame::EventSubscribe {
        service: ServiceId::from("test"),
        event: "vanished".into(),
        correlation: 8,
    })
    .await;
    let ack = raw.expect(|f| matches!(f, Frame::EventSubscribed { .. })).await;
    assert!(matches!(
        ack,
        Frame::EventSubscribed { correlation: 8, outcome: Outcome::Err(Failure { kind: FailureKind::UnknownEvent, .. }) }
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_leave_withdraws_every_service() {
    let (_hub, a, mut raw, _hosted) = callee().await;
    a.register(hosted("other").reflect).unwrap();

    a.leave().await.unwrap();

    let mut withdrawn = Vec::new();
    while withdrawn.len() < 2 {
        match raw.expect(|f| matches!(f, Frame::ServiceUnavailable { .. })).await {
            Frame::ServiceUnavailable { id } => withdrawn.push(id),
            _ => unreachable!(),
        }
    }
    withdrawn.sort();
    assert_eq!(withdrawn, vec![ServiceId::from("other"), ServiceId::from("test")]);
}
