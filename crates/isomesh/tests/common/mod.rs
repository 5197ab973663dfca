//! Shared fixtures for the registry test suites.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::sync::mpsc;

use isomesh::Config;
use isomesh::Contract;
use isomesh::Emitter;
use isomesh::Event;
use isomesh::Implementation;
use isomesh::LocalReflect;
use isomesh::MemoryHub;
use isomesh::MemoryNode;
use isomesh::Method;
use isomesh::Network;
use isomesh::NetworkEvent;
use isomesh::NodeId;
use isomesh::Proxy;
use isomesh::Result;
use isomesh::ServiceContract;
use isomesh::Services;
use isomesh::wire;
use isomesh::wire::Frame;

pub const HELLO: Method<(String,), String> = Method::new("hello");
pub const SLOW: Method<(u64, String), String> = Method::new("slow");
pub const GREETED: Event<(String,)> = Event::new("greeted");
pub const PARTED: Event<(String,)> = Event::new("parted");

/// Upper bound for anything the suites wait on.
pub const WAIT: Duration = Duration::from_secs(5);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn test_contract() -> ServiceContract {
    ServiceContract::builder("TestService")
        .method(&HELLO)
        .unwrap()
        .method(&SLOW)
        .unwrap()
        .event(&GREETED)
        .unwrap()
        .event(&PARTED)
        .unwrap()
        .build()
}

/// A typed view over `TestService`.
pub struct TestService {
    proxy: Proxy,
}

impl TestService {
    pub async fn hello(&self, what: &str) -> Result<String> {
        self.proxy.invoke(&HELLO, (what.to_string(),)).await
    }

    pub async fn slow(&self, millis: u64, tag: &str) -> Result<String> {
        self.proxy.invoke(&SLOW, (millis, tag.to_string())).await
    }
}

impl Contract for TestService {
    fn describe() -> Result<ServiceContract> {
        Ok(test_contract())
    }

    fn from_proxy(proxy: Proxy) -> Self {
        Self { proxy }
    }
}

/// One `TestService` implementation and the handles a test needs to drive it.
pub struct Hosted {
    pub reflect: Arc<LocalReflect>,
    pub emitter: Emitter,
    /// Notified each time `slow` starts running.
    pub entered: Arc<Notify>,
}

/// `hello` greets (and fails for "boom"); `slow` sleeps and echoes its tag.
pub fn hosted(id: &str) -> Hosted {
    let entered = Arc::new(Notify::new());
    let notify = entered.clone();

    let implementation = Implementation::new()
        .method(&HELLO, |(what,)| async move {
            if what == "boom" {
                anyhow::bail!("boom");
            }
            Ok(format!("Hello {}!", what))
        })
        .method(&SLOW, move |(millis, tag)| {
            let notify = notify.clone();
            async move {
                notify.notify_one();
                tokio::time::sleep(Duration::from_millis(millis)).await;
                Ok(tag)
            }
        });

    let reflect = Arc::new(test_contract().implement(id, implementation).unwrap());
    let emitter = reflect.emitter();
    Hosted { reflect, emitter, entered }
}

pub fn fast_config() -> Config {
    Config::builder()
        .call_timeout(Duration::from_millis(300))
        .subscribe_timeout(Duration::from_millis(300))
        .build()
        .unwrap()
}

/// Two registries "a" and "b" on one hub, "a" hosting `TestService` as "test".
/// Both have joined and "b" already sees the service.
pub async fn pair() -> (MemoryHub, Services, Services, Hosted) {
    init_tracing();
    let hub = MemoryHub::new();
    let a = Services::new(hub.node("a"));
    let b = Services::new(hub.node("b"));

    let hosted = hosted("test");
    a.register(hosted.reflect.clone()).unwrap();
    a.join().await.unwrap();
    b.join().await.unwrap();

    assert!(b.get("test").wait_available(WAIT).await, "b never saw the service");
    (hub, a, b, hosted)
}

/// Polls `check` until it holds, failing the test after `WAIT`.
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let result = tokio::time::timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(result.is_ok(), "timed out waiting for {}", what);
}

/// A bare node speaking the wire protocol by hand.
pub struct RawPeer {
    pub node: Arc<MemoryNode>,
    events: mpsc::UnboundedReceiver<NetworkEvent>,
}

impl RawPeer {
    pub fn new(hub: &MemoryHub, name: &str) -> Self {
        let node = hub.node(name);
        let events = node.events().unwrap();
        Self { node, events }
    }

    pub fn id(&self) -> NodeId {
        self.node.local_node().clone()
    }

    pub async fn send(&self, to: &str, frame: &Frame) {
        self.send_bytes(to, &wire::encode(frame).unwrap()).await;
    }

    pub async fn send_bytes(&self, to: &str, bytes: &[u8]) {
        self.node.send(&NodeId::from(to), bytes).await.unwrap();
    }

    /// The next frame for which `pick` returns true, skipping everything else.
    pub async fn expect<F>(&mut self, mut pick: F) -> Frame
    where
        F: FnMut(&Frame) -> bool,
    {
        let result = tokio::time::timeout(WAIT, async {
            loop {
                match self.events.recv().await {
                    Some(NetworkEvent::Message { payload, .. }) => {
                        let frame = wire::decode(&payload).unwrap();
                        if pick(&frame) {
                            return frame;
                        }
                    }
                    Some(_) => {}
                    None => panic!("raw peer event stream closed"),
                }
            }
        })
        .await;
        result.expect("raw peer timed out waiting for a frame")
    }

    /// Every frame that arrives within `window`.
    pub async fn drain(&mut self, window: Duration) -> Vec<Frame> {
        let mut frames = Vec::new();
        let deadline = tokio::time::Instant::now() + window;
        while let Ok(Some(event)) = tokio::time::timeout_at(deadline, self.events.recv()).await {
            if let NetworkEvent::Message { payload, .. } = event {
                frames.push(wire::decode(&payload).unwrap());
            }
        }
        frames
    }
}
