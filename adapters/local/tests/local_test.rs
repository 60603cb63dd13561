// Integration tests for the local adapter crate

use local_adapter::{LOCAL_ADAPTER, LOOPBACK_ADAPTER, LocalHub};
use router::{
    Envelope, HandlerModule, PortRegistry, REJECTED_KEY, TRACEPARENT_HEADER,
};
use runtime::{AdapterFactory, Error, PORT_METADATA_KEY, Runtime, RuntimeConfig};

use serde_json::json;
use tokio::sync::Notify;

use std::sync::Arc;

use tracing_test::traced_test;

const CONFIG: &str = r#"
[[adapters.inbound]]
name = "api"
type = "local"
settings = { capacity = 8 }

[[adapters.outbound]]
name = "inventory"
type = "loopback"
settings = { port = "stock" }

[ports.greet]
handlers = ["shop.handlers:greet"]

[ports.stock]
handlers = ["shop.handlers:stock"]

[ports.slow]
handlers = ["shop.handlers:slow"]

[policies.slow.backpressure]
max_concurrent = 1
rejection_strategy = "fail_fast"
"#;

struct Gates {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

async fn setup() -> (Runtime, LocalHub, Gates) {
    let registry = PortRegistry::new();
    let factory = AdapterFactory::new();
    let hub = LocalHub::new();
    hub.install(&factory).await;
    assert_eq!(factory.kinds().await, vec![LOCAL_ADAPTER, LOOPBACK_ADAPTER]);

    let config = RuntimeConfig::from_toml_str(CONFIG).unwrap();
    let runtime = Runtime::new(config, registry, factory).unwrap();

    let gates = Gates {
        entered: Arc::new(Notify::new()),
        release: Arc::new(Notify::new()),
    };
    let entered = gates.entered.clone();
    let release = gates.release.clone();
    runtime
        .loader()
        .register_module("shop.handlers", move || {
            let entered = entered.clone();
            let release = release.clone();
            Ok(HandlerModule::new()
                .with_function("greet", |env: Envelope| async move {
                    let name = env.body.unwrap_or(json!("stranger"));
                    Ok(Envelope::success(json!({"greeting": name})))
                })
                .with_function("stock", |env: Envelope| async move {
                    Ok(Envelope::success(json!({"sku": env.path, "available": 3})))
                })
                .with_function("slow", move |_env: Envelope| {
                    let entered = entered.clone();
                    let release = release.clone();
                    async move {
                        entered.notify_one();
                        release.notified().await;
                        Ok(Envelope::success(json!("finished")))
                    }
                }))
        })
        .await;

    (runtime, hub, gates)
}

fn to_port(port: &str, path: &str) -> Envelope {
    Envelope::new(path).with_metadata(PORT_METADATA_KEY, json!(port))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[traced_test]
async fn test_local_dispatch_and_loopback_delivery() {
    let (runtime, hub, _gates) = setup().await;
    runtime.start().await.unwrap();
    assert_eq!(runtime.inbound_names().await, vec!["api"]);
    assert_eq!(runtime.outbound_names().await, vec!["inventory"]);

    let client = hub.client("api").unwrap();
    let response = client
        .send(to_port("greet", "/hello").with_body(json!("ada")))
        .await
        .unwrap();
    assert_eq!(response.status_code, 200);
    assert_eq!(response.data, Some(json!({"greeting": "ada"})));
    assert_eq!(response.path, "/hello");

    let response = client.send(to_port("missing", "/x")).await.unwrap();
    assert_eq!(response.status_code, 404);

    let response = runtime
        .deliver(Envelope::new("/sku/42"), "inventory")
        .await;
    assert_eq!(response.data, Some(json!({"sku": "/sku/42", "available": 3})));

    let response = runtime.deliver(Envelope::new("/sku/42"), "api").await;
    assert_eq!(response.status_code, 500);

    runtime.stop().await;
    assert_eq!(
        client.send(to_port("greet", "/hello")).await,
        Err(Error::Disconnected("api".to_owned()))
    );
    assert!(logs_contain("Runtime stopped."));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_saturated_port_rejects_concurrent_client() {
    let (runtime, hub, gates) = setup().await;
    runtime.start().await.unwrap();
    let client = hub.client("api").unwrap();

    let first = {
        let client = client.clone();
        tokio::spawn(async move { client.send(to_port("slow", "/first")).await })
    };
    gates.entered.notified().await;

    let second = client.send(to_port("slow", "/second")).await.unwrap();
    assert_eq!(second.status_code, 503);
    assert_eq!(second.path, "/second");
    assert_eq!(second.metadata.get(REJECTED_KEY), Some(&json!(true)));

    gates.release.notify_one();
    let first = first.await.unwrap().unwrap();
    assert_eq!(first.data, Some(json!("finished")));

    runtime.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_trace_crosses_local_adapter() {
    let (runtime, hub, _gates) = setup().await;
    runtime.start().await.unwrap();
    let client = hub.client("api").unwrap();

    let response = client
        .send(to_port("greet", "/hello").with_header(
            TRACEPARENT_HEADER,
            "00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01",
        ))
        .await
        .unwrap();
    assert_eq!(
        response.trace_id.as_deref(),
        Some("4bf92f3577b34da6a3ce929d0e0e4736")
    );
    let header = response.header(TRACEPARENT_HEADER).unwrap();
    assert!(header.contains("4bf92f3577b34da6a3ce929d0e0e4736"));
    assert_eq!(
        response.metadata_str("trace_id"),
        Some("4bf92f3577b34da6a3ce929d0e0e4736")
    );

    let response = client.send(to_port("greet", "/hello")).await.unwrap();
    assert!(response.header(TRACEPARENT_HEADER).is_none());

    runtime.stop().await;
}
