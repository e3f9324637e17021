//! # Routing Scenarios
//!
//! End-to-end behaviour of the bus through its public API: reconciliation,
//! pull and push delivery, history queries and archive retention.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use message_bus::{
    ArchiveConfig, BusConfig, InMemoryTransport, Message, MessageBus, MessageBusUtil, Route,
    StaticRoutingSource, Transport,
};
use tempfile::TempDir;
use tokio::time::timeout;
use tokio_stream::StreamExt;

struct Gateway {
    _dir: TempDir,
    source: Arc<StaticRoutingSource>,
    transport: InMemoryTransport,
    util: MessageBusUtil,
}

fn routes(entries: &[(&str, &[&str])]) -> HashMap<String, Route> {
    entries
        .iter()
        .map(|(publisher, receivers)| (publisher.to_string(), Route::new(receivers.iter().copied())))
        .collect()
}

async fn gateway(
    table: HashMap<String, Route>,
    archive: impl FnOnce(&TempDir) -> ArchiveConfig,
) -> Gateway {
    let dir = TempDir::new().expect("tempdir");
    let config = BusConfig {
        archive: archive(&dir),
        throughput_interval: Duration::from_millis(50),
    };
    let source = Arc::new(StaticRoutingSource::new());
    source.set_routes(table);
    let transport = InMemoryTransport::new();
    let bus = Arc::new(MessageBus::new(
        config,
        Arc::new(transport.clone()),
        source.clone(),
    ));
    bus.start().await.expect("start");
    Gateway {
        _dir: dir,
        source,
        transport,
        util: MessageBusUtil::new(bus),
    }
}

fn default_archive(dir: &TempDir) -> ArchiveConfig {
    ArchiveConfig {
        base_dir: dir.path().to_path_buf(),
        ..ArchiveConfig::default()
    }
}

fn message(id: &str, publisher: &str, timestamp: i64) -> Message {
    Message {
        id: id.to_string(),
        publisher: publisher.to_string(),
        timestamp,
        content_data: id.as_bytes().to_vec(),
        ..Message::default()
    }
}

/// Routing table `{A: [B, C]}` yields exactly those handles, and removing A
/// removes its publisher.
#[tokio::test]
async fn test_reconciliation_follows_routing_table() {
    let gw = gateway(routes(&[("A", &["B", "C"])]), default_archive).await;
    let bus = gw.util.bus();

    assert!(bus.get_publisher("A").is_some());
    assert!(bus.get_receiver("B").is_some());
    assert!(bus.get_receiver("C").is_some());
    assert!(bus.get_receiver("D").is_none());

    gw.source.set_routes(routes(&[]));
    bus.update().await;

    assert!(bus.get_publisher("A").is_none());
    assert!(bus.get_receiver("B").is_none());
}

/// Publish m1 on `A -> [B]`: the first pull returns it, the second nothing.
#[tokio::test]
async fn test_publish_then_pull_once() {
    let gw = gateway(routes(&[("A", &["B"])]), default_archive).await;

    let m1 = message("m1", "A", 1000);
    gw.util.publish(m1.clone()).expect("publish");

    assert_eq!(gw.util.get_messages("B"), vec![m1]);
    assert!(gw.util.get_messages("B").is_empty());
}

/// Real-time receiving owns delivery: pull returns nothing until disabled,
/// then pending messages come back.
#[tokio::test]
async fn test_pull_push_exclusivity() {
    let gw = gateway(routes(&[("A", &["B"])]), default_archive).await;
    let mut stream = gw.util.bus().real_time_stream().expect("stream");

    gw.util.publish(message("pending", "A", 1000)).unwrap();
    assert!(gw.util.enable_real_time_receiving("B"));
    assert!(gw.util.get_messages("B").is_empty());

    gw.util.publish(message("live", "A", 1001)).unwrap();
    let pushed = timeout(Duration::from_millis(200), stream.next())
        .await
        .expect("timeout")
        .expect("delivery");
    assert_eq!(pushed.receiver, "B");
    assert_eq!(pushed.message.id, "live");

    assert!(gw.util.disable_real_time_receiving("B"));
    let pulled: Vec<String> = gw.util.get_messages("B").into_iter().map(|m| m.id).collect();
    assert_eq!(pulled, vec!["pending".to_string()]);
}

/// Every receiver in the route gets its own copy.
#[tokio::test]
async fn test_fan_out_to_all_receivers() {
    let gw = gateway(routes(&[("A", &["B", "C"]), ("B", &["C"])]), default_archive).await;

    gw.util.publish(message("a1", "A", 1000)).unwrap();
    gw.util.publish(message("b1", "B", 1001)).unwrap();

    let at_b: Vec<String> = gw.util.get_messages("B").into_iter().map(|m| m.id).collect();
    let mut at_c: Vec<String> = gw.util.get_messages("C").into_iter().map(|m| m.id).collect();
    at_c.sort();
    assert_eq!(at_b, vec!["a1".to_string()]);
    assert_eq!(at_c, vec!["a1".to_string(), "b1".to_string()]);
    assert_eq!(gw.transport.acknowledged(), 3);

    let status = gw.util.bus().status();
    assert_eq!(status.processed_messages(), 2);
    assert_eq!(
        status.published_counts_json(),
        serde_json::json!([
            { "id": "A", "messagecount": 1 },
            { "id": "B", "messagecount": 1 },
            { "id": "C", "messagecount": 0 }
        ])
    );
}

/// History queries return the archived range in order and respect routes.
#[tokio::test]
async fn test_history_query() {
    let gw = gateway(routes(&[("A", &["B"])]), default_archive).await;
    for i in 0..10 {
        gw.util
            .publish(message(&format!("m{i}"), "A", 1000 + i * 100))
            .unwrap();
    }

    let history = gw.util.message_query("A", "B", 1200, 1500).expect("query");
    let ids: Vec<&str> = history.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["m2", "m3", "m4", "m5"]);
    assert!(gw.util.message_query("A", "C", 0, 5000).is_err());
}

/// A tiny capacity budget forces rotation and eviction of the oldest window.
#[tokio::test]
async fn test_small_budget_evicts_oldest_messages() {
    let gw = gateway(routes(&[("A", &["B"])]), |dir| ArchiveConfig {
        base_dir: dir.path().to_path_buf(),
        memory_fraction: 1.0,
        ceiling_bytes: 2_000,
        windows: 4,
        min_window_bytes: 0,
    })
    .await;

    for i in 0..100 {
        gw.util
            .publish(message(&format!("m{i:03}"), "A", 10_000 + i))
            .unwrap();
    }

    let kept = gw.util.message_query("A", "B", 0, i64::MAX).expect("query");
    assert!(!kept.is_empty());
    assert!(kept.len() < 100);
    assert_eq!(kept.last().map(|m| m.id.as_str()), Some("m099"));
    assert!(gw.util.message_query("A", "B", 10_000, 10_005).unwrap().is_empty());

    // Live delivery is unaffected by archive retention.
    assert_eq!(gw.util.get_messages("B").len(), 100);
}

/// Concurrent publishers on the same and different identities lose nothing.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_publish() {
    let gw = gateway(routes(&[("A", &["C"]), ("B", &["C"])]), default_archive).await;
    let util = gw.util.clone();

    let tasks: Vec<_> = (0..4)
        .map(|t| {
            let util = util.clone();
            tokio::task::spawn_blocking(move || {
                let publisher = if t % 2 == 0 { "A" } else { "B" };
                for i in 0..50 {
                    util.publish(message(&format!("{publisher}-{t}-{i}"), publisher, 1000 + i))
                        .unwrap();
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(util.get_messages("C").len(), 200);
    assert_eq!(util.message_query("A", "C", 0, i64::MAX).unwrap().len(), 100);
    assert_eq!(util.message_query("B", "C", 0, i64::MAX).unwrap().len(), 100);
}

/// The sampler publishes a throughput figure while messages flow.
#[tokio::test]
async fn test_throughput_sampled() {
    let gw = gateway(routes(&[("A", &["B"])]), default_archive).await;
    let status = gw.util.bus().status();
    assert_eq!(status.throughput(), 0.0);

    // Keep publishing across several sample periods until one lands.
    let mut sampled = 0.0;
    for i in 0..200 {
        gw.util.publish(message(&format!("m{i}"), "A", 1000 + i)).unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        sampled = status.throughput();
        if sampled > 0.0 {
            break;
        }
    }
    assert!(sampled > 0.0, "no positive throughput sampled");

    gw.util.bus().stop().await;
    assert!(!gw.transport.is_connected());
}
