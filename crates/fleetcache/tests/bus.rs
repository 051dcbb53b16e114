//! Command and entity buses over a real Redis pub/sub channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use fleetcache::config::BusConfig;
use fleetcache::{CommandBus, EntityBus, commands};
use parking_lot::Mutex;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;

static SHARED_REDIS: OnceCell<(ContainerAsync<Redis>, String)> = OnceCell::const_new();

async fn redis_address() -> String {
    let (_, address) = SHARED_REDIS
        .get_or_init(|| async {
            let container = Redis::default()
                .start()
                .await
                .expect("start redis container");
            let host_port = container.get_host_port_ipv4(6379).await.expect("get port");
            (container, format!("127.0.0.1:{host_port}"))
        })
        .await;
    address.clone()
}

const READY: Duration = Duration::from_secs(10);

async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..50 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    check()
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn commands_reach_only_their_callback() {
    let config = BusConfig::new(redis_address().await, "test-commands");
    let bus = CommandBus::new(config.clone());

    let rebuilds = Arc::new(AtomicUsize::new(0));
    let clears = Arc::new(AtomicUsize::new(0));
    let r = rebuilds.clone();
    bus.subscribe(commands::REBUILD_CACHE, move || {
        r.fetch_add(1, Ordering::SeqCst);
    });
    let c = clears.clone();
    bus.subscribe(commands::CLEAR_INTERNAL_CACHE, move || {
        c.fetch_add(1, Ordering::SeqCst);
    });

    let handle = bus.start().unwrap();
    assert!(handle.wait_ready(READY).await);

    // a second instance publishing on the same channel
    let sender = CommandBus::new(config);
    let receivers = sender.send(commands::REBUILD_CACHE).await.unwrap();
    assert_eq!(receivers, 1);

    assert!(eventually(|| rebuilds.load(Ordering::SeqCst) == 1).await);
    assert_eq!(clears.load(Ordering::SeqCst), 0);

    bus.unsubscribe(commands::REBUILD_CACHE);
    sender.send(commands::REBUILD_CACHE).await.unwrap();
    sender.send(commands::CLEAR_INTERNAL_CACHE).await.unwrap();
    assert!(eventually(|| clears.load(Ordering::SeqCst) == 1).await);
    assert_eq!(rebuilds.load(Ordering::SeqCst), 1);

    handle.shutdown().await;
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn entity_updates_fan_out_by_type() {
    let config = BusConfig::new(redis_address().await, "test-entities");
    let bus = EntityBus::new(config);

    let series = Arc::new(Mutex::new(Vec::new()));
    let everything = Arc::new(Mutex::new(Vec::new()));
    let s = series.clone();
    bus.subscribe("mrs-serie", move |id| s.lock().push(id.to_string()));
    let e = everything.clone();
    bus.subscribe_all(move |id| e.lock().push(id.to_string()));

    let handle = bus.start().unwrap();
    assert!(handle.wait_ready(READY).await);

    bus.send("mrs-serie-123").await.unwrap();
    bus.send("mrs-chapter-9").await.unwrap();

    assert!(eventually(|| everything.lock().len() == 2).await);
    assert_eq!(*series.lock(), vec!["mrs-serie-123"]);

    handle.shutdown().await;
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn shutdown_stops_delivery() {
    let config = BusConfig::new(redis_address().await, "test-shutdown")
        .with_keepalive(Duration::from_secs(1));
    let bus = CommandBus::new(config);
    let hits = Arc::new(AtomicUsize::new(0));
    let h = hits.clone();
    bus.subscribe("ping", move || {
        h.fetch_add(1, Ordering::SeqCst);
    });

    let handle = bus.start().unwrap();
    assert!(handle.wait_ready(READY).await);
    // survives a few keepalive rounds
    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(handle.is_ready());

    handle.shutdown().await;
    assert_eq!(bus.send("ping").await.unwrap(), 0);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(hits.load(Ordering::SeqCst), 0);
}
