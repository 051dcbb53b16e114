//! Integration tests for the cache client against a real Redis.
//!
//! Tests use testcontainers to spin up a shared Redis instance and are
//! ignored by default; run them with `cargo test -- --ignored`.

use std::time::Duration;

use fleetcache::config::ConnectionConfig;
use fleetcache::{AppConfig, Batch, CacheContext, CacheValue, HashItem};
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::redis::Redis;
use tokio::sync::OnceCell;

// Shared Redis container for all tests
static SHARED_REDIS: OnceCell<(ContainerAsync<Redis>, String)> = OnceCell::const_new();

async fn get_redis_url() -> String {
    let (_, url) = SHARED_REDIS
        .get_or_init(|| async {
            let container = Redis::default()
                .start()
                .await
                .expect("start redis container");
            let host_port = container.get_host_port_ipv4(6379).await.expect("get port");
            let url = format!("redis://127.0.0.1:{host_port}");
            (container, url)
        })
        .await;
    url.clone()
}

const CONN: u32 = 1;

async fn context() -> CacheContext {
    let config = AppConfig {
        connections: vec![ConnectionConfig {
            id: CONN,
            address: get_redis_url().await,
            db: 0,
            timeout_ms: 5000,
            ttl_secs: 600,
            pool_size: 4,
        }],
        ..AppConfig::default()
    };
    CacheContext::from_config(config).expect("context")
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn compressed_value_round_trip_and_expiry() {
    let ctx = context().await;
    let client = ctx.client();

    // low-entropy payload compresses well past the size gate
    let payload: Vec<u8> = (0..2000).map(|i| b'a' + (i % 4) as u8).collect();
    client.set_z(CONN, "e2e:z", &payload).await;

    let raw = client.get(CONN, "e2e:z").await;
    let raw_len = raw.as_bytes().map(<[u8]>::len).unwrap_or_default();
    assert!(raw_len > 0 && raw_len < payload.len());
    assert_eq!(client.get_z(CONN, "e2e:z").await.as_bytes(), Some(payload.as_slice()));

    client.hset_u32(CONN, "e2e:h", "count", 42).await;
    assert_eq!(client.hget_u32(CONN, "e2e:h", "count", 0).await, 42);
    assert_eq!(client.hget_u32(CONN, "e2e:h", "missing", 7).await, 7);

    client
        .set_with_ttl(CONN, "e2e:ttl", "v", Duration::from_secs(5))
        .await;
    assert!(client.exists(CONN, "e2e:ttl").await);
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(!client.exists(CONN, "e2e:ttl").await);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn misses_fall_back_to_defaults() {
    let ctx = context().await;
    let client = ctx.client();

    assert_eq!(client.get(CONN, "miss:nothing").await, CacheValue::Absent);
    assert_eq!(client.get_int(CONN, "miss:nothing", -1).await, -1);
    assert_eq!(client.get_string(CONN, "miss:nothing", "dflt").await, "dflt");

    // unknown connection id reads as a miss too
    assert_eq!(client.get(99, "miss:nothing").await, CacheValue::Absent);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn bulk_reads_keep_input_order() {
    let ctx = context().await;
    let client = ctx.client();

    client
        .mset(CONN, &[("order:a", "1"), ("order:c", "3")])
        .await;
    let values = client
        .mget(CONN, &["order:a", "order:b", "order:c"])
        .await;
    assert_eq!(values[0].as_str(), Some("1"));
    assert!(values[1].is_absent());
    assert_eq!(values[2].as_str(), Some("3"));

    client.hset(CONN, "order:h1", "f", "x").await;
    client.hset(CONN, "order:h2", "f", "y").await;
    let items = [
        HashItem::new("order:h2", "f"),
        HashItem::new("order:none", "f"),
        HashItem::new("order:h1", "f"),
    ];
    let values = client.hget_multiple(CONN, &items).await;
    assert_eq!(values[0].as_str(), Some("y"));
    assert!(values[1].is_absent());
    assert_eq!(values[2].as_str(), Some("x"));

    // a wrong-type sibling does not poison the rest of the batch
    client.lpush(CONN, "order:list", &["z"], Duration::ZERO).await;
    let mut batch = Batch::new();
    batch
        .push(redis::cmd("GET").arg("order:a").clone())
        .push(redis::cmd("GET").arg("order:list").clone())
        .push(redis::cmd("GET").arg("order:c").clone());
    let replies = client.fetch(CONN, &batch).await;
    assert_eq!(replies.len(), 3);
    assert_eq!(CacheValue::from(replies[0].clone()).as_str(), Some("1"));
    assert_eq!(replies[1], redis::Value::Nil);
    assert_eq!(CacheValue::from(replies[2].clone()).as_str(), Some("3"));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn hash_writes_refresh_default_ttl() {
    let ctx = context().await;
    let client = ctx.client();

    client
        .hmset(CONN, "touch:h", &[("a", "1"), ("b", "2")])
        .await;
    let ttl = client.ttl_multiple(CONN, &["touch:h", "touch:none"]).await;
    assert!(ttl[0] > Duration::from_secs(590));
    assert_eq!(ttl[1], Duration::ZERO);

    let all = client.hget_all(CONN, "touch:h").await;
    assert_eq!(all.len(), 2);
    assert_eq!(all["b"].as_str(), Some("2"));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn scan_finds_every_matching_key() {
    let ctx = context().await;
    let client = ctx.client();

    let pairs: Vec<(String, u32)> = (0..2500).map(|i| (format!("scan:{i}"), i)).collect();
    client.mset(CONN, &pairs).await;
    client.set(CONN, "other:1", 1).await;

    let keys = client.scan(CONN, "scan:*").await;
    assert_eq!(keys.len(), 2500);
    assert!(keys.iter().all(|k| k.starts_with("scan:")));

    assert_eq!(client.delete_pattern(CONN, "scan:*").await, 2500);
    assert!(client.scan(CONN, "scan:*").await.is_empty());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn script_reads_fields_from_many_hashes() {
    let ctx = context().await;
    let client = ctx.client();

    client
        .hmset(CONN, "script:1", &[("name", "one"), ("rank", "1")])
        .await;
    client.hmset(CONN, "script:2", &[("name", "two")]).await;

    let keys = vec!["script:1".to_string(), "script:missing".into(), "script:2".into()];
    let fields = vec!["rank".to_string(), "name".into()];
    let maps = client.hmget_keys(CONN, &keys, &fields).await.unwrap();

    assert_eq!(maps.len(), 3);
    assert_eq!(maps[0]["name"].as_str(), Some("one"));
    assert_eq!(maps[0]["rank"].as_str(), Some("1"));
    assert!(maps[1].values().all(CacheValue::is_absent));
    assert_eq!(maps[2]["name"].as_str(), Some("two"));
    assert!(maps[2]["rank"].is_absent());
    assert_eq!(maps[0].keys().collect::<Vec<_>>(), vec!["rank", "name"]);

    // flushed scripts are reloaded transparently
    assert!(ctx.scripts().sha(CONN).is_some());
    let _: () = client
        .query(CONN, redis::cmd("SCRIPT").arg("FLUSH"))
        .await
        .unwrap();
    let maps = client.hmget_keys(CONN, &keys, &fields).await.unwrap();
    assert_eq!(maps[2]["name"].as_str(), Some("two"));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn lists_and_sets() {
    let ctx = context().await;
    let client = ctx.client();

    client
        .lset_elements(CONN, "ls:list", &["a", "b"], Duration::from_secs(60))
        .await;
    client
        .lset_elements(CONN, "ls:list", &["c", "d", "e"], Duration::from_secs(60))
        .await;
    assert_eq!(client.lrange_all(CONN, "ls:list").await, vec!["e", "d", "c"]);

    client.sadd(CONN, "ls:s1", &["x", "y"]).await;
    client.sadd(CONN, "ls:s2", &["y", "z"]).await;
    assert!(client.sismember(CONN, "ls:s1", "x").await);
    assert_eq!(
        client.msismember(CONN, &["ls:s1", "ls:s2"], "x").await,
        vec![true, false]
    );
    let mut union = client.sunion(CONN, &["ls:s1", "ls:s2"]).await;
    union.sort();
    assert_eq!(union, vec!["x", "y", "z"]);

    client
        .mset_remove_member(CONN, &["ls:s1", "ls:s2"], "y")
        .await;
    let members = client.msmembers(CONN, &["ls:s1", "ls:s2"]).await;
    assert_eq!(members, vec![vec!["x".to_string()], vec!["z".to_string()]]);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn status_ping_reaches_every_connection() {
    let ctx = context().await;
    for id in ctx.registry().ids() {
        let conn = ctx.registry().resolve(id).unwrap();
        conn.ping().await.expect("ping");
    }
}
