use super::*;
use std::sync::Arc;

fn entry(name: &str) -> PresenceEntry {
    PresenceEntry {
        connection_handle: ConnectionId(uuid::Uuid::new_v4()),
        display_name: name.to_string(),
    }
}

#[test]
fn entry_serializes_with_wire_field_names() {
    let entry = entry("Alice");
    let raw = entry.encode().expect("encode");
    let value: serde_json::Value = serde_json::from_str(&raw).expect("json");
    assert_eq!(value["displayName"], "Alice");
    assert!(value["connectionHandle"].is_string());
    assert_eq!(PresenceEntry::decode(&raw).expect("decode"), entry);
}

#[tokio::test]
async fn store_load_and_clear_presence() {
    let cache = MemoryPresenceCache::new();
    let user = UserId::from("u1");
    let alice = entry("Alice");
    let owner = alice.connection_handle;

    store_presence(&cache, &user, &alice, PRESENCE_TTL)
        .await
        .expect("store");
    assert_eq!(
        load_presence(&cache, &user).await.expect("load"),
        Some(alice)
    );

    assert!(clear_presence(&cache, &user, owner).await.expect("clear"));
    assert_eq!(load_presence(&cache, &user).await.expect("load"), None);
}

#[tokio::test]
async fn clear_keeps_entry_written_by_another_connection() {
    let cache = MemoryPresenceCache::new();
    let user = UserId::from("u1");
    let stale = entry("Alice");
    let fresh = entry("Alice");

    store_presence(&cache, &user, &fresh, PRESENCE_TTL)
        .await
        .expect("store");
    assert!(!clear_presence(&cache, &user, stale.connection_handle)
        .await
        .expect("clear"));
    assert_eq!(load_presence(&cache, &user).await.expect("load"), Some(fresh));
}

#[tokio::test]
async fn clear_drops_unreadable_entry() {
    let cache = MemoryPresenceCache::new();
    let user = UserId::from("u1");
    cache.set("u1", PRESENCE_TTL, "{not json".into()).await.expect("set");

    assert!(clear_presence(&cache, &user, entry("Alice").connection_handle)
        .await
        .expect("clear"));
    assert!(cache.is_empty().await);
}

#[tokio::test]
async fn rewriting_presence_replaces_previous_entry() {
    let cache = MemoryPresenceCache::new();
    let user = UserId::from("u1");
    store_presence(&cache, &user, &entry("old"), PRESENCE_TTL)
        .await
        .expect("store");
    let replacement = entry("new");
    store_presence(&cache, &user, &replacement, PRESENCE_TTL)
        .await
        .expect("store");

    assert_eq!(
        load_presence(&cache, &user).await.expect("load"),
        Some(replacement)
    );
    assert_eq!(cache.len().await, 1);
}

#[tokio::test]
async fn expired_entries_read_as_absent() {
    let cache = MemoryPresenceCache::new();
    cache
        .set("u1", Duration::ZERO, "stale".into())
        .await
        .expect("set");
    cache
        .set("u2", PRESENCE_TTL, "fresh".into())
        .await
        .expect("set");

    assert_eq!(cache.get("u1").await.expect("get"), None);
    assert_eq!(cache.purge_expired().await, 0);
    assert_eq!(cache.get("u2").await.expect("get").as_deref(), Some("fresh"));
}

#[tokio::test]
async fn purge_drops_only_expired_entries() {
    let cache = MemoryPresenceCache::new();
    cache.set("gone", Duration::ZERO, "x".into()).await.expect("set");
    cache.set("kept", PRESENCE_TTL, "y".into()).await.expect("set");

    assert_eq!(cache.purge_expired().await, 1);
    assert_eq!(cache.len().await, 1);
}

#[tokio::test]
async fn purge_task_sweeps_unread_entries() {
    let cache = Arc::new(MemoryPresenceCache::new());
    cache.set("gone", Duration::ZERO, "x".into()).await.expect("set");
    cache.set("kept", PRESENCE_TTL, "y".into()).await.expect("set");

    let task = tokio::spawn(cache.clone().run_purge(Duration::from_millis(10)));
    for _ in 0..50 {
        if cache.len().await == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    task.abort();

    assert_eq!(cache.len().await, 1);
    assert_eq!(cache.get("kept").await.expect("get").as_deref(), Some("y"));
}

#[tokio::test]
async fn corrupt_entry_surfaces_serialization_error() {
    let cache = MemoryPresenceCache::new();
    cache.set("u1", PRESENCE_TTL, "{not json".into()).await.expect("set");
    let err = load_presence(&cache, &UserId::from("u1"))
        .await
        .expect_err("should fail");
    assert!(matches!(err, CacheError::Serialization(_)));
}

#[tokio::test]
#[ignore] // Requires Redis: docker run -d -p 6379:6379 redis:7
async fn redis_cache_round_trip() {
    let cache = RedisPresenceCache::connect("redis://localhost:6379")
        .await
        .expect("connect");
    let user = UserId::from("presence-cache-test");
    let alice = entry("Alice");
    store_presence(&cache, &user, &alice, PRESENCE_TTL)
        .await
        .expect("store");
    assert!(load_presence(&cache, &user).await.expect("load").is_some());
    clear_presence(&cache, &user, alice.connection_handle)
        .await
        .expect("clear");
    assert!(load_presence(&cache, &user).await.expect("load").is_none());
}
