use super::*;
use async_trait::async_trait;
use presence_cache::{load_presence, CacheError};
use shared::{
    domain::{NewNotification, ParticipantModel, UserId},
    error::ChatError,
    protocol::RegisterCommand,
};

async fn memory_context() -> ApiContext {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    ApiContext::new(storage)
}

fn register_command(user: &str, name: &str) -> RegisterCommand {
    RegisterCommand {
        user_id: UserId::from(user),
        name: name.to_string(),
    }
}

struct FailingCache;

#[async_trait]
impl PresenceCache for FailingCache {
    async fn set(&self, _key: &str, _ttl: Duration, _value: String) -> Result<(), CacheError> {
        Err(CacheError::Backend("connection refused".into()))
    }

    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        Err(CacheError::Backend("connection refused".into()))
    }

    async fn delete(&self, _key: &str) -> Result<(), CacheError> {
        Err(CacheError::Backend("connection refused".into()))
    }

    async fn delete_if_eq(&self, _key: &str, _expected: &str) -> Result<bool, CacheError> {
        Err(CacheError::Backend("connection refused".into()))
    }
}

#[tokio::test]
async fn register_returns_unread_backlog_and_tags_connection() {
    let ctx = memory_context().await;
    ctx.storage
        .create_notification(&NewNotification {
            from: UserId::from("u2"),
            sender_model: ParticipantModel::Vendor,
            message: "are you free on friday?".into(),
            to: UserId::from("u1"),
            receiver_model: ParticipantModel::Client,
        })
        .await
        .expect("notification");

    let (handle, _rx) = ConnectionHandle::channel(8);
    let mut session = Session::new(handle.clone());
    let pending = session
        .register(&ctx, register_command("u1", "Alice"))
        .await
        .expect("register");

    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].message, "are you free on friday?");
    assert_eq!(session.user_id(), Some(&UserId::from("u1")));

    let record = ctx.registry.get(&UserId::from("u1")).await.expect("record");
    assert_eq!(record.handle.id(), handle.id());
    assert_eq!(record.display_name, "Alice");

    let entry = load_presence(ctx.presence.as_ref(), &UserId::from("u1"))
        .await
        .expect("load")
        .expect("presence entry");
    assert_eq!(entry.connection_handle, handle.id());
}

#[tokio::test]
async fn register_with_blank_identity_is_rejected() {
    let ctx = memory_context().await;
    let (handle, _rx) = ConnectionHandle::channel(8);
    let mut session = Session::new(handle);

    let err = session
        .register(&ctx, register_command("u1", "  "))
        .await
        .expect_err("blank name");
    assert_eq!(err, ChatError::InvalidRegistration);
    assert!(!session.is_registered());
    assert!(ctx.registry.get(&UserId::from("u1")).await.is_none());
}

#[tokio::test]
async fn disconnect_clears_registry_and_presence() {
    let ctx = memory_context().await;
    let (handle, _rx) = ConnectionHandle::channel(8);
    let mut session = Session::new(handle);
    session
        .register(&ctx, register_command("u1", "Alice"))
        .await
        .expect("register");

    session.disconnect(&ctx, Some("client closed")).await;

    assert!(ctx.registry.get(&UserId::from("u1")).await.is_none());
    assert_eq!(
        load_presence(ctx.presence.as_ref(), &UserId::from("u1"))
            .await
            .expect("load"),
        None
    );
}

#[tokio::test]
async fn stale_disconnect_keeps_newer_registration() {
    let ctx = memory_context().await;
    let (first, _rx1) = ConnectionHandle::channel(8);
    let (second, _rx2) = ConnectionHandle::channel(8);

    let mut old_session = Session::new(first);
    old_session
        .register(&ctx, register_command("u1", "Alice"))
        .await
        .expect("register");
    let mut new_session = Session::new(second.clone());
    new_session
        .register(&ctx, register_command("u1", "Alice"))
        .await
        .expect("register");

    old_session.disconnect(&ctx, None).await;

    let record = ctx.registry.get(&UserId::from("u1")).await.expect("record");
    assert_eq!(record.handle.id(), second.id());
    assert!(load_presence(ctx.presence.as_ref(), &UserId::from("u1"))
        .await
        .expect("load")
        .is_some());
}

#[tokio::test]
async fn reregistering_as_another_user_releases_the_first() {
    let ctx = memory_context().await;
    let (handle, _rx) = ConnectionHandle::channel(8);
    let mut session = Session::new(handle);

    session
        .register(&ctx, register_command("u1", "Alice"))
        .await
        .expect("register");
    session
        .register(&ctx, register_command("u3", "Carol"))
        .await
        .expect("register");

    assert!(ctx.registry.get(&UserId::from("u1")).await.is_none());
    assert!(ctx.registry.get(&UserId::from("u3")).await.is_some());
    assert_eq!(session.user_id(), Some(&UserId::from("u3")));
}

#[tokio::test]
async fn unavailable_presence_cache_does_not_fail_registration() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let ctx = ApiContext::with_presence(storage, Arc::new(FailingCache), PRESENCE_TTL);
    let (handle, _rx) = ConnectionHandle::channel(8);
    let mut session = Session::new(handle);

    let pending = session
        .register(&ctx, register_command("u1", "Alice"))
        .await
        .expect("register despite cache outage");
    assert!(pending.is_empty());
    assert!(ctx.registry.get(&UserId::from("u1")).await.is_some());

    session.disconnect(&ctx, None).await;
    assert!(ctx.registry.get(&UserId::from("u1")).await.is_none());
}

#[tokio::test]
async fn register_fails_when_storage_is_down() {
    let ctx = memory_context().await;
    ctx.storage.pool().close().await;
    let (handle, _rx) = ConnectionHandle::channel(8);

    let err = register(&ctx, &handle, &register_command("u1", "Alice"))
        .await
        .expect_err("closed pool");
    assert!(matches!(err, ChatError::ExternalStoreUnavailable(_)));
    assert!(ctx.registry.get(&UserId::from("u1")).await.is_none());
}

#[tokio::test]
async fn registry_put_overwrites_previous_connection() {
    let registry = InMemoryConnectionRegistry::new();
    let (first, _rx1) = ConnectionHandle::channel(1);
    let (second, _rx2) = ConnectionHandle::channel(1);
    let user = UserId::from("u1");

    registry.put(user.clone(), first, "Alice".into()).await;
    registry.put(user.clone(), second.clone(), "Alice".into()).await;

    assert_eq!(registry.len().await, 1);
    assert_eq!(registry.get(&user).await.expect("record").handle.id(), second.id());
    assert!(registry.remove(&user).await.is_some());
    assert!(registry.is_empty().await);
}

#[tokio::test]
async fn registry_remove_if_only_removes_the_owner() {
    let registry = InMemoryConnectionRegistry::new();
    let (first, _rx1) = ConnectionHandle::channel(1);
    let (second, _rx2) = ConnectionHandle::channel(1);
    let user = UserId::from("u1");

    registry.put(user.clone(), second.clone(), "Alice".into()).await;
    assert!(!registry.remove_if(&user, first.id()).await);
    assert!(registry.get(&user).await.is_some());

    assert!(registry.remove_if(&user, second.id()).await);
    assert!(registry.is_empty().await);
    assert!(!registry.remove_if(&user, second.id()).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_disconnect_never_evicts_the_newer_connection() {
    let ctx = memory_context().await;

    for round in 0..50 {
        let user = UserId::new(format!("racer-{round}"));
        let (first, _rx1) = ConnectionHandle::channel(4);
        let (second, _rx2) = ConnectionHandle::channel(4);

        let mut old_session = Session::new(first);
        old_session
            .register(&ctx, register_command(user.as_str(), "Alice"))
            .await
            .expect("register");

        let leaving = {
            let ctx = ctx.clone();
            tokio::spawn(async move { old_session.disconnect(&ctx, Some("network lost")).await })
        };
        let arriving = {
            let ctx = ctx.clone();
            let command = register_command(user.as_str(), "Alice");
            let second = second.clone();
            tokio::spawn(async move {
                let mut session = Session::new(second);
                session.register(&ctx, command).await.expect("register");
                session
            })
        };
        leaving.await.expect("disconnect task");
        let _new_session = arriving.await.expect("register task");

        let record = ctx.registry.get(&user).await.expect("newer record survives");
        assert_eq!(record.handle.id(), second.id());
        let entry = load_presence(ctx.presence.as_ref(), &user)
            .await
            .expect("load")
            .expect("newer presence survives");
        assert_eq!(entry.connection_handle, second.id());
    }
}
