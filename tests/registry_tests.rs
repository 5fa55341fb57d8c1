//! Integration tests for registered classes: enabling caches on static and
//! instance methods, duplicate registration and per-instance invalidation.

use cacheable::{Cacheable, Class, ErrorCode, MemoryClient, MethodOptions};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct UserData {
    id: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct User {
    data: UserData,
}

impl User {
    fn new(id: u64) -> Self {
        Self {
            data: UserData { id },
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("user {0} not found")]
struct Missing(u64);

/// Call counters for the `User` methods.
#[derive(Default)]
struct Calls {
    get: AtomicUsize,
    article_ids: AtomicUsize,
}

fn user_class(calls: Arc<Calls>) -> Class<User> {
    let for_get = calls.clone();
    let for_articles = calls;
    Class::<User>::new("User")
        .static_method("get", move |(id,): (u64,)| {
            for_get.get.fetch_add(1, Ordering::SeqCst);
            async move {
                if id == 0 {
                    Err(Missing(id))
                } else {
                    Ok(User::new(id))
                }
            }
        })
        .instance_method("article_ids", move |this: Arc<User>, (): ()| {
            for_articles.article_ids.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, Infallible>(vec![1, 2, 3, this.data.id]) }
        })
        .serialized_context()
}

#[tokio::test]
async fn test_static_method_is_cached() {
    let calls = Arc::new(Calls::default());
    let cache = Cacheable::new(MemoryClient::new());
    let users = cache.register(user_class(calls.clone())).unwrap();

    // not yet enabled: every call reaches the method
    let _: User = users.call("get", (1u64,)).await.unwrap();
    let _: User = users.call("get", (1u64,)).await.unwrap();
    assert_eq!(calls.get.load(Ordering::SeqCst), 2);

    users.enable_cache("get").unwrap();
    let first: User = users.call("get", (1u64,)).await.unwrap();
    let second: User = users.call("get", (1u64,)).await.unwrap();
    assert_eq!(first, User::new(1));
    assert_eq!(first, second);
    assert_eq!(calls.get.load(Ordering::SeqCst), 3);

    assert_eq!(
        cache.get("User.get:[1]").await.unwrap(),
        Some(json!({ "data": { "id": 1 } }))
    );
}

#[tokio::test]
async fn test_disable_restores_pass_through() {
    let calls = Arc::new(Calls::default());
    let cache = Cacheable::new(MemoryClient::new());
    let users = cache.register(user_class(calls.clone())).unwrap();

    users.enable_cache("get").unwrap();
    let _: User = users.call("get", (7u64,)).await.unwrap();
    let _: User = users.call("get", (7u64,)).await.unwrap();
    assert_eq!(calls.get.load(Ordering::SeqCst), 1);

    assert!(users.disable_cache("get").unwrap());
    let _: User = users.call("get", (7u64,)).await.unwrap();
    assert_eq!(calls.get.load(Ordering::SeqCst), 2);

    // the stored entry survives and is served again once re-enabled
    users.enable_cache("get").unwrap();
    let _: User = users.call("get", (7u64,)).await.unwrap();
    assert_eq!(calls.get.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_duplicate_registration_keeps_first() {
    let calls = Arc::new(Calls::default());
    let cache = Cacheable::new(MemoryClient::new());
    let users = cache.register(user_class(calls.clone())).unwrap();

    let err = cache.register(Class::<User>::new("Other")).unwrap_err();
    assert_eq!(err.code(), ErrorCode::DuplicateRegistry);
    assert_eq!(err.code().as_str(), "DUPLICATE_REGISTRY");
    assert_eq!(cache.registry().class_names(), vec!["User".to_string()]);

    users.enable_cache("get").unwrap();
    let user: User = users.call("get", (3u64,)).await.unwrap();
    assert_eq!(user.data.id, 3);

    // a later lookup sees the same method table, including its cache state
    let again = cache.class::<User>().unwrap();
    assert!(again.is_enabled("get"));
    let _: User = again.call("get", (3u64,)).await.unwrap();
    assert_eq!(calls.get.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unknown_methods() {
    let cache = Cacheable::new(MemoryClient::new());
    let users = cache
        .register(user_class(Arc::new(Calls::default())))
        .unwrap();

    assert_eq!(
        users.enable_cache("delete").unwrap_err().code(),
        ErrorCode::NotFound
    );
    // `get` is static, `.get` would be an instance method
    assert_eq!(
        users.enable_cache(".get").unwrap_err().code(),
        ErrorCode::NotFound
    );
    assert_eq!(
        users
            .call::<User, _>("article_ids", ())
            .await
            .unwrap_err()
            .code(),
        ErrorCode::NotFound
    );
    assert!(cache.class::<String>().is_none());
}

#[tokio::test]
async fn test_upstream_errors_are_not_cached() {
    let calls = Arc::new(Calls::default());
    let cache = Cacheable::new(MemoryClient::new());
    let users = cache.register(user_class(calls.clone())).unwrap();
    users.enable_cache("get").unwrap();

    for _ in 0..2 {
        let err = users.call::<User, _>("get", (0u64,)).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::Upstream);
        assert_eq!(err.upstream_ref::<Missing>().map(|m| m.0), Some(0));
    }
    assert_eq!(calls.get.load(Ordering::SeqCst), 2);
    assert_eq!(cache.get("User.get:[0]").await.unwrap(), None);
}

#[tokio::test]
async fn test_instances_are_isolated() {
    let calls = Arc::new(Calls::default());
    let cache = Cacheable::new(MemoryClient::new());
    let users = cache.register(user_class(calls.clone())).unwrap();
    users.enable_cache("get").unwrap();
    users.enable_cache(".article_ids").unwrap();

    let a = users.instance(User::new(1));
    let b = users.instance(User::new(2));
    assert_ne!(a.id(), b.id());

    let ids: Vec<u64> = a.call("article_ids", ()).await.unwrap();
    assert_eq!(ids, vec![1, 2, 3, 1]);
    let ids: Vec<u64> = b.call("article_ids", ()).await.unwrap();
    assert_eq!(ids, vec![1, 2, 3, 2]);
    let _: Vec<u64> = a.call("article_ids", ()).await.unwrap();
    let _: Vec<u64> = b.call("article_ids", ()).await.unwrap();
    assert_eq!(calls.article_ids.load(Ordering::SeqCst), 2);

    let _: User = users.call("get", (1u64,)).await.unwrap();
    assert_eq!(calls.get.load(Ordering::SeqCst), 1);

    a.clear_cache().await.unwrap();
    assert!(a.cached_keys().is_empty());
    assert_eq!(b.cached_keys().len(), 1);

    // A recomputes, B and the static entry are still cached
    let _: Vec<u64> = a.call("article_ids", ()).await.unwrap();
    let _: Vec<u64> = b.call("article_ids", ()).await.unwrap();
    let _: User = users.call("get", (1u64,)).await.unwrap();
    assert_eq!(calls.article_ids.load(Ordering::SeqCst), 3);
    assert_eq!(calls.get.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_instance_template_with_context() {
    let calls = Arc::new(Calls::default());
    let cache = Cacheable::new(MemoryClient::new());
    let users = cache.register(user_class(calls.clone())).unwrap();
    users
        .enable_cache_with(
            ".article_ids",
            MethodOptions::new().template("articles:{this.data.id}"),
        )
        .unwrap();

    let first = users.instance_with_id(User::new(9), "a");
    let ids: Vec<u64> = first.call("article_ids", ()).await.unwrap();
    assert_eq!(ids, vec![1, 2, 3, 9]);
    // the instance id is appended to templates that lack it
    assert_eq!(first.cached_keys(), vec!["articles:9#a".to_string()]);
    assert_eq!(
        cache.get_as::<Vec<u64>>("articles:9#a").await.unwrap(),
        Some(vec![1, 2, 3, 9])
    );

    // another instance of the same user gets its own entry
    let second = users.instance_with_id(User::new(9), "b");
    let _: Vec<u64> = second.call("article_ids", ()).await.unwrap();
    assert_eq!(calls.article_ids.load(Ordering::SeqCst), 2);

    first.clear_cache().await.unwrap();
    assert_eq!(cache.get("articles:9#a").await.unwrap(), None);
    assert!(cache.get("articles:9#b").await.unwrap().is_some());
    let _: Vec<u64> = second.call("article_ids", ()).await.unwrap();
    assert_eq!(calls.article_ids.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_template_without_id_stays_per_instance() {
    let calls = Arc::new(Calls::default());
    let cache = Cacheable::new(MemoryClient::new());
    let users = cache.register(user_class(calls.clone())).unwrap();
    users
        .enable_cache_with(".article_ids", MethodOptions::new().template("ids"))
        .unwrap();

    let a = users.instance(User::new(1));
    let b = users.instance(User::new(2));
    let ids: Vec<u64> = a.call("article_ids", ()).await.unwrap();
    assert_eq!(ids, vec![1, 2, 3, 1]);
    let ids: Vec<u64> = b.call("article_ids", ()).await.unwrap();
    assert_eq!(ids, vec![1, 2, 3, 2]);

    a.clear_cache().await.unwrap();
    let ids: Vec<u64> = b.call("article_ids", ()).await.unwrap();
    assert_eq!(ids, vec![1, 2, 3, 2]);
    assert_eq!(calls.article_ids.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_explicit_ids_do_not_collide_with_generated_ones() {
    let calls = Arc::new(Calls::default());
    let cache = Cacheable::new(MemoryClient::new());
    let users = cache.register(user_class(calls.clone())).unwrap();
    users.enable_cache(".article_ids").unwrap();

    let named = users.instance_with_id(User::new(1), "1");
    let generated = users.instance(User::new(2));
    let escaped = users.instance_with_id(User::new(3), generated.id().to_string());
    assert_ne!(named.id(), generated.id());
    assert_ne!(escaped.id(), generated.id());

    let ids: Vec<u64> = named.call("article_ids", ()).await.unwrap();
    assert_eq!(ids, vec![1, 2, 3, 1]);
    let ids: Vec<u64> = generated.call("article_ids", ()).await.unwrap();
    assert_eq!(ids, vec![1, 2, 3, 2]);
    let ids: Vec<u64> = escaped.call("article_ids", ()).await.unwrap();
    assert_eq!(ids, vec![1, 2, 3, 3]);
    assert_eq!(calls.article_ids.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_instances_with_shared_id() {
    let calls = Arc::new(Calls::default());
    let cache = Cacheable::new(MemoryClient::new());
    let users = cache.register(user_class(calls.clone())).unwrap();
    users.enable_cache(".article_ids").unwrap();

    let first = users.instance_with_id(User::new(4), "u4");
    let second = users.instance_with_id(User::new(4), "u4");
    let _: Vec<u64> = first.call("article_ids", ()).await.unwrap();
    let _: Vec<u64> = second.call("article_ids", ()).await.unwrap();
    assert_eq!(calls.article_ids.load(Ordering::SeqCst), 1);
    assert_eq!(
        cache.get("User.article_ids#u4:[]").await.unwrap(),
        Some(json!([1, 2, 3, 4]))
    );
}

#[cfg(feature = "stats")]
#[tokio::test]
async fn test_method_stats() {
    let cache = Cacheable::new(MemoryClient::new());
    let users = cache
        .register(user_class(Arc::new(Calls::default())))
        .unwrap();
    users.enable_cache("get").unwrap();

    let _: User = users.call("get", (1u64,)).await.unwrap();
    let _: User = users.call("get", (1u64,)).await.unwrap();
    let _ = users.call::<User, _>("get", (0u64,)).await;

    let stats = users.stats("get").unwrap();
    assert_eq!(stats.hits(), 1);
    assert_eq!(stats.misses(), 2);
    assert_eq!(stats.errors(), 1);
    assert!(users.stats(".get").is_none());
}
