//! Tests for host routing and round-robin rotation

use switchyard::proxy::routing::{RotationPolicy, RouteSnapshot, RoutingTable};

async fn table(policy: RotationPolicy, host: &str, targets: &[&str]) -> RoutingTable {
    let routes = RoutingTable::new(policy);
    for target in targets {
        routes.register(host, target).await;
    }
    routes
}

#[tokio::test]
async fn test_single_target_always_chosen() {
    let routes = table(RotationPolicy::default(), "example.com", &["http://localhost:3000"]).await;

    for _ in 0..5 {
        assert_eq!(
            routes.resolve("example.com").await.as_deref(),
            Some("http://localhost:3000")
        );
    }
}

#[tokio::test]
async fn test_targets_rotate_and_wrap() {
    let routes = table(
        RotationPolicy::default(),
        "example.com",
        &["http://a:1", "http://b:2", "http://c:3"],
    )
    .await;

    let mut picks = Vec::new();
    for _ in 0..7 {
        picks.push(routes.resolve("example.com").await.unwrap());
    }

    assert_eq!(
        picks,
        vec![
            "http://a:1",
            "http://b:2",
            "http://c:3",
            "http://a:1",
            "http://b:2",
            "http://c:3",
            "http://a:1",
        ]
    );
}

#[tokio::test]
async fn test_register_resets_rotation() {
    let routes = table(RotationPolicy::ResetOnRegister, "example.com", &["http://a", "http://b"]).await;

    assert_eq!(routes.resolve("example.com").await.as_deref(), Some("http://a"));

    routes.register("example.com", "http://c").await;

    assert_eq!(routes.resolve("example.com").await.as_deref(), Some("http://a"));
    assert_eq!(routes.resolve("example.com").await.as_deref(), Some("http://b"));
    assert_eq!(routes.resolve("example.com").await.as_deref(), Some("http://c"));
}

#[tokio::test]
async fn test_keep_cursor_continues_rotation() {
    let routes = table(RotationPolicy::KeepCursor, "example.com", &["http://a", "http://b"]).await;

    assert_eq!(routes.resolve("example.com").await.as_deref(), Some("http://a"));

    routes.register("example.com", "http://c").await;

    assert_eq!(routes.resolve("example.com").await.as_deref(), Some("http://b"));
    assert_eq!(routes.resolve("example.com").await.as_deref(), Some("http://c"));
    assert_eq!(routes.resolve("example.com").await.as_deref(), Some("http://a"));
}

#[tokio::test]
async fn test_unknown_and_empty_host() {
    let routes = table(RotationPolicy::default(), "example.com", &["http://a"]).await;

    assert_eq!(routes.resolve("other.com").await, None);
    assert_eq!(routes.resolve("").await, None);
}

#[tokio::test]
async fn test_empty_host_registration_never_resolves() {
    let routes = table(RotationPolicy::default(), "", &["http://a"]).await;
    assert_eq!(routes.resolve("").await, None);
}

#[tokio::test]
async fn test_target_normalization() {
    let routes = RoutingTable::default();
    routes.register("example.com", "localhost:3000").await;
    routes.register("example.com", "https://secure:8443").await;
    routes.register("example.com", "http://plain").await;

    assert_eq!(
        routes.targets("example.com").await.unwrap(),
        vec![
            "http://localhost:3000".to_string(),
            "https://secure:8443".to_string(),
            "http://plain".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_duplicate_targets_are_kept() {
    let routes = table(RotationPolicy::default(), "example.com", &["http://a", "http://a"]).await;

    assert_eq!(routes.targets("example.com").await.unwrap().len(), 2);
    assert_eq!(routes.len().await, 1);
}

#[tokio::test]
async fn test_hosts_rotate_independently() {
    let routes = RoutingTable::default();
    routes.register("a.com", "http://a1").await;
    routes.register("a.com", "http://a2").await;
    routes.register("b.com", "http://b1").await;
    routes.register("b.com", "http://b2").await;

    assert_eq!(routes.resolve("a.com").await.as_deref(), Some("http://a1"));
    assert_eq!(routes.resolve("a.com").await.as_deref(), Some("http://a2"));
    assert_eq!(routes.resolve("b.com").await.as_deref(), Some("http://b1"));
    assert_eq!(routes.resolve("a.com").await.as_deref(), Some("http://a1"));
}

#[tokio::test]
async fn test_from_snapshot_replays_in_order() {
    let snapshot = RouteSnapshot::new()
        .push("example.com", "localhost:1")
        .push("api.example.com", "localhost:2")
        .push("example.com", "localhost:3");

    let routes = RoutingTable::from_snapshot(&snapshot, RotationPolicy::default()).await;

    assert_eq!(routes.len().await, 2);
    assert_eq!(
        routes.targets("example.com").await.unwrap(),
        vec!["http://localhost:1".to_string(), "http://localhost:3".to_string()]
    );

    let entry = routes.entry("example.com").await.unwrap();
    assert_eq!(entry.cursor(), 0);
}

#[tokio::test]
async fn test_replicas_rotate_independently() {
    let snapshot = RouteSnapshot::new()
        .push("example.com", "http://a")
        .push("example.com", "http://b");

    let first = RoutingTable::from_snapshot(&snapshot, RotationPolicy::default()).await;
    let second = RoutingTable::from_snapshot(&snapshot, RotationPolicy::default()).await;

    assert_eq!(first.resolve("example.com").await.as_deref(), Some("http://a"));
    assert_eq!(second.resolve("example.com").await.as_deref(), Some("http://a"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_resolution_is_fair() {
    let routes = table(
        RotationPolicy::default(),
        "example.com",
        &["http://a", "http://b", "http://c", "http://d"],
    )
    .await;

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let routes = routes.clone();
        tasks.push(tokio::spawn(async move {
            let mut picks = Vec::new();
            for _ in 0..50 {
                picks.push(routes.resolve("example.com").await.unwrap());
            }
            picks
        }));
    }

    let mut counts = std::collections::HashMap::new();
    for task in tasks {
        for pick in task.await.unwrap() {
            *counts.entry(pick).or_insert(0) += 1;
        }
    }

    // 400 resolutions over 4 targets: every advance happens under the lock,
    // so the split is exact.
    assert_eq!(counts.len(), 4);
    assert!(counts.values().all(|&n| n == 100));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_registration_on_distinct_hosts() {
    let routes = RoutingTable::default();

    let mut tasks = Vec::new();
    for i in 0..16 {
        let routes = routes.clone();
        tasks.push(tokio::spawn(async move {
            let host = format!("host{}.example.com", i);
            routes.register(&host, "http://a").await;
            routes.register(&host, "http://b").await;
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(routes.len().await, 16);
    for i in 0..16 {
        let host = format!("host{}.example.com", i);
        assert_eq!(routes.targets(&host).await.unwrap().len(), 2);
    }
}
