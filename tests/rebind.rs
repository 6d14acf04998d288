//! Resource rebinding across a failover

mod common;

use common::*;
use sessionkv::cluster::ClusterEvent;
use sessionkv::common::{GuardConfig, SessionConfig};
use sessionkv::session::{BoundResources, GuardDecision, SessionData};
use sessionkv::Error;

fn data(user: &str) -> SessionData {
    let mut data = SessionData::new();
    data.insert("login".into(), serde_json::json!(user));
    data
}

#[tokio::test]
async fn test_factory_binds_current_primary() {
    let (_world, cluster) = memory_cluster(&[6379, 6380]);
    cluster.start().await.unwrap();

    let factory = cluster.resources(SessionConfig::default(), GuardConfig::default());
    let store = factory.session_resource().unwrap();
    assert_eq!(store.node().label(), "kv-node-1");

    store.save("s1", &data("alice")).await.unwrap();
    assert_eq!(store.load("s1").await.unwrap(), Some(data("alice")));
    store.destroy("s1").await.unwrap();
    assert_eq!(store.load("s1").await.unwrap(), None);

    let guard = factory.login_guard_resource().unwrap();
    assert_eq!(guard.node().label(), "kv-node-1");

    cluster.shutdown();
}

#[tokio::test]
async fn test_session_rebinds_after_failover() {
    let (world, cluster) = memory_cluster(&[6379, 6380]);
    let mut events = cluster.subscribe();
    cluster.start().await.unwrap();

    let resources = BoundResources::new(
        cluster.resources(SessionConfig::default(), GuardConfig::default()),
    );
    let first = resources.session().unwrap();
    assert_eq!(first.generation(), 1);
    first.save("s1", &data("alice")).await.unwrap();

    // replicated to B before the failover
    assert!(world.read(&endpoint(6380), "sess:s1").is_some());

    world.kill(&endpoint(6379));
    next_event(&mut events, |e| matches!(e, ClusterEvent::PrimaryElected { .. })).await;

    let err = first.load("s1").await.unwrap_err();
    assert!(matches!(err, Error::StaleBinding(_)));
    assert!(err.is_retryable());

    let second = resources.rebind_session(first.generation()).unwrap();
    assert_eq!(second.generation(), 2);
    assert_eq!(second.node().label(), "kv-node-2");
    assert_eq!(second.load("s1").await.unwrap(), Some(data("alice")));

    // a handler still holding the old generation gets the same new binding
    let again = resources.rebind_session(first.generation()).unwrap();
    assert_eq!(again.generation(), 2);
    assert_eq!(resources.generation(), 2);

    cluster.shutdown();
}

#[tokio::test]
async fn test_login_guard_follows_session_generation() {
    let (world, cluster) = memory_cluster(&[6379, 6380]);
    let mut events = cluster.subscribe();
    cluster.start().await.unwrap();

    let resources = BoundResources::new(
        cluster.resources(SessionConfig::default(), GuardConfig::default()),
    );
    let guard = resources.login_guard().unwrap();
    assert_eq!(guard.generation(), 1);
    assert!(matches!(
        guard.check("10.0.0.1").await.unwrap(),
        GuardDecision::Allowed { remaining: 2 }
    ));
    // unchanged while the session binding is
    assert_eq!(resources.login_guard().unwrap().generation(), 1);

    world.kill(&endpoint(6379));
    next_event(&mut events, |e| matches!(e, ClusterEvent::PrimaryElected { .. })).await;

    assert!(guard.check("10.0.0.1").await.is_err());
    resources.rebind_session(guard.generation()).unwrap();

    let rebuilt = resources.login_guard().unwrap();
    assert_eq!(rebuilt.generation(), 2);
    assert_eq!(rebuilt.node().label(), "kv-node-2");
    assert!(rebuilt.check("10.0.0.1").await.unwrap().is_allowed());

    cluster.shutdown();
}

#[tokio::test]
async fn test_degraded_cluster_has_no_resources() {
    let (world, cluster) = memory_cluster(&[6379]);
    let mut events = cluster.subscribe();
    cluster.start().await.unwrap();

    let resources = BoundResources::new(
        cluster.resources(SessionConfig::default(), GuardConfig::default()),
    );
    let bound = resources.session().unwrap();

    world.kill(&endpoint(6379));
    next_event(&mut events, |e| matches!(e, ClusterEvent::Errored { .. })).await;

    assert!(matches!(
        resources.rebind_session(bound.generation()),
        Err(Error::DegradedCluster)
    ));
    assert!(matches!(
        cluster
            .resources(SessionConfig::default(), GuardConfig::default())
            .login_guard_resource(),
        Err(Error::DegradedCluster)
    ));

    cluster.shutdown();
}
