//! Frontend routes driven through the router, without a listener

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use common::*;
use sessionkv::cluster::{Cluster, ClusterEvent};
use sessionkv::common::{GuardConfig, SessionConfig};
use sessionkv::frontend::{create_router, FrontendState};
use sessionkv::session::BoundResources;
use std::sync::Arc;
use tower::ServiceExt;

fn router(cluster: &Cluster) -> Router {
    let factory = cluster.resources(SessionConfig::default(), GuardConfig::default());
    create_router(FrontendState::new(
        Arc::new(BoundResources::new(factory)),
        "Server1",
    ))
}

async fn get(app: &Router, uri: &str, cookie: Option<&str>) -> Response {
    let mut request = Request::builder().uri(uri);
    if let Some(cookie) = cookie {
        request = request.header(header::COOKIE, cookie);
    }
    app.clone()
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn post_login(app: &Router, username: &str, cookie: Option<&str>) -> Response {
    let mut request = Request::builder()
        .method("POST")
        .uri("/login")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some(cookie) = cookie {
        request = request.header(header::COOKIE, cookie);
    }
    app.clone()
        .oneshot(
            request
                .body(Body::from(format!("username={}", username)))
                .unwrap(),
        )
        .await
        .unwrap()
}

fn location(response: &Response) -> &str {
    response.headers()[header::LOCATION].to_str().unwrap()
}

/// `sid=...` part of the Set-Cookie header
fn session_cookie(response: &Response) -> String {
    let set_cookie = response.headers()[header::SET_COOKIE].to_str().unwrap();
    set_cookie.split(';').next().unwrap().to_string()
}

async fn body_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_login_survives_failover() {
    let (world, cluster) = memory_cluster(&[6379, 6380]);
    let mut events = cluster.subscribe();
    cluster.start().await.unwrap();
    let app = router(&cluster);

    let response = get(&app, "/", None).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/main");

    let response = get(&app, "/main", None).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/login");
    let cookie = session_cookie(&response);

    let response = post_login(&app, "alice", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/main");

    let response = get(&app, "/main", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::OK);
    let page = body_text(response).await;
    assert!(page.contains("Server1"));
    assert!(page.contains("alice"));

    // the primary dies; the session is read from the new one
    world.kill(&endpoint(6379));
    next_event(&mut events, |e| matches!(e, ClusterEvent::PrimaryElected { .. })).await;

    let response = get(&app, "/main", Some(&cookie)).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("alice"));

    let response = get(&app, "/logout", Some(&cookie)).await;
    assert_eq!(location(&response), "/login");
    let response = get(&app, "/main", Some(&cookie)).await;
    assert_eq!(location(&response), "/login");

    cluster.shutdown();
}

#[tokio::test]
async fn test_login_attempts_are_limited() {
    let (_world, cluster) = memory_cluster(&[6379]);
    cluster.start().await.unwrap();
    let app = router(&cluster);

    for _ in 0..3 {
        let response = post_login(&app, "", None).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    let response = post_login(&app, "", None).await;
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let retry_after: u64 = response.headers()[header::RETRY_AFTER]
        .to_str()
        .unwrap()
        .parse()
        .unwrap();
    assert!(retry_after > 0 && retry_after <= 300);

    cluster.shutdown();
}

#[tokio::test]
async fn test_health_reports_degraded_cluster() {
    let (world, cluster) = memory_cluster(&[6379]);
    let mut events = cluster.subscribe();
    cluster.start().await.unwrap();
    let app = router(&cluster);

    let response = get(&app, "/health", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let status: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(status["primary"], "kv-node-1");
    assert_eq!(status["nodes"][0]["role"], "primary");

    world.kill(&endpoint(6379));
    next_event(&mut events, |e| matches!(e, ClusterEvent::Errored { .. })).await;

    let response = get(&app, "/health", None).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let response = get(&app, "/main", None).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    cluster.shutdown();
}
