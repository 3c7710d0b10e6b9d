use std::sync::Arc;
use std::time::{Duration, SystemTime};

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use lectern_server::agent::{AgentConfig, CliAgent};
use lectern_server::chat::gate::ConnectionGate;
use lectern_server::config::{AppState, ServerConfig};
use lectern_server::router;

struct TestSite {
    _dir: tempfile::TempDir,
    app: axum::Router,
}

fn site() -> TestSite {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("welcome.md"), "# Welcome\n\nPublic notes.\n").unwrap();
    std::fs::write(dir.path().join("secret-plans.md"), "# Plans\n\nGated.\n").unwrap();
    std::fs::write(dir.path().join("logo.png"), b"\x89PNG\r\n\x1a\n").unwrap();
    std::fs::write(
        dir.path().join("access.json"),
        r#"{"secret-plans":["alpha","beta"]}"#,
    )
    .unwrap();

    let config = ServerConfig {
        docs_dir: dir.path().to_path_buf(),
        access_file: dir.path().join("access.json"),
        chat_secret: Some("s3cret".to_string()),
        ..ServerConfig::default()
    };
    let state = AppState {
        config: Arc::new(config),
        gate: Arc::new(ConnectionGate::new(1)),
        agent: Arc::new(CliAgent::new(AgentConfig::default())),
    };
    TestSite {
        _dir: dir,
        app: router(state),
    }
}

async fn get(app: &axum::Router, uri: &str) -> (StatusCode, String) {
    let response = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8_lossy(&body).to_string())
}

#[tokio::test]
async fn health_check_responds() {
    let site = site();
    let (status, body) = get(&site.app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("OK"));
}

#[tokio::test]
async fn public_document_renders_without_token() {
    let site = site();
    let (status, body) = get(&site.app, "/welcome").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("<h1>Welcome</h1>"));
}

#[tokio::test]
async fn gated_document_requires_a_listed_token() {
    let site = site();

    let (status, _) = get(&site.app, "/secret-plans").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = get(&site.app, "/secret-plans?token=wrong").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = get(&site.app, "/secret-plans?token=alpha").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("<h1>Plans</h1>"));
}

#[tokio::test]
async fn bearer_header_authorizes_gated_document() {
    let site = site();
    let response = site
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/secret-plans")
                .header(header::AUTHORIZATION, "Bearer beta")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn missing_and_traversal_names_are_uniformly_not_found() {
    let site = site();

    let (status, _) = get(&site.app, "/no-such-doc").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Encoded separator sneaks a '/' into the path segment.
    let (status, _) = get(&site.app, "/..%2Fsecret-plans").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn asset_is_served_with_content_type_and_caching() {
    let site = site();
    let response = site
        .app
        .clone()
        .oneshot(Request::builder().uri("/logo.png").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::CONTENT_TYPE).unwrap(),
        "image/png"
    );
    assert_eq!(
        response.headers().get(header::CACHE_CONTROL).unwrap(),
        "public, max-age=86400"
    );
}

#[tokio::test]
async fn listing_never_reflects_a_raw_token() {
    let site = site();
    let (status, body) = get(
        &site.app,
        "/?token=%22%3E%3Cscript%3Ealert(1)%3C%2Fscript%3E",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!body.contains("<script>"));
    assert!(!body.contains("\"><script"));
    // The token still rides along on the listing links, encoded.
    assert!(body.contains("token=%22%3E%3Cscript%3E"));
}

#[tokio::test]
async fn listing_filters_by_token_and_sorts_newest_first() {
    let site = site();
    // Make the gated document the most recently modified.
    let newer = SystemTime::now() + Duration::from_secs(60);
    std::fs::OpenOptions::new()
        .write(true)
        .open(site._dir.path().join("secret-plans.md"))
        .unwrap()
        .set_modified(newer)
        .unwrap();

    let (status, body) = get(&site.app, "/").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("welcome"));
    assert!(!body.contains("secret-plans"));

    let (status, body) = get(&site.app, "/?token=alpha").await;
    assert_eq!(status, StatusCode::OK);
    let gated_at = body.find("secret-plans").expect("gated doc listed");
    let public_at = body.find("welcome").expect("public doc listed");
    assert!(gated_at < public_at, "newest document should be listed first");
}
