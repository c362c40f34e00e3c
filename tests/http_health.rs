//! HTTP transport surface test: the `/health` route used by platform
//! liveness probes, exercised without binding a real socket.

use backtest_optimizer_mcp::server::http_router;
use http_body_util::BodyExt;
use tower::ServiceExt;

#[tokio::test]
async fn health_route_returns_ok() {
    let tmp = tempfile::tempdir().unwrap();
    let app = http_router(tmp.path().to_path_buf());

    let request = axum::http::Request::builder()
        .uri("/health")
        .body(axum::body::Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), axum::http::StatusCode::OK);

    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(&body[..], b"ok");
}
