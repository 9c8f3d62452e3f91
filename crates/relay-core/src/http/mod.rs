//! HTTP surface: router, CORS and the server entry point.
//!
//! | route | methods |
//! |-------|---------|
//! | `/api/execute` | `POST` |
//! | `<callback-path>` (default `/callback`) | `POST` |
//! | `/api/execute-voice-callback` | `POST` (legacy alias of the callback) |
//! | `/health`, `/status` | `GET` |
//!
//! Every route answers `OPTIONS` with 200.

pub mod error;
pub mod routes;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::{HeaderValue, Method, header};
use axum::routing::{MethodRouter, get, post};
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::app::Broker;
use crate::config::CorsConfig;

pub use self::error::{ApiError, CallbackAck, ErrorBody, Surface};

pub const EXECUTE_PATH: &str = "/api/execute";
pub const LEGACY_CALLBACK_PATH: &str = "/api/execute-voice-callback";

/// Build the application router around a shared broker.
pub fn router(broker: Arc<Broker>, cors: &CorsConfig) -> Router {
    let callback_path = broker.callback_path().to_string();

    let mut router = Router::new()
        .route(
            EXECUTE_PATH,
            post(routes::execute)
                .options(routes::preflight)
                .fallback(routes::execute_method_not_allowed),
        )
        .route(&callback_path, callback_route());
    if callback_path != LEGACY_CALLBACK_PATH {
        router = router.route(LEGACY_CALLBACK_PATH, callback_route());
    }

    router
        .route("/health", get(routes::health).options(routes::preflight))
        .route("/status", get(routes::status).options(routes::preflight))
        .layer(build_cors_layer(cors))
        .layer(TraceLayer::new_for_http())
        .with_state(broker)
}

fn callback_route() -> MethodRouter<Arc<Broker>> {
    post(routes::callback)
        .options(routes::preflight)
        .fallback(routes::callback_method_not_allowed)
}

fn build_cors_layer(cors: &CorsConfig) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::HeaderName::from_static("x-requested-with"),
        ])
        .max_age(Duration::from_secs(cors.max_age_seconds));

    if cors.allowed_origins.is_empty() {
        return base;
    }
    if cors.allowed_origins.iter().all(|o| o == "*") {
        return base.allow_origin(Any);
    }

    let allowed: Vec<HeaderValue> = cors
        .allowed_origins
        .iter()
        .filter(|o| o.as_str() != "*")
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::error!(origin = %o, "invalid CORS origin; skipped");
                None
            }
        })
        .collect();

    if allowed.is_empty() {
        tracing::warn!("all configured CORS origins were invalid; CORS disabled");
        base
    } else {
        base.allow_origin(AllowOrigin::list(allowed))
    }
}

/// Serve until `shutdown` resolves.
///
/// Peer addresses are exposed to handlers through `ConnectInfo`; the
/// callback origin check uses them as its last client-address fallback.
///
/// # Errors
///
/// Returns the I/O error that stopped the accept loop.
pub async fn serve<F>(listener: TcpListener, router: Router, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(%addr, "relay listening");
    }
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::AppBuilder;
    use crate::domain::{Action, CorrelationId};
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn app() -> (Arc<Broker>, Router) {
        let broker = Arc::new(
            AppBuilder::new()
                .worker_url("https://agent.example.com")
                .stt_url("http://127.0.0.1:9")
                .build()
                .unwrap(),
        );
        let router = router(broker.clone(), &CorsConfig::default());
        (broker, router)
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_is_ok() {
        let (_, router) = app();
        let response = router
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({"status": "ok"}));
    }

    #[tokio::test]
    async fn options_is_ok_everywhere() {
        for path in ["/api/execute", "/callback", LEGACY_CALLBACK_PATH, "/health"] {
            let (_, router) = app();
            let response = router
                .oneshot(
                    Request::builder()
                        .method(Method::OPTIONS)
                        .uri(path)
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK, "OPTIONS {path}");
        }
    }

    #[tokio::test]
    async fn cors_headers_on_preflight() {
        let (_, router) = app();
        let response = router
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/api/execute")
                    .header(header::ORIGIN, "https://ui.example.com")
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "*"
        );
    }

    #[tokio::test]
    async fn wrong_method_is_405() {
        let (_, router) = app();
        let response = router
            .clone()
            .oneshot(Request::get("/api/execute").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(json_body(response).await, json!({"error": "Method not allowed"}));

        let response = router
            .oneshot(Request::get("/callback").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(json_body(response).await["success"], json!(false));
    }

    #[tokio::test]
    async fn invalid_job_is_400() {
        let (_, router) = app();
        let response = router
            .clone()
            .oneshot(post_json("/api/execute", json!({"type": "text", "prompt": ""})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            json_body(response).await,
            json!({"error": "Prompt is required for text requests"})
        );

        let response = router
            .oneshot(post_json("/api/execute", json!({"type": "video"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn untrusted_callback_is_403() {
        let (broker, router) = app();
        let (id, _pending) = broker.registry().register(None, Duration::from_secs(30));

        let mut request = post_json(
            &format!("/callback?request_id={id}"),
            json!({"actions_list": []}),
        );
        request
            .headers_mut()
            .insert(header::REFERER, HeaderValue::from_static("https://evil.test/"));

        let response = router.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = json_body(response).await;
        assert_eq!(body["success"], json!(false));
        assert_eq!(
            body["error"],
            json!("Forbidden: Only the trusted worker can call this endpoint")
        );
        assert!(broker.registry().contains(&id));
    }

    fn trusted_post(uri: &str, body: Value) -> Request<Body> {
        let mut request = post_json(uri, body);
        request.headers_mut().insert(
            header::REFERER,
            HeaderValue::from_static("https://agent.example.com/"),
        );
        request
    }

    #[tokio::test]
    async fn callback_for_unknown_id_is_404() {
        let (_, router) = app();
        let response = router
            .oneshot(trusted_post(
                "/callback?request_id=req_missing",
                json!({"actions_list": []}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = json_body(response).await;
        assert_eq!(
            body["error"],
            json!("No pending request found for request_id: req_missing")
        );
    }

    #[tokio::test]
    async fn malformed_callback_is_400() {
        let (broker, router) = app();
        let (id, _pending) = broker.registry().register(None, Duration::from_secs(30));

        let response = router
            .clone()
            .oneshot(trusted_post(
                &format!("/callback?request_id={id}"),
                json!({"actions_list": [], "error": "boom"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = router
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri(format!("/callback?request_id={id}"))
                    .header(header::REFERER, "https://agent.example.com/")
                    .body(Body::from("not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(broker.registry().contains(&id));
    }

    #[tokio::test]
    async fn duplicated_query_id_is_400_and_resolves_nothing() {
        let (broker, router) = app();
        let (first, _first_pending) = broker
            .registry()
            .register(Some(CorrelationId::new("req_a")), Duration::from_secs(30));
        let (second, _second_pending) = broker
            .registry()
            .register(Some(CorrelationId::new("req_b")), Duration::from_secs(30));

        let response = router
            .oneshot(trusted_post(
                "/callback?request_id=req_b&request_id=req_b",
                json!({"actions_list": [{"x": ["for_b"]}]}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(json_body(response).await["success"], json!(false));

        // 最古の req_a に誤配送されていないこと
        assert!(broker.registry().contains(&first));
        assert!(broker.registry().contains(&second));
    }

    #[tokio::test]
    async fn untrusted_callback_with_bad_query_is_still_403() {
        let (_, router) = app();
        let response = router
            .oneshot(post_json(
                "/callback?request_id=a&request_id=b",
                json!({"actions_list": []}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn legacy_callback_path_delivers() {
        let (broker, router) = app();
        let (id, pending) = broker
            .registry()
            .register(Some(CorrelationId::new("req_legacy")), Duration::from_secs(30));

        let response = router
            .oneshot(trusted_post(
                LEGACY_CALLBACK_PATH,
                json!({"request_id": id.as_str(), "actions_list": [{"open": ["app"]}]}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({"success": true}));
        assert_eq!(
            pending.wait().await.unwrap(),
            vec![Action(json!({"open": ["app"]}))]
        );
    }

    #[tokio::test]
    async fn status_counts_pending_without_ids() {
        let (broker, router) = app();
        let (id, _pending) = broker.registry().register(None, Duration::from_secs(30));

        let response = router
            .oneshot(Request::get("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["mode"], json!("keyed"));
        assert_eq!(body["pending"], json!(1));
        assert_eq!(body["requests"][0]["timeout_ms"], json!(30_000));
        assert!(body["requests"][0].get("request_id").is_none());
        assert!(!body.to_string().contains(id.as_str()));
    }
}
