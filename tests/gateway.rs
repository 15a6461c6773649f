use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use docintel::credentials::StaticCredentials;
use docintel::logging;
use docintel::models::ApiKeys;
use docintel::providers::{ProviderEndpoint, ProviderEndpoints, OPENAI_MODEL, QWEN_MODEL};
use docintel::server::{router, AppState};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn endpoints(base: &str) -> ProviderEndpoints {
    ProviderEndpoints {
        qwen: ProviderEndpoint {
            url: format!("{}/qwen", base),
            model: QWEN_MODEL.to_string(),
        },
        openai: ProviderEndpoint {
            url: format!("{}/openai", base),
            model: OPENAI_MODEL.to_string(),
        },
    }
}

fn app(base: &str, keys: ApiKeys) -> Router {
    logging::init_test();
    let state = AppState::new(endpoints(base), Arc::new(StaticCredentials::new(keys)));
    router(Arc::new(state))
}

fn server_keys() -> ApiKeys {
    ApiKeys {
        openai: Some("sk-server".to_string()),
        qwen: Some("dash-server".to_string()),
    }
}

async fn post(app: Router, uri: &str, body: Value) -> (StatusCode, Value) {
    let req = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let res = app.oneshot(req).await.unwrap();
    let status = res.status();
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

#[tokio::test]
async fn health_reports_ok() {
    let app = app("http://127.0.0.1:9", ApiKeys::default());
    let req = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let json: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["status"], "OK");
    let timestamp = json["timestamp"].as_str().unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());
}

#[tokio::test]
async fn missing_qwen_key_is_a_configuration_error() {
    let app = app("http://127.0.0.1:9", ApiKeys::default());
    let (status, body) = post(
        app,
        "/api/ai-proxy",
        json!({"engine": "qwen", "userMessage": "hello"}),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let error = body["error"].as_str().unwrap();
    assert!(error.contains("Qwen"));
    assert!(error.contains("Settings"));
}

#[tokio::test]
async fn unsupported_engine_is_rejected() {
    let app = app("http://127.0.0.1:9", server_keys());
    let (status, body) = post(
        app.clone(),
        "/api/ai-proxy",
        json!({"engine": "docintel", "userMessage": "hello"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("Unsupported AI engine"));

    let (status, _) = post(app, "/functions/v1/ai-proxy", json!({"userMessage": "hello"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn upstream_status_is_propagated() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/qwen"))
        .respond_with(ResponseTemplate::new(429).set_body_json(json!({
            "code": "Throttling",
            "message": "Requests rate limit exceeded"
        })))
        .mount(&upstream)
        .await;

    let app = app(&upstream.uri(), server_keys());
    let (status, body) = post(
        app,
        "/api/ai-proxy",
        json!({"engine": "qwen", "userMessage": "hello"}),
    )
    .await;

    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    let error = body["error"].as_str().unwrap();
    assert!(error.contains("429"));
    assert_eq!(error, "Qwen API error (429): Requests rate limit exceeded");
    assert_eq!(body["details"]["code"], "Throttling");
}

#[tokio::test]
async fn qwen_success_is_normalized() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/qwen"))
        .and(header("authorization", "Bearer dash-server"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "output": {"choices": [{"message": {"content": "hi"}}]}
        })))
        .expect(1)
        .mount(&upstream)
        .await;

    let app = app(&upstream.uri(), server_keys());
    let (status, body) = post(app, "/api/qwen-proxy", json!({"userMessage": "hello"})).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"content": "hi", "usage": null}));
}

#[tokio::test]
async fn caller_key_takes_precedence_over_server_key() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/openai"))
        .and(header("authorization", "Bearer sk-caller"))
        .and(body_partial_json(json!({"model": "gpt-4", "max_tokens": 1500})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"content": "Yes, March 1st."}}],
            "usage": {"prompt_tokens": 30, "completion_tokens": 5, "total_tokens": 35}
        })))
        .expect(1)
        .mount(&upstream)
        .await;

    let app = app(&upstream.uri(), server_keys());
    let (status, body) = post(
        app,
        "/api/ai-proxy",
        json!({
            "engine": "openai",
            "apiKey": "sk-caller",
            "contextInfo": "Folder: Legal",
            "userMessage": "Any deadlines?",
            "messages": []
        }),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["content"], "Yes, March 1st.");
    assert_eq!(body["usage"]["total_tokens"], 35);

    let received = upstream.received_requests().await.unwrap();
    let sent: Value = serde_json::from_slice(&received[0].body).unwrap();
    assert_eq!(sent["messages"][0]["role"], "system");
    assert_eq!(
        sent["messages"][1]["content"],
        "Context: Folder: Legal\n\nQuestion: Any deadlines?"
    );
}

#[tokio::test]
async fn unexpected_qwen_shape_returns_raw_body() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/qwen"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "output": {"text": "plain text result"},
            "request_id": "req-1"
        })))
        .mount(&upstream)
        .await;

    let app = app(&upstream.uri(), server_keys());
    let (status, body) = post(app, "/api/qwen-proxy", json!({"userMessage": "hello"})).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Invalid response format from Qwen API");
    assert_eq!(body["details"]["request_id"], "req-1");
}

#[tokio::test]
async fn unreachable_upstream_is_a_connection_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    drop(listener);

    let app = app(&base, server_keys());
    let (status, body) = post(app, "/api/openai-proxy", json!({"userMessage": "hello"})).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["type"], "connection_error");
}

#[tokio::test]
async fn malformed_body_is_an_internal_error() {
    let app = app("http://127.0.0.1:9", server_keys());
    let req = Request::builder()
        .method("POST")
        .uri("/api/ai-proxy")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let res = app.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    let json: Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(json["error"], "Internal server error while processing your request");
    assert!(json["details"].is_string());
}
