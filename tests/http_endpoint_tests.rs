//! Integration tests for the HTTP executor against a mock server.

use std::time::Duration;

use pacedload::errors::ErrorCategory;
use pacedload::executor::Executor;
use pacedload::http_endpoint::{HttpEndpoint, ResponseValidation};
use reqwest::Url;
use wiremock::matchers::{basic_auth, body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(5))
        .build()
        .expect("Failed to create HTTP client")
}

fn base(server: &MockServer) -> Url {
    Url::parse(&server.uri()).unwrap()
}

#[tokio::test]
async fn test_get_success_reports_url_and_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/users"))
        .respond_with(ResponseTemplate::new(200).set_body_string("[]"))
        .expect(1)
        .mount(&server)
        .await;

    let endpoint = HttpEndpoint::builder("users", client(), base(&server).join("api").unwrap())
        .path("/users")
        .build()
        .unwrap();

    let response = endpoint.execute().await;
    assert_eq!(response.identifier, "users");
    assert!(response.error.is_none());

    let data = response.additional_data.expect("data is attached");
    assert_eq!(data["status"], 200);
    assert_eq!(data["url"], format!("{}/api/users", server.uri()));

    println!("✅ GET request succeeds");
}

#[tokio::test]
async fn test_server_error_is_categorized() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let endpoint = HttpEndpoint::builder("health", client(), base(&server))
        .path("/health")
        .build()
        .unwrap();

    let error = endpoint.execute().await.error.expect("503 is a failure");
    assert_eq!(error.category, ErrorCategory::ServerError);
    assert_eq!(error.status_code, Some(503));
}

#[tokio::test]
async fn test_client_error_is_categorized() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let endpoint = HttpEndpoint::builder("missing", client(), base(&server))
        .path("/missing")
        .build()
        .unwrap();

    let error = endpoint.execute().await.error.expect("404 is a failure");
    assert_eq!(error.category, ErrorCategory::ClientError);
}

#[tokio::test]
async fn test_post_with_headers_body_and_auth() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/users"))
        .and(header("content-type", "application/json"))
        .and(body_string(r#"{"name":"test"}"#))
        .and(basic_auth("admin", "secret"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let endpoint = HttpEndpoint::builder("create", client(), base(&server))
        .path("users")
        .method("post")
        .header("Content-Type", "application/json")
        .body(r#"{"name":"test"}"#)
        .basic_auth("admin", Some("secret".to_string()))
        .validation(ResponseValidation::ExpectStatus(201))
        .build()
        .unwrap();

    let response = endpoint.execute().await;
    assert!(response.error.is_none(), "{:?}", response.error);
}

#[tokio::test]
async fn test_expected_status_mismatch_fails() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let endpoint = HttpEndpoint::builder("delete", client(), base(&server))
        .path("/users/1")
        .method("DELETE")
        .validation(ResponseValidation::ExpectStatus(204))
        .build()
        .unwrap();

    let error = endpoint.execute().await.error.expect("200 isn't 204");
    assert_eq!(error.status_code, Some(200));
    assert!(error.message.contains("204"));
}

#[tokio::test]
async fn test_no_validation_accepts_any_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let endpoint = HttpEndpoint::builder("anything", client(), base(&server))
        .validation(ResponseValidation::None)
        .build()
        .unwrap();

    assert!(endpoint.execute().await.error.is_none());
}

#[tokio::test]
async fn test_connection_refused_is_network_error() {
    // Bind and drop a listener to get a port nothing listens on.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let base = Url::parse(&format!("http://127.0.0.1:{}", port)).unwrap();

    let endpoint = HttpEndpoint::builder("down", client(), base)
        .build()
        .unwrap();

    let response = endpoint.execute().await;
    let error = response.error.expect("nothing is listening");
    assert_eq!(error.category, ErrorCategory::NetworkError);
    assert!(response.additional_data.is_some());
}
