//! Integration tests for YAML load test plans.
//!
//! These tests load plans from disk, convert them into runnable load tests and
//! run them against a mock server.

use std::io::Write;
use std::time::Duration;

use pacedload::load_models::LoadModel;
use pacedload::load_test::LoadTest;
use pacedload::pacer::Rate;
use pacedload::yaml_config::{LoadTestPlan, YamlConfigError};
use tempfile::NamedTempFile;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn write_plan(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_plan_from_file() {
    let file = write_plan(
        r#"
baseUrl: "https://api.example.com"
duration: 30
seed: 7
pacer:
  type: steps
  points:
    - { minute: 0, rpm: 60 }
    - { minute: 2, rpm: 120 }
weightOverrides:
  search: 5
endpoints:
  - name: home
    path: /
  - name: search
    path: /search?q=rust
"#,
    );

    let plan = LoadTestPlan::from_file(file.path()).unwrap();
    assert_eq!(plan.endpoints.len(), 2);
    assert_eq!(plan.seed, Some(7));
    assert_eq!(plan.weight_overrides.get("search"), Some(&5));
    assert_eq!(
        plan.load_model().unwrap(),
        LoadModel::Steps {
            points: vec![(0, 60), (2, 120)]
        }
    );

    let schedule = plan.load_model().unwrap().step_schedule().unwrap().unwrap();
    assert_eq!(schedule, vec![(0, 60), (1, 90), (2, 120)]);

    let config = plan.to_load_test_config().unwrap();
    assert_eq!(config.duration, Some(Duration::from_secs(30)));
    assert_eq!(config.executors.len(), 2);
    assert_eq!(config.seed, Some(7));

    println!("✅ Plan loads from file");
}

#[test]
fn test_missing_file_is_reported() {
    let result = LoadTestPlan::from_file("/nonexistent/plan.yaml");
    assert!(matches!(result, Err(YamlConfigError::FileRead(_))));
}

#[test]
fn test_invalid_plans_are_rejected() {
    let no_endpoints = r#"
baseUrl: "https://api.example.com"
pacer:
  type: constant
  rate: "1/s"
endpoints: []
"#;
    assert!(matches!(
        no_endpoints.parse::<LoadTestPlan>(),
        Err(YamlConfigError::Validation(_))
    ));

    let bad_rate = r#"
baseUrl: "https://api.example.com"
pacer:
  type: constant
  rate: "fast"
endpoints:
  - name: home
"#;
    assert!(matches!(
        bad_rate.parse::<LoadTestPlan>(),
        Err(YamlConfigError::Pacer(_))
    ));

    let not_yaml = "baseUrl: [unclosed";
    assert!(matches!(
        not_yaml.parse::<LoadTestPlan>(),
        Err(YamlConfigError::YamlParse(_))
    ));
}

#[tokio::test]
async fn test_plan_runs_against_server() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/orders"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let yaml = format!(
        r#"
baseUrl: "{}"
duration: "1s"
workers:
  initial: 2
  max: 4
reportInterval: "200ms"
pacer:
  type: constant
  rate: "20/s"
endpoints:
  - name: health
    path: /health
  - name: orders
    path: /orders
    method: POST
"#,
        server.uri()
    );
    let plan: LoadTestPlan = yaml.parse().unwrap();
    assert_eq!(
        plan.load_model().unwrap(),
        LoadModel::Constant {
            rate: Rate::per_second(20)
        }
    );

    let load_test = LoadTest::new(plan.to_load_test_config().unwrap()).unwrap();
    let results = load_test.run(CancellationToken::new()).await.unwrap();

    assert!(results.total_requests() > 5);
    let health = results.get("health").unwrap();
    assert_eq!(health.failed_requests(), 0);
    let orders = results.get("orders").unwrap();
    assert_eq!(orders.failed_requests(), orders.total_requests());
}
